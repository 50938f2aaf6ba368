//! PIM command records and the trace they are collected into.

mod op;
mod sink;

pub use op::{Command, Opcode, ParseError};
pub use sink::{ReadError, Statistics, TextSink, TraceSink, WithStats, read_trace, write_trace};

/// The flat, ordered command sequence replayed by the accelerator simulator.
///
/// Position is significant: it is the only encoding of execution order. A trace can only grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    commands: Vec<Command>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn extend_from_slice(&mut self, commands: &[Command]) {
        self.commands.extend_from_slice(commands);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn as_slice(&self) -> &[Command] {
        &self.commands
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// Number of records carrying `opcode`.
    pub fn count(&self, opcode: Opcode) -> usize {
        self.commands
            .iter()
            .filter(|cmd| cmd.opcode() == opcode)
            .count()
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Command;
    type IntoIter = core::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

impl Extend<Command> for Trace {
    fn extend<I: IntoIterator<Item = Command>>(&mut self, iter: I) {
        self.commands.extend(iter);
    }
}

impl FromIterator<Command> for Trace {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}
