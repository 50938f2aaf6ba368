use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::{Command, Opcode, ParseError, Trace};

/// Destination of an ordered stream of trace records.
pub trait TraceSink {
    fn write_command(&mut self, command: &Command) -> io::Result<()>;

    /// Flush whatever the sink buffers. Called once after the last record.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TraceSink for Trace {
    fn write_command(&mut self, command: &Command) -> io::Result<()> {
        self.push(*command);
        Ok(())
    }
}

/// Writes one `<OPCODE> 0x<address>` record per line.
pub struct TextSink<W: Write> {
    writer: BufWriter<W>,
}

impl TextSink<File> {
    /// Create (or truncate) the trace file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write> TraceSink for TextSink<W> {
    fn write_command(&mut self, command: &Command) -> io::Result<()> {
        writeln!(self.writer, "{command}")
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Record counts per opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    #[serde(rename = "PIM_WR_GB")]
    pub broadcast_write: u64,
    #[serde(rename = "PIM_MAC_AB")]
    pub multiply_accumulate: u64,
    #[serde(rename = "PIM_MV_SB")]
    pub move_to_softmax_buf: u64,
    #[serde(rename = "PIM_MV_GB")]
    pub move_to_compute_buf: u64,
    #[serde(rename = "PIM_SFM")]
    pub softmax: u64,
    #[serde(rename = "PIM_BARRIER")]
    pub barrier: u64,
}

impl Statistics {
    fn slot_mut(&mut self, opcode: Opcode) -> &mut u64 {
        match opcode {
            Opcode::BroadcastWrite => &mut self.broadcast_write,
            Opcode::MultiplyAccumulate => &mut self.multiply_accumulate,
            Opcode::MoveToSoftmaxBuf => &mut self.move_to_softmax_buf,
            Opcode::MoveToComputeBuf => &mut self.move_to_compute_buf,
            Opcode::Softmax => &mut self.softmax,
            Opcode::Barrier => &mut self.barrier,
        }
    }

    pub fn count(&self, opcode: Opcode) -> u64 {
        match opcode {
            Opcode::BroadcastWrite => self.broadcast_write,
            Opcode::MultiplyAccumulate => self.multiply_accumulate,
            Opcode::MoveToSoftmaxBuf => self.move_to_softmax_buf,
            Opcode::MoveToComputeBuf => self.move_to_compute_buf,
            Opcode::Softmax => self.softmax,
            Opcode::Barrier => self.barrier,
        }
    }

    pub fn total(&self) -> u64 {
        Opcode::ALL.into_iter().map(|op| self.count(op)).sum()
    }
}

/// Trace sink with per-opcode statistics.
pub struct WithStats<S> {
    sink: S,
    statistics: Statistics,
}

impl<S> WithStats<S> {
    pub fn new(sink: S) -> Self {
        WithStats {
            sink,
            statistics: Statistics::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: TraceSink> TraceSink for WithStats<S> {
    fn write_command(&mut self, command: &Command) -> io::Result<()> {
        *self.statistics.slot_mut(command.opcode()) += 1;
        self.sink.write_command(command)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.sink.finish()
    }
}

/// Hand every record of `trace` to `sink` in order, then finish the sink.
pub fn write_trace(trace: &Trace, sink: &mut impl TraceSink) -> io::Result<()> {
    for command in trace {
        sink.write_command(command)?;
    }
    sink.finish()
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {source}")]
    Parse { line: usize, source: ParseError },
}

/// Parse a textual trace back into commands. Blank lines are skipped.
pub fn read_trace(reader: impl BufRead) -> Result<Trace, ReadError> {
    let mut trace = Trace::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let command = line
            .parse::<Command>()
            .map_err(|source| ReadError::Parse { line: i + 1, source })?;
        trace.push(command);
    }
    Ok(trace)
}
