use core::fmt::{self, Display, Formatter};
use core::num::ParseIntError;
use core::str::FromStr;

use geometry::Address;
use serde::Serialize;
use thiserror::Error;

/// PIM commands understood by the bank-level attention accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Opcode {
    /// Write a slice of the input vector into the GEMV buffer (`PIM_WR_GB`).
    BroadcastWrite,
    /// All-bank multiply-accumulate against the open row (`PIM_MAC_AB`).
    MultiplyAccumulate,
    /// Move accumulated outputs to the softmax buffer (`PIM_MV_SB`).
    MoveToSoftmaxBuf,
    /// Move a vector from the softmax buffer into the GEMV buffer (`PIM_MV_GB`).
    MoveToComputeBuf,
    /// Softmax over the softmax buffer (`PIM_SFM`).
    Softmax,
    /// Per-channel completion fence (`PIM_BARRIER`).
    Barrier,
}

impl Opcode {
    pub const ALL: [Opcode; 6] = [
        Opcode::BroadcastWrite,
        Opcode::MultiplyAccumulate,
        Opcode::MoveToSoftmaxBuf,
        Opcode::MoveToComputeBuf,
        Opcode::Softmax,
        Opcode::Barrier,
    ];

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::BroadcastWrite => "PIM_WR_GB",
            Opcode::MultiplyAccumulate => "PIM_MAC_AB",
            Opcode::MoveToSoftmaxBuf => "PIM_MV_SB",
            Opcode::MoveToComputeBuf => "PIM_MV_GB",
            Opcode::Softmax => "PIM_SFM",
            Opcode::Barrier => "PIM_BARRIER",
        }
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == mnemonic)
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A single trace record: one opcode and its address operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    opcode: Opcode,
    addr: Address,
}

impl Command {
    pub const fn new(opcode: Opcode, addr: Address) -> Self {
        Self { opcode, addr }
    }

    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub const fn addr(&self) -> Address {
        self.addr
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.opcode, self.addr)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty record")]
    Empty,

    #[error("unknown opcode {0:?}")]
    UnknownOpcode(String),

    #[error("missing address operand")]
    MissingAddress,

    #[error("unexpected token {0:?} after address")]
    TrailingToken(String),

    #[error("invalid address {token:?}: {source}")]
    InvalidAddress {
        token: String,
        source: ParseIntError,
    },
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(record: &str) -> Result<Self, ParseError> {
        let mut tokens = record.split_whitespace();

        let mnemonic = tokens.next().ok_or(ParseError::Empty)?;
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| ParseError::UnknownOpcode(mnemonic.to_string()))?;

        let token = tokens.next().ok_or(ParseError::MissingAddress)?;
        let addr = u64::from_str_radix(token.trim_start_matches("0x"), 16).map_err(|source| {
            ParseError::InvalidAddress {
                token: token.to_string(),
                source,
            }
        })?;

        if let Some(extra) = tokens.next() {
            return Err(ParseError::TrailingToken(extra.to_string()));
        }

        Ok(Command::new(opcode, Address::new(addr)))
    }
}
