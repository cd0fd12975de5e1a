// src/command.rs
//! Fixed-width command/response word exchanged with the block store.
//!
//! Both directions use the same 64-bit layout, sent big-endian:
//! ```text
//! Bits    Width  Field
//! 62..63  2      op
//! 36..61  26     block_size
//! 33..35  3      flag
//! 32      1      R (response: 0 = success)
//! 0..31   32     block_id
//! ```
//! The op field only has room for the four block operations. Device
//! requests reuse code 0 and are told apart from BLOCK_CREATE by their flag.

use crate::error::{HddError, Result};

/// Header size on the wire.
pub const HEADER_SIZE: usize = 8;

/// Largest payload a single block can hold (26 bits).
pub const MAX_BLOCK_SIZE: usize = (1 << 26) - 1;

const OP_SHIFT: u32 = 62;
const SIZE_SHIFT: u32 = 36;
const FLAG_SHIFT: u32 = 33;
const R_SHIFT: u32 = 32;

const OP_MASK: u64 = 0x3;
const SIZE_MASK: u64 = MAX_BLOCK_SIZE as u64;
const FLAG_MASK: u64 = 0x7;
const ID_MASK: u64 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Device,
    BlockCreate,
    BlockRead,
    BlockOverwrite,
    BlockDelete,
}

impl Op {
    fn code(self) -> u64 {
        match self {
            Op::Device | Op::BlockCreate => 0,
            Op::BlockRead => 1,
            Op::BlockOverwrite => 2,
            Op::BlockDelete => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flag {
    None = 0,
    Init = 1,
    Format = 2,
    SaveAndClose = 3,
    MetaBlock = 4,
}

impl Flag {
    /// Device-level flags select the DEVICE pseudo-operation.
    pub fn is_device(self) -> bool {
        matches!(self, Flag::Init | Flag::Format | Flag::SaveAndClose)
    }
}

impl TryFrom<u8> for Flag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0 => Ok(Flag::None),
            1 => Ok(Flag::Init),
            2 => Ok(Flag::Format),
            3 => Ok(Flag::SaveAndClose),
            4 => Ok(Flag::MetaBlock),
            other => Err(other),
        }
    }
}

/// Unpacked form of a command or response word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub op: Op,
    pub block_size: u32,
    pub flag: Flag,
    /// R bit. Requests send it clear; a response sets it on failure.
    pub result: bool,
    pub block_id: u32,
}

impl Command {
    pub fn new(op: Op, block_size: usize, flag: Flag, block_id: u32) -> Self {
        assert!(
            block_size <= MAX_BLOCK_SIZE,
            "block size {} does not fit in 26 bits",
            block_size
        );
        Command { op, block_size: block_size as u32, flag, result: false, block_id }
    }

    /// DEVICE request carrying one of the session-control flags.
    pub fn device(flag: Flag) -> Self {
        Command::new(Op::Device, 0, flag, 0)
    }

    pub fn with_result(mut self, failed: bool) -> Self {
        self.result = failed;
        self
    }

    pub fn is_ok(&self) -> bool {
        !self.result
    }

    pub fn size(&self) -> usize {
        self.block_size as usize
    }

    /// Whether a request with this header is followed by `block_size` payload bytes.
    pub fn carries_payload(&self) -> bool {
        matches!(self.op, Op::BlockCreate | Op::BlockOverwrite)
            && matches!(self.flag, Flag::None | Flag::MetaBlock)
    }

    /// Packs the fields into a host-order word.
    ///
    /// Panics if `block_size` overflows its field or if the op and flag
    /// disagree about being a device request; both are caller bugs.
    pub fn pack(&self) -> u64 {
        assert!(
            (self.block_size as u64) <= SIZE_MASK,
            "block size {} does not fit in 26 bits",
            self.block_size
        );
        assert_eq!(
            self.op == Op::Device,
            self.flag.is_device(),
            "{:?} cannot carry flag {:?}",
            self.op,
            self.flag
        );

        (self.op.code() << OP_SHIFT)
            | ((self.block_size as u64) << SIZE_SHIFT)
            | ((self.flag as u64) << FLAG_SHIFT)
            | ((self.result as u64) << R_SHIFT)
            | self.block_id as u64
    }

    pub fn unpack(word: u64) -> Result<Self> {
        let flag = Flag::try_from(((word >> FLAG_SHIFT) & FLAG_MASK) as u8)
            .map_err(|_| HddError::MalformedHeader(word))?;

        let op = match (word >> OP_SHIFT) & OP_MASK {
            0 if flag.is_device() => Op::Device,
            0 => Op::BlockCreate,
            1 => Op::BlockRead,
            2 => Op::BlockOverwrite,
            _ => Op::BlockDelete,
        };

        Ok(Command {
            op,
            block_size: ((word >> SIZE_SHIFT) & SIZE_MASK) as u32,
            flag,
            result: (word >> R_SHIFT) & 0x1 == 1,
            block_id: (word & ID_MASK) as u32,
        })
    }

    /// Network (big-endian) encoding.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        self.pack().to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        Command::unpack(u64::from_be_bytes(*bytes))
    }
}
