// src/error.rs
use crate::command::Op;
use std::io;
use thiserror::Error;

/// Coarse category of an [`HddError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection could not be made or a send/receive failed.
    Transport,
    /// The store answered, but rejected the request or sent garbage.
    Protocol,
    /// Caught locally before anything went on the wire.
    Validation,
    /// The file table has no room left.
    Capacity,
}

#[derive(Debug, Error)]
pub enum HddError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Not connected to the block store")]
    NotConnected,
    #[error("Block store rejected {op:?} on block {block_id}")]
    Rejected { op: Op, block_id: u32 },
    #[error("Malformed response header {0:#018x}")]
    MalformedHeader(u64),
    #[error("Expected {expected} bytes from block {block_id}, got {got}")]
    SizeMismatch { block_id: u32, expected: usize, got: usize },
    #[error("Metadata block is corrupt: {0}")]
    CorruptMetadata(String),
    #[error("Device is not mounted")]
    NotMounted,
    #[error("Invalid file handle {0}")]
    InvalidHandle(usize),
    #[error("File handle {0} is not open")]
    NotOpen(usize),
    #[error("File '{0}' is already open")]
    AlreadyOpen(String),
    #[error("File name is empty")]
    EmptyName,
    #[error("File name is {len} bytes, limit is {max}")]
    NameTooLong { len: usize, max: usize },
    #[error("Seek to {offset} is past end of file ({size} bytes)")]
    SeekOutOfRange { offset: usize, size: usize },
    #[error("File handle {0} has no data block yet")]
    NoBackingBlock(usize),
    #[error("File would grow to {size} bytes, limit is {max}")]
    FileTooLarge { size: usize, max: usize },
    #[error("File table is full ({0} slots)")]
    TableFull(usize),
}

impl HddError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HddError::Io(_) | HddError::NotConnected => ErrorClass::Transport,
            HddError::Rejected { .. }
            | HddError::MalformedHeader(_)
            | HddError::SizeMismatch { .. }
            | HddError::CorruptMetadata(_) => ErrorClass::Protocol,
            HddError::TableFull(_) => ErrorClass::Capacity,
            _ => ErrorClass::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, HddError>;
