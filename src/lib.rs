// src/lib.rs
//! # hddfs
//!
//! File-handle client for a remote block store reached over one stream
//! connection. Every file is a single variable-length block on the store;
//! a fixed-size file table is kept in a dedicated meta block.
//!
//! ```ignore
//! use hddfs::{ClientConfig, HddFs};
//!
//! let mut fs = HddFs::with_config(ClientConfig::default().with_port(19876));
//! fs.format()?;
//! fs.mount()?;
//! let fh = fs.open("a.txt")?;
//! fs.write(fh, b"hello")?;
//! fs.seek(fh, 0)?;
//! assert_eq!(fs.read(fh, 5)?, b"hello");
//! fs.close(fh)?;
//! fs.unmount()?;
//! ```
//!
//! - [`command`]: 64-bit command/response word
//! - [`transport`]: the connection and full-length send/receive
//! - [`client`]: one request/response exchange per call
//! - [`file_table`]: slot table persisted in the meta block
//! - [`hdd_fs`]: open/read/write/seek/close, format/mount/unmount
//! - [`loopback`]: in-memory store for tests and offline use
//! - [`workload`]: randomized self-check

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod file_table;
pub mod hdd_fs;
pub mod loopback;
pub mod transport;
pub mod workload;

pub use client::HddClient;
pub use command::{Command, Flag, Op, HEADER_SIZE, MAX_BLOCK_SIZE};
pub use config::ClientConfig;
pub use error::{ErrorClass, HddError, Result};
pub use file_table::{FileRecord, FileStatus, FileTable, MAX_FILES, MAX_NAME_LEN, META_BLOCK_SIZE};
pub use hdd_fs::{FileInfo, HddFs};
pub use loopback::{LoopbackConnector, MemoryStore, SharedStore};
pub use transport::{Connector, TcpConnector, Transport};
