// src/loopback.rs
//! In-process block store speaking the same wire protocol as the remote one.
//!
//! `LoopbackConnector` hands the client streams that are served directly by
//! a [`MemoryStore`], optionally in tiny chunks so the short-I/O paths get
//! exercised. [`serve`] runs the same store over a real socket.

use crate::command::{Command, Flag, Op, HEADER_SIZE};
use crate::transport::{read_fully, write_fully, Connector};
use log::{debug, trace};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Error, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SharedStore = Arc<Mutex<MemoryStore>>;

pub struct MemoryStore {
    blocks: HashMap<u32, Vec<u8>>,
    meta: Option<Vec<u8>>,
    next_id: u32,
    // One-shot rejections, consumed by the next request with a matching op
    faults: Vec<Op>,
    requests: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            meta: None,
            next_id: 1,
            faults: Vec::new(),
            requests: 0,
        }
    }

    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn block(&self, block_id: u32) -> Option<&[u8]> {
        self.blocks.get(&block_id).map(|b| b.as_slice())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn meta_block(&self) -> Option<&[u8]> {
        self.meta.as_deref()
    }

    /// Number of requests handled so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Rejects the next request whose op is `op`.
    pub fn fail_next(&mut self, op: Op) {
        self.faults.push(op);
    }

    pub fn handle(&mut self, cmd: Command, payload: &[u8]) -> (Command, Vec<u8>) {
        self.requests += 1;

        if let Some(pos) = self.faults.iter().position(|op| *op == cmd.op) {
            self.faults.remove(pos);
            debug!("Loopback: injected failure for {:?}", cmd.op);
            return (reject(&cmd), Vec::new());
        }

        let is_meta = cmd.flag == Flag::MetaBlock;
        match cmd.op {
            Op::Device => {
                if cmd.flag == Flag::Format {
                    self.blocks.clear();
                    self.meta = None;
                    self.next_id = 1;
                }
                (Command::device(cmd.flag), Vec::new())
            }
            Op::BlockCreate => {
                let id = if is_meta {
                    self.meta = Some(payload.to_vec());
                    0
                } else {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.blocks.insert(id, payload.to_vec());
                    id
                };
                (Command::new(Op::BlockCreate, payload.len(), cmd.flag, id), Vec::new())
            }
            Op::BlockRead => {
                let stored = if is_meta { self.meta.as_ref() } else { self.blocks.get(&cmd.block_id) };
                match stored {
                    Some(data) if data.len() == cmd.size() => (
                        Command::new(Op::BlockRead, data.len(), cmd.flag, cmd.block_id),
                        data.clone(),
                    ),
                    _ => (reject(&cmd), Vec::new()),
                }
            }
            Op::BlockOverwrite => {
                let stored = if is_meta { self.meta.as_mut() } else { self.blocks.get_mut(&cmd.block_id) };
                match stored {
                    Some(data) if data.len() == payload.len() => {
                        data.copy_from_slice(payload);
                        (Command::new(Op::BlockOverwrite, payload.len(), cmd.flag, cmd.block_id), Vec::new())
                    }
                    _ => (reject(&cmd), Vec::new()),
                }
            }
            Op::BlockDelete => match self.blocks.remove(&cmd.block_id) {
                Some(_) => (Command::new(Op::BlockDelete, 0, Flag::None, cmd.block_id), Vec::new()),
                None => (reject(&cmd), Vec::new()),
            },
        }
    }
}

// No payload follows a rejection, whatever the op
fn reject(cmd: &Command) -> Command {
    Command::new(cmd.op, 0, cmd.flag, cmd.block_id).with_result(true)
}

fn lock(store: &SharedStore) -> MutexGuard<'_, MemoryStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

fn invalid(e: crate::error::HddError) -> Error {
    Error::new(ErrorKind::InvalidData, e.to_string())
}

/// Serves requests from `stream` until the peer hangs up or sends
/// SAVE_AND_CLOSE.
pub fn serve<S: Read + Write>(store: &SharedStore, stream: &mut S) -> io::Result<()> {
    loop {
        let raw = match read_fully(stream, HEADER_SIZE) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut word = [0u8; HEADER_SIZE];
        word.copy_from_slice(&raw);
        let cmd = Command::from_bytes(&word).map_err(invalid)?;

        let payload = if cmd.carries_payload() { read_fully(stream, cmd.size())? } else { Vec::new() };

        let (resp, data) = lock(store).handle(cmd, &payload);
        let mut reply = resp.to_bytes().to_vec();
        reply.extend_from_slice(&data);
        write_fully(stream, &reply)?;

        if cmd.flag == Flag::SaveAndClose {
            return Ok(());
        }
    }
}

#[derive(Clone)]
pub struct LoopbackConnector {
    store: SharedStore,
    max_chunk: Option<usize>,
    read_budget: Option<usize>,
    refuse: bool,
}

impl LoopbackConnector {
    pub fn new(store: SharedStore) -> Self {
        Self { store, max_chunk: None, read_budget: None, refuse: false }
    }

    /// Caps every read and write at `chunk` bytes.
    pub fn with_max_chunk(mut self, chunk: usize) -> Self {
        assert!(chunk > 0, "chunk size must be positive");
        self.max_chunk = Some(chunk);
        self
    }

    /// Streams report end-of-stream after delivering `bytes` bytes.
    pub fn hang_up_after(mut self, bytes: usize) -> Self {
        self.read_budget = Some(bytes);
        self
    }

    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}

impl Connector for LoopbackConnector {
    type Stream = LoopbackStream;

    fn connect(&self) -> io::Result<LoopbackStream> {
        if self.refuse {
            return Err(Error::new(ErrorKind::ConnectionRefused, "loopback store refused connection"));
        }
        Ok(LoopbackStream {
            store: self.store.clone(),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            max_chunk: self.max_chunk,
            read_budget: self.read_budget,
        })
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}

pub struct LoopbackStream {
    store: SharedStore,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    max_chunk: Option<usize>,
    read_budget: Option<usize>,
}

impl LoopbackStream {
    fn chunk(&self, want: usize) -> usize {
        self.max_chunk.map_or(want, |c| want.min(c))
    }

    // Handles every complete request sitting in the inbound buffer
    fn pump(&mut self) -> io::Result<()> {
        while self.inbound.len() >= HEADER_SIZE {
            let mut word = [0u8; HEADER_SIZE];
            word.copy_from_slice(&self.inbound[..HEADER_SIZE]);
            let cmd = Command::from_bytes(&word).map_err(invalid)?;

            let needed = HEADER_SIZE + if cmd.carries_payload() { cmd.size() } else { 0 };
            if self.inbound.len() < needed {
                return Ok(());
            }
            let request: Vec<u8> = self.inbound.drain(..needed).collect();

            let (resp, data) = lock(&self.store).handle(cmd, &request[HEADER_SIZE..]);
            trace!("Loopback: {:?} -> {:?}", cmd, resp);
            self.outbound.extend(resp.to_bytes());
            self.outbound.extend(data);
        }
        Ok(())
    }
}

impl Read for LoopbackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = self.chunk(buf.len()).min(self.outbound.len());
        if let Some(budget) = self.read_budget.as_mut() {
            n = n.min(*budget);
            *budget -= n;
        }
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopbackStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.chunk(buf.len());
        self.inbound.extend_from_slice(&buf[..n]);
        self.pump()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
