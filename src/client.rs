// src/client.rs
use crate::command::{Command, Flag, Op, HEADER_SIZE};
use crate::error::{HddError, Result};
use crate::transport::{Connector, Transport};
use log::{debug, trace};

/// Turns one logical request into the header/payload exchange on the
/// shared connection. Requests are strictly sequential.
pub struct HddClient<C: Connector> {
    transport: Transport<C>,
}

impl<C: Connector> HddClient<C> {
    pub fn new(connector: C) -> Self {
        Self { transport: Transport::new(connector) }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn transport(&self) -> &Transport<C> {
        &self.transport
    }

    /// Sends `cmd` (plus `payload` when the op carries one) and returns the
    /// decoded response together with any block data that followed it.
    /// The R bit is not interpreted here.
    pub fn execute(&mut self, cmd: Command, payload: &[u8]) -> Result<(Command, Vec<u8>)> {
        // 1. INIT opens the connection
        if cmd.flag == Flag::Init {
            self.transport.ensure_connected()?;
        }

        // 2. Header
        let header = cmd.to_bytes();
        trace!("-> {} {:?}", hex::encode(header), cmd);
        self.transport.send_all(&header)?;

        // 3. Outbound block
        if cmd.carries_payload() {
            assert_eq!(
                payload.len(),
                cmd.size(),
                "payload length disagrees with the header block size"
            );
            self.transport.send_all(payload)?;
        }

        // 4. Response header
        let raw = self.transport.recv_all(HEADER_SIZE)?;
        let mut word = [0u8; HEADER_SIZE];
        word.copy_from_slice(&raw);
        let resp = match Command::from_bytes(&word) {
            Ok(resp) => resp,
            Err(e) => {
                // Cannot tell how much payload follows
                self.transport.close();
                return Err(e);
            }
        };
        trace!("<- {} {:?}", hex::encode(word), resp);

        // 5. Inbound block
        let data = if resp.op == Op::BlockRead {
            self.transport.recv_all(resp.size())?
        } else {
            Vec::new()
        };

        // 6. SAVE_AND_CLOSE ends the session
        if cmd.flag == Flag::SaveAndClose {
            self.transport.close();
        }

        Ok((resp, data))
    }

    fn checked(&mut self, cmd: Command, payload: &[u8]) -> Result<(Command, Vec<u8>)> {
        let (resp, data) = self.execute(cmd, payload)?;
        if !resp.is_ok() {
            debug!("Store rejected {:?} (block {}, flag {:?})", cmd.op, cmd.block_id, cmd.flag);
            return Err(HddError::Rejected { op: cmd.op, block_id: cmd.block_id });
        }
        Ok((resp, data))
    }

    pub fn device(&mut self, flag: Flag) -> Result<()> {
        self.checked(Command::device(flag), &[])?;
        Ok(())
    }

    /// Stores `data` as a new block and returns its id.
    pub fn create_block(&mut self, data: &[u8], flag: Flag) -> Result<u32> {
        let (resp, _) = self.checked(Command::new(Op::BlockCreate, data.len(), flag, 0), data)?;
        // Id 0 means "no block" and can never name a data block
        if flag != Flag::MetaBlock && resp.block_id == 0 {
            return Err(HddError::MalformedHeader(resp.pack()));
        }
        debug!("Created block {} ({} bytes)", resp.block_id, data.len());
        Ok(resp.block_id)
    }

    pub fn read_block(&mut self, block_id: u32, size: usize, flag: Flag) -> Result<Vec<u8>> {
        let (_, data) = self.checked(Command::new(Op::BlockRead, size, flag, block_id), &[])?;
        if data.len() != size {
            return Err(HddError::SizeMismatch { block_id, expected: size, got: data.len() });
        }
        Ok(data)
    }

    pub fn overwrite_block(&mut self, block_id: u32, data: &[u8], flag: Flag) -> Result<()> {
        self.checked(Command::new(Op::BlockOverwrite, data.len(), flag, block_id), data)?;
        Ok(())
    }

    pub fn delete_block(&mut self, block_id: u32) -> Result<()> {
        self.checked(Command::new(Op::BlockDelete, 0, Flag::None, block_id), &[])?;
        debug!("Deleted block {}", block_id);
        Ok(())
    }
}
