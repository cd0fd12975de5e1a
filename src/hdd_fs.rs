// src/hdd_fs.rs
use crate::client::HddClient;
use crate::command::{Flag, MAX_BLOCK_SIZE};
use crate::config::ClientConfig;
use crate::error::{HddError, Result};
use crate::file_table::{check_name, FileRecord, FileStatus, FileTable};
use crate::transport::{Connector, TcpConnector};
use log::{debug, info, warn};

/// Listing entry for a named slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub handle: usize,
    pub name: String,
    pub size: usize,
    pub block_id: u32,
    pub status: FileStatus,
}

/// File-handle view of the block store.
///
/// Each file lives in exactly one block. Writes that fit inside the block
/// rewrite it in place. Writes past its end copy the file into a larger new
/// block and delete the old one afterwards.
pub struct HddFs<C: Connector> {
    client: HddClient<C>,
    // None until format/mount, and again after unmount
    table: Option<FileTable>,
    // Superseded blocks whose delete failed, retried at unmount
    orphans: Vec<u32>,
}

impl HddFs<TcpConnector> {
    pub fn with_config(config: ClientConfig) -> Self {
        Self::new(TcpConnector::new(config))
    }
}

impl<C: Connector> HddFs<C> {
    pub fn new(connector: C) -> Self {
        Self { client: HddClient::new(connector), table: None, orphans: Vec::new() }
    }

    pub fn client(&self) -> &HddClient<C> {
        &self.client
    }

    pub fn is_mounted(&self) -> bool {
        self.table.is_some()
    }

    pub fn orphaned_blocks(&self) -> &[u32] {
        &self.orphans
    }

    fn ensure_initialized(&mut self) -> Result<()> {
        if !self.client.is_connected() {
            self.client.device(Flag::Init)?;
        }
        Ok(())
    }

    /// Wipes the store and writes an empty file table.
    pub fn format(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        // The old table stops describing the store once FORMAT is sent
        self.table = None;
        self.client.device(Flag::Format)?;
        self.orphans.clear();

        let mut table = FileTable::new();
        table.format_all(&mut self.client)?;
        self.table = Some(table);
        info!("Device formatted");
        Ok(())
    }

    pub fn mount(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        let mut table = FileTable::new();
        table.load(&mut self.client)?;
        self.table = Some(table);
        info!("Device mounted");
        Ok(())
    }

    /// Saves the file table and closes the session. Reconnects first if an
    /// earlier transport error dropped the connection.
    pub fn unmount(&mut self) -> Result<()> {
        if self.table.is_none() {
            return Err(HddError::NotMounted);
        }
        self.ensure_initialized()?;
        self.reclaim_orphans();

        if let Some(table) = self.table.as_ref() {
            table.persist(&mut self.client)?;
        }
        self.client.device(Flag::SaveAndClose)?;
        self.table = None;
        info!("Device unmounted");
        Ok(())
    }

    pub fn open(&mut self, name: &str) -> Result<usize> {
        check_name(name)?;
        let table = self.table_mut()?;

        let fh = match table.find_by_name(name) {
            Some(fh) => {
                let record = table.validate_mut(fh)?;
                if record.is_open() {
                    return Err(HddError::AlreadyOpen(name.to_string()));
                }
                record.status = FileStatus::Open;
                record.position = 0;
                fh
            }
            None => table.allocate_slot(name)?,
        };

        debug!("Opened '{}' as handle {}", name, fh);
        Ok(fh)
    }

    pub fn close(&mut self, fh: usize) -> Result<()> {
        let record = self.open_record_mut(fh)?;
        record.status = FileStatus::Closed;
        record.position = 0;
        debug!("Closed handle {}", fh);
        Ok(())
    }

    pub fn seek(&mut self, fh: usize, offset: usize) -> Result<()> {
        let record = self.open_record_mut(fh)?;
        if offset > record.block_size {
            return Err(HddError::SeekOutOfRange { offset, size: record.block_size });
        }
        record.position = offset;
        Ok(())
    }

    pub fn tell(&self, fh: usize) -> Result<usize> {
        Ok(self.open_record(fh)?.position)
    }

    /// File length, whether or not the file is open.
    pub fn size(&self, fh: usize) -> Result<usize> {
        Ok(self.table()?.validate(fh)?.block_size)
    }

    pub fn files(&self) -> Result<Vec<FileInfo>> {
        Ok(self
            .table()?
            .iter()
            .filter_map(|(handle, r)| {
                r.name.as_ref().map(|name| FileInfo {
                    handle,
                    name: name.clone(),
                    size: r.block_size,
                    block_id: r.block_id,
                    status: r.status,
                })
            })
            .collect())
    }

    /// Reads up to `count` bytes from the current position. Fewer bytes
    /// come back at end of file.
    pub fn read(&mut self, fh: usize, count: usize) -> Result<Vec<u8>> {
        let (position, block_id, block_size) = cursor(self.open_record(fh)?);
        if block_id == 0 {
            return Err(HddError::NoBackingBlock(fh));
        }

        let block = self.client.read_block(block_id, block_size, Flag::None)?;
        let n = count.min(block_size - position);
        let data = block[position..position + n].to_vec();

        self.open_record_mut(fh)?.position += n;
        Ok(data)
    }

    /// Writes `data` at the current position and returns its length.
    pub fn write(&mut self, fh: usize, data: &[u8]) -> Result<usize> {
        let (position, block_id, block_size) = cursor(self.open_record(fh)?);
        if data.is_empty() {
            return Ok(0);
        }

        let end = position + data.len();
        if end > MAX_BLOCK_SIZE {
            return Err(HddError::FileTooLarge { size: end, max: MAX_BLOCK_SIZE });
        }

        let (new_id, new_size) = if block_id == 0 {
            // First write: the file starts at offset 0 of its own block
            (self.client.create_block(data, Flag::None)?, data.len())
        } else if end <= block_size {
            let mut block = self.client.read_block(block_id, block_size, Flag::None)?;
            block[position..end].copy_from_slice(data);
            self.client.overwrite_block(block_id, &block, Flag::None)?;
            (block_id, block_size)
        } else {
            (self.grow(block_id, block_size, position, data)?, end)
        };

        let record = self.open_record_mut(fh)?;
        record.block_id = new_id;
        record.block_size = new_size;
        record.position = end;
        Ok(data.len())
    }

    // Copies the file into a new block of `position + data.len()` bytes.
    // The old block is only deleted once the new one exists.
    fn grow(&mut self, block_id: u32, block_size: usize, position: usize, data: &[u8]) -> Result<u32> {
        let old = self.client.read_block(block_id, block_size, Flag::None)?;

        let mut block = vec![0u8; position + data.len()];
        block[..block_size].copy_from_slice(&old);
        block[position..].copy_from_slice(data);

        let new_id = self.client.create_block(&block, Flag::None)?;
        debug!(
            "Grew block {} ({} bytes) into block {} ({} bytes)",
            block_id,
            block_size,
            new_id,
            block.len()
        );

        if let Err(e) = self.client.delete_block(block_id) {
            warn!("Could not delete superseded block {}: {}", block_id, e);
            self.orphans.push(block_id);
        }
        Ok(new_id)
    }

    fn reclaim_orphans(&mut self) {
        for block_id in std::mem::take(&mut self.orphans) {
            match self.client.delete_block(block_id) {
                Ok(()) => info!("Reclaimed superseded block {}", block_id),
                Err(e) => {
                    warn!("Superseded block {} still allocated: {}", block_id, e);
                    self.orphans.push(block_id);
                }
            }
        }
    }

    fn table(&self) -> Result<&FileTable> {
        self.table.as_ref().ok_or(HddError::NotMounted)
    }

    fn table_mut(&mut self) -> Result<&mut FileTable> {
        self.table.as_mut().ok_or(HddError::NotMounted)
    }

    fn open_record(&self, fh: usize) -> Result<&FileRecord> {
        let record = self.table()?.validate(fh)?;
        if !record.is_open() {
            return Err(HddError::NotOpen(fh));
        }
        Ok(record)
    }

    fn open_record_mut(&mut self, fh: usize) -> Result<&mut FileRecord> {
        let record = self.table_mut()?.validate_mut(fh)?;
        if !record.is_open() {
            return Err(HddError::NotOpen(fh));
        }
        Ok(record)
    }
}

fn cursor(record: &FileRecord) -> (usize, u32, usize) {
    (record.position, record.block_id, record.block_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Op};
    use crate::file_table::{MAX_FILES, META_BLOCK_SIZE};
    use crate::loopback::{LoopbackConnector, MemoryStore, SharedStore};

    fn formatted() -> (HddFs<LoopbackConnector>, SharedStore) {
        let store = MemoryStore::shared();
        let mut fs = HddFs::new(LoopbackConnector::new(store.clone()));
        fs.format().unwrap();
        fs.mount().unwrap();
        (fs, store)
    }

    #[test]
    fn test_hello_scenario() {
        let (mut fs, _) = formatted();
        let fh = fs.open("a.txt").unwrap();
        assert_eq!(fh, 0);
        assert_eq!(fs.write(fh, b"hello").unwrap(), 5);
        fs.seek(fh, 0).unwrap();
        assert_eq!(fs.read(fh, 5).unwrap(), b"hello");
        fs.close(fh).unwrap();
        fs.unmount().unwrap();
        assert!(!fs.is_mounted());
        assert!(!fs.client().is_connected());
    }

    #[test]
    fn test_operations_need_mount() {
        let store = MemoryStore::shared();
        let mut fs = HddFs::new(LoopbackConnector::new(store));
        assert!(matches!(fs.open("a"), Err(HddError::NotMounted)));
        assert!(matches!(fs.read(0, 1), Err(HddError::NotMounted)));
        assert!(matches!(fs.write(0, b"x"), Err(HddError::NotMounted)));
        assert!(matches!(fs.unmount(), Err(HddError::NotMounted)));
    }

    #[test]
    fn test_open_rules() {
        let (mut fs, _) = formatted();
        assert!(matches!(fs.open(""), Err(HddError::EmptyName)));
        assert!(matches!(fs.open(&"x".repeat(129)), Err(HddError::NameTooLong { .. })));

        let fh = fs.open("dup").unwrap();
        assert!(matches!(fs.open("dup"), Err(HddError::AlreadyOpen(_))));

        fs.write(fh, b"keep").unwrap();
        fs.close(fh).unwrap();
        assert!(matches!(fs.close(fh), Err(HddError::NotOpen(_))));

        // Reopen lands on the same slot, rewound, content intact
        assert_eq!(fs.open("dup").unwrap(), fh);
        assert_eq!(fs.tell(fh).unwrap(), 0);
        assert_eq!(fs.read(fh, 100).unwrap(), b"keep");
    }

    #[test]
    fn test_seek_bounds() {
        let (mut fs, _) = formatted();
        let fh = fs.open("s").unwrap();
        fs.write(fh, b"0123456789").unwrap();
        for offset in [0, 5, 10] {
            fs.seek(fh, offset).unwrap();
            assert_eq!(fs.tell(fh).unwrap(), offset);
        }
        assert!(matches!(
            fs.seek(fh, 11),
            Err(HddError::SeekOutOfRange { offset: 11, size: 10 })
        ));
        assert!(matches!(fs.seek(MAX_FILES, 0), Err(HddError::InvalidHandle(_))));
    }

    #[test]
    fn test_read_is_short_at_eof() {
        let (mut fs, _) = formatted();
        let fh = fs.open("r").unwrap();
        assert!(matches!(fs.read(fh, 1), Err(HddError::NoBackingBlock(_))));

        fs.write(fh, b"abcdef").unwrap();
        fs.seek(fh, 4).unwrap();
        assert_eq!(fs.read(fh, 10).unwrap(), b"ef");
        assert_eq!(fs.read(fh, 10).unwrap(), b"");
        assert_eq!(fs.tell(fh).unwrap(), 6);
    }

    #[test]
    fn test_overwrite_in_place_keeps_block() {
        let (mut fs, store) = formatted();
        let fh = fs.open("o").unwrap();
        fs.write(fh, b"aaaaaaaa").unwrap();
        let before = fs.files().unwrap()[0].clone();

        fs.seek(fh, 2).unwrap();
        fs.write(fh, b"XYZ").unwrap();
        assert_eq!(fs.tell(fh).unwrap(), 5);
        assert_eq!(fs.size(fh).unwrap(), 8);

        let block_count = store.lock().unwrap().block_count();
        assert_eq!(block_count, 1);
        fs.seek(fh, 0).unwrap();
        assert_eq!(fs.read(fh, 8).unwrap(), b"aaXYZaaa");
        assert_eq!(fs.files().unwrap()[0].size, before.size);
    }

    #[test]
    fn test_growth_preserves_prefix() {
        let (mut fs, store) = formatted();
        let fh = fs.open("g").unwrap();
        fs.write(fh, b"head-").unwrap();
        fs.write(fh, b"and-tail").unwrap();

        // Straddling the end also grows
        fs.seek(fh, 9).unwrap();
        fs.write(fh, b"TAIL!").unwrap();

        fs.seek(fh, 0).unwrap();
        assert_eq!(fs.read(fh, 100).unwrap(), b"head-and-TAIL!");
        assert_eq!(store.lock().unwrap().block_count(), 1);
        assert!(fs.orphaned_blocks().is_empty());
    }

    #[test]
    fn test_create_failure_leaves_file_untouched() {
        let (mut fs, store) = formatted();
        let fh = fs.open("c").unwrap();
        fs.write(fh, b"abc").unwrap();

        store.lock().unwrap().fail_next(Op::BlockCreate);
        assert!(matches!(fs.write(fh, b"defg"), Err(HddError::Rejected { op: Op::BlockCreate, .. })));
        assert_eq!(fs.size(fh).unwrap(), 3);
        assert_eq!(fs.tell(fh).unwrap(), 3);

        fs.seek(fh, 0).unwrap();
        assert_eq!(fs.read(fh, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_failed_delete_is_reclaimed_at_unmount() {
        let (mut fs, store) = formatted();
        let fh = fs.open("d").unwrap();
        fs.write(fh, b"one").unwrap();

        store.lock().unwrap().fail_next(Op::BlockDelete);
        assert_eq!(fs.write(fh, b"two").unwrap(), 3);
        assert_eq!(fs.orphaned_blocks().len(), 1);
        assert_eq!(store.lock().unwrap().block_count(), 2);

        fs.seek(fh, 0).unwrap();
        assert_eq!(fs.read(fh, 6).unwrap(), b"onetwo");

        fs.unmount().unwrap();
        assert!(fs.orphaned_blocks().is_empty());
        assert_eq!(store.lock().unwrap().block_count(), 1);
    }

    #[test]
    fn test_delete_failing_again_stays_queued() {
        let (mut fs, store) = formatted();
        let fh = fs.open("q").unwrap();
        fs.write(fh, b"one").unwrap();
        let old_id = fs.files().unwrap()[0].block_id;

        {
            let mut store = store.lock().unwrap();
            store.fail_next(Op::BlockDelete);
            store.fail_next(Op::BlockDelete);
        }
        fs.write(fh, b"two").unwrap();
        fs.close(fh).unwrap();

        // Retry at unmount is rejected too; the table is still saved
        fs.unmount().unwrap();
        assert_eq!(fs.orphaned_blocks(), &[old_id]);
        assert_eq!(store.lock().unwrap().block_count(), 2);

        fs.mount().unwrap();
        fs.unmount().unwrap();
        assert!(fs.orphaned_blocks().is_empty());
        assert!(store.lock().unwrap().block(old_id).is_none());
    }

    #[test]
    fn test_format_clears_orphan_queue() {
        let (mut fs, store) = formatted();
        let fh = fs.open("q").unwrap();
        fs.write(fh, b"one").unwrap();
        store.lock().unwrap().fail_next(Op::BlockDelete);
        fs.write(fh, b"two").unwrap();
        assert_eq!(fs.orphaned_blocks().len(), 1);

        fs.format().unwrap();
        assert!(fs.orphaned_blocks().is_empty());
        assert_eq!(store.lock().unwrap().block_count(), 0);
    }

    #[test]
    fn test_failed_format_unmounts() {
        let (mut fs, store) = formatted();
        let fh = fs.open("old").unwrap();
        fs.write(fh, b"old").unwrap();

        store.lock().unwrap().fail_next(Op::BlockCreate);
        assert!(matches!(fs.format(), Err(HddError::Rejected { op: Op::BlockCreate, .. })));
        assert!(!fs.is_mounted());
        assert!(matches!(fs.files(), Err(HddError::NotMounted)));
        assert!(matches!(fs.read(fh, 3), Err(HddError::NotMounted)));
        assert_eq!(store.lock().unwrap().block_count(), 0);

        fs.format().unwrap();
        assert!(fs.files().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_block_size_fails_mount() {
        let (mut fs, store) = formatted();
        let fh = fs.open("abc").unwrap();
        fs.write(fh, b"abc").unwrap();
        fs.unmount().unwrap();

        {
            let mut store = store.lock().unwrap();
            let meta = store.meta_block().unwrap().to_vec();
            let mut records: Vec<FileRecord> = bincode::deserialize(&meta).unwrap();
            records[0].block_size = 1 << 27;
            let mut block = bincode::serialize(&records).unwrap();
            block.resize(META_BLOCK_SIZE, 0);
            let cmd = Command::new(Op::BlockOverwrite, META_BLOCK_SIZE, Flag::MetaBlock, 0);
            assert!(store.handle(cmd, &block).0.is_ok());
        }

        assert!(matches!(fs.mount(), Err(HddError::CorruptMetadata(_))));
        assert!(!fs.is_mounted());
    }

    #[test]
    fn test_unmount_reconnects_after_transport_loss() {
        let store = MemoryStore::shared();
        // Same budget per connection: INIT, FORMAT, meta create and the data
        // create fit, the read response header is cut short
        let connector = LoopbackConnector::new(store.clone()).hang_up_after(8 * 4 + 4);
        let mut fs = HddFs::new(connector);
        fs.format().unwrap();
        let fh = fs.open("t").unwrap();
        fs.write(fh, b"data").unwrap();
        fs.seek(fh, 0).unwrap();
        assert!(fs.read(fh, 4).is_err());
        assert!(!fs.client().is_connected());

        fs.unmount().unwrap();
        assert!(!fs.is_mounted());

        let meta = store.lock().unwrap().meta_block().unwrap().to_vec();
        let records: Vec<FileRecord> = bincode::deserialize(&meta).unwrap();
        assert_eq!(records[0].name.as_deref(), Some("t"));
        assert_eq!(records[0].block_size, 4);
        assert_ne!(records[0].block_id, 0);
        assert_eq!(store.lock().unwrap().block(records[0].block_id), Some(&b"data"[..]));
    }

    #[test]
    fn test_empty_write_sends_nothing() {
        let (mut fs, store) = formatted();
        let fh = fs.open("e").unwrap();
        let requests = store.lock().unwrap().requests();
        assert_eq!(fs.write(fh, b"").unwrap(), 0);
        assert_eq!(store.lock().unwrap().requests(), requests);
    }

    #[test]
    fn test_closed_handle_rejects_io() {
        let (mut fs, _) = formatted();
        let fh = fs.open("c").unwrap();
        fs.write(fh, b"x").unwrap();
        fs.close(fh).unwrap();
        assert!(matches!(fs.write(fh, b"y"), Err(HddError::NotOpen(_))));
        assert!(matches!(fs.read(fh, 1), Err(HddError::NotOpen(_))));
        assert!(matches!(fs.seek(fh, 0), Err(HddError::NotOpen(_))));
        assert_eq!(fs.size(fh).unwrap(), 1);
    }

    #[test]
    fn test_transport_loss_aborts_operation() {
        let store = MemoryStore::shared();
        // INIT, FORMAT and meta create responses are 8 bytes each; the
        // read response header comes up short
        let connector = LoopbackConnector::new(store.clone()).hang_up_after(8 * 4 + 4);
        let mut fs = HddFs::new(connector);
        fs.format().unwrap();
        let fh = fs.open("t").unwrap();
        fs.write(fh, b"data").unwrap();

        fs.seek(fh, 0).unwrap();
        assert!(matches!(fs.read(fh, 4), Err(HddError::Io(_))));
        assert!(!fs.client().is_connected());
        assert_eq!(fs.tell(fh).unwrap(), 0);
        assert!(matches!(fs.read(fh, 4), Err(HddError::NotConnected)));
    }
}
