// src/file_table.rs
use crate::client::HddClient;
use crate::command::{Flag, MAX_BLOCK_SIZE};
use crate::error::{HddError, Result};
use crate::transport::Connector;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Number of file slots.
pub const MAX_FILES: usize = 128;
/// Longest file name, in bytes.
pub const MAX_NAME_LEN: usize = 128;

// bincode, fixed-width ints: position(8) + block_id(4) + block_size(8)
// + Option tag(1) + string length(8) + name bytes + status tag(4)
const RECORD_MAX_ENCODED: usize = 33 + MAX_NAME_LEN;

/// Size of the meta block: the encoded table, zero-padded.
pub const META_BLOCK_SIZE: usize = 8 + MAX_FILES * RECORD_MAX_ENCODED;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStatus {
    Closed,
    Open,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Current offset, never past `block_size`.
    pub position: usize,
    /// Backing block, 0 when nothing has been written yet.
    pub block_id: u32,
    /// Length of the backing block, which is the file length.
    pub block_size: usize,
    /// None marks a free slot.
    pub name: Option<String>,
    pub status: FileStatus,
}

impl FileRecord {
    pub fn empty() -> Self {
        FileRecord {
            position: 0,
            block_id: 0,
            block_size: 0,
            name: None,
            status: FileStatus::Closed,
        }
    }

    pub fn is_free(&self) -> bool {
        self.name.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.status == FileStatus::Open
    }

    fn claim(&mut self, name: &str) {
        *self = FileRecord {
            name: Some(name.to_string()),
            status: FileStatus::Open,
            ..FileRecord::empty()
        };
    }
}

/// Checks a name against the length bound.
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HddError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(HddError::NameTooLong { len: name.len(), max: MAX_NAME_LEN });
    }
    Ok(())
}

/// Fixed set of file slots, persisted as the store's meta block.
/// Handles are slot indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTable {
    records: Vec<FileRecord>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self { records: vec![FileRecord::empty(); MAX_FILES] }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Empties every slot and creates a fresh meta block holding the result.
    pub fn format_all<C: Connector>(&mut self, client: &mut HddClient<C>) -> Result<()> {
        self.records.iter_mut().for_each(|r| *r = FileRecord::empty());
        let block = self.to_meta_block()?;
        client.create_block(&block, Flag::MetaBlock)?;
        info!("File table formatted ({} slots)", self.capacity());
        Ok(())
    }

    /// Replaces the in-memory table with the store's meta block.
    pub fn load<C: Connector>(&mut self, client: &mut HddClient<C>) -> Result<()> {
        let block = client.read_block(0, META_BLOCK_SIZE, Flag::MetaBlock)?;
        *self = Self::from_meta_block(&block)?;
        debug!("File table loaded: {} named files", self.iter().count());
        Ok(())
    }

    pub fn persist<C: Connector>(&self, client: &mut HddClient<C>) -> Result<()> {
        let block = self.to_meta_block()?;
        client.overwrite_block(0, &block, Flag::MetaBlock)?;
        debug!("File table persisted");
        Ok(())
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|r| r.name.as_deref() == Some(name))
    }

    /// Claims a slot for `name`, marked open and empty.
    ///
    /// Takes the first free slot. With none left, a closed file that never
    /// received data is reused, as dropping it loses nothing.
    pub fn allocate_slot(&mut self, name: &str) -> Result<usize> {
        let fh = self
            .records
            .iter()
            .position(FileRecord::is_free)
            .or_else(|| {
                self.records
                    .iter()
                    .position(|r| !r.is_open() && r.block_id == 0)
            })
            .ok_or(HddError::TableFull(self.capacity()))?;

        if let Some(old) = self.records[fh].name.as_deref() {
            info!("Table full: slot {} of empty file '{}' reused for '{}'", fh, old, name);
        }
        self.records[fh].claim(name);
        Ok(fh)
    }

    pub fn validate(&self, fh: usize) -> Result<&FileRecord> {
        self.records.get(fh).ok_or(HddError::InvalidHandle(fh))
    }

    pub fn validate_mut(&mut self, fh: usize) -> Result<&mut FileRecord> {
        self.records.get_mut(fh).ok_or(HddError::InvalidHandle(fh))
    }

    /// Named slots with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &FileRecord)> {
        self.records.iter().enumerate().filter(|(_, r)| !r.is_free())
    }

    fn to_meta_block(&self) -> Result<Vec<u8>> {
        let mut block =
            bincode::serialize(&self.records).map_err(|e| HddError::CorruptMetadata(e.to_string()))?;
        if block.len() > META_BLOCK_SIZE {
            return Err(HddError::CorruptMetadata(format!(
                "table encodes to {} bytes, meta block holds {}",
                block.len(),
                META_BLOCK_SIZE
            )));
        }
        block.resize(META_BLOCK_SIZE, 0);
        Ok(block)
    }

    fn from_meta_block(block: &[u8]) -> Result<Self> {
        let mut records: Vec<FileRecord> =
            bincode::deserialize(block).map_err(|e| HddError::CorruptMetadata(e.to_string()))?;

        if records.len() != MAX_FILES {
            return Err(HddError::CorruptMetadata(format!(
                "expected {} records, found {}",
                MAX_FILES,
                records.len()
            )));
        }

        for (fh, record) in records.iter_mut().enumerate() {
            if record.name.as_ref().is_some_and(|n| n.is_empty() || n.len() > MAX_NAME_LEN) {
                return Err(HddError::CorruptMetadata(format!("slot {} has a bad name", fh)));
            }
            if record.block_id == 0 && record.block_size != 0 {
                return Err(HddError::CorruptMetadata(format!("slot {} has size without a block", fh)));
            }
            if record.block_size > MAX_BLOCK_SIZE {
                return Err(HddError::CorruptMetadata(format!(
                    "slot {} claims {} bytes, blocks hold at most {}",
                    fh, record.block_size, MAX_BLOCK_SIZE
                )));
            }
            // Handles never outlive a mount
            record.status = FileStatus::Closed;
            record.position = 0;
        }

        Ok(Self { records })
    }
}
