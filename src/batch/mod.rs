//! Write and read batches.
//!
//! A [`WriteBatch`] accumulates puts and deletes into one flat buffer that
//! is committed with a single control call. A [`ReadBatch`] queues keys and
//! per-key buffer sizes; it is encoded fresh for every round because the
//! session stamps it with the database, fill-cache flag and snapshot.

use crate::error::{Result, StorageError};
use crate::handle::ColumnFamilyHandle;
use crate::uapi::{BatchHeader, MAX_KEY_SIZE, MAX_VALUE_SIZE};

pub mod wire;

use wire::{
    align8, put_u32, serialize_header, slot_size, BATCH_MAGIC, HEADER_SIZE, KIND_READ,
    OP_DELETE, OP_PUT, READ_CMD_SIZE, WRITE_CMD_SIZE,
};

/// Value buffer reserved per key by [`ReadBatch::get`].
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Atomic (or non-atomic) group of puts and deletes.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    rep: Vec<u8>,
    count: u32,
    families: Vec<ColumnFamilyHandle>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self {
            rep: vec![0u8; HEADER_SIZE],
            count: 0,
            families: Vec::new(),
        }
    }

    pub fn put(&mut self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) {
        remember(&mut self.families, cf);
        self.append(OP_PUT, cf.cf_index(), key, value);
    }

    pub fn delete(&mut self, cf: &ColumnFamilyHandle, key: &[u8]) {
        remember(&mut self.families, cf);
        self.append(OP_DELETE, cf.cf_index(), key, &[]);
    }

    fn append(&mut self, op: u32, cf_index: i32, key: &[u8], value: &[u8]) {
        let start = self.rep.len();
        let end = align8(start + WRITE_CMD_SIZE + key.len() + value.len());
        self.rep.resize(end, 0);
        put_u32(&mut self.rep, start, op);
        put_u32(&mut self.rep, start + 4, cf_index as u32);
        put_u32(&mut self.rep, start + 8, key.len() as u32);
        put_u32(&mut self.rep, start + 12, value.len() as u32);
        let key_start = start + WRITE_CMD_SIZE;
        self.rep[key_start..key_start + key.len()].copy_from_slice(key);
        let value_start = key_start + key.len();
        self.rep[value_start..value_start + value.len()].copy_from_slice(value);
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.rep.truncate(HEADER_SIZE);
        self.rep.fill(0);
        self.count = 0;
        self.families.clear();
    }

    /// Distinct column families the batch writes to.
    pub(crate) fn families(&self) -> &[ColumnFamilyHandle] {
        &self.families
    }

    /// Size of the encoded buffer in bytes.
    pub fn data_size(&self) -> usize {
        self.rep.len()
    }

    /// Stamp the header for a commit and check that every command decodes.
    pub(crate) fn prepare(&mut self, kind: u32, db_index: i32, fill_cache: bool) -> Result<()> {
        let header = BatchHeader {
            magic: BATCH_MAGIC,
            kind,
            db_index,
            count: self.count,
            fill_cache: fill_cache as u32,
            failed_cmd_count: 0,
            snapshot_id: 0,
            total_len: self.rep.len() as u64,
        };
        serialize_header(&header, &mut self.rep);
        wire::decode_write_ops(&self.rep)?;
        Ok(())
    }

    pub(crate) fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.rep
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadRequest {
    cf_index: i32,
    key: Vec<u8>,
    value_buf_size: usize,
}

/// Queued multi-key read.
#[derive(Debug, Clone, Default)]
pub struct ReadBatch {
    requests: Vec<ReadRequest>,
    families: Vec<ColumnFamilyHandle>,
}

impl ReadBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` with a [`DEFAULT_READ_BUFFER`]-byte value buffer.
    pub fn get(&mut self, cf: &ColumnFamilyHandle, key: &[u8]) {
        self.get_with_buffer(cf, key, DEFAULT_READ_BUFFER);
    }

    /// Queue `key` with an explicit value buffer size. Values longer than
    /// the buffer are re-read in a second round.
    pub fn get_with_buffer(&mut self, cf: &ColumnFamilyHandle, key: &[u8], value_buf_size: usize) {
        remember(&mut self.families, cf);
        self.push(cf.cf_index(), key, value_buf_size);
    }

    pub(crate) fn push(&mut self, cf_index: i32, key: &[u8], value_buf_size: usize) {
        self.requests.push(ReadRequest {
            cf_index,
            key: key.to_vec(),
            value_buf_size,
        });
    }

    pub fn count(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
        self.families.clear();
    }

    /// Distinct column families the batch reads from.
    pub(crate) fn families(&self) -> &[ColumnFamilyHandle] {
        &self.families
    }

    pub(crate) fn cf_index(&self, i: usize) -> i32 {
        self.requests[i].cf_index
    }

    pub(crate) fn key(&self, i: usize) -> &[u8] {
        &self.requests[i].key
    }

    fn validate(&self) -> Result<()> {
        if self.requests.is_empty() {
            return Err(StorageError::Corruption("read batch is empty".to_string()));
        }
        for request in &self.requests {
            if request.key.is_empty() || request.key.len() > MAX_KEY_SIZE {
                return Err(StorageError::Corruption(format!(
                    "read batch key length {} out of range",
                    request.key.len()
                )));
            }
            if request.value_buf_size > MAX_VALUE_SIZE {
                return Err(StorageError::Corruption(format!(
                    "read batch buffer size {} exceeds {}",
                    request.value_buf_size, MAX_VALUE_SIZE
                )));
            }
        }
        Ok(())
    }

    /// Encode the queued reads into a fresh buffer stamped for one round.
    pub(crate) fn encode(
        &self,
        db_index: i32,
        fill_cache: bool,
        snapshot_id: u64,
    ) -> Result<EncodedReadBatch> {
        self.validate()?;

        let commands_len: usize = self
            .requests
            .iter()
            .map(|r| align8(READ_CMD_SIZE + r.key.len()))
            .sum();
        let slots_len: usize = self
            .requests
            .iter()
            .map(|r| slot_size(r.value_buf_size))
            .sum();
        let total = HEADER_SIZE + commands_len + slots_len;
        let mut buf = vec![0u8; total];

        let mut layout = Vec::with_capacity(self.requests.len());
        let mut cmd_offset = HEADER_SIZE;
        let mut slot_offset = HEADER_SIZE + commands_len;
        for request in &self.requests {
            put_u32(&mut buf, cmd_offset, request.cf_index as u32);
            put_u32(&mut buf, cmd_offset + 4, request.key.len() as u32);
            put_u32(&mut buf, cmd_offset + 8, request.value_buf_size as u32);
            put_u32(&mut buf, cmd_offset + 12, slot_offset as u32);
            let key_start = cmd_offset + READ_CMD_SIZE;
            buf[key_start..key_start + request.key.len()].copy_from_slice(&request.key);
            layout.push(SlotLayout {
                cmd_offset,
                slot_offset,
                value_buf_size: request.value_buf_size,
            });
            cmd_offset = align8(key_start + request.key.len());
            slot_offset += slot_size(request.value_buf_size);
        }

        let header = BatchHeader {
            magic: BATCH_MAGIC,
            kind: KIND_READ,
            db_index,
            count: self.requests.len() as u32,
            fill_cache: fill_cache as u32,
            failed_cmd_count: 0,
            snapshot_id,
            total_len: total as u64,
        };
        serialize_header(&header, &mut buf);

        Ok(EncodedReadBatch { buf, layout })
    }
}

fn remember(families: &mut Vec<ColumnFamilyHandle>, cf: &ColumnFamilyHandle) {
    if !families.contains(cf) {
        families.push(cf.clone());
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotLayout {
    cmd_offset: usize,
    slot_offset: usize,
    value_buf_size: usize,
}

/// A read batch encoded for one round, plus where each command's result lands.
#[derive(Debug)]
pub(crate) struct EncodedReadBatch {
    buf: Vec<u8>,
    layout: Vec<SlotLayout>,
}

impl EncodedReadBatch {
    pub(crate) fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub(crate) fn len(&self) -> usize {
        self.layout.len()
    }

    pub(crate) fn value_buf_size(&self, i: usize) -> usize {
        self.layout[i].value_buf_size
    }

    /// Decode the result slot of the `i`-th command.
    pub(crate) fn slot(&self, i: usize) -> Result<wire::ResultSlot<'_>> {
        let layout = self.layout[i];
        wire::decode_result_slot(
            &self.buf,
            layout.slot_offset,
            layout.cmd_offset,
            layout.value_buf_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::wire::*;
    use super::*;

    fn handle(cf_index: i32) -> ColumnFamilyHandle {
        ColumnFamilyHandle::new(0, cf_index, "cf")
    }

    #[test]
    fn test_write_batch_counts_and_clears() {
        let cf = handle(1);
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.put(&cf, b"a", b"1");
        batch.delete(&cf, b"b");
        assert_eq!(batch.count(), 2);
        assert_eq!(batch.data_size() % 8, 0);

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.data_size(), HEADER_SIZE);
    }

    #[test]
    fn test_write_batch_prepare_decodes() {
        let cf = handle(3);
        let mut batch = WriteBatch::new();
        batch.put(&cf, b"key", b"value");
        batch.delete(&cf, b"gone");
        batch.prepare(KIND_WRITE, 7, true).unwrap();

        let header = parse_header(&batch.rep).unwrap();
        assert_eq!(header.db_index, 7);
        assert_eq!(header.count, 2);
        assert_eq!(header.fill_cache, 1);

        let ops = decode_write_ops(&batch.rep).unwrap();
        assert_eq!(
            ops,
            vec![
                WriteOp::Put {
                    cf_index: 3,
                    key: b"key",
                    value: b"value"
                },
                WriteOp::Delete {
                    cf_index: 3,
                    key: b"gone"
                },
            ]
        );
    }

    #[test]
    fn test_write_batch_rejects_oversized_key() {
        let cf = handle(0);
        let mut batch = WriteBatch::new();
        batch.put(&cf, &vec![b'k'; MAX_KEY_SIZE + 1], b"v");
        let err = batch.prepare(KIND_WRITE, 0, false).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_empty_read_batch_is_corruption() {
        let batch = ReadBatch::new();
        assert!(batch.encode(0, false, 0).unwrap_err().is_corruption());
    }

    #[test]
    fn test_read_batch_encoding_lays_out_slots() {
        let cf = handle(2);
        let mut batch = ReadBatch::new();
        batch.get(&cf, b"alpha");
        batch.get_with_buffer(&cf, b"beta", 10);

        let encoded = batch.encode(4, false, 9).unwrap();
        let commands = decode_read_commands(&encoded.buf).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].key, b"alpha");
        assert_eq!(commands[0].value_buf_size, DEFAULT_READ_BUFFER);
        assert_eq!(commands[1].key, b"beta");
        assert_eq!(commands[1].value_buf_size, 10);
        assert!(commands[0].result_offset < commands[1].result_offset);

        let header = parse_header(&encoded.buf).unwrap();
        assert_eq!(header.snapshot_id, 9);
        assert_eq!(header.db_index, 4);
    }

    #[test]
    fn test_read_batch_slot_decode_after_device_fill() {
        let cf = handle(0);
        let mut batch = ReadBatch::new();
        batch.get_with_buffer(&cf, b"k", 4);
        let mut encoded = batch.encode(0, true, 0).unwrap();

        let (cmd_offset, value_buf_size, result_offset) = {
            let decoded = &decode_read_commands(&encoded.buf).unwrap()[0];
            (decoded.cmd_offset, decoded.value_buf_size, decoded.result_offset)
        };
        let command = ReadCommand {
            cmd_offset,
            cf_index: 0,
            key: b"",
            value_buf_size,
            result_offset,
        };
        write_result_slot(encoded.contents_mut(), &command, STATUS_SUCCESS, b"longer value");

        let slot = encoded.slot(0).unwrap();
        assert_eq!(slot.status, SlotStatus::Success);
        assert_eq!(slot.value_len, 12);
        assert_eq!(slot.bytes, b"long");
        assert!(slot.is_truncated(encoded.value_buf_size(0)));
    }
}
