//! Flat batch buffer layout.
//!
//! ```text
//! write: | header | cmd | cmd | ... |
//! read:  | header | cmd | cmd | ... | slot | slot | ... |
//! ```
//!
//! Every record starts on an 8-byte boundary. Integers are native-endian,
//! matching the `#[repr(C)]` structs in [`crate::uapi`]. The decoders here
//! are used on both sides of the channel: by the engines to read results and
//! by [`crate::device::mock::MockDevice`] to serve requests.

use crate::error::{Result, StorageError};
use crate::uapi::{BatchHeader, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Header size in bytes (`size_of::<BatchHeader>()`).
pub const HEADER_SIZE: usize = 40;
/// Magic number stamped into every encoded batch ("DKVB").
pub const BATCH_MAGIC: u32 = 0x444b_5642;

pub const KIND_WRITE: u32 = 1;
pub const KIND_WRITE_NONATOMIC: u32 = 2;
pub const KIND_READ: u32 = 3;

pub const OP_PUT: u32 = 1;
pub const OP_DELETE: u32 = 2;

/// Write command header: op, cf_index, key_len, value_len.
pub const WRITE_CMD_SIZE: usize = 16;
/// Read command header: cf_index, key_len, value_buf_size, result_offset.
pub const READ_CMD_SIZE: usize = 16;
/// Result slot header: cmd_offset, status, value_len.
pub const SLOT_HEADER_SIZE: usize = 12;

pub const STATUS_SUCCESS: u32 = 0;
pub const STATUS_NO_KEY: u32 = 1;
pub const STATUS_DATA_ERR: u32 = 2;
pub const STATUS_VAL_BUF_ERR: u32 = 3;

pub(crate) fn align8(n: usize) -> usize {
    (n + 7) & !7
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}

fn get_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn get_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset.checked_add(8)?)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_ne_bytes(raw))
}

fn corrupt(what: &str) -> StorageError {
    StorageError::Corruption(format!("batch {}", what))
}

pub fn serialize_header(header: &BatchHeader, buf: &mut [u8]) {
    put_u32(buf, 0, header.magic);
    put_u32(buf, 4, header.kind);
    put_u32(buf, 8, header.db_index as u32);
    put_u32(buf, 12, header.count);
    put_u32(buf, 16, header.fill_cache);
    put_u32(buf, 20, header.failed_cmd_count);
    put_u64(buf, 24, header.snapshot_id);
    put_u64(buf, 32, header.total_len);
}

/// Parse and sanity-check the header of an encoded batch.
pub fn parse_header(buf: &[u8]) -> Result<BatchHeader> {
    if buf.len() < HEADER_SIZE {
        return Err(corrupt("header truncated"));
    }
    let header = BatchHeader {
        magic: get_u32(buf, 0).unwrap_or_default(),
        kind: get_u32(buf, 4).unwrap_or_default(),
        db_index: get_u32(buf, 8).unwrap_or_default() as i32,
        count: get_u32(buf, 12).unwrap_or_default(),
        fill_cache: get_u32(buf, 16).unwrap_or_default(),
        failed_cmd_count: get_u32(buf, 20).unwrap_or_default(),
        snapshot_id: get_u64(buf, 24).unwrap_or_default(),
        total_len: get_u64(buf, 32).unwrap_or_default(),
    };
    if header.magic != BATCH_MAGIC {
        return Err(corrupt("magic mismatch"));
    }
    if header.total_len != buf.len() as u64 {
        return Err(corrupt("length mismatch"));
    }
    Ok(header)
}

/// One decoded write command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp<'a> {
    Put {
        cf_index: i32,
        key: &'a [u8],
        value: &'a [u8],
    },
    Delete {
        cf_index: i32,
        key: &'a [u8],
    },
}

/// Decode the commands of a write batch, validating every record.
pub fn decode_write_ops(buf: &[u8]) -> Result<Vec<WriteOp<'_>>> {
    let header = parse_header(buf)?;
    if header.kind != KIND_WRITE && header.kind != KIND_WRITE_NONATOMIC {
        return Err(corrupt("is not a write batch"));
    }
    let mut ops = Vec::with_capacity(header.count as usize);
    let mut offset = HEADER_SIZE;
    for _ in 0..header.count {
        let op = get_u32(buf, offset).ok_or_else(|| corrupt("command truncated"))?;
        let cf_index = get_u32(buf, offset + 4).ok_or_else(|| corrupt("command truncated"))? as i32;
        let key_len = get_u32(buf, offset + 8).ok_or_else(|| corrupt("command truncated"))? as usize;
        let value_len =
            get_u32(buf, offset + 12).ok_or_else(|| corrupt("command truncated"))? as usize;
        if key_len == 0 || key_len > MAX_KEY_SIZE {
            return Err(corrupt("key length out of range"));
        }
        if value_len > MAX_VALUE_SIZE {
            return Err(corrupt("value length out of range"));
        }
        let key_start = offset + WRITE_CMD_SIZE;
        let value_start = key_start + key_len;
        let end = value_start + value_len;
        if end > buf.len() {
            return Err(corrupt("command overruns buffer"));
        }
        let key = &buf[key_start..value_start];
        match op {
            OP_PUT => ops.push(WriteOp::Put {
                cf_index,
                key,
                value: &buf[value_start..end],
            }),
            OP_DELETE if value_len == 0 => ops.push(WriteOp::Delete { cf_index, key }),
            _ => return Err(corrupt("unknown command")),
        }
        offset = align8(end);
    }
    if offset != buf.len() {
        return Err(corrupt("trailing bytes"));
    }
    Ok(ops)
}

/// One decoded read command, as the device sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCommand<'a> {
    pub cmd_offset: usize,
    pub cf_index: i32,
    pub key: &'a [u8],
    pub value_buf_size: usize,
    pub result_offset: usize,
}

/// Decode the commands of a read batch. Every command's result slot is
/// checked to fit inside the buffer.
pub fn decode_read_commands(buf: &[u8]) -> Result<Vec<ReadCommand<'_>>> {
    let header = parse_header(buf)?;
    if header.kind != KIND_READ {
        return Err(corrupt("is not a read batch"));
    }
    let mut commands = Vec::with_capacity(header.count as usize);
    let mut offset = HEADER_SIZE;
    for _ in 0..header.count {
        let truncated = || corrupt("command truncated");
        let cf_index = get_u32(buf, offset).ok_or_else(truncated)? as i32;
        let key_len = get_u32(buf, offset + 4).ok_or_else(truncated)? as usize;
        let value_buf_size = get_u32(buf, offset + 8).ok_or_else(truncated)? as usize;
        let result_offset = get_u32(buf, offset + 12).ok_or_else(truncated)? as usize;
        if key_len == 0 || key_len > MAX_KEY_SIZE {
            return Err(corrupt("key length out of range"));
        }
        let key_start = offset + READ_CMD_SIZE;
        let key_end = key_start + key_len;
        if key_end > buf.len() {
            return Err(corrupt("command overruns buffer"));
        }
        if result_offset % 8 != 0 || result_offset + slot_size(value_buf_size) > buf.len() {
            return Err(corrupt("result slot out of range"));
        }
        commands.push(ReadCommand {
            cmd_offset: offset,
            cf_index,
            key: &buf[key_start..key_end],
            value_buf_size,
            result_offset,
        });
        offset = align8(key_end);
    }
    Ok(commands)
}

/// Bytes occupied by a result slot with room for `value_buf_size` bytes.
pub fn slot_size(value_buf_size: usize) -> usize {
    align8(SLOT_HEADER_SIZE + value_buf_size)
}

/// Fill in a result slot. At most `value_buf_size` bytes of `value` are
/// copied; `value_len` always carries the full stored length.
pub fn write_result_slot(
    buf: &mut [u8],
    command: &ReadCommand<'_>,
    status: u32,
    value: &[u8],
) {
    let slot = command.result_offset;
    put_u32(buf, slot, command.cmd_offset as u32);
    put_u32(buf, slot + 4, status);
    put_u32(buf, slot + 8, value.len() as u32);
    let copy = value.len().min(command.value_buf_size);
    let start = slot + SLOT_HEADER_SIZE;
    buf[start..start + copy].copy_from_slice(&value[..copy]);
}

/// Status reported in a result slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Success,
    NoKey,
    DataError,
    ValueBufferTooSmall,
    Unknown(u32),
}

impl From<u32> for SlotStatus {
    fn from(raw: u32) -> Self {
        match raw {
            STATUS_SUCCESS => SlotStatus::Success,
            STATUS_NO_KEY => SlotStatus::NoKey,
            STATUS_DATA_ERR => SlotStatus::DataError,
            STATUS_VAL_BUF_ERR => SlotStatus::ValueBufferTooSmall,
            other => SlotStatus::Unknown(other),
        }
    }
}

/// A decoded result slot: the 3-word header plus a view of the value bytes
/// actually present (never more than the buffer provided for the command).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSlot<'a> {
    pub cmd_offset: u32,
    pub status: SlotStatus,
    pub value_len: u32,
    pub bytes: &'a [u8],
}

impl ResultSlot<'_> {
    /// The device stored more than the buffer could hold.
    pub fn is_truncated(&self, value_buf_size: usize) -> bool {
        self.status == SlotStatus::Success && self.value_len as usize > value_buf_size
    }
}

/// Decode the result slot at `slot_offset`, validated against the buffer and
/// the command that owns it.
pub fn decode_result_slot(
    buf: &[u8],
    slot_offset: usize,
    expected_cmd_offset: usize,
    value_buf_size: usize,
) -> Result<ResultSlot<'_>> {
    let end = slot_offset
        .checked_add(slot_size(value_buf_size))
        .ok_or_else(|| corrupt("result slot out of range"))?;
    if end > buf.len() {
        return Err(corrupt("result slot out of range"));
    }
    let cmd_offset = get_u32(buf, slot_offset).ok_or_else(|| corrupt("result slot truncated"))?;
    let status = get_u32(buf, slot_offset + 4).ok_or_else(|| corrupt("result slot truncated"))?;
    let value_len =
        get_u32(buf, slot_offset + 8).ok_or_else(|| corrupt("result slot truncated"))?;
    if cmd_offset as usize != expected_cmd_offset {
        return Err(corrupt("result slot does not match its command"));
    }
    let start = slot_offset + SLOT_HEADER_SIZE;
    let present = (value_len as usize).min(value_buf_size);
    Ok(ResultSlot {
        cmd_offset,
        status: SlotStatus::from(status),
        value_len,
        bytes: &buf[start..start + present],
    })
}
