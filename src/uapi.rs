//! Fixed-layout command structs exchanged with the device.
//!
//! Every struct here is `#[repr(C)]` and mirrors what the device driver reads
//! and writes through the control channel. Buffers are passed as user-space
//! addresses (`u64`), the way the driver expects them; the caller keeps the
//! referenced memory alive until the device is done with it.

/// Maximum database name length, including the terminating NUL.
pub const DB_NAME_LEN: usize = 32;
/// Maximum column family name length, including the terminating NUL.
pub const CF_NAME_LEN: usize = 32;
/// Maximum number of column families per database.
pub const MAX_CF_COUNT: usize = 64;
/// Largest key the device accepts.
pub const MAX_KEY_SIZE: usize = 128;
/// Largest value the device stores. Synchronous gets size their buffer to this.
pub const MAX_VALUE_SIZE: usize = 4 * 1024 * 1024;
/// Completion records fetched per `GetIoEvents` call.
pub const MAX_AIO_EVENTS: usize = 64;

/// `DbHandle::flags`: create the database when it does not exist.
pub const O_DB_CREATE: u32 = 0x1;
/// `DbHandle::flags`: open at the index given in `DbHandle::db_index`.
pub const O_DB_FORCED_INDEX: u32 = 0x2;

/// ioctl magic shared by every device command.
pub const KV_IOC_MAGIC: u8 = b'V';

/// ioctl command numbers.
pub mod nr {
    pub const OPEN_DATABASE: u8 = 0x01;
    pub const REMOVE_DATABASE: u8 = 0x02;
    pub const LIST_COLUMNFAMILY: u8 = 0x03;
    pub const OPEN_COLUMNFAMILY: u8 = 0x04;
    pub const CREATE_COLUMNFAMILY: u8 = 0x05;
    pub const REMOVE_COLUMNFAMILY: u8 = 0x06;
    pub const SET_CACHE: u8 = 0x07;
    pub const GET_KV: u8 = 0x10;
    pub const PUT_KV: u8 = 0x11;
    pub const DEL_KV: u8 = 0x12;
    pub const KEY_STATUS: u8 = 0x13;
    pub const READ_BATCH: u8 = 0x20;
    pub const WRITE_BATCH: u8 = 0x21;
    pub const WRITE_BATCH_NONATOMIC: u8 = 0x22;
    pub const CREATE_SNAPSHOT: u8 = 0x30;
    pub const RELEASE_SNAPSHOT: u8 = 0x31;
    pub const CREATE_ITERATOR: u8 = 0x40;
    pub const ITERATOR_OP: u8 = 0x41;
    pub const CREATE_AIOCTX: u8 = 0x50;
    pub const DEL_AIOCTX: u8 = 0x51;
    pub const GET_IOEVENTS: u8 = 0x52;
    pub const CF_STATUS: u8 = 0x60;
}

/// Copy `name` into a NUL-terminated fixed-size field.
///
/// Callers validate the length first; anything longer than `N - 1` bytes
/// is cut off.
pub fn encode_name<const N: usize>(name: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let len = name.len().min(N.saturating_sub(1));
    out[..len].copy_from_slice(&name.as_bytes()[..len]);
    out
}

/// Read a NUL-terminated fixed-size field back into a string.
pub fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Open / remove database command.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DbHandle {
    pub flags: u32,
    pub db_index: i32,
    pub name: [u8; DB_NAME_LEN],
}

/// One entry of a column family listing.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CfEntry {
    pub cf_index: i32,
    pub name: [u8; CF_NAME_LEN],
}

/// Column family listing filled in by the device.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CfList {
    pub db_index: i32,
    pub cf_count: i32,
    pub cfs: [CfEntry; MAX_CF_COUNT],
}

impl Default for CfList {
    fn default() -> Self {
        Self {
            db_index: 0,
            cf_count: 0,
            cfs: [CfEntry::default(); MAX_CF_COUNT],
        }
    }
}

impl CfList {
    /// Names of the listed families, clamped to the declared count.
    pub fn names(&self) -> Vec<String> {
        let count = (self.cf_count.max(0) as usize).min(MAX_CF_COUNT);
        self.cfs[..count].iter().map(|cf| decode_name(&cf.name)).collect()
    }
}

/// Open / create / remove column family command.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CfHandle {
    pub db_index: i32,
    pub cf_index: i32,
    pub name: [u8; CF_NAME_LEN],
}

/// Per-family cache size hint.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheSize {
    pub db: i32,
    pub cf_index: i32,
    pub size: u64,
}

/// Single key/value command used by get, put and delete, synchronous or not.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct KvCmd {
    pub db: i32,
    pub cf_index: i32,
    pub key: u64,
    pub key_len: u32,
    /// In for puts; out for gets (full stored length, even when truncated).
    pub value_len: u32,
    pub value: u64,
    pub value_buf_size: u32,
    pub sync: u8,
    pub fill_cache: u8,
    pub aio: u8,
    pub _pad: u8,
    pub snapshot_id: u64,
    pub reqid: i32,
    pub ctxid: i32,
    pub seqnum: u64,
}

/// Key existence probe.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyStatus {
    pub db_index: i32,
    pub cf_index: i32,
    pub key: u64,
    pub key_len: u32,
    pub exist: u32,
    pub snapshot_id: u64,
}

/// Create / release snapshot command.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotCmd {
    pub db: i32,
    pub _pad: u32,
    pub snapshot_id: u64,
}

/// Per-family slot of an iterator creation request.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CfIterator {
    pub db_index: u32,
    pub cf_index: u32,
    pub iter_index: u32,
    pub only_read_key: u8,
    pub _pad: [u8; 3],
    pub timestamp: u64,
}

/// Creates `count` iterators in one call, all sharing `timestamp`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IteratorBatch {
    pub db_index: u32,
    pub count: u32,
    pub only_read_key: u8,
    pub _pad: [u8; 7],
    pub timestamp: u64,
    pub iters: [CfIterator; MAX_CF_COUNT],
}

impl Default for IteratorBatch {
    fn default() -> Self {
        Self {
            db_index: 0,
            count: 0,
            only_read_key: 0,
            _pad: [0; 7],
            timestamp: 0,
            iters: [CfIterator::default(); MAX_CF_COUNT],
        }
    }
}

/// `IterOp::op` values.
pub const ITER_SEEK_TO_FIRST: u32 = 1;
pub const ITER_SEEK: u32 = 2;
pub const ITER_NEXT: u32 = 3;
pub const ITER_CURRENT: u32 = 4;
pub const ITER_DESTROY: u32 = 5;

/// Moves an iterator and returns the entry it lands on.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IterOp {
    pub db_index: i32,
    pub cf_index: i32,
    pub iter_index: u32,
    pub op: u32,
    pub seek_key: u64,
    pub seek_key_len: u32,
    pub valid: u32,
    pub key: u64,
    pub key_buf_size: u32,
    pub key_len: u32,
    pub value: u64,
    pub value_buf_size: u32,
    pub value_len: u32,
}

/// Async context registration. The device assigns `ctxid` and `seqnum`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AioCtx {
    pub ctxid: i32,
    pub eventfd: i32,
    pub seqnum: u64,
}

/// One completion record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AioEvent {
    pub reqid: i32,
    pub ret: i32,
}

/// Completion fetch: `nr` is the requested count on the way in and the
/// number of filled records on the way out.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AioEvents {
    pub ctxid: i32,
    pub nr: i32,
    pub seqnum: u64,
    pub events: [AioEvent; MAX_AIO_EVENTS],
}

impl Default for AioEvents {
    fn default() -> Self {
        Self {
            ctxid: 0,
            nr: 0,
            seqnum: 0,
            events: [AioEvent::default(); MAX_AIO_EVENTS],
        }
    }
}

/// Header at offset 0 of every flat batch buffer. The commands and result
/// slots that follow are laid out by [`crate::batch`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchHeader {
    pub magic: u32,
    pub kind: u32,
    pub db_index: i32,
    pub count: u32,
    pub fill_cache: u32,
    pub failed_cmd_count: u32,
    pub snapshot_id: u64,
    pub total_len: u64,
}

/// Column family statistics.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CfStatus {
    pub db_index: i32,
    pub cf_index: i32,
    pub total_cache_size: u64,
    pub key_count: u64,
}

/// Address of a buffer as the device sees it.
pub fn addr_of(buf: &[u8]) -> u64 {
    buf.as_ptr() as u64
}

/// Mutable buffer address as the device sees it.
pub fn addr_of_mut(buf: &mut [u8]) -> u64 {
    buf.as_mut_ptr() as u64
}
