//! In-memory device serving the control protocol.
//!
//! `MockDevice` keeps databases and column families in memory (values in
//! `crossbeam-skiplist` maps), implements snapshots, iterators, batch reads
//! and writes, and async contexts that signal a real eventfd. It also counts
//! calls per [`RequestKind`] and can be told to fail upcoming calls, defer
//! async completions or report a failing async result code.
//!
//! Buffers are reached through the addresses embedded in each command, the
//! same way the driver does it; callers follow the [`ControlChannel`]
//! contract for keeping them alive.

use super::{CallResult, ControlChannel, Request, RequestKind};
use crate::batch::wire::{
    self, WriteOp, STATUS_DATA_ERR, STATUS_NO_KEY, STATUS_SUCCESS,
};
use crate::uapi::{
    decode_name, encode_name, AioCtx, AioEvent, AioEvents, CacheSize, CfEntry, CfHandle, CfList,
    CfStatus, DbHandle, IterOp, IteratorBatch, KeyStatus, KvCmd, SnapshotCmd, CF_NAME_LEN,
    ITER_CURRENT, ITER_DESTROY, ITER_NEXT, ITER_SEEK, ITER_SEEK_TO_FIRST, MAX_AIO_EVENTS,
    MAX_CF_COUNT, MAX_KEY_SIZE, MAX_VALUE_SIZE, O_DB_CREATE, O_DB_FORCED_INDEX,
};
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use nix::errno::Errno;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::File;
use std::io::Write;
use std::os::unix::io::BorrowedFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

struct MockFamily {
    name: String,
    data: SkipMap<Vec<u8>, Vec<u8>>,
    cache_size: AtomicU64,
}

impl MockFamily {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: SkipMap::new(),
            cache_size: AtomicU64::new(0),
        }
    }

    fn image(&self) -> Entries {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

struct Database {
    name: String,
    families: BTreeMap<i32, Arc<MockFamily>>,
    next_cf: i32,
}

impl Database {
    fn new(name: &str) -> Self {
        let mut families = BTreeMap::new();
        families.insert(0, Arc::new(MockFamily::new("default")));
        Self {
            name: name.to_string(),
            families,
            next_cf: 1,
        }
    }

    fn family_by_name(&self, name: &str) -> Option<i32> {
        self.families
            .iter()
            .find(|(_, family)| family.name == name)
            .map(|(index, _)| *index)
    }

    fn add_family(&mut self, name: &str) -> Result<i32, Errno> {
        if self.families.len() >= MAX_CF_COUNT {
            return Err(Errno::ENOSPC);
        }
        let index = self.next_cf;
        self.next_cf += 1;
        self.families.insert(index, Arc::new(MockFamily::new(name)));
        Ok(index)
    }
}

struct SnapshotImage {
    db: i32,
    families: HashMap<i32, Entries>,
}

struct MockIterator {
    db: i32,
    cf_index: i32,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    only_read_key: bool,
}

struct MockAio {
    seqnum: u64,
    signal: File,
    ready: VecDeque<AioEvent>,
    deferred: VecDeque<AioEvent>,
}

impl MockAio {
    fn signal(&self, count: u64) {
        let _ = (&self.signal).write_all(&count.to_ne_bytes());
    }
}

#[derive(Default)]
struct MockState {
    databases: BTreeMap<i32, Database>,
    snapshots: HashMap<u64, SnapshotImage>,
    iterators: HashMap<u32, MockIterator>,
    aio: HashMap<i32, MockAio>,
    next_snapshot: u64,
    next_iter: u32,
    next_ctx: i32,
}

/// In-memory [`ControlChannel`].
pub struct MockDevice {
    state: Mutex<MockState>,
    calls: DashMap<RequestKind, u64>,
    faults: Mutex<HashMap<RequestKind, (Errno, u32)>>,
    defer_completions: AtomicBool,
    aio_result: AtomicI32,
}

/// Read `len` bytes of caller memory.
///
/// # Safety
///
/// `addr` must point at `len` readable bytes that stay valid for `'a`.
unsafe fn user_bytes<'a>(addr: u64, len: u32) -> Result<&'a [u8], Errno> {
    if len == 0 {
        return Ok(&[]);
    }
    if addr == 0 {
        return Err(Errno::EFAULT);
    }
    Ok(std::slice::from_raw_parts(addr as *const u8, len as usize))
}

/// Copy up to `cap` bytes of `data` into caller memory.
///
/// # Safety
///
/// `addr` must point at `cap` writable bytes not aliased by `data`.
unsafe fn copy_out(addr: u64, cap: u32, data: &[u8]) -> Result<(), Errno> {
    let n = data.len().min(cap as usize);
    if n == 0 {
        return Ok(());
    }
    if addr == 0 {
        return Err(Errno::EFAULT);
    }
    std::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, n);
    Ok(())
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_snapshot: 1,
                ..MockState::default()
            }),
            calls: DashMap::new(),
            faults: Mutex::new(HashMap::new()),
            defer_completions: AtomicBool::new(false),
            aio_result: AtomicI32::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `times` calls of `kind` with `errno`.
    pub fn fail_next(&self, kind: RequestKind, errno: Errno, times: u32) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, (errno, times));
    }

    /// Calls of `kind` received so far, failed ones included.
    pub fn calls(&self, kind: RequestKind) -> u64 {
        self.calls.get(&kind).map(|count| *count).unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    pub fn reset_calls(&self) {
        self.calls.clear();
    }

    /// Hold async completions back until [`release_completions`] is called.
    ///
    /// [`release_completions`]: MockDevice::release_completions
    pub fn set_defer_completions(&self, defer: bool) {
        self.defer_completions.store(defer, Ordering::SeqCst);
    }

    /// Publish and signal every held-back completion.
    pub fn release_completions(&self) {
        let mut state = self.lock();
        for aio in state.aio.values_mut() {
            let count = aio.deferred.len() as u64;
            if count > 0 {
                let deferred: Vec<_> = aio.deferred.drain(..).collect();
                aio.ready.extend(deferred);
                aio.signal(count);
            }
        }
    }

    /// Result code reported in every later completion record.
    pub fn set_aio_result(&self, ret: i32) {
        self.aio_result.store(ret, Ordering::SeqCst);
    }

    /// Index of the database called `name`, if it exists.
    pub fn database_index(&self, name: &str) -> Option<i32> {
        self.lock()
            .databases
            .iter()
            .find(|(_, db)| db.name == name)
            .map(|(index, _)| *index)
    }

    /// Family names of a database, ordered by index.
    pub fn family_names(&self, db: i32) -> Vec<String> {
        self.lock()
            .databases
            .get(&db)
            .map(|d| d.families.values().map(|f| f.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Create a database with the given extra families, bypassing the
    /// control protocol.
    pub fn seed_database(&self, name: &str, families: &[&str]) -> i32 {
        let mut state = self.lock();
        let index = state.databases.keys().next_back().map_or(0, |i| i + 1);
        let mut db = Database::new(name);
        for family in families {
            if db.family_by_name(family).is_none() {
                let _ = db.add_family(family);
            }
        }
        state.databases.insert(index, db);
        index
    }

    /// Store a value directly, bypassing the control protocol.
    pub fn insert_raw(&self, db: i32, cf_index: i32, key: &[u8], value: &[u8]) {
        if let Ok(family) = self.family(db, cf_index) {
            family.data.insert(key.to_vec(), value.to_vec());
        }
    }

    fn family(&self, db: i32, cf_index: i32) -> Result<Arc<MockFamily>, Errno> {
        self.lock()
            .databases
            .get(&db)
            .and_then(|d| d.families.get(&cf_index))
            .cloned()
            .ok_or(Errno::EINVAL)
    }

    fn lookup(
        &self,
        db: i32,
        cf_index: i32,
        key: &[u8],
        snapshot_id: u64,
    ) -> Result<Option<Vec<u8>>, Errno> {
        if snapshot_id == 0 {
            let family = self.family(db, cf_index)?;
            return Ok(family.data.get(key).map(|entry| entry.value().clone()));
        }
        let state = self.lock();
        let image = state.snapshots.get(&snapshot_id).ok_or(Errno::EINVAL)?;
        if image.db != db {
            return Err(Errno::EINVAL);
        }
        let entries = image.families.get(&cf_index).ok_or(Errno::EINVAL)?;
        Ok(entries.get(key).cloned())
    }

    fn take_fault(&self, kind: RequestKind) -> Option<Errno> {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        match faults.get_mut(&kind) {
            Some((errno, times)) if *times > 0 => {
                *times -= 1;
                Some(*errno)
            }
            _ => None,
        }
    }

    fn open_database(&self, handle: &mut DbHandle) -> CallResult {
        let name = decode_name(&handle.name);
        if name.is_empty() {
            return Err(Errno::EINVAL);
        }
        let mut state = self.lock();
        if let Some((index, _)) = state.databases.iter().find(|(_, db)| db.name == name) {
            handle.db_index = *index;
            return Ok(());
        }
        if handle.flags & O_DB_CREATE == 0 {
            return Err(Errno::ENOENT);
        }
        let index = if handle.flags & O_DB_FORCED_INDEX != 0 {
            if state.databases.contains_key(&handle.db_index) {
                return Err(Errno::EBUSY);
            }
            handle.db_index
        } else {
            state.databases.keys().next_back().map_or(0, |i| i + 1)
        };
        state.databases.insert(index, Database::new(&name));
        handle.db_index = index;
        Ok(())
    }

    fn remove_database(&self, handle: &mut DbHandle) -> CallResult {
        let name = decode_name(&handle.name);
        let mut state = self.lock();
        let index = state
            .databases
            .iter()
            .find(|(_, db)| db.name == name)
            .map(|(index, _)| *index)
            .ok_or(Errno::ENOENT)?;
        state.databases.remove(&index);
        state.snapshots.retain(|_, image| image.db != index);
        state.iterators.retain(|_, iter| iter.db != index);
        Ok(())
    }

    fn list_families(&self, list: &mut CfList) -> CallResult {
        let state = self.lock();
        let db = state.databases.get(&list.db_index).ok_or(Errno::EINVAL)?;
        list.cf_count = db.families.len() as i32;
        for (slot, (index, family)) in list.cfs.iter_mut().zip(db.families.iter()) {
            *slot = CfEntry {
                cf_index: *index,
                name: encode_name::<CF_NAME_LEN>(&family.name),
            };
        }
        Ok(())
    }

    fn open_family(&self, handle: &mut CfHandle, create_only: bool) -> CallResult {
        let name = decode_name(&handle.name);
        if name.is_empty() {
            return Err(Errno::EINVAL);
        }
        let mut state = self.lock();
        let db = state
            .databases
            .get_mut(&handle.db_index)
            .ok_or(Errno::EINVAL)?;
        handle.cf_index = match db.family_by_name(&name) {
            Some(_) if create_only => return Err(Errno::EEXIST),
            Some(index) => index,
            None => db.add_family(&name)?,
        };
        Ok(())
    }

    fn remove_family(&self, handle: &mut CfHandle) -> CallResult {
        let mut state = self.lock();
        let db = state
            .databases
            .get_mut(&handle.db_index)
            .ok_or(Errno::EINVAL)?;
        db.families.remove(&handle.cf_index).ok_or(Errno::ENOENT)?;
        Ok(())
    }

    fn set_cache(&self, cache: &mut CacheSize) -> CallResult {
        let family = self.family(cache.db, cache.cf_index)?;
        family.cache_size.store(cache.size, Ordering::Relaxed);
        Ok(())
    }

    fn get_kv(&self, cmd: &mut KvCmd) -> CallResult {
        // SAFETY: the key address and length come from the caller's command.
        let key = unsafe { user_bytes(cmd.key, cmd.key_len)? }.to_vec();
        let value = self
            .lookup(cmd.db, cmd.cf_index, &key, cmd.snapshot_id)?
            .ok_or(Errno::ENXIO)?;
        // SAFETY: the caller provided `value_buf_size` writable bytes.
        unsafe { copy_out(cmd.value, cmd.value_buf_size, &value)? };
        cmd.value_len = value.len() as u32;
        self.finish_aio(cmd)
    }

    fn put_kv(&self, cmd: &mut KvCmd) -> CallResult {
        if cmd.key_len == 0 || cmd.key_len as usize > MAX_KEY_SIZE {
            return Err(Errno::EINVAL);
        }
        if cmd.value_len as usize > MAX_VALUE_SIZE {
            return Err(Errno::EINVAL);
        }
        let family = self.family(cmd.db, cmd.cf_index)?;
        // SAFETY: key and value addresses come from the caller's command.
        let (key, value) = unsafe {
            (
                user_bytes(cmd.key, cmd.key_len)?.to_vec(),
                user_bytes(cmd.value, cmd.value_len)?.to_vec(),
            )
        };
        family.data.insert(key, value);
        self.finish_aio(cmd)
    }

    fn del_kv(&self, cmd: &mut KvCmd) -> CallResult {
        let family = self.family(cmd.db, cmd.cf_index)?;
        // SAFETY: the key address and length come from the caller's command.
        let key = unsafe { user_bytes(cmd.key, cmd.key_len)? };
        family.data.remove(key);
        self.finish_aio(cmd)
    }

    /// Queue the completion record of an async command.
    fn finish_aio(&self, cmd: &KvCmd) -> CallResult {
        if cmd.aio == 0 {
            return Ok(());
        }
        let mut state = self.lock();
        let aio = state.aio.get_mut(&cmd.ctxid).ok_or(Errno::EINVAL)?;
        if aio.seqnum != cmd.seqnum {
            return Err(Errno::EINVAL);
        }
        let event = AioEvent {
            reqid: cmd.reqid,
            ret: self.aio_result.load(Ordering::SeqCst),
        };
        if self.defer_completions.load(Ordering::SeqCst) {
            aio.deferred.push_back(event);
        } else {
            aio.ready.push_back(event);
            aio.signal(1);
        }
        Ok(())
    }

    fn key_status(&self, status: &mut KeyStatus) -> CallResult {
        // SAFETY: the key address and length come from the caller's command.
        let key = unsafe { user_bytes(status.key, status.key_len)? }.to_vec();
        let found = self.lookup(status.db_index, status.cf_index, &key, status.snapshot_id)?;
        status.exist = found.is_some() as u32;
        Ok(())
    }

    fn read_batch(&self, buf: &mut [u8]) -> CallResult {
        let header = wire::parse_header(buf).map_err(|_| Errno::EINVAL)?;
        let commands: Vec<_> = wire::decode_read_commands(buf)
            .map_err(|_| Errno::EINVAL)?
            .into_iter()
            .map(|c| (c.cmd_offset, c.cf_index, c.key.to_vec(), c.value_buf_size, c.result_offset))
            .collect();

        let mut failed = 0u32;
        for (cmd_offset, cf_index, key, value_buf_size, result_offset) in commands {
            let command = wire::ReadCommand {
                cmd_offset,
                cf_index,
                key: &key,
                value_buf_size,
                result_offset,
            };
            match self.lookup(header.db_index, cf_index, &key, header.snapshot_id) {
                Ok(Some(value)) => {
                    wire::write_result_slot(buf, &command, STATUS_SUCCESS, &value)
                }
                Ok(None) => {
                    failed += 1;
                    wire::write_result_slot(buf, &command, STATUS_NO_KEY, &[]);
                }
                Err(_) => {
                    failed += 1;
                    wire::write_result_slot(buf, &command, STATUS_DATA_ERR, &[]);
                }
            }
        }
        wire::put_u32(buf, 20, failed);
        Ok(())
    }

    fn write_batch(&self, buf: &mut [u8], atomic: bool) -> CallResult {
        let header = wire::parse_header(buf).map_err(|_| Errno::EINVAL)?;
        let ops = wire::decode_write_ops(buf).map_err(|_| Errno::EINVAL)?;
        let cf_of = |op: &WriteOp<'_>| match op {
            WriteOp::Put { cf_index, .. } | WriteOp::Delete { cf_index, .. } => *cf_index,
        };
        if atomic {
            for op in &ops {
                self.family(header.db_index, cf_of(op))?;
            }
        }
        for op in &ops {
            let family = self.family(header.db_index, cf_of(op))?;
            match op {
                WriteOp::Put { key, value, .. } => {
                    family.data.insert(key.to_vec(), value.to_vec());
                }
                WriteOp::Delete { key, .. } => {
                    family.data.remove(*key);
                }
            }
        }
        Ok(())
    }

    fn create_snapshot(&self, cmd: &mut SnapshotCmd) -> CallResult {
        let mut state = self.lock();
        let db = state.databases.get(&cmd.db).ok_or(Errno::EINVAL)?;
        let families = db
            .families
            .iter()
            .map(|(index, family)| (*index, family.image()))
            .collect();
        let id = state.next_snapshot;
        state.next_snapshot += 1;
        state.snapshots.insert(
            id,
            SnapshotImage {
                db: cmd.db,
                families,
            },
        );
        cmd.snapshot_id = id;
        Ok(())
    }

    fn release_snapshot(&self, cmd: &mut SnapshotCmd) -> CallResult {
        let mut state = self.lock();
        match state.snapshots.get(&cmd.snapshot_id) {
            Some(image) if image.db == cmd.db => {
                state.snapshots.remove(&cmd.snapshot_id);
                Ok(())
            }
            _ => Err(Errno::EINVAL),
        }
    }

    fn create_iterators(&self, batch: &mut IteratorBatch) -> CallResult {
        let count = batch.count as usize;
        if count == 0 || count > MAX_CF_COUNT {
            return Err(Errno::EINVAL);
        }
        let db = batch.db_index as i32;
        let mut created = Vec::with_capacity(count);
        for slot in &batch.iters[..count] {
            let cf_index = slot.cf_index as i32;
            let entries: Vec<_> = if batch.timestamp == 0 {
                self.family(db, cf_index)?.image().into_iter().collect()
            } else {
                let state = self.lock();
                let image = state.snapshots.get(&batch.timestamp).ok_or(Errno::EINVAL)?;
                image
                    .families
                    .get(&cf_index)
                    .ok_or(Errno::EINVAL)?
                    .clone()
                    .into_iter()
                    .collect()
            };
            created.push(MockIterator {
                db,
                cf_index,
                entries,
                pos: 0,
                only_read_key: batch.only_read_key != 0 || slot.only_read_key != 0,
            });
        }

        let mut state = self.lock();
        for (slot, iter) in batch.iters[..count].iter_mut().zip(created) {
            let index = state.next_iter;
            state.next_iter += 1;
            slot.iter_index = index;
            slot.db_index = batch.db_index;
            slot.timestamp = batch.timestamp;
            state.iterators.insert(index, iter);
        }
        Ok(())
    }

    fn iterator_op(&self, op: &mut IterOp) -> CallResult {
        let mut state = self.lock();
        let iter = match state.iterators.get_mut(&op.iter_index) {
            Some(iter) if iter.db == op.db_index && iter.cf_index == op.cf_index => iter,
            _ => return Err(Errno::EINVAL),
        };
        match op.op {
            ITER_SEEK_TO_FIRST => iter.pos = 0,
            ITER_SEEK => {
                // SAFETY: the seek key address and length come from the caller.
                let target = unsafe { user_bytes(op.seek_key, op.seek_key_len)? };
                iter.pos = iter.entries.partition_point(|(key, _)| key.as_slice() < target);
            }
            ITER_NEXT => {
                if iter.pos < iter.entries.len() {
                    iter.pos += 1;
                }
            }
            ITER_CURRENT => {}
            ITER_DESTROY => {
                state.iterators.remove(&op.iter_index);
                return Ok(());
            }
            _ => return Err(Errno::EINVAL),
        }

        match iter.entries.get(iter.pos) {
            Some((key, value)) => {
                op.valid = 1;
                op.key_len = key.len() as u32;
                // SAFETY: the caller provided `key_buf_size` / `value_buf_size`
                // writable bytes at the given addresses.
                unsafe { copy_out(op.key, op.key_buf_size, key)? };
                if iter.only_read_key {
                    op.value_len = 0;
                } else {
                    op.value_len = value.len() as u32;
                    unsafe { copy_out(op.value, op.value_buf_size, value)? };
                }
            }
            None => {
                op.valid = 0;
                op.key_len = 0;
                op.value_len = 0;
            }
        }
        Ok(())
    }

    fn create_aio_ctx(&self, ctx: &mut AioCtx) -> CallResult {
        // SAFETY: the caller's eventfd stays open while the context exists.
        let fd = unsafe { BorrowedFd::borrow_raw(ctx.eventfd) };
        let signal = File::from(fd.try_clone_to_owned().map_err(|_| Errno::EBADF)?);
        let mut state = self.lock();
        state.next_ctx += 1;
        let ctxid = state.next_ctx;
        let seqnum = ctxid as u64 * 1000;
        state.aio.insert(
            ctxid,
            MockAio {
                seqnum,
                signal,
                ready: VecDeque::new(),
                deferred: VecDeque::new(),
            },
        );
        ctx.ctxid = ctxid;
        ctx.seqnum = seqnum;
        Ok(())
    }

    fn delete_aio_ctx(&self, ctx: &mut AioCtx) -> CallResult {
        self.lock()
            .aio
            .remove(&ctx.ctxid)
            .map(|_| ())
            .ok_or(Errno::EINVAL)
    }

    fn get_io_events(&self, events: &mut AioEvents) -> CallResult {
        let mut state = self.lock();
        let aio = state.aio.get_mut(&events.ctxid).ok_or(Errno::EINVAL)?;
        if aio.seqnum != events.seqnum || events.nr < 0 {
            return Err(Errno::EINVAL);
        }
        let wanted = (events.nr as usize).min(MAX_AIO_EVENTS);
        let mut filled = 0;
        while filled < wanted {
            match aio.ready.pop_front() {
                Some(event) => {
                    events.events[filled] = event;
                    filled += 1;
                }
                None => break,
            }
        }
        events.nr = filled as i32;
        Ok(())
    }

    fn cf_status(&self, status: &mut CfStatus) -> CallResult {
        let family = self.family(status.db_index, status.cf_index)?;
        status.key_count = family.data.len() as u64;
        status.total_cache_size = family
            .data
            .iter()
            .map(|entry| (entry.key().len() + entry.value().len()) as u64)
            .sum();
        Ok(())
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlChannel for MockDevice {
    fn call(&self, request: Request<'_>) -> CallResult {
        let kind = request.kind();
        *self.calls.entry(kind).or_insert(0) += 1;
        if let Some(errno) = self.take_fault(kind) {
            return Err(errno);
        }
        match request {
            Request::OpenDatabase(handle) => self.open_database(handle),
            Request::RemoveDatabase(handle) => self.remove_database(handle),
            Request::ListColumnFamilies(list) => self.list_families(list),
            Request::OpenColumnFamily(handle) => self.open_family(handle, false),
            Request::CreateColumnFamily(handle) => self.open_family(handle, true),
            Request::RemoveColumnFamily(handle) => self.remove_family(handle),
            Request::SetCache(cache) => self.set_cache(cache),
            Request::GetKv(cmd) => self.get_kv(cmd),
            Request::PutKv(cmd) => self.put_kv(cmd),
            Request::DelKv(cmd) => self.del_kv(cmd),
            Request::KeyStatus(status) => self.key_status(status),
            Request::ReadBatch(buf) => self.read_batch(buf),
            Request::WriteBatch(buf) => self.write_batch(buf, true),
            Request::WriteBatchNonatomic(buf) => self.write_batch(buf, false),
            Request::CreateSnapshot(cmd) => self.create_snapshot(cmd),
            Request::ReleaseSnapshot(cmd) => self.release_snapshot(cmd),
            Request::CreateIterators(batch) => self.create_iterators(batch),
            Request::IteratorOp(op) => self.iterator_op(op),
            Request::CreateAioCtx(ctx) => self.create_aio_ctx(ctx),
            Request::DeleteAioCtx(ctx) => self.delete_aio_ctx(ctx),
            Request::GetIoEvents(events) => self.get_io_events(events),
            Request::CfStatus(status) => self.cf_status(status),
        }
    }
}
