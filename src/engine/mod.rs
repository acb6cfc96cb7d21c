use crate::aio::AioContext;
use crate::command;
use crate::config::{
    ColumnFamilyOptions, CompactRangeOptions, DbOptions, ReadOptions, WriteOptions,
    MAX_OPEN_BACKOFF,
};
use crate::device::{CallResult, ControlChannel, DeviceChannel, Request};
use crate::env::{Env, StdEnv};
use crate::error::{Result, StorageError};
use crate::handle::{
    ColumnFamilyDescriptor, ColumnFamilyHandle, HandleRegistry, DEFAULT_COLUMN_FAMILY_NAME,
};
use crate::iterator::DbIterator;
use crate::metrics::Metrics;
use crate::snapshot::Snapshot;
use crate::sst::{BuildMode, SstAnalyzer, SstBuilder};
use crate::uapi::{
    CacheSize, CfList, CfStatus, IteratorBatch, SnapshotCmd, CF_NAME_LEN, DB_NAME_LEN,
    MAX_CF_COUNT, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
use nix::errno::Errno;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

mod async_ops;
mod batch;

/// Property reporting the bytes a column family holds in device cache.
pub const PROPERTY_CUR_SIZE_ALL_MEM_TABLES: &str = "devkv.cur-size-all-mem-tables";
/// Property reporting the number of keys in a column family.
pub const PROPERTY_ESTIMATE_NUM_KEYS: &str = "devkv.estimate-num-keys";

/// An open database on the device.
///
/// The `Session` owns the control channel, the column family handles it
/// opened or created, the snapshots it handed out and its async context.
/// Every operation is a blocking call on the channel except
/// [`poll_completion`](Session::poll_completion), which waits for async
/// completions up to a caller-supplied timeout.
///
/// # Example
///
/// ```no_run
/// use devkv::{DbOptions, ReadOptions, Session, WriteOptions};
///
/// fn main() -> devkv::Result<()> {
///     let options = DbOptions::new().with_create_if_missing(true);
///     let session = Session::open_device_default("/dev/kv0", &options, "users")?;
///     let cf = session.default_column_family()?;
///
///     session.put_cf(&WriteOptions::new(), &cf, b"key", b"value")?;
///     let value = session.get_cf(&ReadOptions::new(), &cf, b"key")?;
///     assert_eq!(value, b"value");
///
///     session.close();
///     Ok(())
/// }
/// ```
pub struct Session {
    name: String,
    options: DbOptions,
    db_index: i32,
    channel: RwLock<Option<Arc<dyn ControlChannel>>>,
    registry: HandleRegistry,
    snapshots: Mutex<HashSet<u64>>,
    aio: AioContext,
    env: Arc<dyn Env>,
    metrics: Arc<Metrics>,
    closed: AtomicBool,
}

fn validate_db_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() >= DB_NAME_LEN {
        return Err(StorageError::InvalidArgument(format!(
            "database name {:?} must be 1 to {} bytes",
            name,
            DB_NAME_LEN - 1
        )));
    }
    Ok(())
}

fn validate_cf_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidArgument(
            "column family name is empty".to_string(),
        ));
    }
    if name.len() >= CF_NAME_LEN {
        return Err(StorageError::InvalidArgument(format!("{} is too long", name)));
    }
    Ok(())
}

fn key_error(key: &[u8], errno: Errno) -> StorageError {
    StorageError::IoError(format!(
        "{}: {}",
        String::from_utf8_lossy(key),
        errno.desc()
    ))
}

/// Open a database, retrying with doubling backoff while the device
/// reports a transient condition.
fn open_database(
    channel: &dyn ControlChannel,
    name: &str,
    options: &DbOptions,
    metrics: &Metrics,
) -> Result<i32> {
    let mut handle = command::db_handle(name, options);
    let mut backoff = Duration::from_millis(options.open_retry_backoff_ms);
    for attempt in 1..=options.open_retry_limit {
        metrics.increment_device_calls();
        match channel.call(Request::OpenDatabase(&mut handle)) {
            Ok(()) => return Ok(handle.db_index),
            Err(Errno::EAGAIN) => {
                debug!("Database {} busy, attempt {}", name, attempt);
                if attempt < options.open_retry_limit {
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_OPEN_BACKOFF);
                }
            }
            Err(e) => return Err(StorageError::device(&format!("open database {}", name), e)),
        }
    }
    Err(StorageError::IoError(format!(
        "open database {}: device still busy after {} attempts",
        name, options.open_retry_limit
    )))
}

fn list_families(channel: &dyn ControlChannel, db_index: i32) -> Result<Vec<String>> {
    let mut list = CfList {
        db_index,
        ..CfList::default()
    };
    channel
        .call(Request::ListColumnFamilies(&mut list))
        .map_err(|e| StorageError::device("list column families", e))?;
    Ok(list.names())
}

impl Session {
    /// Opens a database and every column family in `descriptors`.
    ///
    /// Every family the device already knows for this database must be
    /// listed; families listed but unknown are created.
    ///
    /// # Returns
    ///
    /// The session and one handle per descriptor, in descriptor order. The
    /// family named `default` (or the first one) becomes the default family.
    ///
    /// # Errors
    ///
    /// - `ConfigError` if `options` fail validation
    /// - `InvalidArgument` for an empty descriptor list, an over-long
    ///   database or family name (checked before any device call), a device
    ///   family missing from `descriptors`, or a failure to set up the async
    ///   context
    /// - `IoError` if the device rejects the open, keeps reporting busy past
    ///   `open_retry_limit`, or fails to open a family
    pub fn open(
        channel: Arc<dyn ControlChannel>,
        options: &DbOptions,
        name: &str,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<(Session, Vec<ColumnFamilyHandle>)> {
        options.validate()?;
        validate_db_name(name)?;
        if descriptors.is_empty() {
            return Err(StorageError::InvalidArgument(
                "at least one column family must be opened".to_string(),
            ));
        }
        for descriptor in &descriptors {
            validate_cf_name(&descriptor.name)?;
        }

        let metrics = Arc::new(Metrics::new());
        let db_index = open_database(channel.as_ref(), name, options, &metrics)?;

        metrics.increment_device_calls();
        for existing in list_families(channel.as_ref(), db_index)? {
            if !descriptors.iter().any(|d| d.name == existing) {
                return Err(StorageError::InvalidArgument(format!(
                    "You have to open all column families. not open: {}",
                    existing
                )));
            }
        }

        let registry = HandleRegistry::new();
        let mut handles = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let mut cf = command::cf_handle(db_index, &descriptor.name);
            metrics.increment_device_calls();
            if let Err(e) = channel.call(Request::OpenColumnFamily(&mut cf)) {
                registry.clear();
                return Err(StorageError::device(
                    &format!("open column family {}", descriptor.name),
                    e,
                ));
            }
            let handle = registry.insert(
                ColumnFamilyHandle::new(db_index, cf.cf_index, descriptor.name.clone()),
                descriptor.options.clone(),
            );
            set_cache_hint(channel.as_ref(), &handle, &descriptor.options, &metrics);
            handles.push(handle);
        }

        let default = handles
            .iter()
            .find(|h| h.name() == DEFAULT_COLUMN_FAMILY_NAME)
            .unwrap_or(&handles[0])
            .clone();
        registry.set_default(default);

        let aio = AioContext::open(
            channel.as_ref(),
            options.aio_request_slots as usize,
            options.aio_drain_timeout(),
            Arc::clone(&metrics),
        )
        .map_err(|e| StorageError::InvalidArgument(format!("OpenAio error: {}", e)))?;

        info!(
            "Opened database {} (index {}) with {} column families",
            name,
            db_index,
            handles.len()
        );

        let session = Session {
            name: name.to_string(),
            options: options.clone(),
            db_index,
            channel: RwLock::new(Some(channel)),
            registry,
            snapshots: Mutex::new(HashSet::new()),
            aio,
            env: Arc::new(StdEnv),
            metrics,
            closed: AtomicBool::new(false),
        };
        Ok((session, handles))
    }

    /// Opens a database with only the `default` column family.
    pub fn open_default(
        channel: Arc<dyn ControlChannel>,
        options: &DbOptions,
        name: &str,
    ) -> Result<Session> {
        let descriptors = vec![ColumnFamilyDescriptor::new(
            DEFAULT_COLUMN_FAMILY_NAME,
            ColumnFamilyOptions::default(),
        )];
        let (session, _) = Self::open(channel, options, name, descriptors)?;
        Ok(session)
    }

    /// Opens the device node at `path` and then the database on it.
    pub fn open_device(
        path: impl AsRef<Path>,
        options: &DbOptions,
        name: &str,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<(Session, Vec<ColumnFamilyHandle>)> {
        let channel = Arc::new(DeviceChannel::open(path)?);
        Self::open(channel, options, name, descriptors)
    }

    pub fn open_device_default(
        path: impl AsRef<Path>,
        options: &DbOptions,
        name: &str,
    ) -> Result<Session> {
        let channel = Arc::new(DeviceChannel::open(path)?);
        Self::open_default(channel, options, name)
    }

    /// Names of the column families the device holds for database `name`.
    pub fn list_column_families(
        channel: &dyn ControlChannel,
        options: &DbOptions,
        name: &str,
    ) -> Result<Vec<String>> {
        options.validate()?;
        validate_db_name(name)?;
        let metrics = Metrics::new();
        let db_index = open_database(channel, name, options, &metrics)?;
        list_families(channel, db_index)
    }

    /// Removes database `name` and everything in it from the device.
    pub fn destroy(channel: &dyn ControlChannel, name: &str) -> Result<()> {
        validate_db_name(name)?;
        let mut handle = command::db_handle(name, &DbOptions::new());
        channel
            .call(Request::OpenDatabase(&mut handle))
            .map_err(|e| StorageError::device(&format!("open database {}", name), e))?;
        channel
            .call(Request::RemoveDatabase(&mut handle))
            .map_err(|e| StorageError::device(&format!("remove database {}", name), e))?;
        info!("Destroyed database {}", name);
        Ok(())
    }

    /// Replace the filesystem capability used by SST export.
    pub fn with_env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = env;
        self
    }

    /// Closes the session.
    ///
    /// Waits for in-flight async requests (bounded by
    /// `aio_drain_timeout_ms`), releases live snapshots, forgets every column
    /// family handle and drops the control channel. Calling it again does
    /// nothing. Dropping the session closes it too.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let channel = match self.channel.read().unwrap_or_else(|e| e.into_inner()).clone() {
            Some(channel) => channel,
            None => return,
        };

        let remaining = self.aio.close(channel.as_ref());

        let live: Vec<u64> = self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for snapshot_id in live {
            let mut cmd = SnapshotCmd {
                db: self.db_index,
                snapshot_id,
                ..SnapshotCmd::default()
            };
            if let Err(e) = channel.call(Request::ReleaseSnapshot(&mut cmd)) {
                warn!("Failed to release snapshot {}: {}", snapshot_id, e.desc());
            }
        }

        self.registry.clear();
        *self.channel.write().unwrap_or_else(|e| e.into_inner()) = None;
        info!(
            "Closed database {} ({} async requests left undrained)",
            self.name, remaining
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::InvalidArgument(format!(
                "database {} has been closed",
                self.name
            )));
        }
        Ok(())
    }

    pub(crate) fn channel(&self) -> Result<Arc<dyn ControlChannel>> {
        self.ensure_open()?;
        self.live_channel()
    }

    /// The channel while it is still held, which includes the drain phase of
    /// [`close`](Session::close).
    pub(crate) fn live_channel(&self) -> Result<Arc<dyn ControlChannel>> {
        self.channel
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!("database {} has been closed", self.name))
            })
    }

    /// Issue one control call. A closed session answers `EBADF`.
    pub(crate) fn call(&self, request: Request<'_>) -> CallResult {
        let channel = self
            .channel
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match channel {
            Some(channel) => {
                self.metrics.increment_device_calls();
                channel.call(request)
            }
            None => Err(Errno::EBADF),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device-assigned database index.
    pub fn db_index(&self) -> i32 {
        self.db_index
    }

    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    pub fn env(&self) -> &Arc<dyn Env> {
        &self.env
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn default_column_family(&self) -> Result<ColumnFamilyHandle> {
        self.ensure_open()?;
        self.registry.default_handle().ok_or_else(|| {
            StorageError::InvalidArgument("no default column family is open".to_string())
        })
    }

    /// Open handle with the given family id, if any.
    pub fn column_family_by_id(&self, cf_index: i32) -> Option<ColumnFamilyHandle> {
        self.registry.by_id(cf_index)
    }

    /// Every open column family, ordered by id.
    pub fn column_families(&self) -> Vec<ColumnFamilyHandle> {
        self.registry.handles()
    }

    pub(crate) fn resolve(&self, cf: &ColumnFamilyHandle) -> Result<i32> {
        self.ensure_open()?;
        self.registry.resolve(cf)
    }

    pub(crate) fn column_family_options(
        &self,
        cf: &ColumnFamilyHandle,
    ) -> Result<ColumnFamilyOptions> {
        self.registry.options(cf)
    }

    /// Creates a column family and registers its handle with the session.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad name, `IoError` when the device refuses
    /// (for instance because the family exists).
    pub fn create_column_family(
        &self,
        options: ColumnFamilyOptions,
        name: &str,
    ) -> Result<ColumnFamilyHandle> {
        self.ensure_open()?;
        validate_cf_name(name)?;
        let mut cf = command::cf_handle(self.db_index, name);
        self.call(Request::CreateColumnFamily(&mut cf))
            .map_err(|e| StorageError::device(&format!("create column family {}", name), e))?;
        let handle = ColumnFamilyHandle::new(self.db_index, cf.cf_index, name);
        if let Some(channel) = self.channel.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            set_cache_hint(channel.as_ref(), &handle, &options, &self.metrics);
        }
        let handle = self.registry.insert(handle, options);
        info!("Created column family {} (id {})", name, handle.cf_index());
        Ok(handle)
    }

    /// Creates one family per name, sharing `options`. Stops at the first
    /// failure; families created before it stay open.
    pub fn create_column_families(
        &self,
        options: &ColumnFamilyOptions,
        names: &[&str],
    ) -> Result<Vec<ColumnFamilyHandle>> {
        names
            .iter()
            .map(|name| self.create_column_family(options.clone(), name))
            .collect()
    }

    /// Descriptor flavour of [`create_column_families`](Session::create_column_families).
    pub fn create_column_families_from(
        &self,
        descriptors: &[ColumnFamilyDescriptor],
    ) -> Result<Vec<ColumnFamilyHandle>> {
        descriptors
            .iter()
            .map(|d| self.create_column_family(d.options.clone(), &d.name))
            .collect()
    }

    /// Removes a column family from the device. The handle, and any copy of
    /// it, is rejected from then on.
    pub fn drop_column_family(&self, handle: ColumnFamilyHandle) -> Result<()> {
        self.resolve(&handle)?;
        let mut cf = command::cf_handle(self.db_index, handle.name());
        cf.cf_index = handle.cf_index();
        self.call(Request::RemoveColumnFamily(&mut cf)).map_err(|e| {
            StorageError::device(&format!("remove column family {}", handle.name()), e)
        })?;
        self.registry.remove(&handle);
        info!("Dropped column family {}", handle.name());
        Ok(())
    }

    /// Drops families in order and stops at the first failure. Families
    /// dropped before the failure stay dropped.
    pub fn drop_column_families(&self, handles: Vec<ColumnFamilyHandle>) -> Result<()> {
        for handle in handles {
            self.drop_column_family(handle)?;
        }
        Ok(())
    }

    /// Forgets a handle without touching the device.
    pub fn destroy_column_family_handle(&self, handle: ColumnFamilyHandle) -> Result<()> {
        self.registry.remove(&handle);
        Ok(())
    }

    /// Reads a value from the default column family.
    pub fn get(&self, options: &ReadOptions<'_>, key: &[u8]) -> Result<Vec<u8>> {
        let cf = self.default_column_family()?;
        self.get_cf(options, &cf, key)
    }

    /// Reads a value.
    ///
    /// The receive buffer is `MAX_VALUE_SIZE` bytes, so larger values cannot
    /// be read through this call.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `cf` is not open in this session
    /// - `NotFound` if the key does not exist (at the snapshot, if one is set)
    /// - `IoError` for any other device failure
    pub fn get_cf(
        &self,
        options: &ReadOptions<'_>,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<Vec<u8>> {
        let start = Instant::now();
        let cf_index = self.resolve(cf)?;
        let mut value = vec![0u8; MAX_VALUE_SIZE];
        let mut cmd = command::get(self.db_index, cf_index, key, &mut value, options);
        self.call(Request::GetKv(&mut cmd))
            .map_err(|e| StorageError::from_keyed_call(e, key))?;
        value.truncate((cmd.value_len as usize).min(MAX_VALUE_SIZE));
        self.metrics.record_latency("get", start.elapsed());
        Ok(value)
    }

    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.default_column_family()?;
        self.put_cf(options, &cf, key, value)
    }

    /// Stores a value. Any device failure is an `IoError`.
    pub fn put_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let start = Instant::now();
        let cf_index = self.resolve(cf)?;
        let mut cmd = command::put(self.db_index, cf_index, key, value, options);
        self.call(Request::PutKv(&mut cmd))
            .map_err(|e| key_error(key, e))?;
        self.metrics.record_latency("put", start.elapsed());
        Ok(())
    }

    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let cf = self.default_column_family()?;
        self.delete_cf(options, &cf, key)
    }

    /// Deletes a key.
    ///
    /// The device does not tell a refused delete apart from a missing key:
    /// any device failure is reported as `NotFound`.
    pub fn delete_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<()> {
        let start = Instant::now();
        let cf_index = self.resolve(cf)?;
        let mut cmd = command::delete(self.db_index, cf_index, key, options);
        if let Err(e) = self.call(Request::DelKv(&mut cmd)) {
            debug!("Delete rejected by device: {}", e.desc());
            return Err(StorageError::NotFound(
                String::from_utf8_lossy(key).into_owned(),
            ));
        }
        self.metrics.record_latency("delete", start.elapsed());
        Ok(())
    }

    pub fn key_exist(&self, options: &ReadOptions<'_>, key: &[u8]) -> Result<()> {
        let cf = self.default_column_family()?;
        self.key_exist_cf(options, &cf, key)
    }

    /// `Ok(())` if the key exists, `NotFound` if it does not.
    ///
    /// Keys longer than `MAX_KEY_SIZE` fail with `Corruption` before any
    /// device call.
    pub fn key_exist_cf(
        &self,
        options: &ReadOptions<'_>,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<()> {
        let cf_index = self.resolve(cf)?;
        if key.len() > MAX_KEY_SIZE {
            return Err(StorageError::Corruption(format!(
                "key length {} exceeds {}",
                key.len(),
                MAX_KEY_SIZE
            )));
        }
        let mut status = command::key_status(self.db_index, cf_index, key, options);
        self.call(Request::KeyStatus(&mut status))
            .map_err(|e| key_error(key, e))?;
        if status.exist == 0 {
            return Err(StorageError::NotFound(
                String::from_utf8_lossy(key).into_owned(),
            ));
        }
        Ok(())
    }

    /// Pins the current state of the database.
    ///
    /// Live snapshots are released when the session closes.
    pub fn get_snapshot(&self) -> Result<Snapshot> {
        self.ensure_open()?;
        let mut cmd = SnapshotCmd {
            db: self.db_index,
            ..SnapshotCmd::default()
        };
        self.call(Request::CreateSnapshot(&mut cmd))
            .map_err(|e| StorageError::device("create snapshot", e))?;
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(cmd.snapshot_id);
        Ok(Snapshot::new(cmd.snapshot_id))
    }

    pub fn release_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.ensure_open()?;
        let sequence = snapshot.sequence();
        if !self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&sequence)
        {
            return Err(StorageError::InvalidArgument(format!(
                "snapshot {} does not belong to this session",
                sequence
            )));
        }
        let mut cmd = SnapshotCmd {
            db: self.db_index,
            snapshot_id: sequence,
            ..SnapshotCmd::default()
        };
        self.call(Request::ReleaseSnapshot(&mut cmd))
            .map_err(|e| StorageError::device("release snapshot", e))?;
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&sequence);
        Ok(())
    }

    /// Creates one iterator over `cf`.
    pub fn new_iterator(
        &self,
        options: &ReadOptions<'_>,
        cf: &ColumnFamilyHandle,
    ) -> Result<DbIterator<'_>> {
        let mut iterators = self.new_iterators(options, std::slice::from_ref(cf))?;
        iterators
            .pop()
            .ok_or_else(|| StorageError::IoError("create iterator returned nothing".to_string()))
    }

    /// Creates one iterator per family in a single device call. All of them
    /// read at the same point in time.
    pub fn new_iterators(
        &self,
        options: &ReadOptions<'_>,
        cfs: &[ColumnFamilyHandle],
    ) -> Result<Vec<DbIterator<'_>>> {
        if cfs.is_empty() || cfs.len() > MAX_CF_COUNT {
            return Err(StorageError::InvalidArgument(format!(
                "iterators can span 1 to {} column families, got {}",
                MAX_CF_COUNT,
                cfs.len()
            )));
        }
        let mut batch = IteratorBatch {
            db_index: self.db_index as u32,
            count: cfs.len() as u32,
            only_read_key: options.only_read_key as u8,
            timestamp: options.snapshot_sequence(),
            ..IteratorBatch::default()
        };
        for (slot, cf) in batch.iters.iter_mut().zip(cfs) {
            slot.db_index = self.db_index as u32;
            slot.cf_index = self.resolve(cf)? as u32;
            slot.only_read_key = batch.only_read_key;
            slot.timestamp = batch.timestamp;
        }
        self.call(Request::CreateIterators(&mut batch))
            .map_err(|e| StorageError::device("create iterator", e))?;

        Ok(batch.iters[..cfs.len()]
            .iter()
            .map(|slot| {
                DbIterator::new(
                    self,
                    slot.cf_index as i32,
                    slot.iter_index,
                    slot.timestamp,
                    options.only_read_key,
                )
            })
            .collect())
    }

    /// Reads a column family property through the device status command.
    ///
    /// Supported: [`PROPERTY_CUR_SIZE_ALL_MEM_TABLES`] and
    /// [`PROPERTY_ESTIMATE_NUM_KEYS`]. Returns `None` for unknown properties,
    /// closed families or device failures.
    pub fn get_property(&self, cf: &ColumnFamilyHandle, property: &str) -> Option<String> {
        let cf_index = self.resolve(cf).ok()?;
        let mut status = CfStatus {
            db_index: self.db_index,
            cf_index,
            ..CfStatus::default()
        };
        if let Err(e) = self.call(Request::CfStatus(&mut status)) {
            debug!("Column family status failed: {}", e.desc());
            return None;
        }
        match property {
            PROPERTY_CUR_SIZE_ALL_MEM_TABLES => Some(status.total_cache_size.to_string()),
            PROPERTY_ESTIMATE_NUM_KEYS => Some(status.key_count.to_string()),
            _ => None,
        }
    }

    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if !self.env.file_exists(dir) {
            self.env.create_dir(dir)?;
        }
        Ok(())
    }

    /// Exports every `(handle, iterator)` pair to SST files named after the
    /// column family under `dir`. Stops at the first failure.
    pub fn build_table(
        &self,
        dir: &Path,
        builder: &dyn SstBuilder,
        handles: &[ColumnFamilyHandle],
        iterators: &mut [DbIterator<'_>],
    ) -> Result<()> {
        if handles.is_empty() || iterators.is_empty() {
            return Err(StorageError::Corruption(
                "handles or iterators are empty".to_string(),
            ));
        }
        if handles.len() != iterators.len() {
            return Err(StorageError::Corruption(format!(
                "{} handles but {} iterators",
                handles.len(),
                iterators.len()
            )));
        }
        self.ensure_dir(dir)?;
        for (handle, iter) in handles.iter().zip(iterators.iter_mut()) {
            iter.seek_to_first();
            builder.build(
                dir,
                handle.name(),
                self.env.as_ref(),
                handle,
                iter,
                self.options.target_file_size_base,
                BuildMode::PerColumnFamily,
            )?;
        }
        Ok(())
    }

    /// Exports the entries of `iter`, from its current position, to one SST
    /// file.
    pub fn build_sst_file(
        &self,
        dir: &Path,
        file_name: &str,
        builder: &dyn SstBuilder,
        handle: &ColumnFamilyHandle,
        iter: &mut DbIterator<'_>,
        file_size: u64,
    ) -> Result<()> {
        if !iter.valid() {
            return Err(StorageError::Corruption("iterator is not valid".to_string()));
        }
        self.ensure_dir(dir)?;
        builder.build(
            dir,
            file_name,
            self.env.as_ref(),
            handle,
            iter,
            file_size,
            BuildMode::SingleFile,
        )
    }

    /// Loads an external SST file into this database.
    pub fn ingest_extern_file(
        &self,
        analyzer: &dyn SstAnalyzer,
        path: &Path,
        verify: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        analyzer.analyze(path, verify, self, None)
    }

    /// Like [`ingest_extern_file`](Session::ingest_extern_file), appending the
    /// handles of the families found in the file to `handles`.
    pub fn ingest_extern_file_with_handles(
        &self,
        analyzer: &dyn SstAnalyzer,
        path: &Path,
        verify: bool,
        handles: &mut Vec<ColumnFamilyHandle>,
    ) -> Result<()> {
        self.ensure_open()?;
        analyzer.analyze(path, verify, self, Some(handles))
    }

    /// Runs the column family's compaction filter over `[begin, end)` and
    /// deletes what it drops. See [`crate::compaction`].
    pub fn compact_range(
        &self,
        options: &CompactRangeOptions,
        cf: &ColumnFamilyHandle,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        crate::compaction::compact_range(self, options, cf, begin, end)
    }
}

/// Send a family's cache size hint. Failures are logged only.
fn set_cache_hint(
    channel: &dyn ControlChannel,
    handle: &ColumnFamilyHandle,
    options: &ColumnFamilyOptions,
    metrics: &Metrics,
) {
    if options.cache_size == 0 {
        return;
    }
    let mut cache = CacheSize {
        db: handle.db_index(),
        cf_index: handle.cf_index(),
        size: options.cache_size,
    };
    metrics.increment_device_calls();
    if let Err(e) = channel.call(Request::SetCache(&mut cache)) {
        warn!(
            "Failed to set cache size for column family {}: {}",
            handle.name(),
            e.desc()
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::device::RequestKind;

    fn options() -> DbOptions {
        DbOptions::new()
            .with_create_if_missing(true)
            .with_aio_request_slots(16)
            .with_open_retry(5, 0)
            .with_aio_drain_timeout_ms(100)
    }

    fn descriptors(names: &[&str]) -> Vec<ColumnFamilyDescriptor> {
        names
            .iter()
            .map(|n| ColumnFamilyDescriptor::new(*n, ColumnFamilyOptions::default()))
            .collect()
    }

    #[test]
    fn test_open_returns_handles_in_descriptor_order() {
        let device = Arc::new(MockDevice::new());
        let (session, handles) = Session::open(
            device.clone(),
            &options(),
            "db",
            descriptors(&["default", "users", "orders"]),
        )
        .unwrap();

        let names: Vec<_> = handles.iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names, vec!["default", "users", "orders"]);
        assert_eq!(session.default_column_family().unwrap().name(), "default");
        assert_eq!(session.column_families().len(), 3);
        assert_eq!(device.calls(RequestKind::CreateAioCtx), 1);
    }

    #[test]
    fn test_first_family_is_default_without_default_name() {
        let device = Arc::new(MockDevice::new());
        {
            let (session, handles) = Session::open(
                device.clone(),
                &options(),
                "db",
                descriptors(&["default", "users"]),
            )
            .unwrap();
            session.drop_column_family(handles[0].clone()).unwrap();
        }

        let (session, handles) =
            Session::open(device, &options(), "db", descriptors(&["users"])).unwrap();
        assert_eq!(session.default_column_family().unwrap(), handles[0]);
    }

    #[test]
    fn test_unlisted_device_family_is_rejected() {
        let device = Arc::new(MockDevice::new());
        device.seed_database("db", &["users"]);
        let err = Session::open(device, &options(), "db", descriptors(&["default"]))
            .err()
            .unwrap();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("not open: users"));
    }

    #[test]
    fn test_sync_put_get_delete() {
        let device = Arc::new(MockDevice::new());
        let session = Session::open_default(device, &options(), "db").unwrap();
        let cf = session.default_column_family().unwrap();

        session.put_cf(&WriteOptions::new(), &cf, b"a", b"1").unwrap();
        assert_eq!(session.get_cf(&ReadOptions::new(), &cf, b"a").unwrap(), b"1");
        assert!(session.key_exist_cf(&ReadOptions::new(), &cf, b"a").is_ok());

        session.delete_cf(&WriteOptions::new(), &cf, b"a").unwrap();
        assert!(session
            .get_cf(&ReadOptions::new(), &cf, b"a")
            .unwrap_err()
            .is_not_found());
        assert!(session
            .key_exist_cf(&ReadOptions::new(), &cf, b"a")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_oversized_key_exist_is_corruption_without_device_call() {
        let device = Arc::new(MockDevice::new());
        let session = Session::open_default(device.clone(), &options(), "db").unwrap();
        let cf = session.default_column_family().unwrap();

        let key = vec![b'k'; MAX_KEY_SIZE + 1];
        let err = session
            .key_exist_cf(&ReadOptions::new(), &cf, &key)
            .unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(device.calls(RequestKind::KeyStatus), 0);
    }

    #[test]
    fn test_delete_failure_reads_as_not_found() {
        let device = Arc::new(MockDevice::new());
        let session = Session::open_default(device.clone(), &options(), "db").unwrap();
        device.fail_next(RequestKind::DelKv, Errno::EIO, 1);
        let err = session.delete(&WriteOptions::new(), b"k").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_put_failure_is_io_error() {
        let device = Arc::new(MockDevice::new());
        let session = Session::open_default(device.clone(), &options(), "db").unwrap();
        device.fail_next(RequestKind::PutKv, Errno::ENXIO, 1);
        let err = session.put(&WriteOptions::new(), b"k", b"v").unwrap_err();
        assert!(err.is_io_error());
    }

    #[test]
    fn test_dropped_family_handle_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let session = Session::open_default(device, &options(), "db").unwrap();
        let users = session
            .create_column_family(ColumnFamilyOptions::default(), "users")
            .unwrap();
        let copy = users.clone();

        session.drop_column_family(users).unwrap();
        let err = session.put_cf(&WriteOptions::new(), &copy, b"k", b"v").unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(session.delete_cf(&WriteOptions::new(), &copy, b"k").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_cache_hint_failure_is_not_fatal() {
        let device = Arc::new(MockDevice::new());
        device.fail_next(RequestKind::SetCache, Errno::EIO, 1);
        let descriptors = vec![ColumnFamilyDescriptor::new(
            "default",
            ColumnFamilyOptions::new().with_cache_size(1 << 20),
        )];
        assert!(Session::open(device.clone(), &options(), "db", descriptors).is_ok());
        assert_eq!(device.calls(RequestKind::SetCache), 1);
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_later_calls() {
        let device = Arc::new(MockDevice::new());
        let session = Session::open_default(device.clone(), &options(), "db").unwrap();
        let cf = session.default_column_family().unwrap();
        session.close();
        session.close();

        assert!(session.is_closed());
        assert_eq!(device.calls(RequestKind::DeleteAioCtx), 1);
        let err = session.get_cf(&ReadOptions::new(), &cf, b"k").unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(session.get_snapshot().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_get_property_reads_cf_status() {
        let device = Arc::new(MockDevice::new());
        let session = Session::open_default(device, &options(), "db").unwrap();
        let cf = session.default_column_family().unwrap();
        session.put_cf(&WriteOptions::new(), &cf, b"ab", b"cdef").unwrap();

        assert_eq!(
            session.get_property(&cf, PROPERTY_ESTIMATE_NUM_KEYS).as_deref(),
            Some("1")
        );
        assert_eq!(
            session.get_property(&cf, PROPERTY_CUR_SIZE_ALL_MEM_TABLES).as_deref(),
            Some("6")
        );
        assert_eq!(session.get_property(&cf, "devkv.unknown"), None);
    }
}
