use crate::compaction::CompactionFilterFactory;
use crate::error::{Result, StorageError};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Session-wide options.
///
/// Use the builder pattern methods to customize settings and [`validate`]
/// before opening. Options round-trip through JSON so the CLI can keep
/// them in a file.
///
/// # Example
///
/// ```
/// use devkv::DbOptions;
///
/// let options = DbOptions::new()
///     .with_create_if_missing(true)
///     .with_aio_request_slots(1024);
///
/// assert!(options.validate().is_ok());
/// ```
///
/// [`validate`]: DbOptions::validate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DbOptions {
    /// Create the database on the device when it does not exist (default: false).
    pub create_if_missing: bool,

    /// Open the database at `db_index` instead of letting the device pick
    /// one (default: false).
    pub forced_index: bool,

    /// Database slot used with `forced_index`.
    pub db_index: i32,

    /// Target SST size used by `build_table` (default: 64MB).
    ///
    /// Valid range: 1MB - 4GB.
    pub target_file_size_base: u64,

    /// Capacity of the async request-id pool (default: 8192).
    ///
    /// Valid range: 1 - 65536.
    pub aio_request_slots: u32,

    /// Attempts at opening the database while the device asks to retry
    /// (default: 100). Valid range: 1 - 100000.
    pub open_retry_limit: u32,

    /// First backoff between open attempts in milliseconds, doubled after
    /// every attempt up to one second (default: 10ms).
    pub open_retry_backoff_ms: u64,

    /// How long closing waits for in-flight async requests, in
    /// milliseconds. 0 waits until they all complete (default: 30000ms).
    pub aio_drain_timeout_ms: u64,
}

/// Upper bound of the open backoff.
pub const MAX_OPEN_BACKOFF: Duration = Duration::from_secs(1);

impl DbOptions {
    /// Creates options with default values.
    ///
    /// # Default Values
    ///
    /// - create_if_missing: false
    /// - forced_index: false (db_index 0)
    /// - target_file_size_base: 64MB
    /// - aio_request_slots: 8192
    /// - open_retry_limit: 100, backoff 10ms
    /// - aio_drain_timeout_ms: 30000
    pub fn new() -> Self {
        Self {
            create_if_missing: false,
            forced_index: false,
            db_index: 0,
            target_file_size_base: 64 * 1024 * 1024, // 64MB
            aio_request_slots: 8192,
            open_retry_limit: 100,
            open_retry_backoff_ms: 10,
            aio_drain_timeout_ms: 30_000,
        }
    }

    /// Validates the option values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any parameter is invalid:
    /// - Negative db_index
    /// - target_file_size_base < 1MB or > 4GB
    /// - aio_request_slots < 1 or > 65536
    /// - open_retry_limit < 1 or > 100000
    /// - open_retry_backoff_ms > 1000
    pub fn validate(&self) -> Result<()> {
        if self.db_index < 0 {
            return Err(StorageError::ConfigError(
                "db_index cannot be negative".to_string(),
            ));
        }

        if self.target_file_size_base < 1024 * 1024 {
            return Err(StorageError::ConfigError(
                "target_file_size_base must be at least 1MB".to_string(),
            ));
        }
        if self.target_file_size_base > 4 * 1024 * 1024 * 1024 {
            return Err(StorageError::ConfigError(
                "target_file_size_base cannot exceed 4GB".to_string(),
            ));
        }

        if self.aio_request_slots < 1 {
            return Err(StorageError::ConfigError(
                "aio_request_slots must be at least 1".to_string(),
            ));
        }
        if self.aio_request_slots > 65536 {
            return Err(StorageError::ConfigError(
                "aio_request_slots cannot exceed 65536".to_string(),
            ));
        }

        if self.open_retry_limit < 1 {
            return Err(StorageError::ConfigError(
                "open_retry_limit must be at least 1".to_string(),
            ));
        }
        if self.open_retry_limit > 100_000 {
            return Err(StorageError::ConfigError(
                "open_retry_limit cannot exceed 100000".to_string(),
            ));
        }

        if self.open_retry_backoff_ms > MAX_OPEN_BACKOFF.as_millis() as u64 {
            return Err(StorageError::ConfigError(
                "open_retry_backoff_ms cannot exceed 1000".to_string(),
            ));
        }

        Ok(())
    }

    /// Drain timeout for closing, `None` meaning wait forever.
    pub fn aio_drain_timeout(&self) -> Option<Duration> {
        match self.aio_drain_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Load options from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: DbOptions = serde_json::from_str(&content)?;
        options.validate()?;
        Ok(options)
    }

    /// Write options to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Pin the database to a device slot
    pub fn with_forced_index(mut self, db_index: i32) -> Self {
        self.forced_index = true;
        self.db_index = db_index;
        self
    }

    pub fn with_target_file_size_base(mut self, size: u64) -> Self {
        self.target_file_size_base = size;
        self
    }

    pub fn with_aio_request_slots(mut self, slots: u32) -> Self {
        self.aio_request_slots = slots;
        self
    }

    pub fn with_open_retry(mut self, limit: u32, backoff_ms: u64) -> Self {
        self.open_retry_limit = limit;
        self.open_retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_aio_drain_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.aio_drain_timeout_ms = timeout_ms;
        self
    }
}

impl Default for DbOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-family options.
#[derive(Clone, Default)]
pub struct ColumnFamilyOptions {
    /// Cache size hint sent to the device when the family is opened. 0 leaves
    /// the device default in place.
    pub cache_size: u64,

    /// Factory consulted by manual compaction.
    pub compaction_filter_factory: Option<Arc<dyn CompactionFilterFactory>>,
}

impl ColumnFamilyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_compaction_filter_factory(
        mut self,
        factory: Arc<dyn CompactionFilterFactory>,
    ) -> Self {
        self.compaction_filter_factory = Some(factory);
        self
    }
}

impl fmt::Debug for ColumnFamilyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyOptions")
            .field("cache_size", &self.cache_size)
            .field(
                "compaction_filter_factory",
                &self.compaction_filter_factory.as_ref().map(|f| f.name()),
            )
            .finish()
    }
}

/// Options for reads, iterators and read batches.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions<'a> {
    pub fill_cache: bool,
    /// Read at this snapshot; `None` reads the latest data.
    pub snapshot: Option<&'a Snapshot>,
    /// Iterators return keys only.
    pub only_read_key: bool,
}

impl<'a> ReadOptions<'a> {
    pub fn new() -> Self {
        Self {
            fill_cache: true,
            snapshot: None,
            only_read_key: false,
        }
    }

    pub fn with_snapshot(mut self, snapshot: &'a Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_fill_cache(mut self, fill_cache: bool) -> Self {
        self.fill_cache = fill_cache;
        self
    }

    pub fn with_only_read_key(mut self, only_read_key: bool) -> Self {
        self.only_read_key = only_read_key;
        self
    }

    /// Sequence number sent to the device; 0 means latest.
    pub fn snapshot_sequence(&self) -> u64 {
        self.snapshot.map(Snapshot::sequence).unwrap_or(0)
    }
}

impl Default for ReadOptions<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for puts, deletes and batch writes.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub sync: bool,
    pub fill_cache: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self {
            sync: false,
            fill_cache: true,
        }
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_fill_cache(mut self, fill_cache: bool) -> Self {
        self.fill_cache = fill_cache;
        self
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for manual compaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactRangeOptions {
    /// Commit the collected deletions with a synchronous write.
    pub sync: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_options_default_values() {
        let options = DbOptions::new();

        assert!(!options.create_if_missing);
        assert!(!options.forced_index);
        assert_eq!(options.target_file_size_base, 64 * 1024 * 1024);
        assert_eq!(options.aio_request_slots, 8192);
        assert_eq!(options.open_retry_limit, 100);
        assert_eq!(options.open_retry_backoff_ms, 10);
        assert_eq!(options.aio_drain_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_options_validation_success() {
        assert!(DbOptions::new().validate().is_ok());
    }

    #[test]
    fn test_options_validation_negative_index() {
        let options = DbOptions::new().with_forced_index(-1);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_validation_zero_slots() {
        let options = DbOptions::new().with_aio_request_slots(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_validation_too_many_slots() {
        let options = DbOptions::new().with_aio_request_slots(100_000);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_validation_retry_bounds() {
        assert!(DbOptions::new().with_open_retry(0, 10).validate().is_err());
        assert!(DbOptions::new().with_open_retry(5, 5000).validate().is_err());
        assert!(DbOptions::new().with_open_retry(5, 0).validate().is_ok());
    }

    #[test]
    fn test_options_validation_target_file_size() {
        let options = DbOptions::new().with_target_file_size_base(1024);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_drain_timeout_zero_waits_forever() {
        let options = DbOptions::new().with_aio_drain_timeout_ms(0);
        assert_eq!(options.aio_drain_timeout(), None);
    }

    #[test]
    fn test_options_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("options.json");

        let options = DbOptions::new()
            .with_create_if_missing(true)
            .with_forced_index(3)
            .with_aio_request_slots(256);
        options.save(&path).unwrap();

        let loaded = DbOptions::load(&path).unwrap();
        assert_eq!(loaded, options);
    }

    #[test]
    fn test_load_fills_missing_fields_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "create_if_missing": true }"#).unwrap();

        let loaded = DbOptions::load(&path).unwrap();
        assert!(loaded.create_if_missing);
        assert_eq!(loaded.aio_request_slots, 8192);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "aio_request_slots": 0 }"#).unwrap();

        let err = DbOptions::load(&path).unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }

    #[test]
    fn test_read_options_snapshot_sequence() {
        let snapshot = Snapshot::new(42);
        assert_eq!(ReadOptions::new().snapshot_sequence(), 0);
        assert_eq!(ReadOptions::new().with_snapshot(&snapshot).snapshot_sequence(), 42);
    }

    #[test]
    fn test_write_options_builder() {
        let options = WriteOptions::new().with_sync(true).with_fill_cache(false);
        assert!(options.sync);
        assert!(!options.fill_cache);
    }
}
