use crate::config::{ColumnFamilyOptions, DbOptions, ReadOptions, WriteOptions};
use crate::device::{ControlChannel, DeviceChannel};
use crate::engine::Session;
use crate::error::{Result, StorageError};
use crate::handle::{ColumnFamilyDescriptor, ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_NAME};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "devkv")]
#[command(about = "Client for a key-value store served by a block device", long_about = None)]
pub struct Command {
    /// Device node serving the store
    #[arg(long, global = true, default_value = "/dev/kvdev0")]
    pub device: PathBuf,

    /// Database name
    #[arg(long, global = true, default_value = "devkv")]
    pub db: String,

    /// JSON options file written by `init`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write an options file
    Init {
        /// Output path
        #[arg(short, long, default_value = "devkv.json")]
        output: PathBuf,

        /// Create the database on first open
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        create_if_missing: bool,

        /// Async request slots
        #[arg(long, default_value = "8192")]
        aio_slots: u32,

        /// SST target file size in MB
        #[arg(long, default_value = "64")]
        target_file_size_mb: u64,
    },

    /// Put a key-value pair
    Put {
        key: String,
        value: String,

        /// Column family
        #[arg(long, default_value = DEFAULT_COLUMN_FAMILY_NAME)]
        cf: String,
    },

    /// Get value for a key
    Get {
        key: String,

        #[arg(long, default_value = DEFAULT_COLUMN_FAMILY_NAME)]
        cf: String,
    },

    /// Delete a key
    Delete {
        key: String,

        #[arg(long, default_value = DEFAULT_COLUMN_FAMILY_NAME)]
        cf: String,
    },

    /// Check whether a key exists
    Exists {
        key: String,

        #[arg(long, default_value = DEFAULT_COLUMN_FAMILY_NAME)]
        cf: String,
    },

    /// List column families of the database
    ListCf,

    /// Create a column family
    CreateCf {
        name: String,

        /// Cache size hint in bytes
        #[arg(long, default_value = "0")]
        cache_size: u64,
    },

    /// Drop a column family
    DropCf { name: String },

    /// Remove the database from the device
    Destroy,

    /// Async put throughput followed by sync gets
    Bench {
        /// Number of keys
        #[arg(short, long, default_value = "100000")]
        keys: u64,

        /// Value size in bytes
        #[arg(short, long, default_value = "128")]
        value_size: usize,

        /// Random gets after the load phase
        #[arg(short, long, default_value = "10000")]
        reads: u64,
    },
}

pub async fn execute_command(cmd: Command) -> Result<()> {
    match cmd.command {
        Commands::Init {
            output,
            create_if_missing,
            aio_slots,
            target_file_size_mb,
        } => {
            execute_init_command(output, create_if_missing, aio_slots, target_file_size_mb).await
        }
        command => {
            let options = load_options(cmd.config.as_deref())?;
            let channel: Arc<dyn ControlChannel> = Arc::new(DeviceChannel::open(&cmd.device)?);
            run_on_channel(channel, &options, &cmd.db, command).await
        }
    }
}

async fn run_on_channel(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Init { .. } => Err(StorageError::InvalidArgument(
            "init does not talk to the device".to_string(),
        )),
        Commands::Put { key, value, cf } => {
            execute_put_command(channel, options, db, &cf, key, value).await
        }
        Commands::Get { key, cf } => execute_get_command(channel, options, db, &cf, key).await,
        Commands::Delete { key, cf } => {
            execute_delete_command(channel, options, db, &cf, key).await
        }
        Commands::Exists { key, cf } => {
            execute_exists_command(channel, options, db, &cf, key).await
        }
        Commands::ListCf => execute_list_cf_command(channel, options, db).await,
        Commands::CreateCf { name, cache_size } => {
            execute_create_cf_command(channel, options, db, name, cache_size).await
        }
        Commands::DropCf { name } => execute_drop_cf_command(channel, options, db, name).await,
        Commands::Destroy => execute_destroy_command(channel, db).await,
        Commands::Bench {
            keys,
            value_size,
            reads,
        } => execute_bench_command(channel, options, db, keys, value_size, reads).await,
    }
}

async fn execute_init_command(
    output: PathBuf,
    create_if_missing: bool,
    aio_slots: u32,
    target_file_size_mb: u64,
) -> Result<()> {
    let options = DbOptions::new()
        .with_create_if_missing(create_if_missing)
        .with_aio_request_slots(aio_slots)
        .with_target_file_size_base(target_file_size_mb * 1024 * 1024);
    options.validate()?;
    options.save(&output)?;

    println!("✓ Wrote options to {}", output.display());
    println!("  create_if_missing: {}", options.create_if_missing);
    println!("  aio request slots: {}", options.aio_request_slots);
    println!("  target file size: {} MB", target_file_size_mb);
    Ok(())
}

/// Open every family of `db` and return the handle called `cf`.
fn open_session(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    cf: &str,
) -> Result<(Session, ColumnFamilyHandle)> {
    let names = Session::list_column_families(channel.as_ref(), options, db)?;
    let descriptors = names
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(name.clone(), ColumnFamilyOptions::default()))
        .collect();
    let (session, handles) = Session::open(channel, options, db, descriptors)?;
    let handle = handles
        .into_iter()
        .find(|h| h.name() == cf)
        .ok_or_else(|| {
            StorageError::InvalidArgument(format!("column family {} does not exist", cf))
        })?;
    Ok((session, handle))
}

async fn execute_put_command(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    cf: &str,
    key: String,
    value: String,
) -> Result<()> {
    let (session, handle) = open_session(channel, options, db, cf)?;
    session.put_cf(&WriteOptions::new(), &handle, key.as_bytes(), value.as_bytes())?;
    println!("✓ Put key: {}", key);
    session.close();
    Ok(())
}

async fn execute_get_command(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    cf: &str,
    key: String,
) -> Result<()> {
    let (session, handle) = open_session(channel, options, db, cf)?;
    match session.get_cf(&ReadOptions::new(), &handle, key.as_bytes()) {
        Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
        Err(e) if e.is_not_found() => println!("Key not found: {}", key),
        Err(e) => return Err(e),
    }
    session.close();
    Ok(())
}

async fn execute_delete_command(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    cf: &str,
    key: String,
) -> Result<()> {
    let (session, handle) = open_session(channel, options, db, cf)?;
    session.delete_cf(&WriteOptions::new(), &handle, key.as_bytes())?;
    println!("✓ Deleted key: {}", key);
    session.close();
    Ok(())
}

async fn execute_exists_command(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    cf: &str,
    key: String,
) -> Result<()> {
    let (session, handle) = open_session(channel, options, db, cf)?;
    match session.key_exist_cf(&ReadOptions::new(), &handle, key.as_bytes()) {
        Ok(()) => println!("{}: exists", key),
        Err(e) if e.is_not_found() => println!("{}: not found", key),
        Err(e) => return Err(e),
    }
    session.close();
    Ok(())
}

async fn execute_list_cf_command(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
) -> Result<()> {
    let names = Session::list_column_families(channel.as_ref(), options, db)?;
    println!("{} column families in {}:", names.len(), db);
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

async fn execute_create_cf_command(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    name: String,
    cache_size: u64,
) -> Result<()> {
    let (session, _) = open_session(channel, options, db, DEFAULT_COLUMN_FAMILY_NAME)?;
    let handle = session
        .create_column_family(ColumnFamilyOptions::new().with_cache_size(cache_size), &name)?;
    println!("✓ Created column family {} (id {})", name, handle.cf_index());
    session.close();
    Ok(())
}

async fn execute_drop_cf_command(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    name: String,
) -> Result<()> {
    let (session, handle) = open_session(channel, options, db, &name)?;
    session.drop_column_family(handle)?;
    println!("✓ Dropped column family {}", name);
    session.close();
    Ok(())
}

async fn execute_destroy_command(channel: Arc<dyn ControlChannel>, db: &str) -> Result<()> {
    Session::destroy(channel.as_ref(), db)?;
    println!("✓ Destroyed database {}", db);
    Ok(())
}

async fn execute_bench_command(
    channel: Arc<dyn ControlChannel>,
    options: &DbOptions,
    db: &str,
    keys: u64,
    value_size: usize,
    reads: u64,
) -> Result<()> {
    use rand::Rng;

    if keys == 0 {
        return Err(StorageError::ConfigError(
            "bench needs at least one key".to_string(),
        ));
    }

    println!("=== devkv Benchmark ===");
    println!("  Keys: {}", keys);
    println!("  Value size: {} bytes", value_size);
    println!("  Random gets: {}", reads);
    println!();

    let (session, handle) = open_session(channel, options, db, DEFAULT_COLUMN_FAMILY_NAME)?;
    let session = Arc::new(session);
    let completed = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));
    let loading = Arc::new(AtomicBool::new(true));

    let poller = {
        let session = Arc::clone(&session);
        let loading = Arc::clone(&loading);
        tokio::task::spawn_blocking(move || {
            while loading.load(Ordering::Acquire) || session.aio_in_flight() > 0 {
                match session.poll_completion(Duration::from_millis(100)) {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    };

    let value = vec![b'v'; value_size];
    let start = Instant::now();
    let mut submitted = 0u64;
    for i in 0..keys {
        let key = format!("bench_key_{:010}", i);
        let done = Arc::clone(&completed);
        let errors = Arc::clone(&failed);
        loop {
            let done = Arc::clone(&done);
            let errors = Arc::clone(&errors);
            let result = session.put_async(
                &WriteOptions::new(),
                &handle,
                key.as_bytes(),
                &value,
                Box::new(move |completion| {
                    if completion.status.is_err() {
                        errors.fetch_add(1, Ordering::Relaxed);
                    }
                    done.fetch_add(1, Ordering::Relaxed);
                }),
            );
            match result {
                Ok(()) => break,
                // every slot is busy; give the poller a moment
                Err(e) if e.is_invalid_argument() && session.aio_in_flight() > 0 => {
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    loading.store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }
        submitted += 1;
    }
    loading.store(false, Ordering::Release);
    poller
        .await
        .map_err(|e| StorageError::IoError(format!("completion poller failed: {}", e)))??;
    let load_elapsed = start.elapsed().as_secs_f64();

    println!(
        "Load: {} puts in {:.2}s ({:.0} ops/sec), {} failed",
        submitted,
        load_elapsed,
        submitted as f64 / load_elapsed,
        failed.load(Ordering::Relaxed)
    );

    let mut rng = rand::thread_rng();
    let read_start = Instant::now();
    let mut hits = 0u64;
    for _ in 0..reads {
        let key = format!("bench_key_{:010}", rng.gen_range(0..keys));
        if session
            .get_cf(&ReadOptions::new(), &handle, key.as_bytes())
            .is_ok()
        {
            hits += 1;
        }
    }
    let read_elapsed = read_start.elapsed().as_secs_f64().max(f64::EPSILON);
    println!(
        "Read: {} gets ({} hits) in {:.2}s ({:.0} ops/sec)",
        reads,
        hits,
        read_elapsed,
        reads as f64 / read_elapsed
    );
    println!();

    let report = session.metrics().report();
    println!("Latency Percentiles (microseconds):");
    for (operation, (p50, p95, p99)) in &report.operation_latencies {
        println!("  {}:", operation);
        println!("    p50: {:.2} µs", p50);
        println!("    p95: {:.2} µs", p95);
        println!("    p99: {:.2} µs", p99);
    }
    println!();
    println!("Device Metrics:");
    println!("  control calls: {}", report.device_calls);
    println!("  async submitted: {}", report.aio_submitted);
    println!("  async completed: {}", report.aio_completed);

    session.close();
    Ok(())
}

/// Options from `path`. Without a file the defaults are used, with
/// `create_if_missing` on.
fn load_options(path: Option<&Path>) -> Result<DbOptions> {
    match path {
        Some(path) if path.exists() => DbOptions::load(path),
        Some(path) => Err(StorageError::ConfigError(format!(
            "Options file not found at {}. Run 'devkv init --output {}' first.",
            path.display(),
            path.display()
        ))),
        None => Ok(DbOptions::new().with_create_if_missing(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use tempfile::TempDir;

    fn options() -> DbOptions {
        DbOptions::new()
            .with_create_if_missing(true)
            .with_aio_request_slots(8)
            .with_aio_drain_timeout_ms(100)
    }

    #[tokio::test]
    async fn test_init_command() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devkv.json");

        execute_init_command(path.clone(), true, 256, 128).await.unwrap();

        let options = load_options(Some(&path)).unwrap();
        assert!(options.create_if_missing);
        assert_eq!(options.aio_request_slots, 256);
        assert_eq!(options.target_file_size_base, 128 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_options() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devkv.json");
        let result = execute_init_command(path.clone(), true, 0, 64).await;
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_options_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_options(Some(&temp_dir.path().join("absent.json"))).unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }

    #[test]
    fn test_parse_global_arguments() {
        let cmd = Command::try_parse_from([
            "devkv", "get", "k", "--cf", "users", "--device", "/dev/kv1", "--db", "app",
        ])
        .unwrap();
        assert_eq!(cmd.device, PathBuf::from("/dev/kv1"));
        assert_eq!(cmd.db, "app");
        match cmd.command {
            Commands::Get { key, cf } => {
                assert_eq!(key, "k");
                assert_eq!(cf, "users");
            }
            _ => panic!("expected get"),
        }
    }

    #[tokio::test]
    async fn test_put_get_delete_commands() {
        let device = Arc::new(MockDevice::new());
        let channel: Arc<dyn ControlChannel> = device.clone();
        let options = options();

        execute_put_command(
            channel.clone(),
            &options,
            "app",
            "default",
            "k".to_string(),
            "v".to_string(),
        )
        .await
        .unwrap();
        execute_get_command(channel.clone(), &options, "app", "default", "k".to_string())
            .await
            .unwrap();
        execute_delete_command(channel.clone(), &options, "app", "default", "k".to_string())
            .await
            .unwrap();
        execute_exists_command(channel, &options, "app", "default", "k".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_column_family_commands() {
        let device = Arc::new(MockDevice::new());
        let channel: Arc<dyn ControlChannel> = device.clone();
        let options = options();

        execute_create_cf_command(channel.clone(), &options, "app", "users".to_string(), 0)
            .await
            .unwrap();
        let db = device.database_index("app").unwrap();
        assert_eq!(device.family_names(db), vec!["default", "users"]);

        execute_drop_cf_command(channel.clone(), &options, "app", "users".to_string())
            .await
            .unwrap();
        assert_eq!(device.family_names(db), vec!["default"]);

        let err = execute_get_command(channel, &options, "app", "users", "k".to_string())
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_destroy_command() {
        let device = Arc::new(MockDevice::new());
        device.seed_database("app", &[]);
        execute_destroy_command(device.clone(), "app").await.unwrap();
        assert_eq!(device.database_index("app"), None);
    }

    #[tokio::test]
    async fn test_bench_command() {
        let device = Arc::new(MockDevice::new());
        execute_bench_command(device.clone(), &options(), "bench", 50, 16, 20)
            .await
            .unwrap();
        let db = device.database_index("bench").unwrap();
        assert_eq!(device.family_names(db), vec!["default"]);
    }
}
