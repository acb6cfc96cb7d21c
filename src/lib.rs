//! # devkv - Client Engine for a Device-Hosted Key-Value Store
//!
//! devkv is the user-space side of a key-value store that lives inside a
//! block device driver. Every operation is a fixed-layout control command
//! sent to the device node; the data itself never passes through a local
//! storage engine.
//!
//! ## Architecture
//!
//! - **Control channel**: [`device::ControlChannel`] carries typed requests to
//!   the device ([`device::DeviceChannel`]) or to an in-memory stand-in
//!   ([`device::mock::MockDevice`])
//! - **Session**: an open database with its column family handles, snapshots
//!   and async context
//! - **Batches**: atomic write batches and a two-round batch read that
//!   re-reads values larger than the buffer first given for them
//! - **Async I/O**: request-id pool plus eventfd/epoll completion draining
//! - **Compaction**: client-driven compaction filter passes over a key range
//!
//! ## Example Usage
//!
//! ```no_run
//! use devkv::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions, ReadBatch, ReadOptions,
//!             Session, WriteOptions};
//!
//! fn main() -> devkv::Result<()> {
//!     let options = DbOptions::new().with_create_if_missing(true);
//!     let descriptors = vec![
//!         ColumnFamilyDescriptor::new("default", ColumnFamilyOptions::default()),
//!         ColumnFamilyDescriptor::new("users", ColumnFamilyOptions::default()),
//!     ];
//!     let (session, handles) = Session::open_device("/dev/kvdev0", &options, "app", descriptors)?;
//!     let users = &handles[1];
//!
//!     session.put_cf(&WriteOptions::new(), users, b"alice", b"admin")?;
//!
//!     let mut batch = ReadBatch::new();
//!     batch.get(users, b"alice");
//!     batch.get(users, b"bob");
//!     for result in session.read(&ReadOptions::new(), &batch)? {
//!         println!("{:?}", result);
//!     }
//!
//!     session.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the [`Session`] and every database operation
//! - [`device`]: control channel trait, ioctl transport and mock device
//! - [`uapi`]: fixed-layout command structures shared with the driver
//! - [`batch`]: write and read batch encoding
//! - [`aio`]: async request table and completion draining
//! - [`compaction`]: compaction filters and the manual compaction driver
//! - [`sst`]: SST export/import collaborator traits
//! - [`metrics`]: latency histograms and call counters
//! - [`config`]: database, family, read and write options
//! - [`error`]: error types and result aliases

/// Async request table and completion polling
pub mod aio;

/// Write and read batch encoding
pub mod batch;

/// Command-line interface
pub mod cli;

mod command;

/// Compaction filters and manual compaction
pub mod compaction;

/// Options and their validation
pub mod config;

/// Control channel and its transports
pub mod device;

/// Session and database operations
pub mod engine;

/// Filesystem capability for SST export
pub mod env;

/// Error types and result aliases
pub mod error;

/// Column family handles and the handle registry
pub mod handle;

/// Device-side iterators
pub mod iterator;

/// Performance metrics collection and reporting
pub mod metrics;

/// Snapshot tokens
pub mod snapshot;

/// SST builder and analyzer traits
pub mod sst;

/// Driver command structures
pub mod uapi;

// Re-export commonly used types
pub use batch::{ReadBatch, WriteBatch};
pub use config::{
    ColumnFamilyOptions, CompactRangeOptions, DbOptions, ReadOptions, WriteOptions,
};
pub use engine::Session;
pub use error::{Result, StorageError};
pub use handle::{ColumnFamilyDescriptor, ColumnFamilyHandle};
pub use iterator::DbIterator;
pub use metrics::Metrics;
pub use snapshot::Snapshot;
