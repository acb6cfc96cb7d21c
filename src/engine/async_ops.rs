//! Async get/put/delete and completion polling.

use super::Session;
use crate::aio::{AioCallback, AioKind, Submission};
use crate::config::{ReadOptions, WriteOptions};
use crate::error::{Result, StorageError};
use crate::handle::ColumnFamilyHandle;
use crate::uapi::MAX_VALUE_SIZE;
use std::time::Duration;

impl Session {
    /// Submits a read of `key` into a `buf_len`-byte buffer.
    ///
    /// On completion the callback receives the value cut to `buf_len` along
    /// with its full stored length. A submission the device rejects returns
    /// the error here and the callback never runs.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `cf` is not open, the session is closing or
    ///   every request slot is in flight
    /// - `NotFound` if the device reports the key missing at submission
    /// - `IoError` for any other submission failure
    pub fn get_async(
        &self,
        options: &ReadOptions<'_>,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        buf_len: usize,
        callback: AioCallback,
    ) -> Result<()> {
        if buf_len > MAX_VALUE_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "value buffer of {} bytes exceeds {}",
                buf_len, MAX_VALUE_SIZE
            )));
        }
        let cf_index = self.resolve(cf)?;
        let channel = self.channel()?;
        self.aio.submit(
            channel.as_ref(),
            Submission {
                db: self.db_index,
                cf_index,
                key,
                kind: AioKind::Get,
                value: &[],
                buf_len,
                sync: false,
                fill_cache: options.fill_cache,
                snapshot_id: options.snapshot_sequence(),
            },
            callback,
        )
    }

    /// Submits a put. The key and value are copied, so the caller's buffers
    /// may be reused right away.
    pub fn put_async(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
        callback: AioCallback,
    ) -> Result<()> {
        let cf_index = self.resolve(cf)?;
        let channel = self.channel()?;
        self.aio.submit(
            channel.as_ref(),
            Submission {
                db: self.db_index,
                cf_index,
                key,
                kind: AioKind::Put,
                value,
                buf_len: 0,
                sync: options.sync,
                fill_cache: options.fill_cache,
                snapshot_id: 0,
            },
            callback,
        )
    }

    pub fn delete_async(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        callback: AioCallback,
    ) -> Result<()> {
        let cf_index = self.resolve(cf)?;
        let channel = self.channel()?;
        self.aio.submit(
            channel.as_ref(),
            Submission {
                db: self.db_index,
                cf_index,
                key,
                kind: AioKind::Delete,
                value: &[],
                buf_len: 0,
                sync: options.sync,
                fill_cache: options.fill_cache,
                snapshot_id: 0,
            },
            callback,
        )
    }

    /// Waits up to `timeout` for completions and runs their callbacks on the
    /// calling thread. Returns how many ran.
    ///
    /// Keeps working while [`close`](Session::close) drains, so a poller
    /// thread can finish in-flight requests.
    ///
    /// # Errors
    ///
    /// - `NotFound("not found events")` if nothing completed in time
    /// - `InvalidArgument` if the completion counter or the event list
    ///   cannot be read, or the async context is gone
    pub fn poll_completion(&self, timeout: Duration) -> Result<usize> {
        let channel = self.live_channel()?;
        self.aio.poll_completion(channel.as_ref(), timeout)
    }

    /// Requests submitted and not yet completed.
    pub fn aio_in_flight(&self) -> usize {
        self.aio.pool().in_flight()
    }

    pub fn aio_capacity(&self) -> usize {
        self.aio.pool().capacity()
    }
}
