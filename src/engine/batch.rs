//! Write batches and the two-round batch read.

use super::Session;
use crate::batch::wire::{self, ResultSlot, SlotStatus};
use crate::batch::{EncodedReadBatch, ReadBatch, WriteBatch};
use crate::config::{ReadOptions, WriteOptions};
use crate::device::Request;
use crate::error::{Result, StorageError};
use std::time::Instant;
use tracing::debug;

fn slot_result(slot: &ResultSlot<'_>, key: &[u8]) -> Result<Vec<u8>> {
    match slot.status {
        SlotStatus::Success => Ok(slot.bytes.to_vec()),
        SlotStatus::NoKey => Err(StorageError::NotFound(
            String::from_utf8_lossy(key).into_owned(),
        )),
        SlotStatus::DataError => Err(StorageError::Corruption("data error".to_string())),
        SlotStatus::ValueBufferTooSmall => {
            Err(StorageError::Corruption("value buffer error".to_string()))
        }
        SlotStatus::Unknown(code) => Err(StorageError::Corruption(format!(
            "unknown batch status {}",
            code
        ))),
    }
}

impl Session {
    /// Applies every operation in `batch` atomically.
    ///
    /// An empty batch succeeds without a device call.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the batch names a column family that is not
    ///   open in this session
    /// - `Corruption` if the batch cannot be decoded
    /// - `IoError` if the device rejects it
    pub fn write(&self, options: &WriteOptions, batch: &mut WriteBatch) -> Result<()> {
        self.submit_write(options, batch, wire::KIND_WRITE, "write batch")
    }

    /// Like [`write`](Session::write), without the all-or-nothing guarantee.
    pub fn write_nonatomic(&self, options: &WriteOptions, batch: &mut WriteBatch) -> Result<()> {
        self.submit_write(
            options,
            batch,
            wire::KIND_WRITE_NONATOMIC,
            "nonatomic write batch",
        )
    }

    fn submit_write(
        &self,
        options: &WriteOptions,
        batch: &mut WriteBatch,
        kind: u32,
        what: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }
        for cf in batch.families() {
            self.registry.resolve(cf)?;
        }
        let start = Instant::now();
        batch.prepare(kind, self.db_index, options.fill_cache)?;
        let request = match kind {
            wire::KIND_WRITE => Request::WriteBatch(batch.contents_mut()),
            _ => Request::WriteBatchNonatomic(batch.contents_mut()),
        };
        self.call(request)
            .map_err(|e| StorageError::device(what, e))?;
        self.metrics.record_latency("write_batch", start.elapsed());
        Ok(())
    }

    fn read_round(&self, encoded: &mut EncodedReadBatch) -> Result<()> {
        self.metrics.increment_batch_rounds();
        self.call(Request::ReadBatch(encoded.contents_mut()))
            .map_err(|e| StorageError::device("read batch", e))
    }

    /// Reads every key in `batch`, one result per key in batch order.
    ///
    /// Keys whose value was larger than the buffer given for them are read
    /// again in a second round with a buffer of exactly the reported length,
    /// and their results are put back at the original positions.
    ///
    /// # Errors
    ///
    /// The outer `Result` fails with `InvalidArgument` for a column family
    /// that is not open, `Corruption` for a malformed batch and `IoError`
    /// when a round is rejected as a whole. Per-key failures are
    /// `NotFound`, `Corruption("data error")` or
    /// `Corruption("value buffer error")`.
    ///
    /// # Panics
    ///
    /// If a second-round read succeeds with a length other than the one the
    /// first round reported.
    pub fn read(
        &self,
        options: &ReadOptions<'_>,
        batch: &ReadBatch,
    ) -> Result<Vec<Result<Vec<u8>>>> {
        self.ensure_open()?;
        for cf in batch.families() {
            self.registry.resolve(cf)?;
        }
        let start = Instant::now();
        let snapshot_id = options.snapshot_sequence();

        let mut first = batch.encode(self.db_index, options.fill_cache, snapshot_id)?;
        self.read_round(&mut first)?;

        let mut results = Vec::with_capacity(first.len());
        let mut reread = ReadBatch::new();
        let mut positions = Vec::new();
        for i in 0..first.len() {
            let slot = first.slot(i)?;
            if slot.is_truncated(first.value_buf_size(i)) {
                reread.push(batch.cf_index(i), batch.key(i), slot.value_len as usize);
                positions.push((i, slot.value_len));
                results.push(Ok(Vec::new()));
            } else {
                results.push(slot_result(&slot, batch.key(i)));
            }
        }

        if !positions.is_empty() {
            debug!(
                "Re-reading {} of {} keys with larger buffers",
                positions.len(),
                batch.count()
            );
            self.metrics.add_batch_rereads(positions.len() as u64);
            let mut second = reread.encode(self.db_index, options.fill_cache, snapshot_id)?;
            self.read_round(&mut second)?;
            for (j, (position, expected_len)) in positions.into_iter().enumerate() {
                let slot = second.slot(j)?;
                if slot.status == SlotStatus::Success && slot.value_len != expected_len {
                    panic!(
                        "re-read of batch key {} returned {} bytes, first round reported {}",
                        position, slot.value_len, expected_len
                    );
                }
                results[position] = slot_result(&slot, reread.key(j));
            }
        }

        self.metrics.record_latency("read_batch", start.elapsed());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbOptions;
    use crate::device::mock::MockDevice;
    use crate::device::RequestKind;
    use crate::config::ColumnFamilyOptions;
    use crate::device::{CallResult, ControlChannel};
    use nix::errno::Errno;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn open() -> (Arc<MockDevice>, Session) {
        let device = Arc::new(MockDevice::new());
        let options = DbOptions::new()
            .with_create_if_missing(true)
            .with_aio_request_slots(4)
            .with_aio_drain_timeout_ms(50);
        let session = Session::open_default(device.clone(), &options, "batch").unwrap();
        (device, session)
    }

    #[test]
    fn test_empty_write_batch_makes_no_call() {
        let (device, session) = open();
        session.write(&WriteOptions::new(), &mut WriteBatch::new()).unwrap();
        session
            .write_nonatomic(&WriteOptions::new(), &mut WriteBatch::new())
            .unwrap();
        assert_eq!(device.calls(RequestKind::WriteBatch), 0);
        assert_eq!(device.calls(RequestKind::WriteBatchNonatomic), 0);
    }

    #[test]
    fn test_write_batch_applies_puts_and_deletes() {
        let (_device, session) = open();
        let cf = session.default_column_family().unwrap();
        session.put_cf(&WriteOptions::new(), &cf, b"gone", b"x").unwrap();

        let mut batch = WriteBatch::new();
        batch.put(&cf, b"a", b"1");
        batch.put(&cf, b"b", b"2");
        batch.delete(&cf, b"gone");
        session.write(&WriteOptions::new(), &mut batch).unwrap();

        assert_eq!(session.get_cf(&ReadOptions::new(), &cf, b"b").unwrap(), b"2");
        assert!(session
            .get_cf(&ReadOptions::new(), &cf, b"gone")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_rejected_write_batch_is_io_error() {
        let (device, session) = open();
        let cf = session.default_column_family().unwrap();
        device.fail_next(RequestKind::WriteBatch, Errno::EIO, 1);
        let mut batch = WriteBatch::new();
        batch.put(&cf, b"a", b"1");
        assert!(session
            .write(&WriteOptions::new(), &mut batch)
            .unwrap_err()
            .is_io_error());
    }

    #[test]
    fn test_read_fits_in_one_round() {
        let (_device, session) = open();
        let cf = session.default_column_family().unwrap();
        session.put_cf(&WriteOptions::new(), &cf, b"a", b"alpha").unwrap();

        let mut batch = ReadBatch::new();
        batch.get(&cf, b"a");
        batch.get(&cf, b"missing");
        let results = session.read(&ReadOptions::new(), &batch).unwrap();

        assert_eq!(results[0].as_ref().unwrap(), b"alpha");
        assert!(results[1].as_ref().unwrap_err().is_not_found());
        assert_eq!(session.metrics().batch_rounds(), 1);
    }

    #[test]
    fn test_truncated_values_are_reread_in_place() {
        let (_device, session) = open();
        let cf = session.default_column_family().unwrap();
        let big = vec![7u8; 300];
        session.put_cf(&WriteOptions::new(), &cf, b"small", b"s").unwrap();
        session.put_cf(&WriteOptions::new(), &cf, b"big", &big).unwrap();

        let mut batch = ReadBatch::new();
        batch.get_with_buffer(&cf, b"small", 16);
        batch.get_with_buffer(&cf, b"big", 16);
        batch.get_with_buffer(&cf, b"none", 16);
        let results = session.read(&ReadOptions::new(), &batch).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), b"s");
        assert_eq!(results[1].as_ref().unwrap(), &big);
        assert!(results[2].as_ref().unwrap_err().is_not_found());
        assert_eq!(session.metrics().batch_rounds(), 2);
        assert_eq!(session.metrics().report().batch_rereads, 1);
    }

    #[test]
    fn test_batches_reject_dropped_family_before_device_call() {
        let (device, session) = open();
        let users = session
            .create_column_family(ColumnFamilyOptions::new(), "users")
            .unwrap();
        let stale = users.clone();
        session.drop_column_family(users).unwrap();

        let mut writes = WriteBatch::new();
        writes.put(&stale, b"k", b"v");
        assert!(session
            .write(&WriteOptions::new(), &mut writes)
            .unwrap_err()
            .is_invalid_argument());
        assert!(session
            .write_nonatomic(&WriteOptions::new(), &mut writes)
            .unwrap_err()
            .is_invalid_argument());

        let mut reads = ReadBatch::new();
        reads.get(&session.default_column_family().unwrap(), b"k");
        reads.get(&stale, b"k");
        assert!(session
            .read(&ReadOptions::new(), &reads)
            .unwrap_err()
            .is_invalid_argument());

        assert_eq!(device.calls(RequestKind::WriteBatch), 0);
        assert_eq!(device.calls(RequestKind::WriteBatchNonatomic), 0);
        assert_eq!(device.calls(RequestKind::ReadBatch), 0);
    }

    /// Grows a stored value just before the second batch round reaches the
    /// device, so the re-read sees a different length than the first round.
    struct GrowingValue {
        device: Arc<MockDevice>,
        rounds: AtomicUsize,
        target: Mutex<Option<(i32, i32)>>,
    }

    impl ControlChannel for GrowingValue {
        fn call(&self, request: Request<'_>) -> CallResult {
            if let Request::ReadBatch(_) = request {
                if self.rounds.fetch_add(1, Ordering::SeqCst) == 1 {
                    if let Some((db, cf)) = *self.target.lock().unwrap() {
                        self.device.insert_raw(db, cf, b"big", &[1u8; 500]);
                    }
                }
            }
            self.device.call(request)
        }
    }

    #[test]
    #[should_panic(expected = "first round reported 300")]
    fn test_reread_length_change_panics() {
        let channel = Arc::new(GrowingValue {
            device: Arc::new(MockDevice::new()),
            rounds: AtomicUsize::new(0),
            target: Mutex::new(None),
        });
        let options = DbOptions::new()
            .with_create_if_missing(true)
            .with_aio_request_slots(4)
            .with_aio_drain_timeout_ms(50);
        let session = Session::open_default(channel.clone(), &options, "grow").unwrap();
        let cf = session.default_column_family().unwrap();
        session.put_cf(&WriteOptions::new(), &cf, b"big", &[7u8; 300]).unwrap();
        *channel.target.lock().unwrap() = Some((session.db_index(), cf.cf_index()));

        let mut batch = ReadBatch::new();
        batch.get_with_buffer(&cf, b"big", 16);
        let _ = session.read(&ReadOptions::new(), &batch);
    }
}
