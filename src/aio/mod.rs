//! Asynchronous request table and completion draining.
//!
//! Every session owns one [`AioContext`]: a pool of request ids, one slot
//! per id holding the command the device was given together with the
//! buffers it points at, and an eventfd the device signals on completion.
//!
//! A request id moves `free -> borrowed -> completed -> free`. The slot is
//! filled while the id is borrowed and only read back by
//! [`AioContext::poll_completion`] once the device reports the id complete,
//! which is also the only place a callback runs and an id is returned.

use crate::device::{ControlChannel, Request};
use crate::error::{Result, StorageError};
use crate::metrics::Metrics;
use crate::uapi::{addr_of, addr_of_mut, AioCtx, AioEvent, AioEvents, KvCmd, MAX_AIO_EVENTS};
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

mod id_pool;
mod signal;

pub use id_pool::{BorrowError, ReqIdPool};
pub use signal::EventSignal;

/// Outcome delivered to an async callback.
#[derive(Debug)]
pub struct Completion {
    /// `Ok` or `InvalidArgument("aio submit error")` when the device
    /// reported a failure for the request.
    pub status: Result<()>,
    /// For gets: the value, cut to the buffer size asked for.
    pub value: Option<Vec<u8>>,
    /// For gets: the full stored length observed by the device.
    pub value_len: Option<usize>,
}

/// Runs exactly once per accepted request, on the thread that drains it.
pub type AioCallback = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Callback that forwards the completion to an awaitable receiver.
///
/// ```no_run
/// # async fn demo(session: &devkv::Session) -> devkv::Result<()> {
/// let cf = session.default_column_family()?;
/// let (callback, done) = devkv::aio::oneshot_callback();
/// session.put_async(&devkv::WriteOptions::new(), &cf, b"k", b"v", callback)?;
/// // a poller thread calls session.poll_completion(..)
/// let completion = done.await.expect("session dropped the request");
/// completion.status?;
/// # Ok(())
/// # }
/// ```
pub fn oneshot_callback() -> (AioCallback, oneshot::Receiver<Completion>) {
    let (tx, rx) = oneshot::channel();
    let callback: AioCallback = Box::new(move |completion| {
        let _ = tx.send(completion);
    });
    (callback, rx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AioKind {
    Get,
    Put,
    Delete,
}

/// What to submit. Key and value are copied into the slot.
pub(crate) struct Submission<'a> {
    pub db: i32,
    pub cf_index: i32,
    pub key: &'a [u8],
    pub kind: AioKind,
    /// Put payload.
    pub value: &'a [u8],
    /// Get buffer size.
    pub buf_len: usize,
    pub sync: bool,
    pub fill_cache: bool,
    pub snapshot_id: u64,
}

#[derive(Default)]
struct Slot {
    cmd: KvCmd,
    key: Vec<u8>,
    value: Vec<u8>,
    kind: Option<AioKind>,
    callback: Option<AioCallback>,
}

pub(crate) struct AioContext {
    pool: ReqIdPool,
    // The device keeps pointers into in-flight slots; leaked instead of freed
    // when closing gives up on a drain.
    slots: ManuallyDrop<Box<[Mutex<Slot>]>>,
    signal: EventSignal,
    ctx: AioCtx,
    drain_timeout: Option<Duration>,
    metrics: Arc<Metrics>,
    closing: AtomicBool,
    shut: AtomicBool,
    leak_slots: AtomicBool,
    // Signalled completions the device has not handed out yet.
    carried: AtomicU64,
}

impl AioContext {
    /// Create the eventfd and register an async context with the device.
    pub(crate) fn open(
        channel: &dyn ControlChannel,
        capacity: usize,
        drain_timeout: Option<Duration>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let signal = EventSignal::new()?;
        let mut ctx = AioCtx {
            ctxid: 0,
            eventfd: signal.raw_fd(),
            seqnum: 0,
        };
        channel
            .call(Request::CreateAioCtx(&mut ctx))
            .map_err(|e| StorageError::device("create aio context", e))?;

        let slots: Box<[Mutex<Slot>]> = (0..capacity).map(|_| Mutex::default()).collect();
        debug!("Opened aio context {} with {} request slots", ctx.ctxid, capacity);
        Ok(Self {
            pool: ReqIdPool::new(capacity),
            slots: ManuallyDrop::new(slots),
            signal,
            ctx,
            drain_timeout,
            metrics,
            closing: AtomicBool::new(false),
            shut: AtomicBool::new(false),
            leak_slots: AtomicBool::new(false),
            carried: AtomicU64::new(0),
        })
    }

    fn slot(&self, id: u32) -> MutexGuard<'_, Slot> {
        self.slots[id as usize]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn pool(&self) -> &ReqIdPool {
        &self.pool
    }

    /// Borrow an id, fill its slot and hand the command to the device.
    ///
    /// A rejected submission returns its id immediately and never reaches
    /// the callback.
    pub(crate) fn submit(
        &self,
        channel: &dyn ControlChannel,
        submission: Submission<'_>,
        callback: AioCallback,
    ) -> Result<()> {
        let id = self.pool.borrow().map_err(|e| match e {
            BorrowError::Closed => {
                StorageError::InvalidArgument("aio context has been closed".to_string())
            }
            BorrowError::Exhausted => StorageError::InvalidArgument(format!(
                "all {} aio request slots are in flight",
                self.pool.capacity()
            )),
        })?;

        let mut guard = self.slot(id);
        let slot = &mut *guard;
        slot.key = submission.key.to_vec();
        slot.value = match submission.kind {
            AioKind::Get => vec![0u8; submission.buf_len],
            AioKind::Put => submission.value.to_vec(),
            AioKind::Delete => Vec::new(),
        };
        slot.cmd = KvCmd {
            db: submission.db,
            cf_index: submission.cf_index,
            key: addr_of(&slot.key),
            key_len: slot.key.len() as u32,
            value_len: match submission.kind {
                AioKind::Put => slot.value.len() as u32,
                _ => 0,
            },
            value: match submission.kind {
                AioKind::Delete => 0,
                _ => addr_of_mut(&mut slot.value),
            },
            value_buf_size: match submission.kind {
                AioKind::Get => slot.value.len() as u32,
                _ => 0,
            },
            sync: submission.sync as u8,
            fill_cache: submission.fill_cache as u8,
            aio: 1,
            snapshot_id: submission.snapshot_id,
            reqid: id as i32,
            ctxid: self.ctx.ctxid,
            seqnum: self.ctx.seqnum,
            ..KvCmd::default()
        };
        slot.kind = Some(submission.kind);
        slot.callback = Some(callback);

        let request = match submission.kind {
            AioKind::Get => Request::GetKv(&mut slot.cmd),
            AioKind::Put => Request::PutKv(&mut slot.cmd),
            AioKind::Delete => Request::DelKv(&mut slot.cmd),
        };
        self.metrics.increment_device_calls();
        if let Err(errno) = channel.call(request) {
            *slot = Slot::default();
            drop(guard);
            self.pool.give_back(id);
            return Err(StorageError::from_keyed_call(errno, submission.key));
        }
        self.metrics.increment_aio_submitted();
        Ok(())
    }

    /// Wait up to `timeout` for the device to signal, then drain every
    /// completion the signal accounts for. Returns the number of callbacks run.
    ///
    /// Signalled completions the device does not return yet are carried over
    /// and fetched again by the next poll, even if no new signal arrives.
    pub(crate) fn poll_completion(
        &self,
        channel: &dyn ControlChannel,
        timeout: Duration,
    ) -> Result<usize> {
        if self.shut.load(Ordering::Acquire) {
            return Err(StorageError::InvalidArgument(
                "aio context has been closed".to_string(),
            ));
        }
        let signalled = if self.signal.wait(timeout)? {
            self.signal.read_counter()?.unwrap_or(0)
        } else {
            0
        };
        let mut pending = signalled + self.carried.swap(0, Ordering::AcqRel);
        if pending == 0 {
            return Err(StorageError::NotFound("not found events".to_string()));
        }

        let mut completed = 0;
        while pending > 0 {
            let mut events = AioEvents {
                ctxid: self.ctx.ctxid,
                nr: pending.min(MAX_AIO_EVENTS as u64) as i32,
                seqnum: self.ctx.seqnum,
                ..AioEvents::default()
            };
            self.metrics.increment_device_calls();
            channel.call(Request::GetIoEvents(&mut events)).map_err(|e| {
                StorageError::InvalidArgument(format!(
                    "fetching aio events failed: {}",
                    e.desc()
                ))
            })?;
            let fetched = (events.nr.max(0) as usize).min(MAX_AIO_EVENTS);
            if fetched == 0 {
                warn!(
                    "Device signalled {} completions but returned none, retrying on next poll",
                    pending
                );
                self.carried.fetch_add(pending, Ordering::AcqRel);
                break;
            }
            pending = pending.saturating_sub(fetched as u64);
            for event in &events.events[..fetched] {
                self.complete(*event);
                completed += 1;
            }
        }
        Ok(completed)
    }

    fn complete(&self, event: AioEvent) {
        let id = match u32::try_from(event.reqid) {
            Ok(id) if (id as usize) < self.slots.len() => id,
            _ => panic!("aio completion for out-of-range request id {}", event.reqid),
        };
        if !self.pool.is_borrowed(id) {
            panic!("aio completion for request id {} which is not in flight", id);
        }

        let mut slot = self.slot(id);
        let callback = match slot.callback.take() {
            Some(callback) => callback,
            None => panic!("aio completion for request id {} has no callback", id),
        };
        let status = if event.ret != 0 {
            Err(StorageError::InvalidArgument("aio submit error".to_string()))
        } else {
            Ok(())
        };
        let completion = match slot.kind {
            Some(AioKind::Get) => {
                let value_len = slot.cmd.value_len as usize;
                let value = if status.is_ok() {
                    let mut value = std::mem::take(&mut slot.value);
                    value.truncate(value_len);
                    Some(value)
                } else {
                    None
                };
                Completion {
                    status,
                    value,
                    value_len: Some(value_len),
                }
            }
            _ => Completion {
                status,
                value: None,
                value_len: None,
            },
        };
        *slot = Slot::default();
        drop(slot);

        callback(completion);
        self.metrics.increment_aio_completed();
        self.pool.give_back(id);
    }

    /// Refuse new submissions, wait for in-flight requests to drain and
    /// delete the device context. Returns the number of requests that did
    /// not drain in time. Later calls return 0.
    pub(crate) fn close(&self, channel: &dyn ControlChannel) -> usize {
        if self.closing.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.pool.close();
        let remaining = self.pool.wait_clear(self.drain_timeout);
        if remaining > 0 {
            warn!(
                "Closing aio context {} with {} requests still in flight",
                self.ctx.ctxid, remaining
            );
            self.leak_slots.store(true, Ordering::Release);
        }
        let mut ctx = self.ctx;
        if let Err(e) = channel.call(Request::DeleteAioCtx(&mut ctx)) {
            warn!("Failed to delete aio context {}: {}", self.ctx.ctxid, e.desc());
        }
        self.shut.store(true, Ordering::Release);
        info!("Closed aio context {}", self.ctx.ctxid);
        remaining
    }
}

impl Drop for AioContext {
    fn drop(&mut self) {
        if !self.leak_slots.load(Ordering::Acquire) {
            // SAFETY: `slots` is never touched again after this point.
            unsafe { ManuallyDrop::drop(&mut self.slots) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::device::RequestKind;
    use crate::uapi::DbHandle;
    use nix::errno::Errno;
    use std::sync::atomic::AtomicUsize;

    fn setup(capacity: usize) -> (Arc<MockDevice>, i32, AioContext) {
        let device = Arc::new(MockDevice::new());
        let mut db = DbHandle {
            flags: crate::uapi::O_DB_CREATE,
            name: crate::uapi::encode_name("aio"),
            ..DbHandle::default()
        };
        device.call(Request::OpenDatabase(&mut db)).unwrap();
        let ctx = AioContext::open(
            device.as_ref(),
            capacity,
            Some(Duration::from_millis(50)),
            Arc::new(Metrics::new()),
        )
        .unwrap();
        (device, db.db_index, ctx)
    }

    fn put<'a>(db: i32, key: &'a [u8], value: &'a [u8]) -> Submission<'a> {
        Submission {
            db,
            cf_index: 0,
            key,
            kind: AioKind::Put,
            value,
            buf_len: 0,
            sync: false,
            fill_cache: true,
            snapshot_id: 0,
        }
    }

    #[test]
    fn test_submit_and_drain_runs_callback_once() {
        let (device, db, ctx) = setup(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        ctx.submit(
            device.as_ref(),
            put(db, b"k", b"v"),
            Box::new(move |c| {
                assert!(c.status.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        assert_eq!(ctx.pool().in_flight(), 1);

        let drained = ctx
            .poll_completion(device.as_ref(), Duration::from_millis(100))
            .unwrap();
        assert_eq!(drained, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.pool().in_flight(), 0);
    }

    #[test]
    fn test_idle_poll_is_not_found() {
        let (device, _db, ctx) = setup(2);
        let err = ctx
            .poll_completion(device.as_ref(), Duration::from_millis(5))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rejected_submission_returns_id_without_callback() {
        let (device, db, ctx) = setup(1);
        device.fail_next(RequestKind::PutKv, Errno::EIO, 1);
        let err = ctx
            .submit(
                device.as_ref(),
                put(db, b"k", b"v"),
                Box::new(|_| panic!("callback must not run")),
            )
            .unwrap_err();
        assert!(err.is_io_error());
        assert_eq!(ctx.pool().available(), 1);
    }

    #[test]
    fn test_device_failure_reaches_callback_as_invalid_argument() {
        let (device, db, ctx) = setup(2);
        device.set_aio_result(-5);
        let (callback, mut rx) = oneshot_callback();
        ctx.submit(device.as_ref(), put(db, b"k", b"v"), callback)
            .unwrap();
        ctx.poll_completion(device.as_ref(), Duration::from_millis(100))
            .unwrap();
        let completion = rx.try_recv().unwrap();
        assert!(completion.status.unwrap_err().is_invalid_argument());
    }

    /// Answers the first `withheld` completion fetches with no records.
    struct WithholdingChannel {
        device: Arc<MockDevice>,
        withheld: AtomicUsize,
    }

    impl ControlChannel for WithholdingChannel {
        fn call(&self, request: Request<'_>) -> crate::device::CallResult {
            match request {
                Request::GetIoEvents(events)
                    if self
                        .withheld
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok() =>
                {
                    events.nr = 0;
                    Ok(())
                }
                request => self.device.call(request),
            }
        }
    }

    #[test]
    fn test_withheld_completions_are_fetched_by_next_poll() {
        let (device, db, ctx) = setup(2);
        let channel = WithholdingChannel {
            device: device.clone(),
            withheld: AtomicUsize::new(1),
        };
        let (callback, mut rx) = oneshot_callback();
        ctx.submit(&channel, put(db, b"k", b"v"), callback).unwrap();

        let drained = ctx
            .poll_completion(&channel, Duration::from_millis(100))
            .unwrap();
        assert_eq!(drained, 0);
        assert_eq!(ctx.pool().in_flight(), 1);

        // No new signal arrives; the carried count still triggers a fetch.
        let drained = ctx
            .poll_completion(&channel, Duration::from_millis(5))
            .unwrap();
        assert_eq!(drained, 1);
        assert_eq!(ctx.pool().in_flight(), 0);
        assert!(rx.try_recv().unwrap().status.is_ok());

        let err = ctx
            .poll_completion(&channel, Duration::from_millis(5))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    #[should_panic(expected = "which is not in flight")]
    fn test_completion_for_unborrowed_id_panics() {
        let (_device, _db, ctx) = setup(4);
        ctx.complete(AioEvent { reqid: 1, ret: 0 });
    }

    #[test]
    #[should_panic(expected = "out-of-range request id")]
    fn test_completion_for_out_of_range_id_panics() {
        let (_device, _db, ctx) = setup(4);
        ctx.complete(AioEvent { reqid: 99, ret: 0 });
    }

    #[test]
    fn test_close_with_pending_times_out_and_refuses_submissions() {
        let (device, db, ctx) = setup(2);
        device.set_defer_completions(true);
        ctx.submit(device.as_ref(), put(db, b"k", b"v"), Box::new(|_| {}))
            .unwrap();

        assert_eq!(ctx.close(device.as_ref()), 1);
        assert_eq!(ctx.close(device.as_ref()), 0);
        let err = ctx
            .submit(device.as_ref(), put(db, b"x", b"y"), Box::new(|_| {}))
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
