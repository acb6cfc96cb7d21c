//! Manual, filter-driven compaction.
//!
//! The device compacts on its own; what the client drives is a pass of the
//! column family's [`CompactionFilter`] over a key range, deleting every
//! entry the filter drops. Drops are committed in one atomic write batch.
//! Value rewrites cannot be expressed through the device and are reported as
//! `NotSupported` once the drops are committed.

use crate::batch::WriteBatch;
use crate::config::{CompactRangeOptions, ReadOptions, WriteOptions};
use crate::engine::Session;
use crate::error::{Result, StorageError};
use crate::handle::ColumnFamilyHandle;
use std::time::Instant;
use tracing::info;

/// Describes the compaction a filter is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionContext {
    /// The whole key space of the family is scanned.
    pub is_full_compaction: bool,
    pub is_manual_compaction: bool,
    pub column_family_id: u32,
}

/// What to do with one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Keep,
    Remove,
    /// Replace the value. Not supported by the device.
    ChangeValue(Vec<u8>),
}

/// Decides the fate of each entry seen during compaction.
pub trait CompactionFilter: Send {
    /// `level` is always 0 for a client-driven pass.
    fn filter(&mut self, level: i32, key: &[u8], value: &[u8]) -> FilterDecision;

    fn name(&self) -> &str;
}

/// Creates a filter per compaction run. Set on a family through
/// [`ColumnFamilyOptions::with_compaction_filter_factory`].
///
/// [`ColumnFamilyOptions::with_compaction_filter_factory`]:
///     crate::config::ColumnFamilyOptions::with_compaction_filter_factory
pub trait CompactionFilterFactory: Send + Sync {
    fn create_compaction_filter(&self, context: &CompactionContext) -> Box<dyn CompactionFilter>;

    fn name(&self) -> &str;
}

/// Run the family's filter over `[begin, end)`; `None` bounds are open.
///
/// # Errors
///
/// - `InvalidArgument` if `cf` is not open
/// - `NoSpace("no filter factory found")` if the family has no factory
/// - `IoError` from the scan or the delete batch
/// - `NotSupported` if the filter asked to change any value; drops are
///   already committed when this is returned
pub(crate) fn compact_range(
    session: &Session,
    options: &CompactRangeOptions,
    cf: &ColumnFamilyHandle,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Result<()> {
    let start = Instant::now();
    session.resolve(cf)?;
    let family_options = session.column_family_options(cf)?;
    let factory = family_options
        .compaction_filter_factory
        .ok_or_else(|| StorageError::NoSpace("no filter factory found".to_string()))?;

    let context = CompactionContext {
        is_full_compaction: begin.is_none() && end.is_none(),
        is_manual_compaction: false,
        column_family_id: cf.cf_index() as u32,
    };
    let mut filter = factory.create_compaction_filter(&context);

    let mut drops = WriteBatch::new();
    let mut scanned = 0u64;
    let mut rewrites = 0u64;
    {
        let mut iter = session.new_iterator(&ReadOptions::new(), cf)?;
        match begin {
            Some(begin) => iter.seek(begin),
            None => iter.seek_to_first(),
        }
        while iter.valid() {
            if end.is_some_and(|end| iter.key() >= end) {
                break;
            }
            scanned += 1;
            match filter.filter(0, iter.key(), iter.value()) {
                FilterDecision::Keep => {}
                FilterDecision::Remove => drops.delete(cf, iter.key()),
                FilterDecision::ChangeValue(_) => rewrites += 1,
            }
            iter.next();
        }
        iter.status()?;
    }

    let dropped = drops.count();
    if dropped > 0 {
        session.write(&WriteOptions::new().with_sync(options.sync), &mut drops)?;
    }
    session
        .metrics()
        .record_latency("compact_range", start.elapsed());
    info!(
        "Compacted column family {} with filter {}: scanned {}, dropped {}",
        cf.name(),
        filter.name(),
        scanned,
        dropped
    );

    if rewrites > 0 {
        return Err(StorageError::NotSupported(
            "Not supported operation in this mode.".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnFamilyOptions, DbOptions};
    use crate::device::mock::MockDevice;
    use crate::device::RequestKind;
    use crate::handle::ColumnFamilyDescriptor;
    use std::sync::{Arc, Mutex};

    /// Drops keys starting with `prefix`, rewrites keys starting with `!`.
    struct PrefixFilter {
        prefix: Vec<u8>,
    }

    impl CompactionFilter for PrefixFilter {
        fn filter(&mut self, level: i32, key: &[u8], _value: &[u8]) -> FilterDecision {
            assert_eq!(level, 0);
            if key.starts_with(b"!") {
                FilterDecision::ChangeValue(b"new".to_vec())
            } else if key.starts_with(&self.prefix) {
                FilterDecision::Remove
            } else {
                FilterDecision::Keep
            }
        }

        fn name(&self) -> &str {
            "prefix"
        }
    }

    struct PrefixFactory {
        prefix: &'static [u8],
        contexts: Mutex<Vec<CompactionContext>>,
    }

    impl CompactionFilterFactory for PrefixFactory {
        fn create_compaction_filter(
            &self,
            context: &CompactionContext,
        ) -> Box<dyn CompactionFilter> {
            self.contexts.lock().unwrap().push(*context);
            Box::new(PrefixFilter {
                prefix: self.prefix.to_vec(),
            })
        }

        fn name(&self) -> &str {
            "prefix-factory"
        }
    }

    fn open_with(
        factory: Option<Arc<PrefixFactory>>,
    ) -> (Arc<MockDevice>, Session, ColumnFamilyHandle) {
        let device = Arc::new(MockDevice::new());
        let mut cf_options = ColumnFamilyOptions::new();
        if let Some(factory) = factory {
            cf_options = cf_options.with_compaction_filter_factory(factory);
        }
        let options = DbOptions::new()
            .with_create_if_missing(true)
            .with_aio_request_slots(2)
            .with_aio_drain_timeout_ms(50);
        let (session, mut handles) = Session::open(
            device.clone(),
            &options,
            "compact",
            vec![ColumnFamilyDescriptor::new("default", cf_options)],
        )
        .unwrap();
        let cf = handles.remove(0);
        (device, session, cf)
    }

    fn factory(prefix: &'static [u8]) -> Arc<PrefixFactory> {
        Arc::new(PrefixFactory {
            prefix,
            contexts: Mutex::new(Vec::new()),
        })
    }

    fn keys(session: &Session, cf: &ColumnFamilyHandle) -> Vec<Vec<u8>> {
        let mut iter = session.new_iterator(&ReadOptions::new(), cf).unwrap();
        iter.seek_to_first();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    #[test]
    fn test_missing_factory_is_no_space() {
        let (_device, session, cf) = open_with(None);
        let err = session
            .compact_range(&CompactRangeOptions::default(), &cf, None, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSpace(_)));
    }

    #[test]
    fn test_full_range_drops_filtered_keys() {
        let factory = factory(b"tmp_");
        let (device, session, cf) = open_with(Some(factory.clone()));
        for key in [&b"tmp_1"[..], b"keep", b"tmp_2"] {
            session.put_cf(&WriteOptions::new(), &cf, key, b"v").unwrap();
        }

        session
            .compact_range(&CompactRangeOptions::default(), &cf, None, None)
            .unwrap();

        assert_eq!(keys(&session, &cf), vec![b"keep".to_vec()]);
        assert_eq!(device.calls(RequestKind::WriteBatch), 1);
        let contexts = factory.contexts.lock().unwrap();
        assert!(contexts[0].is_full_compaction);
        assert!(!contexts[0].is_manual_compaction);
        assert_eq!(contexts[0].column_family_id, cf.cf_index() as u32);
    }

    #[test]
    fn test_nothing_dropped_writes_nothing() {
        let (device, session, cf) = open_with(Some(factory(b"zzz")));
        session.put_cf(&WriteOptions::new(), &cf, b"a", b"v").unwrap();
        session
            .compact_range(&CompactRangeOptions::default(), &cf, None, None)
            .unwrap();
        assert_eq!(device.calls(RequestKind::WriteBatch), 0);
    }

    #[test]
    fn test_bounded_range_leaves_outside_keys() {
        let factory = factory(b"k");
        let (_device, session, cf) = open_with(Some(factory.clone()));
        for key in [b"k1", b"k2", b"k3", b"k4"] {
            session.put_cf(&WriteOptions::new(), &cf, key, b"v").unwrap();
        }

        session
            .compact_range(
                &CompactRangeOptions::default(),
                &cf,
                Some(&b"k2"[..]),
                Some(&b"k4"[..]),
            )
            .unwrap();

        assert_eq!(keys(&session, &cf), vec![b"k1".to_vec(), b"k4".to_vec()]);
        assert!(!factory.contexts.lock().unwrap()[0].is_full_compaction);
    }

    #[test]
    fn test_value_change_reports_not_supported_after_commit() {
        let (_device, session, cf) = open_with(Some(factory(b"tmp_")));
        session.put_cf(&WriteOptions::new(), &cf, b"!rewrite", b"v").unwrap();
        session.put_cf(&WriteOptions::new(), &cf, b"tmp_x", b"v").unwrap();

        let err = session
            .compact_range(&CompactRangeOptions::default(), &cf, None, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotSupported(_)));
        assert_eq!(keys(&session, &cf), vec![b"!rewrite".to_vec()]);
    }
}
