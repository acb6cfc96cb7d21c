//! Device-side iterators.

use crate::engine::Session;
use crate::error::{Result, StorageError};
use crate::uapi::{
    addr_of, addr_of_mut, IterOp, ITER_CURRENT, ITER_DESTROY, ITER_NEXT, ITER_SEEK,
    ITER_SEEK_TO_FIRST, MAX_KEY_SIZE,
};
use tracing::debug;

/// First-try value buffer; longer values are fetched again at their size.
const ITER_VALUE_BUFFER: usize = 4096;

/// Cursor over one column family, held on the device.
///
/// Created by [`Session::new_iterator`] or [`Session::new_iterators`]. A new
/// iterator is not positioned: call [`seek_to_first`](DbIterator::seek_to_first)
/// or [`seek`](DbIterator::seek) first. The device copy is destroyed when the
/// iterator is dropped.
pub struct DbIterator<'a> {
    session: &'a Session,
    cf_index: i32,
    iter_index: u32,
    timestamp: u64,
    only_read_key: bool,
    valid: bool,
    key: Vec<u8>,
    value: Vec<u8>,
    error: Option<String>,
}

impl<'a> DbIterator<'a> {
    pub(crate) fn new(
        session: &'a Session,
        cf_index: i32,
        iter_index: u32,
        timestamp: u64,
        only_read_key: bool,
    ) -> Self {
        Self {
            session,
            cf_index,
            iter_index,
            timestamp,
            only_read_key,
            valid: false,
            key: Vec::new(),
            value: Vec::new(),
            error: None,
        }
    }

    fn command(&self, op: u32) -> IterOp {
        IterOp {
            db_index: self.session.db_index(),
            cf_index: self.cf_index,
            iter_index: self.iter_index,
            op,
            ..IterOp::default()
        }
    }

    fn run(&mut self, op: u32, target: &[u8]) {
        let mut key = vec![0u8; MAX_KEY_SIZE];
        let mut value = vec![0u8; if self.only_read_key { 0 } else { ITER_VALUE_BUFFER }];
        let mut cmd = self.command(op);
        cmd.seek_key = addr_of(target);
        cmd.seek_key_len = target.len() as u32;
        cmd.key = addr_of_mut(&mut key);
        cmd.key_buf_size = key.len() as u32;
        cmd.value = addr_of_mut(&mut value);
        cmd.value_buf_size = value.len() as u32;

        if let Err(e) = self.session.call(crate::device::Request::IteratorOp(&mut cmd)) {
            self.invalidate(Some(format!("iterator {}: {}", self.iter_index, e.desc())));
            return;
        }
        if cmd.valid == 0 {
            self.invalidate(None);
            return;
        }

        let key_len = cmd.key_len as usize;
        let value_len = cmd.value_len as usize;
        if key_len > key.len() || value_len > value.len() {
            key = vec![0u8; key_len];
            value = vec![0u8; value_len];
            let mut current = self.command(ITER_CURRENT);
            current.key = addr_of_mut(&mut key);
            current.key_buf_size = key_len as u32;
            current.value = addr_of_mut(&mut value);
            current.value_buf_size = value_len as u32;
            if let Err(e) = self
                .session
                .call(crate::device::Request::IteratorOp(&mut current))
            {
                self.invalidate(Some(format!("iterator {}: {}", self.iter_index, e.desc())));
                return;
            }
        }

        key.truncate(key_len);
        value.truncate(value_len);
        self.key = key;
        self.value = value;
        self.valid = true;
        self.error = None;
    }

    fn invalidate(&mut self, error: Option<String>) {
        self.valid = false;
        self.key.clear();
        self.value.clear();
        self.error = error;
    }

    pub fn seek_to_first(&mut self) {
        self.run(ITER_SEEK_TO_FIRST, &[]);
    }

    /// Position at the first key at or after `target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.run(ITER_SEEK, target);
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        if self.valid {
            self.run(ITER_NEXT, &[]);
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current key, empty when not valid.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Current value, empty when not valid or opened key-only.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Error of the last move, if the device rejected it.
    pub fn status(&self) -> Result<()> {
        match &self.error {
            Some(message) => Err(StorageError::IoError(message.clone())),
            None => Ok(()),
        }
    }

    /// Snapshot sequence the iterator reads at, 0 for latest.
    pub fn sequence(&self) -> u64 {
        self.timestamp
    }

    pub fn cf_index(&self) -> i32 {
        self.cf_index
    }
}

impl Drop for DbIterator<'_> {
    fn drop(&mut self) {
        let mut cmd = self.command(ITER_DESTROY);
        if let Err(e) = self.session.call(crate::device::Request::IteratorOp(&mut cmd)) {
            debug!("Destroying iterator {} failed: {}", self.iter_index, e.desc());
        }
    }
}
