/// A read view pinned to a device sequence number.
///
/// Not `Clone`: [`Session::release_snapshot`](crate::Session::release_snapshot)
/// consumes it, so a released snapshot cannot be read from again.
#[derive(Debug, PartialEq, Eq)]
pub struct Snapshot {
    sequence: u64,
}

impl Snapshot {
    pub(crate) fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
