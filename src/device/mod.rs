//! Control channel to the device.
//!
//! A single open device handle multiplexes every command. [`ControlChannel`]
//! is the seam between the engines and the device: [`DeviceChannel`] issues
//! real ioctls, [`mock::MockDevice`] serves the same protocol from memory.

use crate::uapi::{
    AioCtx, AioEvents, CacheSize, CfHandle, CfList, CfStatus, DbHandle, IterOp, IteratorBatch,
    KeyStatus, KvCmd, SnapshotCmd,
};
use nix::errno::Errno;

mod ioctl;
pub mod mock;

pub use ioctl::DeviceChannel;

/// Outcome of one control call: success, or the errno the device reported.
pub type CallResult = std::result::Result<(), Errno>;

/// One typed command, borrowing the struct or buffer the device reads and fills.
#[derive(Debug)]
pub enum Request<'a> {
    OpenDatabase(&'a mut DbHandle),
    RemoveDatabase(&'a mut DbHandle),
    ListColumnFamilies(&'a mut CfList),
    OpenColumnFamily(&'a mut CfHandle),
    CreateColumnFamily(&'a mut CfHandle),
    RemoveColumnFamily(&'a mut CfHandle),
    SetCache(&'a mut CacheSize),
    GetKv(&'a mut KvCmd),
    PutKv(&'a mut KvCmd),
    DelKv(&'a mut KvCmd),
    KeyStatus(&'a mut KeyStatus),
    ReadBatch(&'a mut [u8]),
    WriteBatch(&'a mut [u8]),
    WriteBatchNonatomic(&'a mut [u8]),
    CreateSnapshot(&'a mut SnapshotCmd),
    ReleaseSnapshot(&'a mut SnapshotCmd),
    CreateIterators(&'a mut IteratorBatch),
    IteratorOp(&'a mut IterOp),
    CreateAioCtx(&'a mut AioCtx),
    DeleteAioCtx(&'a mut AioCtx),
    GetIoEvents(&'a mut AioEvents),
    CfStatus(&'a mut CfStatus),
}

/// Discriminant of [`Request`], used for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    OpenDatabase,
    RemoveDatabase,
    ListColumnFamilies,
    OpenColumnFamily,
    CreateColumnFamily,
    RemoveColumnFamily,
    SetCache,
    GetKv,
    PutKv,
    DelKv,
    KeyStatus,
    ReadBatch,
    WriteBatch,
    WriteBatchNonatomic,
    CreateSnapshot,
    ReleaseSnapshot,
    CreateIterators,
    IteratorOp,
    CreateAioCtx,
    DeleteAioCtx,
    GetIoEvents,
    CfStatus,
}

impl Request<'_> {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::OpenDatabase(_) => RequestKind::OpenDatabase,
            Request::RemoveDatabase(_) => RequestKind::RemoveDatabase,
            Request::ListColumnFamilies(_) => RequestKind::ListColumnFamilies,
            Request::OpenColumnFamily(_) => RequestKind::OpenColumnFamily,
            Request::CreateColumnFamily(_) => RequestKind::CreateColumnFamily,
            Request::RemoveColumnFamily(_) => RequestKind::RemoveColumnFamily,
            Request::SetCache(_) => RequestKind::SetCache,
            Request::GetKv(_) => RequestKind::GetKv,
            Request::PutKv(_) => RequestKind::PutKv,
            Request::DelKv(_) => RequestKind::DelKv,
            Request::KeyStatus(_) => RequestKind::KeyStatus,
            Request::ReadBatch(_) => RequestKind::ReadBatch,
            Request::WriteBatch(_) => RequestKind::WriteBatch,
            Request::WriteBatchNonatomic(_) => RequestKind::WriteBatchNonatomic,
            Request::CreateSnapshot(_) => RequestKind::CreateSnapshot,
            Request::ReleaseSnapshot(_) => RequestKind::ReleaseSnapshot,
            Request::CreateIterators(_) => RequestKind::CreateIterators,
            Request::IteratorOp(_) => RequestKind::IteratorOp,
            Request::CreateAioCtx(_) => RequestKind::CreateAioCtx,
            Request::DeleteAioCtx(_) => RequestKind::DeleteAioCtx,
            Request::GetIoEvents(_) => RequestKind::GetIoEvents,
            Request::CfStatus(_) => RequestKind::CfStatus,
        }
    }
}

/// A handle that accepts device commands.
///
/// Implementations must tolerate concurrent calls from several threads, one
/// call in flight per thread. Buffer addresses embedded in a command stay
/// valid for the duration of the call; for asynchronous commands (`aio = 1`)
/// they stay valid until the matching completion record has been fetched.
pub trait ControlChannel: Send + Sync {
    fn call(&self, request: Request<'_>) -> CallResult;
}
