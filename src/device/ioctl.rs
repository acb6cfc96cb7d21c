use super::{CallResult, ControlChannel, Request};
use crate::error::{Result, StorageError};
use crate::uapi::{
    nr, AioCtx, AioEvents, BatchHeader, CacheSize, CfHandle, CfList, CfStatus, DbHandle, IterOp,
    IteratorBatch, KeyStatus, KvCmd, SnapshotCmd, KV_IOC_MAGIC,
};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

mod sys {
    use super::*;
    use nix::{ioctl_readwrite, ioctl_readwrite_bad, request_code_readwrite};
    use std::mem::size_of;

    ioctl_readwrite!(open_database, KV_IOC_MAGIC, nr::OPEN_DATABASE, DbHandle);
    ioctl_readwrite!(remove_database, KV_IOC_MAGIC, nr::REMOVE_DATABASE, DbHandle);
    ioctl_readwrite!(list_columnfamily, KV_IOC_MAGIC, nr::LIST_COLUMNFAMILY, CfList);
    ioctl_readwrite!(open_columnfamily, KV_IOC_MAGIC, nr::OPEN_COLUMNFAMILY, CfHandle);
    ioctl_readwrite!(create_columnfamily, KV_IOC_MAGIC, nr::CREATE_COLUMNFAMILY, CfHandle);
    ioctl_readwrite!(remove_columnfamily, KV_IOC_MAGIC, nr::REMOVE_COLUMNFAMILY, CfHandle);
    ioctl_readwrite!(set_cache, KV_IOC_MAGIC, nr::SET_CACHE, CacheSize);
    ioctl_readwrite!(get_kv, KV_IOC_MAGIC, nr::GET_KV, KvCmd);
    ioctl_readwrite!(put_kv, KV_IOC_MAGIC, nr::PUT_KV, KvCmd);
    ioctl_readwrite!(del_kv, KV_IOC_MAGIC, nr::DEL_KV, KvCmd);
    ioctl_readwrite!(key_status, KV_IOC_MAGIC, nr::KEY_STATUS, KeyStatus);
    ioctl_readwrite!(create_snapshot, KV_IOC_MAGIC, nr::CREATE_SNAPSHOT, SnapshotCmd);
    ioctl_readwrite!(release_snapshot, KV_IOC_MAGIC, nr::RELEASE_SNAPSHOT, SnapshotCmd);
    ioctl_readwrite!(create_iterator, KV_IOC_MAGIC, nr::CREATE_ITERATOR, IteratorBatch);
    ioctl_readwrite!(iterator_op, KV_IOC_MAGIC, nr::ITERATOR_OP, IterOp);
    ioctl_readwrite!(create_aioctx, KV_IOC_MAGIC, nr::CREATE_AIOCTX, AioCtx);
    ioctl_readwrite!(del_aioctx, KV_IOC_MAGIC, nr::DEL_AIOCTX, AioCtx);
    ioctl_readwrite!(get_ioevents, KV_IOC_MAGIC, nr::GET_IOEVENTS, AioEvents);
    ioctl_readwrite!(cf_status, KV_IOC_MAGIC, nr::CF_STATUS, CfStatus);

    // Batches are variable length; the request code only describes the header.
    ioctl_readwrite_bad!(
        read_batch,
        request_code_readwrite!(KV_IOC_MAGIC, nr::READ_BATCH, size_of::<BatchHeader>()),
        BatchHeader
    );
    ioctl_readwrite_bad!(
        write_batch,
        request_code_readwrite!(KV_IOC_MAGIC, nr::WRITE_BATCH, size_of::<BatchHeader>()),
        BatchHeader
    );
    ioctl_readwrite_bad!(
        write_batch_nonatomic,
        request_code_readwrite!(KV_IOC_MAGIC, nr::WRITE_BATCH_NONATOMIC, size_of::<BatchHeader>()),
        BatchHeader
    );
}

/// Control channel backed by a real device node.
pub struct DeviceChannel {
    file: File,
    path: PathBuf,
}

impl DeviceChannel {
    /// Open the device node read-write.
    ///
    /// A missing or inaccessible node is reported as `NotFound`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| StorageError::NotFound(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Opened device {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ControlChannel for DeviceChannel {
    fn call(&self, request: Request<'_>) -> CallResult {
        let fd = self.file.as_raw_fd();
        // SAFETY: every request borrows a live `#[repr(C)]` struct or a batch
        // buffer that starts with a `BatchHeader`; the embedded buffer
        // addresses are kept alive by the caller per the trait contract.
        let ret = unsafe {
            match request {
                Request::OpenDatabase(cmd) => sys::open_database(fd, cmd),
                Request::RemoveDatabase(cmd) => sys::remove_database(fd, cmd),
                Request::ListColumnFamilies(cmd) => sys::list_columnfamily(fd, cmd),
                Request::OpenColumnFamily(cmd) => sys::open_columnfamily(fd, cmd),
                Request::CreateColumnFamily(cmd) => sys::create_columnfamily(fd, cmd),
                Request::RemoveColumnFamily(cmd) => sys::remove_columnfamily(fd, cmd),
                Request::SetCache(cmd) => sys::set_cache(fd, cmd),
                Request::GetKv(cmd) => sys::get_kv(fd, cmd),
                Request::PutKv(cmd) => sys::put_kv(fd, cmd),
                Request::DelKv(cmd) => sys::del_kv(fd, cmd),
                Request::KeyStatus(cmd) => sys::key_status(fd, cmd),
                Request::ReadBatch(buf) => sys::read_batch(fd, buf.as_mut_ptr().cast()),
                Request::WriteBatch(buf) => sys::write_batch(fd, buf.as_mut_ptr().cast()),
                Request::WriteBatchNonatomic(buf) => {
                    sys::write_batch_nonatomic(fd, buf.as_mut_ptr().cast())
                }
                Request::CreateSnapshot(cmd) => sys::create_snapshot(fd, cmd),
                Request::ReleaseSnapshot(cmd) => sys::release_snapshot(fd, cmd),
                Request::CreateIterators(cmd) => sys::create_iterator(fd, cmd),
                Request::IteratorOp(cmd) => sys::iterator_op(fd, cmd),
                Request::CreateAioCtx(cmd) => sys::create_aioctx(fd, cmd),
                Request::DeleteAioCtx(cmd) => sys::del_aioctx(fd, cmd),
                Request::GetIoEvents(cmd) => sys::get_ioevents(fd, cmd),
                Request::CfStatus(cmd) => sys::cf_status(fd, cmd),
            }
        };
        ret.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_is_not_found() {
        let result = DeviceChannel::open("/dev/devkv-does-not-exist");
        match result {
            Err(StorageError::NotFound(msg)) => assert!(msg.contains("devkv-does-not-exist")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opening a missing device node must fail"),
        }
    }
}
