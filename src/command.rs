//! Builds the fixed-layout commands for single-key and metadata requests.
//!
//! The returned structs embed the addresses of the slices passed in, so they
//! must be sent before those slices go away.

use crate::config::{DbOptions, ReadOptions, WriteOptions};
use crate::uapi::{
    addr_of, addr_of_mut, encode_name, CfHandle, DbHandle, KeyStatus, KvCmd, O_DB_CREATE,
    O_DB_FORCED_INDEX,
};

pub(crate) fn db_handle(name: &str, options: &DbOptions) -> DbHandle {
    let mut handle = DbHandle {
        name: encode_name(name),
        ..DbHandle::default()
    };
    if options.create_if_missing {
        handle.flags |= O_DB_CREATE;
    }
    if options.forced_index {
        handle.flags |= O_DB_FORCED_INDEX;
        handle.db_index = options.db_index;
    }
    handle
}

pub(crate) fn cf_handle(db_index: i32, name: &str) -> CfHandle {
    CfHandle {
        db_index,
        cf_index: 0,
        name: encode_name(name),
    }
}

pub(crate) fn get(
    db: i32,
    cf_index: i32,
    key: &[u8],
    value: &mut [u8],
    options: &ReadOptions<'_>,
) -> KvCmd {
    KvCmd {
        db,
        cf_index,
        key: addr_of(key),
        key_len: key.len() as u32,
        value_buf_size: value.len() as u32,
        value: addr_of_mut(value),
        fill_cache: options.fill_cache as u8,
        snapshot_id: options.snapshot_sequence(),
        ..KvCmd::default()
    }
}

pub(crate) fn put(
    db: i32,
    cf_index: i32,
    key: &[u8],
    value: &[u8],
    options: &WriteOptions,
) -> KvCmd {
    KvCmd {
        db,
        cf_index,
        key: addr_of(key),
        key_len: key.len() as u32,
        value: addr_of(value),
        value_len: value.len() as u32,
        sync: options.sync as u8,
        fill_cache: options.fill_cache as u8,
        ..KvCmd::default()
    }
}

pub(crate) fn delete(db: i32, cf_index: i32, key: &[u8], options: &WriteOptions) -> KvCmd {
    KvCmd {
        db,
        cf_index,
        key: addr_of(key),
        key_len: key.len() as u32,
        sync: options.sync as u8,
        fill_cache: options.fill_cache as u8,
        ..KvCmd::default()
    }
}

pub(crate) fn key_status(
    db: i32,
    cf_index: i32,
    key: &[u8],
    options: &ReadOptions<'_>,
) -> KeyStatus {
    KeyStatus {
        db_index: db,
        cf_index,
        key: addr_of(key),
        key_len: key.len() as u32,
        exist: 0,
        snapshot_id: options.snapshot_sequence(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uapi::decode_name;

    #[test]
    fn test_db_handle_flags() {
        let plain = db_handle("db", &DbOptions::new());
        assert_eq!(plain.flags, 0);
        assert_eq!(decode_name(&plain.name), "db");

        let forced = db_handle(
            "db",
            &DbOptions::new().with_create_if_missing(true).with_forced_index(5),
        );
        assert_eq!(forced.flags, O_DB_CREATE | O_DB_FORCED_INDEX);
        assert_eq!(forced.db_index, 5);
    }

    #[test]
    fn test_get_command_points_at_buffers() {
        let key = b"key".to_vec();
        let mut value = vec![0u8; 16];
        let cmd = get(1, 2, &key, &mut value, &ReadOptions::new().with_fill_cache(false));
        assert_eq!(cmd.key, key.as_ptr() as u64);
        assert_eq!(cmd.key_len, 3);
        assert_eq!(cmd.value, value.as_ptr() as u64);
        assert_eq!(cmd.value_buf_size, 16);
        assert_eq!(cmd.fill_cache, 0);
        assert_eq!(cmd.snapshot_id, 0);
        assert_eq!(cmd.aio, 0);
    }

    #[test]
    fn test_put_command_carries_write_flags() {
        let cmd = put(0, 3, b"k", b"value", &WriteOptions::new().with_sync(true));
        assert_eq!(cmd.value_len, 5);
        assert_eq!(cmd.sync, 1);
        assert_eq!(cmd.fill_cache, 1);
        assert_eq!(cmd.cf_index, 3);
    }
}
