//! Column family handles and the per-session registry that owns them.

use crate::config::ColumnFamilyOptions;
use crate::error::{Result, StorageError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Name of the column family every database starts with.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// Registrations across every session in the process; 0 is never issued.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identity of an open column family. Immutable once issued.
///
/// Besides the device indices a handle carries the generation of the
/// registration that issued it, so a copy kept past a drop never matches a
/// family that is later registered under the same index and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnFamilyHandle {
    db_index: i32,
    cf_index: i32,
    name: String,
    generation: u64,
}

impl ColumnFamilyHandle {
    /// An unregistered handle. Sessions only accept the handles their
    /// registry issued.
    pub fn new(db_index: i32, cf_index: i32, name: impl Into<String>) -> Self {
        Self {
            db_index,
            cf_index,
            name: name.into(),
            generation: 0,
        }
    }

    pub fn db_index(&self) -> i32 {
        self.db_index
    }

    /// Device-assigned family index, also exposed as the family id.
    pub fn cf_index(&self) -> i32 {
        self.cf_index
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Name plus options for a family to open or create.
#[derive(Debug, Clone)]
pub struct ColumnFamilyDescriptor {
    pub name: String,
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

#[derive(Debug, Clone)]
struct RegisteredFamily {
    handle: ColumnFamilyHandle,
    options: ColumnFamilyOptions,
}

/// Open column families of one session, keyed by family index.
///
/// Dropping a family removes it here; any copy of its handle still held by
/// the caller is rejected from then on.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    families: DashMap<i32, RegisteredFamily>,
    default: RwLock<Option<ColumnFamilyHandle>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a family and return the handle that now identifies it.
    pub fn insert(
        &self,
        handle: ColumnFamilyHandle,
        options: ColumnFamilyOptions,
    ) -> ColumnFamilyHandle {
        let handle = ColumnFamilyHandle {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            ..handle
        };
        self.families.insert(
            handle.cf_index,
            RegisteredFamily {
                handle: handle.clone(),
                options,
            },
        );
        handle
    }

    /// Forget a family. Returns false when it was not registered.
    pub fn remove(&self, handle: &ColumnFamilyHandle) -> bool {
        let removed = self
            .families
            .remove_if(&handle.cf_index, |_, family| family.handle == *handle)
            .is_some();
        if removed {
            let mut default = self.default.write().unwrap_or_else(|e| e.into_inner());
            if default.as_ref() == Some(handle) {
                *default = None;
            }
        }
        removed
    }

    /// Check that `handle` is still open in this session.
    pub fn resolve(&self, handle: &ColumnFamilyHandle) -> Result<i32> {
        match self.families.get(&handle.cf_index) {
            Some(family) if family.handle == *handle => Ok(handle.cf_index),
            _ => Err(StorageError::InvalidArgument(format!(
                "column family {} is not open",
                handle.name
            ))),
        }
    }

    pub fn options(&self, handle: &ColumnFamilyHandle) -> Result<ColumnFamilyOptions> {
        self.resolve(handle)?;
        self.families
            .get(&handle.cf_index)
            .map(|family| family.options.clone())
            .ok_or_else(|| StorageError::InvalidArgument(handle.name.clone()))
    }

    pub fn set_default(&self, handle: ColumnFamilyHandle) {
        *self.default.write().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn default_handle(&self) -> Option<ColumnFamilyHandle> {
        self.default
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn by_id(&self, cf_index: i32) -> Option<ColumnFamilyHandle> {
        self.families
            .get(&cf_index)
            .map(|family| family.handle.clone())
    }

    /// Handles sorted by family index.
    pub fn handles(&self) -> Vec<ColumnFamilyHandle> {
        let mut handles: Vec<_> = self
            .families
            .iter()
            .map(|family| family.handle.clone())
            .collect();
        handles.sort_by_key(|h| h.cf_index);
        handles
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn clear(&self) {
        self.families.clear();
        *self.default.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolve_and_remove() {
        let registry = HandleRegistry::new();
        let users = registry.insert(
            ColumnFamilyHandle::new(0, 3, "users"),
            ColumnFamilyOptions::default(),
        );

        assert_eq!(registry.resolve(&users).unwrap(), 3);
        assert!(registry.remove(&users));
        assert!(registry.resolve(&users).unwrap_err().is_invalid_argument());
        assert!(!registry.remove(&users));
    }

    #[test]
    fn test_registry_rejects_foreign_handle_with_same_index() {
        let registry = HandleRegistry::new();
        registry.insert(ColumnFamilyHandle::new(0, 1, "a"), ColumnFamilyOptions::default());
        let stale = ColumnFamilyHandle::new(0, 1, "b");
        assert!(registry.resolve(&stale).is_err());
    }

    #[test]
    fn test_unregistered_handle_is_rejected() {
        let registry = HandleRegistry::new();
        registry.insert(ColumnFamilyHandle::new(0, 1, "a"), ColumnFamilyOptions::default());
        assert!(registry.resolve(&ColumnFamilyHandle::new(0, 1, "a")).is_err());
    }

    #[test]
    fn test_reregistered_family_rejects_old_handle() {
        let registry = HandleRegistry::new();
        let first = registry.insert(
            ColumnFamilyHandle::new(0, 4, "users"),
            ColumnFamilyOptions::default(),
        );
        let kept = first.clone();
        assert!(registry.remove(&first));

        let second = registry.insert(
            ColumnFamilyHandle::new(0, 4, "users"),
            ColumnFamilyOptions::default(),
        );
        assert_eq!(kept.cf_index(), second.cf_index());
        assert_eq!(kept.name(), second.name());
        assert!(registry.resolve(&kept).unwrap_err().is_invalid_argument());
        assert_eq!(registry.resolve(&second).unwrap(), 4);
        assert!(!registry.remove(&kept));
    }

    #[test]
    fn test_removing_default_clears_it() {
        let registry = HandleRegistry::new();
        let default = registry.insert(
            ColumnFamilyHandle::new(0, 0, DEFAULT_COLUMN_FAMILY_NAME),
            ColumnFamilyOptions::default(),
        );
        registry.set_default(default.clone());
        assert_eq!(registry.default_handle(), Some(default.clone()));

        registry.remove(&default);
        assert_eq!(registry.default_handle(), None);
    }

    #[test]
    fn test_handles_sorted_by_index() {
        let registry = HandleRegistry::new();
        registry.insert(ColumnFamilyHandle::new(0, 5, "e"), ColumnFamilyOptions::default());
        registry.insert(ColumnFamilyHandle::new(0, 2, "b"), ColumnFamilyOptions::default());
        let names: Vec<_> = registry.handles().iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names, vec!["b", "e"]);
        assert_eq!(registry.by_id(5).map(|h| h.cf_index()), Some(5));

        registry.clear();
        assert!(registry.is_empty());
    }
}
