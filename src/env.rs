//! Filesystem capability used when building SST files.

use crate::error::Result;
use std::path::Path;

/// Minimal host filesystem access.
pub trait Env: Send + Sync {
    fn file_exists(&self, path: &Path) -> bool;

    /// Create `path` and any missing parents.
    fn create_dir(&self, path: &Path) -> Result<()>;
}

/// [`Env`] over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdEnv;

impl Env for StdEnv {
    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_std_env_creates_nested_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");

        assert!(!StdEnv.file_exists(&nested));
        StdEnv.create_dir(&nested).unwrap();
        assert!(StdEnv.file_exists(&nested));
        // already there
        StdEnv.create_dir(&nested).unwrap();
    }
}
