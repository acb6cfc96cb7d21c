//! SST export and import collaborators.
//!
//! The session does not encode SST files itself. [`Session::build_table`],
//! [`Session::build_sst_file`] and [`Session::ingest_extern_file`] validate
//! their inputs, prepare the target directory through [`Env`] and hand the
//! actual work to an [`SstBuilder`] or [`SstAnalyzer`].
//!
//! [`Session::build_table`]: crate::Session::build_table
//! [`Session::build_sst_file`]: crate::Session::build_sst_file
//! [`Session::ingest_extern_file`]: crate::Session::ingest_extern_file

use crate::engine::Session;
use crate::env::Env;
use crate::error::Result;
use crate::handle::ColumnFamilyHandle;
use crate::iterator::DbIterator;
use std::path::Path;

/// How a builder names and splits its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// One file named after the caller-supplied file name.
    SingleFile,
    /// Files named after the column family, split at the target size.
    PerColumnFamily,
}

/// Writes the entries of an iterator into SST files.
pub trait SstBuilder: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        dir: &Path,
        name: &str,
        env: &dyn Env,
        cf: &ColumnFamilyHandle,
        iter: &mut DbIterator<'_>,
        target_file_size: u64,
        mode: BuildMode,
    ) -> Result<()>;
}

/// Loads an external SST file into an open session.
pub trait SstAnalyzer: Send + Sync {
    /// When `handles` is given, the families named in the file are opened
    /// (or created) and appended to it.
    fn analyze(
        &self,
        path: &Path,
        verify: bool,
        session: &Session,
        handles: Option<&mut Vec<ColumnFamilyHandle>>,
    ) -> Result<()>;
}
