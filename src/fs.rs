/*!
The `fs` module defines the dispatch surface a connector exposes for each of
a device's storages: a table of directory and file operations keyed by a
filesystem id. Operations a filesystem does not implement fail with a
not-supported error rather than being absent, so callers dispatch uniformly.
!*/

use crate::backend::Backend;
use crate::error::{FileSnafu, NotSupportedSnafu};
use crate::transfer::JobControl;
use crate::Result;
use log::debug;
use snafu::ResultExt;
use std::path::Path;

/// What a directory entry is.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ItemKind {
    None,
    File,
    Dir,
}

impl Default for ItemKind {
    fn default() -> Self {
        ItemKind::None
    }
}

/// Attributes that slot-based filesystems report per entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ItemAttrs {
    /// Bitmask of the operations the device permits on this entry.
    pub operations: u16,
    pub has_valid_data: bool,
    pub has_metadata: bool,
}

/// One directory entry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Item {
    pub name: String,
    pub size: u32,
    pub kind: ItemKind,
    /// The slot index, on filesystems that address entries by number.
    pub index: Option<u32>,
    pub attrs: ItemAttrs,
}

/// A directory listing. The implementation owns the raw reply it was parsed
/// from and advances a cursor through it; dropping the iterator releases the
/// backing bytes in one step.
pub struct ItemIterator {
    inner: Box<dyn Iterator<Item = Result<Item>> + Send>,
}

impl std::fmt::Debug for ItemIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemIterator").finish_non_exhaustive()
    }
}

impl ItemIterator {
    pub fn new<I>(inner: I) -> Self
    where
        I: Iterator<Item = Result<Item>> + Send + 'static,
    {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Iterator for ItemIterator {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Presentation and addressing hints for one filesystem.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct FsOptions {
    /// Only one operation may run on this filesystem at a time.
    pub single_op: bool,
    /// Entries are addressed by id rather than by path.
    pub id_as_filename: bool,
    /// Entries live in numbered slots.
    pub slot_storage: bool,
    pub sort_by_name: bool,
    pub sort_by_id: bool,
}

/// The operations table for one filesystem of a device.
///
/// Default method bodies return a not-supported error; an implementation
/// overrides what its device actually offers.
pub trait Filesystem: Send + Sync {
    fn id(&self) -> u32;

    fn name(&self) -> &'static str;

    fn options(&self) -> FsOptions {
        FsOptions::default()
    }

    /// The canonical extension for files downloaded from this filesystem.
    fn download_ext(&self) -> &'static str;

    fn readdir(&self, backend: &Backend, dir: &str) -> Result<ItemIterator> {
        let _ = (backend, dir);
        not_supported("readdir")
    }

    fn mkdir(&self, backend: &Backend, path: &str) -> Result<()> {
        let _ = (backend, path);
        not_supported("mkdir")
    }

    fn delete(&self, backend: &Backend, path: &str) -> Result<()> {
        let _ = (backend, path);
        not_supported("delete")
    }

    fn rename(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        let _ = (backend, src, dst);
        not_supported("rename")
    }

    fn move_item(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        let _ = (backend, src, dst);
        not_supported("move")
    }

    fn copy(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        let _ = (backend, src, dst);
        not_supported("copy")
    }

    fn clear(&self, backend: &Backend, path: &str) -> Result<()> {
        let _ = (backend, path);
        not_supported("clear")
    }

    fn swap(&self, backend: &Backend, src: &str, dst: &str) -> Result<()> {
        let _ = (backend, src, dst);
        not_supported("swap")
    }

    /// Downloads `path` into `output`. On cancellation, `output` holds
    /// whatever arrived before the cancel was observed.
    fn download(
        &self,
        backend: &Backend,
        path: &str,
        output: &mut Vec<u8>,
        control: &JobControl,
    ) -> Result<()> {
        let _ = (backend, path, output, control);
        not_supported("download")
    }

    fn upload(
        &self,
        backend: &Backend,
        path: &str,
        data: &[u8],
        control: &JobControl,
    ) -> Result<()> {
        let _ = (backend, path, data, control);
        not_supported("upload")
    }

    /// The stable identifier of an item: its name on path-addressed
    /// filesystems, its slot index on slot storage.
    fn item_id(&self, item: &Item) -> String {
        match item.index {
            Some(index) if self.options().slot_storage => index.to_string(),
            _ => item.name.clone(),
        }
    }

    /// Reads a local file to be uploaded. Decoding of audio container
    /// formats happens outside this crate; this moves raw bytes.
    fn load(&self, path: &Path) -> Result<Vec<u8>> {
        debug!("loading '{}'", path.display());
        let data = std::fs::read(path).context(FileSnafu {
            site: site!(),
            path: path.display().to_string(),
        })?;
        Ok(data)
    }

    /// Writes downloaded bytes to a local file.
    fn save(&self, path: &Path, data: &[u8]) -> Result<()> {
        debug!("saving {} bytes to '{}'", data.len(), path.display());
        std::fs::write(path, data).context(FileSnafu {
            site: site!(),
            path: path.display().to_string(),
        })?;
        Ok(())
    }
}

fn not_supported<T>(operation: &str) -> Result<T> {
    Err(NotSupportedSnafu { operation }.build().into())
}

/// Joins a directory and an entry name without doubling separators.
pub(crate) fn chain_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Splits a path into its parent directory and final component.
pub(crate) fn split_path(path: &str) -> (&str, &str) {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(at) => (&path[..at], &path[at + 1..]),
        None => ("/", path),
    }
}
