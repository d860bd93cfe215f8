//! Paged file I/O: per-index files and the name-keyed registry.

use lasdb_common::page::{Page, PAGE_SIZE};
use lasdb_common::{LasError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One index file: N * 4096 bytes, page `i` at byte offset `i * 4096`.
///
/// The only persistent state is the byte image of the pages. There is no
/// header page and no free list; pages orphaned by splits stay in the
/// file as an accepted cost.
pub struct FileStore {
    name: Arc<str>,
    file: Mutex<File>,
    next_page_no: AtomicU32,
    fsync_enabled: bool,
}

impl FileStore {
    /// Opens (creating if needed) the file at `path`.
    ///
    /// The allocation counter resumes from the current file length.
    pub fn open(name: &str, path: &Path, fsync_enabled: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        let num_pages = (len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            name: Arc::from(name),
            file: Mutex::new(file),
            next_page_no: AtomicU32::new(num_pages),
            fsync_enabled,
        })
    }

    /// Stable name this file is registered under.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Allocates the next page number.
    pub fn allocate(&self) -> u32 {
        self.next_page_no.fetch_add(1, Ordering::AcqRel)
    }

    /// Number of pages allocated so far.
    pub fn num_pages(&self) -> u32 {
        self.next_page_no.load(Ordering::Acquire)
    }

    /// Reads page `page_no` into `page`.
    ///
    /// The buffer is zero-filled first; a read past the current end of
    /// file simply leaves it zeroed, which is how freshly allocated
    /// pages come into existence.
    pub fn read_page(&self, page_no: u32, page: &mut Page) -> Result<()> {
        page.fill(0);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        let mut filled = 0;
        while filled < PAGE_SIZE {
            match file.read(&mut page[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Writes `page` at page number `page_no`.
    pub fn write_page(&self, page_no: u32, page: &Page) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        file.write_all(page)?;
        if self.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Flushes pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("name", &self.name)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}

/// Name-keyed collection of open index files.
#[derive(Default)]
pub struct FileRegistry {
    files: Mutex<HashMap<Arc<str>, Arc<FileStore>>>,
}

impl FileRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file under its name. Fails if the name is taken.
    pub fn add(&self, store: FileStore) -> Result<Arc<FileStore>> {
        let mut files = self.files.lock();
        let name = store.name().clone();
        if files.contains_key(&name) {
            return Err(LasError::FileAlreadyRegistered(name.to_string()));
        }
        let store = Arc::new(store);
        files.insert(name, store.clone());
        Ok(store)
    }

    /// Resolves a file by name.
    pub fn get(&self, name: &str) -> Result<Arc<FileStore>> {
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| LasError::FileNotRegistered(name.to_string()))
    }

    /// Removes a file from the registry, returning it if present.
    pub fn remove(&self, name: &str) -> Option<Arc<FileStore>> {
        self.files.lock().remove(name)
    }

    /// Names of all registered files.
    pub fn names(&self) -> Vec<Arc<str>> {
        self.files.lock().keys().cloned().collect()
    }
}
