//! Page storage contract and its on-disk implementation.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::common::config::FILE_MAP_NAME;
use crate::common::{Error, FileId, PageId, Result};
use crate::storage::page::Page;
use crate::storage::DiskManager;

/// File and page operations the durable components are built on.
///
/// Structural changes should go through an
/// [`AtomicOperation`](crate::storage::AtomicOperation), which records how to
/// undo each call; the raw methods here apply immediately.
pub trait PageStorage: Send + Sync {
    /// Create a new, empty file and open it.
    fn add_file(&self, name: &str) -> Result<FileId>;

    /// Open an existing file. Opening an already open file returns its id
    /// and counts one more open; each open is matched by a `close_file`.
    fn open_file(&self, name: &str) -> Result<FileId>;

    /// Whether a file with this name exists.
    fn is_file_exists(&self, name: &str) -> bool;

    /// Name of a known file.
    fn file_name(&self, file: FileId) -> Option<String>;

    /// Release one open of a file, optionally syncing it first. The file is
    /// closed when its last open is released.
    fn close_file(&self, file: FileId, flush: bool) -> Result<()>;

    /// Close and remove a file. Its id is released.
    fn delete_file(&self, file: FileId) -> Result<()>;

    /// Drop every page of a file.
    fn truncate_file(&self, file: FileId) -> Result<()>;

    /// Re-create a deleted file under its former id and name.
    fn restore_file(&self, file: FileId, name: &str) -> Result<()>;

    /// Number of pages in an open file.
    fn page_count(&self, file: FileId) -> Result<u32>;

    /// Append a zeroed page.
    fn allocate_page(&self, file: FileId) -> Result<PageId>;

    /// Read a page.
    fn read_page(&self, file: FileId, page: PageId) -> Result<Page>;

    /// Overwrite an allocated page.
    fn write_page(&self, file: FileId, page: PageId, data: &Page) -> Result<()>;

    /// Shrink a file to its first `page_count` pages.
    fn truncate_pages(&self, file: FileId, page_count: u32) -> Result<()>;

    /// Make everything written to the file durable.
    fn sync_file(&self, file: FileId) -> Result<()>;
}

/// Known files: the id ↔ name map persisted in [`FILE_MAP_NAME`].
#[derive(Default)]
struct FileRegistry {
    by_name: HashMap<String, FileId>,
    by_id: HashMap<FileId, String>,
    next_id: u32,
}

impl FileRegistry {
    fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let mut registry = Self::default();
        for line in text.lines().filter(|line| !line.is_empty()) {
            let (id, name) = line
                .split_once('\t')
                .ok_or_else(|| Error::Corrupted(format!("bad file map line '{}'", line)))?;
            let id: u32 = id
                .parse()
                .map_err(|_| Error::Corrupted(format!("bad file id '{}'", id)))?;
            registry.insert(FileId::new(id), name.to_string());
        }
        Ok(registry)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let mut entries: Vec<_> = self.by_id.iter().collect();
        entries.sort();

        let tmp = path.with_extension("tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            for (id, name) in entries {
                writeln!(out, "{}\t{}", id.0, name)?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn insert(&mut self, id: FileId, name: String) {
        self.next_id = self.next_id.max(id.0 + 1);
        self.by_name.insert(name.clone(), id);
        self.by_id.insert(id, name);
    }

    fn remove(&mut self, id: FileId) -> Option<String> {
        let name = self.by_id.remove(&id)?;
        self.by_name.remove(&name);
        Some(name)
    }
}

/// An open file and the number of opens not yet closed.
struct OpenFile {
    manager: Arc<Mutex<DiskManager>>,
    opens: usize,
}

impl OpenFile {
    fn new(manager: DiskManager) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
            opens: 1,
        }
    }
}

/// A directory of page files, one [`DiskManager`] per open file.
///
/// File ids are persisted in a small map file so that ids, and the
/// [`CollectionPointer`](crate::common::CollectionPointer)s built from
/// them, stay valid across restarts.
///
/// Several trees may open the same file. They share one `DiskManager`, and
/// the file stays open until every one of them has closed it.
///
/// # Thread Safety
/// - `registry`: `Mutex` (id/name changes are rare and persisted)
/// - `open`: `RwLock` (many lookups, few opens and closes)
/// - each `DiskManager`: `Mutex` (single-threaded I/O per file)
pub struct DiskStorage {
    dir: PathBuf,
    registry: Mutex<FileRegistry>,
    open: RwLock<HashMap<FileId, OpenFile>>,
}

impl DiskStorage {
    /// Open (or initialize) storage in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let registry = FileRegistry::load(&dir.join(FILE_MAP_NAME))?;

        debug!(dir = %dir.display(), files = registry.by_id.len(), "opened disk storage");
        Ok(Self {
            dir,
            registry: Mutex::new(registry),
            open: RwLock::new(HashMap::new()),
        })
    }

    /// Directory holding the files.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Number of currently open files.
    pub fn open_file_count(&self) -> usize {
        self.open.read().len()
    }

    /// Opens of `file` not yet closed; zero when it is closed.
    pub fn open_count(&self, file: FileId) -> usize {
        self.open.read().get(&file).map_or(0, |open| open.opens)
    }

    fn handle(&self, file: FileId) -> Result<Arc<Mutex<DiskManager>>> {
        self.open
            .read()
            .get(&file)
            .map(|open| Arc::clone(&open.manager))
            .ok_or(Error::UnknownFile(file))
    }

    fn create_registered(&self, registry: &mut FileRegistry, id: FileId, name: &str) -> Result<()> {
        let manager = DiskManager::create(self.dir.join(name), id)?;
        registry.insert(id, name.to_string());
        if let Err(e) = registry.save(&self.dir.join(FILE_MAP_NAME)) {
            registry.remove(id);
            let _ = fs::remove_file(self.dir.join(name));
            return Err(e);
        }
        self.open.write().insert(id, OpenFile::new(manager));
        Ok(())
    }
}

impl PageStorage for DiskStorage {
    fn add_file(&self, name: &str) -> Result<FileId> {
        let mut registry = self.registry.lock();
        if registry.by_name.contains_key(name) || self.dir.join(name).exists() {
            return Err(Error::FileExists(name.to_string()));
        }

        let id = FileId::new(registry.next_id);
        self.create_registered(&mut registry, id, name)?;

        debug!(file = %id, name, "added file");
        Ok(id)
    }

    fn open_file(&self, name: &str) -> Result<FileId> {
        let registry = self.registry.lock();
        let id = *registry
            .by_name
            .get(name)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))?;

        let mut open = self.open.write();
        if let Some(existing) = open.get_mut(&id) {
            existing.opens += 1;
            return Ok(id);
        }

        let manager = match DiskManager::open(self.dir.join(name), id) {
            Ok(manager) => manager,
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::FileNotFound(name.to_string()))
            }
            Err(e) => return Err(e),
        };
        open.insert(id, OpenFile::new(manager));
        Ok(id)
    }

    fn is_file_exists(&self, name: &str) -> bool {
        self.registry.lock().by_name.contains_key(name) && self.dir.join(name).exists()
    }

    fn file_name(&self, file: FileId) -> Option<String> {
        self.registry.lock().by_id.get(&file).cloned()
    }

    fn close_file(&self, file: FileId, flush: bool) -> Result<()> {
        if !self.registry.lock().by_id.contains_key(&file) {
            return Err(Error::UnknownFile(file));
        }
        let mut open = self.open.write();
        let Some(entry) = open.get_mut(&file) else {
            return Ok(());
        };
        if flush {
            entry.manager.lock().sync()?;
        }
        entry.opens -= 1;
        if entry.opens == 0 {
            open.remove(&file);
            debug!(%file, "closed file");
        }
        Ok(())
    }

    fn delete_file(&self, file: FileId) -> Result<()> {
        let mut registry = self.registry.lock();
        let name = registry.remove(file).ok_or(Error::UnknownFile(file))?;
        self.open.write().remove(&file);

        match fs::remove_file(self.dir.join(&name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                registry.insert(file, name);
                return Err(e.into());
            }
        }
        registry.save(&self.dir.join(FILE_MAP_NAME))?;

        debug!(%file, name, "deleted file");
        Ok(())
    }

    fn truncate_file(&self, file: FileId) -> Result<()> {
        self.handle(file)?.lock().truncate_to(0)
    }

    fn restore_file(&self, file: FileId, name: &str) -> Result<()> {
        let mut registry = self.registry.lock();
        if registry.by_id.contains_key(&file) || registry.by_name.contains_key(name) {
            return Err(Error::FileExists(name.to_string()));
        }
        self.create_registered(&mut registry, file, name)
    }

    fn page_count(&self, file: FileId) -> Result<u32> {
        Ok(self.handle(file)?.lock().page_count())
    }

    fn allocate_page(&self, file: FileId) -> Result<PageId> {
        self.handle(file)?.lock().allocate_page()
    }

    fn read_page(&self, file: FileId, page: PageId) -> Result<Page> {
        self.handle(file)?.lock().read_page(page)
    }

    fn write_page(&self, file: FileId, page: PageId, data: &Page) -> Result<()> {
        self.handle(file)?.lock().write_page(page, data)
    }

    fn truncate_pages(&self, file: FileId, page_count: u32) -> Result<()> {
        self.handle(file)?.lock().truncate_to(page_count)
    }

    fn sync_file(&self, file: FileId) -> Result<()> {
        self.handle(file)?.lock().sync()
    }
}
