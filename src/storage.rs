use crate::structfile::{open_mmap_file, ByteSource, StructReader, StructWriter};
use crate::{Error, HashMap, HashSet};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

const LOCK_POLL: Duration = Duration::from_millis(20);

#[derive(Clone)]
struct RamEntry {
    data: Arc<Vec<u8>>,
    modified: SystemTime,
}

type RamFiles = Arc<Mutex<HashMap<String, RamEntry>>>;
type RamLocks = Arc<Mutex<HashSet<String>>>;

/// Write side of a storage file. Buffered; nothing is visible to
/// `open_file` until [FileHandle::close] runs.
pub enum FileHandle {
    File(io::BufWriter<File>),
    Ram {
        name: String,
        buf: Vec<u8>,
        files: RamFiles,
    },
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileHandle::File(w) => w.write(buf),
            FileHandle::Ram { buf: data, .. } => {
                data.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileHandle::File(w) => w.flush(),
            FileHandle::Ram { .. } => Ok(()),
        }
    }
}

impl FileHandle {
    /// Flush (and fsync for real files) then publish the file.
    pub fn close(self) -> Result<(), Error> {
        match self {
            FileHandle::File(w) => {
                let file = w.into_inner().map_err(|e| Error::IO(e.into_error()))?;
                file.sync_all()?;
                Ok(())
            }
            FileHandle::Ram { name, buf, files } => {
                let mut map = files.lock().unwrap();
                map.insert(
                    name,
                    RamEntry {
                        data: Arc::new(buf),
                        modified: SystemTime::now(),
                    },
                );
                Ok(())
            }
        }
    }
}

impl StructWriter<FileHandle> {
    pub fn close(self) -> Result<(), Error> {
        self.into_inner().close()
    }
}

/// RAII guard for a named advisory lock; released on drop.
pub struct StorageLock {
    inner: LockInner,
}

enum LockInner {
    File(File),
    Ram { name: String, registry: RamLocks },
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        match &self.inner {
            LockInner::File(file) => {
                // dropping the descriptor would release it anyway
                let _ = file.unlock();
            }
            LockInner::Ram { name, registry } => {
                let mut held = registry.lock().unwrap();
                held.remove(name);
            }
        }
    }
}

/// Abstract namespace of named byte-stream files.
///
/// `rename_file` is atomic with respect to concurrent readers; `lock` blocks
/// up to `timeout` and fails with [Error::LockTimeout] after that.
pub trait Storage: Send + Sync {
    fn create_file(&self, name: &str) -> Result<StructWriter<FileHandle>, Error>;
    /// Open for random access. With `mapped`, file storage reads through a
    /// shared memory map; otherwise the contents are buffered.
    fn open_file(&self, name: &str, mapped: bool) -> Result<StructReader, Error>;
    fn rename_file(&self, old: &str, new: &str, overwrite: bool) -> Result<(), Error>;
    fn delete_file(&self, name: &str) -> Result<(), Error>;
    fn file_exists(&self, name: &str) -> bool;
    fn list_files(&self) -> Result<Vec<String>, Error>;
    fn file_modified(&self, name: &str) -> Result<SystemTime, Error>;
    fn lock(&self, name: &str, timeout: Duration) -> Result<StorageLock, Error>;
}

/// Directory-backed storage.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<FileStorage, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir })
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Storage for FileStorage {
    fn create_file(&self, name: &str) -> Result<StructWriter<FileHandle>, Error> {
        let file = File::create(self.path_of(name))?;
        Ok(StructWriter::new(FileHandle::File(io::BufWriter::new(
            file,
        ))))
    }

    fn open_file(&self, name: &str, mapped: bool) -> Result<StructReader, Error> {
        let path = self.path_of(name);
        let meta = fs::metadata(&path).map_err(|_| Error::FileNotFound(name.to_string()))?;
        // zero-length files cannot be mapped; hand back an empty buffer
        if mapped && meta.len() > 0 {
            let mmap = open_mmap_file(&path)?;
            Ok(StructReader::new(ByteSource::Mapped(mmap)))
        } else {
            let mut buf = Vec::with_capacity(meta.len() as usize);
            File::open(&path)?.read_to_end(&mut buf)?;
            Ok(StructReader::new(ByteSource::Owned(Arc::new(buf))))
        }
    }

    fn rename_file(&self, old: &str, new: &str, overwrite: bool) -> Result<(), Error> {
        let to = self.path_of(new);
        if !overwrite && to.exists() {
            return Err(Error::FileExists(new.to_string()));
        }
        fs::rename(self.path_of(old), to)?;
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<(), Error> {
        fs::remove_file(self.path_of(name)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::FileNotFound(name.to_string())
            } else {
                Error::IO(e)
            }
        })
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    fn list_files(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }

    fn file_modified(&self, name: &str) -> Result<SystemTime, Error> {
        let meta =
            fs::metadata(self.path_of(name)).map_err(|_| Error::FileNotFound(name.to_string()))?;
        Ok(meta.modified()?)
    }

    fn lock(&self, name: &str, timeout: Duration) -> Result<StorageLock, Error> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.path_of(name))?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(StorageLock {
                        inner: LockInner::File(file),
                    })
                }
                Err(ref e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout(name.to_string()));
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(Error::IO(e)),
            }
        }
    }
}

/// In-memory storage satisfying the same contract; files live in a shared
/// map, locks in a name registry.
#[derive(Clone)]
pub struct RamStorage {
    files: RamFiles,
    locks: RamLocks,
}

impl RamStorage {
    pub fn new() -> RamStorage {
        RamStorage {
            files: Arc::new(Mutex::new(HashMap::default())),
            locks: Arc::new(Mutex::new(HashSet::default())),
        }
    }
}

impl Default for RamStorage {
    fn default() -> Self {
        RamStorage::new()
    }
}

impl Storage for RamStorage {
    fn create_file(&self, name: &str) -> Result<StructWriter<FileHandle>, Error> {
        Ok(StructWriter::new(FileHandle::Ram {
            name: name.to_string(),
            buf: Vec::new(),
            files: self.files.clone(),
        }))
    }

    fn open_file(&self, name: &str, _mapped: bool) -> Result<StructReader, Error> {
        let map = self.files.lock().unwrap();
        let entry = map
            .get(name)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))?;
        Ok(StructReader::new(ByteSource::Owned(entry.data.clone())))
    }

    fn rename_file(&self, old: &str, new: &str, overwrite: bool) -> Result<(), Error> {
        let mut map = self.files.lock().unwrap();
        if !overwrite && map.contains_key(new) {
            return Err(Error::FileExists(new.to_string()));
        }
        let entry = map
            .remove(old)
            .ok_or_else(|| Error::FileNotFound(old.to_string()))?;
        map.insert(new.to_string(), entry);
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<(), Error> {
        let mut map = self.files.lock().unwrap();
        map.remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::FileNotFound(name.to_string()))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }

    fn list_files(&self) -> Result<Vec<String>, Error> {
        Ok(self.files.lock().unwrap().keys().cloned().collect())
    }

    fn file_modified(&self, name: &str) -> Result<SystemTime, Error> {
        let map = self.files.lock().unwrap();
        map.get(name)
            .map(|e| e.modified)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))
    }

    fn lock(&self, name: &str, timeout: Duration) -> Result<StorageLock, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut held = self.locks.lock().unwrap();
                if !held.contains(name) {
                    held.insert(name.to_string());
                    return Ok(StorageLock {
                        inner: LockInner::Ram {
                            name: name.to_string(),
                            registry: self.locks.clone(),
                        },
                    });
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::LockTimeout(name.to_string()));
            }
            thread::sleep(LOCK_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn round_trip(storage: &dyn Storage, mapped: bool) {
        let mut w = storage.create_file("a.bin").unwrap();
        w.write_vbyte(300).unwrap();
        w.write_string("hello").unwrap();
        w.close().unwrap();

        let mut r = storage.open_file("a.bin", mapped).unwrap();
        assert_eq!(r.read_vbyte().unwrap(), 300);
        assert_eq!(r.read_string().unwrap(), "hello");
        assert!(r.eof());
    }

    #[test]
    fn ram_round_trip() {
        round_trip(&RamStorage::new(), false);
    }

    #[test]
    fn file_round_trip_mapped_and_not() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        round_trip(&storage, true);
        round_trip(&storage, false);
    }

    #[test]
    fn missing_files_and_deletes() {
        let storage = RamStorage::new();
        assert!(matches!(
            storage.open_file("nope", false),
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            storage.delete_file("nope"),
            Err(Error::FileNotFound(_))
        ));

        let w = storage.create_file("x").unwrap();
        // not yet published
        assert!(!storage.file_exists("x"));
        w.close().unwrap();
        assert!(storage.file_exists("x"));
        storage.delete_file("x").unwrap();
        assert!(!storage.file_exists("x"));
    }

    #[test]
    fn rename_respects_overwrite() {
        let storage = RamStorage::new();
        storage.create_file("a").unwrap().close().unwrap();
        storage.create_file("b").unwrap().close().unwrap();
        assert!(matches!(
            storage.rename_file("a", "b", false),
            Err(Error::FileExists(_))
        ));
        storage.rename_file("a", "b", true).unwrap();
        assert!(!storage.file_exists("a"));
        assert!(storage.file_exists("b"));
    }

    #[test]
    fn listing() {
        let storage = RamStorage::new();
        for name in &["one", "two", "three"] {
            storage.create_file(name).unwrap().close().unwrap();
        }
        let mut names = storage.list_files().unwrap();
        names.sort();
        assert_eq!(names, vec!["one", "three", "two"]);
    }

    #[test]
    fn ram_lock_contention() {
        let storage = RamStorage::new();
        let guard = storage.lock("WRITELOCK", Duration::from_millis(10)).unwrap();
        assert!(matches!(
            storage.lock("WRITELOCK", Duration::from_millis(50)),
            Err(Error::LockTimeout(_))
        ));
        drop(guard);
        let _again = storage.lock("WRITELOCK", Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn file_lock_contention() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let guard = storage.lock("WRITELOCK", Duration::from_millis(10)).unwrap();
        assert!(matches!(
            storage.lock("WRITELOCK", Duration::from_millis(60)),
            Err(Error::LockTimeout(_))
        ));
        drop(guard);
        let _again = storage.lock("WRITELOCK", Duration::from_millis(10)).unwrap();
    }
}
