use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use quick_from::QuickFrom;
use tracing::warn;

type Result<T> = std::result::Result<T, Error>;
type Map = BTreeMap<String, String>;

#[derive(Debug, QuickFrom)]
pub enum Error {
    #[quick_from]
    Io(std::io::Error),

    #[quick_from]
    SerdeJson(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f : &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "storage io error: {}", err),
            Error::SerdeJson(err) => write!(f, "storage file is corrupt: {}", err),
        }
    }
}

impl std::error::Error for Error {}

/// String key/value storage that outlives the process, in the spirit of a
/// browser's local storage.
pub trait Store : Send + Sync {
    fn get(&self, key : &str) -> Result<Option<String>>;
    fn set(&self, key : &str, value : &str) -> Result<()>;
    fn remove(&self, key : &str) -> Result<()>;
}

impl<T : Store + ?Sized> Store for std::sync::Arc<T> {
    fn get(&self, key : &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key : &str, value : &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key : &str) -> Result<()> {
        (**self).remove(key)
    }
}

fn lock<T>(m : &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|err| err.into_inner())
}

macro_rules! store_method {
    ($name:ident (
        &$self:ident,
        $map:ident = $read:ident,
        $($pname:ident : $ptype:ty),*
    ) -> $ret:ty $body:block ) => {
        fn $name (&$self, $( $pname : $ptype, )* ) -> $ret {
            let _guard = lock(&$self.lock);
            #[allow(unused_mut)]
            let mut $map = $self.$read()?;
            $body
        }
    }
}

/// Keeps every key in one json object on disk.
///
/// Each operation reads the whole file and writes it back when it changed. A
/// missing file is an empty store. Reads report a corrupt file, writes
/// replace it.
pub struct FileStore {
    path : PathBuf,
    lock : Mutex<()>,
}

impl FileStore {
    pub fn new<P : AsRef<Path>>(path : P) -> Self {
        Self {
            path : path.as_ref().to_path_buf(),
            lock : Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Map> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(Map::new()),
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// like `read`, but a file that is not a json object of strings is
    /// replaced by an empty store
    fn read_for_write(&self) -> Result<Map> {
        match self.read() {
            Err(Error::SerdeJson(err)) => {
                warn!(%err, path = %self.path.display(), "store file is corrupt, overwriting it");
                let map = Map::new();
                self.write(&map)?;
                Ok(map)
            },
            res => res,
        }
    }

    fn write(&self, map : &Map) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}

impl Store for FileStore {
    store_method!{ get(&self, map = read, key : &str) -> Result<Option<String>> {
        Ok(map.remove(key))
    }}

    store_method!{ set(&self, map = read_for_write, key : &str, value : &str) -> Result<()> {
        map.insert(key.to_string(), value.to_string());
        self.write(&map)
    }}

    store_method!{ remove(&self, map = read_for_write, key : &str) -> Result<()> {
        if map.remove(key).is_some() {
            self.write(&map)?;
        }

        Ok(())
    }}
}

/// Process local store.
#[derive(Default)]
pub struct MemoryStore {
    map : Mutex<Map>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key : &str) -> Result<Option<String>> {
        Ok(lock(&self.map).get(key).cloned())
    }

    fn set(&self, key : &str, value : &str) -> Result<()> {
        lock(&self.map).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key : &str) -> Result<()> {
        lock(&self.map).remove(key);
        Ok(())
    }
}
