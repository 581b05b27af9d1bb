use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::StoreError;

/// Flat string key/value persistence surface.
///
/// Both halves of the dual store run over this trait so the keeper can be
/// driven against an in-memory backend in tests and a file backend in
/// production hosts.
pub trait KeyValueStore {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Write a value, replacing any previous one
    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Delete a value; absent keys are not an error
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    /// All keys starting with `prefix`, in ascending order
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    /// Drop every key
    fn clear(&mut self) -> Result<(), StoreError>;
    /// Approximate stored size in bytes
    fn bytes_in_use(&self) -> u64;
}

/// In-memory backend used in tests and as a fallback host surface.
///
/// Write and read failures can be injected to exercise the keeper's
/// partial-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: BTreeMap<String, String>,
    fail_writes: bool,
    fail_reads: bool,
}

impl MemoryStore {
    /// A fresh empty store
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Make every subsequent write fail until reset
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Make every subsequent read fail until reset
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Backend("injected read failure".into()));
        }
        Ok(self.map.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        self.map.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Backend("injected read failure".into()));
        }
        Ok(self
            .map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.map.clear();
        Ok(())
    }

    fn bytes_in_use(&self) -> u64 {
        self.map
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

/// File-per-key backend over a directory.
///
/// Writes go to a temporary sibling first and are moved into place with a
/// rename, so a torn write never replaces a previously good value.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<FileStore, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStore { dir })
    }

    // Logical keys contain '/' separators which cannot appear in a file
    // name; '@' is not used in any key.
    fn file_name(key: &str) -> String {
        format!("{}.json", key.replace('/', "@"))
    }

    fn key_of(file_name: &str) -> Option<String> {
        file_name
            .strip_suffix(".json")
            .map(|stem| stem.replace('@', "/"))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let target = self.path_for(key);
        let tmp = target.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            if let Some(key) = name.to_str().and_then(FileStore::key_of) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        for key in self.keys_with_prefix("")? {
            self.remove(&key)?;
        }
        Ok(())
    }

    fn bytes_in_use(&self) -> u64 {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let mut store = MemoryStore::new();
        store.put("a/1", "one").unwrap();
        store.put("a/2", "two").unwrap();
        store.put("b/1", "three").unwrap();

        assert_eq!(store.get("a/1").unwrap().as_deref(), Some("one"));
        assert_eq!(store.keys_with_prefix("a/").unwrap(), vec!["a/1", "a/2"]);

        store.remove("a/1").unwrap();
        assert_eq!(store.get("a/1").unwrap(), None);
    }

    #[test]
    fn injected_failures_surface_as_backend_errors() {
        let mut store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.put("k", "v"),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.put("databases/db:current", "{}").unwrap();
        store.put("database_versions/1", "{}").unwrap();

        assert_eq!(
            store.get("databases/db:current").unwrap().as_deref(),
            Some("{}")
        );
        assert_eq!(
            store.keys_with_prefix("database_versions/").unwrap(),
            vec!["database_versions/1"]
        );

        store.remove("databases/db:current").unwrap();
        assert_eq!(store.get("databases/db:current").unwrap(), None);
    }
}
