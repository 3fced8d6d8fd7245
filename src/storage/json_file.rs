//! Flat-file JSON storage implementation
//!
//! Every key maps to `<root>/<key>.json`. Writes go to a temporary file in
//! the target directory that is then renamed over the old document.

use crate::storage::traits::{check_key, key_under, DocumentStore, StorageError, StorageResult};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Document store backed by one JSON file per key
pub struct JsonFileStore {
    root: PathBuf,
    // Serializes list read-modify-write cycles
    append_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            append_lock: Mutex::new(()),
        })
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path a key is stored at
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        check_key(key)?;
        let (parent, name) = key.rsplit_once('/').unwrap_or(("", key));
        let mut path = self.root.clone();
        for segment in parent.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(format!("{}.json", name));
        Ok(path)
    }

    fn write_atomic(&self, path: &Path, value: &Value) -> StorageResult<()> {
        let dir = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn read(&self, path: &Path) -> StorageResult<Option<Value>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> StorageResult<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_keys(&path, out)?;
            } else if let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            {
                let Some(relative) = path.parent().and_then(|p| p.strip_prefix(&self.root).ok())
                else {
                    continue;
                };
                let mut segments: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                segments.push(name.to_string());
                out.push(segments.join("/"));
            }
        }
        Ok(())
    }
}

impl DocumentStore for JsonFileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let path = self.path_for(key)?;
        self.read(&path)
    }

    fn put(&self, key: &str, value: &Value) -> StorageResult<()> {
        let path = self.path_for(key)?;
        self.write_atomic(&path, value)
    }

    fn append_capped(&self, key: &str, entry: &Value, cap: usize) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| StorageError::Database("append lock poisoned".to_string()))?;

        let mut entries = match self.read(&path)? {
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(StorageError::NotAList { key: key.to_string() }),
            None => Vec::new(),
        };
        entries.push(entry.clone());
        if entries.len() > cap {
            let excess = entries.len() - cap;
            entries.drain(..excess);
        }
        self.write_atomic(&path, &Value::Array(entries))
    }

    fn list(&self, key: &str) -> StorageResult<Vec<Value>> {
        match self.get(key)? {
            Some(Value::Array(entries)) => Ok(entries),
            Some(_) => Err(StorageError::NotAList { key: key.to_string() }),
            None => Ok(Vec::new()),
        }
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let start = if prefix.is_empty() {
            self.root.clone()
        } else {
            check_key(prefix)?;
            self.root.join(prefix)
        };

        let mut keys = Vec::new();
        self.collect_keys(&start, &mut keys)?;
        keys.retain(|k| key_under(k, prefix));
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        assert!(store.get("runtime_state").unwrap().is_none());
        store.put("runtime_state", &json!({"a": 1})).unwrap();
        assert_eq!(store.get("runtime_state").unwrap(), Some(json!({"a": 1})));

        store.put("runtime_state", &json!({"a": 2})).unwrap();
        assert_eq!(store.get("runtime_state").unwrap(), Some(json!({"a": 2})));
        assert!(dir.path().join("runtime_state.json").exists());
    }

    #[test]
    fn test_nested_keys_create_directories() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        store.put("policy/gov-news", &json!([])).unwrap();
        assert!(dir.path().join("policy").join("gov-news.json").exists());
    }

    #[test]
    fn test_dotted_keys_stay_distinct() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        store.put("policy/moe.gov", &json!(["gov"])).unwrap();
        store.put("policy/moe.edu", &json!(["edu"])).unwrap();

        assert_eq!(store.get("policy/moe.gov").unwrap(), Some(json!(["gov"])));
        assert_eq!(store.get("policy/moe.edu").unwrap(), Some(json!(["edu"])));
        assert!(dir.path().join("policy").join("moe.gov.json").exists());
        assert_eq!(
            store.keys("policy").unwrap(),
            vec!["policy/moe.edu", "policy/moe.gov"]
        );
    }

    #[test]
    fn test_append_capped_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        for i in 0..5 {
            store.append_capped("logs/a", &json!(i), 3).unwrap();
        }
        assert_eq!(store.list("logs/a").unwrap(), vec![json!(2), json!(3), json!(4)]);
        assert!(store.list("logs/missing").unwrap().is_empty());
    }

    #[test]
    fn test_append_to_non_list_fails() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.put("doc", &json!({"x": 1})).unwrap();

        assert!(matches!(
            store.append_capped("doc", &json!(1), 3),
            Err(StorageError::NotAList { .. })
        ));
    }

    #[test]
    fn test_keys_with_prefix() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.put("logs/b", &json!([])).unwrap();
        store.put("logs/a", &json!([])).unwrap();
        store.put("runtime_state", &json!({})).unwrap();

        assert_eq!(store.keys("logs").unwrap(), vec!["logs/a", "logs/b"]);
        assert_eq!(store.keys("").unwrap().len(), 3);
        assert!(store.keys("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.put("../outside", &json!(1)),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
