//! One JSON file per key under a root directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipeline::{KeyValueStore, StoreError};
use tokio::fs;
use tracing::debug;

/// [`KeyValueStore`] backed by the local filesystem.
///
/// Key segments separated by `/` become nested directories; each value lives
/// in `<segment>.json`. Writes go to a temporary sibling and are renamed into
/// place, so a crash mid-write leaves either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root.display().to_string(), &e))?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, dirs)) = segments.split_last() else {
            return path.join("_.json");
        };
        for dir in dirs {
            path.push(encode_segment(dir));
        }
        path.push(format!("{}.json", encode_segment(last)));
        path
    }
}

/// Keeps `[A-Za-z0-9_-]` and escapes everything else as `%XX`, so no key can
/// climb out of the root or collide with another after escaping.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn io_error(key: &str, err: &std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, &e)),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, &e))?;
        }

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, value)
            .await
            .map_err(|e| io_error(key, &e))?;

        if let Err(rename_error) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error(key, &rename_error));
        }

        debug!(key, path = %path.display(), "stored value");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();

        assert_eq!(store.get("checkpoint/alice").await.unwrap(), None);

        store.put("checkpoint/alice", "{\"a\":1}").await.unwrap();
        assert_eq!(
            store.get("checkpoint/alice").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert!(tmp.path().join("checkpoint").join("alice.json").exists());

        store.put("checkpoint/alice", "{\"a\":2}").await.unwrap();
        assert_eq!(
            store.get("checkpoint/alice").await.unwrap().as_deref(),
            Some("{\"a\":2}")
        );

        store.delete("checkpoint/alice").await.unwrap();
        assert_eq!(store.get("checkpoint/alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_missing_key_succeeds() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.delete("rate_limit/nobody").await.unwrap();
    }

    #[tokio::test]
    async fn hostile_keys_stay_inside_root() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path().join("data")).await.unwrap();
        store.put("checkpoint/../../escape", "x").await.unwrap();

        let path = store.path_for("checkpoint/../../escape");
        assert!(path.starts_with(store.root()));
        assert!(!tmp.path().join("escape.json").exists());
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.put("k", "v").await.unwrap();
        assert!(!tmp.path().join("k.json.tmp").exists());
    }

    #[test]
    fn encoding_is_injective_for_reserved_characters() {
        assert_eq!(encode_segment("a.b"), "a%2Eb");
        assert_eq!(encode_segment("a%2Eb"), "a%252Eb");
        assert_eq!(encode_segment("user@example"), "user%40example");
    }
}
