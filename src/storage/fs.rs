use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufReader};
use uuid::Uuid;

use super::{ObjectHandle, ObjectStore, StorageError, validate_path};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

impl StorageError {
    fn from_io(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

/// Filesystem-backed object store.
///
/// Layout under the base directory:
/// - `data/<path>`: object bytes
/// - `meta/<path>`: content type
/// - `tmp/<uuid>`: in-flight writes, hard-linked into place once synced
pub struct FsObjectStore {
    base_path: PathBuf,
    base_url: String,
}

impl FsObjectStore {
    pub fn new(base_path: &Path, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, path: &str) -> PathBuf {
        self.base_path.join("data").join(path)
    }

    fn meta_path(&self, path: &str) -> PathBuf {
        self.base_path.join("meta").join(path)
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join("tmp")
            .join(Uuid::new_v4().to_string())
    }

    async fn write_meta(&self, path: &str, content_type: &str) -> std::io::Result<()> {
        let meta_path = self.meta_path(path);
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&meta_path, content_type.as_bytes()).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        validate_path(path)?;
        Ok(fs::try_exists(self.object_path(path)).await?)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        validate_path(path)?;

        let final_path = self.object_path(path);
        if fs::try_exists(&final_path).await? {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }

        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        temp_file.write_all(data).await?;
        temp_file.sync_all().await?;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // A hard link fails if the target exists, so a concurrent put of the
        // same path cannot replace a published object.
        let published = fs::hard_link(&temp_path, &final_path).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            tracing::warn!("Failed to remove temp file {}: {e}", temp_path.display());
        }
        match published {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        }

        if let Err(e) = self.write_meta(path, content_type).await {
            let _ = fs::remove_file(&final_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(())
    }

    async fn open(&self, path: &str) -> Result<ObjectHandle, StorageError> {
        validate_path(path)?;

        let file = File::open(self.object_path(path))
            .await
            .map_err(StorageError::from_io)?;
        let size = file.metadata().await?.len();

        let content_type = match fs::read_to_string(self.meta_path(path)).await {
            Ok(ct) if !ct.trim().is_empty() => ct.trim().to_string(),
            _ => DEFAULT_CONTENT_TYPE.to_string(),
        };

        Ok(ObjectHandle {
            reader: Box::new(BufReader::new(file)),
            size,
            content_type,
        })
    }

    async fn remove(&self, path: &str) -> Result<bool, StorageError> {
        validate_path(path)?;

        let removed = match fs::remove_file(self.object_path(path)).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(StorageError::Io(e)),
        };

        match fs::remove_file(self.meta_path(path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove metadata for object {path}: {e}"),
        }

        Ok(removed)
    }

    fn public_url(&self, path: &str) -> Result<String, StorageError> {
        validate_path(path)?;

        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();

        Ok(format!("{}/objects/{}", self.base_url, encoded.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const PATH: &str = "user-1/exp-1/datas/1700000000000.csv";

    fn test_store(dir: &TempDir) -> FsObjectStore {
        FsObjectStore::new(dir.path(), "http://localhost:8080/")
    }

    #[tokio::test]
    async fn test_put_and_open() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.put(PATH, b"a,b\n1,2\n", "text/csv").await.unwrap();
        assert!(store.exists(PATH).await.unwrap());

        let mut handle = store.open(PATH).await.unwrap();
        assert_eq!(handle.size, 8);
        assert_eq!(handle.content_type, "text/csv");

        let mut content = Vec::new();
        handle.reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_put_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.put(PATH, b"first", "text/plain").await.unwrap();
        let result = store.put(PATH, b"second", "text/plain").await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_publish_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(test_store(&temp_dir));

        for round in 0..20 {
            let path = format!("user-1/exp-1/datas/{round}.bin");
            let mut tasks = tokio::task::JoinSet::new();
            for writer in 0..8u8 {
                let store = store.clone();
                let path = path.clone();
                tasks.spawn(async move {
                    let data = vec![writer; 4096];
                    (writer, store.put(&path, &data, "application/octet-stream").await)
                });
            }

            let mut winners = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined.unwrap() {
                    (writer, Ok(())) => winners.push(writer),
                    (_, Err(StorageError::AlreadyExists(_))) => {}
                    (_, Err(e)) => panic!("unexpected put error: {e}"),
                }
            }
            assert_eq!(winners.len(), 1, "round {round}");

            let mut handle = store.open(&path).await.unwrap();
            let mut content = Vec::new();
            handle.reader.read_to_end(&mut content).await.unwrap();
            assert_eq!(content, vec![winners[0]; 4096]);
        }

        let leftovers = std::fs::read_dir(temp_dir.path().join("tmp"))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.put(PATH, b"123", "text/plain").await.unwrap();
        assert!(store.remove(PATH).await.unwrap());
        assert!(!store.exists(PATH).await.unwrap());
        assert!(!store.remove(PATH).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        assert!(matches!(
            store.open(PATH).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        assert!(matches!(
            store.put("../escape.txt", b"x", "text/plain").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_public_url() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        assert_eq!(
            store.public_url(PATH).unwrap(),
            "http://localhost:8080/objects/user-1/exp-1/datas/1700000000000.csv"
        );
        assert!(store.public_url("bad path").is_err());
    }
}
