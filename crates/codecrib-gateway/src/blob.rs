use anyhow::{Result, bail};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Flat on-disk byte storage. Each blob lives at `{dir}/{key}`; keys are
/// opaque to callers and never contain path separators.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// A fresh key of the form `{16 hex chars}-{name}`, with anything that
    /// could escape the storage directory replaced by `_`.
    pub fn fresh_key(name: &str) -> String {
        let id: [u8; 8] = rand::random();
        format!("{}-{}", hex::encode(id), sanitize(name))
    }

    pub async fn store(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        fs::write(&path, data).await?;
        info!("Stored blob {} ({} bytes)", key, data.len());
        Ok(())
    }

    /// `Ok(None)` when nothing is stored under `key`.
    pub async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\', '\0'])
        {
            bail!("Invalid blob key: {:?}", key);
        }
        Ok(self.dir.join(key))
    }
}

/// Longest sanitized name kept in a key, in bytes. Leaves room for the id
/// prefix under the usual 255 byte file name limit.
const MAX_NAME_BYTES: usize = 200;

fn sanitize(name: &str) -> String {
    let mut cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.len() > MAX_NAME_BYTES {
        let mut cut = MAX_NAME_BYTES;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned.truncate(cut);
    }
    if cleaned.is_empty() {
        "blob".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path().to_path_buf()).await.unwrap();

        let key = BlobStore::fresh_key("notes.txt");
        blobs.store(&key, b"a\nb").await.unwrap();
        assert_eq!(blobs.retrieve(&key).await.unwrap().unwrap(), b"a\nb");
        assert!(blobs.retrieve("0000000000000000-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path().to_path_buf()).await.unwrap();

        assert!(blobs.retrieve("../etc/passwd").await.is_err());
        assert!(blobs.store("..", b"x").await.is_err());

        let key = BlobStore::fresh_key("../../evil.sh");
        assert!(!key.contains('/'));
        blobs.store(&key, b"x").await.unwrap();
    }

    #[tokio::test]
    async fn long_names_are_cut_to_a_storable_key() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path().to_path_buf()).await.unwrap();

        let key = BlobStore::fresh_key(&"ß".repeat(250));
        assert!(key.len() <= 17 + MAX_NAME_BYTES);
        blobs.store(&key, b"x").await.unwrap();
        assert_eq!(blobs.retrieve(&key).await.unwrap().unwrap(), b"x");

        assert_eq!(sanitize(&"a".repeat(254)).len(), MAX_NAME_BYTES);
    }
}
