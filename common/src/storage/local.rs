use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::fs;

use api::root::LocalSettings;

use crate::storage::error::StorageError;
use crate::storage::fsops;
use crate::storage::{ByteStream, Fetched, FileEntry, StorageClient};

// local filesystem backend
//
// the simplest client: the configured base_path is the root, and every
// capability maps directly onto tokio::fs
pub struct LocalClient {
    base: PathBuf,
    follow_symlinks: bool,
    connected: AtomicBool,
}

impl LocalClient {
    pub fn new(settings: &LocalSettings) -> Result<Self, StorageError> {
        if settings.base_path.is_empty() {
            return Err(StorageError::Config("local base_path is empty".to_owned()));
        }

        Ok(LocalClient {
            base: PathBuf::from(&settings.base_path),
            follow_symlinks: settings.follow_symlinks,
            connected: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl StorageClient for LocalClient {
    async fn connect(&self) -> Result<(), StorageError> {
        self.test_connection().await?;
        self.connected.store(true, Ordering::Release);

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        self.connected.store(false, Ordering::Release);

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn test_connection(&self) -> Result<(), StorageError> {
        let meta = fs::metadata(&self.base).await?;

        if !meta.is_dir() {
            return Err(StorageError::Config(format!(
                "local base_path {:?} is not a directory",
                self.base
            )));
        }

        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Fetched<Vec<FileEntry>>, StorageError> {
        Ok(Fetched::fresh(
            fsops::list_dir(&self.base, path, self.follow_symlinks).await?,
        ))
    }

    async fn get_file_info(&self, path: &str) -> Result<Fetched<FileEntry>, StorageError> {
        Ok(Fetched::fresh(
            fsops::file_info(&self.base, path, self.follow_symlinks).await?,
        ))
    }

    async fn file_exists(&self, path: &str) -> Result<bool, StorageError> {
        fsops::exists(&self.base, path).await
    }

    async fn read_file(&self, path: &str) -> Result<ByteStream, StorageError> {
        fsops::open_read(&self.base, path).await
    }

    async fn read_partial(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StorageError> {
        fsops::read_partial(&self.base, path, offset, length).await
    }

    async fn write_file(&self, path: &str, data: ByteStream) -> Result<(), StorageError> {
        fsops::write(&self.base, path, data).await
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        fsops::copy(&self.base, src, dst).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        fsops::delete_file(&self.base, path).await
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        fsops::delete_dir(&self.base, path, recursive).await
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        fsops::mkdir(&self.base, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncReadExt;

    fn client_for(dir: &tempfile::TempDir) -> LocalClient {
        LocalClient::new(&LocalSettings {
            base_path: dir.path().to_str().unwrap().to_owned(),
            follow_symlinks: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn listing_and_info() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"0123456789").unwrap();

        let client = client_for(&dir);
        client.connect().await.unwrap();
        assert!(client.is_connected().await);

        let listing = client.list_directory("/").await.unwrap();
        assert!(!listing.stale);
        assert_eq!(listing.value.len(), 2);

        let info = client.get_file_info("/a.mkv").await.unwrap().value;
        assert_eq!(info.size, 10);
        assert_eq!(info.path, "/a.mkv");
        assert!(!info.is_dir);

        let sub = client.get_file_info("/sub").await.unwrap().value;
        assert!(sub.is_dir);
    }

    #[tokio::test]
    async fn partial_reads() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(dir.path().join("data.bin"), b"abcdefghij").unwrap();

        let client = client_for(&dir);

        let head = client.read_partial("/data.bin", 0, 4).await.unwrap();
        assert_eq!(&head, b"abcd");

        let mid = client.read_partial("/data.bin", 4, 4).await.unwrap();
        assert_eq!(&mid, b"efgh");

        // reads past the end return what exists
        let tail = client.read_partial("/data.bin", 8, 100).await.unwrap();
        assert_eq!(&tail, b"ij");
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&dir);

        let err = client.read_partial("/../etc/passwd", 0, 16).await;
        assert!(matches!(err, Err(StorageError::PathTraversal(_))));
    }

    #[tokio::test]
    async fn write_and_stream_read() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&dir);

        let payload: ByteStream = Box::new(std::io::Cursor::new(b"hello world".to_vec()));
        client.write_file("/out/test.txt", payload).await.unwrap();

        let mut stream = client.read_file("/out/test.txt").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();

        assert_eq!(&buf, b"hello world");

        client.delete_file("/out/test.txt").await.unwrap();
        assert!(!client.file_exists("/out/test.txt").await.unwrap());
    }
}
