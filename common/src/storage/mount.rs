use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::fs;

use api::root::NfsSettings;

use crate::storage::error::StorageError;
use crate::storage::fsops;
use crate::storage::{ByteStream, Fetched, FileEntry, StorageClient};

// kernel-mount transports
//
// nfs exports and smb shares are consumed through their kernel mounts: the
// settings record carries the remote coordinates for provisioning and the
// expected mount point, and the client verifies the mount is actually
// present before trusting i/o to it.  a vanished mount surfaces as a
// transport error, which is what the retry and breaker layers key on.

pub(crate) async fn verify_mounted(mount_point: &Path) -> Result<(), StorageError> {
    let mounts = fs::read_to_string("/proc/mounts")
        .await
        .map_err(|err| StorageError::Transport(format!("cannot read mount table: {err}")))?;

    let target = mount_point.to_string_lossy();

    for line in mounts.lines() {
        if let Some(mounted_at) = line.split_whitespace().nth(1) {
            if mounted_at == target {
                return Ok(());
            }
        }
    }

    Err(StorageError::Transport(format!(
        "{target} is not present in the mount table"
    )))
}

pub struct NfsClient {
    mount_point: PathBuf,
    connected: AtomicBool,
}

impl NfsClient {
    pub fn new(settings: &NfsSettings) -> Result<Self, StorageError> {
        if settings.version != 3 && settings.version != 4 {
            return Err(StorageError::Config(format!(
                "unsupported nfs version {}",
                settings.version
            )));
        }

        if settings.mount_point.is_empty() {
            return Err(StorageError::Config("nfs mount_point is empty".to_owned()));
        }

        Ok(NfsClient {
            mount_point: PathBuf::from(&settings.mount_point),
            connected: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl StorageClient for NfsClient {
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
        verify_mounted(&self.mount_point).await?;

        fs::metadata(&self.mount_point).await?;

        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Fetched<Vec<FileEntry>>, StorageError> {
        Ok(Fetched::fresh(
            fsops::list_dir(&self.mount_point, path, true).await?,
        ))
    }

    async fn get_file_info(&self, path: &str) -> Result<Fetched<FileEntry>, StorageError> {
        Ok(Fetched::fresh(
            fsops::file_info(&self.mount_point, path, true).await?,
        ))
    }

    async fn file_exists(&self, path: &str) -> Result<bool, StorageError> {
        fsops::exists(&self.mount_point, path).await
    }

    async fn read_file(&self, path: &str) -> Result<ByteStream, StorageError> {
        fsops::open_read(&self.mount_point, path).await
    }

    async fn read_partial(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StorageError> {
        fsops::read_partial(&self.mount_point, path, offset, length).await
    }

    async fn write_file(&self, path: &str, data: ByteStream) -> Result<(), StorageError> {
        fsops::write(&self.mount_point, path, data).await
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        fsops::copy(&self.mount_point, src, dst).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        fsops::delete_file(&self.mount_point, path).await
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        fsops::delete_dir(&self.mount_point, path, recursive).await
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        fsops::mkdir(&self.mount_point, path).await
    }
}
