use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use api::root::RootSettings;

use crate::config::CSConfig;

pub mod breaker;
pub mod cache;
pub mod error;
pub mod ftp;
pub mod local;
pub mod mount;
pub mod path;
pub mod smb;
pub mod webdav;

mod fsops;

pub use error::StorageError;

// one entry as reported by a protocol backend; paths are canonical within
// the backend's base
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: Option<i64>,
    pub created: Option<i64>,
    pub is_dir: bool,
    pub permissions: Option<u32>,
    pub mime_hint: Option<String>,
}

// a successful result that may have been served from the offline cache
// after a transport failure; callers decide what staleness means to them
#[derive(Clone, Debug)]
pub struct Fetched<T> {
    pub value: T,
    pub stale: bool,
}

impl<T> Fetched<T> {
    pub fn fresh(value: T) -> Self {
        Fetched {
            value,
            stale: false,
        }
    }

    pub fn stale(value: T) -> Self {
        Fetched { value, stale: true }
    }
}

pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

// the unified capability set every protocol backend provides
//
// paths are canonicalized by each implementation before dispatch, so the
// scanner and watcher never reason about protocol-native forms
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn connect(&self) -> Result<(), StorageError>;

    async fn disconnect(&self) -> Result<(), StorageError>;

    async fn is_connected(&self) -> bool;

    async fn test_connection(&self) -> Result<(), StorageError>;

    async fn list_directory(&self, path: &str) -> Result<Fetched<Vec<FileEntry>>, StorageError>;

    async fn get_file_info(&self, path: &str) -> Result<Fetched<FileEntry>, StorageError>;

    async fn file_exists(&self, path: &str) -> Result<bool, StorageError>;

    async fn read_file(&self, path: &str) -> Result<ByteStream, StorageError>;

    async fn read_partial(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StorageError>;

    async fn write_file(&self, path: &str, data: ByteStream) -> Result<(), StorageError>;

    async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StorageError>;

    async fn delete_file(&self, path: &str) -> Result<(), StorageError>;

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError>;

    async fn create_directory(&self, path: &str) -> Result<(), StorageError>;
}

// resilience tuning shared by the smb client wrappers, lifted out of the
// daemon config so the storage layer stays config-crate agnostic
#[derive(Clone, Debug)]
pub struct StorageTuning {
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
    pub cache_ttl: Duration,
    pub cache_stale_window: Duration,
    pub retry_base: Duration,
    pub retry_max_attempts: u32,
}

impl StorageTuning {
    pub fn from_config(config: &CSConfig) -> Self {
        StorageTuning {
            breaker_failure_threshold: config.breaker_failure_threshold,
            breaker_cooldown: Duration::from_millis(config.breaker_cooldown_ms),
            cache_ttl: Duration::from_millis(config.cache_ttl_ms),
            cache_stale_window: Duration::from_millis(config.cache_stale_window_ms),
            retry_base: Duration::from_millis(config.retry_base_ms),
            retry_max_attempts: config.retry_max_attempts,
        }
    }
}

impl Default for StorageTuning {
    fn default() -> Self {
        StorageTuning {
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(30),
            cache_stale_window: Duration::from_secs(600),
            retry_base: Duration::from_millis(500),
            retry_max_attempts: 5,
        }
    }
}

// client factory
//
// storage roots persist their settings as a tagged json document, so the
// string-keyed entry point decodes protocol + record in one step
pub fn create_client(
    settings: &RootSettings,
    tuning: &StorageTuning,
) -> Result<Arc<dyn StorageClient>, StorageError> {
    match settings {
        RootSettings::Local(local) => Ok(Arc::new(local::LocalClient::new(local)?)),
        RootSettings::Nfs(nfs) => Ok(Arc::new(mount::NfsClient::new(nfs)?)),
        RootSettings::Smb(smbcfg) => Ok(Arc::new(smb::SmbClient::new(smbcfg, tuning)?)),
        RootSettings::Ftp(ftpcfg) => Ok(Arc::new(ftp::FtpClient::new(ftpcfg)?)),
        RootSettings::Webdav(dav) => Ok(Arc::new(webdav::WebdavClient::new(dav)?)),
    }
}

pub fn create_client_from_json(
    protocol: &str,
    settings: &serde_json::Value,
    tuning: &StorageTuning,
) -> Result<Arc<dyn StorageClient>, StorageError> {
    // reject unknown protocols before touching the settings payload
    if api::root::StorageProtocol::parse(protocol).is_none() {
        return Err(StorageError::UnsupportedProtocol(protocol.to_owned()));
    }

    let settings: RootSettings = serde_json::from_value(settings.clone())
        .map_err(|err| StorageError::Config(format!("bad {protocol} settings: {err}")))?;

    if settings.protocol().as_str() != protocol {
        return Err(StorageError::Config(format!(
            "settings are tagged {} but the root says {}",
            settings.protocol().as_str(),
            protocol
        )));
    }

    create_client(&settings, tuning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_protocol_is_rejected() {
        let err = create_client_from_json(
            "gopher",
            &serde_json::json!({"protocol": "gopher"}),
            &StorageTuning::default(),
        )
        .err()
        .expect("gopher should not resolve");

        assert!(matches!(err, StorageError::UnsupportedProtocol(_)));
    }

    #[test]
    fn mismatched_tag_is_rejected() {
        let err = create_client_from_json(
            "local",
            &serde_json::json!({"protocol": "nfs", "host": "h", "export_path": "/e", "version": 4, "mount_point": "/mnt/x"}),
            &StorageTuning::default(),
        )
        .err()
        .expect("tag mismatch should fail");

        assert!(matches!(err, StorageError::Config(_)));
    }
}
