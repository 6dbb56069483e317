use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use api::root::SmbSettings;

use crate::storage::breaker::CircuitBreaker;
use crate::storage::cache::OfflineCache;
use crate::storage::error::StorageError;
use crate::storage::fsops;
use crate::storage::mount::verify_mounted;
use crate::storage::{ByteStream, Fetched, FileEntry, StorageClient, StorageTuning};

// smb client
//
// i/o rides the kernel cifs mount (see mount.rs for the reasoning), wrapped
// in the resilience stack that smb shares need in practice: a circuit
// breaker so a dead NAS doesn't stall every scan worker, an offline cache
// that can answer listings during a blip, and capped exponential backoff
// for transient faults.  writes bypass the cache and invalidate it.
pub struct SmbClient {
    mount_point: PathBuf,
    breaker: CircuitBreaker,
    cache: OfflineCache,
    retry_base: Duration,
    retry_max_attempts: u32,
    connect_timeout: Duration,
    read_timeout: Duration,
    connected: AtomicBool,
}

impl SmbClient {
    pub fn new(settings: &SmbSettings, tuning: &StorageTuning) -> Result<Self, StorageError> {
        if settings.mount_point.is_empty() {
            return Err(StorageError::Config("smb mount_point is empty".to_owned()));
        }

        if settings.host.is_empty() || settings.share.is_empty() {
            return Err(StorageError::Config(
                "smb host and share are required".to_owned(),
            ));
        }

        Ok(SmbClient {
            mount_point: PathBuf::from(&settings.mount_point),
            breaker: CircuitBreaker::new(
                tuning.breaker_failure_threshold,
                tuning.breaker_cooldown,
            ),
            cache: OfflineCache::new(tuning.cache_ttl, tuning.cache_stale_window),
            retry_base: tuning.retry_base,
            retry_max_attempts: tuning.retry_max_attempts.max(1),
            connect_timeout: Duration::from_millis(settings.connection_timeout_ms),
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            connected: AtomicBool::new(false),
        })
    }

    // run one transport operation under the deadline, retrying transient
    // failures with capped exponential backoff; permanent errors return
    // immediately
    async fn with_retry<T, F, Fut>(&self, deadline: Duration, op: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let result = match timeout(deadline, op()).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(deadline)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    attempt += 1;

                    if attempt >= self.retry_max_attempts {
                        return Err(err);
                    }

                    let backoff = self.retry_base * 2u32.saturating_pow(attempt - 1);

                    debug!({ attempt = attempt, backoff_ms = backoff.as_millis() as u64 },
                        "transient smb failure, backing off");

                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    // breaker gate + retry + breaker bookkeeping for operations that do not
    // participate in the offline cache
    async fn guarded<T, F, Fut>(&self, deadline: Duration, op: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        self.breaker.check()?;

        match self.with_retry(deadline, op).await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(err) if err.is_transient() => {
                self.breaker.record_failure();
                Err(err)
            }
            Err(err) => {
                // a refusal from the backend still proves the transport
                if err.is_backend_answer() {
                    self.breaker.record_success();
                }

                Err(err)
            }
        }
    }
}

#[async_trait]
impl StorageClient for SmbClient {
    async fn connect(&self) -> Result<(), StorageError> {
        self.guarded(self.connect_timeout, || async {
            verify_mounted(&self.mount_point).await?;
            tokio::fs::metadata(&self.mount_point).await?;
            Ok(())
        })
        .await?;

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
        self.guarded(self.connect_timeout, || async {
            verify_mounted(&self.mount_point).await?;
            tokio::fs::metadata(&self.mount_point).await?;
            Ok(())
        })
        .await
    }

    async fn list_directory(&self, path: &str) -> Result<Fetched<Vec<FileEntry>>, StorageError> {
        // the memoization role of the cache: a fresh hit avoids i/o entirely
        if let Some(entries) = self.cache.fresh_listing(path) {
            return Ok(Fetched::fresh(entries));
        }

        if let Err(gate) = self.breaker.check() {
            return match self.cache.stale_listing(path) {
                Some(entries) => Ok(Fetched::stale(entries)),
                None => Err(gate),
            };
        }

        match self
            .with_retry(self.read_timeout, || {
                fsops::list_dir(&self.mount_point, path, true)
            })
            .await
        {
            Ok(entries) => {
                self.breaker.record_success();
                self.cache.store_listing(path, &entries);
                Ok(Fetched::fresh(entries))
            }
            Err(err) if err.is_transient() => {
                self.breaker.record_failure();

                match self.cache.stale_listing(path) {
                    Some(entries) => {
                        warn!({ path = path }, "serving stale listing after transport failure");
                        Ok(Fetched::stale(entries))
                    }
                    None => Err(err),
                }
            }
            Err(err) => {
                if err.is_backend_answer() {
                    self.breaker.record_success();
                }

                Err(err)
            }
        }
    }

    async fn get_file_info(&self, path: &str) -> Result<Fetched<FileEntry>, StorageError> {
        if let Some(entry) = self.cache.fresh_info(path) {
            return Ok(Fetched::fresh(entry));
        }

        if let Err(gate) = self.breaker.check() {
            return match self.cache.stale_info(path) {
                Some(entry) => Ok(Fetched::stale(entry)),
                None => Err(gate),
            };
        }

        match self
            .with_retry(self.read_timeout, || {
                fsops::file_info(&self.mount_point, path, true)
            })
            .await
        {
            Ok(entry) => {
                self.breaker.record_success();
                self.cache.store_info(path, &entry);
                Ok(Fetched::fresh(entry))
            }
            Err(err) if err.is_transient() => {
                self.breaker.record_failure();

                match self.cache.stale_info(path) {
                    Some(entry) => {
                        warn!({ path = path }, "serving stale file info after transport failure");
                        Ok(Fetched::stale(entry))
                    }
                    None => Err(err),
                }
            }
            Err(err) => {
                if err.is_backend_answer() {
                    self.breaker.record_success();
                }

                Err(err)
            }
        }
    }

    async fn file_exists(&self, path: &str) -> Result<bool, StorageError> {
        self.guarded(self.read_timeout, || {
            fsops::exists(&self.mount_point, path)
        })
        .await
    }

    async fn read_file(&self, path: &str) -> Result<ByteStream, StorageError> {
        self.guarded(self.read_timeout, || {
            fsops::open_read(&self.mount_point, path)
        })
        .await
    }

    async fn read_partial(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StorageError> {
        self.guarded(self.read_timeout, || {
            fsops::read_partial(&self.mount_point, path, offset, length)
        })
        .await
    }

    async fn write_file(&self, path: &str, data: ByteStream) -> Result<(), StorageError> {
        self.breaker.check()?;

        // writes can't retry: the stream is consumed by the first attempt
        let result = match timeout(
            self.read_timeout,
            fsops::write(&self.mount_point, path, data),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.read_timeout)),
        };

        match &result {
            Ok(()) => self.breaker.record_success(),
            Err(err) if err.is_transient() => self.breaker.record_failure(),
            Err(err) => {
                if err.is_backend_answer() {
                    self.breaker.record_success();
                }
            }
        }

        self.cache.invalidate(path);

        result
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let result = self
            .guarded(self.read_timeout, || {
                fsops::copy(&self.mount_point, src, dst)
            })
            .await;

        self.cache.invalidate(dst);

        result
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let result = self
            .guarded(self.read_timeout, || {
                fsops::delete_file(&self.mount_point, path)
            })
            .await;

        self.cache.invalidate(path);

        result
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let result = self
            .guarded(self.read_timeout, || {
                fsops::delete_dir(&self.mount_point, path, recursive)
            })
            .await;

        self.cache.invalidate(path);

        result
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        let result = self
            .guarded(self.read_timeout, || {
                fsops::mkdir(&self.mount_point, path)
            })
            .await;

        self.cache.invalidate(path);

        result
    }
}
