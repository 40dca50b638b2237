use std::path::PathBuf;
use std::time::Duration;

use cask_crypto::KEY_SIZE;

use crate::error::{ReplError, ReplResult};

/// S3 replication configuration.
#[derive(Clone, Debug, Default)]
pub struct ReplicationConfig {
    /// Destination bucket. Replication is enabled iff non-empty.
    pub bucket: String,
    /// Bucket region; empty means `us-east-1`.
    pub region: String,
    /// Optional path to a 32-byte key file. When set, payloads are sealed
    /// with XChaCha20-Poly1305 before upload.
    pub key_file: Option<PathBuf>,
    /// Optional bound on pending queue entries; `put` fails with
    /// `QueueFull` beyond it.
    pub max_pending: Option<usize>,
}

impl ReplicationConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    pub fn with_max_pending(mut self, bound: usize) -> Self {
        self.max_pending = Some(bound);
        self
    }

    /// The effective region.
    pub fn region(&self) -> &str {
        if self.region.is_empty() {
            "us-east-1"
        } else {
            &self.region
        }
    }

    /// Load the encryption key, if a key file is configured.
    pub fn load_key(&self) -> ReplResult<Option<[u8; KEY_SIZE]>> {
        let Some(path) = &self.key_file else {
            return Ok(None);
        };
        let data = std::fs::read(path)?;
        if data.len() != KEY_SIZE {
            return Err(ReplError::BadKeyFile(format!(
                "expected {KEY_SIZE} bytes, got {}",
                data.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&data);
        Ok(Some(key))
    }
}

/// Retry pacing for failed uploads: exponential with jitter.
#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    /// First retry delay.
    pub base: Duration,
    /// Ceiling on the delay.
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(5 * 60),
        }
    }
}

/// Worker pacing.
#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    /// Sleep between queue polls when the queue is empty.
    pub poll_interval: Duration,
    pub backoff: BackoffConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(25),
            backoff: BackoffConfig::default(),
        }
    }
}
