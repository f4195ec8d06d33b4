//! Clock synchronization
//!
//! Signed URLs carry an absolute expiration that the remote service checks
//! against its own clock. `ClockSync` measures the offset between the local
//! clock and the server's `Date` header once, and applies it to every
//! subsequent reading.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::transport::StorageTransport;

/// Source of local wall-clock time
pub trait WallClock: Send + Sync + fmt::Debug {
    /// Current time in Unix seconds
    fn now_epoch(&self) -> i64;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_epoch(&self) -> i64 {
        jiff::Timestamp::now().as_second()
    }
}

/// A clock frozen at a given Unix time
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl WallClock for FixedClock {
    fn now_epoch(&self) -> i64 {
        self.0
    }
}

/// Lazily measured offset between local and server time
pub struct ClockSync {
    transport: Arc<dyn StorageTransport>,
    bucket: String,
    wall: Arc<dyn WallClock>,
    probe_timeout: Duration,
    offset: RwLock<Option<i64>>,
}

impl ClockSync {
    pub fn new(
        transport: Arc<dyn StorageTransport>,
        bucket: impl Into<String>,
        wall: Arc<dyn WallClock>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            bucket: bucket.into(),
            wall,
            probe_timeout,
            offset: RwLock::new(None),
        }
    }

    /// Local time adjusted by the server offset, in Unix seconds
    ///
    /// The first call probes the server. Probe failures and timeouts leave
    /// the offset at zero and are only logged.
    pub async fn now(&self) -> i64 {
        let offset = match self.offset() {
            Some(offset) => offset,
            None => {
                let measured = self.measure_offset().await;
                self.store(measured)
            }
        };
        self.wall.now_epoch() + offset
    }

    /// The cached offset in seconds, `None` until measured
    pub fn offset(&self) -> Option<i64> {
        *self.offset.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget the cached offset so the next `now()` probes again
    pub fn invalidate(&self) {
        *self.offset.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Store `measured` unless a concurrent caller stored first; returns the
    /// value that is now cached.
    fn store(&self, measured: i64) -> i64 {
        let mut guard = self.offset.write().unwrap_or_else(|e| e.into_inner());
        *guard.get_or_insert(measured)
    }

    async fn measure_offset(&self) -> i64 {
        let probe = self.transport.head_bucket_metadata(&self.bucket);
        let metadata = match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                warn!(bucket = %self.bucket, error = %e, "Clock probe failed, assuming no skew");
                return 0;
            }
            Err(_) => {
                warn!(
                    bucket = %self.bucket,
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "Clock probe timed out, assuming no skew"
                );
                return 0;
            }
        };

        let local = self.wall.now_epoch();
        match metadata.server_time {
            Some(server) => {
                let offset = server.as_second() - local;
                debug!(bucket = %self.bucket, offset, "Measured server clock offset");
                offset
            }
            None => {
                warn!(bucket = %self.bucket, "Clock probe returned no Date header, assuming no skew");
                0
            }
        }
    }
}

impl fmt::Debug for ClockSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockSync")
            .field("bucket", &self.bucket)
            .field("wall", &self.wall)
            .field("probe_timeout", &self.probe_timeout)
            .field("offset", &self.offset())
            .finish()
    }
}
