//! Execution context shared by the operators of one plan.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::{EngineConfig, Error, Result};
use crate::storage::StreamManager;

/// Cooperative cancellation flag.
///
/// Clones share the flag. Long-running loops call [`check`](Self::check)
/// and fail with `Error::Cancelled` once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Streams, configuration and cancellation for one execution.
#[derive(Clone)]
pub struct ExecutionContext {
    streams: Arc<dyn StreamManager>,
    config: EngineConfig,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(streams: Arc<dyn StreamManager>) -> Self {
        Self {
            streams,
            config: EngineConfig::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    #[inline]
    pub fn streams(&self) -> &Arc<dyn StreamManager> {
        &self.streams
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fail with `Error::Cancelled` if cancellation was requested.
    #[inline]
    pub fn check_cancelled(&self) -> Result<()> {
        self.cancellation.check()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("config", &self.config)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}
