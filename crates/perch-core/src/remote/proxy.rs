//! Retrying wrapper around a handle to an out-of-process provider.
//!
//! The handle is acquired lazily and cached. When a call reports a
//! transient fault the cached handle is dropped (unless another caller has
//! already replaced it) and the call is retried with a fresh one, up to a
//! bounded number of attempts. Only acquisition is serialized; calls on a
//! cached handle run concurrently.
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use log::{debug, warn};

use crate::kernel::constants::DEFAULT_PROXY_ATTEMPTS;
use crate::remote::error::{ProxyError, ProxyFault};

/// Produces handles to the remote provider.
#[async_trait]
pub trait ProxySource: Send + Sync {
    type Handle: Send + Sync + 'static;

    async fn acquire(&self) -> Result<Self::Handle, ProxyFault>;
}

pub struct ResilientProxy<S: ProxySource> {
    source: S,
    cached: ArcSwapOption<S::Handle>,
    acquire_gate: tokio::sync::Mutex<()>,
    max_attempts: u32,
}

impl<S: ProxySource> ResilientProxy<S> {
    pub fn new(source: S) -> Self {
        Self::with_max_attempts(source, DEFAULT_PROXY_ATTEMPTS)
    }

    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn with_max_attempts(source: S, max_attempts: u32) -> Self {
        Self {
            source,
            cached: ArcSwapOption::empty(),
            acquire_gate: tokio::sync::Mutex::new(()),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn has_handle(&self) -> bool {
        self.cached.load().is_some()
    }

    /// Runs `call` against the provider, re-acquiring the handle after a
    /// transient fault. Terminal faults are returned at once.
    pub async fn invoke<T, F, Fut>(&self, call: F) -> Result<T, ProxyError>
    where
        F: Fn(Arc<S::Handle>) -> Fut,
        Fut: Future<Output = Result<T, ProxyFault>>,
    {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            let handle = match self.handle().await {
                Ok(handle) => handle,
                Err(ProxyFault::Transient(message)) => {
                    debug!("Acquiring remote provider failed (attempt {}): {}", attempt, message);
                    last = message;
                    continue;
                }
                Err(ProxyFault::Terminal(message)) => return Err(ProxyError::Terminal(message)),
            };

            match call(handle.clone()).await {
                Ok(value) => return Ok(value),
                Err(ProxyFault::Transient(message)) => {
                    warn!(
                        "Remote provider unavailable (attempt {}/{}): {}",
                        attempt, self.max_attempts, message
                    );
                    self.invalidate(&handle).await;
                    last = message;
                }
                Err(ProxyFault::Terminal(message)) => return Err(ProxyError::Terminal(message)),
            }
        }
        Err(ProxyError::Exhausted {
            attempts: self.max_attempts,
            last,
        })
    }

    async fn handle(&self) -> Result<Arc<S::Handle>, ProxyFault> {
        if let Some(handle) = self.cached.load_full() {
            return Ok(handle);
        }
        let _gate = self.acquire_gate.lock().await;
        // Another caller may have acquired while we waited.
        if let Some(handle) = self.cached.load_full() {
            return Ok(handle);
        }
        let handle = Arc::new(self.source.acquire().await?);
        self.cached.store(Some(handle.clone()));
        Ok(handle)
    }

    async fn invalidate(&self, failed: &Arc<S::Handle>) {
        let _gate = self.acquire_gate.lock().await;
        let current = self.cached.load_full();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, failed)) {
            self.cached.store(None);
        }
    }
}

impl<S: ProxySource> fmt::Debug for ResilientProxy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientProxy")
            .field("max_attempts", &self.max_attempts)
            .field("has_handle", &self.has_handle())
            .finish_non_exhaustive()
    }
}
