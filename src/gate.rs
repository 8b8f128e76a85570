//! Shared gate in front of the search provider.
//!
//! The records index is one fragile resource shared by every property run
//! in a pool. A [`ProviderGate`] is constructed once and handed to each
//! engine; every search holds a [`GatePermit`] for its duration.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Held while a search is in flight; dropping it frees the slot.
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

#[async_trait]
pub trait ProviderGate: Send + Sync {
    /// Wait for a free slot and for the minimum spacing since the previous
    /// call start.
    async fn acquire(&self) -> Result<GatePermit>;
}

/// No-op gate.
pub struct OpenGate;

#[async_trait]
impl ProviderGate for OpenGate {
    async fn acquire(&self) -> Result<GatePermit> {
        Ok(GatePermit { _permit: None })
    }
}

/// Bounded concurrency plus a minimum interval between call starts.
pub struct ThrottleGate {
    semaphore: Arc<Semaphore>,
    min_interval: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl ThrottleGate {
    pub fn new(max_concurrency: usize, min_interval: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            min_interval,
            next_start: Mutex::new(None),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl ProviderGate for ThrottleGate {
    async fn acquire(&self) -> Result<GatePermit> {
        let permit = self.semaphore.clone().acquire_owned().await?;

        let start = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start = next.map_or(now, |n| n.max(now));
            *next = Some(start + self.min_interval);
            start
        };
        tokio::time::sleep_until(start).await;

        Ok(GatePermit {
            _permit: Some(permit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_concurrency() {
        let gate = ThrottleGate::new(2, Duration::ZERO);
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        drop(a);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn spaces_call_starts() {
        let gate = ThrottleGate::new(4, Duration::from_millis(20));
        let started = Instant::now();
        for _ in 0..3 {
            gate.acquire().await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn open_gate_never_waits() {
        let gate = OpenGate;
        for _ in 0..100 {
            gate.acquire().await.unwrap();
        }
    }
}
