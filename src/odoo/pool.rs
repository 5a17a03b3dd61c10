//! Bounded connection pool for [`OdooClient`] handlers.
//!
//! Generalizes the previous `OdooClientPool` (a flat, unbounded, lazily-populated
//! instance-name → client cache in `mcp::tools`) into a true bounded pool with
//! acquire/release, a background health probe, and retry-with-backoff construction, per
//! the gateway's connection-pool contract.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use super::config::OdooInstanceConfig;
use super::unified_client::OdooClient;

struct Slot {
    client: OdooClient,
    in_use: bool,
    last_used: Instant,
    consecutive_failures: u32,
}

struct PoolInner {
    slots: Vec<Slot>,
}

/// A bounded pool of `OdooClient` handlers against a single Odoo instance.
pub struct Pool {
    cfg: OdooInstanceConfig,
    size: usize,
    retry_count: u32,
    base_retry_delay: Duration,
    failure_budget: u32,
    connection_health_interval: Duration,
    inner: Mutex<PoolInner>,
    notify: Notify,
}

impl Pool {
    pub fn new(cfg: OdooInstanceConfig, size: usize) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            size: size.max(1),
            retry_count: 3,
            base_retry_delay: Duration::from_millis(250),
            failure_budget: 3,
            connection_health_interval: Duration::from_secs(60),
            inner: Mutex::new(PoolInner { slots: Vec::new() }),
            notify: Notify::new(),
        })
    }

    /// Acquires a healthy idle connection, constructing one (with retry/backoff) if the
    /// pool has not reached `size`, or waiting up to `timeout` for one to free up.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledClient, anyhow::Error> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some((idx, slot)) = inner
                    .slots
                    .iter_mut()
                    .enumerate()
                    .find(|(_, s)| !s.in_use)
                {
                    slot.in_use = true;
                    slot.last_used = Instant::now();
                    let client = slot.client.clone();
                    return Ok(PooledClient {
                        pool: self.clone(),
                        index: idx,
                        client,
                        ok: true,
                    });
                }
                if inner.slots.len() < self.size {
                    let client = self.construct_with_retry().await?;
                    let idx = inner.slots.len();
                    inner.slots.push(Slot {
                        client: client.clone(),
                        in_use: true,
                        last_used: Instant::now(),
                        consecutive_failures: 0,
                    });
                    return Ok(PooledClient {
                        pool: self.clone(),
                        index: idx,
                        client,
                        ok: true,
                    });
                }
            }

            if Instant::now() >= deadline {
                return Err(anyhow::anyhow!("pool timeout waiting for a connection"));
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    async fn construct_with_retry(&self) -> Result<OdooClient, anyhow::Error> {
        let mut last_err = None;
        for attempt in 0..=self.retry_count {
            match OdooClient::new(&self.cfg) {
                Ok(c) => return Ok(c),
                Err(e) => last_err = Some(e),
            }
            if attempt < self.retry_count {
                let backoff = self.base_retry_delay * 2u32.pow(attempt);
                tokio::time::sleep(backoff).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("failed to construct Odoo client")))
    }

    async fn release(&self, index: usize, ok: bool) {
        let mut inner = self.inner.lock().await;
        let destroy = if let Some(slot) = inner.slots.get_mut(index) {
            slot.in_use = false;
            slot.last_used = Instant::now();
            if ok {
                slot.consecutive_failures = 0;
                false
            } else {
                slot.consecutive_failures += 1;
                slot.consecutive_failures > self.failure_budget
            }
        } else {
            false
        };
        if destroy {
            // Lazily replaced on next acquire: drop the slot's client and mark it free;
            // `construct_with_retry` builds a fresh handler the next time it's claimed.
            if let Some(slot) = inner.slots.get_mut(index) {
                if let Ok(fresh) = OdooClient::new(&self.cfg) {
                    slot.client = fresh;
                    slot.consecutive_failures = 0;
                }
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Background task: probes idle connections older than `connection_health_interval`.
    pub async fn health_probe_tick(&self) {
        let mut inner = self.inner.lock().await;
        for slot in inner.slots.iter_mut() {
            if slot.in_use {
                continue;
            }
            if slot.last_used.elapsed() < self.connection_health_interval {
                continue;
            }
            let healthy = slot.client.health_check().await;
            if !healthy {
                slot.consecutive_failures += 1;
            } else {
                slot.consecutive_failures = 0;
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let in_use = inner.slots.iter().filter(|s| s.in_use).count();
        PoolStats {
            size: self.size,
            idle: inner.slots.len() - in_use,
            in_use,
        }
    }

    /// Spawns the periodic health-probe background task. Returns its `JoinHandle` so the
    /// caller can abort it on shutdown.
    pub fn spawn_health_probe(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.health_probe_tick().await;
            }
        })
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
}

/// A borrowed client handle. Deref to `OdooClient` for calls; call [`mark_failed`] before
/// drop if the call using this connection failed, so the pool's failure budget accounts
/// for it.
pub struct PooledClient {
    pool: Arc<Pool>,
    index: usize,
    client: OdooClient,
    ok: bool,
}

impl PooledClient {
    pub fn mark_failed(&mut self) {
        self.ok = false;
    }
}

impl std::ops::Deref for PooledClient {
    type Target = OdooClient;
    fn deref(&self) -> &OdooClient {
        &self.client
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let index = self.index;
        let ok = self.ok;
        tokio::spawn(async move {
            pool.release(index, ok).await;
        });
    }
}
