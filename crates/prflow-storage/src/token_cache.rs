//! Per-instance bearer-token cache.
//!
//! A cached token is served while it has more than [`REFRESH_BUFFER`] left.
//! Refreshes are single-flight per instance key: the first caller that finds a
//! missing or stale entry performs the OAuth exchange, every concurrent caller
//! for the same key waits on a `watch` channel and receives the same token or
//! the same failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use prflow_core::{Error, Instance, Result, Upstream};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Safety margin before expiry after which a token is no longer handed out.
pub const REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// A bearer token and the instant it expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: Instant,
}

impl CachedToken {
    /// Usable while `now + REFRESH_BUFFER < expires_at`.
    pub fn is_usable(&self, now: Instant) -> bool {
        now + REFRESH_BUFFER < self.expires_at
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

type Outcome = std::result::Result<CachedToken, Arc<Error>>;

enum Slot {
    Ready(CachedToken),
    Refreshing(watch::Receiver<Option<Outcome>>),
}

enum Role {
    Leader(watch::Sender<Option<Outcome>>),
    Follower(watch::Receiver<Option<Outcome>>),
}

/// Token cache keyed by instance key.
pub struct TokenCache {
    upstream: Arc<dyn Upstream>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl TokenCache {
    /// Create an empty cache that refreshes through `upstream`.
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get a usable bearer token for the instance.
    pub async fn get_token(&self, instance: &Instance) -> Result<String> {
        Ok(self.get(instance).await?.token)
    }

    /// Get a usable token together with its expiry.
    pub async fn get(&self, instance: &Instance) -> Result<CachedToken> {
        loop {
            let role = {
                let mut slots = self.lock()?;
                let now = Instant::now();
                let in_flight = match slots.get(&instance.key) {
                    Some(Slot::Ready(cached)) if cached.is_usable(now) => {
                        debug!(instance = %instance.key, "Using cached bearer token");
                        return Ok(cached.clone());
                    }
                    Some(Slot::Refreshing(rx)) if !is_abandoned(rx) => Some(rx.clone()),
                    _ => None,
                };

                match in_flight {
                    Some(rx) => {
                        debug!(instance = %instance.key, "Waiting for in-flight token refresh");
                        Role::Follower(rx)
                    }
                    None => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(instance.key.clone(), Slot::Refreshing(rx));
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => return self.lead_refresh(instance, tx).await,
                Role::Follower(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(value) => value.clone(),
                        // Leader went away without an answer; try again.
                        Err(_) => continue,
                    };
                    match outcome {
                        Some(Ok(cached)) => return Ok(cached),
                        Some(Err(e)) => return Err(e.replicate()),
                        None => continue,
                    }
                }
            }
        }
    }

    /// Cached entry for a key, whether or not it is still usable.
    pub fn snapshot(&self, key: &str) -> Option<CachedToken> {
        let slots = self.lock().ok()?;
        match slots.get(key) {
            Some(Slot::Ready(cached)) => Some(cached.clone()),
            _ => None,
        }
    }

    /// Drop the cached token of an instance.
    pub fn invalidate(&self, key: &str) {
        if let Ok(mut slots) = self.lock() {
            if matches!(slots.get(key), Some(Slot::Ready(_))) {
                slots.remove(key);
                debug!(instance = key, "Bearer token invalidated");
            }
        }
    }

    async fn lead_refresh(
        &self,
        instance: &Instance,
        tx: watch::Sender<Option<Outcome>>,
    ) -> Result<CachedToken> {
        debug!(instance = %instance.key, "Requesting new bearer token");

        match self.upstream.exchange_token(&instance.credentials).await {
            Ok(token) => {
                let lifetime = Duration::from_secs(token.lifetime_secs());
                let cached = CachedToken {
                    token: token.access_token,
                    expires_at: Instant::now() + lifetime,
                };
                self.lock()?
                    .insert(instance.key.clone(), Slot::Ready(cached.clone()));
                tx.send_replace(Some(Ok(cached.clone())));

                info!(
                    instance = %instance.key,
                    expires_in_secs = lifetime.as_secs(),
                    "Bearer token refreshed"
                );
                Ok(cached)
            }
            Err(e) => {
                warn!(instance = %instance.key, error = %e, "Token exchange failed");
                self.lock()?.remove(&instance.key);
                let shared = Arc::new(e);
                tx.send_replace(Some(Err(shared.clone())));
                Err(shared.replicate())
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        self.slots
            .lock()
            .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
    }
}

/// A refresh whose leader was dropped before publishing an outcome.
fn is_abandoned(rx: &watch::Receiver<Option<Outcome>>) -> bool {
    rx.borrow().is_none() && rx.has_changed().is_err()
}
