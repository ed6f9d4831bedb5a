//! Admission control and per-origin pacing for the spider framework.
//!
//! [`AdmissionControl`] caps how many requests are in flight, both globally and
//! per origin. A request holds an [`AdmissionToken`] from admission until it
//! reaches a terminal state or is about to be retried or redirected; dropping
//! the token returns both permits.
//!
//! [`OriginThrottle`] spaces consecutive network dispatches to the same origin.
//! It is independent of admission: a request may hold its token while it waits
//! for its delay slot.

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

/// Global and per-origin concurrency limits.
pub struct AdmissionControl {
    global: Arc<Semaphore>,
    per_origin_limit: usize,
    origins: DashMap<String, Arc<Semaphore>>,
}

/// Both permits held by an admitted request. Released on drop.
#[derive(Debug)]
pub struct AdmissionToken {
    _global: OwnedSemaphorePermit,
    _origin: Option<OwnedSemaphorePermit>,
}

impl AdmissionControl {
    /// `per_origin_limit == 0` disables the per-origin cap.
    pub fn new(global_limit: usize, per_origin_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            per_origin_limit,
            origins: DashMap::new(),
        }
    }

    /// Waits for a global permit, then for a permit on `origin`.
    ///
    /// The global permit is always taken first so two requests can never hold
    /// each other's second permit.
    pub async fn acquire(&self, origin: &str) -> AdmissionToken {
        // Neither semaphore is ever closed, so acquisition cannot fail.
        let global = loop {
            if let Ok(permit) = Arc::clone(&self.global).acquire_owned().await {
                break permit;
            }
        };

        let origin_permit = if self.per_origin_limit > 0 {
            let semaphore = self
                .origins
                .entry(origin.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_origin_limit)))
                .clone();
            loop {
                if let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await {
                    break Some(permit);
                }
            }
        } else {
            None
        };

        trace!("Admitted request for origin {}", origin);
        AdmissionToken {
            _global: global,
            _origin: origin_permit,
        }
    }

    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    /// Free permits for `origin`, or `None` when the origin is unlimited or
    /// has not been seen yet.
    pub fn available_for(&self, origin: &str) -> Option<usize> {
        self.origins.get(origin).map(|s| s.available_permits())
    }
}

/// Reserves per-origin dispatch slots `delay` apart.
pub struct OriginThrottle {
    delay: Duration,
    randomize: bool,
    next_slot: DashMap<String, Instant>,
}

impl OriginThrottle {
    pub fn new(delay: Duration, randomize: bool) -> Self {
        Self {
            delay,
            randomize,
            next_slot: DashMap::new(),
        }
    }

    /// Waits until this caller's slot for `origin` arrives.
    ///
    /// Slots are reserved under the map's shard lock, so concurrent callers
    /// for one origin are spaced in the order they reserved. The first
    /// dispatch to an origin is immediate.
    pub async fn wait(&self, origin: &str) {
        if self.delay.is_zero() {
            return;
        }

        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.entry(origin.to_string()).or_insert(now);
            let slot = (*next).max(now);
            *next = slot + self.next_delay();
            slot
        };

        if slot > now {
            trace!("Delaying dispatch to {} by {:?}", origin, slot - now);
            tokio::time::sleep_until(slot).await;
        }
    }

    fn next_delay(&self) -> Duration {
        if self.randomize {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            self.delay.mul_f64(factor)
        } else {
            self.delay
        }
    }
}
