//! Single-flight result cache.
//!
//! At most one computation runs per [`CacheKey`]. Requests arriving while it
//! is in flight await the same shared future. Successful results are kept
//! (bounded, oldest evicted first); failures are dropped so the next request
//! retries.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dockmatch_core::MatchResult;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::metrics::METRICS;

/// Default number of finished results kept.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Identity of one match: any fingerprint change is a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub image_fingerprint: String,
    pub build_spec_fingerprint: String,
    pub config_fingerprint: String,
}

type SharedMatch = Shared<BoxFuture<'static, std::result::Result<MatchResult, Arc<ServiceError>>>>;

enum Slot {
    Pending(SharedMatch),
    Ready(MatchResult),
}

struct Inner {
    slots: HashMap<CacheKey, Slot>,
    /// Ready keys, oldest first.
    order: VecDeque<CacheKey>,
    capacity: usize,
}

impl Inner {
    fn still_pending(&self, key: &CacheKey, shared: &SharedMatch) -> bool {
        matches!(self.slots.get(key), Some(Slot::Pending(s)) if s.ptr_eq(shared))
    }

    fn store(&mut self, key: CacheKey, result: MatchResult) {
        self.slots.insert(key.clone(), Slot::Ready(result));
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                debug!(image = %oldest.image_fingerprint, "evicting cached match");
                self.slots.remove(&oldest);
            }
        }
    }
}

pub struct SingleFlightCache {
    inner: Mutex<Inner>,
}

impl Default for SingleFlightCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SingleFlightCache {
    /// `capacity` bounds finished entries; in-flight computations are not counted.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached result for `key`, join the computation in flight, or
    /// start `compute`.
    pub async fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Result<MatchResult>
    where
        F: Future<Output = Result<MatchResult>> + Send + 'static,
    {
        let shared = {
            let mut inner = self.lock();
            match inner.slots.get(&key) {
                Some(Slot::Ready(result)) => {
                    METRICS.inc_cache_hits();
                    return Ok(result.clone());
                }
                Some(Slot::Pending(shared)) => {
                    METRICS.inc_cache_joins();
                    shared.clone()
                }
                None => {
                    let shared = compute.map(|r| r.map_err(Arc::new)).boxed().shared();
                    inner.slots.insert(key.clone(), Slot::Pending(shared.clone()));
                    shared
                }
            }
        };

        let outcome = shared.clone().await;

        // Whoever finishes first settles the slot; the others find it settled.
        {
            let mut inner = self.lock();
            if inner.still_pending(&key, &shared) {
                match &outcome {
                    Ok(result) => inner.store(key, result.clone()),
                    Err(_) => {
                        inner.slots.remove(&key);
                    }
                }
            }
        }

        outcome.map_err(|err| Arc::try_unwrap(err).unwrap_or_else(ServiceError::Shared))
    }

    /// Finished result for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<MatchResult> {
        match self.lock().slots.get(key) {
            Some(Slot::Ready(result)) => Some(result.clone()),
            _ => None,
        }
    }

    /// Drop every entry for an image whose layer set changed.
    pub fn invalidate_image(&self, image_fingerprint: &str) -> usize {
        self.invalidate(|key| key.image_fingerprint == image_fingerprint)
    }

    /// Drop every entry for a build spec whose text changed.
    pub fn invalidate_build_spec(&self, build_spec_fingerprint: &str) -> usize {
        self.invalidate(|key| key.build_spec_fingerprint == build_spec_fingerprint)
    }

    fn invalidate(&self, matches: impl Fn(&CacheKey) -> bool) -> usize {
        let mut inner = self.lock();
        let before = inner.slots.len();
        inner.slots.retain(|key, _| !matches(key));
        inner.order.retain(|key| !matches(key));
        before - inner.slots.len()
    }

    /// Number of finished entries.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
