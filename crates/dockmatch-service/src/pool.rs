//! Bounded worker pool for match requests.
//!
//! A match is CPU-bound and runs to completion once started, so each one is
//! handed to `spawn_blocking`. A timeout abandons the whole computation; there
//! is never a partial result. Batch completions arrive in any order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dockmatch_core::obs::MatchSpan;
use dockmatch_core::{build_spec_fingerprint, canonical_digest, ImageDescriptor, MatchEngine, MatchResult};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, SingleFlightCache};
use crate::error::{Result, ServiceError};
use crate::metrics::METRICS;

/// One (build spec, image) pair to score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub request_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub build_spec: String,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    pub image: ImageDescriptor,
}

impl MatchRequest {
    pub fn new(build_spec: impl Into<String>, image: ImageDescriptor) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            name: None,
            build_spec: build_spec.into(),
            build_args: BTreeMap::new(),
            image,
        }
    }

    pub fn with_build_args(mut self, build_args: BTreeMap<String, String>) -> Self {
        self.build_args = build_args;
        self
    }

    /// Text fingerprint, folded with the build args when any are given.
    pub fn build_spec_fingerprint(&self) -> Result<String> {
        let text = build_spec_fingerprint(&self.build_spec);
        if self.build_args.is_empty() {
            Ok(text)
        } else {
            Ok(canonical_digest(&(text, &self.build_args))?)
        }
    }
}

/// Result of one request, tagged with the fingerprints it was computed for.
#[derive(Debug)]
pub struct MatchOutcome {
    pub request_id: Uuid,
    pub name: Option<String>,
    pub image_fingerprint: String,
    pub build_spec_fingerprint: String,
    pub result: Result<MatchResult>,
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum matches in flight at once
    pub workers: usize,
    /// Per-match time limit
    pub timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct MatchPool {
    engine: Arc<MatchEngine>,
    config: PoolConfig,
    cache: Option<Arc<SingleFlightCache>>,
    config_fingerprint: String,
}

impl MatchPool {
    pub fn new(engine: Arc<MatchEngine>, config: PoolConfig) -> Result<Self> {
        let config_fingerprint = engine.config().fingerprint()?;
        Ok(Self {
            engine,
            config,
            cache: None,
            config_fingerprint,
        })
    }

    /// Route every request through a shared single-flight cache.
    pub fn with_cache(mut self, cache: Arc<SingleFlightCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config_fingerprint(&self) -> &str {
        &self.config_fingerprint
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    /// Score one request.
    pub async fn run(&self, request: MatchRequest) -> MatchOutcome {
        let fingerprints = request
            .image
            .fingerprint()
            .map_err(ServiceError::from)
            .and_then(|image| Ok((image, request.build_spec_fingerprint()?)));
        let (image_fingerprint, spec_fingerprint) = match fingerprints {
            Ok(fps) => fps,
            Err(err) => {
                METRICS.inc_failures();
                return MatchOutcome {
                    request_id: request.request_id,
                    name: request.name,
                    image_fingerprint: String::new(),
                    build_spec_fingerprint: String::new(),
                    result: Err(err),
                };
            }
        };

        let MatchRequest {
            request_id,
            name,
            build_spec,
            build_args,
            image,
        } = request;
        let work = evaluate(
            Arc::clone(&self.engine),
            request_id,
            build_spec,
            build_args,
            image,
            self.config.timeout,
        );

        let result = match &self.cache {
            Some(cache) => {
                let key = CacheKey {
                    image_fingerprint: image_fingerprint.clone(),
                    build_spec_fingerprint: spec_fingerprint.clone(),
                    config_fingerprint: self.config_fingerprint.clone(),
                };
                cache.get_or_compute(key, work).await
            }
            None => work.await,
        };

        if let Err(err) = &result {
            METRICS.inc_failures();
            warn!(request_id = %request_id, error = %err, "match failed");
        }

        MatchOutcome {
            request_id,
            name,
            image_fingerprint,
            build_spec_fingerprint: spec_fingerprint,
            result,
        }
    }

    /// Score a batch with at most `workers` matches in flight.
    pub async fn run_batch(&self, requests: Vec<MatchRequest>) -> Vec<MatchOutcome> {
        let total = requests.len();
        let workers = self.config.workers.max(1);
        info!(requests = total, workers = workers, "batch started");

        let outcomes: Vec<MatchOutcome> = stream::iter(requests)
            .map(|request| self.run(request))
            .buffer_unordered(workers)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(requests = total, failed = failed, "batch finished");
        outcomes
    }
}

/// Run one evaluation on the blocking pool, bounded by `timeout`.
async fn evaluate(
    engine: Arc<MatchEngine>,
    request_id: Uuid,
    build_spec: String,
    build_args: BTreeMap<String, String>,
    image: ImageDescriptor,
    timeout: Duration,
) -> Result<MatchResult> {
    let id = request_id.to_string();
    let task = tokio::task::spawn_blocking(move || {
        let _span = MatchSpan::enter(&id);
        engine.evaluate(&build_spec, &image, &build_args)
    });

    match tokio::time::timeout(timeout, task).await {
        Err(_) => {
            METRICS.inc_timeouts();
            Err(ServiceError::Timeout {
                request_id: request_id.to_string(),
                secs: timeout.as_secs(),
            })
        }
        Ok(Err(join)) => Err(ServiceError::WorkerPanicked(join.to_string())),
        Ok(Ok(result)) => {
            let result = result?;
            METRICS.inc_matches_computed();
            Ok(result)
        }
    }
}
