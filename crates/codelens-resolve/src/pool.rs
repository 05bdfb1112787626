//! Bounded pool of external resolver calls

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codelens_core::config::ExternalResolverConfig;
use codelens_core::{ReasonCode, Resolution};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::external::{ExternalRequest, ExternalResolver, RequestBatch, ResponseBatch};
use crate::providers::create_provider;

/// Runs batches through an [`ExternalResolver`] with at most `workers` calls
/// in flight. Every call is bounded by `timeout`; a failed or timed-out batch
/// marks each of its requests `unresolved`.
pub struct ResolverPool {
    resolver: Arc<dyn ExternalResolver>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    batch_size: usize,
}

impl ResolverPool {
    pub fn new(resolver: Arc<dyn ExternalResolver>, workers: usize, timeout: Duration, batch_size: usize) -> Self {
        ResolverPool {
            resolver,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &ExternalResolverConfig, root: &Path) -> anyhow::Result<Self> {
        let resolver: Arc<dyn ExternalResolver> = Arc::from(create_provider(config, root)?);
        Ok(Self::new(resolver, config.workers, Duration::from_millis(config.timeout_ms), config.batch_size))
    }

    pub fn name(&self) -> &str {
        self.resolver.name()
    }

    /// Resolve every request. The result has exactly one entry per request id.
    pub async fn resolve_all(&self, requests: Vec<ExternalRequest>) -> HashMap<String, Resolution> {
        let ids: Vec<String> = requests.iter().map(|r| r.id.clone()).collect();
        let mut tasks = JoinSet::new();
        for chunk in requests.chunks(self.batch_size) {
            let batch = RequestBatch { requests: chunk.to_vec() };
            let resolver = Arc::clone(&self.resolver);
            let permits = Arc::clone(&self.permits);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => match tokio::time::timeout(timeout, resolver.resolve(&batch)).await {
                        Ok(result) => result,
                        Err(_) => Err(ResolveError::Timeout(timeout)),
                    },
                    Err(_) => Err(ResolveError::NoResponse),
                };
                merge_batch(&batch, outcome)
            });
        }

        let mut results = HashMap::with_capacity(ids.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch) => results.extend(batch),
                Err(e) => warn!("Resolver task failed: {}", e),
            }
        }
        for id in ids {
            results
                .entry(id)
                .or_insert_with(|| Resolution::unresolved(ReasonCode::ResolverFailed));
        }
        debug!("External resolver {} produced {} results", self.resolver.name(), results.len());
        results
    }
}

fn merge_batch(batch: &RequestBatch, outcome: Result<ResponseBatch, ResolveError>) -> Vec<(String, Resolution)> {
    match outcome {
        Ok(response) => {
            let mut answered: HashMap<String, Resolution> = response
                .results
                .into_iter()
                .map(|r| (r.id.clone(), r.into_resolution()))
                .collect();
            batch
                .requests
                .iter()
                .map(|r| {
                    let resolution = answered
                        .remove(&r.id)
                        .unwrap_or_else(|| Resolution::unresolved(ReasonCode::ResolverFailed));
                    (r.id.clone(), resolution)
                })
                .collect()
        }
        Err(e) => {
            warn!("External resolver batch of {} failed: {}", batch.requests.len(), e);
            let reason = e.reason();
            batch
                .requests
                .iter()
                .map(|r| (r.id.clone(), Resolution::unresolved(reason)))
                .collect()
        }
    }
}
