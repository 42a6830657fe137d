//! Concurrency discipline for benchmark model execution.
//!
//! Models are partitioned into cloud and local pools, and the pools run
//! concurrently with each other. Cloud models are unconstrained within
//! their pool. Local models at or above the large-model threshold run
//! strictly sequentially (GPU memory isolation); smaller ones share a
//! semaphore sized by `local_model_parallelism`. Models of unknown size
//! count as small.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::llm::Llm;

/// Where a model executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBackend {
    /// Remote API.
    Cloud,
    /// On-host inference.
    Local,
}

/// One model participating in a benchmark run.
#[derive(Clone)]
pub struct ModelSpec {
    /// Model identifier used in reports and dedupe keys.
    pub name: String,
    /// Cloud or local execution.
    pub backend: ModelBackend,
    /// Parameter count in billions, when known.
    pub params_b: Option<f64>,
    /// Whether the model runs behind an interactive subprocess
    /// (gets the longer batch timeout).
    pub interactive: bool,
    /// The completion client for this model.
    pub llm: Arc<dyn Llm>,
}

impl std::fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSpec")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("params_b", &self.params_b)
            .finish_non_exhaustive()
    }
}

/// Partition and concurrency rules.
pub struct ModelScheduler {
    /// Billions-of-parameters threshold; 0 disables isolation.
    pub large_model_threshold: f64,
    /// Max concurrent small local models.
    pub local_model_parallelism: usize,
}

impl ModelScheduler {
    /// Split models into `(cloud, local_large, local_small)`.
    pub fn partition<'a>(
        &self,
        models: &'a [ModelSpec],
    ) -> (Vec<&'a ModelSpec>, Vec<&'a ModelSpec>, Vec<&'a ModelSpec>) {
        let mut cloud = Vec::new();
        let mut large = Vec::new();
        let mut small = Vec::new();
        for model in models {
            match model.backend {
                ModelBackend::Cloud => cloud.push(model),
                ModelBackend::Local => {
                    let is_large = self.large_model_threshold > 0.0
                        && model.params_b.is_some_and(|p| p >= self.large_model_threshold);
                    if is_large {
                        large.push(model);
                    } else {
                        small.push(model);
                    }
                }
            }
        }
        (cloud, large, small)
    }

    /// Run `worker` once per model under the pool rules. The cloud pool
    /// and the local pool proceed concurrently; completion of the whole
    /// set is awaited.
    pub async fn run_models<'a, F, Fut>(&self, models: &'a [ModelSpec], worker: F)
    where
        F: Fn(&'a ModelSpec) -> Fut + Sync,
        Fut: std::future::Future<Output = ()>,
    {
        let (cloud, large, small) = self.partition(models);
        let small_permits = Arc::new(Semaphore::new(self.local_model_parallelism.max(1)));

        let cloud_pool = async {
            join_all(cloud.into_iter().map(&worker)).await;
        };

        let local_pool = async {
            let smalls = join_all(small.into_iter().map(|model| {
                let permits = Arc::clone(&small_permits);
                let fut = worker(model);
                async move {
                    let _permit = permits.acquire().await;
                    fut.await;
                }
            }));
            let larges = async {
                for model in large {
                    worker(model).await;
                }
            };
            // Small local models share the host with at most
            // `local_model_parallelism` workers; large ones follow
            // strictly after each other.
            tokio::join!(smalls, larges);
        };

        tokio::join!(cloud_pool, local_pool);
    }
}
