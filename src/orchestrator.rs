use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agents::AgentSet;
use crate::config::WorkflowConfig;
use crate::error::{ConfigError, NcmFlowError};
use crate::flows::{ConfirmationFlow, DeterminationFlow};
use crate::jobs::{JobRecord, JobStore};
use crate::product::ProductData;
use crate::router::StrategyRouter;
use crate::state_machine::{WorkflowResult, WorkflowState, WorkflowStatus, WorkflowType};
use crate::stats::{Statistics, StatsRecorder};

/// Selects a strategy per product, drives the chosen flow and keeps the
/// process-wide statistics and job records.
///
/// Cheap to clone: every clone shares the same flows, statistics and jobs.
#[derive(Debug, Clone)]
pub struct WorkflowManager {
    config: Arc<WorkflowConfig>,
    confirmation: Arc<ConfirmationFlow>,
    determination: Arc<DeterminationFlow>,
    stats: Arc<StatsRecorder>,
    jobs: Arc<JobStore>,
    reaper: Arc<Once>,
}

impl WorkflowManager {
    /// Fails fast on an invalid configuration.
    pub fn new(config: WorkflowConfig, agents: AgentSet) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            jobs: Arc::new(JobStore::new(config.job_ttl())),
            config: Arc::new(config),
            confirmation: Arc::new(ConfirmationFlow::new(agents.clone())),
            determination: Arc::new(DeterminationFlow::new(agents)),
            stats: Arc::new(StatsRecorder::default()),
            reaper: Arc::new(Once::new()),
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn determine_workflow_type(&self, product: &ProductData) -> WorkflowType {
        StrategyRouter::route(product)
    }

    /// Classifies one product. Never fails: any fault, a panic included,
    /// comes back as an ERROR result.
    pub async fn process_product(
        &self,
        product: ProductData,
        tenant_id: &str,
        forced: Option<WorkflowType>,
    ) -> WorkflowResult {
        self.process_in_job(product, tenant_id, forced, None).await
    }

    async fn process_in_job(
        &self,
        product: ProductData,
        tenant_id: &str,
        forced: Option<WorkflowType>,
        job_id: Option<&str>,
    ) -> WorkflowResult {
        let started = Instant::now();
        let strategy = forced.unwrap_or_else(|| self.determine_workflow_type(&product));

        let mut state = WorkflowState::new(product.clone(), tenant_id, (*self.config).clone());
        if let Some(job_id) = job_id {
            state = state.with_job(job_id);
        }
        debug!(product = %state.product_id, %strategy, "processing product");

        let outcome = AssertUnwindSafe(self.execute(strategy, state))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok((workflow_type, state)) => {
                WorkflowResult::from_state(workflow_type, state, started.elapsed())
            }
            Err(panic) => {
                let message = format!("workflow panicked: {}", panic_message(panic.as_ref()));
                warn!(product = ?product.display_id(), "{message}");
                WorkflowResult::failure(strategy, &product, tenant_id, message, started.elapsed())
            }
        };

        self.stats.record(strategy, &result);
        debug!(
            product = %result.product_id,
            workflow = %result.workflow_type,
            status = %result.status,
            confidence = result.confidence,
            elapsed_ms = result.execution_time_ms,
            "product processed"
        );
        result
    }

    async fn execute(
        &self,
        strategy: WorkflowType,
        state: WorkflowState,
    ) -> (WorkflowType, WorkflowState) {
        match strategy {
            WorkflowType::Confirmation => (strategy, self.confirmation.run(state).await),
            WorkflowType::Determination => (strategy, self.determination.run(state).await),
            WorkflowType::Hybrid => self.run_hybrid(state).await,
        }
    }

    /// Confirmation first; determination with the attempt attached as
    /// context when it does not confirm.
    async fn run_hybrid(&self, seed: WorkflowState) -> (WorkflowType, WorkflowState) {
        let attempt = AssertUnwindSafe(self.confirmation.run(seed.clone()))
            .catch_unwind()
            .await;

        let attempt = match attempt {
            Ok(confirmed) => {
                let confidence = confirmed
                    .reconciliation
                    .as_ref()
                    .map(|r| r.confidence)
                    .unwrap_or(0.0);
                if confirmed.status() == WorkflowStatus::Confirmed
                    && confidence >= self.config.confidence_threshold
                {
                    return (WorkflowType::Confirmation, confirmed);
                }
                confirmed
            }
            Err(panic) => {
                let mut failed = seed;
                failed.fail(
                    WorkflowStatus::Initialized,
                    format!(
                        "confirmation attempt panicked: {}",
                        panic_message(panic.as_ref())
                    ),
                );
                failed
            }
        };

        let mut fallback = WorkflowState::fallback_from(&attempt);
        let mut note = format!(
            "confirmation ended in {}, falling back to determination",
            attempt.status()
        );
        if !attempt.errors.is_empty() {
            note.push_str(&format!(" (errors: {})", attempt.errors.join("; ")));
        }
        debug!(session = %fallback.session_id, "{note}");
        fallback.record(WorkflowStatus::Initialized, note);

        (WorkflowType::Hybrid, self.determination.run(fallback).await)
    }

    /// Classifies `products` with at most `max_concurrent` runs in flight
    /// (config default when `None`). Results keep the input order.
    pub async fn process_batch(
        &self,
        products: Vec<ProductData>,
        tenant_id: &str,
        max_concurrent: Option<usize>,
    ) -> Vec<WorkflowResult> {
        self.process_batch_with_progress(products, tenant_id, max_concurrent, |_, _| {})
            .await
    }

    /// Like [`process_batch`](Self::process_batch), calling `on_item` with
    /// the input index of every result as it finishes.
    pub async fn process_batch_with_progress<F>(
        &self,
        products: Vec<ProductData>,
        tenant_id: &str,
        max_concurrent: Option<usize>,
        on_item: F,
    ) -> Vec<WorkflowResult>
    where
        F: FnMut(usize, &WorkflowResult) + Send,
    {
        self.run_batch(products, tenant_id, max_concurrent, None, on_item)
            .await
    }

    async fn run_batch<F>(
        &self,
        products: Vec<ProductData>,
        tenant_id: &str,
        max_concurrent: Option<usize>,
        job_id: Option<String>,
        mut on_item: F,
    ) -> Vec<WorkflowResult>
    where
        F: FnMut(usize, &WorkflowResult) + Send,
    {
        let limit = max_concurrent
            .unwrap_or(self.config.max_concurrency)
            .max(1);
        let total = products.len();
        info!(total, limit, job = ?job_id, "batch started");

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut workers = JoinSet::new();
        for (index, product) in products.iter().cloned().enumerate() {
            let manager = self.clone();
            let semaphore = semaphore.clone();
            let tenant_id = tenant_id.to_string();
            let job_id = job_id.clone();
            workers.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let result = manager
                    .process_in_job(product, &tenant_id, None, job_id.as_deref())
                    .await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<WorkflowResult>> = (0..total).map(|_| None).collect();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, result)) => {
                    on_item(index, &result);
                    slots[index] = Some(result);
                }
                Err(e) => warn!("batch worker did not finish: {e}"),
            }
        }

        let results: Vec<WorkflowResult> = slots
            .into_iter()
            .zip(&products)
            .map(|(slot, product)| {
                slot.unwrap_or_else(|| {
                    WorkflowResult::failure(
                        self.determine_workflow_type(product),
                        product,
                        tenant_id,
                        "batch worker did not finish",
                        Duration::ZERO,
                    )
                })
            })
            .collect();

        let failed = results
            .iter()
            .filter(|r| r.status == WorkflowStatus::Error)
            .count();
        info!(total, failed, job = ?job_id, "batch finished");
        results
    }

    /// Starts a batch in the background and returns its job id for polling.
    ///
    /// The first submission also starts the task that discards finished jobs
    /// nobody collected within `job_ttl_minutes`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn submit_batch(
        &self,
        products: Vec<ProductData>,
        tenant_id: &str,
        max_concurrent: Option<usize>,
    ) -> String {
        self.reaper.call_once(|| spawn_reaper(Arc::downgrade(&self.jobs)));
        let job_id = self.jobs.create(products.len());
        let manager = self.clone();
        let tenant_id = tenant_id.to_string();
        let id = job_id.clone();

        tokio::spawn(async move {
            let jobs = manager.jobs.clone();
            let run = AssertUnwindSafe(async {
                let results = manager
                    .run_batch(products, &tenant_id, max_concurrent, Some(id.clone()), |_, r| {
                        jobs.record_item(&id, r)
                    })
                    .await;
                jobs.complete(&id, results);
            })
            .catch_unwind()
            .await;
            if let Err(panic) = run {
                let message = format!("batch panicked: {}", panic_message(panic.as_ref()));
                warn!(job = %id, "{message}");
                jobs.fail(&id, message);
            }
        });
        job_id
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get(job_id)
    }

    /// Results of a finished job, handed out once. Taking them acknowledges
    /// the job and discards its record.
    ///
    /// `Ok(None)` while the job is still running, or when it failed.
    pub fn take_job_results(
        &self,
        job_id: &str,
    ) -> Result<Option<Vec<WorkflowResult>>, NcmFlowError> {
        self.jobs
            .take_results(job_id)
            .ok_or_else(|| NcmFlowError::JobNotFound(job_id.to_string()))
    }

    /// Discards finished jobs older than `job_ttl_minutes`.
    pub fn reap_expired_jobs(&self) -> usize {
        let reaped = self.jobs.reap_expired();
        if reaped > 0 {
            debug!(reaped, "expired jobs discarded");
        }
        reaped
    }

    pub fn get_statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }
}

/// Periodically reaps expired jobs until the store is dropped.
fn spawn_reaper(jobs: Weak<JobStore>) {
    let Some(store) = jobs.upgrade() else {
        return;
    };
    let period = (store.ttl() / 2).max(Duration::from_secs(1));
    drop(store);

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let Some(store) = jobs.upgrade() else {
                break;
            };
            let reaped = store.reap_expired();
            if reaped > 0 {
                debug!(reaped, "expired jobs discarded");
            }
        }
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
