/// Background escalation sweep
///
/// Runs [`WorkflowEngine::escalate_overdue`] on a cron schedule through
/// tokio-cron-scheduler. The sweep itself is safe to overlap: each task is escalated
/// under a status guard, so a task is escalated at most once.

use crate::error::{EngineError, EngineResult};
use crate::runtime::engine::WorkflowEngine;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct EscalationScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_id: RwLock<Option<Uuid>>,
    engine: Arc<WorkflowEngine>,
    schedule: String,
}

impl EscalationScheduler {
    /// `schedule` is a six-field cron expression (seconds first)
    pub async fn new(engine: Arc<WorkflowEngine>, schedule: &str) -> EngineResult<Self> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_id: RwLock::new(None),
            engine,
            schedule: schedule.to_string(),
        })
    }

    /// Register the sweep job and start the scheduler
    pub async fn start(&self) -> EngineResult<()> {
        tracing::info!("⏰ Starting escalation scheduler ({})", self.schedule);

        let engine = Arc::clone(&self.engine);
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let engine = Arc::clone(&engine);

            Box::pin(async move {
                tracing::debug!("🔔 Escalation sweep triggered");
                match engine.escalate_overdue().await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!("✅ Escalation sweep escalated {} tasks", count),
                    Err(e) => tracing::error!("❌ Escalation sweep failed: {}", e),
                }
            })
        })
        .map_err(scheduler_error)?;

        {
            let scheduler = self.scheduler.read().await;
            let job_id = scheduler.add(job).await.map_err(scheduler_error)?;
            *self.job_id.write().await = Some(job_id);
            scheduler.start().await.map_err(scheduler_error)?;
        }

        tracing::info!("✅ Escalation scheduler started");
        Ok(())
    }

    /// Remove the sweep job and shut the scheduler down
    pub async fn stop(&self) -> EngineResult<()> {
        tracing::info!("⏹️ Stopping escalation scheduler");

        let mut scheduler = self.scheduler.write().await;
        if let Some(job_id) = self.job_id.write().await.take() {
            if let Err(e) = scheduler.remove(&job_id).await {
                tracing::warn!("⚠️ Failed to remove escalation job {}: {}", job_id, e);
            }
        }
        scheduler.shutdown().await.map_err(scheduler_error)?;

        tracing::info!("✅ Escalation scheduler stopped");
        Ok(())
    }
}

fn scheduler_error(e: tokio_cron_scheduler::JobSchedulerError) -> EngineError {
    EngineError::Scheduler(e.to_string())
}
