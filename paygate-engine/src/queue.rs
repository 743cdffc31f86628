use std::sync::Arc;
use std::time::Duration;

use paygate_core::{PaymentError, PaymentResult};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::processor::PaymentProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingJob {
    pub payment_id: Uuid,
    pub delay: Option<Duration>,
}

impl ProcessingJob {
    pub fn now(payment_id: Uuid) -> Self {
        Self { payment_id, delay: None }
    }

    pub fn delayed(payment_id: Uuid, delay: Duration) -> Self {
        Self {
            payment_id,
            delay: Some(delay),
        }
    }
}

/// Submission side of the processing queue. Cloneable; the worker stops once
/// every handle is dropped and the backlog is drained.
#[derive(Clone)]
pub struct ProcessingQueue {
    tx: mpsc::Sender<ProcessingJob>,
}

impl ProcessingQueue {
    /// Never waits, so a caller that goes away right after submitting cannot
    /// lose the job.
    pub fn submit(&self, job: ProcessingJob) -> PaymentResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                warn!(payment_id = %job.payment_id, "processing queue full, deferring submission");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(job).await.is_err() {
                        error!(payment_id = %job.payment_id, "processing queue closed before job was accepted");
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(job)) => Err(PaymentError::Internal(format!(
                "processing queue is closed, payment {} not scheduled",
                job.payment_id
            ))),
        }
    }
}

pub struct ProcessingWorker {
    handle: JoinHandle<()>,
}

impl ProcessingWorker {
    /// Waits for the worker to drain; returns once all queue handles are gone.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!("processing worker terminated abnormally: {}", e);
        }
    }
}

pub fn spawn_worker(processor: Arc<PaymentProcessor>) -> (ProcessingQueue, ProcessingWorker) {
    let limits = processor.settings().processing.clone();
    let (tx, rx) = mpsc::channel(limits.queue_capacity.max(1));
    let handle = tokio::spawn(run(processor, rx, limits.max_concurrency.max(1)));
    (ProcessingQueue { tx }, ProcessingWorker { handle })
}

async fn run(
    processor: Arc<PaymentProcessor>,
    mut rx: mpsc::Receiver<ProcessingJob>,
    concurrency: usize,
) {
    info!(concurrency, "payment processing worker started");
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut in_flight = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let processor = processor.clone();
        match job.delay {
            // Delayed jobs wait without a permit.
            Some(delay) => {
                let permits = permits.clone();
                in_flight.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    process(&processor, job.payment_id).await;
                });
            }
            None => {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                in_flight.spawn(async move {
                    let _permit = permit;
                    process(&processor, job.payment_id).await;
                });
            }
        }

        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                error!("processing task panicked: {}", e);
            }
        }
    }

    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!("processing task panicked: {}", e);
        }
    }
    info!("payment processing worker stopped");
}

async fn process(processor: &PaymentProcessor, payment_id: Uuid) {
    match processor.process_payment(payment_id).await {
        Ok(outcome) => debug!(%payment_id, ?outcome, "processing finished"),
        Err(e) => error!(%payment_id, error = %e, "processing attempt aborted"),
    }
}
