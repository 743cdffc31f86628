pub mod audit;
pub mod locks;
pub mod orchestrator;
pub mod processor;
pub mod queue;
pub mod reconciler;

pub use audit::AuditTrail;
pub use locks::{LockTimeout, PaymentGuard, PaymentLocks};
pub use orchestrator::PaymentOrchestrator;
pub use processor::{PaymentProcessor, ProcessingOutcome};
pub use queue::{ProcessingJob, ProcessingQueue, ProcessingWorker};
pub use reconciler::{WebhookOutcome, WebhookReconciler};
