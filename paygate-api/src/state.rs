use paygate_engine::{PaymentOrchestrator, WebhookReconciler};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: PaymentOrchestrator,
    pub reconciler: WebhookReconciler,
    pub auth: AuthConfig,
}
