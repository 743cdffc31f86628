pub mod app_config;
pub mod audit_repo;
pub mod database;
pub mod memory;
pub mod payment_repo;

pub use audit_repo::PgAuditStore;
pub use database::DbClient;
pub use memory::{InMemoryAuditStore, InMemoryPaymentStore};
pub use payment_repo::PgPaymentStore;
