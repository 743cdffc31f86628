use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-payment exclusive locks.
///
/// The outer mutex only guards the registry map and is never held across an
/// await. Entries are never evicted, so memory grows with the number of
/// distinct payment ids seen by this process.
#[derive(Debug, Default)]
pub struct PaymentLocks {
    registry: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one payment until dropped.
#[derive(Debug)]
pub struct PaymentGuard {
    payment_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl PaymentGuard {
    pub fn payment_id(&self) -> Uuid {
        self.payment_id
    }
}

#[derive(Debug, thiserror::Error)]
#[error("timed out after {waited:?} waiting for lock on payment {payment_id}")]
pub struct LockTimeout {
    pub payment_id: Uuid,
    pub waited: Duration,
}

impl PaymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, payment_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry.entry(payment_id).or_default().clone()
    }

    pub async fn acquire(&self, payment_id: Uuid) -> PaymentGuard {
        let guard = self.handle(payment_id).lock_owned().await;
        PaymentGuard {
            payment_id,
            _guard: guard,
        }
    }

    pub async fn acquire_timeout(
        &self,
        payment_id: Uuid,
        timeout: Duration,
    ) -> Result<PaymentGuard, LockTimeout> {
        tokio::time::timeout(timeout, self.acquire(payment_id))
            .await
            .map_err(|_| LockTimeout {
                payment_id,
                waited: timeout,
            })
    }

    /// Number of distinct payment ids that have ever been locked.
    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
