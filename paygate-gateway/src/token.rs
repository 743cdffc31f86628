use std::future::Future;
use std::time::Duration;

use paygate_core::GatewayError;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Bearer token cache with its own lock. Callers arriving during a refresh
/// wait on the lock and reuse the fresh token.
#[derive(Debug)]
pub struct AccessTokenCache {
    margin: Duration,
    slot: Mutex<Option<CachedToken>>,
}

impl Default for AccessTokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_MARGIN)
    }
}

impl AccessTokenCache {
    pub fn new(margin: Duration) -> Self {
        Self {
            margin,
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedToken, GatewayError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let issued = refresh().await?;
        let refresh_at = Instant::now() + issued.expires_in.saturating_sub(self.margin);
        debug!(expires_in = issued.expires_in.as_secs(), "access token refreshed");
        *slot = Some(CachedToken {
            value: issued.access_token.clone(),
            refresh_at,
        });
        Ok(issued.access_token)
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
