//! Platform ad intensity setting.
//!
//! The value is never allowed to be missing: a rejected request reads as the
//! platform default, and a failed one keeps whatever was last known.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mangasync_api_types::AdIntensity;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::application::error::ApiError;
use crate::cache::{QueryCache, QueryKey};

pub const AD_INTENSITY_PATH: &str = "/api/settings/public/ad-intensity";
pub const DEFAULT_REFETCH_INTERVAL: Duration = Duration::from_secs(30);
const RETRIES: usize = 1;

pub fn cache_key() -> QueryKey {
    QueryKey::resource("ad-intensity")
}

#[async_trait]
pub trait AdIntensityApi: Send + Sync {
    async fn ad_intensity(&self) -> Result<AdIntensity, ApiError>;
}

pub struct AdIntensityService {
    api: Arc<dyn AdIntensityApi>,
    cache: QueryCache,
}

impl AdIntensityService {
    pub fn new(api: Arc<dyn AdIntensityApi>, cache: QueryCache) -> Self {
        Self { api, cache }
    }

    /// Last known setting, or the default before the first fetch.
    pub fn current(&self) -> AdIntensity {
        self.cache.get_data(&cache_key()).unwrap_or_default()
    }

    /// Fetch the setting and cache it.
    ///
    /// Non-2xx responses cache the default. Transport or decode failures are
    /// retried once, after which the last known value is returned unchanged.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> AdIntensity {
        let key = cache_key();
        match self.cache.refetch_query(&key, || self.fetch()).await {
            Ok(setting) => setting,
            Err(err) => {
                warn!(error = %err, "Ad intensity unavailable; keeping last known value");
                self.current()
            }
        }
    }

    async fn fetch(&self) -> Result<AdIntensity, ApiError> {
        let mut attempt = 0;
        loop {
            match self.api.ad_intensity().await {
                Ok(setting) => return Ok(setting),
                Err(ApiError::Status { status, .. }) => {
                    debug!(status, "Ad intensity rejected; using default");
                    return Ok(AdIntensity::default());
                }
                Err(err) if attempt < RETRIES => {
                    attempt += 1;
                    debug!(error = %err, attempt, "Retrying ad intensity fetch");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Refresh now and then every `period` until the returned task is stopped.
    pub fn spawn_refetch(self: &Arc<Self>, period: Duration) -> RefetchTask {
        let (shutdown, mut stop) = watch::channel(false);
        let service = Arc::clone(self);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now(), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let setting = service.refresh().await;
                        debug!(level = setting.level, enabled = setting.enabled, "Ad intensity refreshed");
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Ad intensity refetch stopped");
        });

        RefetchTask { shutdown, handle }
    }
}

/// Background refetch loop started by [`AdIntensityService::spawn_refetch`].
pub struct RefetchTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefetchTask {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "Ad intensity refetch task ended abnormally");
        }
    }
}
