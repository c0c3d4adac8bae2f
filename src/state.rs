use std::sync::Arc;
use std::time::Instant;

use crate::auth::repo::User;
use crate::config::AppConfig;
use crate::security::limits::{CounterStore, MemoryCounterStore};
use crate::store::{JsonTable, Table};
use crate::swaps::repo::SwapRequest;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn Table<User>>,
    pub swaps: Arc<dyn Table<SwapRequest>>,
    pub counters: Arc<dyn CounterStore>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        Self::with_config(config)
    }

    pub fn with_config(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let users = Arc::new(JsonTable::<User>::open(&config.data_dir, "users.json")?)
            as Arc<dyn Table<User>>;
        let swaps = Arc::new(JsonTable::<SwapRequest>::open(
            &config.data_dir,
            "swap-requests.json",
        )?) as Arc<dyn Table<SwapRequest>>;

        Ok(Self {
            users,
            swaps,
            counters: Arc::new(MemoryCounterStore::new()),
            config,
            started_at: Instant::now(),
        })
    }

    #[cfg(test)]
    pub(crate) fn fake() -> Self {
        use crate::config::JwtConfig;

        let data_dir =
            std::env::temp_dir().join(format!("skillswap-test-{}", uuid::Uuid::new_v4()));
        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            data_dir,
            allowed_origins: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
        });
        Self::with_config(config).expect("test state")
    }
}
