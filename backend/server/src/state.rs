use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::{
    broker::{RedisBroker, init_redis},
    config::Config,
    database::{MySqlStore, Store},
    error::StartupError,
    transport::Transport,
};

/// Whether the store answered when the process came up. Set once, never reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Pending,
    Ready,
}

pub struct State {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn Transport>,
    pub readiness: Readiness,
}

impl State {
    pub async fn new() -> Result<Arc<Self>, StartupError> {
        let config = Config::load()?;

        let store = MySqlStore::connect(&config.database_url).await?;
        let redis_connection = init_redis(&config.redis_url).await?;

        let readiness = match store.ping().await {
            Ok(()) => Readiness::Ready,
            Err(e) => {
                warn!("Store did not answer at startup: {e}");
                Readiness::Pending
            }
        };
        info!("Store readiness: {readiness:?}");

        Ok(Self::with_backends(
            config,
            Arc::new(store),
            Arc::new(RedisBroker::new(redis_connection)),
            readiness,
        ))
    }

    pub fn with_backends(
        config: Config,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        readiness: Readiness,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            transport,
            readiness,
        })
    }
}
