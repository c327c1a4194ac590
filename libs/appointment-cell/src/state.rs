use std::sync::Arc;

use payment_cell::{EsewaGateway, GatewayError};
use shared_config::AppConfig;
use shared_database::DbHandle;
use shared_utils::notification::Notifier;

/// Everything the lifecycle services share. Cloning is cheap.
#[derive(Clone)]
pub struct LifecycleState {
    pub config: Arc<AppConfig>,
    pub store: DbHandle,
    pub gateway: Arc<EsewaGateway>,
    pub notifier: Arc<dyn Notifier>,
}

impl LifecycleState {
    pub fn new(
        config: Arc<AppConfig>,
        store: DbHandle,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, GatewayError> {
        let gateway = Arc::new(EsewaGateway::new(&config)?);
        Ok(Self {
            config,
            store,
            gateway,
            notifier,
        })
    }
}
