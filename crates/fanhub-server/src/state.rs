//! Shared application state handed to every Axum handler.

use std::sync::Arc;

use fanhub_core::{ClientConfig, Dispatcher, Hub};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::origin::OriginPolicy;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub dispatcher: Arc<Dispatcher>,
    pub client_config: ClientConfig,
    pub origin_policy: OriginPolicy,
    pub metrics_handle: Option<PrometheusHandle>,
}
