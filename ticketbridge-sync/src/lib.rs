pub mod canonical;
pub mod clients;
pub mod config;
pub mod decode;
pub mod mapper;
pub mod metrics;
pub mod models;
pub mod ratelimit;
pub mod records;
pub mod registry;
pub mod repos;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod services;
pub mod signature;

use std::collections::HashSet;
use std::sync::Mutex;

use ticketbridge_shared::clients::db::DbPool;

use crate::clients::source::SourceClient;
use crate::clients::target::TargetClient;
use crate::config::AppConfig;
use crate::ratelimit::TokenBucket;
use crate::records::Provider;
use crate::registry::MappingRegistry;

pub struct AppState {
    pub config: AppConfig,
    pub registry: MappingRegistry,
    pub db: DbPool,
    pub src_client: SourceClient,
    pub tgt_client: TargetClient,
    /// Plain client for health probes; the real API clients carry their own
    /// retry policy and metrics.
    pub http_client: reqwest::Client,
    pub src_inbound_bucket: Option<TokenBucket>,
    pub tgt_inbound_bucket: Option<TokenBucket>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    /// Page properties we have already warned about; unknown properties are
    /// logged once and then dropped silently.
    pub unknown_properties_seen: Mutex<HashSet<String>>,
}

impl AppState {
    pub fn inbound_bucket(&self, provider: Provider) -> Option<&TokenBucket> {
        match provider {
            Provider::Src => self.src_inbound_bucket.as_ref(),
            Provider::Tgt => self.tgt_inbound_bucket.as_ref(),
        }
    }
}
