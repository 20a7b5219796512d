//! HTTP server for the lane auction marketplace.
//!
//! Endpoints: lanes, vendors, shipment bids, offers, counter-offers, dispatch, notifications,
//! and the `/ws/feed` live feed. Configuration comes from the environment (see
//! [`MarketConfig`] and [`AuthConfig::from_env`]).

use lane_auction::api;
use lane_auction::audit::{AuditSink, NullAuditSink, StdoutAuditSink};
use lane_auction::clock::SystemClock;
use lane_auction::persistence::FilePersistence;
use lane_auction::store::MemoryStore;
use lane_auction::{AuthConfig, MarketConfig, Marketplace};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let _ = env_logger::try_init();
    let config = MarketConfig::from_env();
    let auth = AuthConfig::from_env();
    if auth.disable {
        warn!("API key auth disabled; caller identity is taken from X-User-* headers");
    }

    let store = match &config.data_file {
        Some(path) => match MemoryStore::with_persistence(FilePersistence::new(path)) {
            Ok(store) => {
                info!("record store loaded path={}", path.display());
                store
            }
            Err(e) => {
                error!("cannot open record store path={} error={}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => MemoryStore::new(),
    };
    let audit: Arc<dyn AuditSink> = if config.audit_stdout {
        Arc::new(StdoutAuditSink)
    } else {
        Arc::new(NullAuditSink)
    };
    let market = Marketplace::new(Arc::new(store), Arc::new(SystemClock), config.admin_user_id).with_audit(audit);

    let app = api::create_router(Arc::new(market), auth);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.expect("bind");
    info!("listening on http://{}", addr);
    axum::serve(listener, app.into_make_service())
        .await
        .expect("serve");
}
