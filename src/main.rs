use std::sync::Arc;
use std::time::Duration;

use iron_mode::config::AppConfig;
use iron_mode::dom::Document;
use iron_mode::logging;
use iron_mode::remote::HttpStatusStore;
use iron_mode::session::Session;
use log::{error, info};
use parking_lot::Mutex;

const FRAME: Duration = Duration::from_millis(100);

// ─── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    logging::setup_logging(log::LevelFilter::Info).expect("Failed to initialize logger");

    let config = AppConfig::load();
    info!(
        "Iron Mode starting (user \"{}\", iron={}, sharing={})",
        config.username, config.is_iron, config.show_status_icons,
    );

    let store = Arc::new(HttpStatusStore::new(config.status_service_url.clone()));
    let document = Arc::new(Mutex::new(Document::new()));
    let mut session = Session::new(config, store, document);
    session.start();

    let mut frame = tokio::time::interval(FRAME);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = frame.tick() => session.tick(),
            res = &mut shutdown => {
                if let Err(e) = res {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    session.stop();
    session.config().save();
}
