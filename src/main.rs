use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use chairtime::config::ShopConfig;
use chairtime::engine::BookingDesk;
use chairtime::store::{InMemoryStore, Seed};

const USAGE: &str = "usage: chairtime <YYYY-MM-DD> <service-ulid>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let metrics_port: Option<u16> = std::env::var("CHAIRTIME_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    chairtime::observability::init(metrics_port)?;

    let mut args = std::env::args().skip(1);
    let (Some(date), Some(service)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let date: NaiveDate = date.parse()?;
    let service_id: Ulid = service.parse()?;

    let config = ShopConfig::from_env();
    let store = InMemoryStore::default();
    if let Ok(path) = std::env::var("CHAIRTIME_SEED") {
        let raw = std::fs::read_to_string(&path)?;
        let seed: Seed = serde_json::from_str(&raw)?;
        let clock = chairtime::clock::BusinessClock::new(config.timezone);
        let loaded = store.load_seed(seed, &clock).await?;
        info!(path = %path, appointments = loaded, "seed applied");
    }

    info!(
        tz = %config.timezone,
        slot_minutes = config.slot_minutes,
        lead_minutes = config.lead_minutes,
        "chairtime starting"
    );
    let desk = BookingDesk::new(Arc::new(store), config)?;
    let view = desk.day_view(date, service_id, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
