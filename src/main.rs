use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use recruit_gateway::config::Config;
use recruit_gateway::fleet::FleetManager;
use recruit_gateway::kafka::{KafkaBus, OutputConsumer};
use recruit_gateway::logging;
use recruit_gateway::policy::{self, PgPolicyStore};
use recruit_gateway::transport::loopback::LoopbackFactory;
use recruit_gateway::transport::TransportFactory;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load(Config::path_from_env()).context("Failed to load config")?;
    let _log_guard = logging::init(&config.logger).context("Failed to initialize logger")?;

    let bus = Arc::new(KafkaBus::new(&config.kafka).context("Failed to initialize Kafka")?);
    let consumer =
        OutputConsumer::new(&config.kafka).context("Failed to initialize Kafka consumer")?;

    let pool = policy::create_pool(&config.postgres, &config.postgres_url())
        .await
        .context("Failed to initialize database")?;
    let policy_store = Arc::new(PgPolicyStore::new(pool));

    // The network chat client plugs in behind TransportFactory; until one is
    // linked, sessions run against the in-process loopback implementation.
    let factory: Arc<dyn TransportFactory> = Arc::new(LoopbackFactory::new());
    info!("Transport factory: loopback (no external chat client linked)");

    let fleet = FleetManager::new(Arc::new(config), bus.clone(), policy_store, factory);
    let result = fleet.run(consumer).await;

    if let Err(e) = bus.close() {
        error!(error = %e, "Error closing Kafka producers");
    }

    info!("Shutting down application...");
    result.context("Fleet manager failed")
}
