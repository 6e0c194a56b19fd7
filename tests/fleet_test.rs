mod test_utils;

use std::sync::Arc;

use async_trait::async_trait;

use recruit_gateway::config::{Config, KafkaConfig, PostgresConfig, TenantConfig, TopicConfig};
use recruit_gateway::fleet::FleetManager;
use recruit_gateway::identity::to_qualified;
use recruit_gateway::transport::loopback::{LoopbackFactory, LoopbackTransport};
use recruit_gateway::transport::{
    ChatTransport, DeviceIdentity, LogoutEvent, TransportError, TransportEvent, TransportFactory,
};

use test_utils::*;

fn topic(name: &str) -> TopicConfig {
    TopicConfig {
        topic: name.to_string(),
        group_id: String::new(),
    }
}

fn fleet_config(tenants: Vec<TenantConfig>, logs_dir: &str) -> Config {
    Config {
        kafka: KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            raw: topic("wa-raw"),
            ingest: topic("wa-ingest"),
            output: TopicConfig {
                topic: "wa-output".to_string(),
                group_id: "gateway-output".to_string(),
            },
            failed: topic("wa-failed"),
            admin: topic("wa-admin"),
        },
        whatsapp: tenants,
        postgres: PostgresConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "gateway".to_string(),
            user: "gateway".to_string(),
            password: "secret".to_string(),
            max_open_connection: 5,
            max_idle_connection: 2,
            connection_max_life_time: 30,
        },
        logger: recruit_gateway::config::LogConfig {
            file_path: logs_dir.to_string(),
            level: "info".to_string(),
        },
    }
}

fn make_fleet(
    tenants: Vec<TenantConfig>,
    factory: Arc<dyn TransportFactory>,
    logs_dir: &str,
) -> FleetManager {
    FleetManager::new(
        Arc::new(fleet_config(tenants, logs_dir)),
        Arc::new(RecordingPublisher::default()),
        StaticPolicyStore::enabled_with_count(0),
        factory,
    )
}

#[tokio::test]
async fn init_connects_enabled_tenants_only() {
    let logs = tempfile::tempdir().unwrap();
    let factory = Arc::new(LoopbackFactory::new());

    let mut disabled = tenant_config(APPLICANT);
    disabled.enable = false;

    let fleet = make_fleet(
        vec![tenant_config(TENANT), disabled],
        factory,
        logs.path().to_str().unwrap(),
    );
    fleet.init_all_sessions().await.unwrap();

    let registry = fleet.registry();
    assert_eq!(registry.len(), 1);
    assert!(registry.get(TENANT).is_some());
    assert!(registry.get(APPLICANT).is_none());
    assert!(registry.get(TENANT).unwrap().is_connected());
}

#[tokio::test]
async fn init_resumes_matching_stored_device() {
    let logs = tempfile::tempdir().unwrap();
    let factory = Arc::new(LoopbackFactory::new());
    factory.seed_device(format!("{TENANT}:7"));

    let fleet = make_fleet(
        vec![tenant_config(TENANT)],
        factory,
        logs.path().to_str().unwrap(),
    );
    fleet.init_all_sessions().await.unwrap();

    let supervisor = fleet.registry().get(TENANT).unwrap();
    assert_eq!(supervisor.store_id(), TENANT);
}

#[tokio::test]
async fn init_is_idempotent_per_tenant() {
    let logs = tempfile::tempdir().unwrap();
    let factory = Arc::new(LoopbackFactory::new());
    let fleet = make_fleet(
        vec![tenant_config(TENANT)],
        factory,
        logs.path().to_str().unwrap(),
    );

    fleet.init_all_sessions().await.unwrap();
    fleet.init_all_sessions().await.unwrap();
    assert_eq!(fleet.registry().len(), 1);
}

struct FailingFactory;

#[async_trait]
impl TransportFactory for FailingFactory {
    async fn stored_devices(&self) -> Result<Vec<DeviceIdentity>, TransportError> {
        Ok(Vec::new())
    }

    async fn open_session(
        &self,
        tenant_id: &str,
        _device: Option<&DeviceIdentity>,
        _os_label: &str,
    ) -> Result<Arc<dyn ChatTransport>, TransportError> {
        Err(TransportError::Session(format!(
            "no session for {tenant_id}"
        )))
    }
}

#[tokio::test]
async fn first_connect_failure_aborts_initialization() {
    let logs = tempfile::tempdir().unwrap();
    let fleet = make_fleet(
        vec![tenant_config(TENANT), tenant_config(APPLICANT)],
        Arc::new(FailingFactory),
        logs.path().to_str().unwrap(),
    );

    assert!(fleet.init_all_sessions().await.is_err());
    assert!(fleet.registry().is_empty());
}

#[tokio::test]
async fn logout_removes_tenant_from_registry() {
    let logs = tempfile::tempdir().unwrap();
    let factory = Arc::new(LoopbackFactory::new());
    let transport = LoopbackTransport::new(to_qualified(TENANT));
    factory.register(TENANT.to_string(), transport.clone());

    let fleet = make_fleet(
        vec![tenant_config(TENANT)],
        factory,
        logs.path().to_str().unwrap(),
    );
    fleet.init_all_sessions().await.unwrap();

    let supervisor = fleet.registry().get(TENANT).unwrap();
    supervisor
        .handle_transport_event(TransportEvent::LoggedOut(LogoutEvent {
            code: "401".to_string(),
            reason: "Removed from device".to_string(),
        }))
        .await;

    assert!(fleet.registry().get(TENANT).is_none());
    assert!(fleet.registry().is_empty());
}

#[tokio::test]
async fn snapshot_is_a_copy_of_the_registry() {
    let logs = tempfile::tempdir().unwrap();
    let factory = Arc::new(LoopbackFactory::new());
    let fleet = make_fleet(
        vec![tenant_config(TENANT)],
        factory,
        logs.path().to_str().unwrap(),
    );
    fleet.init_all_sessions().await.unwrap();

    let mut snapshot = fleet.all_supervisors();
    snapshot.clear();
    assert_eq!(fleet.registry().len(), 1);
}

#[tokio::test]
async fn disconnect_all_leaves_supervisors_registered() {
    let logs = tempfile::tempdir().unwrap();
    let factory = Arc::new(LoopbackFactory::new());
    let transport = LoopbackTransport::new(to_qualified(TENANT));
    factory.register(TENANT.to_string(), transport.clone());

    let fleet = make_fleet(
        vec![tenant_config(TENANT)],
        factory,
        logs.path().to_str().unwrap(),
    );
    fleet.init_all_sessions().await.unwrap();

    fleet.disconnect_all().await;

    let supervisor = fleet.registry().get(TENANT).unwrap();
    assert!(!supervisor.is_connected());
    assert_eq!(fleet.registry().len(), 1);
}
