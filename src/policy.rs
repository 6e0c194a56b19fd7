use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PostgresConfig;
use crate::error::GatewayResult;

pub type DbPool = Pool<Postgres>;

/// Per-pair policy row from the external store. A missing row is not an
/// error; it synthesizes to the defaults below (enabled, zero count).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PairPolicy {
    pub recruiter_id: String,
    pub applicant_id: String,
    pub enabled: bool,
    pub message_count: i32,
}

impl PairPolicy {
    /// Defaults for a pair the store has not tracked yet.
    pub fn default_for(recruiter_id: &str, applicant_id: &str) -> Self {
        Self {
            recruiter_id: recruiter_id.to_string(),
            applicant_id: applicant_id.to_string(),
            enabled: true,
            message_count: 0,
        }
    }
}

/// Read side of the policy store. Errors signal driver/connection trouble
/// only; callers log them and fall back to [`PairPolicy::default_for`].
#[async_trait]
pub trait PolicyLookup: Send + Sync {
    async fn lookup(&self, recruiter_id: &str, applicant_id: &str) -> GatewayResult<PairPolicy>;
}

pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PolicyLookup for PgPolicyStore {
    async fn lookup(&self, recruiter_id: &str, applicant_id: &str) -> GatewayResult<PairPolicy> {
        let row = sqlx::query_as::<_, PairPolicy>(
            r#"
            SELECT recruiter_id, applicant_id, enabled, message_count
            FROM configs
            WHERE recruiter_id = $1 AND applicant_id = $2
            "#,
        )
        .bind(recruiter_id)
        .bind(applicant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(policy) => {
                debug!(
                    recruiter = %recruiter_id,
                    applicant = %applicant_id,
                    enabled = policy.enabled,
                    message_count = policy.message_count,
                    "Pair policy loaded"
                );
                policy
            }
            None => {
                debug!(
                    recruiter = %recruiter_id,
                    applicant = %applicant_id,
                    "No pair policy row, using defaults"
                );
                PairPolicy::default_for(recruiter_id, applicant_id)
            }
        })
    }
}

/// Build the Postgres pool with the configured connection limits.
pub async fn create_pool(config: &PostgresConfig, url: &str) -> GatewayResult<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_open_connection)
        .min_connections(config.max_idle_connection)
        .max_lifetime(Duration::from_secs(config.connection_max_life_time * 60))
        .connect(url)
        .await?;
    info!("PostgreSQL pool initialized");
    Ok(pool)
}
