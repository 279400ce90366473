//! Postgres JSONB sink
//!
//! Each collection is a table holding one JSONB document per row:
//!
//! ```sql
//! CREATE TABLE "<namespace>"."<collection>" (
//!     id BIGSERIAL PRIMARY KEY,
//!     document JSONB NOT NULL,
//!     inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! )
//! ```

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::info;

use super::{redact_endpoint, DocumentSink, SinkConfig, SinkError, StoreAck, StoreError};
use crate::document::Document;

pub struct PostgresSink {
    pool: PgPool,
    insert_sql: String,
    target: String,
    store_timeout: Duration,
}

/// Schema and table names are interpolated into DDL, so keep them plain
fn checked_identifier(name: &str) -> Result<&str, SinkError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(name)
    } else {
        Err(SinkError::InvalidIdentifier(name.to_string()))
    }
}

impl PostgresSink {
    pub async fn connect(config: &SinkConfig) -> Result<Self, SinkError> {
        let schema = checked_identifier(&config.namespace)?;
        let table = checked_identifier(&config.collection)?;
        let endpoint = redact_endpoint(&config.endpoint);

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.endpoint);
        let pool = match tokio::time::timeout(config.connect_timeout, pool).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                return Err(SinkError::Connect {
                    endpoint,
                    reason: e.to_string(),
                })
            },
            Err(_) => {
                return Err(SinkError::ConnectTimeout {
                    endpoint,
                    timeout: config.connect_timeout,
                })
            },
        };

        let ddl = [
            format!(r#"CREATE SCHEMA IF NOT EXISTS "{schema}""#),
            format!(
                r#"CREATE TABLE IF NOT EXISTS "{schema}"."{table}" (
                    id BIGSERIAL PRIMARY KEY,
                    document JSONB NOT NULL,
                    inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )"#
            ),
        ];
        for statement in &ddl {
            if let Err(e) = sqlx::query(statement).execute(&pool).await {
                pool.close().await;
                return Err(SinkError::Prepare {
                    endpoint,
                    target: config.target(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(Self {
            pool,
            insert_sql: format!(
                r#"INSERT INTO "{schema}"."{table}" (document) VALUES ($1) RETURNING id"#
            ),
            target: config.target(),
            store_timeout: config.store_timeout,
        })
    }
}

#[async_trait]
impl DocumentSink for PostgresSink {
    async fn store(&self, document: &Document) -> Result<StoreAck, StoreError> {
        let insert = sqlx::query_scalar::<_, i64>(&self.insert_sql)
            .bind(Json(document))
            .fetch_one(&self.pool);

        match tokio::time::timeout(self.store_timeout, insert).await {
            Ok(Ok(id)) => Ok(StoreAck {
                id: Some(id.to_string()),
            }),
            Ok(Err(e)) => Err(StoreError::Rejected {
                target: self.target.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(StoreError::Timeout {
                target: self.target.clone(),
                timeout: self.store_timeout,
            }),
        }
    }

    fn describe(&self) -> String {
        format!("postgres {}", self.target)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!(destination = %self.target, "Closed Postgres pool");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_identifier() {
        assert_eq!(checked_identifier("processed_data").unwrap(), "processed_data");
        assert!(checked_identifier("").is_err());
        assert!(checked_identifier("rows\"; DROP TABLE x; --").is_err());
        assert!(checked_identifier("has space").is_err());
        assert!(checked_identifier(&"x".repeat(64)).is_err());
    }
}
