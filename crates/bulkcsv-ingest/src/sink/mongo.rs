//! MongoDB sink

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Document as BsonDocument};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::{info, warn};

use super::{redact_endpoint, DocumentSink, SinkConfig, SinkError, StoreAck, StoreError};
use crate::document::Document;

const APP_NAME: &str = "bulkcsv-ingest";

pub struct MongoSink {
    client: Client,
    collection: Collection<BsonDocument>,
    target: String,
    store_timeout: Duration,
}

impl MongoSink {
    /// Connect and ping, both bounded by `config.connect_timeout`
    pub async fn connect(config: &SinkConfig) -> Result<Self, SinkError> {
        let endpoint = redact_endpoint(&config.endpoint);
        let connect_error = |reason: String| SinkError::Connect {
            endpoint: endpoint.clone(),
            reason,
        };

        let mut options = ClientOptions::parse(&config.endpoint)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);

        let client = Client::with_options(options).map_err(|e| connect_error(e.to_string()))?;

        let admin = client.database("admin");
        let ping = admin.run_command(doc! { "ping": 1 });
        let outcome = match tokio::time::timeout(config.connect_timeout, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SinkError::Ping {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(SinkError::ConnectTimeout {
                endpoint: endpoint.clone(),
                timeout: config.connect_timeout,
            }),
        };
        if let Err(e) = outcome {
            client.shutdown().await;
            return Err(e);
        }

        let collection = client
            .database(&config.namespace)
            .collection::<BsonDocument>(&config.collection);

        Ok(Self {
            client,
            collection,
            target: config.target(),
            store_timeout: config.store_timeout,
        })
    }
}

/// Field order follows the header
pub fn to_bson(document: &Document) -> BsonDocument {
    let mut bson = BsonDocument::new();
    for (name, value) in document.iter() {
        bson.insert(name, value);
    }
    bson
}

#[async_trait]
impl DocumentSink for MongoSink {
    async fn store(&self, document: &Document) -> Result<StoreAck, StoreError> {
        let insert = self.collection.insert_one(to_bson(document));
        match tokio::time::timeout(self.store_timeout, insert).await {
            Ok(Ok(result)) => Ok(StoreAck {
                id: Some(result.inserted_id.to_string()),
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
        format!("mongodb {}", self.target)
    }

    async fn close(&self) {
        info!(destination = %self.target, "Disconnecting from MongoDB");
        let shutdown = self.client.clone().shutdown();
        if tokio::time::timeout(self.store_timeout, shutdown).await.is_err() {
            warn!(destination = %self.target, "Timed out disconnecting from MongoDB");
        } else {
            info!("Disconnected from MongoDB");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::document::transform;

    #[test]
    fn test_to_bson_keeps_header_order() {
        let header = vec!["ID".to_string(), "Name".to_string(), "Value".to_string()];
        let row = vec!["1".to_string(), "First".to_string(), "100".to_string()];
        let bson = to_bson(&transform(&header, &row).unwrap());

        let keys: Vec<&str> = bson.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ID", "Name", "Value"]);
        assert_eq!(bson.get_str("Name").unwrap(), "First");
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_uri() {
        let config = SinkConfig::new("mongodb://", "db", "coll");
        let err = MongoSink::connect(&config).await.err().unwrap();
        assert!(matches!(err, SinkError::Connect { .. }));
    }
}
