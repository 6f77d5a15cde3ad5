//! MongoDB Backend Implementation
//!
//! Real adapter over the `mongodb` driver. Pool sizing and the timeout
//! family come from [`DatabaseConfig`]; connectivity is verified with an
//! admin ping before the connection is handed out, and every driver error
//! is classified into the taxonomy at this boundary.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::ClientOptions;
use mongodb::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtrack_core::DatabaseConfig;
use uuid::Uuid;

use super::core::{ConnectionStatus, Connector, DocumentConnection, StatusCell};
use crate::error::{classify, DbError, DbResult, ErrorCode};
use crate::uri::sanitize_uri;

/// Connector establishing real MongoDB connections
#[derive(Debug, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(
        &self,
        uri: &str,
        config: &DatabaseConfig,
    ) -> DbResult<Arc<dyn DocumentConnection>> {
        let connection = MongoConnection::establish(uri, config).await?;
        Ok(Arc::new(connection))
    }
}

/// A live MongoDB client satisfying the connection contract
pub struct MongoConnection {
    id: String,
    client: Client,
    db_name: String,
    status: StatusCell,
}

impl MongoConnection {
    /// Parse options, connect, and verify with an admin ping
    pub async fn establish(uri: &str, config: &DatabaseConfig) -> DbResult<Self> {
        tracing::debug!(uri = %sanitize_uri(uri), "Establishing MongoDB connection");

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| classify_driver_error(&e, Some("parse connection string")))?;

        options.max_pool_size = Some(config.max_pool_size);
        options.min_pool_size = Some(config.min_pool_size);
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.server_selection_timeout);

        let client = Client::with_options(options)
            .map_err(|e| classify_driver_error(&e, Some("build client")))?;

        let connection = Self {
            id: format!("mongo-{}", Uuid::new_v4()),
            client,
            db_name: config.db_name.clone(),
            status: StatusCell::new(ConnectionStatus::Connecting),
        };

        // The client connects lazily; force a round trip so failures
        // surface here rather than on the first query.
        connection
            .client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                connection.status.set(ConnectionStatus::Error);
                classify_driver_error(&e, Some("verify connection"))
            })?;

        connection.status.set(ConnectionStatus::Connected);
        tracing::info!(
            id = %connection.id,
            db = %connection.db_name,
            "MongoDB connection established"
        );
        Ok(connection)
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.client.database(&self.db_name).collection::<Document>(name)
    }
}

#[async_trait]
impl DocumentConnection for MongoConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    async fn ping(&self) -> DbResult<Duration> {
        let started = Instant::now();
        match self
            .client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
        {
            Ok(_) => {
                self.status.set(ConnectionStatus::Connected);
                Ok(started.elapsed())
            }
            Err(e) => {
                self.status.set(ConnectionStatus::Error);
                Err(classify_driver_error(&e, Some("ping")))
            }
        }
    }

    async fn find_all(&self, collection: &str, filter: Document) -> DbResult<Vec<Document>> {
        let cursor = self
            .collection(collection)
            .find(filter, None)
            .await
            .map_err(|e| classify_driver_error(&e, Some(collection)))?;

        cursor
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| classify_driver_error(&e, Some(collection)))
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DbResult<String> {
        let result = self
            .collection(collection)
            .insert_one(document, None)
            .await
            .map_err(|e| classify_driver_error(&e, Some(collection)))?;

        Ok(match result.inserted_id {
            Bson::ObjectId(oid) => oid.to_hex(),
            other => other.to_string(),
        })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbResult<u64> {
        let result = self
            .collection(collection)
            .update_one(filter, update, None)
            .await
            .map_err(|e| classify_driver_error(&e, Some(collection)))?;

        Ok(result.modified_count)
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DbResult<u64> {
        let result = self
            .collection(collection)
            .delete_one(filter, None)
            .await
            .map_err(|e| classify_driver_error(&e, Some(collection)))?;

        Ok(result.deleted_count)
    }

    async fn server_status(&self) -> DbResult<Document> {
        self.client
            .database("admin")
            .run_command(doc! { "serverStatus": 1 }, None)
            .await
            .map_err(|e| classify_driver_error(&e, Some("serverStatus")))
    }

    async fn close(&self) -> DbResult<()> {
        self.status.set(ConnectionStatus::Closed);
        self.client.clone().shutdown().await;
        tracing::debug!(id = %self.id, "MongoDB connection closed");
        Ok(())
    }
}

/// Classify a driver error, preferring structured error kinds over
/// message-signature matching
pub(crate) fn classify_driver_error(error: &MongoError, context: Option<&str>) -> DbError {
    let code = match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000 => {
            Some(ErrorCode::DuplicateKey)
        }
        ErrorKind::Command(command_error) if command_error.code == 11000 => {
            Some(ErrorCode::DuplicateKey)
        }
        ErrorKind::Authentication { .. } => Some(ErrorCode::AuthFailed),
        ErrorKind::InvalidArgument { .. } => Some(ErrorCode::InvalidUri),
        ErrorKind::ServerSelection { .. } => Some(ErrorCode::ConnectionTimeout),
        ErrorKind::Io(_) => Some(ErrorCode::ConnectionFailed),
        _ => None,
    };

    match code {
        Some(ErrorCode::ConnectionTimeout) => DbError::timeout().with_cause(error.to_string()),
        Some(code) => {
            let raw = error.to_string();
            let message = match context {
                Some(ctx) => format!("{}: {}", ctx, raw),
                None => raw.clone(),
            };
            DbError::new(code, message).with_cause(raw)
        }
        // Fall back to message-signature classification
        None => classify(error, context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Driver error kinds cannot be constructed outside the driver crate, so
    // classification is exercised through real parse failures (no network).

    #[tokio::test]
    async fn test_parse_failure_classified_as_invalid_uri() {
        let error = ClientOptions::parse("definitely not a connection string")
            .await
            .unwrap_err();

        let classified = classify_driver_error(&error, Some("parse connection string"));
        assert_eq!(classified.code, ErrorCode::InvalidUri);
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_context() {
        let error = ClientOptions::parse("mongodb://").await.unwrap_err();

        let classified = classify_driver_error(&error, Some("parse connection string"));
        assert_eq!(classified.code, ErrorCode::InvalidUri);
        assert!(classified.cause.is_some());
    }
}
