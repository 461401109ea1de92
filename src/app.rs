//! Defines the schema-creation handler: its validated state and the
//! single operation it performs per invocation.

use crate::client::{self, ConnectError, Connector, Session};
use crate::conf::HandlerConfig;
use crate::schema::{SchemaName, SchemaNameError};
use anyhow::Result;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

/// How long a graceful close may take before the connection is
/// simply dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Extra time given to the server to cancel a statement on its own
/// before the client stops waiting for it.
const STATEMENT_GRACE: Duration = Duration::from_secs(1);

/// The phase an invocation was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Executing,
}

/// Everything that can make an invocation fail.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid schema name: {0}")]
    InvalidSchemaName(#[from] SchemaNameError),

    #[error("failed to connect to the database: {0}")]
    Connect(#[from] ConnectError),

    #[error("failed to create schema {schema:?}: {source}")]
    Execute {
        schema: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("creating schema {schema:?} timed out after {after:?}")]
    ExecuteTimedOut { schema: String, after: Duration },
}

impl HandlerError {
    pub fn phase(&self) -> Phase {
        match self {
            HandlerError::Connect(_) => Phase::Connecting,
            HandlerError::InvalidSchemaName(_)
            | HandlerError::Execute { .. }
            | HandlerError::ExecuteTimedOut { .. } => Phase::Executing,
        }
    }
}

/// The result returned to the invoking platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl Response {
    fn success(schema: &SchemaName) -> Self {
        Response {
            status_code: 200,
            body: json!({
                "message": format!("Schema \"{}\" created successfully!", schema),
            })
            .to_string(),
        }
    }

    fn failure(error: &HandlerError) -> Self {
        Response {
            status_code: 500,
            body: json!({
                "error": "Error creating schema",
                "details": error.to_string(),
            })
            .to_string(),
        }
    }
}

/// An App is an initialized handler state, derived from a validated
/// configuration. It is built once per cold start and shared by every
/// invocation.
pub struct App {
    /// The original configuration.
    pub config: HandlerConfig,
}

impl App {
    /// Initialize an App instance given its configuration. Consumes
    /// the configuration.
    pub fn new(config: HandlerConfig) -> Result<Self> {
        config.validate()?;
        Ok(App { config })
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.handler.connect_timeout_secs)
    }

    /// The client-side bound on the schema statement. The server
    /// enforces the configured timeout; this only covers a server
    /// that stops answering.
    fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.config.handler.statement_timeout_secs) + STATEMENT_GRACE
    }

    /// Handle one invocation. Never fails: every error becomes a
    /// failure response.
    #[instrument(skip_all, fields(schema = %self.config.handler.schema))]
    pub async fn handle<C: Connector>(&self, connector: &C) -> Response {
        match self.ensure_schema(connector).await {
            Ok(schema) => {
                info!("Schema {} created successfully", schema.quoted());
                Response::success(&schema)
            }
            Err(e) => {
                error!(phase = ?e.phase(), "Error creating schema: {}", e);
                Response::failure(&e)
            }
        }
    }

    /// Make sure the configured schema exists. The connection, once
    /// open, is closed before returning on every path.
    pub async fn ensure_schema<C: Connector>(
        &self,
        connector: &C,
    ) -> Result<SchemaName, HandlerError> {
        let schema = SchemaName::parse(&self.config.handler.schema)?;
        let mut session = client::connect(
            connector,
            self.connect_timeout(),
            self.config.handler.connect_retries,
        )
        .await?;

        let statement = schema.create_statement();
        let outcome = match timeout(self.statement_timeout(), session.execute(&statement)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(HandlerError::Execute {
                schema: schema.to_string(),
                source,
            }),
            Err(_) => Err(HandlerError::ExecuteTimedOut {
                schema: schema.to_string(),
                after: self.statement_timeout(),
            }),
        };

        match timeout(CLOSE_TIMEOUT, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Couldn't close the database connection cleanly: {}", e),
            Err(_) => warn!("Closing the database connection timed out; dropped it instead"),
        }

        outcome.map(|()| schema)
    }
}
