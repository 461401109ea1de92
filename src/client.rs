//! Defines the PostgreSQL client used by the schema handler.

use crate::conf::HandlerConfig;
use async_trait::async_trait;
use core::time::Duration;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{instrument, warn};

/// The minimum time to wait between connection attempts, in
/// milliseconds.
const BASE_LAPSE_TIME: u64 = 200;

/// The base of the exponential backoff sequence.
const BACKOFF_BASE: u64 = 2;

/// The maximum amount of milliseconds to sleep between attempts.
const MAX_SLEEP: u64 = 5000;

/// Something that can open a session against the database.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Open a single session.
    async fn connect(&self) -> Result<Self::Session, sqlx::Error>;
}

/// An open database session. It must be closed explicitly; dropping
/// it only tears down the socket.
#[async_trait]
pub trait Session: Send + Sized {
    /// Run a statement that returns no rows.
    async fn execute(&mut self, statement: &str) -> Result<(), sqlx::Error>;

    /// Terminate the session gracefully.
    async fn close(self) -> Result<(), sqlx::Error>;
}

/// Opens plain PostgreSQL connections. Sessions carry server-side
/// statement and lock timeouts, so a statement that outlives its
/// bound is cancelled by the server itself.
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(config: &HandlerConfig) -> Self {
        let settings = &config.connection;
        let statement_timeout = format!("{}s", config.handler.statement_timeout_secs);
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database)
            .application_name("schema-creator")
            .options([
                ("statement_timeout", statement_timeout.as_str()),
                ("lock_timeout", statement_timeout.as_str()),
            ]);
        PgConnector { options }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Session = PgConnection;

    async fn connect(&self) -> Result<PgConnection, sqlx::Error> {
        self.options.connect().await
    }
}

#[async_trait]
impl Session for PgConnection {
    async fn execute(&mut self, statement: &str) -> Result<(), sqlx::Error> {
        sqlx::query(statement).execute(&mut *self).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        Connection::close(self).await
    }
}

/// Why a connection couldn't be established.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection attempt timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl ConnectError {
    /// Whether trying again could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectError::TimedOut(_) => true,
            ConnectError::Database(e) => is_transient(e),
        }
    }
}

/// Classify a database error as transient: network failures and the
/// server-side conditions that clear up on their own (connection
/// exceptions, insufficient resources, server starting up).
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(e) => e
            .code()
            .map(|code| code.starts_with("08") || code.starts_with("53") || code == "57P03")
            .unwrap_or(false),
        _ => false,
    }
}

/// How long to wait after the given (zero-based) failed attempt.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(std::cmp::min(
        BASE_LAPSE_TIME.saturating_mul(BACKOFF_BASE.saturating_pow(attempt)),
        MAX_SLEEP,
    ))
}

/// Open a session, bounding each attempt by `attempt_timeout` and
/// retrying transient failures up to `retries` times.
#[instrument(skip(connector))]
pub async fn connect<C: Connector>(
    connector: &C,
    attempt_timeout: Duration,
    retries: u32,
) -> Result<C::Session, ConnectError> {
    let mut attempt = 0;
    loop {
        let error = match timeout(attempt_timeout, connector.connect()).await {
            Ok(Ok(session)) => return Ok(session),
            Ok(Err(e)) => ConnectError::Database(e),
            Err(_) => ConnectError::TimedOut(attempt_timeout),
        };
        if attempt >= retries || !error.is_transient() {
            return Err(error);
        }
        let lapse = backoff(attempt);
        warn!(
            "Connection attempt {} failed, retrying in {:?}: {}",
            attempt + 1,
            lapse,
            error
        );
        sleep(lapse).await;
        attempt += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// What the fake database does on each call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Step {
        Ok,
        Refuse,
        Reject,
        Hang,
    }

    /// Calls observed by the fake database.
    #[derive(Debug, Default)]
    pub(crate) struct Journal {
        pub(crate) connects: usize,
        pub(crate) open: usize,
        pub(crate) closed: usize,
        pub(crate) statements: Vec<String>,
        pub(crate) schemas: Vec<String>,
    }

    pub(crate) fn refused() -> sqlx::Error {
        sqlx::Error::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }

    pub(crate) fn rejected() -> sqlx::Error {
        sqlx::Error::Protocol(String::from(
            "password authentication failed for user \"kaito_admin\"",
        ))
    }

    /// An in-memory stand-in for PostgreSQL that keeps a schema list.
    #[derive(Clone)]
    pub(crate) struct FakeConnector {
        pub(crate) journal: Arc<Mutex<Journal>>,
        connect_steps: Arc<Mutex<VecDeque<Step>>>,
        execute_step: Step,
        close_step: Step,
    }

    impl FakeConnector {
        pub(crate) fn new() -> Self {
            FakeConnector {
                journal: Arc::new(Mutex::new(Journal::default())),
                connect_steps: Arc::new(Mutex::new(VecDeque::new())),
                execute_step: Step::Ok,
                close_step: Step::Ok,
            }
        }

        /// Script the outcome of the next connection attempts; once
        /// the script runs out every attempt succeeds.
        pub(crate) fn connecting(self, steps: &[Step]) -> Self {
            self.connect_steps.lock().unwrap().extend(steps);
            self
        }

        pub(crate) fn executing(mut self, step: Step) -> Self {
            self.execute_step = step;
            self
        }

        pub(crate) fn closing(mut self, step: Step) -> Self {
            self.close_step = step;
            self
        }

        pub(crate) fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
            self.journal.lock().unwrap()
        }
    }

    pub(crate) struct FakeSession {
        journal: Arc<Mutex<Journal>>,
        execute_step: Step,
        close_step: Step,
    }

    async fn perform(step: Step, error: fn() -> sqlx::Error) -> Result<(), sqlx::Error> {
        match step {
            Step::Ok => Ok(()),
            Step::Refuse => Err(refused()),
            Step::Reject => Err(error()),
            Step::Hang => {
                sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Session = FakeSession;

        async fn connect(&self) -> Result<FakeSession, sqlx::Error> {
            self.journal().connects += 1;
            let step = self.connect_steps.lock().unwrap().pop_front();
            perform(step.unwrap_or(Step::Ok), rejected).await?;
            self.journal().open += 1;
            Ok(FakeSession {
                journal: self.journal.clone(),
                execute_step: self.execute_step,
                close_step: self.close_step,
            })
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn execute(&mut self, statement: &str) -> Result<(), sqlx::Error> {
            self.journal
                .lock()
                .unwrap()
                .statements
                .push(String::from(statement));
            perform(self.execute_step, || {
                sqlx::Error::Protocol(String::from("permission denied for database kaito"))
            })
            .await?;
            let schema = statement
                .trim_start_matches("CREATE SCHEMA IF NOT EXISTS ")
                .to_string();
            let mut journal = self.journal.lock().unwrap();
            if !journal.schemas.contains(&schema) {
                journal.schemas.push(schema);
            }
            Ok(())
        }

        async fn close(self) -> Result<(), sqlx::Error> {
            {
                let mut journal = self.journal.lock().unwrap();
                journal.open -= 1;
                journal.closed += 1;
            }
            perform(self.close_step, rejected).await
        }
    }

    #[test]
    fn sessions_are_bounded_by_the_server() {
        let config = HandlerConfig::from_vars(
            [
                ("DB_HOST", "db.internal"),
                ("DB_DATABASE", "kaito"),
                ("DB_USER", "kaito_admin"),
                ("DB_PASSWORD", "s3cret"),
                ("DB_SCHEMA", "tenant_42"),
                ("DB_STATEMENT_TIMEOUT_SECS", "7"),
            ]
            .iter()
            .map(|(k, v)| (String::from(*k), String::from(*v))),
        )
        .unwrap();
        let connector = PgConnector::new(&config);
        let options = connector.options.get_options().unwrap_or_default();

        assert!(options.contains("statement_timeout=7s"));
        assert!(options.contains("lock_timeout=7s"));
        assert_eq!(
            connector.options.get_application_name(),
            Some("schema-creator")
        );
    }

    #[test]
    fn backoff_grows_and_saturates() {
        assert_eq!(backoff(0), Duration::from_millis(200));
        assert_eq!(backoff(1), Duration::from_millis(400));
        assert_eq!(backoff(2), Duration::from_millis(800));
        assert_eq!(backoff(10), Duration::from_millis(MAX_SLEEP));
        assert_eq!(backoff(u32::MAX), Duration::from_millis(MAX_SLEEP));
    }

    #[test]
    fn network_errors_are_transient() {
        assert!(is_transient(&refused()));
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&rejected()));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let connector = FakeConnector::new().connecting(&[Step::Refuse, Step::Refuse]);
        let session = connect(&connector, Duration::from_secs(1), 2).await;

        assert!(session.is_ok());
        assert_eq!(connector.journal().connects, 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let connector = FakeConnector::new().connecting(&[Step::Refuse, Step::Refuse]);
        let error = connect(&connector, Duration::from_secs(1), 1)
            .await
            .err()
            .unwrap();

        assert!(matches!(error, ConnectError::Database(sqlx::Error::Io(_))));
        assert_eq!(connector.journal().connects, 2);
        assert_eq!(connector.journal().open, 0);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let connector = FakeConnector::new().connecting(&[Step::Reject]);
        let error = connect(&connector, Duration::from_secs(1), 3)
            .await
            .err()
            .unwrap();

        assert!(!error.is_transient());
        assert_eq!(connector.journal().connects, 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let connector = FakeConnector::new().connecting(&[Step::Hang]);
        let error = connect(&connector, Duration::from_millis(50), 0)
            .await
            .err()
            .unwrap();

        assert!(matches!(error, ConnectError::TimedOut(_)));
        assert_eq!(connector.journal().open, 0);
    }
}
