use anyhow::{anyhow, Result};
use kaito_infra::app::{App, Response};
use kaito_infra::client::PgConnector;
use kaito_infra::conf::HandlerConfig;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

/// Run an AWS Lambda function that makes sure the configured schema
/// exists in the configured PostgreSQL database. The invocation
/// payload is ignored.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    let app = App::new(HandlerConfig::from_env()?)?;
    let connector = PgConnector::new(&app.config);

    let app = &app;
    let connector = &connector;
    run(service_fn(move |_event: LambdaEvent<Value>| async move {
        Ok::<Response, Error>(app.handle(connector).await)
    }))
    .await
    .map_err(|e| anyhow!("{:?}", e))
}
