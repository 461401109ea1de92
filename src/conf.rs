//! Defines configuration as read from the environment.
//!
//! Both binaries read their settings once at startup, validate them,
//! and pass the resulting structs explicitly to the code that needs
//! them. Nothing else in the crate looks at the process environment.

use crate::schema::SchemaName;
use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

/// Labels of the instances declared by the descriptor. Each label
/// selects the `INSTANCE_<label>_` prefix for per-instance variables.
pub const INSTANCE_LABELS: [&str; 2] = ["1", "2"];

/// Default `db_port` value.
fn default_db_port() -> u16 {
    5432
}

/// Default `connect_timeout_secs` value.
fn default_connect_timeout_secs() -> u64 {
    5
}

/// Default `statement_timeout_secs` value.
fn default_statement_timeout_secs() -> u64 {
    10
}

/// Default `connect_retries` value.
fn default_connect_retries() -> u32 {
    2
}

/// Default `project_prefix` value.
fn default_project_prefix() -> String {
    String::from("Kaito")
}

/// Default `function_code_key` value.
fn default_function_code_key() -> String {
    String::from("schema-creator.zip")
}

/// Default `function_timeout_secs` value.
fn default_function_timeout_secs() -> u32 {
    30
}

/// Default `function_memory_mb` value.
fn default_function_memory_mb() -> u32 {
    128
}

/// Default `instance_type` value.
fn default_instance_type() -> String {
    String::from("t3.medium")
}

/// Default `root_volume_type` value.
fn default_root_volume_type() -> String {
    String::from("gp3")
}

/// Default `root_volume_size` value.
fn default_root_volume_size() -> u32 {
    30
}

/// Default `root_volume_iops` value.
fn default_root_volume_iops() -> u32 {
    3000
}

/// Parameters for connecting to the PostgreSQL database. Shared by
/// the handler, which connects with them, and the descriptor, which
/// passes them on to the function and the application environment.
#[derive(Clone, Deserialize)]
pub struct ConnectionSettings {
    /// Database host name.
    #[serde(rename = "db_host")]
    pub host: String,

    /// Name of the database to connect to.
    #[serde(rename = "db_database")]
    pub database: String,

    /// Role used to authenticate.
    #[serde(rename = "db_user")]
    pub user: String,

    /// Password of the role.
    #[serde(rename = "db_password")]
    pub password: String,

    /// Database port.
    #[serde(rename = "db_port", default = "default_db_port")]
    pub port: u16,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

impl ConnectionSettings {
    fn validate(&self) -> Result<()> {
        require("DB_HOST", &self.host)?;
        require("DB_DATABASE", &self.database)?;
        require("DB_USER", &self.user)?;
        if self.port == 0 {
            bail!("DB_PORT must be a positive port number");
        }
        Ok(())
    }
}

/// Settings specific to the schema-creation handler.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerSettings {
    /// Name of the schema to ensure. Validated on each invocation so
    /// that a malformed name turns into a failure response.
    #[serde(rename = "db_schema")]
    pub schema: String,

    /// Upper bound for establishing the connection, per attempt.
    #[serde(
        rename = "db_connect_timeout_secs",
        default = "default_connect_timeout_secs"
    )]
    pub connect_timeout_secs: u64,

    /// Upper bound for running the schema statement.
    #[serde(
        rename = "db_statement_timeout_secs",
        default = "default_statement_timeout_secs"
    )]
    pub statement_timeout_secs: u64,

    /// How many times a transient connection failure is retried.
    #[serde(rename = "db_connect_retries", default = "default_connect_retries")]
    pub connect_retries: u32,
}

/// Complete configuration of the schema-creation handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub connection: ConnectionSettings,
    pub handler: HandlerSettings,
}

impl HandlerConfig {
    /// Read and validate the handler configuration from the process
    /// environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Read and validate the handler configuration from the given
    /// variables.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let config = HandlerConfig {
            connection: envy::from_iter(vars.clone())
                .context("Invalid database connection settings")?,
            handler: envy::from_iter(vars).context("Invalid schema handler settings")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values that envy can't check by itself.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        if self.handler.connect_timeout_secs == 0 {
            bail!("DB_CONNECT_TIMEOUT_SECS must be greater than zero");
        }
        if self.handler.statement_timeout_secs == 0 {
            bail!("DB_STATEMENT_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }
}

/// Permissions granted to the compute instances of an application
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolePolicy {
    /// The web-tier managed policy plus an inline policy granting
    /// object access to the instance's own bucket only.
    Scoped,
    /// The web-tier managed policy plus full S3 access to every
    /// bucket of the account.
    Managed,
}

fn default_role_policy() -> RolePolicy {
    RolePolicy::Scoped
}

/// Settings shared by every declared instance.
#[derive(Debug, Clone, Deserialize)]
pub struct StackSettings {
    /// Prefix for the stack name and the default function names.
    #[serde(default = "default_project_prefix")]
    pub project_prefix: String,

    /// Region the stack is deployed to.
    pub aws_region: String,

    /// Platform ARN used by environments that don't override it.
    pub platform_arn: String,

    /// Bucket holding the packaged schema-creation function.
    pub function_code_bucket: String,

    /// Object key of the packaged schema-creation function.
    #[serde(default = "default_function_code_key")]
    pub function_code_key: String,

    #[serde(default = "default_function_timeout_secs")]
    pub function_timeout_secs: u32,

    #[serde(default = "default_function_memory_mb")]
    pub function_memory_mb: u32,

    /// Permissions attached to the environment instance role.
    #[serde(default = "default_role_policy")]
    pub instance_role_policy: RolePolicy,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    #[serde(default = "default_root_volume_type")]
    pub root_volume_type: String,

    #[serde(default = "default_root_volume_size")]
    pub root_volume_size: u32,

    #[serde(default = "default_root_volume_iops")]
    pub root_volume_iops: u32,
}

impl StackSettings {
    /// Name of the stack the template is meant to be deployed as.
    pub fn stack_name(&self) -> String {
        format!("{}-pipeline-stack", self.project_prefix)
    }
}

/// Application runtime variables handed through to every environment
/// unchanged.
#[derive(Clone, Deserialize)]
pub struct RuntimeSettings {
    pub app_name: String,
    pub environment: String,
    pub kc_admin_client_id: String,
    pub kc_admin_client_secret: String,
    pub kc_base_url: String,
    pub kc_client_id: String,
    pub kc_client_secret: String,
    pub kc_client_uuid: String,
    pub kc_realm: String,
    pub node_env: String,
    pub port: String,
    pub sendgrid_api_key: String,
    pub sendgrid_sender_email_id: String,
}

impl fmt::Debug for RuntimeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeSettings")
            .field("app_name", &self.app_name)
            .field("environment", &self.environment)
            .field("node_env", &self.node_env)
            .finish_non_exhaustive()
    }
}

impl RuntimeSettings {
    /// The pass-through variables, by the name the application reads
    /// them with.
    pub fn variables(&self) -> [(&'static str, &str); 13] {
        [
            ("APP_NAME", &self.app_name),
            ("ENVIRONMENT", &self.environment),
            ("KC_ADMIN_CLIENT_ID", &self.kc_admin_client_id),
            ("KC_ADMIN_CLIENT_SECRET", &self.kc_admin_client_secret),
            ("KC_BASE_URL", &self.kc_base_url),
            ("KC_CLIENT_ID", &self.kc_client_id),
            ("KC_CLIENT_SECRET", &self.kc_client_secret),
            ("KC_CLIENT_UUID", &self.kc_client_uuid),
            ("KC_REALM", &self.kc_realm),
            ("NODE_ENV", &self.node_env),
            ("PORT", &self.port),
            ("SENDGRID_API_KEY", &self.sendgrid_api_key),
            ("SENDGRID_SENDER_EMAIL_ID", &self.sendgrid_sender_email_id),
        ]
    }
}

/// Settings of one declared instance, read from variables prefixed
/// with `INSTANCE_<label>_`.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSettings {
    /// The instance label; not read from the environment.
    #[serde(skip)]
    pub label: String,

    pub bucket_name: String,

    pub eb_app_name: String,

    pub eb_env_name: String,

    /// Schema created by this instance's function.
    pub db_schema: String,

    /// Overrides the shared platform ARN.
    #[serde(default)]
    pub platform_arn: Option<String>,

    /// Overrides the default function name.
    #[serde(default)]
    pub function_name: Option<String>,
}

impl InstanceSettings {
    /// The platform ARN used by this instance's environment.
    pub fn platform_arn<'a>(&'a self, stack: &'a StackSettings) -> &'a str {
        self.platform_arn
            .as_deref()
            .filter(|arn| !arn.is_empty())
            .unwrap_or(&stack.platform_arn)
    }

    /// The name of this instance's schema-creation function.
    pub fn function_name(&self, stack: &StackSettings) -> String {
        self.function_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("{}-SchemaCreator-{}", stack.project_prefix, self.label))
    }
}

/// Complete input of the deployment descriptor.
#[derive(Debug, Clone)]
pub struct DescriptorConfig {
    pub stack: StackSettings,
    pub connection: ConnectionSettings,
    pub runtime: RuntimeSettings,
    pub instances: Vec<InstanceSettings>,
}

impl DescriptorConfig {
    /// Read and validate the descriptor configuration from the
    /// process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Read and validate the descriptor configuration from the given
    /// variables. Fails on the first absent or malformed input.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let stack = envy::from_iter(vars.clone()).context("Invalid stack settings")?;
        let connection =
            envy::from_iter(vars.clone()).context("Invalid database connection settings")?;
        let runtime =
            envy::from_iter(vars.clone()).context("Invalid application runtime settings")?;
        let mut instances = Vec::with_capacity(INSTANCE_LABELS.len());
        for label in INSTANCE_LABELS {
            let prefix = format!("INSTANCE_{}_", label);
            let mut instance: InstanceSettings = envy::prefixed(prefix.as_str())
                .from_iter(vars.clone())
                .with_context(|| format!("Invalid {}* settings", prefix))?;
            instance.label = String::from(label);
            instances.push(instance);
        }
        let config = DescriptorConfig {
            stack,
            connection,
            runtime,
            instances,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values that envy can't check by itself.
    pub fn validate(&self) -> Result<()> {
        require("AWS_REGION", &self.stack.aws_region)?;
        require("PLATFORM_ARN", &self.stack.platform_arn)?;
        require("FUNCTION_CODE_BUCKET", &self.stack.function_code_bucket)?;
        require("FUNCTION_CODE_KEY", &self.stack.function_code_key)?;
        require("PROJECT_PREFIX", &self.stack.project_prefix)?;
        self.connection.validate()?;
        if self.instances.is_empty() {
            bail!("At least one instance must be declared");
        }

        let bucket_name_re = Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$")?;
        for instance in &self.instances {
            let var = |name: &str| format!("INSTANCE_{}_{}", instance.label, name);
            if !bucket_name_re.is_match(&instance.bucket_name) {
                bail!(
                    "{} is not a valid bucket name: {:?}",
                    var("BUCKET_NAME"),
                    instance.bucket_name
                );
            }
            require(&var("EB_APP_NAME"), &instance.eb_app_name)?;
            require(&var("EB_ENV_NAME"), &instance.eb_env_name)?;
            SchemaName::parse(&instance.db_schema)
                .with_context(|| format!("{} is not a valid schema name", var("DB_SCHEMA")))?;
        }

        unique(
            "bucket names",
            self.instances.iter().map(|i| i.bucket_name.clone()),
        )?;
        unique(
            "application names",
            self.instances.iter().map(|i| i.eb_app_name.clone()),
        )?;
        unique(
            "environment names",
            self.instances.iter().map(|i| i.eb_env_name.clone()),
        )?;
        unique(
            "function names",
            self.instances.iter().map(|i| i.function_name(&self.stack)),
        )?;
        Ok(())
    }
}

/// Fail if a required value is empty.
fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{} must not be empty", name);
    }
    Ok(())
}

/// Fail if any of the values is repeated.
fn unique(what: &str, values: impl Iterator<Item = String>) -> Result<()> {
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<String> = values.filter(|v| !seen.insert(v.clone())).collect();
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "Instances must not share {}: {}",
            what,
            duplicates.iter().join(", ")
        ))
    }
}
