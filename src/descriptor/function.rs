//! Declares the schema-creation function of an instance.

use super::template::{logical_id, Reference, Resource, Template};
use crate::conf::{DescriptorConfig, InstanceSettings};
use anyhow::Result;
use serde_json::{json, Map, Value};

const BASIC_EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Entry point of a custom-runtime function: the packaged binary.
pub const ENTRY_POINT: &str = "bootstrap";

/// Runtime the packaged binary runs on.
pub const RUNTIME: &str = "provided.al2023";

/// The variables the function reads its configuration from.
pub fn function_environment(
    config: &DescriptorConfig,
    instance: &InstanceSettings,
) -> Map<String, Value> {
    let connection = &config.connection;
    let mut variables = Map::new();
    variables.insert("DB_HOST".into(), connection.host.clone().into());
    variables.insert("DB_DATABASE".into(), connection.database.clone().into());
    variables.insert("DB_USER".into(), connection.user.clone().into());
    variables.insert("DB_PASSWORD".into(), connection.password.clone().into());
    variables.insert("DB_PORT".into(), connection.port.to_string().into());
    variables.insert("DB_SCHEMA".into(), instance.db_schema.clone().into());
    variables
}

/// Declare the function and the role it executes with.
pub fn declare_function(
    template: &mut Template,
    instance: &InstanceSettings,
    config: &DescriptorConfig,
) -> Result<Reference> {
    let label = &instance.label;
    let role = template.declare(
        logical_id("SchemaCreatorRole", label),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "Service": ["lambda.amazonaws.com"] },
                        "Action": ["sts:AssumeRole"],
                    }],
                },
                "ManagedPolicyArns": [BASIC_EXECUTION_POLICY_ARN],
            }),
        ),
    )?;

    let stack = &config.stack;
    template.declare(
        logical_id("SchemaCreator", label),
        Resource::new(
            "AWS::Lambda::Function",
            json!({
                "FunctionName": instance.function_name(stack),
                "Handler": ENTRY_POINT,
                "Runtime": RUNTIME,
                "Architectures": ["arm64"],
                "Code": {
                    "S3Bucket": stack.function_code_bucket,
                    "S3Key": stack.function_code_key,
                },
                "MemorySize": stack.function_memory_mb,
                "Timeout": stack.function_timeout_secs,
                "Role": role.attribute("Arn"),
                "Environment": { "Variables": function_environment(config, instance) },
            }),
        ),
    )
}
