//! The deployment descriptor: turns a validated configuration into
//! the static infrastructure template. Evaluation is pure; applying
//! the template is left to CloudFormation.

pub mod bucket;
pub mod distribution;
pub mod function;
pub mod options;
pub mod platform;
pub mod template;

use crate::conf::DescriptorConfig;
use crate::sign::{compute_signatures, find_signature_differences};
use anyhow::{Context, Result};
use std::io;
use std::path::Path;
use template::Template;
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Evaluate the descriptor: declare every instance's resources and
/// the outputs referencing them.
#[instrument(skip_all, fields(stack = %config.stack.stack_name()))]
pub fn synthesize(config: &DescriptorConfig) -> Result<Template> {
    let description = format!("{} application stack", config.stack.project_prefix);
    let mut template = Template::new(description);
    for instance in &config.instances {
        let label = &instance.label;
        let bucket = bucket::declare_bucket(&mut template, instance)
            .with_context(|| format!("Failed to declare the bucket of instance {}", label))?;
        let platform = platform::declare_platform(&mut template, instance, &bucket, config)
            .with_context(|| format!("Failed to declare the platform of instance {}", label))?;
        let distribution =
            distribution::declare_distribution(&mut template, instance, &platform.environment)
                .with_context(|| {
                    format!("Failed to declare the distribution of instance {}", label)
                })?;
        let function = function::declare_function(&mut template, instance, config)
            .with_context(|| format!("Failed to declare the function of instance {}", label))?;

        template.output(
            format!("BucketName{}", label),
            "Name of the instance's storage bucket",
            bucket.id(),
        )?;
        template.output(
            format!("ElasticBeanstalkEnv{}", label),
            "Reference of the instance's application environment",
            platform.environment.id(),
        )?;
        template.output(
            format!("DistributionDomain{}", label),
            "Domain name of the instance's distribution",
            distribution.attribute("DomainName"),
        )?;
        template.output(
            format!("SchemaCreatorFunction{}", label),
            "Name of the instance's schema-creation function",
            function.id(),
        )?;
        debug!("Declared instance {}", label);
    }
    Ok(template)
}

/// Write the template as pretty JSON to `path`. When the file
/// already holds a template, returns the logical ids of the resources
/// that differ from it.
pub async fn write_template(template: &Template, path: &Path) -> Result<Option<Vec<String>>> {
    let differences = match fs::read(path).await {
        Ok(previous) => match serde_json::from_slice::<Template>(&previous) {
            Ok(previous) => Some(find_signature_differences(
                template,
                &compute_signatures(&previous)?,
            )?),
            Err(e) => {
                warn!("Ignoring malformed previous template {:?}: {}", path, e);
                None
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read previous template {:?}", path));
        }
    };
    let body = serde_json::to_string_pretty(template)?;
    fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write template to {:?}", path))?;
    Ok(differences)
}
