use anyhow::Result;
use kaito_infra::conf::DescriptorConfig;
use kaito_infra::{descriptor, sign};
use std::env::var;
use std::path::Path;
use tracing::info;

/// Evaluate the deployment descriptor and print the resulting
/// template, or write it to the file named by `SYNTH_OUTPUT`.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
    let config = DescriptorConfig::from_env()?;

    let template = descriptor::synthesize(&config)?;
    info!(
        "Synthesized {} resources for stack {} in {} (signature {})",
        template.resources.len(),
        config.stack.stack_name(),
        config.stack.aws_region,
        sign::template_signature(&template)?
    );

    match var("SYNTH_OUTPUT").ok().filter(|path| !path.is_empty()) {
        Some(path) => {
            let differences = descriptor::write_template(&template, Path::new(&path)).await?;
            match differences {
                None => info!("Template written to {}", path),
                Some(changed) if changed.is_empty() => {
                    info!("Template written to {}; no resource changed", path)
                }
                Some(changed) => info!(
                    "Template written to {}; changed resources: {}",
                    path,
                    changed.join(", ")
                ),
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&template)?),
    }
    Ok(())
}
