//! Declares the content-delivery distribution fronting an instance's
//! environment.

use super::template::{logical_id, Reference, Resource, Template};
use crate::conf::InstanceSettings;
use anyhow::Result;
use serde_json::json;

/// The managed "CachingOptimized" cache policy.
/// https://docs.aws.amazon.com/AmazonCloudFront/latest/DeveloperGuide/using-managed-cache-policies.html
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

const ORIGIN_ID: &str = "environment";

/// Declare a distribution whose single origin is the environment's
/// endpoint. The environment only serves plain HTTP, so viewers are
/// redirected to HTTPS at the edge and the origin is reached over
/// HTTP.
pub fn declare_distribution(
    template: &mut Template,
    instance: &InstanceSettings,
    environment: &Reference,
) -> Result<Reference> {
    let distribution = Resource::new(
        "AWS::CloudFront::Distribution",
        json!({
            "DistributionConfig": {
                "Enabled": true,
                "Comment": format!("Fronts {}", instance.eb_env_name),
                "Origins": [{
                    "Id": ORIGIN_ID,
                    "DomainName": environment.attribute("EndpointURL"),
                    "CustomOriginConfig": {
                        "HTTPPort": 80,
                        "HTTPSPort": 443,
                        "OriginProtocolPolicy": "http-only",
                    },
                }],
                "DefaultCacheBehavior": {
                    "TargetOriginId": ORIGIN_ID,
                    "ViewerProtocolPolicy": "redirect-to-https",
                    "CachePolicyId": CACHING_OPTIMIZED_POLICY_ID,
                },
            },
        }),
    );
    template.declare(logical_id("Distribution", &instance.label), distribution)
}
