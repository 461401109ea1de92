//! Declares the storage bucket of an instance.

use super::template::{logical_id, Policy, Reference, Resource, Template};
use crate::conf::InstanceSettings;
use anyhow::Result;
use serde_json::json;

/// Declare a versioned bucket that is destroyed together with the
/// stack.
pub fn declare_bucket(template: &mut Template, instance: &InstanceSettings) -> Result<Reference> {
    let bucket = Resource::new(
        "AWS::S3::Bucket",
        json!({
            "BucketName": instance.bucket_name,
            "VersioningConfiguration": { "Status": "Enabled" },
        }),
    )
    .with_removal_policy(Policy::Delete);
    template.declare(logical_id("Bucket", &instance.label), bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::tests::descriptor_vars;
    use crate::conf::DescriptorConfig;

    #[test]
    fn declares_versioned_disposable_bucket() {
        let config = DescriptorConfig::from_vars(descriptor_vars()).unwrap();
        let mut template = Template::new("test");
        let bucket = declare_bucket(&mut template, &config.instances[0]).unwrap();

        assert_eq!(bucket.logical_id(), "Bucket1");
        let resource = template.resource("Bucket1").unwrap();
        assert_eq!(resource.kind, "AWS::S3::Bucket");
        assert_eq!(resource.properties["BucketName"], json!("kaito-assets-one"));
        assert_eq!(
            resource.properties["VersioningConfiguration"]["Status"],
            json!("Enabled")
        );
        assert_eq!(resource.deletion_policy, Some(Policy::Delete));
        assert_eq!(resource.update_replace_policy, Some(Policy::Delete));
    }
}
