//! Declares the application-platform triple of an instance: the
//! application, the environment running it, and the role its compute
//! instances assume.

use super::options::{environment_options, LAUNCH_NAMESPACE};
use super::template::{logical_id, Reference, Resource, Template};
use crate::conf::{DescriptorConfig, InstanceSettings, RolePolicy};
use anyhow::Result;
use serde_json::{json, Value};

const WEB_TIER_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AWSElasticBeanstalkWebTier";
const S3_FULL_ACCESS_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AmazonS3FullAccess";

/// References to everything declared for one platform.
#[derive(Debug, Clone)]
pub struct Platform {
    pub application: Reference,
    pub environment: Reference,
    pub role: Reference,
    pub profile: Reference,
}

/// The trust policy letting EC2 instances assume a role.
fn ec2_trust_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": ["ec2.amazonaws.com"] },
            "Action": ["sts:AssumeRole"],
        }],
    })
}

/// Role properties for the given policy mode.
fn instance_role(policy: RolePolicy, bucket: &Reference) -> Value {
    match policy {
        RolePolicy::Managed => json!({
            "AssumeRolePolicyDocument": ec2_trust_policy(),
            "ManagedPolicyArns": [WEB_TIER_POLICY_ARN, S3_FULL_ACCESS_POLICY_ARN],
        }),
        RolePolicy::Scoped => json!({
            "AssumeRolePolicyDocument": ec2_trust_policy(),
            "ManagedPolicyArns": [WEB_TIER_POLICY_ARN],
            "Policies": [{
                "PolicyName": "instance-bucket-access",
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [
                        {
                            "Effect": "Allow",
                            "Action": ["s3:ListBucket"],
                            "Resource": [bucket.attribute("Arn")],
                        },
                        {
                            "Effect": "Allow",
                            "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                            "Resource": [{ "Fn::Join": ["", [bucket.attribute("Arn"), "/*"]] }],
                        },
                    ],
                },
            }],
        }),
    }
}

/// Declare the application, the instance role and profile, and the
/// environment of one instance.
pub fn declare_platform(
    template: &mut Template,
    instance: &InstanceSettings,
    bucket: &Reference,
    config: &DescriptorConfig,
) -> Result<Platform> {
    let label = &instance.label;
    let application = template.declare(
        logical_id("Application", label),
        Resource::new(
            "AWS::ElasticBeanstalk::Application",
            json!({ "ApplicationName": instance.eb_app_name }),
        ),
    )?;

    let role_properties = instance_role(config.stack.instance_role_policy, bucket);
    let role = template.declare(
        logical_id("InstanceRole", label),
        Resource::new("AWS::IAM::Role", role_properties),
    )?;
    let profile_properties = json!({ "Roles": [role.id()] });
    let profile = template.declare(
        logical_id("InstanceProfile", label),
        Resource::new("AWS::IAM::InstanceProfile", profile_properties),
    )?;

    let mut options = environment_options(config);
    options.set(LAUNCH_NAMESPACE, "IamInstanceProfile", profile.id());
    let environment = template.declare(
        logical_id("Environment", label),
        Resource::new(
            "AWS::ElasticBeanstalk::Environment",
            json!({
                "EnvironmentName": instance.eb_env_name,
                "ApplicationName": application.id(),
                "PlatformArn": instance.platform_arn(&config.stack),
                "OptionSettings": options,
            }),
        ),
    )?;

    Ok(Platform {
        application,
        environment,
        role,
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::tests::descriptor_vars;
    use crate::descriptor::bucket::declare_bucket;

    fn declare(policy: &str) -> (Template, Platform) {
        let mut env = descriptor_vars();
        env.push((String::from("INSTANCE_ROLE_POLICY"), String::from(policy)));
        let config = DescriptorConfig::from_vars(env).unwrap();
        let instance = &config.instances[0];
        let mut template = Template::new("test");
        let bucket = declare_bucket(&mut template, instance).unwrap();
        let platform = declare_platform(&mut template, instance, &bucket, &config).unwrap();
        (template, platform)
    }

    fn properties<'a>(template: &'a Template, reference: &Reference) -> &'a Value {
        &template.resource(reference.logical_id()).unwrap().properties
    }

    #[test]
    fn environment_uses_application_and_profile() {
        let (template, platform) = declare("scoped");
        let environment = properties(&template, &platform.environment);

        assert_eq!(
            template.resource("Environment1").unwrap().kind,
            "AWS::ElasticBeanstalk::Environment"
        );
        assert_eq!(environment["EnvironmentName"], json!("kaito-one-env"));
        assert_eq!(
            environment["ApplicationName"],
            json!({"Ref": "Application1"})
        );
        let profile_settings: Vec<&Value> = environment["OptionSettings"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|s| s["OptionName"] == json!("IamInstanceProfile"))
            .collect();
        assert_eq!(profile_settings.len(), 1);
        assert_eq!(
            profile_settings[0]["Value"],
            json!({"Ref": "InstanceProfile1"})
        );
        assert_eq!(
            properties(&template, &platform.profile)["Roles"],
            json!([{"Ref": "InstanceRole1"}])
        );
    }

    #[test]
    fn scoped_role_is_limited_to_own_bucket() {
        let (template, platform) = declare("scoped");
        let role = properties(&template, &platform.role);

        assert_eq!(role["ManagedPolicyArns"], json!([WEB_TIER_POLICY_ARN]));
        let statements = &role["Policies"][0]["PolicyDocument"]["Statement"];
        assert_eq!(
            statements[0]["Resource"],
            json!([{"Fn::GetAtt": ["Bucket1", "Arn"]}])
        );
        assert!(!role.to_string().contains("AmazonS3FullAccess"));
    }

    #[test]
    fn managed_role_keeps_broad_policies() {
        let (template, platform) = declare("managed");
        let role = properties(&template, &platform.role);

        assert_eq!(
            role["ManagedPolicyArns"],
            json!([WEB_TIER_POLICY_ARN, S3_FULL_ACCESS_POLICY_ARN])
        );
        assert!(role.get("Policies").is_none());
        assert_eq!(
            role["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            json!(["ec2.amazonaws.com"])
        );
    }
}
