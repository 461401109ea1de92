//! Defines option settings, the namespaced key/value pairs that
//! configure an application-platform environment.

use crate::conf::DescriptorConfig;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Variables exposed to the application process.
pub const ENVIRONMENT_NAMESPACE: &str = "aws:elasticbeanstalk:application:environment";

/// Sizing and identity of the compute instances.
pub const LAUNCH_NAMESPACE: &str = "aws:autoscaling:launchconfiguration";

/// A set of option settings. Writing the same (namespace, name) pair
/// twice keeps the last value; iteration is sorted by namespace and
/// then by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSettings {
    settings: BTreeMap<(String, String), Value>,
}

impl OptionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, returning the value it replaced, if any.
    pub fn set(&mut self, namespace: &str, name: &str, value: impl Into<Value>) -> Option<Value> {
        let key = (String::from(namespace), String::from(name));
        self.settings.insert(key, value.into())
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&Value> {
        let key = (String::from(namespace), String::from(name));
        self.settings.get(&key)
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Iterate over (namespace, name, value) triples.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.settings
            .iter()
            .map(|((namespace, name), value)| (namespace.as_str(), name.as_str(), value))
    }
}

/// One rendered option setting.
struct Entry<'a>(&'a str, &'a str, &'a Value);

impl Serialize for Entry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entry = serializer.serialize_struct("OptionSetting", 3)?;
        entry.serialize_field("Namespace", self.0)?;
        entry.serialize_field("OptionName", self.1)?;
        entry.serialize_field("Value", self.2)?;
        entry.end()
    }
}

impl Serialize for OptionSettings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(|(ns, name, value)| Entry(ns, name, value)))
    }
}

/// The option settings every environment starts from: the
/// application's runtime variables and the instance sizing.
pub fn environment_options(config: &DescriptorConfig) -> OptionSettings {
    let mut options = OptionSettings::new();
    for (name, value) in config.runtime.variables() {
        options.set(ENVIRONMENT_NAMESPACE, name, value);
    }
    let connection = &config.connection;
    let stack = &config.stack;
    let environment = [
        ("AWS_REGION", stack.aws_region.clone()),
        ("DB_DATABASE", connection.database.clone()),
        ("DB_HOST", connection.host.clone()),
        ("DB_PASSWORD", connection.password.clone()),
        ("DB_PORT", connection.port.to_string()),
        ("DB_USER", connection.user.clone()),
    ];
    for (name, value) in environment {
        options.set(ENVIRONMENT_NAMESPACE, name, value);
    }

    let launch = [
        ("InstanceType", stack.instance_type.clone()),
        ("RootVolumeType", stack.root_volume_type.clone()),
        ("RootVolumeSize", stack.root_volume_size.to_string()),
        ("RootVolumeIOPS", stack.root_volume_iops.to_string()),
    ];
    for (name, value) in launch {
        options.set(LAUNCH_NAMESPACE, name, value);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::tests::descriptor_vars;
    use serde_json::json;

    #[test]
    fn last_write_wins() {
        let mut options = OptionSettings::new();
        let replaced = options.set(LAUNCH_NAMESPACE, "IamInstanceProfile", "placeholder");
        assert_eq!(replaced, None);
        let profile = json!({"Ref": "Profile1"});
        let replaced = options.set(LAUNCH_NAMESPACE, "IamInstanceProfile", profile);
        assert_eq!(replaced, Some(json!("placeholder")));

        assert_eq!(options.len(), 1);
        assert_eq!(
            options.get(LAUNCH_NAMESPACE, "IamInstanceProfile"),
            Some(&json!({"Ref": "Profile1"}))
        );
    }

    #[test]
    fn same_name_in_different_namespaces_is_distinct() {
        let mut options = OptionSettings::new();
        options.set(ENVIRONMENT_NAMESPACE, "InstanceType", "app value");
        options.set(LAUNCH_NAMESPACE, "InstanceType", "t3.small");
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn renders_sorted_list() {
        let mut options = OptionSettings::new();
        options.set(LAUNCH_NAMESPACE, "InstanceType", "t3.small");
        options.set(ENVIRONMENT_NAMESPACE, "PORT", "8080");
        options.set(ENVIRONMENT_NAMESPACE, "APP_NAME", "kaito");

        assert_eq!(
            serde_json::to_value(&options).unwrap(),
            json!([
                {"Namespace": LAUNCH_NAMESPACE, "OptionName": "InstanceType", "Value": "t3.small"},
                {"Namespace": ENVIRONMENT_NAMESPACE, "OptionName": "APP_NAME", "Value": "kaito"},
                {"Namespace": ENVIRONMENT_NAMESPACE, "OptionName": "PORT", "Value": "8080"},
            ])
        );
    }

    #[test]
    fn environment_options_cover_runtime_and_sizing() {
        let config = DescriptorConfig::from_vars(descriptor_vars()).unwrap();
        let options = environment_options(&config);

        assert_eq!(options.len(), 13 + 6 + 4);
        assert_eq!(
            options.get(ENVIRONMENT_NAMESPACE, "DB_PORT"),
            Some(&json!("5432"))
        );
        assert_eq!(
            options.get(ENVIRONMENT_NAMESPACE, "KC_REALM"),
            Some(&json!("kaito"))
        );
        assert_eq!(
            options.get(LAUNCH_NAMESPACE, "RootVolumeIOPS"),
            Some(&json!("3000"))
        );
        assert_eq!(options.get(LAUNCH_NAMESPACE, "IamInstanceProfile"), None);
    }
}
