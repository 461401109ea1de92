//! Defines utilities for comparing synthesized templates in terms of
//! the resources declared within.

use crate::descriptor::template::Template;
use anyhow::Result;
use base64ct::{Base64, Encoding};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Produce a hash for any serializable value.
fn hash_value<T: Serialize>(value: &T) -> Result<String> {
    let mut hasher = Sha1::new();
    serde_json::to_writer(&mut hasher, value)?;
    let hash = hasher.finalize();
    Ok(Base64::encode_string(&hash))
}

/// Produces a signature of the whole template.
pub fn template_signature(template: &Template) -> Result<String> {
    hash_value(template)
}

/// Produces a snapshot of the given template: one signature per
/// resource, keyed by logical id.
pub fn compute_signatures(template: &Template) -> Result<BTreeMap<String, String>> {
    let mut signatures = BTreeMap::new();
    for (logical_id, resource) in &template.resources {
        signatures.insert(logical_id.clone(), hash_value(resource)?);
    }
    Ok(signatures)
}

/// Produces a list of logical ids with differences with respect to
/// the given signatures snapshot: resources that changed, appeared,
/// or disappeared.
pub fn find_signature_differences(
    template: &Template,
    snapshot: &BTreeMap<String, String>,
) -> Result<Vec<String>> {
    let current = compute_signatures(template)?;
    let mut differences = Vec::new();
    for (logical_id, hash) in &current {
        if snapshot.get(logical_id) != Some(hash) {
            differences.push(logical_id.clone());
        }
    }
    for logical_id in snapshot.keys() {
        if !current.contains_key(logical_id) {
            differences.push(logical_id.clone());
        }
    }
    differences.sort();
    Ok(differences)
}
