//! Minimal diff between a stored entry and a proposed attribute map.

use crate::provisioning::attributes::{AttributeMap, AttributeValue};
use crate::provisioning::schema::{AttributeRole, Schema};

/// Writes needed to move an entry from its stored state to a proposed one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Attribute replacements, in the order they were scheduled.
    pub replace: Vec<(String, AttributeValue)>,
    /// New naming attribute value, when the username changed.
    pub rename: Option<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.replace.is_empty() && self.rename.is_none()
    }
}

/// Compute the changes turning `original` into `changed`.
///
/// Bookkeeping attributes are never scheduled, except the active flag which
/// callers strip beforehand when it must not be written. The username is
/// compared to the stored naming attribute and becomes a rename.
pub fn diff(
    schema: &Schema,
    original: &AttributeMap,
    changed: &AttributeMap,
) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (name, value) in changed.iter() {
        match schema.role(name) {
            AttributeRole::NamingAttribute
            | AttributeRole::CreatedAt
            | AttributeRole::ModifiedAt
            | AttributeRole::InternalId => {
                tracing::trace!(attribute = name, "skipping bookkeeping");
            },
            AttributeRole::Username => {
                let current = original.single_value(&schema.naming_attribute);
                match value.single() {
                    Some(new) if current != Some(new) => {
                        tracing::debug!(
                            from = ?current,
                            to = new,
                            "scheduling rename"
                        );
                        changes.rename = Some(new.to_owned());
                    },
                    _ => {},
                }
            },
            AttributeRole::ActiveFlag | AttributeRole::Regular => {
                match original.get(name) {
                    Some(stored) if stored == value => {},
                    Some(_) => {
                        tracing::debug!(attribute = name, "replacing");
                        changes.replace.push((name.to_owned(), value.clone()));
                    },
                    None => {
                        tracing::debug!(attribute = name, "setting");
                        changes.replace.push((name.to_owned(), value.clone()));
                    },
                }
            },
        }
    }

    changes
}
