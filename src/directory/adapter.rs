//! Translation between generic attribute maps and directory entries.

use std::collections::HashSet;
use std::sync::Arc;

use ldap3::Mod;

use super::{Directory, Result};
use crate::ldap::{escape_dn_value, escape_filter_value};
use crate::provisioning::attributes::AttributeMap;
use crate::provisioning::reconcile::ChangeSet;
use crate::provisioning::schema::{AttributeRole, Schema};

/// Object classes of a person-like entry.
pub const PERSON_OBJECT_CLASSES: [&str; 4] =
    ["top", "person", "organizationalPerson", "inetOrgPerson"];

/// Result of [`DirectoryAdapter::get_entry`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchedEntry {
    /// Folded attributes. Empty when nothing matched.
    pub attributes: AttributeMap,
    /// Attributes whose values were not valid UTF-8 and were skipped.
    pub skipped: Vec<String>,
}

impl FetchedEntry {
    pub fn is_found(&self) -> bool {
        !self.attributes.is_empty()
    }
}

/// Directory operations expressed over [`AttributeMap`]s.
#[derive(Clone)]
pub struct DirectoryAdapter {
    directory: Arc<dyn Directory>,
    schema: Arc<Schema>,
}

impl DirectoryAdapter {
    pub fn new(directory: Arc<dyn Directory>, schema: Arc<Schema>) -> Self {
        Self { directory, schema }
    }

    /// `<naming-attr>=<escaped value>`.
    pub fn rdn(&self, naming_value: &str) -> String {
        format!(
            "{}={}",
            self.schema.naming_attribute,
            escape_dn_value(naming_value)
        )
    }

    /// `<naming-attr>=<escaped value>,<base>`.
    pub fn dn(&self, naming_value: &str, base: &str) -> String {
        format!("{},{}", self.rdn(naming_value), base)
    }

    /// Create a person entry.
    ///
    /// Bookkeeping attributes of `attributes` are skipped; the naming
    /// attribute is written from `naming_value`.
    pub async fn add_entry(
        &self,
        dn: &str,
        naming_value: &str,
        attributes: &AttributeMap,
    ) -> Result<()> {
        tracing::debug!(dn, "adding entry");

        let mut ldap_attrs: Vec<(String, HashSet<String>)> = vec![
            (
                "objectClass".to_owned(),
                PERSON_OBJECT_CLASSES.iter().map(|c| c.to_string()).collect(),
            ),
            (
                self.schema.naming_attribute.clone(),
                HashSet::from([naming_value.to_owned()]),
            ),
        ];

        for (name, value) in attributes.iter() {
            let writable = match self.schema.role(name) {
                AttributeRole::Regular => {
                    !name.eq_ignore_ascii_case("objectClass")
                },
                AttributeRole::ActiveFlag => {
                    name.eq_ignore_ascii_case(&self.schema.active_attribute)
                },
                _ => false,
            };
            if !writable || value.is_empty() {
                tracing::trace!(attribute = name, "skipping");
                continue;
            }

            let values = value.values().iter().cloned().collect();
            ldap_attrs.push((name.to_owned(), values));
        }

        self.directory.add(dn, ldap_attrs).await
    }

    /// Apply a change set: one batched modify, then the rename if any.
    ///
    /// An empty change set touches nothing and succeeds.
    pub async fn modify_entry(
        &self,
        dn: &str,
        changes: &ChangeSet,
    ) -> Result<()> {
        if changes.is_empty() {
            tracing::debug!(dn, "nothing to modify");
            return Ok(());
        }

        if !changes.replace.is_empty() {
            let mods = changes
                .replace
                .iter()
                .map(|(name, value)| {
                    Mod::Replace(
                        name.clone(),
                        value.values().iter().cloned().collect(),
                    )
                })
                .collect::<Vec<_>>();

            tracing::debug!(dn, changes = mods.len(), "modifying entry");
            self.directory.modify(dn, mods).await?;
        }

        if let Some(new_value) = &changes.rename {
            tracing::debug!(dn, to = %new_value, "renaming entry");
            self.directory.rename(dn, &self.rdn(new_value)).await?;
        }

        Ok(())
    }

    /// Remove the entry at `dn`. Only leaf entries can be deleted.
    pub async fn delete_entry(&self, dn: &str) -> Result<()> {
        tracing::debug!(dn, "deleting entry");
        self.directory.delete(dn).await
    }

    /// Search and fold every matching entry into one map.
    ///
    /// Each requested attribute is materialized, with an empty value list
    /// when absent, as soon as one entry matched.
    pub async fn get_entry(
        &self,
        filter: &str,
        attributes: &[String],
        base: &str,
    ) -> Result<FetchedEntry> {
        let entries = self.directory.search(base, filter, attributes).await?;
        tracing::debug!(
            filter,
            base,
            found = entries.len(),
            "searched directory"
        );

        let mut fetched = FetchedEntry::default();
        for entry in entries {
            for requested in attributes {
                let values = entry
                    .attrs
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(requested))
                    .map(|(_, values)| values.clone())
                    .unwrap_or_default();

                if entry
                    .bin_attrs
                    .keys()
                    .any(|name| name.eq_ignore_ascii_case(requested))
                {
                    tracing::debug!(
                        attribute = requested,
                        dn = %entry.dn,
                        "skipping non UTF-8 value"
                    );
                    fetched.skipped.push(requested.clone());
                }

                fetched.attributes.insert(requested.clone(), values);
            }
        }

        Ok(fetched)
    }

    /// Fetch the entry whose naming attribute equals `naming_value`.
    pub async fn lookup(
        &self,
        naming_value: &str,
        attributes: &[String],
        base: &str,
    ) -> Result<FetchedEntry> {
        let filter = format!(
            "({}={})",
            self.schema.naming_attribute,
            escape_filter_value(naming_value)
        );
        self.get_entry(&filter, attributes, base).await
    }
}
