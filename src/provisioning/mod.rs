//! User provisioning on top of the directory adapter.
//!
//! Implements create, read, update and delete with optional soft delete:
//! when deletion is disabled, deleting a user clears its active flag and
//! inactive users look absent to every operation.
pub mod attributes;
pub mod reconcile;
pub mod schema;
pub mod translate;


use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directory::{
    Directory, DirectoryAdapter, DirectoryError, FetchedEntry,
};
use attributes::AttributeMap;
use schema::{AttributeRole, Schema, USERNAME};

const USER_NOT_FOUND: &str = "User not found";

/// Non-empty username of a request.
fn username(attributes: &AttributeMap) -> Option<&str> {
    attributes.single_value(USERNAME).filter(|id| !id.is_empty())
}

/// What a delete request does to the directory entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBehavior {
    /// Clear the active flag and keep the entry.
    #[default]
    Disable,
    /// Remove the entry.
    Delete,
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Provisioning failures, as seen by callers.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// The directory could not be asked; absence is unknown.
    #[error("directory unavailable")]
    Unavailable(#[source] DirectoryError),
}

impl ProvisionError {
    fn not_found(id: &str) -> Self {
        Self::NotFound(format!("{USER_NOT_FOUND}: {id}"))
    }

    fn missing_username() -> Self {
        Self::BadRequest(format!("missing required attribute `{USERNAME}`"))
    }

    /// Map a failed write: rejections are bad requests, transport errors
    /// stay distinct.
    fn write(err: DirectoryError, message: &str) -> Self {
        if err.is_transient() {
            Self::Unavailable(err)
        } else {
            tracing::warn!(error = %err, "{message}");
            Self::BadRequest(message.to_owned())
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            ProvisionError::Conflict(_) => "conflict",
            ProvisionError::NotFound(_) => "not_found",
            ProvisionError::BadRequest(_) => "bad_request",
            ProvisionError::Unavailable(_) => "unavailable",
        }
    }
}

/// A user as returned to callers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub attributes: AttributeMap,
    /// Attributes that could not be read or translated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<String>,
    /// The write succeeded but reading the entry back found nothing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

/// Provisioning settings resolved at startup.
#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    /// Container users are provisioned into.
    pub base_dn: String,
    pub delete_behavior: DeleteBehavior,
    pub schema: Schema,
}

/// Create, read, update and delete users in a directory.
#[derive(Clone)]
pub struct Provisioner {
    adapter: DirectoryAdapter,
    schema: Arc<Schema>,
    base_dn: String,
    delete_behavior: DeleteBehavior,
}

impl Provisioner {
    pub fn new(
        directory: Arc<dyn Directory>,
        config: ProvisionerConfig,
    ) -> Self {
        let schema = Arc::new(config.schema);
        Self {
            adapter: DirectoryAdapter::new(directory, Arc::clone(&schema)),
            schema,
            base_dn: config.base_dn,
            delete_behavior: config.delete_behavior,
        }
    }

    pub fn delete_behavior(&self) -> DeleteBehavior {
        self.delete_behavior
    }

    fn disables(&self) -> bool {
        self.delete_behavior == DeleteBehavior::Disable
    }

    fn dn(&self, id: &str) -> String {
        self.adapter.dn(id, &self.base_dn)
    }

    fn is_active(&self, entry: &AttributeMap) -> bool {
        entry
            .get(&self.schema.active_attribute)
            .is_some_and(|value| value.is_true())
    }

    async fn fetch(&self, id: &str) -> Result<FetchedEntry> {
        self.adapter
            .lookup(id, self.schema.read_attributes(), &self.base_dn)
            .await
            .map_err(ProvisionError::Unavailable)
    }

    /// Fetch a user visible to callers: present and, when deletion only
    /// disables, still active.
    async fn fetch_visible(&self, id: &str) -> Result<FetchedEntry> {
        let fetched = self.fetch(id).await?;

        if !fetched.is_found() {
            return Err(ProvisionError::not_found(id));
        }
        if self.disables() && !self.is_active(&fetched.attributes) {
            tracing::debug!(id, "user is disabled");
            return Err(ProvisionError::not_found(id));
        }

        Ok(fetched)
    }

    /// Read the user back after a write.
    async fn reread(&self, id: &str) -> Result<UserRecord> {
        let fetched = self.fetch(id).await?;
        if !fetched.is_found() {
            tracing::warn!(id, "entry written but not found on read back");
            return Ok(UserRecord {
                incomplete: true,
                ..Default::default()
            });
        }
        Ok(self.record(fetched))
    }

    fn record(&self, fetched: FetchedEntry) -> UserRecord {
        let translation =
            translate::translate(&self.schema, &fetched.attributes);
        let mut dropped = fetched.skipped;
        dropped.extend(translation.dropped);

        UserRecord {
            attributes: translation.attributes,
            dropped,
            incomplete: false,
        }
    }

    /// Drop caller-supplied values the generic path must never write.
    fn writable(&self, attributes: &AttributeMap) -> AttributeMap {
        attributes
            .iter()
            .filter(|(name, _)| {
                self.schema.role(name) != AttributeRole::ActiveFlag
            })
            .map(|(name, value)| (name, value.clone()))
            .collect()
    }

    /// Create a user from its attributes; `username` is required.
    #[tracing::instrument(skip_all)]
    pub async fn create(
        &self,
        attributes: &AttributeMap,
    ) -> Result<UserRecord> {
        let id = match username(attributes) {
            Some(id) => id.to_owned(),
            None => return Err(ProvisionError::missing_username()),
        };

        let existing = self.fetch(&id).await?;
        if existing.is_found()
            && (!self.disables() || self.is_active(&existing.attributes))
        {
            return Err(ProvisionError::Conflict(format!(
                "User already exists: {id}"
            )));
        }

        let mut requested = self.writable(attributes);
        if self.disables() {
            requested.insert(self.schema.active_attribute.clone(), true);
        }

        let dn = self.dn(&id);
        if existing.is_found() {
            // Disabled user with the same name: bring the entry back.
            let changes =
                reconcile::diff(&self.schema, &existing.attributes, &requested);
            self.adapter
                .modify_entry(&dn, &changes)
                .await
                .map_err(|err| ProvisionError::write(err, "Error creating user"))?;
            tracing::info!(%id, "reactivated user");
        } else {
            self.adapter
                .add_entry(&dn, &id, &requested)
                .await
                .map_err(|err| {
                    if err.is_already_exists() {
                        ProvisionError::Conflict(format!(
                            "User already exists: {id}"
                        ))
                    } else {
                        ProvisionError::write(err, "Error creating user")
                    }
                })?;
            tracing::info!(%id, "created user");
        }

        self.reread(&id).await
    }

    /// Read a user by identifier.
    #[tracing::instrument(skip(self))]
    pub async fn read(&self, id: &str) -> Result<UserRecord> {
        let fetched = self.fetch_visible(id).await?;
        Ok(self.record(fetched))
    }

    /// Apply the differences between `attributes` and the stored user.
    #[tracing::instrument(skip(self, attributes))]
    pub async fn update(
        &self,
        id: &str,
        attributes: &AttributeMap,
    ) -> Result<UserRecord> {
        if attributes.contains(USERNAME) && username(attributes).is_none() {
            return Err(ProvisionError::missing_username());
        }

        let fetched = self.fetch_visible(id).await?;

        let changes = reconcile::diff(
            &self.schema,
            &fetched.attributes,
            &self.writable(attributes),
        );
        self.adapter
            .modify_entry(&self.dn(id), &changes)
            .await
            .map_err(|err| ProvisionError::write(err, "Error modifying user"))?;
        tracing::info!(id, changes = changes.replace.len(), "updated user");

        let current = changes.rename.as_deref().unwrap_or(id);
        self.reread(current).await
    }

    /// Delete a user, or disable it when deletion is turned off.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let fetched = self.fetch(id).await?;
        if !fetched.is_found() {
            return Err(ProvisionError::not_found(id));
        }

        let dn = self.dn(id);
        match self.delete_behavior {
            DeleteBehavior::Delete => {
                self.adapter.delete_entry(&dn).await.map_err(|err| {
                    if err.is_no_such_object() {
                        ProvisionError::not_found(id)
                    } else {
                        ProvisionError::write(err, "Error deleting user")
                    }
                })?;
                tracing::info!(id, "deleted user");
            },
            DeleteBehavior::Disable => {
                if !self.is_active(&fetched.attributes) {
                    return Err(ProvisionError::not_found(id));
                }

                let mut disabled = fetched.attributes.clone();
                disabled.insert(self.schema.active_attribute.clone(), false);
                let changes =
                    reconcile::diff(&self.schema, &fetched.attributes, &disabled);
                self.adapter
                    .modify_entry(&dn, &changes)
                    .await
                    .map_err(|err| {
                        ProvisionError::write(err, "Error modifying user")
                    })?;
                tracing::info!(id, "disabled user");
            },
        }

        Ok(())
    }
}
