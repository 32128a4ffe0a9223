//! Bookkeeping attribute roles, resolved once from configuration.

use std::collections::HashMap;

/// Contract name of the required username attribute.
pub const USERNAME: &str = "username";
/// Contract name carrying the naming attribute value on responses.
pub const ID: &str = "id";
pub const WHEN_CREATED: &str = "whenCreated";
pub const WHEN_CHANGED: &str = "whenChanged";
/// Contract alias of the active flag.
pub const ACTIVE: &str = "active";

pub const DEFAULT_NAMING_ATTRIBUTE: &str = "cn";
pub const DEFAULT_ACTIVE_ATTRIBUTE: &str = "accountActive";
pub const CREATE_TIMESTAMP: &str = "createTimestamp";
pub const MODIFY_TIMESTAMP: &str = "modifyTimestamp";

/// What an attribute name means to the provisioning logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeRole {
    /// Externally visible alias of the naming attribute.
    Username,
    /// Directory attribute forming the leftmost DN component.
    NamingAttribute,
    CreatedAt,
    ModifiedAt,
    InternalId,
    ActiveFlag,
    Regular,
}

/// Typed view over the attribute names the provisioning logic cares about.
#[derive(Clone, Debug)]
pub struct Schema {
    pub naming_attribute: String,
    pub active_attribute: String,
    pub created_attribute: String,
    pub modified_attribute: String,
    /// Attributes fetched on every read, always containing the naming and
    /// both timestamp attributes.
    read_attributes: Vec<String>,
    roles: HashMap<String, AttributeRole>,
}

impl Schema {
    /// Build the schema from the configured attribute allow-list.
    pub fn new(
        naming_attribute: impl Into<String>,
        active_attribute: impl Into<String>,
        additional: &[String],
    ) -> Self {
        let naming_attribute = naming_attribute.into();
        let active_attribute = active_attribute.into();
        let created_attribute = CREATE_TIMESTAMP.to_owned();
        let modified_attribute = MODIFY_TIMESTAMP.to_owned();

        let mut read_attributes: Vec<String> = Vec::new();
        for name in additional.iter().chain([
            &naming_attribute,
            &created_attribute,
            &modified_attribute,
            &active_attribute,
        ]) {
            if !read_attributes.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                read_attributes.push(name.clone());
            }
        }

        let mut roles = HashMap::new();
        for (name, role) in [
            (USERNAME, AttributeRole::Username),
            (ID, AttributeRole::InternalId),
            (WHEN_CREATED, AttributeRole::CreatedAt),
            (WHEN_CHANGED, AttributeRole::ModifiedAt),
            (ACTIVE, AttributeRole::ActiveFlag),
            (naming_attribute.as_str(), AttributeRole::NamingAttribute),
            (created_attribute.as_str(), AttributeRole::CreatedAt),
            (modified_attribute.as_str(), AttributeRole::ModifiedAt),
            (active_attribute.as_str(), AttributeRole::ActiveFlag),
        ] {
            roles.insert(name.to_ascii_lowercase(), role);
        }

        Self {
            naming_attribute,
            active_attribute,
            created_attribute,
            modified_attribute,
            read_attributes,
            roles,
        }
    }

    /// Classify an attribute name, case-insensitively.
    pub fn role(&self, name: &str) -> AttributeRole {
        self.roles
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(AttributeRole::Regular)
    }

    pub fn read_attributes(&self) -> &[String] {
        &self.read_attributes
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(DEFAULT_NAMING_ATTRIBUTE, DEFAULT_ACTIVE_ATTRIBUTE, &[])
    }
}
