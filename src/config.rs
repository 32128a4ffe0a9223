//! Configuration manager for the provisioner.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::ldap::{LdapConfig, LdapConfigError};
use crate::provisioning::schema::{
    DEFAULT_ACTIVE_ATTRIBUTE, DEFAULT_NAMING_ATTRIBUTE, Schema,
};
use crate::provisioning::{DeleteBehavior, ProvisionerConfig};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:1111";
/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Address the HTTP server listens on.
    #[serde(default = "default_address")]
    pub address: String,
    /// Expose Prometheus metrics on `/metrics`.
    #[serde(default)]
    pub metrics: bool,
    #[serde(skip)]
    path: PathBuf,
    /// Related to the directory server.
    #[serde(skip_serializing)]
    pub ldap: Option<Ldap>,
    /// Related to how users are laid out in the directory.
    #[serde(default)]
    pub provisioning: Provisioning,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            address: default_address(),
            metrics: false,
            path: PathBuf::default(),
            ldap: None,
            provisioning: Provisioning::default(),
        }
    }
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_owned()
}

/// LDAP configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ldap {
    /// `ldap://` or `ldaps://` URL of the server.
    pub url: String,
    /// DN used to bind.
    pub principal: String,
    /// Password used to bind.
    pub credentials: String,
    /// Per operation timeout, in seconds.
    pub timeout: Option<u64>,
    /// Idle bound connections kept around.
    pub pool_size: Option<usize>,
}

impl Ldap {
    pub fn to_ldap_config(&self) -> Result<LdapConfig, LdapConfigError> {
        let mut config =
            LdapConfig::new(&self.url, &self.principal, &self.credentials)?;
        if let Some(timeout) = self.timeout {
            config = config.timeout(Duration::from_secs(timeout));
        }
        if let Some(pool_size) = self.pool_size {
            config = config.pool_size(pool_size);
        }
        Ok(config)
    }
}

/// Provisioning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provisioning {
    /// Container users are created into.
    pub base_dn: String,
    #[serde(default)]
    pub delete_behavior: DeleteBehavior,
    /// Extra attributes read back for every user.
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default = "default_naming_attribute")]
    pub naming_attribute: String,
    #[serde(default = "default_active_attribute")]
    pub active_attribute: String,
}

impl Default for Provisioning {
    fn default() -> Self {
        Self {
            base_dn: String::default(),
            delete_behavior: DeleteBehavior::default(),
            attributes: Vec::new(),
            naming_attribute: default_naming_attribute(),
            active_attribute: default_active_attribute(),
        }
    }
}

fn default_naming_attribute() -> String {
    DEFAULT_NAMING_ATTRIBUTE.to_owned()
}

fn default_active_attribute() -> String {
    DEFAULT_ACTIVE_ATTRIBUTE.to_owned()
}

impl Provisioning {
    /// Resolve attribute roles once for the lifetime of the process.
    pub fn to_provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            base_dn: self.base_dn.clone(),
            delete_behavior: self.delete_behavior,
            schema: Schema::new(
                &self.naming_attribute,
                &self.active_attribute,
                &self.attributes,
            ),
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Use `CONFIG_PATH` when set.
    pub fn env_path(self) -> Self {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => self.path(PathBuf::from(path)),
            Err(_) => self,
        }
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file)
            {
                Ok(config) => Arc::new(config.path(file_path)),
                Err(err) => Arc::new(self.error(err)),
            },
            Err(err) => Arc::new(self.error(err)),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "cannot read `config.yaml` file");
        Self::default()
    }
}
