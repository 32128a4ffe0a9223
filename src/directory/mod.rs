//! Directory access: the raw protocol port and the adapter built on it.

mod adapter;
#[cfg(test)]
pub(crate) mod memory;

pub use adapter::*;

use std::collections::HashSet;

use async_trait::async_trait;
use ldap3::{LdapError, Mod, SearchEntry};

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// LDAP result code `noSuchObject`.
pub const NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code `invalidCredentials`.
pub const INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code `entryAlreadyExists`.
pub const ALREADY_EXISTS: u32 = 68;

/// Errors raised by a [`Directory`].
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The directory could not be reached or bound.
    #[error("directory unavailable: {0}")]
    Unavailable(#[from] LdapError),

    #[error("directory operation timed out")]
    Timeout,

    /// The directory answered with a non-zero result code.
    #[error("directory rejected operation ({code}): {message}")]
    Rejected { code: u32, message: String },
}

impl DirectoryError {
    /// Whether this is a transport-level failure rather than an answer.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DirectoryError::Rejected { .. })
    }

    pub fn is_no_such_object(&self) -> bool {
        matches!(self, DirectoryError::Rejected { code, .. } if *code == NO_SUCH_OBJECT)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, DirectoryError::Rejected { code, .. } if *code == ALREADY_EXISTS)
    }
}

/// Raw directory operations, one protocol exchange each.
///
/// Implementations must not retry: every call is a single attempt.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Subtree search under `base`. A missing base yields no entries.
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<SearchEntry>>;

    async fn add(
        &self,
        dn: &str,
        attributes: Vec<(String, HashSet<String>)>,
    ) -> Result<()>;

    async fn modify(&self, dn: &str, mods: Vec<Mod<String>>) -> Result<()>;

    /// Change the RDN of `dn`, deleting the old RDN value.
    async fn rename(&self, dn: &str, new_rdn: &str) -> Result<()>;

    async fn delete(&self, dn: &str) -> Result<()>;
}
