//! LDAP support.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, Scope,
    SearchEntry, SearchResult,
};
use tokio::sync::Mutex;
use url::Url;

use crate::directory::{
    Directory, DirectoryError, INVALID_CREDENTIALS, NO_SUCH_OBJECT, Result,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_SIZE: usize = 4;

/// Invalid LDAP connection settings.
#[derive(Debug, thiserror::Error)]
pub enum LdapConfigError {
    #[error("invalid LDAP url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported scheme `{0}`, expected `ldap` or `ldaps`")]
    Scheme(String),
}

/// Connection descriptor of the directory server.
#[derive(Clone)]
pub struct LdapConfig {
    pub url: String,
    pub principal: String,
    credentials: String,
    pub timeout: Duration,
    /// Maximum number of idle bound connections kept around.
    pub pool_size: usize,
}

impl LdapConfig {
    /// Create a new [`LdapConfig`].
    pub fn new(
        url: impl Into<String>,
        principal: impl Into<String>,
        credentials: impl Into<String>,
    ) -> std::result::Result<Self, LdapConfigError> {
        let url = url.into();

        let parsed = Url::parse(&url)?;
        if !matches!(parsed.scheme(), "ldap" | "ldaps") {
            return Err(LdapConfigError::Scheme(parsed.scheme().to_owned()));
        }

        Ok(Self {
            url,
            principal: principal.into(),
            credentials: credentials.into(),
            timeout: DEFAULT_TIMEOUT,
            pool_size: DEFAULT_POOL_SIZE,
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("url", &self.url)
            .field("principal", &self.principal)
            .field("credentials", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// [`Directory`] over LDAPv3.
///
/// Every operation acquires a bound connection, performs one exchange and
/// hands the connection back. Idle connections are reused up to
/// `pool_size`; a connection that failed at transport level is dropped.
pub struct LdapDirectory {
    config: LdapConfig,
    idle: Mutex<Vec<Ldap>>,
}

impl LdapDirectory {
    pub fn new(config: LdapConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    async fn connect(&self) -> Result<Ldap> {
        let settings =
            LdapConnSettings::new().set_conn_timeout(self.config.timeout);
        let (handle, mut ldap) =
            LdapConnAsync::with_settings(settings, &self.config.url).await?;
        ldap3::drive!(handle);

        let result = ldap
            .simple_bind(&self.config.principal, &self.config.credentials)
            .await?;
        if result.rc == INVALID_CREDENTIALS {
            tracing::error!(
                principal = %self.config.principal,
                "LDAP bind refused, check credentials"
            );
        }
        check(result)?;

        tracing::debug!(url = %self.config.url, "LDAP connection established");
        Ok(ldap)
    }

    async fn acquire(&self) -> Result<Ldap> {
        loop {
            let pooled = self.idle.lock().await.pop();
            match pooled {
                Some(mut ldap) => {
                    if !ldap.is_closed() {
                        return Ok(ldap);
                    }
                },
                None => return self.connect().await,
            }
        }
    }

    async fn release(&self, mut ldap: Ldap, healthy: bool) {
        if healthy {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.config.pool_size {
                idle.push(ldap);
                return;
            }
        }

        if let Err(err) = ldap.unbind().await {
            tracing::debug!(error = %err, "LDAP unbind failed");
        }
    }

    /// Bound the whole exchange, connection setup included.
    async fn timed<T>(
        &self,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.timeout, operation)
            .await
            .map_err(|_| DirectoryError::Timeout)?
    }

    async fn finish<T>(
        &self,
        ldap: Ldap,
        outcome: std::result::Result<T, LdapError>,
    ) -> Result<T> {
        self.release(ldap, outcome.is_ok()).await;
        Ok(outcome?)
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<SearchEntry>> {
        self.timed(async {
            let mut ldap = self.acquire().await?;
            let outcome = ldap
                .search(base, Scope::Subtree, filter, attributes.to_vec())
                .await;
            let SearchResult(entries, result) =
                self.finish(ldap, outcome).await?;

            match result.rc {
                0 => Ok(entries
                    .into_iter()
                    .map(SearchEntry::construct)
                    .collect()),
                NO_SUCH_OBJECT => Ok(Vec::new()),
                _ => Err(rejected(result)),
            }
        })
        .await
    }

    async fn add(
        &self,
        dn: &str,
        attributes: Vec<(String, HashSet<String>)>,
    ) -> Result<()> {
        self.timed(async {
            let mut ldap = self.acquire().await?;
            let outcome = ldap.add(dn, attributes).await;
            check(self.finish(ldap, outcome).await?)
        })
        .await
    }

    async fn modify(&self, dn: &str, mods: Vec<Mod<String>>) -> Result<()> {
        self.timed(async {
            let mut ldap = self.acquire().await?;
            let outcome = ldap.modify(dn, mods).await;
            check(self.finish(ldap, outcome).await?)
        })
        .await
    }

    async fn rename(&self, dn: &str, new_rdn: &str) -> Result<()> {
        self.timed(async {
            let mut ldap = self.acquire().await?;
            let outcome = ldap.modifydn(dn, new_rdn, true, None).await;
            check(self.finish(ldap, outcome).await?)
        })
        .await
    }

    async fn delete(&self, dn: &str) -> Result<()> {
        self.timed(async {
            let mut ldap = self.acquire().await?;
            let outcome = ldap.delete(dn).await;
            check(self.finish(ldap, outcome).await?)
        })
        .await
    }
}

fn rejected(result: LdapResult) -> DirectoryError {
    DirectoryError::Rejected {
        code: result.rc,
        message: result.text,
    }
}

/// Answers other than success become [`DirectoryError::Rejected`].
fn check(result: LdapResult) -> Result<()> {
    match result.success() {
        Ok(_) => Ok(()),
        Err(LdapError::LdapResult { result }) => Err(rejected(result)),
        Err(err) => Err(err.into()),
    }
}

/// Escape a value for use inside a DN component (RFC 4514).
pub fn escape_dn_value(input: &str) -> String {
    let last = input.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(input.len());

    for (i, c) in input.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            },
            '\0' => out.push_str(r"\00"),
            ' ' if i == 0 || i == last => out.push_str(r"\20"),
            '#' if i == 0 => out.push_str(r"\23"),
            c => out.push(c),
        }
    }
    out
}

/// Escape a value for use inside a search filter (RFC 4515).
pub fn escape_filter_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ALREADY_EXISTS;

    #[test]
    fn test_escape_dn_value() {
        assert_eq!(escape_dn_value("alice"), "alice");
        assert_eq!(escape_dn_value("alice+smith"), r"alice\+smith");
        assert_eq!(escape_dn_value("admin,dc=evil"), r"admin\,dc\=evil");
        assert_eq!(escape_dn_value(" élise "), r"\20élise\20");
        assert_eq!(escape_dn_value("#1"), r"\231");
        assert_eq!(escape_dn_value("a#1"), "a#1");
        assert_eq!(escape_dn_value(""), "");
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("alice"), "alice");
        assert_eq!(escape_filter_value("*)(cn=*"), r"\2a\29\28cn=\2a");
        assert_eq!(escape_filter_value(r"a\b"), r"a\5cb");
        assert_eq!(escape_filter_value("zoé"), "zoé");
    }

    #[test]
    fn test_config_requires_ldap_scheme() {
        assert!(LdapConfig::new("ldap://localhost:389", "cn=admin", "pw").is_ok());
        assert!(LdapConfig::new("ldaps://ldap.example.org", "cn=admin", "pw").is_ok());
        assert!(matches!(
            LdapConfig::new("https://ldap.example.org", "cn=admin", "pw"),
            Err(LdapConfigError::Scheme(_))
        ));
        assert!(matches!(
            LdapConfig::new("not a url", "cn=admin", "pw"),
            Err(LdapConfigError::Url(_))
        ));
    }

    fn directory(url: &str, timeout: Duration) -> LdapDirectory {
        LdapDirectory::new(
            LdapConfig::new(url, "cn=admin", "pw").unwrap().timeout(timeout),
        )
    }

    #[tokio::test]
    async fn test_timed_out_exchange() {
        let directory =
            directory("ldap://localhost", Duration::from_millis(10));

        let result = directory
            .timed(std::future::pending::<Result<()>>())
            .await;
        assert!(matches!(result, Err(DirectoryError::Timeout)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        // Nothing listens on port 1.
        let directory = directory("ldap://127.0.0.1:1", Duration::from_secs(2));

        let err = directory.search("dc=org", "(cn=a)", &[]).await.unwrap_err();
        assert!(err.is_transient());
        assert!(directory.idle.lock().await.is_empty());
    }

    #[test]
    fn test_check_result_codes() {
        let result = |rc| LdapResult {
            rc,
            matched: String::new(),
            text: "answer".into(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        };

        assert!(check(result(0)).is_ok());
        let err = check(result(ALREADY_EXISTS)).unwrap_err();
        assert!(err.is_already_exists());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_config_debug_hides_credentials() {
        let config =
            LdapConfig::new("ldap://localhost", "cn=admin", "hunter2").unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
