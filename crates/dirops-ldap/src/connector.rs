//! `ldap3`-backed implementation of the directory capability traits.

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry, SearchResult};
use native_tls::{Certificate, TlsConnector};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use dirops_core::config::ConnectionConfig;
use dirops_core::credential::BindCredential;
use dirops_core::{ConnectFailure, Error, ModifyFailure};

use crate::adapter::{DirectoryAdapter, DirectoryHandle, MEMBER_ATTRIBUTE};
use crate::entry::DirectoryEntry;
use crate::Result;

const RC_SUCCESS: u32 = 0;
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
const RC_INVALID_CREDENTIALS: u32 = 49;
const RC_INSUFFICIENT_ACCESS: u32 = 50;
const RC_BUSY: u32 = 51;
const RC_UNAVAILABLE: u32 = 52;
const RC_SERVER_DOWN: u32 = 81;
const RC_FILTER_ERROR: u32 = 87;

/// Builds the LDAP URL for a controller.
///
/// A bare host name (optionally `host:port`) gets the `ldap://` or `ldaps://` scheme from the
/// connection settings; an explicit URL is validated and passed through.
///
/// # Errors
///
/// Returns [`Error::ConfigError`] for an empty controller or an unparseable URL.
pub fn controller_url(controller: &str, connection: &ConnectionConfig) -> Result<String> {
    let controller = controller.trim();
    if controller.is_empty() {
        return Err(Error::ConfigError(
            "domain controller cannot be empty".to_string(),
        ));
    }

    let raw = if controller.contains("://") {
        controller.to_string()
    } else {
        let scheme = if connection.use_tls { "ldaps" } else { "ldap" };
        match connection.port {
            Some(port) if !controller.contains(':') => format!("{scheme}://{controller}:{port}"),
            _ => format!("{scheme}://{controller}"),
        }
    };

    let url = Url::parse(&raw)?;
    if !matches!(url.scheme(), "ldap" | "ldaps") {
        return Err(Error::ConfigError(format!(
            "unsupported scheme `{}` for controller `{controller}`",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::ConfigError(format!(
            "controller `{controller}` has no host"
        )));
    }

    Ok(raw)
}

/// Directory adapter that talks to Active Directory through `ldap3`.
#[derive(Clone)]
pub struct LdapAdapter {
    connection: Arc<ConnectionConfig>,
}

impl LdapAdapter {
    /// Creates an adapter using the given connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the TLS settings cannot be turned into a connector
    /// (unreadable or invalid CA certificate).
    pub fn new(connection: ConnectionConfig) -> Result<Self> {
        build_ldap_settings(&connection)?;
        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    /// The connection settings in use.
    #[must_use]
    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }
}

#[async_trait]
impl DirectoryAdapter for LdapAdapter {
    async fn bind(
        &self,
        controller: &str,
        credential: &BindCredential,
    ) -> Result<Box<dyn DirectoryHandle>> {
        if credential.is_incomplete() {
            return Err(Error::connection(
                ConnectFailure::AuthenticationRejected,
                "bind identity and password are required",
            ));
        }

        let (url, settings) = controller_url(controller, &self.connection)
            .and_then(|url| Ok((url, build_ldap_settings(&self.connection)?)))
            .map_err(|err| Error::connection(ConnectFailure::Other, err.to_string()))?;

        debug!(%url, identity = credential.identity(), "Opening directory connection");
        let (conn, mut ldap) = timeout(
            self.connection.connection_timeout(),
            LdapConnAsync::with_settings(settings, &url),
        )
        .await
        .map_err(|_| {
            Error::connection(
                ConnectFailure::TimedOut,
                format!("connection to `{controller}` timed out"),
            )
        })?
        .map_err(|err| connect_error(controller, &err))?;
        ldap3::drive!(conn);

        let operation_timeout = self.connection.operation_timeout();
        let outcome = timeout(
            operation_timeout,
            ldap.simple_bind(credential.identity(), credential.expose_password()),
        )
        .await;

        let failure = match outcome {
            Err(_) => Error::connection(
                ConnectFailure::TimedOut,
                format!("bind to `{controller}` timed out"),
            ),
            Ok(Err(err)) => connect_error(controller, &err),
            Ok(Ok(result)) if result.rc == RC_SUCCESS => {
                debug!(%url, "Bind succeeded");
                return Ok(Box::new(LdapHandle {
                    inner: ldap,
                    operation_timeout,
                }));
            }
            Ok(Ok(result)) => bind_error(result.rc, &result.text),
        };

        if let Err(err) = timeout(operation_timeout, ldap.unbind()).await {
            warn!(%url, "Releasing failed bind timed out: {err}");
        }
        Err(failure)
    }
}

struct LdapHandle {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

#[async_trait]
impl DirectoryHandle for LdapHandle {
    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>> {
        debug!(base_dn, filter, "Directory search");
        let SearchResult(entries, result) = timeout(
            self.operation_timeout,
            self.inner
                .search(base_dn, Scope::Subtree, filter, attributes.to_vec()),
        )
        .await
        .map_err(|_| Error::Timeout("directory search timed out".to_string()))?
        .map_err(|err| directory_error("search", &err))?;

        match result.rc {
            RC_SUCCESS => {}
            RC_SIZE_LIMIT_EXCEEDED => {
                warn!(base_dn, filter, returned = entries.len(), "Search size limit exceeded, results truncated");
            }
            rc => return Err(search_error(rc, &result.text)),
        }

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs,
            })
            .collect())
    }

    async fn modify_add_member(&mut self, group_dn: &str, user_dn: &str) -> Result<()> {
        debug!(group_dn, user_dn, "Adding group member");
        let mods = vec![Mod::Add(
            MEMBER_ATTRIBUTE.to_string(),
            HashSet::from([user_dn.to_string()]),
        )];

        let result = timeout(self.operation_timeout, self.inner.modify(group_dn, mods))
            .await
            .map_err(|_| {
                Error::modify(ModifyFailure::Unreachable, "directory modify timed out")
            })?
            .map_err(|err| modify_protocol_error(&err))?;

        if result.rc == RC_SUCCESS {
            Ok(())
        } else {
            Err(modify_error(result.rc, &result.text))
        }
    }

    async fn close(&mut self) -> Result<()> {
        timeout(self.operation_timeout, self.inner.unbind())
            .await
            .map_err(|_| Error::Timeout("directory unbind timed out".to_string()))?
            .map_err(|err| directory_error("unbind", &err))
    }
}

fn build_ldap_settings(config: &ConnectionConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if !config.tls_verify {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = &config.tls_ca_cert {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read directory CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|err| {
            Error::ConfigError(format!("invalid directory CA certificate: {err}"))
        })?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to load directory CA certificate: {err}"))
            })?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

fn is_transport_error(err: &LdapError) -> bool {
    matches!(
        err,
        LdapError::Io { .. } | LdapError::EndOfStream | LdapError::Timeout { .. }
    )
}

fn connect_error(controller: &str, err: &LdapError) -> Error {
    match err {
        LdapError::Timeout { .. } => Error::connection(
            ConnectFailure::TimedOut,
            format!("connection to `{controller}` timed out"),
        ),
        LdapError::Io { .. } | LdapError::EndOfStream => Error::connection(
            ConnectFailure::Unreachable,
            format!("controller `{controller}` is unreachable: {err}"),
        ),
        _ => Error::connection(ConnectFailure::Other, err.to_string()),
    }
}

fn directory_error(operation: &str, err: &LdapError) -> Error {
    Error::Directory {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

fn with_text(rc: u32, text: &str) -> String {
    if text.trim().is_empty() {
        format!("result code {rc}")
    } else {
        format!("result code {rc}: {}", text.trim())
    }
}

fn bind_error(rc: u32, text: &str) -> Error {
    let reason = match rc {
        RC_INVALID_CREDENTIALS => ConnectFailure::AuthenticationRejected,
        RC_BUSY | RC_UNAVAILABLE | RC_SERVER_DOWN => ConnectFailure::Unreachable,
        _ => ConnectFailure::Other,
    };
    Error::connection(reason, with_text(rc, text))
}

fn search_error(rc: u32, text: &str) -> Error {
    match rc {
        RC_FILTER_ERROR => Error::Query(with_text(rc, text)),
        _ => Error::Directory {
            operation: "search".to_string(),
            message: with_text(rc, text),
        },
    }
}

// The change may have been applied, so none of these are retryable.
fn modify_protocol_error(err: &LdapError) -> Error {
    let reason = if is_transport_error(err) {
        ModifyFailure::Unreachable
    } else {
        ModifyFailure::Other
    };
    Error::modify(reason, err.to_string())
}

fn modify_error(rc: u32, text: &str) -> Error {
    let reason = match rc {
        RC_INSUFFICIENT_ACCESS => ModifyFailure::PermissionDenied,
        RC_NO_SUCH_OBJECT => ModifyFailure::NoSuchObject,
        RC_ATTRIBUTE_OR_VALUE_EXISTS => ModifyFailure::AlreadyMember,
        RC_BUSY | RC_UNAVAILABLE | RC_SERVER_DOWN => ModifyFailure::Unreachable,
        _ => ModifyFailure::Other,
    };
    Error::modify(reason, with_text(rc, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn controller_url_applies_scheme_and_port() {
        let plain = ConnectionConfig::new();
        assert_eq!(
            controller_url("dc1.example.com", &plain).unwrap(),
            "ldap://dc1.example.com"
        );

        let tls = ConnectionConfig::new().with_tls(true).with_port(3269);
        assert_eq!(
            controller_url(" dc1.example.com ", &tls).unwrap(),
            "ldaps://dc1.example.com:3269"
        );
        assert_eq!(
            controller_url("dc1.example.com:636", &tls).unwrap(),
            "ldaps://dc1.example.com:636"
        );
        assert_eq!(
            controller_url("ldap://10.0.0.5:389", &tls).unwrap(),
            "ldap://10.0.0.5:389"
        );
    }

    #[test]
    fn controller_url_rejects_bad_input() {
        let config = ConnectionConfig::new();
        assert!(matches!(
            controller_url("  ", &config),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            controller_url("https://dc1.example.com", &config),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn bind_result_codes_map_to_connect_failures() {
        assert!(matches!(
            bind_error(49, "80090308: LdapErr: DSID-0C09042A"),
            Error::Connection {
                reason: ConnectFailure::AuthenticationRejected,
                ..
            }
        ));
        assert!(matches!(
            bind_error(52, ""),
            Error::Connection {
                reason: ConnectFailure::Unreachable,
                ..
            }
        ));
        assert!(matches!(
            bind_error(1, "operations error"),
            Error::Connection {
                reason: ConnectFailure::Other,
                ..
            }
        ));
    }

    #[test]
    fn modify_result_codes_keep_verbatim_text() {
        match modify_error(50, "00002098: SecErr: DSID-03150F94") {
            Error::Modify { reason, message } => {
                assert_eq!(reason, ModifyFailure::PermissionDenied);
                assert_eq!(message, "result code 50: 00002098: SecErr: DSID-03150F94");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            modify_error(32, ""),
            Error::Modify {
                reason: ModifyFailure::NoSuchObject,
                ..
            }
        ));
        assert!(matches!(
            modify_error(20, ""),
            Error::Modify {
                reason: ModifyFailure::AlreadyMember,
                ..
            }
        ));
        assert!(matches!(
            modify_error(81, ""),
            Error::Modify {
                reason: ModifyFailure::Unreachable,
                ..
            }
        ));
    }

    #[test]
    fn modify_protocol_failures_are_never_retryable() {
        let dropped = modify_protocol_error(&LdapError::EndOfStream);
        assert!(matches!(
            dropped,
            Error::Modify {
                reason: ModifyFailure::Unreachable,
                ..
            }
        ));
        assert!(!dropped.is_retryable());

        let other = modify_protocol_error(&LdapError::FilterParsing);
        assert!(matches!(
            other,
            Error::Modify {
                reason: ModifyFailure::Other,
                ..
            }
        ));
        assert!(!other.is_retryable());
        assert!(!modify_error(52, "unavailable").is_retryable());
    }

    #[tokio::test]
    async fn malformed_controller_is_a_connection_error() {
        let adapter = LdapAdapter::new(ConnectionConfig::new()).unwrap();
        let credential = BindCredential::from_password("EXAMPLE\\operator", "secret");
        for controller in ["https://dc1.example.com", "  "] {
            let err = adapter.bind(controller, &credential).await.err().unwrap();
            assert!(matches!(
                err,
                Error::Connection {
                    reason: ConnectFailure::Other,
                    ..
                }
            ));
        }
    }

    #[test]
    fn search_filter_error_is_a_query_error() {
        assert!(matches!(search_error(87, "bad filter"), Error::Query(_)));
        assert!(matches!(search_error(1, ""), Error::Directory { .. }));
    }

    #[test]
    fn adapter_rejects_unreadable_ca_certificate() {
        let config = ConnectionConfig::new()
            .with_tls(true)
            .with_ca_cert("/nonexistent/ca.pem".into());
        assert!(matches!(LdapAdapter::new(config), Err(Error::ConfigError(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let config = ConnectionConfig::new().with_ca_cert(file.path().to_path_buf());
        assert!(matches!(LdapAdapter::new(config), Err(Error::ConfigError(_))));
    }

    #[tokio::test]
    async fn incomplete_credential_is_rejected_before_connecting() {
        let adapter = LdapAdapter::new(ConnectionConfig::new()).unwrap();
        let credential = BindCredential::from_password("EXAMPLE\\operator", "");
        let err = adapter
            .bind("dc1.example.com", &credential)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Connection {
                reason: ConnectFailure::AuthenticationRejected,
                ..
            }
        ));
    }
}
