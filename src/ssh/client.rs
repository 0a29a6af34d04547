//! SSH Client implementation using russh

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;

/// SSH Client: connects and authenticates one connection
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect to the SSH server and return an authenticated handle
    pub async fn connect(self) -> Result<Handle<ClientHandler>, SshError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.host_key_fingerprint.clone(),
        );

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout("Connection timed out".to_string()))?
        .map_err(|e| match e {
            SshError::HostKeyMismatch { .. } => e,
            other => SshError::ConnectionFailed(other.to_string()),
        })?;

        debug!("SSH handshake completed");

        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(e.to_string()))?;

                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!(
            "SSH authentication successful for {}@{}",
            self.config.username, addr
        );

        Ok(handle)
    }
}

/// Compute the SHA256 fingerprint of a public key (`SHA256:<base64>`)
pub fn fingerprint(key: &PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// Check a presented fingerprint against the pinned one, if any
fn verify_fingerprint(
    host: &str,
    port: u16,
    pinned: Option<&str>,
    actual: &str,
) -> Result<(), SshError> {
    match pinned {
        Some(expected) if expected.trim_end_matches('=') != actual => {
            warn!(
                "Host key mismatch for {}:{}: expected {}, got {}",
                host, port, expected, actual
            );
            Err(SshError::HostKeyMismatch {
                host: format!("{}:{}", host, port),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
        Some(_) => {
            info!("Host key verified for {}:{}", host, port);
            Ok(())
        }
        None => {
            info!(
                "Accepting host key for {}:{} (fingerprint: {})",
                host, port, actual
            );
            Ok(())
        }
    }
}

/// Client handler for russh callbacks
pub struct ClientHandler {
    host: String,
    port: u16,
    pinned_fingerprint: Option<String>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, pinned_fingerprint: Option<String>) -> Self {
        Self {
            host,
            port,
            pinned_fingerprint,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let actual = fingerprint(server_public_key);
        verify_fingerprint(
            &self.host,
            self.port,
            self.pinned_fingerprint.as_deref(),
            &actual,
        )?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpinned_key_is_accepted() {
        assert!(verify_fingerprint("h", 22, None, "SHA256:abc").is_ok());
    }

    #[test]
    fn test_pinned_key_must_match() {
        assert!(verify_fingerprint("h", 22, Some("SHA256:abc"), "SHA256:abc").is_ok());
        // Padding in the pinned value is tolerated
        assert!(verify_fingerprint("h", 22, Some("SHA256:abc="), "SHA256:abc").is_ok());

        let err = verify_fingerprint("h", 2222, Some("SHA256:abc"), "SHA256:xyz").unwrap_err();
        match err {
            SshError::HostKeyMismatch { host, .. } => assert_eq!(host, "h:2222"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
