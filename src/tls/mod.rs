//! TLS context construction: trust policy, extra anchors, optional client identity.
//!
//! [`TlsContextBuilder::build`] turns a [`TlsConfig`] into a [`TlsContext`]
//! holding a ready `rustls::ClientConfig` that the pool hands to reqwest.

mod credential;
mod trust;

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info, instrument};

use crate::error::ClientError;

pub use credential::{ClientCredential, KeyMaterial};
pub use trust::{DangerAcceptAnyCertificate, StandardValidation, TrustStrategy};

use credential::load_trust_anchors;
use trust::StrategyVerifier;

/// Inputs for building a [`TlsContext`].
#[derive(Debug, Clone)]
pub struct TlsConfig {
    trust_strategy: Arc<dyn TrustStrategy>,
    trust_anchors: Vec<KeyMaterial>,
    client_credential: Option<ClientCredential>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            trust_strategy: Arc::new(StandardValidation),
            trust_anchors: Vec::new(),
            client_credential: None,
        }
    }
}

impl TlsConfig {
    /// Standard validation against the bundled WebPKI roots, no client identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the trust strategy consulted before standard validation.
    #[must_use]
    pub fn with_trust_strategy(mut self, strategy: impl TrustStrategy + 'static) -> Self {
        self.trust_strategy = Arc::new(strategy);
        self
    }

    /// Adds a PEM bundle of extra root certificates.
    #[must_use]
    pub fn with_trust_anchor(mut self, anchor: KeyMaterial) -> Self {
        self.trust_anchors.push(anchor);
        self
    }

    /// Enables mutual authentication with the given credential.
    #[must_use]
    pub fn with_client_credential(mut self, credential: ClientCredential) -> Self {
        self.client_credential = Some(credential);
        self
    }

    /// The configured trust strategy.
    #[must_use]
    pub fn trust_strategy(&self) -> &Arc<dyn TrustStrategy> {
        &self.trust_strategy
    }

    /// Extra trust anchors, in the order they were added.
    #[must_use]
    pub fn trust_anchors(&self) -> &[KeyMaterial] {
        &self.trust_anchors
    }

    /// The client credential, if mutual authentication was requested.
    #[must_use]
    pub fn client_credential(&self) -> Option<&ClientCredential> {
        self.client_credential.as_ref()
    }
}

/// A built TLS context, cheap to clone.
#[derive(Debug, Clone)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
    mutual_auth: bool,
}

impl TlsContext {
    /// A copy of the underlying rustls client configuration.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::clone(&self.config)
    }

    /// Whether a client identity was loaded and will be offered to servers.
    #[must_use]
    pub fn mutual_auth(&self) -> bool {
        self.mutual_auth
    }
}

/// Builds [`TlsContext`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsContextBuilder;

impl TlsContextBuilder {
    /// Builds a TLS context from `config`.
    ///
    /// Order: trust policy, extra anchors, client identity. A credential
    /// path that does not exist only disables mutual auth; every other
    /// key-material problem is a [`ClientError::Configuration`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] when trust anchors or the
    /// client identity cannot be loaded or are rejected by rustls.
    #[instrument(skip(config), fields(anchors = config.trust_anchors.len()))]
    pub fn build(config: &TlsConfig) -> Result<TlsContext, ClientError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for anchor in &config.trust_anchors {
            for cert in load_trust_anchors(anchor)? {
                roots.add(cert).map_err(|error| {
                    ClientError::configuration("trust anchor rejected by TLS stack", error)
                })?;
            }
        }
        debug!(roots = roots.len(), "trust store assembled");

        let fallback = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .build()
            .map_err(|error| {
                ClientError::configuration("failed to build certificate verifier", error)
            })?;
        let verifier = StrategyVerifier::new(Arc::clone(&config.trust_strategy), fallback);

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|error| {
                ClientError::configuration("failed to select TLS protocol versions", error)
            })?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier));

        let identity = match &config.client_credential {
            Some(credential) => credential.load()?,
            None => None,
        };
        let mutual_auth = identity.is_some();

        let mut client_config = match identity {
            Some(identity) => builder
                .with_client_auth_cert(identity.chain, identity.key)
                .map_err(|error| {
                    ClientError::configuration("client identity rejected by TLS stack", error)
                })?,
            None => builder.with_no_client_auth(),
        };
        client_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        info!(mutual_auth, "TLS context built");
        Ok(TlsContext {
            config: Arc::new(client_config),
            mutual_auth,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_context_has_no_client_auth() {
        let context = TlsContextBuilder::build(&TlsConfig::default()).unwrap();
        assert!(!context.mutual_auth());
        assert_eq!(context.client_config().alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_valid_identity_enables_mutual_auth() {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["client.test".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let bundle = format!("{}{}", cert.pem(), key.serialize_pem());
        let config = TlsConfig::new()
            .with_trust_anchor(KeyMaterial::Bytes(cert.pem().into_bytes()))
            .with_client_credential(ClientCredential::from_pem(bundle));

        let context = TlsContextBuilder::build(&config).unwrap();
        assert!(context.mutual_auth());
        assert!(context.client_config().client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_missing_credential_path_skips_mutual_auth() {
        let dir = TempDir::new().unwrap();
        let config = TlsConfig::new()
            .with_client_credential(ClientCredential::from_path(dir.path().join("absent.pem")));
        let context = TlsContextBuilder::build(&config).unwrap();
        assert!(!context.mutual_auth());
    }

    #[test]
    fn test_corrupt_credential_is_configuration_error() {
        let config = TlsConfig::new()
            .with_client_credential(ClientCredential::from_pem(b"garbage".to_vec()));
        let error = TlsContextBuilder::build(&config).unwrap_err();
        assert!(
            matches!(error, ClientError::Configuration { .. }),
            "Expected Configuration, got: {error:?}"
        );
    }

    #[test]
    fn test_invalid_trust_anchor_is_configuration_error() {
        let config = TlsConfig::new().with_trust_anchor(KeyMaterial::Bytes(b"nope".to_vec()));
        let error = TlsContextBuilder::build(&config).unwrap_err();
        assert!(matches!(error, ClientError::Configuration { .. }));
    }

    #[test]
    fn test_accept_any_strategy_builds() {
        let config = TlsConfig::new().with_trust_strategy(DangerAcceptAnyCertificate);
        let context = TlsContextBuilder::build(&config).unwrap();
        assert!(!context.mutual_auth());
    }
}
