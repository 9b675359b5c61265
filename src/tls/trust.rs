//! Pluggable server-certificate trust strategies.
//!
//! A [`TrustStrategy`] gets the first say on every server certificate chain.
//! Answering `true` accepts the chain outright; answering `false` hands the
//! chain to standard WebPKI chain and hostname validation. Handshake
//! signatures are always verified against the presented certificate.

use std::fmt::Debug;
use std::sync::Arc;

use rustls::DigitallySignedStruct;
use rustls::SignatureScheme;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::{debug, warn};

/// Decides whether a server certificate chain is trusted without further checks.
///
/// `chain` starts with the end-entity certificate followed by the
/// intermediates in the order the server sent them. `server_name` is the
/// name the client is connecting to.
pub trait TrustStrategy: Debug + Send + Sync {
    /// Returns `true` to trust the chain as-is, `false` to fall back to standard validation.
    fn is_trusted(&self, chain: &[CertificateDer<'_>], server_name: &str) -> bool;
}

/// Production default: never short-circuits, every chain goes through standard validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardValidation;

impl TrustStrategy for StandardValidation {
    fn is_trusted(&self, _chain: &[CertificateDer<'_>], _server_name: &str) -> bool {
        false
    }
}

/// INSECURE: trusts every certificate chain, including self-signed and expired ones.
///
/// Only for development against servers with throwaway certificates. Any
/// on-path attacker can impersonate the server when this strategy is in use.
#[derive(Debug, Clone, Copy, Default)]
pub struct DangerAcceptAnyCertificate;

impl TrustStrategy for DangerAcceptAnyCertificate {
    fn is_trusted(&self, _chain: &[CertificateDer<'_>], server_name: &str) -> bool {
        warn!(server = %server_name, "accepting server certificate without validation");
        true
    }
}

/// rustls verifier consulting a [`TrustStrategy`] before WebPKI validation.
#[derive(Debug)]
pub(crate) struct StrategyVerifier {
    strategy: Arc<dyn TrustStrategy>,
    fallback: Arc<WebPkiServerVerifier>,
}

impl StrategyVerifier {
    pub(crate) fn new(strategy: Arc<dyn TrustStrategy>, fallback: Arc<WebPkiServerVerifier>) -> Self {
        Self { strategy, fallback }
    }
}

impl ServerCertVerifier for StrategyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        let name = server_name.to_str();
        if self.strategy.is_trusted(&chain, &name) {
            debug!(server = %name, "server certificate accepted by trust strategy");
            return Ok(ServerCertVerified::assertion());
        }

        self.fallback
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.fallback.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.fallback.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.fallback.supported_verify_schemes()
    }
}
