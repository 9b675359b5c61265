//! Client key material for mutual TLS and extra trust anchors.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use p12_keystore::KeyStore;
use pkcs8::EncryptedPrivateKeyInfo;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, warn};

use crate::error::ClientError;

/// Keystore or certificate bytes, either in memory or on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// Bytes held in memory.
    Bytes(Vec<u8>),
    /// Path to a file, read once when the TLS context is built.
    Path(PathBuf),
}

impl KeyMaterial {
    /// Reads the material. `Ok(None)` means the referenced file does not exist.
    fn read(&self) -> Result<Option<Vec<u8>>, ClientError> {
        match self {
            Self::Bytes(bytes) => Ok(Some(bytes.clone())),
            Self::Path(path) => match std::fs::read(path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
                Err(error) => Err(ClientError::configuration(
                    format!("failed to read key material from {}", path.display()),
                    error,
                )),
            },
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Bytes(bytes) => format!("<{} in-memory bytes>", bytes.len()),
            Self::Path(path) => path.display().to_string(),
        }
    }
}

/// Certificate chain plus private key presented to servers that request client auth.
///
/// Two keystore encodings are accepted:
///
/// - a PEM bundle with at least one `CERTIFICATE` section (leaf first) and one
///   private key section (PKCS#8, PKCS#1 or SEC1). An `ENCRYPTED PRIVATE KEY`
///   section is decrypted with the key password.
/// - a DER-encoded PKCS#12 store, opened with the store password.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredential {
    material: KeyMaterial,
    store_password: Option<String>,
    key_password: Option<String>,
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredential")
            .field("material", &self.material)
            .field("store_password", &self.store_password.as_ref().map(|_| "<redacted>"))
            .field("key_password", &self.key_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ClientCredential {
    /// Credential from in-memory keystore bytes (PEM bundle or PKCS#12).
    #[must_use]
    pub fn from_pem(pem: impl Into<Vec<u8>>) -> Self {
        Self::from_material(KeyMaterial::Bytes(pem.into()))
    }

    /// Credential read from a keystore file when the TLS context is built.
    ///
    /// A missing file is not an error: mutual auth is skipped with a warning.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::from_material(KeyMaterial::Path(path.as_ref().to_path_buf()))
    }

    fn from_material(material: KeyMaterial) -> Self {
        Self {
            material,
            store_password: None,
            key_password: None,
        }
    }

    /// Sets the password protecting a PKCS#12 store.
    #[must_use]
    pub fn with_store_password(mut self, password: impl Into<String>) -> Self {
        self.store_password = Some(password.into());
        self
    }

    /// Sets the password protecting the private key.
    #[must_use]
    pub fn with_key_password(mut self, password: impl Into<String>) -> Self {
        self.key_password = Some(password.into());
        self
    }

    /// Returns the underlying material.
    #[must_use]
    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Loads the chain and key. `Ok(None)` when the referenced file is absent.
    pub(crate) fn load(&self) -> Result<Option<LoadedIdentity>, ClientError> {
        let Some(bytes) = self.material.read()? else {
            warn!(
                source = %self.material.describe(),
                "client key material not found, mutual TLS authentication disabled"
            );
            return Ok(None);
        };

        let identity = if is_der_sequence(&bytes) {
            self.load_pkcs12(&bytes)?
        } else {
            self.load_pem(&bytes)?
        };
        debug!(certificates = identity.chain.len(), "loaded client identity");
        Ok(Some(identity))
    }

    fn load_pem(&self, pem: &[u8]) -> Result<LoadedIdentity, ClientError> {
        let chain = parse_certificates(pem).map_err(|error| {
            ClientError::configuration(
                format!("invalid client certificate in {}", self.material.describe()),
                error,
            )
        })?;
        if chain.is_empty() {
            return Err(ClientError::configuration_msg(format!(
                "no client certificate found in {}",
                self.material.describe()
            )));
        }

        let key = match pem_section(pem, ENCRYPTED_KEY_LABEL) {
            Some(section) => self.decrypt_key(section)?,
            None => PrivateKeyDer::from_pem_slice(pem).map_err(|error| {
                ClientError::configuration(
                    format!("unrecoverable private key in {}", self.material.describe()),
                    error,
                )
            })?,
        };
        Ok(LoadedIdentity { chain, key })
    }

    fn decrypt_key(&self, section: &[u8]) -> Result<PrivateKeyDer<'static>, ClientError> {
        let Some(password) = self.key_password.as_deref() else {
            return Err(ClientError::configuration_msg(format!(
                "private key in {} is encrypted but no key password was given",
                self.material.describe()
            )));
        };
        let context = || format!("unrecoverable private key in {}", self.material.describe());

        let (_, der) = pkcs8::der::pem::decode_vec(section).map_err(|error| {
            ClientError::configuration(context(), pkcs8::der::Error::from(error))
        })?;
        let encrypted = EncryptedPrivateKeyInfo::try_from(der.as_slice())
            .map_err(|error| ClientError::configuration(context(), error))?;
        let decrypted = encrypted.decrypt(password).map_err(|error| {
            ClientError::configuration(
                format!("wrong key password for {}", self.material.describe()),
                error,
            )
        })?;
        Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            decrypted.as_bytes().to_vec(),
        )))
    }

    fn load_pkcs12(&self, der: &[u8]) -> Result<LoadedIdentity, ClientError> {
        let store_password = self.store_password.as_deref().unwrap_or_default();
        if let Some(key_password) = self.key_password.as_deref() {
            if key_password != store_password {
                return Err(ClientError::configuration_msg(format!(
                    "PKCS#12 store {} requires the key password to match the store password",
                    self.material.describe()
                )));
            }
        }

        let store = KeyStore::from_pkcs12(der, store_password).map_err(|error| {
            ClientError::configuration(
                format!(
                    "failed to open PKCS#12 store {} (wrong store password or corrupt data)",
                    self.material.describe()
                ),
                error,
            )
        })?;
        let Some((alias, entry)) = store.private_key_chain() else {
            return Err(ClientError::configuration_msg(format!(
                "no private key entry found in PKCS#12 store {}",
                self.material.describe()
            )));
        };

        let chain: Vec<CertificateDer<'static>> = entry
            .chain()
            .iter()
            .map(|cert| CertificateDer::from(cert.as_der().to_vec()))
            .collect();
        if chain.is_empty() {
            return Err(ClientError::configuration_msg(format!(
                "no client certificate found in {}",
                self.material.describe()
            )));
        }
        debug!(alias, "using PKCS#12 key entry");
        Ok(LoadedIdentity {
            chain,
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(entry.key().to_vec())),
        })
    }
}

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// PKCS#12 stores are raw DER; PEM always starts with text.
fn is_der_sequence(bytes: &[u8]) -> bool {
    bytes.first() == Some(&0x30)
}

/// Slices one complete `-----BEGIN label-----` .. `-----END label-----` section.
fn pem_section<'a>(pem: &'a [u8], label: &str) -> Option<&'a [u8]> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = find(pem, begin.as_bytes())?;
    let stop = start + find(&pem[start..], end.as_bytes())? + end.len();
    Some(&pem[start..stop])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parsed client identity, ready for the TLS stack.
pub(crate) struct LoadedIdentity {
    pub(crate) chain: Vec<CertificateDer<'static>>,
    pub(crate) key: PrivateKeyDer<'static>,
}

/// Reads every certificate in a PEM trust-anchor bundle.
pub(crate) fn load_trust_anchors(
    material: &KeyMaterial,
) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let Some(pem) = material.read()? else {
        return Err(ClientError::configuration_msg(format!(
            "trust anchor file not found: {}",
            material.describe()
        )));
    };
    let certs = parse_certificates(&pem).map_err(|error| {
        ClientError::configuration(
            format!("invalid trust anchor in {}", material.describe()),
            error,
        )
    })?;
    if certs.is_empty() {
        return Err(ClientError::configuration_msg(format!(
            "no certificates found in trust anchor {}",
            material.describe()
        )));
    }
    Ok(certs)
}

fn parse_certificates(
    pem: &[u8],
) -> Result<Vec<CertificateDer<'static>>, rustls::pki_types::pem::Error> {
    CertificateDer::pem_slice_iter(pem).collect()
}
