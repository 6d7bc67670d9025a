//! Asymmetric signing keys and their JWK representation.
//!
//! Key IDs are RFC 7638 thumbprints of the public key, so the same key
//! material always publishes under the same `kid` no matter which process
//! generated or loaded it.
//!
//! ## Supported Algorithms
//!
//! - **RS256**: RSA 2048 with SHA-256 (default)
//! - **RS384**: RSA 2048 with SHA-384
//! - **ES384**: ECDSA over P-384

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

const RSA_KEY_BITS: usize = 2048;
const EC_CURVE: &str = "P-384";

/// Errors raised while creating, loading or looking up signing keys.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    /// The platform could not produce new key material.
    #[error("Key generation error: {message}")]
    KeyGeneration {
        /// Description of the generation failure.
        message: String,
    },

    /// Key material could not be parsed or is inconsistent.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },

    /// No key with this ID is held.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// The key ID that was looked up.
        kid: String,
    },

    /// The active signing key cannot be withdrawn from publication.
    #[error("Key {kid} is the active signing key")]
    ActiveKey {
        /// The active key ID.
        kid: String,
    },
}

impl KeyError {
    /// Creates a new `KeyGeneration` error.
    #[must_use]
    pub fn key_generation(message: impl Into<String>) -> Self {
        Self::KeyGeneration {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported token signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    #[default]
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with the P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(KeyError::invalid_key(format!(
                "unsupported algorithm '{other}'"
            ))),
        }
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// JSON Web Key (public half only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig").
    #[serde(rename = "use", default = "default_key_use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

fn default_key_use() -> String {
    "sig".to_string()
}

impl Jwk {
    /// Builds a verification key from the published components.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the key type is unknown or components are missing.
    pub fn decoding_key(&self) -> Result<DecodingKey, KeyError> {
        match self.kty.as_str() {
            "RSA" => {
                let (n, e) = self
                    .n
                    .as_deref()
                    .zip(self.e.as_deref())
                    .ok_or_else(|| KeyError::invalid_key(format!("{}: missing n/e", self.kid)))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| KeyError::invalid_key(e.to_string()))
            }
            "EC" => {
                let (x, y) = self
                    .x
                    .as_deref()
                    .zip(self.y.as_deref())
                    .ok_or_else(|| KeyError::invalid_key(format!("{}: missing x/y", self.kid)))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| KeyError::invalid_key(e.to_string()))
            }
            other => Err(KeyError::invalid_key(format!("unsupported key type '{other}'"))),
        }
    }
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// Public key components, kept for JWK export and thumbprinting.
enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// An asymmetric signing key pair. Immutable once created.
pub struct SigningKeyPair {
    kid: String,
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
    created_at: OffsetDateTime,
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// Generates a fresh key pair for `algorithm`.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if the system cannot produce key material.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, KeyError> {
        if algorithm.is_rsa() {
            Self::generate_rsa(algorithm)
        } else {
            Self::generate_ec()
        }
    }

    fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        Ok(Self::assemble(
            algorithm,
            encoding_key,
            decoding_key,
            PublicKeyData::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            },
        ))
    }

    fn generate_ec() -> Result<Self, KeyError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let (x, y) = ec_coordinates(&secret_key).map_err(KeyError::key_generation)?;
        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(&x),
            &URL_SAFE_NO_PAD.encode(&y),
        )
        .map_err(|e| KeyError::key_generation(e.to_string()))?;

        Ok(Self::assemble(
            SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            PublicKeyData::Ec { x, y },
        ))
    }

    /// Loads a key pair from a PKCS#8 private key PEM.
    ///
    /// For RSA keys the matching SPKI public key PEM is required; EC public
    /// keys are derived from the private scalar.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the PEM data cannot be parsed for `algorithm`.
    pub fn from_pem(
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: Option<&str>,
    ) -> Result<Self, KeyError> {
        if algorithm.is_rsa() {
            let public_pem = public_pem
                .ok_or_else(|| KeyError::invalid_key("RSA keys require a public key PEM"))?;
            let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;
            let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;

            Ok(Self::assemble(
                algorithm,
                encoding_key,
                decoding_key,
                PublicKeyData::Rsa {
                    n: public_key.n().to_bytes_be(),
                    e: public_key.e().to_bytes_be(),
                },
            ))
        } else {
            let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;
            let (x, y) = ec_coordinates(&secret_key).map_err(KeyError::invalid_key)?;
            let decoding_key = DecodingKey::from_ec_components(
                &URL_SAFE_NO_PAD.encode(&x),
                &URL_SAFE_NO_PAD.encode(&y),
            )
            .map_err(|e| KeyError::invalid_key(e.to_string()))?;

            Ok(Self::assemble(
                algorithm,
                encoding_key,
                decoding_key,
                PublicKeyData::Ec { x, y },
            ))
        }
    }

    fn assemble(
        algorithm: SigningAlgorithm,
        encoding_key: EncodingKey,
        decoding_key: DecodingKey,
        public_key_data: PublicKeyData,
    ) -> Self {
        Self {
            kid: thumbprint(&public_key_data),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Key ID (RFC 7638 thumbprint).
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        let (kty, n, e, crv, x, y) = match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => (
                "RSA",
                Some(URL_SAFE_NO_PAD.encode(n)),
                Some(URL_SAFE_NO_PAD.encode(e)),
                None,
                None,
                None,
            ),
            PublicKeyData::Ec { x, y } => (
                "EC",
                None,
                None,
                Some(EC_CURVE.to_string()),
                Some(URL_SAFE_NO_PAD.encode(x)),
                Some(URL_SAFE_NO_PAD.encode(y)),
            ),
        };
        Jwk {
            kty: kty.to_string(),
            kid: self.kid.clone(),
            use_: default_key_use(),
            alg: self.algorithm.as_str().to_string(),
            n,
            e,
            crv,
            x,
            y,
        }
    }
}

fn ec_coordinates(secret_key: &EcSecretKey) -> Result<(Vec<u8>, Vec<u8>), String> {
    let signing_key = EcSigningKey::from(secret_key);
    let point = signing_key.verifying_key().to_encoded_point(false);
    let x = point.x().ok_or("missing x coordinate")?;
    let y = point.y().ok_or("missing y coordinate")?;
    Ok((x.to_vec(), y.to_vec()))
}

/// RFC 7638 JWK thumbprint: SHA-256 over the required members in
/// lexicographic order, base64url without padding.
fn thumbprint(data: &PublicKeyData) -> String {
    let canonical = match data {
        PublicKeyData::Rsa { n, e } => format!(
            r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
            URL_SAFE_NO_PAD.encode(e),
            URL_SAFE_NO_PAD.encode(n)
        ),
        PublicKeyData::Ec { x, y } => format!(
            r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
            EC_CURVE,
            URL_SAFE_NO_PAD.encode(x),
            URL_SAFE_NO_PAD.encode(y)
        ),
    };
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}
