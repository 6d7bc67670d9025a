//! Signing keys, token claims and the token codec.

pub mod claims;
pub mod codec;
pub mod key_ring;
pub mod keys;

pub use claims::{AccessClaims, AccessGrant, AnyClaims, RefreshClaims, TokenClaims, TokenType};
pub use codec::{DEFAULT_INTROSPECTION_GRACE, IssuedToken, TokenCodec, TokenError, Verified};
pub use key_ring::{KeyRing, PublicKeySet, PublishedKey};
pub use keys::{Jwk, Jwks, KeyError, SigningAlgorithm, SigningKeyPair};
