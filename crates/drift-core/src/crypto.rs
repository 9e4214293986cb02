//! Ed25519 cryptographic operations for the Drift protocol.
//!
//! Provides key generation, input signing, signature verification and
//! address derivation. Uses ed25519-dalek for Ed25519 and BLAKE3 for
//! addresses.
//!
//! # Signing scheme
//!
//! Each input is signed independently. The signed message is the outpoint
//! being spent: `transaction_id (32 bytes) || output_index (u16 LE)`.

use std::fmt;

use ed25519_dalek::{Signer as _, Verifier as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;
use crate::traits::{Signer, Verifier};
use crate::types::{Address, Input, OutPoint, signing_message};

/// Ed25519 keypair.
///
/// Wraps [`ed25519_dalek::SigningKey`]. Use [`KeyPair::generate`] for random
/// keys or [`KeyPair::from_secret_bytes`] for deterministic derivation.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    /// Parse a keypair from a 64-character hex secret.
    pub fn from_secret_hex(text: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(text.trim()).map_err(|_| CryptoError::InvalidPublicKey)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self::from_secret_bytes(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Build an input spending `outpoint`, signed by this key.
    pub fn sign_input(&self, outpoint: &OutPoint) -> Input {
        sign_input(self, outpoint)
    }
}

impl Signer for KeyPair {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: &[u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// BLAKE3 of the raw key: the address owning outputs sent to this key.
    pub fn address(&self) -> Address {
        address_of(&self.to_bytes())
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature: &[u8; 64] =
            signature.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Address derived from raw public key bytes.
pub fn address_of(public_key: &[u8]) -> Address {
    Address(blake3::hash(public_key).into())
}

/// Build an input spending `outpoint`, signed by `signer`.
pub fn sign_input(signer: &dyn Signer, outpoint: &OutPoint) -> Input {
    let message = signing_message(outpoint);
    Input {
        output_index: outpoint.output_index,
        transaction_id: outpoint.transaction_id,
        public_key: signer.public_key(),
        signature: signer.sign(&message),
    }
}

/// [`Verifier`] for Ed25519 signatures and BLAKE3 addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], public_key: &[u8], signature: &[u8]) -> bool {
        PublicKey::from_bytes(public_key)
            .and_then(|pk| pk.verify(message, signature))
            .is_ok()
    }

    fn address(&self, public_key: &[u8]) -> Result<Address, CryptoError> {
        let pk = PublicKey::from_bytes(public_key)?;
        Ok(pk.address())
    }
}
