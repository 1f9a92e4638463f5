//! Passphrase based encryption parameters
//!
//! Key material is derived with PBKDF2-HMAC-SHA256; payloads are sealed with
//! ChaCha20-Poly1305 and carry their nonce as a prefix.

use crate::error::{PipeError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey};
use ring::{aead, pbkdf2, rand};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::NonZeroU32;

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const DEFAULT_ITERATIONS: u32 = 20_000;

/// Derives symmetric key material from a passphrase
pub trait EncryptionParameterProvider {
    fn derive(&self, passphrase: &str) -> Result<KeyMaterial>;
}

/// 256-bit derived key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// Salt and work factor for PBKDF2. The salt is base64 in serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassphraseCryptoConfig {
    #[serde(serialize_with = "salt_to_base64", deserialize_with = "salt_from_base64")]
    pub salt: Vec<u8>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn salt_to_base64<S: Serializer>(salt: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(salt))
}

fn salt_from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
}

impl PassphraseCryptoConfig {
    pub fn new(salt: Vec<u8>, iterations: u32) -> Self {
        Self { salt, iterations }
    }

    /// Fresh random salt with the default iteration count
    pub fn generate() -> Result<Self> {
        Ok(Self::new(generate_salt()?.to_vec(), DEFAULT_ITERATIONS))
    }
}

pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let rng = rand::SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rand::SecureRandom::fill(&rng, &mut salt)
        .map_err(|_| PipeError::Crypto("Failed to generate salt".into()))?;
    Ok(salt)
}

/// Encryption service keyed by a passphrase
pub struct PassphraseEncryptionService {
    key: LessSafeKey,
    rng: rand::SystemRandom,
}

impl PassphraseEncryptionService {
    pub fn new(config: &PassphraseCryptoConfig, passphrase: &str) -> Result<Self> {
        let key = config.derive(passphrase)?;
        let unbound = UnboundKey::new(&aead::CHACHA20_POLY1305, key.as_bytes())
            .map_err(|e| PipeError::Crypto(format!("Key setup failed: {:?}", e)))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: rand::SystemRandom::new(),
        })
    }

    /// Returns `nonce || ciphertext || tag`
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::SecureRandom::fill(&self.rng, &mut nonce_bytes)
            .map_err(|_| PipeError::Crypto("Failed to generate nonce".into()))?;

        let mut sealed = data.to_vec();
        self.key
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut sealed)
            .map_err(|_| PipeError::Crypto("Encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(PipeError::Crypto("Ciphertext too short".into()));
        }

        let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| PipeError::Crypto("Invalid nonce".into()))?;

        let mut opened = sealed.to_vec();
        let plain_len = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut opened)
            .map_err(|_| PipeError::Crypto("Decryption failed - wrong passphrase?".into()))?
            .len();
        opened.truncate(plain_len);
        Ok(opened)
    }
}

impl EncryptionParameterProvider for PassphraseCryptoConfig {
    fn derive(&self, passphrase: &str) -> Result<KeyMaterial> {
        let iterations = NonZeroU32::new(self.iterations)
            .ok_or_else(|| PipeError::Crypto("Iteration count must be non-zero".into()))?;
        if self.salt.is_empty() {
            return Err(PipeError::Crypto("Salt is empty".into()));
        }

        let mut key = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            &self.salt,
            passphrase.as_bytes(),
            &mut key,
        );
        Ok(KeyMaterial(key))
    }
}
