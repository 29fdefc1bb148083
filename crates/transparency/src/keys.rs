//! Public key lookup by key id.

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;

use crate::error::TransparencyError;

pub trait KeyResolver {
    fn resolve(&self, key_id: &str) -> Option<VerifyingKey>;
}

/// Key identifier: first 16 hex characters of BLAKE3(public key bytes).
pub fn key_id(verifying_key: &VerifyingKey) -> String {
    let hash = blake3::hash(&verifying_key.to_bytes());
    hash.to_hex()[..16].to_string()
}

/// Decode a base64 (standard alphabet) Ed25519 public key.
pub fn decode_public_key(b64: &str) -> Result<VerifyingKey, TransparencyError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| TransparencyError::Key(format!("invalid public key base64: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TransparencyError::Key("public key must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&array).map_err(|e| TransparencyError::Key(format!("invalid public key: {e}")))
}

#[derive(Deserialize)]
struct RegistryFile {
    keys: Vec<RegistryEntry>,
}

#[derive(Deserialize)]
struct RegistryEntry {
    key_id: String,
    public_key: String,
}

/// Known signing keys, loaded from `{"keys":[{"key_id":..,"public_key":..}]}`.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: BTreeMap<String, VerifyingKey>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self, TransparencyError> {
        let file: RegistryFile =
            serde_json::from_str(text).map_err(|e| TransparencyError::Key(format!("invalid key registry: {e}")))?;
        let mut registry = Self::new();
        for entry in file.keys {
            let key = decode_public_key(&entry.public_key)?;
            registry.keys.insert(entry.key_id, key);
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, TransparencyError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Register a key under its derived id.
    pub fn insert(&mut self, key: VerifyingKey) -> String {
        let id = key_id(&key);
        self.keys.insert(id.clone(), key);
        id
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyResolver for KeyRegistry {
    fn resolve(&self, key_id: &str) -> Option<VerifyingKey> {
        self.keys.get(key_id).copied()
    }
}

/// An operator-supplied key that overrides registry lookup.
pub struct ExplicitKey(pub VerifyingKey);

impl KeyResolver for ExplicitKey {
    fn resolve(&self, _key_id: &str) -> Option<VerifyingKey> {
        Some(self.0)
    }
}
