use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::warn;

use crate::config::PiiKeySource;

// AES-256-GCM with a 16-byte IV, to stay wire-compatible with blobs written
// by earlier releases of the platform.
type FieldAes = AesGcm<Aes256, U16>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const PBKDF2_ITERATIONS: u32 = 100_000;
// Fixed application salt: the passphrase is a shared deployment secret, not a
// per-user password, so a static salt keeps derivation deterministic.
const PBKDF2_SALT: &[u8] = b"arena-pii-field-cipher";

/// At-rest encryption for PII field values.
///
/// Blob format: `ivB64:tagB64:ciphertextB64`. Anything that does not split
/// into exactly three segments is treated as legacy cleartext and returned
/// unchanged on decrypt. When no key is configured the cipher runs in
/// degraded passthrough mode (the warning is logged at config load).
#[derive(Debug, Clone)]
pub struct FieldCipher {
    key: Option<[u8; 32]>,
}

impl FieldCipher {
    pub fn new(source: &PiiKeySource) -> Self {
        let key = match source {
            PiiKeySource::Key(k) => Some(*k),
            PiiKeySource::Passphrase(pass) => {
                let mut derived = [0u8; 32];
                pbkdf2_hmac::<Sha256>(
                    pass.as_bytes(),
                    PBKDF2_SALT,
                    PBKDF2_ITERATIONS,
                    &mut derived,
                );
                Some(derived)
            }
            PiiKeySource::Disabled => None,
        };
        Self { key }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt one field value. A fresh random IV is drawn per call; two
    /// encryptions of the same plaintext never produce the same blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_string());
        };

        let cipher = FieldAes::new(GenericArray::from_slice(key));
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut combined = cipher
            .encrypt(GenericArray::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| anyhow!("field encryption failed"))?;
        // aead appends the tag to the ciphertext; store it as its own segment.
        let tag = combined.split_off(combined.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            general_purpose::STANDARD.encode(iv),
            general_purpose::STANDARD.encode(tag),
            general_purpose::STANDARD.encode(combined),
        ))
    }

    /// Decrypt one field value.
    ///
    /// Never fails past the caller: a blob that is not three segments is
    /// legacy cleartext and comes back unchanged; a blob whose tag does not
    /// authenticate is logged (PII-safe fingerprint only) and returned
    /// as-is, trading availability over hard failure.
    pub fn decrypt(&self, blob: &str) -> String {
        let parts: Vec<&str> = blob.split(':').collect();
        if parts.len() != 3 {
            return blob.to_string();
        }

        match self.try_decrypt(&parts) {
            Some(plaintext) => plaintext,
            None => {
                warn!(
                    target: "audit",
                    event = "pii_decrypt_failed",
                    record = %blob_fingerprint(blob),
                    "undecryptable PII field; returning stored blob"
                );
                blob.to_string()
            }
        }
    }

    fn try_decrypt(&self, parts: &[&str]) -> Option<String> {
        let key = self.key.as_ref()?;
        let iv = general_purpose::STANDARD.decode(parts[0]).ok()?;
        let tag = general_purpose::STANDARD.decode(parts[1]).ok()?;
        let ct = general_purpose::STANDARD.decode(parts[2]).ok()?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return None;
        }

        let mut combined = ct;
        combined.extend_from_slice(&tag);

        let cipher = FieldAes::new(GenericArray::from_slice(key));
        let plaintext = cipher
            .decrypt(GenericArray::from_slice(&iv), combined.as_ref())
            .ok()?;
        String::from_utf8(plaintext).ok()
    }

    /// Encrypt the values of a game→handle map, leaving the game keys
    /// cleartext so lookups by game still work.
    pub fn encrypt_game_handles(
        &self,
        handles: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        handles
            .iter()
            .map(|(game, handle)| Ok((game.clone(), self.encrypt(handle)?)))
            .collect()
    }

    pub fn decrypt_game_handles(
        &self,
        handles: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        handles
            .iter()
            .map(|(game, handle)| (game.clone(), self.decrypt(handle)))
            .collect()
    }

    pub fn encrypt_optional(&self, value: &Option<String>) -> Result<Option<String>> {
        value.as_deref().map(|v| self.encrypt(v)).transpose()
    }

    pub fn decrypt_optional(&self, value: &Option<String>) -> Option<String> {
        value.as_deref().map(|v| self.decrypt(v))
    }
}

/// Short, PII-safe identifier for a stored blob, for log correlation.
fn blob_fingerprint(blob: &str) -> String {
    let digest = Sha256::digest(blob.as_bytes());
    hex::encode(&digest[..4])
}
