use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::security::field_cipher::FieldCipher;

/// Full user record, keyed by opaque id. Contact fields are PII and go
/// through the field cipher at rest; identity fields stay cleartext because
/// they are embedded in token claims and used for lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub username: String,
    pub is_host: bool,
    pub role: String,
    pub email_verified: bool,
    pub discord_id: Option<String>,
    pub phone: Option<String>,
    /// game -> in-game handle. Keys identify the game and stay cleartext;
    /// only the handle values are encrypted.
    pub game_handles: HashMap<String, String>,
}

/// Public projection of a user, safe to return from the API and embed in
/// access-token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: String,
    pub is_host: bool,
    pub role: String,
    pub email_verified: bool,
}

impl From<&UserRecord> for UserProfile {
    fn from(rec: &UserRecord) -> Self {
        Self {
            id: rec.id.clone(),
            email: rec.email.clone(),
            username: rec.username.clone(),
            is_host: rec.is_host,
            role: rec.role.clone(),
            email_verified: rec.email_verified,
        }
    }
}

/// Contact-field update; only PII values, applied through the cipher.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactUpdate {
    pub discord_id: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub game_handles: HashMap<String, String>,
}

/// In-memory user record store (the platform's real store lives behind the
/// same surface). PII fields are encrypted on write and decrypted on read.
#[derive(Debug, Clone)]
pub struct UserStore {
    records: Arc<RwLock<HashMap<String, UserRecord>>>,
    cipher: FieldCipher,
}

impl UserStore {
    pub fn new(cipher: FieldCipher) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            cipher,
        }
    }

    pub async fn upsert(&self, record: UserRecord) -> Result<()> {
        let stored = UserRecord {
            discord_id: self.cipher.encrypt_optional(&record.discord_id)?,
            phone: self.cipher.encrypt_optional(&record.phone)?,
            game_handles: self.cipher.encrypt_game_handles(&record.game_handles)?,
            ..record
        };
        self.records.write().await.insert(stored.id.clone(), stored);
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> Option<UserRecord> {
        let records = self.records.read().await;
        let stored = records.get(user_id)?;
        Some(UserRecord {
            discord_id: self.cipher.decrypt_optional(&stored.discord_id),
            phone: self.cipher.decrypt_optional(&stored.phone),
            game_handles: self.cipher.decrypt_game_handles(&stored.game_handles),
            ..stored.clone()
        })
    }

    pub async fn profile(&self, user_id: &str) -> Option<UserProfile> {
        let records = self.records.read().await;
        records.get(user_id).map(UserProfile::from)
    }

    /// Apply a contact update. Returns false when the user does not exist.
    pub async fn update_contact(&self, user_id: &str, update: ContactUpdate) -> Result<bool> {
        let mut records = self.records.write().await;
        let Some(rec) = records.get_mut(user_id) else {
            return Ok(false);
        };
        if update.discord_id.is_some() {
            rec.discord_id = self.cipher.encrypt_optional(&update.discord_id)?;
        }
        if update.phone.is_some() {
            rec.phone = self.cipher.encrypt_optional(&update.phone)?;
        }
        for (game, handle) in &update.game_handles {
            rec.game_handles
                .insert(game.clone(), self.cipher.encrypt(handle)?);
        }
        Ok(true)
    }

    /// Raw stored form, bypassing decryption. Test seam for asserting what
    /// actually hits the disk-shaped store.
    #[cfg(test)]
    pub(crate) async fn stored(&self, user_id: &str) -> Option<UserRecord> {
        self.records.read().await.get(user_id).cloned()
    }
}
