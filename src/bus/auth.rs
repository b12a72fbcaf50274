//! Challenge-response authentication for bus messages
//!
//! Every endpoint holds a secret key. Before sending to a recipient the
//! sender asks the bus for a challenge nonce and answers it with
//! HMAC-SHA256(key, "sender\nrecipient\nnonce"). Issuing a new challenge for
//! the same pair makes the previous one stale.

use crate::error::BusError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 16;

/// A nonce issued for one sender-recipient pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub nonce: String,
}

/// Challenge-response pair attached to every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub challenge: String,
    pub response: String,
}

/// Secret material handed to an endpoint at registration
#[derive(Clone)]
pub struct Credentials {
    endpoint_id: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint_id", &self.endpoint_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Answer a challenge for messages to `recipient`
    pub fn respond(&self, recipient: &str, challenge: &Challenge) -> Result<AuthToken, BusError> {
        let mac = keyed_mac(&self.key, &self.endpoint_id, recipient, &challenge.nonce).map_err(|e| {
            BusError::Authentication {
                sender: self.endpoint_id.clone(),
                recipient: recipient.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(AuthToken {
            challenge: challenge.nonce.clone(),
            response: hex::encode(mac.finalize().into_bytes()),
        })
    }
}

/// Record of a rejected message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub at: DateTime<Utc>,
    pub sender: String,
    pub recipient: String,
    pub reason: String,
}

fn keyed_mac(
    key: &[u8],
    sender: &str,
    recipient: &str,
    nonce: &str,
) -> Result<HmacSha256, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(sender.as_bytes());
    mac.update(b"\n");
    mac.update(recipient.as_bytes());
    mac.update(b"\n");
    mac.update(nonce.as_bytes());
    Ok(mac)
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Key and challenge registry owned by the bus
#[derive(Default)]
pub(crate) struct Authenticator {
    keys: HashMap<String, Vec<u8>>,
    challenges: HashMap<(String, String), String>,
}

impl Authenticator {
    /// Issue (or rotate) the key for an endpoint
    pub fn enroll(&mut self, endpoint_id: &str) -> Credentials {
        let key = random_bytes::<KEY_BYTES>().to_vec();
        self.keys.insert(endpoint_id.to_string(), key.clone());
        self.challenges.retain(|(sender, _), _| sender != endpoint_id);
        Credentials {
            endpoint_id: endpoint_id.to_string(),
            key,
        }
    }

    pub fn revoke(&mut self, endpoint_id: &str) {
        self.keys.remove(endpoint_id);
        self.challenges
            .retain(|(sender, recipient), _| sender != endpoint_id && recipient != endpoint_id);
    }

    pub fn is_enrolled(&self, endpoint_id: &str) -> bool {
        self.keys.contains_key(endpoint_id)
    }

    /// Fresh nonce for the pair; any earlier one becomes stale
    pub fn issue(&mut self, sender: &str, recipient: &str) -> Result<Challenge, BusError> {
        if !self.is_enrolled(sender) {
            return Err(BusError::UnknownSender(sender.to_string()));
        }
        let nonce = hex::encode(random_bytes::<NONCE_BYTES>());
        self.challenges
            .insert((sender.to_string(), recipient.to_string()), nonce.clone());
        Ok(Challenge { nonce })
    }

    /// Check a token against the current challenge for the pair.
    /// Returns the rejection reason on failure.
    pub fn verify(&self, sender: &str, recipient: &str, token: &AuthToken) -> Result<(), String> {
        let key = self
            .keys
            .get(sender)
            .ok_or_else(|| "sender has no credentials".to_string())?;
        let current = self
            .challenges
            .get(&(sender.to_string(), recipient.to_string()))
            .ok_or_else(|| "no challenge issued for this pair".to_string())?;
        if *current != token.challenge {
            return Err("stale or unknown challenge".to_string());
        }
        let response = hex::decode(&token.response).map_err(|_| "malformed response".to_string())?;
        keyed_mac(key, sender, recipient, current)
            .map_err(|e| e.to_string())?
            .verify_slice(&response)
            .map_err(|_| "response does not match challenge".to_string())
    }
}
