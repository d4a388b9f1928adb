//! # Score Payload Wire Format
//!
//! ```text
//! {
//!   "encryptedData": base64,      AES-256-GCM ciphertext
//!   "iv": base64,                 96-bit IV
//!   "authTag": base64,            128-bit GCM tag
//!   "signature": base64,          HMAC-SHA256 over every other field
//!   "timestamp": int64 (ms),
//!   "nonce": string,              random, never a counter
//!   "matchId": string,            also the AEAD associated data
//!   "deviceFingerprint": string,
//!   "version": 1
//! }
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

/// Current payload format version.
pub const PAYLOAD_VERSION: u32 = 1;

/// Domain separator mixed into every signature.
const SIGNING_DOMAIN: &[u8] = b"OROB-SCORE";

/// Evidence snapshot taken at submission time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreIntegrity {
    /// Score being submitted.
    pub score: i64,
    /// Match random seed supplied by the server.
    pub random_seed: u64,
    /// Time since codec initialization.
    pub session_duration_ms: u64,
    /// Number of score updates recorded.
    pub score_update_count: u64,
    /// Number of input events recorded.
    pub input_event_count: u64,
    /// Frames observed by the anti-cheat monitor.
    pub frame_count: u64,
    /// Average frames per second over the session.
    pub average_fps: f64,
    /// Hex running hash over the score trail.
    pub score_trail_hash: String,
    /// Hex running hash over input events.
    pub input_trail_hash: String,
    /// Hex SHA-256 of the last reported game state.
    pub game_state_hash: String,
}

/// The sealed artifact sent to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedScorePayload {
    /// AEAD ciphertext (without tag).
    pub ciphertext: Vec<u8>,
    /// AEAD IV.
    pub iv: Vec<u8>,
    /// AEAD authentication tag.
    pub auth_tag: Vec<u8>,
    /// HMAC-SHA256 over [`Self::signing_bytes`].
    pub hmac_signature: Vec<u8>,
    /// Wall-clock creation time.
    pub timestamp_ms: i64,
    /// Session-unique random nonce.
    pub nonce: String,
    /// Match this payload belongs to.
    pub match_id: String,
    /// Device fingerprint of the producing client.
    pub device_fingerprint: String,
    /// Format version.
    pub version: u32,
}

impl EncryptedScorePayload {
    /// Returns true if every byte field is present and the timestamp is set.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.ciphertext.is_empty()
            && !self.iv.is_empty()
            && !self.auth_tag.is_empty()
            && !self.hmac_signature.is_empty()
            && !self.nonce.is_empty()
            && !self.match_id.is_empty()
            && self.timestamp_ms > 0
    }

    /// Canonical bytes covered by the HMAC.
    ///
    /// Every field except the signature, each length-prefixed so that no
    /// two distinct payloads share an encoding.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            SIGNING_DOMAIN.len()
                + self.ciphertext.len()
                + self.iv.len()
                + self.auth_tag.len()
                + self.nonce.len()
                + self.match_id.len()
                + self.device_fingerprint.len()
                + 64,
        );
        buf.extend_from_slice(SIGNING_DOMAIN);
        buf.extend_from_slice(&self.version.to_be_bytes());
        put_field(&mut buf, &self.ciphertext);
        put_field(&mut buf, &self.iv);
        put_field(&mut buf, &self.auth_tag);
        buf.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        put_field(&mut buf, self.nonce.as_bytes());
        put_field(&mut buf, self.match_id.as_bytes());
        put_field(&mut buf, self.device_fingerprint.as_bytes());
        buf
    }

    /// Converts to the base64 wire representation.
    #[must_use]
    pub fn to_wire(&self) -> WirePayload {
        WirePayload {
            encrypted_data: STANDARD.encode(&self.ciphertext),
            iv: STANDARD.encode(&self.iv),
            auth_tag: STANDARD.encode(&self.auth_tag),
            signature: STANDARD.encode(&self.hmac_signature),
            timestamp: self.timestamp_ms,
            nonce: self.nonce.clone(),
            match_id: self.match_id.clone(),
            device_fingerprint: self.device_fingerprint.clone(),
            version: self.version,
        }
    }

    /// Parses the base64 wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPayload`] if a field is not valid base64.
    pub fn from_wire(wire: &WirePayload) -> CodecResult<Self> {
        Ok(Self {
            ciphertext: decode_field("encryptedData", &wire.encrypted_data)?,
            iv: decode_field("iv", &wire.iv)?,
            auth_tag: decode_field("authTag", &wire.auth_tag)?,
            hmac_signature: decode_field("signature", &wire.signature)?,
            timestamp_ms: wire.timestamp,
            nonce: wire.nonce.clone(),
            match_id: wire.match_id.clone(),
            device_fingerprint: wire.device_fingerprint.clone(),
            version: wire.version,
        })
    }

    /// Serializes to JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialization`] if JSON encoding fails.
    pub fn to_json(&self) -> CodecResult<String> {
        serde_json::to_string(&self.to_wire()).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Parses JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPayload`] for malformed JSON or base64.
    pub fn from_json(json: &str) -> CodecResult<Self> {
        let wire: WirePayload =
            serde_json::from_str(json).map_err(|e| CodecError::InvalidPayload(e.to_string()))?;
        Self::from_wire(&wire)
    }
}

/// Base64 JSON form of [`EncryptedScorePayload`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    /// Base64 ciphertext.
    pub encrypted_data: String,
    /// Base64 IV.
    pub iv: String,
    /// Base64 authentication tag.
    pub auth_tag: String,
    /// Base64 HMAC signature.
    pub signature: String,
    /// Creation time (ms).
    pub timestamp: i64,
    /// Opaque nonce.
    pub nonce: String,
    /// Match identifier.
    pub match_id: String,
    /// Device fingerprint.
    pub device_fingerprint: String,
    /// Format version.
    pub version: u32,
}

fn put_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn decode_field(name: &str, value: &str) -> CodecResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| CodecError::InvalidPayload(format!("{name}: {e}")))
}
