//! # Score Integrity Codec
//!
//! Turns `(score, evidence)` into a payload that cannot be read or forged
//! without the per-match keys the server handed out at match start.
//!
//! ## Sealing
//!
//! ```text
//! (score, ScoreIntegrity) ──json──► plaintext
//!                                        │
//!            AES-256-GCM(key, iv, aad = matchId)
//!                                        │
//!                              ciphertext + tag
//!                                        │
//!      HMAC-SHA256(signing key, every field but the signature)
//!                                        │
//!                            EncryptedScorePayload
//! ```
//!
//! ## Key Handling
//!
//! Keys live in [`Zeroizing`] buffers between `initialize` and `reset`.
//! They are never logged and never written anywhere.

mod payload;
mod trail;

pub use payload::{EncryptedScorePayload, ScoreIntegrity, WirePayload, PAYLOAD_VERSION};
pub use trail::{ScoreTrail, TrailEntry, TRAIL_HASH_LEN};

use std::collections::HashSet;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::clock::SharedClock;
use crate::error::{CodecError, CodecResult};

type HmacSha256 = Hmac<Sha256>;

/// AES-256 key length.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// GCM IV length (96 bits).
pub const IV_LEN: usize = 12;

/// GCM tag length (128 bits).
pub const TAG_LEN: usize = 16;

/// Random bytes behind each nonce.
const NONCE_BYTES: usize = 16;

/// Attempts to draw a nonce not yet used in this session.
const NONCE_ATTEMPTS: usize = 4;

/// Kind of input event recorded as evidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Touch / click.
    Tap,
    /// Swipe gesture.
    Swipe,
    /// Drag gesture.
    Drag,
    /// Keyboard key.
    Key,
    /// Gamepad button.
    Button,
    /// Anything else.
    Other,
}

impl InputKind {
    const fn tag(self) -> u8 {
        match self {
            Self::Tap => 1,
            Self::Swipe => 2,
            Self::Drag => 3,
            Self::Key => 4,
            Self::Button => 5,
            Self::Other => 0xFF,
        }
    }
}

/// Frame statistics contributed by the anti-cheat monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Frames recorded.
    pub frame_count: u64,
    /// Average frames per second.
    pub average_fps: f64,
}

/// Plaintext sealed inside the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SealedScore {
    /// The score.
    pub score: i64,
    /// Evidence snapshot.
    pub integrity: ScoreIntegrity,
}

/// Per-match key material.
struct MatchKeys {
    encryption: Zeroizing<[u8; ENCRYPTION_KEY_LEN]>,
    signing: Zeroizing<Vec<u8>>,
}

/// Score integrity codec.
pub struct ScoreIntegrityCodec {
    /// Key material, present only while initialized.
    keys: Option<MatchKeys>,
    /// Current match.
    match_id: String,
    /// Fingerprint stamped on every payload.
    device_fingerprint: String,
    /// Time source.
    clock: SharedClock,
    /// Entropy for IVs and nonces.
    rng: Box<dyn RngCore + Send>,
    /// Nonces issued or registered this session.
    used_nonces: HashSet<String>,
    /// Score history.
    trail: ScoreTrail,
    /// Running hash over input events.
    input_hash: [u8; 32],
    /// Input events recorded.
    input_events: u64,
    /// Server supplied random seed.
    random_seed: u64,
    /// SHA-256 of the last reported game state.
    game_state_hash: [u8; 32],
    /// Monotonic time of `initialize`.
    session_start_ms: u64,
}

impl ScoreIntegrityCodec {
    /// Creates an uninitialized codec drawing entropy from the OS.
    #[must_use]
    pub fn new(clock: SharedClock, device_fingerprint: impl Into<String>) -> Self {
        Self::with_rng(clock, device_fingerprint, Box::new(OsRng))
    }

    /// Creates an uninitialized codec with an explicit entropy source.
    #[must_use]
    pub fn with_rng(
        clock: SharedClock,
        device_fingerprint: impl Into<String>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            keys: None,
            match_id: String::new(),
            device_fingerprint: device_fingerprint.into(),
            clock,
            rng,
            used_nonces: HashSet::new(),
            trail: ScoreTrail::new(),
            input_hash: [0u8; 32],
            input_events: 0,
            random_seed: 0,
            game_state_hash: [0u8; 32],
            session_start_ms: 0,
        }
    }

    /// Decodes and stores the match keys.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if either key is not base64, the
    /// encryption key is not 32 bytes, the signing key is empty, or both
    /// keys are identical.
    pub fn initialize(
        &mut self,
        encryption_key_b64: &str,
        signing_key_b64: &str,
        match_id: &str,
    ) -> CodecResult<()> {
        if self.is_initialized() {
            tracing::warn!("Codec re-initialized for match {} without reset", match_id);
            self.reset();
        }
        if match_id.is_empty() {
            return Err(CodecError::InvalidPayload("empty match id".into()));
        }

        let encryption = decode_key("encryption", encryption_key_b64)?;
        let encryption: [u8; ENCRYPTION_KEY_LEN] =
            encryption.as_slice().try_into().map_err(|_| CodecError::InvalidKey {
                which: "encryption",
                reason: format!("expected {ENCRYPTION_KEY_LEN} bytes, got {}", encryption.len()),
            })?;
        let encryption = Zeroizing::new(encryption);

        let signing = decode_key("signing", signing_key_b64)?;
        if signing.is_empty() {
            return Err(CodecError::InvalidKey { which: "signing", reason: "empty".into() });
        }
        if bool::from(signing.as_slice().ct_eq(&encryption[..])) {
            return Err(CodecError::InvalidKey {
                which: "signing",
                reason: "must differ from the encryption key".into(),
            });
        }

        self.keys = Some(MatchKeys { encryption, signing });
        self.match_id = match_id.to_owned();
        self.session_start_ms = self.clock.monotonic_millis();
        tracing::info!("Score codec initialized for match {}", match_id);
        Ok(())
    }

    /// Returns true between `initialize` and `reset`.
    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.keys.is_some()
    }

    /// Current match id (empty when uninitialized).
    #[inline]
    #[must_use]
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    /// Fingerprint stamped on payloads.
    #[inline]
    #[must_use]
    pub fn device_fingerprint(&self) -> &str {
        &self.device_fingerprint
    }

    /// Sets the server supplied random seed for this match.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.random_seed = seed;
    }

    /// Records the latest serialized game state.
    pub fn record_game_state(&mut self, state: &[u8]) {
        self.game_state_hash = Sha256::digest(state).into();
    }

    /// Appends a score update to the trail.
    pub fn record_score_update(&mut self, new_score: i64) {
        let at = self.session_elapsed_ms();
        self.trail.record(at, new_score);
        tracing::debug!("Trail += {} at {}ms ({} updates)", new_score, at, self.trail.len());
    }

    /// Counts an input event and folds it into the input hash.
    pub fn record_input_event(&mut self, kind: InputKind, data: Option<&[u8]>) {
        self.input_events += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.input_hash);
        hasher.update([kind.tag()]);
        hasher.update(self.session_elapsed_ms().to_le_bytes());
        if let Some(data) = data {
            hasher.update(data);
        }
        self.input_hash = hasher.finalize().into();
    }

    /// Number of input events recorded.
    #[inline]
    #[must_use]
    pub const fn input_event_count(&self) -> u64 {
        self.input_events
    }

    /// The score trail.
    #[inline]
    #[must_use]
    pub const fn trail(&self) -> &ScoreTrail {
        &self.trail
    }

    /// Current trail hash.
    #[inline]
    #[must_use]
    pub const fn score_trail_hash(&self) -> &[u8; TRAIL_HASH_LEN] {
        self.trail.running_hash()
    }

    /// Checks the trail against itself and against the trusted score.
    ///
    /// An empty trail only matches a trusted score of zero.
    #[must_use]
    pub fn verify_score_integrity(&self, trusted_score: i64) -> bool {
        if !self.trail.verify() {
            tracing::warn!("Score trail hash mismatch");
            return false;
        }
        let last = self.trail.last_score().unwrap_or(0);
        if last != trusted_score {
            tracing::warn!("Trail ends at {} but trusted score is {}", last, trusted_score);
            return false;
        }
        true
    }

    /// Builds the evidence snapshot for a submission.
    #[must_use]
    pub fn build_integrity(&self, score: i64, frames: FrameStats) -> ScoreIntegrity {
        ScoreIntegrity {
            score,
            random_seed: self.random_seed,
            session_duration_ms: self.session_elapsed_ms(),
            score_update_count: self.trail.len() as u64,
            input_event_count: self.input_events,
            frame_count: frames.frame_count,
            average_fps: frames.average_fps,
            score_trail_hash: self.trail.running_hash_hex(),
            input_trail_hash: hex::encode(self.input_hash),
            game_state_hash: hex::encode(self.game_state_hash),
        }
    }

    /// Encrypts and signs a score with its evidence.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UninitializedCodec`] before `initialize`, and
    /// [`CodecError::EncryptionFailed`] on any RNG or AEAD failure. No
    /// partial payload is ever returned.
    pub fn encrypt_score(
        &mut self,
        score: i64,
        integrity: &ScoreIntegrity,
    ) -> CodecResult<EncryptedScorePayload> {
        if !self.is_initialized() {
            return Err(CodecError::UninitializedCodec);
        }

        let mut iv = [0u8; IV_LEN];
        self.rng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CodecError::EncryptionFailed(format!("iv generation: {e}")))?;
        let nonce = self.fresh_nonce()?;

        let sealed = SealedScore { score, integrity: integrity.clone() };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&sealed).map_err(|e| CodecError::Serialization(e.to_string()))?,
        );

        let keys = self.keys.as_ref().ok_or(CodecError::UninitializedCodec)?;
        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(&keys.encryption[..])
            .map_err(|e| CodecError::EncryptionFailed(e.to_string()))?;

        let mut ciphertext = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                self.match_id.as_bytes(),
                &mut ciphertext,
            )
            .map_err(|_| CodecError::EncryptionFailed("aead seal".into()))?;

        let mut payload = EncryptedScorePayload {
            ciphertext,
            iv: iv.to_vec(),
            auth_tag: tag.to_vec(),
            hmac_signature: Vec::new(),
            timestamp_ms: self.clock.wall_millis(),
            nonce,
            match_id: self.match_id.clone(),
            device_fingerprint: self.device_fingerprint.clone(),
            version: PAYLOAD_VERSION,
        };
        payload.hmac_signature = hmac_sha256(&keys.signing, &payload.signing_bytes())?;

        if !payload.is_valid() {
            return Err(CodecError::EncryptionFailed("incomplete payload".into()));
        }
        tracing::debug!("Sealed score {} for match {}", score, self.match_id);
        Ok(payload)
    }

    /// Recomputes the HMAC and compares it in constant time.
    ///
    /// Local sanity only. The server verifies independently.
    #[must_use]
    pub fn verify_signature(&self, payload: &EncryptedScorePayload) -> bool {
        let Some(keys) = self.keys.as_ref() else {
            return false;
        };
        let Ok(expected) = hmac_sha256(&keys.signing, &payload.signing_bytes()) else {
            return false;
        };
        bool::from(expected.as_slice().ct_eq(payload.hmac_signature.as_slice()))
    }

    /// Structural and cryptographic checks before a payload leaves the device.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPayload`] describing the first failing check.
    pub fn verify_payload(&self, payload: &EncryptedScorePayload) -> CodecResult<()> {
        if !self.is_initialized() {
            return Err(CodecError::UninitializedCodec);
        }
        if !payload.is_valid() {
            return Err(CodecError::InvalidPayload("missing fields".into()));
        }
        if payload.version != PAYLOAD_VERSION {
            return Err(CodecError::InvalidPayload(format!("version {}", payload.version)));
        }
        if payload.match_id != self.match_id {
            return Err(CodecError::InvalidPayload("match id mismatch".into()));
        }
        if payload.iv.len() != IV_LEN || payload.auth_tag.len() != TAG_LEN {
            return Err(CodecError::InvalidPayload("bad iv or tag length".into()));
        }
        if !self.verify_signature(payload) {
            return Err(CodecError::InvalidPayload("signature mismatch".into()));
        }
        Ok(())
    }

    /// Authenticates and decrypts a payload produced with this match's keys.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPayload`] if verification fails and
    /// [`CodecError::DecryptionFailed`] if the AEAD tag does not match.
    pub fn open_payload(&self, payload: &EncryptedScorePayload) -> CodecResult<SealedScore> {
        self.verify_payload(payload)?;
        let keys = self.keys.as_ref().ok_or(CodecError::UninitializedCodec)?;
        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(&keys.encryption[..])
            .map_err(|_| CodecError::DecryptionFailed)?;

        let mut buffer = Zeroizing::new(payload.ciphertext.clone());
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&payload.iv),
                payload.match_id.as_bytes(),
                &mut buffer,
                GenericArray::from_slice(&payload.auth_tag),
            )
            .map_err(|_| CodecError::DecryptionFailed)?;

        serde_json::from_slice(&buffer).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Marks a nonce as used.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ReplayDetected`] if the nonce was already used
    /// in this session.
    pub fn register_nonce(&mut self, nonce: &str) -> CodecResult<()> {
        if self.used_nonces.insert(nonce.to_owned()) {
            Ok(())
        } else {
            tracing::warn!("Local replay rejected: nonce {}", nonce);
            Err(CodecError::ReplayDetected(nonce.to_owned()))
        }
    }

    /// Drops keys (zeroized) and all evidence. Safe when never initialized.
    pub fn reset(&mut self) {
        if self.keys.take().is_some() {
            tracing::info!("Score codec reset for match {}", self.match_id);
        }
        self.match_id.clear();
        self.used_nonces.clear();
        self.trail.clear();
        self.input_hash = [0u8; 32];
        self.input_events = 0;
        self.random_seed = 0;
        self.game_state_hash = [0u8; 32];
        self.session_start_ms = 0;
    }

    fn session_elapsed_ms(&self) -> u64 {
        self.clock.monotonic_millis().saturating_sub(self.session_start_ms)
    }

    fn fresh_nonce(&mut self) -> CodecResult<String> {
        for _ in 0..NONCE_ATTEMPTS {
            let mut bytes = [0u8; NONCE_BYTES];
            self.rng
                .try_fill_bytes(&mut bytes)
                .map_err(|e| CodecError::EncryptionFailed(format!("nonce generation: {e}")))?;
            let nonce = hex::encode(bytes);
            if self.register_nonce(&nonce).is_ok() {
                return Ok(nonce);
            }
        }
        Err(CodecError::EncryptionFailed("could not draw a unique nonce".into()))
    }
}

fn decode_key(which: &'static str, encoded: &str) -> CodecResult<Zeroizing<Vec<u8>>> {
    STANDARD
        .decode(encoded.trim())
        .map(Zeroizing::new)
        .map_err(|e| CodecError::InvalidKey { which, reason: e.to_string() })
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CodecError::InvalidKey { which: "signing", reason: e.to_string() })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
