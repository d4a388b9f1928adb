//! # Payload Inspector
//!
//! Command-line tool to inspect a captured score payload and, given the
//! match keys, verify its signature and open it.

use oroboros_integrity::codec::{EncryptedScorePayload, ScoreIntegrityCodec};
use oroboros_integrity::SystemClock;

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         OROBOROS PAYLOAD INSPECTOR                               ║");
    println!("║         THE SEALED SCORE                                         ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        println!("Usage: payload_inspector <payload.json> [--enc-key <base64> --sign-key <base64>]");
        println!();
        println!("Options:");
        println!("  --enc-key <base64>   AES-256 match key (verify + decrypt)");
        println!("  --sign-key <base64>  HMAC match key");
        return;
    }

    let payload_path = &args[1];
    let option = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };
    let enc_key = option("--enc-key");
    let sign_key = option("--sign-key");

    println!("Loading payload: {payload_path}");

    let json = match std::fs::read_to_string(payload_path) {
        Ok(j) => j,
        Err(e) => {
            println!("Error: Could not read file: {e}");
            std::process::exit(1);
        }
    };

    // Accepts a bare payload or a full request body (extra fields ignored).
    let payload = match EncryptedScorePayload::from_json(&json) {
        Ok(p) => p,
        Err(e) => {
            println!("Error: Could not decode payload: {e}");
            std::process::exit(1);
        }
    };

    println!();
    println!("┌─ PAYLOAD ──────────────────────────────────────────────────────┐");
    println!("│ Match:              {}", payload.match_id);
    println!("│ Device:             {}", payload.device_fingerprint);
    println!("│ Version:            {}", payload.version);
    println!("│ Timestamp:          {} ms", payload.timestamp_ms);
    println!("│ Nonce:              {}", payload.nonce);
    println!("│ Ciphertext:         {} bytes", payload.ciphertext.len());
    println!("│ IV / Tag / HMAC:    {} / {} / {} bytes",
        payload.iv.len(),
        payload.auth_tag.len(),
        payload.hmac_signature.len());
    println!("│ Structurally valid: {}", if payload.is_valid() { "YES" } else { "NO" });
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let (Some(enc_key), Some(sign_key)) = (enc_key, sign_key) else {
        println!("No keys given, skipping signature check and decryption.");
        return;
    };

    let mut codec = ScoreIntegrityCodec::new(SystemClock::shared(), "payload-inspector");
    if let Err(e) = codec.initialize(&enc_key, &sign_key, &payload.match_id) {
        println!("Error: Keys rejected: {e}");
        std::process::exit(1);
    }

    println!("Signature:          {}", if codec.verify_signature(&payload) { "VALID" } else { "INVALID" });

    match codec.open_payload(&payload) {
        Ok(sealed) => {
            let integrity = &sealed.integrity;
            println!();
            println!("┌─ SEALED SCORE ─────────────────────────────────────────────────┐");
            println!("│ Score:              {}", sealed.score);
            println!("│ Session:            {:.1} s", integrity.session_duration_ms as f64 / 1000.0);
            println!("│ Score updates:      {}", integrity.score_update_count);
            println!("│ Input events:       {}", integrity.input_event_count);
            println!("│ Frames:             {} ({:.1} fps)", integrity.frame_count, integrity.average_fps);
            println!("│ Random seed:        {}", integrity.random_seed);
            println!("│ Trail hash:         {}", integrity.score_trail_hash);
            println!("│ Input hash:         {}", integrity.input_trail_hash);
            println!("│ Game state hash:    {}", integrity.game_state_hash);
            println!("└──────────────────────────────────────────────────────────────────┘");
            if integrity.score != sealed.score {
                println!();
                println!("⚠️  Evidence score {} does not match sealed score", integrity.score);
            }
        }
        Err(e) => {
            println!("Error: Could not open payload: {e}");
            std::process::exit(1);
        }
    }
}
