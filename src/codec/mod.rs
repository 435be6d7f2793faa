use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use ishare_utils::time;
use serde_json::value::RawValue;

use crate::constants::MESSAGE_VALIDITY_WINDOW_MS;
use crate::models::common::{Destination, Nonce};
use crate::models::message::{Envelope, Message};

/// The application-layer Ed25519 key pair, distinct from the I2P
/// destination keys the SAM bridge holds.
#[derive(Clone)]
pub struct SigningKeys {
    signing: SigningKey,
}

impl SigningKeys {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Restores a key pair from the base64 secret stored in
    /// `tracker-keys.json`.
    pub fn from_base64(private_key: &str) -> Result<Self, VerifyError> {
        let bytes = BASE64
            .decode(private_key)
            .map_err(|_| VerifyError::MalformedEnvelope)?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VerifyError::MalformedEnvelope)?;
        Ok(Self {
            signing: SigningKey::from_bytes(&secret),
        })
    }

    pub fn public_base64(&self) -> String {
        BASE64.encode(self.signing.verifying_key().as_bytes())
    }

    pub fn private_base64(&self) -> String {
        BASE64.encode(self.signing.to_bytes())
    }
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "SigningKeys({})", self.public_base64())
    }
}

/// Outcome of a successful `verify`: either the envelope carried a valid
/// signature, or it was a legacy unsigned message.
#[derive(Debug, Clone, PartialEq)]
pub enum Verified {
    Signed { signing_key: String, nonce: Nonce },
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerifyError {
    MissingSender,
    BadSignature,
    ExpiredTimestamp,
    MalformedEnvelope,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let message = match self {
            VerifyError::MissingSender => "envelope carries no sender",
            VerifyError::BadSignature => "signature does not verify",
            VerifyError::ExpiredTimestamp => "timestamp outside validity window",
            VerifyError::MalformedEnvelope => "malformed envelope",
        };
        f.write_str(message)
    }
}

impl std::error::Error for VerifyError {}

/// Signs a message into a wire envelope. The signature covers the exact
/// serialised `data` text concatenated with the nonce and timestamp.
pub fn sign(message: &Message, keys: &SigningKeys, from: &Destination) -> Envelope {
    let data = serde_json::to_string(&message.to_data())
        .expect("message data serialization is infallible");
    sign_data(data, keys, from)
}

fn sign_data(data: String, keys: &SigningKeys, from: &Destination) -> Envelope {
    let nonce = Nonce::generate().to_string();
    let timestamp = time::now_millis();

    let signature = keys
        .signing
        .sign(canonical(&data, &nonce, timestamp).as_bytes());

    Envelope {
        data: RawValue::from_string(data).expect("serialized JSON is valid"),
        nonce: Some(nonce),
        timestamp: Some(timestamp),
        signature: Some(BASE64.encode(signature.to_bytes())),
        signing_key: Some(keys.public_base64()),
        from: Some(from.clone()),
    }
}

/// Checks an envelope's signature and timestamp. Replay protection is the
/// engine's responsibility; the codec only proves authorship and recency.
pub fn verify(envelope: &Envelope) -> Result<Verified, VerifyError> {
    verify_at(envelope, time::now_millis())
}

fn verify_at(envelope: &Envelope, now: u64) -> Result<Verified, VerifyError> {
    let (signature, signing_key, nonce, timestamp) = match (
        &envelope.signature,
        &envelope.signing_key,
        &envelope.nonce,
        envelope.timestamp,
    ) {
        // The legacy path: clients predating signatures send bare data.
        (None, None, None, _) => return Ok(Verified::Legacy),
        (Some(sig), Some(key), Some(nonce), Some(ts)) => (sig, key, nonce, ts),
        _ => return Err(VerifyError::MalformedEnvelope),
    };

    if now.abs_diff(timestamp) > MESSAGE_VALIDITY_WINDOW_MS {
        return Err(VerifyError::ExpiredTimestamp);
    }

    let parsed_nonce: Nonce = nonce
        .parse()
        .map_err(|_| VerifyError::MalformedEnvelope)?;

    let key_bytes: [u8; 32] = BASE64
        .decode(signing_key)
        .map_err(|_| VerifyError::MalformedEnvelope)?
        .try_into()
        .map_err(|_| VerifyError::MalformedEnvelope)?;
    let verifying =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| VerifyError::BadSignature)?;

    let sig_bytes: [u8; 64] = BASE64
        .decode(signature)
        .map_err(|_| VerifyError::MalformedEnvelope)?
        .try_into()
        .map_err(|_| VerifyError::MalformedEnvelope)?;
    let signature = Signature::from_bytes(&sig_bytes);

    let signed = canonical(envelope.data.get(), nonce, timestamp);
    verifying
        .verify(signed.as_bytes(), &signature)
        .map_err(|_| VerifyError::BadSignature)?;

    Ok(Verified::Signed {
        signing_key: signing_key.clone(),
        nonce: parsed_nonce,
    })
}

fn canonical(data: &str, nonce: &str, timestamp: u64) -> String {
    let mut out = String::with_capacity(data.len() + nonce.len() + 20);
    out.push_str(data);
    out.push_str(nonce);
    out.push_str(&timestamp.to_string());
    out
}
