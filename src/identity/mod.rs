use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

use crate::codec::SigningKeys;
use crate::constants;
use crate::models::common::Destination;

/// The two key pairs a node owns: the I2P destination keys (held by the
/// SAM bridge, we keep the opaque private blob) and the application-layer
/// Ed25519 signing keys. Losing either means a new identity.
pub struct Identity {
    pub destination: Destination,
    pub b32_address: String,
    /// Opaque private destination blob in SAM's base64 encoding.
    pub private_key: String,
    pub signing: SigningKeys,
}

/// On-disk shape of `tracker-keys.json`. Field names are a compatibility
/// contract with existing deployments.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyFile {
    public_key: String,
    private_key: String,
    destination: String,
    b32_address: String,
    signing_keys: SigningKeyFile,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigningKeyFile {
    public_key: String,
    private_key: String,
}

impl Identity {
    /// Builds a fresh identity from a newly generated SAM destination,
    /// minting new signing keys alongside.
    pub fn mint(public: String, private: String) -> Self {
        let b32_address = b32_of(&public);
        Identity {
            destination: Destination::new(public),
            b32_address,
            private_key: private,
            signing: SigningKeys::generate(),
        }
    }

    /// Loads persisted key material, or `None` when no file exists or it
    /// does not parse (a corrupt file is logged and treated as absent).
    pub fn load(data_dir: &Path) -> Option<Identity> {
        let path = key_path(data_dir);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("Failed to read {}: {}", path.display(), err);
                return None;
            }
        };

        let file: KeyFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(err) => {
                warn!("Ignoring corrupt {}: {}", path.display(), err);
                return None;
            }
        };

        let signing = match SigningKeys::from_base64(&file.signing_keys.private_key) {
            Ok(signing) => signing,
            Err(_) => {
                warn!("Ignoring {}: bad signing key material", path.display());
                return None;
            }
        };

        info!("Loaded identity {}", file.b32_address);

        Some(Identity {
            destination: Destination::new(file.destination),
            b32_address: file.b32_address,
            private_key: file.private_key,
            signing,
        })
    }

    pub fn save(&self, data_dir: &Path) -> io::Result<()> {
        let file = KeyFile {
            public_key: self.destination.as_str().to_owned(),
            private_key: self.private_key.clone(),
            destination: self.destination.as_str().to_owned(),
            b32_address: self.b32_address.clone(),
            signing_keys: SigningKeyFile {
                public_key: self.signing.public_base64(),
                private_key: self.signing.private_base64(),
            },
        };

        std::fs::create_dir_all(data_dir)?;
        let json = serde_json::to_string_pretty(&file).expect("key file serializes");
        std::fs::write(key_path(data_dir), json)
    }
}

fn key_path(data_dir: &Path) -> PathBuf {
    data_dir.join(constants::KEYS_FILE)
}

/// Derives the b32 alias of a destination: SHA-256 over the decoded key
/// blob, base32 lowercase, suffixed `.b32.i2p`.
pub fn b32_of(destination: &str) -> String {
    let decoded = decode_i2p_base64(destination);
    let digest = Sha256::digest(&decoded);
    let encoded = base32::encode(base32::Alphabet::Rfc4648Lower { padding: false }, &digest);
    format!("{}.b32.i2p", encoded)
}

/// I2P base64 replaces `+/` with `-~`.
fn decode_i2p_base64(input: &str) -> Vec<u8> {
    let standard: String = input
        .chars()
        .map(|c| match c {
            '-' => '+',
            '~' => '/',
            c => c,
        })
        .collect();

    BASE64
        .decode(&standard)
        .unwrap_or_else(|_| input.as_bytes().to_vec())
}

/// Writes the single-line destination file operators copy-paste from.
pub fn write_destination_file(data_dir: &Path, name: &str, destination: &Destination) {
    let path = data_dir.join(name);
    if let Err(err) = std::fs::write(&path, format!("{}\n", destination)) {
        warn!("Failed to write {}: {}", path.display(), err);
    }
}
