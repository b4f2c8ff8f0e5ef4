use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Ciphertext, nonce and authentication tag, each url-safe base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub key_hash: String,
    pub iv: String,
    pub tag: String,
}

/// Symmetric key used to keep API key material encrypted at rest.
#[derive(Clone)]
pub struct KeyVault {
    key: [u8; 32],
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault").finish_non_exhaustive()
    }
}

impl KeyVault {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw.trim())
            .map_err(|err| Error::Internal(format!("Invalid encryption key: {}", err)))?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Internal("Encryption key must be 32 bytes".to_string()))?;
        Ok(Self::new(key))
    }

    pub fn seal(&self, plaintext: &str) -> Result<SealedSecret> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce = [0_u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| Error::Internal("Failed to encrypt secret".to_string()))?;

        Ok(SealedSecret {
            key_hash: URL_SAFE_NO_PAD.encode(&buffer),
            iv: URL_SAFE_NO_PAD.encode(nonce),
            tag: URL_SAFE_NO_PAD.encode(tag),
        })
    }

    pub fn open(&self, sealed: &SealedSecret) -> Result<String> {
        let mut buffer = decode(&sealed.key_hash)?;
        let nonce = decode(&sealed.iv)?;
        let tag = decode(&sealed.tag)?;
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(Error::Internal("Malformed sealed secret".to_string()));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| Error::Internal("Failed to decrypt secret".to_string()))?;
        String::from_utf8(buffer)
            .map_err(|_| Error::Internal("Decrypted secret is not UTF-8".to_string()))
    }
}

fn decode(value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| Error::Internal("Malformed sealed secret".to_string()))
}
