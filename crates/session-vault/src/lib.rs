//! Symmetric encryption of opaque browser-session state.
//!
//! Blobs use the `iv_hex:ciphertext_hex` layout with AES-256-CBC and PKCS#7
//! padding. The key is the SHA-256 digest of the configured secret, so any
//! passphrase length yields a 32-byte key. CBC carries no MAC; a wrong key is
//! detected by the padding check or by the JSON parse that follows decryption.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;
const SEPARATOR: char = ':';

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("session encryption secret is not configured")]
    MissingSecret,
    #[error("malformed encrypted blob: {0}")]
    Malformed(String),
    #[error("failed to decrypt session state: {0}")]
    Decrypt(String),
    #[error("failed to serialize session state: {0}")]
    Serialize(String),
}

impl VaultError {
    /// True when the blob could not be turned back into state. Callers report
    /// these as "reconnect required" rather than as server faults.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, VaultError::Malformed(_) | VaultError::Decrypt(_))
    }
}

/// Stateless encrypt/decrypt transform bound to one derived key.
#[derive(Clone)]
pub struct SessionVault {
    key: [u8; 32],
}

impl std::fmt::Debug for SessionVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionVault").finish_non_exhaustive()
    }
}

impl SessionVault {
    pub fn new(secret: &str) -> Result<Self, VaultError> {
        if secret.is_empty() {
            return Err(VaultError::MissingSecret);
        }
        Ok(Self {
            key: derive_key(secret),
        })
    }

    /// Builds a vault from an optional configured secret, failing fast when absent.
    pub fn from_config(secret: Option<&str>) -> Result<Self, VaultError> {
        match secret.map(str::trim) {
            Some(secret) if !secret.is_empty() => Self::new(secret),
            _ => Err(VaultError::MissingSecret),
        }
    }

    pub fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, VaultError> {
        let plaintext =
            serde_json::to_vec(value).map_err(|err| VaultError::Serialize(err.to_string()))?;
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|err| VaultError::Serialize(err.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
        Ok(format!(
            "{}{}{}",
            hex::encode(iv),
            SEPARATOR,
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt<T: DeserializeOwned>(&self, blob: &str) -> Result<T, VaultError> {
        let (iv_hex, ciphertext_hex) = blob
            .split_once(SEPARATOR)
            .ok_or_else(|| VaultError::Malformed("missing iv separator".into()))?;
        let iv = hex::decode(iv_hex)
            .map_err(|err| VaultError::Malformed(format!("iv is not hex: {err}")))?;
        if iv.len() != IV_LEN {
            return Err(VaultError::Malformed(format!(
                "iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|err| VaultError::Malformed(format!("ciphertext is not hex: {err}")))?;
        if ciphertext.is_empty() || ciphertext.len() % IV_LEN != 0 {
            return Err(VaultError::Malformed(
                "ciphertext length is not a whole number of blocks".into(),
            ));
        }

        let cipher = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|err| VaultError::Decrypt(err.to_string()))?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| VaultError::Decrypt("bad padding".into()))?;
        serde_json::from_slice(&plaintext).map_err(|err| {
            debug!(%err, "decrypted session state did not parse");
            VaultError::Decrypt(format!("invalid payload: {err}"))
        })
    }
}

fn derive_key(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}
