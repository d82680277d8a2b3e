//! Encryption at rest for destination credentials and delivery metadata.
//!
//! Uses AES-256-GCM, deriving the key once at construction rather than
//! per call: `outpost-store`
//! encrypts and decrypts on every destination read and write, so paying
//! PBKDF2's cost per call would make every store operation expensive.
//! The deployment salt is supplied once alongside the passphrase and
//! baked into the derived key; only the nonce varies per call and rides
//! along with the ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
    Aes256Gcm, Nonce,
};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac_array;
use sha2::Sha256;

const NONCE_SIZE: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_SIZE: usize = 32;

/// Symmetric cipher seam `outpost-store` encrypts destination
/// credentials and delivery metadata through.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM cipher with a key derived once via PBKDF2-HMAC-SHA256.
///
/// Encrypted output format: `base64(nonce || ciphertext || auth_tag)`.
pub struct AesGcmCipher {
    key: [u8; KEY_SIZE],
}

impl AesGcmCipher {
    /// Derive the cipher key from `passphrase` and a fixed deployment
    /// `salt`. Both should come from the same source across restarts, or
    /// previously encrypted data becomes unreadable.
    pub fn new(passphrase: &str, salt: &[u8]) -> Self {
        Self {
            key: pbkdf2_hmac_array::<Sha256, KEY_SIZE>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS),
        }
    }

    /// Read the passphrase from the named environment variable.
    pub fn from_env(env_var: &str, salt: &[u8]) -> Result<Self> {
        let passphrase = std::env::var(env_var)
            .with_context(|| format!("environment variable {env_var} is not set"))?;
        Ok(Self::new(&passphrase, salt))
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key).context("failed to build AES-256-GCM cipher")?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("encryption failed: {e:?}"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out).into_bytes())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let data = BASE64
            .decode(ciphertext)
            .context("invalid base64 encoding")?;
        if data.len() < NONCE_SIZE + 16 {
            bail!("ciphertext too short");
        }
        let (nonce_bytes, body) = data.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new_from_slice(&self.key).context("failed to build AES-256-GCM cipher")?;
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, body)
            .map_err(|e| anyhow::anyhow!("decryption failed - wrong passphrase or corrupted data: {e:?}"))
    }
}

/// A cipher that returns its input unchanged. Used where encryption is
/// configured off — credential obfuscation is pass-through by default,
/// encryption at rest is a deployment choice layered on top.
pub struct NoopCipher;

impl Cipher for NoopCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cipher = AesGcmCipher::new("correct horse battery staple", b"fixed-deployment-salt");
        let plaintext = b"api-key-super-secret";
        let ciphertext = cipher.encrypt(plaintext).expect("encrypt");
        let decrypted = cipher.decrypt(&ciphertext).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let cipher = AesGcmCipher::new("correct horse battery staple", b"fixed-deployment-salt");
        let other = AesGcmCipher::new("wrong passphrase", b"fixed-deployment-salt");
        let ciphertext = cipher.encrypt(b"secret").expect("encrypt");
        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn ciphertexts_differ_per_call() {
        let cipher = AesGcmCipher::new("pass", b"salt");
        let a = cipher.encrypt(b"same input").unwrap();
        let b = cipher.encrypt(b"same input").unwrap();
        assert_ne!(a, b, "nonce must be re-randomized per call");
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let cipher = AesGcmCipher::new("pass", b"salt");
        assert!(cipher.decrypt(b"dG9vc2hvcnQ=").is_err());
    }

    #[test]
    fn noop_cipher_passes_through() {
        let cipher = NoopCipher;
        let data = b"unchanged";
        assert_eq!(cipher.encrypt(data).unwrap(), data);
        assert_eq!(cipher.decrypt(data).unwrap(), data);
    }
}
