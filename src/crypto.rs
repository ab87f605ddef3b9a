//! Password-derived symmetric encryption primitives.
//!
//! Provides the two key-derivation functions and the single AEAD envelope
//! used everywhere a session's data needs to be sealed: the encrypted
//! channel (`channel::encrypted`), the SDP codec (`protocol::sdp`), and the
//! compact offline descriptor.
//!
//! # Wire format
//!
//! `encrypt` produces `nonce(24) || ciphertext || tag(16)` as a single
//! byte string — never a structured envelope — because this exact layout
//! crosses the wire (see `protocol::frame`).

use anyhow::{bail, Result};
use argon2::Argon2;
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::RngCore;
use sha2::Sha256;
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{Key, XSalsa20Poly1305, XNonce};

/// Length in bytes of a derived key.
pub const KEY_LEN: usize = 32;
/// Length in bytes of the random salt attached to a session.
pub const SALT_LEN: usize = 16;
/// Length in bytes of the AEAD nonce.
const NONCE_LEN: usize = 24;
/// Length in bytes of the Poly1305 authentication tag.
const TAG_LEN: usize = 16;
/// Minimum ciphertext length for `decrypt` to even attempt opening it.
pub const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + TAG_LEN;

/// PBKDF2-HMAC-SHA256 iteration count for the fallback key.
const PBKDF2_ITERATIONS: u32 = 600_000;

/// Derives the primary 32-byte key from a password and salt using
/// Argon2id (time=3, memory=64 MiB, parallelism=4).
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN]> {
    let params = argon2::Params::new(64 * 1024, 3, 4, Some(KEY_LEN))
        .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("argon2 derivation failed: {e}"))?;
    Ok(key)
}

/// Derives the fallback 32-byte key using PBKDF2-HMAC-SHA256 with
/// 600,000 rounds, for clients that cannot run the Argon2 WebAssembly.
pub fn derive_key_fallback(password: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key)
        .expect("pbkdf2 output length matches key length");
    key
}

/// Generates a fresh random salt from the OS CSPRNG.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Generates a random password of the given length from an alphanumeric
/// alphabet, for sessions started without an explicit password.
pub fn generate_password(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = (rng.next_u32() as usize) % ALPHABET.len();
            ALPHABET[idx] as char
        })
        .collect()
}

/// Minimum accepted length for a user-supplied password.
pub const MIN_PASSWORD_LEN: usize = 12;

/// Returns whether a user-supplied password meets the minimum length.
pub fn validate_password_length(password: &str) -> bool {
    password.len() >= MIN_PASSWORD_LEN
}

/// Encrypts `plaintext` under `key`, returning `nonce(24) || ciphertext || tag(16)`.
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a `nonce || ciphertext || tag` blob produced by [`encrypt`].
///
/// Never returns a partial plaintext: any failure (too short, bad tag)
/// is a single opaque error.
pub fn decrypt(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < MIN_CIPHERTEXT_LEN {
        bail!("ciphertext shorter than nonce+tag");
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    let nonce = XNonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("decryption failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key("correct-horse-battery-staple", &salt).unwrap();
        let b = derive_key("correct-horse-battery-staple", &salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_key_differs_by_password_and_salt() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key("password-one", &salt).unwrap();
        let b = derive_key("password-two", &salt).unwrap();
        assert_ne!(a, b);

        let other_salt = [8u8; SALT_LEN];
        let c = derive_key("password-one", &other_salt).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_primary_and_fallback_keys_distinct() {
        let salt = [3u8; SALT_LEN];
        let primary = derive_key("correct-horse-battery-staple", &salt).unwrap();
        let fallback = derive_key_fallback("correct-horse-battery-staple", &salt);
        assert_ne!(primary, fallback);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [42u8; KEY_LEN];
        let plaintext = b"ls -la\n";
        let sealed = encrypt(&key, plaintext).unwrap();
        let opened = decrypt(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_encrypt_is_randomized() {
        let key = [1u8; KEY_LEN];
        let a = encrypt(&key, b"same plaintext").unwrap();
        let b = encrypt(&key, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_bit_flip_fails_decryption() {
        let key = [9u8; KEY_LEN];
        let mut sealed = encrypt(&key, b"tamper me").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(decrypt(&key, &sealed).is_err());
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let key = [5u8; KEY_LEN];
        let short = vec![0u8; MIN_CIPHERTEXT_LEN - 1];
        assert!(decrypt(&key, &short).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = [1u8; KEY_LEN];
        let wrong = [2u8; KEY_LEN];
        let sealed = encrypt(&key, b"secret").unwrap();
        assert!(decrypt(&wrong, &sealed).is_err());
    }

    #[test]
    fn test_password_length_validation() {
        assert!(!validate_password_length("short"));
        assert!(validate_password_length("correct-horse-battery-staple"));
    }
}
