//! Password encryption matching the portal's client-side scheme.
//!
//! The login page ships a JavaScript helper that AES-CBC encrypts
//! `random(64) ++ password` with the server-provided salt as key and a random
//! 16-char IV, then base64-encodes the result. The server discards the first
//! 64 bytes after decryption, so the IV never needs to be transmitted (an
//! unknown IV only garbles the first CBC block, which is random padding
//! anyway). This module reproduces that scheme byte-for-byte in structure;
//! the output itself is randomized per call.

use aes::Aes128;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use rand::Rng;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Length of the random prefix prepended to the plaintext before encryption.
pub const RANDOM_PREFIX_LEN: usize = 64;

const IV_LEN: usize = 16;
const KEY_LEN: usize = 16;

// Same alphabet the portal's encrypt.js draws from.
const CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTWXYZabcdefhijkmnprstwxyz2345678";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption salt must be {KEY_LEN} bytes, got {0}")]
    SaltLength(usize),
    #[error("salt is empty; submit the password in plaintext instead")]
    EmptySalt,
}

fn random_ascii(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())])
        .collect()
}

/// Derive the password ciphertext expected by the login endpoint.
///
/// Callers must handle the empty-salt case themselves (the portal then takes
/// the password in plaintext); passing an empty salt here is an error.
pub fn encrypt_password(password: &str, salt: &str) -> Result<String, CryptoError> {
    let salt = salt.trim();
    if salt.is_empty() {
        return Err(CryptoError::EmptySalt);
    }
    if salt.len() != KEY_LEN {
        return Err(CryptoError::SaltLength(salt.len()));
    }

    let mut plaintext = random_ascii(RANDOM_PREFIX_LEN);
    plaintext.extend_from_slice(password.as_bytes());

    let iv = random_ascii(IV_LEN);
    let cipher = Aes128CbcEnc::new_from_slices(salt.as_bytes(), &iv)
        .expect("key and iv lengths checked above");
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    Ok(BASE64.encode(ciphertext))
}
