//! Cryptographic primitives used by the journal.
//!
//! - Content hashing: BLAKE2b-256 of a canonical byte encoding, rendered as
//!   lowercase base32 with no padding.
//! - Log signing: Ed25519 over the MD5 digest of a log's concatenated op refs
//!   (`signing_bytes`, §4.2 — intentionally weak, preserved for wire
//!   compatibility, not a recommended construction for new designs).
//! - Journal-at-rest: AES-256-GCM, keyed by the hex-encoded MD5 of the raw
//!   private key bytes.

use std::sync::OnceLock;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use blake2::Blake2b;
use blake2::digest::consts::U32;
use blake2::digest::{Digest, FixedOutput, Update};
use data_encoding::Encoding;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use md5::Md5;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::OplogError;

type Blake2b256 = Blake2b<U32>;

/// Lowercase, unpadded RFC4648 base32 alphabet required by the wire format.
fn base32_lower() -> &'static Encoding {
    static ENCODING: OnceLock<Encoding> = OnceLock::new();
    ENCODING.get_or_init(|| {
        let mut spec = data_encoding::Specification::new();
        spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
        spec.encoding().expect("valid base32 specification")
    })
}

/// Hash `bytes` with BLAKE2b-256 and encode the digest as lowercase,
/// unpadded base32 (the stable identity scheme for `Op`s and `Log`s).
#[must_use]
pub fn hash(bytes: &[u8]) -> String {
    let mut hasher = Blake2b256::new();
    Update::update(&mut hasher, bytes);
    let digest = FixedOutput::finalize_fixed(hasher);
    base32_lower().encode(&digest)
}

/// MD5 digest of `bytes`, 16 bytes.
#[must_use]
pub fn md5_digest(bytes: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    Digest::update(&mut hasher, bytes);
    let out = hasher.finalize();
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&out);
    buf
}

/// Generate a fresh Ed25519 signing key.
#[must_use]
pub fn generate_signing_key() -> SigningKey {
    let mut rng = OsRng;
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

/// Sign `message` with `key`, returning the raw 64-byte signature.
#[must_use]
pub fn sign(key: &SigningKey, message: &[u8]) -> [u8; 64] {
    key.sign(message).to_bytes()
}

/// Verify `signature` over `message` against `public_key`.
///
/// # Errors
/// Returns [`OplogError::InvalidSignature`] if verification fails or the
/// signature bytes are malformed.
pub fn verify(
    public_key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
    log_id: &str,
) -> Result<(), OplogError> {
    let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| OplogError::InvalidSignature {
        log_id: log_id.to_owned(),
    })?;
    let sig = Signature::from_bytes(&sig_bytes);
    public_key
        .verify(message, &sig)
        .map_err(|_| OplogError::InvalidSignature {
            log_id: log_id.to_owned(),
        })
}

/// Derive the AES-256 key for journal-at-rest encryption from a raw private
/// key's bytes: the hex-encoded MD5 digest, interpreted as 32 ASCII bytes.
#[must_use]
pub fn derive_aes_key(private_key_bytes: &[u8]) -> [u8; 32] {
    let digest = md5_digest(private_key_bytes);
    let hex = data_encoding::HEXLOWER.encode(&digest);
    let mut key = [0u8; 32];
    key.copy_from_slice(hex.as_bytes());
    key
}

/// Seal `plaintext` with AES-256-GCM under a key derived from
/// `private_key_bytes`. A fresh random 12-byte nonce is generated and
/// prepended to the ciphertext.
///
/// # Errors
/// Returns [`OplogError::CryptoError`] if the cipher fails.
pub fn seal(private_key_bytes: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, OplogError> {
    let key_bytes = derive_aes_key(private_key_bytes);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| OplogError::CryptoError {
            detail: format!("AES-GCM seal failed: {e}"),
        })?;

    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a blob produced by [`seal`]: split the leading 12-byte nonce from the
/// ciphertext and decrypt with the key derived from `private_key_bytes`.
///
/// # Errors
/// Returns [`OplogError::CorruptJournal`] if the blob is too short, or
/// [`OplogError::CryptoError`] if decryption fails (wrong key or tampered
/// ciphertext).
pub fn open(private_key_bytes: &[u8], sealed: &[u8]) -> Result<Vec<u8>, OplogError> {
    if sealed.len() < 12 {
        return Err(OplogError::CorruptJournal {
            detail: "sealed blob shorter than the 12-byte nonce prefix".to_owned(),
        });
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(12);

    let key_bytes = derive_aes_key(private_key_bytes);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| OplogError::CryptoError {
            detail: format!("AES-GCM open failed: {e}"),
        })
}
