//! Facade over the asymmetric and symmetric primitives used by the
//! protocol: RSA-OAEP for key transport, RSA-PSS for certificate
//! signatures and AES-128-EAX for per-message authenticated encryption.

use aes::Aes128;
use eax::aead::generic_array::GenericArray;
use eax::aead::{AeadInPlace, KeyInit};
use eax::Eax;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, Pss};
use sha2::{Digest, Sha256};
use std::error;
use std::fmt;

pub use rsa::{RsaPrivateKey, RsaPublicKey};

pub const KEY_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 16;
pub const MAC_SIZE: usize = 16;
pub const DIGEST_SIZE: usize = 32;

/// Minimum accepted RSA modulus size.
pub const MIN_KEY_BITS: usize = 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CryptoError {
    InvalidKey,
    EncryptionFailed,
    DecryptionFailed,
    SignatureFailed,
    VerificationFailed,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let description = match self {
            CryptoError::InvalidKey => "invalid or malformed key material",
            CryptoError::EncryptionFailed => "encryption failed",
            CryptoError::DecryptionFailed => "decryption failed",
            CryptoError::SignatureFailed => "signing failed",
            CryptoError::VerificationFailed => "authentication tag mismatch",
        };
        write!(f, "{}", description)
    }
}

impl error::Error for CryptoError {}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Generates a fresh RSA keypair of the requested modulus size.
pub fn generate_keypair(bits: usize) -> CryptoResult<RsaPrivateKey> {
    if bits < MIN_KEY_BITS {
        return Err(CryptoError::InvalidKey);
    }

    RsaPrivateKey::new(&mut OsRng, bits).map_err(|_| CryptoError::InvalidKey)
}

/// Encrypts a short message (such as a session key or a credential)
/// under the recipient public key with OAEP over SHA-256.
pub fn oaep_encrypt(key: &RsaPublicKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypts an OAEP wrapped message with the private half.
pub fn oaep_decrypt(key: &RsaPrivateKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    key.decrypt(Oaep::new::<Sha256>(), data)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Produces a PSS signature over an externally computed SHA-256 digest.
pub fn pss_sign(key: &RsaPrivateKey, digest: &[u8; DIGEST_SIZE]) -> CryptoResult<Vec<u8>> {
    key.sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), digest)
        .map_err(|_| CryptoError::SignatureFailed)
}

/// Verifies a PSS signature over a SHA-256 digest.
#[inline]
pub fn pss_verify(key: &RsaPublicKey, digest: &[u8; DIGEST_SIZE], signature: &[u8]) -> bool {
    key.verify(Pss::new::<Sha256>(), digest, signature).is_ok()
}

/// Seals a plaintext under the 16-byte session key, returning the
/// ciphertext together with the detached authentication tag and the
/// freshly generated nonce. Every call draws a new nonce.
pub fn seal(
    key: &[u8; KEY_SIZE],
    plain: &[u8],
) -> CryptoResult<(Vec<u8>, [u8; MAC_SIZE], [u8; NONCE_SIZE])> {
    let cipher = Eax::<Aes128>::new(GenericArray::from_slice(key));

    let mut nonce = [0u8; NONCE_SIZE];
    random_bytes(&mut nonce);

    let mut data = plain.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), &[], &mut data)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&tag);

    Ok((data, mac, nonce))
}

/// Opens a sealed message. The nonce and mac must match those produced
/// during sealing; any mismatch surfaces as `VerificationFailed`.
/// Malformed nonce or mac lengths are rejected as `DecryptionFailed`
/// before the cipher runs.
pub fn open(key: &[u8; KEY_SIZE], nonce: &[u8], data: &[u8], mac: &[u8]) -> CryptoResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE || mac.len() != MAC_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = Eax::<Aes128>::new(GenericArray::from_slice(key));

    let mut plain = data.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            &[],
            &mut plain,
            GenericArray::from_slice(mac),
        )
        .map_err(|_| CryptoError::VerificationFailed)?;

    Ok(plain)
}

/// 32-byte SHA-256 digest.
#[inline]
pub fn sha256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&digest);
    out
}

/// Fills the provided buffer with cryptographically secure random bytes
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    OsRng.fill_bytes(out);
}

/// Exports a public key as DER bytes, the form carried on the wire and
/// embedded in certificates.
pub fn export_public_der(key: &RsaPublicKey) -> CryptoResult<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| CryptoError::InvalidKey)
}

pub fn import_public_der(data: &[u8]) -> CryptoResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(data).map_err(|_| CryptoError::InvalidKey)
}

/// PEM codecs for key files on disk.
pub fn export_private_pem(key: &RsaPrivateKey) -> CryptoResult<String> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|pem| pem.to_string())
        .map_err(|_| CryptoError::InvalidKey)
}

pub fn export_public_pem(key: &RsaPublicKey) -> CryptoResult<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|_| CryptoError::InvalidKey)
}

pub fn import_private_pem(pem: &str) -> CryptoResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| CryptoError::InvalidKey)
}

pub fn import_public_pem(pem: &str) -> CryptoResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|_| CryptoError::InvalidKey)
}
