//! Mojang session encryption
//!
//! Login-phase bootstrap: a 16-byte shared secret, RSA-PKCS1 encryption of
//! the secret and verify token against the server's DER public key, the
//! signed-BigInteger server hash for the session service, and the AES-128
//! CFB8 stream ciphers spliced into the upstream connection afterwards.
//!
//! The protocol reuses the shared secret as both AES key and IV. That quirk
//! is mandated by the wire format and replicated bit-exactly here.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use num_bigint::BigInt;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::error::{ProxyError, Result};

type Cfb8Encryptor = cfb8::Encryptor<Aes128>;
type Cfb8Decryptor = cfb8::Decryptor<Aes128>;

pub const SHARED_SECRET_LEN: usize = 16;

/// Generate the per-session 16-byte shared secret
pub fn generate_shared_secret() -> [u8; SHARED_SECRET_LEN] {
    let mut secret = [0u8; SHARED_SECRET_LEN];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    secret
}

/// RSA-encrypt `plaintext` (shared secret or verify token) with the
/// server's X.509/DER public key, PKCS1 v1.5 padding.
pub fn encrypt_rsa(public_key_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = RsaPublicKey::from_public_key_der(public_key_der)
        .map_err(|e| ProxyError::Crypto(format!("invalid server public key: {}", e)))?;
    key.encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| ProxyError::Crypto(format!("RSA encryption failed: {}", e)))
}

/// Compute the Yggdrasil server hash.
///
/// SHA-1 over serverId (ISO-8859-1 bytes) + secret + publicKeyDER, with the
/// digest reinterpreted as a signed big integer and rendered as lowercase
/// hex. The sign handling (possible leading minus, no zero padding) matches
/// Java's `BigInteger.toString(16)`, which the session service expects.
pub fn compute_server_hash(server_id: &str, secret: &[u8], public_key_der: &[u8]) -> String {
    let server_id_bytes: Vec<u8> = server_id.chars().map(|c| (c as u32) as u8).collect();
    let digest = Sha1::new()
        .chain_update(&server_id_bytes)
        .chain_update(secret)
        .chain_update(public_key_der)
        .finalize();
    BigInt::from_signed_bytes_be(&digest).to_str_radix(16)
}

/// Encrypting half of the upstream cipher splice (proxy -> upstream)
pub struct StreamEncryptor {
    cipher: Cfb8Encryptor,
}

impl StreamEncryptor {
    /// Encrypt in place. CFB8 is a self-synchronizing stream mode, so any
    /// chunking of the byte stream produces the same ciphertext.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(b)));
        }
    }
}

/// Decrypting half of the upstream cipher splice (upstream -> proxy)
pub struct StreamDecryptor {
    cipher: Cfb8Decryptor,
}

impl StreamDecryptor {
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(b)));
        }
    }
}

/// Build the two independent stream ciphers derived from one shared secret
pub fn create_cipher_pair(
    secret: &[u8; SHARED_SECRET_LEN],
) -> Result<(StreamDecryptor, StreamEncryptor)> {
    let decryptor = Cfb8Decryptor::new_from_slices(secret, secret)
        .map_err(|e| ProxyError::Crypto(format!("cipher init failed: {}", e)))?;
    let encryptor = Cfb8Encryptor::new_from_slices(secret, secret)
        .map_err(|e| ProxyError::Crypto(format!("cipher init failed: {}", e)))?;
    Ok((
        StreamDecryptor { cipher: decryptor },
        StreamEncryptor { cipher: encryptor },
    ))
}
