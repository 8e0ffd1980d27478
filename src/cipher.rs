//! AES transport cipher in CBC (PKCS#7) or GCM mode.
//!
//! Two independent layers use it: the per-video HLS key protects segment bytes for
//! standard players, and a fixed GCM key wraps whole manifests for the private player.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::Engine;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::fmt;
use std::str::FromStr;

use crate::constants::{PLAYER_TRANSPORT_KEY, PLAYER_TRANSPORT_NONCE};
use crate::error::CipherError;

type Aes192Gcm = AesGcm<Aes192, U12>;

const BLOCK_SIZE: usize = 16;

/// Block cipher mode, chosen per call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// 16-byte IV, PKCS#7 padding, no integrity
    Cbc,
    /// 12-byte nonce, authenticated
    Gcm,
}

impl CipherMode {
    pub fn iv_len(self) -> usize {
        match self {
            CipherMode::Cbc => 16,
            CipherMode::Gcm => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CipherMode::Cbc => "CBC",
            CipherMode::Gcm => "GCM",
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CBC" => Ok(CipherMode::Cbc),
            "GCM" => Ok(CipherMode::Gcm),
            other => Err(format!("unsupported cipher mode: {} (expected CBC or GCM)", other)),
        }
    }
}

fn check_params(key: &[u8], iv: &[u8], mode: CipherMode) -> Result<(), CipherError> {
    if !matches!(key.len(), 16 | 24 | 32) {
        return Err(CipherError::KeyLengthInvalid(key.len()));
    }
    if iv.len() != mode.iv_len() {
        return Err(CipherError::IvLengthInvalid {
            mode: mode.as_str(),
            expected: mode.iv_len(),
            actual: iv.len(),
        });
    }
    Ok(())
}

/// Encrypt `data`. CBC output is padded to whole blocks; GCM output carries a 16-byte tag.
pub fn encrypt(data: &[u8], key: &[u8], iv: &[u8], mode: CipherMode) -> Result<Vec<u8>, CipherError> {
    check_params(key, iv, mode)?;
    match mode {
        CipherMode::Cbc => cbc_encrypt(data, key, iv),
        CipherMode::Gcm => match key.len() {
            16 => gcm_seal::<Aes128Gcm>(data, key, iv),
            24 => gcm_seal::<Aes192Gcm>(data, key, iv),
            _ => gcm_seal::<Aes256Gcm>(data, key, iv),
        },
    }
}

/// Decrypt `data`. A GCM tag mismatch returns no plaintext at all.
pub fn decrypt(data: &[u8], key: &[u8], iv: &[u8], mode: CipherMode) -> Result<Vec<u8>, CipherError> {
    check_params(key, iv, mode)?;
    if data.is_empty() {
        return Err(CipherError::EmptyCiphertext);
    }
    match mode {
        CipherMode::Cbc => cbc_decrypt(data, key, iv),
        CipherMode::Gcm => match key.len() {
            16 => gcm_open::<Aes128Gcm>(data, key, iv),
            24 => gcm_open::<Aes192Gcm>(data, key, iv),
            _ => gcm_open::<Aes256Gcm>(data, key, iv),
        },
    }
}

fn cbc_encrypt(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
    let out = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(data)),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(data)),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(data)),
    };
    out.map_err(|_| CipherError::KeyLengthInvalid(key.len()))
}

fn cbc_decrypt(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::CiphertextLength(data.len()));
    }
    let out = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map(|c| c.decrypt_padded_vec_mut::<NoPadding>(data)),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map(|c| c.decrypt_padded_vec_mut::<NoPadding>(data)),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map(|c| c.decrypt_padded_vec_mut::<NoPadding>(data)),
    };
    let mut plain = out
        .map_err(|_| CipherError::KeyLengthInvalid(key.len()))?
        .map_err(|_| CipherError::CiphertextLength(data.len()))?;
    let keep = pkcs7_unpadded_len(&plain)?;
    plain.truncate(keep);
    Ok(plain)
}

/// Length of `block_aligned` once its PKCS#7 padding is removed
pub fn pkcs7_unpadded_len(block_aligned: &[u8]) -> Result<usize, CipherError> {
    let len = block_aligned.len();
    let Some(&last) = block_aligned.last() else {
        return Err(CipherError::EmptyCiphertext);
    };
    let pad = last as usize;
    if pad == 0 || pad > len || pad > BLOCK_SIZE {
        return Err(CipherError::PaddingInvalid);
    }
    if block_aligned[len - pad..].iter().any(|&b| b != last) {
        return Err(CipherError::PaddingInvalid);
    }
    Ok(len - pad)
}

fn gcm_seal<C>(data: &[u8], key: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| CipherError::KeyLengthInvalid(key.len()))?;
    // Only fails for plaintexts beyond the GCM length limit
    cipher
        .encrypt(GenericArray::from_slice(nonce), data)
        .map_err(|_| CipherError::CiphertextLength(data.len()))
}

fn gcm_open<C>(data: &[u8], key: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| CipherError::KeyLengthInvalid(key.len()))?;
    cipher
        .decrypt(GenericArray::from_slice(nonce), data)
        .map_err(|_| CipherError::AuthenticationFailed)
}

/// Key, IV and mode validated once, reused for many payloads
#[derive(Clone)]
pub struct TransportCipher {
    key: Vec<u8>,
    iv: Vec<u8>,
    mode: CipherMode,
}

impl fmt::Debug for TransportCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCipher")
            .field("mode", &self.mode)
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl TransportCipher {
    pub fn new(key: &[u8], iv: &[u8], mode: CipherMode) -> Result<Self, CipherError> {
        check_params(key, iv, mode)?;
        Ok(Self {
            key: key.to_vec(),
            iv: iv.to_vec(),
            mode,
        })
    }

    /// GCM with the key and nonce embedded in the private player
    pub fn player_default() -> Self {
        Self {
            key: PLAYER_TRANSPORT_KEY.to_vec(),
            iv: PLAYER_TRANSPORT_NONCE.to_vec(),
            mode: CipherMode::Gcm,
        }
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub fn seal(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        encrypt(data, &self.key, &self.iv, self.mode)
    }

    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        decrypt(data, &self.key, &self.iv, self.mode)
    }

    /// Seal `text` and base64 encode it for the player's `info` field
    pub fn seal_base64(&self, text: &str) -> Result<String, CipherError> {
        let sealed = self.seal(text.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing_is_case_insensitive() {
        assert_eq!("cbc".parse::<CipherMode>().unwrap(), CipherMode::Cbc);
        assert_eq!("GCM".parse::<CipherMode>().unwrap(), CipherMode::Gcm);
        assert!("ctr".parse::<CipherMode>().is_err());
    }

    #[test]
    fn padding_rules() {
        let mut block = [4u8; 16];
        assert_eq!(pkcs7_unpadded_len(&block), Ok(12));
        block[15] = 0;
        assert_eq!(pkcs7_unpadded_len(&block), Err(CipherError::PaddingInvalid));
        block[15] = 17;
        assert_eq!(pkcs7_unpadded_len(&block), Err(CipherError::PaddingInvalid));
        block[14] = 9;
        block[15] = 2;
        assert_eq!(pkcs7_unpadded_len(&block), Err(CipherError::PaddingInvalid));
        assert_eq!(pkcs7_unpadded_len(&[]), Err(CipherError::EmptyCiphertext));
    }

    #[test]
    fn empty_plaintext_cbc_is_one_padding_block() {
        let key = [7u8; 16];
        let iv = [1u8; 16];
        let sealed = encrypt(b"", &key, &iv, CipherMode::Cbc).unwrap();
        assert_eq!(sealed.len(), 16);
        assert_eq!(decrypt(&sealed, &key, &iv, CipherMode::Cbc).unwrap(), b"");
    }
}
