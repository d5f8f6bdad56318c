use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use anyhow::anyhow;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::{encryption_iv, encryption_key};
use crate::core::errors::ApiError;
use crate::models::models::GeoPoint;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; 32],
    iv: [u8; 16],
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCipher { .. }")
    }
}

impl FieldCipher {
    pub fn new(key: &[u8], iv: &[u8]) -> anyhow::Result<Self> {
        let key: [u8; 32] = key
            .try_into()
            .map_err(|_| anyhow!("encryption key must be 32 bytes, got {}", key.len()))?;
        let iv: [u8; 16] = iv
            .try_into()
            .map_err(|_| anyhow!("encryption IV must be 16 bytes, got {}", iv.len()))?;
        Ok(Self { key, iv })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(&encryption_key(), &encryption_iv())
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        hex::encode(ciphertext)
    }

    pub fn decrypt(&self, token: &str) -> Result<String, ApiError> {
        let ciphertext = hex::decode(token)
            .map_err(|e| ApiError::CorruptData(format!("token is not hex: {}", e)))?;
        let plaintext = Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| ApiError::CorruptData("token does not decrypt under the configured key".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| ApiError::CorruptData("decrypted token is not UTF-8".to_string()))
    }

    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String, ApiError> {
        Ok(self.encrypt(&serde_json::to_string(value)?))
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, token: &str) -> Result<T, ApiError> {
        let json = self.decrypt(token)?;
        serde_json::from_str(&json)
            .map_err(|e| ApiError::CorruptData(format!("decrypted token is not valid JSON: {}", e)))
    }

    pub fn encrypt_location(&self, location: &GeoPoint) -> Result<String, ApiError> {
        self.encrypt_json(location)
    }

    // Out-of-range coordinates count as corrupt
    pub fn decrypt_location(&self, token: Option<&str>) -> Result<Option<GeoPoint>, ApiError> {
        let Some(token) = token else {
            return Ok(None);
        };
        let point: GeoPoint = self.decrypt_json(token)?;
        if !point.is_valid() {
            return Err(ApiError::CorruptData(format!(
                "stored location out of range: ({}, {})",
                point.lat, point.lon
            )));
        }
        Ok(Some(point))
    }

    pub fn decrypt_or_raw(&self, token: &str) -> String {
        self.decrypt(token).unwrap_or_else(|_| token.to_string())
    }
}
