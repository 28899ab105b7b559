//! Reversible secret encryption
//!
//! Secrets are stored as `base64:<payload>` where the payload is
//! `nonce || AES-256-GCM(ciphertext + tag)` and the key is SHA-256 of the
//! operator pass phrase. Values without the prefix are treated as plaintext.

use crate::error::ConfigError;
use crate::model::NodeConfig;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::digest::{SHA256, digest};
use ring::rand::{SecureRandom, SystemRandom};

/// Marker prefix of an encrypted value
pub const ENCRYPTED_PREFIX: &str = "base64:";

fn key_for(pass_phrase: &str) -> Result<LessSafeKey, ConfigError> {
    let hash = digest(&SHA256, pass_phrase.as_bytes());
    let unbound = UnboundKey::new(&AES_256_GCM, hash.as_ref())
        .map_err(|_| ConfigError::Crypt("failed to derive key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plain`; values that already carry the prefix are returned unchanged
///
/// # Errors
///
/// Returns `ConfigError::Crypt` if the random source or cipher fails.
pub fn encrypt_string(plain: &str, pass_phrase: &str) -> Result<String, ConfigError> {
    if plain.starts_with(ENCRYPTED_PREFIX) {
        return Ok(plain.to_string());
    }
    let key = key_for(pass_phrase)?;
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| ConfigError::Crypt("failed to generate nonce".to_string()))?;
    let mut sealed = plain.as_bytes().to_vec();
    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut sealed)
        .map_err(|_| ConfigError::Crypt("failed to encrypt".to_string()))?;
    let mut payload = nonce.to_vec();
    payload.extend_from_slice(&sealed);
    Ok(format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(payload)))
}

/// Decrypt a `base64:` value; anything else passes through
///
/// # Errors
///
/// Returns `ConfigError::Crypt` for malformed payloads or a wrong pass phrase.
pub fn decrypt_string(value: &str, pass_phrase: &str) -> Result<String, ConfigError> {
    let Some(encoded) = value.strip_prefix(ENCRYPTED_PREFIX) else {
        return Ok(value.to_string());
    };
    let payload = STANDARD
        .decode(encoded)
        .map_err(|e| ConfigError::Crypt(format!("failed to decode base64: {e}")))?;
    if payload.len() < NONCE_LEN {
        return Err(ConfigError::Crypt("ciphertext too short".to_string()));
    }
    let (nonce, sealed) = payload.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| ConfigError::Crypt("invalid nonce".to_string()))?;
    let key = key_for(pass_phrase)?;
    let mut buf = sealed.to_vec();
    let plain = key
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| ConfigError::Crypt("failed to decrypt: authentication failed".to_string()))?;
    String::from_utf8(plain.to_vec())
        .map_err(|e| ConfigError::Crypt(format!("decrypted value is not UTF-8: {e}")))
}

fn secrets_mut(config: &mut NodeConfig) -> Vec<(&'static str, &mut String)> {
    let mut fields: Vec<(&'static str, &mut String)> = vec![
        ("ipam.ibCredentials.user", &mut config.ipam.credentials.credentials.user),
        ("ipam.ibCredentials.password", &mut config.ipam.credentials.credentials.password),
        ("storage.cdotCredentials.user", &mut config.storage.cdot_credentials.credentials.user),
        ("storage.cdotCredentials.password", &mut config.storage.cdot_credentials.credentials.password),
        ("compute.ucsmCredentials.user", &mut config.compute.ucsm_credentials.user),
        ("compute.ucsmCredentials.password", &mut config.compute.ucsm_credentials.password),
    ];
    fields.extend(config.cloud_args.values_mut().map(|v| ("cloudArgs", v)));
    fields
}

fn transform_secrets(
    config: &mut NodeConfig,
    pass_phrase: &str,
    op: fn(&str, &str) -> Result<String, ConfigError>,
) -> Result<(), ConfigError> {
    for (name, value) in secrets_mut(config) {
        if value.is_empty() {
            continue;
        }
        *value = op(value, pass_phrase)
            .map_err(|e| ConfigError::Crypt(format!("{name}: {e}")))?;
    }
    Ok(())
}

/// Encrypt every credential and cloud-args value in place
///
/// # Errors
///
/// Fails on the first value that cannot be encrypted.
pub fn encrypt_node_config(config: &mut NodeConfig, pass_phrase: &str) -> Result<(), ConfigError> {
    transform_secrets(config, pass_phrase, encrypt_string)
}

/// Decrypt every credential and cloud-args value in place
///
/// # Errors
///
/// Fails on the first value that cannot be decrypted.
pub fn decrypt_node_config(config: &mut NodeConfig, pass_phrase: &str) -> Result<(), ConfigError> {
    transform_secrets(config, pass_phrase, decrypt_string)
}
