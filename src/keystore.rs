//! Encrypted keystore for the feed signing identity.
//!
//! # Algorithms
//!
//! - **Identity**: Ed25519 keypair
//! - **Key Derivation**: Argon2id over the passphrase with a random salt
//! - **Encryption**: ChaCha20-Poly1305 over the 32-byte private key
//!
//! The owner address is the last 20 bytes of SHA-256 of the public key.
//! A keystore records that address so unlocking can confirm the right key
//! came out.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Keystore file format version
pub const KEYSTORE_VERSION: u32 = 1;

/// KDF name recorded in the keystore
pub const KDF_NAME: &str = "argon2id";

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Ed25519 private key length (32 bytes)
pub const PRIVATE_KEY_LEN: usize = 32;

/// Owner address length (20 bytes)
pub const ADDRESS_LEN: usize = 20;

/// Upper bounds for KDF costs read from a keystore (256 MiB, 16 passes, 16 lanes)
pub const MAX_KDF_MEMORY_KIB: u32 = 4 * 65536;
pub const MAX_KDF_ITERATIONS: u32 = 16;
pub const MAX_KDF_PARALLELISM: u32 = 16;

/// Keystore errors
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("Keystore is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported keystore version {0}")]
    UnsupportedVersion(u32),

    #[error("Unsupported key derivation function: {0}")]
    UnsupportedKdf(String),

    #[error("Malformed keystore field {field}: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("Failed to decrypt key (wrong password?)")]
    Decrypt,

    #[error("Keystore address {recorded} does not match decrypted key {derived}")]
    AddressMismatch { recorded: String, derived: String },

    #[error("Crypto error: {0}")]
    Crypto(String),
}

// =============================================================================
// Signing identity
// =============================================================================

/// Private key plus the owner address derived from it
#[derive(Clone)]
pub struct SigningIdentity {
    signing_key: SigningKey,
    address: String,
}

impl SigningIdentity {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = derive_address(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// Generate a fresh identity from the OS random number generator
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Lowercase hex owner address, no `0x` prefix
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, payload: &[u8]) -> Signature {
        self.signing_key.sign(payload)
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Owner address for a public key
pub fn derive_address(verifying_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(verifying_key.as_bytes());
    hex::encode(&digest[digest.len() - ADDRESS_LEN..])
}

// =============================================================================
// Keystore file
// =============================================================================

/// Argon2id cost parameters, stored alongside the ciphertext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// 64 MB, 3 iterations, 4 lanes
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Reject costs above the `MAX_KDF_*` ceilings
    pub fn check_bounds(&self) -> Result<(), KeystoreError> {
        let limits = [
            ("memory_kib", self.memory_kib, MAX_KDF_MEMORY_KIB),
            ("iterations", self.iterations, MAX_KDF_ITERATIONS),
            ("parallelism", self.parallelism, MAX_KDF_PARALLELISM),
        ];
        for (name, value, max) in limits {
            if value > max {
                return Err(KeystoreError::Malformed {
                    field: "kdf_params",
                    reason: format!("{} {} exceeds limit {}", name, value, max),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreCrypto {
    pub kdf: String,
    #[serde(default)]
    pub kdf_params: KdfParams,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// On-disk / environment representation of an encrypted identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreFile {
    pub version: u32,
    pub address: String,
    pub crypto: KeystoreCrypto,
}

impl KeystoreFile {
    pub fn to_json(&self) -> Result<String, KeystoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Encrypt an identity under a passphrase with default KDF costs
pub fn encrypt_identity(
    identity: &SigningIdentity,
    password: &[u8],
) -> Result<KeystoreFile, KeystoreError> {
    encrypt_identity_with(identity, password, KdfParams::default())
}

pub fn encrypt_identity_with(
    identity: &SigningIdentity,
    password: &[u8],
    params: KdfParams,
) -> Result<KeystoreFile, KeystoreError> {
    let salt: [u8; SALT_LEN] = random_bytes();
    let nonce: [u8; NONCE_LEN] = random_bytes();
    let key = derive_key_encryption_key(password, &salt, params)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let private_key = Zeroizing::new(identity.signing_key.to_bytes());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), private_key.as_slice())
        .map_err(|e| KeystoreError::Crypto(format!("Encryption failed: {e}")))?;

    Ok(KeystoreFile {
        version: KEYSTORE_VERSION,
        address: identity.address.clone(),
        crypto: KeystoreCrypto {
            kdf: KDF_NAME.to_string(),
            kdf_params: params,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        },
    })
}

/// Parse keystore JSON and decrypt it with the passphrase
pub fn unlock(keystore_json: &str, password: &[u8]) -> Result<SigningIdentity, KeystoreError> {
    let file: KeystoreFile = serde_json::from_str(keystore_json)?;
    unlock_file(&file, password)
}

pub fn unlock_file(file: &KeystoreFile, password: &[u8]) -> Result<SigningIdentity, KeystoreError> {
    if file.version != KEYSTORE_VERSION {
        return Err(KeystoreError::UnsupportedVersion(file.version));
    }
    if file.crypto.kdf != KDF_NAME {
        return Err(KeystoreError::UnsupportedKdf(file.crypto.kdf.clone()));
    }

    let salt = decode_field("salt", &file.crypto.salt)?;
    let nonce = decode_field("nonce", &file.crypto.nonce)?;
    let ciphertext = decode_field("ciphertext", &file.crypto.ciphertext)?;
    if nonce.len() != NONCE_LEN {
        return Err(KeystoreError::Malformed {
            field: "nonce",
            reason: format!("expected {} bytes, got {}", NONCE_LEN, nonce.len()),
        });
    }

    file.crypto.kdf_params.check_bounds()?;
    let key = derive_key_encryption_key(password, &salt, file.crypto.kdf_params)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| KeystoreError::Decrypt)?,
    );

    let private_key: [u8; PRIVATE_KEY_LEN] =
        plaintext
            .as_slice()
            .try_into()
            .map_err(|_| KeystoreError::Malformed {
                field: "ciphertext",
                reason: format!("decrypted key is {} bytes", plaintext.len()),
            })?;
    let private_key = Zeroizing::new(private_key);

    let identity = SigningIdentity::from_signing_key(SigningKey::from_bytes(&private_key));
    let recorded = file.address.trim_start_matches("0x").to_lowercase();
    if identity.address != recorded {
        return Err(KeystoreError::AddressMismatch {
            recorded,
            derived: identity.address,
        });
    }

    Ok(identity)
}

fn derive_key_encryption_key(
    password: &[u8],
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| KeystoreError::Crypto(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, key.as_mut_slice())
        .map_err(|e| KeystoreError::Crypto(format!("Key derivation failed: {e}")))?;

    Ok(key)
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, KeystoreError> {
    hex::decode(value).map_err(|e| KeystoreError::Malformed {
        field,
        reason: e.to_string(),
    })
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    // Cheap KDF costs so tests stay fast
    fn test_params() -> KdfParams {
        KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_address_derivation() {
        let identity = SigningIdentity::generate();
        assert_eq!(identity.address().len(), ADDRESS_LEN * 2);
        assert_eq!(identity.address(), derive_address(&identity.verifying_key()));
    }

    #[test]
    fn test_encrypt_unlock_roundtrip() {
        let identity = SigningIdentity::generate();
        let file = encrypt_identity_with(&identity, b"correct horse", test_params()).unwrap();
        let json = file.to_json().unwrap();

        let unlocked = unlock(&json, b"correct horse").unwrap();
        assert_eq!(unlocked.address(), identity.address());

        let message = b"feed entry digest";
        let signature = unlocked.sign(message);
        assert!(identity.verifying_key().verify(message, &signature).is_ok());
    }

    #[test]
    fn test_wrong_password_fails() {
        let identity = SigningIdentity::generate();
        let file = encrypt_identity_with(&identity, b"right", test_params()).unwrap();

        let result = unlock_file(&file, b"wrong");
        assert!(matches!(result, Err(KeystoreError::Decrypt)));
    }

    #[test]
    fn test_address_mismatch_detected() {
        let identity = SigningIdentity::generate();
        let mut file = encrypt_identity_with(&identity, b"pw", test_params()).unwrap();
        file.address = "00".repeat(ADDRESS_LEN);

        let result = unlock_file(&file, b"pw");
        assert!(matches!(result, Err(KeystoreError::AddressMismatch { .. })));
    }

    #[test]
    fn test_rejects_unknown_version_and_kdf() {
        let identity = SigningIdentity::generate();
        let file = encrypt_identity_with(&identity, b"pw", test_params()).unwrap();

        let mut bad_version = file.clone();
        bad_version.version = 2;
        assert!(matches!(
            unlock_file(&bad_version, b"pw"),
            Err(KeystoreError::UnsupportedVersion(2))
        ));

        let mut bad_kdf = file;
        bad_kdf.crypto.kdf = "scrypt".into();
        assert!(matches!(
            unlock_file(&bad_kdf, b"pw"),
            Err(KeystoreError::UnsupportedKdf(_))
        ));
    }

    #[test]
    fn test_oversized_kdf_costs_rejected_before_derivation() {
        let identity = SigningIdentity::generate();
        let mut file = encrypt_identity_with(&identity, b"pw", test_params()).unwrap();
        file.crypto.kdf_params.memory_kib = u32::MAX;

        match unlock_file(&file, b"pw") {
            Err(KeystoreError::Malformed { field, reason }) => {
                assert_eq!(field, "kdf_params");
                assert!(reason.contains("memory_kib"));
            }
            other => panic!("unexpected result: {:?}", other.map(|i| i.address().to_string())),
        }

        let mut file = encrypt_identity_with(&identity, b"pw", test_params()).unwrap();
        file.crypto.kdf_params.iterations = MAX_KDF_ITERATIONS + 1;
        assert!(matches!(
            unlock_file(&file, b"pw"),
            Err(KeystoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_default_kdf_costs_within_bounds() {
        assert!(KdfParams::default().check_bounds().is_ok());
    }

    #[test]
    fn test_garbage_json() {
        assert!(matches!(unlock("{not json", b"pw"), Err(KeystoreError::Parse(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let identity = SigningIdentity::generate();
        let debug = format!("{:?}", identity);
        assert!(debug.contains(identity.address()));
        assert!(!debug.contains("signing_key"));
    }
}
