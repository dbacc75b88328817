//! Signing-key loading for the oracle authority.
//!
//! `TRADESENTRY_KEY_PROVIDER` selects where the 32-byte ed25519 seed comes
//! from: `file` (default; hex seed at the configured path) or `env`
//! (`TRADESENTRY_SIGNING_KEY_HEX`). The provider split keeps a KMS-backed
//! implementation pluggable without touching call sites.

use ed25519_dalek::SigningKey;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const KEY_PROVIDER_ENV: &str = "TRADESENTRY_KEY_PROVIDER";
pub const SIGNING_KEY_HEX_ENV: &str = "TRADESENTRY_SIGNING_KEY_HEX";

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid key provider {0:?}; expected file or env")]
    InvalidProvider(String),

    #[error("signing key file {0:?} is unreadable")]
    UnreadableKeyFile(String),

    #[error("signing key env {0} is missing")]
    MissingKeyEnv(&'static str),

    #[error("signing key must be 32 bytes of hex")]
    MalformedKey,
}

pub enum SigningKeySource {
    File,
    Env,
}

impl SigningKeySource {
    pub fn from_env() -> Result<Self, SignerError> {
        match std::env::var(KEY_PROVIDER_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("env") => Ok(Self::Env),
            Ok(value) if value.eq_ignore_ascii_case("file") => Ok(Self::File),
            Ok(value) => Err(SignerError::InvalidProvider(value)),
            Err(_) => Ok(Self::File),
        }
    }
}

pub fn load_signing_key(key_path: &Path) -> Result<SigningKey, SignerError> {
    match SigningKeySource::from_env()? {
        SigningKeySource::File => {
            let raw = fs::read_to_string(key_path)
                .map_err(|_| SignerError::UnreadableKeyFile(key_path.display().to_string()))?;
            parse_seed_hex(raw.trim())
        }
        SigningKeySource::Env => {
            let raw = std::env::var(SIGNING_KEY_HEX_ENV)
                .map_err(|_| SignerError::MissingKeyEnv(SIGNING_KEY_HEX_ENV))?;
            parse_seed_hex(raw.trim())
        }
    }
}

pub fn parse_seed_hex(raw: &str) -> Result<SigningKey, SignerError> {
    let bytes = hex::decode(raw).map_err(|_| SignerError::MalformedKey)?;
    let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| SignerError::MalformedKey)?;
    Ok(SigningKey::from_bytes(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_seed_from_file_by_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", "11".repeat(32)).unwrap();
        let key = load_signing_key(file.path()).unwrap();
        assert_eq!(key.to_bytes(), [0x11; 32]);
    }

    #[test]
    fn rejects_short_seed() {
        assert!(matches!(
            parse_seed_hex("abcd"),
            Err(SignerError::MalformedKey)
        ));
    }

    #[test]
    fn rejects_non_hex_seed() {
        assert!(parse_seed_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn missing_key_file_is_reported() {
        let err = load_signing_key(Path::new("/nonexistent/key.hex")).unwrap_err();
        assert!(matches!(err, SignerError::UnreadableKeyFile(_)));
    }
}
