//! Durable, append-only salt registry.
//!
//! One lowercase hex line per accepted salt. The full set is replayed into
//! memory on open so replay protection survives restarts; the in-memory set
//! and the file append happen under one lock, keeping check-and-insert
//! atomic for concurrent verifications.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;
use tradesentry_verifier::SaltRegistry;

#[derive(Debug, Error)]
pub enum SaltStoreError {
    #[error("salt store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("salt store is corrupt at line {0}")]
    Corrupt(usize),
}

struct Inner {
    seen: HashSet<[u8; 32]>,
    file: File,
}

pub struct DurableSaltRegistry {
    inner: Mutex<Inner>,
}

impl DurableSaltRegistry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SaltStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut seen = HashSet::new();
        for (index, line) in BufReader::new(&file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let decoded =
                hex::decode(trimmed).map_err(|_| SaltStoreError::Corrupt(index + 1))?;
            let salt: [u8; 32] = decoded
                .as_slice()
                .try_into()
                .map_err(|_| SaltStoreError::Corrupt(index + 1))?;
            seen.insert(salt);
        }

        Ok(Self {
            inner: Mutex::new(Inner { seen, file }),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().seen.is_empty()
    }
}

impl SaltRegistry for DurableSaltRegistry {
    fn contains(&self, salt: &[u8; 32]) -> bool {
        self.inner.lock().seen.contains(salt)
    }

    fn insert_if_absent(&self, salt: &[u8; 32]) -> bool {
        let mut guard = self.inner.lock();
        if !guard.seen.insert(*salt) {
            return false;
        }
        // The in-memory insert already protects this process; a failed
        // append only weakens protection across a restart, so log and
        // keep serving.
        if let Err(err) = writeln!(guard.file, "{}", hex::encode(salt))
            .and_then(|_| guard.file.flush())
        {
            tracing::error!(error = %err, "failed to persist salt; replay protection degraded across restart");
        }
        true
    }
}
