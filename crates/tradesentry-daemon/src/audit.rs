//! Append-only audit log of issued verdicts, one JSON record per line,
//! keyed by request id for later retrieval by a verifier.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

pub const AUDIT_SCHEMA: &str = "tradesentry.v1.verdict_audit";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub schema: String,
    pub request_id: String,
    pub token_address: String,
    pub chain_id: u64,
    pub decision: String,
    pub risk_score: u8,
    pub logic_flags: u16,
    pub ai_flags: u16,
    pub classifier_fallback: bool,
    pub consensus_runs: u32,
    pub message_hash: String,
    pub signer: String,
    pub timestamp: u64,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("verdicts.ndjson"));

        for i in 0..2u8 {
            log.append(&AuditRecord {
                schema: AUDIT_SCHEMA.to_string(),
                request_id: format!("req-{i}"),
                token_address: "0x00000000000000000000000000000000000000a1".to_string(),
                chain_id: 1,
                decision: "EXECUTE".to_string(),
                risk_score: 0,
                logic_flags: 0,
                ai_flags: 0,
                classifier_fallback: false,
                consensus_runs: 1,
                message_hash: "00".repeat(32),
                signer: "11".repeat(32),
                timestamp: 1_700_000_000,
            })
            .unwrap();
        }

        let contents = std::fs::read_to_string(dir.path().join("verdicts.ndjson")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.request_id, "req-0");
        assert_eq!(first.schema, AUDIT_SCHEMA);
    }
}
