//! Append-only record of created sessions, one JSON object per line.
//!
//! Sessions are journaled before background advancement starts so that a
//! restart leaves a trail of sessions that may need manual completion.
//! Nothing resumes them automatically.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub session: String,
    pub init_signature: String,
    pub ts_ms: u128,
}

pub async fn append(path: &Path, entry: &JournalEntry) -> Result<(), AppError> {
    let mut line = serde_json::to_vec(entry)
        .map_err(|e| AppError::Internal(format!("serialize journal entry failed: {e}")))?;
    line.push(b'\n');
    let mut f = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| {
            AppError::Internal(format!(
                "open session journal failed (path={}): {e}",
                path.display()
            ))
        })?;
    f.write_all(&line)
        .await
        .map_err(|e| AppError::Internal(format!("write session journal failed: {e}")))?;
    f.flush()
        .await
        .map_err(|e| AppError::Internal(format!("flush session journal failed: {e}")))?;
    Ok(())
}

/// Entries in file order. A missing file is an empty journal; unparseable
/// lines are skipped.
pub async fn load(path: &Path) -> Result<Vec<JournalEntry>, AppError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(AppError::Internal(format!(
                "read session journal failed: {e}"
            )))
        }
    };
    Ok(bytes
        .split(|b| *b == b'\n')
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_slice(l).ok())
        .collect())
}
