use crate::types::{ProgressTx, RelayProgressEvent};

pub fn now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

pub async fn progress(tx: &Option<ProgressTx>, stage: &'static str, message: impl Into<String>) {
    if let Some(tx) = tx {
        let _ = tx
            .send(RelayProgressEvent {
                kind: "progress",
                stage,
                message: message.into(),
                ts_ms: now_ms(),
                data: None,
            })
            .await;
    }
}

pub async fn progress_with(
    tx: &Option<ProgressTx>,
    stage: &'static str,
    message: impl Into<String>,
    data: serde_json::Value,
) {
    if let Some(tx) = tx {
        let _ = tx
            .send(RelayProgressEvent {
                kind: "progress",
                stage,
                message: message.into(),
                ts_ms: now_ms(),
                data: Some(data),
            })
            .await;
    }
}
