//! Newline-delimited JSON scan streams.
//!
//! Wire contract: zero or more `progress` messages followed by exactly
//! one terminal `result` or `error`, each on its own line, each flushed
//! as its own chunk. A cancelled scan closes the stream without a
//! terminal message. Client disconnects cancel the scan.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::progress::{ProgressSink, ScanCancelled};
use crate::storage::Storage;

/// Optional scan-history persistence for a streaming endpoint.
pub struct ScanPersist {
    pub storage: Arc<Storage>,
    pub kind: &'static str,
    pub params_json: String,
}

pub fn progress_line(message: &str) -> String {
    let mut line = serde_json::json!({"type": "progress", "message": message}).to_string();
    line.push('\n');
    line
}

pub fn result_line<T: Serialize>(rows: &[T]) -> String {
    let mut line =
        serde_json::json!({"type": "result", "data": rows, "count": rows.len()}).to_string();
    line.push('\n');
    line
}

pub fn error_line(message: &str) -> String {
    let mut line = serde_json::json!({"type": "error", "message": message}).to_string();
    line.push('\n');
    line
}

/// Run a scan in its own task and stream its protocol messages.
///
/// The scan closure receives a progress sink and a cancellation token;
/// the token fires when the client goes away, and the closure is expected
/// to pass it down to every fetch and analyzer it spawns.
pub fn ndjson_response<T, Fut, F>(run: F, persist: Option<ScanPersist>) -> Response
where
    T: Serialize + Send + 'static,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    F: FnOnce(ProgressSink, CancellationToken) -> Fut + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel::<String>(64);
    let (progress_tx, mut progress_rx) = mpsc::channel::<String>(64);
    let cancel = CancellationToken::new();
    let scan_id = Uuid::new_v4();

    let scan_cancel = cancel.clone();
    let task = async move {
        let scan = run(ProgressSink::new(progress_tx), scan_cancel.clone());
        tokio::pin!(scan);

        // Relay progress while the scan runs. Once the scan's sink is
        // dropped the progress channel closes and only the scan remains.
        let mut progress_open = true;
        let outcome = loop {
            tokio::select! {
                biased;
                maybe = progress_rx.recv(), if progress_open => {
                    match maybe {
                        Some(message) => {
                            if out_tx.send(progress_line(&message)).await.is_err() {
                                // Listener hung up; tear the scan down.
                                scan_cancel.cancel();
                            }
                        }
                        None => progress_open = false,
                    }
                }
                result = &mut scan => break result,
            }
        };

        // Progress always precedes the terminal message.
        while let Ok(message) = progress_rx.try_recv() {
            let _ = out_tx.send(progress_line(&message)).await;
        }

        match outcome {
            Ok(rows) => {
                if let Some(persist) = &persist {
                    record_scan(persist, &rows);
                }
                let _ = out_tx.send(result_line(&rows)).await;
            }
            Err(e) if e.downcast_ref::<ScanCancelled>().is_some() => {
                // Silent close: neither result nor error.
            }
            Err(e) => {
                let _ = out_tx.send(error_line(&format!("{:#}", e))).await;
            }
        }
    };
    tokio::spawn(task.instrument(tracing::info_span!("scan", id = %scan_id)));

    let stream = ReceiverStream::new(out_rx).map(Ok::<String, Infallible>);
    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
    {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn record_scan<T: Serialize>(persist: &ScanPersist, rows: &[T]) {
    let result = (|| -> anyhow::Result<()> {
        let scan_id = persist.storage.begin_scan(persist.kind, &persist.params_json)?;
        let serialized: Vec<String> = rows
            .iter()
            .filter_map(|r| serde_json::to_string(r).ok())
            .collect();
        persist.storage.store_scan_rows(scan_id, persist.kind, &serialized)?;
        persist.storage.finish_scan(scan_id, rows.len())?;
        Ok(())
    })();
    if let Err(e) = result {
        warn!(kind = persist.kind, error = %e, "failed to record scan history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_message_framing() {
        let p = progress_line("Scanning 3 regions");
        assert_eq!(
            p,
            "{\"message\":\"Scanning 3 regions\",\"type\":\"progress\"}\n"
        );

        let r = result_line(&[1, 2, 3]);
        let parsed: serde_json::Value = serde_json::from_str(r.trim_end()).unwrap();
        assert_eq!(parsed["type"], "result");
        assert_eq!(parsed["count"], 3);
        assert_eq!(parsed["data"].as_array().unwrap().len(), 3);

        let e = error_line("boom");
        assert!(e.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(e.trim_end()).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["message"], "boom");
    }

    #[tokio::test]
    async fn test_stream_emits_progress_then_single_terminal() {
        let response = ndjson_response(
            |progress, _cancel| async move {
                progress.send("step one").await;
                progress.send("step two").await;
                Ok(vec![42u32])
            },
            None,
        );
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let kinds: Vec<String> = lines
            .iter()
            .map(|l| {
                serde_json::from_str::<serde_json::Value>(l).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["progress", "progress", "result"]);
    }

    #[tokio::test]
    async fn test_stream_error_is_terminal() {
        let response = ndjson_response(
            |progress, _cancel| async move {
                progress.send("about to fail").await;
                Err::<Vec<u32>, _>(anyhow!("upstream exploded"))
            },
            None,
        );
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["type"], "error");
    }

    #[tokio::test]
    async fn test_cancelled_scan_closes_silently() {
        let response = ndjson_response(
            |progress, _cancel| async move {
                progress.send("working").await;
                Err::<Vec<u32>, _>(anyhow!(ScanCancelled))
            },
            None,
        );
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // Progress only; no terminal message of either kind.
        assert_eq!(lines.len(), 1);
        let only: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(only["type"], "progress");
    }
}
