//! Newline-delimited JSON transport on stdio.
//!
//! The process on the other end plays the page. Each input line is one frame:
//!
//! - `{"id":N,"message":{"type":…}}` is a protocol message. Replies come back
//!   as `{"id":N,"reply":{…}}`; posted messages are acknowledged with
//!   `{"id":N,"posted":true}`.
//! - `{"id":N,"fetch":{"url":…,"method":"GET","navigation":false,"accept":…}}`
//!   is answered with `{"id":N,"response":{…}}` or `{"id":N,"passthrough":true}`.
//!
//! Worker broadcasts are written as `{"broadcast":{…}}`, failures as
//! `{"id":N,"error":"CODE: …"}`. Frames are handled concurrently, so output
//! order follows completion, not input.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};

use folio_client::fetch::canonicalize;
use folio_client::{InterceptedRequest, ResponseSource, RouteOutcome};
use folio_core::{WorkerBroadcast, WorkerHandle, WorkerReply, WorkerRequest};

use crate::error::WorkerError;
use crate::worker::Worker;

const OUTPUT_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
struct InFrame {
    id: u64,
    #[serde(default)]
    message: Option<WorkerRequest>,
    #[serde(default)]
    fetch: Option<FetchFrame>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Deserialize)]
struct FetchFrame {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    navigation: bool,
    #[serde(default)]
    accept: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseSummary {
    status: u16,
    source: ResponseSource,
    content_type: Option<String>,
    body_length: usize,
}

#[derive(Debug, Default, Serialize)]
struct OutFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<WorkerReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<ResponseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passthrough: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    posted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    broadcast: Option<WorkerBroadcast>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl OutFrame {
    fn error(id: Option<u64>, error: impl ToString) -> Self {
        Self { id, error: Some(error.to_string()), ..Self::default() }
    }
}

/// Pumps frames between a reader/writer pair and the worker.
pub struct StdioTransport {
    worker: Arc<Worker>,
    handle: WorkerHandle,
    timeout: Duration,
}

impl StdioTransport {
    pub fn new(worker: Arc<Worker>, handle: WorkerHandle) -> Self {
        let timeout = worker.config().message_timeout();
        Self { worker, handle, timeout }
    }

    /// Serve until `reader` reaches end of input.
    ///
    /// `events` should be subscribed before the worker starts so activation
    /// broadcasts are not missed.
    pub async fn run<R, W>(
        self, reader: R, writer: W, events: broadcast::Receiver<WorkerBroadcast>,
    ) -> Result<(), WorkerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel::<OutFrame>(OUTPUT_BUFFER);
        let writer_task = tokio::spawn(write_frames(writer, out_rx));
        let (stop_tx, stop_rx) = oneshot::channel();
        let forward_task = tokio::spawn(forward_broadcasts(events, out_tx.clone(), stop_rx));

        let this = Arc::new(self);
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<InFrame>(line) {
                Ok(frame) => {
                    let this = Arc::clone(&this);
                    let out = out_tx.clone();
                    tokio::spawn(async move {
                        let id = frame.id;
                        let answer = this.handle_frame(frame).await.unwrap_or_else(|e| OutFrame::error(Some(id), e));
                        let _ = out.send(answer).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "invalid frame");
                    let _ = out_tx.send(OutFrame::error(None, WorkerError::InvalidFrame(e.to_string()))).await;
                }
            }
        }

        tracing::info!("input closed; shutting down transport");
        let _ = stop_tx.send(());
        if let Err(e) = forward_task.await {
            tracing::warn!(error = %e, "broadcast forwarder failed");
        }
        drop(out_tx);
        writer_task.await.map_err(|e| WorkerError::Io(std::io::Error::other(e)))?
    }

    async fn handle_frame(&self, frame: InFrame) -> Result<OutFrame, WorkerError> {
        let id = Some(frame.id);
        match (frame.message, frame.fetch) {
            (Some(message), None) if message.expects_reply() => {
                let reply = self.handle.call(message, self.timeout).await?;
                Ok(OutFrame { id, reply: Some(reply), ..OutFrame::default() })
            }
            (Some(message), None) => {
                self.handle.post(message).await?;
                Ok(OutFrame { id, posted: Some(true), ..OutFrame::default() })
            }
            (None, Some(fetch)) => {
                let origin = self.worker.router().rules().origin();
                let url = canonicalize(origin, &fetch.url).map_err(|e| WorkerError::InvalidFrame(e.to_string()))?;
                let mut request = InterceptedRequest::get(url).with_method(&fetch.method);
                request.navigation = fetch.navigation;
                request.accept = fetch.accept;

                Ok(match self.worker.fetch(&request).await {
                    RouteOutcome::Passthrough => OutFrame { id, passthrough: Some(true), ..OutFrame::default() },
                    RouteOutcome::Respond(response) => {
                        let summary = ResponseSummary {
                            status: response.status,
                            content_type: response.content_type().map(str::to_string),
                            body_length: response.body.len(),
                            source: response.source,
                        };
                        OutFrame { id, response: Some(summary), ..OutFrame::default() }
                    }
                })
            }
            _ => Err(WorkerError::InvalidFrame("frame needs exactly one of `message` or `fetch`".into())),
        }
    }
}

/// Forward broadcasts until `stop` fires, then flush whatever is already queued.
async fn forward_broadcasts(
    mut events: broadcast::Receiver<WorkerBroadcast>, out: mpsc::Sender<OutFrame>, mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => {
                    if out.send(OutFrame { broadcast: Some(event), ..OutFrame::default() }).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "transport fell behind on broadcasts");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut stop => {
                while let Ok(event) = events.try_recv() {
                    if out.send(OutFrame { broadcast: Some(event), ..OutFrame::default() }).await.is_err() {
                        return;
                    }
                }
                return;
            }
        }
    }
}

async fn write_frames<W>(mut writer: W, mut frames: mpsc::Receiver<OutFrame>) -> Result<(), WorkerError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let mut line = serde_json::to_vec(&frame).map_err(|e| WorkerError::InvalidFrame(e.to_string()))?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::io::{BufReader, duplex};

    use folio_client::MemoryNetwork;
    use folio_core::broker;
    use folio_core::{AppConfig, CacheDb};

    const ORIGIN: &str = "https://reader.example.com";

    async fn exchange(input: &str) -> Vec<Value> {
        let network = Arc::new(MemoryNetwork::new());
        network.route(&format!("{ORIGIN}/"), 200, "text/html", "<h1>Home</h1>");
        network.route(&format!("{ORIGIN}/offline.html"), 200, "text/html", "<h1>Offline</h1>");
        let config = AppConfig { origin: ORIGIN.into(), precache: vec!["/".into()], ..AppConfig::default() };

        let (handle, inbox) = broker::channel(16);
        let events = handle.subscribe();
        let db = CacheDb::open_in_memory().await.unwrap();
        let worker = Worker::new(config, db, network, inbox.broadcaster()).await.unwrap();
        tokio::spawn(Arc::clone(&worker).serve(inbox));
        worker.start().await.unwrap();

        let (client, server) = duplex(64 * 1024);
        let transport = StdioTransport::new(worker, handle);
        transport.run(BufReader::new(input.as_bytes()), server, events).await.unwrap();

        let mut output = String::new();
        let mut client = BufReader::new(client);
        tokio::io::AsyncReadExt::read_to_string(&mut client, &mut output).await.unwrap();
        output.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    fn by_id(frames: &[Value], id: u64) -> &Value {
        frames.iter().find(|f| f["id"] == id).unwrap()
    }

    #[tokio::test]
    async fn test_message_and_fetch_frames() {
        let input = concat!(
            r#"{"id":1,"message":{"type":"GET_CACHED_BOOKS"}}"#,
            "\n",
            r#"{"id":2,"fetch":{"url":"/offline.html"}}"#,
            "\n",
            r#"{"id":3,"fetch":{"url":"/api/sync","method":"POST"}}"#,
            "\n",
            r#"{"id":4,"message":{"type":"CLEAR_CACHE"}}"#,
            "\n",
        );
        let frames = exchange(input).await;

        assert_eq!(by_id(&frames, 1)["reply"], json!({"type": "CACHED_BOOKS_LIST", "books": []}));
        assert_eq!(by_id(&frames, 2)["response"]["status"], 200);
        assert_eq!(by_id(&frames, 3)["passthrough"], true);
        assert_eq!(by_id(&frames, 4)["posted"], true);
        assert!(frames.iter().any(|f| f["broadcast"]["type"] == "SW_ACTIVATED"));
    }

    #[tokio::test]
    async fn test_bad_frames_are_reported() {
        let input = "not json\n{\"id\":7}\n";
        let frames = exchange(input).await;

        assert!(frames.iter().any(|f| f.get("id").is_none() && f["error"].as_str().unwrap().starts_with("INVALID_FRAME")));
        assert!(by_id(&frames, 7)["error"].as_str().unwrap().starts_with("INVALID_FRAME"));
    }
}
