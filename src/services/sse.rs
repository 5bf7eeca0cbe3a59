use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;

use crate::error::{BedlamError, Result};
use crate::interfaces::transport::{HubFrame, HubStream, HubTransport};
use crate::services::dispatcher::join_url;

pub const HUB_PATH: &str = "hub";

/// Longest line the decoder buffers before giving up on the stream.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental `text/event-stream` decoder. Chunks may split lines anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // bytes of `buffer` already known to hold no newline
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<HubFrame>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|byte| *byte == b'\n') {
            let end = self.scanned + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;
            self.scanned = start;
            if let Some(frame) = self.line(line.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            self.buffer.clear();
            self.scanned = 0;
            return Err(BedlamError::Http(format!(
                "event stream line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(frames)
    }

    fn line(&mut self, line: &str) -> Option<HubFrame> {
        if line.is_empty() {
            if self.data.is_empty() {
                self.event = None;
                return None;
            }
            let target = self.event.take().unwrap_or_else(|| "message".to_string());
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(HubFrame::Message { target, data });
        }
        if line.starts_with(':') {
            return Some(HubFrame::KeepAlive);
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

/// Subscribes to the relay's hub as a server-sent-event stream at `{endpoint}/hub`.
pub struct SseHubTransport {
    client: reqwest::Client,
}

impl SseHubTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BedlamError::Runtime(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HubTransport for SseHubTransport {
    async fn connect(&self, endpoint: &str) -> Result<HubStream> {
        let url = join_url(endpoint, HUB_PATH);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| BedlamError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BedlamError::Http(format!(
                "hub handshake rejected with status {status}"
            )));
        }

        let mut body = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| BedlamError::Http(e.to_string()))?;
                for frame in decoder.push(&chunk)? {
                    yield frame;
                }
            }
        };
        Ok(stream.boxed())
    }
}
