//! Live deployment status channel (server-sent events)
//!
//! The backend streams `data: {...}` frames carrying a [`StatusEvent`] every
//! couple of seconds and finishes with an `event: end` frame. The channel is a
//! plain [`Stream`]; dropping it closes the underlying HTTP connection.

use std::fmt::Display;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use openapi_client::models::StatusEvent;

use crate::errors::SyncError;
use crate::http::client::{check_status, HttpClient};

/// One decoded frame of the live status channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A status observation
    Status(StatusEvent),
    /// The server signalled that it will send nothing more
    End,
}

/// Typed stream of channel events
pub type StatusStream = BoxStream<'static, Result<ChannelEvent, SyncError>>;

impl HttpClient {
    /// Open the live status channel for a deployment.
    ///
    /// The access token travels in the query string because event-stream
    /// consumers cannot always set headers.
    pub async fn open_status_channel(
        &self,
        token: &str,
        id: Uuid,
    ) -> Result<StatusStream, SyncError> {
        let url = build_channel_url(self.base_url(), id, token)?;
        info!("Opening status channel for deployment {}", id);

        let response = self
            .stream_client()
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status("GET", response).await?;

        Ok(decode_event_stream(response.bytes_stream()).boxed())
    }
}

fn build_channel_url(base_url: &str, id: Uuid, token: &str) -> Result<Url, SyncError> {
    let mut url = Url::parse(&format!("{}/deployments/{}/events", base_url, id))
        .map_err(|e| SyncError::ConfigError(e.to_string()))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Decode a byte stream into channel events. Transport errors are passed
/// through as `ChannelError` items.
pub fn decode_event_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<ChannelEvent, SyncError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    bytes
        .scan(SseDecoder::default(), |decoder, chunk| {
            let items: Vec<Result<ChannelEvent, SyncError>> = match chunk {
                Ok(chunk) => decoder.push(chunk.as_ref()).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(SyncError::ChannelError(e.to_string()))],
            };
            futures::future::ready(Some(stream::iter(items)))
        })
        .flatten()
}

/// Incremental event-stream frame decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk and return every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChannelEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_frame(&frame[..pos]) {
                events.push(event);
            }
        }
        events
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_frame(frame: &[u8]) -> Option<ChannelEvent> {
    let text = String::from_utf8_lossy(frame);
    let mut name: Option<&str> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => name = Some(value),
            "data" => data.push(value),
            _ => {}
        }
    }

    match name {
        Some("end") => Some(ChannelEvent::End),
        None | Some("message") => {
            if data.is_empty() {
                return None;
            }
            let payload = data.join("\n");
            match serde_json::from_str::<StatusEvent>(&payload) {
                Ok(event) => Some(ChannelEvent::Status(event)),
                Err(e) => {
                    warn!("Skipping malformed status event: {}", e);
                    None
                }
            }
        }
        Some(other) => {
            debug!("Ignoring channel event '{}'", other);
            None
        }
    }
}
