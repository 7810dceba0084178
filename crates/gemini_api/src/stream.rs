//! Incremental decoder for the length-prefixed response stream.
//!
//! Wire shape: `)]}'` then repeated `<decimal byte count>\n<payload>`. Each
//! payload is a JSON array of frames. Only the frame currently being read is
//! buffered; decoded state is the latest reply projection.

use std::ops::ControlFlow;

use serde_json::Value;

use crate::error::{body_fragment, Endpoint, ErrorKind, GeminiError, BODY_FRAGMENT_LIMIT};
use crate::output::{is_blocked_reply, project_inner, ModelOutput};
use crate::paths::{self, get_i64, get_str};
use crate::retry::inner_code_error;

pub const ANTI_HIJACK_PREFIX: &[u8] = b")]}'";
const END_SENTINEL: &[u8] = b"\"e\",";
/// Refuse absurd length headers instead of allocating for them.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Prefix,
    Length,
    Payload { remaining: usize },
}

/// Splits the raw byte stream into complete payloads.
#[derive(Debug)]
pub struct LengthPrefixedReader {
    state: ReaderState,
    length: Option<usize>,
    pending: Vec<u8>,
    capture: Vec<u8>,
}

impl Default for LengthPrefixedReader {
    fn default() -> Self {
        Self {
            state: ReaderState::Prefix,
            length: None,
            pending: Vec::new(),
            capture: Vec::new(),
        }
    }
}

impl LengthPrefixedReader {
    /// Feed arbitrary bytes and drain every payload they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, String> {
        if self.capture.len() < BODY_FRAGMENT_LIMIT {
            let room = BODY_FRAGMENT_LIMIT - self.capture.len();
            self.capture
                .extend_from_slice(&bytes[..bytes.len().min(room)]);
        }

        let mut payloads = Vec::new();
        self.advance(bytes, &mut payloads)?;
        Ok(payloads)
    }

    fn advance(&mut self, bytes: &[u8], payloads: &mut Vec<Vec<u8>>) -> Result<(), String> {
        let mut input = bytes;

        while !input.is_empty() {
            match self.state {
                ReaderState::Prefix => {
                    let take = (ANTI_HIJACK_PREFIX.len() - self.pending.len()).min(input.len());
                    self.pending.extend_from_slice(&input[..take]);
                    input = &input[take..];

                    if !ANTI_HIJACK_PREFIX.starts_with(&self.pending) {
                        // No prefix: buffered bytes start the first length header.
                        let mut replay = std::mem::take(&mut self.pending);
                        replay.extend_from_slice(input);
                        self.state = ReaderState::Length;
                        return self.advance(&replay, payloads);
                    } else if self.pending.len() == ANTI_HIJACK_PREFIX.len() {
                        self.pending.clear();
                        self.state = ReaderState::Length;
                    }
                }
                ReaderState::Length => {
                    let used = self.consume_length_bytes(input, payloads)?;
                    input = &input[used..];
                }
                ReaderState::Payload { remaining } => {
                    let take = remaining.min(input.len());
                    self.pending.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    if take == remaining {
                        payloads.push(std::mem::take(&mut self.pending));
                        self.state = ReaderState::Length;
                    } else {
                        self.state = ReaderState::Payload {
                            remaining: remaining - take,
                        };
                    }
                }
            }
        }

        Ok(())
    }

    /// Consume length-header bytes; stops at the first payload byte.
    fn consume_length_bytes(
        &mut self,
        input: &[u8],
        payloads: &mut Vec<Vec<u8>>,
    ) -> Result<usize, String> {
        for (index, byte) in input.iter().enumerate() {
            match byte {
                b'0'..=b'9' => {
                    let digit = usize::from(byte - b'0');
                    let next = self
                        .length
                        .unwrap_or(0)
                        .checked_mul(10)
                        .and_then(|value| value.checked_add(digit))
                        .filter(|value| *value <= MAX_FRAME_BYTES)
                        .ok_or_else(|| "frame length header out of range".to_owned())?;
                    self.length = Some(next);
                }
                b'\n' if self.length.is_some() => {
                    let length = self.length.take().unwrap_or(0);
                    if length == 0 {
                        payloads.push(Vec::new());
                        continue;
                    }
                    self.state = ReaderState::Payload { remaining: length };
                    return Ok(index + 1);
                }
                b'\n' | b'\r' | b' ' | b'\t' => {}
                other => {
                    return Err(format!(
                        "unexpected byte 0x{other:02x} while reading frame length"
                    ));
                }
            }
        }
        Ok(input.len())
    }

    /// True while a payload is partially read.
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, ReaderState::Payload { .. }) || self.length.is_some()
    }

    /// Leading bytes of the body, for diagnostics.
    pub fn captured(&self) -> String {
        body_fragment(&String::from_utf8_lossy(&self.capture))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn parse_error(endpoint: Endpoint, message: impl Into<String>, captured: &str) -> GeminiError {
    GeminiError::new(ErrorKind::Parse, endpoint, message).with_body(captured)
}

fn frame_tag(frame: &Value) -> Option<&str> {
    frame.get(paths::FRAME_TAG).and_then(Value::as_str)
}

fn frame_error_code(frame: &Value) -> Option<i64> {
    get_i64(frame, paths::FRAME_ERROR_CODE_NESTED).or_else(|| get_i64(frame, paths::FRAME_ERROR_CODE))
}

fn frames_of(payload: &Value) -> impl Iterator<Item = &Value> {
    payload
        .as_array()
        .map(|frames| frames.iter())
        .into_iter()
        .flatten()
        .filter(|frame| frame.is_array())
}

/// Accumulates the reply projection for one chat turn.
#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    reader: LengthPrefixedReader,
    latest: Option<ModelOutput>,
    saw_empty_candidates: bool,
    saw_reply_frame: bool,
    inner_error: Option<i64>,
    end_status: Option<i64>,
}

impl ChatStreamDecoder {
    /// Feed body bytes; breaks once the end frame has been read.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<ControlFlow<()>, GeminiError> {
        let payloads = self
            .reader
            .feed(bytes)
            .map_err(|message| parse_error(Endpoint::Chat, message, &self.reader.captured()))?;

        for payload in payloads {
            if payload.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let is_end = contains(&payload, END_SENTINEL);
            let value: Value = serde_json::from_slice(&payload).map_err(|error| {
                parse_error(
                    Endpoint::Chat,
                    format!("frame is not valid JSON: {error}"),
                    &self.reader.captured(),
                )
            })?;
            self.absorb_payload(&value)?;
            if is_end && self.end_status.is_some() {
                return Ok(ControlFlow::Break(()));
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    fn absorb_payload(&mut self, payload: &Value) -> Result<(), GeminiError> {
        for frame in frames_of(payload) {
            match frame_tag(frame) {
                Some(paths::WRB_TAG) => {
                    self.saw_reply_frame = true;
                    if let Some(code) = frame_error_code(frame) {
                        self.inner_error.get_or_insert(code);
                    }
                    let Some(inner) = get_str(frame, &[paths::FRAME_INNER]) else {
                        continue;
                    };
                    let inner: Value = serde_json::from_str(inner).map_err(|error| {
                        parse_error(
                            Endpoint::Chat,
                            format!("inner reply is not valid JSON: {error}"),
                            &self.reader.captured(),
                        )
                    })?;
                    match project_inner(&inner) {
                        Some(output) if output.has_text() => self.latest = Some(output),
                        Some(_) => self.saw_empty_candidates = true,
                        None => {}
                    }
                }
                Some(paths::END_TAG) => {
                    self.end_status = Some(get_i64(frame, &[paths::END_STATUS]).unwrap_or(0));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.end_status.is_some()
    }

    /// Resolve the accumulated state into a reply or a classified error.
    pub fn finish(self) -> Result<ModelOutput, GeminiError> {
        if let Some(code) = self.inner_error {
            return Err(inner_code_error(Endpoint::Chat, code).with_body(&self.reader.captured()));
        }

        if let Some(output) = self.latest {
            if is_blocked_reply(output.text()) {
                return Err(GeminiError::new(
                    ErrorKind::Blocked,
                    Endpoint::Chat,
                    "reply withheld by the service",
                ));
            }
            return Ok(output);
        }

        if self.reader.is_mid_frame() {
            return Err(parse_error(
                Endpoint::Chat,
                "stream ended inside a frame",
                &self.reader.captured(),
            ));
        }

        match self.end_status {
            Some(status) if status != 0 && self.saw_reply_frame && !self.saw_empty_candidates => {
                Err(GeminiError::new(
                    ErrorKind::Unknown,
                    Endpoint::Chat,
                    format!("stream ended with status {status} and no reply"),
                )
                .with_code(status)
                .with_body(&self.reader.captured()))
            }
            _ => Err(GeminiError::new(
                ErrorKind::EmptyResponse,
                Endpoint::Chat,
                "stream ended without reply text",
            )),
        }
    }
}

/// One `wrb.fr` frame of a batch RPC response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcFrame {
    pub rpc_id: String,
    pub payload: Option<Value>,
    pub identifier: Option<String>,
    pub error_code: Option<i64>,
}

/// Decode a complete batch RPC body into its reply frames.
pub fn parse_batch_response(body: &[u8]) -> Result<Vec<RpcFrame>, GeminiError> {
    let mut reader = LengthPrefixedReader::default();
    let payloads = reader
        .feed(body)
        .map_err(|message| parse_error(Endpoint::Batch, message, &reader.captured()))?;

    let mut frames = Vec::new();
    for payload in payloads {
        if payload.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let value: Value = serde_json::from_slice(&payload).map_err(|error| {
            parse_error(
                Endpoint::Batch,
                format!("frame is not valid JSON: {error}"),
                &reader.captured(),
            )
        })?;
        for frame in frames_of(&value) {
            if frame_tag(frame) != Some(paths::WRB_TAG) {
                continue;
            }
            let payload = match get_str(frame, &[paths::FRAME_INNER]) {
                Some(inner) => Some(serde_json::from_str(inner).map_err(|error| {
                    parse_error(
                        Endpoint::Batch,
                        format!("rpc payload is not valid JSON: {error}"),
                        &reader.captured(),
                    )
                })?),
                None => None,
            };
            let identifier = frame
                .as_array()
                .filter(|items| items.len() > paths::FRAME_INNER + 1)
                .and_then(|items| items.last())
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            frames.push(RpcFrame {
                rpc_id: get_str(frame, &[paths::FRAME_RPC_ID])
                    .unwrap_or_default()
                    .to_owned(),
                payload,
                identifier,
                error_code: frame_error_code(frame),
            });
        }
    }
    Ok(frames)
}

/// Encode payloads into the wire form; the inverse of [`LengthPrefixedReader`].
pub fn encode_stream(payloads: &[String]) -> Vec<u8> {
    let mut body = Vec::from(ANTI_HIJACK_PREFIX);
    body.extend_from_slice(b"\n\n");
    for payload in payloads {
        body.extend_from_slice(payload.len().to_string().as_bytes());
        body.push(b'\n');
        body.extend_from_slice(payload.as_bytes());
        body.push(b'\n');
    }
    body
}
