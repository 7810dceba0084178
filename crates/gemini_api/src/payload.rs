//! Request envelopes for the chat, batch RPC and upload endpoints.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Endpoint, ErrorKind, GeminiError};
use crate::output::ConversationMetadata;
use crate::paths;

pub const DEFAULT_LANGUAGE: &str = "en";
pub const IMAGE_UPLOAD_LIMIT: u64 = 20 * 1024 * 1024;
pub const FILE_UPLOAD_LIMIT: u64 = 50 * 1024 * 1024;
pub const FALLBACK_MIME: &str = "application/octet-stream";
/// Fourth slot of every batch call.
const RPC_IDENTIFIER: &str = "generic";
const REQUEST_ID_STEP: u64 = 100_000;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(REQUEST_ID_STEP);

/// Monotonic per-process `_reqid`.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(REQUEST_ID_STEP, Ordering::Relaxed)
}

/// A resource already pushed to the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub resource_id: String,
    pub file_name: String,
}

impl FileAttachment {
    pub fn new(resource_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            file_name: file_name.into(),
        }
    }

    fn to_value(&self) -> Value {
        json!([[self.resource_id], self.file_name])
    }
}

/// Everything that varies between chat envelopes.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest<'a> {
    pub prompt: &'a str,
    pub files: &'a [FileAttachment],
    pub metadata: Option<&'a ConversationMetadata>,
    pub persona_id: Option<&'a str>,
    /// Only sent when a token provider exists; the slot stays null otherwise.
    pub antibot_token: Option<&'a str>,
}

impl<'a> ChatRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            ..Self::default()
        }
    }

    /// Positional inner array carried (as a JSON string) in `f.req`.
    pub fn inner(&self) -> Value {
        let files = if self.files.is_empty() {
            Value::Null
        } else {
            Value::Array(self.files.iter().map(FileAttachment::to_value).collect())
        };

        let mut message = json!([self.prompt, 0, null, null, null, null, 0]);
        paths::set(&mut message, &[paths::MESSAGE_FILES], files);

        let mut context = vec![json!(""), json!(""), json!("")];
        context.resize(paths::CONTEXT_LEN - 1, Value::Null);
        context.push(json!(""));

        let mut inner = vec![Value::Null; paths::ENVELOPE_FIXED_LEN];
        inner[paths::ENVELOPE_MESSAGE] = message;
        inner[paths::ENVELOPE_LANGUAGE] = json!([DEFAULT_LANGUAGE]);
        inner[paths::ENVELOPE_CONTEXT] = Value::Array(context);
        inner[paths::ENVELOPE_ANTIBOT_TOKEN] = self.antibot_token.map_or(Value::Null, Value::from);
        inner[paths::ENVELOPE_PAYLOAD_HASH] = Value::Null;
        if let Some(persona) = self.persona_id.filter(|id| !id.is_empty()) {
            inner[paths::ENVELOPE_PERSONA] = Value::from(persona);
        }
        if let Some(metadata) = self.metadata.filter(|metadata| !metadata.is_empty()) {
            inner.push(metadata.to_value());
        }
        Value::Array(inner)
    }

    /// The two form fields of a chat POST.
    pub fn form(&self, access_token: &str) -> Vec<(&'static str, String)> {
        let envelope = json!([null, self.inner().to_string()]);
        vec![
            ("f.req", envelope.to_string()),
            ("at", access_token.to_owned()),
        ]
    }
}

/// Page-derived values echoed back in every query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryContext {
    pub build_label: Option<String>,
    pub session_id: Option<String>,
    pub language: Option<String>,
}

impl QueryContext {
    fn push_known(&self, query: &mut Vec<(&'static str, String)>) {
        if let Some(label) = self.build_label.as_deref().filter(|v| !v.is_empty()) {
            query.push(("bl", label.to_owned()));
        }
        if let Some(sid) = self.session_id.as_deref().filter(|v| !v.is_empty()) {
            query.push(("f.sid", sid.to_owned()));
        }
        query.push((
            "hl",
            self.language
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned()),
        ));
    }
}

pub fn chat_query(context: &QueryContext, request_id: u64) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    context.push_known(&mut query);
    query.push(("_reqid", request_id.to_string()));
    query.push(("rt", "c".to_owned()));
    query
}

/// One call inside a batch RPC request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCall {
    pub rpc_id: String,
    pub args: Value,
}

impl BatchCall {
    pub fn new(rpc_id: impl Into<String>, args: Value) -> Self {
        Self {
            rpc_id: rpc_id.into(),
            args,
        }
    }

    fn to_value(&self) -> Value {
        json!([self.rpc_id, self.args.to_string(), null, RPC_IDENTIFIER])
    }
}

pub fn batch_form(calls: &[BatchCall], access_token: &str) -> Vec<(&'static str, String)> {
    let envelope = json!([calls.iter().map(BatchCall::to_value).collect::<Vec<_>>()]);
    vec![
        ("f.req", envelope.to_string()),
        ("at", access_token.to_owned()),
    ]
}

/// Query for a batch request. The token rides here as well as in the form.
pub fn batch_query(
    context: &QueryContext,
    calls: &[BatchCall],
    access_token: &str,
    request_id: u64,
) -> Vec<(&'static str, String)> {
    let rpc_ids = calls
        .iter()
        .map(|call| call.rpc_id.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let mut query = vec![("rpcids", rpc_ids), ("at", access_token.to_owned())];
    context.push_known(&mut query);
    query.push(("_reqid", request_id.to_string()));
    query.push(("rt", "c".to_owned()));
    query
}

/// Join a base URL and query pairs.
pub fn url_with_query(
    endpoint: Endpoint,
    base: &str,
    query: &[(&'static str, String)],
) -> Result<::url::Url, GeminiError> {
    ::url::Url::parse_with_params(base, query.iter().map(|(k, v)| (*k, v.as_str()))).map_err(
        |error| {
            GeminiError::new(
                ErrorKind::Config,
                endpoint,
                format!("invalid endpoint url {base}: {error}"),
            )
        },
    )
}

/// MIME type by extension, falling back to octet-stream.
pub fn detect_mime(file_name: &str) -> String {
    mime_guess::from_path(Path::new(file_name))
        .first_raw()
        .unwrap_or(FALLBACK_MIME)
        .to_owned()
}

pub fn upload_limit_for(mime: &str) -> u64 {
    if mime.starts_with("image/") {
        IMAGE_UPLOAD_LIMIT
    } else {
        FILE_UPLOAD_LIMIT
    }
}

/// Multipart body with the single `file` part; enforces the size ceiling.
pub fn upload_form(file_name: &str, mime: &str, bytes: Vec<u8>) -> Result<Form, GeminiError> {
    let limit = upload_limit_for(mime);
    let size = bytes.len() as u64;
    if size > limit {
        return Err(GeminiError::new(
            ErrorKind::Upload,
            Endpoint::Upload,
            format!("{file_name} is {size} bytes; the limit for {mime} is {limit} bytes"),
        ));
    }
    let part = Part::bytes(bytes)
        .file_name(file_name.to_owned())
        .mime_str(mime)
        .map_err(|error| {
            GeminiError::new(
                ErrorKind::Upload,
                Endpoint::Upload,
                format!("invalid mime type {mime}: {error}"),
            )
        })?;
    Ok(Form::new().part("file", part))
}
