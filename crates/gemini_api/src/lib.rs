//! Transport-only primitives for the Gemini web endpoints.
//!
//! This crate owns the browser-imitating HTTP client, request envelopes, the
//! length-prefixed stream decoder and the closed error taxonomy. It holds no
//! session state: credentials, rotation and chat flow live in `gemini_web`.

pub mod client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod headers;
pub mod output;
pub mod paths;
pub mod payload;
pub mod retry;
pub mod stream;
pub mod tls;
pub mod url;

pub use client::{CancellationSignal, GeminiHttpClient, RawResponse, StreamingResponse};
pub use config::TransportConfig;
pub use cookies::CookieBundle;
pub use error::{Endpoint, ErrorKind, GeminiError};
pub use headers::{BrowserIdentity, HeaderProfile};
pub use output::{Candidate, ConversationMetadata, GeneratedImage, ModelOutput, WebImage};
pub use payload::{BatchCall, ChatRequest, FileAttachment, QueryContext};
pub use stream::{ChatStreamDecoder, RpcFrame};
pub use url::Endpoints;
