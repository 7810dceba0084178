//! Headless session engine for the Gemini web app.
//!
//! Invariant: network I/O never runs while the credential writer lock is held.
//!
//! # Public API Overview
//! - Connect an [`Engine`] with [`Engine::builder`] from a [`CookieBundle`], a
//!   [`CookieStore`] or an [`ExternalCookieSource`].
//! - Hold a conversation through [`ChatSession`]; one-shot turns go through
//!   [`Engine::generate`].
//! - Upload files with [`Engine::upload`] and attach the returned
//!   [`UploadedResource`] to a turn.
//! - Manage personas with [`Engine::list_personas`] and friends.
//!
//! Every failure is a [`GeminiError`] whose [`ErrorKind`] drives recovery.

pub mod bootstrap;
pub mod chat;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod logging;
pub mod model;
pub mod persona;
mod rotation;
pub mod source;
pub mod upload;

/// Engine facade and builder.
pub use crate::engine::{Engine, EngineBuilder};

/// Conversation state machine.
pub use crate::chat::{ChatSession, SessionState};

/// Configuration and environment overrides.
pub use crate::config::{ConfigError, EngineConfig, EnvConfig, Timeouts};

/// Credential views.
pub use crate::credentials::{CredentialSnapshot, RotationOutcome};

pub use crate::bootstrap::BootstrapTokens;
pub use crate::logging::init_tracing;
pub use crate::model::ModelDescriptor;
pub use crate::persona::{Persona, PersonaDraft, PersonaJar};
pub use crate::source::{ExternalCookieSource, StoreCookieSource};
pub use crate::upload::UploadedResource;

/// Wire-level types callers handle directly.
pub use gemini_api::{
    CancellationSignal, Candidate, ConversationMetadata, CookieBundle, Endpoint, Endpoints,
    ErrorKind, GeminiError, GeneratedImage, ModelOutput, TransportConfig, WebImage,
};

/// Cookie persistence.
pub use credential_store::{CookieStore, FileCookieStore, MemoryCookieStore};
