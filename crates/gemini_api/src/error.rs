use std::fmt;

/// Upper bound on captured response bodies carried inside errors.
pub const BODY_FRAGMENT_LIMIT: usize = 2048;

/// Closed error taxonomy; the retry policy dispatches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    RateLimit,
    /// Local refresh throttle tripped; no request was sent.
    RateLimitSelf,
    Blocked,
    ModelInvalid,
    Antibot,
    Timeout,
    Network,
    Parse,
    EmptyResponse,
    Upload,
    Cancelled,
    Config,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::RateLimitSelf => "rate_limit_self",
            Self::Blocked => "blocked",
            Self::ModelInvalid => "model_invalid",
            Self::Antibot => "antibot",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Parse => "parse",
            Self::EmptyResponse => "empty_response",
            Self::Upload => "upload",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::Unknown => "unknown",
        }
    }

    /// Short user-facing explanation for front ends.
    pub fn user_hint(&self) -> &'static str {
        match self {
            Self::Auth => "session expired, re-authenticate",
            Self::RateLimit => "usage quota reached for this model, try again later",
            Self::RateLimitSelf => "credential refresh attempted too recently, wait a minute",
            Self::Blocked => "reply withheld by content policy",
            Self::ModelInvalid => "the selected model is not available, pick a different one",
            Self::Antibot => "service-side challenge requires a browser",
            Self::Timeout | Self::Network => "transient network problem, try again",
            Self::Parse => "unexpected response format, capture the body with debug logging",
            Self::EmptyResponse => "the service returned no reply text",
            Self::Upload => "file upload was rejected",
            Self::Cancelled => "request was cancelled",
            Self::Config => "invalid client configuration",
            Self::Unknown => "the service reported an unknown error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which service surface produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Landing,
    Chat,
    Batch,
    Upload,
    Rotate,
    CookieSource,
    CookieStore,
    Local,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landing => "landing",
            Self::Chat => "chat",
            Self::Batch => "batch",
            Self::Upload => "upload",
            Self::Rotate => "rotate",
            Self::CookieSource => "cookie-source",
            Self::CookieStore => "cookie-store",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric codes the service places in the inner error slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownErrorCode {
    UsageLimit,
    ModelInconsistent,
    ModelHeaderInvalid,
    IpBlocked,
    AntibotChallenge,
    Unknown(i64),
}

impl KnownErrorCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            1037 => Self::UsageLimit,
            1050 => Self::ModelInconsistent,
            1052 => Self::ModelHeaderInvalid,
            1060 => Self::IpBlocked,
            2 => Self::AntibotChallenge,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::UsageLimit => 1037,
            Self::ModelInconsistent => 1050,
            Self::ModelHeaderInvalid => 1052,
            Self::IpBlocked => 1060,
            Self::AntibotChallenge => 2,
            Self::Unknown(code) => *code,
        }
    }
}

/// Tagged error value: a kind plus the detail needed to diagnose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiError {
    pub kind: ErrorKind,
    pub endpoint: Endpoint,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<i64>,
    pub body: Option<String>,
}

impl GeminiError {
    pub fn new(kind: ErrorKind, endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint,
            message: message.into(),
            status: None,
            code: None,
            body: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body_fragment(body));
        self
    }

    pub fn cancelled(endpoint: Endpoint) -> Self {
        Self::new(ErrorKind::Cancelled, endpoint, "request was cancelled")
    }

    pub fn timeout(endpoint: Endpoint, after: std::time::Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            endpoint,
            format!("deadline of {}ms expired", after.as_millis()),
        )
    }

    /// Map a transport failure to `Timeout` or `Network`, keeping its text.
    pub fn from_transport(endpoint: Endpoint, error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Network
        };
        let mut out = Self::new(kind, endpoint, error.to_string());
        if let Some(status) = error.status() {
            out.status = Some(status.as_u16());
        }
        out
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for GeminiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.endpoint, self.kind, self.message)?;
        match (self.status, self.code) {
            (Some(status), Some(code)) => write!(f, " (HTTP {status}, code {code})"),
            (Some(status), None) => write!(f, " (HTTP {status})"),
            (None, Some(code)) => write!(f, " (code {code})"),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for GeminiError {}

/// Truncate a body to [`BODY_FRAGMENT_LIMIT`] bytes on a char boundary.
pub fn body_fragment(body: &str) -> String {
    if body.len() <= BODY_FRAGMENT_LIMIT {
        return body.to_owned();
    }
    let mut end = BODY_FRAGMENT_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
