/// Default origin for the chat web app.
pub const DEFAULT_ORIGIN: &str = "https://gemini.google.com";
/// Landing document carrying the access token.
pub const LANDING_URL: &str = "https://gemini.google.com/app";
pub const CHAT_PATH: &str =
    "/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate";
pub const BATCH_PATH: &str = "/_/BardChatUi/data/batchexecute";
pub const UPLOAD_URL: &str = "https://content-push.googleapis.com/upload";
pub const ROTATE_URL: &str = "https://accounts.google.com/RotateCookies";

/// Host fragments that mean "the browser would be sent to sign in".
pub const ACCOUNTS_HOST_MARKERS: [&str; 2] = ["accounts.google.com", "ServiceLogin"];
/// Path fragments that are a sign-in page on any host.
pub const SIGN_IN_PATH_MARKERS: [&str; 3] = ["ServiceLogin", "/signin", "/InteractiveLogin"];
/// Host fragments that mean "the browser would see a consent interstitial".
pub const CONSENT_HOST_MARKERS: [&str; 1] = ["consent.google.com"];

/// Every URL the engine talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Value sent as `Origin`; `Referer` is derived from `landing`.
    pub origin: String,
    pub landing: String,
    pub chat: String,
    pub batch: String,
    pub upload: String,
    pub rotate: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_owned(),
            landing: LANDING_URL.to_owned(),
            chat: format!("{DEFAULT_ORIGIN}{CHAT_PATH}"),
            batch: format!("{DEFAULT_ORIGIN}{BATCH_PATH}"),
            upload: UPLOAD_URL.to_owned(),
            rotate: ROTATE_URL.to_owned(),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at one origin, keeping the service paths.
    ///
    /// Used to aim the engine at a local test server.
    pub fn with_origin(origin: &str) -> Self {
        let origin = normalize_origin(origin);
        Self {
            landing: format!("{origin}/app"),
            chat: format!("{origin}{CHAT_PATH}"),
            batch: format!("{origin}{BATCH_PATH}"),
            upload: format!("{origin}/upload"),
            rotate: format!("{origin}/RotateCookies"),
            origin,
        }
    }

    pub fn referer(&self) -> String {
        format!("{}/", self.origin)
    }
}

/// Trim whitespace and trailing slashes, falling back to the default origin.
pub fn normalize_origin(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_ORIGIN.to_owned()
    } else {
        trimmed.to_owned()
    }
}

pub fn is_accounts_redirect(url: &str) -> bool {
    ACCOUNTS_HOST_MARKERS.iter().any(|marker| url.contains(marker))
}

/// True when a request for `requested` ended on a sign-in page.
///
/// Requests that target the accounts host themselves (cookie rotation) only
/// count when they were moved to another location.
pub fn is_sign_in_redirect(requested: &str, final_url: &str) -> bool {
    if SIGN_IN_PATH_MARKERS
        .iter()
        .any(|marker| final_url.contains(marker))
    {
        return true;
    }
    !same_location(requested, final_url) && is_accounts_redirect(final_url)
}

fn same_location(left: &str, right: &str) -> bool {
    fn location(value: &str) -> &str {
        let end = value.find(['?', '#']).unwrap_or(value.len());
        value[..end].trim_end_matches('/')
    }
    location(left) == location(right)
}

pub fn is_consent_redirect(url: &str) -> bool {
    CONSENT_HOST_MARKERS.iter().any(|marker| url.contains(marker))
}
