//! Landing-page bootstrap: scrape the access token and page values.

use std::fmt;
use std::sync::OnceLock;

use gemini_api::client::CancellationSignal;
use gemini_api::payload::QueryContext;
use gemini_api::url::is_consent_redirect;
use gemini_api::{CookieBundle, Endpoint, ErrorKind, GeminiError, GeminiHttpClient, HeaderProfile};
use regex::Regex;

/// Field names carrying the access token, newest first.
const ACCESS_TOKEN_FIELDS: [&str; 2] = ["SNlM0e", "thykhd"];
const BUILD_LABEL_FIELD: &str = "cfb2h";
const SESSION_ID_FIELD: &str = "FdrFJe";
const CONSENT_FORM_MARKER: &str = "action=\"https://consent.google.com";

/// Values scraped from one landing document.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BootstrapTokens {
    pub access_token: String,
    pub build_label: Option<String>,
    pub session_id: Option<String>,
}

impl BootstrapTokens {
    pub fn query_context(&self) -> QueryContext {
        QueryContext {
            build_label: self.build_label.clone(),
            session_id: self.session_id.clone(),
            language: None,
        }
    }
}

impl fmt::Debug for BootstrapTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapTokens")
            .field("access_token", &"<redacted>")
            .field("build_label", &self.build_label)
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Result of a successful bootstrap; `cookies` supersedes the input bundle.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub tokens: BootstrapTokens,
    pub cookies: CookieBundle,
}

fn field_regex(field: &str) -> Regex {
    // Value is a JSON string literal; escapes are decoded afterwards.
    let pattern = format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(field));
    Regex::new(&pattern).expect("field regex must compile")
}

fn cached_regex(slot: &'static OnceLock<Regex>, field: &str) -> &'static Regex {
    slot.get_or_init(|| field_regex(field))
}

fn access_token_regexes() -> [&'static Regex; 2] {
    static PRIMARY: OnceLock<Regex> = OnceLock::new();
    static FALLBACK: OnceLock<Regex> = OnceLock::new();
    [
        cached_regex(&PRIMARY, ACCESS_TOKEN_FIELDS[0]),
        cached_regex(&FALLBACK, ACCESS_TOKEN_FIELDS[1]),
    ]
}

fn build_label_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached_regex(&CACHED, BUILD_LABEL_FIELD)
}

fn session_id_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached_regex(&CACHED, SESSION_ID_FIELD)
}

fn capture_field(regex: &Regex, body: &str) -> Option<String> {
    let raw = regex.captures(body)?.get(1)?.as_str();
    serde_json::from_str::<String>(&format!("\"{raw}\""))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Pull the token fields out of a landing document.
pub fn extract_tokens(body: &str) -> Result<BootstrapTokens, GeminiError> {
    if body.contains(CONSENT_FORM_MARKER) {
        return Err(GeminiError::new(
            ErrorKind::Auth,
            Endpoint::Landing,
            "landing page is a consent interstitial",
        ));
    }
    let access_token = access_token_regexes()
        .into_iter()
        .find_map(|regex| capture_field(regex, body))
        .ok_or_else(|| {
            GeminiError::new(
                ErrorKind::Auth,
                Endpoint::Landing,
                "access token not found on landing page; cookies are likely expired",
            )
            .with_body(body)
        })?;
    Ok(BootstrapTokens {
        access_token,
        build_label: capture_field(build_label_regex(), body),
        session_id: capture_field(session_id_regex(), body),
    })
}

/// GET the landing document with `cookies` and scrape its tokens.
pub async fn fetch_access_token(
    http: &GeminiHttpClient,
    cookies: &CookieBundle,
    cancellation: Option<&CancellationSignal>,
) -> Result<Bootstrap, GeminiError> {
    let headers = http.headers(Endpoint::Landing, HeaderProfile::Document, None, cookies)?;
    let request = http.build_get(&http.endpoints().landing, headers);
    let response = http.execute(Endpoint::Landing, request, cancellation).await?;

    if response.status == 401 || response.redirected_to_accounts() {
        return Err(GeminiError::new(
            ErrorKind::Auth,
            Endpoint::Landing,
            "landing page requires sign-in",
        )
        .with_status(response.status));
    }
    if is_consent_redirect(&response.final_url) {
        return Err(GeminiError::new(
            ErrorKind::Auth,
            Endpoint::Landing,
            "landing page redirected to a consent interstitial",
        )
        .with_status(response.status));
    }
    if !response.is_success() {
        let kind = if response.status >= 500 {
            ErrorKind::Network
        } else {
            ErrorKind::Unknown
        };
        return Err(GeminiError::new(
            kind,
            Endpoint::Landing,
            format!("landing page returned HTTP {}", response.status),
        )
        .with_status(response.status)
        .with_body(&response.body));
    }

    let tokens = extract_tokens(&response.body)?;
    let mut updated = cookies.clone();
    let changed = updated.absorb_set_cookies(response.set_cookies.iter().map(String::as_str));
    tracing::debug!(
        changed_cookies = changed,
        has_build_label = tokens.build_label.is_some(),
        "bootstrap succeeded"
    );
    Ok(Bootstrap {
        tokens,
        cookies: updated,
    })
}
