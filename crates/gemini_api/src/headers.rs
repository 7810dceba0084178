use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{Endpoint, ErrorKind, GeminiError};
use crate::url::Endpoints;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_ACCEPT_LANGUAGE: &str = "accept-language";
pub const HEADER_COOKIE: &str = "cookie";
pub const HEADER_ORIGIN: &str = "origin";
pub const HEADER_REFERER: &str = "referer";
pub const HEADER_USER_AGENT: &str = "user-agent";
pub const HEADER_SEC_CH_UA: &str = "sec-ch-ua";
pub const HEADER_SEC_CH_UA_MOBILE: &str = "sec-ch-ua-mobile";
pub const HEADER_SEC_CH_UA_PLATFORM: &str = "sec-ch-ua-platform";
pub const HEADER_SEC_FETCH_DEST: &str = "sec-fetch-dest";
pub const HEADER_SEC_FETCH_MODE: &str = "sec-fetch-mode";
pub const HEADER_SEC_FETCH_SITE: &str = "sec-fetch-site";
pub const HEADER_SEC_FETCH_USER: &str = "sec-fetch-user";
pub const HEADER_UPGRADE_INSECURE: &str = "upgrade-insecure-requests";
/// Opaque service flag every first-party XHR carries.
pub const HEADER_SAME_DOMAIN: &str = "x-same-domain";
/// Model selection blob.
pub const HEADER_MODEL: &str = "x-goog-ext-525001261-jspb";
pub const HEADER_PUSH_ID: &str = "push-id";
pub const HEADER_TENANT_ID: &str = "x-tenant-id";

pub const PUSH_ID: &str = "feeds/mcudyrk2a4khkz";
pub const TENANT_ID: &str = "bard-storage";

const DOCUMENT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

/// Header families; they differ only in `Accept` and `Sec-Fetch-*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Top-level navigation, used only to load the landing page.
    Document,
    /// Same-origin script request, used by every RPC.
    Xhr,
}

/// Browser build the client impersonates. All fields must describe one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserIdentity {
    pub user_agent: String,
    pub sec_ch_ua: String,
    pub platform: String,
    pub accept_language: String,
}

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_owned(),
            sec_ch_ua: r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#.to_owned(),
            platform: r#""Windows""#.to_owned(),
            accept_language: "en-US,en;q=0.9".to_owned(),
        }
    }
}

/// Build a deterministic header map for one request.
pub fn build_headers(
    profile: HeaderProfile,
    browser: &BrowserIdentity,
    endpoints: &Endpoints,
    model_header: Option<&str>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    headers.insert(HEADER_USER_AGENT.to_owned(), browser.user_agent.clone());
    headers.insert(HEADER_SEC_CH_UA.to_owned(), browser.sec_ch_ua.clone());
    headers.insert(HEADER_SEC_CH_UA_MOBILE.to_owned(), "?0".to_owned());
    headers.insert(HEADER_SEC_CH_UA_PLATFORM.to_owned(), browser.platform.clone());
    headers.insert(
        HEADER_ACCEPT_LANGUAGE.to_owned(),
        browser.accept_language.clone(),
    );
    headers.insert(HEADER_ORIGIN.to_owned(), endpoints.origin.clone());
    headers.insert(HEADER_REFERER.to_owned(), endpoints.referer());
    headers.insert(HEADER_SAME_DOMAIN.to_owned(), "1".to_owned());

    match profile {
        HeaderProfile::Document => {
            headers.insert(HEADER_ACCEPT.to_owned(), DOCUMENT_ACCEPT.to_owned());
            headers.insert(HEADER_SEC_FETCH_DEST.to_owned(), "document".to_owned());
            headers.insert(HEADER_SEC_FETCH_MODE.to_owned(), "navigate".to_owned());
            headers.insert(HEADER_SEC_FETCH_SITE.to_owned(), "none".to_owned());
            headers.insert(HEADER_SEC_FETCH_USER.to_owned(), "?1".to_owned());
            headers.insert(HEADER_UPGRADE_INSECURE.to_owned(), "1".to_owned());
        }
        HeaderProfile::Xhr => {
            headers.insert(HEADER_ACCEPT.to_owned(), "*/*".to_owned());
            headers.insert(HEADER_SEC_FETCH_DEST.to_owned(), "empty".to_owned());
            headers.insert(HEADER_SEC_FETCH_MODE.to_owned(), "cors".to_owned());
            headers.insert(HEADER_SEC_FETCH_SITE.to_owned(), "same-origin".to_owned());
        }
    }

    if let Some(blob) = model_header.map(str::trim).filter(|blob| !blob.is_empty()) {
        headers.insert(HEADER_MODEL.to_owned(), blob.to_owned());
    }

    headers
}

/// Extra headers the content-push host requires.
pub fn push_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        (HEADER_PUSH_ID.to_owned(), PUSH_ID.to_owned()),
        (HEADER_TENANT_ID.to_owned(), TENANT_ID.to_owned()),
    ])
}

pub fn to_header_map(
    endpoint: Endpoint,
    headers: &BTreeMap<String, String>,
) -> Result<HeaderMap, GeminiError> {
    let mut out = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            GeminiError::new(ErrorKind::Config, endpoint, format!("invalid header key: {key}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            GeminiError::new(
                ErrorKind::Config,
                endpoint,
                format!("invalid header value for {key}"),
            )
        })?;
        out.insert(name, value);
    }
    Ok(out)
}
