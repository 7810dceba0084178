use std::collections::BTreeMap;
use std::time::Duration;

use crate::headers::BrowserIdentity;
use crate::url::Endpoints;

/// Transport configuration shared by every request the client sends.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoints: Endpoints,
    /// Browser build presented in headers; must match the TLS profile.
    pub browser: BrowserIdentity,
    /// Use the pinned browser TLS profile (otherwise `reqwest` defaults).
    pub browser_tls: bool,
    pub connect_timeout: Duration,
    /// Additional headers merged into every request.
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            browser: BrowserIdentity::default(),
            browser_tls: true,
            connect_timeout: Duration::from_secs(10),
            extra_headers: BTreeMap::new(),
        }
    }
}

impl TransportConfig {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    pub fn with_browser(mut self, browser: BrowserIdentity) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_browser_tls(mut self, enabled: bool) -> Self {
        self.browser_tls = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}
