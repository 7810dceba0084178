//! Injected capability that supplies fresh cookies on demand.

use std::sync::Arc;

use async_trait::async_trait;
use credential_store::{CookieStore, CredentialStoreError};
use gemini_api::{CookieBundle, Endpoint, ErrorKind, GeminiError};

/// Produces a cookie bundle, e.g. by reading a browser profile.
///
/// `hint` is opaque to the engine: `"auto"` or the name of a browser.
#[async_trait]
pub trait ExternalCookieSource: Send + Sync {
    async fn fetch(&self, hint: &str) -> Result<CookieBundle, GeminiError>;
}

/// Reads whatever bundle another process last wrote to a [`CookieStore`].
pub struct StoreCookieSource {
    store: Arc<dyn CookieStore>,
}

impl StoreCookieSource {
    pub fn new(store: Arc<dyn CookieStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExternalCookieSource for StoreCookieSource {
    async fn fetch(&self, _hint: &str) -> Result<CookieBundle, GeminiError> {
        self.store
            .load()
            .map_err(|error| store_error(Endpoint::CookieSource, &error))?
            .filter(CookieBundle::has_primary)
            .ok_or_else(|| {
                GeminiError::new(
                    ErrorKind::Auth,
                    Endpoint::CookieSource,
                    "cookie store holds no usable bundle",
                )
            })
    }
}

pub(crate) fn store_error(endpoint: Endpoint, error: &CredentialStoreError) -> GeminiError {
    GeminiError::new(ErrorKind::Config, endpoint, error.to_string())
}
