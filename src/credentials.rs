//! Session credentials: cookies, access token and model behind one RW lock.
//!
//! Network I/O never runs under the writer lock. Refreshes are serialised by
//! a separate async mutex and rotations by another, so the writer section is
//! only ever the final install.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use credential_store::CookieStore;
use gemini_api::client::with_deadline;
use gemini_api::payload::QueryContext;
use gemini_api::retry::status_error;
use gemini_api::{CookieBundle, Endpoint, ErrorKind, GeminiError, GeminiHttpClient, HeaderProfile};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::bootstrap::{fetch_access_token, Bootstrap, BootstrapTokens};
use crate::model::ModelDescriptor;
use crate::source::ExternalCookieSource;

/// Body the browser posts to the rotation endpoint.
pub const ROTATE_BODY: &str = r#"[000,"-0000000000000000000"]"#;

#[derive(Debug, Clone)]
pub(crate) struct CredentialPolicy {
    pub external_refresh: bool,
    pub source_hint: String,
    pub bootstrap_timeout: Duration,
    pub refresh_timeout: Duration,
    pub refresh_min_gap: Duration,
    pub rotation_min_gap: Duration,
}

struct CredentialState {
    cookies: CookieBundle,
    tokens: BootstrapTokens,
    model: ModelDescriptor,
    stale: bool,
    /// Bumped on every install; lets callers detect a refresh they missed.
    epoch: u64,
    last_rotation: Option<Instant>,
}

/// Read-side copy of the credentials for building one request.
#[derive(Clone)]
pub struct CredentialSnapshot {
    pub cookies: CookieBundle,
    pub access_token: String,
    pub query: QueryContext,
    pub model: ModelDescriptor,
    pub epoch: u64,
    pub stale: bool,
}

impl fmt::Debug for CredentialSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSnapshot")
            .field("cookies", &self.cookies)
            .field("access_token", &"<redacted>")
            .field("model", &self.model)
            .field("epoch", &self.epoch)
            .field("stale", &self.stale)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The rotator cookie changed.
    Rotated,
    /// The endpoint answered but sent no new rotator.
    Unchanged,
    /// Skipped: the last rotation is more recent than the minimum gap.
    Skipped,
}

pub struct CredentialManager {
    http: Arc<GeminiHttpClient>,
    state: RwLock<CredentialState>,
    /// Time of the last external refresh attempt.
    refresh_gate: Mutex<Option<Instant>>,
    rotation_gate: Mutex<()>,
    source: Option<Arc<dyn ExternalCookieSource>>,
    store: Option<Arc<dyn CookieStore>>,
    policy: CredentialPolicy,
}

impl CredentialManager {
    /// Bootstrap `cookies`; falls back to the external source once on AUTH.
    pub(crate) async fn initialize(
        http: Arc<GeminiHttpClient>,
        cookies: CookieBundle,
        model: ModelDescriptor,
        policy: CredentialPolicy,
        source: Option<Arc<dyn ExternalCookieSource>>,
        store: Option<Arc<dyn CookieStore>>,
    ) -> Result<Self, GeminiError> {
        let mut last_refresh = None;
        let boot = if cookies.has_primary() {
            bootstrap_with_deadline(&http, &cookies, policy.bootstrap_timeout).await
        } else {
            Err(GeminiError::new(
                ErrorKind::Auth,
                Endpoint::Local,
                "cookie bundle has no __Secure-1PSID",
            ))
        };

        let boot = match (boot, source.as_ref()) {
            (Ok(boot), _) => boot,
            (Err(error), Some(source)) if error.is(ErrorKind::Auth) && policy.external_refresh => {
                tracing::warn!(error = %error, "initial cookies rejected; asking external source");
                last_refresh = Some(Instant::now());
                let fresh = fetch_from_source(source.as_ref(), &policy).await?;
                persist(store.as_deref(), &fresh);
                bootstrap_with_deadline(&http, &fresh, policy.bootstrap_timeout).await?
            }
            (Err(error), _) => return Err(error),
        };
        persist(store.as_deref(), &boot.cookies);

        Ok(Self {
            http,
            state: RwLock::new(CredentialState {
                cookies: boot.cookies,
                tokens: boot.tokens,
                model,
                stale: false,
                epoch: 1,
                last_rotation: None,
            }),
            refresh_gate: Mutex::new(last_refresh),
            rotation_gate: Mutex::new(()),
            source,
            store,
            policy,
        })
    }

    pub async fn snapshot(&self) -> CredentialSnapshot {
        let state = self.state.read().await;
        CredentialSnapshot {
            cookies: state.cookies.clone(),
            access_token: state.tokens.access_token.clone(),
            query: state.tokens.query_context(),
            model: state.model.clone(),
            epoch: state.epoch,
            stale: state.stale,
        }
    }

    pub async fn cookies(&self) -> CookieBundle {
        self.state.read().await.cookies.clone()
    }

    pub async fn access_token(&self) -> String {
        self.state.read().await.tokens.access_token.clone()
    }

    pub async fn model(&self) -> ModelDescriptor {
        self.state.read().await.model.clone()
    }

    pub async fn set_model(&self, model: ModelDescriptor) {
        tracing::info!(model = %model, "model changed");
        self.state.write().await.model = model;
    }

    pub async fn is_stale(&self) -> bool {
        self.state.read().await.stale
    }

    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    pub(crate) async fn mark_stale(&self) {
        self.state.write().await.stale = true;
        tracing::warn!("cookie bundle marked stale");
    }

    pub fn can_refresh_externally(&self) -> bool {
        self.policy.external_refresh && self.source.is_some()
    }

    /// Fold `Set-Cookie` lines from any response into the bundle.
    pub async fn absorb_cookies(&self, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let updated = {
            let mut state = self.state.write().await;
            let changed = state
                .cookies
                .absorb_set_cookies(lines.iter().map(String::as_str));
            (changed > 0).then(|| state.cookies.clone())
        };
        if let Some(cookies) = updated {
            persist(self.store.as_deref(), &cookies);
        }
    }

    /// Recover from an AUTH failure seen with credentials from `observed_epoch`.
    ///
    /// Returns immediately when another caller already installed newer
    /// credentials.
    pub async fn refresh_after_auth(&self, observed_epoch: u64) -> Result<(), GeminiError> {
        let mut last_attempt = self.refresh_gate.lock().await;
        if self.epoch().await != observed_epoch {
            tracing::debug!("credentials refreshed concurrently; reusing them");
            return Ok(());
        }
        if self.can_refresh_externally() {
            self.check_refresh_gap(&mut last_attempt)?;
            self.refresh_from_source_locked().await
        } else {
            self.refresh_token_locked().await
        }
    }

    /// Replace the cookies from the external source and bootstrap again.
    ///
    /// Fails with `RateLimitSelf` instead of queueing behind a refresh that
    /// is already running.
    pub async fn refresh_from_external_source(&self) -> Result<(), GeminiError> {
        let Ok(mut last_attempt) = self.refresh_gate.try_lock() else {
            return Err(refresh_throttled("a credential refresh is already in progress"));
        };
        self.check_refresh_gap(&mut last_attempt)?;
        self.refresh_from_source_locked().await
    }

    /// Re-run bootstrap with the current cookies.
    pub async fn refresh_access_token(&self) -> Result<(), GeminiError> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_token_locked().await
    }

    fn check_refresh_gap(&self, last_attempt: &mut Option<Instant>) -> Result<(), GeminiError> {
        if let Some(at) = *last_attempt {
            let elapsed = at.elapsed();
            if elapsed < self.policy.refresh_min_gap {
                let wait = self.policy.refresh_min_gap - elapsed;
                return Err(refresh_throttled(format!(
                    "external refresh attempted too recently; retry in {}s",
                    wait.as_secs() + 1
                )));
            }
        }
        *last_attempt = Some(Instant::now());
        Ok(())
    }

    async fn refresh_from_source_locked(&self) -> Result<(), GeminiError> {
        let source = self.source.as_ref().ok_or_else(|| {
            GeminiError::new(
                ErrorKind::Config,
                Endpoint::CookieSource,
                "no external cookie source configured",
            )
        })?;
        let fresh = fetch_from_source(source.as_ref(), &self.policy).await?;
        persist(self.store.as_deref(), &fresh);
        let boot = bootstrap_with_deadline(&self.http, &fresh, self.policy.bootstrap_timeout).await?;
        self.install(boot).await;
        tracing::info!("credentials refreshed from external source");
        Ok(())
    }

    async fn refresh_token_locked(&self) -> Result<(), GeminiError> {
        let cookies = self.cookies().await;
        let boot = bootstrap_with_deadline(&self.http, &cookies, self.policy.bootstrap_timeout).await?;
        self.install(boot).await;
        tracing::info!("access token refreshed");
        Ok(())
    }

    async fn install(&self, boot: Bootstrap) {
        let cookies = {
            let mut state = self.state.write().await;
            state.cookies = boot.cookies;
            state.tokens = boot.tokens;
            state.stale = false;
            state.epoch += 1;
            state.cookies.clone()
        };
        persist(self.store.as_deref(), &cookies);
    }

    /// One rotation request, honouring the minimum gap between rotations.
    pub async fn rotate(&self) -> Result<RotationOutcome, GeminiError> {
        let _gate = self.rotation_gate.lock().await;
        let cookies = {
            let state = self.state.read().await;
            if state
                .last_rotation
                .is_some_and(|at| at.elapsed() < self.policy.rotation_min_gap)
            {
                return Ok(RotationOutcome::Skipped);
            }
            state.cookies.clone()
        };

        let headers = self
            .http
            .headers(Endpoint::Rotate, HeaderProfile::Xhr, None, &cookies)?;
        let request = self
            .http
            .build_json_post(&self.http.endpoints().rotate, headers, ROTATE_BODY);
        let response = self.http.execute(Endpoint::Rotate, request, None).await?;

        if response.status == 401 || response.redirected_to_accounts() {
            self.mark_stale().await;
            return Err(GeminiError::new(
                ErrorKind::Auth,
                Endpoint::Rotate,
                "rotation rejected; cookies are stale",
            )
            .with_status(response.status));
        }
        if !response.is_success() {
            return Err(status_error(Endpoint::Rotate, response.status, &response.body));
        }

        let (rotated, cookies) = {
            let mut state = self.state.write().await;
            let before = state.cookies.rotator.clone();
            state
                .cookies
                .absorb_set_cookies(response.set_cookies.iter().map(String::as_str));
            state.last_rotation = Some(Instant::now());
            (state.cookies.rotator != before, state.cookies.clone())
        };
        if rotated {
            persist(self.store.as_deref(), &cookies);
            tracing::info!("rotator cookie refreshed");
            Ok(RotationOutcome::Rotated)
        } else {
            tracing::debug!("rotation returned no new rotator cookie");
            Ok(RotationOutcome::Unchanged)
        }
    }
}

async fn bootstrap_with_deadline(
    http: &GeminiHttpClient,
    cookies: &CookieBundle,
    deadline: Duration,
) -> Result<Bootstrap, GeminiError> {
    with_deadline(Endpoint::Landing, deadline, fetch_access_token(http, cookies, None)).await
}

async fn fetch_from_source(
    source: &dyn ExternalCookieSource,
    policy: &CredentialPolicy,
) -> Result<CookieBundle, GeminiError> {
    let bundle = with_deadline(
        Endpoint::CookieSource,
        policy.refresh_timeout,
        source.fetch(&policy.source_hint),
    )
    .await?;
    if !bundle.has_primary() {
        return Err(GeminiError::new(
            ErrorKind::Auth,
            Endpoint::CookieSource,
            "external source returned no __Secure-1PSID",
        ));
    }
    Ok(bundle)
}

fn persist(store: Option<&dyn CookieStore>, cookies: &CookieBundle) {
    let Some(store) = store else {
        return;
    };
    if let Err(error) = store.save(cookies) {
        tracing::warn!(error = %error, "failed to persist cookie bundle");
    }
}

fn refresh_throttled(message: impl Into<String>) -> GeminiError {
    GeminiError::new(ErrorKind::RateLimitSelf, Endpoint::CookieSource, message)
}
