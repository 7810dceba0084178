//! Engine facade: one authenticated browser session shared by many callers.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use credential_store::CookieStore;
use gemini_api::client::{with_deadline, CancellationSignal};
use gemini_api::payload::{batch_form, batch_query, chat_query, next_request_id, url_with_query};
use gemini_api::retry::{decide, inner_code_error, status_error, RetryDecision};
use gemini_api::stream::{parse_batch_response, RpcFrame};
use gemini_api::{
    BatchCall, ChatRequest, ChatStreamDecoder, CookieBundle, ConversationMetadata, Endpoint,
    ErrorKind, GeminiError, GeminiHttpClient, HeaderProfile, ModelOutput,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatSession;
use crate::config::EngineConfig;
use crate::credentials::{CredentialManager, CredentialPolicy, CredentialSnapshot, RotationOutcome};
use crate::model::ModelDescriptor;
use crate::persona::{self, Persona, PersonaDraft, PersonaJar};
use crate::rotation::RotationHandle;
use crate::source::{store_error, ExternalCookieSource};
use crate::upload::{file_name_of, push_file, read_file, UploadedResource};

/// Collects cookies and collaborators before the first network call.
pub struct EngineBuilder {
    config: EngineConfig,
    cookies: Option<CookieBundle>,
    source: Option<Arc<dyn ExternalCookieSource>>,
    store: Option<Arc<dyn CookieStore>>,
}

impl EngineBuilder {
    pub fn cookies(mut self, cookies: CookieBundle) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn cookie_source(mut self, source: Arc<dyn ExternalCookieSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bootstrap the session and start the rotation task when enabled.
    ///
    /// Cookies come from [`cookies`](Self::cookies), else the store, else the
    /// external source.
    pub async fn connect(self) -> Result<Arc<Engine>, GeminiError> {
        let config = self.config;
        config.validate().map_err(|error| {
            GeminiError::new(ErrorKind::Config, Endpoint::Local, error.to_string())
        })?;

        let cookies = match self.cookies {
            Some(cookies) => cookies,
            None => initial_cookies(&config, self.store.as_deref(), self.source.as_deref()).await?,
        };

        let http = Arc::new(GeminiHttpClient::new(config.transport.clone())?);
        let policy = CredentialPolicy {
            external_refresh: config.external_refresh,
            source_hint: config.external_source_hint.clone(),
            bootstrap_timeout: config.timeouts.bootstrap,
            refresh_timeout: config.timeouts.refresh,
            refresh_min_gap: config.refresh_min_gap,
            rotation_min_gap: config.rotation_min_gap,
        };
        let credentials = Arc::new(
            CredentialManager::initialize(
                Arc::clone(&http),
                cookies,
                config.model.clone(),
                policy,
                self.source,
                self.store,
            )
            .await?,
        );

        let shutdown = CancellationToken::new();
        let rotation = config.auto_refresh_rotation.then(|| {
            RotationHandle::spawn(
                Arc::clone(&credentials),
                config.rotation_interval,
                shutdown.child_token(),
            )
        });

        tracing::info!(model = %config.model, rotation = rotation.is_some(), "engine ready");
        Ok(Arc::new(Engine {
            config,
            http,
            credentials,
            rotation: Mutex::new(rotation),
            shutdown,
            closed: AtomicBool::new(false),
        }))
    }
}

async fn initial_cookies(
    config: &EngineConfig,
    store: Option<&dyn CookieStore>,
    source: Option<&dyn ExternalCookieSource>,
) -> Result<CookieBundle, GeminiError> {
    if let Some(store) = store {
        let saved = store
            .load()
            .map_err(|error| store_error(Endpoint::CookieStore, &error))?;
        if let Some(cookies) = saved.filter(CookieBundle::has_primary) {
            tracing::debug!("using cookies from store");
            return Ok(cookies);
        }
    }
    if let Some(source) = source {
        tracing::debug!(hint = %config.external_source_hint, "fetching cookies from external source");
        return with_deadline(
            Endpoint::CookieSource,
            config.timeouts.refresh,
            source.fetch(&config.external_source_hint),
        )
        .await;
    }
    Err(GeminiError::new(
        ErrorKind::Config,
        Endpoint::Local,
        "no cookies supplied and no store or external source configured",
    ))
}

/// Shared session engine. Cheap to share through `Arc`; every method takes `&self`.
pub struct Engine {
    config: EngineConfig,
    http: Arc<GeminiHttpClient>,
    credentials: Arc<CredentialManager>,
    rotation: Mutex<Option<RotationHandle>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            cookies: None,
            source: None,
            store: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop rotation and refuse further calls. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        if let Some(mut rotation) = self.rotation.lock().await.take() {
            rotation.shutdown().await;
        }
        tracing::info!("engine closed");
    }

    fn ensure_open(&self, endpoint: Endpoint) -> Result<(), GeminiError> {
        if self.is_closed() {
            return Err(GeminiError::new(
                ErrorKind::Config,
                endpoint,
                "engine is closed",
            ));
        }
        Ok(())
    }

    pub async fn model(&self) -> ModelDescriptor {
        self.credentials.model().await
    }

    pub async fn set_model(&self, model: ModelDescriptor) {
        self.credentials.set_model(model).await;
    }

    pub async fn cookies(&self) -> CookieBundle {
        self.credentials.cookies().await
    }

    pub async fn access_token(&self) -> String {
        self.credentials.access_token().await
    }

    pub async fn is_stale(&self) -> bool {
        self.credentials.is_stale().await
    }

    pub async fn refresh_from_external_source(&self) -> Result<(), GeminiError> {
        self.ensure_open(Endpoint::CookieSource)?;
        self.credentials.refresh_from_external_source().await
    }

    pub async fn refresh_access_token(&self) -> Result<(), GeminiError> {
        self.ensure_open(Endpoint::Landing)?;
        self.credentials.refresh_access_token().await
    }

    /// Run one rotation now instead of waiting for the next tick.
    pub async fn rotate_now(&self) -> Result<RotationOutcome, GeminiError> {
        self.ensure_open(Endpoint::Rotate)?;
        self.credentials.rotate().await
    }

    pub fn start_chat(self: &Arc<Self>) -> ChatSession {
        ChatSession::new(Arc::clone(self))
    }

    /// Continue a conversation whose ids were stored elsewhere.
    pub fn resume_chat(self: &Arc<Self>, metadata: ConversationMetadata) -> ChatSession {
        ChatSession::resume(Arc::clone(self), metadata)
    }

    /// Single-turn generation with no conversation context.
    pub async fn generate(&self, prompt: &str) -> Result<ModelOutput, GeminiError> {
        self.generate_content(&ChatRequest::new(prompt), None).await
    }

    /// One chat turn; AUTH failures refresh credentials and retry once.
    pub async fn generate_content(
        &self,
        request: &ChatRequest<'_>,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<ModelOutput, GeminiError> {
        let deadline = self.config.timeouts.chat;
        self.with_auth_retry(Endpoint::Chat, move |snapshot| {
            with_deadline(
                Endpoint::Chat,
                deadline,
                self.chat_once(snapshot, request, cancellation),
            )
        })
        .await
    }

    async fn chat_once(
        &self,
        snapshot: CredentialSnapshot,
        request: &ChatRequest<'_>,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<ModelOutput, GeminiError> {
        let headers = self.http.headers(
            Endpoint::Chat,
            HeaderProfile::Xhr,
            snapshot.model.header(),
            &snapshot.cookies,
        )?;
        let url = url_with_query(
            Endpoint::Chat,
            &self.http.endpoints().chat,
            &chat_query(&snapshot.query, next_request_id()),
        )?;
        let form = request.form(&snapshot.access_token);
        tracing::debug!(
            model = %snapshot.model,
            files = request.files.len(),
            threaded = request.metadata.is_some_and(|metadata| !metadata.is_empty()),
            "sending chat turn"
        );

        let response = self
            .http
            .execute_streaming(
                Endpoint::Chat,
                self.http.build_form_post(url, headers, &form),
                cancellation,
            )
            .await?;
        self.credentials.absorb_cookies(&response.set_cookies).await;

        if response.redirected_to_accounts() {
            return Err(GeminiError::new(
                ErrorKind::Auth,
                Endpoint::Chat,
                "chat request redirected to sign-in",
            )
            .with_status(response.status));
        }
        if !response.is_success() {
            let status = response.status;
            let body = response.text(cancellation).await?;
            return Err(status_error(Endpoint::Chat, status, &body));
        }

        let mut decoder = ChatStreamDecoder::default();
        response
            .drain(cancellation, |chunk| decoder.feed(chunk))
            .await?;
        let output = decoder.finish()?;
        if !output.metadata.is_complete() {
            return Err(GeminiError::new(
                ErrorKind::Parse,
                Endpoint::Chat,
                "reply is missing conversation identifiers",
            ));
        }
        Ok(output)
    }

    pub async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedResource, GeminiError> {
        self.upload_cancellable(file_name, bytes, None).await
    }

    pub async fn upload_cancellable(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<UploadedResource, GeminiError> {
        self.ensure_open(Endpoint::Upload)?;
        let cookies = self.credentials.cookies().await;
        let pushed = with_deadline(
            Endpoint::Upload,
            self.config.timeouts.upload,
            push_file(&self.http, &cookies, file_name, bytes, cancellation),
        )
        .await?;
        self.credentials.absorb_cookies(&pushed.set_cookies).await;
        Ok(pushed.resource)
    }

    pub async fn upload_path(&self, path: impl AsRef<Path>) -> Result<UploadedResource, GeminiError> {
        let path = path.as_ref();
        let file_name = file_name_of(path)?;
        let bytes = read_file(path).await?;
        self.upload(&file_name, bytes).await
    }

    /// All personas; `include_hidden` also lists system personas the web UI hides.
    pub async fn list_personas(&self, include_hidden: bool) -> Result<PersonaJar, GeminiError> {
        let frames = self.batch(&persona::list_calls(include_hidden)).await?;
        Ok(persona::parse_list(&frames))
    }

    pub async fn create_persona(&self, draft: &PersonaDraft) -> Result<Persona, GeminiError> {
        let frames = self.batch(&[persona::create_call(draft)]).await?;
        let created = persona::parse_created(&frames, draft)?;
        tracing::info!(persona = %created.id, "persona created");
        Ok(created)
    }

    pub async fn update_persona(
        &self,
        id: &str,
        draft: &PersonaDraft,
    ) -> Result<Persona, GeminiError> {
        self.batch(&[persona::update_call(id, draft)]).await?;
        Ok(persona::draft_to_persona(id, draft))
    }

    pub async fn delete_persona(&self, id: &str) -> Result<(), GeminiError> {
        self.batch(&[persona::delete_call(id)]).await?;
        tracing::info!(persona = %id, "persona deleted");
        Ok(())
    }

    /// Issue batch RPC calls with the same refresh-and-retry-once rule as chat.
    pub async fn batch(&self, calls: &[BatchCall]) -> Result<Vec<RpcFrame>, GeminiError> {
        let deadline = self.config.timeouts.chat;
        self.with_auth_retry(Endpoint::Batch, move |snapshot| {
            with_deadline(Endpoint::Batch, deadline, self.batch_once(snapshot, calls))
        })
        .await
    }

    async fn batch_once(
        &self,
        snapshot: CredentialSnapshot,
        calls: &[BatchCall],
    ) -> Result<Vec<RpcFrame>, GeminiError> {
        let headers = self
            .http
            .headers(Endpoint::Batch, HeaderProfile::Xhr, None, &snapshot.cookies)?;
        let url = url_with_query(
            Endpoint::Batch,
            &self.http.endpoints().batch,
            &batch_query(&snapshot.query, calls, &snapshot.access_token, next_request_id()),
        )?;
        let form = batch_form(calls, &snapshot.access_token);
        let response = self
            .http
            .execute(Endpoint::Batch, self.http.build_form_post(url, headers, &form), None)
            .await?;
        self.credentials.absorb_cookies(&response.set_cookies).await;

        if response.redirected_to_accounts() {
            return Err(GeminiError::new(
                ErrorKind::Auth,
                Endpoint::Batch,
                "batch request redirected to sign-in",
            )
            .with_status(response.status));
        }
        if !response.is_success() {
            return Err(status_error(Endpoint::Batch, response.status, &response.body));
        }

        let frames = parse_batch_response(response.body.as_bytes())?;
        if let Some(code) = frames.iter().find_map(|frame| frame.error_code) {
            return Err(inner_code_error(Endpoint::Batch, code).with_body(&response.body));
        }
        Ok(frames)
    }

    async fn with_auth_retry<T, F, Fut>(&self, endpoint: Endpoint, mut call: F) -> Result<T, GeminiError>
    where
        F: FnMut(CredentialSnapshot) -> Fut,
        Fut: Future<Output = Result<T, GeminiError>>,
    {
        let mut retries = 0;
        loop {
            self.ensure_open(endpoint)?;
            let snapshot = self.current_snapshot().await;
            let epoch = snapshot.epoch;
            let error = match call(snapshot).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            match decide(error.kind, retries) {
                RetryDecision::RefreshAndRetry => {
                    retries += 1;
                    tracing::warn!(endpoint = %endpoint, "request unauthenticated; refreshing credentials");
                    self.credentials.refresh_after_auth(epoch).await?;
                }
                RetryDecision::Surface => return Err(error),
            }
        }
    }

    /// Snapshot for a new request, first trying to replace a stale bundle.
    async fn current_snapshot(&self) -> CredentialSnapshot {
        let snapshot = self.credentials.snapshot().await;
        if !snapshot.stale || !self.credentials.can_refresh_externally() {
            return snapshot;
        }
        match self.credentials.refresh_after_auth(snapshot.epoch).await {
            Ok(()) => self.credentials.snapshot().await,
            Err(error) => {
                tracing::warn!(error = %error, "stale cookies could not be refreshed");
                snapshot
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
