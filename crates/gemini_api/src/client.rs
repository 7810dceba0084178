use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE};
use reqwest::{multipart, Client, RequestBuilder, Response};

use crate::config::TransportConfig;
use crate::cookies::{set_cookie_lines, CookieBundle};
use crate::error::{Endpoint, ErrorKind, GeminiError};
use crate::headers::{build_headers, to_header_map, HeaderProfile};
use crate::tls::browser_tls_config;
use crate::url::{is_sign_in_redirect, Endpoints};

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Browser-imitating HTTPS client. Never retries; every failure is tagged
/// with the endpoint that produced it.
#[derive(Debug)]
pub struct GeminiHttpClient {
    http: Client,
    config: TransportConfig,
}

/// Fully buffered response for the small, non-streamed endpoints.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub requested_url: String,
    pub final_url: String,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn redirected_to_accounts(&self) -> bool {
        is_sign_in_redirect(&self.requested_url, &self.final_url)
    }
}

/// Response whose body is consumed chunk by chunk.
#[derive(Debug)]
pub struct StreamingResponse {
    endpoint: Endpoint,
    pub status: u16,
    pub requested_url: String,
    pub final_url: String,
    pub set_cookies: Vec<String>,
    response: Response,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn redirected_to_accounts(&self) -> bool {
        is_sign_in_redirect(&self.requested_url, &self.final_url)
    }

    /// Read the remaining body as text; used when the status is already an error.
    pub async fn text(
        self,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<String, GeminiError> {
        let endpoint = self.endpoint;
        await_or_cancel(self.response.text(), cancellation, endpoint)
            .await?
            .map_err(|error| GeminiError::from_transport(endpoint, &error))
    }

    /// Feed body chunks to `on_chunk` until the stream ends or it breaks.
    pub async fn drain<F>(
        self,
        cancellation: Option<&CancellationSignal>,
        mut on_chunk: F,
    ) -> Result<(), GeminiError>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>, GeminiError>,
    {
        let endpoint = self.endpoint;
        let mut bytes = self.response.bytes_stream();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation, endpoint).await? else {
                break;
            };
            let chunk = chunk.map_err(|error| GeminiError::from_transport(endpoint, &error))?;
            if on_chunk(&chunk)?.is_break() {
                break;
            }
        }

        if is_cancelled(cancellation) {
            return Err(GeminiError::cancelled(endpoint));
        }
        Ok(())
    }
}

impl GeminiHttpClient {
    pub fn new(config: TransportConfig) -> Result<Self, GeminiError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if config.browser_tls {
            builder = builder.use_preconfigured_tls(browser_tls_config()?);
        }
        let http = builder.build().map_err(|error| {
            GeminiError::new(
                ErrorKind::Config,
                Endpoint::Local,
                format!("failed to build HTTP client: {error}"),
            )
        })?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.config.endpoints
    }

    /// Profile headers plus the model blob, extras and the cookie header.
    pub fn headers(
        &self,
        endpoint: Endpoint,
        profile: HeaderProfile,
        model_header: Option<&str>,
        cookies: &CookieBundle,
    ) -> Result<HeaderMap, GeminiError> {
        let mut headers = build_headers(
            profile,
            &self.config.browser,
            &self.config.endpoints,
            model_header,
        );
        for (key, value) in &self.config.extra_headers {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
        let mut out = to_header_map(endpoint, &headers)?;
        let cookie_header = cookies.header_value();
        if !cookie_header.is_empty() {
            let value = HeaderValue::from_str(&cookie_header).map_err(|_| {
                GeminiError::new(ErrorKind::Config, endpoint, "cookie value is not a valid header")
            })?;
            out.insert(COOKIE, value);
        }
        Ok(out)
    }

    pub fn build_get(&self, url: &str, headers: HeaderMap) -> RequestBuilder {
        self.http.get(url).headers(headers)
    }

    /// Form POST with the browser's exact content type (reqwest's omits the charset).
    pub fn build_form_post(
        &self,
        url: url::Url,
        headers: HeaderMap,
        form: &[(&str, String)],
    ) -> RequestBuilder {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter().map(|(key, value)| (*key, value.as_str())))
            .finish();
        self.http
            .post(url)
            .headers(headers)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
    }

    pub fn build_json_post(&self, url: &str, headers: HeaderMap, body: &str) -> RequestBuilder {
        self.http
            .post(url)
            .headers(headers)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned())
    }

    pub fn build_multipart_post(
        &self,
        url: &str,
        headers: HeaderMap,
        form: multipart::Form,
    ) -> RequestBuilder {
        self.http.post(url).headers(headers).multipart(form)
    }

    /// Send and buffer the whole body.
    pub async fn execute(
        &self,
        endpoint: Endpoint,
        request: RequestBuilder,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<RawResponse, GeminiError> {
        let (requested_url, response) = self.send(endpoint, request, cancellation).await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let set_cookies = set_cookie_lines(response.headers());
        let body = await_or_cancel(response.text(), cancellation, endpoint)
            .await?
            .map_err(|error| GeminiError::from_transport(endpoint, &error))?;
        tracing::debug!(endpoint = %endpoint, status, bytes = body.len(), "response received");
        Ok(RawResponse {
            status,
            requested_url,
            final_url,
            set_cookies,
            body,
        })
    }

    /// Send and hand back the body as a chunk stream.
    pub async fn execute_streaming(
        &self,
        endpoint: Endpoint,
        request: RequestBuilder,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamingResponse, GeminiError> {
        let (requested_url, response) = self.send(endpoint, request, cancellation).await?;
        tracing::debug!(endpoint = %endpoint, status = response.status().as_u16(), "stream opened");
        Ok(StreamingResponse {
            endpoint,
            status: response.status().as_u16(),
            requested_url,
            final_url: response.url().to_string(),
            set_cookies: set_cookie_lines(response.headers()),
            response,
        })
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        request: RequestBuilder,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<(String, Response), GeminiError> {
        if is_cancelled(cancellation) {
            return Err(GeminiError::cancelled(endpoint));
        }
        let (client, request) = request.build_split();
        let request = request.map_err(|error| GeminiError::from_transport(endpoint, &error))?;
        let requested_url = request.url().to_string();
        let response = await_or_cancel(client.execute(request), cancellation, endpoint)
            .await?
            .map_err(|error| GeminiError::from_transport(endpoint, &error))?;
        Ok((requested_url, response))
    }
}

pub fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

/// Await `future`, polling `cancellation` so an in-flight request can be abandoned.
pub async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
    endpoint: Endpoint,
) -> Result<F::Output, GeminiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(GeminiError::cancelled(endpoint));
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(GeminiError::cancelled(endpoint));
            }
            return Ok(output);
        }
    }
}

/// Run `future` under a deadline, mapping expiry to `Timeout`.
pub async fn with_deadline<T, F>(
    endpoint: Endpoint,
    deadline: Duration,
    future: F,
) -> Result<T, GeminiError>
where
    F: Future<Output = Result<T, GeminiError>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(GeminiError::timeout(endpoint, deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn await_or_cancel_returns_cancelled_when_flag_is_set() {
        let flag: CancellationSignal = Arc::new(AtomicBool::new(true));
        let result = await_or_cancel(
            tokio::time::sleep(Duration::from_secs(5)),
            Some(&flag),
            Endpoint::Chat,
        )
        .await;
        assert!(matches!(result, Err(error) if error.kind == ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn with_deadline_maps_expiry_to_timeout() {
        let result: Result<(), GeminiError> =
            with_deadline(Endpoint::Upload, Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let error = result.expect_err("deadline should expire");
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.endpoint, Endpoint::Upload);
    }
}
