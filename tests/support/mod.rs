#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gemini_api::stream::encode_stream;
use gemini_api::url::{BATCH_PATH, CHAT_PATH};
use gemini_web::{
    CookieBundle, Endpoint, Endpoints, Engine, EngineConfig, ErrorKind, ExternalCookieSource,
    GeminiError, Timeouts,
};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub const LANDING: &str = "/app";
pub const CHAT: &str = CHAT_PATH;
pub const BATCH: &str = BATCH_PATH;
pub const UPLOAD: &str = "/upload";
pub const ROTATE: &str = "/RotateCookies";

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<(u64, Vec<u8>)>,
}

impl ScriptedResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: vec![(0, body.into())],
        }
    }

    /// Body split into `size`-byte chunks, each written separately.
    pub fn chunked(body: &[u8], size: usize) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            chunks: body.chunks(size).map(|chunk| (0, chunk.to_vec())).collect(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self::status(302, Vec::new()).with_header("Location", location)
    }

    pub fn with_cookie(self, cookie: &str) -> Self {
        self.with_header("Set-Cookie", cookie)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Wait `ms` before writing the first body chunk.
    pub fn delayed(mut self, ms: u64) -> Self {
        if let Some(first) = self.chunks.first_mut() {
            first.0 = ms;
        }
        self
    }

    /// Append a chunk written after `ms` more milliseconds.
    pub fn then_chunk(mut self, ms: u64, bytes: &[u8]) -> Self {
        self.chunks.push((ms, bytes.to_vec()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn form_value(&self, key: &str) -> Option<String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }

    pub fn query_value(&self, key: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }

    /// The positional chat array carried as a JSON string inside `f.req`.
    pub fn chat_inner(&self) -> Value {
        let envelope: Value =
            serde_json::from_str(&self.form_value("f.req").expect("f.req field")).expect("envelope");
        serde_json::from_str(envelope[1].as_str().expect("inner string")).expect("inner json")
    }
}

#[derive(Default)]
struct Route {
    queue: VecDeque<ScriptedResponse>,
    fallback: Option<ScriptedResponse>,
}

type Routes = Arc<Mutex<HashMap<String, Route>>>;

/// Local HTTP/1.1 server answering per path from scripted queues.
pub struct ScriptedServer {
    pub base_url: String,
    routes: Routes,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener.local_addr().expect("resolved local listener address");
        let routes: Routes = Arc::default();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let routes = Arc::clone(&routes);
            let requests = Arc::clone(&requests);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let routes = Arc::clone(&routes);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move { serve_one(socket, routes, requests).await });
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            routes,
            requests,
            handle,
        }
    }

    /// Serve `response` once for `path`, after any already queued.
    pub fn enqueue(&self, path: &str, response: ScriptedResponse) {
        self.routes
            .lock()
            .expect("routes")
            .entry(path.to_owned())
            .or_default()
            .queue
            .push_back(response);
    }

    /// Serve `response` for `path` whenever its queue is empty.
    pub fn always(&self, path: &str, response: ScriptedResponse) {
        self.routes
            .lock()
            .expect("routes")
            .entry(path.to_owned())
            .or_default()
            .fallback = Some(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("request log").clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::with_origin(&self.base_url)
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(mut socket: TcpStream, routes: Routes, requests: Arc<Mutex<Vec<RecordedRequest>>>) {
    let Ok(request) = read_request(&mut socket).await else {
        return;
    };
    let response = {
        let mut routes = routes.lock().expect("routes");
        routes.get_mut(&request.path).and_then(|route| {
            route.queue.pop_front().or_else(|| route.fallback.clone())
        })
    }
    .unwrap_or_else(|| ScriptedResponse::status(404, "no script"));
    requests.lock().expect("request log").push(request);

    let mut head = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n",
        response.status
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for (delay_ms, bytes) in response.chunks {
        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        if bytes.is_empty() {
            continue;
        }
        let frame = [
            format!("{:X}\r\n", bytes.len()).into_bytes(),
            bytes,
            b"\r\n".to_vec(),
        ]
        .concat();
        if socket.write_all(&frame).await.is_err() {
            return;
        }
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut raw = Vec::new();
    let mut buffer = [0_u8; 8192];
    let split = loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        raw.extend_from_slice(&buffer[..n]);
        if let Some(split) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            break split;
        }
    };

    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let target = parts.next().unwrap_or_default();
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let headers = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_owned(), value.trim().to_owned()))
        })
        .collect::<Vec<_>>();
    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < split + 4 + length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buffer[..n]);
    }
    let body_end = raw.len().min(split + 4 + length);

    Ok(RecordedRequest {
        method,
        path: path.to_owned(),
        query: query.to_owned(),
        headers,
        body: String::from_utf8_lossy(&raw[split + 4..body_end]).into_owned(),
    })
}

pub fn landing_page(token: &str) -> String {
    format!(
        r#"<html><script>WIZ_global_data = {{"SNlM0e":"{token}","cfb2h":"boq_test_build","FdrFJe":"-777"}};</script></html>"#
    )
}

/// Reply stream with one `wrb.fr` frame and an end frame.
pub fn chat_reply(conversation_id: &str, reply_id: &str, candidates: &[(&str, &str)]) -> Vec<u8> {
    let candidates = candidates
        .iter()
        .map(|(id, text)| json!([id, [text]]))
        .collect::<Vec<_>>();
    let inner = json!([null, [conversation_id, reply_id], null, null, candidates]);
    encode_stream(&[
        json!([["wrb.fr", null, inner.to_string()]]).to_string(),
        r#"[["e",4,null,null,128]]"#.to_owned(),
    ])
}

/// Reply stream whose only frame carries an inner error code.
pub fn chat_error_reply(code: i64) -> Vec<u8> {
    encode_stream(&[
        json!([["wrb.fr", null, null, null, null, [code]]]).to_string(),
        r#"[["e",2,null,null,32]]"#.to_owned(),
    ])
}

/// Batch RPC body with one frame per `(rpc_id, payload, identifier)`.
pub fn batch_reply(frames: &[(&str, Value, &str)]) -> Vec<u8> {
    let frames = frames
        .iter()
        .map(|(rpc_id, payload, identifier)| {
            json!(["wrb.fr", rpc_id, payload.to_string(), null, null, null, identifier])
        })
        .collect::<Vec<_>>();
    encode_stream(&[Value::Array(frames).to_string()])
}

pub fn test_config(server: &ScriptedServer) -> EngineConfig {
    EngineConfig::default()
        .with_endpoints(server.endpoints())
        .with_auto_refresh_rotation(false)
        .with_timeouts(Timeouts {
            chat: Duration::from_secs(5),
            upload: Duration::from_secs(5),
            bootstrap: Duration::from_secs(5),
            refresh: Duration::from_secs(5),
        })
}

pub async fn connect(server: &ScriptedServer, config: EngineConfig) -> Arc<Engine> {
    Engine::builder(config)
        .cookies(CookieBundle::new("P0", "T0"))
        .connect()
        .await
        .expect("engine should connect")
}

/// Serves the landing page and returns an engine built on `config`.
pub async fn connected(server: &ScriptedServer, config: EngineConfig) -> Arc<Engine> {
    server.always(LANDING, ScriptedResponse::ok(landing_page("AT1")));
    connect(server, config).await
}

/// External source handing out a fixed bundle and counting calls.
pub struct CountingSource {
    cookies: Option<CookieBundle>,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn new(cookies: CookieBundle) -> Self {
        Self {
            cookies: Some(cookies),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            cookies: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalCookieSource for CountingSource {
    async fn fetch(&self, _hint: &str) -> Result<CookieBundle, GeminiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.cookies.clone().ok_or_else(|| {
            GeminiError::new(ErrorKind::Auth, Endpoint::CookieSource, "browser has no session")
        })
    }
}
