mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use gemini_web::{
    CookieBundle, CookieStore, Endpoint, Engine, ErrorKind, FileCookieStore, MemoryCookieStore,
};
use pretty_assertions::assert_eq;
use support::{
    chat_reply, connected, landing_page, test_config, CountingSource, ScriptedResponse,
    ScriptedServer, CHAT, LANDING,
};

#[tokio::test]
async fn bootstrap_scrapes_token_and_absorbs_cookies() {
    let server = ScriptedServer::start().await;
    server.always(
        LANDING,
        ScriptedResponse::ok(landing_page("AT-boot")).with_cookie("__Secure-1PSIDTS=T9; Path=/; Secure"),
    );
    let engine = Engine::builder(test_config(&server))
        .cookies(CookieBundle::new("P0", "T0"))
        .connect()
        .await
        .expect("connect");

    assert_eq!(engine.access_token().await, "AT-boot");
    assert_eq!(engine.cookies().await.rotator, "T9");

    let landing = &server.requests_to(LANDING)[0];
    assert_eq!(landing.method, "GET");
    assert_eq!(landing.header("sec-fetch-mode"), Some("navigate"));
    assert!(landing
        .header("cookie")
        .is_some_and(|cookie| cookie.contains("__Secure-1PSID=P0")));
}

#[tokio::test]
async fn landing_without_token_is_auth() {
    let server = ScriptedServer::start().await;
    server.always(LANDING, ScriptedResponse::ok("<html>Sign in</html>"));
    let error = Engine::builder(test_config(&server))
        .cookies(CookieBundle::new("P0", "T0"))
        .connect()
        .await
        .err()
        .expect("auth");
    assert_eq!(error.kind, ErrorKind::Auth);
    assert_eq!(error.endpoint, Endpoint::Landing);
}

#[tokio::test]
async fn landing_consent_redirect_is_auth_and_server_fault_is_network() {
    let server = ScriptedServer::start().await;
    server.enqueue(LANDING, ScriptedResponse::redirect("/consent.google.com/ml"));
    server.enqueue(LANDING, ScriptedResponse::status(502, "bad gateway"));

    let builder = || Engine::builder(test_config(&server)).cookies(CookieBundle::new("P0", "T0"));
    let consent = builder().connect().await.err().expect("consent");
    assert_eq!(consent.kind, ErrorKind::Auth);
    let fault = builder().connect().await.err().expect("fault");
    assert_eq!(fault.kind, ErrorKind::Network);
    assert_eq!(fault.status, Some(502));
}

#[tokio::test]
async fn missing_cookies_without_store_or_source_is_config() {
    let server = ScriptedServer::start().await;
    let error = Engine::builder(test_config(&server))
        .connect()
        .await
        .err()
        .expect("config");
    assert_eq!(error.kind, ErrorKind::Config);
    assert_eq!(server.count(LANDING), 0);
}

#[tokio::test]
async fn initial_cookies_come_from_store() {
    let server = ScriptedServer::start().await;
    server.always(LANDING, ScriptedResponse::ok(landing_page("AT1")));
    let store = Arc::new(MemoryCookieStore::with_cookies(CookieBundle::new("P-stored", "T-stored")));

    Engine::builder(test_config(&server))
        .cookie_store(store)
        .connect()
        .await
        .expect("connect");

    let landing = &server.requests_to(LANDING)[0];
    assert!(landing
        .header("cookie")
        .is_some_and(|cookie| cookie.contains("__Secure-1PSID=P-stored")));
}

#[tokio::test]
async fn rejected_initial_cookies_fall_back_to_external_source() {
    let server = ScriptedServer::start().await;
    server.enqueue(LANDING, ScriptedResponse::ok("<html>Sign in</html>"));
    server.always(LANDING, ScriptedResponse::ok(landing_page("AT2")));
    let source = Arc::new(CountingSource::new(CookieBundle::new("P1", "T1")));

    let engine = Engine::builder(test_config(&server).with_external_refresh(true))
        .cookies(CookieBundle::new("P-expired", "T0"))
        .cookie_source(source.clone())
        .connect()
        .await
        .expect("connect");

    assert_eq!(source.calls(), 1);
    assert_eq!(engine.cookies().await.primary, "P1");
    assert_eq!(engine.access_token().await, "AT2");
}

#[tokio::test]
async fn auth_failure_refreshes_from_source_and_persists() {
    let server = ScriptedServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileCookieStore::new(dir.path().join("cookies.json")));
    let source = Arc::new(CountingSource::new(CookieBundle::new("P1", "T1")));
    let engine = {
        server.always(LANDING, ScriptedResponse::ok(landing_page("AT1")));
        Engine::builder(test_config(&server).with_external_refresh(true))
            .cookies(CookieBundle::new("P0", "T0"))
            .cookie_source(source.clone())
            .cookie_store(store.clone())
            .connect()
            .await
            .expect("connect")
    };
    server.enqueue(CHAT, ScriptedResponse::status(401, "expired"));
    server.enqueue(CHAT, ScriptedResponse::ok(chat_reply("c", "r", &[("rc", "hello again")])));

    let output = engine.generate("hi").await.expect("recovered");
    assert_eq!(output.text(), "hello again");
    assert_eq!(source.calls(), 1);

    let chats = server.requests_to(CHAT);
    assert!(chats[1]
        .header("cookie")
        .is_some_and(|cookie| cookie.contains("__Secure-1PSID=P1")));
    let saved = store.load().expect("load").expect("saved bundle");
    assert_eq!(saved.primary, "P1");
}

#[tokio::test]
async fn external_refresh_is_rate_limited() {
    let server = ScriptedServer::start().await;
    server.always(LANDING, ScriptedResponse::ok(landing_page("AT1")));
    let source = Arc::new(CountingSource::new(CookieBundle::new("P1", "T1")));
    let engine = Engine::builder(test_config(&server).with_external_refresh(true))
        .cookies(CookieBundle::new("P0", "T0"))
        .cookie_source(source.clone())
        .connect()
        .await
        .expect("connect");

    engine.refresh_from_external_source().await.expect("first refresh");
    let error = engine
        .refresh_from_external_source()
        .await
        .expect_err("throttled");
    assert_eq!(error.kind, ErrorKind::RateLimitSelf);
    assert_eq!(source.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_external_refresh_fails_fast() {
    let server = ScriptedServer::start().await;
    server.always(LANDING, ScriptedResponse::ok(landing_page("AT1")));
    let source = Arc::new(
        CountingSource::new(CookieBundle::new("P1", "T1")).with_delay(Duration::from_secs(2)),
    );
    let engine = Engine::builder(test_config(&server).with_external_refresh(true))
        .cookies(CookieBundle::new("P0", "T0"))
        .cookie_source(source.clone())
        .connect()
        .await
        .expect("connect");

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.refresh_from_external_source().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let error = engine
        .refresh_from_external_source()
        .await
        .expect_err("throttled");
    assert_eq!(error.kind, ErrorKind::RateLimitSelf);
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "second refresh waited {:?}",
        started.elapsed()
    );

    running.await.expect("join").expect("first refresh");
    assert_eq!(source.calls(), 1);
    assert_eq!(engine.cookies().await.primary, "P1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_auth_failures_share_one_refresh() {
    let server = ScriptedServer::start().await;
    server.always(LANDING, ScriptedResponse::ok(landing_page("AT1")));
    let source = Arc::new(
        CountingSource::new(CookieBundle::new("P1", "T1")).with_delay(Duration::from_millis(300)),
    );
    let engine = Engine::builder(test_config(&server).with_external_refresh(true))
        .cookies(CookieBundle::new("P0", "T0"))
        .cookie_source(source.clone())
        .connect()
        .await
        .expect("connect");
    server.enqueue(CHAT, ScriptedResponse::status(401, "expired"));
    server.enqueue(CHAT, ScriptedResponse::status(401, "expired"));
    server.always(CHAT, ScriptedResponse::ok(chat_reply("c", "r", &[("rc", "ok")])));

    let mut first = engine.start_chat();
    let mut second = engine.start_chat();
    let (a, b) = tokio::join!(first.send_message("a", &[]), second.send_message("b", &[]));

    a.expect("first recovered");
    b.expect("second recovered");
    assert_eq!(source.calls(), 1);
    assert_eq!(server.count(CHAT), 4);
}

#[tokio::test]
async fn failing_source_surfaces_its_error() {
    let server = ScriptedServer::start().await;
    let engine = {
        server.always(LANDING, ScriptedResponse::ok(landing_page("AT1")));
        Engine::builder(test_config(&server).with_external_refresh(true))
            .cookies(CookieBundle::new("P0", "T0"))
            .cookie_source(Arc::new(CountingSource::failing()))
            .connect()
            .await
            .expect("connect")
    };
    server.always(CHAT, ScriptedResponse::status(401, "expired"));

    let error = engine.generate("hi").await.expect_err("auth");
    assert_eq!(error.kind, ErrorKind::Auth);
    assert_eq!(error.endpoint, Endpoint::CookieSource);
    assert_eq!(server.count(CHAT), 1);
}

#[tokio::test]
async fn set_model_applies_to_next_request() {
    let server = ScriptedServer::start().await;
    let engine = connected(&server, test_config(&server)).await;
    server.always(CHAT, ScriptedResponse::ok(chat_reply("c", "r", &[("rc", "ok")])));

    engine
        .set_model(gemini_web::ModelDescriptor::from_name("gemini-3.0-flash").expect("model"))
        .await;
    engine.generate("hi").await.expect("reply");

    assert_eq!(engine.model().await.name(), "gemini-3.0-flash");
    assert!(server.requests_to(CHAT)[0]
        .header("x-goog-ext-525001261-jspb")
        .is_some_and(|blob| blob.contains("fbb127bbb056c959")));
}
