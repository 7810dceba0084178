mod support;

use std::sync::Arc;
use std::time::Duration;

use gemini_web::credentials::ROTATE_BODY;
use gemini_web::{CookieBundle, Engine, ErrorKind, RotationOutcome};
use pretty_assertions::assert_eq;
use support::{
    chat_reply, connected, landing_page, test_config, CountingSource, ScriptedResponse,
    ScriptedServer, CHAT, LANDING, ROTATE,
};
use tokio::time::sleep;

#[tokio::test]
async fn rotate_now_installs_new_rotator_and_respects_min_gap() {
    let server = ScriptedServer::start().await;
    let engine = connected(&server, test_config(&server)).await;
    server.always(
        ROTATE,
        ScriptedResponse::ok("").with_cookie("__Secure-1PSIDTS=T-rotated; Path=/; Secure"),
    );

    assert_eq!(engine.rotate_now().await.expect("rotate"), RotationOutcome::Rotated);
    assert_eq!(engine.cookies().await.rotator, "T-rotated");

    assert_eq!(engine.rotate_now().await.expect("skip"), RotationOutcome::Skipped);
    let rotations = server.requests_to(ROTATE);
    assert_eq!(rotations.len(), 1);
    assert_eq!(rotations[0].method, "POST");
    assert_eq!(rotations[0].body, ROTATE_BODY);
}

#[tokio::test]
async fn rotation_without_new_cookie_is_unchanged() {
    let server = ScriptedServer::start().await;
    let engine = connected(&server, test_config(&server)).await;
    server.always(ROTATE, ScriptedResponse::ok(""));

    assert_eq!(engine.rotate_now().await.expect("rotate"), RotationOutcome::Unchanged);
    assert_eq!(engine.cookies().await.rotator, "T0");
}

#[tokio::test]
async fn unauthenticated_rotation_marks_cookies_stale() {
    let server = ScriptedServer::start().await;
    let engine = connected(&server, test_config(&server)).await;
    server.always(ROTATE, ScriptedResponse::status(401, "expired"));

    let error = engine.rotate_now().await.expect_err("auth");
    assert_eq!(error.kind, ErrorKind::Auth);
    assert!(engine.is_stale().await);
}

#[tokio::test]
async fn stale_cookies_are_refreshed_before_next_request() {
    let server = ScriptedServer::start().await;
    server.always(LANDING, ScriptedResponse::ok(landing_page("AT1")));
    let source = Arc::new(CountingSource::new(CookieBundle::new("P1", "T1")));
    let engine = Engine::builder(test_config(&server).with_external_refresh(true))
        .cookies(CookieBundle::new("P0", "T0"))
        .cookie_source(source.clone())
        .connect()
        .await
        .expect("connect");
    server.always(ROTATE, ScriptedResponse::status(401, "expired"));
    server.always(CHAT, ScriptedResponse::ok(chat_reply("c", "r", &[("rc", "ok")])));

    engine.rotate_now().await.expect_err("stale");
    engine.generate("hi").await.expect("reply");

    assert_eq!(source.calls(), 1);
    assert!(!engine.is_stale().await);
    assert!(server.requests_to(CHAT)[0]
        .header("cookie")
        .is_some_and(|cookie| cookie.contains("__Secure-1PSID=P1")));
}

#[tokio::test]
async fn rotation_sent_to_sign_in_page_marks_cookies_stale() {
    let server = ScriptedServer::start().await;
    let engine = connected(&server, test_config(&server)).await;
    server.always(ROTATE, ScriptedResponse::redirect("/ServiceLogin?continue=x"));
    server.always("/ServiceLogin", ScriptedResponse::ok("<html>sign in</html>"));

    let error = engine.rotate_now().await.expect_err("signed out");
    assert_eq!(error.kind, ErrorKind::Auth);
    assert!(engine.is_stale().await);
}

#[tokio::test]
async fn throttled_rotation_surfaces_rate_limit() {
    let server = ScriptedServer::start().await;
    let engine = connected(&server, test_config(&server)).await;
    server.always(ROTATE, ScriptedResponse::status(429, "slow down"));

    let error = engine.rotate_now().await.expect_err("throttled");
    assert_eq!(error.kind, ErrorKind::RateLimit);
    assert!(!engine.is_stale().await);
}

#[tokio::test]
async fn background_rotation_ticks_until_close() {
    let server = ScriptedServer::start().await;
    let config = test_config(&server)
        .with_auto_refresh_rotation(true)
        .with_rotation_interval(Duration::from_millis(200))
        .with_rotation_min_gap(Duration::ZERO);
    let engine = connected(&server, config).await;
    server.always(
        ROTATE,
        ScriptedResponse::ok("").with_cookie("__Secure-1PSIDTS=T-bg; Path=/"),
    );

    sleep(Duration::from_millis(750)).await;
    let ticks = server.count(ROTATE);
    assert!(ticks >= 2, "expected at least two rotations, saw {ticks}");
    assert_eq!(engine.cookies().await.rotator, "T-bg");

    engine.close().await;
    let after_close = server.count(ROTATE);
    sleep(Duration::from_millis(500)).await;
    assert_eq!(server.count(ROTATE), after_close);
    engine.close().await;
}

#[tokio::test]
async fn background_rotation_honours_min_gap() {
    let server = ScriptedServer::start().await;
    let config = test_config(&server)
        .with_auto_refresh_rotation(true)
        .with_rotation_interval(Duration::from_millis(150))
        .with_rotation_min_gap(Duration::from_secs(60));
    let engine = connected(&server, config).await;
    server.always(
        ROTATE,
        ScriptedResponse::ok("").with_cookie("__Secure-1PSIDTS=T-once; Path=/"),
    );

    sleep(Duration::from_millis(700)).await;
    assert_eq!(server.count(ROTATE), 1);
    engine.close().await;
}

#[tokio::test]
async fn background_rotation_backs_off_after_server_fault() {
    let server = ScriptedServer::start().await;
    let config = test_config(&server)
        .with_auto_refresh_rotation(true)
        .with_rotation_interval(Duration::from_millis(1_500))
        .with_rotation_min_gap(Duration::ZERO);
    let engine = connected(&server, config).await;
    server.enqueue(ROTATE, ScriptedResponse::status(503, "unavailable"));
    server.always(
        ROTATE,
        ScriptedResponse::ok("").with_cookie("__Secure-1PSIDTS=T-retry; Path=/"),
    );

    // First tick at 1.5s fails, the backoff retry lands about a second later.
    sleep(Duration::from_millis(3_200)).await;
    assert!(server.count(ROTATE) >= 2);
    assert_eq!(engine.cookies().await.rotator, "T-retry");
    engine.close().await;
}
