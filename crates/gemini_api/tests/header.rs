use gemini_api::headers::{
    build_headers, push_headers, BrowserIdentity, HeaderProfile, HEADER_ACCEPT, HEADER_MODEL,
    HEADER_ORIGIN, HEADER_PUSH_ID, HEADER_REFERER, HEADER_SAME_DOMAIN, HEADER_SEC_FETCH_MODE,
    HEADER_USER_AGENT, PUSH_ID,
};
use gemini_api::Endpoints;

#[test]
fn header_map_for_rpc_requests_is_same_origin_xhr() {
    let endpoints = Endpoints::default();
    let headers = build_headers(
        HeaderProfile::Xhr,
        &BrowserIdentity::default(),
        &endpoints,
        Some(r#"[1,null,null,null,"9d8ca3786ebdfbea"]"#),
    );

    assert_eq!(headers.get(HEADER_ACCEPT).expect("accept"), "*/*");
    assert_eq!(headers.get(HEADER_SEC_FETCH_MODE).expect("mode"), "cors");
    assert_eq!(headers.get(HEADER_SAME_DOMAIN).expect("same domain"), "1");
    assert_eq!(
        headers.get(HEADER_ORIGIN).expect("origin"),
        "https://gemini.google.com"
    );
    assert_eq!(
        headers.get(HEADER_REFERER).expect("referer"),
        "https://gemini.google.com/"
    );
    assert!(headers
        .get(HEADER_MODEL)
        .expect("model header")
        .contains("9d8ca3786ebdfbea"));
}

#[test]
fn header_map_for_landing_page_is_document_navigation() {
    let headers = build_headers(
        HeaderProfile::Document,
        &BrowserIdentity::default(),
        &Endpoints::default(),
        Some("   "),
    );

    assert!(headers.get(HEADER_ACCEPT).expect("accept").starts_with("text/html"));
    assert_eq!(headers.get(HEADER_SEC_FETCH_MODE).expect("mode"), "navigate");
    assert!(headers.get(HEADER_MODEL).is_none());
}

#[test]
fn header_map_uses_configured_browser_identity() {
    let browser = BrowserIdentity {
        user_agent: "test-agent".to_owned(),
        ..BrowserIdentity::default()
    };
    let headers = build_headers(HeaderProfile::Xhr, &browser, &Endpoints::default(), None);
    assert_eq!(headers.get(HEADER_USER_AGENT).expect("user-agent"), "test-agent");
}

#[test]
fn push_headers_name_the_upload_feed() {
    assert_eq!(push_headers().get(HEADER_PUSH_ID).map(String::as_str), Some(PUSH_ID));
}
