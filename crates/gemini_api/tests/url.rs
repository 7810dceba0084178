use gemini_api::client::RawResponse;
use gemini_api::url::{
    is_accounts_redirect, is_consent_redirect, is_sign_in_redirect, normalize_origin, Endpoints,
};

#[test]
fn url_origin_normalization_trims_slashes() {
    assert_eq!(normalize_origin("http://127.0.0.1:9000/ "), "http://127.0.0.1:9000");
    assert_eq!(normalize_origin(""), "https://gemini.google.com");
}

#[test]
fn url_endpoints_follow_a_custom_origin() {
    let endpoints = Endpoints::with_origin("http://127.0.0.1:9000/");
    assert_eq!(endpoints.landing, "http://127.0.0.1:9000/app");
    assert_eq!(
        endpoints.chat,
        "http://127.0.0.1:9000/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate"
    );
    assert_eq!(endpoints.batch, "http://127.0.0.1:9000/_/BardChatUi/data/batchexecute");
    assert_eq!(endpoints.referer(), "http://127.0.0.1:9000/");
}

#[test]
fn url_redirect_detection() {
    assert!(is_accounts_redirect(
        "https://accounts.google.com/ServiceLogin?continue=https://gemini.google.com/app"
    ));
    assert!(is_consent_redirect("https://consent.google.com/ml?continue=x"));
    assert!(!is_accounts_redirect("https://gemini.google.com/app"));
}

#[test]
fn url_rotation_on_accounts_host_is_not_a_sign_in() {
    let rotate = Endpoints::default().rotate;
    assert!(!is_sign_in_redirect(&rotate, &rotate));
    assert!(!is_sign_in_redirect(&rotate, &format!("{rotate}/")));

    let response = RawResponse {
        status: 200,
        requested_url: rotate.clone(),
        final_url: rotate.clone(),
        set_cookies: vec!["__Secure-1PSIDTS=T1; Path=/".to_owned()],
        body: String::new(),
    };
    assert!(response.is_success());
    assert!(!response.redirected_to_accounts());
}

#[test]
fn url_sign_in_redirect_is_detected_for_every_endpoint() {
    let endpoints = Endpoints::default();
    assert!(is_sign_in_redirect(
        &endpoints.rotate,
        "https://accounts.google.com/ServiceLogin?continue=x"
    ));
    assert!(is_sign_in_redirect(
        &endpoints.rotate,
        "https://accounts.google.com/v3/signin/identifier"
    ));
    assert!(is_sign_in_redirect(&endpoints.landing, "https://accounts.google.com/"));
    assert!(!is_sign_in_redirect(&endpoints.landing, &endpoints.landing));
}
