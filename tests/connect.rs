mod support;

use slipo::{Client, ClientConfig, Credentials, Error};
use std::net::TcpListener;
use std::time::Duration;
use support::{API_KEY, SESSION_TOKEN, StubServer};

#[test]
fn connect_validates_key_and_keeps_session_token() {
    let server = StubServer::start();
    let client = server.client();

    assert_eq!(client.session().session_token(), Some(SESSION_TOKEN));
    assert_eq!(client.session().base_url(), server.url());

    let requests = server.requests_to("/api/v1/key/validate/");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("x-api-key"), Some(API_KEY));
    assert!(
        requests[0]
            .header("user-agent")
            .is_some_and(|ua| ua.starts_with("slipo-rs/"))
    );
}

#[test]
fn invalid_key_is_auth_error() {
    let server = StubServer::start();
    let config = ClientConfig::new(server.url(), Credentials::api_key("wrong"))
        .with_requires_ssl(false);

    let err = Client::connect_with(config).unwrap_err();
    assert!(matches!(err, Error::Auth { .. }), "{err}");
    assert!(err.to_string().contains("Invalid API key"), "{err}");
}

#[test]
fn unsuccessful_validation_envelope_is_auth_error() {
    let server = StubServer::start();
    server.route("GET", "/api/v1/key/validate/", |_| {
        support::StubResponse::json(200, serde_json::json!({"success": false, "error": "Key is disabled"}))
    });

    let err = Client::connect_with(server.config()).unwrap_err();
    assert!(matches!(err, Error::Auth { .. }), "{err}");
}

#[test]
fn unreachable_host_is_network_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = ClientConfig::new(format!("http://127.0.0.1:{}/", port), Credentials::api_key(API_KEY))
        .with_requires_ssl(false)
        .with_timeout(Duration::from_secs(5));

    let err = Client::connect_with(config).unwrap_err();
    assert!(matches!(err, Error::Network { .. }), "{err}");
    assert!(err.is_retryable());
}

#[test]
fn plain_http_requires_opt_in() {
    let server = StubServer::start();
    let err = Client::connect(&server.url(), Credentials::api_key(API_KEY)).unwrap_err();

    assert!(matches!(err, Error::Config { .. }), "{err}");
    assert!(server.requests().is_empty());
}

#[test]
fn empty_key_is_config_error() {
    let err = Client::connect("https://app.dev.slipo.eu/", Credentials::api_key("   ")).unwrap_err();
    assert!(matches!(err, Error::Config { .. }), "{err}");
}

#[test]
fn sessions_are_independent() {
    let first = StubServer::start();
    let second = StubServer::start();

    let a = first.client();
    let b = second.client();
    assert_ne!(a.session().base_url(), b.session().base_url());

    // Clones share the session.
    let a2 = a.clone();
    assert_eq!(a2.session().base_url(), a.session().base_url());
}

fn assert_send_sync<T: Send + Sync + Clone>() {}

#[test]
fn client_is_shareable_across_threads() {
    assert_send_sync::<Client>();
    assert_send_sync::<slipo::CancellationToken>();
}

#[test]
fn clones_call_concurrently_on_one_session() {
    let server = StubServer::start();
    server.route("GET", "/api/v1/toolkit/profiles", |_| {
        support::StubResponse::ok(serde_json::json!({"transform": ["OSM"]}))
    });
    let client = server.client();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                s.spawn(move || client.operations().profiles())
            })
            .collect();
        for handle in handles {
            let profiles = handle.join().unwrap().unwrap();
            assert_eq!(profiles.for_kind(slipo::OperationKind::Transform), ["OSM"]);
        }
    });

    let requests = server.requests_to("/api/v1/toolkit/profiles");
    assert_eq!(requests.len(), 4);
    assert!(requests.iter().all(|r| r.header("x-api-key") == Some(API_KEY)));
    // Connecting validated the key once; clones reuse the session.
    assert_eq!(server.requests_to("/api/v1/key/validate/").len(), 1);
}
