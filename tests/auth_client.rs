mod common;

use std::time::Duration;

use axum::http::StatusCode;
use fitcoin_session::{
    AuthClient, Error, Jwt, MemoryStore, Session, SessionController, UserId, WalletSignature,
};
use serde_json::json;

use common::{TestWallet, config, grant_body, spawn_backend, spawn_slow_backend, unused_socket_url};

fn signature() -> WalletSignature {
    WalletSignature {
        address: "0xabc".into(),
        message: "Welcome".into(),
        signature: "0xsig".into(),
    }
}

#[tokio::test]
async fn oauth_exchange_posts_code_and_verifier() {
    let backend = spawn_backend(StatusCode::OK, grant_body("u-1", "jwt-1")).await;
    let client = AuthClient::new(config(&backend.url, &unused_socket_url()));

    let grant = client
        .exchange_oauth_code("abc123", "xyz", Some(&Jwt::new("old-jwt")))
        .await
        .unwrap();

    assert_eq!(grant.user.id, UserId::from("u-1"));
    assert_eq!(grant.jwt.as_str(), "jwt-1");

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/api/v1/user/xauth");
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer old-jwt"));
    assert_eq!(requests[0].body, json!({"code": "abc123", "code_verifier": "xyz"}));
}

#[tokio::test]
async fn oauth_exchange_without_session_sends_empty_bearer() {
    let backend = spawn_backend(StatusCode::OK, grant_body("u-1", "jwt-1")).await;
    let client = AuthClient::new(config(&backend.url, &unused_socket_url()));

    client.exchange_oauth_code("abc123", "xyz", None).await.unwrap();

    let auth = backend.requests()[0].authorization.clone().unwrap_or_default();
    assert_eq!(auth.trim(), "Bearer");
}

#[tokio::test]
async fn wallet_exchange_posts_signature_without_bearer() {
    let backend = spawn_backend(StatusCode::OK, grant_body("u-2", "jwt-2")).await;
    let client = AuthClient::new(config(&backend.url, &unused_socket_url()));

    let grant = client.exchange_wallet_signature(&signature()).await.unwrap();
    assert_eq!(grant.user.id, UserId::from("u-2"));

    let requests = backend.requests();
    assert_eq!(requests[0].path, "/api/v1/user/metamask-auth");
    assert_eq!(requests[0].authorization, None);
    assert_eq!(
        requests[0].body,
        json!({"address": "0xabc", "message": "Welcome", "signature": "0xsig"})
    );
}

#[tokio::test]
async fn server_error_is_backend_rejected() {
    let backend = spawn_backend(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"})).await;
    let client = AuthClient::new(config(&backend.url, &unused_socket_url()));

    let oauth = client.exchange_oauth_code("abc123", "xyz", None).await;
    assert!(matches!(oauth, Err(Error::BackendRejected { status: 500, .. })), "{oauth:?}");

    let wallet = client.exchange_wallet_signature(&signature()).await;
    assert!(matches!(wallet, Err(Error::BackendRejected { status: 500, .. })), "{wallet:?}");
}

#[tokio::test]
async fn unsuccessful_body_is_malformed() {
    let backend = spawn_backend(StatusCode::OK, json!({"success": false})).await;
    let client = AuthClient::new(config(&backend.url, &unused_socket_url()));

    let oauth = client.exchange_oauth_code("abc123", "xyz", None).await;
    assert!(matches!(oauth, Err(Error::MalformedResponse { .. })), "{oauth:?}");

    let wallet = client.exchange_wallet_signature(&signature()).await;
    assert!(matches!(wallet, Err(Error::MalformedResponse { .. })), "{wallet:?}");
}

#[tokio::test]
async fn slow_backend_times_out() {
    let backend = spawn_slow_backend(
        StatusCode::OK,
        grant_body("u-1", "jwt-1"),
        Duration::from_secs(2),
    )
    .await;
    let client = AuthClient::new(
        config(&backend.url, &unused_socket_url()).with_http_timeout(Duration::from_millis(100)),
    );

    let result = client.exchange_wallet_signature(&signature()).await;
    assert!(matches!(result, Err(Error::Timeout { .. })), "{result:?}");
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let client = AuthClient::new(config(
        &"http://127.0.0.1:9".parse().unwrap(),
        &unused_socket_url(),
    ));
    let result = client.exchange_oauth_code("abc123", "xyz", None).await;
    assert!(matches!(result, Err(Error::Network(_))), "{result:?}");
}

#[tokio::test]
async fn failed_exchanges_leave_stored_session_untouched() {
    let backend = spawn_backend(StatusCode::OK, json!({"success": false})).await;
    let controller =
        SessionController::new(config(&backend.url, &unused_socket_url()), MemoryStore::new());
    let previous = Session::new(Jwt::new("old-jwt"), UserId::from("old-user"));
    controller.store().save(&previous).unwrap();
    controller.restore_session().await.unwrap();

    controller.store().save_code_verifier("xyz").unwrap();
    let oauth = controller.complete_oauth_redirect("abc123").await;
    assert!(matches!(oauth, Err(Error::MalformedResponse { .. })));

    let wallet = controller
        .login_with_wallet(&TestWallet::signing("0xabc", "0xsig"))
        .await;
    assert!(matches!(wallet, Err(Error::MalformedResponse { .. })));

    assert_eq!(controller.store().load().unwrap(), Some(previous.clone()));
    assert_eq!(controller.session().await, Some(previous));
    assert_eq!(controller.user().await, None);
}

#[tokio::test]
async fn declined_wallet_makes_no_backend_call() {
    let backend = spawn_backend(StatusCode::OK, grant_body("u-1", "jwt-1")).await;
    let controller =
        SessionController::new(config(&backend.url, &unused_socket_url()), MemoryStore::new());
    let wallet = TestWallet {
        signature: Err(fitcoin_session::WalletError::Declined),
        ..TestWallet::signing("0xabc", "")
    };

    let result = controller.login_with_wallet(&wallet).await;
    assert!(matches!(result, Err(Error::UserDeclined)));
    assert!(backend.requests().is_empty());
    assert_eq!(controller.store().load().unwrap(), None);
}

#[tokio::test]
async fn fitcoin_and_address_calls_bear_the_session_token() {
    let backend = spawn_backend(StatusCode::OK, json!({})).await;
    let controller =
        SessionController::new(config(&backend.url, &unused_socket_url()), MemoryStore::new());
    controller
        .store()
        .save(&Session::new(Jwt::new("jwt-9"), UserId::from("u-9")))
        .unwrap();
    controller.restore_session().await.unwrap();

    controller.add_fitcoin().await.unwrap();
    let address = controller
        .register_ethereum_address(&TestWallet::signing("0xfeed", "unused"))
        .await
        .unwrap();
    assert_eq!(address, "0xfeed");

    let requests = backend.requests();
    assert_eq!(requests[0].path, "/api/v1/fitcoin");
    assert_eq!(requests[0].body, json!({}));
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer jwt-9"));
    assert_eq!(requests[1].path, "/api/v1/user/ethereum-address");
    assert_eq!(requests[1].body, json!({"address": "0xfeed"}));
    assert_eq!(requests[1].authorization.as_deref(), Some("Bearer jwt-9"));
}
