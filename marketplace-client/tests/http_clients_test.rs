//! Request shapes of the GoTrue and PostgREST clients against a mock
//! backend.

use marketplace_client::config::BackendSettings;
use marketplace_client::models::{OtpType, TokenPair};
use marketplace_client::services::{
    AuthEvent, GoTrueClient, IdentityProvider, PostgrestProfileStore, ProfileStore, SignUpOutcome,
};
use marketplace_client::{AppRole, ProfileError, ProfileRecord, ProviderError};
use reqwest::Client;
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::{body_json, header, headers, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> BackendSettings {
    BackendSettings {
        url: server.uri(),
        anon_key: Secret::new("anon-key".to_string()),
        request_timeout_secs: 5,
    }
}

fn token_body(access_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "refresh_token": "refresh-1",
        "token_type": "bearer",
        "expires_in": 3600,
        "user": {
            "id": "user-1",
            "email": "min@example.com",
            "user_metadata": { "full_name": "Min Park" }
        }
    })
}

#[tokio::test]
async fn pkce_exchange_posts_code_and_verifier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "pkce"))
        .and(header("apikey", "anon-key"))
        .and(body_json(json!({ "auth_code": "abc123", "code_verifier": "verifier" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1")))
        .expect(1)
        .mount(&server)
        .await;

    let client = GoTrueClient::new(Client::new(), &settings(&server));
    let mut feed = client.on_auth_state_change();
    let session = client
        .exchange_code_for_session("abc123", Some("verifier"))
        .await
        .unwrap();

    assert_eq!(session.access_token, "access-1");
    assert_eq!(session.principal.id, "user-1");
    assert_eq!(session.principal.display_name.as_deref(), Some("Min Park"));
    assert_eq!(feed.recv().await.unwrap(), AuthEvent::SignedIn(session));
}

#[tokio::test]
async fn rejected_exchange_carries_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "invalid flow state, no valid flow state found"
        })))
        .mount(&server)
        .await;

    let client = GoTrueClient::new(Client::new(), &settings(&server));
    let err = client
        .exchange_code_for_session("stale", None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ProviderError::Rejected {
            status: 400,
            code: Some("invalid_grant".to_string()),
            message: "invalid flow state, no valid flow state found".to_string(),
        }
    );
}

#[tokio::test]
async fn implicit_tokens_resolve_the_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "user-1",
            "email": "min@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GoTrueClient::new(Client::new(), &settings(&server));
    let session = client
        .set_session(&TokenPair {
            access_token: "at-1".to_string(),
            refresh_token: "rt-1".to_string(),
            expires_at: None,
        })
        .await
        .unwrap();

    assert_eq!(session.refresh_token, "rt-1");
    assert_eq!(session.principal.email.as_deref(), Some("min@example.com"));
}

#[tokio::test]
async fn verify_without_tokens_returns_no_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/verify"))
        .and(body_json(json!({ "type": "signup", "token_hash": "th-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "user-1",
            "email": "min@example.com"
        })))
        .mount(&server)
        .await;

    let client = GoTrueClient::new(Client::new(), &settings(&server));
    let session = client.verify_otp("th-1", OtpType::Signup).await.unwrap();

    assert_eq!(session, None);
}

#[tokio::test]
async fn unauthorized_user_lookup_is_flagged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": 401,
            "msg": "invalid JWT: token is expired"
        })))
        .mount(&server)
        .await;

    let client = GoTrueClient::new(Client::new(), &settings(&server));
    let err = client.get_user("expired").await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(err.to_string(), "invalid JWT: token is expired");
}

#[tokio::test]
async fn sign_up_pending_confirmation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .and(query_param("redirect_to", "http://localhost:3000/auth/callback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "user-1",
            "email": "min@example.com",
            "confirmation_sent_at": "2026-01-01T00:00:00Z"
        })))
        .mount(&server)
        .await;

    let client = GoTrueClient::new(Client::new(), &settings(&server));
    let outcome = client
        .sign_up(
            "min@example.com",
            "correct horse",
            Some("http://localhost:3000/auth/callback"),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SignUpOutcome::ConfirmationPending {
            email: "min@example.com".to_string()
        }
    );
}

#[tokio::test]
async fn sign_out_publishes_event_even_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = GoTrueClient::new(Client::new(), &settings(&server));
    let mut feed = client.on_auth_state_change();

    assert!(client.sign_out("at-1").await.is_err());
    assert_eq!(feed.recv().await.unwrap(), AuthEvent::SignedOut);
}

#[tokio::test]
async fn authorize_url_carries_pkce_challenge() {
    let server = MockServer::start().await;
    let client = GoTrueClient::new(Client::new(), &settings(&server));

    let url = client
        .sign_in_with_oauth("kakao", "http://localhost:3000/auth/callback", "challenge")
        .unwrap();

    assert_eq!(url.path(), "/auth/v1/authorize");
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("provider".to_string(), "kakao".to_string())));
    assert!(pairs.contains(&("code_challenge".to_string(), "challenge".to_string())));
    assert!(pairs.contains(&("code_challenge_method".to_string(), "s256".to_string())));
}

#[tokio::test]
async fn placeholder_upsert_ignores_duplicates() {
    let server = MockServer::start().await;
    let placeholder = ProfileRecord::placeholder("user-1");
    Mock::given(method("POST"))
        .and(path("/rest/v1/exhibitors"))
        .and(query_param("on_conflict", "user_id"))
        .and(headers(
            "Prefer",
            vec!["resolution=ignore-duplicates", "return=representation"],
        ))
        .and(header("authorization", "Bearer at-1"))
        .and(body_json(serde_json::to_value(vec![&placeholder]).unwrap()))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!([{
                "user_id": "user-1",
                "name": null,
                "contact_name": null,
                "email": null,
                "phone": null,
                "website": null,
                "description": null,
                "category": null,
                "avatar_url": null,
                "business_number": null,
                "business_document_url": null,
                "created_at": "2026-01-01T00:00:00Z"
            }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = PostgrestProfileStore::new(Client::new(), &settings(&server));
    let row = store
        .create_placeholder(AppRole::Exhibitor, "user-1", "at-1")
        .await
        .unwrap();

    assert_eq!(row.user_id, "user-1");
    assert!(row.created_at.is_some());
    assert!(!row.is_complete());
}

#[tokio::test]
async fn ignored_duplicate_falls_back_to_existing_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/exhibitors"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/exhibitors"))
        .and(query_param("user_id", "eq.user-1"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "user_id": "user-1",
            "name": "Han River Crafts",
            "contact_name": null,
            "email": null,
            "phone": null,
            "website": null,
            "description": null,
            "category": null,
            "avatar_url": null,
            "business_number": null,
            "business_document_url": null
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let store = PostgrestProfileStore::new(Client::new(), &settings(&server));
    let row = store
        .create_placeholder(AppRole::Exhibitor, "user-1", "at-1")
        .await
        .unwrap();

    assert_eq!(row.name.as_deref(), Some("Han River Crafts"));
}

#[tokio::test]
async fn lookup_failure_is_a_lookup_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/organizers"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = PostgrestProfileStore::new(Client::new(), &settings(&server));
    let err = store
        .find_by_user(AppRole::Organizer, "user-1", "at-1")
        .await
        .unwrap_err();

    assert!(matches!(err, ProfileError::Lookup(_)));
}

#[tokio::test]
async fn registration_upsert_merges_duplicates() {
    let server = MockServer::start().await;
    let mut record = ProfileRecord::placeholder("user-1");
    record.name = Some("Night Market Co".to_string());
    Mock::given(method("POST"))
        .and(path("/rest/v1/organizers"))
        .and(headers(
            "Prefer",
            vec!["resolution=merge-duplicates", "return=representation"],
        ))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::to_value(vec![&record]).unwrap()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = PostgrestProfileStore::new(Client::new(), &settings(&server));
    let saved = store
        .upsert(AppRole::Organizer, &record, "at-1")
        .await
        .unwrap();

    assert_eq!(saved, record);
}

#[tokio::test]
async fn admin_store_calls_are_refused_locally() {
    let server = MockServer::start().await;
    let store = PostgrestProfileStore::new(Client::new(), &settings(&server));

    let err = store
        .find_by_user(AppRole::Admin, "user-1", "at-1")
        .await
        .unwrap_err();

    assert_eq!(err, ProfileError::NoTable(AppRole::Admin));
}
