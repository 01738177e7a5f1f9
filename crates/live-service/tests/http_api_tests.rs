//! HTTP API tests through a real server on a local port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::jwt::UserClaims;
use live_test_utils::{sign_user_claims, user_token, TestLiveServer};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

async fn create_session(
    client: &Client,
    server: &TestLiveServer,
    token: &str,
    is_public: bool,
) -> Result<Value, anyhow::Error> {
    let response = client
        .post(format!("{}/api/v1/live/sessions", server.url()))
        .bearer_auth(token)
        .json(&json!({
            "name": "Morning Coffee",
            "source_type": "playlist",
            "source_id": "1001",
            "is_public": is_public,
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await?;
    Ok(body["session"].clone())
}

#[tokio::test]
async fn test_requests_without_identity_are_rejected() -> Result<(), anyhow::Error> {
    let server = TestLiveServer::spawn().await?;
    let client = Client::new();

    let response = client
        .get(format!("{}/api/v1/live/sessions/public", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    let forged = sign_user_claims(&UserClaims::new(1, "mallory"), "some-other-secret-entirely");
    let response = client
        .get(format!("{}/api/v1/live/sessions/public", server.url()))
        .bearer_auth(forged)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_public_session_flow() -> Result<(), anyhow::Error> {
    let server = TestLiveServer::spawn().await?;
    let client = Client::new();
    let host = user_token(1, "dj");
    let listener = user_token(2, "Ana");

    let session = create_session(&client, &server, &host, true).await?;
    let id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["is_active"], true);
    assert_eq!(session["host_display_name"], "dj");
    assert_eq!(session["source_type"], "playlist");

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/join", server.url()))
        .bearer_auth(&listener)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["message"], "Ana joined session");

    let response = client
        .get(format!("{}/api/v1/live/sessions/public", server.url()))
        .bearer_auth(&listener)
        .send()
        .await?;
    let listed: Value = response.json().await?;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["participants"].as_array().unwrap().len(), 2);

    let response = client
        .get(format!("{}/api/v1/live/sessions/me", server.url()))
        .bearer_auth(&listener)
        .send()
        .await?;
    let mine: Value = response.json().await?;
    assert_eq!(mine[0]["id"], id.as_str());

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/leave", server.url()))
        .bearer_auth(&host)
        .send()
        .await?;
    let body: Value = response.json().await?;
    assert_eq!(body["session_ended"], false);

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/leave", server.url()))
        .bearer_auth(&listener)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["session_ended"], true);

    let response = client
        .get(format!("{}/api/v1/live/sessions/hosted", server.url()))
        .bearer_auth(&host)
        .send()
        .await?;
    let hosted: Value = response.json().await?;
    assert_eq!(hosted[0]["is_active"], false);
    assert!(hosted[0]["ended_at"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_private_session_invite_flow() -> Result<(), anyhow::Error> {
    let server = TestLiveServer::spawn().await?;
    let client = Client::new();
    let host = user_token(1, "dj");
    let guest = user_token(2, "b");

    let session = create_session(&client, &server, &host, false).await?;
    let id = session["id"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/join", server.url()))
        .bearer_auth(&guest)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .get(format!("{}/api/v1/live/sessions/{id}", server.url()))
        .bearer_auth(&guest)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Only the host mints invites.
    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/invites", server.url()))
        .bearer_auth(&guest)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/invites", server.url()))
        .bearer_auth(&host)
        .json(&json!({ "ttl_seconds": 1800 }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let invite: Value = response.json().await?;
    assert_eq!(invite["session_id"], id.as_str());
    let token = invite["token"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/v1/live/invites/{token}/join", server.url()))
        .bearer_auth(&guest)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["session_id"], id.as_str());
    assert_eq!(body["user_id"], 2);

    let response = client
        .get(format!("{}/api/v1/live/sessions/{id}", server.url()))
        .bearer_auth(&guest)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .patch(format!("{}/api/v1/live/sessions/{id}/end", server.url()))
        .bearer_auth(&host)
        .send()
        .await?;
    let body: Value = response.json().await?;
    assert_eq!(body["message"], "Session ended successfully.");

    let response = client
        .patch(format!("{}/api/v1/live/sessions/{id}/end", server.url()))
        .bearer_auth(&host)
        .send()
        .await?;
    let body: Value = response.json().await?;
    assert_eq!(body["message"], "Session is already inactive.");

    let response = client
        .post(format!("{}/api/v1/live/invites/{token}/join", server.url()))
        .bearer_auth(user_token(3, "c"))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["message"], "Session is no longer active");

    Ok(())
}

#[tokio::test]
async fn test_visibility_and_bad_input() -> Result<(), anyhow::Error> {
    let server = TestLiveServer::spawn().await?;
    let client = Client::new();
    let host = user_token(1, "dj");

    let session = create_session(&client, &server, &host, false).await?;
    let id = session["id"].as_str().unwrap().to_string();

    let response = client
        .patch(format!("{}/api/v1/live/sessions/{id}/visibility", server.url()))
        .bearer_auth(&host)
        .json(&json!({ "is_public": true }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["session"]["is_public"], true);

    let response = client
        .patch(format!("{}/api/v1/live/sessions/{id}/visibility", server.url()))
        .bearer_auth(&host)
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("{}/api/v1/live/sessions/not-a-uuid/join", server.url()))
        .bearer_auth(&host)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let response = client
        .post(format!("{}/api/v1/live/sessions", server.url()))
        .bearer_auth(&host)
        .json(&json!({ "name": "No source" }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/invites", server.url()))
        .bearer_auth(&host)
        .json(&json!({ "ttl_seconds": -5 }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_malformed_optional_bodies_are_rejected() -> Result<(), anyhow::Error> {
    let server = TestLiveServer::spawn().await?;
    let client = Client::new();
    let host = user_token(1, "dj");
    let guest = user_token(2, "b");

    let session = create_session(&client, &server, &host, false).await?;
    let id = session["id"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/join", server.url()))
        .bearer_auth(&guest)
        .json(&json!({ "invite_token": 5 }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/invites", server.url()))
        .bearer_auth(&host)
        .header("content-type", "application/json")
        .body("{\"ttl_seconds\": ")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/invites", server.url()))
        .bearer_auth(&host)
        .json(&json!({ "ttl_seconds": "soon" }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // No body at all still means defaults.
    let response = client
        .post(format!("{}/api/v1/live/sessions/{id}/invites", server.url()))
        .bearer_auth(&host)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() -> Result<(), anyhow::Error> {
    let server = TestLiveServer::spawn().await?;
    let response = reqwest::get(format!("{}/metrics", server.url())).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
