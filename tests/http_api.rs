//! End-to-end tests of the HTTP API over a real socket.

mod common;

use async_trait::async_trait;
use blockip::auth::{Authorizer, ImplicationGraph, Role, RoleSource, RoleSourceError};
use blockip::config::{AuthorizationConfig, BlacklistConfig};
use blockip::http::{self, AppState};
use blockip::rules::RuleEngine;
use blockip::store::MemoryRuleStore;
use chrono::Duration;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Every user's password is "pw"; roles are fixed per user.
struct Directory;

#[async_trait]
impl RoleSource for Directory {
    async fn fetch_roles(
        &self,
        user: &str,
        secret: &str,
    ) -> Result<HashSet<Role>, RoleSourceError> {
        if secret != "pw" {
            return Err(RoleSourceError::BadCredentials);
        }
        let roles: &[&str] = match user {
            "admin" => &[
                "network-blacklister",
                "network-unblacklister",
                "network-whitelister",
                "network-unwhitelister",
                "history-reader",
            ],
            "analyst" => &["blacklister", "unblacklister"],
            "viewer" => &["reader"],
            "directory-down" => return Err(RoleSourceError::Unavailable("timeout".into())),
            _ => return Err(RoleSourceError::BadCredentials),
        };
        Ok(roles.iter().map(|r| Role::from(*r)).collect())
    }
}

struct TestApi {
    base: String,
    client: Client,
}

impl TestApi {
    async fn start() -> Self {
        let clock = common::start_clock();
        let authorization = AuthorizationConfig {
            role_path_template: "cn={role},ou=blockip".into(),
            missing_role_solution: Some("Ask the System team.".into()),
            ..AuthorizationConfig::default()
        };
        let state = Arc::new(AppState {
            engine: RuleEngine::new(Arc::new(MemoryRuleStore::new()), clock.clone()),
            authorizer: Authorizer::new(
                Arc::new(Directory),
                ImplicationGraph::builtin(),
                clock,
                Duration::seconds(600),
            ),
            authorization,
            blacklist: BlacklistConfig::default(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(http::serve(listener, state, std::future::pending()));

        Self {
            base,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        user: Option<&str>,
        form: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut request = self.client.request(method, self.url(path));
        if let Some(user) = user {
            request = request.basic_auth(user, Some("pw"));
        }
        if !form.is_empty() {
            request = request.form(form);
        }
        let response = request.send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn get(&self, path: &str, user: Option<&str>) -> (StatusCode, Value) {
        self.send(reqwest::Method::GET, path, user, &[]).await
    }

    async fn post(&self, path: &str, user: &str, form: &[(&str, &str)]) -> (StatusCode, Value) {
        self.send(reqwest::Method::POST, path, Some(user), form).await
    }

    async fn delete(&self, path: &str, user: &str, form: &[(&str, &str)]) -> (StatusCode, Value) {
        self.send(reqwest::Method::DELETE, path, Some(user), form).await
    }
}

#[tokio::test]
async fn blacklist_lifecycle() {
    let api = TestApi::start().await;

    let (status, body) = api
        .post("/blacklist/203.0.113.5", "analyst", &[("comment", "ssh brute force"), ("for", "1h")])
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body["message"],
        "The IP address 203.0.113.5/32 has been added to the blacklist."
    );
    assert_eq!(body["new_blacklist_entry"]["status"], "ACTIVE");
    assert_eq!(body["new_blacklist_entry"]["created"]["by"], "analyst");
    assert_eq!(body["new_blacklist_entry"]["end"], "2024-05-01 09:00:00+00:00");

    let (status, body) = api
        .post("/blacklist/203.0.113.5", "analyst", &[("comment", "still at it"), ("for", "2h")])
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["superseded_blacklist_entries"][0]["status"], "SUPERSEDED");

    let (status, body) = api.get("/blacklist", Some("viewer")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blacklist_entries"].as_array().unwrap().len(), 1);

    let (status, body) = api
        .delete("/blacklist/203.0.113.5", "analyst", &[("comment", "false positive")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "The IP address 203.0.113.5/32 has been removed from the blacklist."
    );
    assert_eq!(body["removed_blacklist_entries"][0]["nullified"]["comment"], "false positive");

    let (status, body) = api
        .delete("/blacklist/203.0.113.5", "analyst", &[("comment", "again")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("error").is_none());

    let (status, body) = api.get("/history/203.0.113.0/24", Some("admin")).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["type"], "BLACKLIST");
    assert_eq!(history[0]["status"], "SUPERSEDED");
    assert_eq!(history[1]["status"], "CANCELED");
}

#[tokio::test]
async fn network_requests_need_network_roles() {
    let api = TestApi::start().await;

    let (status, body) = api
        .post("/blacklist/10.0.0.0/8", "analyst", &[("comment", "botnet")])
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["message"],
        "You do not have the role cn=network-blacklister,ou=blockip, which is required to access this resource."
    );
    assert_eq!(body["solution"], "Ask the System team.");

    let (status, body) = api
        .post("/blacklist/10.0.0.0/8", "admin", &[("comment", "botnet")])
        .await;
    assert_eq!(status, StatusCode::CREATED);
    // Default duration is eight hours.
    assert_eq!(body["new_blacklist_entry"]["end"], "2024-05-01 16:00:00+00:00");

    let (status, body) = api.get("/blacklist/10.1.2.3", Some("viewer")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blacklist_entries"][0]["address"], "10.0.0.0/8");
}

#[tokio::test]
async fn whitelist_conflicts_are_reported() {
    let api = TestApi::start().await;

    let (status, _) = api
        .post("/whitelist/198.51.100.0/24", "admin", &[("comment", "monitoring")])
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = api
        .post("/blacklist/198.51.100.9", "analyst", &[("comment", "scanner")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], true);
    assert_eq!(body["conflicting_whitelist_entries"][0]["address"], "198.51.100.0/24");
    assert!(body["note"].as_str().unwrap().contains("198.51.100.9/32"));

    let (status, body) = api.get("/whitelist", Some("viewer")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["whitelist_entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn request_errors() {
    let api = TestApi::start().await;

    let (status, body) = api.post("/blacklist/192.0.2.1", "analyst", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["note"].as_str().unwrap().contains("comment"));

    let (status, _) = api
        .post("/blacklist/192.0.2.1/24", "admin", &[("comment", "x")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = api
        .post("/blacklist/not-an-address", "analyst", &[("comment", "x")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = api
        .post(
            "/blacklist/192.0.2.1",
            "analyst",
            &[("comment", "x"), ("for", "1h"), ("until", "2030-01-01")],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], true);

    let (status, body) = api
        .post("/blacklist/192.0.2.1", "analyst", &[("comment", "x"), ("for", "soon")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["note"].as_str().unwrap().contains("P1Y2M3DT4H5M6S"));
}

#[tokio::test]
async fn authentication_failures() {
    let api = TestApi::start().await;

    let response = api
        .client
        .get(api.url("/blacklist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(reqwest::header::WWW_AUTHENTICATE));

    let response = api
        .client
        .get(api.url("/blacklist"))
        .basic_auth("viewer", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = api.get("/history/192.0.2.1", Some("viewer")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], true);

    let (status, body) = api.get("/blacklist", Some("directory-down")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["original_message"], "timeout");
    assert!(body["correlation_id"].is_string());
}
