//! Router fixtures for consult-server tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use consult_core::{
    HmacTokenIssuer, Identity, JwtConfig, JwtIdentityProvider, LifecycleEngine, ManualClock,
    SqliteLifecycleStore,
};
use consult_server::{create_router, ApiState};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const CLIENT: &str = "client-ana";
pub const PROVIDER: &str = "provider-ben";
pub const STRANGER: &str = "stranger-cy";
pub const MEDIA_SECRET: &str = "test-media-secret";

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub engine: LifecycleEngine,
    pub clock: Arc<ManualClock>,
    pub identity: Arc<JwtIdentityProvider>,
    _temp_dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn token(&self, user_id: &str) -> String {
        self.identity.issue_token(&Identity::new(user_id)).unwrap()
    }

    pub fn admin_token(&self, user_id: &str) -> String {
        self.identity
            .issue_token(&Identity::new(user_id).with_role("admin"))
            .unwrap()
    }

    pub fn set_time(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, user_id: &str) -> TestResponse {
        let token = self.token(user_id);
        self.request(Method::GET, uri, Some(&token), None).await
    }

    pub async fn post(&self, uri: &str, user_id: &str, body: Option<Value>) -> TestResponse {
        let token = self.token(user_id);
        self.request(Method::POST, uri, Some(&token), body).await
    }

    /// Create a booking from `CLIENT` with `PROVIDER`, returning its id
    pub async fn book(&self, start: DateTime<Utc>, minutes: i64) -> String {
        let response = self
            .post(
                "/bookings",
                CLIENT,
                Some(serde_json::json!({
                    "provider_id": PROVIDER,
                    "starts_at": start,
                    "duration_minutes": minutes,
                })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }
}

/// Router over a temp-dir SQLite store, clock at 09:00 on the test day
pub async fn create_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let store = Arc::new(SqliteLifecycleStore::new(&db_url).await.unwrap());
    let clock = Arc::new(ManualClock::new(at(9, 0)));
    let transport = Arc::new(HmacTokenIssuer::new(MEDIA_SECRET).unwrap());

    let engine = LifecycleEngine::builder()
        .with_store(store)
        .with_transport(transport)
        .with_clock(clock.clone())
        .build()
        .unwrap();

    let identity = Arc::new(
        JwtIdentityProvider::new(JwtConfig {
            secret: "api-test-secret-0123456789".to_string(),
            ..Default::default()
        })
        .unwrap(),
    );

    let router = create_router(ApiState::new(engine.clone(), identity.clone()));

    TestApp {
        router,
        engine,
        clock,
        identity,
        _temp_dir: temp_dir,
    }
}
