//! Integration test: run the HTTP API on a free port with the stub
//! transport and drive it with reqwest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wabridge_core::bus::EventBus;
use wabridge_core::phone::PhoneNormalizer;
use wabridge_core::transport::TransportEvent;
use wabridge_hub::api::{self, ApiState};
use wabridge_hub::channels::{StubFactory, StubHandle};
use wabridge_hub::gateway::SendGateway;
use wabridge_hub::manager::{ConnectionManager, ReconnectPolicy};
use wabridge_hub::middleware::RateLimiter;

const TOKEN: &str = "s3cret";

struct Harness {
    base: String,
    client: reqwest::Client,
    stub: StubHandle,
    manager: Arc<ConnectionManager>,
}

async fn start(auto_ready: bool, limiter: RateLimiter) -> Harness {
    let factory = if auto_ready {
        StubFactory::new()
    } else {
        StubFactory::new().manual()
    };
    let stub = factory.handle();
    let manager = ConnectionManager::new(
        Arc::new(factory),
        Arc::new(EventBus::default()),
        ReconnectPolicy::new(Duration::from_millis(50), Duration::from_millis(200)),
    );
    manager.start().await.expect("start manager");

    let state = ApiState {
        manager: manager.clone(),
        gateway: Arc::new(SendGateway::new(manager.clone(), PhoneNormalizer::new("52"))),
        admin_token: TOKEN.to_string(),
        webhook_url: Some("http://backend.local/webhook.php".to_string()),
        started_at: Instant::now(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    let app = api::build_router(state, limiter);
    tokio::spawn(async move {
        let _ = api::serve(listener, app, std::future::pending()).await;
    });

    let harness = Harness {
        base: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        stub,
        manager,
    };
    if auto_ready {
        wait_ready(&harness, true).await;
    }
    harness
}

async fn wait_ready(h: &Harness, ready: bool) {
    for _ in 0..200 {
        if h.manager.current_state().await.is_ready() == ready {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("manager never reached ready={}", ready);
}

async fn get_json(h: &Harness, path: &str) -> (u16, serde_json::Value) {
    let resp = h
        .client
        .get(format!("{}{}", h.base, path))
        .send()
        .await
        .expect("request");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("json body"))
}

#[tokio::test]
async fn status_and_health_report_ready() {
    let h = start(true, RateLimiter::new(1000, 30)).await;

    for path in ["/status", "/health"] {
        let (code, json) = get_json(&h, path).await;
        assert_eq!(code, 200);
        assert_eq!(json["ok"], true);
        assert_eq!(json["status"], "ready");
        assert_eq!(json["ready"], true);
        assert_eq!(json["has_qr"], false);
        assert_eq!(json["webhook_url"], "http://backend.local/webhook.php");
    }
}

#[tokio::test]
async fn send_success_and_validation() {
    let h = start(true, RateLimiter::new(1000, 30)).await;

    let (code, json) = get_json(&h, "/send?phone=5512345678&text=hola").await;
    assert_eq!(code, 200);
    assert_eq!(json["ok"], true);
    assert_eq!(json["sent"], true);
    assert_eq!(json["to"], "525512345678@c.us");
    assert_eq!(json["truncated"], false);

    let resp = h
        .client
        .post(format!("{}/send", h.base))
        .json(&serde_json::json!({ "phone": "+52 55 1234 5678", "text": "desde POST" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let (code, json) = get_json(&h, "/send?phone=123&text=hola").await;
    assert_eq!(code, 400);
    assert_eq!(json["ok"], false);

    let sent = h.stub.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].body, "desde POST");
}

#[tokio::test]
async fn send_before_ready_is_503_and_qr_served() {
    let h = start(false, RateLimiter::new(1000, 30)).await;

    let (code, json) = get_json(&h, "/send?phone=5512345678&text=hola").await;
    assert_eq!(code, 503);
    assert_eq!(json["ok"], false);

    let resp = h.client.get(format!("{}/qr.png", h.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    h.stub.emit(TransportEvent::Qr("2@abc,def,ghi".into())).await;
    for _ in 0..200 {
        if h.manager.snapshot().await.qr.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let resp = h.client.get(format!("{}/qr.png", h.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(&bytes[..4], b"\x89PNG");

    let html = h
        .client
        .get(format!("{}/", h.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(html.contains("data:image/png;base64,"));
    assert!(html.contains("http-equiv=\"refresh\""));
}

#[tokio::test]
async fn admin_endpoints_require_token() {
    let h = start(true, RateLimiter::new(1000, 30)).await;

    let (code, json) = get_json(&h, "/restart").await;
    assert_eq!(code, 401);
    assert_eq!(json["error"], "Unauthorized");

    let (code, _) = get_json(&h, "/logout?token=wrong").await;
    assert_eq!(code, 401);
    assert_eq!(h.stub.logouts(), 0);

    let resp = h
        .client
        .post(format!("{}/restart", h.base))
        .header("x-admin-token", TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    for _ in 0..200 {
        if h.stub.connects() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.stub.connects(), 2);
    assert_eq!(h.stub.releases(), 1);
}

#[tokio::test]
async fn logout_with_query_token() {
    let h = start(true, RateLimiter::new(1000, 30)).await;

    let (code, json) = get_json(&h, &format!("/logout?token={}", TOKEN)).await;
    assert_eq!(code, 200);
    assert_eq!(json["ok"], true);
    assert_eq!(h.stub.logouts(), 1);
}

#[tokio::test]
async fn rate_limit_returns_429() {
    let h = start(true, RateLimiter::new(3, 30)).await;

    for _ in 0..3 {
        let (code, _) = get_json(&h, "/status").await;
        assert_eq!(code, 200);
    }
    let (code, json) = get_json(&h, "/status").await;
    assert_eq!(code, 429);
    assert_eq!(json["ok"], false);
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_bypass_rate_limit() {
    let h = start(true, RateLimiter::new(2, 30)).await;

    let mut codes = Vec::new();
    for i in 0..5 {
        let resp = h
            .client
            .get(format!("{}/status", h.base))
            .header("x-forwarded-for", format!("198.51.100.{}", i))
            .send()
            .await
            .unwrap();
        codes.push(resp.status().as_u16());
    }
    assert_eq!(codes, vec![200, 200, 429, 429, 429]);
}

#[tokio::test]
async fn malformed_send_body_gets_json_error() {
    let h = start(true, RateLimiter::new(1000, 30)).await;

    let resp = h
        .client
        .post(format!("{}/send", h.base))
        .header("content-type", "application/json")
        .body("{\"phone\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let json: serde_json::Value = resp.json().await.expect("json error body");
    assert_eq!(json["ok"], false);
    assert!(json["error"].is_string());
    assert!(h.stub.sent().await.is_empty());
}
