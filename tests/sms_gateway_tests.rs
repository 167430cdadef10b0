//! 短信网关集成测试
//!
//! 用进程内 mock 网关验证 OAuth 令牌生命周期和发送负载格式：
//! 令牌复用、401 恰好刷新一次并重试一次、二次 401 终态上抛

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use mandate_system::error::AppError;
use mandate_system::sms::{AuthInfos, GatewayClient, SmsGateway};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 进程内 mock 网关的状态
struct MockGateway {
    token_calls: AtomicUsize,
    send_calls: AtomicUsize,
    /// 接下来多少次发送请求返回 401
    unauthorized_sends: AtomicUsize,
    /// 发送端点的响应状态码
    send_status: Mutex<u16>,
    /// 发送端点的响应体
    send_body: Mutex<Value>,
    /// 最近一次发送请求的负载
    last_send_payload: Mutex<Option<Value>>,
    /// 最近一次发送请求的 Authorization 头
    last_authorization: Mutex<Option<String>>,
}

impl MockGateway {
    fn new() -> Arc<Self> {
        Arc::new(MockGateway {
            token_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            unauthorized_sends: AtomicUsize::new(0),
            send_status: Mutex::new(200),
            send_body: Mutex::new(json!({})),
            last_send_payload: Mutex::new(None),
            last_authorization: Mutex::new(None),
        })
    }
}

async fn token_endpoint(State(state): State<Arc<MockGateway>>) -> Json<Value> {
    let n = state.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "access_token": format!("tok-{}", n), "ttl": 3600 }))
}

async fn send_endpoint(
    State(state): State<Arc<MockGateway>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.send_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_send_payload.lock().unwrap() = Some(payload);
    *state.last_authorization.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // 模拟网关侧令牌失效
    if state
        .unauthorized_sends
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }

    let status = StatusCode::from_u16(*state.send_status.lock().unwrap()).unwrap();
    (status, Json(state.send_body.lock().unwrap().clone()))
}

/// 启动 mock 网关，返回其 base URL
async fn start_mock_gateway(state: Arc<MockGateway>) -> String {
    let app = Router::new()
        .route("/oauth2/token", post(token_endpoint))
        .route("/sms/send", post(send_endpoint))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn live_gateway(base_url: &str) -> SmsGateway {
    let auth = AuthInfos {
        username: "svc-mandate".to_string(),
        password: Secret::new("secret".to_string()),
        token_url: format!("{}/oauth2/token", base_url),
    };

    SmsGateway::Live {
        client: GatewayClient::new(auth, 5),
        send_url: format!("{}/sms/send", base_url),
    }
}

#[tokio::test]
async fn test_send_attaches_bearer_and_payload_shape() {
    let mock = MockGateway::new();
    let base_url = start_mock_gateway(mock.clone()).await;
    let gateway = live_gateway(&base_url);

    gateway
        .send_sms("+33612345678", "tag-1", "  hello  ")
        .await
        .unwrap();

    // 负载：纯数字号码、关联标签、去除首尾空白的正文、Unicode 编码
    let payload = mock.last_send_payload.lock().unwrap().clone().unwrap();
    assert_eq!(payload["userIds"], json!(["33612345678"]));
    assert_eq!(payload["correlationId"], "tag-1");
    assert_eq!(payload["message"], "hello");
    assert_eq!(payload["encoding"], "Unicode");

    // Bearer 头携带第一次取到的令牌
    let authorization = mock.last_authorization.lock().unwrap().clone().unwrap();
    assert_eq!(authorization, "Bearer tok-1");

    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.send_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_token_is_cached_across_calls() {
    let mock = MockGateway::new();
    let base_url = start_mock_gateway(mock.clone()).await;
    let gateway = live_gateway(&base_url);

    gateway.send_sms("+33612345678", "tag-1", "one").await.unwrap();
    gateway.send_sms("+33612345678", "tag-2", "two").await.unwrap();

    // 令牌未过期：只取一次
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.send_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_single_401_triggers_exactly_one_refresh_and_retry() {
    let mock = MockGateway::new();
    mock.unauthorized_sends.store(1, Ordering::SeqCst);
    let base_url = start_mock_gateway(mock.clone()).await;
    let gateway = live_gateway(&base_url);

    gateway.send_sms("+33612345678", "tag-1", "hello").await.unwrap();

    // 一次 401 ⇒ 恰好一次刷新 + 一次重试
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 2);
    assert_eq!(mock.send_calls.load(Ordering::SeqCst), 2);

    // 重试使用了刷新后的令牌
    let authorization = mock.last_authorization.lock().unwrap().clone().unwrap();
    assert_eq!(authorization, "Bearer tok-2");
}

#[tokio::test]
async fn test_second_consecutive_401_is_terminal() {
    let mock = MockGateway::new();
    mock.unauthorized_sends.store(10, Ordering::SeqCst);
    let base_url = start_mock_gateway(mock.clone()).await;
    let gateway = live_gateway(&base_url);

    let err = gateway
        .send_sms("+33612345678", "tag-1", "hello")
        .await
        .unwrap_err();

    match err {
        AppError::SmsTransport { status, .. } => assert_eq!(status, 401),
        other => panic!("unexpected error: {:?}", other),
    }

    // 不做第三次尝试
    assert_eq!(mock.send_calls.load(Ordering::SeqCst), 2);
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_error_reason_maps_to_business_error() {
    let mock = MockGateway::new();
    *mock.send_body.lock().unwrap() = json!({
        "errorReason": 21,
        "errorMessage": "invalid recipient",
    });
    let base_url = start_mock_gateway(mock.clone()).await;
    let gateway = live_gateway(&base_url);

    let err = gateway
        .send_sms("+33612345678", "tag-1", "hello")
        .await
        .unwrap_err();

    match err {
        AppError::SmsBusiness { code, message } => {
            assert_eq!(code, 21);
            assert_eq!(message, "invalid recipient");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_error_reason_without_message_uses_default() {
    let mock = MockGateway::new();
    *mock.send_body.lock().unwrap() = json!({ "errorReason": 7 });
    let base_url = start_mock_gateway(mock.clone()).await;
    let gateway = live_gateway(&base_url);

    let err = gateway
        .send_sms("+33612345678", "tag-1", "hello")
        .await
        .unwrap_err();

    match err {
        AppError::SmsBusiness { code, message } => {
            assert_eq!(code, 7);
            assert_eq!(message, "No message given by SMS provider");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_http_failure_maps_to_transport_error() {
    let mock = MockGateway::new();
    *mock.send_status.lock().unwrap() = 503;
    let base_url = start_mock_gateway(mock.clone()).await;
    let gateway = live_gateway(&base_url);

    let err = gateway
        .send_sms("+33612345678", "tag-1", "hello")
        .await
        .unwrap_err();

    match err {
        AppError::SmsTransport { status, .. } => assert_eq!(status, 503),
        other => panic!("unexpected error: {:?}", other),
    }
}
