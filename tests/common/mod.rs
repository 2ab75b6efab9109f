#![allow(dead_code)]

use axum::{
    extract::{Form, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use donation_payments::checkout::{CheckoutHost, EmbeddedCheckout, SignalSink};
use donation_payments::config::Config;
use donation_payments::gateway::phonepe::PhonePeGateway;
use donation_payments::ledger::CsvLedger;
use donation_payments::notify::MemoryNotifier;
use donation_payments::{build_service_with, DonationService};

pub const FAKE_CLIENT_SECRET: &str = "test-secret";

struct FakeOrder {
    amount: u64,
    states: VecDeque<String>,
    transaction_id: String,
}

#[derive(Default)]
struct Inner {
    script: Vec<String>,
    orders: HashMap<String, FakeOrder>,
    created: Vec<Value>,
    token_requests: usize,
    status_requests: HashMap<String, usize>,
    reject_next: Option<u16>,
}

/// In-process stand-in for the hosted checkout gateway.
#[derive(Clone)]
pub struct FakeGateway {
    inner: Arc<Mutex<Inner>>,
    pub base_url: String,
}

type Reply = (StatusCode, Json<Value>);

impl FakeGateway {
    pub async fn spawn() -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            script: vec!["COMPLETED".to_string()],
            ..Default::default()
        }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let gateway = Self { inner, base_url };

        let app = Router::new()
            .route("/v1/oauth/token", post(token))
            .route("/checkout/v2/pay", post(pay))
            .route("/checkout/v2/order/{id}/status", get(status))
            .with_state(gateway.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        gateway
    }

    /// States reported for orders created from now on. The last state repeats.
    pub fn set_script(&self, states: &[&str]) {
        self.inner.lock().unwrap().script = states.iter().map(|s| s.to_string()).collect();
    }

    /// Registers an order as if it had been created earlier.
    pub fn seed_order(&self, merchant_order_id: &str, amount_minor: u64, transaction_id: &str, states: &[&str]) {
        self.inner.lock().unwrap().orders.insert(
            merchant_order_id.to_string(),
            FakeOrder {
                amount: amount_minor,
                states: states.iter().map(|s| s.to_string()).collect(),
                transaction_id: transaction_id.to_string(),
            },
        );
    }

    /// The next authorized call fails with `status`.
    pub fn reject_next(&self, status: u16) {
        self.inner.lock().unwrap().reject_next = Some(status);
    }

    pub fn token_requests(&self) -> usize {
        self.inner.lock().unwrap().token_requests
    }

    pub fn status_requests(&self, merchant_order_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .status_requests
            .get(merchant_order_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_status_requests(&self) -> usize {
        self.inner.lock().unwrap().status_requests.values().sum()
    }

    pub fn created_orders(&self) -> Vec<Value> {
        self.inner.lock().unwrap().created.clone()
    }
}

fn check_request(headers: &HeaderMap, inner: &mut Inner) -> Option<Reply> {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("O-Bearer tok-"))
        .unwrap_or(false);
    if !authorized {
        return Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": "UNAUTHORIZED", "message": "missing token"})),
        ));
    }
    inner.reject_next.take().map(|code| {
        (
            StatusCode::from_u16(code).unwrap(),
            Json(json!({"code": "REJECTED", "message": "rejected by test"})),
        )
    })
}

async fn token(State(gateway): State<FakeGateway>, Form(form): Form<HashMap<String, String>>) -> Reply {
    let mut inner = gateway.inner.lock().unwrap();
    let valid = form.get("client_secret").map(String::as_str) == Some(FAKE_CLIENT_SECRET)
        && form.get("grant_type").map(String::as_str) == Some("client_credentials");
    if !valid {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": "INVALID_CLIENT", "message": "bad credentials"})),
        );
    }

    inner.token_requests += 1;
    (
        StatusCode::OK,
        Json(json!({
            "access_token": format!("tok-{}", inner.token_requests),
            "token_type": "O-Bearer",
            "expires_at": chrono::Utc::now().timestamp() + 3600
        })),
    )
}

async fn pay(State(gateway): State<FakeGateway>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    let mut inner = gateway.inner.lock().unwrap();
    if let Some(reply) = check_request(&headers, &mut inner) {
        return reply;
    }

    let id = body["merchantOrderId"].as_str().unwrap_or_default().to_string();
    let amount = body["amount"].as_u64().unwrap_or(0);
    if id.is_empty() || amount < 100 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": "BAD_REQUEST", "message": "amount must be at least 100 paise"})),
        );
    }

    let states = inner.script.iter().cloned().collect();
    inner.orders.insert(
        id.clone(),
        FakeOrder {
            amount,
            states,
            transaction_id: format!("TXN_{}", id),
        },
    );
    inner.created.push(body);

    (
        StatusCode::OK,
        Json(json!({
            "orderId": format!("OMO_{}", id),
            "state": "PENDING",
            "expireAt": 0,
            "redirectUrl": format!("https://checkout.fake/pay/{}", id)
        })),
    )
}

async fn status(State(gateway): State<FakeGateway>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    let mut inner = gateway.inner.lock().unwrap();
    if let Some(reply) = check_request(&headers, &mut inner) {
        return reply;
    }
    *inner.status_requests.entry(id.clone()).or_default() += 1;

    let Some(order) = inner.orders.get_mut(&id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"code": "ORDER_NOT_FOUND", "message": "order not found"})),
        );
    };
    let state = if order.states.len() > 1 {
        order.states.pop_front().unwrap()
    } else {
        order.states.front().cloned().unwrap_or_else(|| "COMPLETED".to_string())
    };

    let mut body = json!({
        "orderId": format!("OMO_{}", id),
        "state": state,
        "amount": order.amount
    });
    if state == "COMPLETED" {
        body["paymentDetails"] = json!([{
            "transactionId": order.transaction_id,
            "paymentMode": "UPI_QR",
            "state": "COMPLETED"
        }]);
    }
    (StatusCode::OK, Json(body))
}

pub fn test_config(gateway: &FakeGateway, ledger_dir: &std::path::Path) -> Config {
    let mut config = Config::load_from("tests/no-such-config").unwrap();
    config.gateway.auth_url = format!("{}/v1/oauth/token", gateway.base_url);
    config.gateway.base_url = gateway.base_url.clone();
    config.gateway.client_id = "TEST_CLIENT".into();
    config.gateway.client_secret = FAKE_CLIENT_SECRET.into();
    config.gateway.redirect_url = "https://charity.example/contribution?tab=donate".into();
    config.gateway.timeout_seconds = 5;
    config.ledger.directory = ledger_dir.display().to_string();
    config.verification.poll_interval_ms = 10;
    config.verification.max_attempts = 5;
    config.notification.enabled = false;
    config
}

pub struct Harness {
    pub gateway: FakeGateway,
    pub config: Config,
    pub service: Arc<DonationService>,
    pub ledger: Arc<CsvLedger>,
    pub notifier: Arc<MemoryNotifier>,
    _dir: TempDir,
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
    let gateway = FakeGateway::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&gateway, dir.path());
    tweak(&mut config);

    let ledger = Arc::new(CsvLedger::new(dir.path()));
    let notifier = Arc::new(MemoryNotifier::new());
    let phonepe = Arc::new(PhonePeGateway::new(config.gateway.clone()).unwrap());
    let service = build_service_with(&config, phonepe, ledger.clone(), notifier.clone())
        .await
        .unwrap();

    Harness {
        gateway,
        config,
        service: Arc::new(service),
        ledger,
        notifier,
        _dir: dir,
    }
}

/// Embedded widget that reports `signal` as soon as it opens.
pub struct SignallingWidget(pub &'static str);

impl EmbeddedCheckout for SignallingWidget {
    fn transact(&self, _checkout_ref: &str, on_complete: SignalSink) {
        on_complete.emit(self.0);
    }
}

#[derive(Default)]
pub struct TestHost {
    pub widget: Option<Arc<dyn EmbeddedCheckout>>,
    pub navigated: Mutex<Vec<String>>,
    pub replaced: Mutex<Vec<String>>,
}

impl TestHost {
    pub fn embedded(signal: &'static str) -> Arc<Self> {
        Arc::new(Self {
            widget: Some(Arc::new(SignallingWidget(signal))),
            ..Default::default()
        })
    }

    pub fn redirect_only() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl CheckoutHost for TestHost {
    fn embedded_checkout(&self) -> Option<Arc<dyn EmbeddedCheckout>> {
        self.widget.clone()
    }

    fn navigate(&self, url: &str) {
        self.navigated.lock().unwrap().push(url.to_string());
    }

    fn replace_location(&self, url: &str) {
        self.replaced.lock().unwrap().push(url.to_string());
    }
}
