//! Server-side verification of a payment and the one-time bookkeeping that
//! follows a completed one.
//!
//! Verification may be requested many times for the same order: the donor's
//! browser polls, retries after a reload, or comes back through the redirect
//! while the embedded widget is also reporting. The [`SettlementGuard`] makes
//! sure only the first caller to see COMPLETED writes the ledger row and sends
//! the notification.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::donation::DonorInfo;
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{OrderState, OrderStatus};
use crate::ledger::{LedgerClock, LedgerRecord, LedgerSink, Settlement};
use crate::notify::{NotificationEvent, Notifier};
use crate::order_client::{is_valid_merchant_order_id, OrderClient};

pub const STATUS_COMPLETED: &str = "COMPLETED";
pub const STATUS_PENDING: &str = "PENDING";

pub const MESSAGE_COMPLETED: &str = "Payment successful! Thank you for your donation.";
pub const MESSAGE_PENDING: &str = "Payment is still being processed. Please wait.";
pub const MESSAGE_NOT_COMPLETED: &str = "Payment was not successful. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub merchant_order_id: String,
    #[serde(default)]
    pub donor_info: DonorInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<crate::money::MajorAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Recorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the side effects for this order.
    Acquired,
    InProgress,
    AlreadyRecorded,
}

/// Per-order claim table, optionally backed by a journal of recorded ids.
///
/// Every claimed or recorded order id stays in memory for the life of the
/// process, and the journal is loaded whole at startup. That is one short
/// string per settled donation; a deployment that outgrows it needs the
/// journal replaced by an indexed store.
#[derive(Default)]
pub struct SettlementGuard {
    marks: Mutex<HashMap<String, Mark>>,
    journal: Option<PathBuf>,
}

impl SettlementGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads previously recorded order ids from `path`, one per line. A
    /// missing journal starts empty.
    pub async fn with_journal(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut marks = HashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    marks.insert(line.to_string(), Mark::Recorded);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("reading journal {}", path.display()))
            }
        }
        info!(recorded = marks.len(), journal = %path.display(), "Loaded settlement journal");

        Ok(Self {
            marks: Mutex::new(marks),
            journal: Some(path),
        })
    }

    pub async fn claim(&self, merchant_order_id: &str) -> Claim {
        let mut marks = self.marks.lock().await;
        match marks.get(merchant_order_id) {
            Some(Mark::Recorded) => Claim::AlreadyRecorded,
            Some(Mark::InProgress) => Claim::InProgress,
            None => {
                marks.insert(merchant_order_id.to_string(), Mark::InProgress);
                Claim::Acquired
            }
        }
    }

    pub async fn mark_recorded(&self, merchant_order_id: &str) -> Result<()> {
        self.marks
            .lock()
            .await
            .insert(merchant_order_id.to_string(), Mark::Recorded);

        if let Some(path) = &self.journal {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("opening journal {}", path.display()))?;
            file.write_all(format!("{}\n", merchant_order_id).as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }

    /// Gives up a claim so a later verification can try again.
    pub async fn release(&self, merchant_order_id: &str) {
        let mut marks = self.marks.lock().await;
        if marks.get(merchant_order_id) == Some(&Mark::InProgress) {
            marks.remove(merchant_order_id);
        }
    }

    pub async fn is_recorded(&self, merchant_order_id: &str) -> bool {
        self.marks.lock().await.get(merchant_order_id) == Some(&Mark::Recorded)
    }
}

pub struct VerificationHandler {
    orders: OrderClient,
    ledger: Arc<dyn LedgerSink>,
    notifier: Arc<dyn Notifier>,
    guard: SettlementGuard,
    clock: LedgerClock,
    currency_symbol: String,
    default_payment_mode: String,
}

impl VerificationHandler {
    pub fn new(
        orders: OrderClient,
        ledger: Arc<dyn LedgerSink>,
        notifier: Arc<dyn Notifier>,
        guard: SettlementGuard,
        clock: LedgerClock,
        currency_symbol: impl Into<String>,
        default_payment_mode: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            ledger,
            notifier,
            guard,
            clock,
            currency_symbol: currency_symbol.into(),
            default_payment_mode: default_payment_mode.into(),
        }
    }

    pub fn guard(&self) -> &SettlementGuard {
        &self.guard
    }

    pub async fn verify(&self, request: &VerifyRequest) -> PaymentResult<VerifyResponse> {
        let merchant_order_id = request.merchant_order_id.trim();
        if merchant_order_id.is_empty() {
            return Err(PaymentError::Validation("Order ID is required".to_string()));
        }
        if !is_valid_merchant_order_id(merchant_order_id) {
            warn!(merchant_order_id, "Rejecting malformed order id");
            return Err(PaymentError::Validation("Invalid order ID".to_string()));
        }

        let status = self
            .orders
            .get_order_status(merchant_order_id)
            .await
            .inspect_err(|e| error!(merchant_order_id, error = %e, "Order status check failed"))?;

        info!(
            merchant_order_id,
            state = status.state.as_str(),
            "Order status retrieved"
        );

        let response = match &status.state {
            OrderState::Completed => self.settle(merchant_order_id, &request.donor_info, &status).await,
            OrderState::Pending => VerifyResponse {
                success: false,
                status: STATUS_PENDING.to_string(),
                amount: None,
                transaction_id: None,
                message: MESSAGE_PENDING.to_string(),
            },
            other => {
                info!(
                    merchant_order_id,
                    state = other.as_str(),
                    error_code = status.error_code.as_deref().unwrap_or(""),
                    "Payment did not complete"
                );
                VerifyResponse {
                    success: false,
                    status: other.as_str().to_string(),
                    amount: None,
                    transaction_id: None,
                    message: MESSAGE_NOT_COMPLETED.to_string(),
                }
            }
        };

        Ok(response)
    }

    async fn settle(&self, merchant_order_id: &str, donor: &DonorInfo, status: &OrderStatus) -> VerifyResponse {
        let amount = self.orders.convert_minor_to_major(status.amount_minor);
        let transaction_id = status
            .transaction_id
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| status.gateway_order_id.clone())
            .unwrap_or_else(|| merchant_order_id.to_string());
        let payment_mode = status
            .payment_mode
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_payment_mode.clone());

        let record = LedgerRecord {
            timestamp: self.clock.now(),
            full_name: donor.full_name.clone(),
            email: donor.email.clone(),
            phone: donor.phone.clone().unwrap_or_default(),
            amount: amount.to_string(),
            donation_kind: donor.donation_kind,
            message: donor.message.clone().unwrap_or_default(),
            settlement: Some(Settlement {
                transaction_id: transaction_id.clone(),
                payment_mode,
                status: STATUS_COMPLETED.to_string(),
            }),
        };

        match self.guard.claim(merchant_order_id).await {
            Claim::Acquired => {
                if donor.full_name.is_empty() && donor.email.is_empty() {
                    warn!(merchant_order_id, "Recording settlement without donor details");
                }
                let event = NotificationEvent::payment_received(
                    &self.currency_symbol,
                    &amount.grouped(),
                    merchant_order_id,
                    &record,
                );
                self.record_settlement(merchant_order_id, &record, &event).await;
            }
            claim => {
                info!(merchant_order_id, ?claim, "Settlement already handled, skipping side effects");
            }
        }

        VerifyResponse {
            success: true,
            status: STATUS_COMPLETED.to_string(),
            amount: Some(amount),
            transaction_id: Some(transaction_id),
            message: MESSAGE_COMPLETED.to_string(),
        }
    }

    /// Runs the side effects for a claimed order. Failures are logged, never
    /// returned: the donor has paid either way.
    async fn record_settlement(&self, merchant_order_id: &str, record: &LedgerRecord, event: &NotificationEvent) {
        let ledger_result = self.ledger.append_donation(record).await;
        if let Err(e) = &ledger_result {
            let err = PaymentError::ReconciliationSideEffect(format!("ledger append: {:#}", e));
            error!(merchant_order_id, error = %err, "Failed to record donation");
        }

        if let Err(e) = self.notifier.send(event).await {
            let err = PaymentError::ReconciliationSideEffect(format!("notification: {:#}", e));
            error!(merchant_order_id, error = %err, "Failed to send payment notification");
        }

        match ledger_result {
            Ok(()) => {
                if let Err(e) = self.guard.mark_recorded(merchant_order_id).await {
                    let err = PaymentError::ReconciliationSideEffect(format!("journal: {:#}", e));
                    error!(merchant_order_id, error = %err, "Failed to journal settlement");
                }
            }
            Err(_) => self.guard.release(merchant_order_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::AmountUnit;
    use crate::gateway::{GatewayError, MockPaymentGateway};
    use crate::ledger::MemoryLedger;
    use crate::notify::MemoryNotifier;

    fn completed(amount_minor: u64) -> OrderStatus {
        OrderStatus {
            state: OrderState::Completed,
            amount_minor,
            gateway_order_id: Some("OMO1".into()),
            transaction_id: Some("TXN123".into()),
            payment_mode: None,
            error_code: None,
        }
    }

    fn handler(
        gateway: MockPaymentGateway,
        ledger: Arc<MemoryLedger>,
        notifier: Arc<MemoryNotifier>,
    ) -> VerificationHandler {
        let orders = OrderClient::new(Arc::new(gateway), AmountUnit::Major, 100, "https://x.example/");
        VerificationHandler::new(
            orders,
            ledger,
            notifier,
            SettlementGuard::new(),
            LedgerClock::new(330).unwrap(),
            "₹",
            "PhonePe",
        )
    }

    fn request(id: &str) -> VerifyRequest {
        VerifyRequest {
            merchant_order_id: id.into(),
            donor_info: DonorInfo {
                full_name: "Asha Verma".into(),
                email: "asha@example.com".into(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_completed_records_once() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_order_status().returning(|_| Ok(completed(250_000)));
        let ledger = Arc::new(MemoryLedger::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let handler = handler(gateway, ledger.clone(), notifier.clone());

        let first = handler.verify(&request("DON_1")).await.unwrap();
        let second = handler.verify(&request("DON_1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.amount, Some(crate::money::MajorAmount::from_whole(2500)));
        assert_eq!(first.transaction_id.as_deref(), Some("TXN123"));

        let rows = ledger.donations().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, "2500");
        assert_eq!(rows[0].settlement.as_ref().unwrap().payment_mode, "PhonePe");
        assert_eq!(notifier.sent().await.len(), 1);
        assert!(handler.guard().is_recorded("DON_1").await);
    }

    #[tokio::test]
    async fn test_pending_and_failed_have_no_side_effects() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_order_status().returning(|id| {
            let mut status = completed(1_000);
            status.state = if id == "DON_P" {
                OrderState::Pending
            } else {
                OrderState::Failed
            };
            Ok(status)
        });
        let ledger = Arc::new(MemoryLedger::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let handler = handler(gateway, ledger.clone(), notifier.clone());

        let pending = handler.verify(&request("DON_P")).await.unwrap();
        assert!(!pending.success);
        assert_eq!(pending.status, "PENDING");
        assert_eq!(pending.message, MESSAGE_PENDING);

        let failed = handler.verify(&request("DON_F")).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.status, "FAILED");
        assert_eq!(failed.message, MESSAGE_NOT_COMPLETED);

        assert!(ledger.donations().await.is_empty());
        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_order_id_is_validation_error() {
        let handler = handler(
            MockPaymentGateway::new(),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryNotifier::new()),
        );
        let err = handler.verify(&request("  ")).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_malformed_order_id_never_reaches_gateway() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_order_status().never();
        let handler = handler(gateway, Arc::new(MemoryLedger::new()), Arc::new(MemoryNotifier::new()));

        for id in ["DON_1/../x", "a/../../v2/pay", "DON_1?x=1", "DON_1#frag"] {
            let err = handler.verify(&request(id)).await.unwrap_err();
            assert_eq!(err, PaymentError::Validation("Invalid order ID".into()), "{}", id);
        }
    }

    #[tokio::test]
    async fn test_gateway_error_is_status_query() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_order_status()
            .returning(|_| Err(GatewayError::Transport("connection reset".into())));
        let handler = handler(gateway, Arc::new(MemoryLedger::new()), Arc::new(MemoryNotifier::new()));

        let err = handler.verify(&request("DON_1")).await.unwrap_err();
        assert!(matches!(err, PaymentError::StatusQuery(_)));
    }

    #[tokio::test]
    async fn test_guard_release_allows_reclaim() {
        let guard = SettlementGuard::new();
        assert_eq!(guard.claim("DON_1").await, Claim::Acquired);
        assert_eq!(guard.claim("DON_1").await, Claim::InProgress);
        guard.release("DON_1").await;
        assert_eq!(guard.claim("DON_1").await, Claim::Acquired);
        guard.mark_recorded("DON_1").await.unwrap();
        guard.release("DON_1").await;
        assert_eq!(guard.claim("DON_1").await, Claim::AlreadyRecorded);
    }

    #[tokio::test]
    async fn test_journal_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("settled.log");

        let guard = SettlementGuard::with_journal(&path).await.unwrap();
        assert_eq!(guard.claim("DON_7").await, Claim::Acquired);
        guard.mark_recorded("DON_7").await.unwrap();

        let reopened = SettlementGuard::with_journal(&path).await.unwrap();
        assert_eq!(reopened.claim("DON_7").await, Claim::AlreadyRecorded);
        assert_eq!(reopened.claim("DON_8").await, Claim::Acquired);
    }
}
