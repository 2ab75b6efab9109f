//! The donor-side payment journey as an explicit state machine.
//!
//! [`step`] is pure: it takes the current state and an event and returns the
//! next state plus at most one [`Effect`] for the caller to perform. Timers,
//! network calls and storage all live in [`controller::PaymentController`].

use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::checkout::CheckoutSignal;
use crate::config::VerificationConfig;
use crate::donation::{DonationIntent, DonorInfo};
use crate::error::{PaymentError, PaymentResult};
use crate::money::MajorAmount;
use crate::order_client::PaymentOrder;
use crate::reconcile::{VerifyResponse, STATUS_COMPLETED, STATUS_PENDING};

pub mod controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &VerificationConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_attempts,
            max_elapsed: Duration::from_secs(config.max_elapsed_seconds),
        }
    }

    /// True once `attempts` status checks have come back pending and no
    /// further check may be scheduled.
    pub fn exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        attempts >= self.max_attempts || elapsed + self.interval > self.max_elapsed
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 20,
            max_elapsed: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub merchant_order_id: String,
    pub amount: Option<MajorAmount>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentState {
    Idle,
    CreatingOrder {
        intent: DonationIntent,
    },
    PaymentPending {
        order: PaymentOrder,
    },
    Verifying {
        merchant_order_id: String,
        /// Status checks that have come back pending so far.
        attempts: u32,
        started_at: Instant,
    },
    Success(PaymentReceipt),
    Failed {
        error: PaymentError,
    },
    Cancelled,
}

impl PaymentState {
    pub fn phase(&self) -> PaymentPhase {
        match self {
            PaymentState::Idle => PaymentPhase::Idle,
            PaymentState::CreatingOrder { .. } => PaymentPhase::CreatingOrder,
            PaymentState::PaymentPending { .. } => PaymentPhase::PaymentPending,
            PaymentState::Verifying { .. } => PaymentPhase::Verifying,
            PaymentState::Success(_) => PaymentPhase::Success,
            PaymentState::Failed { .. } => PaymentPhase::Failed,
            PaymentState::Cancelled => PaymentPhase::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Success(_) | PaymentState::Failed { .. } | PaymentState::Cancelled
        )
    }

    /// The order the journey is currently bound to, if any.
    pub fn merchant_order_id(&self) -> Option<&str> {
        match self {
            PaymentState::PaymentPending { order } => Some(&order.merchant_order_id),
            PaymentState::Verifying {
                merchant_order_id, ..
            } => Some(merchant_order_id),
            PaymentState::Success(receipt) => Some(&receipt.merchant_order_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentPhase {
    Idle,
    CreatingOrder,
    PaymentPending,
    Verifying,
    Success,
    Failed,
    Cancelled,
}

impl PaymentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPhase::Idle => "idle",
            PaymentPhase::CreatingOrder => "creating_order",
            PaymentPhase::PaymentPending => "payment_pending",
            PaymentPhase::Verifying => "verifying",
            PaymentPhase::Success => "success",
            PaymentPhase::Failed => "failed",
            PaymentPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum PaymentEvent {
    /// Form submitted with an amount that already passed resolution.
    Submit(DonationIntent),
    OrderCreated(PaymentOrder),
    OrderFailed(PaymentError),
    Checkout(CheckoutSignal),
    RedirectReturn { merchant_order_id: String },
    Verified(PaymentResult<VerifyResponse>),
    Retry,
}

impl PaymentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::Submit(_) => "submit",
            PaymentEvent::OrderCreated(_) => "order_created",
            PaymentEvent::OrderFailed(_) => "order_failed",
            PaymentEvent::Checkout(_) => "checkout_signal",
            PaymentEvent::RedirectReturn { .. } => "redirect_return",
            PaymentEvent::Verified(_) => "verification_result",
            PaymentEvent::Retry => "retry",
        }
    }
}

/// Work the controller performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CreateOrder(DonationIntent),
    /// Persist `donor` under the order id, then open checkout.
    LaunchCheckout { order: PaymentOrder, donor: DonorInfo },
    Verify { merchant_order_id: String },
    ScheduleVerify {
        merchant_order_id: String,
        delay: Duration,
    },
    /// Journey over; drop the persisted donor details.
    Finish { merchant_order_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PaymentState,
    pub effect: Option<Effect>,
}

impl Transition {
    fn to(state: PaymentState) -> Self {
        Self { state, effect: None }
    }

    fn with(state: PaymentState, effect: Effect) -> Self {
        Self {
            state,
            effect: Some(effect),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{event} is not accepted while {phase}")]
    NotAccepted {
        phase: PaymentPhase,
        event: &'static str,
    },
}

pub fn step(
    state: &PaymentState,
    event: PaymentEvent,
    policy: &RetryPolicy,
    now: Instant,
) -> Result<Transition, TransitionError> {
    let rejected = |event: &PaymentEvent| TransitionError::NotAccepted {
        phase: state.phase(),
        event: event.name(),
    };

    let transition = match (state, event) {
        (PaymentState::Idle, PaymentEvent::Submit(intent)) if intent.amount > 0 => Transition::with(
            PaymentState::CreatingOrder {
                intent: intent.clone(),
            },
            Effect::CreateOrder(intent),
        ),

        (PaymentState::CreatingOrder { intent }, PaymentEvent::OrderCreated(order)) => Transition::with(
            PaymentState::PaymentPending {
                order: order.clone(),
            },
            Effect::LaunchCheckout {
                order,
                donor: intent.donor.clone(),
            },
        ),

        (PaymentState::CreatingOrder { .. }, PaymentEvent::OrderFailed(error)) => {
            Transition::to(PaymentState::Failed { error })
        }

        (PaymentState::PaymentPending { order }, PaymentEvent::Checkout(signal)) => {
            let merchant_order_id = order.merchant_order_id.clone();
            match signal {
                CheckoutSignal::Concluded => Transition::with(
                    PaymentState::Verifying {
                        merchant_order_id: merchant_order_id.clone(),
                        attempts: 0,
                        started_at: now,
                    },
                    Effect::Verify { merchant_order_id },
                ),
                CheckoutSignal::UserCancel => {
                    Transition::with(PaymentState::Cancelled, Effect::Finish { merchant_order_id })
                }
                CheckoutSignal::Other(raw) => Transition::with(
                    PaymentState::Failed {
                        error: PaymentError::PaymentNotCompleted(format!(
                            "Checkout ended with {}",
                            raw
                        )),
                    },
                    Effect::Finish { merchant_order_id },
                ),
            }
        }

        (
            PaymentState::Idle | PaymentState::PaymentPending { .. },
            PaymentEvent::RedirectReturn { merchant_order_id },
        ) if !merchant_order_id.is_empty() => Transition::with(
            PaymentState::Verifying {
                merchant_order_id: merchant_order_id.clone(),
                attempts: 0,
                started_at: now,
            },
            Effect::Verify { merchant_order_id },
        ),

        (
            PaymentState::Verifying {
                merchant_order_id,
                attempts,
                started_at,
            },
            PaymentEvent::Verified(result),
        ) => {
            let finish = Effect::Finish {
                merchant_order_id: merchant_order_id.clone(),
            };
            match result {
                Ok(response) if response.success && response.status == STATUS_COMPLETED => {
                    Transition::with(
                        PaymentState::Success(PaymentReceipt {
                            merchant_order_id: merchant_order_id.clone(),
                            amount: response.amount,
                            transaction_id: response.transaction_id,
                        }),
                        finish,
                    )
                }
                Ok(response) if response.status == STATUS_PENDING => {
                    let attempts = attempts + 1;
                    if policy.exhausted(attempts, now.saturating_duration_since(*started_at)) {
                        Transition::with(
                            PaymentState::Failed {
                                error: PaymentError::VerificationTimedOut { attempts },
                            },
                            finish,
                        )
                    } else {
                        Transition::with(
                            PaymentState::Verifying {
                                merchant_order_id: merchant_order_id.clone(),
                                attempts,
                                started_at: *started_at,
                            },
                            Effect::ScheduleVerify {
                                merchant_order_id: merchant_order_id.clone(),
                                delay: policy.interval,
                            },
                        )
                    }
                }
                Ok(response) => Transition::with(
                    PaymentState::Failed {
                        error: PaymentError::PaymentNotCompleted(response.message),
                    },
                    finish,
                ),
                Err(error) => Transition::with(PaymentState::Failed { error }, finish),
            }
        }

        (PaymentState::Failed { .. } | PaymentState::Cancelled, PaymentEvent::Retry) => {
            Transition::to(PaymentState::Idle)
        }

        (_, event) => return Err(rejected(&event)),
    };

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(amount: u64) -> DonationIntent {
        DonationIntent {
            donor: DonorInfo {
                full_name: "Asha Verma".into(),
                email: "asha@example.com".into(),
                ..Default::default()
            },
            amount,
        }
    }

    fn order() -> PaymentOrder {
        PaymentOrder {
            merchant_order_id: "DON_1".into(),
            amount_minor: 50_000,
            checkout_ref: "https://checkout.example/DON_1".into(),
        }
    }

    fn verifying(attempts: u32, started_at: Instant) -> PaymentState {
        PaymentState::Verifying {
            merchant_order_id: "DON_1".into(),
            attempts,
            started_at,
        }
    }

    fn response(success: bool, status: &str) -> VerifyResponse {
        VerifyResponse {
            success,
            status: status.into(),
            amount: success.then(|| MajorAmount::from_whole(500)),
            transaction_id: success.then(|| "TXN1".to_string()),
            message: String::new(),
        }
    }

    #[test]
    fn test_happy_path() {
        let policy = RetryPolicy::default();
        let now = Instant::now();

        let t = step(&PaymentState::Idle, PaymentEvent::Submit(intent(500)), &policy, now).unwrap();
        assert_eq!(t.state.phase(), PaymentPhase::CreatingOrder);
        assert_eq!(t.effect, Some(Effect::CreateOrder(intent(500))));

        let t = step(&t.state, PaymentEvent::OrderCreated(order()), &policy, now).unwrap();
        assert_eq!(t.state.phase(), PaymentPhase::PaymentPending);
        assert!(matches!(
            t.effect,
            Some(Effect::LaunchCheckout { ref donor, .. }) if donor.full_name == "Asha Verma"
        ));

        let t = step(&t.state, PaymentEvent::Checkout(CheckoutSignal::Concluded), &policy, now).unwrap();
        assert_eq!(t.state, verifying(0, now));
        assert_eq!(
            t.effect,
            Some(Effect::Verify {
                merchant_order_id: "DON_1".into()
            })
        );

        let t = step(&t.state, PaymentEvent::Verified(Ok(response(true, "COMPLETED"))), &policy, now)
            .unwrap();
        match t.state {
            PaymentState::Success(receipt) => {
                assert_eq!(receipt.amount, Some(MajorAmount::from_whole(500)));
                assert_eq!(receipt.transaction_id.as_deref(), Some("TXN1"));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(matches!(t.effect, Some(Effect::Finish { .. })));
    }

    #[test]
    fn test_cancel_and_other_signals() {
        let policy = RetryPolicy::default();
        let pending = PaymentState::PaymentPending { order: order() };

        let t = step(&pending, PaymentEvent::Checkout(CheckoutSignal::UserCancel), &policy, Instant::now())
            .unwrap();
        assert_eq!(t.state, PaymentState::Cancelled);

        let t = step(
            &pending,
            PaymentEvent::Checkout(CheckoutSignal::Other("PAYMENT_ERROR".into())),
            &policy,
            Instant::now(),
        )
        .unwrap();
        assert_eq!(t.state.phase(), PaymentPhase::Failed);
    }

    #[test]
    fn test_pending_schedules_retry_until_exhausted() {
        let policy = RetryPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 3,
            max_elapsed: Duration::from_secs(60),
        };
        let start = Instant::now();
        let mut state = verifying(0, start);

        for expected in 1..3 {
            let t = step(&state, PaymentEvent::Verified(Ok(response(false, "PENDING"))), &policy, start)
                .unwrap();
            assert_eq!(t.state, verifying(expected, start));
            assert!(matches!(t.effect, Some(Effect::ScheduleVerify { delay, .. }) if delay == policy.interval));
            state = t.state;
        }

        let t = step(&state, PaymentEvent::Verified(Ok(response(false, "PENDING"))), &policy, start).unwrap();
        assert_eq!(
            t.state,
            PaymentState::Failed {
                error: PaymentError::VerificationTimedOut { attempts: 3 }
            }
        );
    }

    #[test]
    fn test_elapsed_budget_ends_polling() {
        let policy = RetryPolicy {
            interval: Duration::from_secs(3),
            max_attempts: 100,
            max_elapsed: Duration::from_secs(10),
        };
        let start = Instant::now();
        let later = start + Duration::from_secs(8);

        let t = step(&verifying(2, start), PaymentEvent::Verified(Ok(response(false, "PENDING"))), &policy, later)
            .unwrap();
        assert_eq!(t.state.phase(), PaymentPhase::Failed);
    }

    #[test]
    fn test_failed_verification_and_network_error() {
        let policy = RetryPolicy::default();
        let now = Instant::now();

        let mut failed = response(false, "FAILED");
        failed.message = "Payment was not successful. Please try again.".into();
        let t = step(&verifying(0, now), PaymentEvent::Verified(Ok(failed)), &policy, now).unwrap();
        assert_eq!(
            t.state,
            PaymentState::Failed {
                error: PaymentError::PaymentNotCompleted(
                    "Payment was not successful. Please try again.".into()
                )
            }
        );

        let err = PaymentError::StatusQuery("connection reset".into());
        let t = step(&verifying(0, now), PaymentEvent::Verified(Err(err.clone())), &policy, now).unwrap();
        assert_eq!(t.state, PaymentState::Failed { error: err });
    }

    #[test]
    fn test_redirect_return_enters_verifying() {
        let policy = RetryPolicy::default();
        let now = Instant::now();
        for from in [PaymentState::Idle, PaymentState::PaymentPending { order: order() }] {
            let t = step(
                &from,
                PaymentEvent::RedirectReturn {
                    merchant_order_id: "DON_1".into(),
                },
                &policy,
                now,
            )
            .unwrap();
            assert_eq!(t.state, verifying(0, now));
        }
    }

    #[test]
    fn test_retry_only_from_failed_or_cancelled() {
        let policy = RetryPolicy::default();
        let now = Instant::now();

        let failed = PaymentState::Failed {
            error: PaymentError::UserCancelled,
        };
        assert_eq!(step(&failed, PaymentEvent::Retry, &policy, now).unwrap().state, PaymentState::Idle);
        assert_eq!(
            step(&PaymentState::Cancelled, PaymentEvent::Retry, &policy, now).unwrap().state,
            PaymentState::Idle
        );
        assert!(step(&verifying(0, now), PaymentEvent::Retry, &policy, now).is_err());
    }

    #[test]
    fn test_invalid_pairs_are_rejected() {
        let policy = RetryPolicy::default();
        let now = Instant::now();

        let err = step(
            &PaymentState::CreatingOrder { intent: intent(500) },
            PaymentEvent::Submit(intent(500)),
            &policy,
            now,
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotAccepted {
                phase: PaymentPhase::CreatingOrder,
                event: "submit"
            }
        );

        assert!(step(&PaymentState::Idle, PaymentEvent::Submit(intent(0)), &policy, now).is_err());
        assert!(step(&PaymentState::Idle, PaymentEvent::Checkout(CheckoutSignal::Concluded), &policy, now).is_err());
        assert!(step(
            &PaymentState::Success(PaymentReceipt {
                merchant_order_id: "DON_1".into(),
                amount: None,
                transaction_id: None,
            }),
            PaymentEvent::RedirectReturn {
                merchant_order_id: "DON_1".into()
            },
            &policy,
            now
        )
        .is_err());
    }
}
