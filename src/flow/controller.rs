use reqwest::Url;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::{step, Effect, PaymentEvent, PaymentPhase, PaymentState, RetryPolicy, TransitionError};
use crate::amount::AmountResolver;
use crate::api_client::DonationApi;
use crate::checkout::{CheckoutLauncher, CheckoutSignal, LaunchMode, SignalSink};
use crate::donation::{DonationForm, DonationIntent, DonationKind, DonorInfo, MONTHLY_UNAVAILABLE};
use crate::error::{PaymentError, PaymentResult};
use crate::reconcile::{VerifyRequest, VerifyResponse};
use crate::session::{parse_redirect_return, IntentStore};

/// Stops a controller's pending waits from outside the task driving it.
#[derive(Clone)]
pub struct TeardownHandle(Arc<watch::Sender<bool>>);

impl TeardownHandle {
    pub fn teardown(&self) {
        self.0.send_replace(true);
    }
}

async fn until_teardown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives one donor's payment journey.
///
/// All side effects requested by the state machine run here, one at a time.
/// Every wait (order creation, the checkout signal, a status check, the delay
/// between checks) also watches the teardown flag.
pub struct PaymentController {
    api: Arc<dyn DonationApi>,
    store: Arc<dyn IntentStore>,
    launcher: CheckoutLauncher,
    resolver: AmountResolver,
    policy: RetryPolicy,
    state: watch::Sender<PaymentState>,
    history: Vec<PaymentPhase>,
    signal_tx: mpsc::UnboundedSender<CheckoutSignal>,
    signal_rx: mpsc::UnboundedReceiver<CheckoutSignal>,
    teardown_tx: Arc<watch::Sender<bool>>,
    teardown_rx: watch::Receiver<bool>,
}

impl PaymentController {
    pub fn new(
        api: Arc<dyn DonationApi>,
        store: Arc<dyn IntentStore>,
        launcher: CheckoutLauncher,
        resolver: AmountResolver,
        policy: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(PaymentState::Idle);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (teardown_tx, teardown_rx) = watch::channel(false);
        Self {
            api,
            store,
            launcher,
            resolver,
            policy,
            state,
            history: Vec::new(),
            signal_tx,
            signal_rx,
            teardown_tx: Arc::new(teardown_tx),
            teardown_rx,
        }
    }

    pub fn state(&self) -> PaymentState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> PaymentPhase {
        self.state.borrow().phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaymentState> {
        self.state.subscribe()
    }

    /// Phases entered so far, oldest first.
    pub fn history(&self) -> &[PaymentPhase] {
        &self.history
    }

    /// For hosts that deliver checkout callbacks outside the launcher.
    pub fn signal_sink(&self) -> SignalSink {
        SignalSink::new(self.signal_tx.clone())
    }

    pub fn teardown_handle(&self) -> TeardownHandle {
        TeardownHandle(self.teardown_tx.clone())
    }

    pub fn teardown(&self) {
        self.teardown_tx.send_replace(true);
    }

    fn apply(&mut self, event: PaymentEvent) -> Result<Option<Effect>, TransitionError> {
        let current = self.state.borrow().clone();
        let now = tokio::time::Instant::now().into_std();
        let transition = step(&current, event, &self.policy, now)?;

        let to = transition.state.phase();
        debug!(from = %current.phase(), to = %to, "Payment state changed");
        self.history.push(to);
        self.state.send_replace(transition.state);
        Ok(transition.effect)
    }

    /// Resolves the form, creates the order and opens checkout. Validation
    /// failures leave the controller idle.
    pub async fn submit(&mut self, form: &DonationForm) -> PaymentResult<LaunchMode> {
        let phase = self.phase();
        if phase != PaymentPhase::Idle {
            return Err(PaymentError::Validation(format!(
                "A payment is already in progress ({})",
                phase
            )));
        }

        form.validate()?;
        let amount = self
            .resolver
            .resolve_form(&form.amount, form.custom_amount.as_deref())?;
        let donor = form.donor();
        if donor.donation_kind == DonationKind::Monthly {
            return Err(PaymentError::Validation(MONTHLY_UNAVAILABLE.to_string()));
        }

        self.discard_stale_signals();
        let effect = self
            .apply(PaymentEvent::Submit(DonationIntent { donor, amount }))
            .map_err(|e| PaymentError::Validation(e.to_string()))?;
        let launched = self.drive(effect).await;

        match (self.state(), launched) {
            (PaymentState::Failed { error }, _) => Err(error),
            (_, Some(mode)) => Ok(mode),
            (state, None) => Err(PaymentError::OrderCreation(format!(
                "checkout not launched, stopped while {}",
                state.phase()
            ))),
        }
    }

    /// Waits for the embedded checkout to report back, then verifies. Returns
    /// the state the journey ends in, or the current state on teardown.
    pub async fn await_checkout(&mut self) -> PaymentState {
        if self.phase() != PaymentPhase::PaymentPending {
            return self.state();
        }

        let mut teardown = self.teardown_rx.clone();
        let signal = tokio::select! {
            biased;
            _ = until_teardown(&mut teardown) => None,
            signal = self.signal_rx.recv() => signal,
        };
        let Some(signal) = signal else {
            info!("Controller torn down while waiting for checkout");
            return self.state();
        };

        info!(?signal, "Checkout signal received");
        match self.apply(PaymentEvent::Checkout(signal)) {
            Ok(effect) => {
                self.drive(effect).await;
            }
            Err(e) => warn!(error = %e, "Ignoring checkout signal"),
        }
        self.state()
    }

    /// Picks up a journey after the hosted checkout sent the donor back.
    /// Returns `None` when `page_url` is not a checkout return.
    pub async fn resume_from_redirect(&mut self, page_url: &Url) -> Option<PaymentState> {
        let redirect = parse_redirect_return(page_url)?;
        self.launcher.replace_location(redirect.cleaned_url.as_str());
        info!(
            merchant_order_id = %redirect.merchant_order_id,
            "Resuming payment after checkout redirect"
        );

        match self.apply(PaymentEvent::RedirectReturn {
            merchant_order_id: redirect.merchant_order_id,
        }) {
            Ok(effect) => {
                self.drive(effect).await;
            }
            Err(e) => warn!(error = %e, "Ignoring checkout return"),
        }
        Some(self.state())
    }

    /// Drops checkout signals left over from an earlier journey, such as a
    /// widget that reported twice.
    fn discard_stale_signals(&mut self) {
        let mut dropped = 0;
        while let Ok(signal) = self.signal_rx.try_recv() {
            debug!(?signal, "Discarding stale checkout signal");
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Discarded checkout signals from an earlier journey");
        }
    }

    pub fn retry(&mut self) -> Result<(), TransitionError> {
        self.apply(PaymentEvent::Retry).map(|_| ())
    }

    /// Runs effects until the machine stops asking for work or the
    /// controller is torn down.
    async fn drive(&mut self, mut effect: Option<Effect>) -> Option<LaunchMode> {
        let mut launched = None;
        let mut teardown = self.teardown_rx.clone();

        while let Some(current) = effect.take() {
            if *teardown.borrow_and_update() {
                info!(phase = %self.phase(), "Controller torn down, stopping");
                break;
            }

            let event = match current {
                Effect::CreateOrder(intent) => {
                    let result = tokio::select! {
                        biased;
                        _ = until_teardown(&mut teardown) => None,
                        result = self.api.create_order(&intent) => Some(result),
                    };
                    match result {
                        Some(Ok(order)) => PaymentEvent::OrderCreated(order),
                        Some(Err(e)) => PaymentEvent::OrderFailed(e),
                        None => break,
                    }
                }
                Effect::LaunchCheckout { order, donor } => {
                    if let Err(e) = self.store.save(&order.merchant_order_id, &donor).await {
                        warn!(
                            merchant_order_id = %order.merchant_order_id,
                            error = %e,
                            "Could not persist donor details before checkout"
                        );
                    }
                    self.discard_stale_signals();
                    launched = Some(
                        self.launcher
                            .launch(&order.checkout_ref, SignalSink::new(self.signal_tx.clone())),
                    );
                    continue;
                }
                Effect::Verify { merchant_order_id } => {
                    match self.verify_once(&merchant_order_id, &mut teardown).await {
                        Some(result) => PaymentEvent::Verified(result),
                        None => break,
                    }
                }
                Effect::ScheduleVerify {
                    merchant_order_id,
                    delay,
                } => {
                    debug!(%merchant_order_id, ?delay, "Payment pending, checking again later");
                    let slept = tokio::select! {
                        biased;
                        _ = until_teardown(&mut teardown) => false,
                        _ = tokio::time::sleep(delay) => true,
                    };
                    if !slept {
                        break;
                    }
                    match self.verify_once(&merchant_order_id, &mut teardown).await {
                        Some(result) => PaymentEvent::Verified(result),
                        None => break,
                    }
                }
                Effect::Finish { merchant_order_id } => {
                    if let Err(e) = self.store.clear(&merchant_order_id).await {
                        warn!(%merchant_order_id, error = %e, "Could not clear stored donor details");
                    }
                    info!(%merchant_order_id, phase = %self.phase(), "Payment journey finished");
                    continue;
                }
            };

            match self.apply(event) {
                Ok(next) => effect = next,
                Err(e) => {
                    error!(error = %e, "Payment state machine rejected its own event");
                    break;
                }
            }
        }

        if *teardown.borrow() && !self.state.borrow().is_terminal() {
            info!(phase = %self.phase(), "Controller torn down, stopping");
        }
        launched
    }

    async fn verify_once(
        &self,
        merchant_order_id: &str,
        teardown: &mut watch::Receiver<bool>,
    ) -> Option<PaymentResult<VerifyResponse>> {
        let donor_info = match self.store.load(merchant_order_id).await {
            Ok(Some(donor)) => donor,
            Ok(None) => {
                warn!(merchant_order_id, "No stored donor details, verifying without them");
                DonorInfo::default()
            }
            Err(e) => {
                warn!(merchant_order_id, error = %e, "Could not read stored donor details");
                DonorInfo::default()
            }
        };
        let request = VerifyRequest {
            merchant_order_id: merchant_order_id.to_string(),
            donor_info,
        };

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = until_teardown(teardown) => return None,
            result = self.api.verify(&request) => result,
        };
        debug!(
            merchant_order_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Verification round trip"
        );
        Some(result)
    }
}
