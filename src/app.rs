use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::amount::AmountResolver;
use crate::config::Config;
use crate::gateway::phonepe::PhonePeGateway;
use crate::gateway::PaymentGateway;
use crate::handlers;
use crate::ledger::{CsvLedger, DisabledLedger, LedgerClock, LedgerSink};
use crate::notify::{EmailNotifier, LogNotifier, Notifier};
use crate::order_client::OrderClient;
use crate::reconcile::{SettlementGuard, VerificationHandler};
use crate::service::DonationService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DonationService>,
}

/// Wires the production collaborators named in `config`.
pub async fn build_service(config: &Config) -> Result<DonationService> {
    let gateway: Arc<dyn PaymentGateway> = Arc::new(PhonePeGateway::new(config.gateway.clone())?);

    let ledger: Arc<dyn LedgerSink> = if config.ledger.enabled {
        info!(directory = %config.ledger.directory, "Recording donations to CSV ledger");
        Arc::new(CsvLedger::new(&config.ledger.directory))
    } else {
        warn!("Ledger disabled, donations will only be logged");
        Arc::new(DisabledLedger)
    };

    let notification = &config.notification;
    let notifier: Arc<dyn Notifier> =
        if notification.enabled && !notification.api_key.is_empty() && !notification.to.is_empty() {
            Arc::new(EmailNotifier::new(notification)?)
        } else {
            warn!("Email notifications not configured");
            Arc::new(LogNotifier)
        };

    build_service_with(config, gateway, ledger, notifier).await
}

pub async fn build_service_with(
    config: &Config,
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn LedgerSink>,
    notifier: Arc<dyn Notifier>,
) -> Result<DonationService> {
    let clock = LedgerClock::new(config.donation.utc_offset_minutes)?;
    let orders = OrderClient::new(
        gateway,
        config.donation.amount_unit,
        config.donation.subunit_ratio,
        config.gateway.redirect_url.clone(),
    );

    let guard = match &config.ledger.journal_path {
        Some(path) => SettlementGuard::with_journal(path).await?,
        None => SettlementGuard::new(),
    };

    let verifier = VerificationHandler::new(
        orders.clone(),
        ledger.clone(),
        notifier.clone(),
        guard,
        clock,
        config.donation.currency_symbol.clone(),
        config.gateway.default_payment_mode.clone(),
    );

    Ok(DonationService::new(
        AmountResolver::from_config(&config.donation),
        orders,
        verifier,
        ledger,
        notifier,
        clock,
        config.donation.currency_symbol.clone(),
    ))
}

pub fn create_app(service: Arc<DonationService>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Online payments
        .route("/api/payments/create-order", post(handlers::create_order))
        .route("/api/payments/verify", post(handlers::verify_payment))
        // Offline forms
        .route("/api/donation", post(handlers::record_donation))
        .route("/api/volunteer", post(handlers::record_volunteer))
        .with_state(AppState { service })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
