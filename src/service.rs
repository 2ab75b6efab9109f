use std::sync::Arc;
use tracing::{error, info};
use validator::Validate;

use crate::amount::{AmountResolver, AmountUnit};
use crate::donation::{
    DonationForm, DonationIntent, DonationKind, VolunteerApplication, MONTHLY_UNAVAILABLE,
};
use crate::error::{PaymentError, PaymentResult};
use crate::ledger::{LedgerClock, LedgerRecord, LedgerSink, VolunteerRecord};
use crate::money::MajorAmount;
use crate::notify::{NotificationEvent, Notifier};
use crate::order_client::{OrderClient, PaymentOrder};
use crate::reconcile::{VerificationHandler, VerifyRequest, VerifyResponse};

pub const INTENT_RECORDED_MESSAGE: &str =
    "Thank you for your generosity! We'll contact you shortly with payment details.";
pub const VOLUNTEER_RECORDED_MESSAGE: &str =
    "Thank you for applying! We'll get back to you soon.";

/// Everything the HTTP layer needs to run a donation.
pub struct DonationService {
    resolver: AmountResolver,
    orders: OrderClient,
    verifier: VerificationHandler,
    ledger: Arc<dyn LedgerSink>,
    notifier: Arc<dyn Notifier>,
    clock: LedgerClock,
    currency_symbol: String,
}

impl DonationService {
    pub fn new(
        resolver: AmountResolver,
        orders: OrderClient,
        verifier: VerificationHandler,
        ledger: Arc<dyn LedgerSink>,
        notifier: Arc<dyn Notifier>,
        clock: LedgerClock,
        currency_symbol: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            orders,
            verifier,
            ledger,
            notifier,
            clock,
            currency_symbol: currency_symbol.into(),
        }
    }

    pub fn resolver(&self) -> &AmountResolver {
        &self.resolver
    }

    pub fn gateway_name(&self) -> &str {
        self.orders.gateway_name()
    }

    /// Creates a gateway order for a donation whose amount was resolved by
    /// the donor's page. The amount is checked again here.
    pub async fn create_order(&self, intent: &DonationIntent) -> PaymentResult<PaymentOrder> {
        intent.validate()?;
        if intent.donor.donation_kind == DonationKind::Monthly {
            return Err(PaymentError::Validation(MONTHLY_UNAVAILABLE.to_string()));
        }
        let amount = self.resolver.validate_resolved(intent.amount)?;

        info!(amount, email = %intent.donor.email, "Creating donation order");
        self.orders.create_order(amount, intent.donor.payer()).await
    }

    fn to_major(&self, amount: u64) -> MajorAmount {
        match self.resolver.unit() {
            AmountUnit::Major => MajorAmount::from_whole(amount),
            AmountUnit::Minor => self.orders.convert_minor_to_major(amount),
        }
    }

    pub async fn verify(&self, request: &VerifyRequest) -> PaymentResult<VerifyResponse> {
        self.verifier.verify(request).await
    }

    /// Records a pledge made through the offline donation form.
    pub async fn record_intent(&self, form: &DonationForm) -> PaymentResult<&'static str> {
        form.validate()?;
        let amount = self
            .resolver
            .resolve_form(&form.amount, form.custom_amount.as_deref())?;
        let donor = form.donor();
        let major = self.to_major(amount);

        let record = LedgerRecord {
            timestamp: self.clock.now(),
            full_name: donor.full_name,
            email: donor.email,
            phone: donor.phone.unwrap_or_default(),
            amount: major.to_string(),
            donation_kind: donor.donation_kind,
            message: donor.message.unwrap_or_default(),
            settlement: None,
        };

        if let Err(e) = self.ledger.append_donation(&record).await {
            error!(error = %format!("{:#}", e), "Failed to record donation intent");
        }

        let event = NotificationEvent::donation_intent(
            &self.currency_symbol,
            &major.grouped(),
            &record,
        );
        if let Err(e) = self.notifier.send(&event).await {
            error!(error = %format!("{:#}", e), "Failed to send donation intent notification");
        }

        info!(amount, kind = %record.donation_kind, "Donation intent recorded");
        Ok(INTENT_RECORDED_MESSAGE)
    }

    pub async fn record_volunteer(&self, application: &VolunteerApplication) -> PaymentResult<&'static str> {
        application.validate()?;

        let record = VolunteerRecord {
            timestamp: self.clock.now(),
            full_name: application.full_name.trim().to_string(),
            email: application.email.trim().to_string(),
            phone: application.phone.trim().to_string(),
            skills: application.skills.trim().to_string(),
            availability: application.availability.trim().to_string(),
            message: application.message.trim().to_string(),
        };

        if let Err(e) = self.ledger.append_volunteer(&record).await {
            error!(error = %format!("{:#}", e), "Failed to record volunteer application");
        }
        if let Err(e) = self.notifier.send(&NotificationEvent::volunteer(&record)).await {
            error!(error = %format!("{:#}", e), "Failed to send volunteer notification");
        }

        info!(email = %record.email, "Volunteer application recorded");
        Ok(VOLUNTEER_RECORDED_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::donation::DonorInfo;
    use crate::gateway::{GatewayOrder, MockPaymentGateway, OrderState};
    use crate::ledger::MemoryLedger;
    use crate::notify::MemoryNotifier;
    use crate::reconcile::SettlementGuard;

    struct Fixture {
        service: DonationService,
        ledger: Arc<MemoryLedger>,
        notifier: Arc<MemoryNotifier>,
    }

    fn fixture(gateway: MockPaymentGateway) -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = LedgerClock::new(330).unwrap();
        let orders = OrderClient::new(Arc::new(gateway), AmountUnit::Major, 100, "https://x.example/");
        let verifier = VerificationHandler::new(
            orders.clone(),
            ledger.clone(),
            notifier.clone(),
            SettlementGuard::new(),
            clock,
            "₹",
            "PhonePe",
        );
        let service = DonationService::new(
            AmountResolver::new(vec![500, 1000, 2500, 5000, 10000], 100, AmountUnit::Major),
            orders,
            verifier,
            ledger.clone(),
            notifier.clone(),
            clock,
            "₹",
        );
        Fixture {
            service,
            ledger,
            notifier,
        }
    }

    fn intent(amount: u64, kind: DonationKind) -> DonationIntent {
        DonationIntent {
            donor: DonorInfo {
                full_name: "Asha Verma".into(),
                email: "asha@example.com".into(),
                donation_kind: kind,
                ..Default::default()
            },
            amount,
        }
    }

    #[tokio::test]
    async fn test_create_order_rechecks_amount() {
        let f = fixture(MockPaymentGateway::new());
        let err = f.service.create_order(&intent(50, DonationKind::OneTime)).await.unwrap_err();
        assert_eq!(err, PaymentError::Validation("Minimum donation is 100".into()));
    }

    #[tokio::test]
    async fn test_monthly_is_rejected_before_gateway() {
        let f = fixture(MockPaymentGateway::new());
        let err = f.service.create_order(&intent(500, DonationKind::Monthly)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_order_accepts_custom_amount() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_order().times(1).returning(|req| {
            Ok(GatewayOrder {
                gateway_order_id: "OMO9".into(),
                checkout_ref: format!("https://checkout.example/{}", req.merchant_order_id),
                state: OrderState::Pending,
            })
        });
        let f = fixture(gateway);

        let order = f.service.create_order(&intent(750, DonationKind::OneTime)).await.unwrap();
        assert_eq!(order.amount_minor, 75_000);
    }

    #[tokio::test]
    async fn test_record_intent_writes_row_without_gateway_columns() {
        let f = fixture(MockPaymentGateway::new());
        let form = DonationForm {
            full_name: "Ravi Kumar".into(),
            email: "ravi@example.com".into(),
            phone: Some("9800000000".into()),
            amount: "custom".into(),
            custom_amount: Some("1200".into()),
            donation_kind: DonationKind::Monthly,
            message: None,
        };

        let message = f.service.record_intent(&form).await.unwrap();
        assert_eq!(message, INTENT_RECORDED_MESSAGE);

        let rows = f.ledger.donations().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, "1200");
        assert_eq!(rows[0].settlement, None);
        assert_eq!(rows[0].row()[5], "monthly");

        let sent = f.notifier.sent().await;
        assert_eq!(sent[0].subject, "New Donation Intent: ₹1,200 from Ravi Kumar");
    }

    #[tokio::test]
    async fn test_record_intent_rejects_small_custom_amount() {
        let f = fixture(MockPaymentGateway::new());
        let form = DonationForm {
            full_name: "Ravi Kumar".into(),
            email: "ravi@example.com".into(),
            phone: None,
            amount: "custom".into(),
            custom_amount: Some("99".into()),
            donation_kind: DonationKind::OneTime,
            message: None,
        };

        assert!(f.service.record_intent(&form).await.is_err());
        assert!(f.ledger.donations().await.is_empty());
    }

    #[tokio::test]
    async fn test_record_volunteer() {
        let f = fixture(MockPaymentGateway::new());
        let application = VolunteerApplication {
            full_name: "Meera".into(),
            email: "meera@example.com".into(),
            phone: "9800000000".into(),
            skills: "Teaching".into(),
            availability: "Weekends".into(),
            message: "Happy to help".into(),
        };

        f.service.record_volunteer(&application).await.unwrap();
        assert_eq!(f.ledger.volunteers().await.len(), 1);
        assert_eq!(
            f.notifier.sent().await[0].subject,
            "New Volunteer Application: Meera"
        );
    }
}
