pub mod amount;
pub mod api_client;
pub mod app;
pub mod checkout;
pub mod config;
pub mod donation;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod handlers;
pub mod ledger;
pub mod money;
pub mod notify;
pub mod order_client;
pub mod reconcile;
pub mod service;
pub mod session;

pub use amount::{AmountResolver, AmountSelection, AmountUnit};
pub use app::{build_service, build_service_with, create_app, AppState};
pub use config::Config;
pub use error::{AppError, AppResult, PaymentError, PaymentResult};
pub use flow::controller::{PaymentController, TeardownHandle};
pub use flow::{PaymentPhase, PaymentState, RetryPolicy};
pub use money::{convert_major_to_minor, convert_minor_to_major, MajorAmount};
pub use service::DonationService;
