use anyhow::{bail, Result};
use serde::Deserialize;

use crate::amount::AmountUnit;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub donation: DonationConfig,
    pub verification: VerificationConfig,
    pub ledger: LedgerConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// OAuth token endpoint (full URL).
    pub auth_url: String,
    /// Base URL of the checkout API, without a trailing slash.
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub client_version: u32,
    /// Where the hosted checkout sends the donor back to.
    pub redirect_url: String,
    pub timeout_seconds: u64,
    /// Label used when the gateway reports no payment mode.
    pub default_payment_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DonationConfig {
    pub preset_amounts: Vec<u64>,
    pub minimum_custom_amount: u64,
    pub amount_unit: AmountUnit,
    /// Minor units per major unit (100 paise to the rupee).
    pub subunit_ratio: u64,
    pub currency_symbol: String,
    /// Offset used for ledger timestamps, in minutes east of UTC.
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub max_elapsed_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub enabled: bool,
    pub directory: String,
    /// Journal of order ids already written to the ledger. Survives restarts.
    pub journal_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub to: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Config {
    /// Loads built-in defaults, then the file named by `CONFIG_PATH` (or
    /// `config.toml` when present), then `DONATIONS__*` environment variables.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let builder = Self::defaults()?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("DONATIONS")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("donation.preset_amounts")
                    .try_parsing(true),
            );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default(
                "gateway.auth_url",
                "https://api-preprod.phonepe.com/apis/pg-sandbox/v1/oauth/token",
            )?
            .set_default("gateway.base_url", "https://api-preprod.phonepe.com/apis/pg-sandbox")?
            .set_default("gateway.client_id", "")?
            .set_default("gateway.client_secret", "")?
            .set_default("gateway.client_version", 1)?
            .set_default("gateway.redirect_url", "http://localhost:3000/contribution?tab=donate")?
            .set_default("gateway.timeout_seconds", 15)?
            .set_default("gateway.default_payment_mode", "PhonePe")?
            .set_default("donation.preset_amounts", vec![500, 1000, 2500, 5000, 10000])?
            .set_default("donation.minimum_custom_amount", 100)?
            .set_default("donation.amount_unit", "major")?
            .set_default("donation.subunit_ratio", 100)?
            .set_default("donation.currency_symbol", "₹")?
            .set_default("donation.utc_offset_minutes", 330)?
            .set_default("verification.poll_interval_ms", 3000)?
            .set_default("verification.max_attempts", 20)?
            .set_default("verification.max_elapsed_seconds", 300)?
            .set_default("ledger.enabled", true)?
            .set_default("ledger.directory", "ledger")?
            .set_default("notification.enabled", false)?
            .set_default("notification.api_url", "https://api.resend.com/emails")?
            .set_default("notification.api_key", "")?
            .set_default("notification.from", "Donations <onboarding@resend.dev>")?
            .set_default("notification.to", "")?
            .set_default("notification.timeout_seconds", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?;
        Ok(builder)
    }

    fn validate(&self) -> Result<()> {
        if self.donation.preset_amounts.is_empty() {
            bail!("donation.preset_amounts must not be empty");
        }
        if self.donation.preset_amounts.contains(&0) {
            bail!("donation.preset_amounts must all be positive");
        }
        if self.donation.minimum_custom_amount == 0 {
            bail!("donation.minimum_custom_amount must be positive");
        }
        if self.donation.subunit_ratio == 0 {
            bail!("donation.subunit_ratio must be positive");
        }
        if self.verification.max_attempts == 0 {
            bail!("verification.max_attempts must be at least 1");
        }
        if self.gateway.timeout_seconds == 0 {
            bail!("gateway.timeout_seconds must be positive");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
