//! Resolution of the donation amount from the donation form.
//!
//! The form offers a fixed set of preset amounts plus a "custom" option with a
//! free-text value. Resolution is pure and happens before any network call.

use serde::{Deserialize, Serialize};

use crate::config::DonationConfig;
use crate::error::{PaymentError, PaymentResult};

/// Form value that selects the custom amount field.
pub const CUSTOM_SELECTION: &str = "custom";

/// Unit the donor-facing amount is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountUnit {
    Major,
    Minor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountSelection {
    Preset(u64),
    Custom(String),
}

impl AmountSelection {
    /// Builds a selection from the raw `amount` / `customAmount` form fields.
    pub fn from_form(amount: &str, custom_amount: Option<&str>) -> PaymentResult<Self> {
        let amount = amount.trim();
        if amount.eq_ignore_ascii_case(CUSTOM_SELECTION) {
            return Ok(AmountSelection::Custom(
                custom_amount.unwrap_or_default().trim().to_string(),
            ));
        }

        amount
            .parse::<u64>()
            .map(AmountSelection::Preset)
            .map_err(|_| PaymentError::Validation("Please select a donation amount".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct AmountResolver {
    presets: Vec<u64>,
    minimum_custom: u64,
    unit: AmountUnit,
}

impl AmountResolver {
    pub fn new(presets: Vec<u64>, minimum_custom: u64, unit: AmountUnit) -> Self {
        Self {
            presets,
            minimum_custom,
            unit,
        }
    }

    pub fn from_config(config: &DonationConfig) -> Self {
        Self::new(
            config.preset_amounts.clone(),
            config.minimum_custom_amount,
            config.amount_unit,
        )
    }

    pub fn unit(&self) -> AmountUnit {
        self.unit
    }

    pub fn minimum_custom(&self) -> u64 {
        self.minimum_custom
    }

    pub fn presets(&self) -> &[u64] {
        &self.presets
    }

    pub fn resolve(&self, selection: &AmountSelection) -> PaymentResult<u64> {
        match selection {
            AmountSelection::Preset(amount) => {
                if self.presets.contains(amount) {
                    Ok(*amount)
                } else {
                    Err(PaymentError::Validation(format!(
                        "{} is not one of the offered amounts",
                        amount
                    )))
                }
            }
            AmountSelection::Custom(raw) => {
                if raw.is_empty() {
                    return Err(PaymentError::Validation("Please enter an amount".to_string()));
                }
                let amount = raw.parse::<u64>().map_err(|_| {
                    PaymentError::Validation("Please enter a whole number amount".to_string())
                })?;
                self.check_minimum(amount)
            }
        }
    }

    pub fn resolve_form(&self, amount: &str, custom_amount: Option<&str>) -> PaymentResult<u64> {
        self.resolve(&AmountSelection::from_form(amount, custom_amount)?)
    }

    /// Re-checks an amount that was resolved elsewhere (e.g. by the donor's
    /// browser). Presets always pass; anything else must meet the minimum.
    pub fn validate_resolved(&self, amount: u64) -> PaymentResult<u64> {
        if self.presets.contains(&amount) {
            return Ok(amount);
        }
        self.check_minimum(amount)
    }

    fn check_minimum(&self, amount: u64) -> PaymentResult<u64> {
        if amount < self.minimum_custom {
            return Err(PaymentError::Validation(format!(
                "Minimum donation is {}",
                self.minimum_custom
            )));
        }
        Ok(amount)
    }
}
