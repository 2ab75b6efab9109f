use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::gateway::PayerInfo;

/// Shown when a recurring donation reaches the online payment path.
pub const MONTHLY_UNAVAILABLE: &str =
    "Monthly giving is not available online yet. Please choose a one-time donation.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationKind {
    #[default]
    #[serde(rename = "one-time")]
    OneTime,
    #[serde(rename = "monthly")]
    Monthly,
}

impl fmt::Display for DonationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DonationKind::OneTime => write!(f, "one-time"),
            DonationKind::Monthly => write!(f, "monthly"),
        }
    }
}

/// Donor details without the amount. This is the part of a donation that
/// has to survive a full-page redirect to the hosted checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DonorInfo {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, rename = "donationType")]
    pub donation_kind: DonationKind,
}

impl DonorInfo {
    pub fn payer(&self) -> PayerInfo {
        PayerInfo {
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            phone: non_blank(&self.phone),
        }
    }
}

/// A donation ready for order creation: donor details plus the resolved amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DonationIntent {
    #[serde(flatten)]
    #[validate(nested)]
    pub donor: DonorInfo,
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: u64,
}

/// The donation form as the site posts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DonationForm {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// A preset value such as `"1000"`, or `"custom"`.
    #[validate(length(min = 1, message = "Please select a donation amount"))]
    pub amount: String,
    #[serde(default)]
    pub custom_amount: Option<String>,
    #[serde(rename = "donationType")]
    pub donation_kind: DonationKind,
    #[serde(default)]
    pub message: Option<String>,
}

impl DonationForm {
    pub fn donor(&self) -> DonorInfo {
        DonorInfo {
            full_name: self.full_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: non_blank(&self.phone),
            message: non_blank(&self.message),
            donation_kind: self.donation_kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VolunteerApplication {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Skills are required"))]
    pub skills: String,
    #[validate(length(min = 1, message = "Availability is required"))]
    pub availability: String,
    #[validate(length(min = 1, message = "Message is required"))]
    pub message: String,
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
