use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::NotificationConfig;
use crate::ledger::{LedgerRecord, VolunteerRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub subject: String,
    pub html: String,
}

impl NotificationEvent {
    /// A payment the gateway reported as completed.
    pub fn payment_received(
        currency: &str,
        grouped_amount: &str,
        merchant_order_id: &str,
        record: &LedgerRecord,
    ) -> Self {
        let (transaction_id, payment_mode) = record
            .settlement
            .as_ref()
            .map(|s| (s.transaction_id.as_str(), s.payment_mode.as_str()))
            .unwrap_or_default();
        let amount = format!("{}{}", currency, grouped_amount);

        let rows = [
            ("Name", record.full_name.as_str()),
            ("Email", record.email.as_str()),
            ("Phone", or_dash(&record.phone)),
            ("Amount", amount.as_str()),
            ("Transaction ID", transaction_id),
            ("Order ID", merchant_order_id),
            ("Payment Mode", payment_mode),
            ("Message", or_dash(&record.message)),
            ("Time", record.timestamp.as_str()),
        ];

        Self {
            subject: format!(
                "Payment Received: {}{} from {}",
                currency, grouped_amount, record.full_name
            ),
            html: render("Payment received", &rows),
        }
    }

    /// A donation the donor has pledged but not paid online.
    pub fn donation_intent(currency: &str, grouped_amount: &str, record: &LedgerRecord) -> Self {
        let kind = record.donation_kind.to_string();
        let amount = format!("{}{}", currency, grouped_amount);
        let rows = [
            ("Name", record.full_name.as_str()),
            ("Email", record.email.as_str()),
            ("Phone", or_dash(&record.phone)),
            ("Amount", amount.as_str()),
            ("Type", kind.as_str()),
            ("Message", or_dash(&record.message)),
            ("Time", record.timestamp.as_str()),
        ];

        Self {
            subject: format!(
                "New Donation Intent: {}{} from {}",
                currency, grouped_amount, record.full_name
            ),
            html: render("New donation intent", &rows),
        }
    }

    pub fn volunteer(record: &VolunteerRecord) -> Self {
        let rows = [
            ("Name", record.full_name.as_str()),
            ("Email", record.email.as_str()),
            ("Phone", record.phone.as_str()),
            ("Skills/Background", record.skills.as_str()),
            ("Availability", record.availability.as_str()),
            ("Message", record.message.as_str()),
            ("Time", record.timestamp.as_str()),
        ];

        Self {
            subject: format!("New Volunteer Application: {}", record.full_name),
            html: render("New volunteer application", &rows),
        }
    }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn render(title: &str, rows: &[(&str, &str)]) -> String {
    let mut html = format!("<h2>{}</h2><table>", escape_html(title));
    for (label, value) in rows {
        html.push_str(&format!(
            "<tr><td><strong>{}</strong></td><td>{}</td></tr>",
            escape_html(label),
            escape_html(value)
        ));
    }
    html.push_str("</table>");
    html
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> Result<()>;
}

#[derive(Serialize)]
struct EmailBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Sends notifications through a transactional email HTTP API.
pub struct EmailNotifier {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
    to: String,
}

impl EmailNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            to: config.to.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let body = EmailBody {
            from: &self.from,
            to: [&self.to],
            subject: &event.subject,
            html: &event.html,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("email API returned {}: {}", status, text);
        }

        info!(subject = %event.subject, "Notification email sent");
        Ok(())
    }
}

/// Used when notifications are switched off or not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        warn!(subject = %event.subject, "Email notifications not configured, skipping");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<NotificationEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<NotificationEvent> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        self.sent.lock().await.push(event.clone());
        Ok(())
    }
}
