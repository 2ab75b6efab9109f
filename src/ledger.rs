//! Append-only record of donations and volunteer applications.
//!
//! Each sheet is a CSV file named after the sheet. The header row is written
//! the first time a sheet is touched, so an empty directory is a valid ledger.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::donation::DonationKind;

pub const DONATIONS_SHEET: &str = "Donations";
pub const VOLUNTEERS_SHEET: &str = "Volunteers";

pub const DONATION_HEADERS: [&str; 10] = [
    "Timestamp",
    "Full Name",
    "Email",
    "Phone",
    "Amount",
    "Type",
    "Message",
    "Transaction ID",
    "Payment Mode",
    "Status",
];

pub const VOLUNTEER_HEADERS: [&str; 7] = [
    "Timestamp",
    "Full Name",
    "Email",
    "Phone",
    "Skills/Background",
    "Availability",
    "Message",
];

/// Gateway columns, present only for settled payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub transaction_id: String,
    pub payment_mode: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub timestamp: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    /// Major units, as shown to the donor.
    pub amount: String,
    pub donation_kind: DonationKind,
    pub message: String,
    pub settlement: Option<Settlement>,
}

impl LedgerRecord {
    pub fn row(&self) -> Vec<String> {
        let (transaction_id, payment_mode, status) = match &self.settlement {
            Some(s) => (
                s.transaction_id.clone(),
                s.payment_mode.clone(),
                s.status.clone(),
            ),
            None => Default::default(),
        };
        vec![
            self.timestamp.clone(),
            self.full_name.clone(),
            self.email.clone(),
            self.phone.clone(),
            self.amount.clone(),
            self.donation_kind.to_string(),
            self.message.clone(),
            transaction_id,
            payment_mode,
            status,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolunteerRecord {
    pub timestamp: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub skills: String,
    pub availability: String,
    pub message: String,
}

impl VolunteerRecord {
    pub fn row(&self) -> Vec<String> {
        vec![
            self.timestamp.clone(),
            self.full_name.clone(),
            self.email.clone(),
            self.phone.clone(),
            self.skills.clone(),
            self.availability.clone(),
            self.message.clone(),
        ]
    }
}

#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn append_donation(&self, record: &LedgerRecord) -> Result<()>;
    async fn append_volunteer(&self, record: &VolunteerRecord) -> Result<()>;
}

/// Formats ledger timestamps in the organisation's local time.
#[derive(Debug, Clone, Copy)]
pub struct LedgerClock {
    offset: FixedOffset,
}

impl LedgerClock {
    pub fn new(utc_offset_minutes: i32) -> Result<Self> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .with_context(|| format!("invalid UTC offset {} minutes", utc_offset_minutes))?;
        Ok(Self { offset })
    }

    pub fn now(&self) -> String {
        self.format(Utc::now())
    }

    pub fn format(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset)
            .format("%-d %B %Y, %I:%M %P")
            .to_string()
    }
}

pub struct CsvLedger {
    directory: PathBuf,
    // Serializes header detection and appends across requests.
    lock: Mutex<()>,
}

impl CsvLedger {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.directory.join(format!("{}.csv", sheet))
    }

    async fn append(&self, sheet: &str, headers: &'static [&'static str], row: Vec<String>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let directory = self.directory.clone();
        let path = self.sheet_path(sheet);

        tokio::task::spawn_blocking(move || append_row(&directory, &path, headers, &row))
            .await
            .context("ledger writer task panicked")??;

        info!(sheet, "Appended ledger row");
        Ok(())
    }

    /// All data rows of a sheet, header excluded. Missing sheets read as empty.
    pub fn read_rows(&self, sheet: &str) -> Result<Vec<Vec<String>>> {
        let path = self.sheet_path(sheet);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }
}

fn append_row(directory: &Path, path: &Path, headers: &[&str], row: &[String]) -> Result<()> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("creating ledger directory {}", directory.display()))?;

    let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    if needs_header {
        info!(path = %path.display(), "Creating ledger sheet");
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    if needs_header {
        writer.write_record(headers)?;
    }
    writer.write_record(row)?;
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl LedgerSink for CsvLedger {
    async fn append_donation(&self, record: &LedgerRecord) -> Result<()> {
        self.append(DONATIONS_SHEET, &DONATION_HEADERS, record.row()).await
    }

    async fn append_volunteer(&self, record: &VolunteerRecord) -> Result<()> {
        self.append(VOLUNTEERS_SHEET, &VOLUNTEER_HEADERS, record.row()).await
    }
}

/// Used when the ledger is switched off in config.
pub struct DisabledLedger;

#[async_trait]
impl LedgerSink for DisabledLedger {
    async fn append_donation(&self, record: &LedgerRecord) -> Result<()> {
        warn!(email = %record.email, "Ledger not configured, skipping donation row");
        Ok(())
    }

    async fn append_volunteer(&self, record: &VolunteerRecord) -> Result<()> {
        warn!(email = %record.email, "Ledger not configured, skipping volunteer row");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    donations: Mutex<Vec<LedgerRecord>>,
    volunteers: Mutex<Vec<VolunteerRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn donations(&self) -> Vec<LedgerRecord> {
        self.donations.lock().await.clone()
    }

    pub async fn volunteers(&self) -> Vec<VolunteerRecord> {
        self.volunteers.lock().await.clone()
    }
}

#[async_trait]
impl LedgerSink for MemoryLedger {
    async fn append_donation(&self, record: &LedgerRecord) -> Result<()> {
        self.donations.lock().await.push(record.clone());
        Ok(())
    }

    async fn append_volunteer(&self, record: &VolunteerRecord) -> Result<()> {
        self.volunteers.lock().await.push(record.clone());
        Ok(())
    }
}
