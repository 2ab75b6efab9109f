//! Donor session state that has to outlive a full-page redirect.
//!
//! Before the hosted checkout can take over the page, the donor's details are
//! written to an [`IntentStore`] keyed by merchant order id. When the browser
//! comes back, the return URL carries a marker and the order id; the controller
//! reads them, strips them from the address, and rehydrates the donor from the
//! store.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::donation::DonorInfo;
use crate::order_client::is_valid_merchant_order_id;

pub const RETURN_MARKER_PARAM: &str = "payment";
pub const RETURN_MARKER_VALUE: &str = "return";
pub const ORDER_ID_PARAM: &str = "orderId";

/// Builds the URL the gateway sends the donor back to.
pub fn return_url_for(base: &str, merchant_order_id: &str) -> Result<String> {
    let mut url = Url::parse(base).with_context(|| format!("bad return url {}", base))?;
    url.query_pairs_mut()
        .append_pair(RETURN_MARKER_PARAM, RETURN_MARKER_VALUE)
        .append_pair(ORDER_ID_PARAM, merchant_order_id);
    Ok(url.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectReturn {
    pub merchant_order_id: String,
    /// The page URL with the return parameters removed.
    pub cleaned_url: Url,
}

/// Recognises a return from the hosted checkout. Both the marker and a
/// non-empty order id must be present.
pub fn parse_redirect_return(url: &Url) -> Option<RedirectReturn> {
    let mut marker = false;
    let mut order_id = None;
    for (key, value) in url.query_pairs() {
        if key == RETURN_MARKER_PARAM && value == RETURN_MARKER_VALUE {
            marker = true;
        } else if key == ORDER_ID_PARAM && !value.is_empty() {
            order_id = Some(value.into_owned());
        }
    }

    let merchant_order_id = order_id.filter(|_| marker)?;
    Some(RedirectReturn {
        merchant_order_id,
        cleaned_url: strip_return_params(url),
    })
}

pub fn strip_return_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != RETURN_MARKER_PARAM && key != ORDER_ID_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut cleaned = url.clone();
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    cleaned
}

/// Storage scope that survives a full-page navigation.
#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn save(&self, merchant_order_id: &str, donor: &DonorInfo) -> Result<()>;
    async fn load(&self, merchant_order_id: &str) -> Result<Option<DonorInfo>>;
    async fn clear(&self, merchant_order_id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryIntentStore {
    entries: Mutex<HashMap<String, DonorInfo>>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn save(&self, merchant_order_id: &str, donor: &DonorInfo) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(merchant_order_id.to_string(), donor.clone());
        Ok(())
    }

    async fn load(&self, merchant_order_id: &str) -> Result<Option<DonorInfo>> {
        Ok(self.entries.lock().await.get(merchant_order_id).cloned())
    }

    async fn clear(&self, merchant_order_id: &str) -> Result<()> {
        self.entries.lock().await.remove(merchant_order_id);
        Ok(())
    }
}

/// One JSON file per pending order under `directory`.
pub struct FileIntentStore {
    directory: PathBuf,
}

impl FileIntentStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Order ids arrive from the return URL, so they never reach the
    /// filesystem unless they look like ids we issue.
    fn path_for(&self, merchant_order_id: &str) -> Result<PathBuf> {
        if !is_valid_merchant_order_id(merchant_order_id) {
            bail!("invalid merchant order id {:?}", merchant_order_id);
        }
        Ok(self.directory.join(format!("{}.json", merchant_order_id)))
    }
}

#[async_trait]
impl IntentStore for FileIntentStore {
    async fn save(&self, merchant_order_id: &str, donor: &DonorInfo) -> Result<()> {
        let path = self.path_for(merchant_order_id)?;
        tokio::fs::create_dir_all(&self.directory).await?;
        let content = serde_json::to_vec(donor)?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    async fn load(&self, merchant_order_id: &str) -> Result<Option<DonorInfo>> {
        let path = self.path_for(merchant_order_id)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, merchant_order_id: &str) -> Result<()> {
        let path = self.path_for(merchant_order_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
