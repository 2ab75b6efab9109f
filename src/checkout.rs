//! Hand-off from our page to the gateway's checkout experience.
//!
//! The embedded widget reports completion through a callback string; here that
//! callback is turned into a [`CheckoutSignal`] pushed onto a channel the
//! payment controller consumes. Without a widget the page navigates to the
//! hosted checkout and no signal is ever sent.

use std::sync::Arc;
use tokio::sync::mpsc;

pub const SIGNAL_CONCLUDED: &str = "CONCLUDED";
pub const SIGNAL_USER_CANCEL: &str = "USER_CANCEL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutSignal {
    /// Checkout ended; outcome unknown until verified.
    Concluded,
    UserCancel,
    Other(String),
}

impl CheckoutSignal {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            SIGNAL_CONCLUDED => CheckoutSignal::Concluded,
            SIGNAL_USER_CANCEL => CheckoutSignal::UserCancel,
            other => CheckoutSignal::Other(other.to_string()),
        }
    }
}

/// Write half of the checkout signal channel, handed to the embedded widget.
#[derive(Debug, Clone)]
pub struct SignalSink {
    tx: mpsc::UnboundedSender<CheckoutSignal>,
}

impl SignalSink {
    pub fn new(tx: mpsc::UnboundedSender<CheckoutSignal>) -> Self {
        Self { tx }
    }

    /// Feeds the widget's raw callback value into the channel. Returns false
    /// once the controller has gone away.
    pub fn emit(&self, raw: &str) -> bool {
        self.send(CheckoutSignal::parse(raw))
    }

    pub fn send(&self, signal: CheckoutSignal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

/// In-page checkout widget.
pub trait EmbeddedCheckout: Send + Sync {
    fn transact(&self, checkout_ref: &str, on_complete: SignalSink);
}

/// The runtime the donor's page lives in.
pub trait CheckoutHost: Send + Sync {
    /// `None` when the widget script is not available in this runtime.
    fn embedded_checkout(&self) -> Option<Arc<dyn EmbeddedCheckout>>;
    fn navigate(&self, url: &str);
    /// Swaps the visible address without navigating.
    fn replace_location(&self, url: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Embedded,
    Redirect,
}

#[derive(Clone)]
pub struct CheckoutLauncher {
    host: Arc<dyn CheckoutHost>,
}

impl CheckoutLauncher {
    pub fn new(host: Arc<dyn CheckoutHost>) -> Self {
        Self { host }
    }

    pub fn launch(&self, checkout_ref: &str, sink: SignalSink) -> LaunchMode {
        match self.host.embedded_checkout() {
            Some(widget) => {
                tracing::debug!("Opening embedded checkout");
                widget.transact(checkout_ref, sink);
                LaunchMode::Embedded
            }
            None => {
                tracing::debug!(checkout_ref, "Embedded checkout unavailable, redirecting");
                self.host.navigate(checkout_ref);
                LaunchMode::Redirect
            }
        }
    }

    pub fn replace_location(&self, url: &str) {
        self.host.replace_location(url);
    }
}
