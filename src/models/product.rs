//! Purchasable product definitions.

use serde::{Deserialize, Serialize};

/// Immutable catalog entry fetched from the platform store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub display_name: String,
    /// Price in millionths of the currency unit
    pub price_micros: i64,
    /// Localized price string for display
    pub display_price: String,
    /// ISO-8601 period (e.g. `P1M`) for subscriptions
    pub subscription_period: Option<String>,
}

impl Product {
    pub fn is_subscription(&self) -> bool {
        self.subscription_period.is_some()
    }
}
