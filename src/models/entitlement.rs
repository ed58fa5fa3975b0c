//! Entitlement snapshot: what the user currently owns.

use crate::models::transaction::SubscriptionInfo;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Authoritative view of current ownership. Replaced wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitlementSnapshot {
    pub purchased_product_ids: BTreeSet<String>,
    pub subscription: Option<SubscriptionInfo>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl EntitlementSnapshot {
    pub fn owns(&self, product_id: &str) -> bool {
        self.purchased_product_ids.contains(product_id)
    }
}
