//! Bundle composition configuration.
//!
//! A configuration per `type_key` declares how a bundle may be composed: the
//! allowed dish categories, up to five modifier slots each with its own
//! category set, and an optional markup multiplier. Configurations come from
//! reference data owned by the surrounding application; this module only
//! interprets them.

use crate::normalize::cat_allowed;
use serde::{Deserialize, Serialize};

/// Hard cap on modifier slots, regardless of configuration.
pub const MAX_SLOTS: usize = 5;

/// Configuration for one modifier slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Display label for the slot.
    pub label: String,
    /// Allowed categories; wildcard tokens `any`/`*` accept everything,
    /// an empty set denies everything.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Whether the slot must be filled for the bundle to be complete.
    #[serde(default)]
    pub required: bool,
}

/// Composition rules for one bundle `type_key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleTypeConfig {
    /// The key bundles reference.
    pub type_key: String,
    /// Display label.
    pub label: String,
    /// Configured maximum modifier count.
    #[serde(default)]
    pub max_modifiers: usize,
    /// Allowed dish categories.
    #[serde(default)]
    pub dish_categories: Vec<String>,
    /// Per-slot configuration, in slot order.
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
    /// Markup multiplier; `None` or non-positive falls back.
    #[serde(default)]
    pub markup_x: Option<f64>,
    /// Legacy markup field kept for older configuration shapes.
    #[serde(default)]
    pub markup: Option<f64>,
}

impl BundleTypeConfig {
    /// The number of modifier slots actually usable: the configured maximum,
    /// capped by the number of declared slots and the global hard cap.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.max_modifiers.min(self.slots.len()).min(MAX_SLOTS)
    }

    /// Whether a dish with `category` may be inserted into this bundle.
    #[must_use]
    pub fn dish_allowed(&self, category: &str) -> bool {
        cat_allowed(&self.dish_categories, category)
    }

    /// Whether a modifier with `category` may be inserted into slot `slot`.
    ///
    /// Slots at or past [`effective_limit`](Self::effective_limit) deny.
    #[must_use]
    pub fn slot_allowed(&self, slot: usize, category: &str) -> bool {
        if slot >= self.effective_limit() {
            return false;
        }
        self.slots
            .get(slot)
            .is_some_and(|s| cat_allowed(&s.categories, category))
    }

    /// Markup multiplier with the legacy fallback chain: `markup_x`, then the
    /// older `markup` field, then `1.0`. Non-positive values fall through.
    #[must_use]
    pub fn markup_multiplier(&self) -> f64 {
        for candidate in [self.markup_x, self.markup] {
            if let Some(value) = candidate {
                if value.is_finite() && value > 0.0 {
                    return value;
                }
            }
        }
        1.0
    }
}
