//! Percentage, scope, VAT, and category normalization.
//!
//! Historical rows spell the same information several ways: a fee percent may
//! live under `percent`, `percentage`, or `rate`, written as `0.1`, `10`, or
//! `"10%"`; a fee scope may be any free-text label. These functions turn that
//! material into canonical calculation inputs. All of them are pure.

use crate::guard;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Candidate field names for a percent value, in probe order.
pub const PERCENT_FIELDS: [&str; 3] = ["percent", "percentage", "rate"];

/// Candidate field names for a fee/discount scope, in probe order.
pub const SCOPE_FIELDS: [&str; 3] = ["base", "apply_on", "scope"];

/// Read the first present percent candidate field and normalize it to a
/// fraction.
///
/// Numeric interpretation: a value `<= 1` is already a fraction; a value in
/// `(1, 1000)` is a whole-number percent and is divided by 100; values
/// `>= 1000`, negative, or non-finite are rejected. The `<= 1` reading means
/// a bare `1` is taken as `100%`, not `1%`; that ambiguity is inherent to the
/// source data and is pinned by test rather than second-guessed here.
#[must_use]
pub fn percent_any(record: &Map<String, Value>) -> Option<f64> {
    let raw = PERCENT_FIELDS
        .iter()
        .find_map(|field| record.get(*field).filter(|v| !v.is_null()))?;
    percent_value(raw)
}

/// Normalize a single raw percent value to a fraction.
#[must_use]
pub fn percent_value(raw: &Value) -> Option<f64> {
    let number = match raw {
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| *c != '%' && !c.is_whitespace()).collect();
            let cleaned = cleaned.replace(',', ".");
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok()?
        }
        other => guard::num_from(other)?,
    };

    if !number.is_finite() || number < 0.0 {
        return None;
    }
    if number <= 1.0 {
        Some(number)
    } else if number < 1000.0 {
        Some(number / 100.0)
    } else {
        None
    }
}

/// The subtotal a fee or discount is computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// The grand total of all cost centers.
    #[default]
    Total,
    /// Menu bundles only.
    Bundles,
    /// Rental equipment only.
    Equipment,
    /// Staff labor only.
    Staff,
    /// Transport only.
    Transport,
    /// Company-owned assets only.
    Assets,
}

impl Scope {
    /// Map a free-text scope label to the canonical set.
    ///
    /// Unrecognized or empty input defaults to [`Scope::Total`]: a fee applies
    /// to the grand total unless proven otherwise.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Total;
        };
        match raw.trim().to_lowercase().as_str() {
            "bundle" | "bundles" | "menu" | "menus" => Self::Bundles,
            "equipment" | "rental" | "rentals" | "gear" => Self::Equipment,
            "staff" | "labor" | "labour" | "personnel" => Self::Staff,
            "transport" | "delivery" | "logistics" => Self::Transport,
            "asset" | "assets" | "company" => Self::Assets,
            _ => Self::Total,
        }
    }

    /// Canonical lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Bundles => "bundles",
            Self::Equipment => "equipment",
            Self::Staff => "staff",
            Self::Transport => "transport",
            Self::Assets => "assets",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read the first present scope candidate field and normalize it.
#[must_use]
pub fn scope_any(record: &Map<String, Value>) -> Scope {
    let raw = SCOPE_FIELDS
        .iter()
        .find_map(|field| record.get(*field))
        .and_then(|v| v.as_str());
    Scope::parse(raw)
}

/// VAT-inclusive unit cost.
///
/// The explicit gross value wins when the source row provides one; otherwise
/// the net cost is grossed up by `vat_percent` when the row uses VAT.
#[must_use]
pub fn gross_unit_cost(net: f64, vat_percent: f64, uses_vat: bool, explicit: Option<f64>) -> f64 {
    if let Some(gross) = explicit {
        return guard::non_neg(gross);
    }
    let net = guard::non_neg(net);
    if uses_vat {
        net * (1.0 + guard::non_neg(vat_percent) / 100.0)
    } else {
        net
    }
}

/// Normalized category slug: diacritics stripped, lowercased, runs of
/// non-alphanumeric characters collapsed to a single `-`, ends trimmed.
#[must_use]
pub fn cat_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.chars().flat_map(fold_diacritic) {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            // lowercase expansions can contain combining marks; drop them so
            // the slug stays alphanumeric-and-dashes only
            for lower in c.to_lowercase().filter(|l| l.is_alphanumeric()) {
                out.push(lower);
            }
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Fold common Latin diacritics to their base letter.
fn fold_diacritic(c: char) -> std::iter::Once<char> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        other => other,
    };
    std::iter::once(folded)
}

/// Wildcard tokens that make an allowed-category set accept anything.
const CATEGORY_WILDCARDS: [&str; 2] = ["any", "*"];

/// Whether `candidate` passes the allowed-category set.
///
/// The set accepts everything when it contains a wildcard token. An absent or
/// empty set always denies. Matching is performed on [`cat_key`] slugs, so it
/// is case-, whitespace-, and diacritic-insensitive.
#[must_use]
pub fn cat_allowed(allowed: &[String], candidate: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    let key = cat_key(candidate);
    allowed.iter().any(|entry| {
        let entry_key = cat_key(entry);
        CATEGORY_WILDCARDS.contains(&entry_key.as_str()) || entry_key == key
    })
}

/// Normalized unit-of-measure slug with a small alias table.
#[must_use]
pub fn uom_key(s: &str) -> String {
    let key = cat_key(s);
    match key.as_str() {
        "pcs" | "pz" | "piece" | "pieces" | "unit" | "units" => "pc".to_string(),
        "hours" | "hour" | "hr" | "hrs" | "ore" | "ora" => "h".to_string(),
        "days" | "day" | "gg" | "giorni" => "d".to_string(),
        "kilogram" | "kilograms" | "kgs" => "kg".to_string(),
        "kilometer" | "kilometers" | "kilometre" | "kilometres" => "km".to_string(),
        "liter" | "liters" | "litre" | "litres" | "lt" => "l".to_string(),
        _ => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn percent_fraction_passes_through() {
        let rec = record(&[("percent", json!(0.15))]);
        assert_eq!(percent_any(&rec), Some(0.15));
    }

    #[test]
    fn percent_string_with_sign_divides() {
        let rec = record(&[("percentage", json!("15%"))]);
        assert_eq!(percent_any(&rec), Some(0.15));
    }

    #[test]
    fn percent_comma_decimal() {
        let rec = record(&[("rate", json!("7,5 %"))]);
        assert_eq!(percent_any(&rec), Some(0.075));
    }

    #[test]
    fn percent_out_of_range_rejected() {
        let rec = record(&[("rate", json!(1500))]);
        assert_eq!(percent_any(&rec), None);
        let rec = record(&[("percent", json!(-5))]);
        assert_eq!(percent_any(&rec), None);
    }

    #[test]
    fn percent_first_candidate_wins() {
        let rec = record(&[("percent", json!(0.2)), ("rate", json!(90))]);
        assert_eq!(percent_any(&rec), Some(0.2));
    }

    #[test]
    fn percent_missing_fields() {
        let rec = record(&[("label", json!("setup fee"))]);
        assert_eq!(percent_any(&rec), None);
    }

    // A bare 1 reads as 100%, not 1%. The source data cannot distinguish the
    // two; this pins the <=1 threshold so nobody "fixes" it silently.
    #[test]
    fn percent_one_is_one_hundred_percent() {
        let rec = record(&[("percent", json!(1))]);
        assert_eq!(percent_any(&rec), Some(1.0));
    }

    #[test]
    fn scope_parse_maps_labels() {
        assert_eq!(Scope::parse(Some("Bundle")), Scope::Bundles);
        assert_eq!(Scope::parse(Some("  LOGISTICS ")), Scope::Transport);
        assert_eq!(Scope::parse(Some("whatever")), Scope::Total);
        assert_eq!(Scope::parse(None), Scope::Total);
    }

    #[test]
    fn scope_any_reads_candidates() {
        let rec = record(&[("apply_on", json!("staff"))]);
        assert_eq!(scope_any(&rec), Scope::Staff);
        let rec = record(&[("notes", json!("x"))]);
        assert_eq!(scope_any(&rec), Scope::Total);
    }

    #[test]
    fn gross_cost_prefers_explicit() {
        assert_eq!(gross_unit_cost(10.0, 22.0, true, Some(15.0)), 15.0);
        assert!((gross_unit_cost(10.0, 22.0, true, None) - 12.2).abs() < 1e-9);
        assert_eq!(gross_unit_cost(10.0, 22.0, false, None), 10.0);
    }

    #[test]
    fn cat_key_normalizes() {
        assert_eq!(cat_key("  Café -- Dolci  "), "cafe-dolci");
        assert_eq!(cat_key("Starters"), "starters");
        assert_eq!(cat_key("__"), "");
    }

    #[test]
    fn cat_allowed_wildcards_and_matches() {
        let any = vec!["Any".to_string()];
        assert!(cat_allowed(&any, "Beverages"));

        let starters = vec!["Starters".to_string()];
        assert!(cat_allowed(&starters, "starters "));

        let empty: Vec<String> = vec![];
        assert!(!cat_allowed(&empty, "X"));

        let star = vec!["*".to_string()];
        assert!(cat_allowed(&star, "anything at all"));
    }

    #[test]
    fn uom_aliases() {
        assert_eq!(uom_key("Pz"), "pc");
        assert_eq!(uom_key("HOURS"), "h");
        assert_eq!(uom_key("kg"), "kg");
        assert_eq!(uom_key("crates"), "crates");
    }

    proptest! {
        #[test]
        fn percent_never_exceeds_the_rejection_band(value in -2000.0..2000.0f64) {
            if let Some(p) = percent_value(&json!(value)) {
                prop_assert!(p >= 0.0);
                prop_assert!(p < 10.0);
                if value <= 1.0 {
                    prop_assert!((p - value).abs() < 1e-12);
                }
            }
        }

        #[test]
        fn cat_key_is_idempotent(s in "\\PC{0,40}") {
            let once = cat_key(&s);
            prop_assert_eq!(cat_key(&once), once);
        }
    }
}
