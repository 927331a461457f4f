use serde::{Deserialize, Serialize};

use super::domain::{BorrowerProfile, OfferingId};

/// Discriminant for the two LLPA shapes stored in one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    FicoLtv,
    Purpose,
    Occupancy,
    PropertyType,
    LoanAmount,
    LockPeriod,
    State,
}

impl AdjustmentKind {
    pub const fn label(self) -> &'static str {
        match self {
            AdjustmentKind::FicoLtv => "fico_ltv",
            AdjustmentKind::Purpose => "purpose",
            AdjustmentKind::Occupancy => "occupancy",
            AdjustmentKind::PropertyType => "property_type",
            AdjustmentKind::LoanAmount => "loan_amount",
            AdjustmentKind::LockPeriod => "lock_period",
            AdjustmentKind::State => "state",
        }
    }

    /// Grid kinds carry row/column bounds; the rest carry a value key.
    pub const fn is_grid(self) -> bool {
        matches!(self, AdjustmentKind::FicoLtv)
    }
}

/// Shape union for a rate adjustment. Grid bounds are half-open
/// `[min, max)` on both axes once normalized at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdjustmentRule {
    Grid {
        row_min: f64,
        row_max: f64,
        col_min: f64,
        col_max: f64,
    },
    Key {
        value_key: String,
    },
}

/// A loan-level price adjustment attached to an offering. Points are
/// signed: negative is a cost to the borrower, positive a credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateAdjustment {
    pub offering_id: OfferingId,
    pub kind: AdjustmentKind,
    pub rule: AdjustmentRule,
    pub adjustment_points: f64,
}

impl RateAdjustment {
    /// Whether this adjustment applies to the given profile at the given
    /// lock period.
    pub fn applies_to(&self, profile: &BorrowerProfile, lock_period: Option<u16>) -> bool {
        match (&self.kind, &self.rule) {
            (
                AdjustmentKind::FicoLtv,
                AdjustmentRule::Grid {
                    row_min,
                    row_max,
                    col_min,
                    col_max,
                },
            ) => {
                let fico = f64::from(profile.fico);
                fico >= *row_min && fico < *row_max && profile.ltv >= *col_min && profile.ltv < *col_max
            }
            (AdjustmentKind::Purpose, AdjustmentRule::Key { value_key }) => {
                value_key == profile.purpose.label()
            }
            (AdjustmentKind::Occupancy, AdjustmentRule::Key { value_key }) => {
                value_key == profile.occupancy.label()
            }
            (AdjustmentKind::PropertyType, AdjustmentRule::Key { value_key }) => {
                value_key == profile.property_type.label()
            }
            (AdjustmentKind::State, AdjustmentRule::Key { value_key }) => {
                value_key == profile.region.as_str()
            }
            (AdjustmentKind::LoanAmount, AdjustmentRule::Key { value_key }) => {
                match parse_loan_bracket(value_key) {
                    Some((lo, hi)) => profile.loan_amount >= lo && profile.loan_amount < hi,
                    None => false,
                }
            }
            (AdjustmentKind::LockPeriod, AdjustmentRule::Key { value_key }) => match lock_period {
                Some(period) => value_key.trim().parse::<u16>() == Ok(period),
                None => false,
            },
            // A kind/rule mismatch can only come from a bug upstream of
            // normalization; treat it as not applicable.
            _ => false,
        }
    }

    /// Short operator-facing description of the applicability domain.
    pub fn domain_label(&self) -> String {
        match &self.rule {
            AdjustmentRule::Grid {
                row_min,
                row_max,
                col_min,
                col_max,
            } => format!(
                "fico [{:.0}, {:.0}) / ltv [{:.0}, {:.0})",
                row_min, row_max, col_min, col_max
            ),
            AdjustmentRule::Key { value_key } => value_key.clone(),
        }
    }
}

/// Parse a loan-amount bracket token into inclusive-exclusive dollar
/// bounds. Accepts `500k-1m`, `0-500k`, `2m+`, and plain digit forms like
/// `100000-250000`.
pub fn parse_loan_bracket(key: &str) -> Option<(u64, u64)> {
    let token = key.trim().to_ascii_lowercase();
    if let Some(lo_token) = token.strip_suffix('+') {
        let lo = parse_amount_token(lo_token)?;
        return Some((lo, u64::MAX));
    }

    let (lo_token, hi_token) = token.split_once('-')?;
    let lo = parse_amount_token(lo_token)?;
    let hi = parse_amount_token(hi_token)?;
    if lo >= hi {
        return None;
    }
    Some((lo, hi))
}

/// Render inclusive-exclusive dollar bounds as a compact bracket token,
/// preferring `k`/`m` suffixes when the bounds are round.
pub fn loan_bracket_key(lo: u64, hi: u64) -> String {
    if hi == u64::MAX {
        return format!("{}+", format_amount_token(lo));
    }
    format!("{}-{}", format_amount_token(lo), format_amount_token(hi))
}

fn parse_amount_token(token: &str) -> Option<u64> {
    let cleaned: String = token
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',' && *c != '_')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let (digits, multiplier) = match cleaned.strip_suffix('m') {
        Some(rest) => (rest, 1_000_000f64),
        None => match cleaned.strip_suffix('k') {
            Some(rest) => (rest, 1_000f64),
            None => (cleaned.as_str(), 1f64),
        },
    };

    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

fn format_amount_token(amount: u64) -> String {
    if amount > 0 && amount % 1_000_000 == 0 {
        format!("{}m", amount / 1_000_000)
    } else if amount > 0 && amount % 1_000 == 0 {
        format!("{}k", amount / 1_000)
    } else {
        amount.to_string()
    }
}
