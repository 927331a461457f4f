use serde::Serialize;

use crate::catalog::adjustments::{AdjustmentKind, RateAdjustment};
use crate::catalog::domain::{BorrowerProfile, LenderProgramOffering};

/// One adjustment that fired for a quote, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedAdjustment {
    pub kind: AdjustmentKind,
    pub domain: String,
    pub points: f64,
}

/// Priced candidate: base economics plus the applied LLPA trail. Points are
/// signed as stored; converting points into a rate delta is the consumer's
/// concern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingOutcome {
    pub base_rate: f64,
    pub total_points: f64,
    pub adjustments_applied: Vec<AppliedAdjustment>,
    pub eligibility_notes: Vec<String>,
    pub score: u8,
}

/// Price one candidate offering for a profile. The caller's lock period
/// wins; otherwise the offering's first lock tier applies.
pub fn price(
    offering: &LenderProgramOffering,
    adjustments: &[RateAdjustment],
    profile: &BorrowerProfile,
    lock_period: Option<u16>,
) -> PricingOutcome {
    let lock = lock_period.or_else(|| offering.default_lock_period());

    let mut total_points = 0.0;
    let mut applied = Vec::new();
    for adjustment in adjustments {
        if adjustment.applies_to(profile, lock) {
            total_points += adjustment.adjustment_points;
            applied.push(AppliedAdjustment {
                kind: adjustment.kind,
                domain: adjustment.domain_label(),
                points: adjustment.adjustment_points,
            });
        }
    }

    let mut notes = Vec::new();
    if profile.ltv > 80.0 {
        notes.push("mortgage insurance likely".to_string());
    }
    if offering.io_offered {
        notes.push("IO option available".to_string());
    }
    if offering.ysp_available {
        notes.push("lender-paid compensation available".to_string());
    }

    PricingOutcome {
        base_rate: offering.min_rate,
        total_points,
        adjustments_applied: applied,
        eligibility_notes: notes,
        score: match_score(offering, profile),
    }
}

/// Informational fit score in [0, 100]: 50 baseline plus credit, LTV, and
/// rate buffers. Ordering of quotes stays by adjusted economics.
pub fn match_score(offering: &LenderProgramOffering, profile: &BorrowerProfile) -> u8 {
    let mut score: i32 = 50;

    let fico = i32::from(profile.fico);
    let floor = i32::from(offering.min_fico);
    if fico >= floor + 100 {
        score += 20;
    } else if fico >= floor + 50 {
        score += 10;
    }

    if profile.ltv <= offering.max_ltv - 20.0 {
        score += 15;
    } else if profile.ltv <= offering.max_ltv - 10.0 {
        score += 10;
    }

    if offering.min_rate < 7.0 {
        score += 15;
    } else if offering.min_rate < 8.0 {
        score += 10;
    }

    score.clamp(0, 100) as u8
}
