use std::sync::Arc;

use serde::Serialize;

use super::matching;
use super::pricing::{self, AppliedAdjustment};
use crate::catalog::domain::{
    BorrowerProfile, LenderProgramOffering, OfferingId, ProgramType, QualifyingInfo,
};
use crate::catalog::store::{CatalogStore, StoreError};
use crate::catalog::RateAdjustment;
use crate::clock::Clock;

pub const DEFAULT_QUOTE_LIMIT: usize = 10;

/// One priced, ranked quote ready for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub offering_id: OfferingId,
    pub lender_name: String,
    pub program_name: String,
    pub base_rate: f64,
    pub max_rate: f64,
    pub total_points: f64,
    pub adjustments_applied: Vec<AppliedAdjustment>,
    pub eligibility_notes: Vec<String>,
    pub score: u8,
}

/// Full offering detail for `GET /programs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferingDetail {
    pub offering: LenderProgramOffering,
    pub lender_name: String,
    pub program: ProgramType,
    pub adjustments: Vec<RateAdjustment>,
}

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stateless quote façade: validate the profile, match, price, shape.
pub struct QuoteService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: CatalogStore> QuoteService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Rank eligible offerings for a profile. An empty result is a valid
    /// quote, not an error.
    pub fn quote(
        &self,
        profile: &BorrowerProfile,
        limit: usize,
        lock_period: Option<u16>,
    ) -> Result<Vec<Quote>, QuoteError> {
        validate_profile(profile)?;

        let candidates = matching::candidates(self.store.as_ref(), profile)?;
        let mut quotes = Vec::with_capacity(candidates.len().min(limit));
        for offering in candidates.into_iter().take(limit) {
            let adjustments = self.store.adjustments_for(&offering.id)?;
            let lender_name = self
                .store
                .lender(&offering.lender_id)?
                .map(|lender| lender.display_name)
                .unwrap_or_else(|| offering.lender_id.to_string());
            let program_name = self
                .store
                .program_type(&offering.program_type_id)?
                .map(|program| program.name)
                .unwrap_or_else(|| offering.program_type_id.to_string());

            let outcome = pricing::price(&offering, &adjustments, profile, lock_period);
            quotes.push(Quote {
                offering_id: offering.id,
                lender_name,
                program_name,
                base_rate: outcome.base_rate,
                max_rate: offering.max_rate,
                total_points: outcome.total_points,
                adjustments_applied: outcome.adjustments_applied,
                eligibility_notes: outcome.eligibility_notes,
                score: outcome.score,
            });
        }

        Ok(quotes)
    }

    /// Strict intake: quote and persist the profile for reverse matching.
    pub fn qualify(
        &self,
        profile: &BorrowerProfile,
        limit: usize,
        lock_period: Option<u16>,
    ) -> Result<Vec<Quote>, QuoteError> {
        let quotes = self.quote(profile, limit, lock_period)?;
        self.store.put_qualifying_info(QualifyingInfo {
            profile: profile.clone(),
            captured_at: self.clock.now(),
        })?;
        Ok(quotes)
    }

    /// Stored borrower profiles that would match the given offering.
    pub fn reverse(&self, offering_id: &OfferingId) -> Result<Vec<QualifyingInfo>, QuoteError> {
        Ok(self.store.reverse_lookup(offering_id)?)
    }

    pub fn offering_detail(&self, offering_id: &OfferingId) -> Result<OfferingDetail, QuoteError> {
        let offering = self
            .store
            .offering(offering_id)?
            .ok_or(StoreError::NotFound)?;
        let lender_name = self
            .store
            .lender(&offering.lender_id)?
            .map(|lender| lender.display_name)
            .unwrap_or_else(|| offering.lender_id.to_string());
        let program = self
            .store
            .program_type(&offering.program_type_id)?
            .ok_or(StoreError::NotFound)?;
        let adjustments = self.store.adjustments_for(&offering.id)?;

        Ok(OfferingDetail {
            offering,
            lender_name,
            program,
            adjustments,
        })
    }
}

/// Range checks on an already-typed profile. Region validity is carried by
/// the `RegionCode` type itself.
fn validate_profile(profile: &BorrowerProfile) -> Result<(), QuoteError> {
    if !(300..=850).contains(&profile.fico) {
        return Err(QuoteError::Validation {
            field: "credit_score",
            message: format!("{} is outside the 300-850 range", profile.fico),
        });
    }
    if !profile.ltv.is_finite() || !(0.0..=100.0).contains(&profile.ltv) {
        return Err(QuoteError::Validation {
            field: "ltv",
            message: format!("{} is outside the 0-100 range", profile.ltv),
        });
    }
    if profile.loan_amount == 0 {
        return Err(QuoteError::Validation {
            field: "loan_amount",
            message: "loan amount must be positive".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::domain::{
        DocumentationLevel, EntityType, Lender, LenderId, LoanPurpose, LoanType, Occupancy,
        ProgramCategory, ProgramTypeId, PropertyType, RegionCode,
    };
    use crate::catalog::InMemoryCatalog;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn service() -> QuoteService<InMemoryCatalog> {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 8, 3, 15, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryCatalog::new(clock.clone()));
        store
            .put_lender(Lender {
                id: LenderId("ln-a".to_string()),
                display_name: "Test Lender".to_string(),
                licensed_regions: vec![
                    RegionCode::parse("CA").unwrap(),
                    RegionCode::parse("TX").unwrap(),
                ],
                active: true,
            })
            .unwrap();
        store
            .put_program_type(ProgramType {
                id: ProgramTypeId("pt-a".to_string()),
                name: "DSCR 30yr".to_string(),
                slug: "dscr-30".to_string(),
                category: ProgramCategory::NonQm,
                loan_type: LoanType::Fixed,
                documentation_level: DocumentationLevel::NoDoc,
                base_min_fico: 580,
                base_max_ltv: 85.0,
                base_min_dscr: None,
                allowed_property_types: vec![PropertyType::SingleFamily],
                allowed_occupancy: vec![Occupancy::OwnerOccupied],
                allowed_entity_types: vec![EntityType::Individual],
                allowed_purposes: vec![LoanPurpose::Purchase],
                active: true,
            })
            .unwrap();
        store
            .put_offering(LenderProgramOffering {
                id: OfferingId("of-a".to_string()),
                lender_id: LenderId("ln-a".to_string()),
                program_type_id: ProgramTypeId("pt-a".to_string()),
                min_rate: 6.5,
                max_rate: 8.0,
                min_points: 0.0,
                max_points: 2.0,
                lender_fee: 1495.0,
                min_fico: 600,
                max_ltv: 80.0,
                min_dscr: None,
                min_loan: 50_000,
                max_loan: 2_000_000,
                rate_sheet_url: None,
                last_rate_update: None,
                io_offered: false,
                ysp_available: false,
                lock_periods: vec![30],
                active: true,
                notes: String::new(),
            })
            .unwrap();
        QuoteService::new(store, clock)
    }

    fn profile() -> BorrowerProfile {
        BorrowerProfile {
            property_type: PropertyType::SingleFamily,
            entity_type: EntityType::Individual,
            purpose: LoanPurpose::Purchase,
            occupancy: Occupancy::OwnerOccupied,
            region: RegionCode::parse("CA").unwrap(),
            loan_amount: 200_000,
            ltv: 66.67,
            fico: 700,
        }
    }

    #[test]
    fn quote_returns_named_ranked_results() {
        let service = service();
        let quotes = service.quote(&profile(), DEFAULT_QUOTE_LIMIT, None).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].lender_name, "Test Lender");
        assert_eq!(quotes[0].program_name, "DSCR 30yr");
        assert_eq!(quotes[0].base_rate, 6.5);
        assert_eq!(quotes[0].total_points, 0.0);
    }

    #[test]
    fn out_of_range_fico_is_a_field_error() {
        let service = service();
        let mut bad = profile();
        bad.fico = 900;
        let error = service
            .quote(&bad, DEFAULT_QUOTE_LIMIT, None)
            .expect_err("fico out of range");
        assert!(matches!(
            error,
            QuoteError::Validation {
                field: "credit_score",
                ..
            }
        ));
    }

    #[test]
    fn zero_loan_amount_is_a_field_error() {
        let service = service();
        let mut bad = profile();
        bad.loan_amount = 0;
        let error = service
            .quote(&bad, DEFAULT_QUOTE_LIMIT, None)
            .expect_err("zero amount");
        assert!(matches!(
            error,
            QuoteError::Validation {
                field: "loan_amount",
                ..
            }
        ));
    }

    #[test]
    fn qualify_persists_the_profile_for_reverse_lookup() {
        let service = service();
        service
            .qualify(&profile(), DEFAULT_QUOTE_LIMIT, None)
            .expect("qualify");
        let stored = service
            .reverse(&OfferingId("of-a".to_string()))
            .expect("reverse");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].profile, profile());
    }

    #[test]
    fn offering_detail_includes_names_and_adjustments() {
        let service = service();
        let detail = service
            .offering_detail(&OfferingId("of-a".to_string()))
            .expect("detail");
        assert_eq!(detail.lender_name, "Test Lender");
        assert_eq!(detail.program.slug, "dscr-30");
        assert!(detail.adjustments.is_empty());
    }

    #[test]
    fn missing_offering_detail_is_not_found() {
        let service = service();
        let error = service
            .offering_detail(&OfferingId("of-missing".to_string()))
            .expect_err("missing offering");
        assert!(matches!(error, QuoteError::Store(StoreError::NotFound)));
    }
}
