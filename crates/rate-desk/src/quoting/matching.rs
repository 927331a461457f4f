use std::cmp::Ordering;

use crate::catalog::domain::{BorrowerProfile, LenderProgramOffering};
use crate::catalog::store::{CatalogStore, OfferingFilter, StoreError};

/// Hard-filter candidate offerings for a borrower profile. Eligibility is
/// all-or-nothing here; soft ranking signals live in the pricing engine.
/// Ordering is deterministic: `min_rate` ascending, ties broken by
/// `lender_fee`, then by offering id.
pub fn candidates<S: CatalogStore + ?Sized>(
    store: &S,
    profile: &BorrowerProfile,
) -> Result<Vec<LenderProgramOffering>, StoreError> {
    let mut offerings = store.find_offerings(&OfferingFilter::from_profile(profile))?;
    offerings.sort_by(|a, b| {
        a.min_rate
            .partial_cmp(&b.min_rate)
            .unwrap_or(Ordering::Equal)
            .then(
                a.lender_fee
                    .partial_cmp(&b.lender_fee)
                    .unwrap_or(Ordering::Equal),
            )
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(offerings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::domain::{
        DocumentationLevel, EntityType, Lender, LenderId, LoanPurpose, LoanType, Occupancy,
        OfferingId, ProgramCategory, ProgramType, ProgramTypeId, PropertyType, RegionCode,
    };
    use crate::catalog::InMemoryCatalog;
    use std::sync::Arc;

    fn store() -> InMemoryCatalog {
        let store = InMemoryCatalog::default();
        store
            .put_lender(Lender {
                id: LenderId("ln-a".to_string()),
                display_name: "Lender A".to_string(),
                licensed_regions: vec![RegionCode::parse("CA").unwrap()],
                active: true,
            })
            .unwrap();
        store
            .put_lender(Lender {
                id: LenderId("ln-b".to_string()),
                display_name: "Lender B".to_string(),
                licensed_regions: vec![RegionCode::parse("CA").unwrap()],
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
                base_min_fico: 600,
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
            .put_program_type(ProgramType {
                id: ProgramTypeId("pt-b".to_string()),
                name: "Bank Statement 30yr".to_string(),
                slug: "bank-statement-30".to_string(),
                category: ProgramCategory::NonQm,
                loan_type: LoanType::Fixed,
                documentation_level: DocumentationLevel::BankStatement,
                base_min_fico: 600,
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
    }

    fn offering(
        id: &str,
        lender: &str,
        program: &str,
        min_rate: f64,
        lender_fee: f64,
    ) -> crate::catalog::domain::LenderProgramOffering {
        crate::catalog::domain::LenderProgramOffering {
            id: OfferingId(id.to_string()),
            lender_id: LenderId(lender.to_string()),
            program_type_id: ProgramTypeId(program.to_string()),
            min_rate,
            max_rate: min_rate + 1.5,
            min_points: 0.0,
            max_points: 2.0,
            lender_fee,
            min_fico: 620,
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
        }
    }

    fn profile() -> BorrowerProfile {
        BorrowerProfile {
            property_type: PropertyType::SingleFamily,
            entity_type: EntityType::Individual,
            purpose: LoanPurpose::Purchase,
            occupancy: Occupancy::OwnerOccupied,
            region: RegionCode::parse("CA").unwrap(),
            loan_amount: 300_000,
            ltv: 70.0,
            fico: 720,
        }
    }

    #[test]
    fn orders_by_rate_then_fee_then_id() {
        let store = store();
        store
            .put_offering(offering("of-c", "ln-a", "pt-a", 7.0, 995.0))
            .unwrap();
        store
            .put_offering(offering("of-a", "ln-b", "pt-a", 6.5, 1495.0))
            .unwrap();
        store
            .put_offering(offering("of-b", "ln-a", "pt-b", 6.5, 995.0))
            .unwrap();

        let ordered = candidates(&store, &profile()).expect("candidates");
        let ids: Vec<&str> = ordered.iter().map(|o| o.id.0.as_str()).collect();
        assert_eq!(ids, vec!["of-b", "of-a", "of-c"]);
    }

    #[test]
    fn zero_matches_is_an_empty_list() {
        let store = store();
        let mut out_of_state = profile();
        out_of_state.region = RegionCode::parse("NY").unwrap();
        let ordered = candidates(&store, &out_of_state).expect("candidates");
        assert!(ordered.is_empty());
    }

    #[test]
    fn works_through_a_trait_object() {
        let store: Arc<dyn CatalogStore> = Arc::new(store());
        let ordered = candidates(store.as_ref(), &profile()).expect("candidates");
        assert!(ordered.is_empty());
    }
}
