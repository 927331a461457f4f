use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use rate_desk::catalog::{
    AdjustmentKind, AdjustmentRule, CatalogStore, DocumentationLevel, EntityType, Lender,
    LenderId, LenderProgramOffering, LoanPurpose, LoanType, Occupancy, OfferingId,
    ProgramCategory, ProgramType, ProgramTypeId, PropertyType, RateAdjustment, RegionCode,
    StoreError,
};
use rate_desk::ingestion::DeclaredType;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Guess a declared sheet type from a file path or URL; rate sheets default
/// to PDF when the extension is unrecognized.
pub(crate) fn declared_type_for(path: &str) -> DeclaredType {
    mime_guess::from_path(path)
        .first()
        .and_then(|mime| DeclaredType::from_mime(&mime))
        .unwrap_or(DeclaredType::Pdf)
}

fn region(code: &str) -> RegionCode {
    RegionCode::parse(code).expect("demo region code is valid")
}

/// Seed the catalog used by the demo command and `serve --seed-demo`: two
/// lenders, two program templates, and priced offerings with a realistic
/// LLPA spread.
pub(crate) fn seed_demo_catalog<S: CatalogStore>(store: &S) -> Result<(), StoreError> {
    store.put_lender(Lender {
        id: LenderId("summit".to_string()),
        display_name: "Summit Funding".to_string(),
        licensed_regions: vec![region("CA"), region("TX"), region("WA")],
        active: true,
    })?;
    store.put_lender(Lender {
        id: LenderId("coastal".to_string()),
        display_name: "Coastal Capital".to_string(),
        licensed_regions: vec![region("CA"), region("FL"), region("NY"), region("TX")],
        active: true,
    })?;

    store.put_program_type(ProgramType {
        id: ProgramTypeId("pt-dscr-30".to_string()),
        name: "DSCR 30yr".to_string(),
        slug: "dscr-30".to_string(),
        category: ProgramCategory::NonQm,
        loan_type: LoanType::Fixed,
        documentation_level: DocumentationLevel::NoDoc,
        base_min_fico: 620,
        base_max_ltv: 85.0,
        base_min_dscr: Some(1.0),
        allowed_property_types: vec![
            PropertyType::SingleFamily,
            PropertyType::Condo,
            PropertyType::MultiFamily2To4,
        ],
        allowed_occupancy: vec![Occupancy::Investment],
        allowed_entity_types: vec![EntityType::Individual, EntityType::Llc],
        allowed_purposes: vec![
            LoanPurpose::Purchase,
            LoanPurpose::RateTermRefinance,
            LoanPurpose::CashOutRefinance,
        ],
        active: true,
    })?;
    store.put_program_type(ProgramType {
        id: ProgramTypeId("pt-bank-30".to_string()),
        name: "Bank Statement 30yr".to_string(),
        slug: "bank-statement-30".to_string(),
        category: ProgramCategory::NonQm,
        loan_type: LoanType::Fixed,
        documentation_level: DocumentationLevel::BankStatement,
        base_min_fico: 640,
        base_max_ltv: 90.0,
        base_min_dscr: None,
        allowed_property_types: vec![PropertyType::SingleFamily, PropertyType::Condo],
        allowed_occupancy: vec![Occupancy::OwnerOccupied, Occupancy::SecondHome],
        allowed_entity_types: vec![EntityType::Individual],
        allowed_purposes: vec![LoanPurpose::Purchase, LoanPurpose::RateTermRefinance],
        active: true,
    })?;

    store.put_offering(LenderProgramOffering {
        id: OfferingId("of-summit-dscr".to_string()),
        lender_id: LenderId("summit".to_string()),
        program_type_id: ProgramTypeId("pt-dscr-30".to_string()),
        min_rate: 6.875,
        max_rate: 8.25,
        min_points: 0.0,
        max_points: 2.0,
        lender_fee: 1495.0,
        min_fico: 660,
        max_ltv: 80.0,
        min_dscr: Some(1.1),
        min_loan: 150_000,
        max_loan: 2_000_000,
        rate_sheet_url: Some("https://summit.example.com/rates.pdf".to_string()),
        last_rate_update: None,
        io_offered: true,
        ysp_available: false,
        lock_periods: vec![30, 45],
        active: true,
        notes: "No rural properties".to_string(),
    })?;
    store.put_offering(LenderProgramOffering {
        id: OfferingId("of-coastal-bank".to_string()),
        lender_id: LenderId("coastal".to_string()),
        program_type_id: ProgramTypeId("pt-bank-30".to_string()),
        min_rate: 7.125,
        max_rate: 8.5,
        min_points: 0.5,
        max_points: 2.5,
        lender_fee: 995.0,
        min_fico: 660,
        max_ltv: 85.0,
        min_dscr: None,
        min_loan: 200_000,
        max_loan: 3_000_000,
        rate_sheet_url: Some("https://coastal.example.com/llpa.csv".to_string()),
        last_rate_update: None,
        io_offered: false,
        ysp_available: true,
        lock_periods: vec![30],
        active: true,
        notes: String::new(),
    })?;

    let summit = OfferingId("of-summit-dscr".to_string());
    store.replace_adjustments(
        &summit,
        chrono::NaiveDate::from_ymd_opt(2026, 8, 1).expect("demo effective date"),
        vec![
            RateAdjustment {
                offering_id: summit.clone(),
                kind: AdjustmentKind::FicoLtv,
                rule: AdjustmentRule::Grid {
                    row_min: 660.0,
                    row_max: 700.0,
                    col_min: 60.0,
                    col_max: 80.0,
                },
                adjustment_points: -0.375,
            },
            RateAdjustment {
                offering_id: summit.clone(),
                kind: AdjustmentKind::FicoLtv,
                rule: AdjustmentRule::Grid {
                    row_min: 700.0,
                    row_max: 760.0,
                    col_min: 60.0,
                    col_max: 80.0,
                },
                adjustment_points: -0.125,
            },
            RateAdjustment {
                offering_id: summit.clone(),
                kind: AdjustmentKind::Purpose,
                rule: AdjustmentRule::Key {
                    value_key: "cash_out_refinance".to_string(),
                },
                adjustment_points: -0.5,
            },
            RateAdjustment {
                offering_id: summit.clone(),
                kind: AdjustmentKind::LoanAmount,
                rule: AdjustmentRule::Key {
                    value_key: "1m-2m".to_string(),
                },
                adjustment_points: -0.25,
            },
        ],
    )?;

    Ok(())
}
