use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use rate_desk::catalog::{
    CatalogStore, DocumentationLevel, EntityType, InMemoryCatalog, Lender, LenderId,
    LoanPurpose, LoanType, Occupancy, ProgramCategory, ProgramType, ProgramTypeId, PropertyType,
    RegionCode,
};
use rate_desk::clock::ManualClock;
use rate_desk::config::IngestionSettings;
use rate_desk::ingestion::{
    DeclaredType, DeterministicExtractor, ExtractorRegistry, IngestionCoordinator, SheetState,
};

fn region(code: &str) -> RegionCode {
    RegionCode::parse(code).expect("valid region")
}

fn setup() -> (Arc<InMemoryCatalog>, IngestionCoordinator<InMemoryCatalog>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 8, 4, 8, 0, 0).unwrap(),
    ));
    let store = Arc::new(InMemoryCatalog::new(clock.clone()));
    store
        .put_lender(Lender {
            id: LenderId("summit".to_string()),
            display_name: "Summit Funding".to_string(),
            licensed_regions: vec![region("CA"), region("TX")],
            active: true,
        })
        .unwrap();
    store
        .put_program_type(ProgramType {
            id: ProgramTypeId("pt-dscr".to_string()),
            name: "DSCR 30yr".to_string(),
            slug: "dscr-30".to_string(),
            category: ProgramCategory::NonQm,
            loan_type: LoanType::Fixed,
            documentation_level: DocumentationLevel::NoDoc,
            base_min_fico: 620,
            base_max_ltv: 85.0,
            base_min_dscr: Some(1.0),
            allowed_property_types: vec![PropertyType::SingleFamily],
            allowed_occupancy: vec![Occupancy::Investment],
            allowed_entity_types: vec![EntityType::Individual, EntityType::Llc],
            allowed_purposes: vec![LoanPurpose::Purchase, LoanPurpose::CashOutRefinance],
            active: true,
        })
        .unwrap();

    let registry = Arc::new(ExtractorRegistry::new(Arc::new(
        DeterministicExtractor::standard(),
    )));
    let coordinator = IngestionCoordinator::new(
        store.clone(),
        registry,
        clock,
        IngestionSettings::default(),
    );
    (store, coordinator)
}

const SHEET: &str = "\
# Effective: 2026-08-01\n\
program,slug,base_rate,min_fico,max_ltv,min_loan,max_loan\n\
DSCR 30yr,dscr-30,6.500,660,80,150000,2000000\n\
\n\
program,kind,row_min,row_max,col_min,col_max,value_key,points\n\
DSCR 30yr,fico_ltv,620,660,60,75,,-0.50\n\
DSCR 30yr,fico_ltv,660,700,60,75,,-0.25\n\
DSCR 30yr,purpose,,,,,cash_out_refinance,-0.375\n";

async fn ingest(
    coordinator: &IngestionCoordinator<InMemoryCatalog>,
    body: &str,
) -> rate_desk::ingestion::SheetId {
    let id = coordinator
        .submit_file(
            LenderId("summit".to_string()),
            DeclaredType::Csv,
            body.as_bytes().to_vec(),
        )
        .expect("submit");
    coordinator.tick().await;
    id
}

#[tokio::test]
async fn successful_ingest_creates_offering_and_adjustments() {
    let (store, coordinator) = setup();
    let sheet_id = ingest(&coordinator, SHEET).await;

    let sheet = store.sheet(&sheet_id).unwrap().unwrap();
    assert_eq!(sheet.state, SheetState::Processed);
    assert_eq!(sheet.effective_date, NaiveDate::from_ymd_opt(2026, 8, 1));
    assert!(sheet
        .extraction_ref
        .as_deref()
        .unwrap()
        .contains("1 programs, 3 adjustments"));

    let offering = store
        .offering_for(
            &LenderId("summit".to_string()),
            &ProgramTypeId("pt-dscr".to_string()),
        )
        .unwrap()
        .expect("offering created");
    assert_eq!(offering.min_rate, 6.5);
    assert_eq!(offering.min_fico, 660);
    assert_eq!(offering.max_ltv, 80.0);
    assert!(offering.last_rate_update.is_some());

    let adjustments = store.adjustments_for(&offering.id).unwrap();
    assert_eq!(adjustments.len(), 3);
}

#[tokio::test]
async fn duplicate_content_short_circuits_to_processed() {
    let (store, coordinator) = setup();
    let first = ingest(&coordinator, SHEET).await;
    let offering = store
        .offering_for(
            &LenderId("summit".to_string()),
            &ProgramTypeId("pt-dscr".to_string()),
        )
        .unwrap()
        .unwrap();
    let before = store.adjustments_for(&offering.id).unwrap();

    let second = ingest(&coordinator, SHEET).await;
    assert_ne!(first, second);

    let sheet = store.sheet(&second).unwrap().unwrap();
    assert_eq!(sheet.state, SheetState::Processed);
    assert!(sheet.log.iter().any(|line| line.contains("duplicate")));

    let after = store.adjustments_for(&offering.id).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn rerunning_equivalent_content_is_idempotent() {
    let (store, coordinator) = setup();
    ingest(&coordinator, SHEET).await;
    let offering = store
        .offering_for(
            &LenderId("summit".to_string()),
            &ProgramTypeId("pt-dscr".to_string()),
        )
        .unwrap()
        .unwrap();
    let first_rows = store.adjustments_for(&offering.id).unwrap();

    // Same pricing content, one comment changed: processed as a fresh
    // sheet, replacing the set with identical rows.
    let variant = SHEET.replace("# Effective:", "#  Effective:");
    let second = ingest(&coordinator, &variant).await;
    let sheet = store.sheet(&second).unwrap().unwrap();
    assert_eq!(sheet.state, SheetState::Processed);

    let second_rows = store.adjustments_for(&offering.id).unwrap();
    assert_eq!(first_rows, second_rows);
}

#[tokio::test]
async fn unresolved_program_fails_the_job_and_leaves_the_store_unchanged() {
    let (store, coordinator) = setup();
    let body = SHEET.replace("DSCR 30yr", "Mystery").replace("dscr-30", "mystery");
    let sheet_id = ingest(&coordinator, &body).await;

    let sheet = store.sheet(&sheet_id).unwrap().unwrap();
    assert_eq!(sheet.state, SheetState::Failed);
    let reason = sheet.failure_reason().expect("failure reason");
    assert!(reason.contains("Mystery"));

    let offering = store
        .offering_for(
            &LenderId("summit".to_string()),
            &ProgramTypeId("pt-dscr".to_string()),
        )
        .unwrap();
    assert!(offering.is_none());
}

#[tokio::test]
async fn overlapping_grid_cells_fail_and_preserve_prior_pricing() {
    let (store, coordinator) = setup();
    ingest(&coordinator, SHEET).await;
    let offering = store
        .offering_for(
            &LenderId("summit".to_string()),
            &ProgramTypeId("pt-dscr".to_string()),
        )
        .unwrap()
        .unwrap();
    let before = store.adjustments_for(&offering.id).unwrap();

    let overlapping = "\
program,slug,base_rate\n\
DSCR 30yr,dscr-30,6.625\n\
\n\
program,kind,row_min,row_max,col_min,col_max,value_key,points\n\
DSCR 30yr,fico_ltv,620,700,60,75,,-0.50\n\
DSCR 30yr,fico_ltv,660,740,60,75,,-0.25\n";
    let sheet_id = ingest(&coordinator, overlapping).await;

    let sheet = store.sheet(&sheet_id).unwrap().unwrap();
    assert_eq!(sheet.state, SheetState::Failed);
    assert!(sheet.failure_reason().unwrap().contains("overlap"));

    let after = store.adjustments_for(&offering.id).unwrap();
    assert_eq!(before, after);
    // The staged rate change must not have landed either.
    let untouched = store.offering(&offering.id).unwrap().unwrap();
    assert_eq!(untouched.min_rate, 6.5);
}

#[tokio::test]
async fn envelope_loosening_sheet_fails_the_job() {
    let (store, coordinator) = setup();
    let loosening = "\
program,slug,base_rate,min_fico,max_ltv\n\
DSCR 30yr,dscr-30,6.5,580,90\n";
    let sheet_id = ingest(&coordinator, loosening).await;

    let sheet = store.sheet(&sheet_id).unwrap().unwrap();
    assert_eq!(sheet.state, SheetState::Failed);
    assert!(store
        .offering_for(
            &LenderId("summit".to_string()),
            &ProgramTypeId("pt-dscr".to_string()),
        )
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failed_sheets_can_be_manually_retried() {
    let (store, coordinator) = setup();
    let body = SHEET.replace("DSCR 30yr", "Mystery").replace("dscr-30", "mystery");
    let sheet_id = ingest(&coordinator, &body).await;
    assert_eq!(
        store.sheet(&sheet_id).unwrap().unwrap().state,
        SheetState::Failed
    );

    coordinator.resubmit(&sheet_id).expect("manual retry");
    assert_eq!(
        store.sheet(&sheet_id).unwrap().unwrap().state,
        SheetState::Pending
    );

    // Still unresolvable, so the retry fails again rather than hanging.
    coordinator.tick().await;
    assert_eq!(
        store.sheet(&sheet_id).unwrap().unwrap().state,
        SheetState::Failed
    );
}
