use crate::infra::{declared_type_for, seed_demo_catalog};
use clap::Args;
use rate_desk::catalog::{
    BorrowerProfile, CatalogStore, EntityType, InMemoryCatalog, LenderId, LoanPurpose, Occupancy,
    PropertyType, RegionCode,
};
use rate_desk::clock::{Clock, SystemClock};
use rate_desk::config::IngestionSettings;
use rate_desk::error::AppError;
use rate_desk::ingestion::{
    DeclaredType, DeterministicExtractor, ExtractorRegistry, IngestionCoordinator,
};
use rate_desk::quoting::{QuoteService, DEFAULT_QUOTE_LIMIT};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Rate-sheet file to ingest instead of the built-in sample
    #[arg(long)]
    pub(crate) ratesheet: Option<PathBuf>,
}

const SAMPLE_SHEET: &str = "\
# Rate Desk Columnar Export\n\
# Effective: 2026-08-01\n\
program,slug,base_rate,min_fico,max_ltv,min_loan,max_loan\n\
DSCR 30yr,dscr-30,6.750,660,80,150000,2000000\n\
\n\
program,kind,row_min,row_max,col_min,col_max,value_key,points\n\
DSCR 30yr,fico_ltv,660,700,60,80,,-0.375\n\
DSCR 30yr,fico_ltv,700,760,60,80,,-0.125\n\
DSCR 30yr,purpose,,,,,cash_out_refinance,-0.5\n";

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryCatalog::new(clock.clone()));
    seed_demo_catalog(store.as_ref())?;

    let registry = Arc::new(ExtractorRegistry::new(Arc::new(
        DeterministicExtractor::standard(),
    )));
    let coordinator = IngestionCoordinator::new(
        store.clone(),
        registry,
        clock.clone(),
        IngestionSettings::default(),
    );

    let (declared_type, bytes, source) = match &args.ratesheet {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            let declared = declared_type_for(&path.display().to_string());
            (declared, bytes, path.display().to_string())
        }
        None => (
            DeclaredType::Csv,
            SAMPLE_SHEET.as_bytes().to_vec(),
            "built-in sample".to_string(),
        ),
    };

    println!("Rate desk demo");
    println!("Ingesting rate sheet from {source}");

    let sheet_id = coordinator.submit_file(LenderId("summit".to_string()), declared_type, bytes)?;
    coordinator.tick().await;

    if let Some(sheet) = store.sheet(&sheet_id).map_err(AppError::Store)? {
        println!("\nSheet {} -> {}", sheet.id, sheet.state.label());
        for line in &sheet.log {
            println!("  {line}");
        }
    }

    let service = QuoteService::new(store, clock);
    let profile = BorrowerProfile {
        property_type: PropertyType::SingleFamily,
        entity_type: EntityType::Llc,
        purpose: LoanPurpose::Purchase,
        occupancy: Occupancy::Investment,
        region: RegionCode::parse("CA").expect("demo region"),
        loan_amount: 400_000,
        ltv: 72.73,
        fico: 720,
    };

    println!(
        "\nQuoting: {} {} in {}, ${}, LTV {:.2}, FICO {}",
        profile.occupancy.label(),
        profile.property_type.label(),
        profile.region,
        profile.loan_amount,
        profile.ltv,
        profile.fico
    );

    let quotes = service.quote(&profile, DEFAULT_QUOTE_LIMIT, None)?;
    if quotes.is_empty() {
        println!("\nNo eligible programs for this profile");
        return Ok(());
    }

    println!("\nMatched programs");
    for quote in &quotes {
        println!(
            "- {} | {} | base {:.3}% | points {:+.3} | score {}",
            quote.lender_name, quote.program_name, quote.base_rate, quote.total_points, quote.score
        );
        for applied in &quote.adjustments_applied {
            println!(
                "    {} {} -> {:+.3} pts",
                applied.kind.label(),
                applied.domain,
                applied.points
            );
        }
        for note in &quote.eligibility_notes {
            println!("    note: {note}");
        }
    }

    Ok(())
}
