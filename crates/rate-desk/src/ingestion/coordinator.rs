use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use super::extract::{
    normalize_document, ExtractedProgram, ExtractionDocument, ExtractionError, ExtractorRegistry,
    NormalizeError, NormalizedAdjustment, RateSheetFile,
};
use super::sheet::{DeclaredType, RateSheet, SheetId, SheetState, SheetTransitionError};
use crate::catalog::domain::{LenderId, LenderProgramOffering, OfferingId, ProgramType};
use crate::catalog::store::{CatalogStore, StoreError, ValidationError};
use crate::catalog::RateAdjustment;
use crate::clock::Clock;
use crate::config::IngestionSettings;

/// Job-level ingestion failure. The final log line of a failed sheet is the
/// `Display` of one of these.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lifecycle(#[from] SheetTransitionError),
    #[error("no program type matches '{0}'")]
    UnresolvedProgram(String),
    #[error("program '{0}' has no base rate and no existing offering")]
    MissingBaseRate(String),
    #[error("timed out after {0} s")]
    Timeout(u64),
    #[error("ingestion worker failed: {0}")]
    Worker(String),
}

/// Drives rate sheets through their lifecycle: claims pending work, runs
/// extraction under a deadline, and applies the result to the catalog
/// atomically. One sheet at a time per lender; the batch size per `tick`
/// bounds global concurrency.
pub struct IngestionCoordinator<S> {
    store: Arc<S>,
    registry: Arc<ExtractorRegistry>,
    clock: Arc<dyn Clock>,
    settings: IngestionSettings,
    busy_lenders: Arc<Mutex<HashSet<LenderId>>>,
}

impl<S> Clone for IngestionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
            busy_lenders: self.busy_lenders.clone(),
        }
    }
}

impl<S: CatalogStore + 'static> IngestionCoordinator<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<ExtractorRegistry>,
        clock: Arc<dyn Clock>,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            settings,
            busy_lenders: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create a pending rate sheet from an uploaded or downloaded file.
    pub fn submit_file(
        &self,
        lender_id: LenderId,
        declared_type: DeclaredType,
        bytes: Vec<u8>,
    ) -> Result<SheetId, IngestError> {
        if self.store.lender(&lender_id)?.is_none() {
            return Err(StoreError::Validation(ValidationError::UnknownLender(lender_id)).into());
        }

        let mut sheet = RateSheet::new(lender_id, declared_type, bytes, self.clock.now());
        sheet.transition(SheetState::Pending)?;
        sheet.push_log("queued for extraction");
        let id = self.store.insert_sheet(sheet)?;
        info!(sheet = %id, "rate sheet submitted");
        Ok(id)
    }

    /// Manual retry: move a failed sheet back to pending.
    pub fn resubmit(&self, id: &SheetId) -> Result<(), IngestError> {
        let mut sheet = self.store.sheet(id)?.ok_or(StoreError::NotFound)?;
        sheet.transition(SheetState::Pending)?;
        sheet.push_log("manual retry requested");
        self.store.update_sheet(sheet)?;
        Ok(())
    }

    /// Pick up to the configured number of pending sheets and run them to
    /// completion. Sheets for a lender that already has a job in flight are
    /// left for a later tick. Returns the number of jobs run.
    pub async fn tick(&self) -> usize {
        let pending = match self.store.pending_sheets(self.settings.worker_concurrency.max(1)) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "could not list pending rate sheets");
                return 0;
            }
        };

        let mut handles = Vec::new();
        for sheet in pending {
            let lender = sheet.lender_id.clone();
            {
                let mut busy = self.busy_lenders.lock().expect("lender set poisoned");
                if !busy.insert(lender.clone()) {
                    continue;
                }
            }

            let claimed = self.store.claim_pending_sheet(&sheet.id).unwrap_or(false);
            if !claimed {
                self.busy_lenders
                    .lock()
                    .expect("lender set poisoned")
                    .remove(&lender);
                continue;
            }

            let worker = self.clone();
            let sheet_id = sheet.id.clone();
            handles.push(tokio::spawn(async move {
                worker.run_job(sheet_id).await;
                worker
                    .busy_lenders
                    .lock()
                    .expect("lender set poisoned")
                    .remove(&lender);
            }));
        }

        let started = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        started
    }

    async fn run_job(&self, id: SheetId) {
        let sheet = match self.store.sheet(&id) {
            Ok(Some(sheet)) => sheet,
            Ok(None) => return,
            Err(err) => {
                warn!(sheet = %id, error = %err, "could not load claimed sheet");
                return;
            }
        };
        if sheet.state != SheetState::Processing {
            return;
        }

        let mut sheet = sheet;
        if let Err(err) = self.process(&mut sheet).await {
            warn!(sheet = %sheet.id, error = %err, "rate sheet ingestion failed");
            sheet.push_log(format!("error detail: {err:?}"));
            sheet.push_log(err.to_string());
            if let Err(transition) = sheet.transition(SheetState::Failed) {
                warn!(sheet = %sheet.id, error = %transition, "could not mark sheet failed");
            }
        }

        if let Err(err) = self.store.update_sheet(sheet) {
            warn!(sheet = %id, error = %err, "could not persist sheet outcome");
        }
    }

    async fn process(&self, sheet: &mut RateSheet) -> Result<(), IngestError> {
        if self
            .store
            .processed_hash_exists(&sheet.lender_id, &sheet.content_hash, &sheet.id)?
        {
            sheet.push_log("duplicate content");
            sheet.transition(SheetState::Processed)?;
            return Ok(());
        }

        let file = RateSheetFile {
            lender_id: sheet.lender_id.clone(),
            declared_type: sheet.declared_type,
            bytes: sheet.bytes.clone(),
        };
        let extractor = self.registry.select(&file)?;
        let backend = extractor.name();
        sheet.push_log(format!("extracting with backend '{backend}'"));

        let deadline_secs = if backend == "ai" {
            self.settings.ai_timeout_secs
        } else {
            self.settings.deterministic_timeout_secs
        };
        let job = tokio::task::spawn_blocking(move || extractor.extract(&file));
        let document = match tokio::time::timeout(Duration::from_secs(deadline_secs), job).await {
            Err(_) => return Err(IngestError::Timeout(deadline_secs)),
            Ok(Err(join_error)) => return Err(IngestError::Worker(join_error.to_string())),
            Ok(Ok(result)) => result?,
        };

        let (programs, adjustments) = self.apply_document(sheet, &document)?;
        sheet.extraction_ref = Some(format!(
            "{}: {programs} programs, {adjustments} adjustments",
            document.metadata.extraction_method
        ));
        sheet.push_log(format!(
            "applied {programs} programs and {adjustments} adjustments"
        ));
        sheet.transition(SheetState::Processed)?;
        Ok(())
    }

    /// Resolve programs and offerings, pre-validate every overlay, then
    /// write. Validation happens before any mutation so a failed sheet
    /// leaves prior pricing untouched.
    fn apply_document(
        &self,
        sheet: &mut RateSheet,
        document: &ExtractionDocument,
    ) -> Result<(usize, usize), IngestError> {
        let mut normalized = normalize_document(document)?;
        let effective = document
            .metadata
            .effective_date
            .unwrap_or_else(|| self.clock.now().date_naive());

        let mut staged: Vec<(LenderProgramOffering, Vec<RateAdjustment>)> = Vec::new();
        for program in &document.programs {
            let program_type = self.resolve_program_type(program)?;
            let offering = self.staged_offering(sheet, program, &program_type)?;
            let rules = normalized
                .remove(&program.program_name)
                .unwrap_or_default()
                .into_iter()
                .map(|rule| into_adjustment(offering.id.clone(), rule))
                .collect();
            staged.push((offering, rules));
        }

        let mut adjustment_count = 0;
        let program_count = staged.len();
        for (offering, rules) in staged {
            adjustment_count += rules.len();
            let offering_id = self.store.put_offering(offering)?;
            self.store
                .replace_adjustments(&offering_id, effective, rules)?;
        }

        sheet.effective_date = Some(effective);
        Ok((program_count, adjustment_count))
    }

    /// Match by slug hint, then by derived slug, then by name. Unknown
    /// programs fail the job so an operator can add the template or alias.
    fn resolve_program_type(&self, program: &ExtractedProgram) -> Result<ProgramType, IngestError> {
        if let Some(hint) = &program.program_type {
            if let Some(found) = self.store.program_type_by_slug(hint)? {
                return Ok(found);
            }
        }
        if let Some(found) = self
            .store
            .program_type_by_slug(&slugify(&program.program_name))?
        {
            return Ok(found);
        }
        if let Some(found) = self.store.program_type_by_name(&program.program_name)? {
            return Ok(found);
        }
        Err(IngestError::UnresolvedProgram(program.program_name.clone()))
    }

    /// Build the post-ingest offering row and check every applied field
    /// tightens-or-equals the program envelope.
    fn staged_offering(
        &self,
        sheet: &RateSheet,
        program: &ExtractedProgram,
        program_type: &ProgramType,
    ) -> Result<LenderProgramOffering, IngestError> {
        let existing = self
            .store
            .offering_for(&sheet.lender_id, &program_type.id)?;

        let mut offering = match existing {
            Some(existing) => existing,
            None => {
                let base_rate = program
                    .base_rate
                    .ok_or_else(|| IngestError::MissingBaseRate(program.program_name.clone()))?;
                LenderProgramOffering {
                    id: OfferingId::next(),
                    lender_id: sheet.lender_id.clone(),
                    program_type_id: program_type.id.clone(),
                    min_rate: base_rate,
                    max_rate: base_rate,
                    min_points: 0.0,
                    max_points: 0.0,
                    lender_fee: 0.0,
                    min_fico: program_type.base_min_fico,
                    max_ltv: program_type.base_max_ltv,
                    min_dscr: program_type.base_min_dscr,
                    min_loan: 0,
                    max_loan: u64::MAX,
                    rate_sheet_url: None,
                    last_rate_update: None,
                    io_offered: false,
                    ysp_available: false,
                    lock_periods: vec![30],
                    active: true,
                    notes: format!("created from rate sheet {}", sheet.id),
                }
            }
        };

        if let Some(rate) = program.base_rate {
            offering.min_rate = rate;
            offering.max_rate = offering.max_rate.max(rate);
        }
        if let Some(fico) = program.min_fico {
            offering.min_fico = fico;
        }
        if let Some(ltv) = program.max_ltv {
            offering.max_ltv = ltv;
        }
        if let Some(min_loan) = program.min_loan {
            offering.min_loan = min_loan;
        }
        if let Some(max_loan) = program.max_loan {
            offering.max_loan = max_loan;
        }

        if offering.min_fico < program_type.base_min_fico {
            return Err(StoreError::Validation(ValidationError::FicoBelowEnvelope {
                program: program_type.name.clone(),
                floor: program_type.base_min_fico,
                offering: offering.min_fico,
            })
            .into());
        }
        if offering.max_ltv > program_type.base_max_ltv {
            return Err(StoreError::Validation(ValidationError::LtvAboveEnvelope {
                program: program_type.name.clone(),
                ceiling: program_type.base_max_ltv,
                offering: offering.max_ltv,
            })
            .into());
        }
        if offering.min_loan > offering.max_loan {
            return Err(StoreError::Validation(ValidationError::LoanRangeInverted {
                min: offering.min_loan,
                max: offering.max_loan,
            })
            .into());
        }

        Ok(offering)
    }
}

fn into_adjustment(offering_id: OfferingId, rule: NormalizedAdjustment) -> RateAdjustment {
    RateAdjustment {
        offering_id,
        kind: rule.kind,
        rule: rule.rule,
        adjustment_points: rule.adjustment_points,
    }
}

fn slugify(name: &str) -> String {
    let mut slug = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::domain::{
        DocumentationLevel, EntityType, Lender, LoanPurpose, LoanType, Occupancy, ProgramCategory,
        ProgramTypeId, PropertyType, RegionCode,
    };
    use crate::catalog::InMemoryCatalog;
    use crate::clock::ManualClock;
    use crate::ingestion::extract::DeterministicExtractor;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn coordinator() -> (Arc<InMemoryCatalog>, IngestionCoordinator<InMemoryCatalog>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryCatalog::new(clock.clone()));
        store
            .put_lender(Lender {
                id: LenderId("summit".to_string()),
                display_name: "Summit Funding".to_string(),
                licensed_regions: vec![RegionCode::parse("CA").unwrap()],
                active: true,
            })
            .expect("lender");
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
                allowed_purposes: vec![LoanPurpose::Purchase],
                active: true,
            })
            .expect("program type");

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
program,slug,base_rate,min_fico,max_ltv,min_loan,max_loan\n\
DSCR 30yr,dscr-30,6.500,660,80,150000,2000000\n\
\n\
program,kind,row_min,row_max,col_min,col_max,value_key,points\n\
DSCR 30yr,fico_ltv,620,660,60,75,,-0.25\n";

    #[test]
    fn submit_requires_a_known_lender() {
        let (_store, coordinator) = coordinator();
        let error = coordinator
            .submit_file(
                LenderId("nobody".to_string()),
                DeclaredType::Csv,
                SHEET.as_bytes().to_vec(),
            )
            .expect_err("unknown lender rejected");
        assert!(matches!(
            error,
            IngestError::Store(StoreError::Validation(ValidationError::UnknownLender(_)))
        ));
    }

    #[tokio::test]
    async fn tick_processes_a_pending_sheet() {
        let (store, coordinator) = coordinator();
        let id = coordinator
            .submit_file(
                LenderId("summit".to_string()),
                DeclaredType::Csv,
                SHEET.as_bytes().to_vec(),
            )
            .expect("submit");

        assert_eq!(coordinator.tick().await, 1);

        let sheet = store.sheet(&id).unwrap().unwrap();
        assert_eq!(sheet.state, SheetState::Processed);
        assert_eq!(
            sheet.effective_date,
            NaiveDate::from_ymd_opt(2026, 8, 3)
        );

        let offering = store
            .offering_for(
                &LenderId("summit".to_string()),
                &ProgramTypeId("pt-dscr".to_string()),
            )
            .unwrap()
            .expect("offering created");
        assert_eq!(offering.min_rate, 6.5);
        assert_eq!(offering.min_fico, 660);
        assert_eq!(store.adjustments_for(&offering.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tick_with_nothing_pending_is_a_no_op() {
        let (_store, coordinator) = coordinator();
        assert_eq!(coordinator.tick().await, 0);
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("DSCR 30yr"), "dscr-30yr");
        assert_eq!(slugify("Bank Statement / Alt Doc"), "bank-statement-alt-doc");
    }
}
