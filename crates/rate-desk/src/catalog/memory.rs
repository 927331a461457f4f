use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use super::adjustments::{AdjustmentRule, RateAdjustment};
use super::domain::{
    canonicalize_regions, Lender, LenderId, LenderProgramOffering, OfferingId, ProgramType,
    ProgramTypeId, QualifyingInfo,
};
use super::store::{CatalogStore, OfferingFilter, StoreError, ValidationError};
use crate::clock::{Clock, SystemClock};
use crate::ingestion::sheet::{RateSheet, SheetId, SheetState};

#[derive(Default)]
struct CatalogState {
    lenders: HashMap<LenderId, Lender>,
    program_types: HashMap<ProgramTypeId, ProgramType>,
    offerings: HashMap<OfferingId, LenderProgramOffering>,
    adjustments: HashMap<OfferingId, (NaiveDate, Vec<RateAdjustment>)>,
    qualifying: Vec<QualifyingInfo>,
    sheets: HashMap<SheetId, RateSheet>,
    sheet_order: Vec<SheetId>,
}

/// Mutex-guarded catalog used in tests, demos, and single-node deployments.
/// Every multi-row write validates fully before mutating, which gives the
/// transactional guarantees of the `CatalogStore` contract.
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryCatalog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CatalogState::default()),
            clock,
        }
    }

    fn validate_offering(
        state: &CatalogState,
        offering: &LenderProgramOffering,
    ) -> Result<(), ValidationError> {
        if !state.lenders.contains_key(&offering.lender_id) {
            return Err(ValidationError::UnknownLender(offering.lender_id.clone()));
        }
        let program = state
            .program_types
            .get(&offering.program_type_id)
            .ok_or_else(|| ValidationError::UnknownProgramType(offering.program_type_id.clone()))?;

        if offering.min_rate > offering.max_rate {
            return Err(ValidationError::RateRangeInverted {
                min: offering.min_rate,
                max: offering.max_rate,
            });
        }
        if offering.min_loan > offering.max_loan {
            return Err(ValidationError::LoanRangeInverted {
                min: offering.min_loan,
                max: offering.max_loan,
            });
        }
        if offering.min_fico < program.base_min_fico {
            return Err(ValidationError::FicoBelowEnvelope {
                program: program.name.clone(),
                floor: program.base_min_fico,
                offering: offering.min_fico,
            });
        }
        if offering.max_ltv > program.base_max_ltv {
            return Err(ValidationError::LtvAboveEnvelope {
                program: program.name.clone(),
                ceiling: program.base_max_ltv,
                offering: offering.max_ltv,
            });
        }
        if let (Some(floor), Some(overlay)) = (program.base_min_dscr, offering.min_dscr) {
            if overlay < floor {
                return Err(ValidationError::DscrBelowEnvelope {
                    program: program.name.clone(),
                    floor,
                    offering: overlay,
                });
            }
        }

        let duplicate = state.offerings.values().any(|existing| {
            existing.id != offering.id
                && existing.lender_id == offering.lender_id
                && existing.program_type_id == offering.program_type_id
        });
        if duplicate {
            return Err(ValidationError::DuplicateOffering {
                lender: offering.lender_id.clone(),
                program: offering.program_type_id.clone(),
            });
        }

        Ok(())
    }

    fn validate_adjustment(
        offering_id: &OfferingId,
        adjustment: &RateAdjustment,
    ) -> Result<(), ValidationError> {
        if &adjustment.offering_id != offering_id {
            return Err(ValidationError::AdjustmentOfferingMismatch {
                expected: offering_id.clone(),
                found: adjustment.offering_id.clone(),
            });
        }
        if let AdjustmentRule::Grid {
            row_min,
            row_max,
            col_min,
            col_max,
        } = &adjustment.rule
        {
            let bounds = [*row_min, *row_max, *col_min, *col_max];
            if bounds.iter().any(|bound| !bound.is_finite())
                || row_min >= row_max
                || col_min >= col_max
            {
                return Err(ValidationError::MalformedGridBounds);
            }
        }
        Ok(())
    }

    fn matches_filter(
        state: &CatalogState,
        offering: &LenderProgramOffering,
        filter: &OfferingFilter,
    ) -> bool {
        if !offering.active {
            return false;
        }
        let Some(lender) = state.lenders.get(&offering.lender_id) else {
            return false;
        };
        let Some(program) = state.program_types.get(&offering.program_type_id) else {
            return false;
        };

        lender.active
            && lender.licensed_regions.contains(&filter.region)
            && program.allowed_property_types.contains(&filter.property_type)
            && program.allowed_occupancy.contains(&filter.occupancy)
            && program.allowed_entity_types.contains(&filter.entity_type)
            && program.allowed_purposes.contains(&filter.purpose)
            && filter.loan_amount >= offering.min_loan
            && filter.loan_amount <= offering.max_loan
            && filter.fico >= offering.min_fico
            && filter.ltv <= offering.max_ltv
    }
}

impl CatalogStore for InMemoryCatalog {
    fn put_lender(&self, mut lender: Lender) -> Result<LenderId, StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        lender.licensed_regions = canonicalize_regions(lender.licensed_regions);
        let id = lender.id.clone();
        state.lenders.insert(id.clone(), lender);
        Ok(id)
    }

    fn lender(&self, id: &LenderId) -> Result<Option<Lender>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state.lenders.get(id).cloned())
    }

    fn put_program_type(&self, program_type: ProgramType) -> Result<ProgramTypeId, StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        let slug_taken = state.program_types.values().any(|existing| {
            existing.id != program_type.id && existing.slug == program_type.slug
        });
        if slug_taken {
            return Err(ValidationError::DuplicateSlug(program_type.slug.clone()).into());
        }
        let id = program_type.id.clone();
        state.program_types.insert(id.clone(), program_type);
        Ok(id)
    }

    fn program_type(&self, id: &ProgramTypeId) -> Result<Option<ProgramType>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state.program_types.get(id).cloned())
    }

    fn program_type_by_slug(&self, slug: &str) -> Result<Option<ProgramType>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state
            .program_types
            .values()
            .find(|program| program.slug == slug)
            .cloned())
    }

    fn program_type_by_name(&self, name: &str) -> Result<Option<ProgramType>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state
            .program_types
            .values()
            .find(|program| program.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    fn put_offering(&self, offering: LenderProgramOffering) -> Result<OfferingId, StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        Self::validate_offering(&state, &offering)?;
        let id = offering.id.clone();
        state.offerings.insert(id.clone(), offering);
        Ok(id)
    }

    fn offering(&self, id: &OfferingId) -> Result<Option<LenderProgramOffering>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state.offerings.get(id).cloned())
    }

    fn offering_for(
        &self,
        lender_id: &LenderId,
        program_type_id: &ProgramTypeId,
    ) -> Result<Option<LenderProgramOffering>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state
            .offerings
            .values()
            .find(|offering| {
                &offering.lender_id == lender_id && &offering.program_type_id == program_type_id
            })
            .cloned())
    }

    fn delete_offering(&self, id: &OfferingId) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        if state.offerings.remove(id).is_none() {
            return Err(StoreError::NotFound);
        }
        state.adjustments.remove(id);
        Ok(())
    }

    fn replace_adjustments(
        &self,
        offering_id: &OfferingId,
        effective_date: NaiveDate,
        adjustments: Vec<RateAdjustment>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        if !state.offerings.contains_key(offering_id) {
            return Err(StoreError::NotFound);
        }
        for adjustment in &adjustments {
            Self::validate_adjustment(offering_id, adjustment)?;
        }

        state
            .adjustments
            .insert(offering_id.clone(), (effective_date, adjustments));
        let now = self.clock.now();
        if let Some(offering) = state.offerings.get_mut(offering_id) {
            offering.last_rate_update = Some(now);
        }
        Ok(())
    }

    fn adjustments_for(&self, offering_id: &OfferingId) -> Result<Vec<RateAdjustment>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state
            .adjustments
            .get(offering_id)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn find_offerings(
        &self,
        filter: &OfferingFilter,
    ) -> Result<Vec<LenderProgramOffering>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        let mut matched: Vec<LenderProgramOffering> = state
            .offerings
            .values()
            .filter(|offering| Self::matches_filter(&state, offering, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matched)
    }

    fn put_qualifying_info(&self, info: QualifyingInfo) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        state.qualifying.push(info);
        Ok(())
    }

    fn reverse_lookup(&self, offering_id: &OfferingId) -> Result<Vec<QualifyingInfo>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        let offering = state.offerings.get(offering_id).ok_or(StoreError::NotFound)?;
        Ok(state
            .qualifying
            .iter()
            .filter(|info| {
                let filter = OfferingFilter::from_profile(&info.profile);
                Self::matches_filter(&state, offering, &filter)
            })
            .cloned()
            .collect())
    }

    fn insert_sheet(&self, sheet: RateSheet) -> Result<SheetId, StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        let id = sheet.id.clone();
        if !state.sheets.contains_key(&id) {
            state.sheet_order.push(id.clone());
        }
        state.sheets.insert(id.clone(), sheet);
        Ok(id)
    }

    fn sheet(&self, id: &SheetId) -> Result<Option<RateSheet>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state.sheets.get(id).cloned())
    }

    fn update_sheet(&self, sheet: RateSheet) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        if !state.sheets.contains_key(&sheet.id) {
            return Err(StoreError::NotFound);
        }
        state.sheets.insert(sheet.id.clone(), sheet);
        Ok(())
    }

    fn claim_pending_sheet(&self, id: &SheetId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().expect("catalog mutex poisoned");
        let sheet = state.sheets.get_mut(id).ok_or(StoreError::NotFound)?;
        if sheet.state != SheetState::Pending {
            return Ok(false);
        }
        sheet
            .transition(SheetState::Processing)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(true)
    }

    fn processed_hash_exists(
        &self,
        lender_id: &LenderId,
        content_hash: &str,
        excluding: &SheetId,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state.sheets.values().any(|sheet| {
            &sheet.id != excluding
                && &sheet.lender_id == lender_id
                && sheet.content_hash == content_hash
                && sheet.state == SheetState::Processed
        }))
    }

    fn pending_sheets(&self, limit: usize) -> Result<Vec<RateSheet>, StoreError> {
        let state = self.state.lock().expect("catalog mutex poisoned");
        Ok(state
            .sheet_order
            .iter()
            .filter_map(|id| state.sheets.get(id))
            .filter(|sheet| sheet.state == SheetState::Pending)
            .take(limit)
            .cloned()
            .collect())
    }
}
