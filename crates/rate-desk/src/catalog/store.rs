use chrono::NaiveDate;

use super::adjustments::RateAdjustment;
use super::domain::{
    BorrowerProfile, EntityType, Lender, LenderId, LenderProgramOffering, LoanPurpose, Occupancy,
    OfferingId, ProgramType, ProgramTypeId, PropertyType, QualifyingInfo, RegionCode,
};
use crate::ingestion::sheet::{RateSheet, SheetId};

/// Rejected write: the record contradicts the catalog's invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("offering min FICO {offering} is below the '{program}' floor of {floor}")]
    FicoBelowEnvelope {
        program: String,
        floor: u16,
        offering: u16,
    },
    #[error("offering max LTV {offering} exceeds the '{program}' ceiling of {ceiling}")]
    LtvAboveEnvelope {
        program: String,
        ceiling: f64,
        offering: f64,
    },
    #[error("offering min DSCR {offering} is looser than the '{program}' floor of {floor}")]
    DscrBelowEnvelope {
        program: String,
        floor: f64,
        offering: f64,
    },
    #[error("rate range is inverted ({min} > {max})")]
    RateRangeInverted { min: f64, max: f64 },
    #[error("loan range is inverted ({min} > {max})")]
    LoanRangeInverted { min: u64, max: u64 },
    #[error("lender '{0}' does not exist")]
    UnknownLender(LenderId),
    #[error("program type '{0}' does not exist")]
    UnknownProgramType(ProgramTypeId),
    #[error("offering '{0}' does not exist")]
    UnknownOffering(OfferingId),
    #[error("lender '{lender}' already offers program '{program}'")]
    DuplicateOffering {
        lender: LenderId,
        program: ProgramTypeId,
    },
    #[error("program type slug '{0}' is already taken")]
    DuplicateSlug(String),
    #[error("adjustment targets offering '{expected}' but carries '{found}'")]
    AdjustmentOfferingMismatch {
        expected: OfferingId,
        found: OfferingId,
    },
    #[error("grid adjustment bounds are inverted or non-finite")]
    MalformedGridBounds,
}

/// Store failure taxonomy shared by every catalog operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Hard-filter conjunction used by the matching engine and reverse lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferingFilter {
    pub region: RegionCode,
    pub property_type: PropertyType,
    pub occupancy: Occupancy,
    pub entity_type: EntityType,
    pub purpose: LoanPurpose,
    pub loan_amount: u64,
    pub ltv: f64,
    pub fico: u16,
}

impl OfferingFilter {
    pub fn from_profile(profile: &BorrowerProfile) -> Self {
        Self {
            region: profile.region.clone(),
            property_type: profile.property_type,
            occupancy: profile.occupancy,
            entity_type: profile.entity_type,
            purpose: profile.purpose,
            loan_amount: profile.loan_amount,
            ltv: profile.ltv,
            fico: profile.fico,
        }
    }
}

/// Transactional persistence boundary for the pricing catalog. The engines
/// and the ingestion coordinator only ever see this trait, so they can be
/// exercised against the in-memory implementation; a relational adapter
/// lives behind the same contract.
pub trait CatalogStore: Send + Sync {
    fn put_lender(&self, lender: Lender) -> Result<LenderId, StoreError>;
    fn lender(&self, id: &LenderId) -> Result<Option<Lender>, StoreError>;

    fn put_program_type(&self, program_type: ProgramType) -> Result<ProgramTypeId, StoreError>;
    fn program_type(&self, id: &ProgramTypeId) -> Result<Option<ProgramType>, StoreError>;
    fn program_type_by_slug(&self, slug: &str) -> Result<Option<ProgramType>, StoreError>;
    fn program_type_by_name(&self, name: &str) -> Result<Option<ProgramType>, StoreError>;

    /// Insert or update an offering, enforcing the overlay-tightens-envelope
    /// invariant and `(lender, program_type)` uniqueness.
    fn put_offering(&self, offering: LenderProgramOffering) -> Result<OfferingId, StoreError>;
    fn offering(&self, id: &OfferingId) -> Result<Option<LenderProgramOffering>, StoreError>;
    fn offering_for(
        &self,
        lender_id: &LenderId,
        program_type_id: &ProgramTypeId,
    ) -> Result<Option<LenderProgramOffering>, StoreError>;
    /// Remove an offering and cascade-delete its adjustments.
    fn delete_offering(&self, id: &OfferingId) -> Result<(), StoreError>;

    /// Atomically swap the adjustment set for an offering and bump its
    /// `last_rate_update`. Partial failure leaves the prior set intact.
    fn replace_adjustments(
        &self,
        offering_id: &OfferingId,
        effective_date: NaiveDate,
        adjustments: Vec<RateAdjustment>,
    ) -> Result<(), StoreError>;
    fn adjustments_for(&self, offering_id: &OfferingId) -> Result<Vec<RateAdjustment>, StoreError>;

    fn find_offerings(
        &self,
        filter: &OfferingFilter,
    ) -> Result<Vec<LenderProgramOffering>, StoreError>;

    fn put_qualifying_info(&self, info: QualifyingInfo) -> Result<(), StoreError>;
    /// Stored borrower profiles that would match the given offering; the
    /// symmetric counterpart of `find_offerings`.
    fn reverse_lookup(&self, offering_id: &OfferingId) -> Result<Vec<QualifyingInfo>, StoreError>;

    fn insert_sheet(&self, sheet: RateSheet) -> Result<SheetId, StoreError>;
    fn sheet(&self, id: &SheetId) -> Result<Option<RateSheet>, StoreError>;
    fn update_sheet(&self, sheet: RateSheet) -> Result<(), StoreError>;
    /// Atomic pending→processing CAS. Returns false when the sheet is not
    /// pending, so two workers can never process the same sheet.
    fn claim_pending_sheet(&self, id: &SheetId) -> Result<bool, StoreError>;
    /// Whether another sheet for the same lender with the same content hash
    /// already finished as `processed`.
    fn processed_hash_exists(
        &self,
        lender_id: &LenderId,
        content_hash: &str,
        excluding: &SheetId,
    ) -> Result<bool, StoreError>;
    /// Pending sheets in submission order, oldest first.
    fn pending_sheets(&self, limit: usize) -> Result<Vec<RateSheet>, StoreError>;
}
