//! Catalog store: the persistence boundary owning lenders, program
//! templates, offerings, rate adjustments, and stored borrower profiles.

pub mod adjustments;
pub mod domain;
pub mod memory;
pub mod store;

pub use adjustments::{
    loan_bracket_key, parse_loan_bracket, AdjustmentKind, AdjustmentRule, RateAdjustment,
};
pub use domain::{
    canonicalize_regions, BorrowerProfile, DocumentationLevel, EntityType, Lender, LenderId,
    LenderProgramOffering, LoanPurpose, LoanType, Occupancy, OfferingId, ProgramCategory,
    ProgramType, ProgramTypeId, PropertyType, QualifyingInfo, RegionCode, RegionCodeError,
};
pub use memory::InMemoryCatalog;
pub use store::{CatalogStore, OfferingFilter, StoreError, ValidationError};
