use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for lenders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LenderId(pub String);

/// Identifier wrapper for canonical program templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramTypeId(pub String);

/// Identifier wrapper for lender program offerings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferingId(pub String);

static LENDER_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static PROGRAM_TYPE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static OFFERING_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl LenderId {
    pub fn next() -> Self {
        let id = LENDER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("lender-{id:04}"))
    }
}

impl ProgramTypeId {
    pub fn next() -> Self {
        let id = PROGRAM_TYPE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("program-{id:04}"))
    }
}

impl OfferingId {
    pub fn next() -> Self {
        let id = OFFERING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("offering-{id:06}"))
    }
}

impl fmt::Display for LenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ProgramTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for OfferingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Two-letter licensing region, canonicalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

const KNOWN_REGIONS: &[&str] = &[
    "AK", "AL", "AR", "AZ", "CA", "CO", "CT", "DC", "DE", "FL", "GA", "HI", "IA", "ID", "IL",
    "IN", "KS", "KY", "LA", "MA", "MD", "ME", "MI", "MN", "MO", "MS", "MT", "NC", "ND", "NE",
    "NH", "NJ", "NM", "NV", "NY", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VA", "VT", "WA", "WI", "WV", "WY",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCodeError {
    pub raw: String,
}

impl fmt::Display for RegionCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a known two-letter region code", self.raw)
    }
}

impl std::error::Error for RegionCodeError {}

impl RegionCode {
    pub fn parse(raw: &str) -> Result<Self, RegionCodeError> {
        let candidate = raw.trim().to_ascii_uppercase();
        if KNOWN_REGIONS.binary_search(&candidate.as_str()).is_ok() {
            Ok(Self(candidate))
        } else {
            Err(RegionCodeError {
                raw: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RegionCode {
    type Err = RegionCodeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for RegionCode {
    type Error = RegionCodeError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<RegionCode> for String {
    fn from(code: RegionCode) -> Self {
        code.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sort, deduplicate, and return a canonical licensing list.
pub fn canonicalize_regions(mut regions: Vec<RegionCode>) -> Vec<RegionCode> {
    regions.sort();
    regions.dedup();
    regions
}

/// Product family of a program template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramCategory {
    Agency,
    NonQm,
    HardMoney,
    Commercial,
}

impl ProgramCategory {
    pub const fn label(self) -> &'static str {
        match self {
            ProgramCategory::Agency => "agency",
            ProgramCategory::NonQm => "non_qm",
            ProgramCategory::HardMoney => "hard_money",
            ProgramCategory::Commercial => "commercial",
        }
    }
}

/// Amortization structure offered by a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    Fixed,
    Arm,
    InterestOnly,
}

impl LoanType {
    pub const fn label(self) -> &'static str {
        match self {
            LoanType::Fixed => "fixed",
            LoanType::Arm => "arm",
            LoanType::InterestOnly => "interest_only",
        }
    }
}

/// Income documentation expected from the borrower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentationLevel {
    FullDoc,
    AltDoc,
    BankStatement,
    NoDoc,
}

impl DocumentationLevel {
    pub const fn label(self) -> &'static str {
        match self {
            DocumentationLevel::FullDoc => "full_doc",
            DocumentationLevel::AltDoc => "alt_doc",
            DocumentationLevel::BankStatement => "bank_statement",
            DocumentationLevel::NoDoc => "no_doc",
        }
    }
}

/// Collateral categories a program will lend against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    SingleFamily,
    Condo,
    MultiFamily2To4,
    MultiFamily5Plus,
    MixedUse,
    Manufactured,
}

impl PropertyType {
    pub const fn label(self) -> &'static str {
        match self {
            PropertyType::SingleFamily => "single_family",
            PropertyType::Condo => "condo",
            PropertyType::MultiFamily2To4 => "multi_family_2_4",
            PropertyType::MultiFamily5Plus => "multi_family_5_plus",
            PropertyType::MixedUse => "mixed_use",
            PropertyType::Manufactured => "manufactured",
        }
    }
}

/// How the borrower will occupy the collateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    OwnerOccupied,
    SecondHome,
    Investment,
}

impl Occupancy {
    pub const fn label(self) -> &'static str {
        match self {
            Occupancy::OwnerOccupied => "owner_occupied",
            Occupancy::SecondHome => "second_home",
            Occupancy::Investment => "investment",
        }
    }
}

/// Vesting entity on the note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Individual,
    Llc,
    Corporation,
    Trust,
}

impl EntityType {
    pub const fn label(self) -> &'static str {
        match self {
            EntityType::Individual => "individual",
            EntityType::Llc => "llc",
            EntityType::Corporation => "corporation",
            EntityType::Trust => "trust",
        }
    }
}

/// Transaction purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanPurpose {
    Purchase,
    RateTermRefinance,
    CashOutRefinance,
}

impl LoanPurpose {
    pub const fn label(self) -> &'static str {
        match self {
            LoanPurpose::Purchase => "purchase",
            LoanPurpose::RateTermRefinance => "rate_term_refinance",
            LoanPurpose::CashOutRefinance => "cash_out_refinance",
        }
    }
}

/// Wholesale lender configured by operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lender {
    pub id: LenderId,
    pub display_name: String,
    pub licensed_regions: Vec<RegionCode>,
    pub active: bool,
}

/// Canonical product template: the loosest eligibility envelope for a
/// product. Individual lender offerings may tighten but never loosen it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramType {
    pub id: ProgramTypeId,
    pub name: String,
    pub slug: String,
    pub category: ProgramCategory,
    pub loan_type: LoanType,
    pub documentation_level: DocumentationLevel,
    pub base_min_fico: u16,
    pub base_max_ltv: f64,
    pub base_min_dscr: Option<f64>,
    pub allowed_property_types: Vec<PropertyType>,
    pub allowed_occupancy: Vec<Occupancy>,
    pub allowed_entity_types: Vec<EntityType>,
    pub allowed_purposes: Vec<LoanPurpose>,
    pub active: bool,
}

/// A lender's instance of a ProgramType, carrying its own overlays and
/// current pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LenderProgramOffering {
    pub id: OfferingId,
    pub lender_id: LenderId,
    pub program_type_id: ProgramTypeId,
    pub min_rate: f64,
    pub max_rate: f64,
    pub min_points: f64,
    pub max_points: f64,
    pub lender_fee: f64,
    pub min_fico: u16,
    pub max_ltv: f64,
    pub min_dscr: Option<f64>,
    pub min_loan: u64,
    pub max_loan: u64,
    pub rate_sheet_url: Option<String>,
    pub last_rate_update: Option<DateTime<Utc>>,
    pub io_offered: bool,
    pub ysp_available: bool,
    pub lock_periods: Vec<u16>,
    pub active: bool,
    pub notes: String,
}

impl LenderProgramOffering {
    /// Lock tier used when the caller does not supply one.
    pub fn default_lock_period(&self) -> Option<u16> {
        self.lock_periods.first().copied()
    }
}

/// Borrower qualification record consumed by the matching and pricing
/// engines. All fields required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowerProfile {
    pub property_type: PropertyType,
    pub entity_type: EntityType,
    pub purpose: LoanPurpose,
    pub occupancy: Occupancy,
    pub region: RegionCode,
    pub loan_amount: u64,
    pub ltv: f64,
    pub fico: u16,
}

/// Stored borrower profile used for reverse matching. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifyingInfo {
    pub profile: BorrowerProfile,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_codes_are_uppercased_and_validated() {
        let ca = RegionCode::parse(" ca ").expect("CA parses");
        assert_eq!(ca.as_str(), "CA");
        assert!(RegionCode::parse("ZZ").is_err());
        assert!(RegionCode::parse("").is_err());
    }

    #[test]
    fn known_regions_table_is_sorted_for_binary_search() {
        let mut sorted = KNOWN_REGIONS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KNOWN_REGIONS);
    }

    #[test]
    fn canonicalize_regions_sorts_and_dedups() {
        let regions = vec![
            RegionCode::parse("TX").unwrap(),
            RegionCode::parse("CA").unwrap(),
            RegionCode::parse("TX").unwrap(),
        ];
        let canonical = canonicalize_regions(regions);
        assert_eq!(
            canonical,
            vec![
                RegionCode::parse("CA").unwrap(),
                RegionCode::parse("TX").unwrap()
            ]
        );
    }

    #[test]
    fn profile_tokens_round_trip_snake_case() {
        let json = serde_json::to_string(&LoanPurpose::RateTermRefinance).expect("serializes");
        assert_eq!(json, "\"rate_term_refinance\"");
        let parsed: Occupancy = serde_json::from_str("\"owner_occupied\"").expect("deserializes");
        assert_eq!(parsed, Occupancy::OwnerOccupied);
    }

    #[test]
    fn minted_ids_are_unique() {
        let first = OfferingId::next();
        let second = OfferingId::next();
        assert_ne!(first, second);
    }
}
