//! Rate-sheet extraction: file bytes in, a normalized `ExtractionDocument`
//! out. Backends never touch the catalog; retries and persistence are the
//! coordinator's job.

pub mod deterministic;
pub mod model;
pub mod normalize;
pub mod transcript;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::domain::LenderId;
use crate::catalog::AdjustmentKind;
use crate::ingestion::sheet::DeclaredType;

pub use deterministic::DeterministicExtractor;
pub use model::{AiExtractor, Completion, CompletionGateway, CompletionRequest};
pub use normalize::{normalize_document, NormalizeError, NormalizedAdjustment};
pub use transcript::{TextTranscriber, Transcriber, Transcript};

/// Input handed to an extractor: the raw sheet plus routing context.
#[derive(Debug, Clone)]
pub struct RateSheetFile {
    pub lender_id: LenderId,
    pub declared_type: DeclaredType,
    pub bytes: Vec<u8>,
}

/// Extraction failure taxonomy. Parse and schema failures are retried once
/// by the AI backend; everything else is terminal for the attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionError {
    #[error("transcript unreadable: {0}")]
    Transcript(String),
    #[error("completion request failed: {0}")]
    Gateway(String),
    #[error("model returned unparseable JSON: {0}")]
    MalformedJson(String),
    #[error("extracted document failed validation: {0}")]
    SchemaInvalid(String),
    #[error("no parser recognizes this sheet layout")]
    UnrecognizedLayout,
    #[error("no extractor named '{0}' is registered")]
    UnknownBackend(String),
}

/// Provenance block of an extraction document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub lender_hint: Option<String>,
    #[serde(default)]
    pub extraction_method: String,
    #[serde(default)]
    pub model_version: Option<String>,
}

/// One program row lifted from a sheet. Fields a parser could not read are
/// left null; the coordinator decides whether the document is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedProgram {
    pub program_name: String,
    #[serde(default)]
    pub program_type: Option<String>,
    #[serde(default)]
    pub base_rate: Option<f64>,
    #[serde(default)]
    pub min_fico: Option<u16>,
    #[serde(default)]
    pub max_ltv: Option<f64>,
    #[serde(default)]
    pub min_loan: Option<u64>,
    #[serde(default)]
    pub max_loan: Option<u64>,
    #[serde(default)]
    pub allowed_property_types: Vec<String>,
    #[serde(default)]
    pub allowed_occupancy: Vec<String>,
}

/// One LLPA row lifted from a sheet, linked to a program in the same
/// document by `program_ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAdjustment {
    pub program_ref: String,
    pub kind: AdjustmentKind,
    #[serde(default)]
    pub row_min: Option<f64>,
    #[serde(default)]
    pub row_max: Option<f64>,
    #[serde(default)]
    pub col_min: Option<f64>,
    #[serde(default)]
    pub col_max: Option<f64>,
    #[serde(default)]
    pub value_key: Option<String>,
    pub adjustment_points: f64,
}

/// The extraction contract shared by every backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDocument {
    #[serde(default)]
    pub metadata: ExtractionMetadata,
    #[serde(default)]
    pub programs: Vec<ExtractedProgram>,
    #[serde(default)]
    pub adjustments: Vec<ExtractedAdjustment>,
}

impl ExtractionDocument {
    /// Structural checks every backend output must pass before it reaches
    /// the coordinator.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        if self.programs.is_empty() {
            return Err(ExtractionError::SchemaInvalid(
                "document contains no programs".to_string(),
            ));
        }

        for program in &self.programs {
            if program.program_name.trim().is_empty() {
                return Err(ExtractionError::SchemaInvalid(
                    "program with empty name".to_string(),
                ));
            }
        }

        for adjustment in &self.adjustments {
            if !self
                .programs
                .iter()
                .any(|program| program.program_name == adjustment.program_ref)
            {
                return Err(ExtractionError::SchemaInvalid(format!(
                    "adjustment references unknown program '{}'",
                    adjustment.program_ref
                )));
            }
            if !adjustment.adjustment_points.is_finite() {
                return Err(ExtractionError::SchemaInvalid(format!(
                    "non-finite adjustment points for '{}'",
                    adjustment.program_ref
                )));
            }
            if adjustment.kind.is_grid() || grid_shaped(adjustment) {
                let bounds = [
                    adjustment.row_min,
                    adjustment.row_max,
                    adjustment.col_min,
                    adjustment.col_max,
                ];
                if adjustment.kind.is_grid() && bounds.iter().any(Option::is_none) {
                    return Err(ExtractionError::SchemaInvalid(format!(
                        "{} adjustment for '{}' is missing grid bounds",
                        adjustment.kind.label(),
                        adjustment.program_ref
                    )));
                }
            } else if adjustment
                .value_key
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
            {
                return Err(ExtractionError::SchemaInvalid(format!(
                    "{} adjustment for '{}' is missing its value key",
                    adjustment.kind.label(),
                    adjustment.program_ref
                )));
            }
        }

        Ok(())
    }
}

/// Whether a non-grid kind arrived with 2-D bounds (legacy loan-amount
/// rows); normalization migrates these to bracket keys.
pub(crate) fn grid_shaped(adjustment: &ExtractedAdjustment) -> bool {
    adjustment.row_min.is_some() && adjustment.row_max.is_some() && adjustment.value_key.is_none()
}

/// A pluggable extraction backend. Pure: same file and configuration in,
/// same document out.
pub trait RateSheetExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, file: &RateSheetFile) -> Result<ExtractionDocument, ExtractionError>;
}

/// Name-keyed backend registry with per-lender routing and the default
/// selection rule: AI (when configured) for PDFs, deterministic otherwise.
pub struct ExtractorRegistry {
    backends: BTreeMap<String, Arc<dyn RateSheetExtractor>>,
    routing: HashMap<LenderId, String>,
    ai_backend: Option<String>,
    fallback: String,
}

impl ExtractorRegistry {
    pub fn new(fallback: Arc<dyn RateSheetExtractor>) -> Self {
        let name = fallback.name().to_string();
        let mut backends: BTreeMap<String, Arc<dyn RateSheetExtractor>> = BTreeMap::new();
        backends.insert(name.clone(), fallback);
        Self {
            backends,
            routing: HashMap::new(),
            ai_backend: None,
            fallback: name,
        }
    }

    pub fn register(&mut self, backend: Arc<dyn RateSheetExtractor>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Register an AI backend and make it the default pick for PDFs.
    pub fn register_ai(&mut self, backend: Arc<dyn RateSheetExtractor>) {
        let name = backend.name().to_string();
        self.backends.insert(name.clone(), backend);
        self.ai_backend = Some(name);
    }

    /// Pin a lender to a named backend, overriding the default pick.
    pub fn route_lender(&mut self, lender_id: LenderId, backend_name: &str) {
        self.routing.insert(lender_id, backend_name.to_string());
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn RateSheetExtractor>, ExtractionError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| ExtractionError::UnknownBackend(name.to_string()))
    }

    /// Resolve the backend for a file: lender routing first, then the AI
    /// default for PDFs, then the deterministic fallback.
    pub fn select(&self, file: &RateSheetFile) -> Result<Arc<dyn RateSheetExtractor>, ExtractionError> {
        if let Some(name) = self.routing.get(&file.lender_id) {
            return self.get(name);
        }
        if file.declared_type == DeclaredType::Pdf {
            if let Some(name) = &self.ai_backend {
                return self.get(name);
            }
        }
        self.get(&self.fallback)
    }
}
