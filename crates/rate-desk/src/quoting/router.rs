use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::pricing::AppliedAdjustment;
use super::service::{QuoteError, QuoteService, DEFAULT_QUOTE_LIMIT};
use crate::catalog::domain::{
    BorrowerProfile, EntityType, LoanPurpose, Occupancy, OfferingId, PropertyType, RegionCode,
};
use crate::catalog::store::{CatalogStore, StoreError};

/// Shared state for the quote endpoints.
pub struct QuoteApi<S> {
    pub service: Arc<QuoteService<S>>,
}

impl<S> Clone for QuoteApi<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

/// Borrower quote request. `/quote` accepts it leniently; `/qualify` uses
/// the strict variant below.
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub loan_amount: u64,
    pub property_value: u64,
    pub loan_purpose: LoanPurpose,
    pub property_type: PropertyType,
    pub property_state: String,
    pub occupancy: Occupancy,
    pub credit_score: u16,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub lock_period: Option<u16>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Same shape with a stricter schema: every field explicit, unknown fields
/// rejected.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualifyRequest {
    pub loan_amount: u64,
    pub property_value: u64,
    pub loan_purpose: LoanPurpose,
    pub property_type: PropertyType,
    pub property_state: String,
    pub occupancy: Occupancy,
    pub credit_score: u16,
    pub entity_type: EntityType,
    #[serde(default)]
    pub lock_period: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub calculated_ltv: f64,
    pub total_matches: usize,
    pub matched_programs: Vec<MatchedProgram>,
}

#[derive(Debug, Serialize)]
pub struct MatchedProgram {
    pub program_id: OfferingId,
    pub program_name: String,
    pub lender_name: String,
    pub estimated_rate_range: String,
    pub base_rate: f64,
    pub total_points: f64,
    pub match_score: u8,
    pub adjustments_applied: Vec<AppliedAdjustment>,
    pub notes: Vec<String>,
}

/// Router builder for quoting, qualification, and program detail.
pub fn quote_router<S: CatalogStore + 'static>(api: QuoteApi<S>) -> Router {
    Router::new()
        .route("/api/v1/quote", post(quote_handler::<S>))
        .route("/api/v1/qualify", post(qualify_handler::<S>))
        .route("/api/v1/programs/:offering_id", get(program_handler::<S>))
        .route(
            "/api/v1/programs/:offering_id/qualifying",
            get(reverse_handler::<S>),
        )
        .with_state(api)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

struct ProfileInput {
    loan_amount: u64,
    property_value: u64,
    loan_purpose: LoanPurpose,
    property_type: PropertyType,
    property_state: String,
    occupancy: Occupancy,
    credit_score: u16,
    entity_type: EntityType,
}

/// Derive LTV from amount and value, and parse the region. Field-specific
/// failures surface as 400s.
fn build_profile(input: ProfileInput) -> Result<(BorrowerProfile, f64), QuoteError> {
    if input.property_value == 0 {
        return Err(QuoteError::Validation {
            field: "property_value",
            message: "property value must be positive".to_string(),
        });
    }
    let region =
        RegionCode::parse(&input.property_state).map_err(|err| QuoteError::Validation {
            field: "property_state",
            message: err.to_string(),
        })?;

    let ltv = round2(input.loan_amount as f64 / input.property_value as f64 * 100.0);
    let profile = BorrowerProfile {
        property_type: input.property_type,
        entity_type: input.entity_type,
        purpose: input.loan_purpose,
        occupancy: input.occupancy,
        region,
        loan_amount: input.loan_amount,
        ltv,
        fico: input.credit_score,
    };
    Ok((profile, ltv))
}

fn quote_response(ltv: f64, quotes: Vec<super::service::Quote>) -> QuoteResponse {
    let matched_programs: Vec<MatchedProgram> = quotes
        .into_iter()
        .map(|quote| MatchedProgram {
            program_id: quote.offering_id,
            program_name: quote.program_name,
            lender_name: quote.lender_name,
            estimated_rate_range: format!("{:.3}% - {:.3}%", quote.base_rate, quote.max_rate),
            base_rate: quote.base_rate,
            total_points: quote.total_points,
            match_score: quote.score,
            adjustments_applied: quote.adjustments_applied,
            notes: quote.eligibility_notes,
        })
        .collect();

    QuoteResponse {
        calculated_ltv: ltv,
        total_matches: matched_programs.len(),
        matched_programs,
    }
}

fn error_response(error: QuoteError) -> Response {
    match error {
        QuoteError::Validation { field, message } => {
            let payload = json!({ "error": message, "field": field });
            (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
        }
        QuoteError::Store(StoreError::NotFound) => {
            let payload = json!({ "error": "record not found" });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        QuoteError::Store(err) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn quote_handler<S: CatalogStore + 'static>(
    State(api): State<QuoteApi<S>>,
    axum::Json(request): axum::Json<QuoteRequest>,
) -> Response {
    let limit = request.limit.unwrap_or(DEFAULT_QUOTE_LIMIT);
    let lock_period = request.lock_period;
    let input = ProfileInput {
        loan_amount: request.loan_amount,
        property_value: request.property_value,
        loan_purpose: request.loan_purpose,
        property_type: request.property_type,
        property_state: request.property_state,
        occupancy: request.occupancy,
        credit_score: request.credit_score,
        entity_type: request.entity_type.unwrap_or(EntityType::Individual),
    };

    let (profile, ltv) = match build_profile(input) {
        Ok(built) => built,
        Err(error) => return error_response(error),
    };
    match api.service.quote(&profile, limit, lock_period) {
        Ok(quotes) => (StatusCode::OK, axum::Json(quote_response(ltv, quotes))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn qualify_handler<S: CatalogStore + 'static>(
    State(api): State<QuoteApi<S>>,
    axum::Json(request): axum::Json<QualifyRequest>,
) -> Response {
    let lock_period = request.lock_period;
    let input = ProfileInput {
        loan_amount: request.loan_amount,
        property_value: request.property_value,
        loan_purpose: request.loan_purpose,
        property_type: request.property_type,
        property_state: request.property_state,
        occupancy: request.occupancy,
        credit_score: request.credit_score,
        entity_type: request.entity_type,
    };

    let (profile, ltv) = match build_profile(input) {
        Ok(built) => built,
        Err(error) => return error_response(error),
    };
    match api.service.qualify(&profile, DEFAULT_QUOTE_LIMIT, lock_period) {
        Ok(quotes) => (StatusCode::OK, axum::Json(quote_response(ltv, quotes))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn program_handler<S: CatalogStore + 'static>(
    State(api): State<QuoteApi<S>>,
    Path(offering_id): Path<String>,
) -> Response {
    match api.service.offering_detail(&OfferingId(offering_id)) {
        Ok(detail) => (StatusCode::OK, axum::Json(detail)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reverse_handler<S: CatalogStore + 'static>(
    State(api): State<QuoteApi<S>>,
    Path(offering_id): Path<String>,
) -> Response {
    match api.service.reverse(&OfferingId(offering_id)) {
        Ok(profiles) => (StatusCode::OK, axum::Json(profiles)).into_response(),
        Err(error) => error_response(error),
    }
}
