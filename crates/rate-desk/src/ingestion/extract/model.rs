use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use super::transcript::Transcriber;
use super::{ExtractionDocument, ExtractionError, RateSheetExtractor, RateSheetFile};
use crate::config::ModelConfig;

const EXTRACTION_INSTRUCTION: &str = "You are a mortgage rate-sheet analyst. \
Read the transcript of a lender rate sheet and return ONLY a JSON object with this shape: \
{\"metadata\":{\"effective_date\":\"YYYY-MM-DD or null\",\"lender_hint\":\"string or null\"},\
\"programs\":[{\"program_name\":str,\"program_type\":\"slug or null\",\"base_rate\":num,\
\"min_fico\":num,\"max_ltv\":num,\"min_loan\":num,\"max_loan\":num,\
\"allowed_property_types\":[str],\"allowed_occupancy\":[str]}],\
\"adjustments\":[{\"program_ref\":str,\"kind\":\"fico_ltv|purpose|occupancy|property_type|loan_amount|lock_period|state\",\
\"row_min\":num,\"row_max\":num,\"col_min\":num,\"col_max\":num,\"value_key\":str,\
\"adjustment_points\":num}]}. \
Rates are percentages, LTVs are 0-100, adjustment points are signed (negative = cost). \
Every adjustment's program_ref must equal one program_name. \
Omit fields you cannot read rather than guessing.";

const REPROMPT_SUFFIX: &str = "\n\nYour previous answer was not valid JSON for the required \
schema. Respond again with nothing but the JSON object.";

/// One model round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub model_version: Option<String>,
}

/// Seam around the completion endpoint so extraction is testable with
/// recorded transcripts and canned replies.
pub trait CompletionGateway: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ExtractionError>;
}

/// Blocking chat-completions client. Shares one pooled `reqwest` client
/// across ingestion workers.
pub struct HttpCompletionGateway {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpCompletionGateway {
    pub fn new(config: &ModelConfig, timeout: Duration) -> Result<Self, ExtractionError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ExtractionError::Gateway("no API key configured".to_string()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ExtractionError::Gateway(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
        })
    }
}

impl CompletionGateway for HttpCompletionGateway {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ExtractionError> {
        let body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| ExtractionError::Gateway(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|err| ExtractionError::Gateway(err.to_string()))?;
        if !status.is_success() {
            return Err(ExtractionError::Gateway(format!(
                "completion endpoint returned {status}: {text}"
            )));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|err| ExtractionError::Gateway(format!("malformed response body: {err}")))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ExtractionError::Gateway("response body has no message content".to_string())
            })?
            .to_string();
        let model_version = value["model"].as_str().map(str::to_string);

        Ok(Completion {
            content,
            model_version,
        })
    }
}

/// One-shot AI extraction: transcript → fixed instruction → JSON-mode
/// completion → parse → validate, with a single lower-temperature reprompt
/// on parse or schema failure.
pub struct AiExtractor {
    transcriber: Arc<dyn Transcriber>,
    gateway: Arc<dyn CompletionGateway>,
    char_limit: usize,
}

impl AiExtractor {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        gateway: Arc<dyn CompletionGateway>,
        char_limit: usize,
    ) -> Self {
        Self {
            transcriber,
            gateway,
            char_limit,
        }
    }

    fn attempt(
        &self,
        prompt: &str,
        temperature: f32,
    ) -> Result<(ExtractionDocument, Option<String>), ExtractionError> {
        let completion = self.gateway.complete(&CompletionRequest {
            system: EXTRACTION_INSTRUCTION.to_string(),
            prompt: prompt.to_string(),
            temperature,
        })?;
        let document = parse_document(&completion.content)?;
        Ok((document, completion.model_version))
    }
}

impl RateSheetExtractor for AiExtractor {
    fn name(&self) -> &'static str {
        "ai"
    }

    fn extract(&self, file: &RateSheetFile) -> Result<ExtractionDocument, ExtractionError> {
        let transcript = self.transcriber.transcribe(file, self.char_limit)?;
        let prompt = format!(
            "Lender: {}\nDeclared type: {}\n\nTranscript:\n{}",
            file.lender_id,
            file.declared_type.label(),
            transcript.text
        );

        let (mut document, model_version) = match self.attempt(&prompt, 0.2) {
            Ok(parsed) => parsed,
            Err(ExtractionError::MalformedJson(_)) | Err(ExtractionError::SchemaInvalid(_)) => {
                let reprompt = format!("{prompt}{REPROMPT_SUFFIX}");
                self.attempt(&reprompt, 0.0)?
            }
            Err(other) => return Err(other),
        };

        document.metadata.extraction_method = self.name().to_string();
        document.metadata.model_version = model_version;
        Ok(document)
    }
}

/// Parse a model reply into a validated document. Tolerates markdown code
/// fences around the JSON body.
pub fn parse_document(raw: &str) -> Result<ExtractionDocument, ExtractionError> {
    let body = strip_code_fences(raw);
    let document: ExtractionDocument = serde_json::from_str(body)
        .map_err(|err| ExtractionError::MalformedJson(err.to_string()))?;
    document.validate()?;
    Ok(document)
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(stripped) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let stripped = stripped.strip_prefix("json").unwrap_or(stripped);
    stripped.strip_suffix("```").unwrap_or(stripped).trim()
}
