use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::domain::LenderId;

/// Identifier wrapper for rate-sheet history rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(pub String);

static SHEET_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl SheetId {
    pub fn next() -> Self {
        let id = SHEET_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("sheet-{id:06}"))
    }
}

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared content type of an uploaded or downloaded rate sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredType {
    Pdf,
    Csv,
    Xlsx,
}

impl DeclaredType {
    pub const fn label(self) -> &'static str {
        match self {
            DeclaredType::Pdf => "pdf",
            DeclaredType::Csv => "csv",
            DeclaredType::Xlsx => "xlsx",
        }
    }

    pub fn mime(self) -> mime::Mime {
        match self {
            DeclaredType::Pdf => mime::APPLICATION_PDF,
            DeclaredType::Csv => mime::TEXT_CSV,
            DeclaredType::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                .parse()
                .expect("static mime literal"),
        }
    }

    pub fn from_mime(mime: &mime::Mime) -> Option<Self> {
        if mime.type_() == mime::APPLICATION && mime.subtype() == "pdf" {
            Some(Self::Pdf)
        } else if mime.type_() == mime::TEXT && mime.subtype() == mime::CSV {
            Some(Self::Csv)
        } else if mime.type_() == mime::APPLICATION
            && mime.subtype() == "vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        {
            Some(Self::Xlsx)
        } else {
            None
        }
    }
}

/// Lifecycle of a rate sheet moving through ingestion.
///
/// ```text
/// received ──submit──▶ pending ──pick──▶ processing ──ok──▶ processed
///                                            └──fail──▶ failed (manual retry → pending)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetState {
    Received,
    Pending,
    Processing,
    Processed,
    Failed,
}

impl SheetState {
    pub const fn label(self) -> &'static str {
        match self {
            SheetState::Received => "received",
            SheetState::Pending => "pending",
            SheetState::Processing => "processing",
            SheetState::Processed => "processed",
            SheetState::Failed => "failed",
        }
    }
}

/// Rejected lifecycle move.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate sheet cannot move from {from} to {to}")]
pub struct SheetTransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

/// Append-only history row for one submitted rate-sheet file. The raw bytes
/// stand in for the object-store blob keyed by `content_hash`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSheet {
    pub id: SheetId,
    pub lender_id: LenderId,
    pub content_hash: String,
    pub declared_type: DeclaredType,
    pub received_at: DateTime<Utc>,
    pub state: SheetState,
    pub log: Vec<String>,
    pub effective_date: Option<NaiveDate>,
    pub extraction_ref: Option<String>,
    pub bytes: Vec<u8>,
}

impl RateSheet {
    pub fn new(
        lender_id: LenderId,
        declared_type: DeclaredType,
        bytes: Vec<u8>,
        received_at: DateTime<Utc>,
    ) -> Self {
        let content_hash = content_hash(&bytes);
        Self {
            id: SheetId::next(),
            lender_id,
            content_hash,
            declared_type,
            received_at,
            state: SheetState::Received,
            log: vec![format!("received {} bytes", bytes.len())],
            effective_date: None,
            extraction_ref: None,
            bytes,
        }
    }

    /// Move to a new lifecycle state, enforcing the state machine edges.
    /// Non-terminal transitions are re-entrant; only `processing` refuses
    /// to be entered twice.
    pub fn transition(&mut self, to: SheetState) -> Result<(), SheetTransitionError> {
        let allowed = match (self.state, to) {
            (from, to) if from == to && to != SheetState::Processing => true,
            (SheetState::Received, SheetState::Pending) => true,
            (SheetState::Pending, SheetState::Processing) => true,
            (SheetState::Processing, SheetState::Processed) => true,
            (SheetState::Processing, SheetState::Failed) => true,
            (SheetState::Failed, SheetState::Pending) => true,
            _ => false,
        };

        if !allowed {
            return Err(SheetTransitionError {
                from: self.state.label(),
                to: to.label(),
            });
        }

        self.state = to;
        Ok(())
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    /// Last log line of a failed sheet: the operator-facing reason.
    pub fn failure_reason(&self) -> Option<&str> {
        if self.state == SheetState::Failed {
            self.log.last().map(String::as_str)
        } else {
            None
        }
    }

    /// Sanitized representation for API responses (no raw bytes).
    pub fn view(&self) -> SheetView {
        SheetView {
            id: self.id.clone(),
            lender_id: self.lender_id.clone(),
            state: self.state.label(),
            content_hash: self.content_hash.clone(),
            declared_type: self.declared_type,
            received_at: self.received_at,
            effective_date: self.effective_date,
            extraction_ref: self.extraction_ref.clone(),
            log: self.log.clone(),
        }
    }
}

/// Operator-facing view of a sheet's progress.
#[derive(Debug, Clone, Serialize)]
pub struct SheetView {
    pub id: SheetId,
    pub lender_id: LenderId,
    pub state: &'static str,
    pub content_hash: String,
    pub declared_type: DeclaredType,
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_ref: Option<String>,
    pub log: Vec<String>,
}

/// Hex-encoded SHA-256 of the sheet body, used for dedup and as the
/// object-store key.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
