//! Rate-sheet ingestion: lifecycle tracking, pluggable extraction, the
//! coordinator that applies extractions to the catalog, and the downloader
//! that feeds it.

pub mod coordinator;
pub mod downloader;
pub mod extract;
pub mod router;
pub mod sheet;

pub use coordinator::{IngestError, IngestionCoordinator};
pub use downloader::{
    FetchError, HttpSheetFetcher, LenderSource, PollSummary, RateSheetDownloader, SheetFetcher,
};
pub use extract::{
    AiExtractor, CompletionGateway, DeterministicExtractor, ExtractionDocument, ExtractionError,
    ExtractorRegistry, RateSheetExtractor, RateSheetFile, TextTranscriber,
};
pub use router::{ratesheet_router, IngestionApi, SheetSubmission};
pub use sheet::{
    content_hash, DeclaredType, RateSheet, SheetId, SheetState, SheetTransitionError, SheetView,
};
