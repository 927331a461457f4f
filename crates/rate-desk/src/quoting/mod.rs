//! Quote pipeline: hard-filter matching, LLPA pricing, and the stateless
//! quote façade plus its HTTP surface.

pub mod matching;
pub mod pricing;
pub mod router;
pub mod service;

pub use matching::candidates;
pub use pricing::{match_score, price, AppliedAdjustment, PricingOutcome};
pub use router::{quote_router, QualifyRequest, QuoteApi, QuoteRequest, QuoteResponse};
pub use service::{OfferingDetail, Quote, QuoteError, QuoteService, DEFAULT_QUOTE_LIMIT};
