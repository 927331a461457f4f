use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::coordinator::IngestionCoordinator;
use super::sheet::{content_hash, DeclaredType};
use crate::catalog::domain::LenderId;
use crate::catalog::store::CatalogStore;

/// One configured lender feed.
#[derive(Debug, Clone)]
pub struct LenderSource {
    pub lender_id: LenderId,
    pub url: String,
    pub basic_auth: Option<(String, String)>,
    pub declared_type: DeclaredType,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Seam around the HTTP fetch so polling is testable without a network.
pub trait SheetFetcher: Send + Sync {
    fn fetch(&self, source: &LenderSource) -> Result<Vec<u8>, FetchError>;
}

/// Blocking GET with optional basic auth and a fixed timeout.
pub struct HttpSheetFetcher {
    client: reqwest::blocking::Client,
}

impl HttpSheetFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl SheetFetcher for HttpSheetFetcher {
    fn fetch(&self, source: &LenderSource) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(&source.url);
        if let Some((user, password)) = &source.basic_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .map_err(|err| FetchError::Http(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: source.url.clone(),
                status: status.as_u16(),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| FetchError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Outcome counters for one polling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub submitted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Polls the configured lender URLs, deduplicates on content hash, and
/// submits changed sheets to the coordinator. Network failures are logged
/// and retried on the next pass; there is no backoff beyond the fixed
/// interval.
pub struct RateSheetDownloader<S> {
    coordinator: Arc<IngestionCoordinator<S>>,
    fetcher: Arc<dyn SheetFetcher>,
    sources: Vec<LenderSource>,
    last_hashes: Mutex<HashMap<LenderId, String>>,
}

impl<S: CatalogStore + 'static> RateSheetDownloader<S> {
    pub fn new(
        coordinator: Arc<IngestionCoordinator<S>>,
        fetcher: Arc<dyn SheetFetcher>,
        sources: Vec<LenderSource>,
    ) -> Self {
        Self {
            coordinator,
            fetcher,
            sources,
            last_hashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn poll(&self) -> PollSummary {
        let mut summary = PollSummary::default();

        for source in &self.sources {
            let bytes = match self.fetcher.fetch(source) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(lender = %source.lender_id, url = %source.url, error = %err,
                        "rate sheet download failed");
                    summary.failed += 1;
                    continue;
                }
            };
            summary.fetched += 1;

            let hash = content_hash(&bytes);
            {
                let mut last = self.last_hashes.lock().expect("hash map poisoned");
                if last.get(&source.lender_id) == Some(&hash) {
                    debug!(lender = %source.lender_id, "rate sheet unchanged, skipping");
                    summary.skipped += 1;
                    continue;
                }
                last.insert(source.lender_id.clone(), hash);
            }

            match self.coordinator.submit_file(
                source.lender_id.clone(),
                source.declared_type,
                bytes,
            ) {
                Ok(sheet_id) => {
                    info!(lender = %source.lender_id, sheet = %sheet_id,
                        "downloaded rate sheet submitted");
                    summary.submitted += 1;
                }
                Err(err) => {
                    warn!(lender = %source.lender_id, error = %err,
                        "could not submit downloaded sheet");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::domain::{Lender, RegionCode};
    use crate::catalog::{CatalogStore, InMemoryCatalog};
    use crate::clock::ManualClock;
    use crate::config::IngestionSettings;
    use crate::ingestion::extract::{DeterministicExtractor, ExtractorRegistry};
    use chrono::{TimeZone, Utc};

    struct ScriptedFetcher {
        replies: Mutex<Vec<Result<Vec<u8>, FetchError>>>,
    }

    impl SheetFetcher for ScriptedFetcher {
        fn fetch(&self, _source: &LenderSource) -> Result<Vec<u8>, FetchError> {
            self.replies
                .lock()
                .expect("replies poisoned")
                .remove(0)
        }
    }

    fn downloader(
        replies: Vec<Result<Vec<u8>, FetchError>>,
    ) -> (Arc<InMemoryCatalog>, RateSheetDownloader<InMemoryCatalog>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 8, 3, 6, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryCatalog::new(clock.clone()));
        store
            .put_lender(Lender {
                id: LenderId("summit".to_string()),
                display_name: "Summit Funding".to_string(),
                licensed_regions: vec![RegionCode::parse("CA").unwrap()],
                active: true,
            })
            .expect("lender");

        let registry = Arc::new(ExtractorRegistry::new(Arc::new(
            DeterministicExtractor::standard(),
        )));
        let coordinator = Arc::new(IngestionCoordinator::new(
            store.clone(),
            registry,
            clock,
            IngestionSettings::default(),
        ));
        let downloader = RateSheetDownloader::new(
            coordinator,
            Arc::new(ScriptedFetcher {
                replies: Mutex::new(replies),
            }),
            vec![LenderSource {
                lender_id: LenderId("summit".to_string()),
                url: "https://summit.example.com/rates.csv".to_string(),
                basic_auth: None,
                declared_type: DeclaredType::Csv,
            }],
        );
        (store, downloader)
    }

    #[test]
    fn unchanged_content_is_skipped_on_the_next_poll() {
        let body = b"program,base_rate\nDSCR 30yr,6.5\n".to_vec();
        let (store, downloader) = downloader(vec![Ok(body.clone()), Ok(body)]);

        let first = downloader.poll();
        assert_eq!(first.submitted, 1);
        let second = downloader.poll();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.submitted, 0);

        assert_eq!(store.pending_sheets(10).unwrap().len(), 1);
    }

    #[test]
    fn failures_are_non_fatal_and_counted() {
        let body = b"program,base_rate\nDSCR 30yr,6.5\n".to_vec();
        let (_store, downloader) = downloader(vec![
            Err(FetchError::Status {
                url: "https://summit.example.com/rates.csv".to_string(),
                status: 503,
            }),
            Ok(body),
        ]);

        let first = downloader.poll();
        assert_eq!(first.failed, 1);
        assert_eq!(first.fetched, 0);

        let second = downloader.poll();
        assert_eq!(second.submitted, 1);
    }

    #[test]
    fn changed_content_submits_a_new_sheet() {
        let (store, downloader) = downloader(vec![
            Ok(b"program,base_rate\nDSCR 30yr,6.5\n".to_vec()),
            Ok(b"program,base_rate\nDSCR 30yr,6.625\n".to_vec()),
        ]);

        downloader.poll();
        downloader.poll();
        assert_eq!(store.pending_sheets(10).unwrap().len(), 2);
    }
}
