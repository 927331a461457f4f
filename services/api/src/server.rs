use crate::cli::ServeArgs;
use crate::infra::{declared_type_for, seed_demo_catalog, AppState};
use crate::routes::with_core_routes;
use axum_prometheus::PrometheusMetricLayer;
use rate_desk::catalog::{InMemoryCatalog, LenderId};
use rate_desk::clock::{Clock, SystemClock};
use rate_desk::config::AppConfig;
use rate_desk::error::AppError;
use rate_desk::ingestion::{
    AiExtractor, DeterministicExtractor, ExtractorRegistry, HttpSheetFetcher,
    IngestionApi, IngestionCoordinator, LenderSource, RateSheetDownloader, TextTranscriber,
};
use rate_desk::ingestion::extract::model::HttpCompletionGateway;
use rate_desk::quoting::{QuoteApi, QuoteService};
use rate_desk::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryCatalog::new(clock.clone()));
    if args.seed_demo {
        seed_demo_catalog(store.as_ref())?;
        info!("demo catalog seeded");
    }

    let mut registry = ExtractorRegistry::new(Arc::new(DeterministicExtractor::standard()));
    if config.model.configured() {
        let timeout = Duration::from_secs(config.ingestion.ai_timeout_secs);
        match HttpCompletionGateway::new(&config.model, timeout) {
            Ok(gateway) => {
                registry.register_ai(Arc::new(AiExtractor::new(
                    Arc::new(TextTranscriber),
                    Arc::new(gateway),
                    config.ingestion.transcript_char_limit,
                )));
                info!(model = %config.model.model, "AI extraction backend registered");
            }
            Err(err) => warn!(error = %err, "AI backend unavailable, using deterministic parsers"),
        }
    }
    let registry = Arc::new(registry);

    let coordinator = Arc::new(IngestionCoordinator::new(
        store.clone(),
        registry,
        clock.clone(),
        config.ingestion.clone(),
    ));
    let quote_service = Arc::new(QuoteService::new(store.clone(), clock.clone()));

    spawn_ingestion_loop(coordinator.clone());
    spawn_downloader_loop(&config, coordinator.clone());

    let app = with_core_routes(
        QuoteApi {
            service: quote_service,
        },
        IngestionApi {
            coordinator,
            store,
        },
        app_state,
    )
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "rate desk pricing service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_ingestion_loop(coordinator: Arc<IngestionCoordinator<InMemoryCatalog>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            interval.tick().await;
            let processed = coordinator.tick().await;
            if processed > 0 {
                info!(processed, "ingestion tick complete");
            }
        }
    });
}

fn spawn_downloader_loop(config: &AppConfig, coordinator: Arc<IngestionCoordinator<InMemoryCatalog>>) {
    if config.downloader.sources.is_empty() {
        return;
    }

    let sources: Vec<LenderSource> = config
        .downloader
        .sources
        .iter()
        .map(|(lender, url)| LenderSource {
            lender_id: LenderId(lender.clone()),
            url: url.clone(),
            basic_auth: None,
            declared_type: declared_type_for(url),
        })
        .collect();

    let fetcher = match HttpSheetFetcher::new(Duration::from_secs(
        config.downloader.download_timeout_secs,
    )) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => {
            warn!(error = %err, "downloader disabled: could not build HTTP client");
            return;
        }
    };

    let downloader = Arc::new(RateSheetDownloader::new(coordinator, fetcher, sources));
    let poll_interval = Duration::from_secs(config.downloader.poll_interval_secs.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            let worker = downloader.clone();
            match tokio::task::spawn_blocking(move || worker.poll()).await {
                Ok(summary) => {
                    if summary.submitted > 0 || summary.failed > 0 {
                        info!(
                            submitted = summary.submitted,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            "rate sheet poll complete"
                        );
                    }
                }
                Err(err) => warn!(error = %err, "rate sheet poll worker failed"),
            }
        }
    });
}
