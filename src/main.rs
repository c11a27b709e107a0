use std::sync::Arc;

use anyhow::Context;
use poem::{Route, Server, listener::TcpListener};
use poem_openapi::OpenApiService;
use sqlx::postgres::PgPoolOptions;
use tokio::main;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use outbox_relay::{
    application::{
        handlers::relay_worker::RelayWorker,
        scheduler::RelayScheduler,
        services::{
            circuit_breaker::CircuitBreaker, event_bus::EventPublisher, relay_status::RelayStatus,
        },
        usecases::{
            get_event::GetEventUseCase, list_events::ListEventsUseCase,
            relay_health::RelayHealthUseCase, requeue_event::RequeueEventUseCase,
        },
    },
    config::Config,
    domain::repositories::OutboxRepository,
    infrastructure::{
        messaging::jetstream::JetstreamPublisher,
        repositories::postgres::PostgresOutboxRepository,
    },
    presentation::http::endpoints::{
        health::HealthEndpoints, outbox::OutboxEndpoints, root::ApiState,
    },
    telemetry,
};

#[main]
async fn main() -> anyhow::Result<()> {
    let config = Config::try_parse()?;
    telemetry::init(config.log_format)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.relay.store_timeout)
        .connect(&config.database.url)
        .await
        .context("failed to connect to outbox store")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run outbox migrations")?;

    let repo: Arc<dyn OutboxRepository> = PostgresOutboxRepository::new(pool.clone());
    let publisher: Arc<dyn EventPublisher> = JetstreamPublisher::connect(&config.jetstream)
        .await
        .context("failed to connect to broker")?;
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
    let status = Arc::new(RelayStatus::new());

    let workers: Vec<RelayWorker> = (0..config.relay.workers)
        .map(|n| {
            RelayWorker::new(
                format!("relay-{}-{n}", std::process::id()),
                repo.clone(),
                publisher.clone(),
                breaker.clone(),
                config.relay.clone(),
            )
        })
        .collect();

    let state = Arc::new(ApiState {
        list_events_usecase: Arc::new(ListEventsUseCase::new(repo.clone())),
        get_event_usecase: Arc::new(GetEventUseCase::new(repo.clone())),
        requeue_event_usecase: Arc::new(RequeueEventUseCase::new(repo.clone())),
        relay_health_usecase: Arc::new(RelayHealthUseCase::new(
            repo,
            publisher,
            breaker,
            status.clone(),
        )),
    });

    let server_url = format!("http://{}:{}", config.http.host, config.http.port);
    let api_service = OpenApiService::new(
        (
            HealthEndpoints::new(state.clone()),
            OutboxEndpoints::new(state),
        ),
        "Outbox Relay API",
        env!("CARGO_PKG_VERSION"),
    )
    .server(format!("{server_url}/api"));
    let ui = api_service.swagger_ui();
    let app = Route::new().nest("/api", api_service).nest("/", ui);

    let cancel = CancellationToken::new();
    let relay = RelayScheduler::new(workers, status, config.relay.poll_interval)
        .spawn(cancel.clone());

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            cancel.cancel();
        }
    });

    info!(
        url = %server_url,
        workers = config.relay.workers,
        batch_size = config.relay.batch_size,
        "outbox relay started"
    );

    let server = Server::new(TcpListener::bind(format!(
        "{}:{}",
        config.http.host, config.http.port
    )))
    .run_with_graceful_shutdown(
        app,
        {
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        },
        Some(config.shutdown_grace),
    );

    let (served, finished) = relay.run_with(server, config.shutdown_grace).await;
    if !finished {
        warn!("in-flight claims will be recovered after the staleness threshold");
    }
    pool.close().await;
    info!("outbox relay stopped");

    served.context("http server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
