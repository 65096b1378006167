use anyhow::Context;
use actix_web::{web, App, HttpServer};
use durable_queue::{BackoffPolicy, DurableQueue, MemoryQueue, RedisStreamQueue};
use error_types::{ApiResponse, AppError};
use kv_store::{KvStore, MemoryKv, RedisKv};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wire_server::objects::MemoryObjectStore;
use wire_server::services::FanoutWorker;
use wire_server::{handlers, jobs, metrics, AppState, Config};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting wire-server");

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("failed to load configuration (JWT_SECRET is required)")?;

    // Storage tier: Redis in production, in-memory for local development.
    let (kv, queue): (Arc<dyn KvStore>, Arc<dyn DurableQueue>) =
        if config.store.backend == "memory" {
            tracing::warn!("STORE_BACKEND=memory: state will not survive a restart");
            (
                Arc::new(MemoryKv::new()),
                Arc::new(MemoryQueue::new(BackoffPolicy::default())),
            )
        } else {
            let kv = RedisKv::connect(&config.store.redis_url)
                .await
                .context("failed to connect to Redis")?;
            tracing::info!("connected to Redis at {}", config.store.redis_url);

            let queue = RedisStreamQueue::connect(
                &config.store.redis_url,
                &config.store.queue_stream,
                &config.store.queue_group,
                BackoffPolicy::default(),
            )
            .await
            .context("failed to initialize the fan-out queue")?;
            (Arc::new(kv), Arc::new(queue))
        };

    let state = AppState::new(
        config.clone(),
        kv,
        Arc::clone(&queue),
        Arc::new(MemoryObjectStore::new()),
    );

    // Fan-out consumer.
    let worker = FanoutWorker::new(
        Arc::clone(&state.kv),
        Arc::clone(&state.coordinators),
        state.connections.clone(),
    );
    let consumer_queue = Arc::clone(&queue);
    tokio::spawn(async move {
        durable_queue::run_consumer(consumer_queue, move |payload| {
            let worker = worker.clone();
            async move {
                let result = worker.handle(payload).await;
                metrics::observe_fanout(if result.is_ok() { "ok" } else { "error" });
                result
            }
        })
        .await;
    });
    tracing::info!("fan-out consumer started");

    jobs::spawn_background_jobs(&state);

    promote_initial_admin(&state).await;

    let bind_addr = config.app.bind_addr.clone();
    tracing::info!("Starting HTTP server on {}", bind_addr);

    let app_state = web::Data::new(state);
    HttpServer::new(move || {
        // 1 MB JSON bodies; oversize payloads map to the canonical 413.
        let json_config = web::JsonConfig::default()
            .limit(1024 * 1024)
            .error_handler(|err, _req| {
                let app_error = match &err {
                    actix_web::error::JsonPayloadError::Overflow { .. }
                    | actix_web::error::JsonPayloadError::OverflowKnownLength { .. } => {
                        AppError::PayloadTooLarge
                    }
                    _ => AppError::validation(format!("Invalid JSON body: {}", err)),
                };
                actix_web::error::InternalError::from_response(
                    err,
                    actix_web::HttpResponse::build(
                        actix_web::http::StatusCode::from_u16(app_error.status_code())
                            .unwrap_or(actix_web::http::StatusCode::BAD_REQUEST),
                    )
                    .json(ApiResponse::<()>::err(app_error.to_string())),
                )
                .into()
            });

        App::new()
            .app_data(app_state.clone())
            .app_data(json_config)
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}

/// Promote the configured bootstrap handle to admin if the account exists.
async fn promote_initial_admin(state: &AppState) {
    let Some(handle) = state.config.app.initial_admin_handle.clone() else {
        return;
    };
    match state.users.resolve_handle(&handle).await {
        Ok(user_id) => match state.coordinators.user(&user_id).set_admin(true).await {
            Ok(()) => tracing::info!(handle = %handle, "initial admin promoted"),
            Err(e) => tracing::warn!(handle = %handle, "initial admin promotion failed: {}", e),
        },
        Err(_) => {
            tracing::info!(handle = %handle, "initial admin handle not registered yet");
        }
    }
}
