use std::{future, process, sync::Arc};

use evictor::{
    application::{error::AppError, report::DispatchReport},
    config::{self, Settings},
    domain::ChangeNotice,
    infra::{
        edge::{EdgeCachePurger, EdgePurgeOptions},
        error::InfraError,
        http::{self, HttpState},
        kv::{KeyValueCacheDeleter, KvOptions},
        telemetry,
    },
    invalidation::{
        DispatchConfig, InvalidationDispatcher, InvalidationTrigger, OutcomeReporter,
        SharedBackend, TargetResolver,
    },
};
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(args) => run_purge(settings, *args).await,
    }
}

fn build_trigger(settings: &Settings) -> Result<InvalidationTrigger, AppError> {
    let mut backends: Vec<SharedBackend> = Vec::new();

    if settings.edge.enabled {
        let purger = EdgeCachePurger::new(&EdgePurgeOptions::from(&settings.edge))?;
        backends.push(Arc::new(purger));
    }
    if settings.kv.enabled {
        let deleter = KeyValueCacheDeleter::new(KvOptions::from(&settings.kv));
        backends.push(Arc::new(deleter));
    }

    if backends.is_empty() {
        return Err(AppError::from(InfraError::configuration(
            "no invalidation backend is enabled",
        )));
    }

    let resolver = TargetResolver::new(
        settings.site.homepage_url.clone(),
        settings.site.derived_urls.clone(),
    )
    .with_homepage_key(settings.site.homepage_key.as_str());
    let dispatcher =
        InvalidationDispatcher::new(&DispatchConfig::from(&settings.dispatch), backends);

    info!(
        target = "evictor::startup",
        homepage = %settings.site.homepage_url,
        derived_urls = settings.site.derived_urls.len(),
        backends = ?dispatcher.backend_names(),
        max_attempts = settings.dispatch.retry_max_attempts.get(),
        "Invalidation pipeline ready"
    );

    Ok(InvalidationTrigger::new(
        resolver,
        dispatcher,
        OutcomeReporter::new(),
    ))
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let trigger = Arc::new(build_trigger(&settings)?);
    let state = HttpState::new(trigger, settings.server.webhook_token.clone());
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "evictor::serve",
        addr = %settings.server.addr,
        token_required = settings.server.webhook_token.is_some(),
        "Webhook listening"
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = stop_rx.await;
        },
    );
    let mut handle = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut handle => return server_result(joined),
        _ = shutdown_signal() => {}
    }

    info!(
        target = "evictor::serve",
        grace_seconds = settings.server.graceful_shutdown.as_secs(),
        "Shutting down"
    );
    let _ = stop_tx.send(());

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut handle).await {
        Ok(joined) => server_result(joined),
        Err(_) => {
            warn!(
                target = "evictor::serve",
                "Graceful shutdown timed out; aborting in-flight requests"
            );
            handle.abort();
            Ok(())
        }
    }
}

fn server_result(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn run_purge(settings: Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let trigger = build_trigger(&settings)?;
    let notice = ChangeNotice::new(args.content_id, args.content_url, args.action);

    let triggered = trigger.notify_until(&notice, shutdown_signal()).await?;
    let report = DispatchReport::from(&triggered);

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(format!("failed to render report: {err}")))?;
    println!("{rendered}");

    if report.has_failures() {
        return Err(AppError::Incomplete {
            failed: report.summary.failures() + report.summary.abandoned,
            total: report.outcomes.len() + report.summary.abandoned,
        });
    }

    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the signal handler cannot be installed.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "evictor::signal",
            error = %err,
            "Failed to listen for Ctrl-C"
        );
        future::pending::<()>().await;
    }
}
