use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use oj_pipeline::config::{CliArgs, Config, Role};
use oj_pipeline::coordinator::SubmissionCoordinator;
use oj_pipeline::database::{self as db, SqliteStore};
use oj_pipeline::registry::{self, Registry, RegistryClient};
use oj_pipeline::rpc::RemoteJudge;
use oj_pipeline::sandbox::Toolchains;
use oj_pipeline::web_server::{
    build_coordinator_server, build_registry_server, build_worker_server,
};
use oj_pipeline::worker::{self, JudgeService};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;

    match cli.role {
        Role::Registry => run_registry(config).await,
        Role::Worker => run_worker(config).await,
        Role::Coordinator { flush_data } => run_coordinator(config, flush_data).await,
    }
}

async fn run_registry(config: Config) -> anyhow::Result<()> {
    let registry_config = config.registry;
    let registry = Arc::new(Registry::new(Duration::from_secs(registry_config.ttl_secs)));
    let shutdown_token = CancellationToken::new();

    let listener = TcpListener::bind(registry_config.bind())
        .context("Failed to bind registry address")?;
    let server = build_registry_server(registry.clone(), listener)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    let pruner = tokio::spawn(registry::prune_expired(
        registry,
        Duration::from_secs(registry_config.heartbeat_secs.max(1)),
        shutdown_token.clone(),
    ));
    log::info!("Registry listening on {:?}", registry_config.bind());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    server_handle.stop(true).await;
    shutdown_token.cancel();
    if let Err(e) = pruner.await {
        log::error!("Lease pruner finished with error: {:?}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    let worker_config = config.worker;
    let toolchains = Toolchains::from_config(&config.languages)?;
    let service = Arc::new(JudgeService::from_config(&worker_config, toolchains)?);
    let shutdown_token = CancellationToken::new();

    let listener =
        TcpListener::bind(worker_config.bind()).context("Failed to bind worker address")?;
    let server = build_worker_server(service, listener)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    let advertise = worker_config.advertise();
    let mut announcer = JoinSet::new();
    announcer.spawn(worker::announce(
        format!("{advertise}-{}", std::process::id()),
        advertise.clone(),
        worker_config.service_name.clone(),
        RegistryClient::new(
            &config.registry.address,
            Duration::from_secs(config.registry.request_timeout_secs),
        )?,
        Duration::from_secs(config.registry.heartbeat_secs.max(1)),
        shutdown_token.clone(),
    ));
    log::info!("Worker serving {} on {advertise}", worker_config.service_name);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // 1. Stop taking jobs, letting in-flight ones finish
    server_handle.stop(true).await;

    // 2. Stop the heartbeat and leave the registry
    shutdown_token.cancel();
    while let Some(res) = announcer.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Deregistration failed: {e:#}"),
            Err(e) => log::error!("Announcer handle finished with error: {:?}", e),
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}

async fn run_coordinator(config: Config, flush_data: bool) -> anyhow::Result<()> {
    let coordinator_config = config.coordinator;
    let db_path = match &coordinator_config.database {
        Some(path) => path.clone(),
        None => db::get_db_path()?,
    };

    if flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .context("Failed to initialize database")?;
    db::seed(&db_pool, &config.users, &config.problems).await?;

    let discovery = Arc::new(RegistryClient::new(
        &config.registry.address,
        Duration::from_secs(config.registry.request_timeout_secs),
    )?);
    let dispatcher = RemoteJudge::new(
        discovery,
        config.worker.service_name.clone(),
        coordinator_config.dispatch_attempts,
        Duration::from_secs(coordinator_config.rpc_timeout_secs),
    )?;
    let coordinator = Arc::new(SubmissionCoordinator::new(
        Arc::new(SqliteStore::new(db_pool)),
        Arc::new(dispatcher),
    ));

    let listener = TcpListener::bind(coordinator_config.bind())
        .context("Failed to bind coordinator address")?;
    let server = build_coordinator_server(coordinator, listener)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);
    log::info!("Coordinator listening on {:?}", coordinator_config.bind());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
