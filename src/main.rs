use std::{process::ExitCode, sync::Arc};

use componix::{
    config::Config,
    core::{error::OrchestratorResult, metadata::Metadata, traits::InitOutcome, Container},
    event::{EventBus, LifecycleEvent},
    logging::Logger,
    orchestration::ComponentLifecycle,
    plugin::{FnComponent, PluginManager},
};
use tokio::sync::watch;

const CONFIG_ENV: &str = "COMPONIX_CONFIG";

#[tokio::main]
async fn main() -> ExitCode {
    // Read configuration from the first argument or the environment
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());
    let config = match path {
        Some(path) => match Config::load_from_yaml(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    // Initialize logging
    let logger = Logger::new(config.log.clone());
    if let Err(e) = logger.init_env_logger() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let log_task = tokio::spawn(logger.run(shutdown_rx.clone()));

    let interrupt = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down...");
            let _ = interrupt.send(true);
        }
    });

    let result = run(&config, shutdown_rx).await;
    if let Err(e) = &result {
        log::error!("{e}");
    }

    // Stop the log writer even when the app ended on its own
    let _ = shutdown_tx.send(true);

    match log_task.await {
        Ok(Err(e)) => eprintln!("{e}"),
        Err(e) => eprintln!("Log writer stopped unexpectedly: {e}"),
        Ok(Ok(())) => {}
    }

    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(config: &Config, shutdown: watch::Receiver<bool>) -> OrchestratorResult<()> {
    let container = Arc::new(Container::new());
    let lifecycle = ComponentLifecycle::new(container.clone(), Arc::new(EventBus::new()));

    // Report every component as it comes up
    lifecycle
        .events()
        .on(LifecycleEvent::AfterInitialize)
        .run_sync(|component| {
            log::info!("Component ready: {}", component.metadata().identity());
            Ok(())
        })?;

    log::info!("Registering components...");
    let clock = FnComponent::new(
        Metadata::new("clock", env!("CARGO_PKG_VERSION")).description("Wall clock source"),
    )
    .build();

    let app = FnComponent::new(
        Metadata::new("componix-demo", env!("CARGO_PKG_VERSION"))
            .description("Demo application")
            .requires(clock.clone()),
    )
    .on_initialize(|| async {
        log::info!("Demo application started, press Ctrl-C to stop");
        Ok(InitOutcome::Ready)
    })
    .build();

    container.register_libraries(vec![("clock".to_string(), clock)])?;
    container.set_app(app)?;

    let plugins = PluginManager::new().create_plugins(&config.plugins)?;
    for plugin in &plugins {
        lifecycle.register_plugin(plugin)?;
    }

    log::info!("Starting...");
    let result = lifecycle.run(&config.lifecycle, shutdown).await;

    match serde_json::to_string_pretty(&container.snapshot()) {
        Ok(snapshot) => log::debug!("Final component state: {snapshot}"),
        Err(e) => log::warn!("Failed to serialize component snapshot: {e}"),
    }

    result
}
