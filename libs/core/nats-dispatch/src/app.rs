//! Application context: configuration, registry, and the run loop.

use std::sync::Arc;

use core_config::{app_info, Environment};
use eyre::{Result, WrapErr};
use messaging::{ConfigError, SubscriptionBuilder, SubscriptionId, SubscriptionRegistry};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::connection::NatsBroker;
use crate::dispatcher::{Dispatcher, DispatcherState};
use crate::health::HealthServer;
use crate::metrics::{init_metrics, DispatchMetrics};

/// The application context.
///
/// One explicit object owns the configuration and the subscription registry;
/// there are no process-wide singletons. Register subscriptions, then call
/// [`App::run`].
///
/// ```rust,ignore
/// let app = App::new(AppConfig::new("js_listen_push").with_jetstream(true));
/// app.register(Subscription::builder("test.*.stream", handler).workers(10))?;
/// app.run().await?;
/// ```
pub struct App {
    config: AppConfig,
    registry: Arc<SubscriptionRegistry>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SubscriptionRegistry::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    /// Validate and register a subscription.
    pub fn register(&self, builder: SubscriptionBuilder) -> Result<SubscriptionId, ConfigError> {
        Ok(self.registry.register(builder.build()?))
    }

    /// Run the dispatch service until SIGINT/SIGTERM, then drain.
    ///
    /// This:
    /// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
    /// 2. Connects to NATS and subscribes every registered pattern
    /// 3. Starts the health server and Prometheus metrics
    /// 4. Runs the dispatcher with graceful shutdown handling
    ///
    /// # Errors
    ///
    /// Returns an error if no subscriptions are registered, the NATS
    /// connection fails, or a registered pattern cannot be subscribed.
    pub async fn run(self) -> Result<()> {
        let environment = Environment::from_env();
        core_config::tracing::init_tracing(&environment);

        let metrics_handle = init_metrics();

        let app_info = app_info!();
        info!(
            name = %app_info.name,
            version = %app_info.version,
            service = %self.config.service_name,
            environment = ?environment,
            "Starting dispatch service"
        );

        if self.registry.is_empty() {
            return Err(eyre::eyre!("no subscriptions registered"));
        }

        let broker = NatsBroker::connect(&self.config)
            .await
            .wrap_err_with(|| format!("Failed to connect to NATS at {}", self.config.url()))?;

        let inbound = broker
            .inbound(&self.registry)
            .await
            .wrap_err("Failed to subscribe registered patterns")?;

        // Shutdown signal handling
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(e) = shutdown_signal().await {
                error!(error = %e, "Error waiting for shutdown signal");
            }
            let _ = shutdown_tx.send(true);
        });

        // Health server in the background
        let health_server = HealthServer::new(self.config.health_port).with_metrics(metrics_handle);
        let health = health_server.state();
        health.set_broker_connected(true).await;
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                error!(error = %e, "Health server failed");
            }
        });

        let metrics = DispatchMetrics::new(&self.config.service_name);
        let dispatcher = Dispatcher::new(self.registry.clone(), self.config.drain_timeout, metrics);

        // Mirror dispatcher state into the readiness probe
        let mut state_rx = dispatcher.state();
        {
            let health = health.clone();
            tokio::spawn(async move {
                while state_rx.changed().await.is_ok() {
                    let running = matches!(*state_rx.borrow(), DispatcherState::Running);
                    health.set_dispatching(running).await;
                }
            });
        }

        dispatcher.run(inbound, shutdown_rx).await;

        info!("Dispatch service stopped");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
