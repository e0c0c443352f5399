//! Daemon bootstrap orchestration.
//!
//! Wires the validated configuration into the running services: telemetry,
//! the resource broker and its sweeper, the analytics channel, the adapter
//! socket server, and the execution pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use gantry_broker::{ResourceBroker, SweeperHandle, TenantQuotas};
use gantry_config::{Config, ConfigError, SocketPreparationError};
use gantry_ipc::server::ListenerError;
use gantry_ipc::{AdapterName, AdapterRouter, AdapterServer, ServerHandle};
use gantry_plugins::{ChainLimits, PluginRegistry, SchemaRegistry};

use crate::adapters::{
    AnalyticsAdapter, ConfigAdapter, InvokeAdapter, LoggerAdapter, LoggingQuotaMirror,
};
use crate::analytics::{AnalyticsSink, AnalyticsWorker, ChannelAnalytics};
use crate::artifacts::FsArtifactWriter;
use crate::dispatch::SandboxDispatcher;
use crate::pipeline::ExecutionPipeline;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

const BOOTSTRAP_TARGET: &str = "gantryd::bootstrap";

/// Capacity of the analytics channel between emitters and the consumer.
const ANALYTICS_CAPACITY: usize = 256;

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The configuration failed cross-field validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    /// The socket directory could not be prepared.
    #[error("failed to prepare adapter socket: {0}")]
    Socket(#[from] SocketPreparationError),
    /// The adapter server could not bind its endpoint.
    #[error("failed to start adapter server: {0}")]
    Listener(#[from] ListenerError),
}

/// The assembled daemon, owning its background services.
pub struct Runtime {
    config: Config,
    pipeline: Arc<ExecutionPipeline>,
    broker: Arc<ResourceBroker>,
    server: ServerHandle,
    sweeper: SweeperHandle,
    analytics_worker: AnalyticsWorker,
    telemetry: TelemetryHandle,
}

impl Runtime {
    /// The resolved configuration the daemon runs under.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The execution pipeline serving requests.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<ExecutionPipeline> {
        &self.pipeline
    }

    /// The resource broker backing quota decisions.
    #[must_use]
    pub fn broker(&self) -> &Arc<ResourceBroker> {
        &self.broker
    }

    /// The telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Stops the background services, newest first.
    pub fn shutdown(self) {
        self.server.shutdown();
        drop(self.server.join());
        self.sweeper.join();
        self.analytics_worker.join();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Runtime")
            .field("socket", &self.config.adapter_socket)
            .finish_non_exhaustive()
    }
}

/// Assembles the daemon from its configuration and registries.
///
/// # Errors
///
/// Returns [`BootstrapError`] when the configuration is invalid, telemetry
/// cannot be installed, or the adapter socket cannot be prepared or bound.
pub fn bootstrap(
    config: Config,
    plugins: PluginRegistry,
    schemas: SchemaRegistry,
    artifact_root: impl Into<PathBuf>,
) -> Result<Runtime, BootstrapError> {
    config.validate()?;
    let telemetry = telemetry::initialise(&config)?;
    config.adapter_socket.prepare_filesystem()?;

    let broker = Arc::new(
        ResourceBroker::new(TenantQuotas::from(config.quotas))
            .with_mirror(Arc::new(LoggingQuotaMirror)),
    );
    let sweeper = broker.start_sweeper(Duration::from_millis(config.broker.sweep_interval_ms));

    let (analytics, analytics_worker) = ChannelAnalytics::start(ANALYTICS_CAPACITY);
    let analytics: Arc<dyn AnalyticsSink> = Arc::new(analytics);

    let dispatcher = SandboxDispatcher::new(config.execution.clone(), &config.adapter_socket);
    let limits = ChainLimits::from_settings(&config.chain, &config.execution);
    let plugin_count = plugins.len();
    let pipeline = Arc::new(ExecutionPipeline::new(
        Arc::new(plugins),
        Arc::new(schemas),
        Arc::clone(&broker),
        Arc::new(dispatcher),
        Arc::clone(&analytics),
        Arc::new(FsArtifactWriter::new(artifact_root)),
        limits,
    ));

    let config_values = serde_json::to_value(&config).unwrap_or_default();
    let router = AdapterRouter::new()
        .register(AdapterName::Config, Arc::new(ConfigAdapter::new(config_values)))
        .register(AdapterName::Logger, Arc::new(LoggerAdapter))
        .register(
            AdapterName::Analytics,
            Arc::new(AnalyticsAdapter::new(Arc::clone(&analytics))),
        )
        .register(
            AdapterName::Invoke,
            Arc::new(InvokeAdapter::new(Arc::clone(&pipeline))),
        );
    let server = AdapterServer::new(router)
        .with_bulk_settings(config.bulk_transfer.clone())
        .start(&config.adapter_socket)?;

    info!(
        target: BOOTSTRAP_TARGET,
        socket = %config.adapter_socket,
        plugins = plugin_count,
        "daemon ready"
    );

    Ok(Runtime {
        config,
        pipeline,
        broker,
        server,
        sweeper,
        analytics_worker,
        telemetry,
    })
}
