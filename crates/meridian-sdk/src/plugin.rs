//! Plugin construction and the runtime it produces.
//!
//! A `PluginBuilder` accumulates registrations (handlers, the identifier
//! function, policies, optional callbacks) and `build()` validates them
//! into a `Plugin`. Running the plugin resolves configuration through the
//! pipeline into an immutable `Runtime`, which owns the background tasks
//! and the RPC server. There is no process-global state; everything hangs
//! off the runtime handle.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, watch};

use meridian_proto::v1 as proto;

use crate::cache::ReadingCache;
use crate::cli::Cli;
use crate::config::pipeline::{self, DeviceConfigValidator};
use crate::config::{ConfigContext, ConfigSource, DeviceConfig, NetworkConfig, PluginConfig};
use crate::device::DeviceHandler;
use crate::errors::{Result, SdkError};
use crate::output::OutputType;
use crate::policy::ConfigPolicies;
use crate::registry::{DeviceRegistry, IdentifierFn};
use crate::scheduler::Scheduler;
use crate::server::{self, PluginServer};
use crate::transaction::TransactionTracker;
use crate::version::{VersionInfo, SCHEME_MAJOR, SDK_VERSION};

/// Maps one dynamic-registration payload to device configuration.
pub type DynamicRegistrar = dyn Fn(&serde_json::Value) -> Result<Vec<DeviceConfig>> + Send + Sync;

/// Accumulates plugin registrations ahead of `build()`.
#[derive(Default)]
pub struct PluginBuilder {
    handlers: Vec<Arc<dyn DeviceHandler>>,
    identifier: Option<Arc<IdentifierFn>>,
    registrar: Option<Arc<DynamicRegistrar>>,
    validator: Option<Arc<DeviceConfigValidator>>,
    policies: ConfigPolicies,
    config: Option<PluginConfig>,
    output_types: Vec<OutputType>,
    version: VersionInfo,
}

impl PluginBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device handler. At most one handler may exist per
    /// (type, model) pair.
    pub fn register_handler(mut self, handler: impl DeviceHandler) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Set the protocol identifier function used for device ID derivation.
    /// Required.
    pub fn identifier<F>(mut self, f: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> String + Send + Sync + 'static,
    {
        self.identifier = Some(Arc::new(f));
        self
    }

    /// Set the dynamic device registrar.
    pub fn dynamic_registrar<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<Vec<DeviceConfig>> + Send + Sync + 'static,
    {
        self.registrar = Some(Arc::new(f));
        self
    }

    /// Set a semantic validator run against the unified device config.
    pub fn device_config_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&DeviceConfig) -> Result<()> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Override the default config-source policies.
    pub fn policies(mut self, policies: ConfigPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Supply the plugin config in code, for use when no config file is
    /// present (or the file source is prohibited).
    pub fn plugin_config(mut self, config: PluginConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register output types in code, alongside any loaded from files.
    pub fn register_output_type(mut self, output: OutputType) -> Self {
        self.output_types.push(output);
        self
    }

    /// Set build-time version metadata.
    pub fn version_info(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    /// Validate the registrations and produce a `Plugin`.
    pub fn build(self) -> Result<Plugin> {
        let identifier = self.identifier.ok_or_else(|| {
            SdkError::Validation("plugin requires a protocol identifier function".to_string())
        })?;

        let mut handlers: HashMap<(String, String), Arc<dyn DeviceHandler>> = HashMap::new();
        for handler in self.handlers {
            let key = (
                handler.device_type().to_string(),
                handler.model().to_string(),
            );
            if handlers.insert(key.clone(), handler).is_some() {
                return Err(SdkError::Validation(format!(
                    "duplicate device handler for {}/{}",
                    key.0, key.1
                )));
            }
        }

        Ok(Plugin {
            handlers,
            identifier,
            registrar: self.registrar,
            validator: self.validator,
            policies: self.policies,
            config: self.config,
            output_types: self.output_types,
            version: self.version,
        })
    }
}

/// A built plugin, ready to run.
pub struct Plugin {
    handlers: HashMap<(String, String), Arc<dyn DeviceHandler>>,
    identifier: Arc<IdentifierFn>,
    registrar: Option<Arc<DynamicRegistrar>>,
    validator: Option<Arc<DeviceConfigValidator>>,
    policies: ConfigPolicies,
    config: Option<PluginConfig>,
    output_types: Vec<OutputType>,
    version: VersionInfo,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("policies", &self.policies)
            .field("config", &self.config)
            .field("output_types", &self.output_types)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    pub fn builder() -> PluginBuilder {
        PluginBuilder::new()
    }

    /// Run the plugin: parse CLI flags, resolve configuration, and serve
    /// until the shutdown signal.
    ///
    /// `--version` prints build metadata and returns immediately;
    /// `--dry-run` returns after configuration resolves cleanly.
    pub async fn run(&self) -> Result<()> {
        let cli = Cli::parse();

        if cli.version {
            // Only the code-supplied config is available this early; the
            // file-resolved config would require the full pipeline.
            let name = self
                .config
                .as_ref()
                .map(|c| c.name.as_str())
                .unwrap_or("plugin");
            println!("{}\n{}", name, self.version.format());
            return Ok(());
        }

        // The plugin config is resolved before logging comes up so its
        // debug flag can raise the level.
        let plugin_config = pipeline::plugin_config_stage(&self.policies, self.config.as_ref())?;
        init_logging(cli.debug || plugin_config.debug);

        tracing::info!(
            name = %plugin_config.name,
            sdk = SDK_VERSION,
            "plugin configured"
        );

        let runtime = self.initialize(plugin_config)?;

        if cli.dry_run {
            tracing::info!("dry run complete, configuration is valid");
            return Ok(());
        }

        runtime.run().await
    }

    /// Resolve the remaining config stages and materialize the registry.
    pub fn initialize(&self, plugin_config: PluginConfig) -> Result<Runtime> {
        let mut dynamic = Vec::new();
        if let Some(registrar) = &self.registrar {
            for entry in &plugin_config.dynamic_registration.config {
                for mut config in registrar(entry)? {
                    if config.version.is_empty() {
                        config.version = format!("{}.0", SCHEME_MAJOR);
                    }
                    dynamic.push(ConfigContext::new(ConfigSource::Dynamic, config));
                }
            }
        }

        let output_types = pipeline::output_types_stage(&self.policies, &self.output_types)?;
        let device_config =
            pipeline::device_config_stage(&self.policies, dynamic, self.validator.as_deref())?;

        let registry = DeviceRegistry::build(
            &device_config,
            &self.handlers,
            &output_types,
            self.identifier.as_ref(),
        )?;

        if registry.is_empty() {
            tracing::warn!("no devices materialized from configuration");
        } else {
            tracing::info!(devices = registry.len(), "device registry built");
        }

        Ok(Runtime {
            config: plugin_config,
            registry: Arc::new(registry),
            version: self.version.clone(),
        })
    }
}

/// The immutable runtime handle: resolved config plus the device registry.
pub struct Runtime {
    config: PluginConfig,
    registry: Arc<DeviceRegistry>,
    version: VersionInfo,
}

impl Runtime {
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Spawn the background tasks and serve the RPC surface until a
    /// shutdown signal (SIGINT/SIGTERM) arrives.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let signal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = signal_tx.send(true);
        });

        let (readings_tx, readings_rx) = mpsc::channel(self.config.read_buffer_size);
        let (write_tx, write_rx) = mpsc::channel(self.config.write_buffer_size);
        let tracker = TransactionTracker::new(self.config.transaction_ttl);
        let cache = ReadingCache::new();

        let updater = cache.spawn_updater(readings_rx, shutdown_rx.clone());
        let reaper = tracker.spawn_reaper(shutdown_rx.clone());

        let scheduler = Scheduler::new(
            self.registry.clone(),
            tracker.clone(),
            readings_tx,
            write_rx,
            &self.config,
        );
        let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

        let network = self.network();
        let server = PluginServer::new(
            self.registry.clone(),
            cache,
            tracker,
            write_tx,
            self.metainfo(),
        );
        let result = server::serve(server, &network, shutdown_rx).await;

        // The server exits on the shutdown signal or on an error; either
        // way, stop the background tasks and wait for them cooperatively.
        let _ = shutdown_tx.send(true);
        let _ = scheduler_task.await;
        let _ = updater.await;
        let _ = reaper.await;

        result
    }

    /// The effective network settings: an unset unix address derives from
    /// the plugin name.
    fn network(&self) -> NetworkConfig {
        let mut network = self.config.network.clone();
        if network.network_type == "unix" && network.address.is_empty() {
            network.address = format!("/tmp/meridian/{}.sock", self.config.name);
        }
        network
    }

    fn metainfo(&self) -> proto::PluginMeta {
        proto::PluginMeta {
            name: self.config.name.clone(),
            version: self.version.version.clone(),
            sdk_version: SDK_VERSION.to_string(),
            build_date: self.version.build_date.clone(),
            git_commit: self.version.git_commit.clone(),
            git_tag: self.version.git_tag.clone(),
            arch: std::env::consts::ARCH.to_string(),
            os: std::env::consts::OS.to_string(),
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(%err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
