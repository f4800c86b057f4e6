use std::sync::Arc;

use tokio::sync::Mutex;

use crate::kernel::component::{DependencyRegistry, KernelComponent};
use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::lifecycle::controller::{AlwaysConfirm, DeleteConfirmation, LifecycleController};
use crate::plugin_system::loader::FailureNotifier;
use crate::plugin_system::manager::WidgetPluginManager;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::resolver::MetadataResolver;
use crate::plugin_system::traits::RegisterFn;
use crate::plugin_system::version::host_api_version;
use crate::remote::proxy::{ProxySource, ResilientProxy};
use crate::storage::config::HostConfig;
use crate::storage::local::LocalStorageProvider;
use crate::storage::settings::SettingsStore;
use crate::telemetry::engine::{SamplingIntervals, TelemetryEngine};
use crate::telemetry::monitor::HardwareMonitor;
use crate::telemetry::procfs::ProcfsMonitor;

/// Assembles a [`Host`] from configuration and optional overrides.
pub struct HostBuilder {
    config: HostConfig,
    builtins: Vec<(PluginManifest, RegisterFn)>,
    monitor: Option<Arc<dyn HardwareMonitor>>,
    confirmation: Option<Arc<dyn DeleteConfirmation>>,
    notifier: Option<Arc<dyn FailureNotifier>>,
}

impl HostBuilder {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            builtins: Vec::new(),
            monitor: None,
            confirmation: None,
            notifier: None,
        }
    }

    /// Adds a plugin compiled into the host binary.
    pub fn builtin_plugin(mut self, manifest: PluginManifest, register: RegisterFn) -> Self {
        self.builtins.push((manifest, register));
        self
    }

    /// Replaces the procfs hardware monitor.
    pub fn monitor(mut self, monitor: Arc<dyn HardwareMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn confirmation(mut self, confirmation: Arc<dyn DeleteConfirmation>) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<Host> {
        let config = self.config;
        log::info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        log::info!("Using data directory: {}", config.data_dir.display());

        let mut registry = DependencyRegistry::new();

        let provider = Arc::new(LocalStorageProvider::new(config.data_dir.clone()));
        let store = Arc::new(SettingsStore::new(provider, config.settings_file.clone()));
        registry.register_instance(store.clone());

        let monitor = self
            .monitor
            .unwrap_or_else(|| Arc::new(ProcfsMonitor::new()));
        let telemetry = Arc::new(TelemetryEngine::new(
            monitor,
            SamplingIntervals::from_config(&config.telemetry),
        ));
        telemetry.set_power_mode(config.low_power);
        registry.register_instance(telemetry.clone());

        let resolver = MetadataResolver::new(config.supported_languages.clone(), host_api_version());
        let mut manager = WidgetPluginManager::new(
            config.resolved_plugin_dirs(),
            config.plugin_data_root(),
            telemetry.clone(),
        )
        .with_resolver(resolver);
        if let Some(notifier) = self.notifier {
            manager = manager.with_notifier(notifier);
        }
        for (manifest, register) in self.builtins {
            manager.register_builtin(manifest, register);
        }
        let plugins = Arc::new(manager);
        registry.register_instance(plugins.clone());

        let confirmation = self
            .confirmation
            .unwrap_or_else(|| Arc::new(AlwaysConfirm));
        let lifecycle = Arc::new(LifecycleController::new(
            plugins.clone(),
            store.clone(),
            confirmation,
        ));
        registry.register_instance(lifecycle.clone());

        Ok(Host {
            config,
            started: false,
            dependencies: Arc::new(Mutex::new(registry)),
            store,
            telemetry,
            plugins,
            lifecycle,
        })
    }
}

/// The running widget platform: settings store, telemetry, plugins and the
/// lifecycle controller, started and stopped as one unit.
pub struct Host {
    config: HostConfig,
    started: bool,
    dependencies: Arc<Mutex<DependencyRegistry>>,
    store: Arc<SettingsStore>,
    telemetry: Arc<TelemetryEngine>,
    plugins: Arc<WidgetPluginManager>,
    lifecycle: Arc<LifecycleController>,
}

impl Host {
    pub fn builder(config: HostConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    pub fn telemetry(&self) -> &Arc<TelemetryEngine> {
        &self.telemetry
    }

    pub fn plugins(&self) -> &Arc<WidgetPluginManager> {
        &self.plugins
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    /// Gets a component instance by its concrete type.
    pub async fn get_component<T: KernelComponent + 'static>(&self) -> Option<Arc<T>> {
        self.dependencies.lock().await.get_concrete::<T>()
    }

    pub fn set_power_mode(&self, low_power: bool) {
        self.telemetry.set_power_mode(low_power);
    }

    /// Wraps `source` in a retrying proxy using the configured attempt limit.
    pub fn proxy<S: ProxySource>(&self, source: S) -> ResilientProxy<S> {
        ResilientProxy::with_max_attempts(source, self.config.proxy.max_attempts)
    }

    /// Initializes, then starts, every component in registration order.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Bootstrap,
                component_name: None,
                message: "Host already started".to_string(),
                source: None,
            });
        }

        let components = self.dependencies.lock().await.ordered_components();

        log::info!("Initializing components...");
        for component in &components {
            log::info!("Initializing component: {}", component.name());
            component.initialize().await.map_err(|e| {
                Error::lifecycle(KernelLifecyclePhase::Initialize, component.name(), e)
            })?;
        }

        log::info!("Starting components...");
        for component in &components {
            log::info!("Starting component: {}", component.name());
            component
                .start()
                .await
                .map_err(|e| Error::lifecycle(KernelLifecyclePhase::Start, component.name(), e))?;
        }

        self.started = true;
        log::info!("{} started", constants::APP_NAME);
        Ok(())
    }

    /// Stops every component in reverse order. All components are asked to
    /// stop; the first failure is returned.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        log::info!("Shutting down components...");
        let components = self.dependencies.lock().await.ordered_components();

        let mut first_error = None;
        for component in components.iter().rev() {
            log::info!("Stopping component: {}", component.name());
            if let Err(e) = component.stop().await {
                log::error!("Error stopping component {}: {}", component.name(), e);
                if first_error.is_none() {
                    first_error = Some(Error::lifecycle(
                        KernelLifecyclePhase::Shutdown,
                        component.name(),
                        e,
                    ));
                }
            }
        }
        self.started = false;
        log::info!("Component shutdown complete.");
        first_error.map_or(Ok(()), Err)
    }
}
