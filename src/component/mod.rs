//! The SQL layer component
//!
//! [`SqlLayer`] ties configuration, lifecycle, reconciliation, variables and
//! interactions together. The application shell drives it with three calls
//! and a stream of host events:
//!
//! ```text
//! mount(config) ──▶ ACTIVE ──update(config)──▶ ACTIVE ──unmount──▶ TORN DOWN
//!                     ▲  │
//!                     └──┘ handle_event(StyleData | Loaded | Updated | SettleElapsed | Interaction)
//! ```
//!
//! Events arriving before `mount` or after `unmount` are ignored.

use crate::bridge::{EventBridge, InteractionCallbacks};
use crate::compiler::VisualizationProgram;
use crate::config::LayerConfiguration;
use crate::host::{
    Coordinates, Feature, Host, HostEvent, InteractionKind, LayerHandle, Legend,
};
use crate::lifecycle::LayerLifecycle;
use crate::reconcile::{reconcile, ReconcileReport};
use crate::registry::{VariableCallbacks, VariableRegistry, VariableResult};
use crate::{Result, SqlLayerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Uninitialized,
    Active,
    TornDown,
}

/// Callbacks supplied by the application shell
///
/// Every callback is optional. Variable callbacks are looked up by the
/// callback name used in the variable declarations.
#[derive(Default)]
pub struct Callbacks {
    pub on_loaded: Option<Box<dyn FnMut(&str)>>,
    pub on_initial_viewport_features: Option<Box<dyn FnMut(&[Feature])>>,
    pub on_legend_data: Option<Box<dyn FnMut(&Legend)>>,
    pub interactions: InteractionCallbacks,
    pub variables: VariableCallbacks,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut variables: Vec<&String> = self.variables.keys().collect();
        variables.sort();
        f.debug_struct("Callbacks")
            .field("on_loaded", &self.on_loaded.is_some())
            .field(
                "on_initial_viewport_features",
                &self.on_initial_viewport_features.is_some(),
            )
            .field("on_legend_data", &self.on_legend_data.is_some())
            .field("interactions", &self.interactions)
            .field("variables", &variables)
            .finish()
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per layer with `layer '<name>' was loaded`
    pub fn on_loaded(mut self, f: impl FnMut(&str) + 'static) -> Self {
        self.on_loaded = Some(Box::new(f));
        self
    }

    /// Called with the viewport features once the map settled after load
    pub fn on_initial_viewport_features(mut self, f: impl FnMut(&[Feature]) + 'static) -> Self {
        self.on_initial_viewport_features = Some(Box::new(f));
        self
    }

    pub fn on_legend_data(mut self, f: impl FnMut(&Legend) + 'static) -> Self {
        self.on_legend_data = Some(Box::new(f));
        self
    }

    pub fn on_feature_click(mut self, f: impl FnMut(&Feature, Coordinates) + 'static) -> Self {
        self.interactions.click = Some(Box::new(f));
        self
    }

    pub fn on_feature_enter(mut self, f: impl FnMut(&Feature, Coordinates) + 'static) -> Self {
        self.interactions.enter = Some(Box::new(f));
        self
    }

    pub fn on_feature_leave(mut self, f: impl FnMut(&Feature) + 'static) -> Self {
        self.interactions.leave = Some(Box::new(f));
        self
    }

    /// Register the callback named `name` in variable declarations
    pub fn on_variable(mut self, name: &str, f: impl FnMut(VariableResult) + 'static) -> Self {
        self.variables.insert(name.to_string(), Box::new(f));
        self
    }
}

/// A SQL-backed layer bound to one map
#[derive(Debug)]
pub struct SqlLayer {
    state: ComponentState,
    config: Option<LayerConfiguration>,
    lifecycle: LayerLifecycle,
    bridge: EventBridge,
    registry: VariableRegistry,
    callbacks: Callbacks,
}

impl SqlLayer {
    pub fn new(callbacks: Callbacks) -> Self {
        Self {
            state: ComponentState::Uninitialized,
            config: None,
            lifecycle: LayerLifecycle::new(),
            bridge: EventBridge::new(),
            registry: VariableRegistry::new(),
            callbacks,
        }
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    /// Configuration currently in effect
    pub fn config(&self) -> Option<&LayerConfiguration> {
        self.config.as_ref()
    }

    pub fn layer_handle(&self) -> Option<LayerHandle> {
        self.lifecycle.handle()
    }

    /// Program of the live layer
    pub fn program(&self) -> Option<&VisualizationProgram> {
        self.lifecycle.layer().map(|l| l.program())
    }

    fn interactions(&self, config: &LayerConfiguration) -> Vec<InteractionKind> {
        self.callbacks.interactions.wanted(config.highlight.is_some())
    }

    /// Attach a layer for `config`
    ///
    /// # Errors
    ///
    /// `ConfigurationError` before any host call when the configuration is
    /// invalid or a declared variable callback is not registered.
    pub fn mount<H: Host + ?Sized>(&mut self, host: &mut H, config: LayerConfiguration) -> Result<()> {
        if self.state != ComponentState::Uninitialized {
            return Err(SqlLayerError::InvalidState(format!(
                "Cannot mount a component that is {:?}",
                self.state
            )));
        }
        config.validate()?;
        let registry = VariableRegistry::from_config(&config);
        registry.check_callbacks(&self.callbacks.variables)?;

        let interactions = self.interactions(&config);
        self.lifecycle.initialize(host, &config, &interactions)?;

        tracing::info!(
            "Mounted layer '{}' with {} aggregate variable(s)",
            config.name,
            registry.len()
        );
        self.registry = registry;
        self.config = Some(config);
        self.state = ComponentState::Active;
        Ok(())
    }

    /// Bring the live layer in line with `next`
    ///
    /// On error the previous configuration stays in effect.
    pub fn update<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        next: LayerConfiguration,
    ) -> Result<ReconcileReport> {
        if self.state != ComponentState::Active {
            return Err(SqlLayerError::InvalidState(format!(
                "Cannot update a component that is {:?}",
                self.state
            )));
        }
        let Some(prev) = self.config.clone() else {
            return Err(SqlLayerError::InvalidState(
                "Active component without configuration".to_string(),
            ));
        };
        next.validate()?;
        let registry = VariableRegistry::from_config(&next);
        registry.check_callbacks(&self.callbacks.variables)?;

        let interactions = self.interactions(&next);
        let (applied, report) = reconcile(
            host,
            &mut self.lifecycle,
            &mut self.bridge,
            &prev,
            &next,
            &interactions,
        )?;

        self.registry = registry;
        self.config = Some(applied);
        Ok(report)
    }

    /// Remove the layer and stop listening to the host
    ///
    /// Unmounting twice is a no-op.
    pub fn unmount<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        if self.state == ComponentState::TornDown {
            return Ok(());
        }
        self.state = ComponentState::TornDown;
        self.bridge.reset();
        self.lifecycle.teardown(host)
    }

    /// Route a host event
    pub fn handle_event<H: Host + ?Sized>(&mut self, host: &mut H, event: HostEvent) -> Result<()> {
        if self.state != ComponentState::Active {
            tracing::debug!("Ignoring {:?} while {:?}", event, self.state);
            return Ok(());
        }
        let Some(config) = self.config.as_ref() else {
            return Ok(());
        };

        match event {
            HostEvent::StyleData => {
                let interactions = self.callbacks.interactions.wanted(config.highlight.is_some());
                if self.lifecycle.on_style_data(host, config, &interactions)? {
                    self.bridge.reset();
                }
                Ok(())
            }
            HostEvent::Loaded(handle) => self.lifecycle.on_loaded(
                host,
                handle,
                config,
                &self.registry,
                &mut self.callbacks,
            ),
            HostEvent::Updated(handle) => self.lifecycle.on_updated(
                host,
                handle,
                config,
                &self.registry,
                &mut self.callbacks,
            ),
            HostEvent::SettleElapsed(handle) => {
                self.lifecycle.on_settled(host, handle, &mut self.callbacks);
                Ok(())
            }
            HostEvent::Interaction(handle, interaction) => {
                if self.lifecycle.is_current(handle) {
                    self.bridge.handle(
                        host,
                        handle,
                        &interaction,
                        config.highlight.as_ref(),
                        &mut self.callbacks.interactions,
                    );
                } else {
                    tracing::debug!("Ignoring interaction on stale {}", handle);
                }
                Ok(())
            }
        }
    }
}
