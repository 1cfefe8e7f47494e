//! Layer lifecycle management
//!
//! Owns the [`LiveLayer`] between attach and removal and drives it through
//! its states:
//!
//! ```text
//!              initialize                    teardown
//! UNATTACHED ─────────────▶ ATTACHED ─────────────────▶ REMOVED
//!                             │  ▲
//!                             └──┘ style replaced and layer gone: initialize again
//! ```
//!
//! # Layer events
//!
//! - `Loaded` (once per layer, before any `Updated`): loaded message, settle
//!   timer for the initial viewport features, legend data, global histograms,
//!   initial visibility, label overlay.
//! - `Updated` (every viewport recomputation): histogram and math variables,
//!   label refresh.
//!
//! Events carrying the handle of a layer that is no longer current are
//! dropped.

use std::time::Duration;

use crate::bridge::EventBridge;
use crate::component::Callbacks;
use crate::compiler::{compile, VisualizationProgram, FEATURES_VARIABLE};
use crate::config::LayerConfiguration;
use crate::host::{
    EventKind, Host, HostEvent, InteractionKind, LayerHandle, SqlSource, SubscriptionId,
};
use crate::registry::{dispatch, VariableRegistry};
use crate::{labels, Result, SqlLayerError};

/// Wait between `Loaded` and reading the initial viewport features
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Layer the SQL layer is inserted beneath on bundled basemaps
pub const BUNDLED_BASEMAP_ANCHOR: &str = "watername_ocean";

/// Resolve the layer id to insert beneath
///
/// Bundled basemap ids (containing `carto`) resolve to the water name layer.
pub fn resolve_before_id(basemap_id: &str) -> &str {
    if basemap_id.contains("carto") {
        BUNDLED_BASEMAP_ANCHOR
    } else {
        basemap_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unattached,
    Attached,
    Removed,
}

/// The attached layer and the listeners bound to it
#[derive(Debug)]
pub struct LiveLayer {
    handle: LayerHandle,
    name: String,
    program: VisualizationProgram,
    subscriptions: Vec<SubscriptionId>,
    loaded: bool,
}

impl LiveLayer {
    pub fn handle(&self) -> LayerHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &VisualizationProgram {
        &self.program
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Lifecycle of the one layer a component owns
#[derive(Debug)]
pub struct LayerLifecycle {
    state: LifecycleState,
    layer: Option<LiveLayer>,
    style_subscription: Option<SubscriptionId>,
}

impl Default for LayerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerLifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Unattached,
            layer: None,
            style_subscription: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn layer(&self) -> Option<&LiveLayer> {
        self.layer.as_ref()
    }

    pub fn handle(&self) -> Option<LayerHandle> {
        self.layer.as_ref().map(|l| l.handle)
    }

    /// Whether `handle` is the layer currently owned
    pub fn is_current(&self, handle: LayerHandle) -> bool {
        self.handle() == Some(handle)
    }

    /// Build, attach and subscribe a new layer for `config`
    ///
    /// The configuration is validated before the host is touched. Listeners
    /// of a previous layer are dropped first, so a layer never has duplicate
    /// listeners.
    ///
    /// # Errors
    ///
    /// - `ConfigurationError` if the configuration is invalid
    /// - `HostError` if the host cannot create, attach or subscribe the layer
    /// - `InvalidState` after teardown
    pub fn initialize<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        config: &LayerConfiguration,
        interactions: &[InteractionKind],
    ) -> Result<LayerHandle> {
        if self.state == LifecycleState::Removed {
            return Err(SqlLayerError::InvalidState(format!(
                "Layer '{}' has been removed",
                config.name
            )));
        }
        config.validate()?;

        if let Some(stale) = self.layer.take() {
            unsubscribe_all(host, &stale.subscriptions);
        }

        let source = SqlSource::new(&config.query, &config.credentials);
        let program = compile(config);
        let handle = host.create_layer(&config.name, &source, &program)?;
        let subscriptions = match attach_and_subscribe(host, handle, config, interactions) {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                // Leave nothing half-built on the map
                if let Err(removal) = host.remove_layer(handle) {
                    tracing::warn!("Could not remove half-built {}: {}", handle, removal);
                }
                return Err(e);
            }
        };

        if self.style_subscription.is_none() {
            self.style_subscription = Some(host.subscribe_style());
        }

        tracing::info!(
            "Layer '{}' attached as {} beneath '{}'",
            config.name,
            handle,
            resolve_before_id(&config.basemap_id)
        );

        self.layer = Some(LiveLayer {
            handle,
            name: config.name.clone(),
            program,
            subscriptions,
            loaded: false,
        });
        self.state = LifecycleState::Attached;
        Ok(handle)
    }

    /// React to a host style change
    ///
    /// Returns `true` when the layer had been discarded by the host and was
    /// initialized again.
    pub fn on_style_data<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        config: &LayerConfiguration,
        interactions: &[InteractionKind],
    ) -> Result<bool> {
        if self.state != LifecycleState::Attached {
            return Ok(false);
        }
        let name = match &self.layer {
            Some(layer) => layer.name.clone(),
            None => config.name.clone(),
        };
        if self.layer.is_some() && host.has_layer(&name) {
            return Ok(false);
        }

        tracing::info!("Layer '{}' is gone after a style change, initializing again", name);
        self.initialize(host, config, interactions)?;
        host.repaint();
        Ok(true)
    }

    /// Remove the current layer and initialize a new one from `config`
    ///
    /// The current layer is only dropped once the host removed it; if removal
    /// fails the layer and its listeners are kept.
    pub fn rebuild<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        config: &LayerConfiguration,
        interactions: &[InteractionKind],
    ) -> Result<LayerHandle> {
        config.validate()?;
        if let Some(layer) = &self.layer {
            if host.has_style() {
                remove_from_host(host, layer.handle)?;
                if let Err(e) = labels::remove(host) {
                    tracing::warn!("Could not remove the label overlay: {}", e);
                }
            }
        }
        if let Some(layer) = self.layer.take() {
            unsubscribe_all(host, &layer.subscriptions);
            tracing::debug!("Layer '{}' ({}) torn down for rebuild", layer.name, layer.handle);
        }
        self.initialize(host, config, interactions)
    }

    /// Swap the data source of the current layer
    ///
    /// On failure the layer keeps its previous source.
    pub fn replace_source<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        config: &LayerConfiguration,
    ) -> Result<()> {
        let handle = self.handle().ok_or_else(|| {
            SqlLayerError::InvalidState(format!("Layer '{}' is not attached", config.name))
        })?;
        let source = SqlSource::new(&config.query, &config.credentials);
        host.replace_source(handle, &source).map_err(|e| {
            SqlLayerError::LayerUpdateError(format!(
                "Could not update the data source of '{}': {}",
                config.name, e
            ))
        })
    }

    /// Detach from the host for good
    ///
    /// Nothing is removed when the host no longer has a style.
    pub fn teardown<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        if let Some(id) = self.style_subscription.take() {
            host.unsubscribe_style(id);
        }
        self.state = LifecycleState::Removed;

        let Some(layer) = self.layer.take() else {
            return Ok(());
        };
        unsubscribe_all(host, &layer.subscriptions);

        if !host.has_style() {
            tracing::debug!("Map style is gone, nothing to remove for '{}'", layer.name);
            return Ok(());
        }

        remove_from_host(host, layer.handle)?;
        labels::remove(host).map_err(|e| {
            SqlLayerError::LayerRemovalError(format!("Could not remove the label overlay: {}", e))
        })?;
        tracing::info!("Layer '{}' removed", layer.name);
        Ok(())
    }

    /// Handle the `Loaded` event of a layer
    pub fn on_loaded<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        handle: LayerHandle,
        config: &LayerConfiguration,
        registry: &VariableRegistry,
        callbacks: &mut Callbacks,
    ) -> Result<()> {
        let Some(layer) = self.layer.as_mut().filter(|l| l.handle == handle) else {
            tracing::debug!("Ignoring 'loaded' of stale {}", handle);
            return Ok(());
        };
        if layer.loaded {
            tracing::debug!("Ignoring repeated 'loaded' of {}", handle);
            return Ok(());
        }
        layer.loaded = true;

        if let Some(on_loaded) = callbacks.on_loaded.as_mut() {
            on_loaded(&format!("layer '{}' was loaded", layer.name));
        }

        if callbacks.on_initial_viewport_features.is_some() {
            host.schedule(SETTLE_DELAY, HostEvent::SettleElapsed(handle));
        }

        if let Some(on_legend_data) = callbacks.on_legend_data.as_mut() {
            match host.legend_data(handle) {
                Ok(legend) => on_legend_data(&legend),
                Err(e) => tracing::warn!("No legend data for '{}': {}", layer.name, e),
            }
        }

        dispatch(&mut callbacks.variables, registry.on_loaded(&*host, handle));

        if let Err(e) = host.set_visible(handle, config.visible) {
            tracing::warn!("Could not apply visibility of '{}': {}", layer.name, e);
        }

        if let Some(spec) = config.labels.as_ref().filter(|l| !l.field.is_empty()) {
            labels::create(host, handle, spec)?;
        }
        Ok(())
    }

    /// Handle the `Updated` event of a layer
    pub fn on_updated<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        handle: LayerHandle,
        config: &LayerConfiguration,
        registry: &VariableRegistry,
        callbacks: &mut Callbacks,
    ) -> Result<()> {
        match self.layer.as_ref().filter(|l| l.handle == handle) {
            Some(layer) if layer.loaded => {}
            Some(_) => {
                tracing::debug!("Ignoring 'updated' of {} before 'loaded'", handle);
                return Ok(());
            }
            None => {
                tracing::debug!("Ignoring 'updated' of stale {}", handle);
                return Ok(());
            }
        }

        dispatch(&mut callbacks.variables, registry.on_updated(&*host, handle));

        if let Some(field) = config.label_field() {
            labels::refresh(host, handle, field)?;
        }
        Ok(())
    }

    /// Deliver the initial viewport features once the settle delay elapsed
    pub fn on_settled<H: Host + ?Sized>(
        &self,
        host: &mut H,
        handle: LayerHandle,
        callbacks: &mut Callbacks,
    ) {
        if !self.is_current(handle) {
            tracing::debug!("Ignoring settle timer of stale {}", handle);
            return;
        }
        if let Some(callback) = callbacks.on_initial_viewport_features.as_mut() {
            let features = host
                .feature_variable(handle, FEATURES_VARIABLE)
                .unwrap_or_default();
            callback(&features);
        }
    }
}

fn attach_and_subscribe<H: Host + ?Sized>(
    host: &mut H,
    handle: LayerHandle,
    config: &LayerConfiguration,
    interactions: &[InteractionKind],
) -> Result<Vec<SubscriptionId>> {
    host.attach_layer(handle, Some(resolve_before_id(&config.basemap_id)))?;

    let mut subscriptions = Vec::new();
    for kind in [EventKind::Loaded, EventKind::Updated] {
        match host.subscribe(handle, kind) {
            Ok(id) => subscriptions.push(id),
            Err(e) => {
                unsubscribe_all(host, &subscriptions);
                return Err(e);
            }
        }
    }
    match EventBridge::subscribe(host, handle, interactions) {
        Ok(ids) => subscriptions.extend(ids),
        Err(e) => {
            unsubscribe_all(host, &subscriptions);
            return Err(e);
        }
    }
    Ok(subscriptions)
}

fn remove_from_host<H: Host + ?Sized>(host: &mut H, handle: LayerHandle) -> Result<()> {
    host.remove_layer(handle).map_err(|e| {
        SqlLayerError::LayerRemovalError(format!("Could not remove the rendered layer: {}", e))
    })
}

fn unsubscribe_all<H: Host + ?Sized>(host: &mut H, subscriptions: &[SubscriptionId]) {
    for id in subscriptions {
        host.unsubscribe(*id);
    }
}
