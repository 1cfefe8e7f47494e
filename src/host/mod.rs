//! Host abstraction layer for sqllayer
//!
//! The component never talks to a concrete map. Everything it needs from the
//! outside world goes through two traits:
//!
//! - [`MapSurface`] - the interactive map: style queries, GeoJSON sources,
//!   overlay layers, style-change notifications and timers
//! - [`VizRuntime`] - the visualization runtime: layer construction from a
//!   compiled program, channel transitions, data source swaps and aggregate
//!   variable queries
//!
//! A host implements both (see [`Host`]). Events flow the other way: the host
//! calls [`crate::SqlLayer::handle_event`] with a [`HostEvent`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sqllayer::host::RecordingHost;
//! use sqllayer::{Callbacks, HostEvent, SqlLayer};
//!
//! let mut host = RecordingHost::new();
//! let mut layer = SqlLayer::new(Callbacks::new());
//! layer.mount(&mut host, config)?;
//!
//! let handle = layer.layer_handle().unwrap();
//! layer.handle_event(&mut host, HostEvent::Loaded(handle))?;
//! ```

mod recording;
mod types;

pub use recording::{HostCall, RecordingHost};
pub use types::*;

use serde_json::Value;
use std::time::Duration;

use crate::compiler::VisualizationProgram;
use crate::Result;

/// The interactive map the layer lives on
pub trait MapSurface {
    /// Whether the map currently has a style at all
    ///
    /// Returns `false` once the map has been torn down or its style discarded.
    fn has_style(&self) -> bool;

    /// Whether a layer with this id is currently part of the map style
    fn has_layer(&self, id: &str) -> bool;

    /// Whether a source with this id is currently part of the map style
    fn has_source(&self, id: &str) -> bool;

    /// Add a GeoJSON source with initial data
    fn add_geojson_source(&mut self, id: &str, data: Value) -> Result<()>;

    /// Replace the data of an existing GeoJSON source
    fn set_source_data(&mut self, id: &str, data: Value) -> Result<()>;

    /// Remove a source that no layer uses any more
    fn remove_source(&mut self, id: &str) -> Result<()>;

    /// Add a style layer described by a style-spec JSON object
    fn add_symbol_layer(&mut self, layer: Value) -> Result<()>;

    /// Remove a style layer added with [`add_symbol_layer`](MapSurface::add_symbol_layer)
    fn remove_style_layer(&mut self, id: &str) -> Result<()>;

    /// Start delivering [`HostEvent::StyleData`] for style changes
    fn subscribe_style(&mut self) -> SubscriptionId;

    /// Stop delivering style-change notifications for this subscription
    fn unsubscribe_style(&mut self, id: SubscriptionId);

    /// Deliver `event` back to the component after `delay`
    fn schedule(&mut self, delay: Duration, event: HostEvent);

    /// Request a redraw of the map
    fn repaint(&mut self);
}

/// The visualization runtime that evaluates compiled programs
///
/// Layers are referenced by [`LayerHandle`]s minted in
/// [`create_layer`](VizRuntime::create_layer). A handle stays valid until
/// [`remove_layer`](VizRuntime::remove_layer) or until the host discards the
/// layer along with its style.
pub trait VizRuntime {
    /// Build a layer from a data source and a compiled program
    fn create_layer(
        &mut self,
        name: &str,
        source: &SqlSource,
        program: &VisualizationProgram,
    ) -> Result<LayerHandle>;

    /// Attach the layer to the map, beneath `before` when given, on top otherwise
    ///
    /// Attaching an already attached layer moves it.
    fn attach_layer(&mut self, layer: LayerHandle, before: Option<&str>) -> Result<()>;

    /// Remove the layer from the map
    fn remove_layer(&mut self, layer: LayerHandle) -> Result<()>;

    /// Swap the data source of a live layer, keeping its program
    fn replace_source(&mut self, layer: LayerHandle, source: &SqlSource) -> Result<()>;

    /// Transition a visual channel to a new expression
    fn blend_to(
        &mut self,
        layer: LayerHandle,
        channel: Channel,
        value: &str,
        duration: Duration,
    ) -> Result<()>;

    /// Transition a visual channel of one feature
    fn feature_blend_to(
        &mut self,
        layer: LayerHandle,
        feature: &FeatureId,
        channel: Channel,
        value: &str,
        duration: Duration,
    ) -> Result<()>;

    /// Return one feature's channel to the layer-wide value
    fn feature_reset(
        &mut self,
        layer: LayerHandle,
        feature: &FeatureId,
        channel: Channel,
        duration: Duration,
    ) -> Result<()>;

    fn set_visible(&mut self, layer: LayerHandle, visible: bool) -> Result<()>;

    /// Legend data of the color channel
    fn legend_data(&self, layer: LayerHandle) -> Result<Legend>;

    /// Current value of a scalar aggregate variable
    fn number_variable(&self, layer: LayerHandle, name: &str) -> Option<f64>;

    /// Current bins of a viewport histogram variable
    fn histogram_variable(&self, layer: LayerHandle, name: &str) -> Option<Vec<HistogramBin>>;

    /// Buckets of a global histogram variable
    fn global_histogram(&self, layer: LayerHandle, name: &str) -> Option<GlobalHistogram>;

    /// Current features of a `viewportFeatures` variable
    fn feature_variable(&self, layer: LayerHandle, name: &str) -> Option<Vec<Feature>>;

    /// Start delivering events of `kind` for `layer`
    fn subscribe(&mut self, layer: LayerHandle, kind: EventKind) -> Result<SubscriptionId>;

    fn unsubscribe(&mut self, id: SubscriptionId);
}

/// A map surface together with its visualization runtime
pub trait Host: MapSurface + VizRuntime {}

impl<T: MapSurface + VizRuntime> Host for T {}
