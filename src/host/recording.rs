//! In-memory host that records every call
//!
//! `RecordingHost` keeps just enough map state (style layer order, sources,
//! live subscriptions) to answer the queries the component makes, and logs
//! every mutating call as a [`HostCall`]. Failures can be injected per
//! operation. It backs the unit tests and the `sqllayer demo` command.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use super::{
    Channel, EventKind, Feature, FeatureId, GlobalHistogram, HistogramBin, HostEvent,
    LayerHandle, Legend, MapSurface, SqlSource, SubscriptionId, VizRuntime,
};
use crate::compiler::VisualizationProgram;
use crate::{Result, SqlLayerError};

/// A mutating call made on the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    CreateLayer {
        handle: LayerHandle,
        name: String,
        query: String,
        program: String,
    },
    AttachLayer {
        handle: LayerHandle,
        before: Option<String>,
    },
    RemoveLayer(LayerHandle),
    ReplaceSource {
        handle: LayerHandle,
        query: String,
    },
    BlendTo {
        handle: LayerHandle,
        channel: Channel,
        value: String,
    },
    FeatureBlendTo {
        handle: LayerHandle,
        feature: FeatureId,
        channel: Channel,
        value: String,
    },
    FeatureReset {
        handle: LayerHandle,
        feature: FeatureId,
        channel: Channel,
    },
    SetVisible {
        handle: LayerHandle,
        visible: bool,
    },
    AddSource(String),
    RemoveSource(String),
    SetSourceData {
        id: String,
        data: Value,
    },
    AddSymbolLayer(String),
    RemoveStyleLayer(String),
    SubscribeStyle(SubscriptionId),
    UnsubscribeStyle(SubscriptionId),
    Subscribe {
        handle: LayerHandle,
        kind: EventKind,
        id: SubscriptionId,
    },
    Unsubscribe(SubscriptionId),
    Schedule {
        delay: Duration,
        event: HostEvent,
    },
    Repaint,
}

#[derive(Debug, Clone)]
struct RecordedLayer {
    name: String,
    visible: bool,
}

#[derive(Debug, Clone, Copy)]
struct RecordedSubscription {
    layer: Option<LayerHandle>,
    kind: Option<EventKind>,
}

/// In-memory [`MapSurface`] and [`VizRuntime`]
#[derive(Debug, Default)]
pub struct RecordingHost {
    has_style: bool,
    /// Style layer ids in draw order, bottom first
    style_layers: Vec<String>,
    sources: BTreeMap<String, Value>,
    layers: BTreeMap<LayerHandle, RecordedLayer>,
    subscriptions: BTreeMap<SubscriptionId, RecordedSubscription>,
    next_id: u64,
    calls: Vec<HostCall>,
    scheduled: Vec<HostEvent>,

    fail_create: bool,
    fail_replace_source: bool,
    fail_remove: bool,
    failing_subscription: Option<EventKind>,
    failing_channels: HashSet<Channel>,

    legend: Option<Legend>,
    numbers: HashMap<String, f64>,
    histograms: HashMap<String, Vec<HistogramBin>>,
    globals: HashMap<String, GlobalHistogram>,
    features: HashMap<String, Vec<Feature>>,
}

impl RecordingHost {
    /// Create a host with a loaded style containing a few basemap layers
    pub fn new() -> Self {
        Self {
            has_style: true,
            style_layers: vec![
                "background".to_string(),
                "watername_ocean".to_string(),
                "waterway-label".to_string(),
            ],
            ..Default::default()
        }
    }

    // --- Inspection ---

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    /// Drain the recorded calls
    pub fn take_calls(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.calls)
    }

    /// Number of recorded calls matching a predicate
    pub fn count_calls(&self, predicate: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.iter().filter(|c| predicate(c)).count()
    }

    /// Drain the events scheduled through [`MapSurface::schedule`]
    pub fn take_scheduled(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.scheduled)
    }

    /// Style layer ids in draw order, bottom first
    pub fn layer_order(&self) -> &[String] {
        &self.style_layers
    }

    pub fn source_data(&self, id: &str) -> Option<&Value> {
        self.sources.get(id)
    }

    pub fn is_visible(&self, handle: LayerHandle) -> Option<bool> {
        self.layers.get(&handle).map(|l| l.visible)
    }

    /// Live subscriptions of one kind on one layer
    pub fn active_subscriptions(&self, handle: LayerHandle, kind: EventKind) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.layer == Some(handle) && s.kind == Some(kind))
            .count()
    }

    /// Live style-change subscriptions
    pub fn style_subscriptions(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.layer.is_none())
            .count()
    }

    // --- Simulated host behaviour ---

    /// Replace the style: every layer and source is discarded
    pub fn replace_style(&mut self) {
        self.style_layers = vec!["background".to_string()];
        self.sources.clear();
    }

    /// Drop the style entirely, as when the map is destroyed
    pub fn discard_style(&mut self) {
        self.has_style = false;
        self.style_layers.clear();
        self.sources.clear();
    }

    // --- Failure injection ---

    pub fn fail_create(&mut self, fail: bool) {
        self.fail_create = fail;
    }

    pub fn fail_replace_source(&mut self, fail: bool) {
        self.fail_replace_source = fail;
    }

    pub fn fail_remove(&mut self, fail: bool) {
        self.fail_remove = fail;
    }

    /// Reject subscriptions to one event kind, or none
    pub fn fail_subscribe(&mut self, kind: Option<EventKind>) {
        self.failing_subscription = kind;
    }

    pub fn fail_channel(&mut self, channel: Channel) {
        self.failing_channels.insert(channel);
    }

    // --- Runtime values ---

    pub fn set_legend(&mut self, legend: Legend) {
        self.legend = Some(legend);
    }

    pub fn set_number_variable(&mut self, name: &str, value: f64) {
        self.numbers.insert(name.to_string(), value);
    }

    pub fn set_histogram_variable(&mut self, name: &str, bins: Vec<HistogramBin>) {
        self.histograms.insert(name.to_string(), bins);
    }

    pub fn set_global_histogram(&mut self, name: &str, histogram: GlobalHistogram) {
        self.globals.insert(name.to_string(), histogram);
    }

    pub fn set_feature_variable(&mut self, name: &str, features: Vec<Feature>) {
        self.features.insert(name.to_string(), features);
    }

    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn layer_name(&self, handle: LayerHandle) -> Result<String> {
        self.layers
            .get(&handle)
            .map(|l| l.name.clone())
            .ok_or_else(|| SqlLayerError::HostError(format!("Unknown {}", handle)))
    }

    fn insert_style_layer(&mut self, id: &str, before: Option<&str>) {
        self.style_layers.retain(|existing| existing != id);
        let position = before.and_then(|b| self.style_layers.iter().position(|l| l == b));
        match position {
            Some(index) => self.style_layers.insert(index, id.to_string()),
            None => self.style_layers.push(id.to_string()),
        }
    }
}

impl MapSurface for RecordingHost {
    fn has_style(&self) -> bool {
        self.has_style
    }

    fn has_layer(&self, id: &str) -> bool {
        self.style_layers.iter().any(|l| l == id)
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_geojson_source(&mut self, id: &str, data: Value) -> Result<()> {
        if self.sources.contains_key(id) {
            return Err(SqlLayerError::HostError(format!(
                "There is already a source with id '{}'",
                id
            )));
        }
        self.sources.insert(id.to_string(), data);
        self.calls.push(HostCall::AddSource(id.to_string()));
        Ok(())
    }

    fn set_source_data(&mut self, id: &str, data: Value) -> Result<()> {
        match self.sources.get_mut(id) {
            Some(existing) => {
                *existing = data.clone();
                self.calls.push(HostCall::SetSourceData {
                    id: id.to_string(),
                    data,
                });
                Ok(())
            }
            None => Err(SqlLayerError::HostError(format!("No source '{}'", id))),
        }
    }

    fn add_symbol_layer(&mut self, layer: Value) -> Result<()> {
        let id = layer["id"]
            .as_str()
            .ok_or_else(|| SqlLayerError::HostError("Layer has no 'id'".to_string()))?
            .to_string();
        if self.has_layer(&id) {
            return Err(SqlLayerError::HostError(format!(
                "Layer with id '{}' already exists",
                id
            )));
        }
        self.insert_style_layer(&id, None);
        self.calls.push(HostCall::AddSymbolLayer(id));
        Ok(())
    }

    fn remove_source(&mut self, id: &str) -> Result<()> {
        if self.sources.remove(id).is_none() {
            return Err(SqlLayerError::HostError(format!("No source '{}'", id)));
        }
        self.calls.push(HostCall::RemoveSource(id.to_string()));
        Ok(())
    }

    fn remove_style_layer(&mut self, id: &str) -> Result<()> {
        if !self.has_layer(id) {
            return Err(SqlLayerError::HostError(format!("No layer '{}'", id)));
        }
        self.style_layers.retain(|l| l != id);
        self.calls.push(HostCall::RemoveStyleLayer(id.to_string()));
        Ok(())
    }

    fn subscribe_style(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.mint());
        self.subscriptions.insert(
            id,
            RecordedSubscription {
                layer: None,
                kind: None,
            },
        );
        self.calls.push(HostCall::SubscribeStyle(id));
        id
    }

    fn unsubscribe_style(&mut self, id: SubscriptionId) {
        self.subscriptions.remove(&id);
        self.calls.push(HostCall::UnsubscribeStyle(id));
    }

    fn schedule(&mut self, delay: Duration, event: HostEvent) {
        self.scheduled.push(event.clone());
        self.calls.push(HostCall::Schedule { delay, event });
    }

    fn repaint(&mut self) {
        self.calls.push(HostCall::Repaint);
    }
}

impl VizRuntime for RecordingHost {
    fn create_layer(
        &mut self,
        name: &str,
        source: &SqlSource,
        program: &VisualizationProgram,
    ) -> Result<LayerHandle> {
        if self.fail_create {
            return Err(SqlLayerError::HostError(format!(
                "Could not create layer '{}'",
                name
            )));
        }
        let handle = LayerHandle(self.mint());
        self.layers.insert(
            handle,
            RecordedLayer {
                name: name.to_string(),
                visible: true,
            },
        );
        self.calls.push(HostCall::CreateLayer {
            handle,
            name: name.to_string(),
            query: source.query.clone(),
            program: program.as_str().to_string(),
        });
        Ok(handle)
    }

    fn attach_layer(&mut self, layer: LayerHandle, before: Option<&str>) -> Result<()> {
        let name = self.layer_name(layer)?;
        self.insert_style_layer(&name, before);
        self.calls.push(HostCall::AttachLayer {
            handle: layer,
            before: before.map(|b| b.to_string()),
        });
        Ok(())
    }

    fn remove_layer(&mut self, layer: LayerHandle) -> Result<()> {
        if self.fail_remove {
            return Err(SqlLayerError::HostError(format!(
                "Style is not done loading, cannot remove {}",
                layer
            )));
        }
        let name = self.layer_name(layer)?;
        self.style_layers.retain(|l| *l != name);
        self.layers.remove(&layer);
        self.calls.push(HostCall::RemoveLayer(layer));
        Ok(())
    }

    fn replace_source(&mut self, layer: LayerHandle, source: &SqlSource) -> Result<()> {
        if self.fail_replace_source {
            return Err(SqlLayerError::HostError(format!(
                "Query rejected: {}",
                source.query
            )));
        }
        self.layer_name(layer)?;
        self.calls.push(HostCall::ReplaceSource {
            handle: layer,
            query: source.query.clone(),
        });
        Ok(())
    }

    fn blend_to(
        &mut self,
        layer: LayerHandle,
        channel: Channel,
        value: &str,
        _duration: Duration,
    ) -> Result<()> {
        if self.failing_channels.contains(&channel) {
            return Err(SqlLayerError::HostError(format!(
                "Invalid expression for '{}': {}",
                channel, value
            )));
        }
        self.calls.push(HostCall::BlendTo {
            handle: layer,
            channel,
            value: value.to_string(),
        });
        Ok(())
    }

    fn feature_blend_to(
        &mut self,
        layer: LayerHandle,
        feature: &FeatureId,
        channel: Channel,
        value: &str,
        _duration: Duration,
    ) -> Result<()> {
        self.calls.push(HostCall::FeatureBlendTo {
            handle: layer,
            feature: feature.clone(),
            channel,
            value: value.to_string(),
        });
        Ok(())
    }

    fn feature_reset(
        &mut self,
        layer: LayerHandle,
        feature: &FeatureId,
        channel: Channel,
        _duration: Duration,
    ) -> Result<()> {
        self.calls.push(HostCall::FeatureReset {
            handle: layer,
            feature: feature.clone(),
            channel,
        });
        Ok(())
    }

    fn set_visible(&mut self, layer: LayerHandle, visible: bool) -> Result<()> {
        let recorded = self
            .layers
            .get_mut(&layer)
            .ok_or_else(|| SqlLayerError::HostError(format!("Unknown {}", layer)))?;
        recorded.visible = visible;
        self.calls.push(HostCall::SetVisible {
            handle: layer,
            visible,
        });
        Ok(())
    }

    fn legend_data(&self, _layer: LayerHandle) -> Result<Legend> {
        self.legend
            .clone()
            .ok_or_else(|| SqlLayerError::HostError("Color has no legend data".to_string()))
    }

    fn number_variable(&self, _layer: LayerHandle, name: &str) -> Option<f64> {
        self.numbers.get(name).copied()
    }

    fn histogram_variable(&self, _layer: LayerHandle, name: &str) -> Option<Vec<HistogramBin>> {
        self.histograms.get(name).cloned()
    }

    fn global_histogram(&self, _layer: LayerHandle, name: &str) -> Option<GlobalHistogram> {
        self.globals.get(name).cloned()
    }

    fn feature_variable(&self, _layer: LayerHandle, name: &str) -> Option<Vec<Feature>> {
        self.features.get(name).cloned()
    }

    fn subscribe(&mut self, layer: LayerHandle, kind: EventKind) -> Result<SubscriptionId> {
        self.layer_name(layer)?;
        if self.failing_subscription == Some(kind) {
            return Err(SqlLayerError::HostError(format!(
                "Cannot listen to {:?} on {}",
                kind, layer
            )));
        }
        let id = SubscriptionId(self.mint());
        self.subscriptions.insert(
            id,
            RecordedSubscription {
                layer: Some(layer),
                kind: Some(kind),
            },
        );
        self.calls.push(HostCall::Subscribe {
            handle: layer,
            kind,
            id,
        });
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.remove(&id);
        self.calls.push(HostCall::Unsubscribe(id));
    }
}
