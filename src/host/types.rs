//! Values exchanged with the map surface and the visualization runtime

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::Credentials;

/// Opaque handle of a layer created by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerHandle(pub u64);

impl fmt::Display for LayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Handle of a live listener registered with the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Layer-level events a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Fires once when the layer's first render completes
    Loaded,
    /// Fires on every viewport recomputation
    Updated,
    FeatureClick,
    FeatureEnter,
    FeatureLeave,
}

/// Pointer interaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Click,
    Enter,
    Leave,
}

impl InteractionKind {
    pub fn event_kind(&self) -> EventKind {
        match self {
            InteractionKind::Click => EventKind::FeatureClick,
            InteractionKind::Enter => EventKind::FeatureEnter,
            InteractionKind::Leave => EventKind::FeatureLeave,
        }
    }
}

/// Feature identity as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Number(i64),
    Text(String),
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Number(n) => write!(f, "{}", n),
            FeatureId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A feature of the live layer, with the properties selected by the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Centroid of the feature as rendered, `[lng, lat]`
    #[serde(default)]
    pub rendered_centroid: Option<[f64; 2]>,
}

impl Feature {
    pub fn new(id: i64) -> Self {
        Self {
            id: FeatureId::Number(id),
            properties: Map::new(),
            rendered_centroid: None,
        }
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn with_centroid(mut self, lng: f64, lat: f64) -> Self {
        self.rendered_centroid = Some([lng, lat]);
        self
    }
}

/// Pointer position in map coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub lng: f64,
    pub lat: f64,
}

/// A raw pointer event from the runtime's interactivity layer
///
/// Slots in `features` may be empty when the runtime reports a feature that
/// is no longer materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionEvent {
    pub kind: InteractionKind,
    pub features: Vec<Option<Feature>>,
    pub coordinates: Coordinates,
}

/// Events the host delivers into [`crate::SqlLayer::handle_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The map style changed or was replaced
    StyleData,
    Loaded(LayerHandle),
    Updated(LayerHandle),
    /// A timer requested through [`super::MapSurface::schedule`] elapsed
    SettleElapsed(LayerHandle),
    Interaction(LayerHandle, InteractionEvent),
}

/// SQL data source handle passed to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlSource {
    pub query: String,
    pub credentials: Credentials,
}

impl SqlSource {
    pub fn new(query: &str, credentials: &Credentials) -> Self {
        Self {
            query: query.to_string(),
            credentials: credentials.clone(),
        }
    }
}

/// Visual channels that can be patched on a live layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Color,
    StrokeColor,
    StrokeWidth,
    Width,
    Filter,
}

impl Channel {
    /// Property name in the visualization program
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Color => "color",
            Channel::StrokeColor => "strokeColor",
            Channel::StrokeWidth => "strokeWidth",
            Channel::Width => "width",
            Channel::Filter => "filter",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub key: String,
    pub value: Rgba,
}

/// Legend data of the color channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub data: Vec<LegendEntry>,
}

/// One bin of a viewport histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub x: Value,
    pub frequency: f64,
}

/// Global histogram as computed by the runtime: bucket index to fraction
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GlobalHistogram {
    pub size: usize,
    pub buckets: BTreeMap<usize, f64>,
}
