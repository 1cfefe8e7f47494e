/*!
# sqllayer - SQL-backed vector layers for interactive maps

A declarative component that binds a SQL data source to a live map surface.
A [`LayerConfiguration`] is compiled into a textual visualization program,
attached to the map as a layer, and kept in sync as the configuration and the
map style change over time.

## Example

```rust,ignore
use sqllayer::{Callbacks, LayerConfiguration, SqlLayer};

let config = LayerConfiguration::from_json_str(r#"{
    "name": "meteorites-layer",
    "query": "SELECT cartodb_id, the_geom_webmercator, mass FROM meteorites",
    "credentials": { "user": "dotgis", "api_key": "default_public" },
    "basemap_id": "waterway-label",
    "fields": ["cartodb_id", "mass"]
}"#)?;

let mut layer = SqlLayer::new(Callbacks::new().on_loaded(|msg| println!("{msg}")));
layer.mount(&mut host, config)?;

// Later, as host events arrive
layer.handle_event(&mut host, event)?;
```

## Architecture

- [`compiler`] - configuration → visualization program text
- [`reconcile`] - configuration diffing into patch/swap/rebuild actions
- [`lifecycle`] - layer attach, teardown and re-attachment on style changes
- [`bridge`] - click/enter/leave dispatch with de-duplication
- [`registry`] - aggregate variable declarations and result delivery
- [`labels`] - point label overlay fed from viewport features
- [`host`] - the map surface and visualization runtime seams
- [`component`] - [`SqlLayer`], the state machine tying it all together
*/

pub mod bridge;
pub mod compiler;
pub mod component;
pub mod config;
pub mod host;
pub mod labels;
pub mod lifecycle;
pub mod reconcile;
pub mod registry;

// Re-export key types for convenience
pub use component::{Callbacks, ComponentState, SqlLayer};
pub use compiler::{compile, filter_expression, VisualizationProgram};
pub use config::{
    Credentials, HighlightSpec, LabelSpec, LayerConfiguration, VariableDeclaration, VariableKind,
};
pub use host::{
    Coordinates, Feature, FeatureId, HostEvent, InteractionEvent, InteractionKind, LayerHandle,
    MapSurface, VizRuntime,
};
pub use reconcile::{plan, ReconcileAction, ReconcileReport};
pub use registry::VariableResult;

/// Main library error type
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SqlLayerError {
    /// The configuration is invalid; no host interaction took place.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Replacing the data source of a live layer failed; the previous source is kept.
    #[error("Layer update error: {0}")]
    LayerUpdateError(String),

    /// The host failed to remove the layer during teardown.
    #[error("Layer removal error: {0}")]
    LayerRemovalError(String),

    /// A visual channel patch was rejected by the runtime.
    #[error("Visualization patch error: {0}")]
    VisualizationPatchError(String),

    /// The host refused an operation while building or attaching a layer.
    #[error("Host error: {0}")]
    HostError(String),

    /// An operation was called in a lifecycle state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, SqlLayerError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
