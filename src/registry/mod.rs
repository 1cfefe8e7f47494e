//! Aggregate variable registry
//!
//! Keeps track of the declared aggregate variables of the current
//! configuration and turns runtime values into [`VariableResult`]s for their
//! callbacks. The variable kind alone decides which runtime query is made and
//! what the callback receives:
//!
//! | kind        | delivered on        | result                              |
//! |-------------|---------------------|-------------------------------------|
//! | `Math`      | every `Updated`     | [`VariableResult::Value`]           |
//! | `Histogram` | every `Updated`     | [`VariableResult::Histogram`]       |
//! | `Global`    | `Loaded` only       | [`VariableResult::Percentages`]     |

use std::collections::{BTreeMap, HashMap};

use crate::config::{LayerConfiguration, VariableKind};
use crate::host::{HistogramBin, LayerHandle, VizRuntime};
use crate::{Result, SqlLayerError};

/// Result delivered to a variable callback
#[derive(Debug, Clone, PartialEq)]
pub enum VariableResult {
    /// Scalar value; missing values are reported as `0`
    Value(f64),
    /// Viewport histogram bins
    Histogram(Vec<HistogramBin>),
    /// Bucket index to percentage of features
    Percentages(BTreeMap<usize, f64>),
}

/// Callback receiving the results of one or more variables
pub type VariableCallback = Box<dyn FnMut(VariableResult)>;

/// Variable callbacks keyed by the name used in declarations
pub type VariableCallbacks = HashMap<String, VariableCallback>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RegisteredVariable {
    kind: VariableKind,
    name: String,
    callback: String,
}

/// Result ready for delivery to a named callback
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub variable: String,
    pub callback: String,
    pub result: VariableResult,
}

/// Declared variables of the current configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableRegistry {
    variables: Vec<RegisteredVariable>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from a configuration's three variable lists
    pub fn from_config(config: &LayerConfiguration) -> Self {
        let variables = config
            .variables()
            .map(|(kind, v)| RegisteredVariable {
                kind,
                name: v.name.clone(),
                callback: v.callback.clone(),
            })
            .collect();
        Self { variables }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Check that every declared callback is registered
    pub fn check_callbacks(&self, callbacks: &VariableCallbacks) -> Result<()> {
        for variable in &self.variables {
            if !callbacks.contains_key(&variable.callback) {
                return Err(SqlLayerError::ConfigurationError(format!(
                    "No callback '{}' registered for {} variable '{}'",
                    variable.callback, variable.kind, variable.name
                )));
            }
        }
        Ok(())
    }

    /// Results due when the layer has loaded: global histograms
    pub fn on_loaded<R: VizRuntime + ?Sized>(
        &self,
        runtime: &R,
        layer: LayerHandle,
    ) -> Vec<Delivery> {
        self.collect(runtime, layer, |kind| kind == VariableKind::Global)
    }

    /// Results due on every viewport recomputation: histograms, then math
    pub fn on_updated<R: VizRuntime + ?Sized>(
        &self,
        runtime: &R,
        layer: LayerHandle,
    ) -> Vec<Delivery> {
        self.collect(runtime, layer, |kind| {
            matches!(kind, VariableKind::Histogram | VariableKind::Math)
        })
    }

    fn collect<R: VizRuntime + ?Sized>(
        &self,
        runtime: &R,
        layer: LayerHandle,
        due: impl Fn(VariableKind) -> bool,
    ) -> Vec<Delivery> {
        self.variables
            .iter()
            .filter(|v| due(v.kind))
            .filter_map(|v| {
                let result = match v.kind {
                    VariableKind::Math => VariableResult::Value(
                        runtime
                            .number_variable(layer, &v.name)
                            .filter(|n| !n.is_nan())
                            .unwrap_or(0.0),
                    ),
                    VariableKind::Histogram => VariableResult::Histogram(
                        runtime.histogram_variable(layer, &v.name).unwrap_or_default(),
                    ),
                    VariableKind::Global => {
                        let histogram = runtime.global_histogram(layer, &v.name);
                        if histogram.is_none() {
                            tracing::debug!("Global histogram '{}' is not available", v.name);
                        }
                        VariableResult::Percentages(percentages(&histogram?))
                    }
                };
                Some(Delivery {
                    variable: v.name.clone(),
                    callback: v.callback.clone(),
                    result,
                })
            })
            .collect()
    }
}

/// Convert global histogram fractions into percentages
///
/// Buckets `0..=size` are always present; missing or non-numeric buckets
/// count as `0`.
pub fn percentages(histogram: &crate::host::GlobalHistogram) -> BTreeMap<usize, f64> {
    (0..=histogram.size)
        .map(|i| {
            let value = histogram
                .buckets
                .get(&i)
                .map(|fraction| fraction * 100.0)
                .filter(|p| p.is_finite())
                .unwrap_or(0.0);
            (i, value)
        })
        .collect()
}

/// Hand each delivery to its callback
pub fn dispatch(callbacks: &mut VariableCallbacks, deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        match callbacks.get_mut(&delivery.callback) {
            Some(callback) => callback(delivery.result),
            None => tracing::warn!(
                "No callback '{}' for variable '{}'",
                delivery.callback,
                delivery.variable
            ),
        }
    }
}
