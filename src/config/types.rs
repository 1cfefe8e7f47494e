//! Configuration types for a SQL layer
//!
//! These are the values the application shell supplies on every render. They
//! are plain data: callbacks live on [`crate::Callbacks`] and are referenced
//! from here by name only.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifying field used when no field list is configured
pub const DEFAULT_FIELD: &str = "cartodb_id";

/// Account credentials for the SQL data provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,
}

/// A numeric literal or a visualization expression
///
/// The width channel accepts both `3` and `(sqrt($mass) / 25) + 3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    Number(f64),
    Expression(String),
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Number(n) => write!(f, "{}", format_number(*n)),
            ChannelValue::Expression(expr) => write!(f, "{}", expr),
        }
    }
}

/// Format a number the way it reads in an expression: `1` rather than `1.0`
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Kind of aggregate variable
///
/// The kind decides which runtime query is used and the shape of the value
/// delivered to the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// Scalar over the viewport, delivered on every update
    Math,
    /// Viewport histogram, delivered on every update
    Histogram,
    /// Global histogram, delivered once as percentage buckets when loaded
    Global,
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Math => write!(f, "math"),
            VariableKind::Histogram => write!(f, "histogram"),
            VariableKind::Global => write!(f, "global"),
        }
    }
}

/// A named aggregate expression and the callback receiving its results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: String,
    pub expression: String,
    /// Name of the result callback registered on [`crate::Callbacks`]
    #[serde(alias = "method")]
    pub callback: String,
}

impl VariableDeclaration {
    pub fn new(name: &str, expression: &str, callback: &str) -> Self {
        Self {
            name: name.to_string(),
            expression: expression.to_string(),
            callback: callback.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextTransform {
    #[default]
    None,
    Uppercase,
    Lowercase,
}

impl TextTransform {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextTransform::None => "none",
            TextTransform::Uppercase => "uppercase",
            TextTransform::Lowercase => "lowercase",
        }
    }
}

/// Symbol layout options for the label overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsLayout {
    #[serde(alias = "textSize")]
    pub text_size: f64,
    #[serde(alias = "textFont")]
    pub text_font: Vec<String>,
    #[serde(alias = "textLetterSpacing")]
    pub text_letter_spacing: f64,
    #[serde(alias = "textMaxWidth")]
    pub text_max_width: f64,
    #[serde(alias = "textTransform")]
    pub text_transform: TextTransform,
}

impl Default for LabelsLayout {
    fn default() -> Self {
        Self {
            text_size: 16.0,
            text_font: vec![
                "Open Sans Regular".to_string(),
                "Arial Unicode MS Regular".to_string(),
            ],
            text_letter_spacing: 0.0,
            text_max_width: 10.0,
            text_transform: TextTransform::None,
        }
    }
}

/// Symbol paint options for the label overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsPaint {
    #[serde(alias = "textColor")]
    pub text_color: String,
}

impl Default for LabelsPaint {
    fn default() -> Self {
        Self {
            text_color: "#000000".to_string(),
        }
    }
}

/// Point labels drawn from one field of the viewport features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    pub field: String,
    #[serde(default)]
    pub minzoom: Option<f64>,
    #[serde(default)]
    pub maxzoom: Option<f64>,
    #[serde(default)]
    pub layout: LabelsLayout,
    #[serde(default)]
    pub paint: LabelsPaint,
}

impl LabelSpec {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            minzoom: None,
            maxzoom: None,
            layout: LabelsLayout::default(),
            paint: LabelsPaint::default(),
        }
    }
}

/// Colour blended onto a feature while the pointer is over it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightSpec {
    pub color: String,
    #[serde(default = "default_highlight_duration", alias = "durationMs")]
    pub duration_ms: u64,
}

fn default_highlight_duration() -> u64 {
    150
}

/// Snapshot of everything the shell passes to one SQL layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfiguration {
    /// Layer identifier on the map
    pub name: String,
    /// SQL query producing the features
    pub query: String,
    pub credentials: Credentials,
    /// Map layer the SQL layer is inserted beneath
    #[serde(alias = "basemapId")]
    pub basemap_id: String,

    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_stroke_color", alias = "strokeColor")]
    pub stroke_color: String,
    #[serde(default = "default_stroke_width", alias = "strokeWidth")]
    pub stroke_width: f64,
    /// Width channel; omitted from the program when absent
    #[serde(default)]
    pub width: Option<ChannelValue>,
    /// Filter fragment appended verbatim after the zoom predicate
    #[serde(default)]
    pub filter: String,
    #[serde(default = "default_minzoom")]
    pub minzoom: f64,
    #[serde(default = "default_maxzoom")]
    pub maxzoom: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,

    /// Selected fields exposed through the viewport features
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Option<LabelSpec>,
    #[serde(default)]
    pub highlight: Option<HighlightSpec>,

    #[serde(default, alias = "histogramVariables")]
    pub histogram_variables: Vec<VariableDeclaration>,
    #[serde(default, alias = "mathVariables")]
    pub math_variables: Vec<VariableDeclaration>,
    #[serde(default, alias = "globalVariables")]
    pub global_variables: Vec<VariableDeclaration>,
}

fn default_color() -> String {
    "rgba(0, 255, 0, .1)".to_string()
}

fn default_stroke_color() -> String {
    "rgb(0, 255, 0)".to_string()
}

fn default_stroke_width() -> f64 {
    1.0
}

fn default_minzoom() -> f64 {
    1.0
}

fn default_maxzoom() -> f64 {
    22.0
}

fn default_visible() -> bool {
    true
}

impl LayerConfiguration {
    /// Create a configuration with every optional field at its default
    pub fn new(name: &str, query: &str, credentials: Credentials, basemap_id: &str) -> Self {
        Self {
            name: name.to_string(),
            query: query.to_string(),
            credentials,
            basemap_id: basemap_id.to_string(),
            color: default_color(),
            stroke_color: default_stroke_color(),
            stroke_width: default_stroke_width(),
            width: None,
            filter: String::new(),
            minzoom: default_minzoom(),
            maxzoom: default_maxzoom(),
            visible: default_visible(),
            fields: None,
            labels: None,
            highlight: None,
            histogram_variables: Vec::new(),
            math_variables: Vec::new(),
            global_variables: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn with_variable(mut self, kind: VariableKind, declaration: VariableDeclaration) -> Self {
        match kind {
            VariableKind::Math => self.math_variables.push(declaration),
            VariableKind::Histogram => self.histogram_variables.push(declaration),
            VariableKind::Global => self.global_variables.push(declaration),
        }
        self
    }

    pub fn with_labels(mut self, labels: LabelSpec) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Fields exposed through `viewportFeatures`, falling back to [`DEFAULT_FIELD`]
    pub fn selected_fields(&self) -> Vec<&str> {
        match &self.fields {
            Some(fields) if !fields.is_empty() => fields.iter().map(|f| f.as_str()).collect(),
            _ => vec![DEFAULT_FIELD],
        }
    }

    /// Label field, if a label overlay is configured
    pub fn label_field(&self) -> Option<&str> {
        self.labels
            .as_ref()
            .map(|l| l.field.as_str())
            .filter(|f| !f.is_empty())
    }

    /// All declared variables tagged with their kind
    ///
    /// Order: histogram, math, global, each in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = (VariableKind, &VariableDeclaration)> {
        self.histogram_variables
            .iter()
            .map(|v| (VariableKind::Histogram, v))
            .chain(self.math_variables.iter().map(|v| (VariableKind::Math, v)))
            .chain(self.global_variables.iter().map(|v| (VariableKind::Global, v)))
    }

    /// Whether `other` can reuse this configuration's live layer
    ///
    /// Compares everything that ends up in the compiled program's declarations
    /// or in the layer identity. The query itself is excluded: a query change on
    /// its own only swaps the data source.
    pub fn same_structure(&self, other: &LayerConfiguration) -> bool {
        self.name == other.name
            && self.basemap_id == other.basemap_id
            && self.selected_fields() == other.selected_fields()
            && self.label_field() == other.label_field()
            && declared_set(self) == declared_set(other)
    }
}

fn declared_set(config: &LayerConfiguration) -> Vec<(VariableKind, &str, &str)> {
    config
        .variables()
        .map(|(kind, v)| (kind, v.name.as_str(), v.expression.as_str()))
        .collect()
}
