//! Visualization program compiler
//!
//! Turns a [`LayerConfiguration`] into the textual program evaluated by the
//! visualization runtime.
//!
//! # Program Layout
//!
//! One statement per line, always in the same order:
//!
//! ```text
//! @v_features: viewportFeatures($cartodb_id,$name)
//! color: rgba(0, 255, 0, .1)
//! strokeColor: rgb(0, 255, 0)
//! strokeWidth: 1
//! filter: zoom() < 22 and zoom() > 1
//! width: (sqrt($mass) / 25) + 3          <- only when configured
//! @v_labels: viewportFeatures($name)     <- only when labels are configured
//! @<name>: <expression>                  <- histogram, math, global variables
//! ```
//!
//! Compilation is deterministic: equal configurations produce byte-identical
//! text. User fragments (filter, color, width, variable expressions) are
//! inserted verbatim.

use std::fmt;

use crate::config::{format_number, LayerConfiguration};

/// Variable holding the viewport features over the selected field list
pub const FEATURES_VARIABLE: &str = "v_features";

/// Variable holding the viewport features over the label field
pub const LABELS_VARIABLE: &str = "v_labels";

/// Compiled program text and the variables it declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualizationProgram {
    text: String,
    variables: Vec<String>,
}

impl VisualizationProgram {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Declared variable names, internal ones included, in program order
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn declares(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }
}

impl fmt::Display for VisualizationProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Compose the visible filter from the zoom bounds and a user fragment
///
/// The fragment follows the zoom predicate after a single space and is kept
/// verbatim, so it usually starts with a conjunction (`and $mass > 10`).
pub fn filter_expression(minzoom: f64, maxzoom: f64, fragment: &str) -> String {
    let zoom = format!(
        "zoom() < {} and zoom() > {}",
        format_number(maxzoom),
        format_number(minzoom)
    );
    if fragment.trim().is_empty() {
        zoom
    } else {
        format!("{} {}", zoom, fragment)
    }
}

/// Compile a configuration into its visualization program
pub fn compile(config: &LayerConfiguration) -> VisualizationProgram {
    let mut statements: Vec<String> = Vec::new();
    let mut variables: Vec<String> = Vec::new();

    let fields: Vec<String> = config
        .selected_fields()
        .iter()
        .map(|field| format!("${}", field))
        .collect();
    statements.push(declaration(
        FEATURES_VARIABLE,
        &format!("viewportFeatures({})", fields.join(",")),
    ));
    variables.push(FEATURES_VARIABLE.to_string());

    statements.push(format!("color: {}", config.color));
    statements.push(format!("strokeColor: {}", config.stroke_color));
    statements.push(format!(
        "strokeWidth: {}",
        format_number(config.stroke_width)
    ));
    statements.push(format!(
        "filter: {}",
        filter_expression(config.minzoom, config.maxzoom, &config.filter)
    ));

    if let Some(width) = &config.width {
        statements.push(format!("width: {}", width));
    }

    if let Some(field) = config.label_field() {
        statements.push(declaration(
            LABELS_VARIABLE,
            &format!("viewportFeatures(${})", field),
        ));
        variables.push(LABELS_VARIABLE.to_string());
    }

    for (_, variable) in config.variables() {
        statements.push(declaration(&variable.name, &variable.expression));
        variables.push(variable.name.clone());
    }

    VisualizationProgram {
        text: statements.join("\n"),
        variables,
    }
}

fn declaration(name: &str, expression: &str) -> String {
    format!("@{}: {}", name, expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChannelValue, Credentials, LabelSpec, VariableDeclaration, VariableKind,
    };
    use proptest::prelude::*;

    fn config(query: &str) -> LayerConfiguration {
        LayerConfiguration::new(
            "layer",
            query,
            Credentials {
                user: "u".to_string(),
                api_key: "k".to_string(),
            },
            "waterway-label",
        )
    }

    #[test]
    fn test_filter_expression_without_fragment() {
        assert_eq!(filter_expression(1.0, 22.0, ""), "zoom() < 22 and zoom() > 1");
        assert_eq!(filter_expression(1.0, 22.0, "   "), "zoom() < 22 and zoom() > 1");
    }

    #[test]
    fn test_filter_expression_keeps_fragment_verbatim() {
        assert_eq!(
            filter_expression(2.5, 18.0, "and $mass > 1000"),
            "zoom() < 18 and zoom() > 2.5 and $mass > 1000"
        );
    }

    #[test]
    fn test_compile_filter_scenario() {
        let config = config("SELECT id, geom FROM t").with_fields(&["id"]);
        let program = compile(&config);
        assert!(program
            .as_str()
            .lines()
            .any(|line| line == "filter: zoom() < 22 and zoom() > 1"));
    }

    #[test]
    fn test_compile_default_program() {
        let program = compile(&config("SELECT cartodb_id FROM t"));
        assert_eq!(
            program.as_str(),
            "@v_features: viewportFeatures($cartodb_id)\n\
             color: rgba(0, 255, 0, .1)\n\
             strokeColor: rgb(0, 255, 0)\n\
             strokeWidth: 1\n\
             filter: zoom() < 22 and zoom() > 1"
        );
        assert_eq!(program.variables(), &["v_features".to_string()]);
    }

    #[test]
    fn test_compile_features_over_field_list() {
        let config = config("SELECT cartodb_id, name, mass FROM t")
            .with_fields(&["cartodb_id", "name", "mass"]);
        let program = compile(&config);
        assert!(program
            .as_str()
            .starts_with("@v_features: viewportFeatures($cartodb_id,$name,$mass)\n"));
    }

    #[test]
    fn test_compile_omits_width_unless_configured() {
        let mut config = config("SELECT mass FROM t");
        assert!(!compile(&config).as_str().contains("width:"));

        config.width = Some(ChannelValue::Expression("(sqrt($mass) / 25) + 3".to_string()));
        assert!(compile(&config)
            .as_str()
            .contains("\nwidth: (sqrt($mass) / 25) + 3"));

        config.width = Some(ChannelValue::Number(4.0));
        assert!(compile(&config).as_str().contains("\nwidth: 4"));
    }

    #[test]
    fn test_compile_declares_variables_in_list_order() {
        let config = config("SELECT cartodb_id, mass FROM t")
            .with_labels(LabelSpec::new("mass"))
            .with_variable(
                VariableKind::Global,
                VariableDeclaration::new("g", "globalHistogram($mass, 3)", "onG"),
            )
            .with_variable(
                VariableKind::Math,
                VariableDeclaration::new("count", "viewportCount()", "onCount"),
            )
            .with_variable(
                VariableKind::Histogram,
                VariableDeclaration::new("h", "viewportHistogram($mass)", "onH"),
            );
        let program = compile(&config);
        let tail: Vec<&str> = program.as_str().lines().skip(5).collect();
        assert_eq!(
            tail,
            vec![
                "@v_labels: viewportFeatures($mass)",
                "@h: viewportHistogram($mass)",
                "@count: viewportCount()",
                "@g: globalHistogram($mass, 3)",
            ]
        );
        assert!(program.declares("count"));
        assert!(program.declares(LABELS_VARIABLE));
        assert!(!program.declares("missing"));
    }

    #[test]
    fn test_compile_ignores_non_structural_runtime_fields() {
        let base = config("SELECT cartodb_id FROM t");
        let mut hidden = base.clone();
        hidden.visible = false;
        assert_eq!(compile(&base), compile(&hidden));
    }

    proptest! {
        #[test]
        fn test_compile_is_deterministic(
            color in "[a-z]{1,10}",
            stroke_width in 0u32..20,
            minzoom in 0u32..10,
            maxzoom in 10u32..24,
            fragment in "(and \\$[a-z]{1,6} > [0-9]{1,4})?",
            names in proptest::collection::btree_set("[a-z]{1,8}", 0..4),
        ) {
            let mut config = config("SELECT cartodb_id FROM t");
            config.color = color;
            config.stroke_width = stroke_width as f64;
            config.minzoom = minzoom as f64;
            config.maxzoom = maxzoom as f64;
            config.filter = fragment;
            for name in &names {
                config.math_variables.push(VariableDeclaration::new(
                    &format!("m_{}", name),
                    "viewportCount()",
                    "cb",
                ));
            }

            let first = compile(&config);
            let second = compile(&config.clone());
            prop_assert_eq!(first.as_str(), second.as_str());
            prop_assert_eq!(first.variables().len(), names.len() + 1);
        }
    }
}
