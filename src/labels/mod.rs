//! Point label overlay
//!
//! When a label field is configured, a GeoJSON source and a symbol layer are
//! added next to the SQL layer. The source is refilled on every viewport
//! recomputation from the `@v_labels` variable: one point per feature at its
//! rendered centroid, carrying the label text.
//!
//! The overlay belongs to the map style. Replacing the style discards it, and
//! it is only recreated by the next initialize cycle.

use serde_json::{json, Value};

use crate::compiler::LABELS_VARIABLE;
use crate::config::LabelSpec;
use crate::host::{Feature, Host, LayerHandle};
use crate::Result;

/// Id of the GeoJSON source holding label points
pub const LABEL_SOURCE_ID: &str = "labels";

/// Id of the symbol layer drawing the labels
pub const LABEL_LAYER_ID: &str = "map-labels";

/// Feature property the symbol layer reads its text from
pub const LABEL_TEXT_PROPERTY: &str = "label_field";

/// Style-spec description of the label symbol layer
pub fn symbol_layer(spec: &LabelSpec) -> Value {
    let mut layer = json!({
        "id": LABEL_LAYER_ID,
        "type": "symbol",
        "source": LABEL_SOURCE_ID,
        "layout": {
            "text-field": format!("{{{}}}", LABEL_TEXT_PROPERTY),
            "text-size": spec.layout.text_size,
            "text-font": spec.layout.text_font,
            "text-letter-spacing": spec.layout.text_letter_spacing,
            "text-max-width": spec.layout.text_max_width,
            "text-transform": spec.layout.text_transform.as_str(),
        },
        "paint": {
            "text-color": spec.paint.text_color,
        }
    });
    if let Some(minzoom) = spec.minzoom {
        layer["minzoom"] = json!(minzoom);
    }
    if let Some(maxzoom) = spec.maxzoom {
        layer["maxzoom"] = json!(maxzoom);
    }
    layer
}

/// Text shown for a feature: strings as-is, other values in JSON form,
/// nothing for a missing property
pub fn label_text(feature: &Feature, field: &str) -> String {
    match feature.properties.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Point collection for the label source
///
/// Features without a rendered centroid are placed at `[0, 0]`.
pub fn label_collection(features: &[Feature], field: &str) -> Value {
    let points: Vec<Value> = features
        .iter()
        .map(|feature| {
            let [lng, lat] = feature.rendered_centroid.unwrap_or([0.0, 0.0]);
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [lng, lat],
                },
                "properties": {
                    LABEL_TEXT_PROPERTY: label_text(feature, field),
                }
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": points,
    })
}

/// Add the label source and symbol layer, then put the SQL layer back on top
///
/// Source and layer that survived from a previous cycle are reused.
pub fn create<H: Host + ?Sized>(host: &mut H, primary: LayerHandle, spec: &LabelSpec) -> Result<()> {
    if !host.has_source(LABEL_SOURCE_ID) {
        host.add_geojson_source(LABEL_SOURCE_ID, label_collection(&[], &spec.field))?;
    }
    if !host.has_layer(LABEL_LAYER_ID) {
        host.add_symbol_layer(symbol_layer(spec))?;
    }
    host.attach_layer(primary, None)?;
    tracing::debug!("Label overlay created for field '{}'", spec.field);
    Ok(())
}

/// Refill the label source from the current viewport features
///
/// Does nothing when the source is absent.
pub fn refresh<H: Host + ?Sized>(host: &mut H, primary: LayerHandle, field: &str) -> Result<()> {
    if !host.has_source(LABEL_SOURCE_ID) {
        return Ok(());
    }
    let features = host
        .feature_variable(primary, LABELS_VARIABLE)
        .unwrap_or_default();
    host.set_source_data(LABEL_SOURCE_ID, label_collection(&features, field))
}

/// Remove whatever part of the overlay is still on the map
pub fn remove<H: Host + ?Sized>(host: &mut H) -> Result<()> {
    if host.has_layer(LABEL_LAYER_ID) {
        host.remove_style_layer(LABEL_LAYER_ID)?;
    }
    if host.has_source(LABEL_SOURCE_ID) {
        host.remove_source(LABEL_SOURCE_ID)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TextTransform;
    use crate::host::{HostCall, MapSurface, RecordingHost};

    #[test]
    fn test_symbol_layer_uses_layout_and_paint() {
        let mut spec = LabelSpec::new("name");
        spec.layout.text_transform = TextTransform::Uppercase;
        spec.paint.text_color = "#ffffff".to_string();
        spec.minzoom = Some(4.0);

        let layer = symbol_layer(&spec);
        assert_eq!(layer["id"], "map-labels");
        assert_eq!(layer["source"], "labels");
        assert_eq!(layer["layout"]["text-field"], "{label_field}");
        assert_eq!(layer["layout"]["text-size"], 16.0);
        assert_eq!(layer["layout"]["text-transform"], "uppercase");
        assert_eq!(layer["paint"]["text-color"], "#ffffff");
        assert_eq!(layer["minzoom"], 4.0);
        assert!(layer.get("maxzoom").is_none());
    }

    #[test]
    fn test_label_collection_points_and_text() {
        let features = vec![
            Feature::new(1)
                .with_property("name", json!("Aachen"))
                .with_centroid(6.08, 50.77),
            Feature::new(2).with_property("name", json!(1880)),
        ];
        let collection = label_collection(&features, "name");

        assert_eq!(collection["type"], "FeatureCollection");
        let points = collection["features"].as_array().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0]["geometry"]["coordinates"], json!([6.08, 50.77]));
        assert_eq!(points[0]["properties"]["label_field"], "Aachen");
        assert_eq!(points[1]["geometry"]["coordinates"], json!([0.0, 0.0]));
        assert_eq!(points[1]["properties"]["label_field"], "1880");
    }

    #[test]
    fn test_label_text_missing_property() {
        assert_eq!(label_text(&Feature::new(1), "name"), "");
    }

    #[test]
    fn test_refresh_without_source_is_noop() {
        let mut host = RecordingHost::new();
        refresh(&mut host, LayerHandle(1), "name").unwrap();
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_create_is_reusable_and_keeps_primary_on_top() {
        let mut host = RecordingHost::new();
        let config = crate::LayerConfiguration::new(
            "points",
            "SELECT cartodb_id, name FROM t",
            crate::Credentials {
                user: "u".to_string(),
                api_key: "k".to_string(),
            },
            "waterway-label",
        );
        let source = crate::host::SqlSource::new(&config.query, &config.credentials);
        let handle = crate::host::VizRuntime::create_layer(
            &mut host,
            "points",
            &source,
            &crate::compile(&config),
        )
        .unwrap();

        let spec = LabelSpec::new("name");
        create(&mut host, handle, &spec).unwrap();
        create(&mut host, handle, &spec).unwrap();

        assert!(host.has_source(LABEL_SOURCE_ID));
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::AddSource(_))), 1);
        assert_eq!(host.layer_order().last().unwrap(), "points");

        host.set_feature_variable(
            LABELS_VARIABLE,
            vec![Feature::new(9).with_property("name", json!("Abee"))],
        );
        refresh(&mut host, handle, "name").unwrap();
        let data = host.source_data(LABEL_SOURCE_ID).unwrap();
        assert_eq!(data["features"][0]["properties"]["label_field"], "Abee");

        remove(&mut host).unwrap();
        assert!(!host.has_source(LABEL_SOURCE_ID));
        assert!(!host.has_layer(LABEL_LAYER_ID));
        // Nothing left to remove
        remove(&mut host).unwrap();
    }
}
