//! Configuration reconciliation
//!
//! Compares the applied configuration with the next one and decides the
//! cheapest way to bring the live layer in line:
//!
//! 1. Structural change (name, basemap, selected fields, label field, the
//!    declared variables, or turning the highlight on or off): rebuild the
//!    layer, nothing else.
//! 2. Query or credentials change: swap the data source.
//! 3. Color, stroke color, stroke width: blend the channel.
//! 4. Filter fragment or zoom bounds: blend the recomposed filter.
//! 5. Visibility: toggle.
//!
//! A new highlight colour applies from the next enter. Anything else (width,
//! label styling) only takes effect on the next rebuild.

use std::time::Duration;

use crate::bridge::EventBridge;
use crate::compiler::filter_expression;
use crate::config::{format_number, LayerConfiguration};
use crate::host::{Channel, Host, InteractionKind};
use crate::lifecycle::LayerLifecycle;
use crate::{Result, SqlLayerError};

/// Transition time of channel patches
pub const BLEND_DURATION: Duration = Duration::from_millis(500);

/// One step towards the next configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    Rebuild,
    ReplaceSource,
    Patch { channel: Channel, value: String },
    SetVisibility(bool),
}

/// Outcome of an applied update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Actions that were planned, in order
    pub actions: Vec<ReconcileAction>,
    /// Non-fatal failures; the affected fields kept their previous value
    pub diagnostics: Vec<SqlLayerError>,
    /// Whether the layer was rebuilt
    pub rebuilt: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Plan the actions taking the layer from `prev` to `next`
///
/// A rebuild is never combined with other actions.
pub fn plan(prev: &LayerConfiguration, next: &LayerConfiguration) -> Vec<ReconcileAction> {
    // Enter/leave listeners are bound when the layer is built
    let highlight_toggled = prev.highlight.is_some() != next.highlight.is_some();
    if !prev.same_structure(next) || highlight_toggled {
        return vec![ReconcileAction::Rebuild];
    }

    let mut actions = Vec::new();
    if prev.query != next.query || prev.credentials != next.credentials {
        actions.push(ReconcileAction::ReplaceSource);
    }
    if prev.color != next.color {
        actions.push(ReconcileAction::Patch {
            channel: Channel::Color,
            value: next.color.clone(),
        });
    }
    if prev.stroke_color != next.stroke_color {
        actions.push(ReconcileAction::Patch {
            channel: Channel::StrokeColor,
            value: next.stroke_color.clone(),
        });
    }
    if prev.stroke_width != next.stroke_width {
        actions.push(ReconcileAction::Patch {
            channel: Channel::StrokeWidth,
            value: format_number(next.stroke_width),
        });
    }

    let prev_filter = filter_expression(prev.minzoom, prev.maxzoom, &prev.filter);
    let next_filter = filter_expression(next.minzoom, next.maxzoom, &next.filter);
    if prev_filter != next_filter {
        actions.push(ReconcileAction::Patch {
            channel: Channel::Filter,
            value: next_filter,
        });
    }

    if prev.visible != next.visible {
        actions.push(ReconcileAction::SetVisibility(next.visible));
    }
    actions
}

/// Apply the plan from `prev` to `next` on the live layer
///
/// Returns the configuration that is now in effect: `next`, except for
/// fields whose patch was rejected, which keep their `prev` value.
///
/// # Errors
///
/// A failed source swap or rebuild aborts the update; nothing of `next` is
/// applied in that case.
pub(crate) fn reconcile<H: Host + ?Sized>(
    host: &mut H,
    lifecycle: &mut LayerLifecycle,
    bridge: &mut EventBridge,
    prev: &LayerConfiguration,
    next: &LayerConfiguration,
    interactions: &[InteractionKind],
) -> Result<(LayerConfiguration, ReconcileReport)> {
    let mut actions = plan(prev, next);
    if lifecycle.handle().is_none() && !actions.is_empty() {
        actions = vec![ReconcileAction::Rebuild];
    }

    let mut report = ReconcileReport {
        actions: actions.clone(),
        ..Default::default()
    };
    if actions.is_empty() {
        // Nothing visible changed; take over inert fields like width
        return Ok((next.clone(), report));
    }

    if actions == [ReconcileAction::Rebuild] {
        lifecycle.rebuild(host, next, interactions)?;
        bridge.reset();
        report.rebuilt = true;
        tracing::info!("Layer '{}' rebuilt", next.name);
        return Ok((next.clone(), report));
    }

    let mut applied = next.clone();
    for action in actions {
        match action {
            // Planned alone and handled above
            ReconcileAction::Rebuild => {}
            ReconcileAction::ReplaceSource => {
                lifecycle.replace_source(host, next)?;
                tracing::debug!("Data source of '{}' replaced", next.name);
            }
            ReconcileAction::Patch { channel, value } => {
                let Some(handle) = lifecycle.handle() else {
                    continue;
                };
                if let Err(e) = host.blend_to(handle, channel, &value, BLEND_DURATION) {
                    let error = SqlLayerError::VisualizationPatchError(format!(
                        "Could not apply {} '{}': {}",
                        channel, value, e
                    ));
                    tracing::warn!("{}", error);
                    revert(&mut applied, prev, channel);
                    report.diagnostics.push(error);
                }
            }
            ReconcileAction::SetVisibility(visible) => {
                let Some(handle) = lifecycle.handle() else {
                    continue;
                };
                if let Err(e) = host.set_visible(handle, visible) {
                    let error = SqlLayerError::VisualizationPatchError(format!(
                        "Could not set visibility to {}: {}",
                        visible, e
                    ));
                    tracing::warn!("{}", error);
                    applied.visible = prev.visible;
                    report.diagnostics.push(error);
                }
            }
        }
    }
    Ok((applied, report))
}

fn revert(applied: &mut LayerConfiguration, prev: &LayerConfiguration, channel: Channel) {
    match channel {
        Channel::Color => applied.color = prev.color.clone(),
        Channel::StrokeColor => applied.stroke_color = prev.stroke_color.clone(),
        Channel::StrokeWidth => applied.stroke_width = prev.stroke_width,
        Channel::Width => applied.width = prev.width.clone(),
        Channel::Filter => {
            applied.filter = prev.filter.clone();
            applied.minzoom = prev.minzoom;
            applied.maxzoom = prev.maxzoom;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelValue, Credentials, LabelSpec, VariableDeclaration, VariableKind};
    use crate::host::{HostCall, RecordingHost};

    fn config() -> LayerConfiguration {
        LayerConfiguration::new(
            "meteorites",
            "SELECT cartodb_id, name, mass FROM meteorites",
            Credentials {
                user: "dotgis".to_string(),
                api_key: "default_public".to_string(),
            },
            "waterway-label",
        )
        .with_fields(&["cartodb_id", "mass"])
    }

    fn live() -> (RecordingHost, LayerLifecycle, EventBridge) {
        let mut host = RecordingHost::new();
        let mut lifecycle = LayerLifecycle::new();
        lifecycle.initialize(&mut host, &config(), &[]).unwrap();
        host.take_calls();
        (host, lifecycle, EventBridge::new())
    }

    #[test]
    fn test_plan_identical_is_empty() {
        assert!(plan(&config(), &config()).is_empty());
    }

    #[test]
    fn test_plan_structural_change_rebuilds_only() {
        let mut next = config();
        next.basemap_id = "carto-voyager".to_string();
        next.color = "red".to_string();
        assert_eq!(plan(&config(), &next), vec![ReconcileAction::Rebuild]);

        let next = config().with_labels(LabelSpec::new("name"));
        assert_eq!(plan(&config(), &next), vec![ReconcileAction::Rebuild]);

        let next = config().with_variable(
            VariableKind::Math,
            VariableDeclaration::new("count", "viewportCount()", "onCount"),
        );
        assert_eq!(plan(&config(), &next), vec![ReconcileAction::Rebuild]);
    }

    #[test]
    fn test_plan_patches_in_order() {
        let mut next = config();
        next.query = "SELECT cartodb_id, name, mass FROM meteorites WHERE mass > 10".to_string();
        next.stroke_width = 2.0;
        next.color = "ramp($mass, sunset)".to_string();
        next.visible = false;

        assert_eq!(
            plan(&config(), &next),
            vec![
                ReconcileAction::ReplaceSource,
                ReconcileAction::Patch {
                    channel: Channel::Color,
                    value: "ramp($mass, sunset)".to_string()
                },
                ReconcileAction::Patch {
                    channel: Channel::StrokeWidth,
                    value: "2".to_string()
                },
                ReconcileAction::SetVisibility(false),
            ]
        );
    }

    #[test]
    fn test_plan_zoom_change_patches_filter() {
        let mut next = config();
        next.minzoom = 3.0;
        next.filter = "and $mass > 100".to_string();
        assert_eq!(
            plan(&config(), &next),
            vec![ReconcileAction::Patch {
                channel: Channel::Filter,
                value: "zoom() < 22 and zoom() > 3 and $mass > 100".to_string()
            }]
        );
    }

    #[test]
    fn test_plan_ignores_width_and_label_styling() {
        let base = config().with_labels(LabelSpec::new("name"));
        let mut next = base.clone();
        next.width = Some(ChannelValue::Number(4.0));
        if let Some(labels) = next.labels.as_mut() {
            labels.paint.text_color = "#ff0000".to_string();
        }
        assert!(plan(&base, &next).is_empty());
    }

    #[test]
    fn test_reconcile_patch_keeps_handle() {
        let (mut host, mut lifecycle, mut bridge) = live();
        let handle = lifecycle.handle().unwrap();
        let mut next = config();
        next.color = "blue".to_string();

        let (applied, report) =
            reconcile(&mut host, &mut lifecycle, &mut bridge, &config(), &next, &[]).unwrap();
        assert_eq!(applied.color, "blue");
        assert!(!report.rebuilt);
        assert_eq!(lifecycle.handle(), Some(handle));
        assert!(report.is_clean());
        assert_eq!(
            host.calls(),
            &[HostCall::BlendTo {
                handle,
                channel: Channel::Color,
                value: "blue".to_string()
            }]
        );

        let patches: [fn(&mut LayerConfiguration); 5] = [
            |c| c.stroke_color = "white".to_string(),
            |c| c.stroke_width = 3.0,
            |c| c.filter = "and $mass > 10".to_string(),
            |c| c.maxzoom = 12.0,
            |c| c.visible = false,
        ];
        let mut prev = applied;
        for patch in patches {
            let mut next = prev.clone();
            patch(&mut next);
            let (applied, report) =
                reconcile(&mut host, &mut lifecycle, &mut bridge, &prev, &next, &[]).unwrap();
            assert_eq!(report.actions.len(), 1);
            assert!(!report.rebuilt);
            assert!(report.is_clean());
            assert_eq!(applied, next);
            assert_eq!(lifecycle.handle(), Some(handle));
            prev = applied;
        }
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::CreateLayer { .. })), 0);
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::RemoveLayer(_))), 0);
        assert_eq!(host.is_visible(handle), Some(false));
    }

    #[test]
    fn test_plan_highlight_toggle_rebuilds() {
        let highlighted = LayerConfiguration {
            highlight: Some(crate::config::HighlightSpec {
                color: "opacity(turquoise, 1)".to_string(),
                duration_ms: 150,
            }),
            ..config()
        };
        assert_eq!(plan(&config(), &highlighted), vec![ReconcileAction::Rebuild]);
        assert_eq!(plan(&highlighted, &config()), vec![ReconcileAction::Rebuild]);

        let mut recoloured = highlighted.clone();
        if let Some(h) = recoloured.highlight.as_mut() {
            h.color = "red".to_string();
        }
        assert!(plan(&highlighted, &recoloured).is_empty());
    }

    #[test]
    fn test_reconcile_query_change_swaps_source_once() {
        let (mut host, mut lifecycle, mut bridge) = live();
        let mut next = config();
        next.query = "SELECT cartodb_id, mass FROM meteorites".to_string();

        reconcile(&mut host, &mut lifecycle, &mut bridge, &config(), &next, &[]).unwrap();
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::ReplaceSource { .. })), 1);
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::CreateLayer { .. })), 0);
    }

    #[test]
    fn test_reconcile_basemap_change_rebuilds_once() {
        let (mut host, mut lifecycle, mut bridge) = live();
        let mut next = config();
        next.basemap_id = "carto-voyager".to_string();

        let (_, report) =
            reconcile(&mut host, &mut lifecycle, &mut bridge, &config(), &next, &[]).unwrap();
        assert!(report.rebuilt);
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::RemoveLayer(_))), 1);
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::CreateLayer { .. })), 1);
        assert!(host.calls().contains(&HostCall::AttachLayer {
            handle: lifecycle.handle().unwrap(),
            before: Some("watername_ocean".to_string()),
        }));
    }

    #[test]
    fn test_reconcile_patch_failure_keeps_other_patches() {
        let (mut host, mut lifecycle, mut bridge) = live();
        host.fail_channel(Channel::Color);
        let mut next = config();
        next.color = "not a color(".to_string();
        next.stroke_color = "white".to_string();
        next.visible = false;

        let (applied, report) =
            reconcile(&mut host, &mut lifecycle, &mut bridge, &config(), &next, &[]).unwrap();
        assert_eq!(report.diagnostics.len(), 1);
        assert!(matches!(
            report.diagnostics[0],
            SqlLayerError::VisualizationPatchError(_)
        ));
        assert_eq!(applied.color, config().color);
        assert_eq!(applied.stroke_color, "white");
        assert!(!applied.visible);
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::SetVisible { .. })), 1);
    }

    #[test]
    fn test_reconcile_source_failure_applies_nothing() {
        let (mut host, mut lifecycle, mut bridge) = live();
        host.fail_replace_source(true);
        let mut next = config();
        next.query = "SELECT cartodb_id, mass FROM broken".to_string();
        next.color = "red".to_string();

        let result = reconcile(&mut host, &mut lifecycle, &mut bridge, &config(), &next, &[]);
        assert!(matches!(result, Err(SqlLayerError::LayerUpdateError(_))));
        assert_eq!(host.count_calls(|c| matches!(c, HostCall::BlendTo { .. })), 0);
    }
}
