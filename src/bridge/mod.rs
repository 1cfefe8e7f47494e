//! Interaction event bridge
//!
//! Subscribes to click/enter/leave on the live layer and turns the raw
//! runtime events into typed callbacks:
//!
//! - **click**: one call per newly clicked feature. Clicking the same feature
//!   again does nothing until a different feature (or empty space) is clicked.
//! - **enter**: one call per feature entered, no de-duplication.
//! - **leave**: one call per feature left, no de-duplication.
//!
//! Empty feature slots in an event are skipped. When a [`HighlightSpec`] is
//! configured, the entered feature is blended to the highlight color and the
//! previously entered one is reset first, so at most one feature is
//! highlighted through the enter path.

use std::time::Duration;

use crate::config::HighlightSpec;
use crate::host::{
    Channel, Coordinates, Feature, FeatureId, Host, InteractionEvent, InteractionKind,
    LayerHandle, SubscriptionId,
};
use crate::Result;

/// Callback receiving a feature and the pointer position
pub type FeatureCallback = Box<dyn FnMut(&Feature, Coordinates)>;

/// Callback receiving the feature the pointer left
pub type LeaveCallback = Box<dyn FnMut(&Feature)>;

/// Interaction callbacks supplied by the application shell
#[derive(Default)]
pub struct InteractionCallbacks {
    pub click: Option<FeatureCallback>,
    pub enter: Option<FeatureCallback>,
    pub leave: Option<LeaveCallback>,
}

impl std::fmt::Debug for InteractionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionCallbacks")
            .field("click", &self.click.is_some())
            .field("enter", &self.enter.is_some())
            .field("leave", &self.leave.is_some())
            .finish()
    }
}

impl InteractionCallbacks {
    /// Interaction kinds that need a listener
    ///
    /// Enter and leave are also needed for highlighting without callbacks.
    pub fn wanted(&self, highlight: bool) -> Vec<InteractionKind> {
        let mut kinds = Vec::new();
        if self.click.is_some() {
            kinds.push(InteractionKind::Click);
        }
        if self.enter.is_some() || highlight {
            kinds.push(InteractionKind::Enter);
        }
        if self.leave.is_some() || highlight {
            kinds.push(InteractionKind::Leave);
        }
        kinds
    }
}

/// Per-layer interaction state
#[derive(Debug, Default)]
pub struct EventBridge {
    /// Features of the last click that hit something
    last_clicked: Vec<FeatureId>,
    /// Feature currently highlighted through the enter path
    entered: Option<FeatureId>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget interaction state, e.g. when the layer is rebuilt
    pub fn reset(&mut self) {
        self.last_clicked.clear();
        self.entered = None;
    }

    pub fn entered(&self) -> Option<&FeatureId> {
        self.entered.as_ref()
    }

    /// Register one listener per wanted interaction kind
    ///
    /// On failure the listeners registered so far are dropped again.
    pub fn subscribe<H: Host + ?Sized>(
        host: &mut H,
        layer: LayerHandle,
        kinds: &[InteractionKind],
    ) -> Result<Vec<SubscriptionId>> {
        let mut ids = Vec::with_capacity(kinds.len());
        for kind in kinds {
            match host.subscribe(layer, kind.event_kind()) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        host.unsubscribe(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Dispatch a raw interaction event
    pub fn handle<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        layer: LayerHandle,
        event: &InteractionEvent,
        highlight: Option<&HighlightSpec>,
        callbacks: &mut InteractionCallbacks,
    ) {
        let features: Vec<&Feature> = event.features.iter().flatten().collect();
        match event.kind {
            InteractionKind::Click => self.click(&features, event.coordinates, callbacks),
            InteractionKind::Enter => {
                for feature in features {
                    if let Some(highlight) = highlight {
                        self.highlight(host, layer, &feature.id, highlight);
                    }
                    if let Some(callback) = callbacks.enter.as_mut() {
                        callback(feature, event.coordinates);
                    }
                }
            }
            InteractionKind::Leave => {
                for feature in features {
                    if let Some(highlight) = highlight {
                        let duration = Duration::from_millis(highlight.duration_ms);
                        if let Err(e) = host.feature_reset(layer, &feature.id, Channel::Color, duration)
                        {
                            tracing::warn!("Could not reset feature {}: {}", feature.id, e);
                        }
                    }
                    if self.entered.as_ref() == Some(&feature.id) {
                        self.entered = None;
                    }
                    if let Some(callback) = callbacks.leave.as_mut() {
                        callback(feature);
                    }
                }
            }
        }
    }

    fn click(
        &mut self,
        features: &[&Feature],
        coordinates: Coordinates,
        callbacks: &mut InteractionCallbacks,
    ) {
        let clicked: Vec<FeatureId> = features.iter().map(|f| f.id.clone()).collect();
        if let Some(callback) = callbacks.click.as_mut() {
            for feature in features {
                if !self.last_clicked.contains(&feature.id) {
                    callback(feature, coordinates);
                }
            }
        }
        self.last_clicked = clicked;
    }

    fn highlight<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        layer: LayerHandle,
        feature: &FeatureId,
        highlight: &HighlightSpec,
    ) {
        if let Some(previous) = self.entered.take() {
            if &previous != feature {
                if let Err(e) = host.feature_reset(layer, &previous, Channel::Color, Duration::ZERO) {
                    tracing::warn!("Could not reset feature {}: {}", previous, e);
                }
            }
        }
        let duration = Duration::from_millis(highlight.duration_ms);
        if let Err(e) =
            host.feature_blend_to(layer, feature, Channel::Color, &highlight.color, duration)
        {
            tracing::warn!("Could not highlight feature {}: {}", feature, e);
        }
        self.entered = Some(feature.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EventKind, HostCall, RecordingHost};
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const LAYER: LayerHandle = LayerHandle(1);

    fn event(kind: InteractionKind, ids: &[i64]) -> InteractionEvent {
        InteractionEvent {
            kind,
            features: ids.iter().map(|id| Some(Feature::new(*id))).collect(),
            coordinates: Coordinates { lng: 1.0, lat: 2.0 },
        }
    }

    fn recording_callbacks() -> (InteractionCallbacks, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (click, enter, leave) = (log.clone(), log.clone(), log.clone());
        let callbacks = InteractionCallbacks {
            click: Some(Box::new(move |f, _| click.borrow_mut().push(format!("click {}", f.id)))),
            enter: Some(Box::new(move |f, _| enter.borrow_mut().push(format!("enter {}", f.id)))),
            leave: Some(Box::new(move |f| leave.borrow_mut().push(format!("leave {}", f.id)))),
        };
        (callbacks, log)
    }

    fn highlight() -> HighlightSpec {
        HighlightSpec {
            color: "opacity(turquoise, 1)".to_string(),
            duration_ms: 150,
        }
    }

    #[test]
    fn test_wanted_kinds() {
        let callbacks = InteractionCallbacks::default();
        assert!(callbacks.wanted(false).is_empty());
        assert_eq!(
            callbacks.wanted(true),
            vec![InteractionKind::Enter, InteractionKind::Leave]
        );

        let (callbacks, _) = recording_callbacks();
        assert_eq!(callbacks.wanted(false).len(), 3);
    }

    #[test]
    fn test_subscribe_registers_listeners() {
        let mut host = RecordingHost::new();
        let config = crate::LayerConfiguration::new(
            "l",
            "SELECT cartodb_id FROM t",
            crate::Credentials {
                user: "u".to_string(),
                api_key: "k".to_string(),
            },
            "b",
        );
        let source = crate::host::SqlSource::new(&config.query, &config.credentials);
        let layer = crate::host::VizRuntime::create_layer(
            &mut host,
            "l",
            &source,
            &crate::compile(&config),
        )
        .unwrap();

        let ids = EventBridge::subscribe(&mut host, layer, &[InteractionKind::Click]).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(host.active_subscriptions(layer, EventKind::FeatureClick), 1);
        assert_eq!(host.active_subscriptions(layer, EventKind::FeatureEnter), 0);
    }

    #[test]
    fn test_click_same_feature_twice_fires_once() {
        let mut host = RecordingHost::new();
        let mut bridge = EventBridge::new();
        let (mut callbacks, log) = recording_callbacks();

        let click = event(InteractionKind::Click, &[7]);
        bridge.handle(&mut host, LAYER, &click, None, &mut callbacks);
        bridge.handle(&mut host, LAYER, &click, None, &mut callbacks);
        assert_eq!(*log.borrow(), vec!["click 7"]);

        bridge.handle(&mut host, LAYER, &event(InteractionKind::Click, &[8]), None, &mut callbacks);
        bridge.handle(&mut host, LAYER, &click, None, &mut callbacks);
        assert_eq!(*log.borrow(), vec!["click 7", "click 8", "click 7"]);
    }

    #[test]
    fn test_click_on_empty_space_resets_last_clicked() {
        let mut host = RecordingHost::new();
        let mut bridge = EventBridge::new();
        let (mut callbacks, log) = recording_callbacks();

        let click = event(InteractionKind::Click, &[7]);
        bridge.handle(&mut host, LAYER, &click, None, &mut callbacks);
        bridge.handle(&mut host, LAYER, &event(InteractionKind::Click, &[]), None, &mut callbacks);
        bridge.handle(&mut host, LAYER, &click, None, &mut callbacks);
        assert_eq!(*log.borrow(), vec!["click 7", "click 7"]);
    }

    #[test]
    fn test_enter_and_leave_flatten_features() {
        let mut host = RecordingHost::new();
        let mut bridge = EventBridge::new();
        let (mut callbacks, log) = recording_callbacks();

        let mut enter = event(InteractionKind::Enter, &[1, 2]);
        enter.features.insert(1, None);
        bridge.handle(&mut host, LAYER, &enter, None, &mut callbacks);
        bridge.handle(&mut host, LAYER, &enter, None, &mut callbacks);
        bridge.handle(&mut host, LAYER, &event(InteractionKind::Leave, &[2]), None, &mut callbacks);

        assert_eq!(
            *log.borrow(),
            vec!["enter 1", "enter 2", "enter 1", "enter 2", "leave 2"]
        );
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_enter_resets_previous_highlight_first() {
        let mut host = RecordingHost::new();
        let mut bridge = EventBridge::new();
        let (mut callbacks, _) = recording_callbacks();
        let spec = highlight();

        bridge.handle(&mut host, LAYER, &event(InteractionKind::Enter, &[1]), Some(&spec), &mut callbacks);
        bridge.handle(&mut host, LAYER, &event(InteractionKind::Enter, &[2]), Some(&spec), &mut callbacks);

        let calls = host.take_calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(
            &calls[0],
            HostCall::FeatureBlendTo { feature: FeatureId::Number(1), .. }
        ));
        assert!(matches!(
            &calls[1],
            HostCall::FeatureReset { feature: FeatureId::Number(1), .. }
        ));
        assert!(matches!(
            &calls[2],
            HostCall::FeatureBlendTo { feature: FeatureId::Number(2), .. }
        ));
        assert_eq!(bridge.entered(), Some(&FeatureId::Number(2)));
    }

    #[test]
    fn test_leave_clears_highlight() {
        let mut host = RecordingHost::new();
        let mut bridge = EventBridge::new();
        let mut callbacks = InteractionCallbacks::default();
        let spec = highlight();

        bridge.handle(&mut host, LAYER, &event(InteractionKind::Enter, &[1]), Some(&spec), &mut callbacks);
        bridge.handle(&mut host, LAYER, &event(InteractionKind::Leave, &[1]), Some(&spec), &mut callbacks);
        assert_eq!(bridge.entered(), None);
        assert!(matches!(
            host.calls().last(),
            Some(HostCall::FeatureReset { feature: FeatureId::Number(1), .. })
        ));
    }

    proptest! {
        #[test]
        fn test_click_fires_only_on_identity_change(ids in proptest::collection::vec(0i64..4, 0..30)) {
            let mut host = RecordingHost::new();
            let mut bridge = EventBridge::new();
            let fired = Rc::new(RefCell::new(Vec::new()));
            let sink = fired.clone();
            let mut callbacks = InteractionCallbacks {
                click: Some(Box::new(move |f, _| sink.borrow_mut().push(f.id.clone()))),
                ..Default::default()
            };

            for id in &ids {
                bridge.handle(&mut host, LAYER, &event(InteractionKind::Click, &[*id]), None, &mut callbacks);
            }

            let mut expected: Vec<FeatureId> = ids.iter().map(|id| FeatureId::Number(*id)).collect();
            expected.dedup();
            prop_assert_eq!(fired.borrow().clone(), expected);
        }

        #[test]
        fn test_enter_highlights_at_most_one_feature(ids in proptest::collection::vec(0i64..5, 1..20)) {
            let mut host = RecordingHost::new();
            let mut bridge = EventBridge::new();
            let mut callbacks = InteractionCallbacks::default();
            let spec = highlight();

            let mut highlighted: Vec<FeatureId> = Vec::new();
            for id in &ids {
                bridge.handle(&mut host, LAYER, &event(InteractionKind::Enter, &[*id]), Some(&spec), &mut callbacks);
                for call in host.take_calls() {
                    match call {
                        HostCall::FeatureBlendTo { feature, .. } => highlighted.push(feature),
                        HostCall::FeatureReset { feature, .. } => highlighted.retain(|f| *f != feature),
                        _ => {}
                    }
                }
                let mut distinct = highlighted.clone();
                distinct.dedup();
                prop_assert!(distinct.len() <= 1);
            }
        }
    }
}
