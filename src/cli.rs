/*!
sqllayer Command Line Interface

Compiles, validates and diffs layer configurations, and replays a sample
session against the in-memory recording host.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqllayer::host::{GlobalHistogram, HostCall, RecordingHost};
use sqllayer::{
    compile, plan, Callbacks, Coordinates, Credentials, Feature, HighlightSpec, HostEvent,
    InteractionEvent, InteractionKind, LabelSpec, LayerConfiguration, SqlLayer,
    VariableDeclaration, VariableKind, VERSION,
};

#[derive(Parser)]
#[command(name = "sqllayer")]
#[command(about = "SQL-backed vector layers for interactive maps")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the visualization program of a layer configuration
    Compile {
        /// Path to a JSON layer configuration
        config: PathBuf,
    },

    /// Validate a layer configuration without touching a map
    Validate {
        /// Path to a JSON layer configuration
        config: PathBuf,
    },

    /// Show the actions that take a live layer from one configuration to another
    Plan {
        /// Configuration currently applied
        prev: PathBuf,

        /// Configuration to apply
        next: PathBuf,
    },

    /// Replay a sample session against an in-memory map and print the host calls
    Demo,
}

fn load(path: &Path) -> anyhow::Result<LayerConfiguration> {
    LayerConfiguration::from_json_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sqllayer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { config } => {
            let config = load(&config)?;
            config.validate()?;
            println!("{}", compile(&config));
        }
        Commands::Validate { config } => {
            let config = load(&config)?;
            config.validate()?;
            println!("✅ Layer '{}' is valid", config.name);
            println!("  Fields: {}", config.selected_fields().join(", "));
            for (kind, variable) in config.variables() {
                println!("  {} variable @{} → {}", kind, variable.name, variable.callback);
            }
        }
        Commands::Plan { prev, next } => {
            let prev = load(&prev)?;
            let next = load(&next)?;
            next.validate()?;
            let actions = plan(&prev, &next);
            if actions.is_empty() {
                println!("No changes");
            }
            for action in actions {
                println!("{:?}", action);
            }
        }
        Commands::Demo => demo()?,
    }

    Ok(())
}

fn print_calls(step: &str, host: &mut RecordingHost) {
    println!("== {}", step);
    for call in host.take_calls() {
        match call {
            HostCall::CreateLayer { handle, name, program, .. } => {
                println!("CreateLayer {} '{}'", handle, name);
                for line in program.lines() {
                    println!("    {}", line);
                }
            }
            other => println!("{:?}", other),
        }
    }
}

/// Meteorite landings explorer: count, mass histogram, labels and highlight
fn demo() -> anyhow::Result<()> {
    let config = LayerConfiguration::new(
        "meteorites-layer",
        "SELECT cartodb_id, the_geom_webmercator, name, mass FROM meteorites",
        Credentials {
            user: "dotgis".to_string(),
            api_key: "default_public".to_string(),
        },
        "carto-voyager",
    )
    .with_fields(&["cartodb_id", "name", "mass"])
    .with_variable(
        VariableKind::Math,
        VariableDeclaration::new("count", "viewportCount()", "onCount"),
    )
    .with_variable(
        VariableKind::Global,
        VariableDeclaration::new("massHist", "globalHistogram($mass, 4)", "onMassHistogram"),
    )
    .with_labels(LabelSpec::new("name"));
    let config = LayerConfiguration {
        color: "ramp(linear($mass, 0, 100000), sunset)".to_string(),
        highlight: Some(HighlightSpec {
            color: "opacity(turquoise, 1)".to_string(),
            duration_ms: 150,
        }),
        ..config
    };

    let callbacks = Callbacks::new()
        .on_loaded(|message| println!("-> {}", message))
        .on_initial_viewport_features(|features| {
            println!("-> {} features in the initial viewport", features.len())
        })
        .on_feature_click(|feature, at| {
            println!("-> clicked {} at {:.2}, {:.2}", feature.id, at.lng, at.lat)
        })
        .on_variable("onCount", |result| println!("-> count {:?}", result))
        .on_variable("onMassHistogram", |result| println!("-> mass histogram {:?}", result));

    let mut host = RecordingHost::new();
    host.set_number_variable("count", 1043.0);
    host.set_global_histogram(
        "massHist",
        GlobalHistogram {
            size: 4,
            buckets: [(0, 0.82), (1, 0.12), (2, 0.05), (3, 0.01)].into_iter().collect(),
        },
    );
    let aachen = Feature::new(1)
        .with_property("name", json!("Aachen"))
        .with_property("mass", json!(21))
        .with_centroid(6.08, 50.77);
    host.set_feature_variable("v_features", vec![aachen.clone()]);
    host.set_feature_variable("v_labels", vec![aachen.clone()]);

    let mut layer = SqlLayer::new(callbacks);
    layer.mount(&mut host, config.clone())?;
    print_calls("mount", &mut host);

    let handle = layer
        .layer_handle()
        .context("Layer was not attached after mount")?;
    layer.handle_event(&mut host, HostEvent::Loaded(handle))?;
    for event in host.take_scheduled() {
        layer.handle_event(&mut host, event)?;
    }
    layer.handle_event(&mut host, HostEvent::Updated(handle))?;
    print_calls("loaded and updated", &mut host);

    let click = InteractionEvent {
        kind: InteractionKind::Click,
        features: vec![Some(aachen.clone())],
        coordinates: Coordinates {
            lng: 6.08,
            lat: 50.77,
        },
    };
    layer.handle_event(&mut host, HostEvent::Interaction(handle, click.clone()))?;
    layer.handle_event(&mut host, HostEvent::Interaction(handle, click))?;
    let enter = InteractionEvent {
        kind: InteractionKind::Enter,
        features: vec![Some(aachen)],
        coordinates: Coordinates::default(),
    };
    layer.handle_event(&mut host, HostEvent::Interaction(handle, enter))?;
    print_calls("click twice, then hover", &mut host);

    let filtered = LayerConfiguration {
        filter: "and $mass > 1000".to_string(),
        stroke_width: 0.5,
        ..config.clone()
    };
    let report = layer.update(&mut host, filtered)?;
    println!("planned: {:?}", report.actions);
    print_calls("update filter and stroke width", &mut host);

    let moved = LayerConfiguration {
        basemap_id: "waterway-label".to_string(),
        ..config
    };
    let report = layer.update(&mut host, moved)?;
    println!("planned: {:?}", report.actions);
    print_calls("update basemap", &mut host);

    host.replace_style();
    layer.handle_event(&mut host, HostEvent::StyleData)?;
    print_calls("style replaced", &mut host);

    layer.unmount(&mut host)?;
    print_calls("unmount", &mut host);
    Ok(())
}
