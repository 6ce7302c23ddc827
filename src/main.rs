//! twinflow CLI: resolve observables against a model catalog.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};

use twinflow::catalog::{InMemoryCatalog, TaxonomyReasoner};
use twinflow::config::ResolverConfig;
use twinflow::engine::ResolverService;
use twinflow::notification::{JsonSink, NotificationSink, StdoutSink};
use twinflow::request::ResolutionRequest;
use twinflow::runtime::{DigitalTwin, NodeKey, Relationship};
use twinflow::scale::Scale;
use twinflow::scope::{ContextScope, ResolutionConstraint, ResolutionConstraints};

#[derive(Parser)]
#[command(name = "twinflow", version, about = "Resolve observables into executable dataflows")]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an observable and print the compiled dataflow.
    Resolve {
        #[command(flatten)]
        request: RequestArgs,

        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Resolve an observable, run it, and print the observation.
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Save the resulting twin to this file.
        #[arg(long)]
        twin: Option<PathBuf>,
    },

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
struct RequestArgs {
    /// Observable definition, e.g. "each ecology:Tree".
    observable: String,

    /// JSON model catalog.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Context name.
    #[arg(long, default_value = "default")]
    context: String,

    /// Spatial extent as x0,x1,y0,y1.
    #[arg(long)]
    space: Option<String>,

    /// Temporal extent as t0,t1.
    #[arg(long)]
    time: Option<String>,

    /// Accept partial coverage.
    #[arg(long)]
    accept_partial: bool,

    /// Exclude a model by URN (repeatable).
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Preferred namespace (repeatable).
    #[arg(long = "namespace")]
    namespaces: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file.
    Init {
        /// Where to write it.
        #[arg(default_value = "twinflow.toml")]
        path: PathBuf,
    },
    /// Print the effective configuration.
    Show,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ResolverConfig::load(path)?,
        None => ResolverConfig::default(),
    };

    match cli.command {
        Commands::Resolve { request, format } => {
            let (service, _twin) = build_service(&config, request.catalog.as_deref())?;
            let scope = scope_for(&request)?;
            let response = service.handle_request(&ResolutionRequest::new(&request.observable), &scope)?;
            match format {
                Format::Text => {
                    StdoutSink.emit_batch(&response.notifications);
                    println!("{}", response.encoded);
                    println!(
                        "\ncoverage: {:.1}%{}",
                        response.coverage * 100.0,
                        if response.complete { " (complete)" } else { "" }
                    );
                }
                Format::Json => {
                    JsonSink.emit_batch(&response.notifications);
                    println!("{}", response.to_json()?);
                }
            }
        }

        Commands::Run { request, twin } => {
            let (service, digital_twin) = build_service(&config, request.catalog.as_deref())?;
            let scope = scope_for(&request)?;
            let observable = service.observable(&request.observable)?;
            let observation = service.observe(&observable, &scope)?.wait()?;

            println!("observation {} of {}", observation.id, observation.observable);
            match &observation.value {
                Some(value) => println!("  value: {value}"),
                None => println!("  value: none"),
            }
            println!("  coverage: {}", observation.coverage);
            println!("  resolved: {}", observation.resolved);

            let key = NodeKey::Observation(observation.id);
            for activity in digital_twin.related_to(&key, Relationship::Generated) {
                let agents = digital_twin.related(&activity, Relationship::AssociatedWith);
                let agents: Vec<String> = agents.iter().map(ToString::to_string).collect();
                println!("  generated by {activity} ({})", agents.join(", "));
            }
            println!(
                "twin: {} nodes, {} edges",
                digital_twin.node_count(),
                digital_twin.edge_count()
            );

            if let Some(path) = twin {
                digital_twin.save(&path)?;
                println!("twin saved to {}", path.display());
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { path } => {
                ResolverConfig::default().save(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
            ConfigAction::Show => {
                let text = toml::to_string_pretty(&config).into_diagnostic()?;
                print!("{text}");
            }
        },
    }

    Ok(())
}

fn build_service(
    config: &ResolverConfig,
    catalog_path: Option<&Path>,
) -> Result<(ResolverService, Arc<DigitalTwin>)> {
    let catalog = Arc::new(InMemoryCatalog::new());
    if let Some(path) = catalog_path.or(config.catalog.as_deref()) {
        let count = catalog.load_json(path)?;
        tracing::info!(models = count, path = %path.display(), "catalog loaded");
    }
    let twin = Arc::new(DigitalTwin::new());
    let service = ResolverService::new(
        config.clone(),
        catalog,
        Arc::new(TaxonomyReasoner::new()),
        twin.clone(),
    )?;
    Ok((service, twin))
}

fn scope_for(args: &RequestArgs) -> Result<ContextScope> {
    let mut scale = Scale::scalar();
    if let Some(space) = &args.space {
        let v = parse_bounds(space, 4)?;
        scale = Scale::space(v[0], v[1], v[2], v[3])?;
    }
    if let Some(time) = &args.time {
        let v = parse_bounds(time, 2)?;
        let t = Scale::time(v[0], v[1])?;
        for extent in t.extents() {
            scale = scale.with_extent(*extent)?;
        }
    }

    let mut constraints = ResolutionConstraints::new();
    if args.accept_partial {
        constraints.add(ResolutionConstraint::accept_partial(true));
    }
    for urn in &args.exclude {
        constraints.add(ResolutionConstraint::exclude_model(urn.as_str()));
    }
    for ns in &args.namespaces {
        constraints.add(ResolutionConstraint::namespace(ns.as_str()));
    }
    Ok(ContextScope::new(args.context.as_str(), scale).with_resolution_constraints(&constraints))
}

fn parse_bounds(text: &str, expected: usize) -> Result<Vec<f64>> {
    let values: Vec<f64> = text
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .into_diagnostic()?;
    if values.len() != expected {
        miette::bail!("expected {expected} comma-separated numbers, got {:?}", text);
    }
    Ok(values)
}
