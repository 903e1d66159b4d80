//! Strata CLI - DAG layout engine

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata::error::{FixSuggestion, StrataError};
use strata::layout::PreparedGraph;
use strata::model::{LayoutOptions, LayoutRequest};
use strata::runtime::LayoutService;
use strata::store::InMemoryGraphStore;
use strata::StrataConfig;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - incremental DAG layering and layout engine")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/strata/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lay out a graph file and print the result as JSON
    Layout {
        /// Path to a .json or .yaml graph file
        file: PathBuf,

        #[arg(long)]
        sublevel_spacing: Option<f64>,

        #[arg(long)]
        layer_spacing: Option<f64>,

        #[arg(long)]
        horizontal_spacing: Option<f64>,

        /// Max blocks per sublevel before splitting
        #[arg(long)]
        blocks_per_sublevel: Option<usize>,

        /// Skip two-pass median layer compaction
        #[arg(long)]
        no_optimize: bool,

        /// Fail on pin level conflicts instead of reassigning
        #[arg(long)]
        strict_pins: bool,

        /// Pretty-print JSON
        #[arg(short, long)]
        pretty: bool,
    },

    /// Check a graph file for acyclicity and print a summary
    Validate {
        /// Path to a .json or .yaml graph file
        file: PathBuf,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Layout {
                file,
                sublevel_spacing,
                layer_spacing,
                horizontal_spacing,
                blocks_per_sublevel,
                no_optimize,
                strict_pins,
                pretty,
            } => {
                let overrides = LayoutOverrides {
                    sublevel_spacing,
                    layer_spacing,
                    horizontal_spacing,
                    blocks_per_sublevel,
                    no_optimize,
                    strict_pins,
                };
                run_layout(&file, config, overrides, pretty).await
            }
            Commands::Validate { file } => validate_graph(&file),
            Commands::Config => show_config(&config, cli.config.as_deref()),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

struct LayoutOverrides {
    sublevel_spacing: Option<f64>,
    layer_spacing: Option<f64>,
    horizontal_spacing: Option<f64>,
    blocks_per_sublevel: Option<usize>,
    no_optimize: bool,
    strict_pins: bool,
}

impl LayoutOverrides {
    fn apply(&self, mut options: LayoutOptions) -> LayoutOptions {
        if let Some(v) = self.sublevel_spacing {
            options.sublevel_spacing = v;
        }
        if let Some(v) = self.layer_spacing {
            options.layer_spacing = v;
        }
        if let Some(v) = self.horizontal_spacing {
            options.horizontal_spacing = v;
        }
        if let Some(v) = self.blocks_per_sublevel {
            options.blocks_per_sublevel = v;
        }
        if self.no_optimize {
            options.optimize_layout = false;
        }
        if self.strict_pins {
            options.strict_pins = true;
        }
        options
    }
}

fn load_config(path: Option<&Path>) -> Result<StrataConfig, StrataError> {
    let config = match path {
        Some(path) => StrataConfig::load_from(path)?,
        None => StrataConfig::load()?,
    };
    config.with_env()
}

async fn read_request(file: &Path) -> Result<LayoutRequest, StrataError> {
    let raw = tokio::fs::read_to_string(file).await?;
    parse_request(file, &raw)
}

fn parse_request(file: &Path, raw: &str) -> Result<LayoutRequest, StrataError> {
    let is_json = file
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str(raw).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|details| StrataError::ParseError {
        details: format!("{}: {}", file.display(), details),
    })
}

async fn run_layout(
    file: &Path,
    config: StrataConfig,
    overrides: LayoutOverrides,
    pretty: bool,
) -> Result<(), StrataError> {
    let mut request = read_request(file).await?;
    let base = request
        .options
        .take()
        .unwrap_or_else(|| config.layout.clone());
    request.options = Some(overrides.apply(base));

    let service = LayoutService::new(Arc::new(InMemoryGraphStore::new()), config);
    let response = service.calculate_layout(request).await;

    let json = if pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", json);

    if !response.success {
        eprintln!(
            "{} {}",
            "✗".red(),
            response.error_message.as_deref().unwrap_or("layout failed")
        );
        std::process::exit(2);
    }
    Ok(())
}

fn validate_graph(file: &Path) -> Result<(), StrataError> {
    let raw = std::fs::read_to_string(file)?;
    let request = parse_request(file, &raw)?;
    let prepared = PreparedGraph::from_request(&request)?;
    let order = prepared.graph.topological_order()?;

    let depth = {
        let mut layer = vec![0u32; prepared.len()];
        for &node in &order {
            for &next in prepared.graph.successors(node) {
                layer[next] = layer[next].max(layer[node] + 1);
            }
        }
        layer.iter().max().map_or(0, |m| m + 1)
    };

    println!("{} Graph '{}' is a valid DAG", "✓".green(), file.display());
    println!("  Blocks: {}", prepared.len());
    println!("  Links: {}", prepared.graph.edge_count());
    println!("  Layers: {}", depth);
    println!("  Pinned: {}", prepared.pinned_count());
    println!("  Isolated: {}", prepared.graph.isolated_count());
    Ok(())
}

fn show_config(config: &StrataConfig, path: Option<&Path>) -> Result<(), StrataError> {
    let source = path
        .map(Path::to_path_buf)
        .unwrap_or_else(StrataConfig::config_path);
    let rendered = toml::to_string_pretty(config).map_err(|e| StrataError::ConfigError {
        reason: format!("Failed to serialize config: {}", e),
    })?;

    println!("{} {}", "Config:".cyan().bold(), source.display());
    println!("{}", rendered);
    Ok(())
}
