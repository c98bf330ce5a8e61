//! archdeduce CLI - deduce cloud architecture from Python application code

use anyhow::Context;
use archdeduce::adapter::ProgramLoader;
use archdeduce::bundle::BundleWriter;
use archdeduce::config::{self, DeduceConfig};
use archdeduce::ui;
use archdeduce::{Deducer, NodeId, Oracle, StaticOracle};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "archdeduce")]
#[command(version = "0.0.1")]
#[command(about = "Deduce cloud resources, closures and their relationships from Python code")]
#[command(long_about = r#"
archdeduce reads a Python application written against a resource SDK and
deduces the architecture it describes:
  • resources constructed at deploy time
  • compute closures handed to infrastructure operations, staged as bundles
  • client calls and captured properties used by each closure

Example usage:
  archdeduce init
  archdeduce deduce app/main.py --output arch.json
  archdeduce graph app/main.py
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deduce the architecture of an entry module and write its bundles
    Deduce {
        /// Entry Python file
        entry: PathBuf,

        /// Write the architecture as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Project name used in resource ids
        #[arg(short, long)]
        project: Option<String>,

        /// Stack name used in resource ids
        #[arg(short, long)]
        stack: Option<String>,

        /// Directory receiving one sub-directory per closure
        #[arg(short, long)]
        bundle_dir: Option<PathBuf>,

        /// Extra directories searched for imported modules
        #[arg(short = 'I', long = "search-path")]
        search_paths: Vec<PathBuf>,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the resource graphs of an entry module without writing anything
    Graph {
        /// Entry Python file
        entry: PathBuf,

        /// Extra directories searched for imported modules
        #[arg(short = 'I', long = "search-path")]
        search_paths: Vec<PathBuf>,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default archdeduce.toml
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Deduce {
            entry,
            output,
            project,
            stack,
            bundle_dir,
            search_paths,
            config,
        } => {
            let flags = DeduceConfig {
                project,
                stack,
                bundle_dir,
                search_paths,
                ..Default::default()
            };
            let settings = resolve_config(config.as_deref(), flags)?;
            if let Err(err) = run_deduce(&entry, &settings, output.as_deref()).await {
                ui::error(&format!("{:#}", err));
                std::process::exit(1);
            }
        }

        Commands::Graph {
            entry,
            search_paths,
            config,
        } => {
            let flags = DeduceConfig {
                search_paths,
                ..Default::default()
            };
            let settings = resolve_config(config.as_deref(), flags)?;
            let oracle = load_program(&entry, &settings)?;
            let root = entry_root(&oracle, &entry)?;
            let deducer = Deducer::new(&oracle, settings.to_options());
            for (label, graph) in deducer.graphs(root)? {
                ui::section(&format!(" {} ", label));
                graph.print(&mut std::io::stdout())?;
            }
        }

        Commands::Init { force } => {
            let path = config::default_config_path();
            config::write_config(&path, &DeduceConfig::with_defaults(), force)?;
            config::ensure_gitignore(Path::new("."))?;
            ui::success(&format!("Wrote {}", path.display()));
        }
    }

    Ok(())
}

/// File values override defaults, flags override file values
fn resolve_config(path: Option<&Path>, flags: DeduceConfig) -> anyhow::Result<DeduceConfig> {
    let file = config::load_config(path)?;
    if let (Some(path), None) = (path, &file) {
        anyhow::bail!("config not found at {}", path.display());
    }
    Ok(file.unwrap_or_default().overridden_by(flags))
}

fn load_program(entry: &Path, settings: &DeduceConfig) -> anyhow::Result<StaticOracle> {
    let mut loader = ProgramLoader::new(settings.search_paths.clone())?;
    loader
        .load_entry(entry)
        .with_context(|| format!("failed to load {}", entry.display()))?;
    Ok(StaticOracle::new(loader.finish()))
}

fn entry_root(oracle: &StaticOracle, entry: &Path) -> anyhow::Result<NodeId> {
    let name = entry
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    oracle
        .program()
        .module_by_name(&name)
        .map(|m| m.root())
        .with_context(|| format!("entry module '{}' was not loaded", name))
}

async fn run_deduce(entry: &Path, settings: &DeduceConfig, output: Option<&Path>) -> anyhow::Result<()> {
    let start = Instant::now();
    let options = settings.to_options();

    ui::header(&format!("Deducing {}", entry.display()));
    ui::target(&options.project, &options.stack, settings.platform.as_deref());

    ui::phase("Loading program");
    let oracle = load_program(entry, settings)?;
    let root = entry_root(&oracle, entry)?;
    ui::summary_row("Modules:", &oracle.program().modules().len().to_string());

    ui::phase("Deducing architecture");
    let deduction = Deducer::new(&oracle, options).deduce(root)?;
    let arch = &deduction.architecture;

    ui::phase("Writing bundles");
    let written = BundleWriter::new().clean(true).write_all(&deduction.bundles).await?;
    for file in &written {
        ui::bundle_written(file);
    }

    if let Some(output) = output {
        std::fs::write(output, arch.to_json()?)
            .with_context(|| format!("failed to write {}", output.display()))?;
        ui::architecture_written(output);
    }

    if arch.is_empty() {
        ui::warn("No resources found");
        return Ok(());
    }

    ui::section(" Resources ");
    println!("{}", ui::resources_table(arch));
    if !arch.closures.is_empty() {
        ui::section(" Closures ");
        println!("{}", ui::closures_table(arch));
    }
    if !arch.relationships.is_empty() {
        ui::section(" Relationships ");
        println!("{}", ui::relationships_table(arch));
    }

    let resources = arch.resources.len().to_string();
    let closures = arch.closures.len().to_string();
    let relationships = arch.relationships.len().to_string();
    println!();
    println!(
        "{}",
        ui::stats_table(&[
            ("Resources", resources.as_str()),
            ("Closures", closures.as_str()),
            ("Relationships", relationships.as_str()),
        ])
    );
    ui::timing(&format!("{:.2?}", start.elapsed()));
    ui::success("Deduction complete");
    Ok(())
}
