//! Lorebase CLI - knowledge base administration and the reconciliation daemon

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lorebase_core::config::Config;
use lorebase_core::domain::reconcile::ReconcileReport;
use lorebase_core::domain::taxonomy::{Concept, ConceptType};
use lorebase_core::domain::entity::Entity;
use lorebase_core::storage::Database;
use lorebase_core::KnowledgeBase;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lorebase")]
#[command(author, version, about = "Curated knowledge base with a graph mirror", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file (overrides storage.path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation scheduler until interrupted
    Serve,

    /// Run a single reconciliation pass
    Reconcile,

    /// Manage the concept taxonomy
    Concepts {
        #[command(subcommand)]
        action: ConceptAction,
    },

    /// Manage entities
    Entities {
        #[command(subcommand)]
        action: EntityAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConceptAction {
    /// List every concept, depth-first
    List,
    /// Create a top-level concept
    CreateTop {
        name: String,
        /// Entity table owned by the concept
        #[arg(short, long)]
        table: String,
        /// person, place, object, event, organization or other
        #[arg(short, long, default_value = "other")]
        kind: String,
    },
    /// Create a child concept
    CreateChild { parent: String, name: String },
    /// Remove a concept and its subtree
    Remove { uid: String },
}

#[derive(Subcommand)]
enum EntityAction {
    /// Create a draft entity
    Create {
        name: String,
        /// Concept uid; omitted means the default table
        #[arg(short, long, default_value = "")]
        concept: String,
    },
    /// Show an entity
    Get { uid: String },
    /// Publish an entity
    Publish { uid: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Show the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lorebase=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let load_config = || -> anyhow::Result<Config> {
        let mut config = Config::load()?;
        if let Some(path) = &cli.db {
            config.storage.path = Some(path.clone());
        }
        Ok(config)
    };

    match cli.command {
        Commands::Serve => cmd_serve(load_config()?, cli.quiet).await,
        Commands::Reconcile => cmd_reconcile(load_config()?, cli.format).await,
        Commands::Concepts { action } => {
            let kb = KnowledgeBase::open(load_config()?).await?;
            cmd_concepts(&kb, action, cli.format, cli.quiet).await
        }
        Commands::Entities { action } => {
            let kb = KnowledgeBase::open(load_config()?).await?;
            cmd_entities(&kb, action, cli.format, cli.quiet).await
        }
        Commands::Config { action } => cmd_config(action, cli.quiet),
        Commands::Doctor => cmd_doctor(load_config()?, cli.quiet).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_serve(config: Config, quiet: bool) -> anyhow::Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    if !kb.config().reconcile.enabled {
        warn!("Reconciliation is disabled (reconcile.enabled = false)");
        return Ok(());
    }

    let mut scheduler = kb.scheduler();
    scheduler.start()?;
    if !quiet {
        println!(
            "Reconciling every {}s. Press Ctrl-C to stop.",
            scheduler.interval().as_secs()
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.stop().await?;

    if !quiet {
        println!("Stopped after {} passes.", scheduler.passes());
    }
    Ok(())
}

async fn cmd_reconcile(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let report = kb.reconcile().await?;
    print_report(&report, format)
}

fn print_report(report: &ReconcileReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            println!("Nodes created: {}", report.nodes_created);
            println!("Edges created: {}", report.edges_created);
            println!("Failures:      {}", report.failures);
            println!("Links retired: {}", report.links_retired);
            println!("Pending:       {}", report.pending);
        }
    }
    Ok(())
}

async fn cmd_concepts(
    kb: &KnowledgeBase,
    action: ConceptAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let operator = kb.config().archive.operator.clone();

    match action {
        ConceptAction::List => {
            let concepts = kb.taxonomy().all().await;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&concepts)?);
                return Ok(());
            }
            if concepts.is_empty() {
                if !quiet {
                    println!("No concepts found.");
                }
                return Ok(());
            }
            for concept in &concepts {
                let depth = depth_of(&concepts, concept);
                let partition = kb.taxonomy().partition_of(&concept.uid).await;
                println!(
                    "{}{}  [{}]  {}  table={}",
                    "  ".repeat(depth),
                    concept.name,
                    concept.kind,
                    concept.uid,
                    partition
                );
            }
        }
        ConceptAction::CreateTop { name, table, kind } => {
            let kind = ConceptType::parse(&kind)
                .ok_or_else(|| anyhow::anyhow!("Unknown concept kind: {}", kind))?;
            let concept = kb
                .taxonomy()
                .create_top_concept(Concept::new(name, kind).with_table(table), &operator)
                .await?;
            print_concept(&concept, format, quiet, "Concept created")?;
        }
        ConceptAction::CreateChild { parent, name } => {
            let parent_kind = kb.taxonomy().get_by_uid(&parent).await?.kind;
            let concept = kb
                .taxonomy()
                .create_child(&parent, Concept::new(name, parent_kind), &operator)
                .await?;
            print_concept(&concept, format, quiet, "Concept created")?;
        }
        ConceptAction::Remove { uid } => {
            let removed = kb.taxonomy().remove(&uid, &operator).await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&removed)?);
            } else if !quiet {
                println!("Removed {} concept(s).", removed.len());
            }
        }
    }
    Ok(())
}

fn depth_of(concepts: &[Concept], concept: &Concept) -> usize {
    let mut depth = 0;
    let mut parent = concept.parent.as_str();
    while !parent.is_empty() {
        depth += 1;
        parent = match concepts.iter().find(|c| c.uid == parent) {
            Some(c) => c.parent.as_str(),
            None => break,
        };
    }
    depth
}

fn print_concept(concept: &Concept, format: OutputFormat, quiet: bool, headline: &str) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(concept)?),
        OutputFormat::Text if quiet => println!("{}", concept.uid),
        OutputFormat::Text => {
            println!("{}", headline);
            println!("  UID:  {}", concept.uid);
            println!("  Name: {}", concept.name);
            println!("  Kind: {}", concept.kind);
            if !concept.table.is_empty() {
                println!("  Table: {}", concept.table);
            }
        }
    }
    Ok(())
}

async fn cmd_entities(
    kb: &KnowledgeBase,
    action: EntityAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let operator = kb.config().archive.operator.clone();

    match action {
        EntityAction::Create { name, concept } => {
            let entity = kb
                .entities()
                .create(Entity::new(name, concept), &operator)
                .await?;
            print_entity(&entity, format, quiet, "Entity created")?;
        }
        EntityAction::Get { uid } => {
            let entity = kb.entities().get(&uid).await?;
            print_entity(&entity, format, quiet, "Entity")?;
        }
        EntityAction::Publish { uid } => {
            let entity = kb.publish(&uid).await?;
            print_entity(&entity, format, quiet, "Entity published")?;
        }
    }
    Ok(())
}

fn print_entity(entity: &Entity, format: OutputFormat, quiet: bool, headline: &str) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entity)?),
        OutputFormat::Text if quiet => println!("{}", entity.uid),
        OutputFormat::Text => {
            println!("{}", headline);
            println!("  UID:     {}", entity.uid);
            println!("  ID:      {}", entity.id);
            println!("  Name:    {}", entity.display_name());
            println!("  Status:  {}", entity.status);
            if !entity.concept.is_empty() {
                println!("  Concept: {}", entity.concept);
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(config: Config, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Lorebase Health Check");
        println!("=====================");
        println!();
    }

    let mut all_ok = true;

    match config.validate() {
        Ok(()) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: {}", e);
            }
        }
    }

    let path = config.database_path()?;
    match Database::open(&path, config.storage.max_connections).await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Database: {}", path.display());
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: {}", e);
                    }
                }
            }
            match db.migration_status().await {
                Ok(status) if !status.needs_migration => {
                    if !quiet {
                        println!("[OK] Schema: version {}", status.current_version);
                    }
                }
                Ok(status) => {
                    all_ok = false;
                    if !quiet {
                        println!(
                            "[!!] Schema: version {} of {}",
                            status.current_version, status.target_version
                        );
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Schema: {}", e);
                    }
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: {}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks failed.");
        }
    }

    if all_ok {
        Ok(())
    } else {
        Err(anyhow::anyhow!("health check failed"))
    }
}
