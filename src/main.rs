use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use treeflow_core::config::{dirs_home, AppConfig};
use treeflow_core::{AgentState, CompletionVerdict, TreeFlowId};
use treeflow_graph::{
    validate, ExpressionEvaluator, RouteOutcome, Router, Severity, Step, TerminalReason, TreeFlow,
};
use treeflow_store::SqliteStore;

#[derive(Parser)]
#[command(name = "treeflow", version, about = "Author, check and dry-run TreeFlow graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "treeflow.toml", env = "TREEFLOW_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a flow document and report structural issues
    Validate {
        /// Flow document (JSON)
        flow: PathBuf,
    },
    /// Print a flow's steps and wiring
    Show {
        /// Flow document (JSON)
        flow: PathBuf,
        /// Print the agent guidance for this step (slug)
        #[arg(long)]
        step: Option<String>,
    },
    /// Resolve where the agent goes after finishing a step
    Route {
        /// Flow document (JSON)
        flow: PathBuf,
        /// Step slug (defaults to the entry step)
        #[arg(long)]
        step: Option<String>,
        /// How the step ended: fully_completed, failed or partial
        #[arg(long, default_value = "fully_completed")]
        verdict: CompletionVerdict,
        /// Agent state entries as key=value (value parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        assignments: Vec<String>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Store a flow document in the database
    Import {
        /// Flow document (JSON)
        flow: PathBuf,
        /// Mark the flow active after storing it
        #[arg(long)]
        activate: bool,
    },
    /// Write a stored flow as JSON
    Export {
        /// Flow id
        id: String,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored flows
    List,
    /// Delete a stored flow and everything it owns
    Delete {
        /// Flow id
        id: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "treeflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { flow } => {
            let flow = read_flow(&flow)?;
            let report = validate(&flow);
            if report.is_clean() {
                println!("{} v{}: ok", flow.name, flow.version());
                return Ok(());
            }
            for issue in &report.issues {
                let label = match issue.severity() {
                    Severity::Error => "error",
                    Severity::Warning => "warning",
                };
                println!("{}: {}", label, issue);
            }
            let errors = report.errors().count();
            if errors > 0 {
                bail!("{} failed validation with {} error(s)", flow.name, errors);
            }
        }
        Commands::Show { flow, step } => {
            let flow = read_flow(&flow)?;
            match step {
                Some(slug) => println!("{}", find_step(&flow, &slug)?.render_guidance()),
                None => print_flow(&flow),
            }
        }
        Commands::Route {
            flow,
            step,
            verdict,
            assignments,
            json,
        } => {
            let flow = read_flow(&flow)?;
            let current = match step {
                Some(slug) => find_step(&flow, &slug)?,
                None => flow.entry_step()?,
            };

            let mut state = AgentState::new();
            for assignment in &assignments {
                if state.set_assignment(assignment).is_none() {
                    bail!("Invalid --set '{}', expected KEY=VALUE", assignment);
                }
            }

            let evaluator = ExpressionEvaluator::new();
            let router =
                Router::new(&flow, &evaluator).with_policy(config.routing.on_guard_rejected);
            let outcome = router.route(current.id(), verdict, &state)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&flow, current, &outcome);
            }
        }
        Commands::Import { flow, activate } => {
            let mut flow = read_flow(&flow)?;
            let store = open_store(&config)?;
            let report = store.check_flow(&flow)?;
            if report.has_errors() {
                for issue in report.errors() {
                    println!("error: {}", issue);
                }
                bail!(
                    "{} failed validation with {} error(s)",
                    flow.name,
                    report.errors().count()
                );
            }
            if activate {
                flow.activate()?;
            }
            store.save_flow(&flow)?;
            println!("{}", flow.id());
        }
        Commands::Export { id, output } => {
            let store = open_store(&config)?;
            let flow = store.load_flow(&TreeFlowId::from_str(&id))?;
            let json = flow.to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), "TreeFlow exported");
                }
                None => println!("{}", json),
            }
        }
        Commands::List => {
            let store = open_store(&config)?;
            let flows = store.list_flows()?;
            if flows.is_empty() {
                println!("No flows stored.");
            }
            for f in flows {
                println!(
                    "{}  {:<24} v{:<8} {:>3} steps{}",
                    f.id,
                    f.name,
                    f.version,
                    f.step_count,
                    if f.active { "  [active]" } else { "" }
                );
            }
        }
        Commands::Delete { id } => {
            let store = open_store(&config)?;
            store.delete_flow(&TreeFlowId::from_str(&id))?;
            println!("Deleted {}", id);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Load the config file, falling back to `~/.treeflow/config.toml` and then
/// to defaults.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home_config) = dirs_home().map(|h| h.join(".treeflow").join("config.toml")) {
        if home_config.exists() {
            return Ok(AppConfig::load(&home_config)?);
        }
    }
    Ok(AppConfig::default())
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    let path = config.store_path();
    debug!(path = %path.display(), "Opening store");
    Ok(SqliteStore::open(&path)?)
}

fn read_flow(path: &Path) -> anyhow::Result<TreeFlow> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    TreeFlow::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}

fn find_step<'a>(flow: &'a TreeFlow, slug: &str) -> anyhow::Result<&'a Step> {
    flow.step_by_slug(slug)
        .with_context(|| format!("No step with slug '{}' in {}", slug, flow.name))
}

fn step_label(flow: &TreeFlow, id: Option<&treeflow_core::StepId>) -> String {
    id.and_then(|id| flow.step(id))
        .map(|s| s.slug.clone())
        .unwrap_or_else(|| "-".to_string())
}

fn print_flow(flow: &TreeFlow) {
    println!("{} v{}{}", flow.name, flow.version(), if flow.is_active() { " [active]" } else { "" });
    if let Some(org) = &flow.organization {
        println!("Organization: {}", org);
    }
    for step in flow.steps() {
        let marker = if step.is_first() { "*" } else { " " };
        println!("{} {} ({})", marker, step.name, step.slug);
        for output in step.outputs() {
            let target = flow
                .connection_for_output(&output.id)
                .and_then(|c| flow.input_owner(&c.target_input))
                .map(|s| s.slug.clone())
                .unwrap_or_else(|| "(unwired)".to_string());
            println!(
                "    out {:>2}. {:<20} if {:<30} -> {}",
                output.order,
                output.name,
                output.condition().unwrap_or("always"),
                target
            );
        }
        for input in step.inputs() {
            println!(
                "    in      {:<20} guard {:<15} from {}",
                input.name,
                input.input_type,
                step_label(flow, input.source_step.as_ref())
            );
        }
    }
}

fn print_outcome(flow: &TreeFlow, from: &Step, outcome: &RouteOutcome) {
    match outcome {
        RouteOutcome::Advance(t) => {
            let output = flow.find_output(&t.output).map(|o| o.name.as_str()).unwrap_or("?");
            println!(
                "{} --[{}]--> {}",
                from.slug,
                output,
                step_label(flow, Some(&t.to_step))
            );
        }
        RouteOutcome::Terminal(reason) => {
            let why = match reason {
                TerminalReason::NoOutputs => "step has no outputs".to_string(),
                TerminalReason::NoMatch => "no output condition matched".to_string(),
                TerminalReason::Unwired { output } => format!(
                    "output '{}' matched but is not connected",
                    flow.find_output(output).map(|o| o.name.as_str()).unwrap_or("?")
                ),
                TerminalReason::GuardRejected { guard, verdict, .. } => {
                    format!("input guard {} rejected verdict {}", guard, verdict)
                }
                TerminalReason::MissingTarget { connection } => {
                    format!("connection {} targets a missing input", connection)
                }
            };
            println!("{}: end of path ({})", from.slug, why);
        }
    }
}
