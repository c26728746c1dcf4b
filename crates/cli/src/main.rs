//! edflow CLI - emergency department flow simulation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use edflow_agent::{Agent, AgentConfig, StopFlag};
use edflow_core::{hourly_flow, ArrivalDescriptor};
use edflow_retrieval::{QueryContext, RetrievalConfig, RetrievalEngine};
use edflow_rules::{RuleCategory, RuleStore};
use edflow_scenario::ScenarioGenerator;
use edflow_storage::{EventStore, JsonLinesEventStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edflow")]
#[command(about = "Emergency department patient-flow simulation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated scenario
    Run {
        /// Rule file or directory of rule files
        #[arg(long)]
        rules: PathBuf,
        /// Facility description (rooms, staff, units)
        #[arg(long)]
        facility: PathBuf,
        /// Number of ticks to run
        #[arg(long, default_value = "32")]
        ticks: usize,
        /// Arrival pattern
        #[arg(long, value_enum, default_value = "steady")]
        scenario: Scenario,
        /// Patients to generate (ignored by saturation)
        #[arg(long, default_value = "20")]
        patients: usize,
        /// Random seed
        #[arg(long, default_value = "1")]
        seed: u64,
        /// Use keyword retrieval even if credentials are set
        #[arg(long)]
        demo: bool,
        /// Append committed events to this JSON-lines file
        #[arg(long)]
        events_out: Option<PathBuf>,
    },
    /// Load rules and print them with load diagnostics
    Rules {
        /// Rule file or directory of rule files
        #[arg(long)]
        rules: PathBuf,
    },
    /// Rank rules for a free-text query
    Query {
        /// Query text
        text: String,
        /// Rule file or directory of rule files
        #[arg(long)]
        rules: PathBuf,
        /// Number of hits
        #[arg(short, default_value = "5")]
        k: usize,
        /// Restrict to one category
        #[arg(long, value_enum)]
        category: Option<Category>,
        /// Use keyword retrieval even if credentials are set
        #[arg(long)]
        demo: bool,
    },
    /// Hourly flow table from an event file
    Report {
        /// JSON-lines event file
        #[arg(long)]
        events: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    Steady,
    Surge,
    LongWait,
    Saturation,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Category {
    Triage,
    Admission,
    Transfer,
}

impl From<Category> for RuleCategory {
    fn from(category: Category) -> Self {
        match category {
            Category::Triage => RuleCategory::Triage,
            Category::Admission => RuleCategory::Admission,
            Category::Transfer => RuleCategory::Transfer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            rules,
            facility,
            ticks,
            scenario,
            patients,
            seed,
            demo,
            events_out,
        } => {
            let store = load_rules(&rules).await?;
            let config = AgentConfig::load(&facility)
                .await
                .with_context(|| format!("loading facility {}", facility.display()))?;
            let engine = RetrievalEngine::new(store, &retrieval_config(demo));

            let stop = StopFlag::new();
            let mut agent = Agent::new(config, engine)?.with_hook(stop.clone());
            if let Some(path) = events_out {
                let sink = JsonLinesEventStore::new(&path)
                    .await
                    .with_context(|| format!("opening event file {}", path.display()))?;
                agent = agent.with_event_store(sink);
            }

            let arrivals = generate(&agent, scenario, patients, seed);
            agent.ingest(arrivals)?;

            let ctrl_c = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing current tick");
                    ctrl_c.request_stop();
                }
            });

            let reports = agent.run(ticks, &stop).await?;
            for r in &reports {
                println!(
                    "tick {:>3} {} | +{} in | {} placed | {} overflow | {} out | {} fallback | {} understaffed",
                    r.tick,
                    r.clock.format("%H:%M"),
                    r.arrivals,
                    r.allocations,
                    r.overflows,
                    r.transfers + r.discharges,
                    r.fallbacks,
                    r.understaffed,
                );
            }

            let snapshot = agent.snapshot();
            let m = &snapshot.metrics;
            println!();
            println!("After {} ticks ({} retrieval)", snapshot.tick, agent.retrieval_mode());
            println!("  Saturation: {:.0}%", m.saturation_rate);
            println!("  Waiting: {} ({} overflowed)", m.waiting, m.overflowed);
            println!("  In rooms: {} allocated, {} in treatment", m.allocated, m.in_treatment);
            println!("  Left: {} discharged, {} transferred", m.discharged, m.transferred);
            println!("  Wait: mean {:.0} min, max {} min", m.mean_wait_minutes, m.max_wait_minutes);
            println!("  Events: {}", agent.log().len());
        }
        Commands::Rules { rules } => {
            let store = load_rules(&rules).await?;

            println!("Rules ({})", store.len());
            for rule in store.all() {
                println!("  {} | {} | {}", rule.id, rule.category, rule.rationale);
            }
            if !store.diagnostics().is_empty() {
                println!("Skipped ({})", store.diagnostics().len());
                for d in store.diagnostics() {
                    println!("  {}", d);
                }
            }
        }
        Commands::Query {
            text,
            rules,
            k,
            category,
            demo,
        } => {
            let store = load_rules(&rules).await?;
            let engine = RetrievalEngine::new(store, &retrieval_config(demo));

            let mut query = QueryContext::new(text);
            if let Some(category) = category {
                query = query.with_category(category.into());
            }
            let outcome = engine.retrieve(&query, k).await;

            println!("Served by {} retrieval", outcome.served_by);
            if let Some(reason) = &outcome.degraded {
                println!("  (fallback: {})", reason);
            }
            for hit in &outcome.hits {
                println!("  {:.3} | {} | {}", hit.relevance, hit.rule.id, hit.rule.rationale);
            }
        }
        Commands::Report { events } => {
            let store = JsonLinesEventStore::new(&events).await?;
            let log = store
                .read_all()
                .await
                .with_context(|| format!("reading {}", events.display()))?;

            println!(
                "{:<17} {:>8} {:>8} {:>8} {:>8} {:>10} {:>9}",
                "hour", "arrived", "placed", "left", "overflow", "saturation", "mean wait"
            );
            for row in hourly_flow(&log) {
                let hour = row
                    .hour
                    .map(|h| h.format("%Y-%m-%d %H:00").to_string())
                    .unwrap_or_default();
                let (saturation, wait) = if row.samples > 0 {
                    (
                        format!("{:.0}%", row.mean_saturation),
                        format!("{:.0} min", row.mean_wait_minutes),
                    )
                } else {
                    ("-".to_string(), "-".to_string())
                };
                println!(
                    "{:<17} {:>8} {:>8} {:>8} {:>8} {:>10} {:>9}",
                    hour, row.arrivals, row.allocations, row.exits, row.overflows, saturation, wait
                );
            }
        }
    }

    Ok(())
}

async fn load_rules(path: &Path) -> Result<Arc<RuleStore>> {
    let store = RuleStore::load(path)
        .await
        .with_context(|| format!("loading rules from {}", path.display()))?;
    for d in store.diagnostics() {
        warn!("Skipped rule {}", d);
    }
    info!("Loaded {} rules", store.len());
    Ok(Arc::new(store))
}

fn retrieval_config(demo: bool) -> RetrievalConfig {
    let config = RetrievalConfig::from_env();
    if demo {
        config.without_credentials()
    } else {
        config
    }
}

fn generate(agent: &Agent, scenario: Scenario, patients: usize, seed: u64) -> Vec<ArrivalDescriptor> {
    let mut generator = ScenarioGenerator::new(seed, agent.config().start_time);
    match scenario {
        Scenario::Steady => generator.steady(patients, Duration::minutes(10)),
        Scenario::Surge => generator.surge(patients),
        Scenario::LongWait => {
            let mut arrivals = generator.long_wait(patients / 2);
            arrivals.extend(generator.steady(patients - patients / 2, Duration::minutes(10)));
            arrivals
        }
        Scenario::Saturation => {
            let beds = agent.config().rooms.iter().map(|r| r.max_capacity).sum();
            generator.saturation(beds)
        }
    }
}
