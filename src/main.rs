//! # hntr: record store and automation runner
//!
//! Keeps recon data (hostnames, urls, ...) as tagged records in boxes and
//! runs operator-defined commands over them, feeding the output back in.
//!
//! Usage:
//!   hntr box create Recon --containers hostnames,urls
//!   hntr records add <box> hostnames --tags scope < hosts.txt
//!   hntr automation add <box> --name httpx --command 'httpx -u {data}' \
//!        --source hostnames --source-tags scope --destination urls
//!   hntr start <automation>           # fan out onto the queue
//!   hntr work                         # run the worker pool until Ctrl-C
//!   hntr agent dequeue <box>          # pull-model: claim jobs as JSON

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hntr_core::validate::split_tags;
use hntr_core::{EventStatus, ExecutionBackend, HntrConfig, NewAutomation, OnConflict, RecordFilter};
use hntr_db::Database;
use hntr_scheduler::{JobQueue, RemoteAgent, ResultReport, Scheduler, start_automation};

#[derive(Parser)]
#[command(name = "hntr", version, about = "🎯 hntr: record store and automation runner")]
struct Cli {
    /// Config file (default: ~/.hntr/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage boxes
    #[command(subcommand, name = "box")]
    Boxes(BoxCmd),
    /// Add, list, tag and delete records
    #[command(subcommand)]
    Records(RecordsCmd),
    /// Manage automations
    #[command(subcommand)]
    Automation(AutomationCmd),
    /// Schedule an automation over every matching source record
    Start { automation_id: String },
    /// Recent events of an automation
    Events {
        automation_id: String,
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Event counts per automation and status in a box
    Counts {
        box_id: String,
        /// Remove finished, timed out and failed events afterwards
        #[arg(long)]
        clear: bool,
    },
    /// Run the local worker pool until Ctrl-C
    Work {
        /// Override the configured number of workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Pull-model backend for external agents
    #[command(subcommand)]
    Agent(AgentCmd),
}

#[derive(Subcommand)]
enum BoxCmd {
    /// Create a box (default: "Unnamed Box" with hostnames, urls, events)
    Create {
        name: Option<String>,
        #[arg(long, value_delimiter = ',')]
        containers: Vec<String>,
    },
    List,
    Show { box_id: String },
    /// Rename a box and replace its containers
    Update {
        box_id: String,
        #[arg(long)]
        name: String,
        #[arg(long, value_delimiter = ',', required = true)]
        containers: Vec<String>,
    },
    /// Delete a box with all its records, automations and events
    Remove { box_id: String },
}

#[derive(Subcommand)]
enum RecordsCmd {
    /// Add one record per line of a file (or stdin)
    Add {
        box_id: String,
        #[arg(value_parser = container_arg)]
        container: String,
        #[arg(long, default_value = "")]
        tags: String,
        /// Replace the tags of records that already exist
        #[arg(long)]
        update: bool,
        file: Option<PathBuf>,
    },
    /// List records; the search term accepts `tag:<name>` words
    List {
        box_id: String,
        #[arg(value_parser = container_arg)]
        container: String,
        #[arg(short, long, default_value = "")]
        search: String,
        #[arg(short, long, default_value = "100")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Print only the number of matches
        #[arg(long)]
        count: bool,
    },
    /// Replace the tags of the given records
    Tag {
        box_id: String,
        #[arg(value_parser = container_arg)]
        container: String,
        #[arg(long, default_value = "")]
        tags: String,
        #[arg(required = true)]
        data: Vec<String>,
    },
    Delete {
        box_id: String,
        #[arg(value_parser = container_arg)]
        container: String,
        #[arg(required = true)]
        data: Vec<String>,
    },
}

#[derive(Args)]
struct AutomationDef {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Command template; `{data}` is replaced by the quoted record
    #[arg(long)]
    command: String,
    #[arg(long)]
    source: String,
    #[arg(long, default_value = "")]
    source_tags: String,
    #[arg(long)]
    destination: String,
    #[arg(long, default_value = "")]
    destination_tags: String,
    /// Share in the automation library
    #[arg(long)]
    public: bool,
}

impl AutomationDef {
    fn into_new(self) -> NewAutomation {
        NewAutomation {
            name: self.name,
            description: self.description,
            command: self.command,
            source_container: self.source,
            source_tags: split_tags(&self.source_tags),
            destination_container: self.destination,
            destination_tags: split_tags(&self.destination_tags),
            is_public: self.public,
        }
    }
}

#[derive(Subcommand)]
enum AutomationCmd {
    Add {
        box_id: String,
        #[command(flatten)]
        def: AutomationDef,
    },
    Update {
        automation_id: String,
        #[command(flatten)]
        def: AutomationDef,
    },
    /// Automations of a box with their current input size
    List { box_id: String },
    /// Public automations from every box
    Library,
    Remove { automation_id: String },
}

#[derive(Subcommand)]
enum AgentCmd {
    /// Claim jobs of a box and print them as JSON
    Dequeue {
        box_id: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Report the result of an event; output is read from a file or stdin
    Submit {
        box_id: String,
        event_id: String,
        #[arg(long)]
        status: EventStatus,
        file: Option<PathBuf>,
    },
}

/// Container names are stored lower-cased.
fn container_arg(raw: &str) -> Result<String, String> {
    Ok(raw.to_lowercase())
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "hntr=debug,hntr_db=debug,hntr_scheduler=debug"
    } else {
        "hntr=info,hntr_db=info,hntr_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => HntrConfig::load_from(path)?,
        None => HntrConfig::load()?,
    };
    if let Some(p) = &cli.db_path {
        config.database_path = p.clone();
    }
    let db = Database::open(&config.database_path())?;

    match cli.command {
        Commands::Boxes(cmd) => match cmd {
            BoxCmd::Create { name, containers } => {
                let b = match name {
                    None if containers.is_empty() => db.create_default_box()?,
                    name => {
                        let containers = if containers.is_empty() {
                            hntr_db::DEFAULT_CONTAINERS.iter().map(|c| c.to_string()).collect()
                        } else {
                            containers
                        };
                        db.create_box(name.as_deref().unwrap_or("Unnamed Box"), &containers)?
                    }
                };
                print_json(&b)?;
            }
            BoxCmd::List => {
                for b in db.list_boxes()? {
                    println!("{}  {:<25} {}", b.id, b.name, b.containers.join(","));
                }
            }
            BoxCmd::Show { box_id } => {
                let b = db.get_box(&box_id)?;
                println!("📦 {} ({})", b.name, b.id);
                for c in &b.containers {
                    let n = db.count_records(&b.id, c, &RecordFilter::default())?;
                    println!("   {c:<25} {n} records");
                }
                println!(
                    "   quota left: {}",
                    db.remaining_quota(&b.id, config.records_limit)?
                );
            }
            BoxCmd::Update {
                box_id,
                name,
                containers,
            } => print_json(&db.update_box(&box_id, &name, &containers)?)?,
            BoxCmd::Remove { box_id } => {
                db.delete_box(&box_id)?;
                println!("🗑️ Box {box_id} removed");
            }
        },

        Commands::Records(cmd) => match cmd {
            RecordsCmd::Add {
                box_id,
                container,
                tags,
                update,
                file,
            } => {
                let input = read_input(file.as_ref())?;
                let on_conflict = if update {
                    OnConflict::UpdateTags
                } else {
                    OnConflict::Skip
                };
                let summary = db.add_records(
                    &box_id,
                    &container,
                    input.lines(),
                    &split_tags(&tags),
                    config.records_limit,
                    on_conflict,
                )?;
                println!(
                    "✅ {} created, {} updated, {} skipped{}",
                    summary.created,
                    summary.updated,
                    summary.skipped,
                    if summary.stopped_by_quota {
                        " (quota reached)"
                    } else {
                        ""
                    }
                );
            }
            RecordsCmd::List {
                box_id,
                container,
                search,
                limit,
                offset,
                count,
            } => {
                let filter = RecordFilter::parse_term(&search).page(limit, offset);
                if count {
                    println!("{}", db.count_records(&box_id, &container, &filter)?);
                } else {
                    for r in db.list_records(&box_id, &container, &filter)? {
                        if r.tags.is_empty() {
                            println!("{}", r.data);
                        } else {
                            println!("{}\t[{}]", r.data, r.tags.join(","));
                        }
                    }
                }
            }
            RecordsCmd::Tag {
                box_id,
                container,
                tags,
                data,
            } => {
                let tags = split_tags(&tags);
                hntr_core::validate::validate_tags(&tags)?;
                let n = db.update_record_tags(&box_id, &container, &data, &tags)?;
                println!("🏷️ {n} records retagged");
            }
            RecordsCmd::Delete {
                box_id,
                container,
                data,
            } => {
                let n = db.delete_records(&box_id, &container, &data)?;
                println!("🗑️ {n} records deleted");
            }
        },

        Commands::Automation(cmd) => match cmd {
            AutomationCmd::Add { box_id, def } => {
                print_json(&db.create_automation(&box_id, def.into_new())?)?
            }
            AutomationCmd::Update { automation_id, def } => {
                print_json(&db.update_automation(&automation_id, def.into_new())?)?
            }
            AutomationCmd::List { box_id } => {
                for a in db.list_automations_with_source_count(&box_id)? {
                    println!(
                        "{}  {:<20} {} → {}  ({} inputs)",
                        a.automation.id,
                        a.automation.name,
                        a.automation.source_container,
                        a.automation.destination_container,
                        a.source_count
                    );
                }
            }
            AutomationCmd::Library => print_json(&db.list_automation_library()?)?,
            AutomationCmd::Remove { automation_id } => {
                db.delete_automation(&automation_id)?;
                println!("🗑️ Automation {automation_id} removed");
            }
        },

        Commands::Start { automation_id } => {
            let queue = JobQueue::new(db.clone())?;
            let summary = start_automation(&db, &queue, &automation_id)?;
            println!(
                "🚀 {} matched, {} scheduled, {} failed",
                summary.matched, summary.scheduled, summary.failed
            );
            if config.scheduler.backend == ExecutionBackend::Local {
                println!("   {} jobs queued; run `hntr work` to process them", queue.pending_count()?);
            }
        }

        Commands::Events {
            automation_id,
            limit,
        } => {
            for e in db.list_events(&automation_id, limit)? {
                println!(
                    "{}  {:<9} {:>6} rows  {}  {}",
                    e.id,
                    e.status,
                    e.affected_rows,
                    e.created_at.format("%Y-%m-%d %H:%M:%S"),
                    e.data
                );
            }
        }

        Commands::Counts { box_id, clear } => {
            print_json(&db.event_counts(&box_id)?)?;
            if clear {
                let n = db.clear_events(&box_id)?;
                println!("🧹 {n} events cleared");
            }
        }

        Commands::Work { workers } => {
            if config.scheduler.backend != ExecutionBackend::Local {
                bail!("scheduler.backend is 'remote'; jobs are served through `hntr agent`");
            }
            let mut sched_config = config.scheduler.clone();
            if let Some(n) = workers {
                sched_config.workers = n;
            }
            let mut scheduler =
                Scheduler::new(db.clone(), sched_config)?.with_records_limit(config.records_limit);
            scheduler.start();
            tracing::info!(
                "📥 {} jobs waiting; press Ctrl-C to stop",
                scheduler.queue().pending_count()?
            );
            tokio::signal::ctrl_c().await?;
            tracing::info!("🛑 Shutting down, waiting for running jobs...");
            scheduler.shutdown().await;
        }

        Commands::Agent(cmd) => {
            if config.scheduler.backend != ExecutionBackend::Remote {
                bail!("scheduler.backend is 'local'; set it to 'remote' to serve agents");
            }
            let queue = JobQueue::new(db.clone())?;
            let agent = RemoteAgent::new(
                db.clone(),
                queue,
                config.scheduler.clone(),
                config.records_limit,
            );
            match cmd {
                AgentCmd::Dequeue { box_id, limit } => print_json(&agent.dequeue(&box_id, limit)?)?,
                AgentCmd::Submit {
                    box_id,
                    event_id,
                    status,
                    file,
                } => {
                    let output = read_input(file.as_ref())?;
                    let affected =
                        agent.submit_result(&box_id, &event_id, ResultReport { status, output })?;
                    println!("✅ {event_id}: {status} ({affected} rows)");
                }
            }
        }
    }

    Ok(())
}
