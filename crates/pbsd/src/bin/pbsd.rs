use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use attrdb::store::{JournalStore, MemoryStore};
use attrdb::{AttrStore, ObjectKind};
use clap::{Parser, ValueEnum};

use pbsd::ConnectionId;
use pbsd::common::config::ServerConfig;
use pbsd::common::setup::setup_logging;
use pbsd::server::core::{Core, CoreRef, SchedulerInfo};
use pbsd::server::load::{dump_state, recover_server_state};
use pbsd::server::preempt::PreemptJobsRequest;
use pbsd::server::request::Permissions;
use pbsd::server::start::run_preempt_batch;

#[derive(Parser)]
#[command(author, version, about = "Batch server preemption and attribute store tool")]
struct RootOptions {
    /// Turn on a more verbose output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(clap::Subcommand)]
enum SubCommand {
    /// Print the objects recovered from a journal as JSON
    Dump(DumpOpts),
    /// Preempt running jobs as a scheduler would
    Preempt(PreemptOpts),
    /// Rewrite a journal so that it only contains live records
    Compact(CompactOpts),
}

#[derive(Copy, Clone, ValueEnum)]
enum KindArg {
    Server,
    Queue,
    Job,
    Node,
}

impl From<KindArg> for ObjectKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Server => ObjectKind::Server,
            KindArg::Queue => ObjectKind::Queue,
            KindArg::Job => ObjectKind::Job,
            KindArg::Node => ObjectKind::Node,
        }
    }
}

#[derive(Parser)]
struct DumpOpts {
    #[arg(long)]
    journal: PathBuf,

    /// Only dump objects of this kind
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
}

#[derive(Parser)]
struct PreemptOpts {
    /// Server configuration file
    #[arg(long, env = "PBSD_CONFIG")]
    config: Option<PathBuf>,

    /// Scheduler that sends the request, the first configured one by default
    #[arg(long)]
    scheduler: Option<String>,

    /// Jobs to preempt
    #[arg(required = true)]
    job_ids: Vec<String>,
}

#[derive(Parser)]
struct CompactOpts {
    #[arg(long)]
    journal: PathBuf,
}

fn open_journal(path: &Path) -> anyhow::Result<JournalStore> {
    JournalStore::open(path).with_context(|| format!("cannot open journal {}", path.display()))
}

fn command_dump(opts: DumpOpts) -> anyhow::Result<()> {
    let store = open_journal(&opts.journal)?;
    let mut core = Core::new(Box::new(store), Default::default());
    recover_server_state(&mut core)?;
    let output = dump_state(&core, opts.kind.map(ObjectKind::from));
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn command_compact(opts: CompactOpts) -> anyhow::Result<()> {
    let mut store = open_journal(&opts.journal)?;
    store.compact()?;
    log::info!("Journal {} compacted", opts.journal.display());
    Ok(())
}

async fn command_preempt(opts: PreemptOpts) -> anyhow::Result<()> {
    let config = match &opts.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    let scheduler = match &opts.scheduler {
        Some(name) => config.schedulers.iter().find(|s| &s.name == name),
        None => config.schedulers.first(),
    }
    .ok_or_else(|| anyhow!("scheduler is not configured"))?;
    let connection = ConnectionId::new(scheduler.connection);

    let store: Box<dyn AttrStore> = match &config.journal {
        Some(path) => Box::new(open_journal(path)?),
        None => Box::new(MemoryStore::default()),
    };
    let mut core = Core::new(store, config.preempt_timeout);
    for scheduler in &config.schedulers {
        core.register_scheduler(
            ConnectionId::new(scheduler.connection),
            SchedulerInfo {
                name: scheduler.name.clone(),
                orderings: scheduler.orderings()?,
            },
        );
    }
    recover_server_state(&mut core)?;

    let request = PreemptJobsRequest {
        connection,
        user: std::env::var("USER").unwrap_or_else(|_| "root".to_string()),
        host: gethostname::gethostname().to_string_lossy().into_owned(),
        permissions: Permissions::MANAGER,
        job_ids: opts.job_ids,
    };
    let core_ref = CoreRef::wrap(core);
    let reply = run_preempt_batch(&core_ref, request)
        .await
        .map_err(|error| anyhow!("preempt request failed: {error} ({})", error.code()))?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> pbsd::Result<()> {
    let opts = RootOptions::parse();
    setup_logging(opts.verbose);

    let result = match opts.subcmd {
        SubCommand::Dump(opts) => command_dump(opts),
        SubCommand::Preempt(opts) => command_preempt(opts).await,
        SubCommand::Compact(opts) => command_compact(opts),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }

    Ok(())
}
