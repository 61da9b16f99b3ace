//! sqliteworks CLI: operator interface to queues and stores in a database file.
//!
//! Every command prints JSON on stdout; logs and errors go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use sqliteworks::config::Config;
use sqliteworks::telemetry::{TelemetryConfig, init_telemetry};
use sqliteworks::{KvStore, MarkOutcome, Session, State, WorkItemId, WorkQueue};

#[derive(Parser)]
#[command(name = "sqliteworks", about = "Durable work queues and key-value stores on SQLite")]
struct Cli {
    /// Database file (overrides SQLITEWORKS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Work queue operations
    Queue {
        /// Queue (table) name
        queue: String,
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Key-value store operations
    Kv {
        /// Store (table) name
        store: String,
        #[command(subcommand)]
        action: KvAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Push a new item (JSON payload)
    Push { data: String },
    /// Claim the oldest queued item
    Pop,
    /// Show an item
    Show { id: i64 },
    /// Move an item to a new state (QUEUED, IN_PROGRESS, COMPLETED, FAILED)
    Mark { id: i64, state: String },
    /// Delete terminal items older than the given age
    Purge {
        #[arg(long, default_value_t = 86_400, allow_negative_numbers = true)]
        seconds_old: i64,
    },
    /// List items in a state, oldest first
    List {
        #[arg(long, default_value = "QUEUED")]
        state: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Count items per state
    Stats,
}

#[derive(Subcommand)]
enum KvAction {
    /// Print the value stored under a key
    Get { key: String },
    /// Store a JSON value under a key
    Set { key: String, value: String },
    /// Remove a key
    Delete { key: String },
    /// List all keys
    Keys,
    /// Count entries
    Count,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(cli.db)?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "sqliteworks".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let session = Session::open_with(&config.db_path, &config.session_config())?;

    match cli.command {
        Command::Queue { queue, action } => {
            let queue: WorkQueue = WorkQueue::new(queue, &session)?;
            queue.init()?;
            cmd_queue(&queue, action)
        }
        Command::Kv { store, action } => {
            let store: KvStore = KvStore::new(store, &session)?;
            store.init()?;
            cmd_kv(&store, action)
        }
    }
}

fn cmd_queue(queue: &WorkQueue, action: QueueAction) -> anyhow::Result<()> {
    match action {
        QueueAction::Push { data } => {
            let data: serde_json::Value = serde_json::from_str(&data)?;
            print_json(&queue.push(data)?)
        }
        // An empty queue prints `null`.
        QueueAction::Pop => print_json(&queue.pop_queued()?),
        QueueAction::Show { id } => match queue.get_item_by_id(WorkItemId(id))? {
            Some(item) => print_json(&item),
            None => anyhow::bail!("no work item {id} in queue {}", queue.name()),
        },
        QueueAction::Mark { id, state } => {
            let state = parse_state(&state)?;
            let Some(item) = queue.get_item_by_id(WorkItemId(id))? else {
                anyhow::bail!("no work item {id} in queue {}", queue.name());
            };
            match queue.mark_item(&item, state)? {
                MarkOutcome::Marked(item) => print_json(&item),
                MarkOutcome::NotFound => {
                    anyhow::bail!("work item {id} was purged before it could be marked")
                }
                MarkOutcome::Stale { current } => {
                    anyhow::bail!("work item {id} moved to {current} concurrently; not marked")
                }
            }
        }
        QueueAction::Purge { seconds_old } => {
            let deleted = queue.purge_old_items(seconds_old)?;
            print_json(&json!({ "deleted": deleted }))
        }
        QueueAction::List { state, limit } => {
            let items = queue.list_by_state(parse_state(&state)?, limit)?;
            print_json(&items)
        }
        QueueAction::Stats => {
            let mut counts = serde_json::Map::new();
            for state in State::ALL {
                counts.insert(state.to_string(), json!(queue.count_by_state(state)?));
            }
            print_json(&counts)
        }
    }
}

fn cmd_kv(store: &KvStore, action: KvAction) -> anyhow::Result<()> {
    match action {
        KvAction::Get { key } => match store.get(&key)? {
            Some(value) => print_json(&value),
            None => anyhow::bail!("no key {key:?} in store {}", store.name()),
        },
        KvAction::Set { key, value } => {
            let value: serde_json::Value = serde_json::from_str(&value)?;
            store.set(&key, &value)?;
            print_json(&json!({ "key": key, "value": value }))
        }
        KvAction::Delete { key } => {
            let removed = store.delete(&key)?;
            print_json(&json!({ "key": key, "removed": removed }))
        }
        KvAction::Keys => {
            let mut keys: Vec<_> = store.keys()?.into_iter().collect();
            keys.sort();
            print_json(&keys)
        }
        KvAction::Count => print_json(&store.count()?),
    }
}

fn parse_state(raw: &str) -> anyhow::Result<State> {
    raw.to_uppercase()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid state: {raw}"))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
