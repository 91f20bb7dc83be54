//! Command handlers: load the engine, run one operation, persist state.

use std::fs;
use std::path::Path;

use clap::Args;
use serde::Serialize;

use super::{Cli, Command, CommandError, CommandResult, PoolCommand};
use crate::api;
use crate::config::Config;
use crate::core::{CategoryId, UserId, system_clock};
use crate::engine::Engine;
use crate::error::Error;

#[derive(Args, Debug)]
pub struct GenerateSetsArgs {
    /// Sets to build per category.
    #[arg(long)]
    pub num_sets: u64,

    /// Items bundled into each set.
    #[arg(long)]
    pub items_per_set: u64,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON file: either `{"items": [...]}` or a bare item array.
    #[arg(long)]
    pub file: std::path::PathBuf,
}

#[derive(Args, Debug)]
pub struct AllocateArgs {
    #[arg(long)]
    pub user: String,

    /// Category ids (repeatable or comma-separated).
    #[arg(long = "category", value_delimiter = ',', required = true)]
    pub categories: Vec<String>,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    #[arg(long)]
    pub user: String,

    #[arg(long = "category", value_delimiter = ',', required = true)]
    pub categories: Vec<String>,
}

#[derive(Args, Debug)]
pub struct EvictArgs {
    #[arg(long)]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct ResetUserArgs {
    #[arg(long)]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct PoolStatusArgs {
    /// Limit to one category.
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Args, Debug)]
pub struct PoolDrainArgs {
    #[arg(long)]
    pub category: String,

    /// Sets to pop from the head (ignored with --all).
    #[arg(long, default_value_t = 1)]
    pub count: u64,

    /// Drop the category's entire pool.
    #[arg(long)]
    pub all: bool,
}

pub fn dispatch(cli: &Cli, config: &Config, snapshot: &Path) -> CommandResult<()> {
    let engine = Engine::open(config, system_clock(), snapshot)?;
    match &cli.command {
        Command::GenerateSets(args) => generate_sets(cli, &engine, snapshot, args),
        Command::Ingest(args) => ingest(cli, &engine, snapshot, args),
        Command::Allocate(args) => allocate(cli, &engine, snapshot, args),
        Command::Merge(args) => merge(cli, &engine, snapshot, args),
        Command::Evict(args) => evict(cli, &engine, snapshot, args),
        Command::ResetUser(args) => reset_user(cli, &engine, snapshot, args),
        Command::Pool(PoolCommand::Status(args)) => pool_status(cli, &engine, args),
        Command::Pool(PoolCommand::Drain(args)) => pool_drain(cli, &engine, snapshot, args),
        Command::Categories => categories(cli, &engine),
    }
}

fn persist(engine: &Engine, snapshot: &Path) -> CommandResult<()> {
    engine.persist(snapshot).map_err(CommandError::from)
}

fn print_json<T: Serialize>(value: &T) -> CommandResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CommandError::Io(format!("json encode failed: {err}")))?;
    println!("{rendered}");
    Ok(())
}

fn generate_sets(
    cli: &Cli,
    engine: &Engine,
    snapshot: &Path,
    args: &GenerateSetsArgs,
) -> CommandResult<()> {
    let request = api::GenerateSetsRequest {
        num_sets_per_category: args.num_sets,
        items_per_set: args.items_per_set,
    };
    let (accepted, report) = api::generate_sets(engine, request)?;
    persist(engine, snapshot)?;

    if cli.json {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Output {
            #[serde(flatten)]
            accepted: api::GenerateSetsAccepted,
            report: crate::builder::BuildReport,
        }
        return print_json(&Output { accepted, report });
    }
    println!("built {} sets across {} categories", report.total_sets(), report.per_category.len());
    for (category, outcome) in &report.per_category {
        println!("  {category}: {outcome:?}");
    }
    Ok(())
}

fn ingest(cli: &Cli, engine: &Engine, snapshot: &Path, args: &IngestArgs) -> CommandResult<()> {
    let contents = fs::read_to_string(&args.file)
        .map_err(|err| CommandError::Io(format!("failed to read {}: {err}", args.file.display())))?;
    // Accept both the wrapped and the bare-array form.
    let request: api::IngestRequest = match serde_json::from_str(&contents) {
        Ok(request) => request,
        Err(_) => {
            let items: Vec<api::RawItem> = serde_json::from_str(&contents).map_err(|err| {
                CommandError::Engine(Error::Validation(api::ValidationError::Invalid(
                    crate::core::InvalidRecord {
                        reason: format!("unparseable item file: {err}"),
                    }
                    .into(),
                )))
            })?;
            api::IngestRequest { items }
        }
    };

    let report = api::ingest(engine, request).map_err(|err| match err {
        api::IngestError::Validation(e) => CommandError::from(e),
        api::IngestError::Store(e) => CommandError::Engine(Error::Store(e)),
    })?;
    persist(engine, snapshot)?;

    if cli.json {
        return print_json(&report);
    }
    println!(
        "stored {} items ({} duplicate-hash skipped)",
        report.stored, report.skipped_duplicate_by_hash
    );
    Ok(())
}

fn allocate(cli: &Cli, engine: &Engine, snapshot: &Path, args: &AllocateArgs) -> CommandResult<()> {
    let response = api::allocate(
        engine,
        api::AllocateRequest {
            user_id: args.user.clone(),
            category_ids: args.categories.clone(),
        },
    )?;
    persist(engine, snapshot)?;

    if cli.json {
        return print_json(&response);
    }
    for (category, set_id) in &response.successful {
        println!("{category}: {set_id}");
    }
    for (category, reason) in &response.failed {
        println!("{category}: failed ({reason:?})");
    }
    println!(
        "{} requested, {} successful, {} failed",
        response.summary.requested, response.summary.successful, response.summary.failed
    );
    Ok(())
}

fn merge(cli: &Cli, engine: &Engine, snapshot: &Path, args: &MergeArgs) -> CommandResult<()> {
    let response = api::merge(
        engine,
        api::MergeRequest {
            user_id: args.user.clone(),
            category_ids: args.categories.clone(),
        },
    )
    .map_err(|err| match err {
        api::MergeError::Validation(e) => CommandError::from(e),
        api::MergeError::Store(e) => CommandError::Engine(Error::Store(e)),
    })?;
    persist(engine, snapshot)?;

    if cli.json {
        return print_json(&response);
    }
    for (category, merged) in &response.categories {
        println!("{category}: {} ({} items)", merged.set_id, merged.item_count);
    }
    for (category, reason) in &response.failed {
        println!("{category}: failed ({reason:?})");
    }
    Ok(())
}

fn evict(cli: &Cli, engine: &Engine, snapshot: &Path, args: &EvictArgs) -> CommandResult<()> {
    let user = UserId::new(args.user.as_str())?;
    let evicted = engine
        .allocator()
        .evict_user(&user)
        .map_err(|err| CommandError::Engine(Error::Alloc(err)))?;
    persist(engine, snapshot)?;

    if cli.json {
        return print_json(&evicted);
    }
    if evicted.is_empty() {
        println!("nothing to evict for {user}");
        return Ok(());
    }
    for (category, plan) in &evicted {
        for planned in &plan.remove {
            println!("{category}: evicted {} ({:?})", planned.set_id, planned.reason);
        }
    }
    Ok(())
}

fn reset_user(cli: &Cli, engine: &Engine, snapshot: &Path, args: &ResetUserArgs) -> CommandResult<()> {
    let user = UserId::new(args.user.as_str())?;
    let removed = engine
        .allocator()
        .reset_user(&user)
        .map_err(|err| CommandError::Engine(Error::Alloc(err)))?;
    persist(engine, snapshot)?;

    if cli.json {
        #[derive(Serialize)]
        struct Output {
            removed: usize,
        }
        return print_json(&Output { removed });
    }
    println!("cleared {removed} allocations for {user}");
    Ok(())
}

fn pool_status(cli: &Cli, engine: &Engine, args: &PoolStatusArgs) -> CommandResult<()> {
    let categories = match args.category.as_deref() {
        Some(raw) => vec![CategoryId::parse(raw)?],
        None => engine
            .pool_categories()
            .map_err(|err| CommandError::Engine(Error::Pool(err)))?,
    };

    #[derive(Serialize)]
    struct Row {
        category: CategoryId,
        available: u64,
        last_updated: Option<String>,
        last_batch_size: u64,
    }
    let mut rows = Vec::new();
    for category in categories {
        let meta = engine
            .pool_metadata(&category)
            .map_err(|err| CommandError::Engine(Error::Pool(err)))?;
        rows.push(Row {
            category,
            available: meta.available,
            last_updated: meta.last_updated.map(|t| t.to_rfc3339()),
            last_batch_size: meta.last_batch_size,
        });
    }

    if cli.json {
        return print_json(&rows);
    }
    for row in &rows {
        println!(
            "{}: {} available (last batch {}, updated {})",
            row.category,
            row.available,
            row.last_batch_size,
            row.last_updated.as_deref().unwrap_or("never")
        );
    }
    Ok(())
}

fn pool_drain(cli: &Cli, engine: &Engine, snapshot: &Path, args: &PoolDrainArgs) -> CommandResult<()> {
    let category = CategoryId::parse(&args.category)?;
    let mut drained = Vec::new();
    if args.all {
        engine
            .drop_pool(&category)
            .map_err(|err| CommandError::Engine(Error::Pool(err)))?;
    } else {
        for _ in 0..args.count {
            match engine
                .drain_one(&category)
                .map_err(|err| CommandError::Engine(Error::Pool(err)))?
            {
                Some(set_id) => drained.push(set_id),
                None => break,
            }
        }
    }
    persist(engine, snapshot)?;

    if cli.json {
        #[derive(Serialize)]
        struct Output {
            dropped_all: bool,
            drained: Vec<crate::core::SetId>,
        }
        return print_json(&Output {
            dropped_all: args.all,
            drained,
        });
    }
    if args.all {
        println!("dropped pool for {category}");
    } else {
        println!("drained {} sets from {category}", drained.len());
    }
    Ok(())
}

fn categories(cli: &Cli, engine: &Engine) -> CommandResult<()> {
    #[derive(Serialize)]
    struct Row {
        id: CategoryId,
        name: String,
    }
    let rows: Vec<Row> = engine
        .categories()
        .iter()
        .map(|(id, name)| Row {
            id: id.clone(),
            name: name.to_string(),
        })
        .collect();

    if cli.json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("no categories configured");
        return Ok(());
    }
    for row in &rows {
        println!("{}: {}", row.id, row.name);
    }
    Ok(())
}
