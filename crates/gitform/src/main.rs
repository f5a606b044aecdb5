//! `gitform` - CLI for gitform
//!
//! This binary reads, writes, and watches the documents a form keeps in a
//! GitHub repository.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use gitform::cli::{
    Cli, Command, ConfigCommand, GetCommand, LsCommand, PutCommand, RmCommand,
    SubmissionsCommand, SubmitCommand, WatchCommand,
};
use gitform::content::GitHubConfig;
use gitform::sync::PollReport;
use gitform::{
    init_logging, ChangeEvent, Collector, Config, ContentApi, DocumentStore, GitHubContents,
    ImageUpload, MemoryContents, SyncService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        Command::Status(status_cmd) => handle_status(&config, cli.offline, status_cmd.json),
        Command::Get(cmd) => handle_get(open(&config, cli.offline)?.store(), &cmd).await,
        Command::Put(cmd) => handle_put(open(&config, cli.offline)?.store(), &cmd).await,
        Command::Rm(cmd) => handle_rm(open(&config, cli.offline)?.store(), &cmd).await,
        Command::Ls(cmd) => handle_ls(open(&config, cli.offline)?.store(), &cmd).await,
        Command::Submit(cmd) => handle_submit(&open(&config, cli.offline)?, cmd).await,
        Command::Submissions(cmd) => {
            handle_submissions(&open(&config, cli.offline)?, &cmd).await
        }
        Command::Watch(cmd) => handle_watch(&open(&config, cli.offline)?, &config, &cmd).await,
    }
}

/// Build a collector over the configured backend.
fn open(config: &Config, offline: bool) -> anyhow::Result<Collector> {
    Ok(Collector::from_config(connect(config, offline)?, config))
}

fn connect(config: &Config, offline: bool) -> anyhow::Result<Arc<dyn ContentApi>> {
    if offline {
        info!("using an empty in-memory repository");
        return Ok(Arc::new(MemoryContents::new()));
    }

    config.require_repository()?;
    if !config.has_token() {
        warn!("no access token configured; writes and private repositories will fail");
    }
    let api = GitHubContents::new(GitHubConfig::from_config(config))?;
    Ok(Arc::new(api))
}

fn handle_status(config: &Config, offline: bool, json: bool) -> anyhow::Result<()> {
    let repository = config.configured_repository();
    let backend = if offline { "memory" } else { "github" };

    if json {
        let status = json!({
            "backend": backend,
            "repository": repository,
            "branch": config.repository.branch,
            "api_url": config.repository.api_url,
            "token_set": config.has_token(),
            "settings_path": config.layout.settings_path,
            "submissions_path": config.layout.submissions_path,
            "images_dir": config.layout.images_dir,
            "poll_interval_ms": config.sync.poll_interval_ms,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("gitform status");
        println!("--------------");
        println!("Backend:       {backend}");
        println!(
            "Repository:    {}",
            repository.as_deref().unwrap_or("(not configured)")
        );
        println!("Branch:        {}", config.repository.branch);
        println!("API:           {}", config.repository.api_url);
        println!(
            "Token:         {}",
            if config.has_token() { "set" } else { "not set" }
        );
        println!("Settings:      {}", config.layout.settings_path);
        println!("Submissions:   {}", config.layout.submissions_path);
        println!("Images:        {}", config.layout.images_dir);
        println!("Poll interval: {}ms", config.sync.poll_interval_ms);
    }
    Ok(())
}

async fn handle_get(store: &DocumentStore, cmd: &GetCommand) -> anyhow::Result<()> {
    let Some(bytes) = store.read_bytes(&cmd.path).await? else {
        bail!("{} not found", cmd.path);
    };

    if !cmd.raw {
        if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(())
}

async fn handle_put(store: &DocumentStore, cmd: &PutCommand) -> anyhow::Result<()> {
    let content = tokio::fs::read(&cmd.file)
        .await
        .with_context(|| format!("failed to read {}", cmd.file.display()))?;
    let message = cmd
        .message
        .clone()
        .unwrap_or_else(|| format!("Update {}", cmd.path));

    let receipt = store.write_bytes(&cmd.path, &content, &message).await?;
    println!("{} {}", receipt.sha, receipt.path);
    Ok(())
}

async fn handle_rm(store: &DocumentStore, cmd: &RmCommand) -> anyhow::Result<()> {
    let message = cmd
        .message
        .clone()
        .unwrap_or_else(|| format!("Remove {}", cmd.path));

    if store.delete(&cmd.path, &message).await? {
        println!("Deleted {}", cmd.path);
    } else {
        println!("{} does not exist", cmd.path);
    }
    Ok(())
}

async fn handle_ls(store: &DocumentStore, cmd: &LsCommand) -> anyhow::Result<()> {
    let entries = store.list(&cmd.dir).await?;
    if entries.is_empty() {
        println!("(empty)");
    }
    for entry in entries {
        println!("{:<9} {:>10}  {}", entry.kind.to_string(), entry.size, entry.path);
    }
    Ok(())
}

async fn handle_submit(collector: &Collector, cmd: SubmitCommand) -> anyhow::Result<()> {
    let fields: Map<String, Value> = cmd.fields.into_iter().collect();

    let mut images = Vec::with_capacity(cmd.images.len());
    for path in &cmd.images {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let image = ImageUpload::from_bytes(bytes)
            .with_context(|| format!("{} is not a supported image", path.display()))?;
        images.push(image);
    }

    let submission = collector.submit(fields, images).await?;
    println!("{}", serde_json::to_string_pretty(&submission)?);
    Ok(())
}

async fn handle_submissions(collector: &Collector, cmd: &SubmissionsCommand) -> anyhow::Result<()> {
    let log = collector.submissions().await?;
    let entries: Vec<_> = match cmd.limit {
        Some(limit) => log.latest(limit),
        None => log.iter().collect(),
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No submissions.");
        return Ok(());
    }
    for submission in entries {
        println!(
            "{}  {}  {} fields  {} images",
            submission.id,
            submission.submitted_at.to_rfc3339(),
            submission.fields.len(),
            submission.images.len()
        );
    }
    Ok(())
}

fn print_change(event: &ChangeEvent) {
    match &event.version {
        Some(version) => println!("{} changed: {} @ {version}", event.kind, event.path),
        None => println!("{} removed: {}", event.kind, event.path),
    }
    if let Ok(Some(value)) = event.json::<Value>() {
        if let Ok(pretty) = serde_json::to_string_pretty(&value) {
            println!("{pretty}");
        }
    }
}

fn print_report(report: &PollReport) {
    for failure in &report.failed {
        eprintln!("failed to poll {}: {}", failure.path, failure.error);
    }
}

async fn handle_watch(
    collector: &Collector,
    config: &Config,
    cmd: &WatchCommand,
) -> anyhow::Result<()> {
    let sync = SyncService::from_config(Arc::clone(collector.store().api()), config);
    let sync_backend = collector.store().api().name();
    sync.subscribe(print_change)?;

    if cmd.once {
        let report = sync.poll_once().await?;
        print_report(&report);
        if !report.failed.is_empty() {
            bail!("{} resource(s) failed to poll", report.failed.len());
        }
        return Ok(());
    }

    let handle = sync.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    println!(
        "Watching {} every {}ms (Ctrl-C to stop)",
        config.target_label(sync_backend),
        config.sync.poll_interval_ms
    );
    sync.run().await?;
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Repository]");
                println!("  Owner:              {}", config.repository.owner);
                println!("  Name:               {}", config.repository.name);
                println!("  Branch:             {}", config.repository.branch);
                println!("  API URL:            {}", config.repository.api_url);
                println!("  Token set:          {}", config.has_token());
                println!();
                println!("[Layout]");
                println!("  Settings path:      {}", config.layout.settings_path);
                println!("  Submissions path:   {}", config.layout.submissions_path);
                println!("  Images dir:         {}", config.layout.images_dir);
                println!("  Committer:          {}", config.layout.committer);
                println!();
                println!("[Sync]");
                println!("  Poll interval (ms): {}", config.sync.poll_interval_ms);
                println!();
                println!("[HTTP]");
                println!("  Timeout (s):        {}", config.http.timeout_secs);
                println!("  User agent:         {}", config.http.user_agent);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
