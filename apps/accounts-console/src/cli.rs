use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use crate::actions::CreateAccountError;
use crate::app::ConsoleApp;
use crate::config::{ConsoleConfig, parse_base_url};
use crate::render::{render_acknowledgment, render_snapshot};
use crate::synchronizer::AccountListSnapshot;

#[derive(Debug, Parser)]
#[command(name = "accounts-console")]
#[command(about = "Operator console for the workflow-backed accounts API")]
pub struct Cli {
    /// Accounts API base URL (overrides ACCOUNTS_CONSOLE_API_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Emit log lines as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
    /// Delay before the refresh that follows a create
    #[arg(long, global = true)]
    pub create_delay_ms: Option<u64>,
    /// Delay before the refresh that follows an upgrade or delete
    #[arg(long, global = true)]
    pub mutation_delay_ms: Option<u64>,
    /// Per-request timeout; unset waits indefinitely
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
    /// Upper bound on waiting for every plan to resolve before printing
    #[arg(long, global = true, default_value_t = 5_000)]
    pub settle_ms: u64,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the account table once every plan has resolved
    List,
    /// Create an account, then print the refreshed table
    Create { name: String },
    /// Switch an account between trial and premium
    Toggle { workflow_id: String },
    /// Delete an account
    Delete { workflow_id: String },
    /// Line-oriented console that redraws on every change
    Interactive,
}

impl Cli {
    /// Applies flag overrides on top of the environment configuration.
    pub fn resolve_config(&self, mut config: ConsoleConfig) -> Result<ConsoleConfig> {
        if let Some(base_url) = self.base_url.as_deref() {
            config.api_base_url =
                parse_base_url(base_url).map_err(|error| anyhow!("invalid --base-url: {error}"))?;
        }
        if let Some(ms) = self.create_delay_ms {
            config.refresh_delays.after_create = Duration::from_millis(ms);
        }
        if let Some(ms) = self.mutation_delay_ms {
            config.refresh_delays.after_mutation = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            if ms == 0 {
                bail!("invalid --timeout-ms: must be greater than zero");
            }
            config.request_timeout_ms = Some(ms);
        }
        config.log_json |= self.log_json;
        Ok(config)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplCommand {
    List,
    Refresh,
    Create(String),
    Toggle(String),
    Delete(String),
    Help,
    Quit,
}

impl ReplCommand {
    /// Parses one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));
        let command = match verb {
            "list" | "ls" => Self::List,
            "refresh" => Self::Refresh,
            "create" => Self::Create(rest.to_string()),
            "toggle" => Self::Toggle(required_id("toggle", rest)?),
            "delete" | "rm" => Self::Delete(required_id("delete", rest)?),
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command `{other}`; try `help`")),
        };
        Ok(Some(command))
    }
}

fn required_id(verb: &str, rest: &str) -> Result<String, String> {
    match rest.split_whitespace().next() {
        Some(workflow_id) => Ok(workflow_id.to_string()),
        None => Err(format!("usage: {verb} <workflow-id>")),
    }
}

const REPL_HELP: &str = "commands: list | refresh | create <name> | toggle <id> | delete <id> | quit";

pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = cli
        .resolve_config(ConsoleConfig::from_env().context("load console configuration")?)?;
    init_tracing(config.log_json);

    let app = ConsoleApp::from_config(&config, Handle::current())
        .context("build accounts api client")?;
    let settle = Duration::from_millis(cli.settle_ms);
    let mut out = io::stdout();
    let result = match cli.command {
        Commands::List => run_list(&app, settle, &mut out).await,
        Commands::Create { name } => run_create(&app, &name, settle, &mut out).await,
        Commands::Toggle { workflow_id } => run_toggle(&app, &workflow_id, settle, &mut out).await,
        Commands::Delete { workflow_id } => run_delete(&app, &workflow_id, settle, &mut out).await,
        Commands::Interactive => run_interactive(&app, &mut out).await,
    };
    app.shutdown();
    result
}

/// Waits for a list from `min_generation` or later with every plan resolved. Falls back to the
/// current snapshot once `settle` elapses.
pub async fn await_settled(
    app: &ConsoleApp,
    min_generation: u64,
    settle: Duration,
) -> AccountListSnapshot {
    let settled = app
        .accounts()
        .wait_for(settle, |snapshot| {
            snapshot.generation >= min_generation && snapshot.plans_settled()
        })
        .await;
    settled.unwrap_or_else(|| {
        let snapshot = app.accounts().snapshot();
        tracing::warn!(
            generation = snapshot.generation,
            load_state = snapshot.load_state.label(),
            revision = snapshot.revision,
            settle_ms = settle.as_millis(),
            "printing before every plan resolved"
        );
        snapshot
    })
}

pub async fn run_list(app: &ConsoleApp, settle: Duration, out: &mut impl Write) -> Result<()> {
    let snapshot = await_settled(app, 1, settle).await;
    render_snapshot(out, &snapshot).context("write account table")
}

pub async fn run_create(
    app: &ConsoleApp,
    name: &str,
    settle: Duration,
    out: &mut impl Write,
) -> Result<()> {
    await_settled(app, 1, settle).await;
    match app.actions().create_account(name).await {
        Ok(scheduled) => {
            let next_generation = app.accounts().latest_generation() + 1;
            writeln!(out, "account {} created", name.trim()).context("write output")?;
            scheduled.published().await;
            let snapshot = await_settled(app, next_generation, settle).await;
            render_snapshot(out, &snapshot).context("write account table")
        }
        Err(error @ CreateAccountError::NameRequired) => Err(anyhow!(error)),
        Err(error) => Err(anyhow!(error).context("create account")),
    }
}

pub async fn run_toggle(
    app: &ConsoleApp,
    workflow_id: &str,
    settle: Duration,
    out: &mut impl Write,
) -> Result<()> {
    await_settled(app, 1, settle).await;
    let outcome = app.toggle_plan(workflow_id).await;
    finish_mutation(app, outcome, settle, out).await
}

pub async fn run_delete(
    app: &ConsoleApp,
    workflow_id: &str,
    settle: Duration,
    out: &mut impl Write,
) -> Result<()> {
    await_settled(app, 1, settle).await;
    let outcome = app.actions().delete_account(workflow_id).await;
    finish_mutation(app, outcome, settle, out).await
}

async fn finish_mutation(
    app: &ConsoleApp,
    outcome: crate::actions::ActionOutcome,
    settle: Duration,
    out: &mut impl Write,
) -> Result<()> {
    render_acknowledgment(out, &outcome.acknowledgment).context("write acknowledgment")?;
    let Some(scheduled) = outcome.scheduled_refresh else {
        bail!("{}", outcome.acknowledgment.title);
    };
    let next_generation = app.accounts().latest_generation() + 1;
    scheduled.published().await;
    let snapshot = await_settled(app, next_generation, settle).await;
    render_snapshot(out, &snapshot).context("write account table")
}

async fn run_interactive(app: &ConsoleApp, out: &mut impl Write) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = app.accounts().subscribe();
    writeln!(out, "{REPL_HELP}").context("write output")?;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                render_snapshot(out, &snapshot).context("write account table")?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("read console input")? else {
                    break;
                };
                match ReplCommand::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(ReplCommand::Quit)) => break,
                    Ok(Some(command)) => handle_repl_command(app, command, out).await?,
                    Err(message) => writeln!(out, "{message}").context("write output")?,
                }
            }
        }
    }
    Ok(())
}

async fn handle_repl_command(
    app: &ConsoleApp,
    command: ReplCommand,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        ReplCommand::List => {
            render_snapshot(out, &app.accounts().snapshot()).context("write account table")?;
        }
        ReplCommand::Refresh => {
            app.accounts().refresh();
        }
        ReplCommand::Create(name) => match app.actions().create_account(&name).await {
            Ok(scheduled) => writeln!(
                out,
                "account {} created; refreshing in {} ms",
                name.trim(),
                scheduled.delay().as_millis()
            )
            .context("write output")?,
            Err(error) => writeln!(out, "create failed: {error}").context("write output")?,
        },
        ReplCommand::Toggle(workflow_id) => {
            let outcome = app.toggle_plan(&workflow_id).await;
            render_acknowledgment(out, &outcome.acknowledgment).context("write acknowledgment")?;
        }
        ReplCommand::Delete(workflow_id) => {
            let outcome = app.actions().delete_account(&workflow_id).await;
            render_acknowledgment(out, &outcome.acknowledgment).context("write acknowledgment")?;
        }
        ReplCommand::Help => writeln!(out, "{REPL_HELP}").context("write output")?,
        ReplCommand::Quit => {}
    }
    Ok(())
}
