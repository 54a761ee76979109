//! tailgrid - tail several workers and ask questions about their logs

mod commands;
mod config;
mod ui;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tailgrid_ai::InferenceClient;
use tailgrid_core::{CloudflareTails, LogEvent, LogLevel, Workspace};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use commands::Command;
use ui::Output;

/// How often background results are applied and printed
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// tailgrid - live logs from several workers, with questions answered by a model
#[derive(Parser, Debug)]
#[command(name = "tailgrid")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workers to start tailing right away
    sources: Vec<String>,

    /// Account ID (default: config file, then CLOUDFLARE_ACCOUNT_ID)
    #[arg(long)]
    account_id: Option<String>,

    /// Model to use (default: @cf/meta/llama-3.1-8b-instruct)
    #[arg(short, long)]
    model: Option<String>,

    /// Character budget for log context sent with a question
    #[arg(short, long)]
    budget: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "tailgrid=debug"
    } else {
        "tailgrid=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.init_config {
        let path = config::Config::init().context("Error creating config")?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();

    let Some(account_id) = args.account_id.clone().or_else(|| cfg.account_id()) else {
        anyhow::bail!(
            "No account ID found. Pass --account-id, set CLOUDFLARE_ACCOUNT_ID, or add it to the config (tailgrid --init-config)"
        );
    };
    let Some(api_token) = cfg.api_token() else {
        anyhow::bail!(
            "No API token found. Set CLOUDFLARE_API_TOKEN or add it to the config (tailgrid --init-config)"
        );
    };

    let inference =
        InferenceClient::new(cfg.inference_config(&account_id, &api_token, args.model.as_deref()))
            .context("Failed to create inference client")?;
    let provisioner = CloudflareTails::new(cfg.api_base(), account_id, api_token);

    let mut ws_config = cfg.workspace_config(args.budget);
    if let Some(prompt) = cfg
        .system_prompt()
        .context("Failed to read system prompt file")?
    {
        ws_config.system_prompt = prompt;
    }

    let mut workspace = Workspace::new(ws_config, Arc::new(provisioner), Arc::new(inference));
    for source in &args.sources {
        if let Err(e) = workspace.start_source(source) {
            eprintln!("{}", e);
        }
    }

    println!("tailgrid - type :help for commands, or ask a question about the selected panes");
    let result = run(&mut workspace).await;

    println!("Stopping tails...");
    workspace.shutdown().await;
    result
}

async fn run(workspace: &mut Workspace) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(POLL_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tick.tick() => {
                for event in workspace.poll() {
                    print_outputs(&ui::render_event(&event))?;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                let Some(command) = commands::parse(&line) else { continue };
                if !handle_command(workspace, command) {
                    return Ok(());
                }
            }
        }
    }
}

fn print_outputs(outputs: &[Output]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    for output in outputs {
        match output {
            Output::Line(line) => writeln!(stdout, "{}", line)?,
            Output::Fragment(text) => write!(stdout, "{}", text)?,
        }
    }
    stdout.flush()
}

/// Apply one command. Returns `false` when the user asked to quit.
fn handle_command(workspace: &mut Workspace, command: Command) -> bool {
    match command {
        Command::Tail(names) => {
            for name in names {
                match workspace.start_source(&name) {
                    Ok(()) => println!("* starting {}", name),
                    Err(e) => println!("{}", e),
                }
            }
        }
        Command::Stop(name) => {
            if !workspace.stop_source(&name) {
                println!("{} is not running", name);
            }
        }
        Command::Add { name, url } => match workspace.add_source(&name, url.as_deref(), true) {
            Ok(true) => println!("* added {}", name),
            Ok(false) => println!("{} already exists", name),
            Err(e) => println!("{}", e),
        },
        Command::Push { name, text } => {
            let event = LogEvent::new(Utc::now(), LogLevel::Log, text);
            if workspace.ingest(&name, std::slice::from_ref(&event)) {
                println!("{}", ui::format_line(&name, &event));
            } else {
                println!("{} is not accepting lines", name);
            }
        }
        Command::Remove(name) => {
            if !workspace.remove_source(&name) {
                println!("No pane named {}", name);
            }
        }
        Command::Select(name) => {
            if !workspace.select_source(&name) {
                println!("No pane named {}", name);
            }
        }
        Command::Unselect(name) => {
            if !workspace.deselect_source(&name) {
                println!("No pane named {}", name);
            }
        }
        Command::Panes => println!("{}", ui::format_panes(&workspace.snapshot())),
        Command::Context => println!(
            "{}",
            ui::format_context_sources(
                &workspace.context_sources(),
                workspace.config().char_budget
            )
        ),
        Command::New => {
            workspace.new_conversation();
            println!("* new conversation");
        }
        Command::Cancel => {
            if workspace.cancel_response() {
                println!("\n* cancelled");
            }
        }
        Command::Help => println!("{}", commands::help_message()),
        Command::Quit => return false,
        Command::Ask(question) => {
            if let Err(e) = workspace.send_message(&question) {
                println!("{}", e);
            }
        }
        Command::Usage(usage) => println!("Usage: {}", usage),
        Command::Unknown(command) => println!("Unknown command :{} (try :help)", command),
    }
    true
}
