//! The `toolchat` command: chat with the travel assistant in the terminal,
//! or serve it over HTTP.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpListener;
use tokio::select;
use tokio::signal;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use toolchat::Session;
use toolchat::config::{AppConfig, Command};
use toolchat::server;
use toolchat_core::{CancellationToken, Stage, Termination, TurnOutcome};

enum UiEvent {
    Delta(String),
    Stage(Stage),
}

const BAR_CHAR: &str = "▎";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::parse();
    match config.command() {
        Command::Chat => chat(&config).await,
        Command::Serve { listen } => {
            let orchestrator = config.orchestrator_builder().build();
            let listener = TcpListener::bind(listen)
                .await
                .with_context(|| format!("failed to listen on {listen}"))?;

            let shutdown = CancellationToken::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    if signal::ctrl_c().await.is_ok() {
                        info!("shutting down");
                    }
                    shutdown.cancel();
                }
            });

            server::serve(listener, Arc::new(orchestrator), shutdown)
                .await
                .context("server stopped unexpectedly")
        }
    }
}

async fn chat(config: &AppConfig) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let orchestrator = config
        .orchestrator_builder()
        .on_delta({
            let event_tx = event_tx.clone();
            move |delta| {
                event_tx.send(UiEvent::Delta(delta.to_owned())).ok();
            }
        })
        .on_stage(move |stage| {
            event_tx.send(UiEvent::Stage(stage)).ok();
        })
        .build();
    let mut session = Session::new(Arc::new(orchestrator));

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .context("invalid progress template")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line(&mut lines).await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let cancel = CancellationToken::new();
        let turn = session.send_message(line, &cancel);
        tokio::pin!(turn);

        let mut progress_bar = None;
        let mut streamed = String::new();
        let result = loop {
            select! {
                result = &mut turn => break result,
                Some(event) = event_rx.recv() => {
                    handle_event(
                        event,
                        &progress_style,
                        &mut progress_bar,
                        &mut streamed,
                    );
                }
                _ = signal::ctrl_c() => {
                    debug!("cancelling the turn");
                    cancel.cancel();
                }
            }
        };

        // Deltas are sent synchronously, so they are all queued by now.
        drain_events(&mut event_rx, &progress_style, &mut progress_bar, &mut streamed);
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }

        match result {
            Ok(outcome) => print_outcome(&outcome, &streamed),
            Err(err) => {
                if !streamed.is_empty() {
                    println!();
                }
                println!("{}❌ {}", BAR_CHAR.bright_red(), err.bright_red());
            }
        }
        println!();
    }
    Ok(())
}

fn handle_event(
    event: UiEvent,
    progress_style: &ProgressStyle,
    progress_bar: &mut Option<ProgressBar>,
    streamed: &mut String,
) {
    match event {
        UiEvent::Stage(stage) => {
            let message = match stage {
                Stage::AwaitingModel => "🤔 Thinking...",
                Stage::ExecutingTools => "🔧 Using tools...",
                Stage::BuildingRequest | Stage::Finalizing => return,
            };
            if !streamed.is_empty() && !streamed.ends_with('\n') {
                println!();
                streamed.push('\n');
            }
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.enable_steady_tick(Duration::from_millis(100));
                    progress_bar
                })
                .set_message(message);
        }
        UiEvent::Delta(delta) => {
            // Finish the progress bar before printing anything else.
            if let Some(progress_bar) = progress_bar.take() {
                progress_bar.finish_and_clear();
            }
            if streamed.is_empty() || streamed.ends_with('\n') {
                print!("{}🤖 ", BAR_CHAR.bright_cyan());
            }
            print!("{}", delta.bright_white());
            std::io::stdout().flush().ok();
            streamed.push_str(&delta);
        }
    }
}

fn drain_events(
    event_rx: &mut UnboundedReceiver<UiEvent>,
    progress_style: &ProgressStyle,
    progress_bar: &mut Option<ProgressBar>,
    streamed: &mut String,
) {
    while let Ok(event) = event_rx.try_recv() {
        handle_event(event, progress_style, progress_bar, streamed);
    }
}

/// Prints whatever part of the answer was not streamed.
fn print_outcome(outcome: &TurnOutcome, streamed: &str) {
    let final_part = streamed.rsplit('\n').next().unwrap_or_default();
    match outcome.text.strip_prefix(final_part) {
        Some(rest) if !final_part.is_empty() => {
            println!("{}", rest.bright_white());
        }
        _ => {
            if !streamed.is_empty() {
                println!();
            }
            println!(
                "{}🤖 {}",
                BAR_CHAR.bright_cyan(),
                outcome.text.bright_white()
            );
        }
    }

    let note = match outcome.termination {
        Termination::Completed => return,
        Termination::RoundLimitReached => "round limit reached",
        Termination::DeadlineExceeded => "time limit reached",
    };
    println!("{}⚠️  {}", BAR_CHAR.bright_yellow(), note.bright_yellow());
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    match lines.next_line().await {
        Ok(line) => line,
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
