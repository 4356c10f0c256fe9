//! # Audiometry - Self-Administered Hearing Assessment
//!
//! Terminal front-end for the audiometry core. It runs a session, renders
//! its events and collects the listener's answers from stdin.
//!
//! ## Architecture
//! - **Main Thread**: stdin answers and event rendering
//! - **Session Thread**: the assessment loop, blocking on one tone at a time
//! - **Input Thread**: blocking line reads from stdin
//! - **Communication**: Crossbeam channels between the three

mod profiles;
mod render;

use anyhow::{anyhow, Context, Result};
use audiometry_core::events::SessionEvent;
use audiometry_core::presenter::{ListenerModel, SimulatedListener, TonePresenter};
use audiometry_core::{
    AssessmentReport, AssessmentSession, AudiometryConfig, Responder, ResponseSlot,
    SessionControl,
};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{Receiver, Sender};
use profiles::Profile;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "audiometry", version, about = "Self-administered pure-tone hearing assessment")]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an assessment
    Run(RunArgs),
    /// Print a saved report
    Show {
        /// Report JSON written by `run`
        file: PathBuf,
    },
    /// Print the default configuration as JSON
    Config,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// JSON config file; missing keys use the defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to save the report
    #[arg(short, long, default_value = "hearing_report.json")]
    output: PathBuf,

    /// Answer with a built-in virtual listener instead of stdin
    #[arg(long, value_enum)]
    simulate: Option<Profile>,

    /// Seed for a reproducible test order
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Show { file } => {
            let report = AssessmentReport::load(&file)
                .with_context(|| format!("failed to load report {}", file.display()))?;
            print!("{}", render::report_summary(&report));
            Ok(())
        }
        Command::Config => {
            let json = serde_json::to_string_pretty(&AudiometryConfig::default())?;
            println!("{json}");
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AudiometryConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AudiometryConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let slot = ResponseSlot::new();
    let responder = slot.responder();
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let interactive = args.simulate.is_none();
    let worker = match args.simulate {
        Some(profile) => {
            info!(?profile, "running with a simulated listener");
            let listener_responder = slot.responder();
            SessionWorker::spawn(config.without_delays(), slot, events_tx, move || {
                Ok(SimulatedListener::new(
                    listener_responder,
                    ListenerModel::Thresholds(profile.thresholds()),
                ))
            })
        }
        None => {
            println!("Answer each tone: y or Enter = heard, n = not heard.");
            println!("p = pause, r = resume, s = status, q = stop and save.");
            SessionWorker::spawn(config, slot, events_tx, interactive_presenter)
        }
    };

    // The session thread hands its control back once it is built. A closed
    // channel means construction failed; join to surface the error.
    let Ok(control) = worker.control_rx.recv() else {
        return worker.join().map(|_| ());
    };

    let input_rx = if interactive {
        spawn_input_reader()
    } else {
        crossbeam_channel::never()
    };

    loop {
        crossbeam_channel::select! {
            recv(events_rx) -> msg => match msg {
                Ok(event) => {
                    if let Some(line) = render::event_line(&event, interactive) {
                        println!("{line}");
                    }
                }
                // The session dropped its sender: the run is over.
                Err(_) => break,
            },
            recv(input_rx) -> msg => match msg {
                Ok(line) => handle_input(line.trim(), &responder, &control),
                Err(_) => {
                    warn!("stdin closed; stopping session");
                    control.stop();
                    break;
                }
            },
        }
    }

    // Drain what the session emits while winding down.
    for event in events_rx.iter() {
        if let Some(line) = render::event_line(&event, interactive) {
            println!("{line}");
        }
    }

    let report = worker.join()?;
    report
        .save(&args.output)
        .with_context(|| format!("failed to save report to {}", args.output.display()))?;
    print!("{}", render::report_summary(&report));
    info!(path = %args.output.display(), "report saved");
    Ok(())
}

fn handle_input(input: &str, responder: &Responder, control: &SessionControl) {
    let accepted = match input {
        "" | "y" | "Y" => responder.heard(),
        "n" | "N" => responder.not_heard(),
        "p" => {
            control.pause();
            println!("paused; r to resume");
            true
        }
        "r" => {
            control.resume();
            println!("resumed");
            true
        }
        "s" => {
            match control.progress() {
                Some(progress) => println!("{}", render::progress_line(&progress)),
                None => println!("session not started yet"),
            }
            true
        }
        "q" => {
            println!("stopping...");
            control.stop();
            true
        }
        other => {
            println!("unknown input {other:?}: y/Enter, n, p, r, s or q");
            true
        }
    };
    if !accepted {
        debug!("answer ignored: no presentation awaiting a response");
    }
}

/// Forwards stdin lines on a detached thread. A blocking read cannot be
/// interrupted, so the thread is never joined.
fn spawn_input_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// The session thread and the handle it sends back once running.
struct SessionWorker {
    control_rx: Receiver<SessionControl>,
    thread_handle: JoinHandle<Result<AssessmentReport>>,
}

impl SessionWorker {
    /// Builds the presenter and the session on a dedicated thread. Audio
    /// streams are not always `Send`, so the presenter never crosses threads.
    fn spawn<P, F>(
        config: AudiometryConfig,
        slot: ResponseSlot,
        events_tx: Sender<SessionEvent>,
        make_presenter: F,
    ) -> Self
    where
        P: TonePresenter,
        F: FnOnce() -> Result<P> + Send + 'static,
    {
        let (control_tx, control_rx) = crossbeam_channel::bounded(1);
        let thread_handle = thread::spawn(move || -> Result<AssessmentReport> {
            let presenter = make_presenter()?;
            let mut session = AssessmentSession::with_response_slot(config, presenter, slot)?;
            session.events().subscribe(move |event| {
                let _ = events_tx.send(event.clone());
            });
            let _ = control_tx.send(session.control());
            Ok(session.run()?)
        });
        Self {
            control_rx,
            thread_handle,
        }
    }

    fn join(self) -> Result<AssessmentReport> {
        self.thread_handle
            .join()
            .map_err(|_| anyhow!("session thread panicked"))?
    }
}

#[cfg(feature = "audio")]
fn interactive_presenter() -> Result<audiometry_core::audio::CpalTonePresenter> {
    audiometry_core::audio::CpalTonePresenter::new().context("failed to open audio output")
}

#[cfg(not(feature = "audio"))]
fn interactive_presenter() -> Result<AnnouncedTones> {
    warn!("built without the `audio` feature; tones are announced, not played");
    Ok(AnnouncedTones::default())
}

/// Stand-in presenter for builds without an audio backend. The tone line
/// printed from the event stream is the only stimulus.
#[cfg(not(feature = "audio"))]
#[derive(Debug, Default)]
struct AnnouncedTones {
    next_handle: u64,
}

#[cfg(not(feature = "audio"))]
impl TonePresenter for AnnouncedTones {
    fn present_tone(
        &mut self,
        _frequency: u32,
        _ear: audiometry_core::Ear,
        _level_db: i32,
        _duration: std::time::Duration,
    ) -> Result<audiometry_core::presenter::ToneHandle> {
        self.next_handle += 1;
        Ok(audiometry_core::presenter::ToneHandle(self.next_handle))
    }
}
