mod script;

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ariadne::{Label, Report, ReportKind, Source};
use clap::{Parser as ClapParser, Subcommand};
use codefold::config::{ButtonPosition, Config, ConfigPatch, DefaultCollapse};
use codefold::dom::{Document, ElementSpec};
use codefold::engine::{Engine, EngineOptions, StateStore};
use codefold::error::EngineError;
use codefold::platform::cli::{FileStorage, Session};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

use script::{Pace, Script};

#[derive(ClapParser)]
#[command(name = "codefold")]
#[command(about = "Fold long code blocks and messages in a document tree")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). `RUST_LOG` wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a document once and print the items found
    Scan {
        /// Document tree as JSON
        document: PathBuf,
        /// State directory (load on start, save on change)
        #[arg(long)]
        state: Option<PathBuf>,
        /// Also print the decorated tree as HTML
        #[arg(long)]
        html: bool,
        /// Replace the code block selectors
        #[arg(long = "code-selector")]
        code_selectors: Vec<String>,
    },
    /// Run a scripted session of insertions, clicks and key presses
    Replay {
        /// Script file
        script: PathBuf,
        /// State directory (load on start, save on change)
        #[arg(long)]
        state: Option<PathBuf>,
        /// Wait for real time to pass instead of jumping the clock
        #[arg(long)]
        realtime: bool,
    },
    /// Read or change the persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect persisted fold states
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Get {
        #[arg(long)]
        state: PathBuf,
    },
    /// Change some settings and print the result
    Set {
        #[arg(long)]
        state: PathBuf,
        /// none | all | long
        #[arg(long)]
        default_collapse: Option<DefaultCollapse>,
        #[arg(long)]
        long_code_lines: Option<u32>,
        #[arg(long)]
        remember_state: Option<bool>,
        /// top-left | top-right | bottom-left | bottom-right
        #[arg(long)]
        button_position: Option<ButtonPosition>,
        #[arg(long)]
        show_line_numbers: Option<bool>,
        #[arg(long)]
        use_animation: Option<bool>,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// List every remembered fold state
    List {
        #[arg(long)]
        state: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Scan {
            document,
            state,
            html,
            code_selectors,
        } => {
            let spec: ElementSpec = read_json(&document)?;
            let mut options = EngineOptions::default();
            if !code_selectors.is_empty() {
                options = options.with_code_selectors(code_selectors);
            }
            let report = scan(&spec, open_store(state.as_deref()), options, html);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Replay {
            script,
            state,
            realtime,
        } => {
            let script: Script = read_json(&script)?;
            let mut options = EngineOptions::default();
            if let Some(delay) = script.rescan_delay_ms {
                options = options.with_rescan_delay(delay);
            }
            let mut session = Session::new(
                Document::from_spec(&script.document),
                open_store(state.as_deref()),
                options,
            );
            session.start();
            report_selector_errors(session.engine().selector_errors());
            let pace = if realtime { Pace::Realtime } else { Pace::Virtual };
            script::run(&mut session, &script.steps, pace).await?;
            info!(timers = session.timers_fired(), "replay finished");
            println!("{}", serde_json::to_string_pretty(&summary(session.engine()))?);
        }
        Commands::Config { action } => {
            let config = match action {
                ConfigAction::Get { state } => open_store(Some(&state)).load_config(),
                ConfigAction::Set {
                    state,
                    default_collapse,
                    long_code_lines,
                    remember_state,
                    button_position,
                    show_line_numbers,
                    use_animation,
                } => {
                    let patch = ConfigPatch {
                        default_collapse,
                        long_code_lines,
                        remember_state,
                        button_position,
                        show_line_numbers,
                        use_animation,
                    };
                    update_config(&mut open_store(Some(&state)), &patch)
                }
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::State {
            action: StateAction::List { state },
        } => {
            let entries = open_store(Some(&state)).fold_entries();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// A file-backed store, or a session-only one when no directory is given.
fn open_store(state: Option<&Path>) -> StateStore {
    match state {
        Some(path) => StateStore::new(FileStorage::new(path)),
        None => StateStore::session_only(),
    }
}

fn update_config(store: &mut StateStore, patch: &ConfigPatch) -> Config {
    let mut config = store.load_config();
    if config.apply(patch) {
        store.save_config(&config);
    }
    config
}

fn scan(spec: &ElementSpec, store: StateStore, options: EngineOptions, html: bool) -> Value {
    let mut engine = Engine::new(Document::from_spec(spec), store, options);
    engine.start(0);
    report_selector_errors(engine.selector_errors());
    let mut report = summary(&engine);
    if html {
        report["html"] = Value::String(engine.dom().render_html(engine.dom().body()));
    }
    report
}

fn summary(engine: &Engine<Document>) -> Value {
    let items: Vec<Value> = engine
        .items()
        .map(|item| {
            json!({
                "identity": item.identity,
                "kind": item.kind,
                "lineCount": item.line_count,
                "language": item.language,
                "state": item.state,
            })
        })
        .collect();
    json!({
        "items": items,
        "durable": engine.context().store.is_durable(),
        "stats": engine.stats(),
    })
}

fn report_selector_errors(errors: &[EngineError]) {
    for error in errors {
        let EngineError::SelectorInvalid { selector, source } = error else {
            continue;
        };
        let name = "selector";
        let span = clamp_span(source.start..source.end, selector.len());
        let printed = Report::build(ReportKind::Error, (name, span.clone()))
            .with_message(format!("invalid selector '{selector}', skipped"))
            .with_label(Label::new((name, span)).with_message(&source.message))
            .finish()
            .eprint((name, Source::from(selector.as_str())));
        if printed.is_err() {
            eprintln!("{error}");
        }
    }
}

fn clamp_span(span: Range<usize>, len: usize) -> Range<usize> {
    let start = span.start.min(len);
    start..span.end.clamp(start, len)
}
