mod play;
mod repl;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gamescript::{EngineConfig, Event, LanguageEngine, SymbolTable};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// fail on reads of unknown identifiers
    #[arg(long, global = true)]
    strict: bool,

    /// how deep script-triggered events may chain
    #[arg(long, global = true, default_value_t = EngineConfig::default().max_event_depth)]
    max_event_depth: usize,

    /// evaluation stack size
    #[arg(long, global = true, default_value_t = EngineConfig::default().stack_limit)]
    stack_limit: usize,

    /// log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// run a script file against a fresh symbol table
    Run {
        #[arg(name = "FILE")]
        file: PathBuf,
    },
    /// compile a script file and print its statements
    Check {
        #[arg(name = "FILE")]
        file: PathBuf,
    },
    /// run a file of `@on <event>` sections through the event loop
    Play {
        #[arg(name = "FILE")]
        file: PathBuf,

        /// game-loop ticks to run after `create`
        #[arg(long, default_value_t = 10)]
        ticks: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::default()
        .strict_symbols(cli.strict)
        .max_event_depth(cli.max_event_depth)
        .stack_limit(cli.stack_limit);
    let engine = Arc::new(LanguageEngine::with_defaults().with_config(config));

    match cli.command {
        Some(Commands::Run { file }) => {
            let source = read_source(&file)?;
            let block = engine
                .compile(&source)
                .with_context(|| format!("failed to compile {}", file.display()))?;

            let mut symbols = SymbolTable::new();
            let mut events: Vec<Event> = vec![];
            let result = engine
                .run(&block, &mut symbols, &mut events)
                .with_context(|| format!("failed to run {}", file.display()))?;

            if let Some(value) = result.last_value {
                println!("{}", value);
            }
            for event in events {
                println!("triggered {}", event);
            }
            print!("{}", symbols);
        }
        Some(Commands::Check { file }) => {
            let source = read_source(&file)?;
            let block = engine
                .compile(&source)
                .with_context(|| format!("failed to compile {}", file.display()))?;
            print!("{}", block);
            if engine.is_pure(&block) {
                println!("(pure)");
            }
        }
        Some(Commands::Play { file, ticks }) => {
            let source = read_source(&file)?;
            play::run(engine, &source, ticks)
                .with_context(|| format!("failed to play {}", file.display()))?;
        }
        None => repl::start(engine)?,
    }

    Ok(())
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}
