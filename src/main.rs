use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use talkie::config::schema::parse_duration;
use talkie::config::{Config, LogFormat, LoggingConfig};
use talkie::speech::control::TurnComplete;
use talkie::speech::engine::event_channel;
use talkie::speech::engine::mock::{MockEngineHandle, MockVoiceEngine};
use talkie::speech::producer::{ChunkProducer, ChunkSource, StreamFeeder};
use talkie::speech::session::InMemorySession;
use talkie::speech::{ControlSurface, SpeechManager};

#[derive(Parser)]
#[command(name = "talkie")]
#[command(about = "Speak streamed chat text through an interruptible playback pipeline")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "TALKIE_CONFIG")]
    config: Option<String>,

    /// Debug logging for talkie
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Speak text with the simulated voice engine and wait until done
    Say {
        #[arg(required = true)]
        text: Vec<String>,

        /// Print the transcript and final pipeline state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stream a file (or stdin) through the pipeline in token-sized chunks
    Stream {
        file: Option<PathBuf>,

        /// Characters per chunk
        #[arg(long, default_value_t = 4)]
        chunk_chars: usize,

        /// Delay between chunks
        #[arg(long, default_value = "30ms")]
        interval: String,

        /// Pull chunks on request instead of pushing them
        #[arg(long)]
        pull: bool,

        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Print built-in defaults instead
        #[arg(long)]
        defaults: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Config { defaults: true } => Config::default(),
        _ => Config::load(cli.config.as_deref())?,
    };
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Say { text, json } => say(&config, text.join(" "), json).await,
        Commands::Stream {
            file,
            chunk_chars,
            interval,
            pull,
            json,
        } => {
            let interval = parse_duration(&interval).map_err(anyhow::Error::msg)?;
            stream(&config, file, chunk_chars.max(1), interval, pull, json).await
        }
        Commands::Config { .. } => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "talkie=debug"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_target(false).init(),
    }
}

fn start_simulated(config: &Config) -> Result<(SpeechManager, MockEngineHandle)> {
    let (tx, rx) = event_channel();
    let (engine, handle) = MockVoiceEngine::simulated(&config.simulator, tx);
    let manager = SpeechManager::start(
        config,
        Box::new(engine),
        rx,
        Box::new(InMemorySession::new()),
    )?;
    Ok((manager, handle))
}

/// Wait for the turn to finish.  Returns `false` if Ctrl-C cut it short.
async fn wait_for_turn(control: &ControlSurface, done: TurnComplete) -> Result<bool> {
    tokio::select! {
        _ = done => Ok(true),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            warn!("Interrupted, stopping speech");
            control.stop()?;
            Ok(false)
        }
    }
}

async fn report(control: &ControlSurface, engine: &MockEngineHandle, json: bool) -> Result<()> {
    let spoken = engine.spoken();
    if json {
        let snapshot = control.snapshot().await?;
        let out = serde_json::json!({
            "spoken": spoken,
            "final_state": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for line in spoken {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn say(config: &Config, text: String, json: bool) -> Result<()> {
    let (manager, engine) = start_simulated(config)?;
    let control = manager.control();

    let done = control.turn_complete()?;
    control.speak(text)?;
    control.end_of_stream()?;
    wait_for_turn(&control, done).await?;

    report(&control, &engine, json).await?;
    manager.shutdown().await
}

fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

/// Split text into chunks of `size` characters, like streamed tokens.
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Hands out pre-split chunks, one per request, after a fixed delay.
struct PacedSource {
    chunks: Mutex<VecDeque<String>>,
    interval: Duration,
}

#[async_trait]
impl ChunkSource for PacedSource {
    async fn next_chunk(&self) -> Result<Option<String>> {
        tokio::time::sleep(self.interval).await;
        Ok(self
            .chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front())
    }
}

async fn stream(
    config: &Config,
    file: Option<PathBuf>,
    chunk_chars: usize,
    interval: Duration,
    pull: bool,
    json: bool,
) -> Result<()> {
    let chunks = chunk_text(&read_input(file)?, chunk_chars);
    info!(chunks = chunks.len(), pull, "Streaming text");

    let (manager, engine) = start_simulated(config)?;
    let control = manager.control();
    let done = control.turn_complete()?;

    let finished = if pull {
        let source = Arc::new(PacedSource {
            chunks: Mutex::new(chunks.into()),
            interval,
        });
        let producer = ChunkProducer::spawn(control.clone(), source)?;
        let finished = wait_for_turn(&control, done).await?;
        if !finished {
            producer.cancel();
        }
        let outcome = producer.join().await?;
        info!(?outcome, "Producer finished");
        finished
    } else {
        let (tx, rx) = mpsc::unbounded_channel::<Result<String>>();
        tokio::spawn(async move {
            for chunk in chunks {
                tokio::time::sleep(interval).await;
                if tx.send(Ok(chunk)).is_err() {
                    break;
                }
            }
        });
        let feeder = StreamFeeder::spawn(control.clone(), UnboundedReceiverStream::new(rx));
        let finished = wait_for_turn(&control, done).await?;
        if !finished {
            feeder.cancel();
        }
        let outcome = feeder.join().await?;
        info!(?outcome, "Feeder finished");
        finished
    };

    if finished {
        report(&control, &engine, json).await?;
    }
    manager.shutdown().await
}
