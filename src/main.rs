//! Gridwire node
//!
//! Listens for peer connections and logs every decoded message.
//!
//! Usage:
//!   cargo run --release --bin gridwire-node -- [--config node.toml] [--bind ADDR]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser as ClapParser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gridwire::error::{Result, WireError};
use gridwire::network::{server, MessageHandler, Session};
use gridwire::protocol::system::IoEnvelope;
use gridwire::{DirectParser, Message, MessageFactory, NodeConfig};

#[derive(ClapParser, Debug)]
#[command(name = "gridwire-node")]
#[command(about = "Accept peer connections and decode direct messages")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Worker event loops, overrides the config file
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long)]
    verbose: bool,
}

/// Logs what arrives.
struct LogHandler;

impl MessageHandler<Box<dyn Message>> for LogHandler {
    fn on_message(&self, session: &Session, msg: Box<dyn Message>) {
        match msg.downcast_ref::<IoEnvelope>() {
            Some(envelope) => info!(
                session = %session.id(),
                topic = ?envelope.topic,
                ordered = envelope.ordered,
                payload = envelope.payload.as_ref().map(|p| p.type_name()),
                "envelope received"
            ),
            None => info!(
                session = %session.id(),
                tag = msg.direct_type(),
                kind = msg.type_name(),
                "message received"
            ),
        }
    }

    fn on_closed(&self, session: &Session, error: Option<&WireError>) {
        if let Some(e) = error {
            info!(session = %session.id(), error = %e, "session dropped");
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gridwire-node: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&args, &config);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "node failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(args: &Args, config: &NodeConfig) {
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(config: &NodeConfig) -> Result<()> {
    let factory = Arc::new(MessageFactory::with_system_types()?);
    info!(types = ?factory.tags(), "message types registered");

    let parser = Arc::new(DirectParser::with_limits(factory, config.reader_limits()));
    let handle = server::start(config, parser, Arc::new(LogHandler))?;
    info!(addr = %handle.local_addr(), "node started");

    handle.join();
    Ok(())
}
