//! Mitigator - attack-graph driven mitigation engine.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mitigator::alert::MappingSchema;
use mitigator::cli::{Cli, Commands, ConfigArgs};
use mitigator::condition::Evaluator;
use mitigator::config::{self, Config};
use mitigator::dispatch::Dispatcher;
use mitigator::error::{BusError, ConfigError, Error};
use mitigator::observability::logging::init_logging;
use mitigator::observability::metrics;
use mitigator::pipeline::Pipeline;
use mitigator::planner::Planner;
use mitigator::server::{self, ApiState};
use mitigator::store::{Store, StorePaths};
use mitigator::{bus, graphdb};

/// Inbound alert queue depth shared by the bus and HTTP ingress.
const QUEUE_DEPTH: usize = 1024;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("mitigator {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Commands::Validate(args) => match validate(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("validation failed: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::Serve(args) => match serve(&args, cli.verbose).await {
            Ok(()) => {
                info!("graceful shutdown complete");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "fatal");
                eprintln!("fatal: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Loads the configuration, the mapping schema and the catalogs without
/// starting anything, reporting the first problem found.
fn validate(args: &ConfigArgs) -> Result<(), Error> {
    let config = config::load(&args.config)?;
    let _mapping = load_mapping(&config)?;
    let store = Store::new(store_paths(&config));
    let catalogs = store.load()?;
    println!(
        "ok: {} condition(s), {} graph(s), {} workflow(s)",
        catalogs.conditions.len(),
        catalogs.graphs.len(),
        catalogs.workflows.len()
    );
    Ok(())
}

/// Boots the whole engine and runs until shutdown.
async fn serve(args: &ConfigArgs, verbosity: u8) -> Result<(), Error> {
    let config = config::load(&args.config)?;
    init_logging(
        config.logging.format,
        verbosity,
        config.logging.level.as_deref(),
    );
    metrics::describe();

    let mapping = Arc::new(load_mapping(&config)?);
    let store = Arc::new(Store::new(store_paths(&config)));
    let catalogs = Arc::new(store.load()?);

    let evaluator = Evaluator::new(graphdb::from_config(config.graphdb.as_ref()));
    let planner = Planner::new(config.planner.slots, config.planner.time_limit);
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.timeout));

    let listen: SocketAddr =
        config
            .http
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                field: "http.listen".to_string(),
                value: config.http.listen.clone(),
                expected: "a socket address".to_string(),
            })?;

    let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);
    let cancel = CancellationToken::new();

    let pipeline = Pipeline::new(
        Arc::clone(&catalogs),
        evaluator,
        planner,
        dispatcher,
        config.shutdown.grace,
    );
    let worker = tokio::spawn(pipeline.run(queue_rx));

    let api_state = ApiState {
        queue: queue_tx.clone(),
        catalogs: Arc::clone(&catalogs),
        store: Arc::clone(&store),
        mapping: Arc::clone(&mapping),
    };
    let http = tokio::spawn(server::serve(listen, api_state, cancel.clone()));

    let mut bus_task = match config.bus.clone() {
        Some(bus_config) => tokio::spawn(bus::run(
            bus_config,
            Arc::clone(&mapping),
            queue_tx.clone(),
            cancel.clone(),
        )),
        None => {
            info!("no bus configured; HTTP ingress only");
            tokio::spawn(std::future::pending::<Result<(), BusError>>())
        }
    };

    // Intake stops on ctrl-c or on a fatal ingress failure; either way the
    // worker then drains the queue before the process exits.
    let outcome: Result<(), Error> = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
            Ok(())
        }
        joined = &mut bus_task => {
            match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(Error::Io(std::io::Error::other(e.to_string()))),
            }
        }
    };

    cancel.cancel();
    bus_task.abort();
    drop(queue_tx);

    if let Err(e) = worker.await {
        error!(error = %e, "alert worker panicked");
    }
    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server panicked"),
    }

    outcome
}

/// Reads the normalizer's field-mapping schema.
fn load_mapping(config: &Config) -> Result<MappingSchema, Error> {
    let text = std::fs::read_to_string(&config.normalizer.mapping).map_err(|_| {
        ConfigError::MissingFile {
            path: config.normalizer.mapping.clone(),
        }
    })?;
    Ok(text.parse::<MappingSchema>()?)
}

/// Maps the store section onto document paths.
fn store_paths(config: &Config) -> StorePaths {
    StorePaths {
        graphs: config.store.graphs.clone(),
        workflows: config.store.workflows.clone(),
        conditions: config.store.conditions.clone(),
    }
}
