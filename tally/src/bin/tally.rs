use std::{
    env,
    io::{self, Read, Write},
    net::SocketAddr,
    time::Duration,
};

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tally::{
    aggregator::{self, Aggregator},
    config::{self, Config},
    query::{self, CountersService},
    writer::{self, BatchWriter},
};
use tally_clock::RealClock;
use tally_counter::{Average, AverageTiming, Counter, Sum, name};
use tally_store::{FsQueue, FsStore, queue, store};
use tokio::runtime::Builder;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Tally config error: {0}")]
    Config(#[from] config::Error),
    #[error("Tally queue error: {0}")]
    Queue(#[from] queue::Error),
    #[error("Tally store error: {0}")]
    Store(#[from] store::Error),
    #[error("Tally aggregator returned an error: {0}")]
    Aggregator(#[from] aggregator::Error),
    #[error("Tally query returned an error: {0}")]
    Query(#[from] query::Error),
    #[error("Tally writer returned an error: {0}")]
    Writer(#[from] writer::Error),
    #[error("Invalid counter name: {0}")]
    Name(#[from] name::Error),
    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Value {value} is not valid for a {kind:?} counter")]
    Value { value: String, kind: KindArg },
}

fn default_config_path() -> String {
    "/etc/tally/tally.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge matured counter batches into permanent records
    Aggregate(AggregateCommand),
    /// Print recorded counter data as JSON
    Query(QueryCommand),
    /// Record a single counter observation
    Record(RecordCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct AggregateCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// the time, in seconds, to keep polling for matured windows
    #[clap(long, default_value_t = 60)]
    runtime_seconds: u64,
    /// poll for a few seconds only, ignoring --runtime-seconds
    #[clap(long)]
    development: bool,
    /// address on which to expose tally's own metrics in prometheus format
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
}

#[derive(Args)]
struct QueryCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// the counters to query, may be repeated
    #[clap(long = "counter-name", required = true)]
    counter_names: Vec<String>,
    /// first day to include, YYYY-MM-DD, defaults to today
    #[clap(long)]
    start_date: Option<NaiveDate>,
    /// last day to include, YYYY-MM-DD, defaults to today
    #[clap(long)]
    end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Sum,
    Average,
    AverageTiming,
}

#[derive(Args)]
struct RecordCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// the counter to record into
    #[clap(long)]
    counter_name: String,
    /// the kind of counter
    #[clap(long, value_enum)]
    kind: KindArg,
    /// the observation: an integer offset, a sample or elapsed milliseconds
    #[clap(long)]
    value: String,
    /// unix time of the observation, defaults to now
    #[clap(long)]
    timestamp: Option<f64>,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

fn load_config_contents(config_path: &str) -> Result<String, Error> {
    if let Ok(env_var_value) = env::var("TALLY_CONFIG") {
        debug!("Using config from env var 'TALLY_CONFIG'");
        Ok(env_var_value)
    } else {
        debug!("Attempting to open configuration file at: {}", config_path);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .open(config_path)
            .map_err(|err| {
                error!("Could not read config file '{}': {}", config_path, err);
                err
            })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(contents)
    }
}

fn parse_config(contents: &str) -> Result<Config, Error> {
    Config::parse(contents).map_err(|err| {
        error!("Configuration validation failed: {}", err);
        Error::Config(err)
    })
}

fn get_config(config_path: &str) -> Result<Config, Error> {
    let contents = load_config_contents(config_path)?;
    parse_config(&contents)
}

async fn run_aggregate(
    config: Config,
    runtime: Duration,
    development: bool,
    prometheus_addr: Option<SocketAddr>,
) -> Result<(), Error> {
    if let Some(addr) = prometheus_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
    }

    let queue = FsQueue::new(&config.queue.path).await?;
    let store = FsStore::new(&config.store.path).await?;
    let mut aggregator = Aggregator::new(
        queue,
        store,
        RealClock,
        config.counters()?,
        config.aggregator_settings(),
    )?;

    let results = aggregator
        .process_windows_with_backoff(runtime, development)
        .await?;
    let windows = results.iter().filter(|r| r.is_some()).count();
    info!(cycles = results.len(), windows, "Aggregation finished");
    Ok(())
}

async fn run_query(
    config: Config,
    names: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<String, Error> {
    let store = FsStore::new(&config.store.path).await?;
    let service = CountersService::new(store, config.base_dir);
    let data = service.get_counter_data(names, start, end).await?;
    Ok(serde_json::to_string(&data)?)
}

fn observation(name: &str, kind: KindArg, value: &str) -> Result<Counter, Error> {
    let invalid = || Error::Value {
        value: value.to_string(),
        kind,
    };
    let counter = match kind {
        KindArg::Sum => {
            let mut sum = Sum::new(name)?;
            sum.offset(value.parse().map_err(|_| invalid())?);
            Counter::from(sum)
        }
        KindArg::Average => {
            let sample: f64 = value.parse().map_err(|_| invalid())?;
            if !sample.is_finite() {
                return Err(invalid());
            }
            let mut average = Average::new(name)?;
            average.offset(sample);
            Counter::from(average)
        }
        KindArg::AverageTiming => {
            let mut timing = AverageTiming::new(name)?;
            timing.record(Duration::from_millis(value.parse().map_err(|_| invalid())?));
            Counter::from(timing)
        }
    };
    Ok(counter)
}

async fn run_record(config: Config, command: &RecordCommand) -> Result<String, Error> {
    let counter = observation(&command.counter_name, command.kind, &command.value)?;
    let queue = FsQueue::new(&config.queue.path).await?;
    let writer = BatchWriter::new(queue, config.window_size_seconds, config.lease_buffer());
    Ok(writer.save(&[counter], command.timestamp).await?)
}

async fn inner_main(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Aggregate(cmd) => {
            let config = get_config(&cmd.config_path)?;
            run_aggregate(
                config,
                Duration::from_secs(cmd.runtime_seconds),
                cmd.development,
                cmd.prometheus_addr,
            )
            .await
        }
        Commands::Query(cmd) => {
            let config = get_config(&cmd.config_path)?;
            let output =
                run_query(config, &cmd.counter_names, cmd.start_date, cmd.end_date).await?;
            writeln!(io::stdout().lock(), "{output}")?;
            Ok(())
        }
        Commands::Record(cmd) => {
            let config = get_config(&cmd.config_path)?;
            let payload = run_record(config, &cmd).await?;
            writeln!(io::stdout().lock(), "{payload}")?;
            Ok(())
        }
        Commands::ConfigCheck(_) => Ok(()),
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting tally {version}.");

    let cli = Cli::parse();
    if let Commands::ConfigCheck(cmd) = &cli.command {
        match get_config(&cmd.config_path) {
            Ok(_) => {
                info!("Configuration file is valid");
                std::process::exit(0)
            }
            Err(_) => std::process::exit(1),
        }
    }

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    let res = runtime.block_on(inner_main(cli.command));
    info!("Bye. :)");
    res
}
