use std::{sync::Arc, time::Duration};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stalkvisor::{
    BeanstalkConnector, BrokerConfig, Dispatcher, DispatcherConfig, LogWriter, TubeSelection,
};

#[derive(Parser, Debug)]
#[command(name = "stalkvisor")]
#[command(version)]
#[command(about = "Run a shell command for every job reserved from beanstalkd")]
struct Args {
    /// beanstalkd address (host:port)
    #[arg(long, default_value = "127.0.0.1:11300")]
    address: String,

    /// Command to run for each job; the job body is written to its stdin
    #[arg(long)]
    cmd: String,

    /// Tubes to serve (comma-separated)
    #[arg(long, default_value = "default", value_delimiter = ',')]
    tubes: Vec<String>,

    /// Serve every tube on the server, including ones created later
    #[arg(long, conflicts_with = "tubes")]
    all: bool,

    /// Brokers (connections) per tube
    #[arg(long, default_value = "1")]
    per_tube: usize,

    /// Shell used as `<shell> -c <cmd>`
    #[arg(long, default_value = "/bin/sh")]
    shell: String,

    /// Extra time added to the job's remaining time-to-run before the command is stopped
    #[arg(long, default_value = "1000")]
    ttr_margin_ms: u64,

    /// Bury a job once it has timed out this many times
    #[arg(long, default_value = "1")]
    timeout_bury: u64,

    /// Bury a job once it has been released this many times
    #[arg(long, default_value = "10")]
    release_bury: u64,

    /// Exit status that buries the job instead of releasing it
    #[arg(long)]
    bury_exit_code: Option<i32>,

    /// Seconds between the first SIGTERM and SIGKILL (0 = never SIGKILL)
    #[arg(long, default_value = "5")]
    kill_grace_secs: u64,

    /// Seconds to wait for running jobs on shutdown
    #[arg(long, default_value = "60")]
    shutdown_grace_secs: u64,
}

impl Args {
    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            shell: self.shell.clone(),
            ttr_margin: Duration::from_millis(self.ttr_margin_ms),
            timeout_bury_threshold: self.timeout_bury,
            release_bury_threshold: self.release_bury,
            bury_exit_code: self.bury_exit_code,
            kill_grace: (self.kill_grace_secs > 0)
                .then(|| Duration::from_secs(self.kill_grace_secs)),
            ..BrokerConfig::new(self.cmd.clone())
        }
    }

    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            per_tube: self.per_tube,
            grace: Duration::from_secs(self.shutdown_grace_secs),
            ..DispatcherConfig::default()
        }
    }

    fn selection(&self) -> TubeSelection {
        if self.all {
            TubeSelection::All
        } else {
            TubeSelection::Named(
                self.tubes
                    .iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
            )
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let broker_cfg = args.broker_config();
    let mut problems = Vec::new();
    if args.address.trim().is_empty() {
        problems.push("Address must not be empty.".to_string());
    }
    if let Err(msgs) = broker_cfg.validate() {
        problems.extend(msgs);
    }
    let tubes = args.selection();
    if tubes == TubeSelection::Named(Vec::new()) {
        problems.push("At least one tube is required.".to_string());
    }
    if !problems.is_empty() {
        return Err(problems.join(" ").into());
    }

    tracing::info!(
        address = %args.address,
        tubes = ?tubes,
        per_tube = args.per_tube,
        "starting"
    );

    let dispatcher = Dispatcher::builder(
        args.dispatcher_config(),
        broker_cfg,
        Arc::new(BeanstalkConnector::new(args.address.clone())),
    )
    .with_subscriber(Arc::new(LogWriter::new()))
    .build();

    let outcome = dispatcher.run(tubes).await;
    dispatcher.close().await;
    outcome?;
    Ok(())
}
