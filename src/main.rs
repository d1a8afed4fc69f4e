use std::{process::ExitCode, time::Duration};

use clap::Parser;
use futures::future::join_all;
use http::Method;

use pingfetch::{
    config::Config,
    core::{FetchOptions, FetchResult},
    logging::Logger,
    metrics::exporter,
    orchestration::{Lifecycle, Orchestrator},
};

/// Fetch URLs through the orchestration layer and print what it did.
#[derive(Parser, Debug)]
#[command(name = "pingfetch", version)]
struct Opt {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    conf: Option<String>,

    /// Route every request through the batch scheduler
    #[arg(long)]
    batch: bool,

    /// Issue the whole set of requests this many times
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Cache ttl in milliseconds, overriding the configured default
    #[arg(long)]
    ttl: Option<u64>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header as `name: value`, repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Print Prometheus metrics after the diagnostics
    #[arg(long)]
    prometheus: bool,

    #[arg(required = true)]
    urls: Vec<String>,
}

impl Opt {
    fn fetch_options(&self) -> FetchResult<FetchOptions> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| pingfetch::config_error!("Invalid method {}: {e}", self.method))?;

        let mut options = FetchOptions::get().method(method).batch(self.batch);
        for header in &self.headers {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                pingfetch::config_error!("Header must look like `name: value`, got {header}")
            })?;
            options = options.header(name.trim(), value.trim());
        }
        if let Some(body) = &self.data {
            options = options.body(body.clone());
        }
        if let Some(ttl) = self.ttl {
            options = options.ttl(Duration::from_millis(ttl));
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let opt = Opt::parse();

    match run(opt).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pingfetch: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(opt: Opt) -> FetchResult<()> {
    // Load configuration
    let config = match &opt.conf {
        Some(path) => Config::load_from_yaml(path)?,
        None => Config::default(),
    };

    let mut lifecycle = Lifecycle::new();

    // Initialize logging
    match config.log.clone() {
        Some(log) => {
            let logger = Logger::new(log);
            logger.init_env_logger();
            let shutdown = lifecycle.shutdown_signal();
            lifecycle.spawn("log sync", async move {
                if let Err(e) = logger.run(shutdown).await {
                    eprintln!("pingfetch: {e}");
                }
            });
        }
        None => env_logger::init(),
    }

    let result = fetch_all(&opt, &config, &mut lifecycle).await;
    if let Err(e) = &result {
        log::error!("{e}");
    }

    // background tasks, the log writer included, stop on every exit path
    lifecycle.shutdown().await;
    result
}

async fn fetch_all(opt: &Opt, config: &Config, lifecycle: &mut Lifecycle) -> FetchResult<()> {
    log::info!("Building orchestrator...");
    let orchestrator = Orchestrator::from_config(config)?;
    if let Some(interval) = config.cache.sweep_interval() {
        lifecycle.spawn_sweeper(orchestrator.cache().clone(), interval);
    }

    let options = opt.fetch_options()?;
    for round in 1..=opt.repeat {
        log::info!("Round {round}: fetching {} urls", opt.urls.len());
        let calls = opt
            .urls
            .iter()
            .map(|url| orchestrator.fetch(url, options.clone()));
        let results = join_all(calls).await;

        for (url, result) in opt.urls.iter().zip(results) {
            match result {
                Ok(value) => println!("{url} -> {value}"),
                Err(e) => println!("{url} !! {e}"),
            }
        }
    }

    let diagnostics = serde_json::to_string_pretty(&orchestrator.diagnostics())?;
    println!("{diagnostics}");
    if opt.prometheus {
        print!("{}", exporter::gather()?);
    }
    Ok(())
}
