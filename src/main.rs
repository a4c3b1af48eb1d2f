use clap::Parser;
use openssl::x509::X509;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use certsunset::config::{
    Config, ConfigError, LookaheadConfig, PrometheusConfig, Settings, DEFAULT_CONFIG_FILE,
};
use certsunset::metrics::prom::prometheus_metrics;
use certsunset::report::write_report;
use certsunset::{Inspector, InspectorOptions, Scanner, SunsetPolicyTable};

/// Exit status for configuration errors.
const CONFIG_ERROR_EXIT: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "certsunset",
    version,
    about = "Audit TLS certificate chains for upcoming expiry and sunset signature algorithms"
)]
struct Cli {
    /// Host to check, optionally with a port (repeatable; repeats are scanned again)
    #[arg(short = 'H', long = "host", value_name = "HOST")]
    hosts: Vec<String>,

    /// File with one host per line, appended to --host entries
    #[arg(long, value_name = "PATH")]
    hosts_file: Option<String>,

    /// Config file (defaults to ./certsunset.toml when present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format: table or json
    #[arg(short, long)]
    output: Option<String>,

    /// Lookahead years for the expiry warning
    #[arg(long)]
    years: Option<u32>,

    /// Lookahead months for the expiry warning
    #[arg(long)]
    months: Option<u32>,

    /// Lookahead days for the expiry warning
    #[arg(long)]
    days: Option<u32>,

    /// Exit code when any certificate needs attention
    #[arg(long)]
    exit_code: Option<i32>,

    /// Per-host timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Number of hosts scanned in parallel
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Sort output by host name
    #[arg(long)]
    sort: bool,

    /// PEM file with extra trusted root certificates
    #[arg(long, value_name = "PATH")]
    ca_file: Option<String>,

    /// Push metrics to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address
    #[arg(long, value_name = "URL")]
    prometheus_address: Option<String>,

    /// Disable colored table output
    #[arg(long)]
    no_color: bool,

    /// Log level written to stderr
    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,

    /// Print an example config file and exit
    #[arg(long)]
    example_config: bool,
}

impl Cli {
    /// The configuration layer given on the command line.
    fn to_config(&self) -> Config {
        let lookahead = if self.years.is_some() || self.months.is_some() || self.days.is_some() {
            Some(LookaheadConfig {
                years: self.years,
                months: self.months,
                days: self.days,
            })
        } else {
            None
        };
        let prometheus = if self.prometheus || self.prometheus_address.is_some() {
            Some(PrometheusConfig {
                enabled: self.prometheus.then_some(true),
                address: self.prometheus_address.clone(),
            })
        } else {
            None
        };

        Config {
            hosts: (!self.hosts.is_empty()).then(|| self.hosts.clone()),
            hosts_file: self.hosts_file.clone(),
            output: self.output.clone(),
            exit_code: self.exit_code,
            timeout_secs: self.timeout,
            concurrency: self.concurrency,
            sort: self.sort.then_some(true),
            ca_file: self.ca_file.clone(),
            lookahead,
            prometheus,
        }
    }
}

fn init_logger(level: LevelFilter) {
    let console = fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::registry()
            .with(console.with_filter(filter))
            .init();
    } else {
        let filter = Targets::new()
            .with_default(LevelFilter::OFF)
            .with_target("certsunset", level);
        tracing_subscriber::registry()
            .with(console.with_filter(filter))
            .init();
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let mut config = Config::defaults();

    match &cli.config {
        Some(path) => config = config.merge_with(Config::from_file(path)?),
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("using {}", DEFAULT_CONFIG_FILE);
                config = config.merge_with(Config::from_file(DEFAULT_CONFIG_FILE)?);
            }
        }
    }

    config.merge_with(cli.to_config()).validate()
}

fn load_roots(path: &Path) -> Result<Vec<X509>, ConfigError> {
    let pem = std::fs::read(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    X509::stack_from_pem(&pem)
        .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
}

fn main() {
    let cli = Cli::parse();

    if cli.example_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    init_logger(cli.log_level);

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            eprintln!("certsunset: {}", e);
            exit(CONFIG_ERROR_EXIT);
        }
    };

    let extra_roots = match settings.ca_file.as_deref().map(load_roots).transpose() {
        Ok(roots) => roots.unwrap_or_default(),
        Err(e) => {
            eprintln!("certsunset: {}", e);
            exit(CONFIG_ERROR_EXIT);
        }
    };

    let options = InspectorOptions {
        timeout: settings.timeout,
        extra_roots,
    };
    let inspector = match Inspector::new(Arc::new(SunsetPolicyTable::standard()), options) {
        Ok(inspector) => inspector,
        Err(e) => {
            eprintln!("certsunset: {}", e);
            exit(CONFIG_ERROR_EXIT);
        }
    };

    let scanner = Scanner::new(inspector, settings.concurrency);
    let mut result = scanner.scan(&settings.hosts, settings.lookahead);
    if settings.sort {
        result.sort_by_host();
    }

    let color = !cli.no_color && io::stdout().is_terminal();
    let stdout = io::stdout();
    if let Err(e) = write_report(&mut stdout.lock(), &result, settings.output, color) {
        error!("failed to write report: {}", e);
    }

    if let Some(address) = &settings.prometheus_address {
        if let Err(e) = prometheus_metrics(&result, address) {
            warn!("failed to push metrics to prometheus: {}", e);
        }
    }

    if result.needs_attention() {
        exit(settings.exit_code);
    }
    exit(0);
}
