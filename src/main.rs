use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use host_scan_rs::ports::PortSet;
use host_scan_rs::scanner::{self, ScanConfig};
use host_scan_rs::types::ScanReport;
use host_scan_rs::{logging, server};

/// host-scan-rs — concurrent TCP connect scanner for a single host, with a small JSON API.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "host-scan-rs",
    version,
    about = "Concurrent TCP connect scanner for a single host, with a small JSON API.",
    long_about = None
)]
struct Cli {
    /// Default log filter when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Serve the scan API (POST /scan) until Ctrl+C.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:5000")]
        bind: String,

        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Scan one host and print the report.
    Scan {
        /// Hostname or IP address to scan.
        #[arg(long)]
        host: String,

        /// Port spec, e.g. "22,80,443" or "20-25,80". Empty scans the default set.
        #[arg(long, default_value = "")]
        ports: String,

        /// Print the report as pretty JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Write the report as pretty JSON to this path (optional).
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        scan: ScanArgs,
    },
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Per-port connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 1000)]
    timeout_ms: u64,

    /// Max concurrent connect attempts. Unbounded when omitted.
    #[arg(long)]
    concurrency: Option<usize>,
}

impl ScanArgs {
    fn config(&self) -> ScanConfig {
        ScanConfig::default()
            .with_timeout(Duration::from_millis(self.timeout_ms.max(1)))
            .with_concurrency(self.concurrency)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    match cli.command {
        Command::Serve { bind, scan } => {
            let config = scan.config();
            info!(%bind, timeout_ms = scan.timeout_ms, concurrency = ?scan.concurrency, "starting server");
            server::spawn_server(&bind, config).await?;
        }
        Command::Scan {
            host,
            ports,
            json,
            output,
            scan,
        } => {
            let host = host.trim();
            if host.is_empty() {
                bail!("host is required");
            }
            let ports = PortSet::parse(&ports);
            let report = scanner::run_report(host, &ports, &scan.config()).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report_table(&report);
            }
            if let Some(path) = output.as_deref() {
                write_report_json(path, &report)?;
                info!(path = %path.display(), "wrote JSON report");
            }
        }
    }

    Ok(())
}

fn print_report_table(report: &ScanReport) {
    let port_w = 5usize;
    let status_w = "status".len().max("closed".len());

    println!(
        "\nHost: {}  started: {}  finished: {}",
        report.host, report.started, report.finished
    );
    println!(
        "Open: {}  closed: {}  total: {}",
        report.summary.open, report.summary.closed, report.summary.total
    );
    println!(
        "{:>port_w$}  {:<status_w$}",
        "port",
        "status",
        port_w = port_w,
        status_w = status_w
    );
    println!(
        "{:-<port_w$}  {:-<status_w$}",
        "",
        "",
        port_w = port_w,
        status_w = status_w
    );
    for r in &report.results {
        let status = if r.is_open() { "open" } else { "closed" };
        println!(
            "{:>port_w$}  {:<status_w$}",
            r.port,
            status,
            port_w = port_w,
            status_w = status_w
        );
    }
}

fn write_report_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
