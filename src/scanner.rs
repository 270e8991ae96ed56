use crate::ports::PortSet;
use crate::types::{PortStatus, ProbeResult, ScanReport};
use ::time::OffsetDateTime;
use anyhow::{anyhow, Context};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Per-probe connect timeout used when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunables for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Upper bound on resolve + connect for a single port.
    pub timeout: Duration,
    /// Max probes in flight. `None` launches every probe at once.
    pub concurrency: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            concurrency: None,
        }
    }
}

impl ScanConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: Option<usize>) -> Self {
        self.concurrency = concurrency;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scan cancelled before all probes completed")]
    Cancelled,
}

/// A single-port probe. Implementations must not fail: every error is `Closed`.
pub trait PortProber: Send + Sync + 'static {
    fn probe(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = ProbeResult> + Send;
}

/// Plain TCP connect probe, see [`probe_port`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProber;

impl PortProber for TcpConnectProber {
    fn probe(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = ProbeResult> + Send {
        probe_port(host, port, timeout)
    }
}

/// Try one TCP connection to `host:port`, bounded by `timeout`.
///
/// Name resolution runs inside the same timeout. A connection that completes
/// in time is `Open` and is shut down straight away; refusal, timeout and any
/// resolution or network error are all reported as `Closed`.
pub async fn probe_port(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    match time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(mut stream)) => {
            // result is already decided, a failed shutdown does not change it
            let _ = stream.shutdown().await;
            trace!(host, port, "open");
            ProbeResult::open(port)
        }
        Ok(Err(e)) => {
            trace!(host, port, error = %e, "connect failed");
            ProbeResult::closed(port)
        }
        Err(_) => {
            trace!(host, port, ?timeout, "connect timed out");
            ProbeResult::closed(port)
        }
    }
}

/// Probe every port of `ports` on `host` concurrently and return results in port order.
pub async fn scan_ports(host: &str, ports: &PortSet, config: &ScanConfig) -> Vec<ProbeResult> {
    let never = std::future::pending::<Infallible>();
    match fan_out(Arc::new(TcpConnectProber), host, ports, config, never).await {
        Ok(results) => results,
        Err(never) => match never {},
    }
}

/// Like [`scan_ports`], aborting all in-flight probes once `cancel` fires.
pub async fn scan_ports_with_cancel(
    host: &str,
    ports: &PortSet,
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Result<Vec<ProbeResult>, ScanError> {
    scan_ports_with(Arc::new(TcpConnectProber), host, ports, config, cancel).await
}

/// Scan with a caller-supplied prober.
pub async fn scan_ports_with<P: PortProber>(
    prober: Arc<P>,
    host: &str,
    ports: &PortSet,
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Result<Vec<ProbeResult>, ScanError> {
    let cancelled = async move {
        cancel.cancelled().await;
        ScanError::Cancelled
    };
    fan_out(prober, host, ports, config, cancelled).await
}

/// Run a scan and wrap it into a timestamped [`ScanReport`].
pub async fn run_report(host: &str, ports: &PortSet, config: &ScanConfig) -> ScanReport {
    let started = OffsetDateTime::now_utc();
    let results = scan_ports(host, ports, config).await;
    let finished = OffsetDateTime::now_utc();
    ScanReport::new(host, started, finished, results)
}

/// [`run_report`] with a caller-supplied prober and cancellation.
pub async fn run_report_with<P: PortProber>(
    prober: Arc<P>,
    host: &str,
    ports: &PortSet,
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Result<ScanReport, ScanError> {
    let started = OffsetDateTime::now_utc();
    let results = scan_ports_with(prober, host, ports, config, cancel).await?;
    let finished = OffsetDateTime::now_utc();
    Ok(ScanReport::new(host, started, finished, results))
}

/// Blocking entry point for synchronous callers.
///
/// The scan runs on a dedicated thread with its own runtime, so this works the
/// same whether or not the calling thread is already inside a tokio runtime.
pub fn scan_blocking(
    host: &str,
    ports: &PortSet,
    config: &ScanConfig,
) -> anyhow::Result<Vec<ProbeResult>> {
    std::thread::scope(|s| {
        s.spawn(|| -> anyhow::Result<Vec<ProbeResult>> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build scan runtime")?;
            Ok(rt.block_on(scan_ports(host, ports, config)))
        })
        .join()
        .map_err(|_| anyhow!("scan thread panicked"))?
    })
}

/// Spawn one task per port, gate them on the optional semaphore, and join them all.
///
/// Tasks return their index so output order never depends on completion order.
/// Each slot starts out `Closed`, so a probe task that panics leaves its port closed.
async fn fan_out<P, C, E>(
    prober: Arc<P>,
    host: &str,
    ports: &PortSet,
    config: &ScanConfig,
    cancelled: C,
) -> Result<Vec<ProbeResult>, E>
where
    P: PortProber,
    C: Future<Output = E>,
{
    tokio::pin!(cancelled);

    let started = Instant::now();
    let host: Arc<str> = Arc::from(host);
    let timeout = config.timeout;
    let sem = config
        .concurrency
        .map(|n| Arc::new(Semaphore::new(n.clamp(1, Semaphore::MAX_PERMITS))));

    info!(
        host = %host,
        ports = %ports,
        count = ports.len(),
        concurrency = ?config.concurrency,
        ?timeout,
        "starting scan"
    );

    let mut results: Vec<ProbeResult> = ports.iter().map(ProbeResult::closed).collect();
    let mut set = JoinSet::new();

    for (idx, port) in ports.into_iter().enumerate() {
        let permit = match &sem {
            Some(sem) => {
                let acquired = tokio::select! {
                    biased;
                    err = &mut cancelled => {
                        debug!(host = %host, "scan cancelled while waiting for a permit");
                        return Err(err);
                    }
                    p = sem.clone().acquire_owned() => p,
                };
                // the semaphore is never closed, so this is always Some
                acquired.ok()
            }
            None => None,
        };

        let prober = prober.clone();
        let host = host.clone();
        set.spawn(async move {
            let _permit = permit; // held until the probe finishes
            let result = prober.probe(&host, port, timeout).await;
            (idx, result.status)
        });
    }

    loop {
        let joined = tokio::select! {
            biased;
            err = &mut cancelled => {
                set.abort_all();
                debug!(host = %host, "scan cancelled, aborted in-flight probes");
                return Err(err);
            }
            next = set.join_next() => next,
        };
        match joined {
            Some(Ok((idx, status))) => results[idx].status = status,
            Some(Err(e)) => warn!(host = %host, error = %e, "probe task failed, port left closed"),
            None => break,
        }
    }

    let open = results
        .iter()
        .filter(|r| r.status == PortStatus::Open)
        .count();
    info!(
        host = %host,
        open,
        total = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan finished"
    );
    Ok(results)
}
