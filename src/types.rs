use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Outcome of a single connect attempt.
///
/// `Closed` covers refusal, timeout, and any resolution or network error alike;
/// a filtered port and an unreachable host both report `Closed`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Open,
    Closed,
}

/// One probed port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub port: u16,
    pub status: PortStatus,
}

impl ProbeResult {
    pub fn open(port: u16) -> Self {
        Self { port, status: PortStatus::Open }
    }

    pub fn closed(port: u16) -> Self {
        Self { port, status: PortStatus::Closed }
    }

    pub fn is_open(&self) -> bool {
        self.status == PortStatus::Open
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub total: usize,
    pub open: usize,
    pub closed: usize,
}

impl ScanSummary {
    pub fn from_results(results: &[ProbeResult]) -> Self {
        let total = results.len();
        let open = results.iter().filter(|r| r.is_open()).count();
        Self { total, open, closed: total - open }
    }
}

/// Full report for one scan request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub host: String,
    pub started: String,
    pub finished: String,
    pub summary: ScanSummary,
    pub results: Vec<ProbeResult>,
}

impl ScanReport {
    /// Assemble a report; the summary is always derived from `results`.
    pub fn new(
        host: impl Into<String>,
        started: OffsetDateTime,
        finished: OffsetDateTime,
        results: Vec<ProbeResult>,
    ) -> Self {
        Self {
            host: host.into(),
            started: format_utc(started),
            finished: format_utc(finished),
            summary: ScanSummary::from_results(&results),
            results,
        }
    }

    pub fn open_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.results.iter().filter(|r| r.is_open()).map(|r| r.port)
    }
}

/// RFC 3339 in UTC, which always ends in `Z`.
pub fn format_utc(ts: OffsetDateTime) -> String {
    ts.to_offset(time::UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
