use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument, Span};

/// One reading of the process's memory footprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub resident_bytes: u64,
    /// High-water mark of resident memory, where the platform reports one
    pub peak_resident_bytes: Option<u64>,
}

/// Process memory reader.
///
/// Linux reads `/proc/self/status`, macOS asks `ps`. Other platforms report
/// nothing rather than an estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryTracker;

impl MemoryTracker {
    pub fn sample(&self) -> Option<MemorySample> {
        #[cfg(target_os = "linux")]
        {
            Self::sample_linux()
        }
        #[cfg(target_os = "macos")]
        {
            Self::sample_macos()
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }

    #[cfg(target_os = "linux")]
    fn sample_linux() -> Option<MemorySample> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_proc_status(&status)
    }

    #[cfg(target_os = "macos")]
    fn sample_macos() -> Option<MemorySample> {
        let output = std::process::Command::new("ps")
            .args(["-o", "rss=", "-p", &std::process::id().to_string()])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let rss_kb: u64 = std::str::from_utf8(&output.stdout).ok()?.trim().parse().ok()?;
        Some(MemorySample { resident_bytes: rss_kb * 1024, peak_resident_bytes: None })
    }

    /// Format bytes in human-readable format
    #[allow(clippy::cast_precision_loss)]
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// `VmRSS` and `VmHWM` from a `/proc/<pid>/status` listing, in bytes.
fn parse_proc_status(status: &str) -> Option<MemorySample> {
    let field = |name: &str| {
        status.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some(kb * 1024)
        })
    };
    Some(MemorySample { resident_bytes: field("VmRSS")?, peak_resident_bytes: field("VmHWM") })
}

/// What the monitor saw over a pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySummary {
    pub samples: u64,
    pub peak_resident_bytes: Option<u64>,
}

/// Periodic sampler of runtime and memory statistics.
pub struct TelemetryMonitor {
    interval: Duration,
    tracker: MemoryTracker,
    span: Span,
}

impl TelemetryMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval, tracker: MemoryTracker, span: Span::none() }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Sample on every tick until `token` is cancelled.
    ///
    /// Never fails: a platform without memory statistics just logs the task
    /// counts.
    pub async fn run(self, token: CancellationToken) -> TelemetrySummary {
        let span = self.span.clone();
        self.sample_until(token).instrument(span).await
    }

    async fn sample_until(self, token: CancellationToken) -> TelemetrySummary {
        let mut summary = TelemetrySummary::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let metrics = tokio::runtime::Handle::current().metrics();
            // Sampling reads procfs or runs `ps`; keep it off the runtime workers.
            let tracker = self.tracker;
            let memory = tokio::task::spawn_blocking(move || tracker.sample()).await.ok().flatten();
            summary.samples += 1;

            if let Some(sample) = memory {
                let peak = sample.peak_resident_bytes.unwrap_or(sample.resident_bytes);
                summary.peak_resident_bytes =
                    Some(summary.peak_resident_bytes.map_or(peak, |seen| seen.max(peak)));
            }

            debug!(
                num_of_tasks = metrics.num_alive_tasks(),
                num_of_workers = metrics.num_workers(),
                resident_bytes = memory.map(|m| m.resident_bytes),
                peak_resident_bytes = memory.and_then(|m| m.peak_resident_bytes),
                "runtime stats"
            );
        }
        summary
    }
}
