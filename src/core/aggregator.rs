/// Snapshot aggregation
///
/// Runs every registered provider once per cycle and folds the results into a
/// single `Snapshot`. Successful readings fill their section, failures leave
/// the section at its zero value and add one entry to `errors`.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::provider::{CpuReading, MetricProvider, ProviderError, Reading};
use super::snapshot::{CpuStats, Snapshot};
use crate::utils::{format_interval, DEFAULT_PROVIDER_TIMEOUT};

/// Why a single provider call produced no reading
#[derive(Debug, Error)]
pub enum CollectFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider panicked")]
    Panicked,

    #[error("timed out after {}", format_interval(.0))]
    TimedOut(Duration),

    #[error("provider task failed: {0}")]
    Join(String),
}

pub struct Aggregator {
    providers: Vec<Arc<dyn MetricProvider>>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(providers: Vec<Arc<dyn MetricProvider>>) -> Self {
        Self {
            providers,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Upper bound for a single provider call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Run one collection pass
    ///
    /// Always returns a snapshot. Providers run concurrently on the blocking
    /// pool; all of them have finished or timed out before this returns, and
    /// `errors` keeps registration order.
    pub async fn collect(&self) -> Snapshot {
        let mut snapshot = Snapshot::empty(Utc::now());

        let calls = self
            .providers
            .iter()
            .map(|provider| run_provider(Arc::clone(provider), self.timeout));

        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(reading) => merge(&mut snapshot, reading),
                Err(err) => {
                    debug!(provider = name, error = %err, "provider failed");
                    snapshot.errors.push(format!("{}: {}", name, err));
                }
            }
        }

        snapshot
    }
}

async fn run_provider(
    provider: Arc<dyn MetricProvider>,
    timeout: Duration,
) -> (&'static str, Result<Reading, CollectFailure>) {
    let name = provider.name();
    let task = tokio::task::spawn_blocking(move || provider.collect());

    // A timed-out call keeps its blocking thread until the OS read returns;
    // only the cycle stops waiting for it.
    let outcome = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result.map_err(CollectFailure::from),
        Ok(Err(join_err)) if join_err.is_panic() => Err(CollectFailure::Panicked),
        Ok(Err(join_err)) => Err(CollectFailure::Join(join_err.to_string())),
        Err(_) => Err(CollectFailure::TimedOut(timeout)),
    };

    (name, outcome)
}

fn merge(snapshot: &mut Snapshot, reading: Reading) {
    match reading {
        Reading::Cpu(cpu) => snapshot.cpu = cpu_stats(cpu),
        Reading::Load(load) => snapshot.load = load,
        Reading::Memory(memory) => snapshot.memory = memory,
        Reading::Disk(disk) => snapshot.disk = disk,
        Reading::Network(network) => snapshot.network = network,
        Reading::Host(host) => snapshot.host = host,
        Reading::Sensors(sensors) => snapshot.sensors = sensors,
    }
}

/// Fill in the aggregate CPU percentage
///
/// Without an aggregate reading the total is estimated as the mean of the
/// per-core values. This is an approximation, not a measurement.
fn cpu_stats(reading: CpuReading) -> CpuStats {
    let total_percent = reading
        .total_percent
        .unwrap_or_else(|| mean(&reading.per_cpu_percent));

    CpuStats {
        info: reading.info,
        total_times: reading.total_times,
        per_cpu_times: reading.per_cpu_times,
        total_percent,
        per_cpu_percent: reading.per_cpu_percent,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::MockMetricProvider;
    use crate::core::snapshot::{
        DiskStats, HostStats, LoadStats, MemoryStats, NetworkStats, SensorsStats, VirtualMemory,
    };

    struct StubProvider {
        name: &'static str,
        reading: Option<Reading>,
    }

    impl MetricProvider for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn collect(&self) -> Result<Reading, ProviderError> {
            self.reading
                .clone()
                .ok_or_else(|| ProviderError::read("stub", "source unavailable"))
        }
    }

    fn stub(name: &'static str, reading: Option<Reading>) -> Arc<dyn MetricProvider> {
        Arc::new(StubProvider { name, reading })
    }

    fn readings() -> Vec<(&'static str, Reading)> {
        let memory = MemoryStats {
            virtual_memory: VirtualMemory {
                total: 8 << 30,
                used: 2 << 30,
                used_percent: 25.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let host = HostStats {
            hostname: "edge-01".to_string(),
            procs: 120,
            ..Default::default()
        };

        vec![
            (
                "cpu",
                Reading::Cpu(CpuReading {
                    per_cpu_percent: vec![5.0, 15.0],
                    total_percent: Some(11.0),
                    ..Default::default()
                }),
            ),
            (
                "load",
                Reading::Load(LoadStats {
                    load1: 0.5,
                    load5: 0.25,
                    load15: 0.125,
                }),
            ),
            ("memory", Reading::Memory(memory)),
            ("disk", Reading::Disk(DiskStats::default())),
            ("network", Reading::Network(NetworkStats::default())),
            ("host", Reading::Host(host)),
            ("sensors", Reading::Sensors(SensorsStats::default())),
        ]
    }

    #[tokio::test]
    async fn test_error_count_matches_failing_providers() {
        let all = readings();

        for mask in 0u32..(1 << all.len()) {
            let providers = all
                .iter()
                .enumerate()
                .map(|(i, (name, reading))| {
                    let fails = mask & (1 << i) != 0;
                    stub(*name, if fails { None } else { Some(reading.clone()) })
                })
                .collect();

            let snapshot = Aggregator::new(providers).collect().await;
            assert_eq!(snapshot.errors.len(), mask.count_ones() as usize, "mask {:07b}", mask);

            let load_ok = mask & 0b10 == 0;
            let host_ok = mask & 0b100000 == 0;
            assert_eq!(snapshot.load.load1 == 0.5, load_ok);
            assert_eq!(snapshot.host.hostname == "edge-01", host_ok);
        }
    }

    #[tokio::test]
    async fn test_successful_sections_hold_provider_values() {
        let providers = readings()
            .into_iter()
            .map(|(name, reading)| stub(name, Some(reading)))
            .collect();

        let snapshot = Aggregator::new(providers).collect().await;
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.cpu.total_percent, 11.0);
        assert_eq!(snapshot.cpu.per_cpu_percent, vec![5.0, 15.0]);
        assert_eq!(snapshot.memory.virtual_memory.used_percent, 25.0);
        assert_eq!(snapshot.host.procs, 120);
    }

    #[tokio::test]
    async fn test_all_providers_failing_still_yields_snapshot() {
        let providers = readings()
            .into_iter()
            .map(|(name, _)| stub(name, None))
            .collect();

        let snapshot = Aggregator::new(providers).collect().await;
        assert_eq!(snapshot.errors.len(), 7);
        assert_eq!(snapshot.errors[0], "cpu: stub: source unavailable");
        assert_eq!(snapshot.errors[6], "sensors: stub: source unavailable");

        let mut zeroed = Snapshot::empty(snapshot.captured_at);
        zeroed.errors = snapshot.errors.clone();
        assert_eq!(snapshot, zeroed);
    }

    #[tokio::test]
    async fn test_cpu_total_falls_back_to_per_core_mean() {
        let cpu = stub(
            "cpu",
            Some(Reading::Cpu(CpuReading {
                per_cpu_percent: vec![10.0, 20.0, 30.0],
                total_percent: None,
                ..Default::default()
            })),
        );

        let snapshot = Aggregator::new(vec![cpu]).collect().await;
        assert_eq!(snapshot.cpu.total_percent, 20.0);
        assert!(snapshot.errors.is_empty());
    }

    #[tokio::test]
    async fn test_cpu_total_is_zero_without_any_percentages() {
        let cpu = stub("cpu", Some(Reading::Cpu(CpuReading::default())));

        let snapshot = Aggregator::new(vec![cpu]).collect().await;
        assert_eq!(snapshot.cpu.total_percent, 0.0);
        assert!(snapshot.errors.is_empty());
    }

    struct PanickingProvider;

    impl MetricProvider for PanickingProvider {
        fn name(&self) -> &'static str {
            "sensors"
        }

        fn collect(&self) -> Result<Reading, ProviderError> {
            panic!("sensor driver exploded")
        }
    }

    #[tokio::test]
    async fn test_panicking_provider_is_a_failure() {
        let mut load = MockMetricProvider::new();
        load.expect_name().return_const("load");
        load.expect_collect().times(1).returning(|| {
            Ok(Reading::Load(LoadStats {
                load1: 1.0,
                ..Default::default()
            }))
        });

        let providers: Vec<Arc<dyn MetricProvider>> = vec![Arc::new(PanickingProvider), Arc::new(load)];
        let snapshot = Aggregator::new(providers).collect().await;

        assert_eq!(snapshot.errors, vec!["sensors: provider panicked".to_string()]);
        assert_eq!(snapshot.load.load1, 1.0);
    }

    struct SlowProvider;

    impl MetricProvider for SlowProvider {
        fn name(&self) -> &'static str {
            "disk"
        }

        fn collect(&self) -> Result<Reading, ProviderError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Reading::Disk(DiskStats::default()))
        }
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let aggregator = Aggregator::new(vec![Arc::new(SlowProvider)])
            .with_timeout(Duration::from_millis(20));

        let snapshot = aggregator.collect().await;
        assert_eq!(snapshot.errors, vec!["disk: timed out after 20ms".to_string()]);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
    }
}
