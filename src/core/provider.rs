/// Metric provider capability
///
/// A provider reads one metric domain and either returns a typed reading or
/// fails on its own. The aggregator iterates a fixed list of providers and
/// never lets one failure touch another domain.

use thiserror::Error;

use super::snapshot::{
    CpuInfo, CpuTimes, DiskStats, HostStats, LoadStats, MemoryStats, NetworkStats, SensorsStats,
};

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The underlying OS source could not be read
    #[error("{source_name}: {message}")]
    Source {
        source_name: &'static str,
        message: String,
    },

    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    #[error("unsupported on this platform")]
    Unsupported,
}

impl ProviderError {
    pub fn read(source_name: &'static str, message: impl Into<String>) -> Self {
        ProviderError::Source {
            source_name,
            message: message.into(),
        }
    }
}

/// CPU figures as read from the host
///
/// `total_percent` is `None` when the aggregate figure could not be read;
/// the aggregator then derives it from `per_cpu_percent`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuReading {
    pub info: Vec<CpuInfo>,
    pub per_cpu_percent: Vec<f64>,
    pub total_percent: Option<f64>,
    pub total_times: CpuTimes,
    pub per_cpu_times: Vec<CpuTimes>,
}

/// A successful provider result, one variant per snapshot section
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Cpu(CpuReading),
    Load(LoadStats),
    Memory(MemoryStats),
    Disk(DiskStats),
    Network(NetworkStats),
    Host(HostStats),
    Sensors(SensorsStats),
}

/// One metric domain
///
/// `collect` is synchronous and is run on the blocking pool by the
/// aggregator, which also bounds it with a timeout.
#[cfg_attr(test, mockall::automock)]
pub trait MetricProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn collect(&self) -> Result<Reading, ProviderError>;
}
