/// Snapshot data model
///
/// One `Snapshot` is one complete sampling pass. Every section is always
/// present; a section whose provider failed keeps its zero value and the
/// failure is listed in `errors`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "timestamp", with = "rfc3339_nanos")]
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub cpu: CpuStats,
    #[serde(default)]
    pub load: LoadStats,
    #[serde(default)]
    pub memory: MemoryStats,
    #[serde(default)]
    pub disk: DiskStats,
    #[serde(default)]
    pub network: NetworkStats,
    #[serde(default)]
    pub host: HostStats,
    #[serde(default)]
    pub sensors: SensorsStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Snapshot {
    /// Empty snapshot stamped with `captured_at`
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            cpu: CpuStats::default(),
            load: LoadStats::default(),
            memory: MemoryStats::default(),
            disk: DiskStats::default(),
            network: NetworkStats::default(),
            host: HostStats::default(),
            sensors: SensorsStats::default(),
            errors: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Serialize to the JSON wire payload
    ///
    /// JSON has no NaN or infinity. serde_json would write them as `null`,
    /// which no reader of the payload accepts, so they fail the encode.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        self.check_finite()?;
        Ok(serde_json::to_vec(self)?)
    }

    fn check_finite(&self) -> Result<(), EncodeError> {
        for (i, info) in self.cpu.info.iter().enumerate() {
            finite(info.mhz, || format!("cpu.info[{}].mhz", i))?;
        }
        self.cpu.total_times.check_finite("cpu.total_times")?;
        for (i, times) in self.cpu.per_cpu_times.iter().enumerate() {
            times.check_finite(&format!("cpu.per_cpu_times[{}]", i))?;
        }
        finite(self.cpu.total_percent, || "cpu.total_percent".to_string())?;
        for (i, value) in self.cpu.per_cpu_percent.iter().enumerate() {
            finite(*value, || format!("cpu.per_cpu_percent[{}]", i))?;
        }

        finite(self.load.load1, || "load.load1".to_string())?;
        finite(self.load.load5, || "load.load5".to_string())?;
        finite(self.load.load15, || "load.load15".to_string())?;

        finite(self.memory.virtual_memory.used_percent, || "memory.virtual.used_percent".to_string())?;
        finite(self.memory.swap.used_percent, || "memory.swap.used_percent".to_string())?;

        for (i, usage) in self.disk.usage.iter().enumerate() {
            finite(usage.used_percent, || format!("disk.usage[{}].used_percent", i))?;
        }

        for (i, temp) in self.sensors.temperatures.iter().enumerate() {
            finite(temp.value, || format!("sensors.temperatures[{}].value", i))?;
            finite(temp.high, || format!("sensors.temperatures[{}].high", i))?;
            finite(temp.critical, || format!("sensors.temperatures[{}].critical", i))?;
        }
        for (i, fan) in self.sensors.fans.iter().enumerate() {
            finite(fan.value, || format!("sensors.fans[{}].value", i))?;
        }

        Ok(())
    }

    /// Copy of one section, tagged with this snapshot's timestamp
    pub fn section(&self, section: Section) -> SectionView {
        let data = match section {
            Section::Cpu => SectionData::Cpu(self.cpu.clone()),
            Section::Load => SectionData::Load(self.load.clone()),
            Section::Memory => SectionData::Memory(self.memory.clone()),
            Section::Disk => SectionData::Disk(self.disk.clone()),
            Section::Network => SectionData::Network(self.network.clone()),
            Section::Host => SectionData::Host(self.host.clone()),
            Section::Sensors => SectionData::Sensors(self.sensors.clone()),
        };

        SectionView {
            captured_at: self.captured_at,
            data,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{0} is not a finite number")]
    NonFinite(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn finite(value: f64, field: impl FnOnce() -> String) -> Result<(), EncodeError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EncodeError::NonFinite(field()))
    }
}

mod rfc3339_nanos {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Sections
// ============================================================================

/// The fixed set of metric groups in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Cpu,
    Load,
    Memory,
    Disk,
    Network,
    Host,
    Sensors,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::Cpu,
        Section::Load,
        Section::Memory,
        Section::Disk,
        Section::Network,
        Section::Host,
        Section::Sensors,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Section::Cpu => "cpu",
            Section::Load => "load",
            Section::Memory => "memory",
            Section::Disk => "disk",
            Section::Network => "network",
            Section::Host => "host",
            Section::Sensors => "sensors",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric section: {0}")]
pub struct UnknownSection(pub String);

impl FromStr for Section {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Section::Cpu),
            "load" => Ok(Section::Load),
            "memory" | "mem" => Ok(Section::Memory),
            "disk" => Ok(Section::Disk),
            "network" | "net" => Ok(Section::Network),
            // "system" is the historical name of the host group
            "host" | "system" => Ok(Section::Host),
            "sensors" => Ok(Section::Sensors),
            _ => Err(UnknownSection(s.to_string())),
        }
    }
}

/// One section of a stored snapshot, as served by per-domain read paths
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionView {
    #[serde(rename = "timestamp", serialize_with = "rfc3339_nanos::serialize")]
    pub captured_at: DateTime<Utc>,
    pub data: SectionData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SectionData {
    Cpu(CpuStats),
    Load(LoadStats),
    Memory(MemoryStats),
    Disk(DiskStats),
    Network(NetworkStats),
    Host(HostStats),
    Sensors(SensorsStats),
}

// ============================================================================
// CPU
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    pub info: Vec<CpuInfo>,
    pub total_times: CpuTimes,
    pub per_cpu_times: Vec<CpuTimes>,
    pub total_percent: f64,
    pub per_cpu_percent: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuInfo {
    pub model_name: String,
    pub cores: u32,
    pub mhz: f64,
    pub cache_size: u32,
}

/// Cumulative CPU time in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuTimes {
    pub user: f64,
    pub system: f64,
    pub idle: f64,
    pub nice: f64,
    pub iowait: f64,
    pub irq: f64,
    pub soft_irq: f64,
    pub steal: f64,
    pub guest: f64,
    pub guest_nice: f64,
}

impl CpuTimes {
    fn check_finite(&self, prefix: &str) -> Result<(), EncodeError> {
        let fields = [
            ("user", self.user),
            ("system", self.system),
            ("idle", self.idle),
            ("nice", self.nice),
            ("iowait", self.iowait),
            ("irq", self.irq),
            ("soft_irq", self.soft_irq),
            ("steal", self.steal),
            ("guest", self.guest),
            ("guest_nice", self.guest_nice),
        ];
        for (name, value) in fields {
            finite(value, || format!("{}.{}", prefix, name))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadStats {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStats {
    #[serde(rename = "virtual")]
    pub virtual_memory: VirtualMemory,
    pub swap: SwapMemory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMemory {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub free: u64,
    pub buffers: u64,
    pub cached: u64,
    pub active: u64,
    pub inactive: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapMemory {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

// ============================================================================
// Disk
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskStats {
    pub partitions: Vec<DiskPartition>,
    pub usage: Vec<DiskUsage>,
    pub io: Vec<DiskIo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskPartition {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskUsage {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskIo {
    pub device: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub read_time_ms: u64,
    pub write_time_ms: u64,
}

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkStats {
    pub interfaces: Vec<NetInterface>,
    pub totals: NetIo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetInterface {
    pub name: String,
    pub mtu: u32,
    pub hardware_addr: String,
    pub flags: Vec<String>,
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetIo {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub err_in: u64,
    pub err_out: u64,
    pub drop_in: u64,
    pub drop_out: u64,
}

// ============================================================================
// Host & sensors
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostStats {
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub platform_family: String,
    pub platform_version: String,
    pub kernel_version: String,
    pub kernel_arch: String,
    pub uptime_seconds: u64,
    pub boot_time: u64,
    pub procs: u64,
    pub virtualization_system: String,
    pub virtualization_role: String,
    pub users: Vec<HostUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostUser {
    pub user: String,
    pub terminal: String,
    pub host: String,
    pub started_unix: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsStats {
    pub temperatures: Vec<Temperature>,
    pub fans: Vec<Fan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Temperature {
    pub sensor_key: String,
    pub value: f64,
    pub high: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fan {
    pub sensor_key: String,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::empty(Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap());
        snapshot.cpu.total_percent = 42.5;
        snapshot.load.load1 = 0.75;
        snapshot
    }

    #[test]
    fn test_section_names_parse_back() {
        for section in Section::ALL {
            assert_eq!(section.name().parse::<Section>(), Ok(section));
        }
        assert_eq!("system".parse::<Section>(), Ok(Section::Host));
        assert_eq!(" CPU ".parse::<Section>(), Ok(Section::Cpu));
        assert!("gpu".parse::<Section>().is_err());
    }

    #[test]
    fn test_errors_omitted_when_empty() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("errors").is_none());
        assert_eq!(json["timestamp"], "2026-02-15T00:00:00Z");
        assert_eq!(json["memory"]["virtual"]["total"], 0);
    }

    #[test]
    fn test_decode_fills_missing_fields_with_zero_values() {
        let payload = r#"{
            "timestamp": "2026-02-15T00:00:00.123456789Z",
            "cpu": {"total_percent": 12.5},
            "load": {}, "memory": {}, "disk": {}, "network": {}, "host": {}, "sensors": {}
        }"#;

        let snapshot: Snapshot = serde_json::from_str(payload).unwrap();
        assert_eq!(snapshot.cpu.total_percent, 12.5);
        assert!(snapshot.cpu.per_cpu_percent.is_empty());
        assert!(snapshot.errors.is_empty());
        assert_eq!(snapshot.captured_at.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn test_encode_matches_serde_json() {
        let snapshot = sample();
        assert_eq!(snapshot.encode().unwrap(), serde_json::to_vec(&snapshot).unwrap());
    }

    #[test]
    fn test_encode_rejects_non_finite_floats() {
        let mut snapshot = sample();
        snapshot.sensors.temperatures.push(Temperature {
            sensor_key: "acpitz".to_string(),
            value: 41.0,
            high: f64::NAN,
            critical: 95.0,
        });

        match snapshot.encode() {
            Err(EncodeError::NonFinite(field)) => assert_eq!(field, "sensors.temperatures[0].high"),
            other => panic!("expected a non-finite error, got {:?}", other),
        }

        let mut snapshot = sample();
        snapshot.cpu.per_cpu_times.push(CpuTimes {
            steal: f64::INFINITY,
            ..Default::default()
        });
        let err = snapshot.encode().unwrap_err();
        assert_eq!(err.to_string(), "cpu.per_cpu_times[0].steal is not a finite number");
    }

    #[test]
    fn test_section_view_serializes_timestamp_and_data() {
        let view = sample().section(Section::Load);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["timestamp"], "2026-02-15T00:00:00Z");
        assert_eq!(json["data"]["load1"], 0.75);
    }
}
