/// Host metric providers
///
/// One provider per snapshot section, backed by sysinfo with the Linux-only
/// details read through `procfs`. CPU, memory and host share one
/// `sysinfo::System` so CPU usage is measured against the previous cycle's
/// refresh.
///
/// A provider fails as a whole when its primary source fails. Secondary
/// sources that do not exist on this platform leave their fields empty.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use sysinfo::{Components, Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};

use super::procfs;
use super::provider::{CpuReading, MetricProvider, ProviderError, Reading};
use super::snapshot::{
    CpuInfo, DiskPartition, DiskStats, DiskUsage, HostStats, LoadStats, MemoryStats, NetInterface,
    NetIo, NetworkStats, SensorsStats, SwapMemory, Temperature, VirtualMemory,
};
use crate::utils::percent;

type SharedSystem = Arc<Mutex<System>>;

/// The standard provider set, in snapshot section order
pub fn host_providers() -> Vec<Arc<dyn MetricProvider>> {
    let mut system = System::new();
    // baseline for the first usage reading
    system.refresh_cpu();
    let primed_at = Instant::now();
    let system = Arc::new(Mutex::new(system));

    vec![
        Arc::new(CpuProvider::new(Arc::clone(&system), primed_at)),
        Arc::new(LoadProvider),
        Arc::new(MemoryProvider::new(Arc::clone(&system))),
        Arc::new(DiskProvider),
        Arc::new(NetworkProvider),
        Arc::new(HostProvider::new(system)),
        Arc::new(SensorsProvider),
    ]
}

/// A provider that panicked mid-refresh leaves `System` usable, so a poisoned
/// lock is recovered rather than reported.
fn lock(system: &SharedSystem) -> MutexGuard<'_, System> {
    system.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Treat a source missing on this platform as empty data
fn or_empty<T: Default>(result: Result<T, ProviderError>) -> Result<T, ProviderError> {
    match result {
        Err(ProviderError::Unsupported) => Ok(T::default()),
        other => other,
    }
}

// ============================================================================
// CPU & load
// ============================================================================

pub struct CpuProvider {
    system: SharedSystem,
    primed_at: Instant,
}

impl CpuProvider {
    fn new(system: SharedSystem, primed_at: Instant) -> Self {
        Self { system, primed_at }
    }
}

/// Time left before a usage refresh measures a meaningful delta
fn settle_wait(since_prime: Duration) -> Duration {
    MINIMUM_CPU_UPDATE_INTERVAL.saturating_sub(since_prime)
}

impl MetricProvider for CpuProvider {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn collect(&self) -> Result<Reading, ProviderError> {
        // only the first cycle after startup ever waits
        let wait = settle_wait(self.primed_at.elapsed());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }

        let mut system = lock(&self.system);
        system.refresh_cpu();

        let cpus = system.cpus();
        if cpus.is_empty() {
            return Err(ProviderError::read("cpu.Info", "no processors reported"));
        }

        let cache_sizes = or_empty(procfs::read_cache_sizes())?;
        let info = cpus
            .iter()
            .enumerate()
            .map(|(i, cpu)| CpuInfo {
                model_name: cpu.brand().trim().to_string(),
                cores: 1,
                mhz: cpu.frequency() as f64,
                cache_size: cache_sizes.get(i).copied().unwrap_or(0),
            })
            .collect();
        let per_cpu_percent: Vec<f64> = cpus.iter().map(|cpu| f64::from(cpu.cpu_usage())).collect();

        let total = f64::from(system.global_cpu_info().cpu_usage());
        let total_percent = total.is_finite().then_some(total);

        let (total_times, per_cpu_times) = or_empty(procfs::read_cpu_times())?;

        Ok(Reading::Cpu(CpuReading {
            info,
            per_cpu_percent,
            total_percent,
            total_times,
            per_cpu_times,
        }))
    }
}

pub struct LoadProvider;

impl MetricProvider for LoadProvider {
    fn name(&self) -> &'static str {
        "load"
    }

    fn collect(&self) -> Result<Reading, ProviderError> {
        let avg = System::load_average();
        Ok(Reading::Load(LoadStats {
            load1: avg.one,
            load5: avg.five,
            load15: avg.fifteen,
        }))
    }
}

// ============================================================================
// Memory
// ============================================================================

pub struct MemoryProvider {
    system: SharedSystem,
}

impl MemoryProvider {
    fn new(system: SharedSystem) -> Self {
        Self { system }
    }
}

impl MetricProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn collect(&self) -> Result<Reading, ProviderError> {
        let mut system = lock(&self.system);
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(ProviderError::read("mem.VirtualMemory", "total memory reported as zero"));
        }

        let breakdown = or_empty(procfs::read_meminfo())?;
        let used = system.used_memory();
        let virtual_memory = VirtualMemory {
            total,
            available: system.available_memory(),
            used,
            free: system.free_memory(),
            buffers: breakdown.buffers,
            cached: breakdown.cached,
            active: breakdown.active,
            inactive: breakdown.inactive,
            used_percent: percent(used, total),
        };

        let swap_total = system.total_swap();
        let swap_used = system.used_swap();
        let swap = SwapMemory {
            total: swap_total,
            used: swap_used,
            free: system.free_swap(),
            used_percent: percent(swap_used, swap_total),
        };

        Ok(Reading::Memory(MemoryStats {
            virtual_memory,
            swap,
        }))
    }
}

// ============================================================================
// Disk & network
// ============================================================================

pub struct DiskProvider;

impl MetricProvider for DiskProvider {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn collect(&self) -> Result<Reading, ProviderError> {
        let disks = Disks::new_with_refreshed_list();
        let mut stats = DiskStats::default();

        for disk in disks.list() {
            let device = disk.name().to_string_lossy().to_string();
            let mountpoint = disk.mount_point().display().to_string();
            let fs_type = disk.file_system().to_string_lossy().to_string();

            stats.usage.push(disk_usage(
                &device,
                &mountpoint,
                &fs_type,
                disk.total_space(),
                disk.available_space(),
            ));
            stats.partitions.push(DiskPartition {
                device,
                mountpoint,
                fs_type,
            });
        }

        stats.io = or_empty(procfs::read_disk_io())?;
        Ok(Reading::Disk(stats))
    }
}

fn disk_usage(device: &str, mountpoint: &str, fs_type: &str, total: u64, free: u64) -> DiskUsage {
    let used = total.saturating_sub(free);
    DiskUsage {
        device: device.to_string(),
        mountpoint: mountpoint.to_string(),
        fs_type: fs_type.to_string(),
        total,
        used,
        free,
        used_percent: percent(used, total),
    }
}

pub struct NetworkProvider;

impl MetricProvider for NetworkProvider {
    fn name(&self) -> &'static str {
        "network"
    }

    fn collect(&self) -> Result<Reading, ProviderError> {
        let networks = Networks::new_with_refreshed_list();
        let drops = or_empty(procfs::read_net_drops())?;
        let mut addrs = or_empty(procfs::interface_addrs())?;
        let mut stats = NetworkStats::default();

        for (name, data) in networks.iter() {
            let dropped = drops.get(name).copied().unwrap_or_default();
            add_counters(
                &mut stats.totals,
                &NetIo {
                    bytes_sent: data.total_transmitted(),
                    bytes_recv: data.total_received(),
                    packets_sent: data.total_packets_transmitted(),
                    packets_recv: data.total_packets_received(),
                    err_in: data.total_errors_on_received(),
                    err_out: data.total_errors_on_transmitted(),
                    drop_in: dropped.drop_in,
                    drop_out: dropped.drop_out,
                },
            );

            stats.interfaces.push(NetInterface {
                name: name.clone(),
                mtu: procfs::interface_mtu(name),
                hardware_addr: data.mac_address().to_string(),
                flags: procfs::interface_flags(name),
                addrs: addrs.remove(name).unwrap_or_default(),
            });
        }

        stats.interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Reading::Network(stats))
    }
}

fn add_counters(totals: &mut NetIo, io: &NetIo) {
    totals.bytes_sent += io.bytes_sent;
    totals.bytes_recv += io.bytes_recv;
    totals.packets_sent += io.packets_sent;
    totals.packets_recv += io.packets_recv;
    totals.err_in += io.err_in;
    totals.err_out += io.err_out;
    totals.drop_in += io.drop_in;
    totals.drop_out += io.drop_out;
}

// ============================================================================
// Host & sensors
// ============================================================================

pub struct HostProvider {
    system: SharedSystem,
}

impl HostProvider {
    fn new(system: SharedSystem) -> Self {
        Self { system }
    }
}

impl MetricProvider for HostProvider {
    fn name(&self) -> &'static str {
        "host"
    }

    fn collect(&self) -> Result<Reading, ProviderError> {
        let hostname = System::host_name()
            .ok_or_else(|| ProviderError::read("host.Info", "hostname unavailable"))?;

        let procs = {
            let mut system = lock(&self.system);
            system.refresh_processes();
            system.processes().len() as u64
        };

        let platform = System::distribution_id();
        let (virtualization_system, virtualization_role) = procfs::detect_virtualization();

        Ok(Reading::Host(HostStats {
            hostname,
            os: std::env::consts::OS.to_string(),
            platform_family: procfs::platform_family(&platform).to_string(),
            platform,
            platform_version: System::os_version().unwrap_or_default(),
            kernel_version: System::kernel_version().unwrap_or_default(),
            kernel_arch: std::env::consts::ARCH.to_string(),
            uptime_seconds: System::uptime(),
            boot_time: System::boot_time(),
            procs,
            virtualization_system,
            virtualization_role,
            users: or_empty(procfs::read_users())?,
        }))
    }
}

pub struct SensorsProvider;

impl MetricProvider for SensorsProvider {
    fn name(&self) -> &'static str {
        "sensors"
    }

    fn collect(&self) -> Result<Reading, ProviderError> {
        let components = Components::new_with_refreshed_list();
        let temperatures = components
            .list()
            .iter()
            .map(|component| {
                temperature(
                    component.label(),
                    component.temperature(),
                    component.max(),
                    component.critical(),
                )
            })
            .collect();

        // sysinfo exposes no fan readings
        Ok(Reading::Sensors(SensorsStats {
            temperatures,
            fans: Vec::new(),
        }))
    }
}

/// sysinfo reports a failed sensor read as NaN; that reads as 0 here
fn temperature(label: &str, value: f32, max: f32, critical: Option<f32>) -> Temperature {
    let celsius = |v: f32| if v.is_finite() { f64::from(v) } else { 0.0 };

    Temperature {
        sensor_key: label.to_string(),
        value: celsius(value),
        high: celsius(max),
        critical: critical.map(celsius).unwrap_or(0.0),
    }
}
