/// Readers for host sources sysinfo does not cover
///
/// CPU times, cache sizes, disk I/O counters, memory breakdown and interface
/// drop counters come from `/proc`, interface details from `/sys/class/net`
/// and `getifaddrs`, logged-in users from `who`. Parsing is kept separate
/// from reading so it can be tested on any host. Off Linux the `/proc`
/// readers return `ProviderError::Unsupported`.

use chrono::{Local, NaiveDateTime, TimeZone};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::process::Command;

use super::provider::ProviderError;
use super::snapshot::{CpuTimes, DiskIo, HostUser};

/// Clock ticks per second used by /proc/stat (USER_HZ)
const USER_HZ: f64 = 100.0;

/// /proc/diskstats counts 512-byte sectors regardless of the device
const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemInfoBreakdown {
    pub buffers: u64,
    pub cached: u64,
    pub active: u64,
    pub inactive: u64,
}

/// Packets dropped on one interface, from /proc/net/dev
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetDrops {
    pub drop_in: u64,
    pub drop_out: u64,
}

// ============================================================================
// Parsers
// ============================================================================

/// Parse /proc/stat into aggregate and per-CPU times
pub fn parse_proc_stat(text: &str) -> Result<(CpuTimes, Vec<CpuTimes>), ProviderError> {
    let mut total = None;
    let mut per_cpu = Vec::new();

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let label = match fields.next() {
            Some(label) if label.starts_with("cpu") => label,
            _ => continue,
        };

        let ticks: Vec<f64> = fields.filter_map(|f| f.parse::<f64>().ok()).collect();
        if ticks.len() < 4 {
            return Err(ProviderError::read("cpu.Times", format!("malformed line: {}", line)));
        }

        let at = |i: usize| ticks.get(i).copied().unwrap_or(0.0) / USER_HZ;
        let times = CpuTimes {
            user: at(0),
            nice: at(1),
            system: at(2),
            idle: at(3),
            iowait: at(4),
            irq: at(5),
            soft_irq: at(6),
            steal: at(7),
            guest: at(8),
            guest_nice: at(9),
        };

        if label == "cpu" {
            total = Some(times);
        } else {
            per_cpu.push(times);
        }
    }

    let total = total.ok_or_else(|| ProviderError::read("cpu.Times", "no aggregate cpu line"))?;
    Ok((total, per_cpu))
}

/// Parse /proc/diskstats
pub fn parse_diskstats(text: &str) -> Vec<DiskIo> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 11 {
                return None;
            }

            let num = |i: usize| fields[i].parse::<u64>().unwrap_or(0);
            Some(DiskIo {
                device: fields[2].to_string(),
                read_count: num(3),
                read_bytes: num(5) * SECTOR_SIZE,
                read_time_ms: num(6),
                write_count: num(7),
                write_bytes: num(9) * SECTOR_SIZE,
                write_time_ms: num(10),
            })
        })
        .collect()
}

/// Parse the buffer/cache/active/inactive fields of /proc/meminfo, in bytes
pub fn parse_meminfo(text: &str) -> MemInfoBreakdown {
    let mut breakdown = MemInfoBreakdown::default();

    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kib = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        match key.trim() {
            "Buffers" => breakdown.buffers = kib * 1024,
            "Cached" => breakdown.cached = kib * 1024,
            "Active" => breakdown.active = kib * 1024,
            "Inactive" => breakdown.inactive = kib * 1024,
            _ => {}
        }
    }

    breakdown
}

/// Per-processor L2 cache size in KB, in /proc/cpuinfo order
pub fn parse_cpuinfo_cache_sizes(text: &str) -> Vec<u32> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim() != "cache size" {
                return None;
            }
            Some(
                value
                    .split_whitespace()
                    .next()
                    .and_then(|kb| kb.parse().ok())
                    .unwrap_or(0),
            )
        })
        .collect()
}

/// Parse the receive and transmit drop columns of /proc/net/dev
pub fn parse_net_dev(text: &str) -> BTreeMap<String, NetDrops> {
    text.lines()
        .filter_map(|line| {
            // the two header lines have no "iface:" prefix
            let (name, counters) = line.split_once(':')?;
            let fields: Vec<u64> = counters
                .split_whitespace()
                .map(|f| f.parse().ok())
                .collect::<Option<_>>()?;
            if fields.len() < 16 {
                return None;
            }

            Some((
                name.trim().to_string(),
                NetDrops {
                    drop_in: fields[3],
                    drop_out: fields[11],
                },
            ))
        })
        .collect()
}

/// `addr/prefix` notation, prefix length taken from the netmask
pub fn cidr(addr: IpAddr, netmask: Option<IpAddr>) -> String {
    let prefix = match netmask {
        Some(IpAddr::V4(mask)) => u32::from(mask).count_ones(),
        Some(IpAddr::V6(mask)) => u128::from(mask).count_ones(),
        None if addr.is_ipv4() => 32,
        None => 128,
    };
    format!("{}/{}", addr, prefix)
}

/// Parse `who` output (`user terminal YYYY-MM-DD HH:MM [(host)]`)
pub fn parse_who(text: &str) -> Vec<HostUser> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }

            let started = NaiveDateTime::parse_from_str(&format!("{} {}", fields[2], fields[3]), "%Y-%m-%d %H:%M")
                .ok()
                .and_then(|naive| Local.from_local_datetime(&naive).earliest())
                .map(|dt| dt.timestamp())
                .unwrap_or(0);

            let host = fields
                .get(4)
                .filter(|f| f.starts_with('(') && f.ends_with(')'))
                .map(|f| f.trim_matches(|c| c == '(' || c == ')').to_string())
                .unwrap_or_default();

            Some(HostUser {
                user: fields[0].to_string(),
                terminal: fields[1].to_string(),
                host,
                started_unix: started,
            })
        })
        .collect()
}

/// Map a distribution id from os-release onto its family
pub fn platform_family(distribution_id: &str) -> &'static str {
    match distribution_id {
        "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" => "debian",
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" | "ol" => "rhel",
        "sles" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" => "suse",
        "alpine" => "alpine",
        "arch" | "manjaro" => "arch",
        "macos" => "Standalone Workstation",
        _ => "",
    }
}

/// Virtualization system from a DMI vendor string
pub fn virtualization_from_vendor(vendor: &str) -> &'static str {
    let vendor = vendor.trim().to_ascii_lowercase();
    if vendor.contains("qemu") || vendor.contains("kvm") {
        "kvm"
    } else if vendor.contains("vmware") {
        "vmware"
    } else if vendor.contains("microsoft") {
        "hyperv"
    } else if vendor.contains("xen") {
        "xen"
    } else if vendor.contains("innotek") || vendor.contains("virtualbox") {
        "vbox"
    } else {
        ""
    }
}

// ============================================================================
// Readers
// ============================================================================

fn read_proc(source_name: &'static str, path: &str) -> Result<String, ProviderError> {
    if !cfg!(target_os = "linux") {
        return Err(ProviderError::Unsupported);
    }
    std::fs::read_to_string(path).map_err(|err| ProviderError::Io(source_name, err))
}

pub fn read_cpu_times() -> Result<(CpuTimes, Vec<CpuTimes>), ProviderError> {
    parse_proc_stat(&read_proc("cpu.Times", "/proc/stat")?)
}

pub fn read_disk_io() -> Result<Vec<DiskIo>, ProviderError> {
    Ok(parse_diskstats(&read_proc("disk.IOCounters", "/proc/diskstats")?))
}

pub fn read_meminfo() -> Result<MemInfoBreakdown, ProviderError> {
    Ok(parse_meminfo(&read_proc("mem.VirtualMemory", "/proc/meminfo")?))
}

pub fn read_cache_sizes() -> Result<Vec<u32>, ProviderError> {
    Ok(parse_cpuinfo_cache_sizes(&read_proc("cpu.Info", "/proc/cpuinfo")?))
}

pub fn read_net_drops() -> Result<BTreeMap<String, NetDrops>, ProviderError> {
    Ok(parse_net_dev(&read_proc("net.IOCounters", "/proc/net/dev")?))
}

/// Addresses of every interface, keyed by interface name
#[cfg(unix)]
pub fn interface_addrs() -> Result<BTreeMap<String, Vec<String>>, ProviderError> {
    use nix::ifaddrs::getifaddrs;
    use nix::sys::socket::SockaddrStorage;
    use std::net::{SocketAddrV4, SocketAddrV6};

    fn ip(storage: &SockaddrStorage) -> Option<IpAddr> {
        if let Some(sin) = storage.as_sockaddr_in() {
            return Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()));
        }
        storage
            .as_sockaddr_in6()
            .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
    }

    let entries = getifaddrs().map_err(|errno| ProviderError::Io("net.Interfaces", errno.into()))?;
    let mut addrs: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for entry in entries {
        // link-layer entries carry no IP address
        let Some(addr) = entry.address.as_ref().and_then(ip) else {
            continue;
        };
        let netmask = entry.netmask.as_ref().and_then(ip);
        addrs
            .entry(entry.interface_name)
            .or_default()
            .push(cidr(addr, netmask));
    }

    Ok(addrs)
}

#[cfg(not(unix))]
pub fn interface_addrs() -> Result<BTreeMap<String, Vec<String>>, ProviderError> {
    Err(ProviderError::Unsupported)
}

pub fn read_users() -> Result<Vec<HostUser>, ProviderError> {
    let output = match Command::new("who").output() {
        Ok(output) => output,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(ProviderError::Unsupported),
        Err(err) => return Err(ProviderError::Io("host.Users", err)),
    };

    if !output.status.success() {
        return Err(ProviderError::read(
            "host.Users",
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(parse_who(&String::from_utf8_lossy(&output.stdout)))
}

/// MTU of a network interface, when sysfs exposes it
pub fn interface_mtu(name: &str) -> u32 {
    std::fs::read_to_string(Path::new("/sys/class/net").join(name).join("mtu"))
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Link flags of a network interface
pub fn interface_flags(name: &str) -> Vec<String> {
    let base = Path::new("/sys/class/net").join(name);
    let mut flags = Vec::new();

    if let Ok(state) = std::fs::read_to_string(base.join("operstate")) {
        if state.trim() == "up" {
            flags.push("up".to_string());
        }
    }
    if name == "lo" {
        flags.push("loopback".to_string());
    }

    flags
}

/// (system, role) of the virtualization this host runs under, if any
pub fn detect_virtualization() -> (String, String) {
    if Path::new("/.dockerenv").exists() {
        return ("docker".to_string(), "guest".to_string());
    }
    if Path::new("/run/.containerenv").exists() {
        return ("podman".to_string(), "guest".to_string());
    }

    let vendor = std::fs::read_to_string("/sys/class/dmi/id/sys_vendor").unwrap_or_default();
    let system = virtualization_from_vendor(&vendor);
    if system.is_empty() {
        return (String::new(), String::new());
    }

    (system.to_string(), "guest".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_stat() {
        let sample = "\
cpu  4705 150 1120 16250 520 0 30 0 0 0
cpu0 2350 75 560 8125 260 0 15 0 0 0
cpu1 2355 75 560 8125 260 0 15 0 0 0
intr 114930548 113199788 3 0 5 263 0 4 [...]
ctxt 1990473
";
        let (total, per_cpu) = parse_proc_stat(sample).unwrap();
        assert_eq!(total.user, 47.05);
        assert_eq!(total.idle, 162.5);
        assert_eq!(total.soft_irq, 0.3);
        assert_eq!(per_cpu.len(), 2);
        assert_eq!(per_cpu[1].user, 23.55);
    }

    #[test]
    fn test_parse_proc_stat_without_aggregate_line() {
        assert!(parse_proc_stat("intr 1 2 3\n").is_err());
        assert!(parse_proc_stat("cpu 1 2\n").is_err());
    }

    #[test]
    fn test_parse_diskstats() {
        let sample = "\
   8       0 sda 1200 30 48000 900 800 20 16000 1500 0 2000 2400
   7       0 loop0 10 0 20 1 0 0 0 0 0 1 1
 short line
";
        let io = parse_diskstats(sample);
        assert_eq!(io.len(), 2);
        assert_eq!(io[0].device, "sda");
        assert_eq!(io[0].read_count, 1200);
        assert_eq!(io[0].read_bytes, 48000 * 512);
        assert_eq!(io[0].write_bytes, 16000 * 512);
        assert_eq!(io[0].write_time_ms, 1500);
    }

    #[test]
    fn test_parse_meminfo() {
        let sample = "\
MemTotal:       16314444 kB
Buffers:          204800 kB
Cached:          4096000 kB
SwapCached:            0 kB
Active:          6000000 kB
Inactive:        3000000 kB
";
        let breakdown = parse_meminfo(sample);
        assert_eq!(breakdown.buffers, 204_800 * 1024);
        assert_eq!(breakdown.cached, 4_096_000 * 1024);
        assert_eq!(breakdown.active, 6_000_000 * 1024);
        assert_eq!(breakdown.inactive, 3_000_000 * 1024);
    }

    #[test]
    fn test_parse_cpuinfo_cache_sizes() {
        let sample = "\
processor\t: 0
model name\t: Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz
cache size\t: 6144 KB

processor\t: 1
model name\t: Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz
cache size\t: 6144 KB
";
        assert_eq!(parse_cpuinfo_cache_sizes(sample), vec![6144, 6144]);

        // ARM kernels do not report a cache size
        assert!(parse_cpuinfo_cache_sizes("processor\t: 0\nBogoMIPS\t: 108.00\n").is_empty());
    }

    #[test]
    fn test_parse_net_dev() {
        let sample = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 2776770   11307    0    0    0     0          0         0  2776770   11307    0    0    0     0       0          0
  eth0: 1215645    2751    0   17    0     0          0         0  1782404    4324    0    3    0   427       0          0
";
        let drops = parse_net_dev(sample);
        assert_eq!(drops.len(), 2);
        assert_eq!(drops["lo"], NetDrops::default());
        assert_eq!(drops["eth0"], NetDrops { drop_in: 17, drop_out: 3 });
    }

    #[test]
    fn test_cidr() {
        let addr: IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(cidr(addr, Some("255.255.255.0".parse().unwrap())), "192.168.1.20/24");
        assert_eq!(cidr(addr, None), "192.168.1.20/32");

        let addr: IpAddr = "fe80::1".parse().unwrap();
        assert_eq!(cidr(addr, Some("ffff:ffff:ffff:ffff::".parse().unwrap())), "fe80::1/64");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_loopback_has_an_address() {
        let addrs = interface_addrs().unwrap();
        assert!(addrs.get("lo").map_or(false, |lo| lo.iter().any(|a| a == "127.0.0.1/8")));
    }

    #[test]
    fn test_parse_who() {
        let sample = "\
alice    pts/0        2026-02-15 09:12 (10.0.0.5)
bob      tty1         2026-02-15 08:00
";
        let users = parse_who(sample);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user, "alice");
        assert_eq!(users[0].terminal, "pts/0");
        assert_eq!(users[0].host, "10.0.0.5");
        assert!(users[0].started_unix > 0);
        assert_eq!(users[1].host, "");
    }

    #[test]
    fn test_platform_family() {
        assert_eq!(platform_family("ubuntu"), "debian");
        assert_eq!(platform_family("rocky"), "rhel");
        assert_eq!(platform_family("gentoo"), "");
    }

    #[test]
    fn test_virtualization_from_vendor() {
        assert_eq!(virtualization_from_vendor("QEMU\n"), "kvm");
        assert_eq!(virtualization_from_vendor("VMware, Inc."), "vmware");
        assert_eq!(virtualization_from_vendor("Dell Inc."), "");
    }
}
