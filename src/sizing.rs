//! Сведения о системе и рекомендации по настройке сервисов
//!
//! [`recommend`] - чистая функция без ввода-вывода: по объему памяти и числу
//! ядер она выдает размеры пулов PHP-FPM, буферов MySQL, лимиты Redis и т.д.
//! Остальные функции модуля опрашивают хост.

use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{host::Host, php, response::Transcript, utils};

/// Объем памяти, на который рассчитываем, если `free` не ответил
const FALLBACK_MEMORY_MB: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub tier: String,
    pub fpm_max_children: u64,
    pub fpm_start_servers: u64,
    pub fpm_min_spare_servers: u64,
    pub fpm_max_spare_servers: u64,
    pub mysql_buffer_pool_mb: u64,
    pub mysql_max_connections: u64,
    pub redis_max_memory_mb: u64,
    pub opcache_memory_mb: u64,
    pub nginx_worker_processes: u64,
    pub nginx_worker_connections: u64,
    pub swap_recommended_gb: u64,
}

/// Рассчитывает настройки сервисов по объему памяти (МБ) и числу ядер
pub fn recommend(ram_mb: u64, cpu_cores: u64) -> Recommendation {
    let fpm_max_children = (ram_mb / 30).clamp(5, 500);
    let swap_recommended_gb = if ram_mb >= 2048 {
        0
    } else {
        (4096 / ram_mb.max(1)).clamp(1, 4)
    };

    Recommendation {
        tier: tier(ram_mb).to_string(),
        fpm_max_children,
        fpm_start_servers: fpm_max_children / 4,
        fpm_min_spare_servers: fpm_max_children / 4,
        fpm_max_spare_servers: fpm_max_children / 2,
        mysql_buffer_pool_mb: (ram_mb / 4).max(128),
        mysql_max_connections: cpu_cores.saturating_mul(50).clamp(50, 500),
        redis_max_memory_mb: (ram_mb.saturating_mul(15) / 100).clamp(64, 4096),
        opcache_memory_mb: match ram_mb {
            r if r >= 4096 => 512,
            r if r >= 2048 => 256,
            _ => 128,
        },
        nginx_worker_processes: cpu_cores.max(1),
        nginx_worker_connections: if ram_mb >= 2048 { 4096 } else { 1024 },
        swap_recommended_gb,
    }
}

fn tier(ram_mb: u64) -> &'static str {
    match ram_mb {
        r if r < 1024 => "Nano (512MB)",
        r if r < 2048 => "Micro (1GB)",
        r if r < 4096 => "Small (2GB)",
        r if r < 8192 => "Medium (4GB)",
        r if r < 16384 => "Large (8GB)",
        _ => "Enterprise (16GB+)",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub ram_mb: u64,
    pub cpu_cores: u64,
    pub disk_free_gb: Option<u64>,
    pub os_name: String,
    pub os_version: String,
    pub php_version: Option<String>,
    pub public_ip: String,
}

/// Общий объем памяти из вывода `free -m`
pub fn parse_free_mb(output: &str) -> Option<u64> {
    output
        .lines()
        .find(|line| line.starts_with("Mem:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

/// Свободное место из вывода `df -BG --output=avail /`
pub fn parse_df_gb(output: &str) -> Option<u64> {
    output
        .lines()
        .last()
        .map(|line| line.trim().trim_end_matches('G'))
        .and_then(|value| value.parse().ok())
}

/// Имя и версия ОС из `/etc/os-release`
pub fn parse_os_release(content: &str) -> (String, String) {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    let name_re =
        NAME_RE.get_or_init(|| Regex::new(r#"(?m)^NAME="?([^"\n]+)"?"#).expect("valid regex"));
    let version_re = VERSION_RE
        .get_or_init(|| Regex::new(r#"(?m)^VERSION_ID="?([^"\n]+)"?"#).expect("valid regex"));

    let capture = |re: &Regex| {
        re.captures(content)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    };
    (capture(name_re), capture(version_re))
}

pub async fn memory_mb(host: &Host) -> Result<u64> {
    let output = host.run_checked("free", &["-m"]).await?;
    parse_free_mb(&output.stdout).ok_or_else(|| anyhow!("Unexpected `free -m` output"))
}

pub async fn cpu_cores(host: &Host) -> u64 {
    match host.run("nproc", &[]).await {
        Ok(output) if output.success() => output.stdout.trim().parse().unwrap_or(1),
        _ => {
            warn!("Не удалось определить число ядер, считаем 1");
            1
        }
    }
}

/// Рекомендации для текущего хоста; при сбое опроса памяти пишет
/// предупреждение в вывод и считает по 1 ГБ
pub async fn recommendation_for(host: &Host, out: &mut Transcript) -> Recommendation {
    let ram = match memory_mb(host).await {
        Ok(ram) => ram,
        Err(e) => {
            out.warning(format!(
                "Could not detect system memory ({:#}), sizing for {} MB",
                e, FALLBACK_MEMORY_MB
            ));
            FALLBACK_MEMORY_MB
        }
    };
    let cores = cpu_cores(host).await;
    let rec = recommend(ram, cores);
    out.line(format!(
        "Detected {} MB RAM, {} CPU core(s): {}",
        ram, cores, rec.tier
    ));
    rec
}

/// Опрашивает хост для шага приветствия
pub async fn probe(host: &Host) -> Result<SystemInfo> {
    let ram_mb = memory_mb(host).await?;
    let cpu_cores = cpu_cores(host).await;
    let disk_free_gb = match host.run("df", &["-BG", "--output=avail", "/"]).await {
        Ok(output) if output.success() => parse_df_gb(&output.stdout),
        _ => None,
    };
    let (os_name, os_version) = match host.read_file("/etc/os-release").await? {
        Some(content) => parse_os_release(&content),
        None => ("Unknown".to_string(), "Unknown".to_string()),
    };

    Ok(SystemInfo {
        ram_mb,
        cpu_cores,
        disk_free_gb,
        os_name,
        os_version,
        php_version: php::php_version(host).await?,
        public_ip: utils::server_ip(host).await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command::CommandOutput, host::testing::TestHost};

    #[test]
    fn nano_host() {
        let rec = recommend(512, 1);
        assert_eq!(rec.tier, "Nano (512MB)");
        assert_eq!(rec.swap_recommended_gb, 4);
        assert_eq!(rec.fpm_max_children, 17);
        assert_eq!(rec.fpm_start_servers, 4);
        assert_eq!(rec.fpm_max_spare_servers, 8);
        assert_eq!(rec.mysql_buffer_pool_mb, 128);
        assert_eq!(rec.mysql_max_connections, 50);
        assert_eq!(rec.redis_max_memory_mb, 76);
        assert_eq!(rec.opcache_memory_mb, 128);
        assert_eq!(rec.nginx_worker_connections, 1024);
    }

    #[test]
    fn enterprise_host() {
        let rec = recommend(16384, 8);
        assert_eq!(rec.tier, "Enterprise (16GB+)");
        assert_eq!(rec.opcache_memory_mb, 512);
        assert_eq!(rec.swap_recommended_gb, 0);
        assert_eq!(rec.fpm_max_children, 500);
        assert_eq!(rec.mysql_buffer_pool_mb, 4096);
        assert_eq!(rec.mysql_max_connections, 400);
        assert_eq!(rec.redis_max_memory_mb, 2457);
        assert_eq!(rec.nginx_worker_processes, 8);
        assert_eq!(rec.nginx_worker_connections, 4096);
    }

    #[test]
    fn tiers_follow_ram_breakpoints() {
        let cases = [
            (256, "Nano (512MB)"),
            (1023, "Nano (512MB)"),
            (1024, "Micro (1GB)"),
            (2048, "Small (2GB)"),
            (4096, "Medium (4GB)"),
            (8192, "Large (8GB)"),
            (16384, "Enterprise (16GB+)"),
            (262144, "Enterprise (16GB+)"),
        ];
        for (ram, expected) in cases {
            assert_eq!(recommend(ram, 2).tier, expected, "ram = {}", ram);
        }
    }

    #[test]
    fn swap_and_opcache_table() {
        let cases = [
            (512, 4, 128),
            (1024, 4, 128),
            (1536, 2, 128),
            (2048, 0, 256),
            (4096, 0, 512),
        ];
        for (ram, swap, opcache) in cases {
            let rec = recommend(ram, 1);
            assert_eq!(rec.swap_recommended_gb, swap, "swap for {} MB", ram);
            assert_eq!(rec.opcache_memory_mb, opcache, "opcache for {} MB", ram);
        }
    }

    #[test]
    fn clamps_hold_for_extreme_inputs() {
        for ram in [0, 1, 29, 150, 3000, 15_000, 1 << 20, u64::MAX] {
            for cores in [0, 1, 3, 64, u64::MAX] {
                let rec = recommend(ram, cores);
                assert!((5..=500).contains(&rec.fpm_max_children));
                assert!((50..=500).contains(&rec.mysql_max_connections));
                assert!((64..=4096).contains(&rec.redis_max_memory_mb));
                assert!(rec.mysql_buffer_pool_mb >= 128);
                assert!(rec.swap_recommended_gb <= 4);
                assert!(rec.nginx_worker_processes >= 1);
                assert!(rec.fpm_start_servers >= 1);
                assert!(rec.fpm_max_spare_servers <= rec.fpm_max_children);
            }
        }
    }

    #[test]
    fn parses_probe_outputs() {
        let free = "               total        used        free      shared  buff/cache   available\n\
                    Mem:            1987         512         900          10         575        1300\n\
                    Swap:              0           0           0\n";
        assert_eq!(parse_free_mb(free), Some(1987));
        assert_eq!(parse_df_gb(" Avail\n   37G\n"), Some(37));

        let (name, version) =
            parse_os_release("PRETTY_NAME=\"Ubuntu 24.04 LTS\"\nNAME=\"Ubuntu\"\nVERSION_ID=\"24.04\"\n");
        assert_eq!(name, "Ubuntu");
        assert_eq!(version, "24.04");
    }

    #[tokio::test]
    async fn probe_collects_host_facts() {
        let t = TestHost::new();
        t.runner
            .on("free -m", CommandOutput::ok("x\nMem: 4096 1 1 1 1 1\n"))
            .on("nproc", CommandOutput::ok("2\n"))
            .on("df", CommandOutput::ok("Avail\n 50G\n"))
            .on("php", CommandOutput::ok("8.3"))
            .on("curl", CommandOutput::ok("198.51.100.7\n"));
        t.put("/etc/os-release", "NAME=\"Ubuntu\"\nVERSION_ID=\"24.04\"\n");

        let info = probe(&t.host).await.unwrap();
        assert_eq!(info.ram_mb, 4096);
        assert_eq!(info.cpu_cores, 2);
        assert_eq!(info.disk_free_gb, Some(50));
        assert_eq!(info.php_version.as_deref(), Some("8.3"));
        assert_eq!(info.public_ip, "198.51.100.7");
        assert_eq!(info.os_version, "24.04");
    }

    #[tokio::test]
    async fn memory_probe_failure_falls_back_with_warning() {
        let t = TestHost::with_runner(crate::command::fake::FakeRunner::bare());
        let mut out = Transcript::new();
        let rec = recommendation_for(&t.host, &mut out).await;
        assert_eq!(rec, recommend(FALLBACK_MEMORY_MB, 1));
        assert!(out.lines().iter().any(|l| l.starts_with("WARNING:")));
    }
}
