//! PHP-FPM: версия интерпретатора, расширения, пул и OPcache

use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use log::debug;
use regex::Regex;

use crate::{component::Context, host::Host, response::Transcript, sizing, templates};

/// Расширения, которые нужны типовому PHP-приложению
pub const EXTENSIONS: &[&str] = &[
    "cli", "fpm", "mysql", "curl", "gd", "mbstring", "xml", "zip", "bcmath", "intl", "redis",
    "opcache",
];

/// Версия, под которую пишется конфигурация Nginx, если PHP еще не установлен
pub const DEFAULT_VERSION: &str = "8.3";

const VERSION_EXPR: &str = "echo PHP_MAJOR_VERSION.'.'.PHP_MINOR_VERSION;";

pub fn fpm_socket(version: &str) -> String {
    format!("/run/php/php{}-fpm.sock", version)
}

pub fn fpm_service(version: &str) -> String {
    format!("php{}-fpm", version)
}

fn pool_path(version: &str) -> String {
    format!("/etc/php/{}/fpm/pool.d/www.conf", version)
}

fn opcache_path(version: &str) -> String {
    format!("/etc/php/{}/fpm/conf.d/99-opcache.ini", version)
}

/// Версия PHP в виде `major.minor` или `None`, если PHP не установлен
pub async fn php_version(host: &Host) -> Result<Option<String>> {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    let re = VERSION_RE.get_or_init(|| Regex::new(r"^\d+\.\d+$").expect("valid regex"));

    let output = host.run("php", &["-r", VERSION_EXPR]).await?;
    if !output.success() {
        debug!("PHP не найден (код {})", output.code);
        return Ok(None);
    }
    let version = output.stdout.trim();
    if re.is_match(version) {
        Ok(Some(version.to_string()))
    } else {
        Err(anyhow!("Unexpected PHP version output: {}", version))
    }
}

/// Сокет PHP-FPM для конфигурации сайта
pub async fn socket_for_site(host: &Host, out: &mut Transcript) -> Result<String> {
    Ok(match php_version(host).await? {
        Some(version) => fpm_socket(&version),
        None => {
            out.warning(format!(
                "PHP is not installed yet, assuming PHP {}",
                DEFAULT_VERSION
            ));
            fpm_socket(DEFAULT_VERSION)
        }
    })
}

pub async fn install(ctx: &Context<'_>, out: &mut Transcript) -> Result<()> {
    let host = ctx.host;
    out.line("Installing PHP...");

    let version = match php_version(host).await? {
        Some(version) => version,
        None => {
            out.line("PHP not found, installing php-cli and php-fpm");
            host.apt_update().await?;
            host.apt_install(&["php-cli", "php-fpm"]).await?;
            php_version(host)
                .await?
                .ok_or_else(|| anyhow!("PHP is still unavailable after installing php-cli"))?
        }
    };
    out.line(format!("PHP version: {}", version));

    let mut missing = Vec::new();
    for ext in EXTENSIONS {
        let package = format!("php{}-{}", version, ext);
        if !host.is_package_installed(&package).await {
            missing.push(package);
        }
    }
    if missing.is_empty() {
        out.line("All PHP extensions are already installed");
    } else {
        out.line(format!("Installing extensions: {}", missing.join(" ")));
        let packages: Vec<&str> = missing.iter().map(String::as_str).collect();
        host.apt_install(&packages).await?;
    }

    let rec = sizing::recommendation_for(host, out).await;
    host.write_file(&pool_path(&version), &templates::fpm_pool(&version, &rec))
        .await?;
    host.write_file(&opcache_path(&version), &templates::opcache_ini(&rec))
        .await?;
    out.line(format!(
        "PHP-FPM pool: max_children={}, start={}, spare={}..{}",
        rec.fpm_max_children,
        rec.fpm_start_servers,
        rec.fpm_min_spare_servers,
        rec.fpm_max_spare_servers
    ));

    let fpm_binary = format!("php-fpm{}", version);
    let check = host.run(&fpm_binary, &["-t"]).await?;
    if !check.success() {
        return Err(anyhow!(
            "PHP-FPM configuration test failed:\n{}",
            check.combined()
        ));
    }

    let service = fpm_service(&version);
    host.systemctl("restart", &service).await?;
    host.systemctl("enable", &service).await?;
    out.line(format!("{} restarted", service));
    Ok(())
}

pub async fn test(ctx: &Context<'_>) -> Result<bool> {
    Ok(match php_version(ctx.host).await? {
        Some(version) => ctx.host.service_active(&fpm_service(&version)).await,
        None => false,
    })
}

pub async fn repair(ctx: &Context<'_>, out: &mut Transcript) -> Result<String> {
    let host = ctx.host;
    if let Some(version) = php_version(host).await? {
        out.line(format!("Removing generated PHP {} configuration", version));
        host.remove_file(&pool_path(&version)).await?;
        host.remove_file(&opcache_path(&version)).await?;
        host.apt_reinstall(&[&fpm_service(&version)]).await?;
    } else {
        out.warning("PHP is not installed, running a fresh installation");
    }
    install(ctx, out).await?;
    Ok("PHP repaired".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{fake::FakeRunner, CommandOutput},
        config::{PanelSettings, WizardConfig},
        host::testing::TestHost,
    };

    const FREE_2G: &str = "h\nMem: 2048 1 1 1 1 1\n";

    fn scripted() -> TestHost {
        let t = TestHost::new();
        t.runner
            .on("php -r", CommandOutput::ok("8.3"))
            .on("free -m", CommandOutput::ok(FREE_2G))
            .on("nproc", CommandOutput::ok("2\n"))
            .on("dpkg -s php8.3-intl", CommandOutput::failed(1, "not installed"))
            .on("dpkg -s php8.3-redis", CommandOutput::failed(1, "not installed"));
        t
    }

    #[tokio::test]
    async fn installs_only_missing_extensions_and_sizes_pool() {
        let t = scripted();
        let settings = PanelSettings::default();
        let config = WizardConfig::default();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };
        let mut out = Transcript::new();

        install(&ctx, &mut out).await.unwrap();

        assert!(t.runner.called("apt-get install -y php8.3-intl php8.3-redis"));
        assert!(!t.runner.called("apt-get install -y php-cli"));
        assert!(t.read("/etc/php/8.3/fpm/pool.d/www.conf").contains("pm.max_children = 68"));
        assert!(t.read("/etc/php/8.3/fpm/conf.d/99-opcache.ini").contains("=256"));
        assert!(t.runner.called("php-fpm8.3 -t"));
        assert!(t.runner.called("systemctl restart php8.3-fpm"));
    }

    #[tokio::test]
    async fn broken_pool_is_not_restarted() {
        let t = scripted();
        t.runner.on("php-fpm8.3 -t", CommandOutput::failed(78, "ERROR: invalid pm"));
        let settings = PanelSettings::default();
        let config = WizardConfig::default();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };

        let err = install(&ctx, &mut Transcript::new()).await.unwrap_err();
        assert!(err.to_string().contains("invalid pm"));
        assert!(!t.runner.called("systemctl restart"));
    }

    #[tokio::test]
    async fn version_requires_a_working_interpreter() {
        let t = TestHost::with_runner(FakeRunner::bare());
        assert_eq!(php_version(&t.host).await.unwrap(), None);

        let t = TestHost::new();
        t.runner.on("php -r", CommandOutput::ok("8.2\n"));
        assert_eq!(php_version(&t.host).await.unwrap().as_deref(), Some("8.2"));
        assert_eq!(fpm_socket("8.2"), "/run/php/php8.2-fpm.sock");
    }

    #[tokio::test]
    async fn repair_removes_dropins_and_reinstalls_fpm() {
        let t = scripted();
        t.put("/etc/php/8.3/fpm/conf.d/99-opcache.ini", "opcache.memory_consumption=-1\n");
        let settings = PanelSettings::default();
        let config = WizardConfig::default();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };

        repair(&ctx, &mut Transcript::new()).await.unwrap();
        assert!(t.runner.called("apt-get install --reinstall -y -o Dpkg::Options::=--force-confmiss php8.3-fpm"));
        assert!(t.read("/etc/php/8.3/fpm/conf.d/99-opcache.ini").contains("opcache.enable=1"));
    }
}
