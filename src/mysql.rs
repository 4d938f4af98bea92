use anyhow::{anyhow, Context as _, Result};
use log::{info, warn};

use crate::{
    command::CommandSpec, component::Context, host::Host, response::Transcript, sizing,
    templates,
};

pub const TUNING_PATH: &str = "/etc/mysql/mysql.conf.d/99-server-panel.cnf";
const SWAPFILE: &str = "/swapfile";
const FSTAB_LINE: &str = "/swapfile none swap sw 0 0\n";
const SWAPPINESS_PATH: &str = "/etc/sysctl.d/99-swappiness.conf";

/// Включает swap-файл, если в системе еще нет активного swap
pub async fn ensure_swap(host: &Host, size_gb: u32, out: &mut Transcript) -> Result<()> {
    let show = host.run("swapon", &["--show", "--noheadings"]).await?;
    if show.success() && !show.stdout.trim().is_empty() {
        out.line("Swap is already active, skipping");
        return Ok(());
    }

    if host.exists(SWAPFILE).await {
        out.line("Activating existing /swapfile");
    } else {
        out.line(format!("Creating {} GB swap file", size_gb));
        host.run_checked("fallocate", &["-l", &format!("{}G", size_gb), SWAPFILE])
            .await?;
        host.run_checked("chmod", &["600", SWAPFILE]).await?;
        host.run_checked("mkswap", &[SWAPFILE]).await?;
    }
    host.run_checked("swapon", &[SWAPFILE]).await?;

    if host.append_if_missing("/etc/fstab", SWAPFILE, FSTAB_LINE).await? {
        info!("Swap-файл добавлен в /etc/fstab");
    }
    host.write_file(SWAPPINESS_PATH, "vm.swappiness=10\n").await?;
    host.run_checked("sysctl", &["-w", "vm.swappiness=10"]).await?;
    out.line("Swap enabled (swappiness 10)");
    Ok(())
}

fn mysql_client(password: &str) -> CommandSpec {
    let spec = CommandSpec::new("mysql").args(["-u", "root"]);
    if password.is_empty() {
        spec
    } else {
        spec.env("MYSQL_PWD", password)
    }
}

/// Применяет SQL усиления безопасности
///
/// Сначала пробует войти с паролем, затем без него: на свежей установке
/// root аутентифицируется через auth_socket.
async fn secure(host: &Host, password: &str, out: &mut Transcript) -> Result<()> {
    let sql = templates::mysql_secure_sql(password);
    let with_password = host.exec(mysql_client(password).stdin(sql.clone())).await?;
    if !with_password.success() {
        warn!("Вход в MySQL с паролем не удался, пробуем без пароля");
        host.check(mysql_client("").stdin(sql))
            .await
            .context("Failed to secure MySQL")?;
    }
    out.line("MySQL secured: anonymous users, remote root and test database removed");
    Ok(())
}

async fn ping(host: &Host, password: &str) -> bool {
    let mut spec = CommandSpec::new("mysqladmin").args(["-u", "root", "ping"]);
    if !password.is_empty() {
        spec = spec.env("MYSQL_PWD", password);
    }
    host.exec(spec)
        .await
        .map(|output| output.success())
        .unwrap_or(false)
}

pub async fn install(ctx: &Context<'_>, out: &mut Transcript) -> Result<()> {
    let host = ctx.host;
    let config = ctx.config;
    let password = config.mysql_root_password.as_str();

    if config.enable_swap {
        ensure_swap(host, config.swap_size, out).await?;
    }

    out.line("Installing MySQL...");
    host.check(CommandSpec::new("debconf-set-selections").stdin(format!(
        "mysql-server mysql-server/root_password password {0}\n\
         mysql-server mysql-server/root_password_again password {0}\n",
        password
    )))
    .await
    .context("Failed to pre-seed MySQL root password")?;
    host.apt_install(&["mysql-server"]).await?;

    secure(host, password, out).await?;

    let rec = sizing::recommendation_for(host, out).await;
    host.write_file(TUNING_PATH, &templates::mysql_tuning(&rec)).await?;
    out.line(format!(
        "MySQL tuned: buffer pool {} MB, max connections {}",
        rec.mysql_buffer_pool_mb, rec.mysql_max_connections
    ));

    host.systemctl("restart", "mysql").await?;
    host.systemctl("enable", "mysql").await?;
    Ok(())
}

pub async fn test(ctx: &Context<'_>) -> Result<bool> {
    Ok(ping(ctx.host, &ctx.config.mysql_root_password).await)
}

pub async fn repair(ctx: &Context<'_>, out: &mut Transcript) -> Result<String> {
    let host = ctx.host;
    let password = ctx.config.mysql_root_password.as_str();

    out.line("Restarting MySQL");
    host.run("systemctl", &["restart", "mysql"]).await?;

    host.create_dir_all("/var/run/mysqld").await?;
    for dir in ["/var/run/mysqld", "/var/lib/mysql"] {
        let chown = host.run("chown", &["-R", "mysql:mysql", dir]).await?;
        if !chown.success() {
            out.warning(format!("Could not fix ownership of {}", dir));
        }
    }
    host.run("systemctl", &["restart", "mysql"]).await?;

    if ping(host, password).await {
        out.line("MySQL is answering");
        return Ok("MySQL repaired".to_string());
    }

    out.warning("MySQL still does not answer, reinstalling mysql-server");
    host.apt_reinstall(&["mysql-server"]).await?;
    host.systemctl("restart", "mysql").await?;
    if ping(host, password).await {
        Ok("MySQL reinstalled".to_string())
    } else {
        Err(anyhow!("MySQL does not answer even after reinstalling"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::CommandOutput,
        config::{PanelSettings, WizardConfig},
        host::testing::TestHost,
    };

    fn config() -> WizardConfig {
        WizardConfig {
            domain: "example.com".into(),
            mysql_root_password: "S3cretPass".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creates_swap_once_and_tunes_server() {
        let t = TestHost::new();
        t.runner.on("free -m", CommandOutput::ok("h\nMem: 4096 0 0 0 0 0\n"));
        let settings = PanelSettings::default();
        let config = config();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };

        install(&ctx, &mut Transcript::new()).await.unwrap();

        assert!(t.runner.called("fallocate -l 2G /swapfile"));
        assert!(t.read("/etc/fstab").contains("/swapfile none swap sw 0 0"));
        assert_eq!(t.read(SWAPPINESS_PATH), "vm.swappiness=10\n");
        assert!(t.read(TUNING_PATH).contains("innodb_buffer_pool_size = 1024M"));
        assert!(t
            .runner
            .stdin_of("debconf-set-selections")
            .unwrap()
            .contains("root_password password S3cretPass"));
        assert!(t.runner.stdin_of("mysql -u root").unwrap().contains("DROP DATABASE IF EXISTS test;"));
        assert!(t.runner.called("systemctl restart mysql"));
    }

    #[tokio::test]
    async fn rerun_with_active_swap_adds_nothing() {
        let t = TestHost::new();
        t.runner.on(
            "swapon --show",
            CommandOutput::ok("/swapfile file 2G 0B -2\n"),
        );
        t.put("/etc/fstab", "UUID=1 / ext4 defaults 0 1\n/swapfile none swap sw 0 0\n");
        let settings = PanelSettings::default();
        let config = config();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };

        install(&ctx, &mut Transcript::new()).await.unwrap();
        install(&ctx, &mut Transcript::new()).await.unwrap();

        assert!(!t.runner.called("fallocate"));
        assert_eq!(t.read("/etc/fstab").matches("/swapfile").count(), 1);
    }

    #[tokio::test]
    async fn inactive_swapfile_is_only_activated() {
        let t = TestHost::new();
        t.put(SWAPFILE, "");
        let mut out = Transcript::new();

        ensure_swap(&t.host, 2, &mut out).await.unwrap();

        assert!(!t.runner.called("fallocate"));
        assert!(!t.runner.called("mkswap"));
        assert!(t.runner.called("swapon /swapfile"));
        assert_eq!(t.read("/etc/fstab"), FSTAB_LINE);
    }

    #[tokio::test]
    async fn secure_falls_back_to_socket_auth() {
        let t = TestHost::new();
        t.runner.once("mysql -u root", CommandOutput::failed(1, "Access denied"));
        let mut out = Transcript::new();

        secure(&t.host, "pw", &mut out).await.unwrap();
        assert_eq!(t.runner.count("mysql -u root"), 2);
    }

    #[tokio::test]
    async fn repair_reinstalls_when_ping_keeps_failing() {
        let t = TestHost::new();
        t.runner.once("mysqladmin", CommandOutput::failed(1, "can't connect"));
        let settings = PanelSettings::default();
        let config = config();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };

        let message = repair(&ctx, &mut Transcript::new()).await.unwrap();
        assert_eq!(message, "MySQL reinstalled");
        assert!(t.runner.called("chown -R mysql:mysql /var/lib/mysql"));
        assert!(t.runner.called("apt-get install --reinstall"));
    }
}
