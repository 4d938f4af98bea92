use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::{
    component::Context,
    host::Host,
    response::Transcript,
    templates::{self, SshAuth},
    utils::yes_no,
};

/// sshd берет первое прочитанное значение, поэтому drop-in должен идти
/// раньше `50-cloud-init.conf`
pub const SSHD_DROPIN: &str = "/etc/ssh/sshd_config.d/00-server-panel.conf";
pub const JAIL_LOCAL: &str = "/etc/fail2ban/jail.local";
pub const SYSCTL_PATH: &str = "/etc/sysctl.d/99-server-panel.conf";
pub const AUTO_UPGRADES_PATH: &str = "/etc/apt/apt.conf.d/20auto-upgrades";
pub const LIMITS_PATH: &str = "/etc/security/limits.d/99-server-panel.conf";
const ROOT_AUTHORIZED_KEYS: &str = "/root/.ssh/authorized_keys";
const DEFAULT_SSH_PORT: u16 = 22;
/// Логи, на которые ссылаются nginx-джейлы; nginx ставится позже
const NGINX_LOGS: [&str; 2] = ["/var/log/nginx/access.log", "/var/log/nginx/error.log"];

/// Выбирает параметры аутентификации SSH
///
/// | пароль | ключ  | PermitRootLogin    | Password | Pubkey |
/// |--------|-------|--------------------|----------|--------|
/// | да     | да    | yes                | yes      | yes    |
/// | да     | нет   | yes                | yes      | no     |
/// | нет    | да    | prohibit-password  | no       | yes    |
/// | нет    | нет   | как (да, нет) + предупреждение         |
pub fn ssh_auth(allow_password: bool, allow_key: bool, out: &mut Transcript) -> SshAuth {
    match (allow_password, allow_key) {
        (true, true) => SshAuth {
            permit_root_login: "yes",
            password_authentication: true,
            pubkey_authentication: true,
        },
        (false, true) => SshAuth {
            permit_root_login: "prohibit-password",
            password_authentication: false,
            pubkey_authentication: true,
        },
        (true, false) => password_only(),
        (false, false) => {
            out.warning("Both SSH authentication methods were disabled, keeping password login enabled");
            password_only()
        }
    }
}

fn password_only() -> SshAuth {
    SshAuth {
        permit_root_login: "yes",
        password_authentication: true,
        pubkey_authentication: false,
    }
}

/// Проверяет сложность пароля
/// Пароль должен содержать минимум 8 символов, прописные и строчные буквы и цифры
pub fn check_password_strength(password: &str) -> Result<()> {
    if password.chars().count() < 8 {
        return Err(anyhow!("Password must be at least 8 characters long"));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(anyhow!("Password must contain an uppercase letter"));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(anyhow!("Password must contain a lowercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(anyhow!("Password must contain a digit"));
    }
    Ok(())
}

/// Настраивает брандмауэр UFW
async fn configure_firewall(host: &Host, ssh_port: u16, installer_port: u16, out: &mut Transcript) -> Result<()> {
    host.run_checked("ufw", &["default", "deny", "incoming"]).await?;
    host.run_checked("ufw", &["default", "allow", "outgoing"]).await?;

    // limit блокирует адрес после 6 подключений за 30 секунд
    host.run_checked("ufw", &["limit", &format!("{}/tcp", ssh_port)])
        .await?;
    if ssh_port != DEFAULT_SSH_PORT {
        // старый порт закрывается только после проверки нового
        host.run_checked("ufw", &["limit", &format!("{}/tcp", DEFAULT_SSH_PORT)])
            .await?;
    }
    for port in [80, 443, installer_port] {
        host.run_checked("ufw", &["allow", &format!("{}/tcp", port)])
            .await?;
    }
    host.run_checked("ufw", &["--force", "enable"]).await?;

    let status = host.run("ufw", &["status", "verbose"]).await?;
    debug!("Статус UFW:\n{}", status.stdout);
    out.line(format!(
        "Firewall enabled: SSH {} (rate limited), 80, 443, installer {}",
        ssh_port, installer_port
    ));
    Ok(())
}

async fn configure_fail2ban(host: &Host, ssh_port: u16, out: &mut Transcript) -> Result<()> {
    // без файлов логов fail2ban-server не стартует, а systemctl об этом не узнает
    for path in NGINX_LOGS {
        if !host.exists(path).await {
            host.write_file(path, "").await?;
        }
    }
    host.write_file(JAIL_LOCAL, &templates::fail2ban_jail(ssh_port))
        .await?;
    host.run_checked("fail2ban-client", &["-t"])
        .await
        .map_err(|e| e.context("fail2ban rejected jail.local"))?;
    host.systemctl("restart", "fail2ban").await?;
    host.systemctl("enable", "fail2ban").await?;
    out.line("Fail2ban jails: sshd, nginx-http-auth, nginx-limit-req, nginx-botsearch, recidive");
    Ok(())
}

async fn root_has_keys(host: &Host) -> Result<bool> {
    Ok(host
        .read_file(ROOT_AUTHORIZED_KEYS)
        .await?
        .is_some_and(|keys| keys.lines().any(|line| line.trim().starts_with("ssh-"))))
}

/// Значения из `sshd -T`, которые drop-in должен был задать, но не задал
fn overridden_settings(effective: &str, port: u16, auth: &SshAuth) -> Vec<String> {
    let expected = [
        ("port", port.to_string()),
        ("permitrootlogin", auth.permit_root_login.to_string()),
        ("passwordauthentication", yes_no(auth.password_authentication).to_string()),
        ("pubkeyauthentication", yes_no(auth.pubkey_authentication).to_string()),
    ];
    expected
        .into_iter()
        .filter(|(key, value)| {
            !effective.lines().any(|line| {
                let mut parts = line.split_whitespace();
                parts.next() == Some(*key) && parts.next() == Some(value.as_str())
            })
        })
        .map(|(key, value)| format!("{} {}", key, value))
        .collect()
}

/// Перезапуск sshd. На Ubuntu 22.10+ порт слушает `ssh.socket`, и
/// смена порта требует daemon-reload и перезапуска сокета.
async fn restart_sshd(host: &Host, out: &mut Transcript) -> Result<()> {
    if host.service_active("ssh.socket").await {
        debug!("sshd запущен через ssh.socket");
        host.run_checked("systemctl", &["daemon-reload"]).await?;
        host.systemctl("restart", "ssh.socket").await?;
        host.systemctl("restart", "ssh.service").await?;
        out.line("SSH restarted via ssh.socket");
    } else {
        host.systemctl("restart", "ssh").await?;
    }
    Ok(())
}

async fn is_listening(host: &Host, port: u16) -> bool {
    let filter = format!(":{}", port);
    match host.run("ss", &["-Htln", "sport", "=", &filter]).await {
        Ok(output) => output.success() && !output.stdout.trim().is_empty(),
        Err(_) => false,
    }
}

/// Пишет drop-in sshd и перезапускает службу, если `sshd -t` его принял
async fn configure_ssh(ctx: &Context<'_>, out: &mut Transcript) -> Result<()> {
    let host = ctx.host;
    let config = ctx.config;

    let mut auth = ssh_auth(config.ssh_allow_password, config.ssh_allow_key, out);
    if !auth.password_authentication && !root_has_keys(host).await? {
        out.warning("root has no authorized SSH keys, keeping password login enabled");
        auth = SshAuth {
            permit_root_login: "yes",
            password_authentication: true,
            ..auth
        };
    }

    host.write_file(SSHD_DROPIN, &templates::sshd_dropin(config.ssh_port, &auth))
        .await?;

    let check = host.run("sshd", &["-t"]).await?;
    if !check.success() {
        host.remove_file(SSHD_DROPIN).await?;
        return Err(anyhow!(
            "sshd rejected the new configuration, drop-in removed:\n{}",
            check.combined()
        ));
    }

    let effective = host.run("sshd", &["-T"]).await?;
    if effective.success() {
        let overridden = overridden_settings(&effective.stdout, config.ssh_port, &auth);
        if !overridden.is_empty() {
            out.warning(format!(
                "Another sshd config file takes precedence, not applied: {}",
                overridden.join(", ")
            ));
        }
    } else {
        out.warning("Could not read the effective sshd configuration");
    }

    restart_sshd(host, out).await?;

    if config.enable_ufw && config.ssh_port != DEFAULT_SSH_PORT {
        if is_listening(host, config.ssh_port).await {
            let old = format!("{}/tcp", DEFAULT_SSH_PORT);
            host.run_checked("ufw", &["delete", "limit", &old]).await?;
            out.line(format!("Port {} closed, SSH listens on {}", DEFAULT_SSH_PORT, config.ssh_port));
        } else {
            out.warning(format!(
                "SSH is not listening on port {} yet, port {} stays open",
                config.ssh_port, DEFAULT_SSH_PORT
            ));
        }
    }

    out.line(format!(
        "SSH: port {}, root login {}, password {}, keys {}",
        config.ssh_port,
        auth.permit_root_login,
        yes_no(auth.password_authentication),
        yes_no(auth.pubkey_authentication)
    ));
    Ok(())
}

pub async fn install(ctx: &Context<'_>, out: &mut Transcript) -> Result<()> {
    let host = ctx.host;
    let config = ctx.config;
    out.line("Configuring server security...");

    let mut packages = vec!["unattended-upgrades"];
    if config.enable_ufw {
        packages.push("ufw");
    }
    if config.enable_fail2ban {
        packages.push("fail2ban");
    }
    host.apt_update().await?;
    host.apt_install(&packages).await?;

    if config.enable_ufw {
        configure_firewall(host, config.ssh_port, ctx.settings.port, out).await?;
    } else {
        out.line("Firewall skipped");
    }

    if config.enable_fail2ban {
        configure_fail2ban(host, config.ssh_port, out).await?;
    } else {
        out.line("Fail2ban skipped");
    }

    configure_ssh(ctx, out).await?;

    host.write_file(SYSCTL_PATH, templates::SYSCTL_TUNABLES).await?;
    host.run_checked("sysctl", &["--system"]).await?;
    out.line("Kernel network tunables applied");

    host.write_file(AUTO_UPGRADES_PATH, templates::AUTO_UPGRADES)
        .await?;
    out.line("Automatic security updates enabled");

    host.write_file(LIMITS_PATH, templates::FILE_LIMITS).await?;
    out.line("Open file limit raised to 65535");

    info!("Настройка безопасности завершена");
    Ok(())
}

pub async fn test(ctx: &Context<'_>) -> Result<bool> {
    Ok(ctx.host.service_active("fail2ban").await)
}
