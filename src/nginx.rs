use anyhow::{anyhow, Result};
use log::warn;

use crate::{component::Context, host::Host, php, response::Transcript, templates};

pub const RATE_LIMIT_PATH: &str = "/etc/nginx/conf.d/rate-limit.conf";
const DEFAULT_SITE: &str = "/etc/nginx/sites-enabled/default";

/// Директории приложения, в которые пишет www-data
pub const WRITABLE_DIRS: &[&str] = &[
    "storage",
    "storage/logs",
    "storage/app",
    "cache",
    "public/uploads",
    "public/images",
    "bootstrap/cache",
    "tmp",
];

pub fn site_available(domain: &str) -> String {
    format!("/etc/nginx/sites-available/{}", domain)
}

pub fn site_enabled(domain: &str) -> String {
    format!("/etc/nginx/sites-enabled/{}", domain)
}

/// Результат `nginx -t`: `Err` несет сырой вывод валидатора
pub async fn validate(host: &Host) -> Result<()> {
    let output = host.run("nginx", &["-t"]).await?;
    if output.success() {
        Ok(())
    } else {
        Err(anyhow!("nginx -t failed:\n{}", output.combined()))
    }
}

/// Права на файлы сайта: владелец www-data, 755/644, рабочие директории 775/664
async fn apply_permissions(host: &Host, web_root: &str, out: &mut Transcript) -> Result<()> {
    host.run_checked("chown", &["-R", "www-data:www-data", web_root])
        .await?;
    host.run_checked("find", &[web_root, "-type", "d", "-exec", "chmod", "755", "{}", "+"])
        .await?;
    host.run_checked("find", &[web_root, "-type", "f", "-exec", "chmod", "644", "{}", "+"])
        .await?;

    let writable: Vec<String> = WRITABLE_DIRS
        .iter()
        .map(|dir| format!("{}/{}", web_root, dir))
        .collect();
    for dir in writable.iter().map(String::as_str) {
        host.run_checked("find", &[dir, "-type", "d", "-exec", "chmod", "775", "{}", "+"])
            .await?;
        host.run_checked("find", &[dir, "-type", "f", "-exec", "chmod", "664", "{}", "+"])
            .await?;
    }

    if host.binary_exists("setfacl").await {
        for dir in writable.iter().map(String::as_str) {
            let acl = host
                .run("setfacl", &["-R", "-m", "u:www-data:rwX,d:u:www-data:rwX", dir])
                .await?;
            if !acl.success() {
                warn!("setfacl для {} завершился с кодом {}", dir, acl.code);
            }
        }
        out.line("ACLs applied to writable directories");
    }
    out.line(format!("Permissions set on {}", web_root));
    Ok(())
}

pub async fn install(ctx: &Context<'_>, out: &mut Transcript) -> Result<()> {
    let host = ctx.host;
    let domain = ctx.config.domain();
    let web_root = ctx.web_root();

    out.line("Installing Nginx...");
    host.apt_install(&["nginx"]).await?;

    host.create_dir_all(&format!("{}/public", web_root)).await?;
    for dir in WRITABLE_DIRS {
        host.create_dir_all(&format!("{}/{}", web_root, dir)).await?;
    }
    out.line(format!("Web root: {}/public", web_root));

    host.write_file(RATE_LIMIT_PATH, templates::RATE_LIMIT).await?;

    let socket = php::socket_for_site(host, out).await?;
    let available = site_available(domain);
    host.write_file(&available, &templates::nginx_site(domain, &web_root, &socket))
        .await?;
    host.symlink(&available, &site_enabled(domain)).await?;
    if host.remove_file(DEFAULT_SITE).await? {
        out.line("Default site disabled");
    }
    out.line(format!("Site configuration written to {}", available));

    let public = format!("{}/public", web_root);
    if !host.exists(&format!("{}/index.html", public)).await
        && !host.exists(&format!("{}/index.php", public)).await
    {
        host.write_file(
            &format!("{}/index.html", public),
            &templates::placeholder_page(domain),
        )
        .await?;
        out.line("Placeholder index.html created");
    }

    apply_permissions(host, &web_root, out).await?;

    if let Err(e) = validate(host).await {
        for line in format!("{}", e).lines().skip(1) {
            out.line(line);
        }
        return Err(e.context("Nginx configuration test failed, nginx was not reloaded"));
    }
    out.line("Nginx configuration test passed");

    host.systemctl("reload", "nginx").await?;
    host.systemctl("enable", "nginx").await?;
    out.line("Nginx reloaded");
    Ok(())
}

pub async fn test(ctx: &Context<'_>) -> Result<bool> {
    Ok(ctx.host.service_active("nginx").await)
}

pub async fn repair(ctx: &Context<'_>, out: &mut Transcript) -> Result<String> {
    let host = ctx.host;
    let domain = ctx.config.domain();

    out.line("Removing generated Nginx configuration");
    host.remove_file(&site_enabled(domain)).await?;
    host.remove_file(&site_available(domain)).await?;
    host.remove_file(RATE_LIMIT_PATH).await?;

    match validate(host).await {
        Ok(()) => out.line("Base Nginx configuration is valid"),
        Err(e) => out.warning(format!("Base Nginx configuration is invalid: {:#}", e)),
    }

    if let Err(e) = install(ctx, out).await {
        out.warning(format!("Re-install failed ({:#}), reinstalling the nginx package", e));
        host.apt_reinstall(&["nginx", "nginx-common"]).await?;
        install(ctx, out).await?;
        return Ok("Nginx package reinstalled and configured".to_string());
    }
    Ok("Nginx repaired".to_string())
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
            ..Default::default()
        }
    }

    fn host() -> TestHost {
        let t = TestHost::new();
        t.runner
            .on("php -r", CommandOutput::ok("8.3"))
            .on("which setfacl", CommandOutput::failed(1, ""));
        t.put(DEFAULT_SITE, "server {}");
        t
    }

    #[tokio::test]
    async fn writes_site_and_reloads() {
        let t = host();
        let settings = PanelSettings::default();
        let config = config();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };

        install(&ctx, &mut Transcript::new()).await.unwrap();

        let site = t.read("/etc/nginx/sites-available/example.com");
        assert!(site.contains("root /var/www/example.com/public;"));
        assert!(site.contains("unix:/run/php/php8.3-fpm.sock"));
        assert!(t.read(RATE_LIMIT_PATH).contains("zone=api:10m"));
        assert!(t.host.exists("/etc/nginx/sites-enabled/example.com").await);
        assert!(!t.host.exists(DEFAULT_SITE).await);
        assert!(t.host.exists("/var/www/example.com/storage/logs").await);
        assert!(t.read("/var/www/example.com/public/index.html").contains("example.com"));
        assert!(t.runner.called("chown -R www-data:www-data /var/www/example.com"));
        assert!(t.runner.called("systemctl reload nginx"));
    }

    #[tokio::test]
    async fn existing_index_is_kept() {
        let t = host();
        t.put("/var/www/example.com/public/index.html", "my app");
        let settings = PanelSettings::default();
        let config = config();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };

        install(&ctx, &mut Transcript::new()).await.unwrap();
        assert_eq!(t.read("/var/www/example.com/public/index.html"), "my app");
    }

    #[tokio::test]
    async fn failed_validation_never_reloads() {
        let t = host();
        t.runner.on(
            "nginx -t",
            CommandOutput::failed(1, "nginx: [emerg] unknown directive \"foo\" in /etc/nginx/sites-enabled/example.com:3"),
        );
        let settings = PanelSettings::default();
        let config = config();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };
        let mut out = Transcript::new();

        let err = install(&ctx, &mut out).await.unwrap_err();
        assert!(format!("{:#}", err).contains("unknown directive \"foo\""));
        assert!(out.lines().iter().any(|l| l.contains("[emerg]")));
        assert!(!t.runner.called("systemctl reload nginx"));
    }

    #[tokio::test]
    async fn repair_falls_back_to_package_reinstall() {
        let t = host();
        t.runner
            .once("nginx -t", CommandOutput::failed(1, "broken"))
            .once("nginx -t", CommandOutput::failed(1, "broken"));
        let settings = PanelSettings::default();
        let config = config();
        let ctx = Context { host: &t.host, settings: &settings, config: &config };

        let message = repair(&ctx, &mut Transcript::new()).await.unwrap();
        assert_eq!(message, "Nginx package reinstalled and configured");
        assert!(t.runner.called("apt-get install --reinstall -y -o Dpkg::Options::=--force-confmiss nginx nginx-common"));
        assert_eq!(t.runner.count("systemctl reload nginx"), 1);
    }
}
