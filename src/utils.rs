use std::{sync::OnceLock, time::Duration};

use log::{debug, warn};
use nix::unistd::{Uid, User};
use regex::Regex;

use crate::{command::CommandSpec, host::Host};

/// Проверяет, запущен ли процесс с эффективным UID root
pub fn is_root() -> bool {
    Uid::effective().is_root()
}

/// Имя пользователя, от которого работает процесс (для аудита)
pub fn current_user() -> String {
    User::from_uid(Uid::effective())
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| Uid::effective().to_string())
}

/// Проверяет доменное имя
pub fn is_valid_domain(domain: &str) -> bool {
    static DOMAIN_RE: OnceLock<Regex> = OnceLock::new();
    let re = DOMAIN_RE.get_or_init(|| {
        Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$")
            .expect("domain regex is valid")
    });
    domain == "localhost" || re.is_match(domain)
}

/// Репозиторий GitHub в виде `owner/name`
pub fn is_valid_repo(repo: &str) -> bool {
    static REPO_RE: OnceLock<Regex> = OnceLock::new();
    let re = REPO_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+/[A-Za-z0-9._-]+$").expect("repo regex is valid"));
    re.is_match(repo)
}

/// Имя ветки: только символы, безопасные для YAML и командной строки
pub fn is_valid_branch(branch: &str) -> bool {
    static BRANCH_RE: OnceLock<Regex> = OnceLock::new();
    let re = BRANCH_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._/][A-Za-z0-9._/-]*$").expect("branch regex is valid"));
    re.is_match(branch)
}

pub fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Получает публичный IP-адрес сервера
///
/// Сначала спрашивает внешние сервисы, затем берет первый адрес из `hostname -I`.
pub async fn server_ip(host: &Host) -> String {
    for service in ["ifconfig.me", "icanhazip.com"] {
        let spec = CommandSpec::new("curl")
            .args(["-s", "-4", "--max-time", "10", service])
            .timeout(Duration::from_secs(15));
        match host.exec(spec).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                let ip = output.stdout.trim().to_string();
                debug!("Публичный IP-адрес сервера: {}", ip);
                return ip;
            }
            Ok(_) => debug!("Сервис {} не вернул IP-адрес", service),
            Err(e) => warn!("Не удалось запросить {}: {}", service, e),
        }
    }

    match host.run("hostname", &["-I"]).await {
        Ok(output) if output.success() => output
            .stdout
            .split_whitespace()
            .next()
            .unwrap_or("127.0.0.1")
            .to_string(),
        _ => {
            warn!("Не удалось определить IP-адрес сервера, используется 127.0.0.1");
            "127.0.0.1".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command::CommandOutput, host::testing::TestHost};

    #[test]
    fn validates_domains() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("shop.example.co.uk"));
        assert!(is_valid_domain("localhost"));
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain("example"));
        assert!(!is_valid_domain("-bad.com"));
        assert!(!is_valid_domain("exa mple.com"));
        assert!(!is_valid_domain("example.com; rm -rf /"));
    }

    #[test]
    fn validates_repositories_and_branches() {
        assert!(is_valid_repo("acme/shop-frontend"));
        assert!(is_valid_repo("user.name/repo_1"));
        assert!(!is_valid_repo("acme"));
        assert!(!is_valid_repo("acme/shop/extra"));
        assert!(!is_valid_repo("acme/shop\n  run: curl evil"));
        assert!(!is_valid_repo("acme/${{ secrets.X }}"));

        assert!(is_valid_branch("main"));
        assert!(is_valid_branch("release/2.0"));
        assert!(!is_valid_branch("-rf"));
        assert!(!is_valid_branch("main'; echo"));
        assert!(!is_valid_branch("a b"));
    }

    #[tokio::test]
    async fn server_ip_falls_back_to_hostname() {
        let t = TestHost::new();
        t.runner
            .on("curl", CommandOutput::failed(6, "could not resolve"))
            .on("hostname -I", CommandOutput::ok("10.0.0.5 172.17.0.1 \n"));
        assert_eq!(server_ip(&t.host).await, "10.0.0.5");
    }

    #[tokio::test]
    async fn server_ip_prefers_public_address() {
        let t = TestHost::new();
        t.runner.on("curl", CommandOutput::ok("203.0.113.10\n"));
        assert_eq!(server_ip(&t.host).await, "203.0.113.10");
        assert!(!t.runner.called("hostname"));
    }
}
