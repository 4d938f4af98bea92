//! Целевой хост: запуск команд и работа с файлами
//!
//! Все пути задаются абсолютными (`/etc/nginx/...`) и отображаются на корень
//! хоста. В продакшене корень равен `/`, в тестах это временная директория.

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use log::{debug, error, warn};
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    audit::{self, AuditLog},
    command::{CommandOutput, CommandRunner, CommandSpec},
    utils,
};

pub struct Host {
    runner: Arc<dyn CommandRunner>,
    root: PathBuf,
    audit_log: Option<PathBuf>,
    timeout: Duration,
    user: String,
}

impl Host {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        root: impl Into<PathBuf>,
        audit_log: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            root: root.into(),
            audit_log,
            timeout,
            user: utils::current_user(),
        }
    }

    /// Отображает абсолютный путь хоста на локальную файловую систему
    pub fn path(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }

    /// Выполняет команду. Ненулевой код возврата ошибкой не считается.
    pub async fn exec(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let spec = if spec.timeout.is_none() {
            spec.timeout(self.timeout)
        } else {
            spec
        };
        let command_line = spec.command_line();

        let output = self.runner.run(&spec).await?;

        if output.success() {
            debug!("Команда выполнена: {}", command_line);
        } else {
            debug!(
                "Команда завершилась с кодом {}: {}",
                output.code, command_line
            );
        }
        self.audit(&command_line, &output).await;

        Ok(output)
    }

    /// Выполняет команду и превращает ненулевой код возврата в ошибку
    pub async fn check(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let command_line = spec.command_line();
        let output = self.exec(spec).await?;
        if !output.success() {
            error!(
                "Команда завершилась с ошибкой (код {}): {}",
                output.code, command_line
            );
            return Err(anyhow::anyhow!(
                "`{}` failed with exit code {}: {}",
                command_line,
                output.code,
                output.combined()
            ));
        }
        Ok(output)
    }

    pub async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.exec(CommandSpec::new(program).args(args)).await
    }

    pub async fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.check(CommandSpec::new(program).args(args)).await
    }

    pub async fn shell_checked(&self, script: &str) -> Result<CommandOutput> {
        self.check(CommandSpec::shell(script)).await
    }

    pub async fn apt_update(&self) -> Result<()> {
        self.check(CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive").args(["update"]))
            .await
            .context("Failed to update package lists")?;
        Ok(())
    }

    /// Устанавливает пакеты без интерактивных вопросов
    pub async fn apt_install(&self, packages: &[&str]) -> Result<()> {
        self.check(
            CommandSpec::new("apt-get")
                .env("DEBIAN_FRONTEND", "noninteractive")
                .args(["install", "-y"])
                .args(packages),
        )
        .await
        .with_context(|| format!("Failed to install {}", packages.join(" ")))?;
        Ok(())
    }

    /// Переустанавливает пакеты, восстанавливая удаленные конфиги пакета
    pub async fn apt_reinstall(&self, packages: &[&str]) -> Result<()> {
        self.check(
            CommandSpec::new("apt-get")
                .env("DEBIAN_FRONTEND", "noninteractive")
                .args([
                    "install",
                    "--reinstall",
                    "-y",
                    "-o",
                    "Dpkg::Options::=--force-confmiss",
                ])
                .args(packages),
        )
        .await
        .with_context(|| format!("Failed to reinstall {}", packages.join(" ")))?;
        Ok(())
    }

    pub async fn systemctl(&self, verb: &str, unit: &str) -> Result<CommandOutput> {
        self.run_checked("systemctl", &[verb, unit]).await
    }

    pub async fn service_active(&self, unit: &str) -> bool {
        match self.run("systemctl", &["is-active", "--quiet", unit]).await {
            Ok(output) => output.success(),
            Err(e) => {
                warn!("Не удалось проверить службу {}: {}", unit, e);
                false
            }
        }
    }

    pub async fn is_package_installed(&self, package: &str) -> bool {
        self.run("dpkg", &["-s", package])
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    pub async fn binary_exists(&self, name: &str) -> bool {
        self.run("which", &[name])
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    pub async fn exists(&self, absolute: &str) -> bool {
        fs::symlink_metadata(self.path(absolute)).await.is_ok()
    }

    pub async fn read_file(&self, absolute: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(absolute)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", absolute)),
        }
    }

    pub async fn write_file(&self, absolute: &str, content: &str) -> Result<()> {
        let path = self.path(absolute);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for {}", absolute))?;
        }
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", absolute))?;
        debug!("Записан файл {}", absolute);
        Ok(())
    }

    /// Записывает секрет: файл создается сразу с правами 0600
    pub async fn write_private(&self, absolute: &str, content: &str) -> Result<()> {
        let path = self.path(absolute);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for {}", absolute))?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", absolute))?;
        // mode() действует только при создании, старый файл мог быть 0644
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("Failed to chmod 600 {}", absolute))?;
        file.write_all(content.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", absolute))?;
        file.flush().await?;
        debug!("Записан закрытый файл {}", absolute);
        Ok(())
    }

    /// Дописывает `content`, если в файле еще нет `needle`.
    /// Возвращает `true`, если файл был изменен.
    pub async fn append_if_missing(&self, absolute: &str, needle: &str, content: &str) -> Result<bool> {
        let existing = self.read_file(absolute).await?.unwrap_or_default();
        if existing.contains(needle) {
            return Ok(false);
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(content);
        self.write_file(absolute, &updated).await?;
        Ok(true)
    }

    /// Удаляет файл или симлинк. Возвращает `false`, если его не было.
    pub async fn remove_file(&self, absolute: &str) -> Result<bool> {
        match fs::remove_file(self.path(absolute)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", absolute)),
        }
    }

    pub async fn create_dir_all(&self, absolute: &str) -> Result<()> {
        fs::create_dir_all(self.path(absolute))
            .await
            .with_context(|| format!("Failed to create directory {}", absolute))
    }

    /// Создает (или пересоздает) симлинк `link` -> `target`
    pub async fn symlink(&self, target: &str, link: &str) -> Result<()> {
        self.remove_file(link).await?;
        let link_path = self.path(link);
        if let Some(parent) = link_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for {}", link))?;
        }
        fs::symlink(target, &link_path)
            .await
            .with_context(|| format!("Failed to link {} -> {}", link, target))
    }

    pub async fn set_mode(&self, absolute: &str, mode: u32) -> Result<()> {
        fs::set_permissions(self.path(absolute), std::fs::Permissions::from_mode(mode))
            .await
            .with_context(|| format!("Failed to chmod {:o} {}", mode, absolute))
    }

    async fn audit(&self, command_line: &str, output: &CommandOutput) {
        let Some(log_file) = &self.audit_log else {
            return;
        };
        let status = if output.success() { "success" } else { "error" };
        let details = if output.stderr.trim().is_empty() {
            None
        } else {
            Some(output.stderr.trim())
        };
        let entry = AuditLog::new(
            "command",
            &self.user,
            Some(command_line),
            status,
            Some(output.code),
            details,
        );
        if let Err(e) = audit::log_audit_event(&entry, Path::new(log_file)).await {
            warn!("Не удалось записать аудит: {:#}", e);
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::command::fake::FakeRunner;

    /// Хост с фиктивным исполнителем и временным корнем
    pub struct TestHost {
        pub runner: Arc<FakeRunner>,
        pub host: Host,
        pub dir: TempDir,
    }

    impl TestHost {
        pub fn new() -> Self {
            Self::with_runner(FakeRunner::new())
        }

        pub fn with_runner(runner: FakeRunner) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let runner = Arc::new(runner);
            let host = Host::new(
                runner.clone(),
                dir.path(),
                Some(dir.path().join("var/log/server-panel.log")),
                Duration::from_secs(5),
            );
            Self { runner, host, dir }
        }

        pub fn read(&self, absolute: &str) -> String {
            std::fs::read_to_string(self.host.path(absolute)).unwrap()
        }

        pub fn put(&self, absolute: &str, content: &str) {
            let path = self.host.path(absolute);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestHost;
    use crate::command::CommandOutput;

    #[tokio::test]
    async fn append_if_missing_is_idempotent() {
        let t = TestHost::new();
        t.put("/etc/fstab", "UUID=abc / ext4 defaults 0 1");

        let line = "/swapfile none swap sw 0 0\n";
        assert!(t.host.append_if_missing("/etc/fstab", "/swapfile", line).await.unwrap());
        assert!(!t.host.append_if_missing("/etc/fstab", "/swapfile", line).await.unwrap());

        let fstab = t.read("/etc/fstab");
        assert_eq!(fstab.matches("/swapfile").count(), 1);
        assert!(fstab.starts_with("UUID=abc / ext4 defaults 0 1\n/swapfile"));
    }

    #[tokio::test]
    async fn check_turns_exit_code_into_error() {
        let t = TestHost::new();
        t.runner
            .on("nginx -t", CommandOutput::failed(1, "nginx: [emerg] unexpected \"}\""));

        let err = t.host.run_checked("nginx", &["-t"]).await.unwrap_err();
        assert!(err.to_string().contains("[emerg]"));
        assert!(t.host.run("nginx", &["-t"]).await.is_ok());
    }

    #[tokio::test]
    async fn commands_are_audited_without_stdin() {
        let t = TestHost::new();
        t.host
            .exec(
                crate::command::CommandSpec::new("debconf-set-selections")
                    .stdin("mysql-server mysql-server/root_password password secret"),
            )
            .await
            .unwrap();

        let log = t.read("/var/log/server-panel.log");
        assert!(log.contains("debconf-set-selections"));
        assert!(!log.contains("secret"));
    }

    #[tokio::test]
    async fn symlink_replaces_existing_link() {
        let t = TestHost::new();
        t.host.symlink("/etc/a", "/etc/enabled/site").await.unwrap();
        t.host.symlink("/etc/b", "/etc/enabled/site").await.unwrap();
        let target = std::fs::read_link(t.host.path("/etc/enabled/site")).unwrap();
        assert_eq!(target, std::path::PathBuf::from("/etc/b"));
        assert!(t.host.exists("/etc/enabled/site").await);
    }

    #[tokio::test]
    async fn private_files_are_never_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let t = TestHost::new();
        t.host.write_private("/root/secret.json", "{\"password\":\"S3cret\"}").await.unwrap();
        let mode = std::fs::metadata(t.host.path("/root/secret.json")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        t.put("/root/old.key", "old");
        std::fs::set_permissions(t.host.path("/root/old.key"), std::fs::Permissions::from_mode(0o644))
            .unwrap();
        t.host.write_private("/root/old.key", "new").await.unwrap();
        let mode = std::fs::metadata(t.host.path("/root/old.key")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(t.read("/root/old.key"), "new");
    }

    #[tokio::test]
    async fn apt_install_is_noninteractive() {
        let t = TestHost::new();
        t.host.apt_install(&["nginx", "certbot"]).await.unwrap();
        assert!(t.runner.called("apt-get install -y nginx certbot"));
    }
}
