use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Result;
use log::{debug, info};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Префикс переменных окружения, переопределяющих настройки
pub const ENV_PREFIX: &str = "SERVER_PANEL_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {message}")]
    ReadError { path: String, message: String },
    #[error("Failed to parse settings file {path}: {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Режим SSL, выбираемый на последнем шаге мастера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    #[default]
    Letsencrypt,
    Cloudflare,
    #[serde(rename = "none")]
    Disabled,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Letsencrypt => "letsencrypt",
            SslMode::Cloudflare => "cloudflare",
            SslMode::Disabled => "none",
        }
    }
}

/// Конфигурация мастера, накапливаемая по шагам
///
/// Передается целиком в каждом запросе; на сервере между запросами
/// не хранится.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WizardConfig {
    pub domain: String,
    pub ssh_port: u16,
    pub enable_swap: bool,
    pub swap_size: u32,
    pub mysql_root_password: String,
    pub enable_ufw: bool,
    pub enable_fail2ban: bool,
    pub enable_github: bool,
    pub github_repo: String,
    pub github_branch: String,
    pub ssl_mode: SslMode,
    pub ssl_email: Option<String>,
    pub cloudflare_cert: String,
    pub cloudflare_key: String,
    pub ssh_allow_password: bool,
    pub ssh_allow_key: bool,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            ssh_port: 22,
            enable_swap: true,
            swap_size: 2,
            mysql_root_password: String::new(),
            enable_ufw: true,
            enable_fail2ban: true,
            enable_github: true,
            github_repo: String::new(),
            github_branch: "main".to_string(),
            ssl_mode: SslMode::default(),
            ssl_email: None,
            cloudflare_cert: String::new(),
            cloudflare_key: String::new(),
            ssh_allow_password: true,
            ssh_allow_key: true,
        }
    }
}

impl WizardConfig {
    pub fn domain(&self) -> &str {
        self.domain.trim()
    }

    pub fn branch(&self) -> &str {
        match self.github_branch.trim() {
            "" => "main",
            branch => branch,
        }
    }

    /// Email для Let's Encrypt, по умолчанию admin@<домен>
    pub fn ssl_email(&self) -> String {
        match self.ssl_email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_string(),
            _ => format!("admin@{}", self.domain()),
        }
    }

    /// Генерирует надежный пароль
    pub fn generate_strong_password(length: usize) -> Result<String> {
        if length < 8 {
            return Err(anyhow::anyhow!(
                "Password must be at least 8 characters long"
            ));
        }

        let mut rng = thread_rng();
        loop {
            let password: String = (0..length)
                .map(|_| match rng.gen_range(0..3) {
                    0 => rng.gen_range(b'A'..=b'Z') as char,
                    1 => rng.gen_range(b'a'..=b'z') as char,
                    _ => rng.gen_range(b'0'..=b'9') as char,
                })
                .collect();

            // Пароль должен содержать все типы символов
            let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
            let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());
            let has_digit = password.chars().any(|c| c.is_ascii_digit());

            if has_uppercase && has_lowercase && has_digit {
                return Ok(password);
            }
        }
    }
}

/// Настройки процесса, не относящиеся к мастеру
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    pub log_level: String,
    pub bind: String,
    pub port: u16,
    /// Корень файловой системы хоста
    pub host_root: PathBuf,
    pub www_root: String,
    pub credentials_path: String,
    pub audit_log: Option<PathBuf>,
    pub backup_dir: String,
    /// Директория установщика, удаляемая после финализации
    pub installer_dir: Option<String>,
    pub node_major: u32,
    pub deploy_user: String,
    pub command_timeout_secs: u64,
    pub cleanup_delay_secs: u64,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bind: "0.0.0.0".to_string(),
            port: 8080,
            host_root: PathBuf::from("/"),
            www_root: "/var/www".to_string(),
            credentials_path: "/root/.server-panel-credentials.json".to_string(),
            audit_log: Some(PathBuf::from("/var/log/server-panel.log")),
            backup_dir: "/var/backups/server-panel".to_string(),
            installer_dir: None,
            node_major: 20,
            deploy_user: "deploy".to_string(),
            command_timeout_secs: 900,
            cleanup_delay_secs: 5,
        }
    }
}

impl PanelSettings {
    /// Загружает настройки из TOML-файла (если он есть) и применяет
    /// переопределения из окружения
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                info!("Файл настроек {:?} не найден, используются значения по умолчанию", path);
                Self::default()
            }
            None => Self::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let settings: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        debug!("Настройки загружены из {:?}", path);
        Ok(settings)
    }

    /// Переопределяет поля значениями `SERVER_PANEL_*`
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        override_from_env("LOG_LEVEL", &mut self.log_level)?;
        override_from_env("BIND", &mut self.bind)?;
        override_from_env("PORT", &mut self.port)?;
        override_from_env("HOST_ROOT", &mut self.host_root)?;
        override_from_env("WWW_ROOT", &mut self.www_root)?;
        override_from_env("CREDENTIALS_PATH", &mut self.credentials_path)?;
        override_from_env("BACKUP_DIR", &mut self.backup_dir)?;
        override_from_env("NODE_MAJOR", &mut self.node_major)?;
        override_from_env("DEPLOY_USER", &mut self.deploy_user)?;
        override_from_env("COMMAND_TIMEOUT_SECS", &mut self.command_timeout_secs)?;
        override_from_env("CLEANUP_DELAY_SECS", &mut self.cleanup_delay_secs)?;

        if let Ok(dir) = env::var(format!("{}INSTALLER_DIR", ENV_PREFIX)) {
            self.installer_dir = Some(dir);
        }
        if let Ok(path) = env::var(format!("{}AUDIT_LOG", ENV_PREFIX)) {
            self.audit_log = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        Ok(())
    }

    /// Корень сайта для домена
    pub fn web_root(&self, domain: &str) -> String {
        format!("{}/{}", self.www_root.trim_end_matches('/'), domain)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T) -> Result<(), ConfigError> {
    let name = format!("{}{}", ENV_PREFIX, key);
    if let Ok(value) = env::var(&name) {
        *target = value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key: name, value })?;
    }
    Ok(())
}
