//! Разбор запросов мастера и вызов компонентов
//!
//! Диспетчер никогда не возвращает ошибку наружу: любой сбой превращается
//! в `{success: false, message}`.

use std::{
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    component::{Component, Context},
    config::{PanelSettings, WizardConfig},
    finalize, github,
    host::Host,
    response::{ActionResponse, Transcript},
    sizing, utils,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown action")]
    UnknownAction,
    #[error("Unknown component")]
    UnknownComponent,
    #[error("Component is required for this action")]
    MissingComponent,
    #[error("Please enter your domain name")]
    DomainRequired,
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
    #[error("GitHub repository is required")]
    RepositoryRequired,
    #[error("GitHub repository must look like owner/name, got {0}")]
    InvalidRepository(String),
    #[error("Invalid branch name: {0}")]
    InvalidBranch(String),
    #[error("GitHub deployment is disabled")]
    GithubDisabled,
    #[error("MySQL root password is required")]
    PasswordRequired,
    #[error("Swap size must be between 1 and 8 GB, got {0}")]
    InvalidSwapSize(u32),
    #[error("SSH port must not be 0")]
    InvalidSshPort,
    #[error("Setup has already been finalized")]
    AlreadyFinalized,
}

/// Тело запроса `POST /api/install`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default)]
    pub config: WizardConfig,
}

impl ActionRequest {
    pub fn new(action: Action, component: Option<Component>, config: WizardConfig) -> Self {
        Self {
            action: action.as_str().to_string(),
            component: component.map(|c| c.as_str().to_string()),
            config,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Test,
    Repair,
    Finalize,
    GenerateSshKey,
    GetSystemInfo,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Test => "test",
            Action::Repair => "repair",
            Action::Finalize => "finalize",
            Action::GenerateSshKey => "generate-ssh-key",
            Action::GetSystemInfo => "get-system-info",
        }
    }
}

impl FromStr for Action {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Action::Install),
            "test" => Ok(Action::Test),
            "repair" => Ok(Action::Repair),
            "finalize" => Ok(Action::Finalize),
            "generate-ssh-key" => Ok(Action::GenerateSshKey),
            "get-system-info" => Ok(Action::GetSystemInfo),
            _ => Err(DispatchError::UnknownAction),
        }
    }
}

fn require_domain(config: &WizardConfig) -> Result<(), DispatchError> {
    let domain = config.domain();
    if domain.is_empty() {
        return Err(DispatchError::DomainRequired);
    }
    if !utils::is_valid_domain(domain) {
        return Err(DispatchError::InvalidDomain(domain.to_string()));
    }
    Ok(())
}

/// Проверки до каких-либо побочных эффектов
pub fn validate(component: Component, config: &WizardConfig) -> Result<(), DispatchError> {
    match component {
        Component::Security => {
            if config.ssh_port == 0 {
                return Err(DispatchError::InvalidSshPort);
            }
        }
        Component::Nginx => require_domain(config)?,
        Component::Mysql => {
            if config.mysql_root_password.is_empty() {
                return Err(DispatchError::PasswordRequired);
            }
            if config.enable_swap && !(1..=8).contains(&config.swap_size) {
                return Err(DispatchError::InvalidSwapSize(config.swap_size));
            }
        }
        Component::Github => {
            require_domain(config)?;
            let repo = config.github_repo.trim();
            if repo.is_empty() {
                return Err(DispatchError::RepositoryRequired);
            }
            if !utils::is_valid_repo(repo) {
                return Err(DispatchError::InvalidRepository(repo.to_string()));
            }
            if !utils::is_valid_branch(config.branch()) {
                return Err(DispatchError::InvalidBranch(config.branch().to_string()));
            }
        }
        Component::Php | Component::Nodejs | Component::Redis => {}
    }
    Ok(())
}

pub struct Dispatcher {
    host: Host,
    settings: PanelSettings,
    finalized: AtomicBool,
}

impl Dispatcher {
    pub fn new(host: Host, settings: PanelSettings) -> Self {
        Self {
            host,
            settings,
            finalized: AtomicBool::new(false),
        }
    }

    /// Разбирает JSON-тело запроса и выполняет действие
    pub async fn handle_json(&self, body: &[u8]) -> ActionResponse {
        match serde_json::from_slice::<ActionRequest>(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!("Некорректный запрос: {}", e);
                ActionResponse::failure(format!("Invalid request: {}", e))
            }
        }
    }

    pub async fn handle(&self, request: ActionRequest) -> ActionResponse {
        info!(
            "Действие {} (компонент: {})",
            request.action,
            request.component.as_deref().unwrap_or("-")
        );
        match self.dispatch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Действие {} отклонено: {:#}", request.action, e);
                ActionResponse::failure(format!("{:#}", e))
            }
        }
    }

    async fn dispatch(&self, request: &ActionRequest) -> Result<ActionResponse> {
        let action: Action = request.action.parse()?;
        let ctx = Context {
            host: &self.host,
            settings: &self.settings,
            config: &request.config,
        };

        match action {
            Action::Install | Action::Test | Action::Repair => {
                let component: Component = request
                    .component
                    .as_deref()
                    .ok_or(DispatchError::MissingComponent)?
                    .parse()?;
                if component == Component::Github && action != Action::Test && !request.config.enable_github {
                    return Err(DispatchError::GithubDisabled.into());
                }
                if action != Action::Test {
                    validate(component, &request.config)?;
                }
                Ok(match action {
                    Action::Install => component.install(&ctx).await,
                    Action::Repair => component.repair(&ctx).await,
                    _ => component.test(&ctx).await,
                })
            }
            Action::Finalize => {
                require_domain(&request.config)?;
                if self.finalized.swap(true, Ordering::SeqCst) {
                    return Err(DispatchError::AlreadyFinalized.into());
                }
                Ok(finalize::finalize(&ctx).await)
            }
            Action::GenerateSshKey => {
                if !request.config.enable_github {
                    return Err(DispatchError::GithubDisabled.into());
                }
                let mut out = Transcript::new();
                Ok(match github::rotate_key(&ctx, &mut out).await {
                    Ok(key) => key.into_response(out.finish("New deploy key generated")),
                    Err(e) => out.fail(format!("{:#}", e)),
                })
            }
            Action::GetSystemInfo => {
                let system = sizing::probe(&self.host).await?;
                let recommendations = sizing::recommend(system.ram_mb, system.cpu_cores);
                Ok(ActionResponse {
                    system: Some(system),
                    recommendations: Some(recommendations),
                    ..ActionResponse::ok("System information collected")
                })
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::{sync::Arc, time::Duration};

    use tempfile::TempDir;

    use super::*;
    use crate::command::fake::FakeRunner;

    /// Диспетчер поверх фиктивного хоста во временной директории
    pub fn dispatcher(runner: Arc<FakeRunner>) -> (Dispatcher, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::new(runner, dir.path(), None, Duration::from_secs(5));
        (Dispatcher::new(host, PanelSettings::default()), dir)
    }
}
