//! Машина состояний мастера
//!
//! Модуль чистый: навигация и отрисовка шага не выполняют команд. Побочные
//! эффекты возникают только из явных действий, которые драйвер (терминал
//! или браузер) отправляет в диспетчер.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    component::Component,
    config::{SslMode, WizardConfig},
    dispatcher::{Action, ActionRequest},
    response::ActionResponse,
    utils::yes_no,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WizardError {
    #[error("Please enter your domain name")]
    DomainRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepId {
    Welcome,
    Security,
    Php,
    Nodejs,
    Nginx,
    Mysql,
    Redis,
    Github,
    Testing,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub id: StepId,
    pub title: &'static str,
    pub icon: &'static str,
}

pub const STEPS: [Step; 10] = [
    Step { id: StepId::Welcome, title: "Welcome", icon: "👋" },
    Step { id: StepId::Security, title: "Security", icon: "🔒" },
    Step { id: StepId::Php, title: "PHP", icon: "🐘" },
    Step { id: StepId::Nodejs, title: "Node.js", icon: "⬢" },
    Step { id: StepId::Nginx, title: "Nginx", icon: "🌐" },
    Step { id: StepId::Mysql, title: "MySQL", icon: "🗃️" },
    Step { id: StepId::Redis, title: "Redis", icon: "⚡" },
    Step { id: StepId::Github, title: "GitHub", icon: "🐙" },
    Step { id: StepId::Testing, title: "Testing", icon: "✅" },
    Step { id: StepId::Complete, title: "Complete", icon: "🎉" },
];

impl StepId {
    /// Компонент, который устанавливает этот шаг
    pub fn component(&self) -> Option<Component> {
        match self {
            StepId::Security => Some(Component::Security),
            StepId::Php => Some(Component::Php),
            StepId::Nodejs => Some(Component::Nodejs),
            StepId::Nginx => Some(Component::Nginx),
            StepId::Mysql => Some(Component::Mysql),
            StepId::Redis => Some(Component::Redis),
            StepId::Github => Some(Component::Github),
            StepId::Welcome | StepId::Testing | StepId::Complete => None,
        }
    }
}

/// Ключи и workflow, полученные при настройке GitHub
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GithubArtifacts {
    pub ssh_public_key: Option<String>,
    pub workflow_yaml: Option<String>,
}

/// Действие, доступное на шаге
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Install(Component),
    EditSettings,
    TestAll,
    RepairFailed,
    Finalize,
}

impl StepAction {
    pub fn label(&self) -> String {
        match self {
            StepAction::Install(component) => format!("Install {}", component.label()),
            StepAction::EditSettings => "Edit settings".to_string(),
            StepAction::TestAll => "Test all".to_string(),
            StepAction::RepairFailed => "Repair failed".to_string(),
            StepAction::Finalize => "Finalize setup".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepView {
    pub title: String,
    pub lines: Vec<String>,
    pub actions: Vec<StepAction>,
}

#[derive(Debug, Clone, Default)]
pub struct WizardSession {
    current: usize,
    pub config: WizardConfig,
    completed: BTreeMap<Component, bool>,
    test_results: BTreeMap<Component, bool>,
    pub github: GithubArtifacts,
}

impl WizardSession {
    pub fn new(config: WizardConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn step(&self) -> &'static Step {
        &STEPS[self.current]
    }

    pub fn is_last(&self) -> bool {
        self.current == STEPS.len() - 1
    }

    /// Переход вперед; с первого шага только при заданном домене
    pub fn next(&mut self) -> Result<(), WizardError> {
        if self.current == 0 && self.config.domain().is_empty() {
            return Err(WizardError::DomainRequired);
        }
        if !self.is_last() {
            self.current += 1;
        }
        Ok(())
    }

    pub fn prev(&mut self) {
        self.current = self.current.saturating_sub(1);
    }

    pub fn is_completed(&self, component: Component) -> bool {
        self.completed.get(&component).copied().unwrap_or(false)
    }

    pub fn test_result(&self, component: Component) -> Option<bool> {
        self.test_results.get(&component).copied()
    }

    pub fn install_request(&self, component: Component) -> ActionRequest {
        ActionRequest::new(Action::Install, Some(component), self.config.clone())
    }

    pub fn test_request(&self, component: Component) -> ActionRequest {
        ActionRequest::new(Action::Test, Some(component), self.config.clone())
    }

    pub fn repair_request(&self, component: Component) -> ActionRequest {
        ActionRequest::new(Action::Repair, Some(component), self.config.clone())
    }

    pub fn finalize_request(&self) -> ActionRequest {
        ActionRequest::new(Action::Finalize, None, self.config.clone())
    }

    pub fn apply_install(&mut self, component: Component, response: &ActionResponse) {
        self.completed.insert(component, response.success);
        if component == Component::Github && response.success {
            self.github = GithubArtifacts {
                ssh_public_key: response.ssh_public_key.clone(),
                workflow_yaml: response.workflow_yaml.clone(),
            };
        }
    }

    pub fn apply_test(&mut self, component: Component, response: &ActionResponse) {
        self.test_results.insert(component, response.success);
    }

    /// Компоненты, последняя проверка которых не прошла, в порядке проверки
    pub fn failed_tests(&self) -> Vec<Component> {
        Component::TESTABLE
            .into_iter()
            .filter(|component| self.test_result(*component) == Some(false))
            .collect()
    }

    pub fn progress_line(&self) -> String {
        let step = self.step();
        format!(
            "Step {}/{}: {} {}",
            self.current + 1,
            STEPS.len(),
            step.icon,
            step.title
        )
    }

    /// GitHub-деплой можно отключить, остальные компоненты обязательны
    pub fn is_enabled(&self, component: Component) -> bool {
        component != Component::Github || self.config.enable_github
    }

    fn status(&self, component: Component) -> &'static str {
        if !self.is_enabled(component) {
            "skipped"
        } else if self.is_completed(component) {
            "installed"
        } else {
            "not installed"
        }
    }

    /// Содержимое текущего шага как чистая функция состояния
    pub fn view(&self) -> StepView {
        let step = self.step();
        let config = &self.config;
        let mut lines = Vec::new();
        let mut actions = Vec::new();

        match step.id {
            StepId::Welcome => {
                lines.push("Provision this server for a PHP + Node.js production stack.".to_string());
                lines.push(format!(
                    "Domain: {}",
                    if config.domain().is_empty() { "(not set)" } else { config.domain() }
                ));
                actions.push(StepAction::EditSettings);
            }
            StepId::Security => {
                lines.push(format!("UFW firewall: {}", yes_no(config.enable_ufw)));
                lines.push(format!("Fail2ban: {}", yes_no(config.enable_fail2ban)));
                lines.push(format!("SSH port: {}", config.ssh_port));
                lines.push(format!(
                    "SSH password login: {}, key login: {}",
                    yes_no(config.ssh_allow_password),
                    yes_no(config.ssh_allow_key)
                ));
                if !config.ssh_allow_password && !config.ssh_allow_key {
                    lines.push("WARNING: no SSH login method selected, password login will stay enabled".to_string());
                }
                actions.push(StepAction::EditSettings);
            }
            StepId::Php => lines.push("PHP-FPM with common extensions and OPcache".to_string()),
            StepId::Nodejs => lines.push("Node.js from NodeSource and PM2".to_string()),
            StepId::Nginx => {
                lines.push(format!("Site: {} (www.{})", config.domain(), config.domain()));
            }
            StepId::Mysql => {
                lines.push(format!(
                    "Root password: {}",
                    if config.mysql_root_password.is_empty() { "(not set)" } else { "********" }
                ));
                lines.push(if config.enable_swap {
                    format!("Swap file: {} GB", config.swap_size)
                } else {
                    "Swap file: no".to_string()
                });
                actions.push(StepAction::EditSettings);
            }
            StepId::Redis => lines.push("Redis as an LRU cache on 127.0.0.1".to_string()),
            StepId::Github if !config.enable_github => {
                lines.push("GitHub deployment: disabled".to_string());
                actions.push(StepAction::EditSettings);
            }
            StepId::Github => {
                lines.push(format!(
                    "Repository: {} (branch {})",
                    if config.github_repo.trim().is_empty() { "(not set)" } else { config.github_repo.trim() },
                    config.branch()
                ));
                if let Some(key) = &self.github.ssh_public_key {
                    lines.push(format!("Deploy key: {}", key));
                }
                if self.github.workflow_yaml.is_some() {
                    lines.push("Workflow: .github/workflows/deploy.yml ready".to_string());
                }
                actions.push(StepAction::EditSettings);
            }
            StepId::Testing => {
                for component in Component::TESTABLE {
                    let result = match self.test_result(component) {
                        None => "not tested",
                        Some(true) => "passed",
                        Some(false) => "failed",
                    };
                    lines.push(format!("{}: {}", component.label(), result));
                }
                actions.push(StepAction::TestAll);
                if !self.failed_tests().is_empty() {
                    actions.push(StepAction::RepairFailed);
                }
            }
            StepId::Complete => {
                lines.push(format!("SSL mode: {}", config.ssl_mode.as_str()));
                if config.ssl_mode == SslMode::Letsencrypt {
                    lines.push(format!("Certificate email: {}", config.ssl_email()));
                }
                for component in Component::ALL {
                    lines.push(format!("{}: {}", component.label(), self.status(component)));
                }
                actions.push(StepAction::EditSettings);
                actions.push(StepAction::Finalize);
            }
        }

        if let Some(component) = step.id.component() {
            lines.push(format!("Status: {}", self.status(component)));
            if self.is_enabled(component) {
                actions.insert(0, StepAction::Install(component));
            }
        }

        StepView {
            title: format!("{} {}", step.icon, step.title),
            lines,
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_requires_domain() {
        let mut session = WizardSession::default();
        assert_eq!(session.next(), Err(WizardError::DomainRequired));
        assert_eq!(session.current(), 0);

        session.config.domain = "  ".into();
        assert!(session.next().is_err());

        session.config.domain = "example.com".into();
        session.next().unwrap();
        assert_eq!(session.step().id, StepId::Security);
    }

    #[test]
    fn index_stays_in_bounds() {
        let mut session = WizardSession::new(WizardConfig {
            domain: "example.com".into(),
            ..Default::default()
        });
        session.prev();
        assert_eq!(session.current(), 0);
        for _ in 0..20 {
            session.next().unwrap();
        }
        assert_eq!(session.current(), STEPS.len() - 1);
        assert!(session.is_last());
        assert_eq!(session.step().id, StepId::Complete);
    }

    #[test]
    fn disabled_github_offers_no_install() {
        let mut session = WizardSession::new(WizardConfig {
            domain: "example.com".into(),
            enable_github: false,
            ..Default::default()
        });
        session.current = 7;
        assert_eq!(session.step().id, StepId::Github);

        let view = session.view();
        assert_eq!(view.actions, vec![StepAction::EditSettings]);
        assert!(view.lines.contains(&"Status: skipped".to_string()));

        session.config.enable_github = true;
        assert_eq!(session.view().actions[0], StepAction::Install(Component::Github));
    }

    #[test]
    fn results_update_flags_and_github_artifacts() {
        let mut session = WizardSession::default();
        let response = ActionResponse {
            ssh_public_key: Some("ssh-ed25519 AAAA deploy".into()),
            workflow_yaml: Some("name: Deploy".into()),
            ..ActionResponse::ok("GitHub deployment configured")
        };
        session.apply_install(Component::Github, &response);
        assert!(session.is_completed(Component::Github));
        assert_eq!(session.github.workflow_yaml.as_deref(), Some("name: Deploy"));

        session.apply_install(Component::Php, &ActionResponse::failure("boom"));
        assert!(!session.is_completed(Component::Php));
    }

    #[test]
    fn failed_tests_follow_test_order() {
        let mut session = WizardSession::default();
        session.apply_test(Component::Nodejs, &ActionResponse::failure("x"));
        session.apply_test(Component::Nginx, &ActionResponse::ok("x"));
        session.apply_test(Component::Mysql, &ActionResponse::failure("x"));
        assert_eq!(session.failed_tests(), vec![Component::Mysql, Component::Nodejs]);
    }

    #[test]
    fn testing_view_offers_repair_only_after_failures() {
        let mut session = WizardSession::default();
        session.current = 8;
        assert_eq!(session.view().actions, vec![StepAction::TestAll]);

        session.apply_test(Component::Redis, &ActionResponse::failure("x"));
        let view = session.view();
        assert_eq!(view.actions, vec![StepAction::TestAll, StepAction::RepairFailed]);
        assert!(view.lines.contains(&"Redis: failed".to_string()));
        assert!(view.lines.contains(&"Nginx: not tested".to_string()));
    }

    #[test]
    fn component_steps_offer_install_first() {
        let mut session = WizardSession::default();
        session.current = 5;
        let view = session.view();
        assert_eq!(view.title, "🗃️ MySQL");
        assert_eq!(view.actions[0], StepAction::Install(Component::Mysql));
        assert_eq!(session.progress_line(), "Step 6/10: 🗃️ MySQL");
    }

    #[test]
    fn requests_carry_config() {
        let session = WizardSession::new(WizardConfig {
            domain: "example.com".into(),
            ..Default::default()
        });
        let request = session.install_request(Component::Nginx);
        assert_eq!(request.action, "install");
        assert_eq!(request.component.as_deref(), Some("nginx"));
        assert_eq!(request.config.domain, "example.com");
        assert_eq!(session.finalize_request().action, "finalize");
    }
}
