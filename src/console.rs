//! Терминальный драйвер мастера: запросы через dialoguer, действия
//! выполняются тем же диспетчером, что обслуживает HTTP

use std::time::Duration;

use anyhow::{Context, Result};
use colored::*;
use dialoguer::{Confirm, Input, Password, Select};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};

use crate::{
    component::Component,
    config::{SslMode, WizardConfig},
    dispatcher::{ActionRequest, Dispatcher},
    logger,
    response::ActionResponse,
    security, utils,
    wizard::{StepAction, StepId, WizardSession},
};

enum Choice {
    Action(StepAction),
    Continue,
    Back,
    Quit,
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Отправляет запрос диспетчеру под спиннером и печатает вывод
async fn perform(dispatcher: &Dispatcher, request: ActionRequest, label: &str) -> Result<ActionResponse> {
    let pb = spinner(label)?;
    let response = dispatcher.handle(request).await;
    pb.finish_and_clear();

    for line in &response.output {
        logger::console_line(line);
    }
    let message = response.message.clone().unwrap_or_default();
    if response.success {
        logger::success(&message);
    } else {
        logger::failure(&message);
    }
    Ok(response)
}

fn prompt_domain(config: &mut WizardConfig) -> Result<()> {
    loop {
        let domain: String = Input::new()
            .with_prompt("Domain name")
            .with_initial_text(config.domain.clone())
            .interact_text()?;
        let domain = domain.trim().to_string();
        if utils::is_valid_domain(&domain) {
            config.domain = domain;
            return Ok(());
        }
        error!("Некорректное доменное имя: {}", domain);
    }
}

fn prompt_security(config: &mut WizardConfig) -> Result<()> {
    config.enable_ufw = Confirm::new()
        .with_prompt("Enable UFW firewall?")
        .default(config.enable_ufw)
        .interact()?;
    config.enable_fail2ban = Confirm::new()
        .with_prompt("Enable Fail2ban?")
        .default(config.enable_fail2ban)
        .interact()?;
    config.ssh_port = Input::new()
        .with_prompt("SSH port")
        .default(config.ssh_port)
        .validate_with(|port: &u16| if *port == 0 { Err("port must not be 0") } else { Ok(()) })
        .interact_text()?;
    config.ssh_allow_password = Confirm::new()
        .with_prompt("Allow SSH password login?")
        .default(config.ssh_allow_password)
        .interact()?;
    config.ssh_allow_key = Confirm::new()
        .with_prompt("Allow SSH key login?")
        .default(config.ssh_allow_key)
        .interact()?;
    Ok(())
}

/// Пароль root MySQL: ввод с проверкой или генерация
fn prompt_mysql_password(config: &mut WizardConfig) -> Result<()> {
    loop {
        let password = Password::new()
            .with_prompt("MySQL root password (leave empty to generate)")
            .allow_empty_password(true)
            .interact()?;

        if password.is_empty() {
            let generated = WizardConfig::generate_strong_password(20)?;
            logger::password_info(&format!("MySQL root password: {}", generated));
            config.mysql_root_password = generated;
            return Ok(());
        }

        if let Err(e) = security::check_password_strength(&password) {
            error!("Пароль не соответствует требованиям: {}", e);
            continue;
        }

        let confirmation = Password::new().with_prompt("Confirm password").interact()?;
        if password != confirmation {
            error!("Пароли не совпадают, попробуйте еще раз");
            continue;
        }
        config.mysql_root_password = password;
        return Ok(());
    }
}

fn prompt_mysql(config: &mut WizardConfig) -> Result<()> {
    prompt_mysql_password(config)?;
    config.enable_swap = Confirm::new()
        .with_prompt("Create a swap file if none is active?")
        .default(config.enable_swap)
        .interact()?;
    if config.enable_swap {
        config.swap_size = Input::new()
            .with_prompt("Swap size in GB (1-8)")
            .default(config.swap_size)
            .validate_with(|size: &u32| {
                if (1..=8).contains(size) {
                    Ok(())
                } else {
                    Err("swap size must be between 1 and 8")
                }
            })
            .interact_text()?;
    }
    Ok(())
}

fn prompt_github(config: &mut WizardConfig) -> Result<()> {
    config.enable_github = Confirm::new()
        .with_prompt("Set up GitHub deployment?")
        .default(config.enable_github)
        .interact()?;
    if config.enable_github {
        config.github_repo = Input::new()
            .with_prompt("Repository (owner/name)")
            .with_initial_text(config.github_repo.clone())
            .interact_text()?;
        config.github_branch = Input::new()
            .with_prompt("Branch")
            .default(config.branch().to_string())
            .interact_text()?;
    }
    Ok(())
}

fn read_pem(prompt: &str) -> Result<String> {
    let path: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;
    if path.trim().is_empty() {
        return Ok(String::new());
    }
    std::fs::read_to_string(path.trim()).with_context(|| format!("Failed to read {}", path.trim()))
}

fn prompt_ssl(config: &mut WizardConfig) -> Result<()> {
    let modes = [SslMode::Letsencrypt, SslMode::Cloudflare, SslMode::Disabled];
    let labels = ["Let's Encrypt", "Cloudflare origin certificate", "No SSL"];
    let current = modes.iter().position(|m| *m == config.ssl_mode).unwrap_or(0);
    let selected = Select::new()
        .with_prompt("SSL mode")
        .items(&labels)
        .default(current)
        .interact()?;
    config.ssl_mode = modes[selected];

    match config.ssl_mode {
        SslMode::Letsencrypt => {
            let email: String = Input::new()
                .with_prompt("Email for Let's Encrypt")
                .default(config.ssl_email())
                .interact_text()?;
            config.ssl_email = Some(email);
        }
        SslMode::Cloudflare => {
            config.cloudflare_cert = read_pem("Path to origin certificate (empty for flexible SSL)")?;
            if !config.cloudflare_cert.is_empty() {
                config.cloudflare_key = read_pem("Path to origin private key")?;
            }
        }
        SslMode::Disabled => {}
    }
    Ok(())
}

fn edit_settings(step: StepId, config: &mut WizardConfig) -> Result<()> {
    match step {
        StepId::Welcome => prompt_domain(config),
        StepId::Security => prompt_security(config),
        StepId::Mysql => prompt_mysql(config),
        StepId::Github => prompt_github(config),
        StepId::Complete => prompt_ssl(config),
        _ => Ok(()),
    }
}

async fn install(dispatcher: &Dispatcher, session: &mut WizardSession, component: Component) -> Result<()> {
    if component == Component::Mysql && session.config.mysql_root_password.is_empty() {
        prompt_mysql_password(&mut session.config)?;
    }
    let label = format!("Installing {}...", component.label());
    let response = perform(dispatcher, session.install_request(component), &label).await?;
    session.apply_install(component, &response);

    if component == Component::Github && response.success {
        if let Some(key) = &response.private_key {
            println!("\n{}", "Add this private key as the SSH_PRIVATE_KEY secret:".yellow().bold());
            println!("{}", key);
        }
        if let Some(yaml) = &response.workflow_yaml {
            println!("{}", "Save as .github/workflows/deploy.yml:".yellow().bold());
            println!("{}", yaml);
        }
    }
    Ok(())
}

async fn test_all(dispatcher: &Dispatcher, session: &mut WizardSession) -> Result<()> {
    for component in Component::TESTABLE {
        let label = format!("Testing {}...", component.label());
        let response = perform(dispatcher, session.test_request(component), &label).await?;
        session.apply_test(component, &response);
    }
    Ok(())
}

async fn repair_failed(dispatcher: &Dispatcher, session: &mut WizardSession) -> Result<()> {
    for component in session.failed_tests() {
        let label = format!("Repairing {}...", component.label());
        perform(dispatcher, session.repair_request(component), &label).await?;
        let label = format!("Testing {}...", component.label());
        let response = perform(dispatcher, session.test_request(component), &label).await?;
        session.apply_test(component, &response);
    }
    Ok(())
}

/// Возвращает `true`, если установка завершена
async fn finalize(dispatcher: &Dispatcher, session: &WizardSession) -> Result<bool> {
    let confirmed = Confirm::new()
        .with_prompt("Finalize setup? The installer port will be closed and the installer removed.")
        .default(false)
        .interact()?;
    if !confirmed {
        return Ok(false);
    }
    let response = perform(dispatcher, session.finalize_request(), "Finalizing...").await?;
    Ok(response.success)
}

fn choose(session: &WizardSession) -> Result<Choice> {
    let view = session.view();
    println!("\n{}", session.progress_line().dimmed());
    println!("{}", view.title.bold());
    for line in &view.lines {
        logger::console_line(line);
    }

    let mut choices: Vec<Choice> = view.actions.into_iter().map(Choice::Action).collect();
    if !session.is_last() {
        choices.push(Choice::Continue);
    }
    if session.current() > 0 {
        choices.push(Choice::Back);
    }
    choices.push(Choice::Quit);

    let labels: Vec<String> = choices
        .iter()
        .map(|choice| match choice {
            Choice::Action(action) => action.label(),
            Choice::Continue => "Continue".to_string(),
            Choice::Back => "Back".to_string(),
            Choice::Quit => "Quit".to_string(),
        })
        .collect();
    let selected = Select::new().items(&labels).default(0).interact()?;
    Ok(choices.swap_remove(selected))
}

pub async fn run(dispatcher: &Dispatcher, initial: WizardConfig) -> Result<()> {
    let mut session = WizardSession::new(initial);
    info!("Запуск мастера настройки в терминале");

    loop {
        match choose(&session)? {
            Choice::Action(StepAction::Install(component)) => {
                install(dispatcher, &mut session, component).await?
            }
            Choice::Action(StepAction::EditSettings) => {
                edit_settings(session.step().id, &mut session.config)?
            }
            Choice::Action(StepAction::TestAll) => test_all(dispatcher, &mut session).await?,
            Choice::Action(StepAction::RepairFailed) => {
                repair_failed(dispatcher, &mut session).await?
            }
            Choice::Action(StepAction::Finalize) => {
                if finalize(dispatcher, &session).await? {
                    let scheme = if session.config.ssl_mode == SslMode::Disabled { "http" } else { "https" };
                    logger::success(&format!(
                        "Your server is ready: {}://{}",
                        scheme,
                        session.config.domain()
                    ));
                    return Ok(());
                }
            }
            Choice::Continue => {
                if let Err(e) = session.next() {
                    logger::failure(&e.to_string());
                    prompt_domain(&mut session.config)?;
                }
            }
            Choice::Back => session.prev(),
            Choice::Quit => {
                if Confirm::new()
                    .with_prompt("Quit the wizard? Installed components stay installed.")
                    .default(false)
                    .interact()?
                {
                    return Ok(());
                }
            }
        }
    }
}
