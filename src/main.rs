use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use log::{info, warn};

mod audit;
mod backup;
mod command;
mod component;
mod config;
mod console;
mod dispatcher;
mod finalize;
mod github;
mod host;
mod logger;
mod mysql;
mod nginx;
mod nodejs;
mod php;
mod redis;
mod response;
mod security;
mod server;
mod sizing;
mod templates;
mod ui;
mod utils;
mod wizard;

use crate::{
    command::SystemRunner,
    config::{PanelSettings, WizardConfig},
    dispatcher::Dispatcher,
    host::Host,
};

#[derive(Parser)]
#[command(author, version, about = "Provisioning wizard for a PHP + Node.js production server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Файл настроек панели (TOML)
    #[arg(short, long, env = "SERVER_PANEL_CONFIG", default_value = "/etc/server-panel/config.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Запуск веб-мастера и эндпоинта /api/install
    Serve {
        /// Адрес для прослушивания
        #[arg(long)]
        bind: Option<String>,

        /// Порт установщика
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Мастер настройки в терминале
    Wizard {
        /// Доменное имя сайта
        #[arg(short, long)]
        domain: Option<String>,
    },
    /// Рекомендуемые настройки для заданных ресурсов
    Recommend {
        /// Объем памяти, МБ
        #[arg(long)]
        ram: u64,

        /// Число ядер CPU
        #[arg(long, default_value_t = 1)]
        cpus: u64,

        /// Вывод в JSON
        #[arg(long)]
        json: bool,
    },
}

fn build_dispatcher(settings: PanelSettings) -> Dispatcher {
    let host = Host::new(
        Arc::new(SystemRunner),
        settings.host_root.clone(),
        settings.audit_log.clone(),
        settings.command_timeout(),
    );
    Dispatcher::new(host, settings)
}

fn require_root() -> Result<()> {
    if !utils::is_root() {
        bail!("This command must be run as root");
    }
    Ok(())
}

fn print_recommendation(ram: u64, cpus: u64, json: bool) -> Result<()> {
    let rec = sizing::recommend(ram, cpus);
    if json {
        println!("{}", serde_json::to_string_pretty(&rec)?);
        return Ok(());
    }

    println!("{} {}", "Tier:".bold(), rec.tier.green().bold());
    let rows = [
        ("PHP-FPM max_children", rec.fpm_max_children.to_string()),
        ("PHP-FPM start_servers", rec.fpm_start_servers.to_string()),
        ("PHP-FPM min_spare_servers", rec.fpm_min_spare_servers.to_string()),
        ("PHP-FPM max_spare_servers", rec.fpm_max_spare_servers.to_string()),
        ("OPcache memory", format!("{} MB", rec.opcache_memory_mb)),
        ("MySQL buffer pool", format!("{} MB", rec.mysql_buffer_pool_mb)),
        ("MySQL max_connections", rec.mysql_max_connections.to_string()),
        ("Redis maxmemory", format!("{} MB", rec.redis_max_memory_mb)),
        ("Nginx worker_processes", rec.nginx_worker_processes.to_string()),
        ("Nginx worker_connections", rec.nginx_worker_connections.to_string()),
        ("Recommended swap", format!("{} GB", rec.swap_recommended_gb)),
    ];
    for (name, value) in rows {
        println!("  {:<28} {}", name, value);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        // .env необязателен
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    let cli = Cli::parse();
    logger::init();
    let mut settings = PanelSettings::load(Some(cli.config.as_path()))?;
    logger::set_level(&settings.log_level);
    info!("Запуск server-panel {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Recommend { ram, cpus, json }) => print_recommendation(ram, cpus, json)?,
        Some(Commands::Wizard { domain }) => {
            require_root()?;
            let dispatcher = build_dispatcher(settings);
            let config = WizardConfig {
                domain: domain.unwrap_or_default(),
                ..Default::default()
            };
            console::run(&dispatcher, config).await?;
        }
        Some(Commands::Serve { bind, port }) => {
            require_root()?;
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if settings.bind == "0.0.0.0" {
                warn!("Установщик доступен из сети без аутентификации, закройте порт после настройки");
            }
            let bind = settings.bind.clone();
            let port = settings.port;
            server::serve(Arc::new(build_dispatcher(settings)), &bind, port).await?;
        }
        None => {
            require_root()?;
            let bind = settings.bind.clone();
            let port = settings.port;
            server::serve(Arc::new(build_dispatcher(settings)), &bind, port).await?;
        }
    }

    Ok(())
}
