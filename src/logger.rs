use colored::*;
use env_logger::{Builder, Env};
use log::{warn, LevelFilter};

/// Инициализирует логирование до загрузки настроек
///
/// Если `RUST_LOG` задан, фильтр берется из него. Иначе пропускается все,
/// а уровень ограничивается `info`, пока [`set_level`] не применит уровень
/// из настроек панели.
///
/// # Examples
/// ```rust
/// logger::init();
/// ```
pub fn init() {
    let env = Env::default()
        .filter_or("RUST_LOG", "trace")
        .write_style_or("RUST_LOG_STYLE", "auto");

    // В тестах и при повторном вызове логгер уже может быть установлен
    let _ = Builder::from_env(env)
        .format_timestamp_secs()
        .format_module_path(true)
        .try_init();

    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Разбирает уровень из настроек (`info`, `debug`, ...)
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    level.trim().parse().ok()
}

/// Применяет уровень из настроек; `RUST_LOG` имеет приоритет
pub fn set_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    match parse_level(level) {
        Some(filter) => log::set_max_level(filter),
        None => warn!("Неизвестный уровень логирования {:?}, оставлен info", level),
    }
}

/// Выводит сгенерированный пароль так, чтобы его было видно в терминале
///
/// # Examples
/// ```rust
/// logger::password_info("MySQL root password: 9fQ2...");
/// ```
pub fn password_info(message: &str) {
    println!(
        "{} {}",
        "[GENERATED PASSWORD]".magenta().bold(),
        message.cyan().bold()
    );
}

pub fn success(message: &str) {
    println!("{} {}", "[SUCCESS]".green().bold(), message);
}

pub fn failure(message: &str) {
    println!("{} {}", "[FAILED]".red().bold(), message);
}

/// Печатает строку вывода действия, подсвечивая предупреждения
pub fn console_line(line: &str) {
    if line.starts_with("WARNING:") {
        println!("  {}", line.yellow());
    } else {
        println!("  {}", line.dimmed());
    }
}
