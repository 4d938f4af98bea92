use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::{component::Context, host::Host, response::Transcript, sizing, templates};

pub const FRAGMENT_PATH: &str = "/etc/redis/redis.conf.d/99-cache.conf";
pub const MAIN_CONFIG: &str = "/etc/redis/redis.conf";
const SERVICE: &str = "redis-server";

/// Первое слово строки конфигурации, если это активная директива
fn active_directive(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    line.split_whitespace().next()
}

/// Директива из закомментированной строки шаблона (`# maxmemory <bytes>`)
fn commented_directive(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix('#')?
        .split_whitespace()
        .next()
}

/// Директивы, чьи активные строки с другим значением комментируются:
/// несколько `save` складываются, а не перекрывают друг друга
const ENFORCED: &[&str] = &["save", "appendonly"];

fn include_line() -> String {
    format!("include {}", FRAGMENT_PATH)
}

/// Вносит директивы в основной redis.conf
///
/// Активные директивы не трогает, кроме `ENFORCED`: их чужие значения
/// комментируются. Закомментированная строка шаблона заменяется значением,
/// иначе директива дописывается. Последней строкой идет `include` фрагмента,
/// в Redis побеждает последнее значение. Возвращает `None`, если менять нечего.
pub fn merge_directives(content: &str, directives: &[(&str, String)]) -> Option<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut changed = false;

    for (key, value) in directives {
        let directive = format!("{} {}", key, value);
        if ENFORCED.contains(key) {
            for line in lines.iter_mut() {
                if active_directive(line) == Some(*key) && line.trim() != directive {
                    debug!("Отключена директива redis.conf: {}", line.trim());
                    *line = format!("# {}", line.trim());
                    changed = true;
                }
            }
            if lines.iter().any(|line| line.trim() == directive) {
                continue;
            }
        } else if lines.iter().any(|line| active_directive(line) == Some(*key)) {
            debug!("Директива {} уже задана в redis.conf", key);
            continue;
        }
        match lines
            .iter()
            .position(|line| commented_directive(line) == Some(*key))
        {
            Some(pos) => lines[pos] = directive,
            None => lines.push(directive),
        }
        changed = true;
    }

    let include = include_line();
    if lines.last().map(|line| line.trim()) != Some(include.as_str()) {
        lines.retain(|line| line.trim() != include);
        lines.push(include);
        changed = true;
    }

    changed.then(|| {
        let mut merged = lines.join("\n");
        merged.push('\n');
        merged
    })
}

pub async fn ping(host: &Host) -> bool {
    match host.run("redis-cli", &["ping"]).await {
        Ok(output) => output.success() && output.stdout.trim() == "PONG",
        Err(_) => false,
    }
}

pub async fn install(ctx: &Context<'_>, out: &mut Transcript) -> Result<()> {
    let host = ctx.host;
    out.line("Installing Redis...");
    host.apt_install(&[SERVICE]).await?;

    let rec = sizing::recommendation_for(host, out).await;
    host.write_file(FRAGMENT_PATH, &templates::redis_fragment(rec.redis_max_memory_mb))
        .await?;

    match host.read_file(MAIN_CONFIG).await? {
        Some(content) => {
            let directives = templates::redis_directives(rec.redis_max_memory_mb);
            if let Some(merged) = merge_directives(&content, &directives) {
                host.write_file(MAIN_CONFIG, &merged).await?;
                info!("Настройки кэша внесены в {}", MAIN_CONFIG);
            }
        }
        None => out.warning(format!("{} not found, only {} written", MAIN_CONFIG, FRAGMENT_PATH)),
    }
    out.line(format!(
        "Redis configured as cache: maxmemory {} MB, allkeys-lru",
        rec.redis_max_memory_mb
    ));

    host.systemctl("restart", SERVICE).await?;
    host.systemctl("enable", SERVICE).await?;

    if !ping(host).await {
        return Err(anyhow!("Redis did not answer PING after restart"));
    }
    out.line("Redis answered PONG");
    Ok(())
}

pub async fn test(ctx: &Context<'_>) -> Result<bool> {
    Ok(ping(ctx.host).await)
}

pub async fn repair(ctx: &Context<'_>, out: &mut Transcript) -> Result<String> {
    let host = ctx.host;

    out.line("Restarting Redis");
    host.run("systemctl", &["restart", SERVICE]).await?;
    for dir in ["/var/lib/redis", "/var/log/redis", "/run/redis"] {
        let chown = host.run("chown", &["-R", "redis:redis", dir]).await?;
        if !chown.success() {
            out.warning(format!("Could not fix ownership of {}", dir));
        }
    }
    host.run("systemctl", &["restart", SERVICE]).await?;

    if ping(host).await {
        out.line("Redis answered PONG");
        return Ok("Redis repaired".to_string());
    }

    out.warning("Redis still does not answer, reinstalling redis-server");
    host.apt_reinstall(&[SERVICE]).await?;
    host.systemctl("restart", SERVICE).await?;
    if ping(host).await {
        out.line("Redis answered PONG");
        Ok("Redis reinstalled".to_string())
    } else {
        Err(anyhow!("Redis reinstalled but still does not answer PING"))
    }
}
