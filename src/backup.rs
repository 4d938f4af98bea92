use anyhow::{anyhow, Context, Result};
use chrono::Local;
use log::{debug, info};

use crate::host::Host;

/// Имя файла бекапа: путь без слешей плюс отметка времени
fn backup_name(absolute: &str, timestamp: &str) -> String {
    let flat: String = absolute
        .trim_start_matches('/')
        .chars()
        .map(|c| if c == '/' { '_' } else { c })
        .collect();
    format!("{}_{}", flat, timestamp)
}

/// Создает бекап файла перед его модификацией
///
/// Возвращает абсолютный путь бекапа на хосте или `None`, если исходного
/// файла нет и сохранять нечего.
pub async fn backup_file(host: &Host, backup_dir: &str, absolute: &str) -> Result<Option<String>> {
    let Some(content) = host.read_file(absolute).await? else {
        debug!("Файл {} не существует, бекап не требуется", absolute);
        return Ok(None);
    };

    let timestamp = Local::now().format("%Y%m%d%H%M%S%3f").to_string();
    let backup_path = format!(
        "{}/{}",
        backup_dir.trim_end_matches('/'),
        backup_name(absolute, &timestamp)
    );

    host.write_file(&backup_path, &content)
        .await
        .with_context(|| format!("Failed to back up {}", absolute))?;

    info!("Создан бекап {} -> {}", absolute, backup_path);
    Ok(Some(backup_path))
}

/// Восстанавливает файл из бекапа
pub async fn restore_from_backup(host: &Host, backup_path: &str, absolute: &str) -> Result<()> {
    let content = host
        .read_file(backup_path)
        .await?
        .ok_or_else(|| anyhow!("Backup {} does not exist", backup_path))?;

    host.write_file(absolute, &content)
        .await
        .with_context(|| format!("Failed to restore {} from {}", absolute, backup_path))?;

    info!("Файл восстановлен из бекапа {} -> {}", backup_path, absolute);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::TestHost;

    #[test]
    fn backup_name_flattens_path() {
        assert_eq!(
            backup_name("/etc/nginx/sites-available/example.com", "20240101"),
            "etc_nginx_sites-available_example.com_20240101"
        );
    }

    #[tokio::test]
    async fn backup_and_restore() {
        let t = TestHost::new();
        let site = "/etc/nginx/sites-available/example.com";
        t.put(site, "server { listen 80; }\n");

        let backup = backup_file(&t.host, "/var/backups/server-panel", site)
            .await
            .unwrap()
            .unwrap();
        assert!(backup.starts_with("/var/backups/server-panel/etc_nginx_sites-available_example.com_"));

        t.put(site, "broken");
        restore_from_backup(&t.host, &backup, site).await.unwrap();
        assert_eq!(t.read(site), "server { listen 80; }\n");
    }

    #[tokio::test]
    async fn missing_file_needs_no_backup() {
        let t = TestHost::new();
        let backup = backup_file(&t.host, "/var/backups/server-panel", "/etc/nothing")
            .await
            .unwrap();
        assert!(backup.is_none());
        assert!(restore_from_backup(&t.host, "/var/backups/none", "/etc/nothing")
            .await
            .is_err());
    }
}
