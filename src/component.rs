//! Компоненты мастера и их общий контракт install / test / repair

use std::{fmt, str::FromStr};

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::{
    config::{PanelSettings, WizardConfig},
    dispatcher::DispatchError,
    github, host::Host, mysql, nginx, nodejs, php, redis,
    response::{ActionResponse, Transcript},
    security,
};

/// Все, что нужно обработчику компонента для одного запроса
pub struct Context<'a> {
    pub host: &'a Host,
    pub settings: &'a PanelSettings,
    pub config: &'a WizardConfig,
}

impl Context<'_> {
    pub fn web_root(&self) -> String {
        self.settings.web_root(self.config.domain())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Security,
    Php,
    Nodejs,
    Nginx,
    Mysql,
    Redis,
    Github,
}

impl Component {
    pub const ALL: [Component; 7] = [
        Component::Security,
        Component::Php,
        Component::Nodejs,
        Component::Nginx,
        Component::Mysql,
        Component::Redis,
        Component::Github,
    ];

    /// Компоненты, которые проверяет шаг тестирования, в порядке проверки
    pub const TESTABLE: [Component; 5] = [
        Component::Nginx,
        Component::Php,
        Component::Mysql,
        Component::Redis,
        Component::Nodejs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Security => "security",
            Component::Php => "php",
            Component::Nodejs => "nodejs",
            Component::Nginx => "nginx",
            Component::Mysql => "mysql",
            Component::Redis => "redis",
            Component::Github => "github",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Component::Security => "Security",
            Component::Php => "PHP",
            Component::Nodejs => "Node.js",
            Component::Nginx => "Nginx",
            Component::Mysql => "MySQL",
            Component::Redis => "Redis",
            Component::Github => "GitHub deployment",
        }
    }

    /// Устанавливает и настраивает компонент
    ///
    /// Ошибка прерывает установку; накопленный вывод при этом сохраняется
    /// в ответе.
    pub async fn install(self, ctx: &Context<'_>) -> ActionResponse {
        info!("Установка компонента {}", self);
        let mut out = Transcript::new();
        let result = match self {
            Component::Security => security::install(ctx, &mut out).await,
            Component::Php => php::install(ctx, &mut out).await,
            Component::Nodejs => nodejs::install(ctx, &mut out).await,
            Component::Nginx => nginx::install(ctx, &mut out).await,
            Component::Mysql => mysql::install(ctx, &mut out).await,
            Component::Redis => redis::install(ctx, &mut out).await,
            Component::Github => {
                return match github::install(ctx, &mut out).await {
                    Ok(setup) => setup.into_response(out.finish(format!("{} configured", self.label()))),
                    Err(e) => self.failed(out, e),
                };
            }
        };
        match result {
            Ok(()) => out.finish(format!("{} installed", self.label())),
            Err(e) => self.failed(out, e),
        }
    }

    /// Проверка работоспособности; ошибки проверки означают `false`
    pub async fn test(self, ctx: &Context<'_>) -> ActionResponse {
        let result = match self {
            Component::Security => security::test(ctx).await,
            Component::Php => php::test(ctx).await,
            Component::Nodejs => nodejs::test(ctx).await,
            Component::Nginx => nginx::test(ctx).await,
            Component::Mysql => mysql::test(ctx).await,
            Component::Redis => redis::test(ctx).await,
            Component::Github => github::test(ctx).await,
        };
        match result {
            Ok(true) => ActionResponse::ok(format!("{} is working", self.label())),
            Ok(false) => ActionResponse::failure(format!("{} is not working", self.label())),
            Err(e) => {
                error!("Проверка {} завершилась ошибкой: {:#}", self, e);
                ActionResponse::failure(format!("{} is not working: {:#}", self.label(), e))
            }
        }
    }

    /// Восстанавливает компонент независимо от результатов проверки
    pub async fn repair(self, ctx: &Context<'_>) -> ActionResponse {
        info!("Восстановление компонента {}", self);
        let mut out = Transcript::new();
        let result = match self {
            Component::Nginx => nginx::repair(ctx, &mut out).await,
            Component::Php => php::repair(ctx, &mut out).await,
            Component::Mysql => mysql::repair(ctx, &mut out).await,
            Component::Redis => redis::repair(ctx, &mut out).await,
            Component::Nodejs => nodejs::repair(ctx, &mut out).await,
            Component::Security => security::install(ctx, &mut out)
                .await
                .map(|()| format!("{} re-applied", self.label())),
            Component::Github => {
                return match github::install(ctx, &mut out).await {
                    Ok(setup) => setup.into_response(out.finish(format!("{} re-applied", self.label()))),
                    Err(e) => self.failed(out, e),
                };
            }
        };
        match result {
            Ok(message) => out.finish(message),
            Err(e) => self.failed(out, e),
        }
    }

    fn failed(self, out: Transcript, e: anyhow::Error) -> ActionResponse {
        error!("Компонент {}: {:#}", self, e);
        out.fail(format!("{:#}", e))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Component::ALL
            .into_iter()
            .find(|component| component.as_str() == s)
            .ok_or(DispatchError::UnknownComponent)
    }
}
