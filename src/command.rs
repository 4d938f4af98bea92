//! Порт выполнения внешних команд
//!
//! Все обращения к `apt-get`, `systemctl`, `ufw` и прочим утилитам идут через
//! трейт [`CommandRunner`]. Результат всегда содержит код возврата, stdout и
//! stderr, поэтому успех определяется по коду, а не по тексту вывода.

use std::{io::ErrorKind, process::Stdio, time::Duration};

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};

/// Код возврата, которым оболочка сообщает об отсутствующей программе
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command `{command}` did not finish within {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("Failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Описание запускаемой команды
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    /// Команда для `sh -c`, нужна там, где используются конвейеры
    pub fn shell(script: &str) -> Self {
        Self::new("sh").args(["-c", script])
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Данные для stdin. В журнал аудита не попадают.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Командная строка для логов и аудита (без stdin и окружения)
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Результат выполнения команды
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[cfg(test)]
    pub fn ok(stdout: &str) -> Self {
        Self {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout и stderr одной строкой, как их увидел бы оператор в терминале
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Запуск команд на локальной системе через `tokio::process`
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let command_line = spec.command_line();
        debug!("Выполнение команды: {}", command_line);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Программа {} не найдена", spec.program);
                return Ok(CommandOutput::failed(
                    EXIT_NOT_FOUND,
                    &format!("{}: command not found", spec.program),
                ));
            }
            Err(source) => {
                return Err(CommandError::Io {
                    command: command_line,
                    source,
                })
            }
        };

        // запись в stdin идет под тем же таймаутом, что и ожидание процесса
        let pipe = child.stdin.take();
        let input = spec.stdin.as_deref().unwrap_or_default();
        let feed = async move {
            if let Some(mut pipe) = pipe {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!("Программа не дочитала stdin: {}", e);
                }
                // закрываем stdin, иначе программа будет ждать конца ввода
            }
        };
        let wait = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };
        let result = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                CommandError::Timeout {
                    command: command_line.clone(),
                    secs: limit.as_secs(),
                }
            })?,
            None => wait.await,
        };

        let output = result.map_err(|source| CommandError::Io {
            command: command_line.clone(),
            source,
        })?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_program_and_args() {
        let spec = CommandSpec::new("ufw").args(["allow", "80/tcp"]);
        assert_eq!(spec.command_line(), "ufw allow 80/tcp");
        assert_eq!(CommandSpec::new("nproc").command_line(), "nproc");
    }

    #[test]
    fn combined_output_keeps_both_streams() {
        let output = CommandOutput {
            code: 1,
            stdout: "line\n".into(),
            stderr: "oops\n".into(),
        };
        assert_eq!(output.combined(), "line\noops");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn system_runner_reports_exit_code_and_stdin() {
        let output = SystemRunner
            .run(&CommandSpec::new("cat").stdin("hello"))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello");

        let output = SystemRunner
            .run(&CommandSpec::shell("echo fail >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(output.code, 3);
        assert_eq!(output.stderr.trim(), "fail");
    }

    #[tokio::test]
    async fn missing_program_maps_to_exit_127() {
        let output = SystemRunner
            .run(&CommandSpec::new("definitely-not-a-real-binary-42"))
            .await
            .unwrap();
        assert_eq!(output.code, EXIT_NOT_FOUND);
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let err = SystemRunner
            .run(&CommandSpec::new("sleep").args(["5"]).timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn timeout_covers_unread_stdin() {
        let payload = "x".repeat(1 << 20);
        let err = SystemRunner
            .run(
                &CommandSpec::new("sleep")
                    .args(["5"])
                    .stdin(payload)
                    .timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn fake_runner_prefers_one_shot_rules() {
        let runner = fake::FakeRunner::new();
        runner
            .on("redis-cli ping", CommandOutput::ok("PONG\n"))
            .once("redis-cli ping", CommandOutput::failed(1, "refused"));

        let spec = CommandSpec::new("redis-cli").args(["ping"]);
        assert_eq!(runner.run(&spec).await.unwrap().code, 1);
        assert_eq!(runner.run(&spec).await.unwrap().stdout, "PONG\n");
        assert_eq!(runner.count("redis-cli ping"), 2);
    }
}
