//! Пользователь деплоя, его SSH-ключ и workflow для GitHub Actions

use anyhow::{anyhow, Context as _, Result};
use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use log::info;
use sha2::{Digest, Sha256};

use crate::{
    component::Context,
    host::Host,
    response::{ActionResponse, Transcript},
    templates::{self, WorkflowParams},
    utils,
};

/// Ключевая пара деплоя
#[derive(Debug, Clone)]
pub struct DeployKey {
    pub public_key: String,
    pub private_key: String,
    pub fingerprint: String,
}

impl DeployKey {
    pub fn into_response(self, response: ActionResponse) -> ActionResponse {
        ActionResponse {
            ssh_public_key: Some(self.public_key),
            private_key: Some(self.private_key),
            fingerprint: Some(self.fingerprint),
            ..response
        }
    }
}

#[derive(Debug, Clone)]
pub struct GithubSetup {
    pub key: DeployKey,
    pub workflow_yaml: String,
}

impl GithubSetup {
    pub fn into_response(self, response: ActionResponse) -> ActionResponse {
        let response = self.key.into_response(response);
        ActionResponse {
            workflow_yaml: Some(self.workflow_yaml),
            ..response
        }
    }
}

/// Отпечаток открытого ключа в формате `ssh-keygen -l`: `SHA256:<base64>`
pub fn fingerprint(public_key: &str) -> Result<String> {
    let blob = public_key
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("Malformed public key"))?;
    let bytes = STANDARD
        .decode(blob)
        .context("Public key is not valid base64")?;
    Ok(format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&bytes))))
}

struct KeyPaths {
    ssh_dir: String,
    private: String,
    public: String,
    authorized: String,
}

fn key_paths(user: &str) -> KeyPaths {
    let ssh_dir = format!("/home/{}/.ssh", user);
    KeyPaths {
        private: format!("{}/id_ed25519", ssh_dir),
        public: format!("{}/id_ed25519.pub", ssh_dir),
        authorized: format!("{}/authorized_keys", ssh_dir),
        ssh_dir,
    }
}

async fn user_exists(host: &Host, user: &str) -> Result<bool> {
    Ok(host.run("id", &["-u", user]).await?.success())
}

async fn generate_key(host: &Host, paths: &KeyPaths, comment: &str) -> Result<()> {
    host.run_checked(
        "ssh-keygen",
        &["-t", "ed25519", "-N", "", "-C", comment, "-f", &paths.private, "-q"],
    )
    .await?;
    Ok(())
}

async fn read_key(host: &Host, paths: &KeyPaths) -> Result<DeployKey> {
    let public_key = host
        .read_file(&paths.public)
        .await?
        .ok_or_else(|| anyhow!("Public key {} is missing", paths.public))?
        .trim()
        .to_string();
    let private_key = host
        .read_file(&paths.private)
        .await?
        .ok_or_else(|| anyhow!("Private key {} is missing", paths.private))?;
    Ok(DeployKey {
        fingerprint: fingerprint(&public_key)?,
        public_key,
        private_key,
    })
}

/// Заменяет строку старого ключа новой или дописывает ее
pub fn replace_key_line(authorized: &str, old: Option<&str>, new: &str) -> String {
    let mut lines: Vec<&str> = authorized
        .lines()
        .filter(|line| old.map_or(true, |old| line.trim() != old))
        .filter(|line| line.trim() != new)
        .collect();
    lines.push(new);
    let mut content = lines.join("\n");
    content.push('\n');
    content
}

async fn fix_ssh_permissions(host: &Host, user: &str, paths: &KeyPaths) -> Result<()> {
    host.run_checked("chmod", &["700", &paths.ssh_dir]).await?;
    host.run_checked("chmod", &["600", &paths.authorized]).await?;
    host.run_checked("chown", &["-R", &format!("{0}:{0}", user), &paths.ssh_dir])
        .await?;
    Ok(())
}

pub async fn install(ctx: &Context<'_>, out: &mut Transcript) -> Result<GithubSetup> {
    let host = ctx.host;
    let user = ctx.settings.deploy_user.as_str();
    let domain = ctx.config.domain();
    let web_root = ctx.web_root();
    let paths = key_paths(user);

    if user_exists(host, user).await? {
        out.line(format!("Deploy user {} already exists", user));
    } else {
        host.run_checked("useradd", &["--create-home", "--shell", "/bin/bash", user])
            .await?;
        out.line(format!("Deploy user {} created", user));
    }

    host.create_dir_all(&paths.ssh_dir).await?;
    if host.exists(&paths.private).await {
        out.line("Existing deploy key reused");
    } else {
        generate_key(host, &paths, &format!("deploy@{}", domain)).await?;
        out.line("ed25519 deploy key generated");
    }
    let key = read_key(host, &paths).await?;

    let line = format!("{}\n", key.public_key);
    if host
        .append_if_missing(&paths.authorized, &key.public_key, &line)
        .await?
    {
        info!("Ключ деплоя добавлен в {}", paths.authorized);
    }
    fix_ssh_permissions(host, user, &paths).await?;

    host.run_checked("usermod", &["-aG", "www-data", user]).await?;
    host.create_dir_all(&web_root).await?;
    host.run_checked("chmod", &["-R", "g+w", &web_root]).await?;
    out.line(format!("{} added to www-data with write access to {}", user, web_root));

    let server_ip = utils::server_ip(host).await;
    let workflow_yaml = templates::workflow_yaml(&WorkflowParams {
        host: &server_ip,
        port: ctx.config.ssh_port,
        user,
        web_root: &web_root,
        branch: ctx.config.branch(),
        node_major: ctx.settings.node_major,
    });
    out.line(format!("Deploy key fingerprint: {}", key.fingerprint));
    out.line(format!(
        "Add the private key to {} as the SSH_PRIVATE_KEY secret",
        ctx.config.github_repo.trim()
    ));

    Ok(GithubSetup { key, workflow_yaml })
}

/// Выпускает новый ключ деплоя взамен старого
pub async fn rotate_key(ctx: &Context<'_>, out: &mut Transcript) -> Result<DeployKey> {
    let host = ctx.host;
    let user = ctx.settings.deploy_user.as_str();
    let paths = key_paths(user);

    if !user_exists(host, user).await? {
        return Err(anyhow!(
            "Deploy user {} does not exist, run the GitHub step first",
            user
        ));
    }

    let old = host
        .read_file(&paths.public)
        .await?
        .map(|key| key.trim().to_string());
    host.remove_file(&paths.private).await?;
    host.remove_file(&paths.public).await?;

    host.create_dir_all(&paths.ssh_dir).await?;
    generate_key(host, &paths, &format!("deploy@{}", ctx.config.domain())).await?;
    let key = read_key(host, &paths).await?;

    let authorized = host.read_file(&paths.authorized).await?.unwrap_or_default();
    host.write_file(
        &paths.authorized,
        &replace_key_line(&authorized, old.as_deref(), &key.public_key),
    )
    .await?;
    fix_ssh_permissions(host, user, &paths).await?;

    out.line(format!("New deploy key fingerprint: {}", key.fingerprint));
    out.line("Update the SSH_PRIVATE_KEY secret in your repository");
    Ok(key)
}

pub async fn test(ctx: &Context<'_>) -> Result<bool> {
    let user = ctx.settings.deploy_user.as_str();
    let paths = key_paths(user);
    Ok(user_exists(ctx.host, user).await?
        && ctx.host.exists(&paths.private).await
        && ctx.host.exists(&paths.public).await)
}
