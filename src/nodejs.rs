use anyhow::Result;

use crate::{component::Context, host::Host, response::Transcript};

async fn tool_version(host: &Host, tool: &str) -> Option<String> {
    match host.run(tool, &["--version"]).await {
        Ok(output) if output.success() => Some(output.stdout.trim().to_string()),
        _ => None,
    }
}

async fn report_versions(host: &Host, out: &mut Transcript) {
    let node = tool_version(host, "node").await.unwrap_or_else(|| "unknown".into());
    let npm = tool_version(host, "npm").await.unwrap_or_else(|| "unknown".into());
    out.line(format!("Node.js {}, npm {}", node, npm));
}

pub async fn install(ctx: &Context<'_>, out: &mut Transcript) -> Result<()> {
    let host = ctx.host;
    let major = ctx.settings.node_major;
    out.line(format!("Adding NodeSource repository for Node.js {}.x", major));
    host.shell_checked(&format!(
        "curl -fsSL https://deb.nodesource.com/setup_{}.x | bash -",
        major
    ))
    .await?;

    host.apt_install(&["nodejs"]).await?;
    report_versions(host, out).await;

    out.line("Installing PM2 process manager");
    host.run_checked("npm", &["install", "-g", "pm2"]).await?;
    Ok(())
}

/// `node --version` печатает версию вида `v20.11.1`
pub async fn test(ctx: &Context<'_>) -> Result<bool> {
    Ok(tool_version(ctx.host, "node")
        .await
        .is_some_and(|version| version.starts_with('v')))
}

pub async fn repair(ctx: &Context<'_>, out: &mut Transcript) -> Result<String> {
    out.line("Reinstalling Node.js");
    ctx.host.apt_reinstall(&["nodejs"]).await?;
    report_versions(ctx.host, out).await;
    Ok("Node.js reinstalled".to_string())
}
