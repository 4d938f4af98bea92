/// Одностраничный мастер, который отдает `GET /`
///
/// Работает с тем же `POST /api/install`, что и терминальный мастер.
pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Server Setup Wizard</title>
<style>
  * { box-sizing: border-box; }
  body { margin: 0; font-family: system-ui, -apple-system, sans-serif; background: #0f172a; color: #e2e8f0; }
  header { padding: 20px 32px; border-bottom: 1px solid #1e293b; display: flex; justify-content: space-between; align-items: center; }
  header h1 { margin: 0; font-size: 20px; }
  #progress { color: #94a3b8; font-size: 14px; }
  nav { display: flex; gap: 6px; padding: 12px 32px; overflow-x: auto; }
  nav span { padding: 6px 10px; border-radius: 6px; background: #1e293b; color: #64748b; font-size: 13px; white-space: nowrap; }
  nav span.active { background: #2563eb; color: #fff; }
  nav span.done { color: #22c55e; }
  main { max-width: 860px; margin: 0 auto; padding: 24px 32px; }
  h2 { margin-top: 0; }
  label { display: block; margin: 12px 0 4px; color: #94a3b8; font-size: 14px; }
  input[type=text], input[type=password], input[type=number], select, textarea { width: 100%; padding: 8px 10px; border-radius: 6px; border: 1px solid #334155; background: #1e293b; color: #e2e8f0; }
  textarea { min-height: 90px; font-family: ui-monospace, monospace; font-size: 12px; }
  .check { display: flex; gap: 8px; align-items: center; margin: 10px 0; color: #cbd5e1; }
  .buttons { display: flex; gap: 10px; margin-top: 20px; flex-wrap: wrap; }
  button { padding: 9px 18px; border: 0; border-radius: 6px; background: #334155; color: #e2e8f0; cursor: pointer; }
  button.primary { background: #2563eb; }
  button.danger { background: #b91c1c; }
  button:disabled { opacity: 0.5; cursor: wait; }
  #console { margin-top: 24px; background: #020617; border: 1px solid #1e293b; border-radius: 6px; padding: 12px; height: 260px; overflow-y: auto; font-family: ui-monospace, monospace; font-size: 12px; white-space: pre-wrap; }
  .ok { color: #22c55e; } .err { color: #ef4444; } .warn { color: #eab308; }
  table { width: 100%; border-collapse: collapse; margin-top: 8px; }
  td { padding: 6px 4px; border-bottom: 1px solid #1e293b; }
</style>
</head>
<body>
<header><h1>Server Setup Wizard</h1><div id="progress"></div></header>
<nav id="steps"></nav>
<main>
  <div id="step"></div>
  <div class="buttons">
    <button id="prev">Back</button>
    <button id="next" class="primary">Continue</button>
  </div>
  <div id="console"></div>
</main>
<script>
const STEPS = [
  { id: "welcome", title: "Welcome", icon: "👋" },
  { id: "security", title: "Security", icon: "🔒" },
  { id: "php", title: "PHP", icon: "🐘" },
  { id: "nodejs", title: "Node.js", icon: "⬢" },
  { id: "nginx", title: "Nginx", icon: "🌐" },
  { id: "mysql", title: "MySQL", icon: "🗃️" },
  { id: "redis", title: "Redis", icon: "⚡" },
  { id: "github", title: "GitHub", icon: "🐙" },
  { id: "testing", title: "Testing", icon: "✅" },
  { id: "complete", title: "Complete", icon: "🎉" },
];
const TESTABLE = ["nginx", "php", "mysql", "redis", "nodejs"];

const state = {
  current: 0,
  busy: false,
  config: {
    domain: "", sshPort: 22, enableSwap: true, swapSize: 2, mysqlRootPassword: "",
    enableUfw: true, enableFail2ban: true, enableGithub: true, githubRepo: "", githubBranch: "main",
    sslMode: "letsencrypt", sslEmail: "", cloudflareCert: "", cloudflareKey: "",
    sshAllowPassword: true, sshAllowKey: true,
  },
  completed: {},
  testResults: {},
  github: null,
  system: null,
};

function esc(value) {
  const div = document.createElement("div");
  div.textContent = String(value ?? "");
  return div.innerHTML.replace(/"/g, "&quot;");
}

function log(line, cls) {
  const el = document.getElementById("console");
  const div = document.createElement("div");
  if (cls) div.className = cls;
  else if (line.startsWith("WARNING:")) div.className = "warn";
  div.textContent = line;
  el.appendChild(div);
  el.scrollTop = el.scrollHeight;
}

async function call(action, component) {
  state.busy = true;
  render();
  try {
    const res = await fetch("/api/install", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ action, component, config: state.config }),
    });
    const data = await res.json();
    (data.output || []).forEach((l) => log(l));
    if (data.message) log(data.message, data.success ? "ok" : "err");
    return data;
  } catch (e) {
    log("Request failed: " + e, "err");
    return { success: false };
  } finally {
    state.busy = false;
    render();
  }
}

async function install(component) {
  log("$ install " + component);
  const data = await call("install", component);
  state.completed[component] = !!data.success;
  if (component === "github" && data.success) state.github = data;
  render();
}

async function testAll() {
  for (const c of TESTABLE) {
    const data = await call("test", c);
    state.testResults[c] = !!data.success;
  }
  render();
}

async function repairFailed() {
  for (const c of TESTABLE.filter((c) => state.testResults[c] === false)) {
    log("$ repair " + c);
    await call("repair", c);
    const data = await call("test", c);
    state.testResults[c] = !!data.success;
  }
  render();
}

async function finalize() {
  if (!confirm("Finalize setup? The installer will remove itself.")) return;
  const data = await call("finalize");
  if (data.success) {
    const scheme = state.config.sslMode === "none" ? "http" : "https";
    const url = scheme + "://" + state.config.domain.trim();
    log("Redirecting to " + url, "ok");
    setTimeout(() => { window.location.href = url; }, 3000);
  }
}

function field(label, key, type = "text") {
  const value = state.config[key] ?? "";
  return `<label>${label}</label><input type="${type}" data-key="${key}" value="${esc(value)}">`;
}

function check(label, key) {
  return `<div class="check"><input type="checkbox" data-key="${key}" ${state.config[key] ? "checked" : ""}> ${label}</div>`;
}

function installButton(component, label) {
  if (component === "github" && !state.config.enableGithub) return "<p>GitHub deployment is disabled.</p>";
  const done = state.completed[component] ? " ✓" : "";
  return `<div class="buttons"><button class="primary" data-install="${component}">Install ${label}${done}</button></div>`;
}

function stepBody(id) {
  switch (id) {
    case "welcome": {
      let sys = "";
      if (state.system) {
        const s = state.system.system, r = state.system.recommendations;
        sys = `<table>
          <tr><td>OS</td><td>${esc(s.osName)} ${esc(s.osVersion)}</td></tr>
          <tr><td>Memory</td><td>${s.ramMb} MB (${esc(r.tier)})</td></tr>
          <tr><td>CPU cores</td><td>${s.cpuCores}</td></tr>
          <tr><td>Public IP</td><td>${esc(s.publicIp)}</td></tr>
          <tr><td>PHP-FPM max children</td><td>${r.fpmMaxChildren}</td></tr>
          <tr><td>MySQL buffer pool</td><td>${r.mysqlBufferPoolMb} MB</td></tr>
          <tr><td>Redis maxmemory</td><td>${r.redisMaxMemoryMb} MB</td></tr>
          <tr><td>Recommended swap</td><td>${r.swapRecommendedGb} GB</td></tr></table>`;
      }
      return `<p>This wizard provisions a PHP + Node.js production stack on this server.</p>
        ${field("Domain name", "domain")}
        <div class="buttons"><button data-sysinfo="1">Detect system</button></div>${sys}`;
    }
    case "security":
      return check("Enable UFW firewall", "enableUfw") + check("Enable Fail2ban", "enableFail2ban") +
        field("SSH port", "sshPort", "number") + check("Allow SSH password login", "sshAllowPassword") +
        check("Allow SSH key login", "sshAllowKey") + installButton("security", "security");
    case "php":
      return `<p>PHP-FPM with common extensions and OPcache, sized from system memory.</p>` + installButton("php", "PHP");
    case "nodejs":
      return `<p>Node.js LTS from NodeSource and the PM2 process manager.</p>` + installButton("nodejs", "Node.js");
    case "nginx":
      return `<p>Site for <b>${esc(state.config.domain || "?")}</b> with rate limiting and PHP-FPM.</p>` + installButton("nginx", "Nginx");
    case "mysql":
      return field("MySQL root password", "mysqlRootPassword", "password") + check("Create swap file", "enableSwap") +
        field("Swap size (GB)", "swapSize", "number") + installButton("mysql", "MySQL");
    case "redis":
      return `<p>Redis as an LRU cache bound to localhost.</p>` + installButton("redis", "Redis");
    case "github": {
      let keys = "";
      if (state.github) {
        keys = `<label>Deploy public key (${esc(state.github.fingerprint)})</label><textarea readonly data-fill="sshPublicKey"></textarea>
          <label>Private key (SSH_PRIVATE_KEY secret)</label><textarea readonly data-fill="privateKey"></textarea>
          <label>.github/workflows/deploy.yml</label><textarea readonly data-fill="workflowYaml"></textarea>`;
      }
      return check("Set up GitHub deployment", "enableGithub") + field("Repository (owner/name)", "githubRepo") +
        field("Branch", "githubBranch") + installButton("github", "GitHub deployment") + keys;
    }
    case "testing": {
      const rows = TESTABLE.map((c) => {
        const r = state.testResults[c];
        const mark = r === undefined ? "-" : r ? '<span class="ok">passed</span>' : '<span class="err">failed</span>';
        return `<tr><td>${c}</td><td>${mark}</td></tr>`;
      }).join("");
      return `<table>${rows}</table><div class="buttons"><button class="primary" data-testall="1">Test all</button>
        <button data-repair="1">Repair failed</button></div>`;
    }
    case "complete":
      return `<label>SSL mode</label><select data-key="sslMode">
          ${["letsencrypt", "cloudflare", "none"].map((m) => `<option ${state.config.sslMode === m ? "selected" : ""}>${m}</option>`).join("")}
        </select>${field("Email for Let's Encrypt", "sslEmail")}
        <label>Cloudflare origin certificate</label><textarea data-key="cloudflareCert"></textarea>
        <label>Cloudflare private key</label><textarea data-key="cloudflareKey"></textarea>
        <div class="buttons"><button class="danger" data-finalize="1">Finalize setup</button></div>`;
  }
  return "";
}

function render() {
  const step = STEPS[state.current];
  document.getElementById("steps").innerHTML = STEPS.map((s, i) =>
    `<span class="${i === state.current ? "active" : ""} ${state.completed[s.id] ? "done" : ""}">${s.icon} ${esc(s.title)}</span>`).join("");
  document.getElementById("progress").textContent = `Step ${state.current + 1} of ${STEPS.length}`;
  document.getElementById("step").innerHTML = `<h2>${step.icon} ${step.title}</h2>` + stepBody(step.id);
  document.getElementById("prev").disabled = state.busy || state.current === 0;
  document.getElementById("next").disabled = state.busy || state.current === STEPS.length - 1;
  document.querySelectorAll("#step button").forEach((b) => (b.disabled = state.busy));

  document.querySelectorAll("textarea[data-key]").forEach((el) => (el.value = state.config[el.dataset.key] ?? ""));
  document.querySelectorAll("textarea[data-fill]").forEach((el) => (el.value = state.github[el.dataset.fill] ?? ""));
  document.querySelectorAll("[data-key]").forEach((el) => {
    el.addEventListener("change", () => {
      const key = el.dataset.key;
      if (el.type === "checkbox") { state.config[key] = el.checked; render(); }
      else if (el.type === "number") state.config[key] = parseInt(el.value, 10) || 0;
      else state.config[key] = el.value;
    });
  });
  document.querySelectorAll("[data-install]").forEach((b) => b.addEventListener("click", () => install(b.dataset.install)));
  document.querySelectorAll("[data-testall]").forEach((b) => b.addEventListener("click", testAll));
  document.querySelectorAll("[data-repair]").forEach((b) => b.addEventListener("click", repairFailed));
  document.querySelectorAll("[data-finalize]").forEach((b) => b.addEventListener("click", finalize));
  document.querySelectorAll("[data-sysinfo]").forEach((b) => b.addEventListener("click", async () => {
    const data = await call("get-system-info");
    if (data.success) { state.system = data; render(); }
  }));
}

document.getElementById("prev").addEventListener("click", () => {
  if (state.current > 0) { state.current--; render(); }
});
document.getElementById("next").addEventListener("click", () => {
  if (state.current === 0 && !state.config.domain.trim()) {
    alert("Please enter your domain name");
    return;
  }
  if (state.current < STEPS.length - 1) { state.current++; render(); }
});
render();
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::INDEX_HTML;

    #[test]
    fn finalize_redirects_to_the_site() {
        assert!(INDEX_HTML.contains("window.location.href = url"));
    }

    #[test]
    fn secrets_are_set_as_text_not_markup() {
        for interpolated in ["${state.github.privateKey}", "${state.github.sshPublicKey}", "${state.config.cloudflareKey}"] {
            assert!(!INDEX_HTML.contains(interpolated), "{} interpolated into HTML", interpolated);
        }
        assert!(INDEX_HTML.contains(r#"data-fill="privateKey""#));
    }
}
