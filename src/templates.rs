//! Шаблоны генерируемых конфигурационных файлов
//!
//! Все функции чистые: принимают параметры и возвращают текст файла.
//! Запись на диск выполняют модули компонентов.

use crate::sizing::Recommendation;

/// Диапазоны адресов Cloudflare, от которых принимается CF-Connecting-IP
pub const CLOUDFLARE_IPS: &[&str] = &[
    "173.245.48.0/20",
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "141.101.64.0/18",
    "108.162.192.0/18",
    "190.93.240.0/20",
    "188.114.96.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
    "162.158.0.0/15",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "172.64.0.0/13",
    "131.0.72.0/22",
    "2400:cb00::/32",
    "2606:4700::/32",
    "2803:f800::/32",
    "2405:b500::/32",
    "2405:8100::/32",
    "2a06:98c0::/29",
    "2c0f:f248::/32",
];

pub fn fail2ban_jail(ssh_port: u16) -> String {
    format!(
        r#"# Managed by server-panel
[DEFAULT]
bantime = 3600
findtime = 600
maxretry = 5
backend = auto

[sshd]
enabled = true
port = {ssh_port}
filter = sshd
logpath = /var/log/auth.log
maxretry = 3

[nginx-http-auth]
enabled = true
filter = nginx-http-auth
port = http,https
logpath = /var/log/nginx/error.log

[nginx-limit-req]
enabled = true
filter = nginx-limit-req
port = http,https
logpath = /var/log/nginx/error.log
maxretry = 10

[nginx-botsearch]
enabled = true
filter = nginx-botsearch
port = http,https
logpath = /var/log/nginx/access.log
maxretry = 2

[recidive]
enabled = true
filter = recidive
logpath = /var/log/fail2ban.log
bantime = 604800
findtime = 86400
maxretry = 5
"#
    )
}

/// Параметры аутентификации для drop-in sshd
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SshAuth {
    pub permit_root_login: &'static str,
    pub password_authentication: bool,
    pub pubkey_authentication: bool,
}

pub fn sshd_dropin(port: u16, auth: &SshAuth) -> String {
    let yes_no = crate::utils::yes_no;
    format!(
        r#"# Managed by server-panel
Port {port}
PermitRootLogin {root}
PasswordAuthentication {password}
KbdInteractiveAuthentication no
PubkeyAuthentication {pubkey}
PermitEmptyPasswords no
MaxAuthTries 3
LoginGraceTime 30
X11Forwarding no
AllowTcpForwarding no
AllowAgentForwarding no
ClientAliveInterval 300
ClientAliveCountMax 2
"#,
        root = auth.permit_root_login,
        password = yes_no(auth.password_authentication),
        pubkey = yes_no(auth.pubkey_authentication),
    )
}

pub const SYSCTL_TUNABLES: &str = r#"# Managed by server-panel
# Network hardening
net.ipv4.tcp_syncookies = 1
net.ipv4.tcp_max_syn_backlog = 4096
net.ipv4.conf.all.rp_filter = 1
net.ipv4.conf.default.rp_filter = 1
net.ipv4.conf.all.accept_redirects = 0
net.ipv4.conf.default.accept_redirects = 0
net.ipv4.conf.all.send_redirects = 0
net.ipv4.conf.all.accept_source_route = 0
net.ipv6.conf.all.accept_redirects = 0
net.ipv4.icmp_echo_ignore_broadcasts = 1
net.ipv4.icmp_ignore_bogus_error_responses = 1
net.ipv4.conf.all.log_martians = 1

# Throughput
net.core.somaxconn = 65535
net.core.netdev_max_backlog = 65535
net.ipv4.ip_local_port_range = 1024 65535
net.ipv4.tcp_fin_timeout = 15
net.ipv4.tcp_tw_reuse = 1
net.ipv4.tcp_keepalive_time = 300

# Kernel
kernel.kptr_restrict = 2
kernel.dmesg_restrict = 1
fs.file-max = 2097152
"#;

pub const AUTO_UPGRADES: &str = r#"APT::Periodic::Update-Package-Lists "1";
APT::Periodic::Unattended-Upgrade "1";
APT::Periodic::AutocleanInterval "7";
"#;

pub const FILE_LIMITS: &str = r#"# Managed by server-panel
*         soft    nofile    65535
*         hard    nofile    65535
root      soft    nofile    65535
root      hard    nofile    65535
www-data  soft    nofile    65535
www-data  hard    nofile    65535
"#;

pub fn fpm_pool(php_version: &str, rec: &Recommendation) -> String {
    format!(
        r#"; Managed by server-panel ({tier})
[www]
user = www-data
group = www-data
listen = /run/php/php{php_version}-fpm.sock
listen.owner = www-data
listen.group = www-data
listen.mode = 0660
pm = dynamic
pm.max_children = {max_children}
pm.start_servers = {start}
pm.min_spare_servers = {min_spare}
pm.max_spare_servers = {max_spare}
pm.max_requests = 500
request_terminate_timeout = 300
"#,
        tier = rec.tier,
        max_children = rec.fpm_max_children,
        start = rec.fpm_start_servers,
        min_spare = rec.fpm_min_spare_servers,
        max_spare = rec.fpm_max_spare_servers,
    )
}

pub fn opcache_ini(rec: &Recommendation) -> String {
    format!(
        r#"; Managed by server-panel
opcache.enable=1
opcache.memory_consumption={memory}
opcache.interned_strings_buffer=16
opcache.max_accelerated_files=20000
opcache.revalidate_freq=60
opcache.validate_timestamps=1
opcache.enable_cli=0
"#,
        memory = rec.opcache_memory_mb
    )
}

pub const RATE_LIMIT: &str = r#"# Rate limiting zones - managed by server-panel
limit_req_zone $binary_remote_addr zone=api:10m rate=10r/s;
limit_req_zone $binary_remote_addr zone=general:10m rate=20r/s;
"#;

/// Общие location-блоки PHP-приложения
fn app_locations(fpm_socket: &str) -> String {
    format!(
        r#"    add_header X-Frame-Options "SAMEORIGIN" always;
    add_header X-Content-Type-Options "nosniff" always;
    add_header Referrer-Policy "strict-origin-when-cross-origin" always;

    gzip on;
    gzip_vary on;
    gzip_proxied any;
    gzip_comp_level 6;
    gzip_types text/plain text/css text/xml application/json application/javascript application/xml+rss application/atom+xml image/svg+xml;

    location / {{
        limit_req zone=general burst=40 nodelay;
        try_files $uri $uri/ /index.php?$query_string;
    }}

    location /api {{
        limit_req zone=api burst=20 nodelay;
        try_files $uri $uri/ /index.php?$query_string;
    }}

    location ~ \.php$ {{
        fastcgi_pass unix:{fpm_socket};
        fastcgi_param SCRIPT_FILENAME $realpath_root$fastcgi_script_name;
        include fastcgi_params;
        fastcgi_hide_header X-Powered-By;
    }}

    location ~* \.(js|css|png|jpg|jpeg|gif|ico|svg|woff|woff2)$ {{
        expires 1y;
        add_header Cache-Control "public, immutable";
    }}

    location ~ /\.(?!well-known) {{
        deny all;
    }}
"#
    )
}

pub fn nginx_site(domain: &str, web_root: &str, fpm_socket: &str) -> String {
    format!(
        r#"# {domain} - managed by server-panel
server {{
    listen 80;
    listen [::]:80;
    server_name {domain} www.{domain};
    root {web_root}/public;
    index index.php index.html;
    server_tokens off;
    client_max_body_size 64m;

{locations}
    access_log /var/log/nginx/{domain}.access.log;
    error_log /var/log/nginx/{domain}.error.log;
}}
"#,
        locations = app_locations(fpm_socket)
    )
}

fn real_ip_block() -> String {
    let mut block = String::new();
    for range in CLOUDFLARE_IPS {
        block.push_str(&format!("    set_real_ip_from {};\n", range));
    }
    block.push_str("    real_ip_header CF-Connecting-IP;\n");
    block
}

/// HTTPS за Cloudflare с origin-сертификатом
pub fn cloudflare_https_site(
    domain: &str,
    web_root: &str,
    fpm_socket: &str,
    cert_path: &str,
    key_path: &str,
) -> String {
    format!(
        r#"# {domain} - managed by server-panel (Cloudflare, full strict)
server {{
    listen 80;
    listen [::]:80;
    server_name {domain} www.{domain};
    return 301 https://$host$request_uri;
}}

server {{
    listen 443 ssl http2;
    listen [::]:443 ssl http2;
    server_name {domain} www.{domain};
    root {web_root}/public;
    index index.php index.html;
    server_tokens off;
    client_max_body_size 64m;

    ssl_certificate {cert_path};
    ssl_certificate_key {key_path};
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_prefer_server_ciphers on;
    ssl_session_timeout 1d;
    ssl_session_cache shared:SSL:10m;
    add_header Strict-Transport-Security "max-age=31536000; includeSubDomains" always;

{real_ip}
{locations}
    access_log /var/log/nginx/{domain}.access.log;
    error_log /var/log/nginx/{domain}.error.log;
}}
"#,
        real_ip = real_ip_block(),
        locations = app_locations(fpm_socket)
    )
}

/// HTTP за Cloudflare (режим flexible), когда сертификат не передан
pub fn cloudflare_http_site(domain: &str, web_root: &str, fpm_socket: &str) -> String {
    format!(
        r#"# {domain} - managed by server-panel (Cloudflare, flexible)
server {{
    listen 80;
    listen [::]:80;
    server_name {domain} www.{domain};
    root {web_root}/public;
    index index.php index.html;
    server_tokens off;
    client_max_body_size 64m;

{real_ip}
{locations}
    access_log /var/log/nginx/{domain}.access.log;
    error_log /var/log/nginx/{domain}.error.log;
}}
"#,
        real_ip = real_ip_block(),
        locations = app_locations(fpm_socket)
    )
}

pub fn placeholder_page(domain: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Welcome to {domain}</title>
    <style>
        body {{ font-family: system-ui, sans-serif; background: #0f172a; color: #e2e8f0; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; }}
        .container {{ text-align: center; }}
        p {{ color: #94a3b8; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{domain}</h1>
        <p>Your server is ready for deployment!</p>
    </div>
</body>
</html>
"#
    )
}

pub fn mysql_tuning(rec: &Recommendation) -> String {
    format!(
        r#"# Managed by server-panel ({tier})
[mysqld]
innodb_buffer_pool_size = {buffer_pool}M
innodb_log_buffer_size = 16M
innodb_flush_log_at_trx_commit = 2
innodb_flush_method = O_DIRECT

max_connections = {max_connections}
wait_timeout = 600
interactive_timeout = 600

tmp_table_size = 32M
max_heap_table_size = 32M

slow_query_log = 1
slow_query_log_file = /var/log/mysql/slow.log
long_query_time = 2
"#,
        tier = rec.tier,
        buffer_pool = rec.mysql_buffer_pool_mb,
        max_connections = rec.mysql_max_connections,
    )
}

/// Экранирует строку для SQL-литерала в одинарных кавычках
pub fn sql_quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn mysql_secure_sql(password: &str) -> String {
    format!(
        r#"ALTER USER 'root'@'localhost' IDENTIFIED WITH caching_sha2_password BY '{password}';
DELETE FROM mysql.user WHERE User='';
DELETE FROM mysql.user WHERE User='root' AND Host NOT IN ('localhost', '127.0.0.1', '::1');
DROP DATABASE IF EXISTS test;
DELETE FROM mysql.db WHERE Db='test' OR Db='test\\_%';
FLUSH PRIVILEGES;
"#,
        password = sql_quote(password)
    )
}

/// Директивы Redis для режима кэша
pub fn redis_directives(maxmemory_mb: u64) -> Vec<(&'static str, String)> {
    vec![
        ("maxmemory", format!("{}mb", maxmemory_mb)),
        ("maxmemory-policy", "allkeys-lru".to_string()),
        ("bind", "127.0.0.1".to_string()),
        ("protected-mode", "yes".to_string()),
        ("appendonly", "no".to_string()),
        ("save", "\"\"".to_string()),
    ]
}

pub fn redis_fragment(maxmemory_mb: u64) -> String {
    let mut fragment = String::from("# Redis cache settings - managed by server-panel\n");
    for (key, value) in redis_directives(maxmemory_mb) {
        fragment.push_str(&format!("{} {}\n", key, value));
    }
    fragment
}

/// Параметры CI-процесса деплоя
#[derive(Debug, Clone)]
pub struct WorkflowParams<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub web_root: &'a str,
    pub branch: &'a str,
    pub node_major: u32,
}

pub fn workflow_yaml(p: &WorkflowParams) -> String {
    format!(
        r#"name: Deploy

on:
  push:
    branches: [ {branch} ]
  workflow_dispatch:

jobs:
  deploy:
    runs-on: ubuntu-latest
    steps:
      - name: Checkout
        uses: actions/checkout@v4

      - name: Setup Node.js
        uses: actions/setup-node@v4
        with:
          node-version: '{node_major}'

      - name: Build frontend
        run: |
          if [ -f package.json ]; then
            npm ci
            npm run build --if-present
          fi

      - name: Upload files
        uses: burnett01/rsync-deployments@7.0.1
        with:
          switches: -avz --delete --exclude='.git' --exclude='.github' --exclude='node_modules' --exclude='.env' --exclude='storage' --exclude='public/uploads'
          path: ./
          remote_path: {web_root}/
          remote_host: {host}
          remote_port: {port}
          remote_user: {user}
          remote_key: ${{{{ secrets.SSH_PRIVATE_KEY }}}}

      - name: Post-deploy
        uses: appleboy/ssh-action@v1.0.3
        with:
          host: {host}
          port: {port}
          username: {user}
          key: ${{{{ secrets.SSH_PRIVATE_KEY }}}}
          script: |
            cd {web_root}
            if [ -f composer.json ]; then composer install --no-dev --optimize-autoloader --no-interaction; fi
            chmod -R g+w storage bootstrap/cache 2>/dev/null || true
"#,
        branch = p.branch,
        node_major = p.node_major,
        web_root = p.web_root,
        host = p.host,
        port = p.port,
        user = p.user,
    )
}

/// Скрипт самоудаления установщика
pub fn cleanup_script(delay_secs: u64, remove: &[String], pid: u32) -> String {
    let mut script = format!("#!/bin/bash\nsleep {}\n", delay_secs);
    for path in remove {
        script.push_str(&format!("rm -rf '{}'\n", path.replace('\'', "'\\''")));
    }
    script.push_str(&format!("kill {} 2>/dev/null\n", pid));
    script.push_str("rm -- \"$0\"\n");
    script
}
