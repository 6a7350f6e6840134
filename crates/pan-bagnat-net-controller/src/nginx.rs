//! Gateway nginx configuration, materialized at container start through a
//! shell heredoc.

use pan_bagnat_common::types::GatewaySpec;

/// Render the single-server nginx config a gateway runs with.
pub fn render_config(spec: &GatewaySpec, listen_port: u16) -> String {
    format!(
        r#"map $http_upgrade $connection_upgrade {{
    default upgrade;
    '' close;
}}

map $host $module_target_host {{
    default $host;
    ~\.modules\.localhost$ localhost;
}}

server {{
    listen {listen_port};

    location / {{
        proxy_pass {target};
        proxy_http_version 1.1;
        proxy_set_header Host $module_target_host;
        proxy_set_header X-Forwarded-Host $host;
        proxy_set_header X-Upstream-Host {container}:{port};
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection $connection_upgrade;
        proxy_buffering off;
    }}
}}
"#,
        target = spec.target_url(),
        container = spec.target_container,
        port = spec.target_port,
    )
}

/// Shell command the gateway container runs: write the config, then run
/// nginx in the foreground.
pub fn startup_script(spec: &GatewaySpec, listen_port: u16) -> String {
    format!(
        "cat > /etc/nginx/conf.d/default.conf <<'PBCONF'\n{}\nPBCONF\nexec nginx -g 'daemon off;'",
        render_config(spec, listen_port)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GatewaySpec {
        GatewaySpec {
            slug: "app".into(),
            module_id: "module_1".into(),
            module_slug: "demo".into(),
            network: "app_default".into(),
            target_container: "web".into(),
            target_port: 3000,
        }
    }

    #[test]
    fn test_render_config_proxies_to_target() {
        let config = render_config(&spec(), 8080);
        assert!(config.contains("listen 8080;"));
        assert!(config.contains("proxy_pass http://web:3000/;"));
        assert!(config.contains("proxy_set_header X-Upstream-Host web:3000;"));
        assert!(config.contains("proxy_set_header Upgrade $http_upgrade;"));
        assert!(config.contains("proxy_set_header Connection $connection_upgrade;"));
        assert!(config.contains("proxy_buffering off;"));
        assert!(config.contains("~\\.modules\\.localhost$ localhost;"));
    }

    #[test]
    fn test_startup_script_wraps_config_in_heredoc() {
        let script = startup_script(&spec(), 8080);
        assert!(script.starts_with("cat > /etc/nginx/conf.d/default.conf <<'PBCONF'"));
        assert!(script.ends_with("exec nginx -g 'daemon off;'"));
        assert!(script.contains("proxy_pass http://web:3000/;"));
    }
}
