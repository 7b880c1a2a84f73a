//! httpd.conf templates

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::crd::{EndPoint, LoadBalancerSpec, StandaloneSpec};
use crate::error::Result;

const STANDALONE_TEMPLATE: &str = r#"ServerRoot "/usr/local/apache2"
Listen {{ port }}

LoadModule mpm_event_module modules/mod_mpm_event.so
LoadModule authz_core_module modules/mod_authz_core.so
LoadModule mime_module modules/mod_mime.so
LoadModule log_config_module modules/mod_log_config.so
LoadModule unixd_module modules/mod_unixd.so
LoadModule dir_module modules/mod_dir.so

User daemon
Group daemon

ServerName {{ server_name }}
ServerAdmin {{ server_admin }}
DocumentRoot "{{ document_root }}"

<Directory "{{ document_root }}">
    Options Indexes FollowSymLinks
    AllowOverride None
    Require all granted
</Directory>

DirectoryIndex index.html
TypesConfig conf/mime.types
ErrorLog /proc/self/fd/2
LogFormat "%h %l %u %t \"%r\" %>s %b" common
CustomLog /proc/self/fd/1 common
"#;

const LOAD_BALANCER_TEMPLATE: &str = r#"ServerRoot "/usr/local/apache2"
Listen {{ port }}

LoadModule mpm_event_module modules/mod_mpm_event.so
LoadModule authz_core_module modules/mod_authz_core.so
LoadModule log_config_module modules/mod_log_config.so
LoadModule unixd_module modules/mod_unixd.so
LoadModule slotmem_shm_module modules/mod_slotmem_shm.so
LoadModule proxy_module modules/mod_proxy.so
LoadModule proxy_http_module modules/mod_proxy_http.so
LoadModule proxy_balancer_module modules/mod_proxy_balancer.so
LoadModule lbmethod_byrequests_module modules/mod_lbmethod_byrequests.so
{% if tls %}
LoadModule ssl_module modules/mod_ssl.so
SSLProxyEngine on
{% endif %}

User daemon
Group daemon

ServerName {{ server_name }}

<Proxy "balancer://backends">
{% for member in members %}
    BalancerMember "{{ member.url }}"{{ member.flags }}
{% endfor %}
    ProxySet lbmethod=byrequests
</Proxy>

ProxyPreserveHost On
ProxyPass "{{ path }}" "balancer://backends/"
ProxyPassReverse "{{ path }}" "balancer://backends/"

ErrorLog /proc/self/fd/2
LogFormat "%h %l %u %t \"%r\" %>s %b" common
CustomLog /proc/self/fd/1 common
"#;

#[derive(Serialize)]
struct StandaloneContext<'a> {
    port: i32,
    server_name: &'a str,
    server_admin: &'a str,
    document_root: &'a str,
}

#[derive(Serialize)]
struct LoadBalancerContext<'a> {
    port: i32,
    server_name: &'a str,
    path: &'a str,
    tls: bool,
    members: Vec<BalancerMember>,
}

#[derive(Serialize)]
struct BalancerMember {
    url: String,
    /// Extra BalancerMember parameters, with leading space
    flags: &'static str,
}

impl From<&EndPoint> for BalancerMember {
    fn from(ep: &EndPoint) -> Self {
        Self {
            url: format!("{}://{}:{}", ep.proto, ep.ip_address, ep.port),
            // Not-ready backends stay listed but receive no traffic
            flags: if ep.ready { "" } else { " status=+D" },
        }
    }
}

/// Render httpd.conf for a standalone web server
pub fn render_standalone(port: i32, server_name: &str, spec: &StandaloneSpec) -> Result<String> {
    render(
        "standalone.conf",
        STANDALONE_TEMPLATE,
        StandaloneContext {
            port,
            server_name,
            server_admin: &spec.server_admin,
            document_root: &spec.document_root,
        },
    )
}

/// Render httpd.conf for a load balancer in front of `endpoints`
pub fn render_load_balancer(
    port: i32,
    server_name: &str,
    spec: &LoadBalancerSpec,
    endpoints: &[EndPoint],
) -> Result<String> {
    render(
        "load_balancer.conf",
        LOAD_BALANCER_TEMPLATE,
        LoadBalancerContext {
            port,
            server_name,
            path: &spec.path,
            tls: spec.protocol.eq_ignore_ascii_case("https"),
            members: endpoints.iter().map(BalancerMember::from).collect(),
        },
    )
}

fn render<S: Serialize>(name: &'static str, source: &'static str, ctx: S) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template(name, source)?;
    Ok(env.get_template(name)?.render(ctx)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb_spec(protocol: &str) -> LoadBalancerSpec {
        LoadBalancerSpec {
            backend_service_name: "svcA".to_string(),
            protocol: protocol.to_string(),
            path: "/app".to_string(),
            port: 9443,
        }
    }

    fn endpoint(ip: &str, ready: bool) -> EndPoint {
        EndPoint {
            ip_address: ip.to_string(),
            port: 8443,
            proto: "https".to_string(),
            ready,
        }
    }

    #[test]
    fn standalone_substitutes_spec_fields() {
        let conf = render_standalone(
            8080,
            "www.example.com",
            &StandaloneSpec {
                document_root: "/srv/www".to_string(),
                server_admin: "ops@example.com".to_string(),
            },
        )
        .unwrap();

        assert!(conf.contains("Listen 8080\n"));
        assert!(conf.contains("ServerName www.example.com\n"));
        assert!(conf.contains("ServerAdmin ops@example.com\n"));
        assert!(conf.contains("DocumentRoot \"/srv/www\"\n"));
        assert!(conf.contains(r#"LogFormat "%h %l %u %t \"%r\" %>s %b" common"#));
    }

    #[test]
    fn load_balancer_lists_members_in_order() {
        let conf = render_load_balancer(
            8080,
            "lb.example.com",
            &lb_spec("https"),
            &[endpoint("1.1.1.1", true), endpoint("2.2.2.2", false)],
        )
        .unwrap();

        let expected = "<Proxy \"balancer://backends\">\n    BalancerMember \"https://1.1.1.1:8443\"\n    BalancerMember \"https://2.2.2.2:8443\" status=+D\n    ProxySet lbmethod=byrequests\n</Proxy>\n";
        assert!(conf.contains(expected), "unexpected config:\n{}", conf);
        assert!(conf.contains("ProxyPass \"/app\" \"balancer://backends/\"\n"));
        assert!(conf.contains("SSLProxyEngine on\n"));
    }

    #[test]
    fn plain_http_backends_do_not_load_ssl() {
        let conf = render_load_balancer(8080, "lb", &lb_spec("http"), &[]).unwrap();
        assert!(!conf.contains("mod_ssl"));
        assert!(conf.contains("<Proxy \"balancer://backends\">\n    ProxySet"));
    }
}
