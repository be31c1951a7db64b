//! 配置文件 → 运行参数
//!
//! 命令行覆盖项先应用到主配置，再统一校验，保证覆盖后的组合同样合法。

use anyhow::{Context, Result};
use speedgov_client::LinkConfig;
use speedgov_driver::{IngressConfig, IngressTransport};
use speedgov_tools::{GovernorConfig, ResolvedConfig, SpeedFraction, TransportKind};
use std::net::SocketAddr;
use std::path::Path;
use tracing::warn;

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<SocketAddr>,
    pub transport: Option<TransportKind>,
    pub robot_host: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut GovernorConfig) {
        if let Some(listen) = self.listen {
            config.ingress.listen = listen;
        }
        if let Some(transport) = self.transport {
            config.ingress.transport = transport;
        }
        if let Some(host) = &self.robot_host {
            config.robot.host = host.clone();
        }
    }
}

/// 读取主配置、应用覆盖项、解析 recipe 并校验
pub fn load_config(path: &Path, overrides: &Overrides) -> Result<ResolvedConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let mut governor = GovernorConfig::from_toml_str(&content, path)?;
    overrides.apply(&mut governor);

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    ResolvedConfig::resolve(governor, base_dir)
        .with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// 接入监听器参数
pub fn ingress_config(config: &GovernorConfig) -> IngressConfig {
    let ingress = &config.ingress;
    let transport = match ingress.transport {
        TransportKind::Tcp => IngressTransport::Tcp {
            listen: ingress.listen,
        },
        TransportKind::Udp => IngressTransport::Udp {
            listen: ingress.listen,
        },
        TransportKind::Pipe => IngressTransport::Pipe {
            command: ingress.command.clone(),
        },
    };

    IngressConfig {
        transport,
        poll_interval: ingress.poll_interval(),
        recv_buffer: ingress.effective_recv_buffer(),
        error_backoff: ingress.error_backoff(),
        restart_budget: ingress.restart_budget,
    }
}

/// 链路控制器参数
pub fn link_config(config: &ResolvedConfig) -> Result<LinkConfig> {
    let link = LinkConfig::from_config(config).context("Invalid override settings")?;
    if link.detached_fraction == SpeedFraction::FULL {
        warn!(
            "Robot runs at full speed while no distance producer is attached \
            (override.detached_fraction = 1.0)"
        );
    }
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const RECIPE: &str = r#"
[[inputs]]
name = "speed_slider_mask"
type = "UINT32"

[[inputs]]
name = "speed_slider_fraction"
type = "DOUBLE"

[[outputs]]
name = "actual_TCP_speed"
type = "VECTOR6D"
"#;

    fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
        fs::write(dir.path().join("recipe.toml"), RECIPE).unwrap();
        let path = dir.path().join("governor.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_overrides_applied_before_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[robot]\nhost = \"\"\nrecipe = \"recipe.toml\"\n",
        );

        // 空 host 本身不合法，命令行覆盖后合法
        assert!(load_config(&path, &Overrides::default()).is_err());

        let overrides = Overrides {
            listen: Some("127.0.0.1:14000".parse().unwrap()),
            transport: Some(TransportKind::Udp),
            robot_host: Some("10.4.1.87".into()),
        };
        let resolved = load_config(&path, &overrides).unwrap();
        assert_eq!(resolved.governor.robot.host, "10.4.1.87");

        let ingress = ingress_config(&resolved.governor);
        assert_eq!(
            ingress.transport,
            IngressTransport::Udp {
                listen: "127.0.0.1:14000".parse().unwrap()
            }
        );
        assert_eq!(ingress.recv_buffer, 1024 * 1024);
    }

    #[test]
    fn test_link_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[robot]
host = "10.4.1.87"
recipe = "recipe.toml"
frequency_hz = 250.0

[override]
detached_fraction = 0.25
"#,
        );
        let resolved = load_config(&path, &Overrides::default()).unwrap();
        let link = link_config(&resolved).unwrap();

        assert_eq!(link.port, 30004);
        assert_eq!(link.period().as_millis(), 4);
        assert_eq!(link.detached_fraction.value(), 0.25);
        assert_eq!(link.recipe.inputs.len(), 2);
    }

    #[test]
    fn test_pipe_transport_requires_command() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[robot]\nhost = \"robot\"\nrecipe = \"recipe.toml\"\n",
        );
        let overrides = Overrides {
            transport: Some(TransportKind::Pipe),
            ..Default::default()
        };
        let err = load_config(&path, &overrides).unwrap_err();
        assert!(format!("{:#}", err).contains("ingress.command"));
    }
}
