use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use harness::EngineOption;

use crate::descriptor::Placement;
use crate::Error;

/// Engine options as written in the job's engine option string (TOML).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RpmaServerConfig {
    pub listen_ip: String,
    pub listen_port: String,
    pub placement: Placement,
    pub close_timeout_ms: u64,
    pub backlog: i32,
}

impl Default for RpmaServerConfig {
    fn default() -> Self {
        RpmaServerConfig {
            listen_ip: String::new(),
            listen_port: String::new(),
            placement: Placement::Volatile,
            close_timeout_ms: 5000,
            backlog: 0,
        }
    }
}

/// Options validated against the job they run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub addr: SocketAddr,
    pub io_depth: u32,
    pub placement: Placement,
    pub close_timeout: Duration,
    pub backlog: i32,
}

impl RpmaServerConfig {
    pub fn new(config: Option<&str>) -> Result<Self, Error> {
        toml::from_str(config.unwrap_or("")).map_err(|e| Error::InvalidOption {
            name: "engine options",
            reason: e.to_string(),
        })
    }

    pub fn validate(&self, io_depth: u32) -> Result<ServerOptions, Error> {
        if self.listen_ip.is_empty() {
            return Err(Error::InvalidOption {
                name: "listen_ip",
                reason: "must not be empty".to_owned(),
            });
        }
        if self.listen_port.is_empty() {
            return Err(Error::InvalidOption {
                name: "listen_port",
                reason: "must not be empty".to_owned(),
            });
        }
        if io_depth == 0 {
            return Err(Error::InvalidOption {
                name: "iodepth",
                reason: "must be positive".to_owned(),
            });
        }
        let ip: IpAddr = self.listen_ip.parse().map_err(|e| Error::InvalidOption {
            name: "listen_ip",
            reason: format!("{}: {}", self.listen_ip, e),
        })?;
        let port: u16 = self.listen_port.parse().map_err(|e| Error::InvalidOption {
            name: "listen_port",
            reason: format!("{}: {}", self.listen_port, e),
        })?;
        Ok(ServerOptions {
            addr: SocketAddr::new(ip, port),
            io_depth,
            placement: self.placement,
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            backlog: self.backlog,
        })
    }
}

pub static OPTIONS: &[EngineOption] = &[
    EngineOption {
        name: "listen_ip",
        lname: "librpma_server engine listen ip",
        help: "IP to listen for RDMA connections",
        default: "",
    },
    EngineOption {
        name: "listen_port",
        lname: "librpma_server engine listen port",
        help: "Port to listen for RDMA connections",
        default: "",
    },
    EngineOption {
        name: "placement",
        lname: "librpma_server engine memory placement",
        help: "Placement of the registered memory (volatile or persistent)",
        default: "volatile",
    },
    EngineOption {
        name: "close_timeout_ms",
        lname: "librpma_server engine close timeout",
        help: "How long cleanup waits for the client to close the connection",
        default: "5000",
    },
    EngineOption {
        name: "backlog",
        lname: "librpma_server engine listen backlog",
        help: "Backlog of the listening endpoint",
        default: "0",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_validates() {
        let config = RpmaServerConfig::new(Some(
            r#"
            listen_ip = "127.0.0.1"
            listen_port = "7777"
            placement = "persistent"
            "#,
        ))
        .unwrap();
        let opts = config.validate(4).unwrap();
        assert_eq!(opts.addr, "127.0.0.1:7777".parse().unwrap());
        assert_eq!(opts.io_depth, 4);
        assert_eq!(opts.placement, Placement::Persistent);
        assert_eq!(opts.close_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn empty_options_use_defaults_but_do_not_validate() {
        let config = RpmaServerConfig::new(None).unwrap();
        assert_eq!(config, RpmaServerConfig::default());
        assert!(matches!(
            config.validate(1),
            Err(Error::InvalidOption {
                name: "listen_ip",
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = RpmaServerConfig {
            listen_ip: "10.0.0.1".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(1),
            Err(Error::InvalidOption {
                name: "listen_port",
                ..
            })
        ));
        config.listen_port = "70000".to_owned();
        assert!(config.validate(1).is_err());
        config.listen_port = "7777".to_owned();
        assert!(matches!(
            config.validate(0),
            Err(Error::InvalidOption { name: "iodepth", .. })
        ));
        config.listen_ip = "not-an-ip".to_owned();
        assert!(config.validate(1).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(RpmaServerConfig::new(Some("listen_addr = \"x\"")).is_err());
    }

    #[test]
    fn option_table_matches_config_fields() {
        let names: Vec<_> = OPTIONS.iter().map(|o| o.name).collect();
        assert_eq!(
            names,
            ["listen_ip", "listen_port", "placement", "close_timeout_ms", "backlog"]
        );
    }
}
