use std::time::Duration;

/// Startup configuration. The only tunables this server has; collected once
/// at process start, the way this codebase's smaller services read a single
/// `PORT` (and `RUST_LOG`) environment variable rather than a full config
/// file.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub port: u16,
    pub croot: usize,
    pub cnode: usize,
    pub t_heartbeat: Duration,
    pub t_heartbeat_sweep: Duration,
    pub t_rebalance: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            croot: 2,
            cnode: 2,
            t_heartbeat: Duration::from_secs(15),
            t_heartbeat_sweep: Duration::from_secs(5),
            t_rebalance: Duration::from_secs(8),
        }
    }
}

impl Config {
    /// Reads `PORT` from the environment, falling back to the default.
    /// Capacities and timers are fixed constants (see SPEC_FULL.md SS6) and
    /// are not currently environment-overridable.
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| Self::default().port);
        Self {
            port,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_specified_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.croot, 2);
        assert_eq!(cfg.cnode, 2);
        assert_eq!(cfg.t_heartbeat, Duration::from_secs(15));
        assert_eq!(cfg.t_heartbeat_sweep, Duration::from_secs(5));
        assert_eq!(cfg.t_rebalance, Duration::from_secs(8));
    }
}
