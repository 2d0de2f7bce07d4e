//! Liveness monitor: the periodic heartbeat sweep. See SPEC_FULL.md SS4.4.
//!
//! Never mutates the registry directly - it only terminates transports; the
//! resulting close event runs through the same departure path as any other
//! disconnect (`crate::dispatcher::handle_close`), keeping all tree
//! mutations centralized in the dispatcher.

use crate::{config::Config, registry::Registry};
use std::time::Instant;

pub fn sweep(reg: &Registry, config: &Config, now: Instant) {
    for id in reg.stale_ids(now, config.t_heartbeat) {
        tracing::info!(%id, "heartbeat timeout, terminating transport");
        reg.terminate(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ParticipantId;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn live_participant_is_not_terminated() {
        let mut reg = Registry::new();
        let now = Instant::now();
        let id = ParticipantId::for_test(1);
        reg.insert_unregistered(id, "fm1000".into(), mpsc::channel(8).0, now);
        let config = Config::default();

        sweep(&reg, &config, now + Duration::from_secs(1));

        assert!(reg.contains(id));
    }

    #[test]
    fn stale_participant_is_terminated() {
        let mut reg = Registry::new();
        let now = Instant::now();
        let id = ParticipantId::for_test(1);
        let (tx, mut rx) = mpsc::channel(8);
        reg.insert_unregistered(id, "fm1000".into(), tx, now);
        let config = Config::default();

        sweep(&reg, &config, now + config.t_heartbeat + Duration::from_secs(1));

        assert!(matches!(rx.try_recv(), Ok(crate::transport::WsCommand::Close)));
    }
}
