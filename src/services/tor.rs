use crate::config::{Config, ServiceKind};
use crate::process::ServiceDescriptor;
use crate::readiness::Probe;

/// Anonymity-network daemon. Ready once the control port accepts connections
/// or the daemon logs full bootstrap, whichever comes first.
pub fn tor_descriptor(cfg: &Config) -> ServiceDescriptor {
    let tor = &cfg.tor;
    let capture_path = cfg.capture_path(ServiceKind::Tor);

    ServiceDescriptor {
        name: ServiceKind::Tor.as_str().to_string(),
        program: tor.program.clone(),
        args: tor.args.clone(),
        pre_start: Vec::new(),
        probe: Probe::Any(vec![
            Probe::Tcp {
                addr: tor.control_addr.clone(),
            },
            Probe::LogContains {
                path: capture_path.clone(),
                needle: tor.bootstrap_signal.clone(),
            },
        ]),
        capture_path,
        max_attempts: tor.readiness.attempts,
        interval: tor.readiness.interval(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_accepts_control_port_or_bootstrap_log() {
        let cfg = Config::default();
        let desc = tor_descriptor(&cfg);
        assert_eq!(desc.program, "tor");
        assert_eq!(desc.max_attempts, 60);
        match &desc.probe {
            Probe::Any(probes) => {
                assert!(probes.contains(&Probe::Tcp {
                    addr: "127.0.0.1:9051".into()
                }));
                assert!(probes.contains(&Probe::LogContains {
                    path: cfg.capture_path(ServiceKind::Tor),
                    needle: "Bootstrapped 100%".into(),
                }));
            }
            other => panic!("unexpected probe {other:?}"),
        }
    }
}
