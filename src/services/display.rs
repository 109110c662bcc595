use crate::config::{Config, ServiceKind};
use crate::process::ServiceDescriptor;
use crate::readiness::Probe;

/// Virtual display server. Ready once querying the display succeeds.
pub fn display_descriptor(cfg: &Config) -> ServiceDescriptor {
    let display = &cfg.display;

    ServiceDescriptor {
        name: ServiceKind::Xvfb.as_str().to_string(),
        program: display.program.clone(),
        args: vec![
            display.display.clone(),
            "-screen".into(),
            "0".into(),
            display.screen.clone(),
            "-ac".into(),
            "+extension".into(),
            "GLX".into(),
            "+render".into(),
            "-noreset".into(),
        ],
        capture_path: cfg.capture_path(ServiceKind::Xvfb),
        pre_start: Vec::new(),
        probe: Probe::Command {
            program: display.probe_program.clone(),
            args: vec!["-display".into(), display.display.clone()],
        },
        max_attempts: display.readiness.attempts,
        interval: display.readiness.interval(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_display_command_line() {
        let desc = display_descriptor(&Config::default());
        assert_eq!(
            desc.command_line(),
            "Xvfb :1 -screen 0 1024x768x24 -ac +extension GLX +render -noreset"
        );
    }

    #[test]
    fn probes_the_same_display_ten_times_a_second_apart() {
        let desc = display_descriptor(&Config::default());
        assert_eq!(
            desc.probe,
            Probe::Command {
                program: "xdpyinfo".into(),
                args: vec!["-display".into(), ":1".into()],
            }
        );
        assert_eq!(desc.max_attempts, 10);
        assert_eq!(desc.interval, Duration::from_secs(1));
    }
}
