use anyhow::{Context, Result};
use tracing::info;

use crate::config::{Config, ServiceKind, VNC_PORT};
use crate::process::{CommandRunner, ServiceDescriptor, StepCommand};
use crate::readiness::Probe;

/// Remote-display server exposing the virtual display on [`VNC_PORT`].
/// Needs the display running and the password file provisioned.
pub fn vnc_descriptor(cfg: &Config) -> ServiceDescriptor {
    let vnc = &cfg.vnc;

    ServiceDescriptor {
        name: ServiceKind::Vnc.as_str().to_string(),
        program: vnc.program.clone(),
        args: vec![
            "-display".into(),
            cfg.display.display.clone(),
            "-geometry".into(),
            vnc.geometry.clone(),
            "-rfbauth".into(),
            vnc.password_file.to_string_lossy().into_owned(),
            "-rfbport".into(),
            VNC_PORT.to_string(),
            "-shared".into(),
        ],
        capture_path: cfg.capture_path(ServiceKind::Vnc),
        pre_start: Vec::new(),
        probe: Probe::Tcp {
            addr: format!("127.0.0.1:{VNC_PORT}"),
        },
        max_attempts: vnc.readiness.attempts,
        interval: vnc.readiness.interval(),
    }
}

/// Write the remote-display password file. Runs every time it is called,
/// overwriting any previous file.
pub fn provision_vnc_password(cfg: &Config, runner: &dyn CommandRunner) -> Result<()> {
    let vnc = &cfg.vnc;
    let cmd = StepCommand::new(&vnc.program)
        .arg("-storepasswd")
        .arg(&vnc.password)
        .path_arg(&vnc.password_file);
    runner
        .run_checked(&cmd)
        .context("failed to provision the remote-display password")?;
    info!(path = %vnc.password_file.display(), "provisioned remote-display password");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRunner;

    #[test]
    fn binds_the_documented_port() {
        let desc = vnc_descriptor(&Config::default());
        assert_eq!(
            desc.command_line(),
            "x11vnc -display :1 -geometry 1024x768 -rfbauth /tmp/vncpasswd -rfbport 5909 -shared"
        );
        assert_eq!(
            desc.probe,
            Probe::Tcp {
                addr: "127.0.0.1:5909".into()
            }
        );
    }

    #[test]
    fn provisioning_stores_password_file() {
        let runner = FakeRunner::new();
        provision_vnc_password(&Config::default(), &runner).unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["x11vnc -storepasswd freedom /tmp/vncpasswd"]
        );
    }

    #[test]
    fn provisioning_failure_is_reported() {
        let runner = FakeRunner::new().fail_when("-storepasswd", 1);
        let err = provision_vnc_password(&Config::default(), &runner).unwrap_err();
        assert!(format!("{err:#}").contains("remote-display password"));
    }
}
