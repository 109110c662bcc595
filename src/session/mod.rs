//! A session ties the pieces together: it owns the root directory, the loaded
//! config, the cleanup registry and every service it started, and tears all
//! of it down through the registry when it ends.

pub mod manifest;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cleanup::CleanupRegistry;
use crate::config::{Config, ServiceKind};
use crate::demo::{DemoMode, DemoResetter, ResetError};
use crate::prepare::{ConfigStatus, EnvironmentPreparer};
use crate::process::{
    CommandRunner, LaunchError, ReadinessWait, ServiceHandle, ServiceRecord, is_alive,
    spawn_service, terminate,
};
use crate::readiness::Readiness;
use crate::services::{descriptor, launch_waves, provision_vnc_password};

pub use manifest::Manifest;

type SharedHandles = Arc<Mutex<Vec<ServiceHandle>>>;

pub struct Session {
    root: PathBuf,
    cfg: Config,
    cleanup: CleanupRegistry,
    services: SharedHandles,
    config_status: Option<ConfigStatus>,
    manifest_registered: bool,
}

/// A manifest entry and whether its process is still alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub record: ServiceRecord,
    pub running: bool,
}

impl Session {
    /// Start a session. Services it launches are stopped, newest first, when
    /// `cleanup` is drained.
    pub fn new(root: PathBuf, cfg: Config, cleanup: CleanupRegistry) -> Self {
        let services: SharedHandles = Arc::default();
        let owned = services.clone();
        let grace = Duration::from_secs(cfg.stop_grace_secs);
        cleanup.register("stop services", move || {
            let handles = std::mem::take(&mut *lock(&owned));
            for mut handle in handles.into_iter().rev() {
                if let Err(err) = terminate(&mut handle, grace) {
                    warn!("{err:#}");
                }
            }
            Ok(())
        });

        Self {
            root,
            cfg,
            cleanup,
            services,
            config_status: None,
            manifest_registered: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    /// Outcome of the last [`ensure_config`](Self::ensure_config) call.
    pub fn config_status(&self) -> Option<ConfigStatus> {
        self.config_status
    }

    /// Records for every service this session currently owns.
    pub fn records(&self) -> Vec<ServiceRecord> {
        lock(&self.services).iter().map(ServiceHandle::record).collect()
    }

    /// Launch `kinds` plus their dependencies, wave by wave.
    ///
    /// Services in a wave are spawned back to back and polled in parallel;
    /// the next wave starts only when the whole wave is ready. A service is
    /// owned by the session from the moment its process exists, so cleanup
    /// stops it even while its readiness is still being polled.
    pub fn start_services(&mut self, kinds: &[ServiceKind], runner: &dyn CommandRunner) -> Result<()> {
        for (index, wave) in launch_waves(kinds).into_iter().enumerate() {
            let names: Vec<&str> = wave.iter().map(ServiceKind::as_str).collect();
            info!(wave = index + 1, services = %names.join(", "), "launching");

            if wave.contains(&ServiceKind::Vnc) {
                provision_vnc_password(&self.cfg, runner)?;
            }
            self.launch_wave(&wave)?;
            self.publish_manifest()?;
        }
        Ok(())
    }

    fn launch_wave(&self, wave: &[ServiceKind]) -> Result<()> {
        // Each handle joins the owned list as soon as its process exists, so a
        // signal during the readiness wait still stops it.
        let mut waits: Vec<(ReadinessWait, u32)> = Vec::with_capacity(wave.len());
        for &kind in wave {
            let (wait, handle) = spawn_service(descriptor(kind, &self.cfg, &self.root))?.split();
            waits.push((wait, handle.pid));
            lock(&self.services).push(handle);
        }

        let results: Vec<(ReadinessWait, u32, Readiness)> = std::thread::scope(|scope| {
            let waiters: Vec<_> = waits
                .into_iter()
                .map(|(wait, pid)| {
                    scope.spawn(move || {
                        let readiness = wait.wait();
                        (wait, pid, readiness)
                    })
                })
                .collect();
            waiters
                .into_iter()
                .map(|waiter| {
                    waiter
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect()
        });

        let mut first_failure: Option<LaunchError> = None;
        for (wait, pid, readiness) in results {
            let Readiness::TimedOut { attempts } = readiness else {
                continue;
            };
            let mut handle = self.take_owned(pid);
            let err = wait.timed_out(attempts, handle.as_mut());
            if first_failure.is_none() {
                first_failure = Some(err);
            } else {
                warn!("{err}");
            }
        }
        match first_failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Remove the handle for `pid` from the owned list. `None` when cleanup
    /// has already taken it.
    fn take_owned(&self, pid: u32) -> Option<ServiceHandle> {
        let mut services = lock(&self.services);
        let index = services.iter().position(|handle| handle.pid == pid)?;
        Some(services.remove(index))
    }

    fn publish_manifest(&mut self) -> Result<()> {
        let path = self.cfg.manifest_path();
        if !self.manifest_registered {
            let owned = self.services.clone();
            let retire_path = path.clone();
            self.cleanup.register("update session manifest", move || {
                let pids: Vec<u32> = lock(&owned).iter().map(|handle| handle.pid).collect();
                manifest::retire(&retire_path, &pids)
            });
            self.manifest_registered = true;
        }
        manifest::publish(&path, &self.records())
    }

    /// Generate the one-time config if it is missing. A config generated here
    /// is removed when the session ends.
    pub fn ensure_config(&mut self, runner: &dyn CommandRunner) -> Result<ConfigStatus> {
        let preparer = EnvironmentPreparer::from_config(&self.cfg, &self.root)?;
        let status = preparer.ensure_config(runner, &self.cleanup)?;
        self.config_status = Some(status);
        Ok(status)
    }

    pub fn reset_demo(&self, runner: &dyn CommandRunner, mode: DemoMode) -> Result<(), ResetError> {
        DemoResetter::new(&self.cfg, &self.root, runner, mode).run()
    }

    /// Hand every owned service off so it outlives the session. Returns their
    /// records, which stay in the manifest.
    pub fn detach_services(&mut self) -> Vec<ServiceRecord> {
        let handles = std::mem::take(&mut *lock(&self.services));
        handles
            .into_iter()
            .map(|handle| {
                let record = handle.record();
                let pid = handle.detach();
                info!(service = %record.name, pid, "left running");
                record
            })
            .collect()
    }
}

/// Services listed in the manifest at `path`, with liveness checked now.
pub fn read_status(path: &Path) -> Result<Vec<ServiceStatus>> {
    let manifest = Manifest::read(path)
        .with_context(|| format!("failed to load session manifest {}", path.display()))?;
    let Some(manifest) = manifest else {
        debug!(path = %path.display(), "no session manifest");
        return Ok(Vec::new());
    };
    Ok(manifest
        .services
        .into_iter()
        .map(|record| ServiceStatus {
            running: is_alive(record.pid),
            record,
        })
        .collect())
}

fn lock(services: &SharedHandles) -> MutexGuard<'_, Vec<ServiceHandle>> {
    services.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadinessBudget;
    use crate::test_support::FakeRunner;

    struct Fixture {
        dir: tempfile::TempDir,
        cfg: Config,
    }

    /// Config whose tor entry is a shell stand-in that logs the bootstrap line.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config {
            capture_dir: dir.path().to_path_buf(),
            stop_grace_secs: 1,
            ..Config::default()
        };
        cfg.tor.program = "sh".into();
        cfg.tor.args = vec!["-c".into(), "echo 'Bootstrapped 100% (done)'; exec sleep 30".into()];
        cfg.tor.control_addr = "127.0.0.1:1".into();
        cfg.tor.readiness = ReadinessBudget {
            attempts: 50,
            interval_ms: 20,
        };
        Fixture { dir, cfg }
    }

    #[test]
    fn started_service_is_stopped_and_unlisted_at_cleanup() {
        let fx = fixture();
        let cleanup = CleanupRegistry::new();
        let mut session = Session::new(fx.dir.path().into(), fx.cfg.clone(), cleanup.clone());

        session.start_services(&[ServiceKind::Tor], &FakeRunner::new()).unwrap();
        let records = session.records();
        assert_eq!(records.len(), 1);
        let pid = records[0].pid;
        assert!(is_alive(pid));

        let status = read_status(&fx.cfg.manifest_path()).unwrap();
        assert_eq!(status.len(), 1);
        assert!(status[0].running);

        let report = cleanup.run_all();
        assert_eq!(report.failed, 0);
        assert!(!is_alive(pid));
        assert!(!fx.cfg.manifest_path().exists());
        assert!(read_status(&fx.cfg.manifest_path()).unwrap().is_empty());
    }

    #[test]
    fn readiness_failure_surfaces_as_launch_error() {
        let mut fx = fixture();
        fx.cfg.tor.args = vec!["-c".into(), "echo 'no route'; exit 4".into()];
        fx.cfg.tor.readiness.attempts = 3;
        let cleanup = CleanupRegistry::new();
        let mut session = Session::new(fx.dir.path().into(), fx.cfg.clone(), cleanup.clone());

        let err = session
            .start_services(&[ServiceKind::Tor], &FakeRunner::new())
            .unwrap_err();
        let launch = err.downcast_ref::<LaunchError>().unwrap();
        assert_eq!(launch.service(), "tor");
        assert!(launch.log().contains("no route"));
        assert!(session.records().is_empty());
        cleanup.run_all();
    }

    #[test]
    fn detached_services_outlive_cleanup_and_stay_listed() {
        let fx = fixture();
        let cleanup = CleanupRegistry::new();
        let mut session = Session::new(fx.dir.path().into(), fx.cfg.clone(), cleanup.clone());

        session.start_services(&[ServiceKind::Tor], &FakeRunner::new()).unwrap();
        let detached = session.detach_services();
        cleanup.run_all();

        let pid = detached[0].pid;
        assert!(is_alive(pid));
        let status = read_status(&fx.cfg.manifest_path()).unwrap();
        assert_eq!(status[0].record, detached[0]);

        // SAFETY: test-only; the service leads its own process group.
        unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    }

    #[test]
    fn ensure_config_records_status() {
        let fx = fixture();
        let root = fx.dir.path().to_path_buf();
        let marker = root.join("securedrop/config.py");
        let runner = FakeRunner::new().on("make test-config", move |_| {
            std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
            std::fs::write(&marker, "").unwrap();
        });
        let cleanup = CleanupRegistry::new();
        let mut session = Session::new(root.clone(), fx.cfg.clone(), cleanup.clone());

        assert_eq!(session.config_status(), None);
        assert_eq!(session.ensure_config(&runner).unwrap(), ConfigStatus::Created);
        assert_eq!(session.config_status(), Some(ConfigStatus::Created));
        cleanup.run_all();
        assert!(!root.join("securedrop/config.py").exists());
    }

    #[test]
    fn failed_display_skips_vnc_wave() {
        let mut fx = fixture();
        fx.cfg.display.program = "definitely-not-installed-devstack".into();
        let cleanup = CleanupRegistry::new();
        let runner = FakeRunner::new();
        let mut session = Session::new(fx.dir.path().into(), fx.cfg.clone(), cleanup.clone());

        let err = session.start_services(&[ServiceKind::Vnc], &runner).unwrap_err();
        assert_eq!(err.downcast_ref::<LaunchError>().unwrap().service(), "xvfb");
        assert!(runner.calls().is_empty());
        cleanup.run_all();
    }

    #[test]
    fn vnc_password_is_stored_before_vnc_spawns() {
        let mut fx = fixture();
        // Display stand-in: `true` answers the display query at once.
        fx.cfg.display.program = "sleep".into();
        fx.cfg.display.probe_program = "true".into();
        fx.cfg.vnc.program = "definitely-not-installed-devstack".into();
        fx.cfg.vnc.password_file = fx.dir.path().join("vncpasswd");
        let cleanup = CleanupRegistry::new();
        let runner = FakeRunner::new();
        let mut session = Session::new(fx.dir.path().into(), fx.cfg.clone(), cleanup.clone());

        let err = session.start_services(&[ServiceKind::Vnc], &runner).unwrap_err();
        assert_eq!(err.downcast_ref::<LaunchError>().unwrap().service(), "vnc");
        assert_eq!(
            runner.command_lines(),
            vec![format!(
                "definitely-not-installed-devstack -storepasswd freedom {}",
                fx.dir.path().join("vncpasswd").display()
            )]
        );
        cleanup.run_all();
    }

    #[test]
    fn cleanup_during_readiness_wait_stops_the_service() {
        let mut fx = fixture();
        fx.cfg.tor.args = vec!["-c".into(), "echo \"started $$\"; exec sleep 300".into()];
        fx.cfg.tor.readiness = ReadinessBudget {
            attempts: 100,
            interval_ms: 20,
        };
        let capture = fx.cfg.capture_path(ServiceKind::Tor);
        let cleanup = CleanupRegistry::new();
        let mut session = Session::new(fx.dir.path().into(), fx.cfg.clone(), cleanup.clone());

        let (pid, result) = std::thread::scope(|scope| {
            let launch = scope.spawn(|| session.start_services(&[ServiceKind::Tor], &FakeRunner::new()));
            let pid = loop {
                let text = std::fs::read_to_string(&capture).unwrap_or_default();
                if let Some(pid) = text
                    .strip_prefix("started ")
                    .and_then(|rest| rest.trim().parse::<u32>().ok())
                {
                    break pid;
                }
                std::thread::sleep(Duration::from_millis(10));
            };
            let report = cleanup.run_all();
            assert_eq!(report.failed, 0);
            assert!(!is_alive(pid), "unready service survived cleanup");
            (pid, launch.join().unwrap())
        });

        let err = result.unwrap_err();
        let launch = err.downcast_ref::<LaunchError>().unwrap();
        assert!(matches!(launch, LaunchError::ReadinessTimeout { exit: None, .. }));
        assert!(session.records().iter().all(|record| record.pid != pid));
    }
}
