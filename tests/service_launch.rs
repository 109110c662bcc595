//! Integration tests for launching services with stand-in programs.
//!
//! The real daemons are not needed: each test points a service's config at
//! `sh` and checks how the launcher treats it.

use std::path::Path;
use std::time::{Duration, Instant};

use devstack::config::{Config, ReadinessBudget, ServiceKind};
use devstack::process::{LaunchError, is_alive, start_service, terminate};
use devstack::services::descriptor;

fn config_in(dir: &Path) -> Config {
    Config {
        capture_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

#[test]
fn display_that_never_answers_times_out_with_its_output() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut cfg = config_in(dir.path());
    cfg.display.program = "sh".into();
    cfg.display.probe_program = "false".into();
    cfg.display.readiness = ReadinessBudget {
        attempts: 10,
        interval_ms: 20,
    };

    let mut desc = descriptor(ServiceKind::Xvfb, &cfg, dir.path());
    desc.args = vec![
        "-c".into(),
        "echo 'Fatal server error: no screens found' >&2; exit 1".into(),
    ];

    let started = Instant::now();
    let err = start_service(desc).expect_err("display should not become ready");
    assert!(started.elapsed() >= Duration::from_millis(9 * 20));

    match &err {
        LaunchError::ReadinessTimeout {
            service,
            attempts,
            exit,
            log,
        } => {
            assert_eq!(service, "xvfb");
            assert_eq!(*attempts, 10);
            assert_eq!(exit.as_deref(), Some("exited with code 1"));
            assert!(log.contains("no screens found"), "log was {log:?}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    let diagnostic = err.diagnostic();
    assert!(diagnostic.contains("--- xvfb output ---"));
    assert!(diagnostic.contains("no screens found"));
}

#[test]
fn data_store_starts_without_the_stale_dump() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let root = dir.path();
    let dump = root.join("securedrop/dump.rdb");
    std::fs::create_dir_all(dump.parent().unwrap()).unwrap();
    std::fs::write(&dump, b"REDIS0009 stale").unwrap();

    // A tiny PING responder stands in for the real server.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    std::thread::spawn(move || {
        use std::io::{BufRead, BufReader, Write};
        for stream in listener.incoming().flatten() {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            if reader.read_line(&mut line).is_ok() && line.trim_end() == "PING" {
                let mut stream = stream;
                let _ = stream.write_all(b"+PONG\r\n");
            }
        }
    });

    let mut cfg = config_in(root);
    cfg.redis.program = "sh".into();
    cfg.redis.addr = addr;
    cfg.redis.readiness = ReadinessBudget {
        attempts: 20,
        interval_ms: 20,
    };
    let mut desc = descriptor(ServiceKind::Redis, &cfg, root);
    let saw_dump = root.join("saw-dump");
    desc.args = vec![
        "-c".into(),
        format!(
            "test -e {} && touch {}; exec sleep 30",
            dump.display(),
            saw_dump.display()
        ),
    ];

    let mut handle = start_service(desc).expect("data store should become ready");
    assert!(!dump.exists());
    assert!(!saw_dump.exists(), "service saw the stale dump");
    assert!(is_alive(handle.pid));

    terminate(&mut handle, Duration::from_secs(2)).unwrap();
    assert!(!handle.is_running());
}

#[test]
fn anonymity_network_is_ready_on_bootstrap_log_line() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut cfg = config_in(dir.path());
    cfg.tor.program = "sh".into();
    cfg.tor.args = vec![
        "-c".into(),
        "sleep 0.1; echo '[notice] Bootstrapped 100% (done): Done'; exec sleep 30".into(),
    ];
    cfg.tor.control_addr = "127.0.0.1:1".into();
    cfg.tor.readiness = ReadinessBudget {
        attempts: 100,
        interval_ms: 20,
    };

    let mut handle = start_service(descriptor(ServiceKind::Tor, &cfg, dir.path()))
        .expect("tor stand-in should become ready");
    assert_eq!(handle.name, "tor");
    terminate(&mut handle, Duration::from_secs(2)).unwrap();
}
