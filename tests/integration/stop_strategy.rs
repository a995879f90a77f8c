#[path = "common/mod.rs"]
mod common;

use std::{
    collections::BTreeMap,
    fs, thread,
    time::{Duration, Instant},
};

use herdsman::error::{CommandError, DaemonError};
use herdsman::{
    Command, CommandLine, Daemon, DaemonSpec, ExitStatus, Line, OutputMode, StopStrategy,
};
use herdsman::signal::SignalSpec;
use nix::sys::signal::Signal;
use tempfile::tempdir;

use common::{init_tracing, is_process_alive};
#[cfg(not(target_os = "linux"))]
use common::wait_for_process_gone;

#[test]
fn stop_command_receives_daemon_pid() {
    init_tracing();
    let dir = tempdir().unwrap();
    let pid_file = dir.path().join("stopped.pid");

    let mut spec = DaemonSpec::new("sleep 30");
    spec.stop_command = Some(CommandLine::from(format!(
        "echo $DAEMON_PID > {}; kill $DAEMON_PID",
        pid_file.display()
    )));
    let mut daemon = Daemon::from_spec("helper-stopped", &spec).unwrap();

    daemon.start().unwrap();
    let pid = daemon.pid().unwrap();
    let status = daemon.stop().unwrap().expect("exit status");

    assert_eq!(status.signal(), Some(Signal::SIGTERM));
    assert_eq!(fs::read_to_string(&pid_file).unwrap().trim(), pid.to_string());
    assert!(!is_process_alive(pid));
}

#[test]
fn stop_blocks_until_stop_command_exits() {
    init_tracing();
    let dir = tempdir().unwrap();
    let marker = dir.path().join("helper-finished");

    // The daemon dies right away; only the helper keeps running.
    let mut spec = DaemonSpec::new("sleep 30");
    spec.cwd = Some(dir.path().to_path_buf());
    spec.stop_command = Some(CommandLine::from(
        "kill $DAEMON_PID; sleep 0.5; echo done > helper-finished",
    ));
    let mut daemon = Daemon::from_spec("slow-stop", &spec).unwrap();

    daemon.start().unwrap();
    let started = Instant::now();
    daemon.stop().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(fs::read_to_string(&marker).unwrap(), "done\n");
    assert!(!daemon.is_running());
}

#[test]
fn stop_command_shares_daemon_environment() {
    init_tracing();
    let dir = tempdir().unwrap();
    let token_file = dir.path().join("token");

    let mut spec = DaemonSpec::new("sleep 30");
    spec.environment = BTreeMap::from([("HERDSMAN_TOKEN".to_string(), "s3cret".to_string())]);
    spec.cwd = Some(dir.path().to_path_buf());
    spec.stop_command = Some(CommandLine::from(
        "echo $HERDSMAN_TOKEN > token; kill $DAEMON_PID",
    ));
    let mut daemon = Daemon::from_spec("env-stop", &spec).unwrap();

    daemon.start().unwrap();
    daemon.stop().unwrap();
    assert_eq!(fs::read_to_string(&token_file).unwrap(), "s3cret\n");
}

#[test]
fn failing_stop_command_still_reaps_daemon() {
    init_tracing();
    let mut spec = DaemonSpec::new("sleep 30");
    spec.stop_command = Some(CommandLine::from("kill $DAEMON_PID; exit 3"));
    let mut daemon = Daemon::from_spec("grumpy-stop", &spec).unwrap();

    daemon.start().unwrap();
    let status = daemon.stop().unwrap().expect("exit status");
    assert_eq!(status.signal(), Some(Signal::SIGTERM));
}

#[test]
fn unlaunchable_stop_command_keeps_daemon_owned() {
    init_tracing();
    let mut daemon = Daemon::new(
        "stuck",
        Command::new("sleep 30").unwrap(),
        StopStrategy::Command(Command::new("/nonexistent/herdsman-stopper").unwrap()),
    );

    daemon.start().unwrap();
    let pid = daemon.pid().unwrap();
    let err = daemon.stop().expect_err("stop command cannot run");
    assert!(matches!(
        err,
        DaemonError::Command(CommandError::Exec { .. })
    ));
    assert_eq!(daemon.pid(), Some(pid));
    assert!(daemon.is_alive());

    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
    let status = daemon.reap().unwrap().expect("exit status");
    assert_eq!(status.signal(), Some(Signal::SIGKILL));
}

#[test]
fn configured_signal_is_delivered() {
    init_tracing();
    let mut spec = DaemonSpec::new("sleep 30");
    spec.stop_signal = Some(SignalSpec::from("usr1"));
    let mut daemon = Daemon::from_spec("usr1", &spec).unwrap();

    daemon.start().unwrap();
    let status = daemon.stop().unwrap().expect("exit status");
    assert_eq!(status, ExitStatus::Signaled(libc::SIGUSR1));
}

#[test]
fn signal_reaches_whole_process_group() {
    init_tracing();
    let mut wrapper = Daemon::new(
        "wrapper",
        Command::new("sleep 30 & echo $!; wait")
            .unwrap()
            .output(OutputMode::Capture),
        StopStrategy::Signal(Signal::SIGTERM),
    );

    wrapper.start().unwrap();
    let grandchild: u32 = match wrapper.read_line().unwrap() {
        Some(Line::Data(line)) => line.trim().parse().expect("background pid"),
        other => panic!("unexpected output: {other:?}"),
    };
    assert!(is_process_alive(grandchild));

    wrapper.stop().unwrap();
    // The orphaned grandchild may linger as a zombie until init collects it.
    #[cfg(target_os = "linux")]
    common::wait_for_process_exit(grandchild);
    #[cfg(not(target_os = "linux"))]
    wait_for_process_gone(grandchild);
}

#[test]
fn stop_after_natural_exit_reports_exit_status() {
    init_tracing();
    let mut quick = Daemon::new(
        "quick",
        Command::new("true").unwrap(),
        StopStrategy::default(),
    );

    quick.start().unwrap();
    thread::sleep(Duration::from_millis(300));

    assert_eq!(quick.stop().unwrap(), Some(ExitStatus::Exited(0)));
    assert!(!quick.is_running());
}
