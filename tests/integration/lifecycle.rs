#[path = "common/mod.rs"]
mod common;

use herdsman::error::{CommandError, DaemonError};
use herdsman::{Command, Daemon, DaemonSpec, ExitStatus, Line, OutputMode, StopStrategy};
use nix::sys::signal::Signal;

use common::{init_tracing, is_process_alive, read_to_eof, wait_until_dead};

fn daemon(name: &str, command: &str) -> Daemon {
    Daemon::new(
        name,
        Command::new(command).expect("valid command"),
        StopStrategy::default(),
    )
}

#[test]
fn start_poll_and_stop_long_running_daemon() {
    init_tracing();
    let mut sleeper = Daemon::from_spec("sleeper", &DaemonSpec::new("sleep 5")).unwrap();

    sleeper.start().expect("start sleeper");
    let pid = sleeper.pid().expect("running pid");
    assert!(sleeper.is_running());
    assert!(sleeper.is_alive());
    assert!(is_process_alive(pid));

    let status = sleeper.stop().expect("stop sleeper").expect("exit status");
    assert_eq!(status.signal(), Some(Signal::SIGTERM));
    assert_eq!(sleeper.last_exit(), Some(status));
    assert_eq!(sleeper.pid(), None);
    assert!(!sleeper.is_alive());
    assert!(!is_process_alive(pid));
}

#[test]
fn second_start_keeps_running_instance() {
    init_tracing();
    let mut sleeper = daemon("sleeper", "sleep 5");

    sleeper.start().unwrap();
    let first = sleeper.pid().unwrap();
    sleeper.start().unwrap();
    assert_eq!(sleeper.pid(), Some(first));

    sleeper.stop().unwrap();
}

#[test]
fn failing_program_reaches_end_of_output() {
    init_tracing();
    let mut failing = Daemon::new(
        "failing",
        Command::new("/bin/false")
            .unwrap()
            .output(OutputMode::Capture),
        StopStrategy::default(),
    );

    failing.start().unwrap();
    assert!(failing.as_raw_fd().is_some());
    assert_eq!(failing.read_line().unwrap(), Some(Line::Eof));

    wait_until_dead(&mut failing);
    assert_eq!(failing.last_exit(), Some(ExitStatus::Exited(1)));
}

#[test]
fn exited_daemon_keeps_output_until_reaped() {
    init_tracing();
    let mut short = Daemon::new(
        "short",
        Command::new("echo last words; exit 7")
            .unwrap()
            .output(OutputMode::Capture),
        StopStrategy::default(),
    );

    short.start().unwrap();
    wait_until_dead(&mut short);

    assert_eq!(short.pid(), None);
    assert_eq!(short.last_exit(), Some(ExitStatus::Exited(7)));
    assert!(short.as_raw_fd().is_some());
    assert_eq!(read_to_eof(&mut short), ["last words\n"]);

    assert_eq!(short.reap().unwrap(), None);
    assert_eq!(short.as_raw_fd(), None);
    assert_eq!(short.last_exit(), Some(ExitStatus::Exited(7)));
}

#[test]
fn reap_waits_for_natural_exit() {
    init_tracing();
    let mut brief = daemon("brief", "sleep 0.2");

    brief.start().unwrap();
    assert_eq!(brief.reap().unwrap(), Some(ExitStatus::Exited(0)));
    assert!(!brief.is_running());
}

#[test]
fn daemon_can_be_restarted_after_exit() {
    init_tracing();
    let mut quick = daemon("quick", "true");

    quick.start().unwrap();
    let first = quick.pid().unwrap();
    wait_until_dead(&mut quick);

    quick.start().unwrap();
    let second = quick.pid().unwrap();
    assert_ne!(first, second);
    quick.reap().unwrap();
}

#[test]
fn unrunnable_program_exits_with_reserved_status() {
    init_tracing();
    let mut missing = Daemon::new(
        "missing",
        Command::new("/nonexistent/herdsman-daemon --flag")
            .unwrap()
            .output(OutputMode::Capture),
        StopStrategy::default(),
    );

    missing.start().expect("only fork failures are errors");
    assert!(!missing.is_running());
    assert!(!missing.is_alive());
    assert_eq!(missing.as_raw_fd(), None);
    let status = missing.last_exit().expect("launch recorded as exited");
    assert!(status.is_launch_failure(), "{status}");
    assert_eq!(missing.stop().unwrap(), None);
}

#[test]
fn unrunnable_program_matches_shell_wrapped_outcome() {
    init_tracing();
    let mut direct = daemon("direct", "/nonexistent/herdsman-daemon");
    let mut wrapped = daemon("wrapped", "/nonexistent/herdsman-daemon $HOME");

    direct.start().unwrap();
    wrapped.start().unwrap();
    wrapped.reap().unwrap();

    assert_eq!(direct.last_exit(), Some(ExitStatus::Exited(127)));
    assert_eq!(direct.last_exit(), wrapped.last_exit());
}

#[test]
fn unknown_user_fails_start() {
    init_tracing();
    let mut nobody = Daemon::new(
        "nobody",
        Command::new("sleep 5").unwrap().user("no-such-user-herdsman"),
        StopStrategy::default(),
    );

    let err = nobody.start().expect_err("user does not exist");
    assert!(matches!(
        err,
        DaemonError::Command(CommandError::UnknownUser(_))
    ));
    assert!(!nobody.is_running());
    assert_eq!(nobody.last_exit(), None);
}

#[test]
fn dropping_running_daemon_stops_it() {
    init_tracing();
    let mut abandoned = daemon("abandoned", "sleep 30");
    abandoned.start().unwrap();
    let pid = abandoned.pid().unwrap();

    drop(abandoned);
    assert!(!is_process_alive(pid));
}

#[test]
fn dropping_daemon_with_unlaunchable_stop_command_kills_it() {
    init_tracing();
    let mut stuck = Daemon::new(
        "stuck",
        Command::new("sleep 30").unwrap(),
        StopStrategy::Command(Command::new("/nonexistent/herdsman-stopper").unwrap()),
    );
    stuck.start().unwrap();
    let pid = stuck.pid().unwrap();

    drop(stuck);
    assert!(!is_process_alive(pid));
}

#[test]
fn scoped_daemon_is_stopped_at_end_of_scope() {
    init_tracing();
    let mut sleeper = daemon("scoped", "sleep 30");

    let pid = {
        let guard = sleeper.start_scoped().unwrap();
        guard.pid().unwrap()
    };

    assert!(!sleeper.is_running());
    assert!(!is_process_alive(pid));
    assert_eq!(
        sleeper.last_exit().and_then(|status| status.signal()),
        Some(Signal::SIGTERM)
    );
}

#[test]
fn scoped_guard_kills_daemon_when_stop_fails() {
    init_tracing();
    let mut stuck = Daemon::new(
        "scoped-stuck",
        Command::new("sleep 30").unwrap(),
        StopStrategy::Command(Command::new("/nonexistent/herdsman-stopper").unwrap()),
    );

    let pid = {
        let guard = stuck.start_scoped().unwrap();
        guard.pid().unwrap()
    };

    assert!(!stuck.is_running());
    assert!(!is_process_alive(pid));
    assert_eq!(
        stuck.last_exit().and_then(|status| status.signal()),
        Some(Signal::SIGKILL)
    );
}

#[test]
fn scoped_start_refuses_running_daemon() {
    init_tracing();
    let mut sleeper = daemon("already", "sleep 30");
    sleeper.start().unwrap();
    let pid = sleeper.pid().unwrap();

    let err = sleeper.start_scoped().expect_err("already running");
    assert!(matches!(
        err,
        DaemonError::AlreadyRunning { pid: owned, .. } if owned == pid
    ));
    assert!(sleeper.is_alive());

    sleeper.stop().unwrap();
}

#[test]
fn scoped_daemon_finish_reports_status() {
    init_tracing();
    let mut sleeper = daemon("finished", "sleep 30");

    let mut guard = sleeper.start_scoped().unwrap();
    assert!(guard.is_alive());
    guard.metadata_mut().set("checked", true);
    let status = guard.finish().unwrap().expect("exit status");

    assert_eq!(status.signal(), Some(Signal::SIGTERM));
    assert!(!sleeper.is_running());
    assert_eq!(sleeper.metadata().get("checked").unwrap(), &true);
}

#[cfg(target_os = "linux")]
#[test]
fn argv0_override_is_visible_to_the_system() {
    init_tracing();
    let mut named = Daemon::new(
        "named",
        Command::new("sleep 5").unwrap().argv0("herdsman-sleeper"),
        StopStrategy::default(),
    );
    named.start().unwrap();
    let pid = named.pid().unwrap();

    let cmdline = std::fs::read(format!("/proc/{pid}/cmdline")).unwrap();
    let args: Vec<&[u8]> = cmdline.split(|byte| *byte == 0).collect();
    assert_eq!(args[0], b"herdsman-sleeper");
    assert_eq!(args[1], b"5");

    named.stop().unwrap();
}
