use crate::{ExitStatus, Popen, PopenConfig, Redirection};

#[test]
fn create_and_wait_true() {
    let mut p = Popen::create(&["true"], PopenConfig::default()).unwrap();
    let status = p.wait().unwrap();
    assert!(status.success());
}

#[test]
fn create_and_wait_false() {
    let mut p = Popen::create(&["false"], PopenConfig::default()).unwrap();
    let status = p.wait().unwrap();
    assert!(!status.success());
    assert_eq!(status, ExitStatus::Exited(1));
}

#[test]
fn no_such_executable_is_an_error() {
    let result = Popen::create(
        &["/no/such/executable/anywhere"],
        PopenConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn empty_argv_is_an_argument_error() {
    let empty: &[&str] = &[];
    let result = Popen::create(empty, PopenConfig::default());
    assert!(matches!(result, Err(crate::PopenError::Argument(_))));
}

#[test]
fn stdout_pipe_captures_output() {
    let mut p = Popen::create(
        &["echo", "hi there"],
        PopenConfig {
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    let (out, _err) = p.communicate(None).unwrap();
    assert_eq!(out.unwrap(), b"hi there\n");
    assert!(p.wait().unwrap().success());
}

#[test]
fn stderr_merge_into_stdout() {
    let mut p = Popen::create(
        &["sh", "-c", "echo out; echo err 1>&2"],
        PopenConfig {
            stdout: Redirection::Pipe,
            stderr: Redirection::Merge,
            ..Default::default()
        },
    )
    .unwrap();
    let (out, err) = p.communicate(None).unwrap();
    let out = String::from_utf8(out.unwrap()).unwrap();
    assert!(out.contains("out"));
    assert!(out.contains("err"));
    assert!(err.is_none());
    p.wait().unwrap();
}

#[test]
fn detach_prevents_waiting_on_drop() {
    let mut p = Popen::create(&["sleep", "0"], PopenConfig::default()).unwrap();
    p.detach();
    let pid = p.pid();
    assert!(pid.is_some());
    drop(p);
    // Reap it ourselves so the test doesn't leave a zombie behind.
    if let Some(pid) = pid {
        unsafe {
            let mut status = 0;
            libc::waitpid(pid as libc::pid_t, &mut status, 0);
        }
    }
}

#[test]
fn poll_returns_none_while_running_then_some_after_exit() {
    let mut p = Popen::create(&["sleep", "1"], PopenConfig::default()).unwrap();
    assert_eq!(p.poll(), None);
    let status = p.wait().unwrap();
    assert!(status.success());
    assert_eq!(p.poll(), Some(status));
}

#[test]
fn terminate_sends_sigterm() {
    let mut p = Popen::create(&["sleep", "30"], PopenConfig::default()).unwrap();
    p.terminate().unwrap();
    let status = p.wait().unwrap();
    assert_eq!(status, ExitStatus::Signaled(libc::SIGTERM as u8));
}

#[test]
fn send_signal_delivers_an_arbitrary_signal() {
    let mut p = Popen::create(&["sleep", "30"], PopenConfig::default()).unwrap();
    p.send_signal(libc::SIGHUP).unwrap();
    let status = p.wait().unwrap();
    assert_eq!(status, ExitStatus::Signaled(libc::SIGHUP as u8));
}

#[test]
fn send_signal_group_reaches_a_process_group_leader() {
    use childproc::Exec;
    let mut p = Exec::cmd("sleep").arg("30").setpgid().popen().unwrap();
    p.send_signal_group(libc::SIGTERM).unwrap();
    let status = p.wait().unwrap();
    assert_eq!(status, ExitStatus::Signaled(libc::SIGTERM as u8));
}
