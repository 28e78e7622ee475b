use crate::Exec;

#[test]
fn cmd_join_reports_exit_status() {
    let status = Exec::cmd("true").join().unwrap();
    assert!(status.success());
}

#[test]
fn checked_fails_on_nonzero_exit() {
    let result = Exec::cmd("false").checked().join();
    assert!(matches!(result, Err(crate::PopenError::NonZeroExit { .. })));
}

#[test]
fn capture_collects_stdout_and_stderr() {
    let capture = Exec::cmd("sh")
        .arg("-c")
        .arg("echo out; echo err 1>&2")
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str(), "out\n");
    assert_eq!(capture.stderr_str(), "err\n");
    assert!(capture.success());
}

#[test]
fn stdin_data_is_fed_to_the_child() {
    let capture = Exec::cmd("cat").stdin("fed via builder").capture().unwrap();
    assert_eq!(capture.stdout_str(), "fed via builder");
}

#[test]
fn shell_runs_through_sh_c() {
    let capture = Exec::shell("echo $((2 + 2))").capture().unwrap();
    assert_eq!(capture.stdout_str(), "4\n");
}

#[test]
fn env_clear_hides_ambient_variables() {
    // SAFETY: test-only, no other thread in this process depends on this var.
    unsafe { std::env::set_var("CHILDPROC_TEST_VAR", "visible") };
    let capture = Exec::cmd("sh")
        .arg("-c")
        .arg("echo ${CHILDPROC_TEST_VAR:-absent}")
        .env_clear()
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str(), "absent\n");
    unsafe { std::env::remove_var("CHILDPROC_TEST_VAR") };
}

#[test]
fn env_sets_a_variable_for_the_child() {
    let capture = Exec::cmd("sh")
        .arg("-c")
        .arg("echo $GREETING")
        .env("GREETING", "hello")
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str(), "hello\n");
}

#[test]
fn cwd_changes_the_childs_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let capture = Exec::cmd("pwd").cwd(dir.path()).capture().unwrap();
    assert_eq!(capture.stdout_str().trim_end(), dir.path().to_str().unwrap());
}
