use crate::Exec;

#[test]
fn two_stage_pipeline_filters_output() {
    let capture = (Exec::cmd("echo").arg("b\na\nc") | Exec::cmd("sort")).capture().unwrap();
    assert_eq!(capture.stdout_str(), "a\nb\nc\n");
}

#[test]
fn three_stage_pipeline() {
    let capture = (Exec::cmd("printf").arg("3\n1\n2\n")
        | Exec::cmd("sort")
        | Exec::cmd("head").arg("-n").arg("1"))
    .capture()
    .unwrap();
    assert_eq!(capture.stdout_str(), "1\n");
}

#[test]
fn pipeline_stdin_feeds_first_stage() {
    let capture = (Exec::cmd("cat") | Exec::cmd("rev"))
        .stdin("hello\n")
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str(), "olleh\n");
}

#[test]
fn pipeline_join_returns_every_stage_status() {
    let statuses = (Exec::cmd("true") | Exec::cmd("false")).join().unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses[0].success());
    assert!(!statuses[1].success());
}

#[test]
fn pipeline_with_unbounded_producer_does_not_hang_on_early_consumer_exit() {
    // `head -n1` exits after its first line. If any earlier stage retained
    // a leaked copy of the pipe feeding it, `yes` would never see EPIPE and
    // this call would hang forever instead of returning once `head` exits.
    let capture = (Exec::cmd("yes") | Exec::cmd("head").arg("-n1"))
        .capture()
        .unwrap();
    assert_eq!(capture.stdout_str(), "y\n");
}
