use std::time::Duration;

use crate::{Popen, PopenConfig, Redirection};

fn cat() -> Popen {
    Popen::create(
        &["cat"],
        PopenConfig {
            stdin: Redirection::Pipe,
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn communicate_input_output() {
    let mut p = cat();
    let (out, err) = p.communicate(Some(b"round trip")).unwrap();
    assert_eq!(out.unwrap(), b"round trip");
    assert!(err.is_none());
    assert!(p.wait().unwrap().success());
}

#[test]
fn communicate_empty_input() {
    let mut p = cat();
    let (out, _err) = p.communicate(Some(b"")).unwrap();
    assert_eq!(out.unwrap(), b"");
    assert!(p.wait().unwrap().success());
}

#[test]
fn communicate_large_input_output_does_not_deadlock() {
    // Exceeds the typical 64KiB pipe buffer in both directions; a naive
    // write-then-read implementation would deadlock here.
    let data = vec![b'x'; 1_000_000];
    let mut p = cat();
    let (out, _err) = p.communicate(Some(&data)).unwrap();
    assert_eq!(out.unwrap().len(), data.len());
    assert!(p.wait().unwrap().success());
}

#[test]
fn communicate_stdout_only_no_stdin_redirected() {
    let mut p = Popen::create(
        &["echo", "only stdout"],
        PopenConfig {
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    let (out, err) = p.communicate(None).unwrap();
    assert_eq!(out.unwrap(), b"only stdout\n");
    assert!(err.is_none());
    p.wait().unwrap();
}

#[test]
fn communicate_stderr_only() {
    let mut p = Popen::create(
        &["sh", "-c", "echo on stderr 1>&2"],
        PopenConfig {
            stderr: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    let (out, err) = p.communicate(None).unwrap();
    assert!(out.is_none());
    assert_eq!(err.unwrap(), b"on stderr\n");
    p.wait().unwrap();
}

#[test]
fn communicate_timeout_returns_partial_output() {
    let mut p = Popen::create(
        &["sh", "-c", "echo partial; sleep 2"],
        PopenConfig {
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    let mut out = Vec::new();
    let mut err = Vec::new();
    let result = p
        .communicate_start(None)
        .limit_time(Duration::from_millis(200))
        .read_to(&mut out, &mut err);
    assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::TimedOut);
    assert_eq!(out, b"partial\n");
    p.terminate().unwrap();
    p.wait().unwrap();
}

#[test]
fn communicate_size_limit() {
    let mut p = cat();
    let mut out = Vec::new();
    let mut err = Vec::new();
    p.communicate_start(Some(b"0123456789".to_vec()))
        .limit_size(4)
        .read_to(&mut out, &mut err)
        .unwrap();
    assert_eq!(out, b"0123");
    // The stream is still live; a follow-up read drains the rest.
    p.communicate_start(None).read_to(&mut out, &mut err).unwrap();
    assert_eq!(out, b"0123456789");
    p.wait().unwrap();
}

#[test]
fn for_each_delivers_incrementally_without_overlap() {
    let mut p = Popen::create(
        &["sh", "-c", "echo one; echo two 1>&2; echo three"],
        PopenConfig {
            stdout: Redirection::Pipe,
            stderr: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();

    let mut out_chunks = Vec::new();
    let mut err_chunks = Vec::new();
    p.communicate_start(None)
        .for_each(|out, err| {
            if !out.is_empty() {
                out_chunks.push(out.to_vec());
            }
            if !err.is_empty() {
                err_chunks.push(err.to_vec());
            }
        })
        .unwrap();

    assert_eq!(out_chunks.concat(), b"one\nthree\n");
    assert_eq!(err_chunks.concat(), b"two\n");
    p.wait().unwrap();
}

#[test]
fn communicate_premature_stdin_close_does_not_surface_epipe() {
    // `head -c4` stops reading stdin well before all the input is written.
    let mut p = Popen::create(
        &["sh", "-c", "head -c 4"],
        PopenConfig {
            stdin: Redirection::Pipe,
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    let data = vec![b'y'; 200_000];
    let (out, _err) = p.communicate(Some(&data)).unwrap();
    assert_eq!(out.unwrap(), b"yyyy");
    p.wait().unwrap();
}
