use crate::posix;

#[test]
fn pipe_roundtrip() {
    let (mut read, mut write) = posix::pipe().unwrap();
    use std::io::{Read, Write};
    write.write_all(b"hello").unwrap();
    drop(write);
    let mut buf = Vec::new();
    read.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"hello");
}

#[test]
fn set_inheritable_toggles_cloexec() {
    let (_read, write) = posix::pipe().unwrap();
    use std::os::unix::io::AsRawFd;
    posix::set_inheritable(&write, false).unwrap();
    let flags = posix::fcntl_get(write.as_raw_fd(), posix::F_GETFD).unwrap();
    assert_ne!(flags & posix::FD_CLOEXEC, 0);
    posix::set_inheritable(&write, true).unwrap();
    let flags = posix::fcntl_get(write.as_raw_fd(), posix::F_GETFD).unwrap();
    assert_eq!(flags & posix::FD_CLOEXEC, 0);
}

#[test]
fn set_nonblocking_toggles_oflag() {
    let (read, _write) = posix::pipe().unwrap();
    use std::os::unix::io::AsRawFd;
    posix::set_nonblocking(read.as_raw_fd()).unwrap();
    let flags = posix::fcntl_get(read.as_raw_fd(), posix::F_GETFL).unwrap();
    assert_ne!(flags & libc::O_NONBLOCK, 0);
}

#[test]
fn waitpid_reaps_a_real_child() {
    let cmd = std::ffi::CString::new("true").unwrap();
    let argv = [cmd.as_ptr(), std::ptr::null()];
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0);
    if pid == 0 {
        unsafe {
            libc::execvp(cmd.as_ptr(), argv.as_ptr());
            libc::_exit(127);
        }
    }
    let (got, status) = posix::waitpid(pid as u32, 0).unwrap();
    assert_eq!(got, pid as u32);
    assert_eq!(status & 0x7f, 0); // exited normally
}

#[test]
fn poll_reports_pollin_when_data_is_written() {
    let (read, mut write) = posix::pipe().unwrap();
    use std::io::Write as _;
    use std::os::unix::io::AsRawFd;
    write.write_all(b"x").unwrap();
    let mut fds = [posix::PollFd::new(Some(read.as_raw_fd()), posix::POLLIN)];
    let n = posix::poll(&mut fds, 1000).unwrap();
    assert_eq!(n, 1);
    assert!(fds[0].test(posix::POLLIN));
}
