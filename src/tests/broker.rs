use crate::broker;

#[test]
fn register_and_drop_cleans_up() {
    let sub = broker::register().unwrap();
    // A second concurrent subscriber shares the same global pipe.
    let sub2 = broker::register().unwrap();
    assert_eq!(sub.global_read, sub2.global_read);
    drop(sub);
    drop(sub2);
    // Registering again after every subscriber dropped must still work:
    // it re-installs the handler and creates a fresh global pipe.
    let sub3 = broker::register().unwrap();
    drop(sub3);
}

#[test]
fn wakeup_all_notifies_every_self_pipe() {
    use std::io::Read;
    let sub_a = broker::register().unwrap();
    let sub_b = broker::register().unwrap();

    broker::wakeup_all();

    let mut buf = [0u8; 1];
    let mut a = sub_a.self_read.try_clone().unwrap();
    let mut b = sub_b.self_read.try_clone().unwrap();
    assert_eq!(a.read(&mut buf).unwrap(), 1);
    assert_eq!(b.read(&mut buf).unwrap(), 1);
}
