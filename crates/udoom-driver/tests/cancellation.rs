mod common;

use std::sync::Arc;
use std::thread;

use common::{wait_until, Rig, Scratch};
use pretty_assertions::assert_eq;
use udoom_abi::{RING_SIZE_BYTES, RING_SLOT_COUNT, WAIT_NONE};
use udoom_driver::error::errno;
use udoom_driver::DriverError;

#[test]
fn cancelled_wait_withdraws_its_waiter() {
    let rig = Rig::manual();
    let client = Arc::new(rig.open());
    let scratch = Scratch::new(&client, 2);
    let (va, len) = scratch.load_dot(0, 0x10);
    client.run(va, len).unwrap();

    let canceller = client.canceller();
    let waiter = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.wait(0))
    };
    wait_until("waiter to block", || rig.device.pending_waiters() == 1);
    assert_eq!(rig.hw().registers().batch_wait, 16);

    canceller.cancel();
    let err = waiter.join().unwrap().unwrap_err();
    assert_eq!(err, DriverError::Cancelled);
    assert_eq!(err.errno(), errno::EINTR);
    assert_eq!(rig.device.pending_waiters(), 0);
    assert_eq!(rig.device.wait_trigger(), WAIT_NONE);
    assert_eq!(rig.hw().registers().batch_wait, WAIT_NONE);

    // The job itself is untouched and the client is still usable.
    rig.hw().run_until_idle();
    assert_eq!(scratch.pixel(0), 0x10);
    assert!(!client.is_quarantined());
    client.wait(0).unwrap();
}

#[test]
fn cancelling_one_client_leaves_others_waiting() {
    let rig = Rig::manual();
    let a = Arc::new(rig.open());
    let b = Arc::new(rig.open());
    let sa = Scratch::new(&a, 2);
    let sb = Scratch::new(&b, 2);
    let (va, len) = sa.load_dot(0, 1);
    a.run(va, len).unwrap();
    let (va, len) = sb.load_dot(0, 2);
    b.run(va, len).unwrap();

    let spawn_wait = |client: &Arc<udoom_driver::Client>| {
        let client = Arc::clone(client);
        thread::spawn(move || client.wait(0))
    };
    let wait_a = spawn_wait(&a);
    let wait_b = spawn_wait(&b);
    wait_until("both waiters", || rig.device.pending_waiters() == 2);
    assert_eq!(rig.device.wait_trigger(), 16);

    a.canceller().cancel();
    assert_eq!(wait_a.join().unwrap(), Err(DriverError::Cancelled));
    assert_eq!(rig.device.pending_waiters(), 1);
    assert_eq!(rig.device.wait_trigger(), 32);
    assert!(!wait_b.is_finished());

    rig.hw().run_until_idle();
    assert_eq!(wait_b.join().unwrap(), Ok(()));
    assert_eq!(sb.pixel(0), 2);
}

#[test]
fn cancelled_submission_queues_nothing() {
    let rig = Rig::manual();
    let client = Arc::new(rig.open());
    for _ in 0..RING_SLOT_COUNT - 1 {
        client.run(0, 0).unwrap();
    }

    let canceller = client.canceller();
    let submitter = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.run(0, 0))
    };
    wait_until("submitter to block", || rig.device.pending_waiters() == 1);

    canceller.cancel();
    assert_eq!(submitter.join().unwrap(), Err(DriverError::Cancelled));
    assert_eq!(rig.device.ring_positions(), (0, RING_SIZE_BYTES - 16));
    assert_eq!(rig.device.pending_waiters(), 0);
    assert_eq!(rig.device.stats().jobs_submitted, u64::from(RING_SLOT_COUNT - 1));

    rig.hw().run_until_idle();
    assert_eq!(rig.hw().stats().jobs_completed, u64::from(RING_SLOT_COUNT - 1));
}

#[test]
fn signal_raised_before_blocking_interrupts_the_next_wait() {
    let rig = Rig::manual();
    let client = rig.open();
    let scratch = Scratch::new(&client, 2);

    client.canceller().cancel();

    // Nothing in flight: the wait does not block and leaves the signal pending.
    client.wait(0).unwrap();

    let (va, len) = scratch.load_dot(0, 9);
    client.run(va, len).unwrap();
    assert_eq!(client.wait(0), Err(DriverError::Cancelled));
    assert_eq!(rig.device.pending_waiters(), 0);

    // The signal is consumed.
    rig.hw().run_until_idle();
    client.wait(0).unwrap();
    assert_eq!(scratch.pixel(0), 9);
}

#[test]
fn canceller_outliving_its_client_is_inert() {
    let rig = Rig::manual();
    let client = rig.open();
    let canceller = client.canceller();
    drop(client);
    canceller.cancel();

    let other = rig.open();
    let scratch = Scratch::new(&other, 2);
    let (va, len) = scratch.load_dot(0, 4);
    other.run(va, len).unwrap();
    let waiter = thread::spawn(move || {
        let result = other.wait(0);
        (other, result)
    });
    wait_until("waiter to block", || rig.device.pending_waiters() == 1);
    rig.hw().run_until_idle();
    let (other, result) = waiter.join().unwrap();
    assert_eq!(result, Ok(()));

    drop(other);
    drop(scratch);
    drop(rig);
    canceller.cancel();
}
