//! Controller scenarios driven through a scripted link: escrow decisions,
//! coin credit and payout, change planning, and cashless sessions.

use std::thread;
use std::time::{Duration, Instant};

use mdb_server::{Config, DeviceEvent, DeviceHandle, EventReceiver};

mod common;

use common::{MockLink, StopGuard};

// Coin setup response: scaling 5, 2 decimals, credits for
// 10/20/50/100/200/500.
const COIN_SETUP: &str = "p,031616050200FF02040A14286400000000000000000000";

fn test_config() -> Config {
    Config {
        bill_denominations: vec![1000, 2000, 5000, 10000, 20000, 50000],
        inventory_path: None,
    }
}

fn wait_for(
    events: &mut EventReceiver,
    deadline: Duration,
    matches: impl Fn(&DeviceEvent) -> bool,
) -> Option<DeviceEvent> {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if let Ok(event) = events.pop_event() {
            log::debug!("Test observed event: {event}");
            if matches(&event) {
                return Some(event);
            }
        }
    }
    None
}

#[test]
fn banknote_accepted_within_deadline() {
    let _lock = common::init().expect("test lock");

    let (link, sent) = MockLink::new(vec![("R,09", COIN_SETUP), ("R,33", "p,90")]);
    let handle = DeviceHandle::with_link(Box::new(link), test_config());
    let _guard = StopGuard(handle.clone());

    let mut events = handle.subscribe();
    handle.start().expect("device starts");

    assert!(handle.device_running());

    let escrow = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CashEscrowRequested { .. })
    })
    .expect("escrow requested");
    assert_eq!(escrow, DeviceEvent::CashEscrowRequested { amount: 1000 });

    handle.accept();

    let processed = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CashProcessed { .. })
    })
    .expect("bill processed");
    assert_eq!(
        processed,
        DeviceEvent::CashProcessed {
            amount: 1000,
            accepted: true
        }
    );

    assert_eq!(handle.inventory().snapshot().banknotes.get(&1000), Some(&1));
    assert!(sent.lock().iter().any(|line| line == "R,35,1"));
}

#[test]
fn banknote_returned_on_decision_timeout() {
    let _lock = common::init().expect("test lock");

    let (link, sent) = MockLink::new(vec![("R,33", "p,92")]);
    let handle = DeviceHandle::with_link(Box::new(link), test_config());
    let _guard = StopGuard(handle.clone());

    let mut events = handle.subscribe();
    handle.start().expect("device starts");

    let escrow = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CashEscrowRequested { .. })
    })
    .expect("escrow requested");
    assert_eq!(escrow, DeviceEvent::CashEscrowRequested { amount: 5000 });

    // No decision arrives; the 5 s deadline surfaces an error and the
    // bill goes back.
    let error = wait_for(&mut events, Duration::from_secs(8), |event| {
        matches!(event, DeviceEvent::Error { .. })
    })
    .expect("escrow timeout error");
    match error {
        DeviceEvent::Error { message } => assert!(message.contains("escrow timeout")),
        _ => unreachable!(),
    }

    let processed = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CashProcessed { .. })
    })
    .expect("bill processed");
    assert_eq!(
        processed,
        DeviceEvent::CashProcessed {
            amount: 5000,
            accepted: false
        }
    );

    assert!(handle.inventory().snapshot().banknotes.is_empty());
    // Init returns the escrow once, the timed-out decision once more.
    assert_eq!(
        sent.lock().iter().filter(|line| *line == "R,35,0").count(),
        2
    );
}

#[test]
fn coin_credited_then_dispensed_as_change() {
    let _lock = common::init().expect("test lock");

    let (link, sent) = MockLink::new(vec![
        ("R,09", COIN_SETUP),
        ("R,0B", "p,5112"),
        ("R,0A", "p,00000001"),
        ("R,0B", "p,9112"),
    ]);
    let handle = DeviceHandle::with_link(Box::new(link), test_config());
    let _guard = StopGuard(handle.clone());

    let mut events = handle.subscribe();
    handle.start().expect("device starts");

    let received = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CoinReceived { .. })
    })
    .expect("coin received");
    assert_eq!(received, DeviceEvent::CoinReceived { amount: 20 });
    assert_eq!(handle.inventory().snapshot().coins.get(&20), Some(&1));

    assert!(handle.dispense_change(20));

    let dispensed = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CoinDispensed { .. })
    })
    .expect("coin dispensed");
    assert_eq!(dispensed, DeviceEvent::CoinDispensed { amount: 20 });

    // Tube count back where it started.
    assert!(handle.inventory().snapshot().coins.is_empty());
    assert!(sent.lock().iter().any(|line| line == "R,0D,11"));
}

#[test]
fn insufficient_change_sends_no_payout_commands() {
    let _lock = common::init().expect("test lock");

    // One 50 in the tubes; 70 cannot be made.
    let (link, sent) = MockLink::new(vec![("R,09", COIN_SETUP), ("R,0A", "p,0000000001")]);
    let handle = DeviceHandle::with_link(Box::new(link), test_config());
    let _guard = StopGuard(handle.clone());

    let mut events = handle.subscribe();
    handle.start().expect("device starts");

    assert!(!handle.dispense_change(70));

    let error = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::Error { .. })
    })
    .expect("shortfall error");
    match error {
        DeviceEvent::Error { message } => assert!(message.contains("insufficient change")),
        _ => unreachable!(),
    }

    assert!(!sent.lock().iter().any(|line| line.starts_with("R,0D")));
}

#[test]
fn cashless_vend_approved() {
    let _lock = common::init().expect("test lock");

    let (link, sent) = MockLink::new(vec![
        ("C,64,02", "p,ACK"),
        ("C,62", "d,STATUS,RESET"),
        ("C,61", "p,0103097800000205"),
        ("C,63,00,64", "p,ACK"),
        ("C,62", "p,01"),
    ]);
    let handle = DeviceHandle::with_link(Box::new(link), test_config());

    let mut events = handle.subscribe();

    assert!(handle.start_cashless_payment(10000));

    let started = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CashlessSessionStarted { .. })
    })
    .expect("session started");
    assert_eq!(started, DeviceEvent::CashlessSessionStarted { amount: 10000 });

    let approved = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CashlessVendApproved { .. })
    })
    .expect("vend approved");
    assert_eq!(approved, DeviceEvent::CashlessVendApproved { amount: 10000 });

    // Amount scaled by the discovered 2 decimals: 10000 -> 100 (0x64).
    let sent = sent.lock();
    assert!(sent.iter().any(|line| line == "C,63,00,64"));
    assert!(sent.iter().any(|line| line.starts_with("R,65,")));
}

#[test]
fn cashless_vend_denied() {
    let _lock = common::init().expect("test lock");

    let (link, _sent) = MockLink::new(vec![
        ("C,64,02", "p,ACK"),
        ("C,62", "d,STATUS,RESET"),
        ("C,61", "p,0103097800000205"),
        ("C,63,00,64", "p,ACK"),
        ("C,62", "p,02"),
    ]);
    let handle = DeviceHandle::with_link(Box::new(link), test_config());

    let mut events = handle.subscribe();

    assert!(!handle.start_cashless_payment(10000));

    let denied = wait_for(&mut events, Duration::from_secs(3), |event| {
        matches!(event, DeviceEvent::CashlessVendDenied { .. })
    })
    .expect("vend denied");
    assert_eq!(denied, DeviceEvent::CashlessVendDenied { amount: 10000 });
}

#[test]
fn cashless_sessions_are_single_flight() {
    let _lock = common::init().expect("test lock");

    // The reader never reports its reset, so the first session spends
    // the full reset deadline inside the state machine.
    let (link, sent) = MockLink::new(vec![("C,64,02", "p,ACK")]);
    let handle = DeviceHandle::with_link(Box::new(link), test_config());

    let first = {
        let handle = handle.clone();
        thread::spawn(move || handle.start_cashless_payment(1000))
    };

    thread::sleep(Duration::from_millis(500));

    // Second session fails fast, without touching the link.
    assert!(!handle.start_cashless_payment(2000));

    assert!(!first.join().expect("first session thread"));
    // Only the first session ever enabled the reader.
    assert_eq!(
        sent.lock().iter().filter(|line| *line == "C,64,02").count(),
        1
    );
}

#[test]
fn escrow_decisions_without_a_ticket_are_noops() {
    let _lock = common::init().expect("test lock");

    let (link, sent) = MockLink::new(Vec::new());
    let handle = DeviceHandle::with_link(Box::new(link), test_config());

    let mut events = handle.subscribe();

    handle.accept();
    handle.reject();

    assert!(events.pop_event().is_err());
    assert!(sent.lock().is_empty());
}
