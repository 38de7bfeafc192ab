//! The peripheral controller: lifecycle, serialized I/O, polling, escrow
//! decisions, coin payout, and the cashless session state machine.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::change::plan_change;
use crate::event::{DeviceEvent, EventBus, EventReceiver};
use crate::inventory::InventoryStore;
use crate::link::{Link, SerialLink};
use crate::protocol::{self, cmd, CashlessPoll, CoinTypeTable};
use crate::{continue_on_err, Error, Result};

mod inner;

/// Timeout for waiting for a lock on the serial link (milliseconds).
pub const LOCK_TIMEOUT_MS: u64 = 5_000;
/// Polling interval between device polls (milliseconds).
pub const POLL_INTERVAL_MS: u64 = 200;
/// Interval between payout confirmation polls (milliseconds).
pub const PAYOUT_POLL_MS: u64 = 80;
/// Deadline for an escrow accept/return decision (milliseconds).
pub const ESCROW_DECISION_MS: u64 = 5_000;
/// Deadline for a single coin dispense confirmation (milliseconds).
pub const DISPENSE_TIMEOUT_MS: u64 = 5_000;
/// Interval between cashless reset polls (milliseconds).
const CASHLESS_RESET_POLL_MS: u64 = 100;
/// Deadline for the cashless reader reset (milliseconds).
pub const CASHLESS_RESET_TIMEOUT_MS: u64 = 5_000;
/// Interval between cashless approval polls (milliseconds).
const CASHLESS_APPROVAL_POLL_MS: u64 = 200;
/// Deadline for cashless vend approval (milliseconds).
pub const CASHLESS_APPROVAL_TIMEOUT_MS: u64 = 30_000;
/// Settle delay after enabling the cashless reader (milliseconds).
const CASHLESS_ENABLE_SETTLE_MS: u64 = 300;
/// Attempts for the cashless enable handshake.
const CASHLESS_ENABLE_RETRIES: usize = 5;
/// Default serial connection BAUD rate (bps).
pub const BAUD_RATE: u32 = 115_200;

static POLLING_INIT: AtomicBool = AtomicBool::new(false);
static RUNNING: AtomicBool = AtomicBool::new(false);

static PAYOUT_BUSY: AtomicBool = AtomicBool::new(false);
static CASHLESS_BUSY: AtomicBool = AtomicBool::new(false);

static VERBOSE: AtomicBool = AtomicBool::new(false);

// Whether the polling routine has started.
fn polling_inited() -> bool {
    POLLING_INIT.load(Ordering::Relaxed)
}

// Sets the flag indicating whether the polling routine started.
fn set_polling_inited(inited: bool) {
    POLLING_INIT.store(inited, Ordering::SeqCst);
}

fn running() -> bool {
    RUNNING.load(Ordering::Relaxed)
}

fn set_running(run: bool) {
    RUNNING.store(run, Ordering::SeqCst);
}

pub(crate) fn payout_busy() -> bool {
    PAYOUT_BUSY.load(Ordering::Relaxed)
}

fn set_payout_busy(busy: bool) {
    PAYOUT_BUSY.store(busy, Ordering::SeqCst);
}

pub(crate) fn cashless_busy() -> bool {
    CASHLESS_BUSY.load(Ordering::Relaxed)
}

fn set_cashless_busy(busy: bool) {
    CASHLESS_BUSY.store(busy, Ordering::SeqCst);
}

pub(crate) fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Controller configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Banknote denominations by validator channel index, minor units.
    pub bill_denominations: Vec<u32>,
    /// Where the inventory document is persisted. `None` keeps it in
    /// memory only.
    pub inventory_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let inventory_path = std::env::var("MDB_INVENTORY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("inventory.json"));

        Self {
            bill_denominations: vec![1000, 2000, 5000, 10000, 20000, 50000],
            inventory_path: Some(inventory_path),
        }
    }
}

// The banknote held in escrow, if any, and the decision lodged for it.
struct EscrowState {
    ticket: Option<EscrowTicket>,
}

struct EscrowTicket {
    amount: u32,
    decision: Option<bool>,
}

/// One-shot decision slot for the bill in escrow.
///
/// At most one ticket is open at a time. Writers perform a non-blocking
/// set that is a no-op once the ticket is resolved or absent.
pub(crate) struct EscrowSlot {
    state: Mutex<EscrowState>,
    decided: Condvar,
}

impl EscrowSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(EscrowState { ticket: None }),
            decided: Condvar::new(),
        }
    }

    /// Opens a ticket for `amount`; fails when one is already open.
    pub(crate) fn open(&self, amount: u32) -> bool {
        let mut state = self.state.lock();
        if state.ticket.is_some() {
            return false;
        }
        state.ticket = Some(EscrowTicket {
            amount,
            decision: None,
        });
        true
    }

    /// Lodges a decision for the open ticket. No-op without one.
    pub(crate) fn resolve(&self, accept: bool) -> bool {
        let mut state = self.state.lock();
        match state.ticket.as_mut() {
            Some(ticket) if ticket.decision.is_none() => {
                ticket.decision = Some(accept);
                self.decided.notify_all();
                true
            }
            _ => false,
        }
    }

    /// Waits for a decision and closes the ticket.
    ///
    /// Returns `None` when the deadline elapses first.
    pub(crate) fn wait_decision(&self, timeout: time::Duration) -> Option<bool> {
        let deadline = time::Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            match state.ticket.as_ref() {
                Some(ticket) => {
                    if let Some(decision) = ticket.decision {
                        state.ticket = None;
                        return Some(decision);
                    }
                }
                None => return None,
            }

            if self.decided.wait_until(&mut state, deadline).timed_out() {
                if let Some(decision) = state.ticket.as_ref().and_then(|t| t.decision) {
                    state.ticket = None;
                    return Some(decision);
                }
                state.ticket = None;
                return None;
            }
        }
    }

    #[cfg(test)]
    fn open_amount(&self) -> Option<u32> {
        self.state.lock().ticket.as_ref().map(|t| t.amount)
    }
}

/// Confirmation slot for one in-flight coin payout.
pub(crate) struct DispenseWaiter {
    resolved: AtomicBool,
}

impl DispenseWaiter {
    pub(crate) fn resolved(&self) -> bool {
        self.resolved.load(Ordering::Relaxed)
    }
}

/// Table of in-flight payout confirmations, at most one per denomination.
pub(crate) struct DispenseWaiters {
    map: Mutex<HashMap<u32, Arc<DispenseWaiter>>>,
}

impl DispenseWaiters {
    fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a waiter; fails when one already exists for the
    /// denomination.
    pub(crate) fn insert(&self, denomination: u32) -> Option<Arc<DispenseWaiter>> {
        let mut map = self.map.lock();
        if map.contains_key(&denomination) {
            return None;
        }
        let waiter = Arc::new(DispenseWaiter {
            resolved: AtomicBool::new(false),
        });
        map.insert(denomination, Arc::clone(&waiter));
        Some(waiter)
    }

    /// Marks the waiter for `denomination` resolved, if one exists.
    pub(crate) fn resolve(&self, denomination: u32) -> bool {
        match self.map.lock().get(&denomination) {
            Some(waiter) => {
                waiter.resolved.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&self, denomination: u32) {
        self.map.lock().remove(&denomination);
    }

    /// Drops every remaining waiter; called when a payout session ends.
    pub(crate) fn clear(&self) {
        self.map.lock().clear();
    }
}

/// State shared between the handle, the polling thread, and in-flight
/// operations.
pub(crate) struct Shared {
    link: Mutex<Box<dyn Link>>,
    pub(crate) inventory: InventoryStore,
    pub(crate) coin_types: Mutex<CoinTypeTable>,
    pub(crate) bill_table: Vec<u32>,
    pub(crate) escrow: EscrowSlot,
    pub(crate) waiters: DispenseWaiters,
    pub(crate) bus: EventBus,
    stop: AtomicBool,
}

impl Shared {
    /// Acquires a lock on the serial link.
    pub(crate) fn lock_link(&self) -> Result<MutexGuard<'_, Box<dyn Link>>> {
        self.link
            .try_lock_for(time::Duration::from_millis(LOCK_TIMEOUT_MS))
            .ok_or(Error::Lock("serial link"))
    }

    /// One complete (write, read) exchange under the link lock.
    pub(crate) fn exchange(&self, command: &str) -> Result<String> {
        let mut link = self.lock_link()?;
        Self::exchange_on(&mut link, command)
    }

    /// One complete (write, read) exchange on an already-locked link.
    pub(crate) fn exchange_on(link: &mut Box<dyn Link>, command: &str) -> Result<String> {
        link.write_line(command)?;
        let line = link.read_line()?;

        if verbose() {
            log::info!("TX {command:?} -> RX {line:?}");
        } else {
            log::trace!("TX {command:?} -> RX {line:?}");
        }

        Ok(line)
    }

    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn check_stop(&self) -> Result<()> {
        if self.stopping() {
            Err(Error::Stopped)
        } else {
            Ok(())
        }
    }

    pub(crate) fn error_event(&self, message: String) {
        log::error!("{message}");
        self.bus.broadcast(DeviceEvent::Error { message });
    }
}

/// Handle for driving the cash peripherals behind an ASCII MDB bridge.
///
/// The handle is cheaply cloneable; clones share the link, inventory, and
/// event stream.
///
/// ```no_run
/// # fn main() -> mdb_server::Result<()> {
/// let handle = mdb_server::DeviceHandle::open("/dev/ttyUSB0")?;
/// handle.start()?;
///
/// let mut events = handle.subscribe();
/// while let Ok(event) = events.pop_event() {
///     log::info!("Device event: {event}");
/// }
///
/// handle.stop();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeviceHandle {
    shared: Arc<Shared>,
}

impl DeviceHandle {
    /// Opens the serial device with the default configuration.
    pub fn open(serial_path: &str) -> Result<Self> {
        Self::with_config(serial_path, Config::default())
    }

    /// Opens the serial device with an explicit configuration.
    pub fn with_config(serial_path: &str, config: Config) -> Result<Self> {
        let link = SerialLink::open(serial_path, BAUD_RATE)?;
        Ok(Self::with_link(Box::new(link), config))
    }

    /// Builds a handle over an arbitrary line channel.
    ///
    /// The serial constructors go through here; tests drive the
    /// controller with scripted links.
    pub fn with_link(link: Box<dyn Link>, config: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                link: Mutex::new(link),
                inventory: InventoryStore::load(config.inventory_path),
                coin_types: Mutex::new(CoinTypeTable::default()),
                bill_table: config.bill_denominations,
                escrow: EscrowSlot::new(),
                waiters: DispenseWaiters::new(),
                bus: EventBus::new(1024),
                stop: AtomicBool::new(false),
            }),
        }
    }

    /// Registers an observer on the device event stream.
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.bus.subscribe()
    }

    /// The persistent cash inventory.
    pub fn inventory(&self) -> &InventoryStore {
        &self.shared.inventory
    }

    /// Whether the polling routine is active.
    pub fn device_running(&self) -> bool {
        running()
    }

    /// Raises per-exchange TX/RX logging to info level.
    pub fn enable_verbose_logging(&self, enabled: bool) {
        VERBOSE.store(enabled, Ordering::SeqCst);
    }

    /// Runs the init sequence and spawns the background polling routine.
    ///
    /// On failure the error is also surfaced on the event stream and the
    /// device stays not-running.
    pub fn start(&self) -> Result<()> {
        if polling_inited() {
            return Err(Error::PollingReinit);
        }

        self.shared.stop.store(false, Ordering::SeqCst);

        if let Err(err) = self.init_device() {
            self.shared
                .error_event(format!("device init failed: {err}"));
            return Err(err);
        }

        // Set the global flag to disallow multiple background polling threads.
        set_polling_inited(true);
        set_running(true);

        let shared = Arc::clone(&self.shared);

        thread::spawn(move || {
            let mut now = time::Instant::now();

            while !shared.stopping() {
                if now.elapsed().as_millis() >= POLL_INTERVAL_MS as u128 {
                    now = time::Instant::now();

                    // Payout and cashless sessions drive their own
                    // exchanges; spontaneous polls would interleave with
                    // their request/response pairs.
                    if !(payout_busy() || cashless_busy()) {
                        let (bill_line, coin_line) = {
                            let mut link = continue_on_err!(
                                shared.lock_link(),
                                "Failed to lock serial link in background polling routine"
                            );
                            let bills = continue_on_err!(
                                Shared::exchange_on(&mut link, cmd::POLL_BILLS),
                                "Failed bill poll in background polling routine"
                            );
                            let coins = continue_on_err!(
                                Shared::exchange_on(&mut link, cmd::POLL_COINS),
                                "Failed coin poll in background polling routine"
                            );
                            (bills, coins)
                        };

                        if let Err(err) = shared.dispatch_bill_line(&bill_line) {
                            shared.error_event(format!("bill handling failed: {err}"));
                        }
                        shared.dispatch_coin_line(&coin_line);
                    }
                }

                thread::sleep(time::Duration::from_millis(POLL_INTERVAL_MS / 4));
            }

            // Now that polling finished, reset the flag to allow another
            // background routine to start.
            set_polling_inited(false);
        });

        Ok(())
    }

    // Device initialisation: master enable, then the banknote and coin
    // sides. Every command gets exactly one response line; only the coin
    // setup response is decoded.
    fn init_device(&self) -> Result<()> {
        let shared = &self.shared;
        let mut link = shared.lock_link()?;

        for command in [
            cmd::MASTER_ENABLE,
            cmd::BILL_RESET,
            cmd::BILL_SETUP,
            cmd::BILL_TYPE_ENABLE,
            "R,35,0",
            cmd::COIN_RESET,
        ] {
            let line = Shared::exchange_on(&mut link, command)?;
            log::debug!("Init {command} -> {line:?}");
        }

        let line = Shared::exchange_on(&mut link, cmd::COIN_SETUP)?;
        match CoinTypeTable::parse(&line) {
            Some(table) if !table.is_empty() => {
                log::debug!("Discovered coin types: {table:?}");
                *shared.coin_types.lock() = table;
            }
            _ => log::warn!("Coin setup response yielded no coin types: {line:?}"),
        }

        let line = Shared::exchange_on(&mut link, cmd::COIN_TYPE_ENABLE)?;
        log::debug!("Init {} -> {line:?}", cmd::COIN_TYPE_ENABLE);

        drop(link);

        shared.bus.broadcast(DeviceEvent::Initialized);

        Ok(())
    }

    /// Stops the polling routine, sends a best-effort master disable, and
    /// closes the link.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);

        // Let the polling thread reach its next suspension point.
        let deadline = time::Instant::now() + time::Duration::from_secs(2);
        while polling_inited() && time::Instant::now() < deadline {
            thread::sleep(time::Duration::from_millis(20));
        }

        if let Some(mut link) = self
            .shared
            .link
            .try_lock_for(time::Duration::from_millis(LOCK_TIMEOUT_MS))
        {
            if let Err(err) = Shared::exchange_on(&mut link, cmd::MASTER_DISABLE) {
                log::warn!("Master disable on stop failed: {err}");
            }
            link.close();
        }

        set_running(false);
    }

    /// Accepts the banknote currently in escrow. No-op without one.
    pub fn accept(&self) {
        if !self.shared.escrow.resolve(true) {
            log::debug!("Accept with no open escrow decision");
        }
    }

    /// Returns the banknote currently in escrow. No-op without one.
    pub fn reject(&self) {
        if !self.shared.escrow.resolve(false) {
            log::debug!("Reject with no open escrow decision");
        }
    }

    /// Fetches and decodes the live tube status.
    pub fn show_tube_status(&self) -> Result<BTreeMap<u32, u8>> {
        let line = self.shared.exchange(cmd::TUBE_STATUS)?;
        let types = self.shared.coin_types.lock().clone();

        let tubes = protocol::parse_tube_status(&line, &types)
            .ok_or_else(|| Error::Protocol(format!("unparseable tube status: {line:?}")))?;

        let total: u64 = tubes
            .iter()
            .map(|(denomination, count)| *denomination as u64 * *count as u64)
            .sum();
        log::info!("Tube status: {tubes:?}, total value {total}");

        Ok(tubes)
    }

    /// Dispenses `amount` minor units in coins.
    ///
    /// Plans greedily against the live tube status, then pays out coin by
    /// coin, each confirmed by a dispensed frame within its deadline.
    /// Returns `true` only when every coin was confirmed.
    pub fn dispense_change(&self, amount: u32) -> bool {
        if amount == 0 {
            return true;
        }

        if PAYOUT_BUSY
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("Payout already in progress, rejecting dispense of {amount}");
            return false;
        }

        let dispensed = self.dispense_change_inner(amount);

        // Resolve leftovers as failed before handing the link back to the
        // poller.
        self.shared.waiters.clear();
        set_payout_busy(false);

        dispensed
    }

    fn dispense_change_inner(&self, amount: u32) -> bool {
        let shared = &self.shared;

        let line = match shared.exchange(cmd::TUBE_STATUS) {
            Ok(line) => line,
            Err(err) => {
                shared.error_event(format!("tube status failed before payout: {err}"));
                return false;
            }
        };

        let types = shared.coin_types.lock().clone();
        let Some(tubes) = protocol::parse_tube_status(&line, &types) else {
            shared.error_event(format!("tube status unavailable before payout: {line:?}"));
            return false;
        };

        let Some(plan) = plan_change(amount, &tubes) else {
            shared.error_event(format!(
                "insufficient change for {amount}, tubes hold {tubes:?}"
            ));
            return false;
        };

        log::debug!("Change plan for {amount}: {plan:?}");

        for (denomination, count) in plan {
            for _ in 0..count {
                if shared.stopping() {
                    shared.error_event(format!("payout of {amount} aborted by shutdown"));
                    return false;
                }
                if !self.dispense_one(denomination, &types) {
                    return false;
                }
            }
        }

        true
    }

    // Pays out a single coin and actively polls for its dispensed frame.
    fn dispense_one(&self, denomination: u32, types: &CoinTypeTable) -> bool {
        let shared = &self.shared;

        let Some(type_index) = types.type_index(denomination) else {
            shared.error_event(format!("no coin type for denomination {denomination}"));
            return false;
        };

        let Some(waiter) = shared.waiters.insert(denomination) else {
            log::warn!("Dispense of {denomination} already in flight");
            return false;
        };

        let line = match shared.exchange(&protocol::payout_command(type_index)) {
            Ok(line) => line,
            Err(err) => {
                shared.waiters.remove(denomination);
                shared.error_event(format!("payout command for {denomination} failed: {err}"));
                return false;
            }
        };

        if !protocol::is_ack(&line) {
            shared.waiters.remove(denomination);
            shared.error_event(format!("payout of {denomination} refused: {line:?}"));
            return false;
        }

        let deadline = time::Instant::now() + time::Duration::from_millis(DISPENSE_TIMEOUT_MS);

        while !waiter.resolved() {
            if time::Instant::now() >= deadline || shared.stopping() {
                shared.waiters.remove(denomination);
                shared.error_event(format!("dispense confirmation timeout for {denomination}"));
                return false;
            }

            thread::sleep(time::Duration::from_millis(PAYOUT_POLL_MS));

            match shared.exchange(cmd::POLL_COINS) {
                Ok(line) => shared.dispatch_coin_line(&line),
                Err(err) => log::warn!("Payout confirmation poll failed: {err}"),
            }
        }

        shared.waiters.remove(denomination);
        true
    }

    /// Runs a cashless vend session for `amount` minor units.
    ///
    /// Single-flight: returns `false` immediately when a session is
    /// already active, without touching the link. Returns `true` only on
    /// an approved vend.
    pub fn start_cashless_payment(&self, amount: u32) -> bool {
        if CASHLESS_BUSY
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("Cashless session already active, rejecting vend of {amount}");
            return false;
        }

        let approved = match self.cashless_session(amount) {
            Ok(approved) => approved,
            Err(err) => {
                self.shared
                    .error_event(format!("cashless session for {amount} failed: {err}"));
                false
            }
        };

        set_cashless_busy(false);

        approved
    }

    fn cashless_session(&self, amount: u32) -> Result<bool> {
        let shared = &self.shared;

        // Enable the reader; a silent reader gets a few more chances.
        let mut enabled = false;
        for attempt in 1..=CASHLESS_ENABLE_RETRIES {
            let line = shared.exchange(cmd::CASHLESS_ENABLE)?;
            if protocol::is_ack(&line) {
                enabled = true;
                break;
            }
            log::debug!("Cashless enable attempt {attempt} answered {line:?}");
        }
        if !enabled {
            return Err(Error::DeviceRefused("cashless ENABLE no ACK".into()));
        }

        thread::sleep(time::Duration::from_millis(CASHLESS_ENABLE_SETTLE_MS));
        shared.check_stop()?;

        // Reset, then poll until the reader reports it.
        let line = shared.exchange(cmd::CASHLESS_RESET)?;
        log::trace!("Cashless reset answered {line:?}");

        let deadline =
            time::Instant::now() + time::Duration::from_millis(CASHLESS_RESET_TIMEOUT_MS);
        loop {
            shared.check_stop()?;
            if time::Instant::now() >= deadline {
                return Err(Error::Timeout("cashless reset".into()));
            }

            let line = shared.exchange(cmd::CASHLESS_POLL)?;
            if line.trim().starts_with("d,STATUS,RESET") {
                break;
            }

            thread::sleep(time::Duration::from_millis(CASHLESS_RESET_POLL_MS));
        }

        // Setup: the reader answers with its config block, possibly after
        // an ACK or an empty line.
        let decimal_places = {
            let mut link = shared.lock_link()?;
            link.write_line(cmd::CASHLESS_SETUP)?;

            let mut setup_line = String::new();
            for _ in 0..3 {
                let line = link.read_line()?;
                if !line.is_empty() && !protocol::is_ack(&line) {
                    setup_line = line;
                    break;
                }
            }
            drop(link);

            match protocol::parse_setup(&setup_line) {
                Some(info) => info.decimal_places,
                None => {
                    log::warn!(
                        "Cashless setup response unparseable: {setup_line:?}, assuming 2 decimals"
                    );
                    2
                }
            }
        };

        // Best-effort display prompt; a reader without a display stays
        // silent.
        let line = shared.exchange(&protocol::display_text_command("PLEASE PRESENT CARD"))?;
        if !protocol::is_ack(&line) {
            log::debug!("Display text not acknowledged: {line:?}");
        }

        // Readers report 0-2 decimals in practice; clamp so a bogus setup
        // byte cannot overflow the scale.
        let scaled = amount / 10u32.pow(decimal_places.min(6) as u32);
        let scaled = u16::try_from(scaled)
            .map_err(|_| Error::Protocol(format!("vend amount {amount} out of range")))?;

        let line = shared.exchange(&protocol::vend_request_command(scaled))?;
        if !protocol::is_ack(&line) {
            return Err(Error::DeviceRefused("cashless VEND REQUEST no ACK".into()));
        }

        shared
            .bus
            .broadcast(DeviceEvent::CashlessSessionStarted { amount });

        let deadline =
            time::Instant::now() + time::Duration::from_millis(CASHLESS_APPROVAL_TIMEOUT_MS);
        loop {
            shared.check_stop()?;
            if time::Instant::now() >= deadline {
                shared.error_event(format!("cashless approval timeout for {amount}"));
                return Ok(false);
            }

            let line = shared.exchange(cmd::CASHLESS_POLL)?;
            match protocol::parse_cashless_poll(&line) {
                CashlessPoll::Approved => {
                    shared
                        .bus
                        .broadcast(DeviceEvent::CashlessVendApproved { amount });
                    return Ok(true);
                }
                CashlessPoll::Denied => {
                    shared
                        .bus
                        .broadcast(DeviceEvent::CashlessVendDenied { amount });
                    return Ok(false);
                }
                CashlessPoll::Pending => {}
            }

            thread::sleep(time::Duration::from_millis(CASHLESS_APPROVAL_POLL_MS));
        }
    }
}
