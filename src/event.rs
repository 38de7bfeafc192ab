//! Outbound device events and the broadcast channel that carries them.

use std::fmt;
use std::time;

use parking_lot::Mutex;
use serde::Serialize;

use crate::{Error, Result};

/// Timeout for retrieving an event from a queue (milliseconds).
pub const QUEUE_TIMEOUT_MS: u128 = 50;

/// Which payment instrument an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PaymentType {
    Cash,
    Cashless,
}

/// Which physical store a coin event touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CashHolder {
    Tube,
    Cashbox,
}

/// Events published by the peripheral controller.
///
/// Amounts are minor currency units. The stream is the authoritative
/// narrative of what the device did; inventory updates are committed
/// before the corresponding event is published.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum DeviceEvent {
    /// Init sequence completed and polling is about to begin.
    Initialized,
    /// A banknote is held in escrow awaiting an accept/return decision.
    CashEscrowRequested { amount: u32 },
    /// The escrow decision was carried out.
    CashProcessed { amount: u32, accepted: bool },
    /// A coin was accepted into a payout tube.
    ///
    /// Older front-ends used the kind name `CoinProcessed` for this event.
    CoinReceived { amount: u32 },
    /// A coin was paid out of a tube.
    CoinDispensed { amount: u32 },
    /// A coin was accepted but routed to the non-refundable cashbox.
    CoinToCashbox { amount: u32 },
    /// The cashless reader accepted a vend request.
    CashlessSessionStarted { amount: u32 },
    CashlessVendApproved { amount: u32 },
    CashlessVendDenied { amount: u32 },
    /// A recoverable failure worth surfacing to the operator.
    Error { message: String },
}

impl DeviceEvent {
    /// Stable kind tag, matching the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::CashEscrowRequested { .. } => "CashEscrowRequested",
            Self::CashProcessed { .. } => "CashProcessed",
            Self::CoinReceived { .. } => "CoinReceived",
            Self::CoinDispensed { .. } => "CoinDispensed",
            Self::CoinToCashbox { .. } => "CoinToCashbox",
            Self::CashlessSessionStarted { .. } => "CashlessSessionStarted",
            Self::CashlessVendApproved { .. } => "CashlessVendApproved",
            Self::CashlessVendDenied { .. } => "CashlessVendDenied",
            Self::Error { .. } => "Error",
        }
    }

    /// Payment instrument of the event, when one applies.
    pub fn payment_type(&self) -> Option<PaymentType> {
        match self {
            Self::CashEscrowRequested { .. }
            | Self::CashProcessed { .. }
            | Self::CoinReceived { .. }
            | Self::CoinDispensed { .. }
            | Self::CoinToCashbox { .. } => Some(PaymentType::Cash),
            Self::CashlessSessionStarted { .. }
            | Self::CashlessVendApproved { .. }
            | Self::CashlessVendDenied { .. } => Some(PaymentType::Cashless),
            Self::Initialized | Self::Error { .. } => None,
        }
    }

    /// Amount in minor units, when the event carries one.
    pub fn amount(&self) -> Option<u32> {
        match self {
            Self::CashEscrowRequested { amount }
            | Self::CashProcessed { amount, .. }
            | Self::CoinReceived { amount }
            | Self::CoinDispensed { amount }
            | Self::CoinToCashbox { amount }
            | Self::CashlessSessionStarted { amount }
            | Self::CashlessVendApproved { amount }
            | Self::CashlessVendDenied { amount } => Some(*amount),
            Self::Initialized | Self::Error { .. } => None,
        }
    }

    /// Cash store a coin event touched.
    pub fn target_cash_holder(&self) -> Option<CashHolder> {
        match self {
            Self::CoinReceived { .. } | Self::CoinDispensed { .. } => Some(CashHolder::Tube),
            Self::CoinToCashbox { .. } => Some(CashHolder::Cashbox),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "Initialized"),
            Self::CashEscrowRequested { amount } => write!(f, "CashEscrowRequested({amount})"),
            Self::CashProcessed { amount, accepted } => {
                write!(f, "CashProcessed({amount}, accepted: {accepted})")
            }
            Self::CoinReceived { amount } => write!(f, "CoinReceived({amount})"),
            Self::CoinDispensed { amount } => write!(f, "CoinDispensed({amount})"),
            Self::CoinToCashbox { amount } => write!(f, "CoinToCashbox({amount})"),
            Self::CashlessSessionStarted { amount } => {
                write!(f, "CashlessSessionStarted({amount})")
            }
            Self::CashlessVendApproved { amount } => write!(f, "CashlessVendApproved({amount})"),
            Self::CashlessVendDenied { amount } => write!(f, "CashlessVendDenied({amount})"),
            Self::Error { message } => write!(f, "Error({message})"),
        }
    }
}

/// One-producer / many-observer broadcast channel for [DeviceEvent]s.
///
/// Observers that fall behind lose events rather than stalling the
/// controller.
pub struct EventBus {
    inner: Mutex<bus::Bus<DeviceEvent>>,
}

impl EventBus {
    /// Creates a bus with room for `capacity` undelivered events per
    /// observer.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(bus::Bus::new(capacity)),
        }
    }

    /// Registers a new observer.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver(self.inner.lock().add_rx())
    }

    /// Publishes an event to all observers.
    pub fn broadcast(&self, event: DeviceEvent) {
        log::debug!("Broadcasting event: {event}");

        if let Err(event) = self.inner.lock().try_broadcast(event) {
            log::warn!("Event queue full, dropping event: {event}");
        }
    }
}

/// Receiver end of the device event stream.
///
/// Example:
///
/// ```rust, no_run
/// # fn main() -> mdb_server::Result<()> {
/// let handle = mdb_server::DeviceHandle::open("/dev/ttyUSB0")?;
/// let mut rx = handle.subscribe();
///
/// loop {
///     while let Ok(event) = rx.pop_event() {
///         log::debug!("Received an event: {event}");
///         // do stuff in response to the event...
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct EventReceiver(pub bus::BusReader<DeviceEvent>);

impl EventReceiver {
    /// Attempt to pop an event from the queue.
    ///
    /// Returns `Err(_)` if an event could not be retrieved before the
    /// timeout.
    pub fn pop_event(&mut self) -> Result<DeviceEvent> {
        let now = time::Instant::now();

        while now.elapsed().as_millis() < QUEUE_TIMEOUT_MS {
            if let Ok(event) = self.0.try_recv() {
                return Ok(event);
            }
        }

        Err(Error::Timeout("waiting for device event".into()))
    }
}
