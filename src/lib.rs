//! Server for a vending-machine cash peripheral stack — banknote
//! validator, coin acceptor/dispenser, and an optional cashless reader —
//! driven over a serial link speaking an ASCII framing of the MDB
//! protocol.
//!
//! The [DeviceHandle] owns the link, polls the peripherals in the
//! background, mediates banknote escrow decisions, dispenses change
//! against the coin-tube inventory, and drives cashless vend sessions.
//! Everything the device does is narrated on a broadcast
//! [DeviceEvent](event::DeviceEvent) stream.

pub mod change;
pub mod device_handle;
pub mod error;
pub mod event;
pub mod inventory;
pub mod link;
#[macro_use]
mod macros;
pub mod protocol;

pub use device_handle::{Config, DeviceHandle};
pub use error::{Error, Result};
pub use event::{DeviceEvent, EventReceiver, PaymentType};
pub use inventory::{InventorySnapshot, InventoryStore};
pub use link::{Link, SerialLink};
