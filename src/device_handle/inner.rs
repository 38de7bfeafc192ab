//! Poll-response dispatch: the banknote escrow state machine and the coin
//! routing handler.

use std::time;

use crate::event::DeviceEvent;
use crate::protocol::{self, CoinRoute};
use crate::Result;

use super::{Shared, ESCROW_DECISION_MS};

impl Shared {
    /// Handles one banknote poll response.
    ///
    /// A valid escrow frame opens a ticket, surfaces
    /// [CashEscrowRequested](DeviceEvent::CashEscrowRequested), and waits
    /// for the accept/return decision (or its deadline) before answering
    /// the validator with the stack/return command.
    pub(crate) fn dispatch_bill_line(&self, line: &str) -> Result<()> {
        let Some(amount) = protocol::parse_bill(line, &self.bill_table) else {
            return Ok(());
        };

        if !self.escrow.open(amount) {
            // A ticket is already open; the new bill goes straight back.
            log::warn!("Escrow frame for {amount} while a decision is pending, returning bill");
            self.exchange(&protocol::escrow_command(false))?;
            return Ok(());
        }

        self.bus
            .broadcast(DeviceEvent::CashEscrowRequested { amount });

        let accepted = match self
            .escrow
            .wait_decision(time::Duration::from_millis(ESCROW_DECISION_MS))
        {
            Some(decision) => decision,
            None => {
                self.error_event(format!("escrow timeout for {amount}, returning bill"));
                false
            }
        };

        self.exchange(&protocol::escrow_command(accepted))?;

        if accepted {
            self.inventory.register_banknote_accepted(amount);
        }

        self.bus
            .broadcast(DeviceEvent::CashProcessed { amount, accepted });

        Ok(())
    }

    /// Handles every coin frame contained in one poll response.
    ///
    /// Tube and cashbox routes credit the customer and the inventory;
    /// dispensed frames decrement the tube count and resolve the matching
    /// payout waiter. Frames with unknown type indices are dropped.
    pub(crate) fn dispatch_coin_line(&self, line: &str) {
        for frame in protocol::parse_coin_stream(line) {
            let denomination = self.coin_types.lock().denomination(frame.coin_type);
            let Some(amount) = denomination else {
                log::warn!(
                    "Dropping coin frame with unknown type index {}",
                    frame.coin_type
                );
                continue;
            };

            match frame.route {
                CoinRoute::ToTube => {
                    self.inventory.register_coin_accepted(amount);
                    self.bus.broadcast(DeviceEvent::CoinReceived { amount });
                }
                CoinRoute::ToCashbox => {
                    self.inventory.register_coin_to_cashbox_accepted(amount);
                    self.bus.broadcast(DeviceEvent::CoinToCashbox { amount });
                }
                CoinRoute::Dispensed => {
                    self.inventory.register_coin_dispensed(amount);
                    self.bus.broadcast(DeviceEvent::CoinDispensed { amount });
                    self.waiters.resolve(amount);
                }
            }
        }
    }
}
