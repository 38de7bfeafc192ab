//! Pure decoders and command formatting for the ASCII framing of the MDB
//! bridge.
//!
//! Response lines begin with a one-character class: `p,` polled data,
//! `d,` diagnostic text, `c,` command echo. Payloads are ASCII hex. The
//! decoders here are stateless; anything they cannot act on is logged and
//! dropped rather than surfaced as a failure.

use std::collections::BTreeMap;

/// Generic acknowledgement line.
pub const ACK: &str = "p,ACK";

/// Number of coin type slots a coin acceptor reports.
pub const COIN_TYPE_SLOTS: usize = 16;

/// Routing nibble of a banknote moved into escrow.
const BILL_ROUTE_ESCROW: u8 = 0x9;

/// Command grammar issued by this server.
pub mod cmd {
    pub const MASTER_ENABLE: &str = "M,1";
    pub const MASTER_DISABLE: &str = "M,0";

    pub const BILL_RESET: &str = "R,30";
    pub const BILL_SETUP: &str = "R,31";
    pub const BILL_TYPE_ENABLE: &str = "R,34,FFFFFFFF";
    pub const POLL_BILLS: &str = "R,33";

    pub const COIN_RESET: &str = "R,08";
    pub const COIN_SETUP: &str = "R,09";
    pub const COIN_TYPE_ENABLE: &str = "R,0C,FFFFFFFF";
    pub const POLL_COINS: &str = "R,0B";
    pub const TUBE_STATUS: &str = "R,0A";

    pub const CASHLESS_RESET: &str = "C,60";
    pub const CASHLESS_SETUP: &str = "C,61";
    pub const CASHLESS_POLL: &str = "C,62";
    pub const CASHLESS_ENABLE: &str = "C,64,02";
}

/// Where the acceptor routed a polled coin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoinRoute {
    /// Non-refundable storage.
    ToCashbox,
    /// Payout tube.
    ToTube,
    /// Confirmation of a previously requested payout.
    Dispensed,
}

/// One decoded 2-byte coin frame from a poll response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoinFrame {
    pub route: CoinRoute,
    pub coin_type: u8,
}

/// Outcome of a cashless `C,62` poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CashlessPoll {
    Approved,
    Denied,
    Pending,
}

/// Decoded cashless setup block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupInfo {
    pub decimal_places: u8,
}

/// Coin-type table discovered from the device's `R,09` response.
///
/// Maps coin type indices 0..=15 to denominations in minor units. Frames
/// referencing an index outside the table must never be credited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinTypeTable {
    pub scaling: u32,
    pub decimal_places: u8,
    denominations: [Option<u32>; COIN_TYPE_SLOTS],
}

impl Default for CoinTypeTable {
    fn default() -> Self {
        Self {
            scaling: 1,
            decimal_places: 2,
            denominations: [None; COIN_TYPE_SLOTS],
        }
    }
}

impl CoinTypeTable {
    /// Builds the table from a coin setup response.
    ///
    /// Layout: scaling factor at byte 3 (zero means unscaled), decimal
    /// places at byte 4, and the per-type credit table in the trailing 16
    /// bytes. Credits of `0x00` and `0xFF` mark absent slots; any other
    /// credit yields `credit * scaling` minor units.
    pub fn parse(line: &str) -> Option<Self> {
        let bytes = poll_payload(line)?;
        if bytes.is_empty() {
            return None;
        }

        let scaling = bytes.get(3).copied().filter(|b| *b != 0).unwrap_or(1) as u32;
        let decimal_places = bytes.get(4).copied().unwrap_or(2);

        let mut denominations = [None; COIN_TYPE_SLOTS];
        if bytes.len() >= COIN_TYPE_SLOTS {
            let credits = &bytes[bytes.len() - COIN_TYPE_SLOTS..];
            for (index, credit) in credits.iter().enumerate() {
                if *credit != 0x00 && *credit != 0xFF {
                    denominations[index] = Some(*credit as u32 * scaling);
                }
            }
        } else {
            log::warn!(
                "Coin setup response too short for a credit table: {} bytes",
                bytes.len()
            );
        }

        Some(Self {
            scaling,
            decimal_places,
            denominations,
        })
    }

    /// Denomination for a coin type index, if the slot is populated.
    pub fn denomination(&self, coin_type: u8) -> Option<u32> {
        self.denominations
            .get(coin_type as usize)
            .copied()
            .flatten()
    }

    /// Coin type index for a denomination, if the device accepts it.
    pub fn type_index(&self, denomination: u32) -> Option<u8> {
        self.denominations
            .iter()
            .position(|d| *d == Some(denomination))
            .map(|index| index as u8)
    }

    /// Whether discovery produced any usable slots.
    pub fn is_empty(&self) -> bool {
        self.denominations.iter().all(Option::is_none)
    }
}

/// Whether the line is the generic acknowledgement.
pub fn is_ack(line: &str) -> bool {
    line.trim() == ACK
}

/// Strips the `p,` class prefix and decodes the remaining hex characters
/// pairwise. Non-hex characters (commas, whitespace) are skipped.
fn poll_payload(line: &str) -> Option<Vec<u8>> {
    let rest = line.trim().strip_prefix("p,")?;

    let digits: Vec<u8> = rest
        .bytes()
        .filter(u8::is_ascii_hexdigit)
        .map(hex_value)
        .collect();

    Some(
        digits
            .chunks_exact(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect(),
    )
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Decodes a banknote poll response into a denomination.
///
/// The single payload byte splits as `route = (b >> 4) & 0xF` and
/// `type = b & 0xF`. Only route 9 (escrow) with a type index inside the
/// bill table yields a denomination; everything else is not applicable.
pub fn parse_bill(line: &str, bill_table: &[u32]) -> Option<u32> {
    let line = line.trim();
    if line.is_empty() || is_ack(line) {
        return None;
    }

    let rest = line.strip_prefix("p,")?;
    let digits: Vec<u8> = rest.bytes().filter(u8::is_ascii_hexdigit).collect();
    if digits.len() != 2 {
        return None;
    }

    let byte = (hex_value(digits[0]) << 4) | hex_value(digits[1]);
    let route = (byte >> 4) & 0xF;
    let type_index = (byte & 0xF) as usize;

    if route == BILL_ROUTE_ESCROW {
        bill_table.get(type_index).copied()
    } else {
        None
    }
}

/// Decodes every coin frame contained in a poll response.
///
/// The payload is scanned as non-overlapping 4-hex-digit windows, each a
/// 2-byte frame: `route = (high >> 4) & 0xF`, `type = high & 0xF`.
/// Routing nibbles: `0x4` to cashbox, `0x5` to tube, `0x9` dispensed.
/// Unknown nibbles are logged and dropped.
pub fn parse_coin_stream(line: &str) -> Vec<CoinFrame> {
    let Some(rest) = line.trim().strip_prefix("p,") else {
        return Vec::new();
    };

    let digits: Vec<u8> = rest
        .bytes()
        .filter(u8::is_ascii_hexdigit)
        .map(hex_value)
        .collect();

    let mut frames = Vec::new();
    for window in digits.chunks_exact(4) {
        let raw = ((window[0] as u16) << 12)
            | ((window[1] as u16) << 8)
            | ((window[2] as u16) << 4)
            | window[3] as u16;
        let high = (raw >> 8) as u8;
        let coin_type = high & 0x0F;

        let route = match (high >> 4) & 0xF {
            0x4 => CoinRoute::ToCashbox,
            0x5 => CoinRoute::ToTube,
            0x9 => CoinRoute::Dispensed,
            nibble => {
                log::warn!("Unknown coin routing nibble {nibble:#x} in frame {raw:04x}");
                continue;
            }
        };

        frames.push(CoinFrame { route, coin_type });
    }

    frames
}

/// Decodes a tube status response into a `denomination -> count` map.
///
/// The first two bytes are the tube fullness bitmap and are skipped; up to
/// 16 per-type count bytes follow. A count of `0xFF` reads as zero, and
/// zero counts produce no entry.
pub fn parse_tube_status(line: &str, types: &CoinTypeTable) -> Option<BTreeMap<u32, u8>> {
    let bytes = poll_payload(line)?;
    if bytes.len() < 3 {
        log::warn!("Tube status response too short: {} bytes", bytes.len());
        return None;
    }

    let mut tubes = BTreeMap::new();
    for (index, count) in bytes[2..].iter().take(COIN_TYPE_SLOTS).enumerate() {
        let count = if *count == 0xFF { 0 } else { *count };
        if count == 0 {
            continue;
        }
        match types.denomination(index as u8) {
            Some(denomination) => {
                tubes.insert(denomination, count);
            }
            None => log::warn!("Tube count reported for unknown coin type {index}"),
        }
    }

    Some(tubes)
}

/// Decodes the cashless setup block; decimal places live at byte 6.
pub fn parse_setup(line: &str) -> Option<SetupInfo> {
    let bytes = poll_payload(line)?;
    let decimal_places = match bytes.get(6) {
        Some(byte) => *byte,
        None => {
            log::warn!("Setup block shorter than 7 bytes, assuming 2 decimal places");
            2
        }
    };

    Some(SetupInfo { decimal_places })
}

/// Decodes a cashless `C,62` poll: `p,01` approved, `p,02` denied,
/// anything else means the reader has not finished yet.
pub fn parse_cashless_poll(line: &str) -> CashlessPoll {
    match poll_payload(line).as_deref() {
        Some([0x01]) => CashlessPoll::Approved,
        Some([0x02]) => CashlessPoll::Denied,
        _ => CashlessPoll::Pending,
    }
}

/// Escrow decision command: stack (`1`) or return (`0`) the held bill.
pub fn escrow_command(stack: bool) -> String {
    format!("R,35,{}", stack as u8)
}

/// Payout command for one coin of the given type index.
pub fn payout_command(type_index: u8) -> String {
    format!("R,0D,{:02X}", 0x10 | (type_index & 0x0F))
}

/// Cashless vend request for an amount already scaled to reader units.
pub fn vend_request_command(scaled_amount: u16) -> String {
    let [hi, lo] = scaled_amount.to_be_bytes();
    format!("C,63,{hi:02X},{lo:02X}")
}

/// Display-text passthrough frame: `0x65, len + 1, 0x06, <utf8>`.
///
/// The text is truncated to 32 bytes on a character boundary.
pub fn display_text_command(text: &str) -> String {
    let mut end = text.len().min(32);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let bytes = &text.as_bytes()[..end];

    let mut command = format!("R,65,{:02X},06", bytes.len() as u8 + 1);
    for byte in bytes {
        command.push_str(&format!(",{byte:02X}"));
    }
    command
}
