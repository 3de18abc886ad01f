//! Asynchronous event codes and event-line parsing
//!
//! The module signals pending events by asserting a level on its event pin;
//! the engine retrieves them one at a time with the event-check command. The
//! response message is `<code> <parameter> <detail...>`.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Asynchronous events the module can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCode {
    /// A message was received on a subscribed topic.
    Msg,
    /// The module finished (re)booting.
    Startup,
    /// Connection to the endpoint was lost.
    Conlost,
    /// The receive event queue overflowed and events were lost.
    Overrun,
    /// A firmware update cycle completed.
    Ota,
    /// Connection to the endpoint was established.
    Connect,
    /// The module entered configuration mode.
    Confmode,
    /// A topic subscription was accepted.
    Suback,
    /// A topic subscription was rejected.
    Subnack,
    /// A publish was accepted.
    Puback,
    /// Shadow initialization completed.
    ShadowInit,
    /// Shadow initialization failed.
    ShadowInitFailed,
    /// A shadow document was received.
    ShadowDoc,
    /// A shadow update result arrived.
    ShadowUpdate,
    /// A shadow delta update arrived.
    ShadowDelta,
    /// A shadow delete result arrived.
    ShadowDelete,
    /// A shadow subscription was accepted.
    ShadowSuback,
    /// A shadow subscription was rejected.
    ShadowSubnack,
    /// A BLE connection was established.
    BleConnected,
    /// BLE discovery completed.
    BleDiscoverComplete,
    /// A BLE connection was lost.
    BleConnectionLost,
    /// A BLE subscription was accepted.
    BleSuback,
    /// A BLE subscription was rejected.
    BleSubnack,
    /// A BLE publish was accepted.
    BlePuback,
    /// BLE data was received.
    BleData,
    /// A BLE error occurred.
    BleError,
}

impl EventCode {
    /// Numeric code carried on the wire.
    pub fn code(self) -> u32 {
        match self {
            EventCode::Msg => 1,
            EventCode::Startup => 2,
            EventCode::Conlost => 3,
            EventCode::Overrun => 4,
            EventCode::Ota => 5,
            EventCode::Connect => 6,
            EventCode::Confmode => 7,
            EventCode::Suback => 8,
            EventCode::Subnack => 9,
            EventCode::Puback => 10,
            EventCode::ShadowInit => 20,
            EventCode::ShadowInitFailed => 21,
            EventCode::ShadowDoc => 22,
            EventCode::ShadowUpdate => 23,
            EventCode::ShadowDelta => 24,
            EventCode::ShadowDelete => 25,
            EventCode::ShadowSuback => 26,
            EventCode::ShadowSubnack => 27,
            EventCode::BleConnected => 40,
            EventCode::BleDiscoverComplete => 41,
            EventCode::BleConnectionLost => 42,
            EventCode::BleSuback => 43,
            EventCode::BleSubnack => 44,
            EventCode::BlePuback => 45,
            EventCode::BleData => 46,
            EventCode::BleError => 47,
        }
    }

    /// Reverse mapping from the wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => EventCode::Msg,
            2 => EventCode::Startup,
            3 => EventCode::Conlost,
            4 => EventCode::Overrun,
            5 => EventCode::Ota,
            6 => EventCode::Connect,
            7 => EventCode::Confmode,
            8 => EventCode::Suback,
            9 => EventCode::Subnack,
            10 => EventCode::Puback,
            20 => EventCode::ShadowInit,
            21 => EventCode::ShadowInitFailed,
            22 => EventCode::ShadowDoc,
            23 => EventCode::ShadowUpdate,
            24 => EventCode::ShadowDelta,
            25 => EventCode::ShadowDelete,
            26 => EventCode::ShadowSuback,
            27 => EventCode::ShadowSubnack,
            40 => EventCode::BleConnected,
            41 => EventCode::BleDiscoverComplete,
            42 => EventCode::BleConnectionLost,
            43 => EventCode::BleSuback,
            44 => EventCode::BleSubnack,
            45 => EventCode::BlePuback,
            46 => EventCode::BleData,
            47 => EventCode::BleError,
            _ => return None,
        })
    }
}

/// One parsed event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLine {
    /// The event kind.
    pub code: EventCode,
    /// Event-specific numeric parameter (topic index, error code, ...).
    pub parameter: i64,
    /// Remaining free-form text, possibly empty.
    pub detail: String,
}

impl EventLine {
    /// Parse the message part of an event-check response
    /// (`<code> <parameter> <detail...>`). `None` when the message is empty
    /// (no event pending) or malformed.
    pub fn parse(message: &str) -> Option<Self> {
        let message = message.trim_start();
        if message.is_empty() {
            return None;
        }
        let mut parts = message.splitn(3, ' ');
        let code_text = parts.next()?;
        let code = match code_text.parse::<u32>().ok().and_then(EventCode::from_code) {
            Some(code) => code,
            None => {
                debug!(message, "unrecognized event line");
                return None;
            }
        };
        let parameter = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let detail = parts.next().unwrap_or("").to_string();
        Some(Self {
            code,
            parameter,
            detail,
        })
    }
}
