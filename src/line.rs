//! Modem control line status and the bit-mapped events delivered to sinks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Snapshot of the input control lines of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineStatus {
    pub cts: bool,
    pub dsr: bool,
    pub dcd: bool,
    pub ri: bool,
}

impl LineStatus {
    /// Encode as the 4-bit event mask.
    pub fn events(self) -> LineEvents {
        let mut bits = 0;
        if self.cts {
            bits |= LineEvents::CTS.0;
        }
        if self.dsr {
            bits |= LineEvents::DSR.0;
        }
        if self.dcd {
            bits |= LineEvents::DCD.0;
        }
        if self.ri {
            bits |= LineEvents::RI.0;
        }
        LineEvents(bits)
    }
}

/// Bit-mapped control line state: CTS = 0x01, DSR = 0x02, DCD = 0x04, RI = 0x08.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineEvents(u8);

impl LineEvents {
    pub const NONE: LineEvents = LineEvents(0);
    pub const CTS: LineEvents = LineEvents(0x01);
    pub const DSR: LineEvents = LineEvents(0x02);
    pub const DCD: LineEvents = LineEvents(0x04);
    pub const RI: LineEvents = LineEvents(0x08);
    pub const ALL: LineEvents = LineEvents(0x0F);

    /// Build from raw bits; bits outside the four lines are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        LineEvents(bits & 0x0F)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: LineEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for LineEvents {
    type Output = LineEvents;

    fn bitor(self, rhs: Self) -> Self::Output {
        LineEvents(self.0 | rhs.0)
    }
}

impl BitAnd for LineEvents {
    type Output = LineEvents;

    fn bitand(self, rhs: Self) -> Self::Output {
        LineEvents(self.0 & rhs.0)
    }
}

impl fmt::Display for LineEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (LineEvents::CTS, "CTS"),
            (LineEvents::DSR, "DSR"),
            (LineEvents::DCD, "DCD"),
            (LineEvents::RI, "RI"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// When the event loop calls the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDelivery {
    /// Every status read is delivered.
    Always,
    /// Only reads whose mask differs from the last delivered mask are delivered.
    OnChange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_encoding() {
        let status = LineStatus {
            cts: true,
            dsr: false,
            dcd: true,
            ri: false,
        };
        assert_eq!(status.events(), LineEvents::CTS | LineEvents::DCD);
        assert_eq!(status.events().bits(), 0x05);
        assert_eq!(LineStatus::default().events(), LineEvents::NONE);
    }

    #[test]
    fn test_mask_and_display() {
        let events = LineEvents::from_bits(0xFF);
        assert_eq!(events, LineEvents::ALL);
        assert_eq!((events & LineEvents::DSR).to_string(), "DSR");
        assert_eq!(LineEvents::NONE.to_string(), "-");
        assert_eq!((LineEvents::CTS | LineEvents::RI).to_string(), "CTS|RI");
    }
}
