//! Line settings applied when opening a port.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Baud rate and character framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl PortSettings {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Apply a framing string such as `8N1` or `7E2`.
    pub fn with_framing(mut self, framing: &str) -> Result<Self, PortError> {
        let Framing(data_bits, parity, stop_bits) = framing.parse()?;
        self.data_bits = data_bits;
        self.parity = parity;
        self.stop_bits = stop_bits;
        Ok(self)
    }

    pub fn framing(&self) -> String {
        Framing(self.data_bits, self.parity, self.stop_bits).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    fn digit(self) -> char {
        match self {
            DataBits::Five => '5',
            DataBits::Six => '6',
            DataBits::Seven => '7',
            DataBits::Eight => '8',
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Software => Self::Software,
            FlowControl::Hardware => Self::Hardware,
        }
    }
}

impl FromStr for FlowControl {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(FlowControl::None),
            "software" | "xon" | "xonxoff" => Ok(FlowControl::Software),
            "hardware" | "rtscts" => Ok(FlowControl::Hardware),
            other => Err(PortError::settings(format!("unknown flow control '{}'", other))),
        }
    }
}

struct Framing(DataBits, Parity, StopBits);

impl FromStr for Framing {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PortError::settings(format!("invalid framing '{}', expected e.g. 8N1", s));
        let mut chars = s.chars();
        let (Some(d), Some(p), Some(st), None) = (chars.next(), chars.next(), chars.next(), chars.next())
        else {
            return Err(invalid());
        };
        let data_bits = match d {
            '5' => DataBits::Five,
            '6' => DataBits::Six,
            '7' => DataBits::Seven,
            '8' => DataBits::Eight,
            _ => return Err(invalid()),
        };
        let parity = match p.to_ascii_uppercase() {
            'N' => Parity::None,
            'O' => Parity::Odd,
            'E' => Parity::Even,
            _ => return Err(invalid()),
        };
        let stop_bits = match st {
            '1' => StopBits::One,
            '2' => StopBits::Two,
            _ => return Err(invalid()),
        };
        Ok(Framing(data_bits, parity, stop_bits))
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.1 {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.2 {
            StopBits::One => '1',
            StopBits::Two => '2',
        };
        write!(f, "{}{}{}", self.0.digit(), parity, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_9600_8n1() {
        let settings = PortSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.framing(), "8N1");
        assert_eq!(settings.flow_control, FlowControl::None);
    }

    #[test]
    fn test_framing_parse() {
        let settings = PortSettings::default()
            .with_baud_rate(115_200)
            .with_framing("7e2")
            .unwrap();
        assert_eq!(settings.data_bits, DataBits::Seven);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.framing(), "7E2");

        assert!(PortSettings::default().with_framing("9N1").is_err());
        assert!(PortSettings::default().with_framing("8N").is_err());
        assert!(PortSettings::default().with_framing("8N11").is_err());
    }

    #[test]
    fn test_flow_control_names() {
        assert_eq!("RTSCTS".parse::<FlowControl>().unwrap(), FlowControl::Hardware);
        assert_eq!("xon".parse::<FlowControl>().unwrap(), FlowControl::Software);
        assert!("maybe".parse::<FlowControl>().is_err());
    }

    #[test]
    fn test_serialport_conversion() {
        let parity: serialport::Parity = Parity::Odd.into();
        assert_eq!(parity, serialport::Parity::Odd);
        let bits: serialport::DataBits = DataBits::Five.into();
        assert_eq!(bits, serialport::DataBits::Five);
    }
}
