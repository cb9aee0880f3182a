//! Serial line and device selection settings.
//!
//! These are applied by the external device opener; the reactor itself only
//! consumes the opened handle. Values parse from the same spellings the
//! configuration keys use (`odd`, `rts_cts`, `0403:6001:1`, ...).

use std::fmt;
use std::str::FromStr;

use crate::env::env_get_raw;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Odd,
    Even,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Disabled,
    RtsCts,
    DtrDsr,
    XonXoff,
}

/// Interface (port) of a multi-port chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    A,
    B,
    C,
    D,
}

impl Interface {
    pub fn from_port(port: u8) -> Result<Self, ConfigError> {
        match port {
            0 => Ok(Interface::A),
            1 => Ok(Interface::B),
            2 => Ok(Interface::C),
            3 => Ok(Interface::D),
            _ => Err(invalid("port", port)),
        }
    }

    pub fn port(&self) -> u8 {
        match self {
            Interface::A => 0,
            Interface::B => 1,
            Interface::C => 2,
            Interface::D => 3,
        }
    }
}

fn invalid(key: &'static str, value: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidLineSetting { key, value: value.to_string() }
}

impl FromStr for DataBits {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "7" => Ok(DataBits::Seven),
            "8" => Ok(DataBits::Eight),
            other => Err(invalid("databits", other)),
        }
    }
}

impl FromStr for StopBits {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(StopBits::One),
            "2" => Ok(StopBits::Two),
            other => Err(invalid("stopbits", other)),
        }
    }
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            "none" => Ok(Parity::None),
            _ => Err(invalid("parity", s)),
        }
    }
}

impl FromStr for FlowControl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(FlowControl::Disabled),
            "rts_cts" => Ok(FlowControl::RtsCts),
            "dtr_dsr" => Ok(FlowControl::DtrDsr),
            "xon_xoff" => Ok(FlowControl::XonXoff),
            _ => Err(invalid("flowctrl", s)),
        }
    }
}

/// `vendor:product[:index]`, vendor and product in hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    pub vendor: u16,
    pub product: u16,
    /// Which of several matching devices (0 = first).
    pub index: u8,
}

impl FromStr for DeviceSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.split(':');
        let vendor = parts.next().and_then(|v| parse_hex16(v));
        let product = parts.next().and_then(|p| parse_hex16(p));
        let index = match parts.next() {
            Some(i) => i.trim().parse::<u8>().ok(),
            None => Some(0),
        };

        match (vendor, product, index, parts.next()) {
            (Some(vendor), Some(product), Some(index), None) => {
                Ok(DeviceSelector { vendor, product, index })
            }
            _ => Err(invalid("usb_device", s)),
        }
    }
}

fn parse_hex16(s: &str) -> Option<u16> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u16::from_str_radix(s, 16).ok()
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}:{}", self.vendor, self.product, self.index)
    }
}

/// Line parameters and device selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow: FlowControl,
    /// Tried in order; the first one present is opened.
    pub devices: Vec<DeviceSelector>,
    pub interface: Interface,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::Odd,
            flow: FlowControl::Disabled,
            devices: Vec::new(),
            interface: Interface::A,
        }
    }
}

impl LineConfig {
    /// Keys understood by `apply()` and `from_env()`.
    pub const KEYS: [&'static str; 7] =
        ["baudrate", "parity", "flowctrl", "databits", "stopbits", "usb_device", "port"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn baud_rate(mut self, baud: u32) -> Self {
        if baud > 0 {
            self.baud_rate = baud;
        }
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn flow(mut self, flow: FlowControl) -> Self {
        self.flow = flow;
        self
    }

    pub fn device(mut self, selector: DeviceSelector) -> Self {
        self.devices.push(selector);
        self
    }

    pub fn interface(mut self, interface: Interface) -> Self {
        self.interface = interface;
        self
    }

    /// Apply one `key = value` setting. Empty values are ignored.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }

        match key {
            "baudrate" => {
                let baud: u32 = value.parse().map_err(|_| invalid("baudrate", value))?;
                if baud > 0 {
                    self.baud_rate = baud;
                }
            }
            "parity" => self.parity = value.parse()?,
            "flowctrl" => self.flow = value.parse()?,
            "databits" => self.data_bits = value.parse()?,
            "stopbits" => self.stop_bits = value.parse()?,
            "usb_device" => {
                self.devices = value
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(str::parse)
                    .collect::<Result<Vec<_>, _>>()?;
            }
            "port" => {
                let port: u8 = value.parse().map_err(|_| invalid("port", value))?;
                self.interface = Interface::from_port(port)?;
            }
            _ => return Err(ConfigError::Invalid("unknown line setting key")),
        }
        Ok(())
    }

    /// Defaults overridden by `{PREFIX}_BAUDRATE`, `{PREFIX}_PARITY`, ...
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for key in Self::KEYS {
            let var = format!("{}_{}", prefix, key.to_uppercase());
            if let Some(value) = env_get_raw(&var) {
                cfg.apply(key, &value)?;
            }
        }
        Ok(cfg)
    }
}
