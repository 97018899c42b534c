//! Hardware Signaler.
//!
//! Wire protocol to the lane controller, one ASCII line per fact per cycle:
//! - `F\n` / `E\n`: every slot in every lane occupied, or not
//! - `L{n}F\n` / `L{n}E\n`: lane `n` full, or not
//!
//! Delivery is best effort. A missing link or a failed write is logged and
//! the cycle carries on.

use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;

use crate::config::SerialSettings;
use crate::state::LaneCount;

/// Encode the per-cycle message set: the overall tag, then one tag per lane.
pub fn encode_messages(counts: &[LaneCount]) -> Vec<String> {
    let all_full = !counts.is_empty() && counts.iter().all(LaneCount::is_full);
    let mut messages = Vec::with_capacity(counts.len() + 1);
    messages.push(format!("{}\n", full_code(all_full)));
    for count in counts {
        messages.push(format!("L{}{}\n", count.lane, full_code(count.is_full())));
    }
    messages
}

fn full_code(full: bool) -> &'static str {
    if full {
        "F"
    } else {
        "E"
    }
}

/// Outbound connection to the lane controller.
pub trait SignalLink: Send {
    fn describe(&self) -> String;

    fn is_open(&self) -> bool;

    fn write_message(&mut self, message: &str) -> Result<()>;
}

pub struct SerialLink {
    name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink {
    /// Open `path` and wait `settle` for the controller to come out of reset.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration, settle: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .open()
            .with_context(|| format!("open serial port {} at {} baud", path, baud_rate))?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        log::info!("serial connected at {} ({} baud)", path, baud_rate);
        Ok(Self {
            name: path.to_string(),
            port,
        })
    }
}

impl SignalLink for SerialLink {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn is_open(&self) -> bool {
        true
    }

    fn write_message(&mut self, message: &str) -> Result<()> {
        self.port
            .write_all(message.as_bytes())
            .with_context(|| format!("write {:?} to {}", message.trim_end(), self.name))?;
        self.port.flush().context("flush serial port")?;
        Ok(())
    }
}

/// True for ports that look like the USB-serial bridge of the controller board.
pub fn is_controller_candidate(port_name: &str, description: &str) -> bool {
    let name = port_name.to_uppercase();
    let description = description.to_uppercase();
    name.contains("USB") || description.contains("USB") || description.contains("CP210X")
}

/// First available port that looks like the controller.
pub fn find_controller_port() -> Option<String> {
    log::info!("searching for controller serial port");
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            log::warn!("serial port enumeration failed: {}", err);
            return None;
        }
    };
    for info in ports {
        let description = match &info.port_type {
            serialport::SerialPortType::UsbPort(usb) => format!(
                "USB {} {}",
                usb.manufacturer.as_deref().unwrap_or(""),
                usb.product.as_deref().unwrap_or("")
            ),
            _ => String::new(),
        };
        if is_controller_candidate(&info.port_name, &description) {
            log::info!("found controller port candidate: {}", info.port_name);
            return Some(info.port_name);
        }
    }
    log::warn!("no controller serial port found");
    None
}

/// Open the controller link, or `None` if there is no usable port.
pub fn connect_controller(settings: &SerialSettings) -> Option<Box<dyn SignalLink>> {
    let path = match settings.port.clone() {
        Some(path) => path,
        None => find_controller_port()?,
    };
    match SerialLink::open(&path, settings.baud_rate, settings.timeout, settings.settle) {
        Ok(link) => Some(Box::new(link)),
        Err(err) => {
            log::error!("serial connection failed: {:#}", err);
            None
        }
    }
}

/// What one signalling pass managed to send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalReport {
    pub messages: Vec<String>,
    pub delivered: usize,
}

pub struct HardwareSignaler {
    link: Option<Box<dyn SignalLink>>,
}

impl HardwareSignaler {
    pub fn new(link: Option<Box<dyn SignalLink>>) -> Self {
        if link.is_none() {
            log::warn!("no controller link; hardware signalling disabled");
        }
        Self { link }
    }

    pub fn disconnected() -> Self {
        Self { link: None }
    }

    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|l| l.is_open())
    }

    /// Send this cycle's full/empty facts.
    pub fn signal(&mut self, counts: &[LaneCount]) -> SignalReport {
        let messages = encode_messages(counts);
        let mut delivered = 0;
        if let Some(link) = self.link.as_mut().filter(|l| l.is_open()) {
            for message in &messages {
                match link.write_message(message) {
                    Ok(()) => delivered += 1,
                    Err(err) => log::error!("controller send error: {:#}", err),
                }
            }
        } else {
            log::debug!("controller link absent; dropped {} messages", messages.len());
        }
        SignalReport {
            messages,
            delivered,
        }
    }
}

impl std::fmt::Debug for HardwareSignaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSignaler")
            .field("link", &self.link.as_ref().map(|l| l.describe()))
            .finish()
    }
}
