//! Hot-plug source that diffs periodic port enumerations.

use super::{DeviceInfo, DeviceNotice, HotplugSource};
use crate::backend::poll::{Tick, Ticker};
use crate::backend::Waker;
use crate::config::MonitorConfig;
use serialport::SerialPortType;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;

/// Rescans the device list every interval and reports the difference.
///
/// The first scan is reported as one `Added` notice, even when nothing is
/// attached, so the monitor can tell the initial enumeration apart.
pub struct EnumerationSource<F> {
    ticker: Arc<Ticker>,
    scan: F,
    known: Option<BTreeMap<String, DeviceInfo>>,
    queued: VecDeque<DeviceNotice>,
}

impl<F> EnumerationSource<F>
where
    F: FnMut() -> io::Result<Vec<DeviceInfo>> + Send,
{
    pub fn new(ticker: Arc<Ticker>, scan: F) -> Self {
        Self {
            ticker,
            scan,
            known: None,
            queued: VecDeque::new(),
        }
    }

    fn rescan(&mut self) -> io::Result<()> {
        let current: BTreeMap<String, DeviceInfo> = (self.scan)()?
            .into_iter()
            .map(|device| (device.id.clone(), device))
            .collect();

        let Some(known) = self.known.as_ref() else {
            self.queued
                .push_back(DeviceNotice::added(current.values().cloned().collect()));
            self.known = Some(current);
            return Ok(());
        };

        let removed: Vec<DeviceInfo> = known
            .iter()
            .filter(|(id, _)| !current.contains_key(*id))
            .map(|(_, device)| device.clone())
            .collect();
        let added: Vec<DeviceInfo> = current
            .iter()
            .filter(|(id, _)| !known.contains_key(*id))
            .map(|(_, device)| device.clone())
            .collect();

        if !removed.is_empty() {
            self.queued.push_back(DeviceNotice::removed(removed));
        }
        if !added.is_empty() {
            self.queued.push_back(DeviceNotice::added(added));
        }
        self.known = Some(current);
        Ok(())
    }
}

impl EnumerationSource<Box<dyn FnMut() -> io::Result<Vec<DeviceInfo>> + Send>> {
    /// Enumerate with `serialport`, keeping USB ports only when the configured
    /// subsystem is `usb`.
    pub fn native(config: &MonitorConfig) -> Self {
        let usb_only = config.subsystem == "usb";
        let ticker = Arc::new(Ticker::new(config.enumeration_interval()));
        Self::new(ticker, Box::new(move || scan_ports(usb_only)))
    }
}

fn scan_ports(usb_only: bool) -> io::Result<Vec<DeviceInfo>> {
    let ports = serialport::available_ports().map_err(io::Error::from)?;
    Ok(ports
        .into_iter()
        .filter_map(|port| {
            let subsystem = match port.port_type {
                SerialPortType::UsbPort(_) => "usb",
                SerialPortType::PciPort => "pci",
                SerialPortType::BluetoothPort => "bluetooth",
                SerialPortType::Unknown => "unknown",
            };
            if usb_only && subsystem != "usb" {
                return None;
            }
            Some(DeviceInfo {
                id: port.port_name.clone(),
                port_name: Some(port.port_name),
                subsystem: subsystem.to_string(),
            })
        })
        .collect())
}

impl<F> HotplugSource for EnumerationSource<F>
where
    F: FnMut() -> io::Result<Vec<DeviceInfo>> + Send,
{
    fn reports_existing(&self) -> bool {
        true
    }

    fn waker(&self) -> Arc<dyn Waker> {
        self.ticker.clone()
    }

    fn next_notice(&mut self) -> io::Result<Option<DeviceNotice>> {
        if let Some(notice) = self.queued.pop_front() {
            return Ok(Some(notice));
        }
        // The first scan runs immediately; later scans wait one interval.
        if self.known.is_some() && self.ticker.tick() == Tick::Woken {
            return Ok(None);
        }
        self.rescan()?;
        Ok(self.queued.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::DeviceAction;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            port_name: Some(id.to_string()),
            subsystem: "usb".to_string(),
        }
    }

    fn scripted(
        scans: Vec<Vec<&'static str>>,
    ) -> EnumerationSource<impl FnMut() -> io::Result<Vec<DeviceInfo>> + Send> {
        let scans = Arc::new(Mutex::new(VecDeque::from(scans)));
        let ticker = Arc::new(Ticker::new(Duration::from_millis(1)));
        EnumerationSource::new(ticker, move || {
            let next = scans.lock().pop_front().unwrap_or_default();
            Ok(next.into_iter().map(device).collect())
        })
    }

    #[test]
    fn test_first_scan_is_added_even_when_empty() {
        let mut source = scripted(vec![vec![]]);
        let notice = source.next_notice().unwrap().unwrap();
        assert_eq!(notice.action, DeviceAction::Added);
        assert!(notice.devices.is_empty());
        assert!(source.reports_existing());
    }

    #[test]
    fn test_later_scans_report_differences() {
        let mut source = scripted(vec![
            vec!["/dev/ttyUSB0"],
            vec!["/dev/ttyUSB0"],
            vec!["/dev/ttyUSB1"],
        ]);

        let initial = source.next_notice().unwrap().unwrap();
        assert_eq!(initial.devices, vec![device("/dev/ttyUSB0")]);

        // Unchanged scan yields nothing.
        assert_eq!(source.next_notice().unwrap(), None);

        let removed = source.next_notice().unwrap().unwrap();
        assert_eq!(removed.action, DeviceAction::Removed);
        assert_eq!(removed.devices, vec![device("/dev/ttyUSB0")]);

        let added = source.next_notice().unwrap().unwrap();
        assert_eq!(added.action, DeviceAction::Added);
        assert_eq!(added.devices, vec![device("/dev/ttyUSB1")]);
    }

    #[test]
    fn test_waker_interrupts_interval() {
        let ticker = Arc::new(Ticker::new(Duration::from_secs(30)));
        let mut source = EnumerationSource::new(Arc::clone(&ticker), || Ok(Vec::new()));
        assert!(source.next_notice().unwrap().is_some());

        source.waker().wake().unwrap();
        assert_eq!(source.next_notice().unwrap(), None);
    }

    #[test]
    fn test_scan_error_propagates() {
        let ticker = Arc::new(Ticker::new(Duration::from_millis(1)));
        let mut source = EnumerationSource::new(ticker, || {
            Err(io::Error::new(io::ErrorKind::Other, "enumeration failed"))
        });
        assert!(source.next_notice().is_err());
    }
}
