//! WebUSB transport: claims the device's bulk interface through libusb.
//!
//! Device discovery and raw packet I/O are supported; request/response calls
//! are not, because KeepKey firmware only speaks the framed protocol over
//! WebUSB to browser hosts. `call` therefore always reports
//! `UnsupportedEnvironment`.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, info, warn};
use rusb::{Device, GlobalContext, UsbContext};

use super::{select_device, DeviceHandle, DeviceInfo, Transport, KEEPKEY_PIDS, KEEPKEY_VID};
use crate::{
    config::TransportKind,
    error::{Error, Result},
    messages::ProtocolMessage,
};

pub const DEFAULT_INTERFACE: u8 = 0;
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Bulk in/out pair on a claimed interface.
pub trait BulkChannel: Send {
    fn packet_size(&self) -> usize;
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize>;
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn release(&mut self) -> Result<()>;
}

pub trait UsbBackend: Send + Sync {
    /// KeepKeys already visible to the host, filtered by vendor/product id.
    fn devices(&self) -> Result<Vec<DeviceInfo>>;
    fn open(&self, path: &str, interface: u8) -> Result<Box<dyn BulkChannel>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RusbBackend;

fn device_path<T: UsbContext>(device: &Device<T>) -> String {
    format!("bus{}_addr{}", device.bus_number(), device.address())
}

fn is_keepkey<T: UsbContext>(device: &Device<T>) -> Option<rusb::DeviceDescriptor> {
    let desc = device.device_descriptor().ok()?;
    (desc.vendor_id() == KEEPKEY_VID && KEEPKEY_PIDS.contains(&desc.product_id())).then_some(desc)
}

impl UsbBackend for RusbBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let list = rusb::devices()?;
        Ok(list
            .iter()
            .filter_map(|device| {
                let desc = is_keepkey(&device)?;
                // Serial needs an open handle; skip it if the device is busy.
                let serial_number = device
                    .open()
                    .ok()
                    .and_then(|h| h.read_serial_number_string_ascii(&desc).ok());
                Some(DeviceInfo {
                    path: device_path(&device),
                    session: None,
                    vendor: Some(desc.vendor_id()),
                    product: Some(desc.product_id()),
                    serial_number,
                    label: None,
                })
            })
            .collect())
    }

    fn open(&self, path: &str, interface: u8) -> Result<Box<dyn BulkChannel>> {
        let list = rusb::devices()?;
        let device = list
            .iter()
            .find(|d| is_keepkey(d).is_some() && device_path(d) == path)
            .ok_or_else(|| Error::DeviceNotFound(Some(path.to_string())))?;
        Ok(Box::new(RusbChannel::open(&device, interface)?))
    }
}

struct RusbChannel {
    handle: rusb::DeviceHandle<GlobalContext>,
    interface: u8,
    in_endpoint: u8,
    out_endpoint: u8,
    packet_size: usize,
}

impl RusbChannel {
    fn open(device: &Device<GlobalContext>, interface: u8) -> Result<Self> {
        let mut handle = device
            .open()
            .map_err(|e| Error::ConnectionFailed(format!("cannot open {}: {e}", device_path(device))))?;

        // A configuration of 0 means the device is unconfigured.
        if handle.active_configuration()? == 0 {
            handle.set_active_configuration(1)?;
        }
        match handle.set_auto_detach_kernel_driver(true) {
            Err(rusb::Error::NotSupported) => Ok(()),
            other => other,
        }?;
        handle.claim_interface(interface).map_err(|e| {
            Error::ConnectionFailed(format!("cannot claim interface {interface}: {e}"))
        })?;

        let config = device.active_config_descriptor()?;
        let descriptor = config
            .interfaces()
            .find(|i| i.number() == interface)
            .and_then(|i| i.descriptors().next())
            .ok_or(rusb::Error::NotFound)?;

        let mut in_endpoint = None;
        let mut out_endpoint = None;
        for ep in descriptor.endpoint_descriptors() {
            if ep.transfer_type() != rusb::TransferType::Bulk {
                continue;
            }
            match ep.direction() {
                rusb::Direction::In => in_endpoint = Some((ep.address(), ep.max_packet_size())),
                rusb::Direction::Out => out_endpoint = Some((ep.address(), ep.max_packet_size())),
            }
        }
        let (Some((in_endpoint, in_size)), Some((out_endpoint, _))) = (in_endpoint, out_endpoint) else {
            let _ = handle.release_interface(interface);
            return Err(Error::ConnectionFailed(format!(
                "interface {interface} has no bulk endpoint pair"
            )));
        };
        debug!("WebUSB: IN 0x{in_endpoint:02x}, OUT 0x{out_endpoint:02x}, packet size {in_size}");

        Ok(Self {
            handle,
            interface,
            in_endpoint,
            out_endpoint,
            packet_size: usize::from(in_size),
        })
    }
}

/// Bulk transfer errors, with timeouts carrying the deadline that expired.
fn bulk_error(err: rusb::Error, timeout: Duration) -> Error {
    match err {
        rusb::Error::Timeout => Error::Timeout(timeout),
        other => other.into(),
    }
}

impl BulkChannel for RusbChannel {
    fn packet_size(&self) -> usize {
        self.packet_size
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        self.handle
            .write_bulk(self.out_endpoint, data, timeout)
            .map_err(|e| bulk_error(e, timeout))
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.handle
            .read_bulk(self.in_endpoint, buf, timeout)
            .map_err(|e| bulk_error(e, timeout))
    }

    fn release(&mut self) -> Result<()> {
        Ok(self.handle.release_interface(self.interface)?)
    }
}

type SharedChannel = Arc<Mutex<Box<dyn BulkChannel>>>;

pub struct WebUsbTransport {
    backend: Arc<dyn UsbBackend>,
    interface: u8,
    channel: Option<SharedChannel>,
    handle: Option<DeviceHandle>,
}

impl WebUsbTransport {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(RusbBackend))
    }

    pub fn with_backend(backend: Arc<dyn UsbBackend>) -> Self {
        Self {
            backend,
            interface: DEFAULT_INTERFACE,
            channel: None,
            handle: None,
        }
    }

    /// Devices the host has already granted.
    pub async fn get_devices(&self) -> Result<Vec<DeviceInfo>> {
        let backend = Arc::clone(&self.backend);
        blocking(move || backend.devices()).await
    }

    /// Picks a device by path or serial (or the first one), failing with
    /// `DeviceNotFound` when nothing matches.
    pub async fn request_device(&self, selector: Option<&str>) -> Result<DeviceInfo> {
        let devices = self.get_devices().await?;
        Ok(select_device(&devices, selector)?.clone())
    }

    pub async fn write_raw(&self, data: Vec<u8>) -> Result<usize> {
        let channel = self.shared()?;
        blocking(move || {
            let mut guard = lock(&channel)?;
            guard.write(&data, IO_TIMEOUT)
        })
        .await
    }

    /// Reads one packet from the IN endpoint.
    pub async fn read_raw(&self) -> Result<Vec<u8>> {
        let channel = self.shared()?;
        blocking(move || {
            let mut guard = lock(&channel)?;
            let mut buf = vec![0u8; guard.packet_size()];
            let n = guard.read(&mut buf, IO_TIMEOUT)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
    }

    fn shared(&self) -> Result<SharedChannel> {
        self.channel.as_ref().map(Arc::clone).ok_or(Error::NotConnected)
    }
}

impl Default for WebUsbTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(channel: &SharedChannel) -> Result<std::sync::MutexGuard<'_, Box<dyn BulkChannel>>> {
    channel
        .lock()
        .map_err(|_| Error::Transport("USB channel lock poisoned".into()))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Transport(format!("USB task failed: {e}")))?
}

#[async_trait]
impl Transport for WebUsbTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebUsb
    }

    async fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        self.get_devices().await
    }

    async fn connect(&mut self, selector: Option<&str>) -> Result<DeviceHandle> {
        if let (Some(_), Some(handle)) = (&self.channel, &self.handle) {
            if selector.map_or(true, |s| s == handle.path) {
                return Ok(handle.clone());
            }
            self.disconnect().await?;
        }

        let device = self.request_device(selector).await?;
        let backend = Arc::clone(&self.backend);
        let path = device.path.clone();
        let interface = self.interface;
        let channel = blocking(move || backend.open(&path, interface)).await?;
        info!("WebUSB: claimed interface {} on {}", self.interface, device.path);

        let handle = DeviceHandle::open(TransportKind::WebUsb, device.path, None)?;
        self.channel = Some(Arc::new(Mutex::new(channel)));
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.handle = None;
        let Some(channel) = self.channel.take() else {
            return Ok(());
        };
        let released = blocking(move || lock(&channel)?.release()).await;
        if let Err(e) = released {
            warn!("WebUSB: releasing interface failed: {e}");
        }
        Ok(())
    }

    async fn call(&mut self, request: ProtocolMessage, _timeout: Duration) -> Result<ProtocolMessage> {
        Err(Error::UnsupportedEnvironment(format!(
            "{} over WebUSB requires a browser host; use the usb or bridge transport",
            request.message_type
        )))
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeUsb;

    struct Echo {
        last: Vec<u8>,
        released: bool,
    }

    impl BulkChannel for Echo {
        fn packet_size(&self) -> usize {
            64
        }
        fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize> {
            self.last = data.to_vec();
            Ok(data.len())
        }
        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            buf[..self.last.len()].copy_from_slice(&self.last);
            Ok(self.last.len())
        }
        fn release(&mut self) -> Result<()> {
            self.released = true;
            Ok(())
        }
    }

    impl UsbBackend for FakeUsb {
        fn devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(vec![DeviceInfo {
                path: "bus1_addr4".into(),
                vendor: Some(KEEPKEY_VID),
                product: Some(0x0002),
                ..Default::default()
            }])
        }
        fn open(&self, _path: &str, _interface: u8) -> Result<Box<dyn BulkChannel>> {
            Ok(Box::new(Echo {
                last: Vec::new(),
                released: false,
            }))
        }
    }

    #[test]
    fn bulk_timeouts_report_their_deadline() {
        let err = bulk_error(rusb::Error::Timeout, IO_TIMEOUT);
        assert_eq!(err.to_string(), "device did not respond within 5s");
        assert_eq!(
            bulk_error(rusb::Error::NoDevice, IO_TIMEOUT).kind(),
            crate::ErrorKind::DeviceDisconnected
        );
    }

    #[tokio::test]
    async fn raw_io_works_but_call_is_unsupported() {
        let mut usb = WebUsbTransport::with_backend(Arc::new(FakeUsb));
        assert_eq!(
            usb.request_device(Some("bus9_addr9")).await.unwrap_err().kind(),
            crate::ErrorKind::DeviceNotFound
        );

        let handle = usb.connect(None).await.unwrap();
        assert_eq!(handle.path, "bus1_addr4");
        assert_eq!(usb.write_raw(vec![0x3f, 1, 2]).await.unwrap(), 3);
        assert_eq!(usb.read_raw().await.unwrap(), vec![0x3f, 1, 2]);

        let err = usb
            .call(ProtocolMessage::empty(crate::MessageType::Initialize), IO_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnsupportedEnvironment);

        usb.disconnect().await.unwrap();
        assert!(!usb.is_connected());
        assert_eq!(usb.read_raw().await.unwrap_err().kind(), crate::ErrorKind::NotConnected);
    }
}
