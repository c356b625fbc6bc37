//! USB-HID transport: 64-byte interrupt reports framed by [`super::framing`].

use std::{
    ffi::CString,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use hidapi::{HidApi, HidDevice};
use log::{debug, info, warn};

use super::{
    framing::{self, PACKET_SIZE},
    select_device, DeviceHandle, DeviceInfo, Transport, KEEPKEY_PIDS, KEEPKEY_VID,
};
use crate::{
    config::TransportKind,
    error::{Error, Result},
    messages::{MessageType, PayloadCodec, ProtobufCodec, ProtocolMessage},
};

/// hidapi expects the report id in front of every written report.
const REPORT_ID: u8 = 0;
/// Deadline for continuation reports once the first one has arrived.
const CONTINUATION_TIMEOUT: Duration = Duration::from_millis(500);
const FLUSH_TIMEOUT: Duration = Duration::from_millis(10);

/// A single open HID device. Blocking; driven from `spawn_blocking`.
pub trait HidChannel: Send {
    fn write_report(&mut self, report: &[u8]) -> Result<()>;

    /// Reads one report into `buf`, returning 0 when `timeout` elapses first.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Discovers and opens HID devices.
pub trait HidBackend: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;
    fn open(&self, path: &str) -> Result<Box<dyn HidChannel>>;
}

/// [`HidBackend`] over the system hidapi library.
#[derive(Debug, Default, Clone, Copy)]
pub struct HidApiBackend;

impl HidBackend for HidApiBackend {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let api = HidApi::new()?;
        let devices: Vec<DeviceInfo> = api
            .device_list()
            .filter(|d| d.vendor_id() == KEEPKEY_VID && KEEPKEY_PIDS.contains(&d.product_id()))
            .map(|d| DeviceInfo {
                path: d.path().to_string_lossy().into_owned(),
                session: None,
                vendor: Some(d.vendor_id()),
                product: Some(d.product_id()),
                serial_number: d.serial_number().map(str::to_string),
                label: d.product_string().map(str::to_string),
            })
            .collect();
        info!("Found {} KeepKey HID devices", devices.len());
        Ok(devices)
    }

    fn open(&self, path: &str) -> Result<Box<dyn HidChannel>> {
        let api = HidApi::new()?;
        let c_path = CString::new(path)
            .map_err(|_| Error::ConnectionFailed(format!("invalid HID path {path:?}")))?;
        let device = api.open_path(&c_path).map_err(|e| {
            Error::ConnectionFailed(format!(
                "cannot open {path} (is KeepKey Desktop or the bridge holding it?): {e}"
            ))
        })?;
        Ok(Box::new(HidApiChannel { device }))
    }
}

struct HidApiChannel {
    device: HidDevice,
}

impl HidChannel for HidApiChannel {
    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        write_with_report_id(report, |buf| Ok(self.device.write(buf)?))
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        Ok(self.device.read_timeout(buf, ms)?)
    }
}

/// Writes `report` behind the report id; the written count includes that byte.
fn write_with_report_id<W>(report: &[u8], write: W) -> Result<()>
where
    W: FnOnce(&[u8]) -> Result<usize>,
{
    let mut buf = Vec::with_capacity(report.len() + 1);
    buf.push(REPORT_ID);
    buf.extend_from_slice(report);
    let written = write(&buf)?;
    if written < buf.len() {
        return Err(Error::Transport(format!(
            "short HID write: {written} of {} bytes",
            buf.len()
        )));
    }
    Ok(())
}

type SharedChannel = Arc<Mutex<Box<dyn HidChannel>>>;

pub struct UsbHidTransport {
    backend: Arc<dyn HidBackend>,
    codec: Arc<dyn PayloadCodec>,
    channel: Option<SharedChannel>,
    handle: Option<DeviceHandle>,
}

impl UsbHidTransport {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(HidApiBackend), Arc::new(ProtobufCodec))
    }

    pub fn with_backend(backend: Arc<dyn HidBackend>, codec: Arc<dyn PayloadCodec>) -> Self {
        Self {
            backend,
            codec,
            channel: None,
            handle: None,
        }
    }
}

impl Default for UsbHidTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains reports left over from an earlier, abandoned exchange.
fn flush(channel: &mut dyn HidChannel) {
    let mut buf = [0u8; PACKET_SIZE];
    let mut flushed = 0;
    while let Ok(n) = channel.read_report(&mut buf, FLUSH_TIMEOUT) {
        if n == 0 {
            break;
        }
        flushed += 1;
    }
    if flushed > 0 {
        info!("HID: flushed {flushed} stale reports");
    }
}

/// One request/response over an open channel.
fn exchange(
    channel: &mut dyn HidChannel,
    packets: &[Vec<u8>],
    timeout: Duration,
) -> Result<(u16, Vec<u8>)> {
    for packet in packets {
        channel.write_report(packet)?;
    }
    let mut first = true;
    framing::read_message(
        |buf| {
            let deadline = if first { timeout } else { CONTINUATION_TIMEOUT };
            let n = channel.read_report(buf, deadline)?;
            if n == 0 && first {
                return Err(Error::Timeout(timeout));
            }
            first = false;
            Ok(n)
        },
        PACKET_SIZE,
    )
}

#[async_trait]
impl Transport for UsbHidTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::UsbHid
    }

    async fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.enumerate())
            .await
            .map_err(|e| Error::Transport(format!("HID enumeration task failed: {e}")))?
    }

    async fn connect(&mut self, selector: Option<&str>) -> Result<DeviceHandle> {
        if let (Some(_), Some(handle)) = (&self.channel, &self.handle) {
            if selector.map_or(true, |s| s == handle.path) {
                return Ok(handle.clone());
            }
            self.disconnect().await?;
        }

        let devices = self.enumerate().await?;
        let device = select_device(&devices, selector)?.clone();
        let backend = Arc::clone(&self.backend);
        let path = device.path.clone();
        let channel = tokio::task::spawn_blocking(move || {
            let mut channel = backend.open(&path)?;
            flush(channel.as_mut());
            Ok::<_, Error>(channel)
        })
        .await
        .map_err(|e| Error::Transport(format!("HID open task failed: {e}")))??;

        info!("HID: opened {}", device.path);
        let handle = DeviceHandle::open(TransportKind::UsbHid, device.path, None)?;
        self.channel = Some(Arc::new(Mutex::new(channel)));
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            debug!("HID: closing {}", handle.path);
        }
        // Dropping the last reference closes the hidapi device.
        self.channel = None;
        Ok(())
    }

    async fn call(&mut self, request: ProtocolMessage, timeout: Duration) -> Result<ProtocolMessage> {
        let channel = self.channel.as_ref().map(Arc::clone).ok_or(Error::NotConnected)?;
        let payload = self.codec.encode(&request)?;
        let packets = framing::split_packets(request.message_type.code(), &payload, PACKET_SIZE)?;
        debug!("HID: -> {} ({} packets)", request.message_type, packets.len());

        let (code, bytes) = tokio::task::spawn_blocking(move || {
            let mut guard = channel
                .lock()
                .map_err(|_| Error::Transport("HID channel lock poisoned".into()))?;
            exchange(guard.as_mut(), &packets, timeout)
        })
        .await
        .map_err(|e| Error::Transport(format!("HID I/O task failed: {e}")))?
        .map_err(|e| {
            warn!("HID: {} failed: {e}", request.message_type);
            e
        })?;

        let message_type = MessageType::try_from_code(code)?;
        debug!("HID: <- {message_type} ({} bytes)", bytes.len());
        self.codec.decode(message_type, &bytes)
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }
}
