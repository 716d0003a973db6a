// Addressed radio transport over the basestation serial port
//
// Outbound frames are wrapped in XBee transmit requests and written
// synchronously. A reader thread owns the other half of the port, turns the
// inbound byte stream back into frames, and dispatches them to per-command
// handlers. The only reliability mechanism on this link is the capped
// resend loop in `send_with_confirmation`.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serialport::{FlowControl, SerialPort};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::frame;
use super::xbee::{self, ApiFrame, ApiParser};
use crate::config;

/// Read timeout on the reader half; bounds how long close() waits to join.
const READ_POLL: Duration = Duration::from_millis(50);

/// 16-bit robot address on the radio network
pub type Address = u16;

/// Error types for the radio link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("link i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("no acknowledgement after {attempts} attempts")]
    AckTimeout { attempts: u32 },

    #[error("link is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// A decoded application frame received over the air
#[derive(Debug, Clone)]
pub struct Inbound {
    pub source: Address,
    pub status: u8,
    pub command: u8,
    pub values: Vec<i16>,
}

type Handler = Box<dyn Fn(&Inbound) + Send + Sync>;

/// Write half of the physical channel. The production channel is the
/// basestation serial port; tests substitute an in-memory recorder.
pub trait Channel: Send {
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl Channel for Box<dyn SerialPort> {
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }
}

/// Radio link shared by every robot session on the same physical channel.
pub struct Radio {
    writer: Mutex<Box<dyn Channel>>,
    handlers: Mutex<HashMap<u8, Vec<Handler>>>,
    ack_notify: Notify,
    ack_timeout: Duration,
    closed: AtomicBool,
    reader: Mutex<Option<thread::JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Radio {
    /// Open the basestation serial port and start the receive path.
    pub fn open(port_name: &str, baudrate: u32) -> Result<Arc<Self>> {
        info!("Opening radio basestation on {} @ {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(READ_POLL)
            .flow_control(FlowControl::Hardware)
            .open()?;
        let reader_half = port.try_clone()?;

        let radio = Self::from_channel(Box::new(port), config::ACK_TIMEOUT);
        radio.start_reader(reader_half)?;
        Ok(radio)
    }

    /// Build a radio around an already-open write channel. No reader thread
    /// is started; inbound frames are handed in via `handle_api`.
    pub fn from_channel(channel: Box<dyn Channel>, ack_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(channel),
            handlers: Mutex::new(HashMap::new()),
            ack_notify: Notify::new(),
            ack_timeout,
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        })
    }

    fn start_reader(self: &Arc<Self>, port: Box<dyn SerialPort>) -> Result<()> {
        let radio = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("radio-rx".into())
            .spawn(move || reader_loop(radio, port))
            .map_err(LinkError::Io)?;
        *lock(&self.reader) = Some(handle);
        Ok(())
    }

    /// Register a handler for inbound frames carrying `command`. Handlers
    /// run on the reader thread and must be quick.
    pub fn on_frame<F>(&self, command: u8, handler: F)
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        lock(&self.handlers)
            .entry(command)
            .or_default()
            .push(Box::new(handler));
    }

    /// Address a frame and write it to the channel. Synchronous and
    /// fire-and-forget; an i/o failure here is fatal to the link.
    pub fn send(&self, dest: Address, payload: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        let framed = xbee::tx_request(dest, payload);
        debug!("tx to {:04X}: {:02X?}", dest, framed);
        lock(&self.writer).write_frame(&framed)?;
        Ok(())
    }

    /// Send and block until `confirmed` reports true, resending after each
    /// acknowledgement window that passes without it. `max_retries` bounds
    /// the resends, so at most `max_retries + 1` frames go out. I/O errors
    /// are never retried.
    pub async fn send_with_confirmation<F>(
        &self,
        dest: Address,
        payload: &[u8],
        mut confirmed: F,
        max_retries: u32,
    ) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let attempts = max_retries + 1;
        for attempt in 1..=attempts {
            self.send(dest, payload)?;
            match timeout(self.ack_timeout, self.wait_for(&mut confirmed)).await {
                Ok(()) => {
                    debug!("confirmed after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(_) if attempt < attempts => {
                    warn!(
                        "no acknowledgement within {:?}, resending ({}/{})",
                        self.ack_timeout, attempt, attempts
                    );
                }
                Err(_) => {}
            }
        }
        Err(LinkError::AckTimeout { attempts })
    }

    /// Wait until `predicate` holds. The receive path updates handler state
    /// before waking waiters, so the check cannot miss an update.
    pub async fn wait_for<F>(&self, mut predicate: F)
    where
        F: FnMut() -> bool,
    {
        loop {
            let notified = self.ack_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if predicate() {
                return;
            }
            notified.await;
        }
    }

    /// Shut the receive path down. After this returns no handler runs.
    /// Safe on every shutdown path, including after a channel failure;
    /// idempotent, errors swallowed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ack_notify.notify_waiters();
        if let Some(handle) = lock(&self.reader).take() {
            if handle.join().is_err() {
                warn!("radio reader thread panicked");
            }
        }
        info!("Radio link closed");
    }

    pub(crate) fn handle_api(&self, api: ApiFrame) {
        match api {
            ApiFrame::Rx {
                source,
                rssi,
                payload,
            } => match frame::decode(&payload) {
                Ok((status, command, values)) => {
                    debug!(
                        "rx from {:04X} (rssi -{} dBm): cmd {} with {} values",
                        source,
                        rssi,
                        command,
                        values.len()
                    );
                    self.dispatch(&Inbound {
                        source,
                        status,
                        command,
                        values,
                    });
                }
                Err(e) => warn!("dropping malformed frame from {:04X}: {}", source, e),
            },
            ApiFrame::Other { api_id } => debug!("ignoring api frame {:02X}", api_id),
        }
    }

    fn dispatch(&self, inbound: &Inbound) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let handlers = lock(&self.handlers);
        if let Some(for_command) = handlers.get(&inbound.command) {
            for handler in for_command {
                handler(inbound);
            }
        }
        drop(handlers);
        self.ack_notify.notify_waiters();
    }
}

fn reader_loop(radio: Arc<Radio>, mut port: Box<dyn SerialPort>) {
    let mut parser = ApiParser::new();
    let mut buf = [0u8; 256];

    while !radio.closed.load(Ordering::Acquire) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                for api in parser.extend(&buf[..n]) {
                    radio.handle_api(api);
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                if !radio.closed.load(Ordering::Acquire) {
                    error!("radio read failed: {}", e);
                }
                break;
            }
        }
    }
    debug!("radio reader stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) type SentFrames = Arc<Mutex<Vec<Vec<u8>>>>;

    /// Records every frame written, in place of a serial port.
    pub(crate) struct MockChannel {
        sent: SentFrames,
    }

    impl MockChannel {
        pub(crate) fn new() -> (Self, SentFrames) {
            let sent: SentFrames = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    sent: Arc::clone(&sent),
                },
                sent,
            )
        }
    }

    impl Channel for MockChannel {
        fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
            lock(&self.sent).push(bytes.to_vec());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockChannel;
    use super::*;
    use crate::link::frame::Command;

    const ROBOT: Address = 0x2052;

    fn ack_frame(command: Command, values: &[i16]) -> ApiFrame {
        ApiFrame::Rx {
            source: ROBOT,
            rssi: 40,
            payload: frame::encode(command, values).expect("valid ack"),
        }
    }

    #[tokio::test]
    async fn test_send_writes_addressed_frame() {
        let (channel, sent) = MockChannel::new();
        let radio = Radio::from_channel(Box::new(channel), Duration::from_millis(20));

        radio.send(ROBOT, &[0x00, 0x02, 0x96, 0x00, 0xB5, 0xFF]).unwrap();

        let frames = lock(&sent);
        assert_eq!(frames.len(), 1);
        // Addressed to the robot, payload carried verbatim
        assert_eq!(&frames[0][5..7], &[0x20, 0x52]);
        assert_eq!(&frames[0][8..14], &[0x00, 0x02, 0x96, 0x00, 0xB5, 0xFF]);
    }

    #[tokio::test]
    async fn test_confirmation_exhausts_retry_budget() {
        let (channel, sent) = MockChannel::new();
        let radio = Radio::from_channel(Box::new(channel), Duration::from_millis(20));

        let result = radio
            .send_with_confirmation(ROBOT, &[0x00, 0x04], || false, 8)
            .await;

        assert!(matches!(result, Err(LinkError::AckTimeout { attempts: 9 })));
        assert_eq!(lock(&sent).len(), 9);
    }

    #[tokio::test]
    async fn test_confirmation_already_satisfied_sends_once() {
        let (channel, sent) = MockChannel::new();
        let radio = Radio::from_channel(Box::new(channel), Duration::from_millis(20));

        radio
            .send_with_confirmation(ROBOT, &[0x00, 0x04], || true, 8)
            .await
            .unwrap();

        assert_eq!(lock(&sent).len(), 1);
    }

    #[tokio::test]
    async fn test_ack_during_second_window_stops_resending() {
        let (channel, sent) = MockChannel::new();
        let radio = Radio::from_channel(Box::new(channel), Duration::from_millis(100));

        let confirmed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&confirmed);
        radio.on_frame(Command::SetPidGains.id(), move |inbound| {
            if inbound.source == ROBOT {
                flag.store(true, Ordering::Release);
            }
        });

        let injector = Arc::clone(&radio);
        tokio::spawn(async move {
            // Land inside the second acknowledgement window
            tokio::time::sleep(Duration::from_millis(150)).await;
            injector.handle_api(ack_frame(Command::SetPidGains, &[0; 10]));
        });

        let flag = Arc::clone(&confirmed);
        radio
            .send_with_confirmation(ROBOT, &[0x00, 0x01], move || flag.load(Ordering::Acquire), 8)
            .await
            .unwrap();

        assert_eq!(lock(&sent).len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_filters_by_command() {
        let (channel, _sent) = MockChannel::new();
        let radio = Radio::from_channel(Box::new(channel), Duration::from_millis(20));

        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        radio.on_frame(Command::WhoAmI.id(), move |inbound| {
            lock(&sink).push(inbound.source);
        });

        radio.handle_api(ack_frame(Command::WhoAmI, &[]));
        radio.handle_api(ack_frame(Command::SetPidGains, &[0; 10]));

        assert_eq!(*lock(&hits), vec![ROBOT]);
    }

    #[tokio::test]
    async fn test_malformed_inbound_dropped_without_dispatch() {
        let (channel, _sent) = MockChannel::new();
        let radio = Radio::from_channel(Box::new(channel), Duration::from_millis(20));

        let hits = Arc::new(AtomicBool::new(false));
        let sink = Arc::clone(&hits);
        radio.on_frame(Command::WhoAmI.id(), move |_| {
            sink.store(true, Ordering::Release);
        });

        // Odd payload length: decode fails, receive path survives
        radio.handle_api(ApiFrame::Rx {
            source: ROBOT,
            rssi: 40,
            payload: vec![0x00, 0x04, 0x2A],
        });

        assert!(!hits.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (channel, sent) = MockChannel::new();
        let radio = Radio::from_channel(Box::new(channel), Duration::from_millis(20));

        radio.close();
        radio.close(); // idempotent

        assert!(matches!(radio.send(ROBOT, &[0x00, 0x04]), Err(LinkError::Closed)));
        assert!(lock(&sent).is_empty());
    }
}
