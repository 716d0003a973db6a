// XBee API-mode framing (non-escaped)
//
// Every frame on the wire is [0x7E, len_hi, len_lo, api data..., checksum]
// with checksum = 0xFF - (sum of api data & 0xFF). Outbound we only build
// 16-bit-address transmit requests; inbound we care about 16-bit-address
// receive packets and log everything else.

use tracing::debug;

const DELIMITER: u8 = 0x7E;
const API_TX_REQUEST_16: u8 = 0x01;
const API_RX_PACKET_16: u8 = 0x81;

/// Largest api-data length accepted from the stream. Real payloads top out
/// well under this; a longer claimed length is line noise.
const MAX_API_LEN: usize = 128;

/// Checksum over the api data (everything between length and checksum byte).
pub fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    0xFF - (sum & 0xFF) as u8
}

/// Build a transmit request carrying `payload` to the 16-bit address `dest`.
///
/// Frame id 0 tells the radio not to answer with a transmit-status frame;
/// delivery feedback comes from the robot itself, not the local modem.
pub fn tx_request(dest: u16, payload: &[u8]) -> Vec<u8> {
    let api_len = 5 + payload.len();
    let mut frame = Vec::with_capacity(4 + api_len);

    frame.push(DELIMITER);
    frame.extend_from_slice(&(api_len as u16).to_be_bytes());
    frame.push(API_TX_REQUEST_16);
    frame.push(0); // frame id
    frame.extend_from_slice(&dest.to_be_bytes());
    frame.push(0); // options
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame[3..]));

    frame
}

/// A complete api frame recovered from the inbound byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    /// Payload received over the air, with the sender's address and the
    /// received signal strength (in -dBm)
    Rx {
        source: u16,
        rssi: u8,
        payload: Vec<u8>,
    },
    /// Any other api id (modem status, AT responses); kept only for logging
    Other { api_id: u8 },
}

/// Incremental parser over the raw serial byte stream.
///
/// The serial layer delivers arbitrary chunks, so frames arrive split and
/// occasionally preceded by garbage. The parser buffers input, resyncs on
/// the frame delimiter, and drops anything that fails the checksum.
#[derive(Default)]
pub struct ApiParser {
    buf: Vec<u8>,
}

impl ApiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every frame it completes.
    pub fn extend(&mut self, chunk: &[u8]) -> Vec<ApiFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.buf.iter().position(|&b| b == DELIMITER) {
                Some(0) => {}
                Some(skip) => {
                    debug!("dropping {} bytes ahead of frame delimiter", skip);
                    self.buf.drain(..skip);
                }
                None => {
                    if !self.buf.is_empty() {
                        debug!("dropping {} bytes of garbage", self.buf.len());
                        self.buf.clear();
                    }
                    break;
                }
            }

            if self.buf.len() < 3 {
                break;
            }
            let api_len = u16::from_be_bytes([self.buf[1], self.buf[2]]) as usize;
            if api_len == 0 || api_len > MAX_API_LEN {
                debug!("implausible api length {}, resyncing", api_len);
                self.buf.drain(..1);
                continue;
            }

            let total = 3 + api_len + 1;
            if self.buf.len() < total {
                break;
            }

            let data: Vec<u8> = self.buf[3..3 + api_len].to_vec();
            let received = self.buf[3 + api_len];
            self.buf.drain(..total);

            let expected = checksum(&data);
            if expected != received {
                debug!(
                    "checksum mismatch (expected {:02X}, got {:02X}), dropping frame",
                    expected, received
                );
                continue;
            }

            frames.push(Self::classify(&data));
        }

        frames
    }

    fn classify(data: &[u8]) -> ApiFrame {
        match data[0] {
            API_RX_PACKET_16 if data.len() >= 5 => ApiFrame::Rx {
                source: u16::from_be_bytes([data[1], data[2]]),
                rssi: data[3],
                payload: data[5..].to_vec(),
            },
            api_id => ApiFrame::Other { api_id },
        }
    }
}
