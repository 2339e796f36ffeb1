pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;

#[cfg(feature = "hardware")]
pub use serial::{SerialPortTransport, list_ports};

use error::HwError;
use reactor_traits::Transport;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
// Follows tokio's clock, so paused-time tests see runs finish.
use tokio::time::Instant;

const STX: u8 = 0x02;
const ENQ: u8 = 0x05;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CR: u8 = 0x0D;

#[derive(Debug, Clone, Default)]
struct SimPump {
    address: Option<u8>,
    remote: bool,
    rpm: f64,
    clockwise: bool,
    armed_revs: f64,
    running_until: Option<Instant>,
}

impl SimPump {
    fn is_running(&self, now: Instant) -> bool {
        self.running_until.is_some_and(|until| now < until)
    }
}

#[derive(Debug, Default)]
struct ChainState {
    pumps: Vec<SimPump>,
    pending: VecDeque<u8>,
    frames: Vec<Vec<u8>>,
    closed: bool,
    fail_reads: bool,
    speedup: f64,
}

/// In-memory daisy chain of pumps speaking the serial line protocol.
///
/// Cloning yields a second handle onto the same chain, so a test or the CLI
/// can inspect frames after the transport has been moved into a link.
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    state: Arc<Mutex<ChainState>>,
}

impl SimulatedChain {
    /// Chain with `pumps` unaddressed pumps. Runs complete `speedup` times
    /// faster than real time.
    pub fn new(pumps: usize) -> Self {
        let state = ChainState {
            pumps: vec![SimPump::default(); pumps],
            speedup: 60.0,
            ..ChainState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_speedup(self, speedup: f64) -> Self {
        self.lock().speedup = speedup.max(f64::MIN_POSITIVE);
        self
    }

    /// Make every subsequent read fail as if the cable were pulled.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Every frame written so far, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether the pump at `address` is currently under remote control.
    pub fn is_remote(&self, address: u8) -> bool {
        self.lock()
            .pumps
            .iter()
            .any(|p| p.address == Some(address) && p.remote)
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        // A poisoned simulator is still usable; the data is plain bookkeeping.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChainState {
    fn handle_frame(&mut self, payload: &str) {
        let now = Instant::now();
        let Some(rest) = payload.strip_prefix('P') else {
            return;
        };
        if rest.len() < 2 {
            return;
        }
        let (addr_txt, cmd) = rest.split_at(2);
        let Ok(address) = addr_txt.parse::<u8>() else {
            return;
        };

        if cmd.is_empty() {
            if let Some(pump) = self.pumps.iter_mut().find(|p| p.address.is_none()) {
                pump.address = Some(address);
                self.pending.push_back(ACK);
            } else {
                self.pending.push_back(NAK);
            }
            return;
        }

        let speedup = self.speedup;
        let Some(pump) = self.pumps.iter_mut().find(|p| p.address == Some(address)) else {
            return;
        };
        let (op, arg) = cmd.split_at(1);
        if op != "L" {
            pump.remote = true;
        }
        match op {
            "S" => {
                let clockwise = arg.starts_with('+');
                if pump.is_running(now) && clockwise != pump.clockwise {
                    self.pending.push_back(NAK);
                    return;
                }
                match arg.get(1..).and_then(|v| v.parse::<f64>().ok()) {
                    Some(rpm) => {
                        pump.rpm = rpm;
                        pump.clockwise = clockwise;
                        self.pending.push_back(ACK);
                    }
                    None => self.pending.push_back(NAK),
                }
            }
            "V" => {
                if let Ok(revs) = arg.parse::<f64>() {
                    pump.armed_revs = revs;
                }
            }
            "G" => {
                if pump.rpm > 0.0 && pump.armed_revs > 0.0 {
                    let minutes = pump.armed_revs / pump.rpm;
                    let secs = minutes * 60.0 / speedup;
                    pump.running_until = Some(now + Duration::from_secs_f64(secs));
                    pump.armed_revs = 0.0;
                }
            }
            "H" => pump.running_until = None,
            "L" => pump.remote = false,
            "I" => {
                let control = if pump.remote { '1' } else { '0' };
                let run = if pump.is_running(now) { '3' } else { '1' };
                let reply = format!("P{address:02}I{control}00{run}0\r");
                self.pending.extend(reply.bytes());
            }
            _ => {}
        }
    }
}

impl Transport for SimulatedChain {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut st = self.lock();
        if st.closed {
            return Err(Box::new(HwError::Closed));
        }
        st.frames.push(bytes.to_vec());
        match bytes {
            [ENQ] => {
                if st.pumps.iter().any(|p| p.address.is_none()) {
                    st.pending.extend(b"P?\r");
                }
            }
            [STX, body @ .., CR] => {
                let payload = String::from_utf8_lossy(body).into_owned();
                tracing::trace!(frame = %payload, "sim frame");
                st.handle_frame(&payload);
            }
            _ => tracing::debug!(len = bytes.len(), "sim ignored unframed write"),
        }
        Ok(())
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        let mut st = self.lock();
        if st.closed {
            return Err(Box::new(HwError::Closed));
        }
        if st.fail_reads {
            return Err(Box::new(HwError::Serial("device disconnected".into())));
        }
        let n = max.min(st.pending.len());
        Ok(st.pending.drain(..n).collect())
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.lock().closed = true;
        Ok(())
    }
}
