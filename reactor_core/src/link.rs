//! Serial link to a daisy chain of pumps plus the address registry.
//!
//! The link exclusively owns the transport. Physical and virtual pumps share
//! one registry; every operation resolves its target with a single lookup and
//! a match on the pump kind. Validation happens before any byte is written.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reactor_traits::Transport;

use crate::error::PumpError;
use crate::hw_error::map_boxed;
use crate::protocol;
use crate::pump::{Direction, PhysicalPump, Pump, PumpId, VirtualPump};
use crate::status::StatusReport;
use crate::util::round_to;

pub const RPM_MIN: f64 = reactor_config::RPM_MIN;
pub const RPM_MAX: f64 = reactor_config::RPM_MAX;
pub const MAX_ADDRESS: u8 = reactor_config::MAX_ADDRESS;

/// Read budgets and virtual-dispense pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub read_budget: usize,
    pub status_budget: usize,
    pub idle_poll: Duration,
    pub idle_wait_max: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            read_budget: 64,
            status_budget: 100,
            idle_poll: Duration::from_secs(1),
            idle_wait_max: Duration::from_secs(600),
        }
    }
}

/// Snapshot used by the status display.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpInfo {
    pub vol_per_rev: Option<f64>,
    pub total_volume: Option<f64>,
    pub rpm: f64,
    pub direction: Option<Direction>,
    pub status: StatusReport,
}

impl fmt::Display for PumpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vpr = self
            .vol_per_rev
            .map_or_else(|| "Unset".to_string(), |v| format!("{v}"));
        let total = self
            .total_volume
            .map_or_else(|| "Unknown".to_string(), |v| format!("{}", round_to(v, 3)));
        let dir = self
            .direction
            .map_or_else(|| "unset".to_string(), |d| d.to_string());
        write!(
            f,
            "vol/rev {vpr}, total {total} mL, {} rpm, {dir}, {}",
            self.rpm, self.status
        )
    }
}

pub struct PumpLink<T: Transport> {
    transport: T,
    registry: BTreeMap<PumpId, Pump>,
    settings: LinkSettings,
    closed: bool,
}

impl<T: Transport> fmt::Debug for PumpLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpLink")
            .field("pumps", &self.registry.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl<T: Transport> PumpLink<T> {
    /// Enumerate the chain: enquire, and while any pump still asks for an
    /// address, hand out the next one. Fails if a pump does not ACK its
    /// address or if nobody answered at all.
    pub fn discover(transport: T, settings: LinkSettings) -> Result<Self, PumpError> {
        let mut link = Self {
            transport,
            registry: BTreeMap::new(),
            settings,
            closed: false,
        };
        if let Err(e) = link.enumerate() {
            link.close_quietly();
            return Err(e);
        }
        if link.registry.is_empty() {
            link.close_quietly();
            return Err(PumpError::NoPumps);
        }
        tracing::info!(pumps = link.registry.len(), "pump chain discovered");
        Ok(link)
    }

    fn enumerate(&mut self) -> Result<(), PumpError> {
        loop {
            self.write(&protocol::enquire())?;
            let reply = self.read(self.settings.read_budget)?;
            if !reply.contains(&b'?') {
                return Ok(());
            }
            let next = self.registry.len() + 1;
            let address = u8::try_from(next)
                .ok()
                .filter(|a| *a <= MAX_ADDRESS)
                .ok_or(PumpError::TooManyPumps(MAX_ADDRESS))?;
            self.write(&protocol::assign_address(address))?;
            let reply = self.read(self.settings.read_budget)?;
            if reply != [protocol::ACK] {
                return Err(PumpError::AssignmentRejected { address, reply });
            }
            tracing::debug!(address, "pump acknowledged address");
            self.registry
                .insert(PumpId::Physical(address), Pump::Physical(PhysicalPump::new(address)));
        }
    }

    pub fn settings(&self) -> LinkSettings {
        self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Every registered pump, physical first, in address order.
    pub fn pumps(&self) -> impl Iterator<Item = (&PumpId, &Pump)> {
        self.registry.iter()
    }

    pub fn get(&self, id: PumpId) -> Option<&Pump> {
        self.registry.get(&id)
    }

    pub fn physical_addresses(&self) -> Vec<u8> {
        self.registry
            .keys()
            .filter_map(|id| match id {
                PumpId::Physical(a) => Some(*a),
                PumpId::Virtual(_) => None,
            })
            .collect()
    }

    /// Resolve `address` to a physical pump or name why it cannot be used.
    pub fn physical(&self, address: u8) -> Result<&PhysicalPump, PumpError> {
        match self.registry.get(&PumpId::Physical(address)) {
            Some(Pump::Physical(p)) => Ok(p),
            Some(Pump::Virtual(_)) => Err(PumpError::VirtualNotAllowed(address.to_string())),
            None => Err(PumpError::UnknownPump(address.to_string())),
        }
    }

    fn physical_mut(&mut self, address: u8) -> Result<&mut PhysicalPump, PumpError> {
        match self.registry.get_mut(&PumpId::Physical(address)) {
            Some(Pump::Physical(p)) => Ok(p),
            Some(Pump::Virtual(_)) => Err(PumpError::VirtualNotAllowed(address.to_string())),
            None => Err(PumpError::UnknownPump(address.to_string())),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), PumpError> {
        if self.closed {
            return Err(PumpError::Transport("link is closed".into()));
        }
        tracing::trace!(frame = ?String::from_utf8_lossy(bytes), "tx");
        self.transport.write(bytes).map_err(map_boxed)
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, PumpError> {
        let reply = self.transport.read(max).map_err(map_boxed)?;
        tracing::trace!(reply = ?String::from_utf8_lossy(&reply), "rx");
        Ok(reply)
    }

    /// Set direction and speed. RPM is rounded to one decimal. A NAK means
    /// the pump is turning the other way: halt it and try once more.
    pub fn assign_speed(
        &mut self,
        address: u8,
        direction: Direction,
        rpm: f64,
    ) -> Result<(), PumpError> {
        self.physical(address)?;
        // NaN fails the range check too
        if !(RPM_MIN..=RPM_MAX).contains(&rpm) {
            return Err(PumpError::RpmOutOfRange(rpm));
        }
        let rpm = round_to(rpm, 1);
        let cmd = protocol::speed(address, direction, rpm);

        self.write(&cmd)?;
        let reply = self.read(self.settings.read_budget)?;
        if reply.contains(&protocol::NAK) {
            tracing::debug!(address, "speed refused while running, halting and retrying");
            self.halt(address)?;
            self.write(&cmd)?;
            let reply = self.read(self.settings.read_budget)?;
            if reply.contains(&protocol::NAK) {
                return Err(PumpError::SpeedRejected(address));
            }
        }

        let pump = self.physical_mut(address)?;
        pump.direction = Some(direction);
        pump.rpm = rpm;
        tracing::info!(address, %direction, rpm, "speed assigned");
        Ok(())
    }

    /// Queue `revolutions` (rounded to two decimals) and optionally start.
    /// Exactly zero after rounding writes nothing.
    pub fn assign_revolutions(
        &mut self,
        address: u8,
        revolutions: f64,
        run: bool,
    ) -> Result<(), PumpError> {
        let pump = self.physical(address)?;
        if !revolutions.is_finite() {
            return Err(PumpError::NotFinite("revolutions", revolutions));
        }
        if revolutions < 0.0 {
            return Err(PumpError::NegativeRevolutions(revolutions));
        }
        let rev = round_to(revolutions, 2);
        if rev == 0.0 {
            return Ok(());
        }
        if run && !pump.has_speed() {
            return Err(PumpError::SpeedNotAssigned(address));
        }

        self.write(&protocol::revolutions(address, rev))?;
        self.physical_mut(address)?.total_rev += rev;
        tracing::debug!(address, rev, run, "revolutions assigned");
        if run {
            self.run(address)?;
        }
        Ok(())
    }

    pub fn run(&mut self, address: u8) -> Result<(), PumpError> {
        if !self.physical(address)?.has_speed() {
            return Err(PumpError::SpeedNotAssigned(address));
        }
        self.write(&protocol::run(address))
    }

    pub fn halt(&mut self, address: u8) -> Result<(), PumpError> {
        self.physical(address)?;
        self.write(&protocol::halt(address))
    }

    /// Ask the pump for its info digits. Only an invalid address is an
    /// error; transport trouble and unreadable replies become sentinels.
    pub fn query_status(&mut self, address: u8) -> Result<StatusReport, PumpError> {
        self.physical(address)?;
        match self.info_exchange(address) {
            Ok(bytes) => Ok(StatusReport::decode(&bytes)),
            Err(e) => {
                tracing::warn!(address, error = %e, "status query failed");
                Ok(StatusReport::Disconnected)
            }
        }
    }

    fn info_exchange(&mut self, address: u8) -> Result<Vec<u8>, PumpError> {
        let budget = self.settings.status_budget;
        // drain anything stale so the reply we decode is ours
        let _ = self.read(budget)?;
        self.write(&protocol::info(address))?;
        self.read(budget)
    }

    pub fn full_info(&mut self, address: u8) -> Result<PumpInfo, PumpError> {
        let p = self.physical(address)?;
        let (vol_per_rev, total_volume, rpm, direction) =
            (p.vol_per_rev, p.total_volume(), p.rpm, p.direction);
        let status = self.query_status(address)?;
        Ok(PumpInfo {
            vol_per_rev,
            total_volume,
            rpm,
            direction,
            status,
        })
    }

    pub fn set_vol_per_rev(&mut self, address: u8, vol_per_rev: f64) -> Result<(), PumpError> {
        self.physical_mut(address)?.set_vol_per_rev(vol_per_rev)?;
        tracing::info!(address, vol_per_rev, "vol/rev set");
        Ok(())
    }

    /// Register a virtual pump over two physical ones. Its key is
    /// `VP<registry size + 1>`.
    pub fn add_virtual(&mut self, pump_1: u8, pump_2: u8, ratio: f64) -> Result<PumpId, PumpError> {
        self.physical(pump_1)?;
        self.physical(pump_2)?;
        let vp = VirtualPump::new(pump_1, pump_2, ratio)?;
        let n = u16::try_from(self.registry.len() + 1)
            .map_err(|_| PumpError::TooManyPumps(MAX_ADDRESS))?;
        let id = PumpId::Virtual(n);
        self.registry.insert(id, Pump::Virtual(vp));
        tracing::info!(%id, pump_1, pump_2, ratio, "virtual pump added");
        Ok(id)
    }

    /// Reassign the constituents and ratio of an existing virtual pump.
    pub fn set_virtual(
        &mut self,
        id: PumpId,
        pump_1: u8,
        pump_2: u8,
        ratio: f64,
    ) -> Result<(), PumpError> {
        match self.registry.get(&id) {
            Some(Pump::Virtual(_)) => {}
            Some(Pump::Physical(_)) => return Err(PumpError::NotVirtual(id.to_string())),
            None => return Err(PumpError::UnknownPump(id.to_string())),
        }
        self.physical(pump_1)?;
        self.physical(pump_2)?;
        let vp = VirtualPump::new(pump_1, pump_2, ratio)?;
        self.registry.insert(id, Pump::Virtual(vp));
        tracing::info!(%id, pump_1, pump_2, ratio, "virtual pump reassigned");
        Ok(())
    }

    /// Dispense `volume` mL from a physical or virtual pump.
    ///
    /// A virtual pump starts its first constituent, arms the second without
    /// starting it, waits for the first to stop running, then starts the
    /// second, so the pair never runs at once.
    pub async fn dispense_volume(&mut self, id: PumpId, volume: f64) -> Result<(), PumpError> {
        let pump = self
            .registry
            .get(&id)
            .ok_or_else(|| PumpError::UnknownPump(id.to_string()))?;
        match *pump {
            Pump::Physical(ref p) => {
                let address = p.address;
                let rev = p.vol_to_rev(volume)?;
                tracing::info!(pump = %id, volume, rev, "dispense");
                self.assign_revolutions(address, rev, true)
            }
            Pump::Virtual(vp) => {
                let (vol_1, vol_2) = vp.split(volume);
                let p1 = self.physical(vp.pump_1)?;
                let rev_1 = p1.vol_to_rev(vol_1)?;
                let p2 = self.physical(vp.pump_2)?;
                let rev_2 = p2.vol_to_rev(vol_2)?;
                let second_moves = round_to(rev_2, 2) != 0.0;
                if second_moves && !p2.has_speed() {
                    return Err(PumpError::SpeedNotAssigned(vp.pump_2));
                }
                tracing::info!(pump = %id, volume, rev_1, rev_2, "paired dispense");

                self.assign_revolutions(vp.pump_1, rev_1, true)?;
                self.assign_revolutions(vp.pump_2, rev_2, false)?;
                if second_moves {
                    self.wait_until_idle(vp.pump_1).await?;
                    self.run(vp.pump_2)?;
                }
                Ok(())
            }
        }
    }

    async fn wait_until_idle(&mut self, address: u8) -> Result<(), PumpError> {
        let started = tokio::time::Instant::now();
        loop {
            if !self.query_status(address)?.is_running() {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= self.settings.idle_wait_max {
                let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                return Err(PumpError::IdleWaitExceeded { address, waited_ms });
            }
            tokio::time::sleep(self.settings.idle_poll).await;
        }
    }

    /// Return every physical pump to local control, then release the port.
    /// Idempotent; safe after a partial discovery.
    pub fn close(&mut self) -> Result<(), PumpError> {
        if self.closed {
            return Ok(());
        }
        for address in self.physical_addresses() {
            if let Err(e) = self.write(&protocol::local(address)) {
                tracing::warn!(address, error = %e, "could not return pump to local control");
            }
        }
        self.closed = true;
        self.transport.close().map_err(map_boxed)?;
        tracing::info!("pump link closed");
        Ok(())
    }

    fn close_quietly(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "closing pump link");
        }
    }
}

impl<T: Transport> Drop for PumpLink<T> {
    fn drop(&mut self) {
        self.close_quietly();
    }
}
