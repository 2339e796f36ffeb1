//! Pump kinds held in the link registry.

use std::fmt;
use std::str::FromStr;

use crate::error::PumpError;

/// Registry key. Physical pumps are addressed by their chain position,
/// virtual pumps by a `VP<n>` name sharing the same keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PumpId {
    Physical(u8),
    Virtual(u16),
}

impl fmt::Display for PumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical(a) => write!(f, "{a}"),
            Self::Virtual(n) => write!(f, "VP{n}"),
        }
    }
}

impl FromStr for PumpId {
    type Err = PumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let upper = t.to_ascii_uppercase();
        if let Some(n) = upper.strip_prefix("VP") {
            return n
                .parse::<u16>()
                .map(Self::Virtual)
                .map_err(|_| PumpError::UnknownPump(t.to_string()));
        }
        t.parse::<u8>()
            .map(Self::Physical)
            .map_err(|_| PumpError::UnknownPump(t.to_string()))
    }
}

impl From<u8> for PumpId {
    fn from(a: u8) -> Self {
        Self::Physical(a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Cw,
    Ccw,
}

impl Direction {
    /// Sign character used in the speed command.
    pub fn sign(self) -> char {
        match self {
            Self::Cw => '+',
            Self::Ccw => '-',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cw => "cw",
            Self::Ccw => "ccw",
        })
    }
}

impl FromStr for Direction {
    type Err = PumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cw" => Ok(Self::Cw),
            "ccw" => Ok(Self::Ccw),
            _ => Err(PumpError::InvalidDirection(s.to_string())),
        }
    }
}

/// Bookkeeping for one addressed drive on the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalPump {
    pub address: u8,
    pub direction: Option<Direction>,
    /// 0 until a speed has been accepted.
    pub rpm: f64,
    pub vol_per_rev: Option<f64>,
    /// Revolutions commanded since the link opened.
    pub total_rev: f64,
}

impl PhysicalPump {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            direction: None,
            rpm: 0.0,
            vol_per_rev: None,
            total_rev: 0.0,
        }
    }

    pub fn has_speed(&self) -> bool {
        self.rpm > 0.0
    }

    pub fn set_vol_per_rev(&mut self, vol_per_rev: f64) -> Result<(), PumpError> {
        if !(vol_per_rev.is_finite() && vol_per_rev > 0.0) {
            return Err(PumpError::InvalidVolPerRev(vol_per_rev));
        }
        self.vol_per_rev = Some(vol_per_rev);
        Ok(())
    }

    /// Volume dispensed so far, if calibrated.
    pub fn total_volume(&self) -> Option<f64> {
        self.vol_per_rev.map(|v| v * self.total_rev)
    }

    pub fn vol_to_rev(&self, volume: f64) -> Result<f64, PumpError> {
        if !volume.is_finite() {
            return Err(PumpError::NotFinite("volume", volume));
        }
        if volume < 0.0 {
            return Err(PumpError::NegativeVolume(volume));
        }
        let v = self
            .vol_per_rev
            .ok_or(PumpError::NotCalibrated(self.address))?;
        Ok(volume / v)
    }
}

/// Two physical pumps sharing one dispense at `ratio : 1 - ratio`.
/// Holds addresses, so calibration changes on a constituent are seen at the
/// next dispense.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualPump {
    pub pump_1: u8,
    pub pump_2: u8,
    pub ratio: f64,
}

impl VirtualPump {
    pub fn new(pump_1: u8, pump_2: u8, ratio: f64) -> Result<Self, PumpError> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(PumpError::InvalidRatio(ratio));
        }
        Ok(Self {
            pump_1,
            pump_2,
            ratio,
        })
    }

    /// Volumes for (pump_1, pump_2).
    pub fn split(&self, volume: f64) -> (f64, f64) {
        (volume * self.ratio, volume * (1.0 - self.ratio))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pump {
    Physical(PhysicalPump),
    Virtual(VirtualPump),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", PumpId::Physical(1))]
    #[case(" 12 ", PumpId::Physical(12))]
    #[case("VP3", PumpId::Virtual(3))]
    #[case("vp10", PumpId::Virtual(10))]
    fn parses_ids(#[case] s: &str, #[case] want: PumpId) {
        assert_eq!(s.parse::<PumpId>().unwrap(), want);
        assert_eq!(want.to_string(), s.trim().to_ascii_uppercase());
    }

    #[test]
    fn rejects_garbage_ids() {
        assert!("pump".parse::<PumpId>().is_err());
        assert!("VP".parse::<PumpId>().is_err());
        assert!("-1".parse::<PumpId>().is_err());
    }

    #[test]
    fn direction_ignores_case() {
        assert_eq!("CW".parse::<Direction>().unwrap(), Direction::Cw);
        assert_eq!("ccw".parse::<Direction>().unwrap(), Direction::Ccw);
        assert_eq!(
            "up".parse::<Direction>(),
            Err(PumpError::InvalidDirection("up".into()))
        );
    }

    #[test]
    fn volume_conversion_needs_calibration() {
        let mut p = PhysicalPump::new(2);
        assert_eq!(p.vol_to_rev(5.0), Err(PumpError::NotCalibrated(2)));
        assert_eq!(p.total_volume(), None);
        p.set_vol_per_rev(2.5).unwrap();
        assert_eq!(p.vol_to_rev(5.0), Ok(2.0));
        assert_eq!(p.vol_to_rev(-1.0), Err(PumpError::NegativeVolume(-1.0)));
        assert!(p.set_vol_per_rev(0.0).is_err());
        assert!(matches!(p.vol_to_rev(f64::NAN), Err(PumpError::NotFinite("volume", _))));
        assert!(matches!(p.vol_to_rev(f64::INFINITY), Err(PumpError::NotFinite("volume", _))));
        p.total_rev = 4.0;
        assert_eq!(p.total_volume(), Some(10.0));
    }

    #[test]
    fn virtual_split_sums_to_request() {
        let vp = VirtualPump::new(1, 2, 0.25).unwrap();
        assert_eq!(vp.split(8.0), (2.0, 6.0));
        assert_eq!(VirtualPump::new(1, 2, 1.5), Err(PumpError::InvalidRatio(1.5)));
    }
}
