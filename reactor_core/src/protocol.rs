//! Line protocol for the daisy-chained pump drives.
//!
//! Every command is `STX + ASCII + CR`; the enquire byte goes out bare.
//! Numeric fields use the shortest decimal form with a fractional part,
//! zero-padded on the left (speed to 5 characters, revolutions to 8).

use crate::pump::Direction;
use crate::util::{decimal_text, zero_pad};

pub const STX: u8 = 0x02;
pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CR: u8 = 0x0D;

/// Wrap an ASCII payload in STX/CR.
pub fn frame(payload: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(STX);
    out.extend_from_slice(payload.as_bytes());
    out.push(CR);
    out
}

pub fn enquire() -> [u8; 1] {
    [ENQ]
}

pub fn assign_address(address: u8) -> Vec<u8> {
    frame(&format!("P{address:02}"))
}

/// `rpm` is expected already rounded to one decimal.
pub fn speed(address: u8, direction: Direction, rpm: f64) -> Vec<u8> {
    let rpm = zero_pad(&decimal_text(rpm), 5);
    frame(&format!("P{address:02}S{}{rpm}", direction.sign()))
}

/// `revolutions` is expected already rounded to two decimals.
pub fn revolutions(address: u8, revolutions: f64) -> Vec<u8> {
    let rev = zero_pad(&decimal_text(revolutions), 8);
    frame(&format!("P{address:02}V{rev}"))
}

pub fn run(address: u8) -> Vec<u8> {
    frame(&format!("P{address:02}G"))
}

pub fn halt(address: u8) -> Vec<u8> {
    frame(&format!("P{address:02}H"))
}

pub fn info(address: u8) -> Vec<u8> {
    frame(&format!("P{address:02}I"))
}

/// Hand the pump back to its front panel.
pub fn local(address: u8) -> Vec<u8> {
    frame(&format!("P{address:02}L"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn address_frames() {
        assert_eq!(assign_address(1), b"\x02P01\r");
        assert_eq!(run(12), b"\x02P12G\r");
        assert_eq!(halt(3), b"\x02P03H\r");
        assert_eq!(info(7), b"\x02P07I\r");
        assert_eq!(local(25), b"\x02P25L\r");
    }

    #[rstest]
    #[case(Direction::Cw, 450.0, "\x02P01S+450.0\r")]
    #[case(Direction::Ccw, 10.0, "\x02P01S-010.0\r")]
    #[case(Direction::Cw, 12.5, "\x02P01S+012.5\r")]
    fn speed_frames(#[case] dir: Direction, #[case] rpm: f64, #[case] want: &str) {
        assert_eq!(speed(1, dir, rpm), want.as_bytes());
    }

    #[rstest]
    #[case(12.5, "\x02P02V000012.5\r")]
    #[case(12.25, "\x02P02V00012.25\r")]
    #[case(3.0, "\x02P02V000003.0\r")]
    fn revolution_frames(#[case] rev: f64, #[case] want: &str) {
        assert_eq!(revolutions(2, rev), want.as_bytes());
    }
}
