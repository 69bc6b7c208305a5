//! Pad (pin-mux) configuration for the UART lines.
//!
//! The pad controller is a separate subsystem; this module carries the call
//! contract the UART driver relies on, plus the raw IOMUX write used by the
//! hardware backend.

use core::ptr;

/// Pad carrying the UART TXD line.
pub const PAD_UART_TXD: u8 = 44;
/// Pad carrying the UART RXD line.
pub const PAD_UART_RXD: u8 = 45;

/// Alternate-function selector routing UART_TXD onto pad 44.
pub const PAD44_FUNC_UART_TXD: u8 = 0x3;
/// Alternate-function selector routing UART_RXD onto pad 45.
pub const PAD45_FUNC_UART_RXD: u8 = 0x3;

/// Which controller drives the pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadControl {
    /// Always-on (A0) domain.
    A0,
    /// FPGA fabric.
    Fabric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadPull {
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStrength {
    Ma2,
    Ma4,
    Ma8,
    Ma12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlewRate {
    Slow,
    Fast,
}

/// One pad's mux and electrical setup.
#[derive(Debug, Clone, Copy)]
pub struct PadConfig {
    pub pin: u8,
    pub function: u8,
    pub control: PadControl,
    pub mode: PadMode,
    pub pull: PadPull,
    pub drive: DriveStrength,
    pub slew: SlewRate,
    pub schmitt_trigger: bool,
}

impl PadConfig {
    /// Output pad for the TX line: no pull, slow slew, 4 mA drive.
    pub fn uart_txd() -> Self {
        PadConfig {
            pin: PAD_UART_TXD,
            function: PAD44_FUNC_UART_TXD,
            control: PadControl::A0,
            mode: PadMode::Output,
            pull: PadPull::None,
            drive: DriveStrength::Ma4,
            slew: SlewRate::Slow,
            schmitt_trigger: false,
        }
    }

    /// Input pad for the RX line, same drive/slew/pull parameters.
    pub fn uart_rxd() -> Self {
        PadConfig {
            pin: PAD_UART_RXD,
            function: PAD45_FUNC_UART_RXD,
            control: PadControl::A0,
            mode: PadMode::Input,
            pull: PadPull::None,
            drive: DriveStrength::Ma4,
            slew: SlewRate::Slow,
            schmitt_trigger: false,
        }
    }
}

const IOMUX_BASE: usize = 0x4000_4c00;

// Pad control word layout: FUNC_SEL [2:0], CTRL_SEL [4:3], OEN bit 5,
// P [7:6], E [9:8], SR bit 10, REN bit 11, SMT bit 12.
const FUNC_SHIFT: u32 = 0;
const CTRL_SHIFT: u32 = 3;
const OUTPUT_EN: u32 = 1 << 5;
const PULL_SHIFT: u32 = 6;
const DRIVE_SHIFT: u32 = 8;
const SLEW_FAST: u32 = 1 << 10;
const INPUT_EN: u32 = 1 << 11;
const SCHMITT_EN: u32 = 1 << 12;

fn encode(config: &PadConfig) -> u32 {
    let mut word = (u32::from(config.function)) << FUNC_SHIFT;
    word |= match config.control {
        PadControl::A0 => 0,
        PadControl::Fabric => 1,
    } << CTRL_SHIFT;
    word |= match config.mode {
        PadMode::Output => OUTPUT_EN,
        PadMode::Input => INPUT_EN,
    };
    word |= match config.pull {
        PadPull::None => 0,
        PadPull::Up => 1,
        PadPull::Down => 2,
    } << PULL_SHIFT;
    word |= match config.drive {
        DriveStrength::Ma2 => 0,
        DriveStrength::Ma4 => 1,
        DriveStrength::Ma8 => 2,
        DriveStrength::Ma12 => 3,
    } << DRIVE_SHIFT;
    if let SlewRate::Fast = config.slew {
        word |= SLEW_FAST;
    }
    if config.schmitt_trigger {
        word |= SCHMITT_EN;
    }
    word
}

/// Programs one pad control word.
pub fn configure(config: &PadConfig) {
    let word = encode(config);
    unsafe {
        let reg = (IOMUX_BASE + 4 * usize::from(config.pin)) as *mut u32;
        ptr::write_volatile(reg, word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uart_pads_encode_direction_and_drive() {
        let tx = encode(&PadConfig::uart_txd());
        assert_eq!(tx & OUTPUT_EN, OUTPUT_EN);
        assert_eq!(tx & INPUT_EN, 0);
        assert_eq!((tx >> DRIVE_SHIFT) & 0b11, 1); // 4 mA
        assert_eq!(tx & SLEW_FAST, 0);

        let rx = encode(&PadConfig::uart_rxd());
        assert_eq!(rx & INPUT_EN, INPUT_EN);
        assert_eq!(rx & OUTPUT_EN, 0);
    }
}
