//! Gate control for the M4 peripheral clock feeding the UART.
//!
//! Clock tree management proper (sources, dividers, rates) lives in the
//! platform's CRU driver. The UART only needs to gate its branch clock on
//! and off and to know the rate that branch runs at, so that is the whole
//! contract here.

use core::ptr;

const CRU_BASE: usize = 0x4000_4000;

/// Gating register for the C11 (M4 peripheral) branch clock.
const C11_GATE: usize = CRU_BASE + 0x48;
const C11_GATE_EN: u32 = 1 << 0;

/// Handle to the gated peripheral clock.
pub struct PeripheralClock {
    rate_hz: u32,
}

impl PeripheralClock {
    /// `rate_hz` is the C11 branch rate the platform has programmed; the
    /// UART uses it for baud divisor computation.
    pub fn new(rate_hz: u32) -> Self {
        PeripheralClock { rate_hz }
    }

    /// Ungates the branch clock.
    pub fn enable(&self) {
        unsafe {
            let gate = C11_GATE as *mut u32;
            ptr::write_volatile(gate, ptr::read_volatile(gate) | C11_GATE_EN);
        }
    }

    /// Gates the branch clock off.
    pub fn disable(&self) {
        unsafe {
            let gate = C11_GATE as *mut u32;
            ptr::write_volatile(gate, ptr::read_volatile(gate) & !C11_GATE_EN);
        }
    }

    /// Rate of the branch clock in Hz.
    pub fn rate(&self) -> u32 {
        self.rate_hz
    }
}
