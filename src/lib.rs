#![no_std]

use embedded_hal as hal;

pub mod clocks;
pub mod pads;
pub mod uart;

pub mod prelude {
    pub use crate::hal::prelude::*;
}

use cortex_m::interrupt::InterruptNumber;

/// M4 interrupt lines this HAL touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Uart = 4,
}

unsafe impl InterruptNumber for Interrupt {
    fn number(self) -> u16 {
        self as u16
    }
}

pub use crate::clocks::PeripheralClock;
pub use crate::uart::{Config, Uart, UartId};
