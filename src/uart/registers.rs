//! UART register block and bit definitions.
//!
//! The EOS S3 UART is an ARM PL011 derivative. Offsets and bit positions
//! follow the PL011 register map.

use bitflags::bitflags;

/// Base address of the UART register block.
pub const UART_BASE: usize = 0x4001_0000;

/// Memory-mapped UART registers.
#[repr(C)]
pub struct RegisterBlock {
    /// 0x00: data (read pops the RX FIFO, write pushes the TX FIFO)
    pub dr: u32,
    /// 0x04: receive status / error clear
    pub rsr: u32,
    _reserved0: [u32; 4],
    /// 0x18: flag register
    pub tfr: u32,
    _reserved1: u32,
    /// 0x20: IrDA low-power counter
    pub ilpr: u32,
    /// 0x24: integer baud rate divisor
    pub ibrd: u32,
    /// 0x28: fractional baud rate divisor
    pub fbrd: u32,
    /// 0x2c: line control
    pub lcr_h: u32,
    /// 0x30: control
    pub cr: u32,
    /// 0x34: interrupt FIFO level select
    pub ifls: u32,
    /// 0x38: interrupt mask set/clear
    pub imsc: u32,
    /// 0x3c: raw interrupt status
    pub ris: u32,
    /// 0x40: masked interrupt status
    pub mis: u32,
    /// 0x44: interrupt clear
    pub icr: u32,
}

bitflags! {
    /// Flag register (TFR) bits.
    pub struct Flags: u32 {
        const BUSY = 1 << 3;
        const RX_FIFO_EMPTY = 1 << 4;
        const TX_FIFO_FULL = 1 << 5;
        const RX_FIFO_FULL = 1 << 6;
        const TX_FIFO_EMPTY = 1 << 7;
    }
}

bitflags! {
    /// Per-word error flags carried in bits 8..=11 of a DR read.
    pub struct RxErrors: u32 {
        const FRAMING = 1 << 8;
        const PARITY = 1 << 9;
        const BREAK = 1 << 10;
        const OVERRUN = 1 << 11;
    }
}

bitflags! {
    /// Line control (LCR_H) bits.
    pub struct LineControl: u32 {
        const SEND_BREAK = 1 << 0;
        const PARITY_ENABLE = 1 << 1;
        const EVEN_PARITY = 1 << 2;
        const TWO_STOP_BITS = 1 << 3;
        const FIFO_ENABLE = 1 << 4;
        const WLEN_6 = 0b01 << 5;
        const WLEN_7 = 0b10 << 5;
        const WLEN_8 = 0b11 << 5;
        const STICK_PARITY = 1 << 7;
    }
}

bitflags! {
    /// Control (CR) bits.
    pub struct Control: u32 {
        const ENABLE = 1 << 0;
        const LOOPBACK = 1 << 7;
        const TX_ENABLE = 1 << 8;
        const RX_ENABLE = 1 << 9;
        const RTS_ENABLE = 1 << 14;
        const CTS_ENABLE = 1 << 15;
    }
}

bitflags! {
    /// Interrupt mask (IMSC) bits the driver uses.
    pub struct IntMask: u32 {
        const RX = 1 << 4;
        const TX = 1 << 5;
        const RX_TIMEOUT = 1 << 6;
    }
}

/// All eleven interrupt sources, for ICR writes.
pub const ICR_ALL: u32 = 0x7ff;

/// RX FIFO threshold 1/8 full, TX threshold 1/2 full.
pub const IFLS_RX_1_8_TX_1_2: u32 = (0b000 << 3) | 0b010;
