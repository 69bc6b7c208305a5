//! Register-level backend for the on-chip UART.

use core::ptr;

use cortex_m::asm;
use cortex_m::peripheral::NVIC;

use crate::clocks::PeripheralClock;
use crate::pads::{self, PadConfig};
use crate::uart::registers::{
    Control, Flags, IntMask, LineControl, RegisterBlock, ICR_ALL, UART_BASE,
};
use crate::uart::UartOps;
use crate::Interrupt;

const INTR_CTRL_BASE: usize = 0x4000_4800;
/// Latched "other" interrupt detect register; the UART line is bit 0.
const OTHER_INTR: usize = INTR_CTRL_BASE + 0x30;
/// M4 enable mask for the "other" interrupt group.
const OTHER_INTR_EN_M4: usize = INTR_CTRL_BASE + 0x34;
const UART_INTR: u32 = 1 << 0;

/// Drives the memory-mapped UART, plus the clock gate, IOMUX, interrupt
/// controller and scheduler hooks the driver needs around it.
pub struct HwOps {
    clock: PeripheralClock,
    /// Platform hook for low-power-mode registration, if the firmware
    /// runs the LPM service.
    lpm_register: Option<fn(&'static str)>,
}

impl HwOps {
    /// Creates the backend for the single UART instance.
    ///
    /// # Safety
    ///
    /// The caller must ensure this is the only live handle to the UART
    /// register block.
    pub unsafe fn new(clock: PeripheralClock, lpm_register: Option<fn(&'static str)>) -> Self {
        HwOps { clock, lpm_register }
    }

    fn regs(&self) -> *mut RegisterBlock {
        UART_BASE as *mut RegisterBlock
    }

    fn flags(&self) -> Flags {
        let tfr = unsafe { ptr::read_volatile(ptr::addr_of!((*self.regs()).tfr)) };
        Flags::from_bits_truncate(tfr)
    }
}

impl UartOps for HwOps {
    fn read_data(&mut self) -> u32 {
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.regs()).dr)) }
    }

    fn write_data(&mut self, word: u32) {
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).dr), word) }
    }

    fn rx_fifo_empty(&self) -> bool {
        self.flags().contains(Flags::RX_FIFO_EMPTY)
    }

    fn tx_fifo_full(&self) -> bool {
        self.flags().contains(Flags::TX_FIFO_FULL)
    }

    fn tx_busy(&self) -> bool {
        self.flags().contains(Flags::BUSY)
    }

    fn set_divisors(&mut self, ibrd: u32, fbrd: u32) {
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).ibrd), ibrd);
            ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).fbrd), fbrd);
        }
    }

    fn set_line_control(&mut self, lcr_h: LineControl) {
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).lcr_h), lcr_h.bits()) }
    }

    fn set_control(&mut self, cr: Control) {
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).cr), cr.bits()) }
    }

    fn set_interrupt_mask(&mut self, imsc: IntMask) {
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).imsc), imsc.bits()) }
    }

    fn set_fifo_levels(&mut self, ifls: u32) {
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).ifls), ifls) }
    }

    fn clear_interrupts(&mut self) {
        unsafe {
            // RSR write clears the sticky receive error flags
            ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).rsr), 0);
            ptr::write_volatile(ptr::addr_of_mut!((*self.regs()).icr), ICR_ALL);
        }
    }

    fn enable_interrupt(&mut self) {
        unsafe {
            // route the UART line into the M4 "other" interrupt group
            ptr::write_volatile(OTHER_INTR as *mut u32, UART_INTR);
            let en = OTHER_INTR_EN_M4 as *mut u32;
            ptr::write_volatile(en, ptr::read_volatile(en) | UART_INTR);
            NVIC::unpend(Interrupt::Uart);
            NVIC::unmask(Interrupt::Uart);
        }
    }

    fn clear_pending_interrupt(&mut self) {
        unsafe {
            ptr::write_volatile(OTHER_INTR as *mut u32, UART_INTR);
        }
        NVIC::unpend(Interrupt::Uart);
    }

    fn clock_enable(&mut self) {
        self.clock.enable();
    }

    fn clock_disable(&mut self) {
        self.clock.disable();
    }

    fn clock_rate(&self) -> u32 {
        self.clock.rate()
    }

    fn configure_pad(&mut self, pad: &PadConfig) {
        pads::configure(pad);
    }

    fn register_lpm(&mut self, name: &'static str) {
        if let Some(register) = self.lpm_register {
            register(name);
        }
    }

    fn yield_task(&mut self) {
        asm::nop();
    }

    fn delay_tick(&mut self) {
        // one millisecond at the peripheral clock rate
        asm::delay(self.clock.rate() / 1000);
    }
}
