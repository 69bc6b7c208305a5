//! HAL interface to the UART peripheral.
//!
//! The driver is a single context object owned by the firmware; every entry
//! point, including the receive interrupt and the low-power-mode broadcast,
//! is a method on it. Hardware access and platform services go through the
//! [`UartOps`] trait, implemented for the real peripheral by [`HwOps`].

use core::fmt;

use void::Void;

use crate::pads::PadConfig;

pub mod buffer;
pub mod hw;
pub mod registers;

pub use self::buffer::{RxBufferKind, RX_BUFFER_SIZE};
pub use self::hw::HwOps;
pub use self::registers::{Control, IntMask, LineControl, RxErrors};

use self::buffer::RxBuffer;
use self::registers::IFLS_RX_1_8_TX_1_2;

/// Identifies the UART a call is directed at.
///
/// `Console` aliases the hardware UART; `Fpga` routes to the optional
/// soft UART in the FPGA fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartId {
    Hw,
    Console,
    Fpga,
}

/// Symbolic baud rates the peripheral supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baudrate {
    Baud2400,
    Baud4800,
    Baud9600,
    Baud19200,
    Baud38400,
    Baud57600,
    Baud115200,
    Baud230400,
    Baud460800,
    Baud921600,
}

impl Baudrate {
    pub const ALL: [Baudrate; 10] = [
        Baudrate::Baud2400,
        Baudrate::Baud4800,
        Baudrate::Baud9600,
        Baudrate::Baud19200,
        Baudrate::Baud38400,
        Baudrate::Baud57600,
        Baudrate::Baud115200,
        Baudrate::Baud230400,
        Baudrate::Baud460800,
        Baudrate::Baud921600,
    ];

    pub fn bps(self) -> u32 {
        match self {
            Baudrate::Baud2400 => 2_400,
            Baudrate::Baud4800 => 4_800,
            Baudrate::Baud9600 => 9_600,
            Baudrate::Baud19200 => 19_200,
            Baudrate::Baud38400 => 38_400,
            Baudrate::Baud57600 => 57_600,
            Baudrate::Baud115200 => 115_200,
            Baudrate::Baud230400 => 230_400,
            Baudrate::Baud460800 => 460_800,
            Baudrate::Baud921600 => 921_600,
        }
    }

    /// Exact-match normalization of a numeric rate.
    pub fn from_bps(bps: u32) -> Option<Baudrate> {
        match bps {
            2_400 => Some(Baudrate::Baud2400),
            4_800 => Some(Baudrate::Baud4800),
            9_600 => Some(Baudrate::Baud9600),
            19_200 => Some(Baudrate::Baud19200),
            38_400 => Some(Baudrate::Baud38400),
            57_600 => Some(Baudrate::Baud57600),
            115_200 => Some(Baudrate::Baud115200),
            230_400 => Some(Baudrate::Baud230400),
            460_800 => Some(Baudrate::Baud460800),
            921_600 => Some(Baudrate::Baud921600),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordLength {
    Five,
    Six,
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Operating mode of the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Disabled,
    Tx,
    Rx,
    TxRx,
}

impl Mode {
    fn tx_capable(self) -> bool {
        matches!(self, Mode::Tx | Mode::TxRx)
    }

    fn rx_capable(self) -> bool {
        matches!(self, Mode::Rx | Mode::TxRx)
    }
}

/// UART configuration, cached by the driver on `init`.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub baudrate: Baudrate,
    pub word_length: WordLength,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub mode: Mode,
    /// RTS/CTS hardware flow control.
    pub flow_control: bool,
    /// Interrupt-driven receive; off means polled register reads.
    pub rx_interrupt: bool,
    /// Whether this instance participates in low-power-mode transitions.
    pub lpm_enabled: bool,
    pub rx_buffer: RxBufferKind,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            baudrate: Baudrate::Baud115200,
            word_length: WordLength::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            mode: Mode::TxRx,
            flow_control: false,
            rx_interrupt: false,
            lpm_enabled: false,
            rx_buffer: RxBufferKind::Queue,
        }
    }
}

/// UART receive error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The instance has no active configuration.
    NotEnabled,
}

/// Diagnostic counters.
///
/// Maintained without atomicity guarantees between interrupt and task
/// context; treat them as indicative, not exact. All counters wrap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub rx_bytes: u32,
    pub overrun_errors: u32,
    pub framing_errors: u32,
    pub parity_errors: u32,
    pub break_errors: u32,
    pub lpm_entries: u32,
    pub bad_tx_chars: u32,
}

/// Low-power-mode broadcast notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpmState {
    Enter,
    Exit,
}

/// Hardware and platform services the driver relies on.
///
/// One implementation ([`HwOps`]) drives the real peripheral. The non
/// register methods mirror the platform's clock, pad, interrupt-controller,
/// LPM-registry and scheduler subsystems, which live outside this crate and
/// keep fixed call contracts here.
pub trait UartOps {
    /// Reads the data register, popping one word (data in bits 0..=7 plus
    /// error flags in bits 8..=11) from the receive FIFO.
    fn read_data(&mut self) -> u32;
    /// Writes one byte into the transmit FIFO.
    fn write_data(&mut self, word: u32);
    fn rx_fifo_empty(&self) -> bool;
    fn tx_fifo_full(&self) -> bool;
    fn tx_busy(&self) -> bool;
    fn set_divisors(&mut self, ibrd: u32, fbrd: u32);
    fn set_line_control(&mut self, lcr_h: LineControl);
    fn set_control(&mut self, cr: Control);
    fn set_interrupt_mask(&mut self, imsc: IntMask);
    fn set_fifo_levels(&mut self, ifls: u32);
    /// Clears receive status and every pending peripheral interrupt source.
    fn clear_interrupts(&mut self);
    /// Routes the UART line to the core and unmasks it.
    fn enable_interrupt(&mut self);
    fn clear_pending_interrupt(&mut self);
    fn clock_enable(&mut self);
    fn clock_disable(&mut self);
    fn clock_rate(&self) -> u32;
    fn configure_pad(&mut self, pad: &PadConfig);
    /// Registers the driver with the low-power-mode broadcast service.
    fn register_lpm(&mut self, name: &'static str);
    /// Cooperative yield to any runnable task.
    fn yield_task(&mut self);
    /// Sleeps for one scheduler tick.
    fn delay_tick(&mut self);
}

/// Byte I/O contract of the FPGA-backed soft UART.
pub trait SoftUart {
    fn init(&mut self, config: &Config);
    fn tx_raw(&mut self, byte: u8);
    fn rx(&mut self) -> Result<u8, Error>;
    fn rx_wait(&mut self, ticks: u32) -> Option<u8>;
    fn rx_available(&self) -> usize;
}

/// Placeholder for builds whose FPGA image carries no soft UART.
pub struct NoSoftUart;

impl SoftUart for NoSoftUart {
    fn init(&mut self, _config: &Config) {}
    fn tx_raw(&mut self, _byte: u8) {}
    fn rx(&mut self) -> Result<u8, Error> {
        Err(Error::NotEnabled)
    }
    fn rx_wait(&mut self, _ticks: u32) -> Option<u8> {
        None
    }
    fn rx_available(&self) -> usize {
        0
    }
}

/// Computes the integer and fractional baud rate divisors for the fixed
/// 16x oversampling ratio.
///
/// The fractional part is computed in floating point and scaled to the
/// 6-bit FBRD range with a 0.5 bias before truncation.
pub fn baud_divisors(clock_hz: u32, baudrate: Baudrate) -> (u32, u32) {
    let divider = baudrate.bps() * 16;
    let ibrd = clock_hz / divider;
    let frac = clock_hz as f32 / divider as f32 - ibrd as f32;
    let fbrd = (frac * 64.0 + 0.5) as u32;
    (ibrd, fbrd)
}

/// Composes the line-control and control register masks from `config`.
///
/// `Mode::Disabled` aborts the whole update; the caller keeps whatever
/// masks it derived last.
fn build_register_masks(config: &Config) -> Option<(LineControl, Control)> {
    let mut lcr_h = match config.word_length {
        WordLength::Five => LineControl::empty(),
        WordLength::Six => LineControl::WLEN_6,
        WordLength::Seven => LineControl::WLEN_7,
        WordLength::Eight => LineControl::WLEN_8,
    };
    if let StopBits::Two = config.stop_bits {
        lcr_h |= LineControl::TWO_STOP_BITS;
    }
    match config.parity {
        Parity::None => {}
        Parity::Even => lcr_h |= LineControl::PARITY_ENABLE | LineControl::EVEN_PARITY,
        Parity::Odd => lcr_h |= LineControl::PARITY_ENABLE,
    }

    let mut cr = match config.mode {
        Mode::Disabled => return None,
        Mode::Tx => Control::TX_ENABLE,
        Mode::Rx => Control::RX_ENABLE,
        Mode::TxRx => Control::TX_ENABLE | Control::RX_ENABLE,
    };
    if config.flow_control {
        cr |= Control::RTS_ENABLE | Control::CTS_ENABLE;
    }
    Some((lcr_h, cr))
}

/// Caller-supplied configuration together with the register values derived
/// from it. The derived fields are only ever rewritten as a set, so a
/// register write never mixes divisors and masks from different configs.
struct HwState {
    config: Config,
    ibrd: u32,
    fbrd: u32,
    lcr_h: LineControl,
    cr: Control,
}

impl HwState {
    fn new(config: Config) -> Self {
        HwState {
            config,
            ibrd: 0,
            fbrd: 0,
            lcr_h: LineControl::empty(),
            cr: Control::empty(),
        }
    }

    fn update_divisors(&mut self, clock_hz: u32) {
        let (ibrd, fbrd) = baud_divisors(clock_hz, self.config.baudrate);
        self.ibrd = ibrd;
        self.fbrd = fbrd;
    }

    fn update_register_masks(&mut self) {
        if let Some((lcr_h, cr)) = build_register_masks(&self.config) {
            self.lcr_h = lcr_h;
            self.cr = cr;
        }
    }
}

/// Interface to the UART.
///
/// There is exactly one hardware UART; construct one `Uart` at startup and
/// keep it for the life of the process. The instance is considered enabled
/// once `init` has cached a configuration for it.
pub struct Uart<T, F = NoSoftUart> {
    ops: T,
    soft: Option<F>,
    hw: Option<HwState>,
    rx: Option<RxBuffer>,
    in_lpm: bool,
    lpm_registered: bool,
    stats: Stats,
}

impl<T> Uart<T>
where
    T: UartOps,
{
    pub fn new(ops: T) -> Self {
        Uart {
            ops,
            soft: None,
            hw: None,
            rx: None,
            in_lpm: false,
            lpm_registered: false,
            stats: Stats::default(),
        }
    }
}

impl<T, F> Uart<T, F>
where
    T: UartOps,
    F: SoftUart,
{
    pub fn with_soft_uart(ops: T, soft: F) -> Self {
        Uart {
            ops,
            soft: Some(soft),
            hw: None,
            rx: None,
            in_lpm: false,
            lpm_registered: false,
            stats: Stats::default(),
        }
    }

    /// Configures clock, registers and pads, and arms the receive interrupt
    /// if requested. Ignores ids other than `Hw` and `Fpga`.
    pub fn init(&mut self, id: UartId, config: Config) {
        match id {
            UartId::Fpga => {
                if let Some(soft) = self.soft.as_mut() {
                    soft.init(&config);
                }
                return;
            }
            UartId::Console => return,
            UartId::Hw => {}
        }

        let mut hw = HwState::new(config);
        self.ops.clock_enable();
        hw.update_divisors(self.ops.clock_rate());
        hw.update_register_masks();

        self.quiesce();

        if config.mode.tx_capable() {
            self.ops.configure_pad(&PadConfig::uart_txd());
        }
        if config.mode.rx_capable() {
            self.ops.configure_pad(&PadConfig::uart_rxd());
        }

        let mut imsc = IntMask::empty();
        if config.rx_interrupt {
            // the receive buffer is created once, on the first
            // interrupt-mode init, and never torn down
            if self.rx.is_none() {
                self.rx = Some(RxBuffer::new(config.rx_buffer));
            }
            self.ops.enable_interrupt();
            imsc = IntMask::RX | IntMask::RX_TIMEOUT;
        }

        self.ops.set_divisors(hw.ibrd, hw.fbrd);
        self.ops.set_line_control(hw.lcr_h | LineControl::FIFO_ENABLE);
        self.ops.set_interrupt_mask(imsc);
        self.ops.set_fifo_levels(IFLS_RX_1_8_TX_1_2);
        self.ops.set_control(hw.cr | Control::ENABLE);
        self.hw = Some(hw);

        if !self.lpm_registered {
            self.lpm_registered = true;
            self.ops.register_lpm("UART");
        }
    }

    /// Reprograms the baud rate without touching pads or LPM registration.
    ///
    /// `bps` is normalized to a supported rate by exact match; unknown
    /// values keep the previous baud in place and the reprogram proceeds
    /// with unchanged divisors.
    pub fn set_baud(&mut self, id: UartId, bps: u32) {
        if id != UartId::Hw {
            return;
        }
        let rate = self.ops.clock_rate();
        let (ibrd, fbrd, lcr_h, cr, rx_interrupt) = match self.hw.as_mut() {
            Some(hw) => {
                if let Some(baudrate) = Baudrate::from_bps(bps) {
                    hw.config.baudrate = baudrate;
                }
                hw.update_divisors(rate);
                (hw.ibrd, hw.fbrd, hw.lcr_h, hw.cr, hw.config.rx_interrupt)
            }
            None => return,
        };

        self.ops.set_control(Control::empty());
        self.ops.set_line_control(LineControl::empty());

        let imsc = if rx_interrupt {
            IntMask::RX | IntMask::RX_TIMEOUT
        } else {
            IntMask::empty()
        };
        self.ops.set_divisors(ibrd, fbrd);
        self.ops.set_line_control(lcr_h | LineControl::FIFO_ENABLE);
        self.ops.set_interrupt_mask(imsc);
        self.ops.set_fifo_levels(IFLS_RX_1_8_TX_1_2);
        self.ops.set_control(cr | Control::ENABLE);
    }

    /// Receive interrupt entry point, invoked from the platform's vector
    /// dispatch. Drains the hardware FIFO and never blocks; bytes that do
    /// not fit in the receive buffer are dropped.
    pub fn handle_interrupt(&mut self, id: UartId) {
        // RX interrupts only exist for the hardware UART
        if id != UartId::Hw {
            return;
        }
        let mut enqueued = false;
        while !self.ops.rx_fifo_empty() {
            let word = self.ops.read_data();
            let errors = RxErrors::from_bits_truncate(word);
            if errors.contains(RxErrors::OVERRUN) {
                self.stats.overrun_errors = self.stats.overrun_errors.wrapping_add(1);
            }
            if errors.contains(RxErrors::FRAMING) {
                self.stats.framing_errors = self.stats.framing_errors.wrapping_add(1);
            }
            if errors.contains(RxErrors::PARITY) {
                self.stats.parity_errors = self.stats.parity_errors.wrapping_add(1);
            }
            if errors.contains(RxErrors::BREAK) {
                self.stats.break_errors = self.stats.break_errors.wrapping_add(1);
            }
            self.stats.rx_bytes = self.stats.rx_bytes.wrapping_add(1);
            if let Some(rx) = self.rx.as_mut() {
                if rx.push(word as u8) {
                    enqueued = true;
                }
            }
        }
        if enqueued {
            self.ops.yield_task();
        }
    }

    /// Blocking read of one byte. There is no timeout and no cancellation;
    /// use [`Uart::rx_wait`] for a bounded wait.
    pub fn rx(&mut self, id: UartId) -> Result<u8, Error> {
        if id == UartId::Fpga {
            return match self.soft.as_mut() {
                Some(soft) => soft.rx(),
                None => Err(Error::NotEnabled),
            };
        }
        if !self.is_hw_enabled(id) {
            return Err(Error::NotEnabled);
        }
        loop {
            if self.interrupt_mode() {
                if let Some(byte) = self.rx.as_mut().and_then(|rx| rx.pop()) {
                    return Ok(byte);
                }
            } else if !self.ops.rx_fifo_empty() {
                return Ok((self.ops.read_data() & 0xff) as u8);
            }
            self.ops.delay_tick();
            self.ops.yield_task();
        }
    }

    /// Bounded wait for receive data, up to `ticks` scheduler ticks.
    ///
    /// This peeks: the byte stays buffered and a subsequent [`Uart::rx`]
    /// returns the same value. In polled mode the hardware FIFO cannot be
    /// peeked, so availability is reported as `Some(0)` and the caller
    /// must consume through `rx`. `None` means nothing arrived in time.
    pub fn rx_wait(&mut self, id: UartId, ticks: u32) -> Option<u8> {
        if id == UartId::Fpga {
            return match self.soft.as_mut() {
                Some(soft) => soft.rx_wait(ticks),
                None => None,
            };
        }
        if !self.is_hw_enabled(id) {
            return None;
        }
        let mut remaining = ticks;
        loop {
            if self.interrupt_mode() {
                if let Some(byte) = self.rx.as_ref().and_then(|rx| rx.peek()) {
                    return Some(byte);
                }
            } else if !self.ops.rx_fifo_empty() {
                return Some(0);
            }
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            self.ops.delay_tick();
        }
    }

    /// Number of bytes that can be read without blocking.
    pub fn rx_available(&self, id: UartId) -> usize {
        if id == UartId::Fpga {
            return self.soft.as_ref().map_or(0, |soft| soft.rx_available());
        }
        if !self.is_hw_enabled(id) {
            return 0;
        }
        if self.interrupt_mode() {
            self.rx.as_ref().map_or(0, |rx| rx.len())
        } else if self.ops.rx_fifo_empty() {
            0
        } else {
            1
        }
    }

    /// Blocking fill of `buf`.
    pub fn rx_raw_buf(&mut self, id: UartId, buf: &mut [u8]) -> Result<(), Error> {
        for slot in buf.iter_mut() {
            *slot = self.rx(id)?;
        }
        Ok(())
    }

    /// Transmits one byte as-is, spinning while the TX FIFO is full.
    ///
    /// A disabled instance drops the byte silently. Bytes outside newline,
    /// carriage return, backspace and printable ASCII bump a diagnostic
    /// counter but are transmitted anyway.
    pub fn tx_raw(&mut self, id: UartId, byte: u8) {
        if id == UartId::Fpga {
            if let Some(soft) = self.soft.as_mut() {
                soft.tx_raw(byte);
            }
            return;
        }
        if !self.is_hw_enabled(id) {
            return;
        }
        self.note_tx_byte(byte);
        while self.ops.tx_fifo_full() {
            core::hint::spin_loop();
        }
        self.ops.write_data(u32::from(byte));
    }

    /// Transmits one byte with newline expanded to CRLF.
    pub fn tx(&mut self, id: UartId, byte: u8) {
        if byte == b'\n' {
            self.tx_raw(id, b'\r');
        }
        self.tx_raw(id, byte);
    }

    /// Cooked transmit of a byte sequence. No atomicity across the buffer.
    pub fn tx_buf(&mut self, id: UartId, buf: &[u8]) {
        for &byte in buf {
            self.tx(id, byte);
        }
    }

    /// Raw transmit of a byte sequence.
    pub fn tx_raw_buf(&mut self, id: UartId, buf: &[u8]) {
        for &byte in buf {
            self.tx_raw(id, byte);
        }
    }

    /// Opts the instance in or out of low-power-mode participation.
    pub fn set_lpm_participation(&mut self, id: UartId, enabled: bool) {
        if id != UartId::Hw {
            return;
        }
        if let Some(hw) = self.hw.as_mut() {
            hw.config.lpm_enabled = enabled;
        }
    }

    /// Low-power-mode broadcast entry point, invoked by the platform's LPM
    /// service in task context.
    ///
    /// Callers must keep LPM transitions from racing in-flight UART
    /// traffic; the driver provides no mutual exclusion between them.
    pub fn lpm_transition(&mut self, state: LpmState) {
        match state {
            LpmState::Enter => {
                let participates = self.hw.as_ref().map_or(false, |hw| hw.config.lpm_enabled);
                if participates {
                    self.stats.lpm_entries = self.stats.lpm_entries.wrapping_add(1);
                    self.quiesce();
                    self.in_lpm = true;
                    self.ops.clock_disable();
                }
            }
            LpmState::Exit => {
                if !self.in_lpm {
                    return;
                }
                self.in_lpm = false;
                self.ops.clock_enable();
                self.ops.clear_pending_interrupt();
                let (ibrd, fbrd, lcr_h, cr, rx_interrupt) = match self.hw.as_ref() {
                    Some(hw) => (hw.ibrd, hw.fbrd, hw.lcr_h, hw.cr, hw.config.rx_interrupt),
                    None => return,
                };
                self.ops.set_divisors(ibrd, fbrd);
                // restored exactly as cached; the FIFO-enable bit is only
                // or'd in on the init/set_baud path
                self.ops.set_line_control(lcr_h);
                if rx_interrupt {
                    self.ops.set_interrupt_mask(IntMask::RX);
                }
                self.ops.set_control(cr | Control::ENABLE);
            }
        }
    }

    /// Diagnostic counter snapshot.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Whether `init` has cached an active configuration.
    pub fn is_enabled(&self) -> bool {
        self.hw.is_some()
    }

    pub fn in_lpm(&self) -> bool {
        self.in_lpm
    }

    /// Return the raw interface to the underlying hardware ops.
    pub fn free(self) -> T {
        self.ops
    }

    fn is_hw_enabled(&self, id: UartId) -> bool {
        self.hw.is_some() && (id == UartId::Hw || id == UartId::Console)
    }

    fn interrupt_mode(&self) -> bool {
        self.hw.as_ref().map_or(false, |hw| hw.config.rx_interrupt)
    }

    fn note_tx_byte(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\r' | 0x08 | 0x20..=0x7e => {}
            _ => self.stats.bad_tx_chars = self.stats.bad_tx_chars.wrapping_add(1),
        }
    }

    /// Quiesces the peripheral: control and line-control cleared, interrupt
    /// sources masked and acknowledged.
    fn quiesce(&mut self) {
        self.ops.set_control(Control::empty());
        self.ops.set_line_control(LineControl::empty());
        self.ops.set_interrupt_mask(IntMask::empty());
        self.ops.clear_interrupts();
    }
}

impl<T, F> embedded_hal::serial::Read<u8> for Uart<T, F>
where
    T: UartOps,
    F: SoftUart,
{
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if !self.is_hw_enabled(UartId::Hw) {
            return Err(nb::Error::Other(Error::NotEnabled));
        }
        if self.interrupt_mode() {
            match self.rx.as_mut().and_then(|rx| rx.pop()) {
                Some(byte) => Ok(byte),
                None => Err(nb::Error::WouldBlock),
            }
        } else if self.ops.rx_fifo_empty() {
            Err(nb::Error::WouldBlock)
        } else {
            Ok((self.ops.read_data() & 0xff) as u8)
        }
    }
}

impl<T, F> embedded_hal::serial::Write<u8> for Uart<T, F>
where
    T: UartOps,
    F: SoftUart,
{
    type Error = Void;

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        // a disabled instance drops bytes, same as tx_raw
        if !self.is_hw_enabled(UartId::Hw) {
            return Ok(());
        }
        if self.ops.tx_fifo_full() {
            return Err(nb::Error::WouldBlock);
        }
        self.note_tx_byte(byte);
        self.ops.write_data(u32::from(byte));
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        if self.ops.tx_busy() {
            Err(nb::Error::WouldBlock)
        } else {
            Ok(())
        }
    }
}

impl<T, F> fmt::Write for Uart<T, F>
where
    T: UartOps,
    F: SoftUart,
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.tx(UartId::Console, byte);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pads::PadMode;
    use heapless::{Deque, Vec};

    const CLOCK_HZ: u32 = 10_000_000;

    struct MockOps {
        rx_fifo: Deque<u32, 2048>,
        tx: Vec<u8, 64>,
        ibrd: u32,
        fbrd: u32,
        lcr_h: LineControl,
        cr: Control,
        imsc: IntMask,
        ifls: u32,
        clock_on: bool,
        clock_disables: u32,
        pads: Vec<PadConfig, 4>,
        lpm_registrations: u32,
        irq_enabled: bool,
        pending_clears: u32,
        yields: u32,
        delays: u32,
    }

    impl MockOps {
        fn new() -> Self {
            MockOps {
                rx_fifo: Deque::new(),
                tx: Vec::new(),
                ibrd: 0,
                fbrd: 0,
                lcr_h: LineControl::empty(),
                cr: Control::empty(),
                imsc: IntMask::empty(),
                ifls: 0,
                clock_on: false,
                clock_disables: 0,
                pads: Vec::new(),
                lpm_registrations: 0,
                irq_enabled: false,
                pending_clears: 0,
                yields: 0,
                delays: 0,
            }
        }
    }

    impl UartOps for MockOps {
        fn read_data(&mut self) -> u32 {
            self.rx_fifo.pop_front().unwrap_or(0)
        }

        fn write_data(&mut self, word: u32) {
            self.tx.push(word as u8).ok();
        }

        fn rx_fifo_empty(&self) -> bool {
            self.rx_fifo.is_empty()
        }

        fn tx_fifo_full(&self) -> bool {
            false
        }

        fn tx_busy(&self) -> bool {
            false
        }

        fn set_divisors(&mut self, ibrd: u32, fbrd: u32) {
            self.ibrd = ibrd;
            self.fbrd = fbrd;
        }

        fn set_line_control(&mut self, lcr_h: LineControl) {
            self.lcr_h = lcr_h;
        }

        fn set_control(&mut self, cr: Control) {
            self.cr = cr;
        }

        fn set_interrupt_mask(&mut self, imsc: IntMask) {
            self.imsc = imsc;
        }

        fn set_fifo_levels(&mut self, ifls: u32) {
            self.ifls = ifls;
        }

        fn clear_interrupts(&mut self) {}

        fn enable_interrupt(&mut self) {
            self.irq_enabled = true;
        }

        fn clear_pending_interrupt(&mut self) {
            self.pending_clears += 1;
        }

        fn clock_enable(&mut self) {
            self.clock_on = true;
        }

        fn clock_disable(&mut self) {
            self.clock_on = false;
            self.clock_disables += 1;
        }

        fn clock_rate(&self) -> u32 {
            CLOCK_HZ
        }

        fn configure_pad(&mut self, pad: &PadConfig) {
            self.pads.push(*pad).ok();
        }

        fn register_lpm(&mut self, _name: &'static str) {
            self.lpm_registrations += 1;
        }

        fn yield_task(&mut self) {
            self.yields += 1;
        }

        fn delay_tick(&mut self) {
            self.delays += 1;
        }
    }

    fn init_uart(configure: impl FnOnce(&mut Config)) -> Uart<MockOps> {
        let mut config = Config::default();
        configure(&mut config);
        let mut uart = Uart::new(MockOps::new());
        uart.init(UartId::Hw, config);
        uart
    }

    fn feed(uart: &mut Uart<MockOps>, bytes: &[u8]) {
        for &byte in bytes {
            uart.ops.rx_fifo.push_back(u32::from(byte)).unwrap();
        }
        uart.handle_interrupt(UartId::Hw);
    }

    #[test]
    fn baud_divisors_match_reference_table() {
        let expected = [
            (Baudrate::Baud2400, 260, 27),
            (Baudrate::Baud4800, 130, 13),
            (Baudrate::Baud9600, 65, 7),
            (Baudrate::Baud19200, 32, 35),
            (Baudrate::Baud38400, 16, 18),
            (Baudrate::Baud57600, 10, 54),
            (Baudrate::Baud115200, 5, 27),
            (Baudrate::Baud230400, 2, 46),
            (Baudrate::Baud460800, 1, 23),
            (Baudrate::Baud921600, 0, 43),
        ];
        for &(baudrate, ibrd, fbrd) in expected.iter() {
            assert_eq!(baud_divisors(CLOCK_HZ, baudrate), (ibrd, fbrd));
            // deterministic on repeat
            assert_eq!(baud_divisors(CLOCK_HZ, baudrate), (ibrd, fbrd));
        }
        assert_eq!(Baudrate::ALL.len(), expected.len());
    }

    #[test]
    fn unknown_baud_rate_keeps_previous_divisors() {
        let mut uart = init_uart(|_| {});
        let (ibrd, fbrd) = baud_divisors(CLOCK_HZ, Baudrate::Baud115200);
        assert_eq!((uart.ops.ibrd, uart.ops.fbrd), (ibrd, fbrd));

        uart.set_baud(UartId::Hw, 12_345);
        assert_eq!((uart.ops.ibrd, uart.ops.fbrd), (ibrd, fbrd));

        uart.set_baud(UartId::Hw, 9_600);
        assert_eq!(
            (uart.ops.ibrd, uart.ops.fbrd),
            baud_divisors(CLOCK_HZ, Baudrate::Baud9600)
        );
    }

    #[test]
    fn isr_bytes_arrive_in_fifo_order() {
        let mut uart = init_uart(|c| c.rx_interrupt = true);
        feed(&mut uart, b"hello");
        assert_eq!(uart.rx_available(UartId::Hw), 5);
        for &expected in b"hello" {
            assert_eq!(uart.rx(UartId::Hw), Ok(expected));
        }
        assert_eq!(uart.rx_available(UartId::Hw), 0);
        assert_eq!(uart.stats().rx_bytes, 5);
        // a successful enqueue run yields once
        assert_eq!(uart.ops.yields, 1);
    }

    #[test]
    fn queue_full_drops_excess_bytes() {
        let mut uart = init_uart(|c| c.rx_interrupt = true);
        for i in 0..(RX_BUFFER_SIZE as u32 + 1) {
            uart.ops.rx_fifo.push_back(i & 0xff).unwrap();
        }
        uart.handle_interrupt(UartId::Hw);

        // every word was pulled off the hardware FIFO and counted
        assert_eq!(uart.stats().rx_bytes, RX_BUFFER_SIZE as u32 + 1);
        // but only the first RX_BUFFER_SIZE made it into the buffer
        assert_eq!(uart.rx_available(UartId::Hw), RX_BUFFER_SIZE);
        for i in 0..RX_BUFFER_SIZE as u32 {
            assert_eq!(uart.rx(UartId::Hw), Ok((i & 0xff) as u8));
        }
        assert_eq!(uart.rx_available(UartId::Hw), 0);
    }

    #[test]
    fn rx_wait_zero_timeout_returns_immediately() {
        let mut uart = init_uart(|c| c.rx_interrupt = true);
        assert_eq!(uart.rx_wait(UartId::Hw, 0), None);
        assert_eq!(uart.ops.delays, 0);
    }

    #[test]
    fn rx_wait_peeks_without_consuming() {
        let mut uart = init_uart(|c| c.rx_interrupt = true);
        feed(&mut uart, &[0x41]);
        assert_eq!(uart.rx_wait(UartId::Hw, 5), Some(0x41));
        assert_eq!(uart.rx_available(UartId::Hw), 1);
        assert_eq!(uart.rx(UartId::Hw), Ok(0x41));
    }

    #[test]
    fn rx_wait_gives_up_after_bound() {
        let mut uart = init_uart(|c| c.rx_interrupt = true);
        assert_eq!(uart.rx_wait(UartId::Hw, 3), None);
        assert_eq!(uart.ops.delays, 3);
    }

    #[test]
    fn cooked_tx_expands_newline() {
        let mut uart = init_uart(|_| {});
        uart.tx_buf(UartId::Hw, b"A\nB");
        assert_eq!(uart.ops.tx.as_slice(), b"A\r\nB");
    }

    #[test]
    fn raw_tx_skips_translation() {
        let mut uart = init_uart(|_| {});
        uart.tx_raw_buf(UartId::Hw, b"A\nB");
        assert_eq!(uart.ops.tx.as_slice(), b"A\nB");
    }

    #[test]
    fn bad_tx_byte_is_counted_but_still_sent() {
        let mut uart = init_uart(|_| {});
        uart.tx_raw(UartId::Hw, 0x01);
        uart.tx_raw(UartId::Hw, b'x');
        assert_eq!(uart.stats().bad_tx_chars, 1);
        assert_eq!(uart.ops.tx.as_slice(), &[0x01, b'x']);
    }

    #[test]
    fn disabled_instance_rejects_io() {
        let mut uart = Uart::new(MockOps::new());
        assert!(!uart.is_enabled());
        assert_eq!(uart.rx(UartId::Hw), Err(Error::NotEnabled));
        assert_eq!(uart.rx_wait(UartId::Hw, 5), None);
        assert_eq!(uart.rx_available(UartId::Hw), 0);
        uart.tx_raw(UartId::Hw, b'x');
        assert!(uart.ops.tx.is_empty());

        let mut buf = [0u8; 4];
        assert_eq!(
            uart.rx_raw_buf(UartId::Hw, &mut buf),
            Err(Error::NotEnabled)
        );
    }

    #[test]
    fn console_id_aliases_the_hardware_uart() {
        let mut uart = init_uart(|_| {});
        uart.tx_raw(UartId::Console, b'c');
        assert_eq!(uart.ops.tx.as_slice(), b"c");
    }

    #[test]
    fn fpga_id_without_soft_uart_is_inert() {
        let mut uart = init_uart(|_| {});
        uart.tx_raw(UartId::Fpga, b'f');
        assert!(uart.ops.tx.is_empty());
        assert_eq!(uart.rx(UartId::Fpga), Err(Error::NotEnabled));
        assert_eq!(uart.rx_available(UartId::Fpga), 0);
    }

    #[test]
    fn polled_mode_reads_the_data_register() {
        let mut uart = init_uart(|c| c.rx_interrupt = false);
        uart.ops.rx_fifo.push_back(0x55).unwrap();
        assert_eq!(uart.rx_available(UartId::Hw), 1);
        assert_eq!(uart.rx(UartId::Hw), Ok(0x55));
        assert_eq!(uart.rx_available(UartId::Hw), 0);
    }

    #[test]
    fn polled_rx_wait_reports_readiness_only() {
        let mut uart = init_uart(|c| c.rx_interrupt = false);
        uart.ops.rx_fifo.push_back(0x55).unwrap();
        assert_eq!(uart.rx_wait(UartId::Hw, 0), Some(0));
        // still unconsumed
        assert_eq!(uart.rx(UartId::Hw), Ok(0x55));
    }

    #[test]
    fn error_flags_update_counters() {
        let mut uart = init_uart(|c| c.rx_interrupt = true);
        uart.ops
            .rx_fifo
            .push_back(u32::from(b'a') | RxErrors::FRAMING.bits())
            .unwrap();
        uart.ops
            .rx_fifo
            .push_back(u32::from(b'b') | RxErrors::OVERRUN.bits() | RxErrors::PARITY.bits())
            .unwrap();
        uart.ops
            .rx_fifo
            .push_back(u32::from(b'c') | RxErrors::BREAK.bits())
            .unwrap();
        uart.handle_interrupt(UartId::Hw);

        let stats = uart.stats();
        assert_eq!(stats.framing_errors, 1);
        assert_eq!(stats.overrun_errors, 1);
        assert_eq!(stats.parity_errors, 1);
        assert_eq!(stats.break_errors, 1);
        assert_eq!(stats.rx_bytes, 3);
        // the data bytes still arrive
        assert_eq!(uart.rx(UartId::Hw), Ok(b'a'));
        assert_eq!(uart.rx(UartId::Hw), Ok(b'b'));
        assert_eq!(uart.rx(UartId::Hw), Ok(b'c'));
    }

    #[test]
    fn init_configures_tx_and_rx_pads() {
        let uart = init_uart(|_| {});
        assert_eq!(uart.ops.pads.len(), 2);
        assert_eq!(uart.ops.pads[0].mode, PadMode::Output);
        assert_eq!(uart.ops.pads[0].pin, crate::pads::PAD_UART_TXD);
        assert_eq!(uart.ops.pads[1].mode, PadMode::Input);
        assert_eq!(uart.ops.pads[1].pin, crate::pads::PAD_UART_RXD);
    }

    #[test]
    fn rx_only_mode_skips_the_tx_pad() {
        let uart = init_uart(|c| c.mode = Mode::Rx);
        assert_eq!(uart.ops.pads.len(), 1);
        assert_eq!(uart.ops.pads[0].mode, PadMode::Input);
    }

    #[test]
    fn disabled_mode_leaves_derived_masks_stale() {
        let uart = init_uart(|c| c.mode = Mode::Disabled);
        // the builder aborted, so only the unconditional bits got written
        assert_eq!(uart.ops.cr, Control::ENABLE);
        assert_eq!(uart.ops.lcr_h, LineControl::FIFO_ENABLE);
    }

    #[test]
    fn lpm_enter_requires_participation() {
        let mut uart = init_uart(|c| c.lpm_enabled = false);
        uart.lpm_transition(LpmState::Enter);
        assert!(!uart.in_lpm());
        assert_eq!(uart.ops.clock_disables, 0);
        assert_eq!(uart.stats().lpm_entries, 0);
    }

    #[test]
    fn lpm_exit_restores_cached_registers() {
        let mut uart = init_uart(|c| {
            c.rx_interrupt = true;
            c.lpm_enabled = true;
        });
        let (ibrd, fbrd) = baud_divisors(CLOCK_HZ, Baudrate::Baud115200);
        assert_eq!(uart.ops.cr, Control::TX_ENABLE | Control::RX_ENABLE | Control::ENABLE);

        uart.lpm_transition(LpmState::Enter);
        assert!(uart.in_lpm());
        assert_eq!(uart.stats().lpm_entries, 1);
        assert_eq!(uart.ops.clock_disables, 1);
        assert_eq!(uart.ops.cr, Control::empty());
        assert!(!uart.ops.clock_on);

        uart.lpm_transition(LpmState::Exit);
        assert!(!uart.in_lpm());
        assert!(uart.ops.clock_on);
        assert_eq!(uart.ops.pending_clears, 1);
        assert_eq!((uart.ops.ibrd, uart.ops.fbrd), (ibrd, fbrd));
        // cached line control is restored without the FIFO-enable bit
        assert_eq!(uart.ops.lcr_h, LineControl::WLEN_8);
        assert_eq!(uart.ops.imsc, IntMask::RX);
        assert_eq!(uart.ops.cr, Control::TX_ENABLE | Control::RX_ENABLE | Control::ENABLE);
    }

    #[test]
    fn lpm_exit_without_enter_is_a_no_op() {
        let mut uart = init_uart(|c| c.lpm_enabled = true);
        let before = uart.ops.pending_clears;
        uart.lpm_transition(LpmState::Exit);
        assert_eq!(uart.ops.pending_clears, before);
    }

    #[test]
    fn lpm_participation_can_be_toggled_at_runtime() {
        let mut uart = init_uart(|c| c.lpm_enabled = false);
        uart.set_lpm_participation(UartId::Hw, true);
        uart.lpm_transition(LpmState::Enter);
        assert!(uart.in_lpm());
    }

    #[test]
    fn lpm_registration_happens_once() {
        let mut uart = init_uart(|_| {});
        uart.init(UartId::Hw, Config::default());
        assert_eq!(uart.ops.lpm_registrations, 1);
    }

    #[test]
    fn receive_buffer_survives_reinit() {
        let mut config = Config::default();
        config.rx_interrupt = true;
        let mut uart = Uart::new(MockOps::new());
        uart.init(UartId::Hw, config);
        feed(&mut uart, &[0x41]);
        uart.init(UartId::Hw, config);
        assert_eq!(uart.rx_available(UartId::Hw), 1);
        assert_eq!(uart.rx(UartId::Hw), Ok(0x41));
    }

    #[test]
    fn init_programs_line_settings() {
        let uart = init_uart(|c| {
            c.word_length = WordLength::Seven;
            c.parity = Parity::Even;
            c.stop_bits = StopBits::Two;
            c.flow_control = true;
        });
        assert_eq!(
            uart.ops.lcr_h,
            LineControl::WLEN_7
                | LineControl::PARITY_ENABLE
                | LineControl::EVEN_PARITY
                | LineControl::TWO_STOP_BITS
                | LineControl::FIFO_ENABLE
        );
        assert_eq!(
            uart.ops.cr,
            Control::TX_ENABLE
                | Control::RX_ENABLE
                | Control::RTS_ENABLE
                | Control::CTS_ENABLE
                | Control::ENABLE
        );
        assert_eq!(uart.ops.ifls, IFLS_RX_1_8_TX_1_2);
    }

    #[test]
    fn serial_write_str_goes_through_the_cooked_path() {
        use core::fmt::Write;
        let mut uart = init_uart(|_| {});
        write!(uart, "ok\n").unwrap();
        assert_eq!(uart.ops.tx.as_slice(), b"ok\r\n");
    }

    #[test]
    fn embedded_hal_read_does_not_block() {
        use embedded_hal::serial::Read;
        let mut uart = init_uart(|c| c.rx_interrupt = true);
        assert_eq!(uart.read(), Err(nb::Error::WouldBlock));
        feed(&mut uart, &[0x7a]);
        assert_eq!(uart.read(), Ok(0x7a));
    }
}
