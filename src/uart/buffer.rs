//! Bounded receive buffering between the interrupt handler and readers.

use heapless::Deque;

/// Capacity of the software receive buffer, in bytes.
pub const RX_BUFFER_SIZE: usize = 1024;

/// Buffering strategy for the interrupt-driven receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxBufferKind {
    /// Double-ended queue (the default).
    Queue,
    /// Plain index ring with an overflow flag.
    Ring,
}

/// One interface over the two buffering strategies. The interrupt handler
/// is the only producer, readers the only consumer.
pub(crate) enum RxBuffer {
    Queue(Deque<u8, RX_BUFFER_SIZE>),
    Ring(Ring),
}

impl RxBuffer {
    pub fn new(kind: RxBufferKind) -> Self {
        match kind {
            RxBufferKind::Queue => RxBuffer::Queue(Deque::new()),
            RxBufferKind::Ring => RxBuffer::Ring(Ring::new()),
        }
    }

    /// Inserts from interrupt context. A full buffer drops the byte and
    /// returns `false`; the loss is not reported anywhere else.
    pub fn push(&mut self, byte: u8) -> bool {
        match self {
            RxBuffer::Queue(q) => q.push_back(byte).is_ok(),
            RxBuffer::Ring(r) => r.push(byte),
        }
    }

    pub fn pop(&mut self) -> Option<u8> {
        match self {
            RxBuffer::Queue(q) => q.pop_front(),
            RxBuffer::Ring(r) => r.pop(),
        }
    }

    /// Returns the oldest byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        match self {
            RxBuffer::Queue(q) => q.front().copied(),
            RxBuffer::Ring(r) => r.peek(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RxBuffer::Queue(q) => q.len(),
            RxBuffer::Ring(r) => r.len(),
        }
    }
}

/// Index ring holding `RX_BUFFER_SIZE - 1` bytes.
pub(crate) struct Ring {
    buf: [u8; RX_BUFFER_SIZE],
    wr: usize,
    rd: usize,
    overflowed: bool,
}

impl Ring {
    fn new() -> Self {
        Ring {
            buf: [0; RX_BUFFER_SIZE],
            wr: 0,
            rd: 0,
            overflowed: false,
        }
    }

    fn push(&mut self, byte: u8) -> bool {
        let next = (self.wr + 1) % RX_BUFFER_SIZE;
        if next == self.rd {
            self.overflowed = true;
            return false;
        }
        self.buf[self.wr] = byte;
        self.wr = next;
        true
    }

    fn pop(&mut self) -> Option<u8> {
        if self.rd == self.wr {
            return None;
        }
        let byte = self.buf[self.rd];
        self.rd = (self.rd + 1) % RX_BUFFER_SIZE;
        Some(byte)
    }

    fn peek(&self) -> Option<u8> {
        if self.rd == self.wr {
            None
        } else {
            Some(self.buf[self.rd])
        }
    }

    fn len(&self) -> usize {
        (self.wr + RX_BUFFER_SIZE - self.rd) % RX_BUFFER_SIZE
    }

    #[cfg(test)]
    fn overflowed(&self) -> bool {
        self.overflowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_fifo_order() {
        let mut buf = RxBuffer::new(RxBufferKind::Queue);
        for b in 0..5u8 {
            assert!(buf.push(b));
        }
        assert_eq!(buf.len(), 5);
        for b in 0..5u8 {
            assert_eq!(buf.pop(), Some(b));
        }
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut buf = RxBuffer::new(RxBufferKind::Queue);
        buf.push(0x41);
        assert_eq!(buf.peek(), Some(0x41));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.pop(), Some(0x41));
    }

    #[test]
    fn ring_drops_when_full_and_flags_overflow() {
        let mut ring = Ring::new();
        for i in 0..RX_BUFFER_SIZE - 1 {
            assert!(ring.push(i as u8));
        }
        assert!(!ring.overflowed());
        assert!(!ring.push(0xff));
        assert!(ring.overflowed());
        assert_eq!(ring.len(), RX_BUFFER_SIZE - 1);
        assert_eq!(ring.pop(), Some(0));
    }

    #[test]
    fn ring_wraps_cleanly() {
        let mut ring = Ring::new();
        for round in 0..3u32 {
            for i in 0..700u32 {
                assert!(ring.push((round + i) as u8));
            }
            for i in 0..700u32 {
                assert_eq!(ring.pop(), Some((round + i) as u8));
            }
        }
        assert_eq!(ring.pop(), None);
    }
}
