use core::ops::{Add, Sub};
use std::ops::{AddAssign, SubAssign};
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use crate::{Error, Result};
use crate::params::ElementWidth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
    index: usize,
    bound: usize,
}

impl RingCursor {
    pub fn new(bound: usize) -> RingCursor {
        assert!(bound > 0, "ring cursor needs a non-empty ring");
        RingCursor { index: 0, bound }
    }

    pub fn at(index: usize, bound: usize) -> RingCursor {
        RingCursor::new(bound) + index
    }

    pub fn bound(self) -> usize {
        self.bound
    }

    pub fn into_inner(self) -> usize {
        self.index
    }
}

impl Add<usize> for RingCursor {
    type Output = RingCursor;

    fn add(self, offset: usize) -> Self::Output {
        // `offset % bound` first so that the sum cannot overflow
        RingCursor { index: (self.index + offset % self.bound) % self.bound, bound: self.bound }
    }
}

impl AddAssign<usize> for RingCursor {
    fn add_assign(&mut self, offset: usize) {
        *self = *self + offset
    }
}

impl Sub<usize> for RingCursor {
    type Output = RingCursor;

    fn sub(self, offset: usize) -> Self::Output {
        RingCursor { index: (self.index + self.bound - offset % self.bound) % self.bound, bound: self.bound }
    }
}

impl SubAssign<usize> for RingCursor {
    fn sub_assign(&mut self, offset: usize) {
        *self = *self - offset
    }
}

#[derive(Debug)]
enum Elements {
    Narrow(Box<[AtomicU16]>),
    Wide(Box<[AtomicU32]>),
}

/// Fixed-capacity, channel-interleaved buffer of raw codes.
///
/// The producer writes through a shared reference while the consumer reads; elements are
/// individually atomic, so a concurrent read observes either the old or the new code of each
/// element but never a torn one. Whether a window is consistent across elements is up to
/// the producer not lapping the consumer.
#[derive(Debug)]
pub struct RawSampleBuffer {
    elements: Elements,
}

impl RawSampleBuffer {
    pub fn new(width: ElementWidth, len: usize) -> Result<RawSampleBuffer> {
        if len == 0 {
            return Err(Error::InvalidConfiguration("sample buffer cannot be empty".to_owned()))
        }
        let elements = match width {
            ElementWidth::Narrow => Elements::Narrow((0..len).map(|_| AtomicU16::new(0)).collect()),
            ElementWidth::Wide   => Elements::Wide((0..len).map(|_| AtomicU32::new(0)).collect()),
        };
        log::trace!("allocated {:?} sample buffer of {} elements", width, len);
        Ok(RawSampleBuffer { elements })
    }

    pub fn width(&self) -> ElementWidth {
        match self.elements {
            Elements::Narrow(_) => ElementWidth::Narrow,
            Elements::Wide(_)   => ElementWidth::Wide,
        }
    }

    pub fn write_capacity(&self) -> usize {
        match &self.elements {
            Elements::Narrow(elements) => elements.len(),
            Elements::Wide(elements)   => elements.len(),
        }
    }

    pub fn cursor(&self) -> RingCursor {
        RingCursor::new(self.write_capacity())
    }

    fn load(&self, index: usize) -> u32 {
        match &self.elements {
            Elements::Narrow(elements) => elements[index].load(Ordering::Relaxed) as u32,
            Elements::Wide(elements)   => elements[index].load(Ordering::Relaxed),
        }
    }

    fn store(&self, index: usize, code: u32) {
        match &self.elements {
            Elements::Narrow(elements) => elements[index].store(code as u16, Ordering::Relaxed),
            Elements::Wide(elements)   => elements[index].store(code, Ordering::Relaxed),
        }
    }

    /// Code at a single position, taken modulo the capacity.
    pub fn get(&self, position: usize) -> u32 {
        self.load(position % self.write_capacity())
    }

    /// Reads `count` codes starting at `offset`, wrapping around the end of the buffer.
    pub fn read(&self, offset: usize, count: usize) -> Result<Vec<u32>> {
        let capacity = self.write_capacity();
        if count > capacity {
            return Err(Error::OutOfRange { offset, count, capacity })
        }
        let cursor = RingCursor::at(offset, capacity);
        Ok((0..count).map(|index| self.load((cursor + index).into_inner())).collect())
    }

    /// Writes `codes` starting at `offset`, wrapping around the end of the buffer. Codes wider
    /// than an element are truncated. Returns the cursor following the last written element.
    pub fn write(&self, offset: usize, codes: &[u32]) -> Result<RingCursor> {
        let capacity = self.write_capacity();
        if codes.len() > capacity {
            return Err(Error::OutOfRange { offset, count: codes.len(), capacity })
        }
        let mut cursor = RingCursor::at(offset, capacity);
        for &code in codes {
            self.store(cursor.into_inner(), code);
            cursor += 1;
        }
        log::trace!("wrote {} elements at {}", codes.len(), offset % capacity);
        Ok(cursor)
    }

    /// Like `write`, but takes little-endian elements as delivered by a bulk transfer. Trailing
    /// bytes that do not form a whole element are ignored.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<RingCursor> {
        let codes = match self.width() {
            ElementWidth::Narrow => bytes.chunks_exact(2)
                .map(|chunk| u16::from_le(bytemuck::pod_read_unaligned::<u16>(chunk)) as u32)
                .collect::<Vec<_>>(),
            ElementWidth::Wide => bytes.chunks_exact(4)
                .map(|chunk| u32::from_le(bytemuck::pod_read_unaligned::<u32>(chunk)))
                .collect::<Vec<_>>(),
        };
        self.write(offset, &codes)
    }

    /// Owned copy of the current contents, detached from the producer.
    pub fn snapshot(&self) -> RawSampleBuffer {
        let elements = match &self.elements {
            Elements::Narrow(elements) => Elements::Narrow(elements.iter()
                .map(|element| AtomicU16::new(element.load(Ordering::Relaxed)))
                .collect()),
            Elements::Wide(elements) => Elements::Wide(elements.iter()
                .map(|element| AtomicU32::new(element.load(Ordering::Relaxed)))
                .collect()),
        };
        RawSampleBuffer { elements }
    }
}
