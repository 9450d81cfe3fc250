use core::ops::{Deref, DerefMut};
use core::slice;

use ntc_relay_core::RawSamplePair;

/// Conversions per acquisition transfer: one code per thermistor channel.
pub const SAMPLES_PER_TRANSFER: usize = 2;

const NUM_SLOTS: usize = 2;

pub type SampleSlots = [[u16; SAMPLES_PER_TRANSFER]; NUM_SLOTS];

/// Exclusive handle to one sample slot while the hardware fills it.
///
/// Holding the grant is what entitles the DMA to write the slot; nothing
/// else touches the memory until the grant comes back through
/// [`SlotBuffer::dma_done`] or [`SlotBuffer::reclaim`].
pub struct DmaGrant {
    ptr: *mut u16,
    slot: usize,
}

impl DmaGrant {
    pub fn as_mut_ptr(&mut self) -> *mut u16 {
        self.ptr
    }
}

unsafe impl Send for DmaGrant {}

impl Deref for DmaGrant {
    type Target = [u16; SAMPLES_PER_TRANSFER];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr, SAMPLES_PER_TRANSFER) }
            .try_into()
            .unwrap()
    }
}

impl DerefMut for DmaGrant {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { slice::from_raw_parts_mut(self.ptr, SAMPLES_PER_TRANSFER) }
            .try_into()
            .unwrap()
    }
}

/// Two sample slots handed to the DMA one grant at a time.
///
/// A slot is either free or checked out to the hardware. Consecutive
/// transfers rotate through the slots, so a transfer that outlived its
/// bounded wait can finish late into its own slot while the next cycle
/// acquires the other one.
pub struct SlotBuffer {
    buffer: *mut u16,
    dma_owned: [bool; NUM_SLOTS],
    next: usize,
}

unsafe impl Send for SlotBuffer {}

impl SlotBuffer {
    pub fn new(slots: &'static mut SampleSlots) -> Self {
        Self {
            buffer: slots.as_mut_ptr().cast(),
            dma_owned: [false; NUM_SLOTS],
            next: 0,
        }
    }

    /// Checks out the next free slot for the hardware to fill.
    pub fn next_dma_buffer(&mut self) -> Option<DmaGrant> {
        for offset in 0..NUM_SLOTS {
            let slot = (self.next + offset) % NUM_SLOTS;
            if self.dma_owned[slot] {
                continue;
            }
            self.dma_owned[slot] = true;
            self.next = (slot + 1) % NUM_SLOTS;
            return Some(DmaGrant {
                ptr: unsafe { self.buffer.add(slot * SAMPLES_PER_TRANSFER) },
                slot,
            });
        }
        None
    }

    /// Takes back a finished slot and copies the sample pair out of it.
    pub fn dma_done(&mut self, grant: DmaGrant) -> RawSamplePair {
        let samples = RawSamplePair::from(*grant);
        self.release(grant);
        samples
    }

    /// Takes back a slot without reading it (aborted transfer).
    pub fn reclaim(&mut self, grant: DmaGrant) {
        self.release(grant);
    }

    fn release(&mut self, grant: DmaGrant) {
        let expected = unsafe { self.buffer.add(grant.slot * SAMPLES_PER_TRANSFER) };
        assert_eq!(grant.ptr, expected, "grant does not belong to this buffer");
        assert!(self.dma_owned[grant.slot], "slot was never checked out");
        self.dma_owned[grant.slot] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_cell::StaticCell;

    fn do_dma(mut grant: DmaGrant, base: u16) -> std::thread::JoinHandle<DmaGrant> {
        std::thread::spawn(move || {
            for (i, e) in grant.iter_mut().enumerate() {
                *e = base + i as u16;
            }
            grant
        })
    }

    #[test]
    fn concurrent_grants_never_alias() {
        static SLOTS: StaticCell<SampleSlots> = StaticCell::new();
        let mut buffer = SlotBuffer::new(SLOTS.init(Default::default()));

        let mut first = buffer.next_dma_buffer().unwrap();
        let mut second = buffer.next_dma_buffer().unwrap();
        assert_ne!(first.as_mut_ptr(), second.as_mut_ptr());
        assert!(buffer.next_dma_buffer().is_none());

        // Write slot two while slot one is read back out
        let second = do_dma(second, 100);
        first[0] = 11;
        first[1] = 22;
        assert_eq!(
            buffer.dma_done(first),
            RawSamplePair {
                channel_a: 11,
                channel_b: 22
            }
        );
        assert_eq!(
            buffer.dma_done(second.join().unwrap()),
            RawSamplePair {
                channel_a: 100,
                channel_b: 101
            }
        );
    }

    #[test]
    fn released_slots_cycle_indefinitely() {
        static SLOTS: StaticCell<SampleSlots> = StaticCell::new();
        let mut buffer = SlotBuffer::new(SLOTS.init(Default::default()));

        for value in 0..8u16 {
            let grant = do_dma(buffer.next_dma_buffer().unwrap(), value)
                .join()
                .unwrap();
            assert_eq!(
                buffer.dma_done(grant),
                RawSamplePair {
                    channel_a: value,
                    channel_b: value + 1
                }
            );
        }
    }

    #[test]
    fn stuck_slot_does_not_block_the_other() {
        static SLOTS: StaticCell<SampleSlots> = StaticCell::new();
        let mut buffer = SlotBuffer::new(SLOTS.init(Default::default()));

        // A transfer that never completed keeps its slot checked out
        let stuck = buffer.next_dma_buffer().unwrap();

        for value in 0..4u16 {
            let mut grant = buffer.next_dma_buffer().unwrap();
            grant[0] = value;
            grant[1] = value;
            buffer.dma_done(grant);
        }

        // Reclaiming makes the slot grantable again
        buffer.reclaim(stuck);
        assert!(buffer.next_dma_buffer().is_some());
        assert!(buffer.next_dma_buffer().is_some());
    }

    #[test]
    fn reclaim_discards_without_reading() {
        static SLOTS: StaticCell<SampleSlots> = StaticCell::new();
        let mut buffer = SlotBuffer::new(SLOTS.init(Default::default()));

        let grant = buffer.next_dma_buffer().unwrap();
        buffer.reclaim(grant);

        let mut grant = buffer.next_dma_buffer().unwrap();
        grant[0] = 7;
        grant[1] = 8;
        assert_eq!(
            buffer.dma_done(grant),
            RawSamplePair {
                channel_a: 7,
                channel_b: 8
            }
        );
    }
}
