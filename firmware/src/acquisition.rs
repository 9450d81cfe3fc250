mod slot_buffer;

use stm32f7xx_hal::{
    pac,
    rcc::{self, Enable, Reset},
};

use ntc_relay_core::RawSamplePair;
use slot_buffer::{DmaGrant, SlotBuffer};

pub use slot_buffer::{SampleSlots, SAMPLES_PER_TRANSFER};

/// ADC1 input numbers of the two thermistor dividers.
const CHANNEL_A_INPUT: u8 = 0; // PA0
const CHANNEL_B_INPUT: u8 = 1; // PA1

/// Driver for one acquisition transfer per sampling cycle: ADC1 scans both
/// thermistor channels and DMA2 stream 0 moves the codes into a sample slot.
///
/// Slots move between this driver and the hardware as [`DmaGrant`]s; the
/// consumer side never sees a slot, only the [`RawSamplePair`] copied out on
/// completion.
pub struct AdcAcquisition {
    adc1: pac::ADC1,
    dma2: pac::DMA2,
    buffer: SlotBuffer,
    in_flight: Option<DmaGrant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum StartError {
    /// A transfer is already in flight.
    Busy,
    /// Both sample slots are still checked out.
    NoFreeSlot,
}

/// Outcome of a completion interrupt that belonged to this driver.
pub enum AcquisitionEvent {
    /// The transfer finished and the slot contents were copied out.
    Complete(RawSamplePair),
    /// The transfer or the ADC reported an error; no samples this cycle.
    Fault,
}

impl AdcAcquisition {
    pub fn init(
        slots: &'static mut SampleSlots,
        adc1: pac::ADC1,
        dma2: pac::DMA2,
        apb2: &mut rcc::APB2,
        ahb1: &mut rcc::AHB1,
    ) -> Self {
        let mut this = Self {
            adc1,
            dma2,
            buffer: SlotBuffer::new(slots),
            in_flight: None,
        };

        this.init_dma2(ahb1);
        this.init_adc1(apb2);

        this
    }

    /// Configure DMA2 stream 0 to read 16-bit conversions from ADC1 into
    /// whichever sample slot the next transfer is granted.
    fn init_dma2(&mut self, ahb1: &mut rcc::AHB1) {
        <pac::DMA2 as Enable>::enable(ahb1);

        let stream = &self.dma2.st[0];
        stream.cr.modify(|_, w| w.en().disabled());

        stream.cr.modify(|_, w| {
            // Select channel 0 (ADC1)
            w.chsel()
                .bits(0)
                // One shot per transfer, no circular mode
                .circ()
                .disabled()
                // Set data size to 16 bits at memory side
                .msize()
                .bits16()
                // Set data size to 16 bits at peripheral side
                .psize()
                .bits16()
                // Increment memory pointer after each read
                .minc()
                .incremented()
                // Do not increment peripheral data pointer
                .pinc()
                .fixed()
                // Write from peripheral to memory
                .dir()
                .peripheral_to_memory()
                // DMA controls when the transfer ends
                .pfctrl()
                .dma()
                // Enable Transfer Complete Interrupt
                .tcie()
                .enabled()
                // Enable Transfer Error Interrupt
                .teie()
                .enabled()
                // Enable Direct Mode Error Interrupt
                .dmeie()
                .enabled()
        });

        // Set peripheral address to the ADC1 data register
        stream
            .par
            .write(|w| unsafe { w.pa().bits(self.adc1.dr.as_ptr() as u32) });
    }

    /// Configure ADC1 for a software-started 12-bit scan of the two
    /// thermistor inputs, read out by DMA.
    fn init_adc1(&mut self, apb2: &mut rcc::APB2) {
        let adc1 = &self.adc1;
        <pac::ADC1 as Enable>::enable(apb2);
        // Power down ADC1
        adc1.cr2.modify(|_, w| w.adon().clear_bit());
        <pac::ADC1 as Reset>::reset(apb2);

        // Setup ADC1 resolution to 12 bit, scan over the regular sequence
        adc1.cr1.modify(|_, w| w.res().bits(0b00).scan().set_bit());

        // One sequence per software start
        adc1.cr2.modify(|_, w| w.cont().single());

        // Regular sequence: channel A then channel B
        adc1.sqr1.modify(|_, w| unsafe { w.l().bits(1) });
        adc1.sqr3.modify(|_, w| unsafe {
            w.sq1().bits(CHANNEL_A_INPUT).sq2().bits(CHANNEL_B_INPUT)
        });

        // 480 ADC cycles of sampling time per channel; the dividers are
        // high impedance sources
        adc1.smpr2
            .modify(|_, w| unsafe { w.smp0().bits(0b111).smp1().bits(0b111) });

        // Single-shot DMA; requests are re-armed before every transfer
        adc1.cr2.modify(|_, w| w.dma().enabled().dds().single());

        // Completion is signaled through the DMA stream, not the ADC
        adc1.cr1.modify(|_, w| w.eocie().disabled().ovrie().disabled());

        // Power up ADC1
        adc1.cr2.modify(|_, w| w.adon().enabled());
    }

    /// Starts one acquisition transfer into a freshly granted slot.
    ///
    /// Only the sampling task calls this; one transfer may be in flight at
    /// a time.
    pub fn start_transfer(&mut self) -> Result<(), StartError> {
        if self.in_flight.is_some() {
            return Err(StartError::Busy);
        }
        let mut grant = self.buffer.next_dma_buffer().ok_or(StartError::NoFreeSlot)?;

        let stream = &self.dma2.st[0];
        stream.cr.modify(|_, w| w.en().disabled());
        while stream.cr.read().en().bit_is_set() {}

        // Clear stale stream 0 events before re-enabling
        self.clear_stream_flags();

        stream
            .ndtr
            .modify(|_, w| w.ndt().bits(SAMPLES_PER_TRANSFER as u16));
        stream
            .m0ar
            .write(|w| unsafe { w.m0a().bits(grant.as_mut_ptr() as u32) });
        stream.cr.modify(|_, w| w.en().enabled());

        // The ADC stops issuing requests after a single-shot transfer and
        // wants the DMA bit cycled before the next one (RM0410 15.8.1)
        self.adc1.cr2.modify(|_, w| w.dma().disabled());
        self.adc1.cr2.modify(|_, w| w.dma().enabled());

        self.in_flight = Some(grant);
        self.adc1.cr2.modify(|_, w| w.swstart().set_bit());

        Ok(())
    }

    /// Services the DMA2 stream 0 interrupt.
    ///
    /// Returns `None` for events that are not a completion of this driver's
    /// in-flight transfer (another stream's interrupt, or a transfer that
    /// was already aborted). Runs in interrupt context: no conversion work
    /// here, just the copy-out and slot release.
    pub fn handle_interrupt(&mut self) -> Option<AcquisitionEvent> {
        let flags = self.dma2.lisr.read();
        let complete = flags.tcif0().bit_is_set();
        let errored = flags.teif0().bit_is_set() || flags.dmeif0().bit_is_set();
        if !complete && !errored {
            return None;
        }

        self.clear_stream_flags();

        let grant = self.in_flight.take()?;

        let overrun = self.adc1.sr.read().ovr().bit_is_set();
        if errored || overrun {
            self.adc1.sr.modify(|_, w| w.ovr().clear_bit());
            self.buffer.reclaim(grant);
            return Some(AcquisitionEvent::Fault);
        }

        Some(AcquisitionEvent::Complete(self.buffer.dma_done(grant)))
    }

    /// Tears down a transfer whose completion never arrived and reclaims
    /// its slot. Returns whether a transfer was actually in flight.
    pub fn abort_transfer(&mut self) -> bool {
        let Some(grant) = self.in_flight.take() else {
            return false;
        };

        let stream = &self.dma2.st[0];
        stream.cr.modify(|_, w| w.en().disabled());
        while stream.cr.read().en().bit_is_set() {}
        self.clear_stream_flags();

        self.buffer.reclaim(grant);
        true
    }

    fn clear_stream_flags(&self) {
        self.dma2.lifcr.write(|w| {
            w.ctcif0()
                .set_bit()
                .chtif0()
                .set_bit()
                .cteif0()
                .set_bit()
                .cdmeif0()
                .set_bit()
                .cfeif0()
                .set_bit()
        });
    }
}
