//! CAN bring-up and the outgoing temperature frame path.

use bxcan::filter::Mask32;
use bxcan::{Frame, StandardId};
use stm32f7xx_hal::can::Can;
use stm32f7xx_hal::gpio::{Alternate, Pin};
use stm32f7xx_hal::pac;
use stm32f7xx_hal::rcc;

use ntc_relay_core::frame;

/// 500 kbit/s with a 54 MHz APB1 clock: prescaler 6, 18 tq per bit
/// (1 + 14 + 3).
const BIT_TIMING: u32 = 0x002d_0005;

/// Bound on the wait for bus synchronization during bring-up.
const ENABLE_ATTEMPTS: u32 = 10_000;

pub type CanTxPin = Pin<'B', 9, Alternate<9>>;
pub type CanRxPin = Pin<'B', 8, Alternate<9>>;

/// Builds and queues the per-cycle temperature frame.
pub struct TempTransmitter {
    can: bxcan::Can<Can<pac::CAN1>>,
    id: StandardId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TransmitError {
    /// Every transmit mailbox still holds a pending frame.
    MailboxesFull,
}

/// Configures CAN1, opens an accept-all filter bank and synchronizes to the
/// bus.
///
/// Failing to synchronize within the bounded wait is a fatal startup error.
pub fn init(
    can: pac::CAN1,
    apb1: &mut rcc::APB1,
    pins: (CanTxPin, CanRxPin),
) -> TempTransmitter {
    let mut can = bxcan::Can::builder(Can::new(can, apb1, pins))
        .set_bit_timing(BIT_TIMING)
        .leave_disabled();

    can.modify_filters().enable_bank(0, Mask32::accept_all());

    let mut attempts = ENABLE_ATTEMPTS;
    loop {
        match can.enable_non_blocking() {
            Ok(()) => break,
            Err(nb::Error::WouldBlock) if attempts > 0 => {
                attempts -= 1;
                cortex_m::asm::delay(1_000);
            }
            Err(_) => defmt::panic!("CAN1 failed to synchronize to the bus"),
        }
    }

    defmt::info!(
        "CAN1 up, temperature frame id {=u16:x}",
        frame::TEMPERATURE_FRAME_ID
    );

    TempTransmitter {
        can,
        id: defmt::unwrap!(StandardId::new(frame::TEMPERATURE_FRAME_ID)),
    }
}

impl TempTransmitter {
    /// Queues one temperature frame, fire and forget.
    ///
    /// The frame carries whatever the conversion produced, NAN sentinels
    /// included. With all mailboxes pending the frame is dropped rather
    /// than retried; the caller accounts for the drop and the cadence is
    /// unaffected.
    pub fn send(&mut self, channel_a: f32, channel_b: f32) -> Result<(), TransmitError> {
        let data_frame = Frame::new_data(self.id, frame::encode_payload(channel_a, channel_b));

        match self.can.transmit(&data_frame) {
            Ok(_status) => Ok(()),
            Err(nb::Error::WouldBlock) => Err(TransmitError::MailboxesFull),
            Err(nb::Error::Other(infallible)) => match infallible {},
        }
    }
}
