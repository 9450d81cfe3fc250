#![no_main]
#![no_std]

use defmt_rtt as _;
use panic_probe as _;

use rtic::{app, Mutex};
use rtic_monotonics::systick::{ExtU64, Systick};
use rtic_monotonics::Monotonic;
use rtic_sync::{
    channel::{Receiver, Sender},
    make_channel,
};
use static_cell::StaticCell;
use stm32f7xx_hal::gpio::{Output, Pin};
use stm32f7xx_hal::prelude::*;

use ntc_relay_core::{ntc, RawSamplePair, SAMPLE_PERIOD_MILLIS};
use ntc_relay_firmware::{
    acquisition::{AcquisitionEvent, AdcAcquisition, SampleSlots},
    can_bus::{self, TempTransmitter},
    fault::{Fault, CYCLE_FAULTS},
};

defmt::timestamp!("{=u64:ms}", Systick::now().ticks());

/// Bound on the wait for a hardware completion. The conversion itself takes
/// microseconds; a wait past two periods means the completion was lost and
/// the transfer is torn down.
const COMPLETION_TIMEOUT_MILLIS: u64 = 2 * SAMPLE_PERIOD_MILLIS;

/// Liveness bound on the relay's wait for a handoff, diagnostic only.
const HANDOFF_TIMEOUT_MILLIS: u64 = 10 * SAMPLE_PERIOD_MILLIS;

#[app(device = stm32f7xx_hal::pac, dispatchers = [EXTI0, EXTI1])]
mod app {
    use super::*;

    static SAMPLE_SLOTS: StaticCell<SampleSlots> = StaticCell::new();

    #[shared]
    struct Shared {
        acquisition: AdcAcquisition,
    }

    #[local]
    struct Local {
        completion_tx: Sender<'static, RawSamplePair, 1>,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        let p = cx.device;

        defmt::info!("NTC relay starting");

        let mut rcc = p.RCC.constrain();
        // APB2 at 54 MHz keeps the ADC clock inside its rated range
        let clocks = rcc
            .cfgr
            .sysclk(216.MHz())
            .hclk(216.MHz())
            .pclk2(54.MHz())
            .freeze();

        // Setup systick to be used for delays
        let systick_token = rtic_monotonics::create_systick_token!();
        Systick::start(cx.core.SYST, clocks.sysclk().to_Hz(), systick_token);

        let gpioa = p.GPIOA.split();
        let gpiob = p.GPIOB.split();

        // Thermistor dividers on ADC1 IN0/IN1
        let _ntc_a = gpioa.pa0.into_analog();
        let _ntc_b = gpioa.pa1.into_analog();

        let led_pin = gpiob.pb7.into_push_pull_output();

        let acquisition = AdcAcquisition::init(
            SAMPLE_SLOTS.init_with(Default::default),
            p.ADC1,
            p.DMA2,
            &mut rcc.apb2,
            &mut rcc.ahb1,
        );

        // The bus must be up before the relay's first send; can_bus::init
        // halts on failure
        let transmitter = {
            let rx = gpiob.pb8.into_alternate();
            let tx = gpiob.pb9.into_alternate();
            can_bus::init(p.CAN1, &mut rcc.apb1, (tx, rx))
        };

        let (completion_tx, completion_rx) = make_channel!(RawSamplePair, 1);
        let (handoff_tx, handoff_rx) = make_channel!(RawSamplePair, 1);

        // Start tasks; a failed spawn at startup is fatal
        sample_task::spawn(completion_rx, handoff_tx)
            .unwrap_or_else(|_| defmt::panic!("Failed to start sample_task"));
        relay_task::spawn(handoff_rx, transmitter)
            .unwrap_or_else(|_| defmt::panic!("Failed to start relay_task"));
        heartbeat::spawn(led_pin).unwrap_or_else(|_| defmt::panic!("Failed to start heartbeat"));

        (Shared { acquisition }, Local { completion_tx })
    }

    /// Producer side of the pipeline; owns the sampling cadence.
    ///
    /// Each cycle starts an acquisition transfer, waits (bounded) for the
    /// completion wake-up and hands the samples to the relay. The deadline
    /// advances on an absolute schedule, so in-cycle latency never
    /// accumulates into drift.
    #[task(shared = [acquisition], priority = 2)]
    async fn sample_task(
        mut cx: sample_task::Context,
        mut completion_rx: Receiver<'static, RawSamplePair, 1>,
        mut handoff_tx: Sender<'static, RawSamplePair, 1>,
    ) {
        let acquisition = &mut cx.shared.acquisition;

        let period = SAMPLE_PERIOD_MILLIS.millis();
        let mut next_cycle = Systick::now();

        loop {
            match acquisition.lock(|acq| acq.start_transfer()) {
                Ok(()) => {
                    let completion = Systick::timeout_after(
                        COMPLETION_TIMEOUT_MILLIS.millis(),
                        completion_rx.recv(),
                    )
                    .await;

                    match completion {
                        Ok(Ok(samples)) => {
                            if handoff_tx.try_send(samples).is_err() {
                                defmt::warn!(
                                    "relay still busy, samples dropped ({=u32} total)",
                                    CYCLE_FAULTS.record(Fault::HandoffDrop)
                                );
                            }
                        }
                        Ok(Err(_)) => {
                            defmt::unreachable!("completion sender lives in the interrupt handler")
                        }
                        Err(_) => {
                            defmt::warn!(
                                "no completion within {=u64} ms ({=u32} total)",
                                COMPLETION_TIMEOUT_MILLIS,
                                CYCLE_FAULTS.record(Fault::CompletionTimeout)
                            );
                            acquisition.lock(|acq| acq.abort_transfer());
                        }
                    }
                }
                Err(err) => {
                    defmt::warn!(
                        "could not start acquisition: {} ({=u32} total)",
                        err,
                        CYCLE_FAULTS.record(Fault::Acquisition)
                    );
                }
            }

            next_cycle += period;
            Systick::delay_until(next_cycle).await;
        }
    }

    /// Consumer side: converts each handed-off pair and relays it to the
    /// bus.
    #[task(priority = 1)]
    async fn relay_task(
        _cx: relay_task::Context,
        mut handoff_rx: Receiver<'static, RawSamplePair, 1>,
        mut transmitter: TempTransmitter,
    ) {
        loop {
            let handoff =
                Systick::timeout_after(HANDOFF_TIMEOUT_MILLIS.millis(), handoff_rx.recv()).await;

            let samples = match handoff {
                Ok(Ok(samples)) => samples,
                Ok(Err(_)) => defmt::unreachable!("handoff sender lives in the sampling task"),
                Err(_) => {
                    defmt::warn!("no handoff for {=u64} ms, producer stalled?", HANDOFF_TIMEOUT_MILLIS);
                    continue;
                }
            };

            // A NAN here is a detected sensor fault and rides the frame as-is
            let temp_a = ntc::raw_to_celsius(samples.channel_a);
            let temp_b = ntc::raw_to_celsius(samples.channel_b);

            defmt::debug!("A: {=f32} °C, B: {=f32} °C", temp_a, temp_b);

            if let Err(err) = transmitter.send(temp_a, temp_b) {
                defmt::warn!(
                    "frame dropped: {} ({=u32} total)",
                    err,
                    CYCLE_FAULTS.record(Fault::TransmitDrop)
                );
            }
        }
    }

    /// Acquisition completion, interrupt context.
    ///
    /// Filters on the owning stream's flags, copies the finished samples
    /// out and raises the completion wake-up. Nothing heavier runs here.
    #[task(binds = DMA2_STREAM0, shared = [acquisition], local = [completion_tx], priority = 3)]
    fn acquisition_complete(mut cx: acquisition_complete::Context) {
        let event = cx.shared.acquisition.lock(|acq| acq.handle_interrupt());

        match event {
            Some(AcquisitionEvent::Complete(samples)) => {
                if cx.local.completion_tx.try_send(samples).is_err() {
                    defmt::warn!(
                        "completion wake-up lost ({=u32} total)",
                        CYCLE_FAULTS.record(Fault::LostWakeup)
                    );
                }
            }
            Some(AcquisitionEvent::Fault) => {
                defmt::warn!(
                    "acquisition transfer faulted ({=u32} total)",
                    CYCLE_FAULTS.record(Fault::Acquisition)
                );
            }
            None => {}
        }
    }

    /// Status LED and a periodic digest of the fault counters.
    #[task(priority = 1)]
    async fn heartbeat(_cx: heartbeat::Context, mut led: Pin<'B', 7, Output>) {
        let mut beats: u32 = 0;

        loop {
            led.toggle();
            beats += 1;

            if beats % 20 == 0 {
                defmt::info!(
                    "cycle faults: timeouts={=u32} lost_wakeups={=u32} handoff_drops={=u32} tx_drops={=u32} acquisition={=u32}",
                    CYCLE_FAULTS.count(Fault::CompletionTimeout),
                    CYCLE_FAULTS.count(Fault::LostWakeup),
                    CYCLE_FAULTS.count(Fault::HandoffDrop),
                    CYCLE_FAULTS.count(Fault::TransmitDrop),
                    CYCLE_FAULTS.count(Fault::Acquisition),
                );
            }

            Systick::delay(500u64.millis()).await;
        }
    }
}
