//! Raw ADC code to Celsius conversion for the NTC thermistor channels.
//!
//! The thermistor sits in a voltage divider below a fixed pull-up resistor.
//! Its resistance is recovered from the divider ratio and fed through the
//! Steinhart-Hart equation:
//!
//! ```text
//! R_therm = R_pullup / (ADC_MAX / raw - 1)
//! 1 / T   = A + B * ln(R_therm) + C * ln(R_therm)^3      (T in Kelvin)
//! ```

use crate::ADC_MAX_CODE;

/// Pull-up resistor in series with the thermistor, in ohms.
const PULL_UP_OHM: f32 = 3300.0;

const STEINHART_A: f32 = 0.000_873_652_8;
const STEINHART_B: f32 = 0.000_253_893;
const STEINHART_C: f32 = 0.000_000_181_6;

const KELVIN_OFFSET: f32 = 273.15;

/// Converts a raw 12-bit code into degrees Celsius.
///
/// Pure function of its input; safe to call from any context.
///
/// Both ends of the code range indicate a wiring fault rather than a
/// temperature: 0 means the divider is shorted low, while 4095 (the top code
/// itself included) means the thermistor is open-circuit. Either boundary
/// yields [`f32::NAN`] as the fault sentinel, which callers pass along
/// instead of treating as a measurement.
pub fn raw_to_celsius(raw: u16) -> f32 {
    if raw == 0 || raw >= ADC_MAX_CODE {
        return f32::NAN;
    }

    let ratio = f32::from(ADC_MAX_CODE) / f32::from(raw);
    let r_therm = PULL_UP_OHM / (ratio - 1.0);

    let ln_r = libm::logf(r_therm);
    let kelvin = 1.0 / (STEINHART_A + STEINHART_B * ln_r + STEINHART_C * ln_r * ln_r * ln_r);

    kelvin - KELVIN_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_faults() {
        assert!(raw_to_celsius(0).is_nan());
        assert!(raw_to_celsius(ADC_MAX_CODE).is_nan());
        // Saturated codes past the 12-bit range behave like the top code
        assert!(raw_to_celsius(u16::MAX).is_nan());
    }

    #[test]
    fn interior_codes_are_finite() {
        for raw in 1..ADC_MAX_CODE {
            let celsius = raw_to_celsius(raw);
            assert!(
                celsius.is_finite(),
                "code {raw} produced non-finite {celsius}"
            );
        }
    }

    #[test]
    fn conversion_is_pure() {
        for raw in [1, 100, 2048, 4094] {
            assert_eq!(raw_to_celsius(raw).to_bits(), raw_to_celsius(raw).to_bits());
        }
    }

    #[test]
    fn matches_closed_form_at_midpoint() {
        // Around half scale the divider ratio is ~2 and the thermistor
        // resistance equals the pull-up. Evaluate the model independently in
        // f64 and require agreement within f32 rounding slack.
        let raw = 2048u16;

        let ratio = 4095.0f64 / f64::from(raw);
        let r_therm = 3300.0f64 / (ratio - 1.0);
        let ln_r = r_therm.ln();
        let kelvin =
            1.0 / (0.000_873_652_8 + 0.000_253_893 * ln_r + 0.000_000_181_6 * ln_r.powi(3));
        let expected = kelvin - 273.15;

        let actual = f64::from(raw_to_celsius(raw));
        assert!(
            (actual - expected).abs() < 0.05,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn monotonically_decreasing_over_code_range() {
        // NTC under a pull-up: a hotter sensor pulls the node lower, so
        // temperature falls as the code rises.
        let mut prev = raw_to_celsius(1);
        for raw in 2..ADC_MAX_CODE {
            let t = raw_to_celsius(raw);
            assert!(t < prev, "not decreasing at code {raw}");
            prev = t;
        }
    }
}
