//! Battery voltage sampling over the STM32G0 ADC.
//!
//! The battery divider feeds PA0 and the internal voltage reference provides
//! the calibration point: each environmental pass refreshes a VREFINT-derived
//! VDDA estimate, and the battery read scales the raw PA0 sample against it.

use core::ptr;

use embassy_stm32::adc::{Adc, SampleTime, VrefInt};
use embassy_stm32::peripherals::{ADC1, PA0};
use embassy_stm32::Peri;

use tracker_core::orchestrator::Sensors;

/// Factory-programmed calibration constant sampled at 3.0 V.
const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;

/// Millivolts at which the calibration constant was recorded.
const VREFINT_CAL_MV: u32 = 3_000;

/// Full-scale reading for 12-bit conversions.
const ADC_FULL_SCALE: u32 = 4_095;

/// External divider halves the battery voltage before it reaches PA0.
const BATTERY_DIVIDER: u32 = 2;

/// Reads the factory-trimmed VREFINT calibration constant.
fn read_vrefint_calibration() -> u16 {
    unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) }
}

/// ADC wrapper producing debounce-friendly battery readings in millivolts.
pub struct BatteryMonitor {
    adc: Adc<'static, ADC1>,
    vrefint: VrefInt,
    battery_pin: Peri<'static, PA0>,
    vdda_millivolts: u32,
    discard_next: bool,
}

impl BatteryMonitor {
    /// Constructs the monitor and enables the internal voltage reference.
    pub fn new(mut adc: Adc<'static, ADC1>, battery_pin: Peri<'static, PA0>) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        let vrefint = adc.enable_vrefint();
        Self {
            adc,
            vrefint,
            battery_pin,
            vdda_millivolts: VREFINT_CAL_MV,
            discard_next: true,
        }
    }

    fn read_vrefint(&mut self) -> u16 {
        self.adc.blocking_read(&mut self.vrefint)
    }
}

impl Sensors for BatteryMonitor {
    fn read_voltage(&mut self) -> u16 {
        let raw = u32::from(self.adc.blocking_read(&mut self.battery_pin));
        let sensed = self.vdda_millivolts * raw / ADC_FULL_SCALE;
        u16::try_from(sensed * BATTERY_DIVIDER).unwrap_or(u16::MAX)
    }

    fn read_values(&mut self) {
        // First conversion after power-up is noisy on this part.
        if self.discard_next {
            let _ = self.read_vrefint();
            self.discard_next = false;
        }

        let reading = u32::from(self.read_vrefint());
        if reading > 0 {
            self.vdda_millivolts =
                u32::from(read_vrefint_calibration()) * VREFINT_CAL_MV / reading;
        }
    }
}
