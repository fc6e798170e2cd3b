//! Load cell scale (HX711)
//!
//! Raw 24-bit readings are averaged, offset by the tare value and divided by
//! the reference unit (raw counts per gram). Calibration is persisted as JSON
//! so the scale survives restarts without re-calibrating.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Anything that produces raw load cell counts
pub trait LoadCell: Send {
    fn read_raw(&mut self) -> Result<i32>;

    fn power_down(&mut self) {}
}

/// Anything the pipeline can weigh with
pub trait WeightSensor: Send + 'static {
    fn weight_grams(&mut self) -> Result<f64>;

    fn power_down(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Raw counts per gram
    pub reference_unit: f64,
    #[serde(default)]
    pub offset: f64,
}

impl Calibration {
    pub fn load(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Calibration>(&contents) {
            Ok(cal) if cal.reference_unit != 0.0 => Some(cal),
            Ok(_) => {
                tracing::warn!("Ignoring calibration with zero reference unit at {:?}", path);
                None
            }
            Err(e) => {
                tracing::error!("Error loading calibration data: {}", e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Saved scale calibration to {:?}", path);
        Ok(())
    }
}

pub struct Scale<C: LoadCell> {
    cell: C,
    samples: usize,
    offset: f64,
    /// Set only by `tare`; a loaded offset may be stale
    tared: bool,
    reference_unit: Option<f64>,
    calibration_path: PathBuf,
}

impl<C: LoadCell> Scale<C> {
    /// Wrap a load cell, picking up a saved calibration if one exists
    pub fn new(cell: C, samples: usize, calibration_path: impl Into<PathBuf>) -> Self {
        let calibration_path = calibration_path.into();
        let calibration = Calibration::load(&calibration_path);
        if calibration.is_none() {
            tracing::warn!("Scale not calibrated; run `foodbot calibrate <grams>`");
        }

        Self {
            cell,
            samples: samples.max(1),
            offset: calibration.map(|c| c.offset).unwrap_or(0.0),
            tared: false,
            reference_unit: calibration.map(|c| c.reference_unit),
            calibration_path,
        }
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.reference_unit.map(|reference_unit| Calibration {
            reference_unit,
            offset: self.offset,
        })
    }

    fn average_raw(&mut self) -> Result<f64> {
        let mut total = 0.0;
        for _ in 0..self.samples {
            total += f64::from(self.cell.read_raw()?);
        }
        Ok(total / self.samples as f64)
    }

    /// Treat whatever is on the scale now as zero. An existing calibration
    /// is re-saved with the new offset.
    pub fn tare(&mut self) -> Result<f64> {
        self.offset = self.average_raw()?;
        self.tared = true;
        if let Some(calibration) = self.calibration() {
            calibration.save(&self.calibration_path)?;
        }
        tracing::info!("Scale tared (offset {:.1})", self.offset);
        Ok(self.offset)
    }

    /// Derive the reference unit from a known weight sitting on a tared scale
    pub fn calibrate(&mut self, known_grams: f64) -> Result<Calibration> {
        if !(known_grams.is_finite() && known_grams > 0.0) {
            return Err(Error::InvalidInput(format!(
                "calibration weight must be positive, got {}",
                known_grams
            )));
        }

        if !self.tared {
            return Err(Error::Scale("tare the scale first".to_string()));
        }

        let delta = self.average_raw()? - self.offset;
        if delta == 0.0 {
            return Err(Error::Scale(
                "no change in reading; is the weight on the scale?".to_string(),
            ));
        }

        let calibration = Calibration {
            reference_unit: delta / known_grams,
            offset: self.offset,
        };
        self.reference_unit = Some(calibration.reference_unit);
        calibration.save(&self.calibration_path)?;

        tracing::info!(
            "Calibration complete. Reference unit: {}",
            calibration.reference_unit
        );
        Ok(calibration)
    }
}

impl<C: LoadCell + 'static> WeightSensor for Scale<C> {
    /// Averaged weight rounded to 0.1 g
    fn weight_grams(&mut self) -> Result<f64> {
        let average = self.average_raw()?;
        let grams = match self.reference_unit {
            Some(unit) => (average - self.offset) / unit,
            None => {
                tracing::warn!("Scale not calibrated. Returning raw value / 10");
                average / 10.0
            }
        };
        Ok(round_tenth(grams))
    }

    fn power_down(&mut self) {
        self.cell.power_down();
    }
}

/// Random plausible weights for running without a load cell
#[derive(Debug, Clone)]
pub struct SimulatedScale {
    min_grams: f64,
    max_grams: f64,
}

impl Default for SimulatedScale {
    fn default() -> Self {
        Self {
            min_grams: 50.0,
            max_grams: 500.0,
        }
    }
}

impl WeightSensor for SimulatedScale {
    fn weight_grams(&mut self) -> Result<f64> {
        std::thread::sleep(std::time::Duration::from_millis(500));
        let grams = rand::thread_rng().gen_range(self.min_grams..=self.max_grams);
        Ok(round_tenth(grams))
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(feature = "hardware")]
pub use hx711::Hx711;

#[cfg(feature = "hardware")]
mod hx711 {
    use super::LoadCell;
    use crate::error::{Error, Result};
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use std::time::{Duration, Instant};

    /// Bit-banged HX711, channel A at gain 128
    pub struct Hx711 {
        dout: InputPin,
        sck: OutputPin,
        ready_timeout: Duration,
    }

    impl Hx711 {
        pub fn new(dout_pin: u8, sck_pin: u8, ready_timeout: Duration) -> Result<Self> {
            let gpio = Gpio::new()?;
            let dout = gpio.get(dout_pin)?.into_input();
            let mut sck = gpio.get(sck_pin)?.into_output_low();
            // Holding SCK high for >60us powers the chip down; pulse to reset
            sck.set_high();
            std::thread::sleep(Duration::from_micros(100));
            sck.set_low();

            tracing::info!("HX711 ready on DOUT={} SCK={}", dout_pin, sck_pin);
            Ok(Self {
                dout,
                sck,
                ready_timeout,
            })
        }

        fn wait_ready(&self) -> Result<()> {
            let deadline = Instant::now() + self.ready_timeout;
            while self.dout.is_high() {
                if Instant::now() >= deadline {
                    return Err(Error::Scale("HX711 not ready (DOUT stayed high)".to_string()));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }

        fn pulse(&mut self) {
            self.sck.set_high();
            spin_micros(1);
            self.sck.set_low();
            spin_micros(1);
        }
    }

    impl LoadCell for Hx711 {
        fn read_raw(&mut self) -> Result<i32> {
            self.wait_ready()?;

            let mut value: u32 = 0;
            for _ in 0..24 {
                self.sck.set_high();
                spin_micros(1);
                value = (value << 1) | u32::from(self.dout.is_high());
                self.sck.set_low();
                spin_micros(1);
            }
            // 25th pulse selects channel A / gain 128 for the next conversion
            self.pulse();

            Ok(super::sign_extend_24(value))
        }

        fn power_down(&mut self) {
            self.sck.set_low();
            self.sck.set_high();
            std::thread::sleep(Duration::from_micros(100));
            tracing::info!("HX711 powered down");
        }
    }

    fn spin_micros(us: u64) {
        let start = Instant::now();
        while start.elapsed() < Duration::from_micros(us) {
            std::hint::spin_loop();
        }
    }
}

/// Interpret the low 24 bits as two's complement
pub fn sign_extend_24(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays queued readings, repeating the last one
    struct FakeCell {
        readings: VecDeque<i32>,
        last: i32,
        powered_down: bool,
    }

    impl FakeCell {
        fn new(readings: &[i32]) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
                last: 0,
                powered_down: false,
            }
        }
    }

    impl LoadCell for FakeCell {
        fn read_raw(&mut self) -> Result<i32> {
            if let Some(next) = self.readings.pop_front() {
                self.last = next;
            }
            Ok(self.last)
        }

        fn power_down(&mut self) {
            self.powered_down = true;
        }
    }

    struct BrokenCell;

    impl LoadCell for BrokenCell {
        fn read_raw(&mut self) -> Result<i32> {
            Err(Error::Scale("HX711 not ready (DOUT stayed high)".to_string()))
        }
    }

    #[test]
    fn test_uncalibrated_returns_raw_over_ten() {
        let dir = tempfile::tempdir().unwrap();
        let mut scale = Scale::new(
            FakeCell::new(&[1000, 1010, 990]),
            3,
            dir.path().join("cal.json"),
        );

        assert!(scale.calibration().is_none());
        assert_eq!(scale.weight_grams().unwrap(), 100.0);
    }

    #[test]
    fn test_tare_calibrate_weigh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        // 4 tare readings at 8000, then 4 readings with 100 g on: 8000 + 100 * 420
        let mut readings = vec![8000; 4];
        readings.extend([50_000; 4]);
        let mut scale = Scale::new(FakeCell::new(&readings), 4, &path);

        assert_eq!(scale.tare().unwrap(), 8000.0);
        let cal = scale.calibrate(100.0).unwrap();
        assert_eq!(cal.reference_unit, 420.0);
        assert_eq!(cal.offset, 8000.0);
        assert_eq!(scale.weight_grams().unwrap(), 100.0);

        // Saved calibration is picked up by a fresh scale
        let mut reloaded = Scale::new(FakeCell::new(&[8000 + 420 * 250 + 42]), 1, &path);
        assert!(reloaded.calibration().is_some());
        assert_eq!(reloaded.weight_grams().unwrap(), 250.1);
    }

    #[test]
    fn test_tare_updates_saved_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        Calibration {
            reference_unit: 420.0,
            offset: 8000.0,
        }
        .save(&path)
        .unwrap();

        let mut scale = Scale::new(FakeCell::new(&[9000]), 1, &path);
        scale.tare().unwrap();
        assert_eq!(Calibration::load(&path).unwrap().offset, 9000.0);
    }

    #[test]
    fn test_calibrate_rejects_bad_weight() {
        let dir = tempfile::tempdir().unwrap();
        let mut scale = Scale::new(FakeCell::new(&[100]), 1, dir.path().join("cal.json"));

        assert!(matches!(scale.calibrate(0.0), Err(Error::InvalidInput(_))));
        assert!(matches!(scale.calibrate(-5.0), Err(Error::InvalidInput(_))));
        assert!(matches!(scale.calibrate(f64::NAN), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_calibrate_requires_tare() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        let mut scale = Scale::new(FakeCell::new(&[850_000]), 1, &path);

        match scale.calibrate(100.0) {
            Err(Error::Scale(message)) => assert!(message.contains("tare")),
            other => panic!("expected a tare error, got {:?}", other),
        }
        assert!(!path.exists());

        // A saved offset does not stand in for taring this session
        Calibration {
            reference_unit: 420.0,
            offset: 8000.0,
        }
        .save(&path)
        .unwrap();
        let mut reloaded = Scale::new(FakeCell::new(&[50_000]), 1, &path);
        assert!(matches!(reloaded.calibrate(100.0), Err(Error::Scale(_))));
        assert_eq!(Calibration::load(&path).unwrap().reference_unit, 420.0);
    }

    #[test]
    fn test_calibrate_without_load_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        let mut scale = Scale::new(FakeCell::new(&[500]), 2, &path);

        scale.tare().unwrap();
        assert!(matches!(scale.calibrate(100.0), Err(Error::Scale(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_read_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut scale = Scale::new(BrokenCell, 10, dir.path().join("cal.json"));
        assert!(scale.weight_grams().is_err());
    }

    #[test]
    fn test_zero_reference_unit_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        std::fs::write(&path, r#"{"reference_unit": 0}"#).unwrap();
        assert!(Calibration::load(&path).is_none());

        // Files written before the offset was stored still load
        std::fs::write(&path, r#"{"reference_unit": 21.5}"#).unwrap();
        let cal = Calibration::load(&path).unwrap();
        assert_eq!(cal.reference_unit, 21.5);
        assert_eq!(cal.offset, 0.0);
    }

    #[test]
    fn test_power_down_reaches_cell() {
        let dir = tempfile::tempdir().unwrap();
        let mut scale = Scale::new(FakeCell::new(&[0]), 1, dir.path().join("cal.json"));
        scale.power_down();
        assert!(scale.cell.powered_down);
    }

    #[test]
    fn test_sign_extend_24() {
        assert_eq!(sign_extend_24(0x000001), 1);
        assert_eq!(sign_extend_24(0x7FFFFF), 8_388_607);
        assert_eq!(sign_extend_24(0xFFFFFF), -1);
        assert_eq!(sign_extend_24(0x800000), -8_388_608);
    }

    #[test]
    fn test_simulated_scale_range() {
        let mut scale = SimulatedScale::default();
        let grams = scale.weight_grams().unwrap();
        assert!((50.0..=500.0).contains(&grams));
        assert_eq!(round_tenth(grams), grams);
    }
}
