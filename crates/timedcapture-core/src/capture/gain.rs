//! RX gain configuration with HackRF-style stage quantization
//!
//! HackRF exposes three RX gain elements:
//! - `AMP`: RF amplifier, either off (0 dB) or on (~11 dB)
//! - `LNA`: IF gain, 0-40 dB in 8 dB steps
//! - `VGA`: baseband gain, 0-62 dB in 2 dB steps
//!
//! Gain configuration never fails the session. Setter errors fall back to
//! the overall gain when one was given, otherwise to device defaults.

use super::device::SdrDevice;
use serde::{Deserialize, Serialize};
use std::fmt;

/// RF amplifier gain when enabled
pub const AMP_ON_DB: f64 = 11.0;
pub const LNA_MAX_DB: i32 = 40;
pub const LNA_STEP_DB: i32 = 8;
pub const VGA_MAX_DB: i32 = 62;
pub const VGA_STEP_DB: i32 = 2;

/// Recognized gain element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GainStage {
    Amp,
    Lna,
    Vga,
}

impl GainStage {
    /// Parse a driver gain element name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "AMP" => Some(GainStage::Amp),
            "LNA" => Some(GainStage::Lna),
            "VGA" => Some(GainStage::Vga),
            _ => None,
        }
    }

    /// Driver element name
    pub fn name(&self) -> &'static str {
        match self {
            GainStage::Amp => "AMP",
            GainStage::Lna => "LNA",
            GainStage::Vga => "VGA",
        }
    }
}

impl fmt::Display for GainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested RX gains; `None` leaves a stage untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GainSettings {
    /// RF amplifier on/off
    #[serde(default)]
    pub amp: Option<bool>,
    /// IF (LNA) gain in dB
    #[serde(default)]
    pub lna_db: Option<i32>,
    /// Baseband (VGA) gain in dB
    #[serde(default)]
    pub vga_db: Option<i32>,
    /// Overall gain in dB, used when no stage is requested or as fallback
    #[serde(default)]
    pub overall_db: Option<f64>,
}

impl GainSettings {
    /// Whether any individual stage was requested
    pub fn has_stage_request(&self) -> bool {
        self.amp.is_some() || self.lna_db.is_some() || self.vga_db.is_some()
    }

    /// Requested stages with their quantized values, in AMP/LNA/VGA order
    pub fn quantized(&self) -> Vec<(GainStage, f64)> {
        let mut stages = Vec::with_capacity(3);
        if let Some(on) = self.amp {
            stages.push((GainStage::Amp, quantize_amp(on)));
        }
        if let Some(db) = self.lna_db {
            stages.push((GainStage::Lna, f64::from(quantize_lna(db))));
        }
        if let Some(db) = self.vga_db {
            stages.push((GainStage::Vga, f64::from(quantize_vga(db))));
        }
        stages
    }
}

pub fn quantize_amp(on: bool) -> f64 {
    if on {
        AMP_ON_DB
    } else {
        0.0
    }
}

/// Floor to an 8 dB step within 0-40 dB
pub fn quantize_lna(db: i32) -> i32 {
    (db.div_euclid(LNA_STEP_DB) * LNA_STEP_DB).clamp(0, LNA_MAX_DB)
}

/// Floor to a 2 dB step within 0-62 dB
pub fn quantize_vga(db: i32) -> i32 {
    (db.div_euclid(VGA_STEP_DB) * VGA_STEP_DB).clamp(0, VGA_MAX_DB)
}

/// What gain configuration actually did
#[derive(Debug, Clone, PartialEq)]
pub enum GainOutcome {
    /// Individual stages were set (possibly none, if the device lacks them)
    Stages(Vec<(GainStage, f64)>),
    /// Overall gain applied because no stage was requested
    Overall(f64),
    /// A stage setter failed and the overall gain was applied instead
    FallbackOverall { reason: String, value_db: f64 },
    /// Nothing applied; the device keeps its defaults
    DeviceDefaults { reason: Option<String> },
}

/// Gain stages the device reports that we know how to drive
pub fn recognized_stages(device: &dyn SdrDevice) -> Vec<GainStage> {
    let mut stages: Vec<GainStage> = Vec::new();
    for stage in device
        .list_gain_stages()
        .iter()
        .filter_map(|name| GainStage::from_name(name))
    {
        if !stages.contains(&stage) {
            stages.push(stage);
        }
    }
    stages
}

/// Apply requested gains to a device
pub fn apply_gains(device: &mut dyn SdrDevice, settings: &GainSettings) -> GainOutcome {
    let available = recognized_stages(device);
    tracing::debug!(?available, "Gain stages available");

    let outcome = match set_stages(device, settings, &available) {
        Ok(outcome) => outcome,
        Err(reason) => {
            tracing::warn!(error = %reason, "Could not set individual gains");
            fallback(device, settings, reason)
        }
    };

    match &outcome {
        GainOutcome::Stages(applied) => {
            for (stage, value) in applied {
                tracing::info!(stage = %stage, gain_db = value, "Gain set");
            }
        }
        GainOutcome::Overall(value) => tracing::info!(gain_db = value, "Overall gain set"),
        GainOutcome::FallbackOverall { value_db, .. } => {
            tracing::info!(gain_db = value_db, "Fell back to overall gain")
        }
        GainOutcome::DeviceDefaults { .. } => tracing::info!("Using device default gains"),
    }

    outcome
}

fn set_stages(
    device: &mut dyn SdrDevice,
    settings: &GainSettings,
    available: &[GainStage],
) -> Result<GainOutcome, String> {
    if !settings.has_stage_request() {
        return match settings.overall_db {
            Some(value) => {
                device
                    .set_overall_gain(value)
                    .map_err(|e| e.to_string())?;
                Ok(GainOutcome::Overall(value))
            }
            None => Ok(GainOutcome::DeviceDefaults { reason: None }),
        };
    }

    let mut applied = Vec::new();
    for (stage, value) in settings.quantized() {
        if !available.contains(&stage) {
            tracing::debug!(stage = %stage, "Gain stage not present on device, skipping");
            continue;
        }
        device
            .set_gain(stage.name(), value)
            .map_err(|e| format!("{stage}: {e}"))?;
        applied.push((stage, value));
    }
    Ok(GainOutcome::Stages(applied))
}

fn fallback(device: &mut dyn SdrDevice, settings: &GainSettings, reason: String) -> GainOutcome {
    let Some(value_db) = settings.overall_db else {
        return GainOutcome::DeviceDefaults {
            reason: Some(reason),
        };
    };

    match device.set_overall_gain(value_db) {
        Ok(()) => GainOutcome::FallbackOverall { reason, value_db },
        Err(e) => {
            tracing::warn!(error = %e, "Overall gain fallback failed");
            GainOutcome::DeviceDefaults {
                reason: Some(format!("{reason}; overall gain: {e}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sim::{SimulatedConfig, SimulatedDevice};

    fn device(config: SimulatedConfig) -> SimulatedDevice {
        SimulatedDevice::new(config)
    }

    #[test]
    fn test_quantize_lna() {
        assert_eq!(quantize_lna(0), 0);
        assert_eq!(quantize_lna(7), 0);
        assert_eq!(quantize_lna(17), 16);
        assert_eq!(quantize_lna(40), 40);
        assert_eq!(quantize_lna(47), 40);
        assert_eq!(quantize_lna(-3), 0);
    }

    #[test]
    fn test_quantize_vga() {
        assert_eq!(quantize_vga(21), 20);
        assert_eq!(quantize_vga(62), 62);
        assert_eq!(quantize_vga(70), 62);
        assert_eq!(quantize_vga(-1), 0);
    }

    #[test]
    fn test_stage_names_case_insensitive() {
        assert_eq!(GainStage::from_name("amp"), Some(GainStage::Amp));
        assert_eq!(GainStage::from_name("Lna"), Some(GainStage::Lna));
        assert_eq!(GainStage::from_name("VGA"), Some(GainStage::Vga));
        assert_eq!(GainStage::from_name("TIA"), None);
    }

    #[test]
    fn test_applies_quantized_stages() {
        let mut dev = device(SimulatedConfig::default());
        let settings = GainSettings {
            amp: Some(true),
            lna_db: Some(20),
            vga_db: Some(31),
            overall_db: None,
        };
        let outcome = apply_gains(&mut dev, &settings);
        assert_eq!(
            outcome,
            GainOutcome::Stages(vec![
                (GainStage::Amp, 11.0),
                (GainStage::Lna, 16.0),
                (GainStage::Vga, 30.0),
            ])
        );
        assert_eq!(dev.gain("LNA"), Some(16.0));
    }

    #[test]
    fn test_skips_missing_stages() {
        let mut dev = device(SimulatedConfig {
            gain_stages: vec!["lna".to_string(), "TIA".to_string()],
            ..SimulatedConfig::default()
        });
        let settings = GainSettings {
            amp: Some(false),
            lna_db: Some(8),
            ..GainSettings::default()
        };
        let outcome = apply_gains(&mut dev, &settings);
        assert_eq!(outcome, GainOutcome::Stages(vec![(GainStage::Lna, 8.0)]));
    }

    #[test]
    fn test_recognized_stages_drop_repeats() {
        let dev = device(SimulatedConfig {
            gain_stages: vec![
                "AMP".to_string(),
                "LNA".to_string(),
                "amp".to_string(),
                "TIA".to_string(),
                "lna".to_string(),
            ],
            ..SimulatedConfig::default()
        });
        assert_eq!(recognized_stages(&dev), vec![GainStage::Amp, GainStage::Lna]);
    }

    #[test]
    fn test_overall_when_no_stage_requested() {
        let mut dev = device(SimulatedConfig::default());
        let settings = GainSettings {
            overall_db: Some(30.0),
            ..GainSettings::default()
        };
        assert_eq!(apply_gains(&mut dev, &settings), GainOutcome::Overall(30.0));
        assert_eq!(dev.overall_gain(), Some(30.0));
    }

    #[test]
    fn test_defaults_when_nothing_requested() {
        let mut dev = device(SimulatedConfig::default());
        let outcome = apply_gains(&mut dev, &GainSettings::default());
        assert_eq!(outcome, GainOutcome::DeviceDefaults { reason: None });
    }

    #[test]
    fn test_setter_failure_falls_back_to_overall() {
        let mut dev = device(SimulatedConfig {
            fail_gain_setters: true,
            ..SimulatedConfig::default()
        });
        let settings = GainSettings {
            lna_db: Some(16),
            overall_db: Some(25.0),
            ..GainSettings::default()
        };
        match apply_gains(&mut dev, &settings) {
            GainOutcome::FallbackOverall { value_db, reason } => {
                assert_eq!(value_db, 25.0);
                assert!(reason.contains("LNA"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_setter_failure_without_overall_keeps_defaults() {
        let mut dev = device(SimulatedConfig {
            fail_gain_setters: true,
            ..SimulatedConfig::default()
        });
        let settings = GainSettings {
            vga_db: Some(10),
            ..GainSettings::default()
        };
        assert!(matches!(
            apply_gains(&mut dev, &settings),
            GainOutcome::DeviceDefaults { reason: Some(_) }
        ));
    }
}
