//! Hardware actuator abstraction.
//!
//! Zones are opaque identifiers mapped to GPIO pins by configuration. All
//! operations are idempotent and must not block: the sysfs implementation
//! does three tiny file writes, the no-op implementation only logs.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::ActuatorError;

/// Idempotent on/off control for a zone's valve.
pub trait Actuator: Send + Sync {
    fn setup(&self, zone: &str) -> Result<(), ActuatorError>;
    fn on(&self, zone: &str) -> Result<(), ActuatorError>;
    fn off(&self, zone: &str) -> Result<(), ActuatorError>;
}

/// Build the actuator configured for this deployment.
pub fn actuator_from_config(config: &Config) -> std::sync::Arc<dyn Actuator> {
    if config.gpio_enabled {
        std::sync::Arc::new(SysfsActuator::new(
            config.gpio_root.clone(),
            config.zone_pins.clone(),
        ))
    } else {
        std::sync::Arc::new(NoopActuator)
    }
}

/// Drives valves through the Linux sysfs GPIO interface.
///
/// The sysfs root is injectable so tests can point it at a temp directory.
pub struct SysfsActuator {
    root: PathBuf,
    pins: HashMap<String, u32>,
}

impl SysfsActuator {
    pub fn new(root: impl Into<PathBuf>, pins: HashMap<String, u32>) -> Self {
        Self { root: root.into(), pins }
    }

    fn pin_for(&self, zone: &str) -> Result<u32, ActuatorError> {
        self.pins
            .get(zone)
            .copied()
            .ok_or_else(|| ActuatorError::UnknownZone { zone: zone.to_string() })
    }

    fn write_value(&self, zone: &str, pin: u32, value: &str) -> Result<(), ActuatorError> {
        let path = self.root.join(format!("gpio{pin}")).join("value");
        fs::write(&path, value).map_err(|e| ActuatorError::WriteFailed {
            zone: zone.to_string(),
            reason: format!("{}: {e}", path.display()),
        })
    }
}

impl Actuator for SysfsActuator {
    fn setup(&self, zone: &str) -> Result<(), ActuatorError> {
        let pin = self.pin_for(zone)?;
        let pin_dir = self.root.join(format!("gpio{pin}"));

        // Exporting an already-exported pin fails with EBUSY; skip it.
        if !pin_dir.exists() {
            fs::write(self.root.join("export"), pin.to_string()).map_err(|e| {
                ActuatorError::WriteFailed {
                    zone: zone.to_string(),
                    reason: format!("export: {e}"),
                }
            })?;
        }

        let direction = pin_dir.join("direction");
        if direction.exists() {
            fs::write(&direction, "out").map_err(|e| ActuatorError::WriteFailed {
                zone: zone.to_string(),
                reason: format!("direction: {e}"),
            })?;
        }

        debug!(zone, pin, "GPIO pin set up");
        Ok(())
    }

    fn on(&self, zone: &str) -> Result<(), ActuatorError> {
        let pin = self.pin_for(zone)?;
        self.write_value(zone, pin, "1")?;
        info!(zone, pin, "Zone on");
        Ok(())
    }

    fn off(&self, zone: &str) -> Result<(), ActuatorError> {
        let pin = self.pin_for(zone)?;
        self.write_value(zone, pin, "0")?;
        info!(zone, pin, "Zone off");
        Ok(())
    }
}

/// Log-only actuator for hosts without GPIO hardware.
pub struct NoopActuator;

impl Actuator for NoopActuator {
    fn setup(&self, zone: &str) -> Result<(), ActuatorError> {
        debug!(zone, "GPIO disabled; setup skipped");
        Ok(())
    }

    fn on(&self, zone: &str) -> Result<(), ActuatorError> {
        info!(zone, "GPIO disabled; zone on (no-op)");
        Ok(())
    }

    fn off(&self, zone: &str) -> Result<(), ActuatorError> {
        info!(zone, "GPIO disabled; zone off (no-op)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs_fixture() -> (tempfile::TempDir, SysfsActuator) {
        let dir = tempfile::tempdir().unwrap();
        let pin_dir = dir.path().join("gpio7");
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("direction"), "in").unwrap();
        fs::write(pin_dir.join("value"), "0").unwrap();

        let pins = HashMap::from([("front".to_string(), 7)]);
        let actuator = SysfsActuator::new(dir.path(), pins);
        (dir, actuator)
    }

    #[test]
    fn setup_writes_direction() {
        let (dir, actuator) = sysfs_fixture();
        actuator.setup("front").unwrap();
        let direction = fs::read_to_string(dir.path().join("gpio7/direction")).unwrap();
        assert_eq!(direction, "out");
    }

    #[test]
    fn on_and_off_write_value() {
        let (dir, actuator) = sysfs_fixture();
        let value_path = dir.path().join("gpio7/value");

        actuator.on("front").unwrap();
        assert_eq!(fs::read_to_string(&value_path).unwrap(), "1");

        actuator.off("front").unwrap();
        assert_eq!(fs::read_to_string(&value_path).unwrap(), "0");

        // Idempotent: repeating is harmless.
        actuator.off("front").unwrap();
        assert_eq!(fs::read_to_string(&value_path).unwrap(), "0");
    }

    #[test]
    fn unknown_zone_is_an_error() {
        let (_dir, actuator) = sysfs_fixture();
        assert!(matches!(
            actuator.on("nope"),
            Err(ActuatorError::UnknownZone { .. })
        ));
    }

    #[test]
    fn setup_exports_unexported_pin() {
        let dir = tempfile::tempdir().unwrap();
        let pins = HashMap::from([("back".to_string(), 11)]);
        let actuator = SysfsActuator::new(dir.path(), pins);

        actuator.setup("back").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("export")).unwrap(), "11");
    }

    #[test]
    fn noop_actuator_accepts_anything() {
        let actuator = NoopActuator;
        actuator.setup("x").unwrap();
        actuator.on("x").unwrap();
        actuator.off("x").unwrap();
    }
}
