use crate::core::{class_dispatch, ClassKind, DriverObject, ObjectCore, ObjectId, PropertyValue, Selector};
use crate::engine::IoShared;
use crate::error::Result;
use crate::hal::types::Direction;
use crate::plugin::Host;
use simple_audio_macros::DriverClass;
use std::sync::{Arc, Mutex, MutexGuard};

/// Raw steps to decibels, one step per dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeCurve {
    pub raw_min: u32,
    pub raw_max: u32,
    pub db_min: f64,
    pub db_max: f64,
}

impl VolumeCurve {
    pub const DEFAULT: VolumeCurve = VolumeCurve {
        raw_min: 0,
        raw_max: 96,
        db_min: -96.0,
        db_max: 0.0,
    };

    fn span(&self) -> f64 {
        f64::from(self.raw_max - self.raw_min)
    }

    pub fn clamp_raw(&self, raw: u32) -> u32 {
        raw.clamp(self.raw_min, self.raw_max)
    }

    pub fn raw_to_db(&self, raw: u32) -> f64 {
        let t = f64::from(self.clamp_raw(raw) - self.raw_min) / self.span();
        self.db_min + t * (self.db_max - self.db_min)
    }

    pub fn db_to_raw(&self, db: f64) -> u32 {
        let db = db.clamp(self.db_min, self.db_max);
        let t = (db - self.db_min) / (self.db_max - self.db_min);
        self.raw_min + (t * self.span()).round() as u32
    }

    pub fn raw_to_scalar(&self, raw: u32) -> f64 {
        f64::from(self.clamp_raw(raw) - self.raw_min) / self.span()
    }

    pub fn scalar_to_raw(&self, scalar: f64) -> u32 {
        self.raw_min + (scalar.clamp(0.0, 1.0) * self.span()).round() as u32
    }

    /// Linear amplitude applied by the IO thread. The bottom step is silence.
    pub fn gain(&self, raw: u32) -> f32 {
        let raw = self.clamp_raw(raw);
        if raw == self.raw_min {
            return 0.0;
        }
        10f64.powf(self.raw_to_db(raw) / 20.0) as f32
    }
}

fn lock_value<T>(value: &Mutex<T>) -> MutexGuard<'_, T> {
    value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const VOLUME_SELECTORS: [Selector; 3] = [Selector::RAW_VALUE, Selector::SCALAR_VALUE, Selector::DECIBEL_VALUE];

/// Gain control for one direction of a device
#[derive(DriverClass)]
#[driver_class(name = "VolumeControl", kind = "Control", class_id = "vlme", base_class = "levl")]
#[property(selector = "SCOPE", get = "scope_value")]
#[property(selector = "RAW_VALUE", get = "raw_value", set = "set_raw_value")]
#[property(selector = "RAW_RANGE", get = "raw_range_value")]
#[property(selector = "SCALAR_VALUE", get = "scalar_value", set = "set_scalar_value")]
#[property(selector = "DECIBEL_VALUE", get = "decibel_value", set = "set_decibel_value")]
#[property(selector = "DECIBEL_RANGE", get = "decibel_range_value")]
pub struct VolumeControl {
    core: ObjectCore,
    scope: Direction,
    curve: VolumeCurve,
    raw: Mutex<u32>,
    io: Arc<IoShared>,
    host: Arc<dyn Host>,
}

impl VolumeControl {
    pub(crate) fn new(owner: ObjectId, scope: Direction, io: Arc<IoShared>, host: Arc<dyn Host>) -> Self {
        let curve = VolumeCurve::DEFAULT;
        io.params().set_gain(scope, curve.gain(curve.raw_max));
        Self {
            core: ObjectCore::new(ClassKind::Control, owner),
            scope,
            curve,
            raw: Mutex::new(curve.raw_max),
            io,
            host,
        }
    }

    pub fn scope(&self) -> Direction {
        self.scope
    }

    pub fn curve(&self) -> VolumeCurve {
        self.curve
    }

    pub fn raw(&self) -> u32 {
        *lock_value(&self.raw)
    }

    pub fn decibels(&self) -> f64 {
        self.curve.raw_to_db(self.raw())
    }

    pub fn scalar(&self) -> f64 {
        self.curve.raw_to_scalar(self.raw())
    }

    /// Stores the clamped value and publishes the gain for the next IO cycle.
    pub fn set_raw(&self, raw: u32) -> u32 {
        let raw = self.curve.clamp_raw(raw);
        let changed = {
            let mut current = lock_value(&self.raw);
            let changed = *current != raw;
            *current = raw;
            self.io.params().set_gain(self.scope, self.curve.gain(raw));
            changed
        };

        if changed {
            tracing::debug!(control = %self.id(), raw, db = self.curve.raw_to_db(raw), "volume changed");
            self.host.properties_changed(self.id(), &VOLUME_SELECTORS);
        }
        raw
    }

    fn scope_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Direction(self.scope))
    }

    fn raw_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(self.raw()))
    }

    fn set_raw_value(&self, value: PropertyValue) -> Result<()> {
        self.set_raw(value.as_u32()?);
        Ok(())
    }

    fn raw_range_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Range {
            min: f64::from(self.curve.raw_min),
            max: f64::from(self.curve.raw_max),
        })
    }

    fn scalar_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::F64(self.scalar()))
    }

    fn set_scalar_value(&self, value: PropertyValue) -> Result<()> {
        self.set_raw(self.curve.scalar_to_raw(value.as_f64()?));
        Ok(())
    }

    fn decibel_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::F64(self.decibels()))
    }

    fn set_decibel_value(&self, value: PropertyValue) -> Result<()> {
        self.set_raw(self.curve.db_to_raw(value.as_f64()?));
        Ok(())
    }

    fn decibel_range_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Range {
            min: self.curve.db_min,
            max: self.curve.db_max,
        })
    }
}

impl DriverObject for VolumeControl {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    class_dispatch!();
}

/// Mute switch for one direction of a device
#[derive(DriverClass)]
#[driver_class(name = "MuteControl", kind = "Control", class_id = "mute", base_class = "togl")]
#[property(selector = "SCOPE", get = "scope_value")]
#[property(selector = "BOOLEAN_VALUE", get = "muted_value", set = "set_muted_value")]
#[property(selector = "RAW_VALUE", get = "raw_value", set = "set_raw_value")]
pub struct MuteControl {
    core: ObjectCore,
    scope: Direction,
    muted: Mutex<bool>,
    io: Arc<IoShared>,
    host: Arc<dyn Host>,
}

impl MuteControl {
    pub(crate) fn new(owner: ObjectId, scope: Direction, io: Arc<IoShared>, host: Arc<dyn Host>) -> Self {
        io.params().set_muted(scope, false);
        Self {
            core: ObjectCore::new(ClassKind::Control, owner),
            scope,
            muted: Mutex::new(false),
            io,
            host,
        }
    }

    pub fn scope(&self) -> Direction {
        self.scope
    }

    pub fn is_muted(&self) -> bool {
        *lock_value(&self.muted)
    }

    pub fn set_muted(&self, muted: bool) {
        let changed = {
            let mut current = lock_value(&self.muted);
            let changed = *current != muted;
            *current = muted;
            self.io.params().set_muted(self.scope, muted);
            changed
        };

        if changed {
            tracing::debug!(control = %self.id(), muted, "mute changed");
            self.host
                .properties_changed(self.id(), &[Selector::BOOLEAN_VALUE, Selector::RAW_VALUE]);
        }
    }

    fn scope_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Direction(self.scope))
    }

    fn muted_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Bool(self.is_muted()))
    }

    fn set_muted_value(&self, value: PropertyValue) -> Result<()> {
        self.set_muted(value.as_bool()?);
        Ok(())
    }

    fn raw_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(u32::from(self.is_muted())))
    }

    fn set_raw_value(&self, value: PropertyValue) -> Result<()> {
        self.set_muted(value.as_u32()? != 0);
        Ok(())
    }
}

impl DriverObject for MuteControl {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    class_dispatch!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FourCc;
    use crate::observability::DeviceMetrics;
    use crate::plugin::NullHost;
    use crate::ErrorKind;

    fn io() -> Arc<IoShared> {
        Arc::new(IoShared::new(Arc::new(DeviceMetrics::new("test"))))
    }

    #[test]
    fn test_volume_curve_mapping() {
        let curve = VolumeCurve::DEFAULT;
        assert_eq!(curve.raw_to_db(96), 0.0);
        assert_eq!(curve.raw_to_db(0), -96.0);
        assert_eq!(curve.raw_to_db(90), -6.0);
        assert_eq!(curve.db_to_raw(-6.0), 90);
        assert_eq!(curve.db_to_raw(12.0), 96);
        assert_eq!(curve.scalar_to_raw(0.5), 48);
        assert_eq!(curve.gain(0), 0.0);
        assert_eq!(curve.gain(96), 1.0);
        assert!((curve.gain(90) - 0.501).abs() < 0.001);
    }

    #[test]
    fn test_volume_clamps_raw_values() {
        let control = VolumeControl::new(ObjectId::new(32), Direction::Output, io(), Arc::new(NullHost));
        assert_eq!(control.set_raw(500), 96);

        control.set_property(Selector::RAW_VALUE, PropertyValue::U32(1000)).unwrap();
        assert_eq!(control.get_property(Selector::RAW_VALUE).unwrap(), PropertyValue::U32(96));

        control.set_property(Selector::DECIBEL_VALUE, PropertyValue::F64(-200.0)).unwrap();
        assert_eq!(control.raw(), 0);
    }

    #[test]
    fn test_volume_publishes_gain_to_param_bank() {
        let io = io();
        let control = VolumeControl::new(ObjectId::new(32), Direction::Input, io.clone(), Arc::new(NullHost));

        control.set_property(Selector::DECIBEL_VALUE, PropertyValue::F64(-6.0)).unwrap();
        let params = io.params().snapshot();
        assert!((params.input_gain - 0.501).abs() < 0.001);
        assert_eq!(params.output_gain, 1.0);
    }

    #[test]
    fn test_volume_class_and_read_only_ranges() {
        let control = VolumeControl::new(ObjectId::new(32), Direction::Output, io(), Arc::new(NullHost));

        assert_eq!(
            control.get_property(Selector::CLASS).unwrap(),
            PropertyValue::ClassId(FourCc::new(*b"vlme"))
        );
        assert_eq!(control.get_property(Selector::OWNER).unwrap(), PropertyValue::Object(ObjectId::new(32)));
        assert!(!control.is_property_settable(Selector::DECIBEL_RANGE).unwrap());

        let err = control
            .set_property(Selector::DECIBEL_RANGE, PropertyValue::F64(0.0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotWritable);

        let err = control.get_property(Selector::BOOLEAN_VALUE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedProperty);
    }

    #[test]
    fn test_mute_control() {
        let io = io();
        let control = MuteControl::new(ObjectId::new(32), Direction::Output, io.clone(), Arc::new(NullHost));

        control.set_property(Selector::BOOLEAN_VALUE, PropertyValue::Bool(true)).unwrap();
        assert!(io.params().snapshot().output_muted);
        assert_eq!(control.get_property(Selector::RAW_VALUE).unwrap(), PropertyValue::U32(1));

        let err = control
            .set_property(Selector::BOOLEAN_VALUE, PropertyValue::Text("yes".into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
