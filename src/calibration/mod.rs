pub mod device;
pub mod screen;

pub use device::{CalibrationPhase, DeviceCalibration, DeviceCalibrationOutcome, DeviceStep};
pub use screen::{
    ScreenCalibration, ScreenCalibrationOutcome, ScreenEffect, ScreenEvent, ScreenPhase,
};
