//! presensi-hw: Hardware abstraction for camera capture and display power.
//!
//! Provides V4L2 camera access producing RGB frames and sysfs/firmware
//! control of the kiosk display.

pub mod camera;
pub mod display;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use display::{DisplayError, DisplayPower, NullDisplay, RpiDisplay};
pub use frame::{Frame, FrameError};
