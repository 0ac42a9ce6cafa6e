#[cfg(feature = "ascii")]
pub mod ascii;
#[cfg(feature = "rtu")]
pub mod rtu;
#[cfg(feature = "tcp-server")]
pub mod tcp;
#[cfg(feature = "rtu-over-tcp-server")]
pub mod rtu_over_tcp;

pub mod device;

mod service;

pub use device::{Device, DeviceService, UnitMap};
pub use service::{NewService, Service};

pub use crate::mem::MemoryDevice;
