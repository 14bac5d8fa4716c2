//! Partition/device ring: consistent-hash placement lookup and locality
//! tests against the devices configured on this node.

mod device;
mod error;
mod ring;

pub use device::{Device, DeviceRole};
pub use error::RingError;
pub use ring::Ring;
