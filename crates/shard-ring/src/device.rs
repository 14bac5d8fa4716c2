use serde::{Deserialize, Serialize};

/// One storage device: an IP/port identifying the node it lives on, and a
/// mount-point name unique on that node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: u32,
    pub ip: String,
    pub port: u16,
    pub device: String,
}

/// Whether a device holds a partition's primary copy or is a handoff
/// landing site for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Primary,
    Handoff,
}
