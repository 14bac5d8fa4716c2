use crate::device::{Device, DeviceRole};
use crate::error::RingError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Assignment {
    device_id: u32,
    role: DeviceRole,
}

/// On-disk shape of a ring description: the device table plus, for every
/// partition, the devices assigned to it and their role.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RingFile {
    part_power: u32,
    devices: Vec<Device>,
    partitions: Vec<Vec<Assignment>>,
}

/// A consistent-hash ring over storage devices: partition lookup for
/// `(account, container)`, and locality tests against the node this process
/// runs on.
#[derive(Debug, Clone)]
pub struct Ring {
    part_power: u32,
    devices: HashMap<u32, Device>,
    partitions: Vec<Vec<Assignment>>,
    local_ip: String,
    local_port: u16,
}

impl Ring {
    /// Builds a ring directly from an assignment table, for tests and
    /// embedding without a ring file on disk.
    pub fn new(part_power: u32, devices: Vec<Device>, assignments: Vec<Vec<(u32, DeviceRole)>>, local_ip: impl Into<String>, local_port: u16) -> Self {
        Ring {
            part_power,
            devices: devices.into_iter().map(|d| (d.id, d)).collect(),
            partitions: assignments
                .into_iter()
                .map(|parts| {
                    parts
                        .into_iter()
                        .map(|(device_id, role)| Assignment { device_id, role })
                        .collect()
                })
                .collect(),
            local_ip: local_ip.into(),
            local_port,
        }
    }

    pub fn from_json(bytes: &[u8], local_ip: impl Into<String>, local_port: u16) -> Result<Self, RingError> {
        let file: RingFile = serde_json::from_slice(bytes)?;
        if file.partitions.len() != 1usize.checked_shl(file.part_power).unwrap_or(usize::MAX) && !file.partitions.is_empty() {
            // Not a hard requirement of this implementation, but a
            // mismatched table is almost certainly a stale/corrupt ring
            // file rather than an intentionally sparse one.
            tracing::warn!(
                part_power = file.part_power,
                partitions = file.partitions.len(),
                "ring file partition count does not match part_power"
            );
        }
        Ok(Ring {
            part_power: file.part_power,
            devices: file.devices.into_iter().map(|d| (d.id, d)).collect(),
            partitions: file.partitions,
            local_ip: local_ip.into(),
            local_port,
        })
    }

    /// The partition `(account, container)` hashes to, via the top
    /// `part_power` bits of an md5 digest of the path.
    pub fn get_part(&self, account: &str, container: &str) -> u64 {
        let digest = md5::compute(format!("/{account}/{container}"));
        let top = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        if self.part_power == 0 {
            0
        } else if self.part_power >= 32 {
            top as u64
        } else {
            (top >> (32 - self.part_power)) as u64
        }
    }

    fn assignments_for(&self, part: u64) -> &[Assignment] {
        self.partitions.get(part as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Devices assigned to `part`, paired with their role, in ring order.
    pub fn devices_for_part(&self, part: u64) -> Vec<(&Device, DeviceRole)> {
        self.assignments_for(part)
            .iter()
            .filter_map(|a| self.devices.get(&a.device_id).map(|d| (d, a.role)))
            .collect()
    }

    pub fn device(&self, id: u32) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn is_local_device(&self, device: &Device) -> bool {
        device.ip == self.local_ip && device.port == self.local_port
    }

    /// Every device on this node that appears anywhere in the ring.
    pub fn local_devices(&self) -> Vec<&Device> {
        self.devices.values().filter(|d| self.is_local_device(d)).collect()
    }

    /// The first local device holding a handoff (non-primary) slot for
    /// `part`, or `None` if this node has no eligible handoff space.
    pub fn find_local_handoff_for_part(&self, part: u64) -> Option<&Device> {
        self.devices_for_part(part)
            .into_iter()
            .find(|(device, role)| *role == DeviceRole::Handoff && self.is_local_device(device))
            .map(|(device, _)| device)
    }

    /// [`Ring::find_local_handoff_for_part`], surfaced as the error the
    /// shard broker factory propagates when no handoff space exists.
    pub fn require_local_handoff(&self, part: u64) -> Result<&Device, RingError> {
        self.find_local_handoff_for_part(part)
            .ok_or(RingError::DeviceUnavailable(part))
    }
}
