//! Cloud-to-device endpoint addressing.
//!
//! A device-level target and a module-level target resolve to different
//! nodes on the hub, so the two path shapes must stay exactly as they are:
//!
//! ```text
//! /devices/{deviceId}/messages/devicebound
//! /devices/{deviceId}/modules/{moduleId}/messages/devicebound
//! ```

use std::fmt;

use crate::error::{DispatchError, DispatchResult};

const DEVICES_PREFIX: &str = "/devices/";
const MODULES_SEGMENT: &str = "/modules/";
const DEVICEBOUND_SUFFIX: &str = "/messages/devicebound";

/// Endpoint path for a device-level target.
pub fn device_endpoint(device_id: &str) -> String {
    format!("{DEVICES_PREFIX}{device_id}{DEVICEBOUND_SUFFIX}")
}

/// Endpoint path for a module-level target.
pub fn module_endpoint(device_id: &str, module_id: &str) -> String {
    format!("{DEVICES_PREFIX}{device_id}{MODULES_SEGMENT}{module_id}{DEVICEBOUND_SUFFIX}")
}

/// Recipient of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchTarget {
    /// The device itself.
    Device {
        /// Device identifier.
        device_id: String,
    },
    /// A module running on the device.
    Module {
        /// Device identifier.
        device_id: String,
        /// Module identifier.
        module_id: String,
    },
}

impl DispatchTarget {
    /// Build a target; `module_id = None` addresses the device itself.
    ///
    /// Empty identifiers are rejected, including `Some("")`.
    pub fn new(device_id: &str, module_id: Option<&str>) -> DispatchResult<Self> {
        if device_id.is_empty() {
            return Err(DispatchError::invalid("device id must not be empty"));
        }
        match module_id {
            None => Ok(DispatchTarget::Device {
                device_id: device_id.to_string(),
            }),
            Some("") => Err(DispatchError::invalid(
                "module id must not be empty when present",
            )),
            Some(module_id) => Ok(DispatchTarget::Module {
                device_id: device_id.to_string(),
                module_id: module_id.to_string(),
            }),
        }
    }

    /// Device identifier.
    pub fn device_id(&self) -> &str {
        match self {
            DispatchTarget::Device { device_id } | DispatchTarget::Module { device_id, .. } => {
                device_id
            }
        }
    }

    /// Module identifier, if this is a module-level target.
    pub fn module_id(&self) -> Option<&str> {
        match self {
            DispatchTarget::Device { .. } => None,
            DispatchTarget::Module { module_id, .. } => Some(module_id),
        }
    }

    /// Resolved endpoint path.
    pub fn endpoint_path(&self) -> String {
        match self {
            DispatchTarget::Device { device_id } => device_endpoint(device_id),
            DispatchTarget::Module {
                device_id,
                module_id,
            } => module_endpoint(device_id, module_id),
        }
    }
}

impl fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchTarget::Device { device_id } => f.write_str(device_id),
            DispatchTarget::Module {
                device_id,
                module_id,
            } => write!(f, "{device_id}/{module_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_only_path() {
        let target = DispatchTarget::new("dev1", None).expect("valid target");
        assert_eq!(target.endpoint_path(), "/devices/dev1/messages/devicebound");
        assert_eq!(target.module_id(), None);
    }

    #[test]
    fn module_path_nests_module_under_device() {
        let target = DispatchTarget::new("dev1", Some("mod1")).expect("valid target");
        assert_eq!(
            target.endpoint_path(),
            "/devices/dev1/modules/mod1/messages/devicebound"
        );
        assert_eq!(target.to_string(), "dev1/mod1");
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert!(DispatchTarget::new("", None).is_err());
        assert!(DispatchTarget::new("dev1", Some("")).is_err());
    }
}
