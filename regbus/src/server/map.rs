use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::ConfigError;
use crate::server::database::{Database, DeviceConfig};
use crate::server::handle::SlaveHandle;
use crate::types::UnitId;

/// Registry that maps unit ids to their register storage
///
/// Cloning the map shares the underlying devices, which is how the accept
/// loop and every session see the same data.
#[derive(Clone, Default)]
pub struct DeviceMap {
    devices: BTreeMap<UnitId, Arc<Mutex<Database>>>,
}

impl DeviceMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new slave device, returning the handle used by the
    /// application to read and write its tables.
    ///
    /// Unit ids must be in the range 1 ..= 247: 0 is the broadcast address
    /// and 248 ..= 255 are reserved by the RTU spec.
    pub fn register(
        &mut self,
        unit_id: UnitId,
        config: DeviceConfig,
    ) -> Result<SlaveHandle, ConfigError> {
        let raw = unit_id.value;
        if raw == 0 || raw > 247 {
            return Err(ConfigError::InvalidUnitId(raw));
        }
        if self.devices.contains_key(&unit_id) {
            return Err(ConfigError::DuplicateUnitId(raw));
        }

        let device = Arc::new(Mutex::new(Database::new(config)));
        self.devices.insert(unit_id, device.clone());
        Ok(SlaveHandle::new(device))
    }

    /// Remove a slave device, returning false if it was not registered
    pub fn remove(&mut self, unit_id: UnitId) -> bool {
        self.devices.remove(&unit_id).is_some()
    }

    /// Retrieve a handle to an already-registered slave device
    pub fn handle(&self, unit_id: UnitId) -> Option<SlaveHandle> {
        self.devices
            .get(&unit_id)
            .map(|device| SlaveHandle::new(device.clone()))
    }

    /// Number of registered slaves
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if no slave is registered
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub(crate) fn get(&self, unit_id: UnitId) -> Option<&Arc<Mutex<Database>>> {
        self.devices.get(&unit_id)
    }

    pub(crate) fn devices(&self) -> impl Iterator<Item = &Arc<Mutex<Database>>> {
        self.devices.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_broadcast_reserved_and_duplicate_addresses() {
        let mut map = DeviceMap::new();
        assert_eq!(
            map.register(UnitId::new(0), DeviceConfig::new(1, 0, 0, 0)).err(),
            Some(ConfigError::InvalidUnitId(0))
        );
        assert_eq!(
            map.register(UnitId::new(248), DeviceConfig::new(1, 0, 0, 0)).err(),
            Some(ConfigError::InvalidUnitId(248))
        );

        assert!(map.register(UnitId::new(10), DeviceConfig::new(1, 0, 0, 0)).is_ok());
        assert_eq!(
            map.register(UnitId::new(10), DeviceConfig::new(1, 0, 0, 0)).err(),
            Some(ConfigError::DuplicateUnitId(10))
        );
    }

    #[test]
    fn clones_share_the_underlying_devices() {
        let mut map = DeviceMap::new();
        let handle = map
            .register(UnitId::new(10), DeviceConfig::new(0, 0, 0, 4))
            .unwrap();

        let clone = map.clone();
        handle.write_register(1, 42).unwrap();
        let other = clone.handle(UnitId::new(10)).unwrap();
        assert_eq!(other.read_register(1).unwrap(), 42);
    }

    #[test]
    fn remove_unregisters_the_device() {
        let mut map = DeviceMap::new();
        map.register(UnitId::new(10), DeviceConfig::new(1, 0, 0, 0)).unwrap();
        assert!(map.remove(UnitId::new(10)));
        assert!(!map.remove(UnitId::new(10)));
        assert!(map.handle(UnitId::new(10)).is_none());
        assert!(map.is_empty());
    }
}
