//! Process-wide diagnostics registry of live ACID streams.
//!
//! Purely observational: nothing in the core depends on the registry for
//! correctness. Instances register themselves on open and deregister on
//! drop; [`snapshot`] lets diagnostics tooling enumerate what is live.

use crate::journal::record::unix_millis;
use parking_lot::RwLock;
use uuid::Uuid;

static INSTANCES: RwLock<Vec<InstanceInfo>> = RwLock::new(Vec::new());

/// Description of one live ACID stream instance.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    /// Unique id assigned at open.
    pub id: Uuid,
    /// Label from the instance's configuration.
    pub label: String,
    /// Open time, milliseconds since the Unix epoch.
    pub created_ms: u64,
}

/// Registers a new instance and returns its id.
pub(crate) fn register(label: String) -> Uuid {
    let id = Uuid::new_v4();
    INSTANCES.write().push(InstanceInfo {
        id,
        label,
        created_ms: unix_millis(),
    });
    id
}

/// Removes an instance from the registry.
pub(crate) fn unregister(id: Uuid) {
    INSTANCES.write().retain(|info| info.id != id);
}

/// Returns a snapshot of all live instances.
#[must_use]
pub fn snapshot() -> Vec<InstanceInfo> {
    INSTANCES.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let id = register("test-instance".to_string());
        assert!(snapshot().iter().any(|i| i.id == id));

        unregister(id);
        assert!(!snapshot().iter().any(|i| i.id == id));
    }

    #[test]
    fn snapshot_carries_label() {
        let id = register("labelled".to_string());
        let info = snapshot().into_iter().find(|i| i.id == id).unwrap();
        assert_eq!(info.label, "labelled");
        unregister(id);
    }
}
