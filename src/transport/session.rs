use super::wire::SessionId;
use crate::buffers::SharedRegion;
use crate::config::DriverSettings;
use crate::core::{DriverObject, ObjectId, Retained};
use crate::error::{DriverError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Identity of the process opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub pid: u32,
    pub uid: u32,
    pub entitlements: Vec<String>,
}

impl ClientCredentials {
    pub fn new(pid: u32, uid: u32) -> Self {
        Self {
            pid,
            uid,
            entitlements: Vec::new(),
        }
    }

    pub fn root(pid: u32) -> Self {
        Self::new(pid, 0)
    }

    pub fn with_entitlement(mut self, entitlement: impl Into<String>) -> Self {
        self.entitlements.push(entitlement.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    pub fn has_entitlement(&self, entitlement: &str) -> bool {
        self.entitlements.iter().any(|e| e == entitlement)
    }
}

/// Who may open a session.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub required_entitlement: String,
    pub allow_root: bool,
}

impl AccessPolicy {
    pub fn from_settings(settings: &DriverSettings) -> Self {
        Self {
            required_entitlement: settings.required_entitlement.clone(),
            allow_root: settings.allow_root_clients,
        }
    }

    pub fn check(&self, credentials: &ClientCredentials) -> Result<()> {
        if self.allow_root && credentials.is_root() {
            return Ok(());
        }
        if credentials.has_entitlement(&self.required_entitlement) {
            return Ok(());
        }
        Err(DriverError::PermissionDenied(format!(
            "pid {} (uid {}) lacks entitlement {}",
            credentials.pid, credentials.uid, self.required_entitlement
        )))
    }
}

/// Everything one client holds on the driver side.
pub(crate) struct Session {
    pub id: SessionId,
    pub credentials: ClientCredentials,
    held: HashMap<ObjectId, Retained<dyn DriverObject>>,
    regions: Vec<(ObjectId, Arc<SharedRegion>)>,
}

impl Session {
    pub fn new(id: SessionId, credentials: ClientCredentials) -> Self {
        Self {
            id,
            credentials,
            held: HashMap::new(),
            regions: Vec::new(),
        }
    }

    pub fn holds(&self, object: ObjectId) -> bool {
        self.held.contains_key(&object)
    }

    pub fn hold(&mut self, object: Retained<dyn DriverObject>) {
        self.held.entry(object.id()).or_insert(object);
    }

    pub fn held_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.held.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Takes over a client attachment on `region`. Mapping the same region
    /// twice keeps a single attachment.
    pub fn map_region(&mut self, stream: ObjectId, region: Arc<SharedRegion>) {
        if self.regions.iter().any(|(_, r)| Arc::ptr_eq(r, &region)) {
            region.detach_client();
            return;
        }
        self.regions.push((stream, region));
    }

    /// Detaches every region and drops every held reference. Regions left
    /// without clients are torn down by the IO thread at its next cycle.
    pub fn close(self) {
        for (stream, region) in self.regions {
            if region.detach_client() {
                tracing::debug!(session = %self.id, stream = %stream, "region marked for teardown");
            }
        }
        tracing::debug!(session = %self.id, released = self.held.len(), "releasing session references");
        drop(self.held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ENTITLEMENT;
    use crate::ErrorKind;

    #[test]
    fn test_access_policy() {
        let settings = DriverSettings::default();
        let policy = AccessPolicy::from_settings(&settings);

        assert!(policy.check(&ClientCredentials::root(10)).is_ok());
        assert!(policy
            .check(&ClientCredentials::new(11, 501).with_entitlement(DEFAULT_ENTITLEMENT))
            .is_ok());

        let err = policy.check(&ClientCredentials::new(12, 501)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let strict = AccessPolicy {
            allow_root: false,
            ..policy
        };
        assert!(strict.check(&ClientCredentials::root(13)).is_err());
    }
}
