use super::{DriverObject, ObjectId, Retained};
use crate::error::{DriverError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

struct MapInner {
    next_id: u32,
    objects: HashMap<ObjectId, Arc<dyn DriverObject>>,
}

/// Registry from host-visible IDs to live driver objects.
///
/// All operations run under one mutex. IDs are handed out in increasing
/// order and never reused while the map exists.
pub struct ObjectMap {
    inner: Mutex<MapInner>,
}

impl ObjectMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MapInner {
                next_id: ObjectId::FIRST_DYNAMIC.raw(),
                objects: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MapInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocates a fresh ID for `object` and stores the canonical reference.
    pub fn register(self: &Arc<Self>, object: Arc<dyn DriverObject>) -> Result<ObjectId> {
        let mut inner = self.lock();

        let id = ObjectId::new(inner.next_id);
        let next = inner
            .next_id
            .checked_add(1)
            .ok_or_else(|| DriverError::internal("object ID space exhausted"))?;

        object.core().attach(id, Arc::downgrade(self))?;
        inner.next_id = next;
        inner.objects.insert(id, object.clone());
        drop(inner);

        tracing::debug!(object = %id, kind = ?object.core().kind(), class = object.class().name, "registered object");
        Ok(id)
    }

    /// Resolves `id` to a retained handle.
    ///
    /// Fails for IDs that were never issued, were unregistered, or belong to
    /// an object that has been deactivated.
    pub fn lookup(&self, id: ObjectId) -> Result<Retained<dyn DriverObject>> {
        let inner = self.lock();

        let object = inner
            .objects
            .get(&id)
            .filter(|object| object.core().is_active())
            .ok_or(DriverError::UnknownObject(id))?;

        object
            .core()
            .try_retain()
            .ok_or(DriverError::UnknownObject(id))?;

        Ok(Retained::adopt(object.clone()))
    }

    /// Resolves `id` and checks that it is a `T`.
    pub fn lookup_as<T: DriverObject>(&self, id: ObjectId) -> Result<Retained<T>> {
        self.lookup(id)?
            .downcast::<T>()
            .ok_or(DriverError::UnknownObject(id))
    }

    /// Removes the mapping for `id`. A second call only logs.
    pub fn unregister(&self, id: ObjectId) -> bool {
        let removed = self.lock().objects.remove(&id);

        match removed {
            Some(object) => {
                tracing::debug!(object = %id, kind = ?object.core().kind(), "unregistered object");
                // Dropped here, outside the lock: children may release into the map.
                drop(object);
                true
            }
            None => {
                tracing::warn!(object = %id, "unregister of an object that is not mapped");
                false
            }
        }
    }

    /// Deactivates `id` and drops the map's canonical reference.
    ///
    /// Outstanding `Retained` handles keep the object alive, but lookups fail
    /// from now on. The entry disappears once the last handle is released.
    pub fn retire(&self, id: ObjectId) -> Result<()> {
        let object = self
            .lock()
            .objects
            .get(&id)
            .cloned()
            .ok_or(DriverError::UnknownObject(id))?;

        if object.core().deactivate() {
            tracing::debug!(object = %id, refs = object.core().ref_count(), "retiring object");
            object.release();
        } else {
            tracing::debug!(object = %id, "object already retired");
        }
        Ok(())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.lock().objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.lock().objects.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Logs every mapped object at debug level.
    pub fn dump(&self) {
        let inner = self.lock();
        tracing::debug!(count = inner.objects.len(), next_id = inner.next_id, "object map");
        for (id, object) in inner.objects.iter() {
            let core = object.core();
            tracing::debug!(
                object = %id,
                class = object.class().name,
                owner = %core.owner(),
                refs = core.ref_count(),
                active = core.is_active(),
                "  mapped"
            );
        }
    }
}
