use super::{ObjectMap, PropertyValue, Selector};
use crate::error::{DriverError, Result};
use crate::registry::ClassInfo;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Stable identity of a driver object, as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    pub const UNKNOWN: ObjectId = ObjectId(0);
    /// The plug-in object itself. Never stored in the object map.
    pub const PLUGIN: ObjectId = ObjectId(1);
    /// IDs below this are reserved for fixed objects.
    pub const FIRST_DYNAMIC: ObjectId = ObjectId(32);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for ObjectId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassKind {
    Device,
    Stream,
    Control,
}

/// Identity and lifetime bookkeeping shared by every driver object.
///
/// The reference count is independent from `Arc`'s strong count: it tracks
/// logical holders (the object map plus every `Retained` handle), and
/// reaching zero triggers `finalize` and removal from the map.
pub struct ObjectCore {
    kind: ClassKind,
    owner: ObjectId,
    id: AtomicU32,
    refs: AtomicU64,
    active: AtomicBool,
    map: OnceLock<Weak<ObjectMap>>,
}

impl ObjectCore {
    pub fn new(kind: ClassKind, owner: ObjectId) -> Self {
        Self {
            kind,
            owner,
            id: AtomicU32::new(ObjectId::UNKNOWN.raw()),
            refs: AtomicU64::new(0),
            active: AtomicBool::new(false),
            map: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId(self.id.load(Ordering::Acquire))
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    pub fn owner(&self) -> ObjectId {
        self.owner
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> u64 {
        self.refs.load(Ordering::Acquire)
    }

    /// The map this object is registered with, while it is still alive.
    pub fn map(&self) -> Option<Arc<ObjectMap>> {
        self.map.get().and_then(Weak::upgrade)
    }

    /// Binds a freshly allocated ID. The map's canonical reference is the first one.
    pub(crate) fn attach(&self, id: ObjectId, map: Weak<ObjectMap>) -> Result<()> {
        if self.map.set(map).is_err() {
            return Err(DriverError::internal(format!(
                "object {} is already registered",
                self.id()
            )));
        }
        self.id.store(id.raw(), Ordering::Release);
        self.refs.store(1, Ordering::Release);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Returns whether the object was active before the call.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    fn retain(&self) -> u64 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Retains only a live object; a zero count is never resurrected.
    pub(crate) fn try_retain(&self) -> Option<u64> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                (refs > 0).then(|| refs + 1)
            })
            .ok()
            .map(|prev| prev + 1)
    }

    /// `None` when the count was already zero.
    fn release(&self) -> Option<u64> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }
}

/// A node of the driver object graph: Device, Stream or Control.
pub trait DriverObject: Any + Send + Sync {
    fn core(&self) -> &ObjectCore;

    fn class(&self) -> ClassInfo;

    fn has_property(&self, selector: Selector) -> bool;

    fn is_property_settable(&self, selector: Selector) -> Result<bool>;

    fn get_property(&self, selector: Selector) -> Result<PropertyValue>;

    fn set_property(&self, selector: Selector, value: PropertyValue) -> Result<()>;

    /// Runs once when the last reference goes away, before the map entry is removed.
    fn finalize(&self) {}

    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn id(&self) -> ObjectId {
        self.core().id()
    }

    fn retain(&self) -> u64 {
        self.core().retain()
    }

    fn release(&self) -> u64 {
        let core = self.core();
        match core.release() {
            Some(0) => {
                tracing::debug!(object = %core.id(), kind = ?core.kind(), "last reference released");
                self.finalize();
                if let Some(map) = core.map() {
                    map.unregister(core.id());
                }
                0
            }
            Some(remaining) => remaining,
            None => {
                tracing::warn!(object = %core.id(), "release called on an object with no references");
                0
            }
        }
    }
}

/// Counted handle to a driver object: retains on acquire, releases on drop.
pub struct Retained<T: DriverObject + ?Sized> {
    object: Arc<T>,
}

impl<T: DriverObject + ?Sized> Retained<T> {
    pub fn new(object: Arc<T>) -> Self {
        object.retain();
        Self { object }
    }

    /// Wraps an object whose reference was already taken.
    pub(crate) fn adopt(object: Arc<T>) -> Self {
        Self { object }
    }

    pub fn arc(&self) -> &Arc<T> {
        &self.object
    }
}

impl<T: DriverObject> Retained<T> {
    pub fn to_dyn(&self) -> Retained<dyn DriverObject> {
        Retained::new(self.object.clone() as Arc<dyn DriverObject>)
    }
}

impl Retained<dyn DriverObject> {
    pub fn downcast<T: DriverObject>(&self) -> Option<Retained<T>> {
        let object = self.object.clone().into_any_arc().downcast::<T>().ok()?;
        Some(Retained::new(object))
    }
}

impl<T: DriverObject + ?Sized> Clone for Retained<T> {
    fn clone(&self) -> Self {
        Retained::new(self.object.clone())
    }
}

impl<T: DriverObject + ?Sized> Deref for Retained<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T: DriverObject + ?Sized> Drop for Retained<T> {
    fn drop(&mut self) {
        self.object.release();
    }
}

impl<T: DriverObject + ?Sized> fmt::Debug for Retained<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.object.core();
        f.debug_struct("Retained")
            .field("id", &core.id())
            .field("kind", &core.kind())
            .field("refs", &core.ref_count())
            .finish()
    }
}
