use super::{DriverObject, ObjectId};
use crate::engine::{IoState, ZeroTimestamp};
use crate::error::{DriverError, Result};
use crate::hal::types::{Direction, StreamFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Four-character code, stored big-endian so `'adev'` reads naturally in hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FourCc(u32);

impl FourCc {
    pub const fn new(code: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(code))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            let text: String = bytes.iter().map(|&b| b as char).collect();
            write!(f, "'{}'", text)
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Property address within an object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(FourCc);

impl Selector {
    // Every object
    pub const CLASS: Selector = Selector::new(*b"clas");
    pub const BASE_CLASS: Selector = Selector::new(*b"bcls");
    pub const OWNER: Selector = Selector::new(*b"stdv");
    pub const OBJECT_ID: Selector = Selector::new(*b"oid ");
    pub const OWNED_OBJECTS: Selector = Selector::new(*b"ownd");
    pub const NAME: Selector = Selector::new(*b"lnam");
    pub const MANUFACTURER: Selector = Selector::new(*b"lmak");

    // Plug-in
    pub const DEVICE_LIST: Selector = Selector::new(*b"dev#");
    pub const CLASS_LIST: Selector = Selector::new(*b"cls#");

    // Device
    pub const DEVICE_UID: Selector = Selector::new(*b"uid ");
    pub const NOMINAL_SAMPLE_RATE: Selector = Selector::new(*b"nsrt");
    pub const AVAILABLE_SAMPLE_RATES: Selector = Selector::new(*b"nsr#");
    pub const IS_ALIVE: Selector = Selector::new(*b"livn");
    pub const IS_HIDDEN: Selector = Selector::new(*b"hidn");
    pub const CAN_BE_DEFAULT: Selector = Selector::new(*b"dflt");
    pub const CAN_BE_SYSTEM_DEFAULT: Selector = Selector::new(*b"sflt");
    pub const PREFERRED_STEREO_CHANNELS: Selector = Selector::new(*b"dch2");
    pub const BUFFER_FRAME_SIZE: Selector = Selector::new(*b"fsiz");
    pub const RING_BUFFER_FRAME_SIZE: Selector = Selector::new(*b"ring");
    pub const LATENCY: Selector = Selector::new(*b"ltnc");
    pub const SAFETY_OFFSET: Selector = Selector::new(*b"saft");
    pub const IO_STATE: Selector = Selector::new(*b"iost");
    pub const IS_RUNNING: Selector = Selector::new(*b"goin");
    pub const STREAMS: Selector = Selector::new(*b"stm#");
    pub const CONTROLS: Selector = Selector::new(*b"ctl#");
    pub const INPUT_CHANNELS: Selector = Selector::new(*b"ichn");
    pub const OUTPUT_CHANNELS: Selector = Selector::new(*b"ochn");
    pub const ZERO_TIMESTAMP_PERIOD: Selector = Selector::new(*b"ztpd");
    pub const DROPPED_CYCLES: Selector = Selector::new(*b"drop");
    pub const IO_CYCLES: Selector = Selector::new(*b"cycl");

    // Stream
    pub const DIRECTION: Selector = Selector::new(*b"sdir");
    pub const STARTING_CHANNEL: Selector = Selector::new(*b"schn");
    pub const FORMAT: Selector = Selector::new(*b"pft ");
    pub const AVAILABLE_FORMATS: Selector = Selector::new(*b"pfta");
    pub const IS_ACTIVE: Selector = Selector::new(*b"sact");

    // Control
    pub const SCOPE: Selector = Selector::new(*b"cscp");
    pub const RAW_VALUE: Selector = Selector::new(*b"craw");
    pub const RAW_RANGE: Selector = Selector::new(*b"crng");
    pub const SCALAR_VALUE: Selector = Selector::new(*b"lcsv");
    pub const DECIBEL_VALUE: Selector = Selector::new(*b"lcdv");
    pub const DECIBEL_RANGE: Selector = Selector::new(*b"lcdr");
    pub const BOOLEAN_VALUE: Selector = Selector::new(*b"bcvl");

    pub const fn new(code: [u8; 4]) -> Self {
        Self(FourCc::new(code))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(FourCc::from_raw(raw))
    }

    pub const fn raw(self) -> u32 {
        self.0.raw()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self.0)
    }
}

/// Typed property payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    U32(u32),
    U64(u64),
    F64(f64),
    Text(String),
    ClassId(FourCc),
    Object(ObjectId),
    Objects(Vec<ObjectId>),
    Classes(Vec<FourCc>),
    Format(StreamFormat),
    Formats(Vec<StreamFormat>),
    Rates(Vec<f64>),
    Channels(Vec<u32>),
    Direction(Direction),
    IoState(IoState),
    Range { min: f64, max: f64 },
    Timestamp(ZeroTimestamp),
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "Bool",
            Self::U32(_) => "U32",
            Self::U64(_) => "U64",
            Self::F64(_) => "F64",
            Self::Text(_) => "Text",
            Self::ClassId(_) => "ClassId",
            Self::Object(_) => "Object",
            Self::Objects(_) => "Objects",
            Self::Classes(_) => "Classes",
            Self::Format(_) => "Format",
            Self::Formats(_) => "Formats",
            Self::Rates(_) => "Rates",
            Self::Channels(_) => "Channels",
            Self::Direction(_) => "Direction",
            Self::IoState(_) => "IoState",
            Self::Range { .. } => "Range",
            Self::Timestamp(_) => "Timestamp",
        }
    }

    fn mismatch(&self, expected: &str) -> DriverError {
        DriverError::invalid_argument(format!("expected {} value, got {}", expected, self.type_name()))
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            Self::U32(v) => Ok(*v != 0),
            other => Err(other.mismatch("Bool")),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        match self {
            Self::U32(v) => Ok(*v),
            Self::U64(v) => u32::try_from(*v)
                .map_err(|_| DriverError::invalid_argument(format!("{} does not fit in 32 bits", v))),
            other => Err(other.mismatch("U32")),
        }
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Self::U64(v) => Ok(*v),
            Self::U32(v) => Ok(u64::from(*v)),
            other => Err(other.mismatch("U64")),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Self::F64(v) => Ok(*v),
            Self::U32(v) => Ok(f64::from(*v)),
            other => Err(other.mismatch("F64")),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(v) => Ok(v),
            other => Err(other.mismatch("Text")),
        }
    }

    pub fn into_format(self) -> Result<StreamFormat> {
        match self {
            Self::Format(v) => Ok(v),
            other => Err(other.mismatch("Format")),
        }
    }

    pub fn into_objects(self) -> Result<Vec<ObjectId>> {
        match self {
            Self::Objects(v) => Ok(v),
            other => Err(other.mismatch("Objects")),
        }
    }
}

pub type Getter<T> = fn(&T) -> Result<PropertyValue>;
pub type Setter<T> = fn(&T, PropertyValue) -> Result<()>;

struct PropertyEntry<T> {
    get: Getter<T>,
    set: Option<Setter<T>>,
}

const BASE_SELECTORS: [Selector; 5] = [
    Selector::CLASS,
    Selector::BASE_CLASS,
    Selector::OWNER,
    Selector::OBJECT_ID,
    Selector::OWNED_OBJECTS,
];

/// Selector-to-handler table for one driver class, built once per class.
///
/// Selectors not in the table fall back to the properties every object
/// answers (class, base class, owner, ID, owned objects).
pub struct PropertyTable<T: 'static> {
    entries: HashMap<Selector, PropertyEntry<T>>,
}

pub struct PropertyTableBuilder<T: 'static> {
    entries: HashMap<Selector, PropertyEntry<T>>,
}

impl<T: 'static> PropertyTableBuilder<T> {
    pub fn readable(mut self, selector: Selector, get: Getter<T>) -> Self {
        self.entries.insert(selector, PropertyEntry { get, set: None });
        self
    }

    pub fn writable(mut self, selector: Selector, get: Getter<T>, set: Setter<T>) -> Self {
        self.entries.insert(selector, PropertyEntry { get, set: Some(set) });
        self
    }

    pub fn build(self) -> PropertyTable<T> {
        PropertyTable { entries: self.entries }
    }
}

impl<T: 'static> PropertyTable<T> {
    pub fn builder() -> PropertyTableBuilder<T> {
        PropertyTableBuilder { entries: HashMap::new() }
    }

    pub fn contains(&self, selector: Selector) -> bool {
        self.entries.contains_key(&selector) || BASE_SELECTORS.contains(&selector)
    }

    pub fn selectors(&self) -> Vec<Selector> {
        let mut selectors: Vec<_> = self.entries.keys().copied().chain(BASE_SELECTORS).collect();
        selectors.sort();
        selectors.dedup();
        selectors
    }
}

impl<T: DriverObject> PropertyTable<T> {
    pub fn is_settable(&self, object: &T, selector: Selector) -> Result<bool> {
        match self.entries.get(&selector) {
            Some(entry) => Ok(entry.set.is_some()),
            None if BASE_SELECTORS.contains(&selector) => Ok(false),
            None => Err(unsupported(object, selector)),
        }
    }

    pub fn get(&self, object: &T, selector: Selector) -> Result<PropertyValue> {
        match self.entries.get(&selector) {
            Some(entry) => (entry.get)(object),
            None => base_property(object, selector),
        }
    }

    pub fn set(&self, object: &T, selector: Selector, value: PropertyValue) -> Result<()> {
        match self.entries.get(&selector) {
            Some(PropertyEntry { set: Some(set), .. }) => set(object, value),
            Some(_) => Err(DriverError::NotWritable {
                object: object.id(),
                selector,
            }),
            None if BASE_SELECTORS.contains(&selector) => Err(DriverError::NotWritable {
                object: object.id(),
                selector,
            }),
            None => Err(unsupported(object, selector)),
        }
    }
}

pub fn unsupported(object: &dyn DriverObject, selector: Selector) -> DriverError {
    DriverError::UnsupportedProperty {
        object: object.id(),
        class: object.class().name,
        selector,
    }
}

fn base_property(object: &dyn DriverObject, selector: Selector) -> Result<PropertyValue> {
    let class = object.class();
    match selector {
        Selector::CLASS => Ok(PropertyValue::ClassId(class.class_id)),
        Selector::BASE_CLASS => Ok(PropertyValue::ClassId(class.base_class_id)),
        Selector::OWNER => Ok(PropertyValue::Object(object.core().owner())),
        Selector::OBJECT_ID => Ok(PropertyValue::Object(object.id())),
        Selector::OWNED_OBJECTS => Ok(PropertyValue::Objects(Vec::new())),
        _ => Err(unsupported(object, selector)),
    }
}
