use crate::core::{ObjectId, PropertyValue, Selector};
use crate::engine::ZeroTimestamp;
use crate::error::{DriverError, Result};
use crate::hal::types::Direction;
use serde::{Deserialize, Serialize};

/// A typed host call, addressed to one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Call {
    HasProperty(Selector),
    IsPropertySettable(Selector),
    GetProperty(Selector),
    SetProperty(Selector, PropertyValue),
    StartIo,
    StopIo,
    AddStream(Direction),
    ZeroTimestamp,
    IoCycle { host_time: u64 },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HasProperty(_) => "HasProperty",
            Self::IsPropertySettable(_) => "IsPropertySettable",
            Self::GetProperty(_) => "GetProperty",
            Self::SetProperty(..) => "SetProperty",
            Self::StartIo => "StartIo",
            Self::StopIo => "StopIo",
            Self::AddStream(_) => "AddStream",
            Self::ZeroTimestamp => "ZeroTimestamp",
            Self::IoCycle { .. } => "IoCycle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Done,
    Bool(bool),
    Value(PropertyValue),
    Object(ObjectId),
    Timestamp(ZeroTimestamp),
    SampleTime(u64),
}

impl Reply {
    fn unexpected(&self, expected: &str) -> DriverError {
        DriverError::internal(format!("expected a {} reply, got {:?}", expected, self))
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            other => Err(other.unexpected("boolean")),
        }
    }

    pub fn into_value(self) -> Result<PropertyValue> {
        match self {
            Self::Value(v) => Ok(v),
            other => Err(other.unexpected("property value")),
        }
    }

    pub fn into_object(self) -> Result<ObjectId> {
        match self {
            Self::Object(v) => Ok(v),
            other => Err(other.unexpected("object")),
        }
    }

    pub fn into_timestamp(self) -> Result<ZeroTimestamp> {
        match self {
            Self::Timestamp(v) => Ok(v),
            other => Err(other.unexpected("timestamp")),
        }
    }

    pub fn into_sample_time(self) -> Result<u64> {
        match self {
            Self::SampleTime(v) => Ok(v),
            other => Err(other.unexpected("sample time")),
        }
    }
}
