use super::server::ServerHandle;
use super::wire::{Opcode, SessionId, TransportRequest, TransportResponse};
use super::{KernelTransport, PropertyWrite};
use crate::core::{ObjectId, PropertyValue, Selector};
use crate::engine::ZeroTimestamp;
use crate::error::Result;
use crate::hal::types::Direction;
use async_trait::async_trait;
use std::sync::Arc;

/// Carries one encoded request frame and returns the response frame.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn round_trip(&self, frame: Vec<u8>) -> Result<Vec<u8>>;
}

#[async_trait]
impl Connection for ServerHandle {
    async fn round_trip(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        self.call(frame).await
    }
}

/// In-process connection without a server task.
#[async_trait]
impl Connection for Arc<KernelTransport> {
    async fn round_trip(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        Ok(self.handle_frame(&frame))
    }
}

/// Typed client for an open session.
pub struct UserClient<C: Connection> {
    connection: C,
    session: SessionId,
}

impl<C: Connection> UserClient<C> {
    pub fn new(connection: C, session: SessionId) -> Self {
        Self { connection, session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let frame = self.connection.round_trip(request.encode(self.session)).await?;
        TransportResponse::decode(&frame)
    }

    async fn send_empty(&self, target: ObjectId, opcode: Opcode) -> Result<()> {
        self.send(TransportRequest::new(target, opcode))
            .await?
            .into_result()
            .map(|_| ())
    }

    pub async fn start_hardware(&self, device: ObjectId) -> Result<()> {
        self.send_empty(device, Opcode::StartHardware).await
    }

    pub async fn stop_hardware(&self, device: ObjectId) -> Result<()> {
        self.send_empty(device, Opcode::StopHardware).await
    }

    pub async fn set_sample_rate(&self, device: ObjectId, sample_rate: f64) -> Result<()> {
        let request = TransportRequest::with_body(device, Opcode::SetSampleRate, &sample_rate)?;
        self.send(request).await?.into_result().map(|_| ())
    }

    pub async fn control_value(&self, control: ObjectId) -> Result<u32> {
        let value: PropertyValue = self
            .send(TransportRequest::new(control, Opcode::GetControlValue))
            .await?
            .body()?;
        value.as_u32()
    }

    pub async fn set_control_value(&self, control: ObjectId, raw: u32) -> Result<()> {
        let request = TransportRequest::with_body(control, Opcode::SetControlValue, &raw)?;
        self.send(request).await?.into_result().map(|_| ())
    }

    pub async fn get_property(&self, object: ObjectId, selector: Selector) -> Result<PropertyValue> {
        let request = TransportRequest::with_body(object, Opcode::GetProperty, &selector)?;
        self.send(request).await?.body()
    }

    pub async fn set_property(&self, object: ObjectId, selector: Selector, value: PropertyValue) -> Result<()> {
        let request = TransportRequest::with_body(object, Opcode::SetProperty, &PropertyWrite { selector, value })?;
        self.send(request).await?.into_result().map(|_| ())
    }

    pub async fn add_stream(&self, device: ObjectId, direction: Direction) -> Result<ObjectId> {
        let request = TransportRequest::with_body(device, Opcode::AddStream, &direction)?;
        self.send(request).await?.body()
    }

    pub async fn zero_timestamp(&self, device: ObjectId) -> Result<ZeroTimestamp> {
        self.send(TransportRequest::new(device, Opcode::GetZeroTimestamp))
            .await?
            .body()
    }
}
