pub mod client;
pub mod server;
pub mod session;
pub mod wire;

pub use client::{Connection, UserClient};
pub use server::{ServerHandle, TransportServer};
pub use session::{AccessPolicy, ClientCredentials};
pub use wire::{Opcode, SessionId, TransportRequest, TransportResponse};

use crate::buffers::SharedRegionHandle;
use crate::core::{DriverObject, ObjectId, PropertyValue, Selector};
use crate::error::{DriverError, Result};
use crate::hal::stream::Stream;
use crate::hal::types::Direction;
use crate::plugin::{Call, PlugIn, Reply};
use serde::{Deserialize, Serialize};
use session::Session;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Body of a `SetProperty` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyWrite {
    pub selector: Selector,
    pub value: PropertyValue,
}

/// The user-client boundary between unprivileged clients and the driver.
///
/// Requests are executed synchronously and exactly once; nothing is
/// retried on failure. A session retains every object it has addressed
/// until it is closed.
pub struct KernelTransport {
    plugin: Arc<PlugIn>,
    policy: AccessPolicy,
    max_message_size: usize,
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_session: AtomicU64,
}

impl KernelTransport {
    pub fn new(plugin: Arc<PlugIn>) -> Self {
        let settings = plugin.settings().clone();
        Self {
            policy: AccessPolicy::from_settings(&settings),
            max_message_size: settings.max_message_size,
            plugin,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn plugin(&self) -> &Arc<PlugIn> {
        &self.plugin
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unknown_session(session: SessionId) -> DriverError {
        DriverError::PermissionDenied(format!("{} is not open", session))
    }

    pub fn open(&self, credentials: ClientCredentials) -> Result<SessionId> {
        if let Err(e) = self.policy.check(&credentials) {
            tracing::warn!(pid = credentials.pid, uid = credentials.uid, "rejected client");
            return Err(e);
        }

        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        tracing::info!(session = %id, pid = credentials.pid, "opened session");
        self.sessions().insert(id, Session::new(id, credentials));
        Ok(id)
    }

    /// Executes one request. Errors are folded into the response status.
    pub fn submit(&self, session: SessionId, request: &TransportRequest) -> TransportResponse {
        match self.execute(session, request) {
            Ok(body) => TransportResponse::ok(body),
            Err(e) => {
                tracing::debug!(
                    session = %session,
                    target = %request.target,
                    opcode = ?request.opcode,
                    error = %e,
                    "request failed"
                );
                TransportResponse::error(&e)
            }
        }
    }

    fn execute(&self, session: SessionId, request: &TransportRequest) -> Result<Vec<u8>> {
        // Checked before anything else so an oversized message has no effect.
        if request.payload.len() > self.max_message_size {
            return Err(DriverError::MessageTooLarge {
                size: request.payload.len(),
                limit: self.max_message_size,
            });
        }

        self.hold_target(session, request.target)?;

        let call = match request.opcode {
            Opcode::StartHardware => Call::StartIo,
            Opcode::StopHardware => Call::StopIo,
            Opcode::SetSampleRate => Call::SetProperty(
                Selector::NOMINAL_SAMPLE_RATE,
                PropertyValue::F64(request.body::<f64>()?),
            ),
            Opcode::GetControlValue => Call::GetProperty(Selector::RAW_VALUE),
            Opcode::SetControlValue => {
                Call::SetProperty(Selector::RAW_VALUE, PropertyValue::U32(request.body::<u32>()?))
            }
            Opcode::GetProperty => Call::GetProperty(request.body::<Selector>()?),
            Opcode::SetProperty => {
                let write: PropertyWrite = request.body()?;
                Call::SetProperty(write.selector, write.value)
            }
            Opcode::AddStream => Call::AddStream(request.body::<Direction>()?),
            Opcode::GetZeroTimestamp => Call::ZeroTimestamp,
        };

        let body = match self.plugin.dispatch(request.target, call)? {
            Reply::Done => Vec::new(),
            Reply::Bool(v) => serde_json::to_vec(&v)?,
            Reply::Value(v) => serde_json::to_vec(&v)?,
            Reply::Object(v) => serde_json::to_vec(&v)?,
            Reply::Timestamp(v) => serde_json::to_vec(&v)?,
            Reply::SampleTime(v) => serde_json::to_vec(&v)?,
        };

        if body.len() > self.max_message_size {
            return Err(DriverError::MessageTooLarge {
                size: body.len(),
                limit: self.max_message_size,
            });
        }
        Ok(body)
    }

    /// Makes the session a holder of `target` the first time it is addressed.
    fn hold_target(&self, session: SessionId, target: ObjectId) -> Result<()> {
        let mut sessions = self.sessions();
        let entry = sessions
            .get_mut(&session)
            .ok_or_else(|| Self::unknown_session(session))?;

        if target == ObjectId::PLUGIN || entry.holds(target) {
            return Ok(());
        }
        let object = self.plugin.object_map().lookup(target)?;
        entry.hold(object);
        Ok(())
    }

    /// Wire entry point: one request frame in, one response frame out.
    pub fn handle_frame(&self, frame: &[u8]) -> Vec<u8> {
        let response = match TransportRequest::decode(frame, self.max_message_size) {
            Ok((session, request)) => self.submit(session, &request),
            Err(e) => {
                tracing::warn!(bytes = frame.len(), error = %e, "rejected request frame");
                TransportResponse::error(&e)
            }
        };
        response.encode()
    }

    /// Attaches the session to a stream's shared ring region, the data path
    /// that bypasses request/response entirely.
    pub fn map_buffer(&self, session: SessionId, stream: ObjectId) -> Result<SharedRegionHandle> {
        if !self.sessions().contains_key(&session) {
            return Err(Self::unknown_session(session));
        }

        let target = self.plugin.object_map().lookup_as::<Stream>(stream)?;
        let device = self.plugin.device(target.core().owner())?;
        let region = device.attach_region(stream)?;

        let mut sessions = self.sessions();
        let Some(entry) = sessions.get_mut(&session) else {
            region.detach_client();
            return Err(Self::unknown_session(session));
        };
        entry.hold(target.to_dyn());
        entry.map_region(stream, region.clone());
        drop(sessions);

        tracing::debug!(session = %session, stream = %stream, clients = region.client_count(), "mapped buffer");
        Ok(SharedRegionHandle::new(stream, region))
    }

    /// Releases everything the session holds. Running devices keep running;
    /// their orphaned regions are torn down at the next IO cycle boundary.
    pub fn close(&self, session: SessionId) -> Result<()> {
        let closed = self
            .sessions()
            .remove(&session)
            .ok_or_else(|| Self::unknown_session(session))?;

        tracing::info!(session = %session, pid = closed.credentials.pid, "closing session");
        closed.close();
        Ok(())
    }

    pub fn close_all(&self) {
        let sessions: Vec<_> = self.sessions().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn held_objects(&self, session: SessionId) -> Result<Vec<ObjectId>> {
        self.sessions()
            .get(&session)
            .map(|s| s.held_ids())
            .ok_or_else(|| Self::unknown_session(session))
    }
}
