//! Job module - Units of work handed from the reactor to the worker pool
//!
//! A `Job` carries a type tag and a payload. The payload is either owned by
//! the job, and freed when the job is destroyed, or shared with someone
//! else, in which case destroying the job only gives up its own reference.

mod dispatcher;

pub use dispatcher::*;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::network::ConnectionHandle;
use crate::protocol::Packet;

/// What a job is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Run a callback on a worker
    Custom,
    /// A client finished connecting
    ClientConnect,
    /// A client sent a packet
    ClientProcess,
    /// A client went away
    ClientDisconnect,
}

/// Callback of a custom job; receives the job's data, if any
pub type CustomCallback = Arc<dyn Fn(Option<&(dyn Any + Send + Sync)>) + Send + Sync>;

/// A callback to run on a worker, with the data to run it on
pub struct CustomJob {
    callback: CustomCallback,
    data: Option<Box<dyn Any + Send + Sync>>,
}

impl CustomJob {
    pub fn new<F>(callback: F, data: Option<Box<dyn Any + Send + Sync>>) -> Self
    where
        F: Fn(Option<&(dyn Any + Send + Sync)>) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            data,
        }
    }

    pub fn data(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.data.as_deref()
    }

    /// Invoke the callback on the data
    pub fn run(&self) {
        (self.callback)(self.data())
    }
}

impl fmt::Debug for CustomJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomJob")
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

/// An inbound packet together with the connection it came from
#[derive(Debug, Clone)]
pub struct ClientProcessJob {
    pub connection: ConnectionHandle,
    pub packet: Packet,
}

impl ClientProcessJob {
    pub fn new(connection: ConnectionHandle, packet: Packet) -> Self {
        Self { connection, packet }
    }
}

/// Job payload shapes
#[derive(Debug)]
pub enum JobData {
    Custom(CustomJob),
    ClientProcess(ClientProcessJob),
    /// Connect and disconnect notifications
    Client(ConnectionHandle),
}

impl JobData {
    /// Connection the payload belongs to, if any
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        match self {
            JobData::Custom(_) => None,
            JobData::ClientProcess(job) => Some(&job.connection),
            JobData::Client(connection) => Some(connection),
        }
    }
}

/// Payload together with who owns it
#[derive(Debug)]
pub enum JobPayload {
    /// Freed together with the job
    Owned(Box<JobData>),
    /// Shared with the submitter; the job holds one reference
    External(Arc<JobData>),
}

impl JobPayload {
    pub fn is_external(&self) -> bool {
        matches!(self, JobPayload::External(_))
    }
}

impl std::ops::Deref for JobPayload {
    type Target = JobData;

    fn deref(&self) -> &JobData {
        match self {
            JobPayload::Owned(data) => &**data,
            JobPayload::External(data) => &**data,
        }
    }
}

/// A unit of work for the worker pool
#[derive(Debug)]
pub struct Job {
    kind: JobType,
    payload: JobPayload,
}

impl Job {
    /// Create a job that owns its payload
    pub fn new(kind: JobType, data: JobData) -> Self {
        Self {
            kind,
            payload: JobPayload::Owned(Box::new(data)),
        }
    }

    /// Create a job over a payload someone else keeps
    pub fn external(kind: JobType, data: Arc<JobData>) -> Self {
        Self {
            kind,
            payload: JobPayload::External(data),
        }
    }

    pub fn custom(job: CustomJob) -> Self {
        Self::new(JobType::Custom, JobData::Custom(job))
    }

    pub fn client_process(connection: ConnectionHandle, packet: Packet) -> Self {
        Self::new(
            JobType::ClientProcess,
            JobData::ClientProcess(ClientProcessJob::new(connection, packet)),
        )
    }

    pub fn client_connect(connection: ConnectionHandle) -> Self {
        Self::new(JobType::ClientConnect, JobData::Client(connection))
    }

    pub fn client_disconnect(connection: ConnectionHandle) -> Self {
        Self::new(JobType::ClientDisconnect, JobData::Client(connection))
    }

    pub fn kind(&self) -> JobType {
        self.kind
    }

    pub fn data(&self) -> &JobData {
        &self.payload
    }

    pub fn is_external(&self) -> bool {
        self.payload.is_external()
    }

    /// Destroy the job, freeing the payload only if the job owns it
    pub fn destroy(self) {
        drop(self.payload);
    }

    /// Destroy the job and hand its payload to the caller
    pub fn destroy_keep_data(self) -> JobPayload {
        self.payload
    }
}
