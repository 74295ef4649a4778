//! # Connection Handler
//!
//! Drives one client socket through its phases:
//!
//! ```text
//! RequestPhase --Open ok--> CommunicationPhase --Close / function dead--> RequestPhase
//!      |                            |
//!      +----- EOF or violation -----+--> Terminated
//! ```
//!
//! Request errors (unknown token, missing instance, unsupported kind) are
//! answered with an error response and the connection stays usable. Framing
//! violations and socket failures end it.

use std::sync::Arc;

use bentowire::ExecPayload;
use bentowire::ExecuteRequest;
use bentowire::FunctionId;
use bentowire::Request;
use bentowire::RequestKind;
use bentowire::Response;
use bentowire::StoreRequest;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::instance::Attachment;
use crate::registry::Registry;
use crate::session::Outcome;
use crate::session::Session;
use crate::store;
use crate::store::FunctionStore;
use crate::transport::Frame;
use crate::transport::FrameReader;
use crate::transport::Result;

pub const INVALID_REQUEST: &str = "invalid request";
pub const INVALID_TOKEN: &str = "invalid token";

pub struct Connection<S> {
    frames: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    peer: String,
    registry: Arc<Registry>,
    store: Arc<dyn FunctionStore>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, registry: Arc<Registry>, store: Arc<dyn FunctionStore>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self { frames: FrameReader::new(reader), writer, peer: peer.into(), registry, store }
    }

    /// Serves requests until the client disconnects.
    pub async fn run(mut self) -> Result<()> {
        debug!(peer = %self.peer, "connection opened");
        loop {
            let Some(frame) = self.frames.next_frame().await? else {
                debug!(peer = %self.peer, "connection closed");
                return Ok(());
            };
            let Some(attachment) = self.handle_request(frame).await? else {
                continue;
            };

            let function_id = attachment.function_id().clone();
            let instance = attachment.instance().clone();
            info!(peer = %self.peer, function_id = %function_id, "instance opened");

            let outcome = Session::new(&mut self.frames, &mut self.writer, attachment).run().await?;

            let reclaim = match outcome {
                Outcome::Finished => true,
                Outcome::Closed | Outcome::Disconnected => !instance.alive() && instance.fully_delivered(),
            };
            if reclaim {
                if let Err(e) = self.registry.destroy(&function_id).await {
                    debug!(function_id = %function_id, error = %e, "instance not reclaimed");
                }
            }
            info!(peer = %self.peer, function_id = %function_id, outcome = ?outcome, "instance detached");

            if outcome == Outcome::Disconnected {
                return Ok(());
            }
        }
    }

    /// Answers one request. Returns the attachment when the request opened an instance.
    async fn handle_request(&mut self, frame: Frame) -> Result<Option<Attachment>> {
        let request = match Request::decode(frame.kind, &frame.payload) {
            Ok(request) => request,
            Err(bentowire::Error::UnknownKind(kind)) => {
                debug!(peer = %self.peer, kind, "unknown request kind");
                self.respond(Response::error(kind, INVALID_REQUEST)).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match request {
            Request::Store(StoreRequest { name, code }) => {
                let response = self.store_function(&name, &code).await;
                self.respond(response).await?;
            }
            Request::Execute(ExecuteRequest { call, token }) => {
                let response = self.execute(call, &token).await;
                self.respond(response).await?;
            }
            Request::Open { function_id } => match self.open(&function_id).await {
                Ok(attachment) => return Ok(Some(attachment)),
                Err(message) => self.respond(Response::error(RequestKind::Open, message)).await?,
            },
            Request::Close { .. } => {
                self.respond(Response::error(RequestKind::Close, INVALID_REQUEST)).await?;
            }
        }
        Ok(None)
    }

    async fn store_function(&self, name: &str, code: &str) -> Response {
        let token = store::generate_token();
        match self.store.create_function(&token, name, code).await {
            Ok(()) => {
                info!(peer = %self.peer, name, token = %token, "function stored");
                Response::Store { token }
            }
            Err(e) => {
                warn!(peer = %self.peer, name, error = %e, "failed to store function");
                Response::error(RequestKind::Store, "failed to store function")
            }
        }
    }

    async fn execute(&self, call: String, token: &str) -> Response {
        let record = match self.store.get_function(token).await {
            Ok(Some(record)) => record,
            Ok(None) => return Response::error(RequestKind::Execute, INVALID_TOKEN),
            Err(e) => {
                warn!(peer = %self.peer, token, error = %e, "failed to load function");
                return Response::error(RequestKind::Execute, INVALID_TOKEN);
            }
        };
        let instance = self.registry.create(&ExecPayload::new(call, record.code)).await;
        info!(peer = %self.peer, function = %record.name, function_id = %instance.function_id(), "function executed");
        Response::Execute { function_id: instance.function_id().to_string() }
    }

    async fn open(&self, function_id: &str) -> std::result::Result<Attachment, String> {
        let instance = match FunctionId::parse(function_id) {
            Ok(id) => self.registry.get(&id).await,
            Err(_) => None,
        };
        let Some(instance) = instance else {
            return Err(format!("no instance exists with id: {}", function_id));
        };
        instance.attach().ok_or_else(|| format!("instance: {} already open", function_id))
    }

    async fn respond(&mut self, response: Response) -> Result<()> {
        self.writer.write_all(&response.encode()?).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
