//! Per-connection RTSP handler
//!
//! ```text
//! OPTIONS  -> 200 Public
//! DESCRIBE -> ensure_running, readiness gate, SDP
//! SETUP    -> ensure_running, readiness gate, Transport + Session
//! PLAY     -> add viewer, ensure_running, 200, spawn writer (454 for
//!             a session of another connection)
//! TEARDOWN -> remove viewer, 200, close
//! ```
//!
//! Requests are answered in order on the same connection. Writers share
//! the write half behind a mutex, so RTP frames and responses never
//! interleave mid-message.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::ingest::IngestSupervisor;
use crate::media::describe_sdp;
use crate::protocol::message::RtspResponse;
use crate::protocol::{negotiate, Frame, FrameReader, Method, RtspRequest, TransportMode, PUBLIC_METHODS};
use crate::registry::{CodecDescriptor, CodecType, Registry, RegistryError};
use crate::session::{RtspSession, SessionPhase, SessionTable};

use super::config::ServerConfig;
use super::writer::{MediaSink, SharedWriter, ViewerWriter};

/// State shared by every connection of one server
pub struct ServerContext {
    pub config: ServerConfig,
    pub supervisor: IngestSupervisor,
    pub sessions: Arc<SessionTable>,
    /// Shared socket for UDP viewers; `None` when it could not be bound
    pub udp: Option<Arc<UdpSocket>>,
}

impl ServerContext {
    pub fn registry(&self) -> &Arc<Registry> {
        self.supervisor.registry()
    }
}

/// What the request loop does after sending a response
enum Next {
    Continue,
    Play(PlayStart),
    Close,
}

struct PlayStart {
    session: RtspSession,
    viewer: crate::fanout::Viewer,
    parameter_sets: (bytes::Bytes, bytes::Bytes),
}

/// Strip scheme and host, the leading `/`, and a trailing `trackID=N` segment
pub fn channel_from_uri(uri: &str) -> &str {
    let mut path = uri;
    for scheme in ["rtsp://", "rtsps://"] {
        if path.len() >= scheme.len() && path[..scheme.len()].eq_ignore_ascii_case(scheme) {
            let rest = &path[scheme.len()..];
            path = rest.find('/').map(|i| &rest[i..]).unwrap_or("");
            break;
        }
    }
    let path = path.split('?').next().unwrap_or(path);
    let mut path = path.trim_start_matches('/').trim_end_matches('/');

    if let Some((head, last)) = path.rsplit_once('/') {
        if last.len() >= 8 && last[..8].eq_ignore_ascii_case("trackID=") {
            path = head;
        }
    }
    path
}

fn parameter_sets(codecs: &[CodecDescriptor]) -> (bytes::Bytes, bytes::Bytes) {
    codecs
        .iter()
        .find(|c| c.codec == CodecType::H264)
        .map(|c| (c.sps.clone(), c.pps.clone()))
        .unwrap_or_default()
}

fn registry_error_status(error: &RegistryError) -> u16 {
    match error {
        RegistryError::ChannelNotFound(_) => 404,
        RegistryError::CodecNotReady(_) => 503,
    }
}

/// One RTSP client connection
pub struct Connection<S> {
    id: u64,
    peer_addr: SocketAddr,
    reader: FrameReader<ReadHalf<S>>,
    writer: SharedWriter<WriteHalf<S>>,
    ctx: Arc<ServerContext>,
    /// Sessions created on this connection
    owned: Vec<String>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(id: u64, stream: S, peer_addr: SocketAddr, ctx: Arc<ServerContext>) -> Self {
        let (read_half, write_half) = split(stream);
        Self {
            id,
            peer_addr,
            reader: FrameReader::new(read_half),
            writer: Arc::new(Mutex::new(write_half)),
            ctx,
            owned: Vec::new(),
        }
    }

    /// Serve requests until the client leaves; then release its sessions
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve().await;
        self.release_sessions().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let frame = timeout(self.ctx.config.read_timeout, self.reader.next_frame())
                .await
                .map_err(|_| Error::Timeout("client read"))??;
            let Some(frame) = frame else {
                return Ok(());
            };

            for id in &self.owned {
                self.ctx.sessions.touch(id);
            }

            let (head, body) = match frame {
                // RTCP receiver reports and the like
                Frame::Interleaved { .. } => continue,
                Frame::Message { head, body } => (head, body),
            };

            let request = match RtspRequest::parse(&head, body) {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(conn_id = self.id, error = %e, "Dropping malformed request");
                    continue;
                }
            };
            tracing::debug!(
                conn_id = self.id,
                method = %request.method,
                uri = %request.uri,
                cseq = %request.cseq(),
                "Request"
            );

            let (response, next) = self.handle(&request).await;
            self.send(&response).await?;

            match next {
                Next::Continue => {}
                Next::Play(start) => self.spawn_writer(start),
                Next::Close => return Ok(()),
            }
        }
    }

    async fn send(&self, response: &RtspResponse) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&response.encode()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn handle(&mut self, request: &RtspRequest) -> (RtspResponse, Next) {
        let cseq = request.cseq();

        match request.method {
            Method::Options => {
                return (
                    RtspResponse::reply(200, cseq).header("Public", PUBLIC_METHODS),
                    Next::Continue,
                )
            }
            Method::Describe | Method::Setup | Method::Play | Method::Teardown => {}
            _ => return (RtspResponse::reply(405, cseq), Next::Continue),
        }

        let name = channel_from_uri(&request.uri);
        let Some(channel) = self.ctx.registry().lookup(name).await else {
            tracing::debug!(conn_id = self.id, path = %name, "Channel not found");
            return (RtspResponse::reply(404, cseq), Next::Continue);
        };

        let result = match request.method {
            Method::Describe => self.describe(request, &channel).await,
            Method::Setup => self.setup(request, &channel).await,
            Method::Play => self.play(request, &channel).await,
            _ => Ok(self.teardown(request).await),
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::info!(conn_id = self.id, channel = %channel, error = %e, "Request refused");
                (
                    RtspResponse::reply(registry_error_status(&e), cseq),
                    Next::Continue,
                )
            }
        }
    }

    async fn describe(
        &mut self,
        request: &RtspRequest,
        channel: &str,
    ) -> std::result::Result<(RtspResponse, Next), RegistryError> {
        self.ctx.supervisor.ensure_running(channel).await;
        let codecs = self.ctx.registry().get_codecs(channel).await?;

        let response = RtspResponse::reply(200, request.cseq())
            .header("Content-Base", format!("{}/", request.uri.trim_end_matches('/')))
            .body("application/sdp", describe_sdp(&codecs));
        Ok((response, Next::Continue))
    }

    async fn setup(
        &mut self,
        request: &RtspRequest,
        channel: &str,
    ) -> std::result::Result<(RtspResponse, Next), RegistryError> {
        self.ctx.supervisor.ensure_running(channel).await;
        self.ctx.registry().get_codecs(channel).await?;

        let negotiated = negotiate(request.transport(), self.ctx.config.udp_server_ports);
        if matches!(negotiated.mode, TransportMode::Udp { .. }) && self.ctx.udp.is_none() {
            return Ok((RtspResponse::reply(461, request.cseq()), Next::Continue));
        }
        let transport_header = negotiated.header.clone();

        let mut session = RtspSession::new(channel.to_string(), self.id, self.peer_addr, negotiated);
        // A repeated SETUP on the same session keeps its id
        if let Some(existing) = request.session().and_then(|id| self.ctx.sessions.get(id)) {
            if existing.connection_id == self.id && existing.phase == SessionPhase::Ready {
                session.id = existing.id;
            }
        }
        let idle = self.ctx.config.session_idle_timeout;
        let session_header = session.header_value(idle);
        if !self.owned.contains(&session.id) {
            self.owned.push(session.id.clone());
        }
        tracing::info!(
            conn_id = self.id,
            session_id = %session.id,
            channel = %channel,
            transport = %transport_header,
            "Session set up"
        );
        self.ctx.sessions.insert(session);

        let response = RtspResponse::reply(200, request.cseq())
            .header("Transport", transport_header)
            .header("Session", session_header);
        Ok((response, Next::Continue))
    }

    async fn play(
        &mut self,
        request: &RtspRequest,
        channel: &str,
    ) -> std::result::Result<(RtspResponse, Next), RegistryError> {
        let idle = self.ctx.config.session_idle_timeout;
        let existing = match request.session() {
            Some(id) => match self.own_session(id) {
                Some(session) => Some(session),
                None => return Ok((RtspResponse::reply(454, request.cseq()), Next::Continue)),
            },
            None => self.owned.last().and_then(|id| self.ctx.sessions.get(id)),
        };

        let session = match existing {
            Some(session) if session.phase == SessionPhase::Playing => {
                let response = RtspResponse::reply(200, request.cseq())
                    .header("Session", session.header_value(idle))
                    .header("Range", "npt=0.000-");
                return Ok((response, Next::Continue));
            }
            Some(session) => session,
            None => {
                // PLAY without SETUP: implicit interleaved session
                let session = RtspSession::new(
                    channel.to_string(),
                    self.id,
                    self.peer_addr,
                    Default::default(),
                );
                self.owned.push(session.id.clone());
                self.ctx.sessions.insert(session.clone());
                session
            }
        };

        // Attach first so a worker deciding to stop sees this viewer
        let registry = self.ctx.registry();
        let viewer = registry.add_viewer(&session.channel).await?;
        self.ctx.supervisor.ensure_running(&session.channel).await;
        self.ctx.sessions.start_playing(&session.id, viewer.id.clone());

        let codecs = registry.codecs(&session.channel).await?.unwrap_or_default();
        let response = RtspResponse::reply(200, request.cseq())
            .header("Session", session.header_value(idle))
            .header("Range", "npt=0.000-");

        tracing::info!(
            conn_id = self.id,
            session_id = %session.id,
            channel = %session.channel,
            viewer = %viewer.id,
            "Playing"
        );
        Ok((
            response,
            Next::Play(PlayStart {
                session,
                viewer,
                parameter_sets: parameter_sets(&codecs),
            }),
        ))
    }

    async fn teardown(&mut self, request: &RtspRequest) -> (RtspResponse, Next) {
        let id = request
            .session()
            .map(str::to_string)
            .or_else(|| self.owned.last().cloned());

        if let Some(id) = &id {
            let foreign = self
                .ctx
                .sessions
                .get(id)
                .is_some_and(|session| session.connection_id != self.id);
            if foreign {
                return (RtspResponse::reply(454, request.cseq()), Next::Continue);
            }
        }

        let mut response = RtspResponse::reply(200, request.cseq());
        if let Some(id) = id {
            self.owned.retain(|owned| owned != &id);
            if let Some(session) = self.ctx.sessions.remove(&id) {
                if let Some(viewer_id) = &session.viewer_id {
                    self.ctx
                        .registry()
                        .remove_viewer(&session.channel, viewer_id)
                        .await;
                }
                tracing::info!(conn_id = self.id, session_id = %id, "Session torn down");
            }
            response = response.header("Session", id);
        }
        (response, Next::Close)
    }

    /// Session `id` if it was created on this connection
    fn own_session(&self, id: &str) -> Option<RtspSession> {
        self.ctx
            .sessions
            .get(id)
            .filter(|session| session.connection_id == self.id)
    }

    fn spawn_writer(&self, start: PlayStart) {
        let PlayStart {
            session,
            viewer,
            parameter_sets,
        } = start;

        let sink = match session.transport.mode {
            TransportMode::Interleaved { rtp_channel, .. } => MediaSink::Interleaved {
                writer: Arc::clone(&self.writer),
                channel: rtp_channel,
            },
            TransportMode::Udp { client_rtp, .. } => match &self.ctx.udp {
                Some(socket) => MediaSink::Udp {
                    socket: Arc::clone(socket),
                    target: SocketAddr::new(self.peer_addr.ip(), client_rtp),
                },
                None => MediaSink::Interleaved {
                    writer: Arc::clone(&self.writer),
                    channel: 0,
                },
            },
        };

        let writer = ViewerWriter::new(
            session.id,
            session.channel,
            viewer,
            Arc::clone(self.ctx.registry()),
            sink,
            self.ctx.config.rtp_mtu,
            session.cancel,
            parameter_sets,
        );
        tokio::spawn(writer.run());
    }

    /// Drop every session this connection created and detach its viewers
    async fn release_sessions(&mut self) {
        for id in self.owned.drain(..) {
            if let Some(session) = self.ctx.sessions.remove(&id) {
                if let Some(viewer_id) = &session.viewer_id {
                    self.ctx
                        .registry()
                        .remove_viewer(&session.channel, viewer_id)
                        .await;
                }
            }
        }
        tracing::debug!(conn_id = self.id, peer = %self.peer_addr, "Connection closed");
    }
}
