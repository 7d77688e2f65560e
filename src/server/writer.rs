//! Per-viewer RTP writer
//!
//! Drains one viewer queue and sends H.264 as RTP, either interleaved on
//! the RTSP connection or over the shared UDP socket. Playback starts at
//! the first keyframe; keyframes without in-band SPS/PPS get the cached
//! ones prepended.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::fanout::Viewer;
use crate::media::h264;
use crate::media::sdp::H264_PAYLOAD_TYPE;
use crate::media::H264Packetizer;
use crate::protocol::encode_interleaved;
use crate::registry::{AccessUnit, MediaKind, Registry};

/// Write half of an RTSP connection, shared by the request loop and writers
pub type SharedWriter<W> = Arc<Mutex<W>>;

/// Where RTP packets go
pub enum MediaSink<W> {
    Interleaved {
        writer: SharedWriter<W>,
        channel: u8,
    },
    Udp {
        socket: Arc<UdpSocket>,
        target: SocketAddr,
    },
}

impl<W: AsyncWrite + Unpin + Send> MediaSink<W> {
    /// Send all packets of one access unit
    async fn send(&self, packets: &[Bytes]) -> Result<()> {
        match self {
            MediaSink::Interleaved { writer, channel } => {
                let mut writer = writer.lock().await;
                for packet in packets {
                    writer.write_all(&encode_interleaved(*channel, packet)?).await?;
                }
                writer.flush().await?;
            }
            MediaSink::Udp { socket, target } => {
                for packet in packets {
                    socket.send_to(packet, *target).await?;
                }
            }
        }
        Ok(())
    }
}

/// Streams one viewer's queue to its client
pub struct ViewerWriter<W> {
    session_id: String,
    channel: String,
    viewer: Viewer,
    registry: Arc<Registry>,
    sink: MediaSink<W>,
    packetizer: H264Packetizer,
    cancel: CancellationToken,
    sps: Bytes,
    pps: Bytes,
    started: bool,
}

impl<W: AsyncWrite + Unpin + Send + 'static> ViewerWriter<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        channel: String,
        viewer: Viewer,
        registry: Arc<Registry>,
        sink: MediaSink<W>,
        mtu: usize,
        cancel: CancellationToken,
        parameter_sets: (Bytes, Bytes),
    ) -> Self {
        Self {
            session_id,
            channel,
            viewer,
            registry,
            sink,
            packetizer: H264Packetizer::new(H264_PAYLOAD_TYPE, mtu),
            cancel,
            sps: parameter_sets.0,
            pps: parameter_sets.1,
            started: false,
        }
    }

    /// Stream until cancelled, the queue closes, or a write fails; then detach
    pub async fn run(mut self) {
        tracing::debug!(session_id = %self.session_id, channel = %self.channel, "Writer started");

        match self.stream().await {
            Ok(()) => {
                tracing::debug!(session_id = %self.session_id, channel = %self.channel, "Writer finished")
            }
            Err(e) => {
                tracing::debug!(session_id = %self.session_id, channel = %self.channel, error = %e, "Writer failed")
            }
        }

        self.registry
            .remove_viewer(&self.channel, &self.viewer.id)
            .await;
    }

    async fn stream(&mut self) -> Result<()> {
        loop {
            let unit = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                unit = self.viewer.queue.recv() => match unit {
                    Some(unit) => unit,
                    None => return Ok(()),
                },
            };

            if let Some(data) = self.prepare(&unit) {
                let packets = self.packetizer.packetize(unit.timestamp, &data)?;
                self.sink.send(&packets).await?;
            }
        }
    }

    /// Payload to send for a unit, or `None` to skip it
    fn prepare(&mut self, unit: &AccessUnit) -> Option<Bytes> {
        if unit.kind != MediaKind::Video {
            return None;
        }

        let info = h264::scan_access_unit(&unit.data);
        if let Some(sps) = info.sps {
            self.sps = sps;
        }
        if let Some(pps) = info.pps {
            self.pps = pps;
        }

        if !self.started {
            if !unit.is_keyframe {
                return None;
            }
            self.started = true;
        }

        if unit.is_keyframe {
            Some(h264::with_parameter_sets(&unit.data, &self.sps, &self.pps))
        } else {
            Some(unit.data.clone())
        }
    }
}
