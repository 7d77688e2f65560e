//! `Transport` header negotiation
//!
//! Viewers ask for either interleaved TCP (`RTP/AVP/TCP;interleaved=a-b`)
//! or UDP (`RTP/AVP;unicast;client_port=a-b`). Anything unrecognized falls
//! back to interleaved channels 0-1.

/// Negotiated media path for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// RTP on the RTSP connection
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
    /// RTP over UDP to the client's ports
    Udp { client_rtp: u16, client_rtcp: u16 },
}

/// Negotiation result: the mode plus the header value to send back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub mode: TransportMode,
    pub header: String,
}

impl Default for Negotiated {
    fn default() -> Self {
        Self {
            mode: TransportMode::Interleaved {
                rtp_channel: 0,
                rtcp_channel: 1,
            },
            header: "RTP/AVP/TCP;unicast;interleaved=0-1".to_string(),
        }
    }
}

/// Parse `a-b` (or a single `a`, implying `a+1`)
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    let mut parts = value.splitn(2, '-');
    let first: T = parts.next()?.trim().parse().ok()?;
    let second = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => T::try_from(u32::from(first) + 1).ok()?,
    };
    Some((first, second))
}

fn param<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|p| p.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

/// Pick a transport for a SETUP request
///
/// `server_ports` is advertised for UDP sessions.
pub fn negotiate(header: Option<&str>, server_ports: (u16, u16)) -> Negotiated {
    let Some(header) = header else {
        return Negotiated::default();
    };
    // Clients may offer alternatives separated by commas; take the first
    let header = header.split(',').next().unwrap_or(header);

    let is_tcp = header
        .split(';')
        .next()
        .map(|proto| proto.trim().to_ascii_uppercase().ends_with("/TCP"))
        .unwrap_or(false);

    if !is_tcp {
        if let Some(raw) = param(header, "client_port") {
            if let Some((client_rtp, client_rtcp)) = parse_pair::<u16>(raw) {
                return Negotiated {
                    mode: TransportMode::Udp {
                        client_rtp,
                        client_rtcp,
                    },
                    header: format!(
                        "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                        client_rtp, client_rtcp, server_ports.0, server_ports.1
                    ),
                };
            }
        }
    }

    if let Some((rtp_channel, rtcp_channel)) =
        param(header, "interleaved").and_then(parse_pair::<u8>)
    {
        return Negotiated {
            mode: TransportMode::Interleaved {
                rtp_channel,
                rtcp_channel,
            },
            header: format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                rtp_channel, rtcp_channel
            ),
        };
    }

    Negotiated::default()
}

/// Request `Transport` value for an upstream SETUP on the given channels
pub fn interleaved_request(rtp_channel: u8) -> String {
    format!(
        "RTP/AVP/TCP;unicast;interleaved={}-{}",
        rtp_channel,
        rtp_channel.wrapping_add(1)
    )
}

/// Session id and timeout from a `Session` response header
pub fn parse_session_header(value: &str) -> (String, Option<u64>) {
    let mut parts = value.split(';');
    let id = parts.next().unwrap_or_default().trim().to_string();
    let timeout = parts
        .filter_map(|p| p.trim().split_once('='))
        .find(|(k, _)| k.eq_ignore_ascii_case("timeout"))
        .and_then(|(_, v)| v.trim().parse().ok());
    (id, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: (u16, u16) = (5000, 5001);

    #[test]
    fn test_default_is_interleaved() {
        let n = negotiate(None, SERVER);
        assert_eq!(n.header, "RTP/AVP/TCP;unicast;interleaved=0-1");
        assert_eq!(
            n.mode,
            TransportMode::Interleaved {
                rtp_channel: 0,
                rtcp_channel: 1
            }
        );
    }

    #[test]
    fn test_tcp_channels_echoed() {
        let n = negotiate(Some("RTP/AVP/TCP;unicast;interleaved=2-3"), SERVER);
        assert_eq!(n.header, "RTP/AVP/TCP;unicast;interleaved=2-3");
    }

    #[test]
    fn test_udp_client_ports() {
        let n = negotiate(Some("RTP/AVP;unicast;client_port=6970-6971"), SERVER);
        assert_eq!(
            n.mode,
            TransportMode::Udp {
                client_rtp: 6970,
                client_rtcp: 6971
            }
        );
        assert_eq!(
            n.header,
            "RTP/AVP;unicast;client_port=6970-6971;server_port=5000-5001"
        );
    }

    #[test]
    fn test_single_client_port() {
        let n = negotiate(Some("RTP/AVP/UDP;unicast;client_port=7000"), SERVER);
        assert_eq!(
            n.mode,
            TransportMode::Udp {
                client_rtp: 7000,
                client_rtcp: 7001
            }
        );
    }

    #[test]
    fn test_garbage_falls_back() {
        let n = negotiate(Some("RTP/AVP;unicast;client_port=abc"), SERVER);
        assert_eq!(n, Negotiated::default());
    }

    #[test]
    fn test_first_alternative_wins() {
        let n = negotiate(
            Some("RTP/AVP/TCP;unicast;interleaved=0-1,RTP/AVP;unicast;client_port=5000-5001"),
            SERVER,
        );
        assert!(matches!(n.mode, TransportMode::Interleaved { .. }));
    }

    #[test]
    fn test_session_header() {
        assert_eq!(
            parse_session_header("12345678;timeout=60"),
            ("12345678".to_string(), Some(60))
        );
        assert_eq!(parse_session_header("abc"), ("abc".to_string(), None));
        assert_eq!(interleaved_request(2), "RTP/AVP/TCP;unicast;interleaved=2-3");
    }
}
