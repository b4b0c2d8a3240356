use serde::{Deserialize, Serialize};

use crate::codec::Encoding;

/// Concrete wire form of a client attachment.
///
/// The transport decides the preferred encoding for server-originated
/// messages and the arbitration priority in the local session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "ws-json")]
    WsJson,
    #[serde(rename = "ws-bin")]
    WsBinary,
    #[serde(rename = "tcp-bin")]
    TcpBinary,
}

impl Transport {
    /// Encoding used for server-originated frames on this transport.
    pub fn encoding(self) -> Encoding {
        match self {
            Transport::WsJson => Encoding::Json,
            Transport::WsBinary | Transport::TcpBinary => Encoding::Protobuf,
        }
    }

    /// True for transports that evict a JSON WebSocket session on register.
    pub fn is_binary(self) -> bool {
        matches!(self, Transport::WsBinary | Transport::TcpBinary)
    }

    /// Delivery priority for the router's candidate walk; lower is tried
    /// first (`tcp-bin > ws-bin > ws-json`).
    pub fn priority(self) -> u8 {
        match self {
            Transport::TcpBinary => 0,
            Transport::WsBinary => 1,
            Transport::WsJson => 2,
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Transport::WsJson => "ws-json",
            Transport::WsBinary => "ws-bin",
            Transport::TcpBinary => "tcp-bin",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_prefers_binary_transports() {
        let mut transports = [Transport::WsJson, Transport::TcpBinary, Transport::WsBinary];
        transports.sort_by_key(|t| t.priority());
        assert_eq!(
            transports,
            [Transport::TcpBinary, Transport::WsBinary, Transport::WsJson]
        );
    }

    #[test]
    fn wire_names_match_registry_contract() {
        assert_eq!(serde_json::to_string(&Transport::TcpBinary).unwrap(), "\"tcp-bin\"");
        assert_eq!(serde_json::to_string(&Transport::WsBinary).unwrap(), "\"ws-bin\"");
        assert_eq!(serde_json::to_string(&Transport::WsJson).unwrap(), "\"ws-json\"");
    }
}
