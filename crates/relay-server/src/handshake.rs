//! Handshake processing.
//!
//! Turns the first client message into a validated [`ConnectionRequest`]
//! and then into a [`ResolvedDestination`]:
//!
//! 1. Decode the header (structure, version, command and address type).
//! 2. Compare the client identity with the configured one.
//! 3. Refuse every command except `TCP`.
//! 4. Resolve domain destinations through DNS-over-HTTPS.
//!
//! The caller sends the two-byte ack only after all four steps succeed.

use crate::gateway::DohResolver;
use relay_core::{
    Address, AddressTypeTable, ClientId, Command, ConnectionRequest, RelayError, RelayResult,
};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

/// A destination the bridge can connect to: always a literal IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDestination {
    /// The address as the client sent it (domain names kept for logging).
    pub requested: Address,
    pub ip: IpAddr,
    pub port: u16,
}

impl ResolvedDestination {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for ResolvedDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.requested {
            Address::Domain(name) => write!(f, "{name}:{} ({})", self.port, self.ip),
            _ => write!(f, "{}", self.socket_addr()),
        }
    }
}

/// Validates handshakes against the configured identity and address table.
#[derive(Debug, Clone)]
pub struct HandshakeProcessor {
    client_id: ClientId,
    table: AddressTypeTable,
}

impl HandshakeProcessor {
    pub fn new(client_id: ClientId, table: AddressTypeTable) -> Self {
        Self { client_id, table }
    }

    /// Decode and validate the first message of a session.
    pub fn parse(&self, message: &[u8]) -> RelayResult<ConnectionRequest> {
        let request = ConnectionRequest::decode(message, &self.table)?;

        if !self.client_id.matches(request.client_id.as_bytes()) {
            warn!(presented = %request.client_id.short(), "client identity mismatch");
            return Err(RelayError::IdentityMismatch);
        }

        if request.command != Command::Tcp {
            return Err(RelayError::UnsupportedCommand(request.command as u8));
        }

        debug!(
            port = request.port,
            kind = %request.address.kind(),
            payload = message.len() - request.payload_offset,
            "handshake parsed"
        );
        Ok(request)
    }

    /// Produce a connectable destination, resolving domains via DoH.
    pub async fn resolve(
        &self,
        request: &ConnectionRequest,
        resolver: &DohResolver,
    ) -> RelayResult<ResolvedDestination> {
        let ip = match &request.address {
            Address::Domain(name) => IpAddr::V4(resolver.resolve_ipv4(name).await?),
            literal => literal
                .ip()
                .ok_or_else(|| RelayError::Other("literal address without IP".into()))?,
        };

        Ok(ResolvedDestination {
            requested: request.address.clone(),
            ip,
            port: request.port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{AddressKind, PROTOCOL_VERSION};
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UUID: &str = "37a0bd7c-8b9f-4693-8916-bd1e2da0a817";

    fn processor() -> HandshakeProcessor {
        HandshakeProcessor::new(ClientId::parse(UUID).unwrap(), AddressTypeTable::SOCKS)
    }

    fn message(address: Address, command: Command, id: ClientId) -> Vec<u8> {
        ConnectionRequest {
            version: PROTOCOL_VERSION,
            client_id: id,
            addon: vec![],
            command,
            port: 8080,
            address,
            payload_offset: 0,
        }
        .encode_header(&AddressTypeTable::SOCKS)
        .unwrap()
    }

    #[test]
    fn accepts_matching_identity() {
        let msg = message(
            Address::Ipv4(Ipv4Addr::LOCALHOST),
            Command::Tcp,
            ClientId::parse(UUID).unwrap(),
        );
        let req = processor().parse(&msg).unwrap();
        assert_eq!(req.port, 8080);
    }

    #[test]
    fn rejects_any_flipped_identity_bit() {
        let id = ClientId::parse(UUID).unwrap();
        for byte in [0usize, 7, 15] {
            let mut bytes = *id.as_bytes();
            bytes[byte] ^= 0x80;
            let msg = message(
                Address::Ipv4(Ipv4Addr::LOCALHOST),
                Command::Tcp,
                ClientId::from_bytes(bytes),
            );
            assert!(matches!(
                processor().parse(&msg),
                Err(RelayError::IdentityMismatch)
            ));
        }
    }

    #[test]
    fn rejects_udp_and_mux() {
        let id = ClientId::parse(UUID).unwrap();
        for command in [Command::Udp, Command::Mux] {
            let msg = message(Address::Ipv4(Ipv4Addr::LOCALHOST), command, id);
            let err = processor().parse(&msg).unwrap_err();
            assert!(matches!(err, RelayError::UnsupportedCommand(_)));
            assert!(err.is_protocol());
        }
    }

    #[tokio::test]
    async fn literal_addresses_skip_resolver() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let resolver = DohResolver::new(&server.uri(), Duration::from_secs(1)).unwrap();

        let id = ClientId::parse(UUID).unwrap();
        let msg = message(Address::Ipv6("2001:db8::1".parse().unwrap()), Command::Tcp, id);
        let req = processor().parse(&msg).unwrap();
        let dest = processor().resolve(&req, &resolver).await.unwrap();
        assert_eq!(dest.requested.kind(), AddressKind::Ipv6);
        assert_eq!(dest.socket_addr().to_string(), "[2001:db8::1]:8080");
    }

    #[tokio::test]
    async fn domain_resolves_to_answer_ip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("name", "example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Status": 0,
                "Answer": [{"type": 1, "data": "93.184.216.34"}]
            })))
            .mount(&server)
            .await;
        let resolver = DohResolver::new(&server.uri(), Duration::from_secs(5)).unwrap();

        let id = ClientId::parse(UUID).unwrap();
        let msg = message(Address::Domain("example.com".into()), Command::Tcp, id);
        let req = processor().parse(&msg).unwrap();
        let dest = processor().resolve(&req, &resolver).await.unwrap();
        assert_eq!(dest.ip.to_string(), "93.184.216.34");
        assert_eq!(dest.requested.kind(), AddressKind::Domain);
        assert_eq!(dest.to_string(), "example.com:8080 (93.184.216.34)");
    }
}
