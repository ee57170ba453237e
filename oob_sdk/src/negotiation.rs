//! Handshake protocol and message type negotiation.
//!
//! Two orderings are involved: the local *canonical* preference order, used
//! when an invitation is created without an explicit protocol list, and the
//! order of an invitation's `handshake_protocols`, which is authoritative when
//! picking the protocol to run for a received invitation.

use std::fmt::{self, Display};

use crate::{definitions::FeatureRegistry, error::Error, messages::AgentMessage};

const DIDCOMM_BASE: &str = "https://didcomm.org";
const LEGACY_DIDCOMM_PREFIX: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec";

/// A versioned protocol identifier, e.g. `https://didcomm.org/didexchange/1.1`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolUri {
    base: String,
    family: String,
    major: u32,
    minor: u32,
}

impl ProtocolUri {
    pub fn new(base: &str, family: &str, major: u32, minor: u32) -> Self {
        Self {
            base: base.to_string(),
            family: family.to_string(),
            major,
            minor,
        }
    }

    /// Parse a protocol URI, normalizing the legacy `did:sov:` prefix
    pub fn parse(uri: &str) -> Option<Self> {
        let uri = normalize(uri);
        let (rest, version) = uri.rsplit_once('/')?;
        let (base, family) = rest.rsplit_once('/')?;
        let (major, minor) = version.split_once('.')?;

        if base.is_empty() || family.is_empty() {
            return None;
        }

        Some(Self {
            base: base.to_string(),
            family: family.to_string(),
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    /// Parse a message type URI into its protocol and message name
    pub fn parse_message_type(message_type: &str) -> Option<(Self, String)> {
        let (protocol, name) = message_type.rsplit_once('/')?;

        if name.is_empty() {
            return None;
        }

        Some((Self::parse(protocol)?, name.to_string()))
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn version(&self) -> (u32, u32) {
        (self.major, self.minor)
    }

    /// Two protocol versions can interoperate when only their minor version differs
    pub fn is_compatible(&self, other: &ProtocolUri) -> bool {
        self.base == other.base && self.family == other.family && self.major == other.major
    }
}

impl Display for ProtocolUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}.{}",
            self.base, self.family, self.major, self.minor
        )
    }
}

fn normalize(uri: &str) -> String {
    match uri.strip_prefix(LEGACY_DIDCOMM_PREFIX) {
        Some(rest) => format!("{DIDCOMM_BASE}{rest}"),
        None => uri.to_string(),
    }
}

/// The handshake protocol families this crate can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProtocol {
    DidExchange,
    Connections,
}

impl HandshakeProtocol {
    /// Canonical local preference: the DID exchange protocol first, the
    /// legacy connection protocol last
    pub const PREFERENCE: [HandshakeProtocol; 2] =
        [HandshakeProtocol::DidExchange, HandshakeProtocol::Connections];

    pub fn uri(&self) -> ProtocolUri {
        match self {
            HandshakeProtocol::DidExchange => ProtocolUri::new(DIDCOMM_BASE, "didexchange", 1, 1),
            HandshakeProtocol::Connections => ProtocolUri::new(DIDCOMM_BASE, "connections", 1, 0),
        }
    }

    pub fn from_uri(uri: &ProtocolUri) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|protocol| protocol.uri().is_compatible(uri))
    }

    fn preference_rank(&self) -> usize {
        Self::PREFERENCE
            .iter()
            .position(|p| p == self)
            .unwrap_or(Self::PREFERENCE.len())
    }
}

/// A [FeatureRegistry] backed by a fixed list of protocols
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    protocols: Vec<ProtocolUri>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registry with both handshake protocols registered
    pub fn with_handshake_protocols() -> Self {
        Self {
            protocols: HandshakeProtocol::PREFERENCE
                .iter()
                .map(HandshakeProtocol::uri)
                .collect(),
        }
    }

    pub fn register(&mut self, protocol: &str) -> Result<(), Error> {
        let uri = ProtocolUri::parse(protocol)
            .ok_or_else(|| Error::InvalidConfiguration(format!("invalid protocol '{protocol}'")))?;

        if !self.protocols.contains(&uri) {
            self.protocols.push(uri);
        }

        Ok(())
    }
}

impl FeatureRegistry for ProtocolRegistry {
    fn supported_protocols(&self) -> Vec<ProtocolUri> {
        self.protocols.clone()
    }
}

/// The locally supported handshake protocols, in canonical preference order
pub fn supported_handshake_protocols(registry: &dyn FeatureRegistry) -> Vec<ProtocolUri> {
    let mut protocols = registry
        .supported_protocols()
        .into_iter()
        .filter_map(|uri| HandshakeProtocol::from_uri(&uri).map(|hp| (hp.preference_rank(), uri)))
        .collect::<Vec<_>>();

    protocols.sort_by_key(|(rank, _)| *rank);

    protocols.into_iter().map(|(_, uri)| uri).collect()
}

/// Determine the handshake protocols to put in a new invitation.
///
/// Without an explicit list, all supported protocols are used in canonical
/// order. An explicit list must only contain supported protocols and is used
/// in the order given.
pub fn resolve_handshake_protocols(
    requested: Option<&[String]>,
    supported: &[ProtocolUri],
) -> Result<Vec<String>, Error> {
    if supported.is_empty() {
        return Err(Error::InvalidConfiguration(
            "there is no handshake protocol supported, can not create a connection".into(),
        ));
    }

    let Some(requested) = requested else {
        return Ok(supported.iter().map(ToString::to_string).collect());
    };

    if requested.is_empty() {
        return Err(Error::InvalidConfiguration(
            "an explicit handshake protocol list must not be empty".into(),
        ));
    }

    for protocol in requested {
        let is_supported = ProtocolUri::parse(protocol)
            .is_some_and(|uri| supported.iter().any(|s| s.is_compatible(&uri)));

        if !is_supported {
            return Err(Error::UnsupportedHandshakeProtocol(protocol.clone()));
        }
    }

    Ok(requested.to_vec())
}

/// Pick the first protocol of an invitation's list that is supported locally,
/// returning the local version of it
pub fn select_handshake_protocol(
    invitation_protocols: &[String],
    supported: &[ProtocolUri],
) -> Result<ProtocolUri, Error> {
    invitation_protocols
        .iter()
        .filter_map(|protocol| ProtocolUri::parse(protocol))
        .find_map(|uri| supported.iter().find(|s| s.is_compatible(&uri)).cloned())
        .ok_or_else(|| Error::NoCommonHandshakeProtocol(invitation_protocols.to_vec()))
}

/// Pick the first attached request whose type is supported locally
pub fn select_supported_message<'a>(
    messages: &'a [AgentMessage],
    registry: &dyn FeatureRegistry,
) -> Result<&'a AgentMessage, Error> {
    messages
        .iter()
        .find(|message| registry.supports_message_type(&message.message_type))
        .ok_or_else(|| {
            Error::NoAcceptableMessageType(
                messages.iter().map(|m| m.message_type.clone()).collect(),
            )
        })
}
