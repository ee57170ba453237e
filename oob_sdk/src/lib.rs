#![deny(rustdoc::broken_intra_doc_links)]

//! # Out-of-band connection establishment
//!
//! Out-of-band invitations are how DIDComm agents that do not know each other
//! yet get in touch: the inviter publishes an invitation (as a QR code, a
//! link, ...) and the invitee uses it to either run a handshake protocol,
//! reuse a connection it already has with the inviter, or directly respond to
//! a request attached to the invitation.
//!
//! The primary API this crate exposes is the [OutOfBandApi] struct, which
//! creates, receives and accepts invitations and keeps track of each exchange
//! in an [OutOfBandRecord].
//!
//! ## Collaborators
//!
//! Handshake protocols, message transport, DID resolution and routing are not
//! part of this crate; they are injected through the traits in [definitions]
//! when constructing the [OutOfBandApi].
//!
//! ## Example
//!
//! The following example shows how an inviter creates an invitation and turns
//! it into a URL.
//!
//! ```rust
//! # use std::sync::Arc;
//! # use oob_sdk::{
//! #     OutOfBandDependencies,
//! #     definitions::{ConnectionManager, DidResolver, MessageDispatcher, MessageSender},
//! # };
//! use oob_sdk::{
//!     invitation::InvitationError,
//!     CreateInvitationConfig, Error, EventBus, InMemoryRepository, OutOfBandApi,
//!     OutOfBandConfig, ProtocolRegistry, StaticRoutingProvider,
//! };
//!
//! # async fn create(
//! #     connections: Arc<dyn ConnectionManager>,
//! #     resolver: Arc<dyn DidResolver>,
//! #     sender: Arc<dyn MessageSender>,
//! #     dispatcher: Arc<dyn MessageDispatcher>,
//! # ) -> Result<(), Error> {
//! let mut config = OutOfBandConfig::new("Faber College");
//! config.default_endpoints = vec!["https://faber.example/didcomm".to_string()];
//!
//! let deps = OutOfBandDependencies {
//!     repository: Arc::new(InMemoryRepository::new()),
//!     routing: Arc::new(StaticRoutingProvider::from_config(&config)),
//!     features: Arc::new(ProtocolRegistry::with_handshake_protocols()),
//!     connections,
//!     resolver,
//!     sender,
//!     dispatcher,
//!     v2_handler: None,
//! };
//!
//! let api = OutOfBandApi::new(config, deps, &EventBus::default());
//!
//! let record = api.create_invitation(CreateInvitationConfig::default()).await?;
//! let invitation = record.invitation.as_v1().ok_or(Error::Internal)?;
//!
//! let domain = url::Url::parse("https://faber.example/ssi").map_err(InvitationError::from)?;
//! let url = invitation.to_url(&domain)?;
//! assert!(url.as_str().contains("?oob="));
//! # Ok(())
//! # }
//! ```

/// Creating, receiving and accepting invitations
pub mod api;
/// Agent wide settings
pub mod config;
/// Defines the shared data structures and the traits of the services this
/// crate depends on.
pub mod definitions;
mod error;
/// Agent events and bounded waits for them
pub mod events;
#[cfg(feature = "resolve")]
mod http_client;
/// Invitation documents, in every version and legacy format, and their URL form
pub mod invitation;
/// Public keys and their `did:key` / fingerprint encodings
pub mod key;
/// The DIDComm messages of the out-of-band protocol
pub mod messages;
/// Protocol identifiers and handshake protocol negotiation
pub mod negotiation;
/// Exchange records and their state machine
pub mod record;
/// Persistence of exchange records
pub mod repository;
/// The handshake reuse sub-protocol
pub mod reuse;
/// Routing without a mediator
pub mod routing;


pub use api::{
    AcceptInvitationConfig, AcceptedInvitation, CreateInvitationConfig, InvitationVersion,
    OutOfBandApi, OutOfBandDependencies, ReceiveImplicitInvitationConfig, ReceiveInvitationConfig,
};
pub use config::OutOfBandConfig;
pub use error::Error;
pub use events::{AgentEvent, EventBus, EventEmitter, WaitOutcome};
pub use invitation::{AnyInvitation, Invitation, OutOfBandInvitation, OutOfBandInvitationV2};
pub use key::Key;
pub use negotiation::ProtocolRegistry;
pub use record::{OutOfBandEvent, OutOfBandQuery, OutOfBandRecord, OutOfBandRole, OutOfBandState};
#[cfg(feature = "askar")]
pub use repository::AskarRepository;
pub use repository::{InMemoryRepository, OutOfBandRepository};
pub use routing::StaticRoutingProvider;
