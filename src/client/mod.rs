pub mod builder;
pub mod handle;
pub mod provision;
pub mod transport;

mod connection;

pub use builder::{RealtimeClientBuilder, RealtimeConnector};
pub use handle::RealtimeClient;
pub use provision::{HttpSessionProvisioner, SessionProvisioner, StaticProvisioner};
pub use transport::{Connected, SessionConnector, SessionTransport};

/// Header selecting the realtime protocol revision this client speaks.
pub(crate) const REALTIME_BETA_HEADER: (&str, &str) = ("openai-beta", "realtime=v1");
/// Capacity of the queue between the client handle and the socket task: the
/// initial `session.update` plus one audio frame. A frame offered while
/// another is still waiting for the socket is refused rather than queued.
pub(crate) const OUTGOING_QUEUE_CAPACITY: usize = 2;
