mod chunked;
pub mod config;
pub mod credentials;
mod dispatch;
pub mod error;
pub mod events;
pub mod registry;
pub mod session;
pub mod transport;

pub use chunked::CHUNK_WINDOW;
pub use config::{AccessRoot, SessionConfig};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use error::ApiError;
pub use events::Event;
pub use registry::{OperationId, OperationKey, Registry, ThumbSize};
pub use session::Session;
pub use transport::{HttpTransport, ProgressFn, Reply, ReplySink, Transport, TransportError};

pub use stratus_core::sign::{Method, OAuthParameters, SignatureMethod, SignedRequest};
pub use stratus_core::wire::{
    AccountInfo, ChunkAck, CopyRef, DeltaPage, Metadata, QuotaInfo, TimedLink,
};
