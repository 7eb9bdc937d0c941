pub mod locale;
pub mod sign;
pub mod wire;

pub use locale::best_match;
pub use sign::{
    AppIdentity, Method, OAuthParameters, RequestBody, SignatureMethod, SignedRequest,
    SigningContext, sign_request, sign_upload,
};
pub use wire::{
    AccountInfo, ChunkAck, CopyRef, DecodeError, DeltaPage, Metadata, QuotaInfo, TimedLink,
};
