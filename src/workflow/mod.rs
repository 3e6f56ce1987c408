pub mod form_ctx;
pub mod form_protocol;

pub use form_ctx::FormCtx;
pub use form_protocol::{BoundAttempt, FormProtocol, FormState};
