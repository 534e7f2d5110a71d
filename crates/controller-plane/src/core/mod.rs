//! Verification and authorization logic for bindings

mod authorize;
mod callback;
mod verify;

pub use authorize::authorize;
pub use callback::{
    accept_binding_callback, authorize_admin_request, check_secret, published_descriptor,
};
pub use verify::{
    verify_mandate_token, verify_mandate_token_at, PartialVerification, VerificationError,
    VerifiedMandate, VerifiedToken,
};
