//! Setup callbacks
//!
//! During setup a realm fetches the controller's descriptor and then posts a
//! binding document back, both authenticated by the binding's setup secret.
//! These functions hold that logic independent of any transport.

use controller_core::{ControllerBinding, ControllerDescriptor, SignedEnvelope};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::authorize::authorize;
use super::verify::VerifiedMandate;
use crate::error::BindingError;
use crate::registry::{Binding, BindingRegistry};

/// Compare a presented setup secret with the binding's, in constant time
pub fn check_secret(binding: &Binding, presented: &str) -> Result<(), BindingError> {
    if bool::from(binding.secret().as_bytes().ct_eq(presented.as_bytes())) {
        Ok(())
    } else {
        warn!(id = %binding.id(), "Setup secret mismatch");
        Err(BindingError::Forbidden("invalid setup secret".into()))
    }
}

/// Descriptor as handed to a realm during setup
///
/// The stored descriptor is completed with the binding's key and status, and
/// its admin UI gains a `binding=<id>` query parameter unless one is present.
pub fn published_descriptor(
    binding: &Binding,
    secret: &str,
) -> Result<ControllerDescriptor, BindingError> {
    check_secret(binding, secret)?;

    let mut descriptor = binding.descriptor().clone();
    descriptor.key = binding.public_key().cloned();
    descriptor.status = binding.status().to_string();

    if !descriptor.admin_ui.contains("binding=") {
        let separator = if descriptor.admin_ui.contains('?') { '&' } else { '?' };
        descriptor.admin_ui = format!(
            "{}{}binding={}",
            descriptor.admin_ui,
            separator,
            binding.id()
        );
    }

    Ok(descriptor)
}

/// Accept a binding document posted by a realm and bind to it
///
/// `body` is either a signed envelope token or plain JSON. A signed body must
/// be signed by the key its own realm descriptor names.
pub async fn accept_binding_callback(
    binding: &mut Binding,
    secret: &str,
    body: &str,
) -> Result<(), BindingError> {
    check_secret(binding, secret)?;

    let body = body.trim();
    let document: ControllerBinding = if body.starts_with('{') {
        serde_json::from_str(body)
            .map_err(|e| BindingError::InvalidCallback(format!("malformed binding: {}", e)))?
    } else {
        signed_binding(body)?
    };

    binding.bind(document).await
}

fn signed_binding(token: &str) -> Result<ControllerBinding, BindingError> {
    let envelope = SignedEnvelope::from_token(token)
        .map_err(|e| BindingError::InvalidCallback(e.to_string()))?;
    let (payload, signer) = envelope
        .verify_embedded()
        .map_err(|e| BindingError::InvalidCallback(e.to_string()))?;

    let document: ControllerBinding = serde_json::from_slice(&payload)
        .map_err(|e| BindingError::InvalidCallback(format!("malformed binding: {}", e)))?;

    let realm_key = document
        .realm_descriptor
        .as_ref()
        .and_then(|r| r.public_key.as_ref())
        .ok_or_else(|| BindingError::InvalidCallback("realm descriptor has no key".into()))?;

    if realm_key.thumbprint() != signer.thumbprint() {
        warn!(signer = %signer.thumbprint(), "Binding callback not signed by its realm");
        return Err(BindingError::InvalidCallback(
            "payload not signed by the realm".into(),
        ));
    }

    info!(realm = %realm_key.thumbprint(), "Accepted signed binding callback");
    Ok(document)
}

/// Load a binding and authorize an administrative request against it
pub async fn authorize_admin_request(
    registry: &BindingRegistry,
    binding_id: &str,
    mandates: &[VerifiedMandate],
) -> Result<Binding, BindingError> {
    let binding = registry.get(binding_id).await?;
    authorize(&binding, mandates)?;
    Ok(binding)
}
