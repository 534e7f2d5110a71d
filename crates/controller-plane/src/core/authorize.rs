//! Administrative authorization
//!
//! A request is allowed when at least one verified mandate was signed by the
//! realm the binding is bound to and grants one of the binding's admin roles.

use controller_core::PublicKey;
use tracing::{info, warn};

use super::verify::VerifiedMandate;
use crate::error::BindingError;
use crate::registry::Binding;

/// Check that `mandates` grant administrative rights over `binding`
///
/// Unbound bindings and realms without a key never authorize anyone.
pub fn authorize(binding: &Binding, mandates: &[VerifiedMandate]) -> Result<(), BindingError> {
    let Some(realm_key) = binding.realm().and_then(|r| r.public_key.as_ref()) else {
        warn!(id = %binding.id(), "Authorization denied: binding has no realm key");
        return Err(BindingError::Forbidden("binding is not bound to a realm".into()));
    };

    match granting_mandate(realm_key, binding.admin_roles(), mandates) {
        Some(granted) => {
            info!(id = %binding.id(), role = %granted.mandate.role, "Administrative access granted");
            Ok(())
        }
        None => {
            warn!(
                id = %binding.id(),
                presented = mandates.len(),
                "Authorization denied: no mandate grants an admin role"
            );
            Err(BindingError::Forbidden(
                "no mandate from the bound realm grants an admin role".into(),
            ))
        }
    }
}

fn granting_mandate<'a>(
    realm_key: &PublicKey,
    admin_roles: &[String],
    mandates: &'a [VerifiedMandate],
) -> Option<&'a VerifiedMandate> {
    let realm = realm_key.thumbprint();
    mandates.iter().find(|m| {
        m.signer.thumbprint() == realm && admin_roles.iter().any(|role| *role == m.mandate.role)
    })
}
