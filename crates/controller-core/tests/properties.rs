//! Property-Based Tests for signed envelopes and key material
//!
//! These tests check the properties the trust protocol leans on:
//! 1. THUMBPRINT: stable per key, independent of key id, distinct across keys
//! 2. INTEGRITY: any change to a signed payload breaks verification
//! 3. CONFIDENTIALITY: sealed keys only open under the sealing KEK
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use controller_core::{KeyPair, PublicKey, SignedEnvelope, StoredKey};
use proptest::prelude::*;

// =============================================================================
// THUMBPRINT
// =============================================================================

proptest! {
    /// Relabeling a key never changes its thumbprint
    #[test]
    fn prop_thumbprint_ignores_kid(
        seed in prop::array::uniform32(any::<u8>()),
        kid_a in "[a-z0-9-]{0,16}",
        kid_b in "[a-z0-9-]{0,16}",
    ) {
        let a = KeyPair::from_bytes(kid_a, &seed).public_key();
        let b = PublicKey::from_bytes(kid_b, &a.to_bytes()).unwrap();

        prop_assert_eq!(a.thumbprint(), b.thumbprint());
        prop_assert_eq!(a, b);
    }

    /// Different keys have different thumbprints
    #[test]
    fn prop_thumbprint_distinguishes_keys(
        seed_a in prop::array::uniform32(any::<u8>()),
        seed_b in prop::array::uniform32(any::<u8>()),
    ) {
        prop_assume!(seed_a != seed_b);

        let a = KeyPair::from_bytes("k", &seed_a).public_key();
        let b = KeyPair::from_bytes("k", &seed_b).public_key();

        prop_assert_ne!(a.thumbprint(), b.thumbprint());
    }

    /// Thumbprints survive a serialization round trip of the key
    #[test]
    fn prop_thumbprint_survives_serde(seed in prop::array::uniform32(any::<u8>())) {
        let key = KeyPair::from_bytes("k", &seed).public_key();
        let json = serde_json::to_string(&key).unwrap();
        let restored: PublicKey = serde_json::from_str(&json).unwrap();

        prop_assert_eq!(key.thumbprint(), restored.thumbprint());
    }
}

// =============================================================================
// INTEGRITY
// =============================================================================

proptest! {
    /// Flipping any payload byte makes the envelope fail verification
    #[test]
    fn prop_tampered_payload_rejected(
        payload in prop::collection::vec(any::<u8>(), 1..128),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let kp = KeyPair::generate("signer");
        let envelope = kp.sign_bytes(&payload).unwrap();

        let mut cose = envelope.cose().clone();
        let body = cose.payload.as_mut().unwrap();
        let i = index.index(body.len());
        body[i] ^= flip;

        let bytes = coset::CborSerializable::to_vec(cose).unwrap();
        let tampered = SignedEnvelope::from_bytes(&bytes).unwrap();

        prop_assert!(tampered.verify_embedded().is_err());
        prop_assert!(kp.public_key().verify(&tampered).is_err());
    }

    /// Envelopes survive token encoding and still verify
    #[test]
    fn prop_token_roundtrip_verifies(payload in prop::collection::vec(any::<u8>(), 0..256)) {
        let kp = KeyPair::generate("signer");
        let token = kp.sign_bytes(&payload).unwrap().to_token().unwrap();

        let (verified, signer) = SignedEnvelope::from_token(&token)
            .unwrap()
            .verify_embedded()
            .unwrap();

        prop_assert_eq!(verified, payload);
        prop_assert_eq!(signer, kp.public_key());
    }
}

// =============================================================================
// CONFIDENTIALITY
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A sealed key opens only with the KEK it was sealed under
    #[test]
    fn prop_sealed_key_requires_same_kek(
        kek in prop::array::uniform32(any::<u8>()),
        other in prop::array::uniform32(any::<u8>()),
        id in "[a-z0-9]{1,12}",
    ) {
        prop_assume!(kek != other);

        let key = KeyPair::generate(id.clone());
        let stored = StoredKey::encrypt(id, &key, &kek).unwrap();

        prop_assert_eq!(stored.decrypt(&kek).unwrap().signing_key_bytes(), key.signing_key_bytes());
        prop_assert!(stored.decrypt(&other).is_err());
    }
}
