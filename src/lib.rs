#![cfg_attr(not(feature = "std"), no_std)]

//! Anonymous rate-limited credentials.
//!
//! An issuer holding a [PrivateKey] issues a [Credential] over a hidden client attribute and a
//! request context, through the [CredentialRequest] / [CredentialResponse] exchange. The client
//! then presents it at most `limit` times per presentation context with [State::present]. The
//! issuer verifies each [Presentation] with [PrivateKey::verify_presentation] without learning
//! which credential it came from.
//!
//! All operations are generic over a [Ciphersuite] and take an explicit [Suite] holding its
//! generators.

extern crate alloc;

pub mod codec;
pub mod hash;
pub mod issuance;
pub mod nonce;
pub mod presentation;
pub mod suite;
pub mod zkp;

pub use codec::{Decode, DecodeError, Encode};
pub use issuance::{
    Credential, CredentialRequest, CredentialResponse, Finalizer, IssuanceError, PrivateKey,
    PublicKey,
};
pub use nonce::NonceSet;
pub use presentation::{Presentation, PresentationError, State};
pub use suite::{Ciphersuite, Ristretto255, Suite, P256};
