//! Ciphersuites and the per-suite generators.

use core::fmt::Debug;

use curve25519_dalek::{RistrettoPoint, Scalar as RistrettoScalar};
use ff::{Field, PrimeField};
use group::{Group, GroupEncoding};
use rand_core::CryptoRngCore;
use zeroize::Zeroize;

use crate::hash::{HashToGroup, HashToScalar};

mod private {
    pub trait Sealed {}
}

/// A prime-order group together with the hash functions and domain separation context the
/// protocols run over.
///
/// The set of suites is closed; see [P256] and [Ristretto255].
pub trait Ciphersuite:
    private::Sealed + Clone + Copy + Debug + Default + PartialEq + Eq + Send + Sync + 'static
{
    type Scalar: PrimeField + HashToScalar + Zeroize;
    type Element: Group<Scalar = Self::Scalar> + GroupEncoding + HashToGroup;

    /// Suite name as it appears in the context string.
    const NAME: &'static str;
    /// Context string embedded in every hash call, `"ARCV1-" || NAME`.
    const CONTEXT: &'static str;
}

/// NIST P-256 with hash_to_curve suite P256_XMD:SHA-256_SSWU_RO_.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct P256;

impl private::Sealed for P256 {}

impl Ciphersuite for P256 {
    type Scalar = p256::Scalar;
    type Element = p256::ProjectivePoint;

    const NAME: &'static str = "P256";
    const CONTEXT: &'static str = "ARCV1-P256";
}

/// ristretto255 with expand_message_xmd over SHA-512.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ristretto255;

impl private::Sealed for Ristretto255 {}

impl Ciphersuite for Ristretto255 {
    type Scalar = RistrettoScalar;
    type Element = RistrettoPoint;

    const NAME: &'static str = "ristretto255";
    const CONTEXT: &'static str = "ARCV1-ristretto255";
}

/// Generators for a ciphersuite.
///
/// Constructed once with [Suite::new] and then passed by reference into every protocol
/// operation. Nothing mutates it after construction, so it can be shared freely across threads.
///
/// H is derived by hashing the encoding of G to the group. It is critical that H have no known
/// discrete log relative to G, as H is the blinding generator for commitments to the key and to
/// the client's attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suite<C: Ciphersuite> {
    generator_g: C::Element,
    generator_h: C::Element,
}

impl<C: Ciphersuite> Suite<C> {
    pub fn new() -> Self {
        let generator_g = C::Element::generator();
        let generator_h = Self::hash_to_group_with(generator_g.to_bytes().as_ref(), b"generatorH");
        Self {
            generator_g,
            generator_h,
        }
    }

    /// Canonical generator G of the group.
    pub fn g(&self) -> C::Element {
        self.generator_g
    }

    /// Second generator H, independent of G.
    pub fn h(&self) -> C::Element {
        self.generator_h
    }

    pub fn name(&self) -> &'static str {
        C::NAME
    }

    /// `HashToGroup(msg, info)` with tag `"HashToGroup-" || context || info`.
    pub fn hash_to_group(&self, msg: &[u8], info: &[u8]) -> C::Element {
        Self::hash_to_group_with(msg, info)
    }

    /// `HashToScalar(msg, info)` with tag `"HashToScalar-" || context || info`.
    pub fn hash_to_scalar(&self, msg: &[u8], info: &[u8]) -> C::Scalar {
        C::Scalar::hash_to_scalar(msg, &[b"HashToScalar-", C::CONTEXT.as_bytes(), info])
    }

    fn hash_to_group_with(msg: &[u8], info: &[u8]) -> C::Element {
        C::Element::hash_to_group(msg, &[b"HashToGroup-", C::CONTEXT.as_bytes(), info])
    }
}

impl<C: Ciphersuite> Default for Suite<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples a uniformly random scalar, rejecting zero.
///
/// A zero key component or randomizer would collapse elements to the identity, which the encoding
/// rejects and which breaks several of the protocol equalities.
pub(crate) fn random_scalar<C, R>(rng: &mut R) -> C::Scalar
where
    C: Ciphersuite,
    R: CryptoRngCore + ?Sized,
{
    loop {
        let x = C::Scalar::random(&mut *rng);
        if !bool::from(x.is_zero()) {
            return x;
        }
    }
}
