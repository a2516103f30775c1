//! Hash-to-group and hash-to-scalar traits used in this crate.
//!
//! Every call takes its domain separation tag as a list of slices, which are concatenated by
//! `expand_message_xmd`. Callers build tags as `prefix || suite context || info` without
//! allocating.

use curve25519_dalek::{RistrettoPoint, Scalar as RistrettoScalar};
use elliptic_curve::hash2curve::{ExpandMsg, ExpandMsgXmd, Expander, GroupDigest};
use p256::{NistP256, ProjectivePoint as P256Point, Scalar as P256Scalar};
use sha2::{Sha256, Sha512};

pub trait HashToGroup: Sized {
    fn hash_to_group(msg: &[u8], dst: &[&[u8]]) -> Self;
}

pub trait HashToScalar: Sized {
    fn hash_to_scalar(msg: &[u8], dst: &[&[u8]]) -> Self;
}

/// Expands `msg` to 64 uniform bytes with `expand_message_xmd` over SHA-512, as required to map
/// into ristretto255 and its scalar field.
fn expand_sha512(msg: &[u8], dst: &[&[u8]]) -> [u8; 64] {
    let mut uniform = [0u8; 64];
    // NOTE: Expansion only fails on an empty tag or an output longer than 255 blocks. Neither can
    // happen here, since every tag carries a non-empty prefix and the output is fixed.
    ExpandMsgXmd::<Sha512>::expand_message(&[msg], dst, uniform.len())
        .expect("expand_message_xmd with a non-empty tag and 64 byte output is infallible")
        .fill_bytes(&mut uniform);
    uniform
}

impl HashToGroup for RistrettoPoint {
    fn hash_to_group(msg: &[u8], dst: &[&[u8]]) -> Self {
        RistrettoPoint::from_uniform_bytes(&expand_sha512(msg, dst))
    }
}

impl HashToScalar for RistrettoScalar {
    fn hash_to_scalar(msg: &[u8], dst: &[&[u8]]) -> Self {
        RistrettoScalar::from_bytes_mod_order_wide(&expand_sha512(msg, dst))
    }
}

impl HashToGroup for P256Point {
    fn hash_to_group(msg: &[u8], dst: &[&[u8]]) -> Self {
        // NOTE: See expand_sha512 regarding infallibility.
        NistP256::hash_from_bytes::<ExpandMsgXmd<Sha256>>(&[msg], dst)
            .expect("hash_to_curve with a non-empty tag is infallible")
    }
}

impl HashToScalar for P256Scalar {
    fn hash_to_scalar(msg: &[u8], dst: &[&[u8]]) -> Self {
        // NOTE: See expand_sha512 regarding infallibility.
        NistP256::hash_to_scalar::<ExpandMsgXmd<Sha256>>(&[msg], dst)
            .expect("hash_to_field with a non-empty tag is infallible")
    }
}
