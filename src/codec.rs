//! Fixed-order binary encoding of protocol messages.
//!
//! Every message is the concatenation of its fields: scalars in their canonical fixed-size
//! encoding, elements in compressed form, integers big-endian.

use alloc::vec::Vec;

use ff::PrimeField;
use group::{Group, GroupEncoding};

use crate::suite::Ciphersuite;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("input is truncated")]
    Truncated,
    #[error("input has trailing bytes")]
    TrailingBytes,
    #[error("non-canonical scalar encoding")]
    InvalidScalar,
    #[error("invalid or identity group element encoding")]
    InvalidElement,
    #[error("inconsistent nonce set encoding")]
    InvalidNonceSet,
    #[error("presentation context does not fit the length prefix")]
    ContextLength,
}

pub trait Encode {
    fn encode(&self, out: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

pub trait Decode: Sized {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode a value that spans the entire input.
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let value = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Size in bytes of an encoded scalar for the given suite.
pub fn scalar_size<C: Ciphersuite>() -> usize {
    <C::Scalar as PrimeField>::Repr::default().as_ref().len()
}

/// Size in bytes of an encoded (compressed) element for the given suite.
pub fn element_size<C: Ciphersuite>() -> usize {
    <C::Element as GroupEncoding>::Repr::default().as_ref().len()
}

pub fn put_scalar<C: Ciphersuite>(out: &mut Vec<u8>, scalar: &C::Scalar) {
    out.extend_from_slice(scalar.to_repr().as_ref());
}

pub fn put_element<C: Ciphersuite>(out: &mut Vec<u8>, elem: &C::Element) {
    out.extend_from_slice(elem.to_bytes().as_ref());
}

/// Cursor over an input buffer. Every read checks the remaining length first.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(bytes))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn scalar<C: Ciphersuite>(&mut self) -> Result<C::Scalar, DecodeError> {
        let mut repr = <C::Scalar as PrimeField>::Repr::default();
        let len = repr.as_ref().len();
        repr.as_mut().copy_from_slice(self.take(len)?);
        Option::from(C::Scalar::from_repr(repr)).ok_or(DecodeError::InvalidScalar)
    }

    /// Reads a compressed element, rejecting invalid encodings and the identity.
    pub fn element<C: Ciphersuite>(&mut self) -> Result<C::Element, DecodeError> {
        let mut repr = <C::Element as GroupEncoding>::Repr::default();
        let len = repr.as_ref().len();
        repr.as_mut().copy_from_slice(self.take(len)?);
        let elem: C::Element =
            Option::from(C::Element::from_bytes(&repr)).ok_or(DecodeError::InvalidElement)?;
        match elem.is_identity().into() {
            true => Err(DecodeError::InvalidElement),
            false => Ok(elem),
        }
    }

    pub fn finish(self) -> Result<(), DecodeError> {
        match self.buf.is_empty() {
            true => Ok(()),
            false => Err(DecodeError::TrailingBytes),
        }
    }
}
