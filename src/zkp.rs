//! Sigma protocols proving knowledge of scalars satisfying linear relations among group elements,
//! made non-interactive with the Fiat-Shamir transform.
//!
//! A statement is declared by appending scalar variables, public elements, and constraints of the
//! form `target = Σ s_i * E_i`. All constraints in one transcript share a single challenge. The
//! [Prover] and [Verifier] both implement [ConstraintSystem], so a statement can be declared once
//! and run on either side; only scalar allocation differs, as the prover supplies witnesses.

use alloc::vec::Vec;
use core::fmt;

use ff::Field;
use group::GroupEncoding;
use itertools::zip_eq;
use rand_core::CryptoRngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{
    codec::{put_scalar, DecodeError, Encode, Reader},
    suite::{Ciphersuite, Suite},
};

/// Index of a scalar variable within one constraint system.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScalarVar(usize);

/// Index of a public element within one constraint system.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElementVar(usize);

#[derive(Clone, Debug)]
struct Constraint {
    target: ElementVar,
    terms: Vec<(ScalarVar, ElementVar)>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    #[error("constraint references a variable that was not allocated in this constraint system")]
    InvalidIndex,
    #[error("proof verification failed")]
    VerificationFailure,
}

/// Non-interactive proof: the challenge and one response per scalar variable, in the order the
/// variables were appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof<C: Ciphersuite> {
    challenge: C::Scalar,
    responses: Vec<C::Scalar>,
}

impl<C: Ciphersuite> Proof<C> {
    pub fn challenge(&self) -> &C::Scalar {
        &self.challenge
    }

    pub fn responses(&self) -> &[C::Scalar] {
        &self.responses
    }

    /// Reads a proof with exactly `n` responses. The count is fixed by the statement, so it is not
    /// part of the encoding.
    pub fn decode(reader: &mut Reader<'_>, n: usize) -> Result<Self, DecodeError> {
        let challenge = reader.scalar::<C>()?;
        let responses = (0..n)
            .map(|_| reader.scalar::<C>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            challenge,
            responses,
        })
    }
}

impl<C: Ciphersuite> Encode for Proof<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_scalar::<C>(out, &self.challenge);
        for response in self.responses.iter() {
            put_scalar::<C>(out, response);
        }
    }
}

/// Operations shared by [Prover] and [Verifier].
pub trait ConstraintSystem<C: Ciphersuite> {
    fn append_element(&mut self, label: &'static str, value: C::Element) -> ElementVar;

    /// Constrain `target = Σ scalar * element` over the given terms.
    ///
    /// Every variable must have been allocated by this constraint system, otherwise
    /// [ProofError::InvalidIndex] is returned and nothing is recorded.
    fn constrain(
        &mut self,
        target: ElementVar,
        terms: impl IntoIterator<Item = (ScalarVar, ElementVar)>,
    ) -> Result<(), ProofError>;
}

/// Append-only record of the variables and constraints of a statement.
struct Builder<'s, C: Ciphersuite> {
    suite: &'s Suite<C>,
    label: &'static str,
    scalar_labels: Vec<&'static str>,
    element_labels: Vec<&'static str>,
    elements: Vec<C::Element>,
    constraints: Vec<Constraint>,
}

impl<'s, C: Ciphersuite> Builder<'s, C> {
    fn new(suite: &'s Suite<C>, label: &'static str) -> Self {
        Self {
            suite,
            label,
            scalar_labels: Vec::new(),
            element_labels: Vec::new(),
            elements: Vec::new(),
            constraints: Vec::new(),
        }
    }

    fn append_scalar(&mut self, label: &'static str) -> ScalarVar {
        self.scalar_labels.push(label);
        ScalarVar(self.scalar_labels.len() - 1)
    }

    fn append_element(&mut self, label: &'static str, value: C::Element) -> ElementVar {
        self.element_labels.push(label);
        self.elements.push(value);
        ElementVar(self.elements.len() - 1)
    }

    fn constrain(
        &mut self,
        target: ElementVar,
        terms: impl IntoIterator<Item = (ScalarVar, ElementVar)>,
    ) -> Result<(), ProofError> {
        let terms: Vec<_> = terms.into_iter().collect();
        let in_range = target.0 < self.elements.len()
            && terms
                .iter()
                .all(|(s, e)| s.0 < self.scalar_labels.len() && e.0 < self.elements.len());
        if !in_range {
            return Err(ProofError::InvalidIndex);
        }
        self.constraints.push(Constraint { target, terms });
        Ok(())
    }

    /// Evaluates the right-hand side of a constraint with the given scalar assignment.
    ///
    /// Indices were checked in [Builder::constrain] and `scalars` has one entry per scalar
    /// variable, so indexing cannot go out of bounds.
    fn evaluate(&self, constraint: &Constraint, scalars: &[C::Scalar]) -> C::Element {
        constraint
            .terms
            .iter()
            .map(|(s, e)| self.elements[e.0] * scalars[s.0])
            .sum()
    }

    /// Fiat-Shamir challenge over every public element followed by every commitment, each
    /// prefixed with its encoded length.
    fn challenge(&self, commitments: &[C::Element]) -> C::Scalar {
        let mut transcript = Vec::new();
        for elem in self.elements.iter().chain(commitments) {
            let bytes = elem.to_bytes();
            let bytes = bytes.as_ref();
            transcript.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            transcript.extend_from_slice(bytes);
        }
        self.suite.hash_to_scalar(&transcript, self.label.as_bytes())
    }
}

impl<C: Ciphersuite> fmt::Debug for Builder<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("suite", &C::NAME)
            .field("label", &self.label)
            .field("scalars", &self.scalar_labels)
            .field("elements", &self.element_labels)
            .field("constraints", &self.constraints)
            .finish()
    }
}

/// Constraint system holding witnesses for its scalar variables.
pub struct Prover<'s, C: Ciphersuite> {
    builder: Builder<'s, C>,
    witnesses: Zeroizing<Vec<C::Scalar>>,
}

impl<'s, C: Ciphersuite> Prover<'s, C> {
    pub fn new(suite: &'s Suite<C>, label: &'static str) -> Self {
        Self::with_capacity(suite, label, 0)
    }

    /// Creates a prover with room for `scalars` witnesses, so appending them never moves the
    /// witness buffer.
    pub fn with_capacity(suite: &'s Suite<C>, label: &'static str, scalars: usize) -> Self {
        Self {
            builder: Builder::new(suite, label),
            witnesses: Zeroizing::new(Vec::with_capacity(scalars)),
        }
    }

    pub fn append_scalar(&mut self, label: &'static str, witness: C::Scalar) -> ScalarVar {
        // Grow by copying into a new buffer, so the old one is zeroized on drop rather than freed
        // by a reallocation.
        if self.witnesses.len() == self.witnesses.capacity() {
            let mut grown = Vec::with_capacity((2 * self.witnesses.len()).max(4));
            grown.extend_from_slice(&self.witnesses);
            self.witnesses = Zeroizing::new(grown);
        }
        self.witnesses.push(witness);
        self.builder.append_scalar(label)
    }

    /// Produce a proof of knowledge of the witnesses. Consumes the prover; witnesses and blinding
    /// scalars are zeroized before this returns.
    pub fn prove<R>(self, rng: &mut R) -> Proof<C>
    where
        R: CryptoRngCore + ?Sized,
    {
        // Blinding scalars reveal the witnesses given the responses, so they are held in a
        // zeroizing buffer for their whole lifetime.
        let blindings: Zeroizing<Vec<C::Scalar>> = Zeroizing::new(
            (0..self.witnesses.len())
                .map(|_| C::Scalar::random(&mut *rng))
                .collect(),
        );
        let commitments: Vec<C::Element> = self
            .builder
            .constraints
            .iter()
            .map(|constraint| self.builder.evaluate(constraint, &blindings))
            .collect();
        let challenge = self.builder.challenge(&commitments);
        let responses = zip_eq(blindings.iter(), self.witnesses.iter())
            .map(|(k, w)| *k - challenge * w)
            .collect();

        Proof {
            challenge,
            responses,
        }
    }
}

impl<C: Ciphersuite> fmt::Debug for Prover<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prover")
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

impl<C: Ciphersuite> ConstraintSystem<C> for Prover<'_, C> {
    fn append_element(&mut self, label: &'static str, value: C::Element) -> ElementVar {
        self.builder.append_element(label, value)
    }

    fn constrain(
        &mut self,
        target: ElementVar,
        terms: impl IntoIterator<Item = (ScalarVar, ElementVar)>,
    ) -> Result<(), ProofError> {
        self.builder.constrain(target, terms)
    }
}

/// Constraint system over public elements only, checked against a [Proof].
#[derive(Debug)]
pub struct Verifier<'s, C: Ciphersuite> {
    builder: Builder<'s, C>,
}

impl<'s, C: Ciphersuite> Verifier<'s, C> {
    pub fn new(suite: &'s Suite<C>, label: &'static str) -> Self {
        Self {
            builder: Builder::new(suite, label),
        }
    }

    pub fn append_scalar(&mut self, label: &'static str) -> ScalarVar {
        self.builder.append_scalar(label)
    }

    /// Check the proof against the declared statement. Consumes the verifier.
    ///
    /// Failure of any constraint yields the same [ProofError::VerificationFailure].
    pub fn verify(self, proof: &Proof<C>) -> Result<(), ProofError> {
        if proof.responses.len() != self.builder.scalar_labels.len() {
            return Err(ProofError::VerificationFailure);
        }
        let commitments: Vec<C::Element> = self
            .builder
            .constraints
            .iter()
            .map(|constraint| {
                self.builder.elements[constraint.target.0] * proof.challenge
                    + self.builder.evaluate(constraint, &proof.responses)
            })
            .collect();
        let challenge = self.builder.challenge(&commitments);
        match challenge.ct_eq(&proof.challenge).into() {
            true => Ok(()),
            false => Err(ProofError::VerificationFailure),
        }
    }
}

impl<C: Ciphersuite> ConstraintSystem<C> for Verifier<'_, C> {
    fn append_element(&mut self, label: &'static str, value: C::Element) -> ElementVar {
        self.builder.append_element(label, value)
    }

    fn constrain(
        &mut self,
        target: ElementVar,
        terms: impl IntoIterator<Item = (ScalarVar, ElementVar)>,
    ) -> Result<(), ProofError> {
        self.builder.constrain(target, terms)
    }
}
