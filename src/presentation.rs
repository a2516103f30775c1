//! Unlinkable, rate-limited presentations of a [Credential].
//!
//! A [State] binds a credential to one presentation context and a budget of `limit`
//! presentations. Each call to [State::present] re-randomizes the credential, spends one nonce,
//! and derives a tag from the context and the nonce. The verifier checks the proof with
//! [PrivateKey::verify_presentation]; repeated `(presentation_context, nonce)` pairs must be
//! detected by the caller.

use alloc::vec::Vec;

use ff::Field;
use group::Group;
use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

use crate::{
    codec::{put_element, Decode, DecodeError, Encode, Reader},
    issuance::{Credential, PrivateKey, REQUEST_CONTEXT_INFO},
    nonce::NonceSet,
    suite::{random_scalar, Ciphersuite, Suite},
    zkp::{ConstraintSystem, Proof, ProofError, Prover, ScalarVar, Verifier},
};

const PRESENTATION_LABEL: &str = "CredentialPresentation";
const TAG_INFO: &[u8] = b"Tag";

const PRESENTATION_PROOF_SCALARS: usize = 4;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PresentationError {
    #[error("presentation limit must be in 1..{}", u16::MAX)]
    LimitValid,
    #[error("presentation context is longer than {} bytes", u16::MAX - 1)]
    ContextLength,
    #[error("presentation limit exceeded")]
    LimitExceeded,
    #[error("nonce is outside of the presentation limit")]
    InvalidNonce,
    #[error("presentation verification failed")]
    VerificationFailed,
    #[error("attribute and nonce sum to zero")]
    DegenerateTag,
    #[error("constraint system error: {0}")]
    Constraint(ProofError),
}

impl From<ProofError> for PresentationError {
    fn from(value: ProofError) -> Self {
        PresentationError::Constraint(value)
    }
}

/// Client state for presenting one credential under one presentation context.
#[derive(Clone, Debug)]
pub struct State<C: Ciphersuite> {
    credential: Credential<C>,
    presentation_context: Vec<u8>,
    nonce_set: NonceSet,
}

/// A re-randomized credential with a per-nonce tag and a proof tying them together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Presentation<C: Ciphersuite> {
    u: C::Element,
    u_prime_commit: C::Element,
    m1_commit: C::Element,
    tag: C::Element,
    proof: Proof<C>,
}

/// Public elements of the presentation proof. `v` and `m1_tag` are computed independently by
/// each side: the client from its randomizers, the verifier from its key.
struct PresentationStatement<C: Ciphersuite> {
    u: C::Element,
    u_prime_commit: C::Element,
    m1_commit: C::Element,
    v: C::Element,
    x1: C::Element,
    tag: C::Element,
    gen_t: C::Element,
    m1_tag: C::Element,
}

impl<C: Ciphersuite> PresentationStatement<C> {
    fn constrain<CS: ConstraintSystem<C>>(
        &self,
        cs: &mut CS,
        suite: &Suite<C>,
        [m1, z, r_neg, nonce]: [ScalarVar; PRESENTATION_PROOF_SCALARS],
    ) -> Result<(), ProofError> {
        let gen_g = cs.append_element("genG", suite.g());
        let gen_h = cs.append_element("genH", suite.h());
        let u = cs.append_element("U", self.u);
        let _ = cs.append_element("UPrimeCommit", self.u_prime_commit);
        let m1_commit = cs.append_element("m1Commit", self.m1_commit);
        let v = cs.append_element("V", self.v);
        let x1 = cs.append_element("X1", self.x1);
        let tag = cs.append_element("tag", self.tag);
        let gen_t = cs.append_element("genT", self.gen_t);
        let m1_tag = cs.append_element("m1Tag", self.m1_tag);

        cs.constrain(m1_commit, [(m1, u), (z, gen_h)])?;
        cs.constrain(v, [(z, x1), (r_neg, gen_g)])?;
        cs.constrain(gen_t, [(m1, tag), (nonce, tag)])?;
        cs.constrain(m1_tag, [(m1, tag)])
    }
}

impl<C: Ciphersuite> State<C> {
    /// Prepare to present `credential` up to `limit` times under `presentation_context`.
    pub fn new(
        credential: Credential<C>,
        presentation_context: impl Into<Vec<u8>>,
        limit: u16,
    ) -> Result<Self, PresentationError> {
        let presentation_context = presentation_context.into();
        let nonce_set = NonceSet::new(limit).ok_or(PresentationError::LimitValid)?;
        if presentation_context.len() >= usize::from(u16::MAX) {
            return Err(PresentationError::ContextLength);
        }
        Ok(Self {
            credential,
            presentation_context,
            nonce_set,
        })
    }

    pub fn credential(&self) -> &Credential<C> {
        &self.credential
    }

    pub fn presentation_context(&self) -> &[u8] {
        &self.presentation_context
    }

    pub fn limit(&self) -> u16 {
        self.nonce_set.limit()
    }

    /// Number of presentations left before [PresentationError::LimitExceeded].
    pub fn remaining(&self) -> u16 {
        self.nonce_set.available()
    }

    /// Produce a fresh presentation and the nonce it was bound to.
    ///
    /// Fails with [PresentationError::LimitExceeded] once `limit` presentations have been made.
    /// The state is left unchanged in that case and remains usable for encoding.
    pub fn present<R>(
        &mut self,
        suite: &Suite<C>,
        rng: &mut R,
    ) -> Result<(u16, Presentation<C>), PresentationError>
    where
        R: CryptoRngCore + ?Sized,
    {
        if self.nonce_set.available() == 0 {
            tracing::debug!(suite = C::NAME, limit = self.limit(), "presentation limit exceeded");
            return Err(PresentationError::LimitExceeded);
        }

        let a = Zeroizing::new(random_scalar::<C, _>(rng));
        let r = Zeroizing::new(random_scalar::<C, _>(rng));
        let z = Zeroizing::new(random_scalar::<C, _>(rng));
        let m1 = Zeroizing::new(self.credential.m1);

        let u = self.credential.u * *a;
        let u_prime_commit = self.credential.u_prime * *a + suite.g() * *r;
        let m1_commit = u * *m1 + suite.h() * *z;

        let gen_t = suite.hash_to_group(&self.presentation_context, TAG_INFO);
        let nonce = self
            .nonce_set
            .add_random(rng)
            .ok_or(PresentationError::LimitExceeded)?;
        let nonce_scalar = C::Scalar::from(u64::from(nonce));
        let inverse = Option::<C::Scalar>::from((*m1 + nonce_scalar).invert())
            .map(Zeroizing::new)
            .ok_or(PresentationError::DegenerateTag)?;
        let tag = gen_t * *inverse;

        let r_neg = Zeroizing::new(-*r);
        let statement = PresentationStatement {
            u,
            u_prime_commit,
            m1_commit,
            v: self.credential.x1 * *z + suite.g() * *r_neg,
            x1: self.credential.x1,
            tag,
            gen_t,
            m1_tag: tag * *m1,
        };

        let mut prover =
            Prover::with_capacity(suite, PRESENTATION_LABEL, PRESENTATION_PROOF_SCALARS);
        let vars = [
            prover.append_scalar("m1", *m1),
            prover.append_scalar("z", *z),
            prover.append_scalar("-r", *r_neg),
            prover.append_scalar("nonce", nonce_scalar),
        ];
        statement.constrain(&mut prover, suite, vars)?;
        let proof = prover.prove(rng);

        tracing::trace!(
            suite = C::NAME,
            remaining = self.remaining(),
            "created presentation"
        );
        Ok((
            nonce,
            Presentation {
                u,
                u_prime_commit,
                m1_commit,
                tag,
                proof,
            },
        ))
    }
}

impl<C: Ciphersuite> Presentation<C> {
    /// Tag derived from the presentation context and nonce. Two presentations under the same
    /// context and nonce from the same credential carry the same tag.
    pub fn tag(&self) -> C::Element {
        self.tag
    }
}

impl<C: Ciphersuite> PrivateKey<C> {
    /// Verify a presentation against the request context the credential was issued for and the
    /// presentation context, nonce and limit agreed with the client.
    ///
    /// A nonce at or above `limit` returns [PresentationError::InvalidNonce]. Every cryptographic
    /// mismatch returns [PresentationError::VerificationFailed].
    pub fn verify_presentation(
        &self,
        suite: &Suite<C>,
        presentation: &Presentation<C>,
        request_context: &[u8],
        presentation_context: &[u8],
        nonce: u16,
        limit: u16,
    ) -> Result<(), PresentationError> {
        if nonce >= limit {
            tracing::debug!(suite = C::NAME, nonce, limit, "rejecting presentation nonce");
            return Err(PresentationError::InvalidNonce);
        }
        // NOTE: Unwrapping the Choice is ok here because U is non-private.
        if bool::from(presentation.u.is_identity()) {
            tracing::debug!(suite = C::NAME, "rejecting presentation with identity U");
            return Err(PresentationError::VerificationFailed);
        }

        let gen_t = suite.hash_to_group(presentation_context, TAG_INFO);
        let nonce_scalar = C::Scalar::from(u64::from(nonce));
        let m2 = suite.hash_to_scalar(request_context, REQUEST_CONTEXT_INFO);
        let statement = PresentationStatement {
            u: presentation.u,
            u_prime_commit: presentation.u_prime_commit,
            m1_commit: presentation.m1_commit,
            v: presentation.u * self.x0 + presentation.m1_commit * self.x1
                + presentation.u * (self.x2 * m2)
                - presentation.u_prime_commit,
            x1: suite.h() * self.x1,
            tag: presentation.tag,
            gen_t,
            m1_tag: gen_t - presentation.tag * nonce_scalar,
        };

        let mut verifier = Verifier::new(suite, PRESENTATION_LABEL);
        let vars = [
            verifier.append_scalar("m1"),
            verifier.append_scalar("z"),
            verifier.append_scalar("-r"),
            verifier.append_scalar("nonce"),
        ];
        statement.constrain(&mut verifier, suite, vars)?;
        match verifier.verify(&presentation.proof) {
            Ok(()) => {
                tracing::trace!(suite = C::NAME, nonce, "verified presentation");
                Ok(())
            }
            Err(_) => {
                tracing::debug!(suite = C::NAME, nonce, "rejecting presentation proof");
                Err(PresentationError::VerificationFailed)
            }
        }
    }
}

impl<C: Ciphersuite> Encode for Presentation<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_element::<C>(out, &self.u);
        put_element::<C>(out, &self.u_prime_commit);
        put_element::<C>(out, &self.m1_commit);
        put_element::<C>(out, &self.tag);
        self.proof.encode(out);
    }
}

impl<C: Ciphersuite> Decode for Presentation<C> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            u: reader.element::<C>()?,
            u_prime_commit: reader.element::<C>()?,
            m1_commit: reader.element::<C>()?,
            tag: reader.element::<C>()?,
            proof: Proof::decode(reader, PRESENTATION_PROOF_SCALARS)?,
        })
    }
}

impl<C: Ciphersuite> Encode for State<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        self.credential.encode(out);
        self.nonce_set.encode(out);
        // Length is bounded at construction and decoding.
        out.extend_from_slice(&(self.presentation_context.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.presentation_context);
    }
}

impl<C: Ciphersuite> Decode for State<C> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let credential = Credential::decode(reader)?;
        let nonce_set = NonceSet::decode(reader)?;
        let len = reader.u16()?;
        if len == u16::MAX {
            return Err(DecodeError::ContextLength);
        }
        Ok(Self {
            credential,
            nonce_set,
            presentation_context: reader.take(usize::from(len))?.to_vec(),
        })
    }
}

#[cfg(test)]
mod test {
    use alloc::{collections::BTreeSet, vec, vec::Vec};

    use group::GroupEncoding;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::{Presentation, PresentationError, State};
    use crate::{
        codec::{element_size, scalar_size, Decode, DecodeError, Encode},
        issuance::{Credential, CredentialRequest, PrivateKey},
        suite::{Ciphersuite, P256, Ristretto255, Suite},
    };

    const REQUEST_CONTEXT: &[u8] = b"Credential for Alice";
    const PRESENTATION_CONTEXT: &[u8] = b"Presentation for example.com";
    const OTHER_REQUEST_CONTEXT: &[u8] = b"Credential for Bob";
    const OTHER_PRESENTATION_CONTEXT: &[u8] = b"Presentation for example.org";

    fn issue<C: Ciphersuite>(
        suite: &Suite<C>,
        rng: &mut ChaCha20Rng,
    ) -> (PrivateKey<C>, Credential<C>) {
        let key = PrivateKey::<C>::generate(rng);
        let (finalizer, request) = CredentialRequest::new(suite, REQUEST_CONTEXT, rng);
        let response = key.respond(suite, &request, rng).unwrap();
        let credential = finalizer
            .finalize(suite, &request, &response, &key.public_key(suite))
            .unwrap();
        (key, credential)
    }

    fn present_and_verify<C: Ciphersuite>() {
        let suite = Suite::<C>::new();
        let mut rng = ChaCha20Rng::seed_from_u64(20);
        let (key, credential) = issue(&suite, &mut rng);
        let mut state = State::new(credential, PRESENTATION_CONTEXT, 4).unwrap();

        let mut nonces = BTreeSet::new();
        let mut tags = Vec::new();
        for _ in 0..4 {
            let (nonce, presentation) = state.present(&suite, &mut rng).unwrap();
            assert!(nonce < 4);
            assert!(nonces.insert(nonce));
            key.verify_presentation(
                &suite,
                &presentation,
                REQUEST_CONTEXT,
                PRESENTATION_CONTEXT,
                nonce,
                4,
            )
            .unwrap();
            tags.push(presentation.tag());
        }
        assert_eq!(state.remaining(), 0);

        // Distinct nonces yield distinct tags.
        let distinct: BTreeSet<_> = tags.iter().map(|t| t.to_bytes().as_ref().to_vec()).collect();
        assert_eq!(distinct.len(), tags.len());

        let Err(PresentationError::LimitExceeded) = state.present(&suite, &mut rng) else {
            panic!("presented beyond the limit");
        };
        assert_eq!(state.remaining(), 0);
    }

    #[test]
    fn p256_present_and_verify() {
        present_and_verify::<P256>();
    }

    #[test]
    fn ristretto255_present_and_verify() {
        present_and_verify::<Ristretto255>();
    }

    #[test]
    fn presentations_are_rerandomized() {
        let suite = Suite::<Ristretto255>::new();
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let (_, credential) = issue(&suite, &mut rng);
        let u = credential.u;
        let mut state = State::new(credential, PRESENTATION_CONTEXT, 10).unwrap();

        let (_, first) = state.present(&suite, &mut rng).unwrap();
        let (_, second) = state.present(&suite, &mut rng).unwrap();
        assert_ne!(first.u, second.u);
        assert_ne!(first.u, u);
        assert_ne!(first.m1_commit, second.m1_commit);
    }

    fn mismatches_fail<C: Ciphersuite>() {
        let suite = Suite::<C>::new();
        let mut rng = ChaCha20Rng::seed_from_u64(22);
        let (key, credential) = issue(&suite, &mut rng);
        let mut state = State::new(credential, PRESENTATION_CONTEXT, 10).unwrap();
        let (nonce, presentation) = state.present(&suite, &mut rng).unwrap();

        let verify = |key: &PrivateKey<C>,
                      presentation: &Presentation<C>,
                      request_context: &[u8],
                      presentation_context: &[u8],
                      nonce: u16| {
            key.verify_presentation(
                &suite,
                presentation,
                request_context,
                presentation_context,
                nonce,
                10,
            )
        };

        verify(&key, &presentation, REQUEST_CONTEXT, PRESENTATION_CONTEXT, nonce).unwrap();

        let Err(PresentationError::VerificationFailed) =
            verify(&key, &presentation, OTHER_REQUEST_CONTEXT, PRESENTATION_CONTEXT, nonce)
        else {
            panic!("wrong request context accepted");
        };
        let Err(PresentationError::VerificationFailed) =
            verify(&key, &presentation, REQUEST_CONTEXT, OTHER_PRESENTATION_CONTEXT, nonce)
        else {
            panic!("wrong presentation context accepted");
        };
        let Err(PresentationError::VerificationFailed) = verify(
            &key,
            &presentation,
            REQUEST_CONTEXT,
            PRESENTATION_CONTEXT,
            (nonce + 1) % 10,
        ) else {
            panic!("wrong nonce accepted");
        };

        let other_key = PrivateKey::<C>::generate(&mut rng);
        let Err(PresentationError::VerificationFailed) =
            verify(&other_key, &presentation, REQUEST_CONTEXT, PRESENTATION_CONTEXT, nonce)
        else {
            panic!("presentation accepted under another key");
        };

        let mut tampered = presentation.clone();
        tampered.tag = tampered.tag + suite.g();
        let Err(PresentationError::VerificationFailed) =
            verify(&key, &tampered, REQUEST_CONTEXT, PRESENTATION_CONTEXT, nonce)
        else {
            panic!("tampered tag accepted");
        };

        let mut tampered = presentation.clone();
        tampered.u_prime_commit = tampered.u_prime_commit + suite.h();
        let Err(PresentationError::VerificationFailed) =
            verify(&key, &tampered, REQUEST_CONTEXT, PRESENTATION_CONTEXT, nonce)
        else {
            panic!("tampered commitment accepted");
        };
    }

    #[test]
    fn p256_mismatches_fail() {
        mismatches_fail::<P256>();
    }

    #[test]
    fn ristretto255_mismatches_fail() {
        mismatches_fail::<Ristretto255>();
    }

    fn presentation_proof_bytes_are_bound<C: Ciphersuite>() {
        let suite = Suite::<C>::new();
        let mut rng = ChaCha20Rng::seed_from_u64(27);
        let (key, credential) = issue(&suite, &mut rng);
        let mut state = State::new(credential, PRESENTATION_CONTEXT, 4).unwrap();
        let (nonce, presentation) = state.present(&suite, &mut rng).unwrap();
        let bytes = presentation.to_bytes();

        // Flip a bit in every byte of the trailing proof. Either decoding fails or verifying does.
        let proof_start = bytes.len() - 5 * scalar_size::<C>();
        for i in proof_start..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            let Ok(presentation) = Presentation::<C>::from_bytes(&tampered) else {
                continue;
            };
            let Err(PresentationError::VerificationFailed) = key.verify_presentation(
                &suite,
                &presentation,
                REQUEST_CONTEXT,
                PRESENTATION_CONTEXT,
                nonce,
                4,
            ) else {
                panic!("presentation with a modified proof byte {i} was accepted");
            };
        }
    }

    #[test]
    fn p256_presentation_proof_bytes_are_bound() {
        presentation_proof_bytes_are_bound::<P256>();
    }

    #[test]
    fn ristretto255_presentation_proof_bytes_are_bound() {
        presentation_proof_bytes_are_bound::<Ristretto255>();
    }

    #[test]
    fn out_of_range_nonce_is_rejected() {
        let suite = Suite::<P256>::new();
        let mut rng = ChaCha20Rng::seed_from_u64(23);
        let (key, credential) = issue(&suite, &mut rng);
        let mut state = State::new(credential, PRESENTATION_CONTEXT, 3).unwrap();
        let (_, presentation) = state.present(&suite, &mut rng).unwrap();

        for nonce in [3, 4, u16::MAX] {
            let Err(PresentationError::InvalidNonce) = key.verify_presentation(
                &suite,
                &presentation,
                REQUEST_CONTEXT,
                PRESENTATION_CONTEXT,
                nonce,
                3,
            ) else {
                panic!("nonce {nonce} accepted with limit 3");
            };
        }
    }

    #[test]
    fn state_parameters_are_validated() {
        let suite = Suite::<Ristretto255>::new();
        let mut rng = ChaCha20Rng::seed_from_u64(24);

        for limit in [0, u16::MAX] {
            let (_, credential) = issue(&suite, &mut rng);
            let Err(PresentationError::LimitValid) =
                State::new(credential, PRESENTATION_CONTEXT, limit)
            else {
                panic!("limit {limit} accepted");
            };
        }

        let (_, credential) = issue(&suite, &mut rng);
        let Err(PresentationError::ContextLength) =
            State::new(credential, vec![0u8; usize::from(u16::MAX)], 1)
        else {
            panic!("oversized presentation context accepted");
        };

        let (_, credential) = issue(&suite, &mut rng);
        State::new(credential, vec![0u8; usize::from(u16::MAX) - 1], 1).unwrap();
    }

    fn encodings<C: Ciphersuite>() {
        let suite = Suite::<C>::new();
        let mut rng = ChaCha20Rng::seed_from_u64(25);
        let (key, credential) = issue(&suite, &mut rng);
        let mut state = State::new(credential, PRESENTATION_CONTEXT, 5).unwrap();
        let (nonce, presentation) = state.present(&suite, &mut rng).unwrap();
        let (ns, ne) = (scalar_size::<C>(), element_size::<C>());

        let bytes = presentation.to_bytes();
        assert_eq!(bytes.len(), 4 * ne + 5 * ns);
        let decoded = Presentation::<C>::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, presentation);
        key.verify_presentation(
            &suite,
            &decoded,
            REQUEST_CONTEXT,
            PRESENTATION_CONTEXT,
            nonce,
            5,
        )
        .unwrap();
        let Err(DecodeError::Truncated) = Presentation::<C>::from_bytes(&bytes[..bytes.len() - 1])
        else {
            panic!("truncated presentation decoded");
        };

        // State survives a round trip with its spent nonce.
        let bytes = state.to_bytes();
        assert_eq!(
            bytes.len(),
            ns + 3 * ne + 8 + 2 + 1 + 2 + PRESENTATION_CONTEXT.len()
        );
        let mut restored = State::<C>::from_bytes(&bytes).unwrap();
        assert_eq!(restored.to_bytes(), bytes);
        assert_eq!(restored.remaining(), 4);
        assert_eq!(restored.presentation_context(), PRESENTATION_CONTEXT);
        let (next, presentation) = restored.present(&suite, &mut rng).unwrap();
        assert_ne!(next, nonce);
        key.verify_presentation(
            &suite,
            &presentation,
            REQUEST_CONTEXT,
            PRESENTATION_CONTEXT,
            next,
            5,
        )
        .unwrap();
    }

    #[test]
    fn p256_encodings() {
        encodings::<P256>();
    }

    #[test]
    fn ristretto255_encodings() {
        encodings::<Ristretto255>();
    }

    #[test]
    fn state_context_length_is_checked_on_decode() {
        let suite = Suite::<P256>::new();
        let mut rng = ChaCha20Rng::seed_from_u64(26);
        let (_, credential) = issue(&suite, &mut rng);
        let state = State::new(credential, b"", 1).unwrap();

        let mut bytes = state.to_bytes();
        let len = bytes.len();
        bytes[len - 2..].copy_from_slice(&u16::MAX.to_be_bytes());
        let Err(DecodeError::ContextLength) = State::<P256>::from_bytes(&bytes) else {
            panic!("context length u16::MAX decoded");
        };
    }
}
