//! Issuance of an algebraic MAC over a blinded client attribute.
//!
//! The exchange is strictly ordered: the client calls [CredentialRequest::new], the issuer
//! answers with [PrivateKey::respond], and the client unblinds the result with
//! [Finalizer::finalize]. Each message carries a proof, and each receiving side fails closed when
//! that proof does not verify.

use alloc::vec::Vec;
use core::fmt;

use group::Group;
use rand_core::CryptoRngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    codec::{put_element, put_scalar, Decode, DecodeError, Encode, Reader},
    suite::{random_scalar, Ciphersuite, Suite},
    zkp::{ConstraintSystem, Proof, ProofError, Prover, ScalarVar, Verifier},
};

const REQUEST_LABEL: &str = "CredentialRequest";
const RESPONSE_LABEL: &str = "CredentialResponse";
pub(crate) const REQUEST_CONTEXT_INFO: &[u8] = b"requestContext";

const REQUEST_PROOF_SCALARS: usize = 4;
const RESPONSE_PROOF_SCALARS: usize = 7;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IssuanceError {
    #[error("credential request proof verification failed")]
    VerifyReqProof,
    #[error("credential response proof verification failed")]
    VerifyResProof,
    #[error("constraint system error: {0}")]
    Constraint(ProofError),
}

impl From<ProofError> for IssuanceError {
    fn from(value: ProofError) -> Self {
        IssuanceError::Constraint(value)
    }
}

/// Issuer secret key.
///
/// `x1` and `x2` key the MAC over the two attributes, `x0` is the constant term, and `x0_blinding`
/// hides `x0` in the public commitment `X0`.
#[derive(Clone)]
pub struct PrivateKey<C: Ciphersuite> {
    pub(crate) x0: C::Scalar,
    pub(crate) x1: C::Scalar,
    pub(crate) x2: C::Scalar,
    x0_blinding: C::Scalar,
}

/// Commitments to the issuer key: `X0 = x0*G + x0_blinding*H`, `X1 = x1*H`, `X2 = x2*H`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey<C: Ciphersuite> {
    x0: C::Element,
    x1: C::Element,
    x2: C::Element,
}

/// Client secrets kept between [CredentialRequest::new] and [Finalizer::finalize].
#[derive(Clone)]
pub struct Finalizer<C: Ciphersuite> {
    m1: C::Scalar,
    m2: C::Scalar,
    r1: C::Scalar,
    r2: C::Scalar,
}

/// Client to issuer: encryptions of the two attributes and a proof of their well-formedness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRequest<C: Ciphersuite> {
    m1_enc: C::Element,
    m2_enc: C::Element,
    proof: Proof<C>,
}

/// Issuer to client: the blinded MAC and the auxiliary elements used to unblind it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialResponse<C: Ciphersuite> {
    u: C::Element,
    enc_u_prime: C::Element,
    x0_aux: C::Element,
    x1_aux: C::Element,
    x2_aux: C::Element,
    h_aux: C::Element,
    proof: Proof<C>,
}

/// A MAC `(U, U')` with `U' = (x0 + x1*m1 + x2*m2) * U`, held by the client together with its
/// hidden attribute `m1`.
#[derive(Clone)]
pub struct Credential<C: Ciphersuite> {
    pub(crate) m1: C::Scalar,
    pub(crate) u: C::Element,
    pub(crate) u_prime: C::Element,
    pub(crate) x1: C::Element,
}

impl<C: Ciphersuite> fmt::Debug for PrivateKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey").finish_non_exhaustive()
    }
}

impl<C: Ciphersuite> fmt::Debug for Credential<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("u", &self.u)
            .field("u_prime", &self.u_prime)
            .field("x1", &self.x1)
            .finish_non_exhaustive()
    }
}

impl<C: Ciphersuite> Drop for PrivateKey<C> {
    fn drop(&mut self) {
        self.x0.zeroize();
        self.x1.zeroize();
        self.x2.zeroize();
        self.x0_blinding.zeroize();
    }
}

impl<C: Ciphersuite> Drop for Finalizer<C> {
    fn drop(&mut self) {
        self.m1.zeroize();
        self.m2.zeroize();
        self.r1.zeroize();
        self.r2.zeroize();
    }
}

impl<C: Ciphersuite> Drop for Credential<C> {
    fn drop(&mut self) {
        self.m1.zeroize();
    }
}

/// Shared statement for the request proof:
///
/// - `m1Enc = m1*G + r1*H`
/// - `m2Enc = m2*G + r2*H`
fn constrain_request<C, CS>(
    cs: &mut CS,
    suite: &Suite<C>,
    [m1, m2, r1, r2]: [ScalarVar; REQUEST_PROOF_SCALARS],
    m1_enc: C::Element,
    m2_enc: C::Element,
) -> Result<(), ProofError>
where
    C: Ciphersuite,
    CS: ConstraintSystem<C>,
{
    let gen_g = cs.append_element("genG", suite.g());
    let gen_h = cs.append_element("genH", suite.h());
    let m1_enc = cs.append_element("m1Enc", m1_enc);
    let m2_enc = cs.append_element("m2Enc", m2_enc);

    cs.constrain(m1_enc, [(m1, gen_g), (r1, gen_h)])?;
    cs.constrain(m2_enc, [(m2, gen_g), (r2, gen_h)])
}

/// Public elements of the response proof.
struct ResponseStatement<'a, C: Ciphersuite> {
    public_key: &'a PublicKey<C>,
    m1_enc: C::Element,
    m2_enc: C::Element,
    u: C::Element,
    enc_u_prime: C::Element,
    x0_aux: C::Element,
    x1_aux: C::Element,
    x2_aux: C::Element,
    h_aux: C::Element,
}

impl<C: Ciphersuite> ResponseStatement<'_, C> {
    /// Constrains the key commitments, the auxiliary elements, and the blinded MAC evaluation,
    /// with `t1 = b*x1` and `t2 = b*x2`.
    fn constrain<CS: ConstraintSystem<C>>(
        &self,
        cs: &mut CS,
        suite: &Suite<C>,
        [x0, x1, x2, x0_blinding, b, t1, t2]: [ScalarVar; RESPONSE_PROOF_SCALARS],
    ) -> Result<(), ProofError> {
        let gen_g = cs.append_element("genG", suite.g());
        let gen_h = cs.append_element("genH", suite.h());
        let m1_enc = cs.append_element("m1Enc", self.m1_enc);
        let m2_enc = cs.append_element("m2Enc", self.m2_enc);
        let u = cs.append_element("U", self.u);
        let enc_u_prime = cs.append_element("encUPrime", self.enc_u_prime);
        let x0_elem = cs.append_element("X0", self.public_key.x0);
        let x1_elem = cs.append_element("X1", self.public_key.x1);
        let x2_elem = cs.append_element("X2", self.public_key.x2);
        let x0_aux = cs.append_element("X0Aux", self.x0_aux);
        let x1_aux = cs.append_element("X1Aux", self.x1_aux);
        let x2_aux = cs.append_element("X2Aux", self.x2_aux);
        let h_aux = cs.append_element("HAux", self.h_aux);

        // Public key is well formed.
        cs.constrain(x0_elem, [(x0, gen_g), (x0_blinding, gen_h)])?;
        cs.constrain(x1_elem, [(x1, gen_h)])?;
        cs.constrain(x2_elem, [(x2, gen_h)])?;

        // X0Aux = b * x0_blinding * H, through HAux = b * H.
        cs.constrain(h_aux, [(b, gen_h)])?;
        cs.constrain(x0_aux, [(x0_blinding, h_aux)])?;

        // X1Aux = b * x1 * H, and likewise X2Aux. Each is constrained twice to bind t_i to b*x_i.
        cs.constrain(x1_aux, [(t1, gen_h)])?;
        cs.constrain(x1_aux, [(b, x1_elem)])?;
        cs.constrain(x2_aux, [(b, x2_elem)])?;
        cs.constrain(x2_aux, [(t2, gen_h)])?;

        // U = b * G and encUPrime = b * (X0 + x1*m1Enc + x2*m2Enc).
        cs.constrain(u, [(b, gen_g)])?;
        cs.constrain(enc_u_prime, [(b, x0_elem), (t1, m1_enc), (t2, m2_enc)])
    }
}

impl<C: Ciphersuite> PrivateKey<C> {
    /// Generate a fresh issuer key with every component sampled uniformly and non-zero.
    pub fn generate<R>(rng: &mut R) -> Self
    where
        R: CryptoRngCore + ?Sized,
    {
        Self {
            x0: random_scalar::<C, _>(rng),
            x1: random_scalar::<C, _>(rng),
            x2: random_scalar::<C, _>(rng),
            x0_blinding: random_scalar::<C, _>(rng),
        }
    }

    pub fn public_key(&self, suite: &Suite<C>) -> PublicKey<C> {
        PublicKey {
            x0: suite.g() * self.x0 + suite.h() * self.x0_blinding,
            x1: suite.h() * self.x1,
            x2: suite.h() * self.x2,
        }
    }

    /// Issue a blinded MAC over the attributes encrypted in the request.
    ///
    /// The request proof is checked first. If it fails, [IssuanceError::VerifyReqProof] is
    /// returned and no key material is used.
    pub fn respond<R>(
        &self,
        suite: &Suite<C>,
        request: &CredentialRequest<C>,
        rng: &mut R,
    ) -> Result<CredentialResponse<C>, IssuanceError>
    where
        R: CryptoRngCore + ?Sized,
    {
        if let Err(err) = request.verify(suite) {
            tracing::debug!(suite = C::NAME, "rejecting credential request: {err}");
            return Err(err);
        }

        let public_key = self.public_key(suite);
        let b = Zeroizing::new(random_scalar::<C, _>(rng));
        let t1 = Zeroizing::new(*b * self.x1);
        let t2 = Zeroizing::new(*b * self.x2);
        let b_x0_blinding = Zeroizing::new(*b * self.x0_blinding);

        let statement = ResponseStatement {
            public_key: &public_key,
            m1_enc: request.m1_enc,
            m2_enc: request.m2_enc,
            u: suite.g() * *b,
            enc_u_prime: (public_key.x0 + request.m1_enc * self.x1 + request.m2_enc * self.x2)
                * *b,
            x0_aux: suite.h() * *b_x0_blinding,
            x1_aux: public_key.x1 * *b,
            x2_aux: public_key.x2 * *b,
            h_aux: suite.h() * *b,
        };

        let mut prover = Prover::with_capacity(suite, RESPONSE_LABEL, RESPONSE_PROOF_SCALARS);
        let vars = [
            prover.append_scalar("x0", self.x0),
            prover.append_scalar("x1", self.x1),
            prover.append_scalar("x2", self.x2),
            prover.append_scalar("x0Blinding", self.x0_blinding),
            prover.append_scalar("b", *b),
            prover.append_scalar("t1", *t1),
            prover.append_scalar("t2", *t2),
        ];
        statement.constrain(&mut prover, suite, vars)?;
        let proof = prover.prove(rng);

        tracing::trace!(suite = C::NAME, "issued credential response");
        Ok(CredentialResponse {
            u: statement.u,
            enc_u_prime: statement.enc_u_prime,
            x0_aux: statement.x0_aux,
            x1_aux: statement.x1_aux,
            x2_aux: statement.x2_aux,
            h_aux: statement.h_aux,
            proof,
        })
    }
}

impl<C: Ciphersuite> PublicKey<C> {
    pub fn x0(&self) -> C::Element {
        self.x0
    }

    pub fn x1(&self) -> C::Element {
        self.x1
    }

    pub fn x2(&self) -> C::Element {
        self.x2
    }
}

impl<C: Ciphersuite> CredentialRequest<C> {
    /// Start issuance of a credential bound to `request_context`, e.g. an account identifier.
    ///
    /// Returns the secrets needed to finalize the credential, and the request to send to the
    /// issuer.
    pub fn new<R>(
        suite: &Suite<C>,
        request_context: &[u8],
        rng: &mut R,
    ) -> (Finalizer<C>, Self)
    where
        R: CryptoRngCore + ?Sized,
    {
        let finalizer = Finalizer {
            m1: random_scalar::<C, _>(rng),
            m2: suite.hash_to_scalar(request_context, REQUEST_CONTEXT_INFO),
            r1: random_scalar::<C, _>(rng),
            r2: random_scalar::<C, _>(rng),
        };
        let request = Self::with_secrets(suite, &finalizer, rng);
        (finalizer, request)
    }

    fn with_secrets<R>(
        suite: &Suite<C>,
        secrets: &Finalizer<C>,
        rng: &mut R,
    ) -> Self
    where
        R: CryptoRngCore + ?Sized,
    {
        let m1_enc = suite.g() * secrets.m1 + suite.h() * secrets.r1;
        let m2_enc = suite.g() * secrets.m2 + suite.h() * secrets.r2;

        let mut prover = Prover::with_capacity(suite, REQUEST_LABEL, REQUEST_PROOF_SCALARS);
        let vars = [
            prover.append_scalar("m1", secrets.m1),
            prover.append_scalar("m2", secrets.m2),
            prover.append_scalar("r1", secrets.r1),
            prover.append_scalar("r2", secrets.r2),
        ];
        // NOTE: Expect will never panic, every variable passed to the statement was allocated on
        // this prover just above.
        constrain_request(&mut prover, suite, vars, m1_enc, m2_enc)
            .expect("request statement only references allocated variables");

        Self {
            m1_enc,
            m2_enc,
            proof: prover.prove(rng),
        }
    }

    /// Check the request proof using only its public elements.
    pub fn verify(&self, suite: &Suite<C>) -> Result<(), IssuanceError> {
        let mut verifier = Verifier::new(suite, REQUEST_LABEL);
        let vars = [
            verifier.append_scalar("m1"),
            verifier.append_scalar("m2"),
            verifier.append_scalar("r1"),
            verifier.append_scalar("r2"),
        ];
        constrain_request(&mut verifier, suite, vars, self.m1_enc, self.m2_enc)?;
        verifier
            .verify(&self.proof)
            .map_err(|_| IssuanceError::VerifyReqProof)
    }
}

impl<C: Ciphersuite> Finalizer<C> {
    /// Verify the issuer's response and unblind it into a [Credential].
    ///
    /// `U' = encUPrime - X0Aux - r1*X1Aux - r2*X2Aux`, which removes both the issuer's blinding of
    /// `x0` and the client's encryption randomness.
    pub fn finalize(
        &self,
        suite: &Suite<C>,
        request: &CredentialRequest<C>,
        response: &CredentialResponse<C>,
        public_key: &PublicKey<C>,
    ) -> Result<Credential<C>, IssuanceError> {
        let statement = ResponseStatement {
            public_key,
            m1_enc: request.m1_enc,
            m2_enc: request.m2_enc,
            u: response.u,
            enc_u_prime: response.enc_u_prime,
            x0_aux: response.x0_aux,
            x1_aux: response.x1_aux,
            x2_aux: response.x2_aux,
            h_aux: response.h_aux,
        };

        let mut verifier = Verifier::new(suite, RESPONSE_LABEL);
        let vars = [
            verifier.append_scalar("x0"),
            verifier.append_scalar("x1"),
            verifier.append_scalar("x2"),
            verifier.append_scalar("x0Blinding"),
            verifier.append_scalar("b"),
            verifier.append_scalar("t1"),
            verifier.append_scalar("t2"),
        ];
        statement.constrain(&mut verifier, suite, vars)?;
        let verified = verifier.verify(&response.proof).is_ok();
        // NOTE: Unwrapping the Choice is ok here because U is non-private.
        if !verified || bool::from(response.u.is_identity()) {
            tracing::debug!(suite = C::NAME, "rejecting credential response");
            return Err(IssuanceError::VerifyResProof);
        }

        let u_prime = response.enc_u_prime
            - response.x0_aux
            - response.x1_aux * self.r1
            - response.x2_aux * self.r2;

        tracing::trace!(suite = C::NAME, "finalized credential");
        Ok(Credential {
            m1: self.m1,
            u: response.u,
            u_prime,
            x1: public_key.x1,
        })
    }
}

impl<C: Ciphersuite> Encode for PrivateKey<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_scalar::<C>(out, &self.x0);
        put_scalar::<C>(out, &self.x1);
        put_scalar::<C>(out, &self.x2);
        put_scalar::<C>(out, &self.x0_blinding);
    }
}

impl<C: Ciphersuite> Decode for PrivateKey<C> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            x0: reader.scalar::<C>()?,
            x1: reader.scalar::<C>()?,
            x2: reader.scalar::<C>()?,
            x0_blinding: reader.scalar::<C>()?,
        })
    }
}

impl<C: Ciphersuite> Encode for PublicKey<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_element::<C>(out, &self.x0);
        put_element::<C>(out, &self.x1);
        put_element::<C>(out, &self.x2);
    }
}

impl<C: Ciphersuite> Decode for PublicKey<C> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            x0: reader.element::<C>()?,
            x1: reader.element::<C>()?,
            x2: reader.element::<C>()?,
        })
    }
}

impl<C: Ciphersuite> Encode for Finalizer<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_scalar::<C>(out, &self.m1);
        put_scalar::<C>(out, &self.m2);
        put_scalar::<C>(out, &self.r1);
        put_scalar::<C>(out, &self.r2);
    }
}

impl<C: Ciphersuite> Decode for Finalizer<C> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            m1: reader.scalar::<C>()?,
            m2: reader.scalar::<C>()?,
            r1: reader.scalar::<C>()?,
            r2: reader.scalar::<C>()?,
        })
    }
}

impl<C: Ciphersuite> Encode for CredentialRequest<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_element::<C>(out, &self.m1_enc);
        put_element::<C>(out, &self.m2_enc);
        self.proof.encode(out);
    }
}

impl<C: Ciphersuite> Decode for CredentialRequest<C> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            m1_enc: reader.element::<C>()?,
            m2_enc: reader.element::<C>()?,
            proof: Proof::decode(reader, REQUEST_PROOF_SCALARS)?,
        })
    }
}

impl<C: Ciphersuite> Encode for CredentialResponse<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_element::<C>(out, &self.u);
        put_element::<C>(out, &self.enc_u_prime);
        put_element::<C>(out, &self.x0_aux);
        put_element::<C>(out, &self.x1_aux);
        put_element::<C>(out, &self.x2_aux);
        put_element::<C>(out, &self.h_aux);
        self.proof.encode(out);
    }
}

impl<C: Ciphersuite> Decode for CredentialResponse<C> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            u: reader.element::<C>()?,
            enc_u_prime: reader.element::<C>()?,
            x0_aux: reader.element::<C>()?,
            x1_aux: reader.element::<C>()?,
            x2_aux: reader.element::<C>()?,
            h_aux: reader.element::<C>()?,
            proof: Proof::decode(reader, RESPONSE_PROOF_SCALARS)?,
        })
    }
}

impl<C: Ciphersuite> Encode for Credential<C> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_scalar::<C>(out, &self.m1);
        put_element::<C>(out, &self.u);
        put_element::<C>(out, &self.u_prime);
        put_element::<C>(out, &self.x1);
    }
}

impl<C: Ciphersuite> Decode for Credential<C> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            m1: reader.scalar::<C>()?,
            u: reader.element::<C>()?,
            u_prime: reader.element::<C>()?,
            x1: reader.element::<C>()?,
        })
    }
}
