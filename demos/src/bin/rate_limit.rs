use std::collections::HashSet;

use anyhow::{bail, Result};
use arc_credentials::{
    Ciphersuite, CredentialRequest, Decode, Encode, PresentationError, PrivateKey, Ristretto255,
    State, Suite, P256,
};
use tracing_subscriber::EnvFilter;

const REQUEST_CONTEXT: &[u8] = b"Credential for Alice";
const PRESENTATION_CONTEXT: &[u8] = b"Presentation for example.com";
const PRESENTATION_LIMIT: u16 = 3;

/// Issuer side of the flow. The issuer is also the verifier, and keeps the log of spent
/// `(presentation context, nonce)` pairs, which the credential itself cannot enforce.
struct Issuer<C: Ciphersuite> {
    key: PrivateKey<C>,
    seen: HashSet<(Vec<u8>, u16)>,
}

impl<C: Ciphersuite> Issuer<C> {
    fn new() -> Self {
        Self {
            key: PrivateKey::generate(&mut rand::thread_rng()),
            seen: HashSet::new(),
        }
    }

    fn accept(
        &mut self,
        suite: &Suite<C>,
        presentation: &[u8],
        presentation_context: &[u8],
        nonce: u16,
    ) -> Result<()> {
        let presentation = Decode::from_bytes(presentation)?;
        self.key.verify_presentation(
            suite,
            &presentation,
            REQUEST_CONTEXT,
            presentation_context,
            nonce,
            PRESENTATION_LIMIT,
        )?;
        if !self.seen.insert((presentation_context.to_vec(), nonce)) {
            bail!("nonce {nonce} replayed for this presentation context");
        }
        Ok(())
    }
}

fn run<C: Ciphersuite>() -> Result<()> {
    let suite = Suite::<C>::new();
    let mut rng = rand::thread_rng();
    let mut issuer = Issuer::<C>::new();
    let public_key = issuer.key.public_key(&suite);
    tracing::info!(suite = suite.name(), "issuer key generated");

    // Client and issuer exchange serialized messages.
    let (finalizer, request) = CredentialRequest::new(&suite, REQUEST_CONTEXT, &mut rng);
    let request_bytes = request.to_bytes();
    let response = issuer
        .key
        .respond(&suite, &Decode::from_bytes(&request_bytes)?, &mut rng)?;
    let credential = finalizer.finalize(
        &suite,
        &request,
        &Decode::from_bytes(&response.to_bytes())?,
        &public_key,
    )?;
    tracing::info!(
        request_len = request_bytes.len(),
        "credential issued for {}",
        String::from_utf8_lossy(REQUEST_CONTEXT)
    );

    // The client persists its state between presentations.
    let mut state_bytes =
        State::new(credential, PRESENTATION_CONTEXT, PRESENTATION_LIMIT)?.to_bytes();
    loop {
        let mut state = State::<C>::from_bytes(&state_bytes)?;
        let result = state.present(&suite, &mut rng);
        state_bytes = state.to_bytes();
        match result {
            Ok((nonce, presentation)) => {
                issuer.accept(&suite, &presentation.to_bytes(), PRESENTATION_CONTEXT, nonce)?;
                tracing::info!(nonce, remaining = state.remaining(), "presentation accepted");
            }
            Err(PresentationError::LimitExceeded) => {
                tracing::info!("presentation limit of {PRESENTATION_LIMIT} reached");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    run::<P256>()?;
    run::<Ristretto255>()?;
    println!("Issued and presented credentials for both suites");
    Ok(())
}
