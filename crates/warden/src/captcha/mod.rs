//! CAPTCHA challenge issuance, storage, and verification.
//!
//! The store binds each challenge id to the issuing caller's session; the
//! generator mints ids and digits and renders them; the verifier consumes a
//! challenge on its single allowed attempt.

mod generator;
mod store;
mod verifier;

pub use generator::{CaptchaGenerator, generate_challenge_id};
pub use store::{ChallengeStore, digits_key};
pub use verifier::verify_answer;
