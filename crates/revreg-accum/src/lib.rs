pub mod sha256;

pub use sha256::{accumulator_digest, verify_credential, Sha256Accumulator};
