pub mod verifier;

pub use verifier::AddressVerifier;
