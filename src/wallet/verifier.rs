use uuid::Uuid;

use crate::error::LinkError;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const MAX_TX_REF_LEN: usize = 128;

/// Shape checks for identifiers coming in from callers.
///
/// These only reject malformed input; whether an address or transaction
/// actually exists is for the ledger probe to decide.
pub struct AddressVerifier;

impl AddressVerifier {
    /// Basic Solana address validation (base58, 32-44 chars)
    pub fn is_solana_address(address: &str) -> bool {
        (32..=44).contains(&address.len()) && address.chars().all(|c| BASE58_ALPHABET.contains(c))
    }

    pub fn validate_recipient(address: &str) -> Result<(), LinkError> {
        if !Self::is_solana_address(address) {
            return Err(LinkError::InvalidRecipient(address.to_string()));
        }
        Ok(())
    }

    pub fn validate_address(address: &str) -> Result<(), LinkError> {
        if !Self::is_solana_address(address) {
            return Err(LinkError::InvalidAddress(address.to_string()));
        }
        Ok(())
    }

    pub fn parse_link_id(raw: &str) -> Result<Uuid, LinkError> {
        Uuid::parse_str(raw.trim()).map_err(|_| LinkError::InvalidLinkId(raw.to_string()))
    }

    /// Transaction references are opaque, but must be a single printable token
    pub fn validate_tx_ref(tx_ref: &str) -> Result<(), LinkError> {
        if tx_ref.is_empty() || tx_ref.len() > MAX_TX_REF_LEN {
            return Err(LinkError::InvalidTxRef(format!(
                "length must be between 1 and {}",
                MAX_TX_REF_LEN
            )));
        }

        if !tx_ref.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LinkError::InvalidTxRef(tx_ref.to_string()));
        }

        Ok(())
    }
}
