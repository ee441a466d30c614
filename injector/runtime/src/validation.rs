use regex::Regex;
use thiserror::Error;

const DNS_LIKE_REGEX: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";

#[derive(Debug, Error, PartialEq, Clone)]
pub enum TrustDomainError {
    #[error("control plane trust domain is missing")]
    Missing,

    #[error(
        "control plane trust domain must be a DNS-like name matching the regex: {}",
        DNS_LIKE_REGEX
    )]
    Invalid,
}

/// Validates that a trust domain is a lowercase, DNS-like name such as
/// `cluster.local`.
pub(crate) fn validate_trust_domain(td: &str) -> Result<(), TrustDomainError> {
    if td.is_empty() {
        return Err(TrustDomainError::Missing);
    }

    let regex = Regex::new(DNS_LIKE_REGEX).expect("should compile");
    if !regex.is_match(td) {
        return Err(TrustDomainError::Invalid);
    }
    Ok(())
}
