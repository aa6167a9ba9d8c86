use secrecy::SecretString;

use crate::config::Credentials;
use crate::error::ValidationError;
use crate::model::InboundRequest;

/// A request that may be bridged: non-empty prompt plus the credential to use.
#[derive(Debug)]
pub struct ValidatedRequest<'a> {
    pub request: InboundRequest,
    pub api_key: &'a SecretString,
}

/// Check an inbound body. Order is fixed: JSON shape, then prompt, then
/// credential, so a bad body is reported even when no key is configured.
pub fn validate<'a>(
    body: &[u8],
    credentials: &'a Credentials,
) -> Result<ValidatedRequest<'a>, ValidationError> {
    let request: InboundRequest =
        serde_json::from_slice(body).map_err(|_| ValidationError::BodyNotJson)?;
    check(request, credentials)
}

/// Prompt and credential checks for an already-decoded request.
pub fn check(
    request: InboundRequest,
    credentials: &Credentials,
) -> Result<ValidatedRequest<'_>, ValidationError> {
    if request.prompt.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }
    let api_key = credentials
        .api_key()
        .ok_or(ValidationError::MissingApiKey)?;
    Ok(ValidatedRequest { request, api_key })
}
