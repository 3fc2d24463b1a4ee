/// Input validation functions for all backend routes
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player account cannot be empty")]
    AccountEmpty,

    #[error("Player account too long (max 64 characters, got {0})")]
    AccountTooLong(usize),

    #[error("Player account contains whitespace or control characters")]
    AccountInvalidChars,

    #[error("Game cannot be empty")]
    GameEmpty,

    #[error("Game too long (max 32 characters, got {0})")]
    GameTooLong(usize),

    #[error("Game contains invalid characters (only alphanumeric, '-' and '_' allowed)")]
    GameInvalidChars,

    #[error("Join token pool cannot be empty")]
    TokenPoolEmpty,

    #[error("Join token pool too large (max {max} tokens, got {actual})")]
    TokenPoolTooLarge { max: usize, actual: usize },

    #[error("Join tokens cannot be empty")]
    TokenEmpty,

    #[error("Join token pool contains a duplicate token")]
    TokenDuplicate,

    #[error("Server address cannot be empty")]
    AddressEmpty,

    #[error("Server port cannot be 0")]
    PortZero,

    #[error("Unknown state: {0}")]
    UnknownState(String),
}

impl From<matchforge_engine::UnknownState> for ValidationError {
    fn from(err: matchforge_engine::UnknownState) -> Self {
        ValidationError::UnknownState(err.0)
    }
}

/// Validates a player account identifier
///
/// Rules:
/// - Cannot be empty
/// - Max 64 characters
/// - No whitespace or control characters
pub fn validate_account(account: &str) -> Result<(), ValidationError> {
    if account.is_empty() {
        return Err(ValidationError::AccountEmpty);
    }

    let len = account.chars().count();
    if len > 64 {
        return Err(ValidationError::AccountTooLong(len));
    }

    if account.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::AccountInvalidChars);
    }

    Ok(())
}

/// Validates a game mode name
pub fn validate_game(game: &str) -> Result<(), ValidationError> {
    if game.is_empty() {
        return Err(ValidationError::GameEmpty);
    }

    if game.len() > 32 {
        return Err(ValidationError::GameTooLong(game.len()));
    }

    if !game
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::GameInvalidChars);
    }

    Ok(())
}

/// Validates the join tokens of an advertised match
///
/// Rules:
/// - At least one token, max 256 per match
/// - No empty and no repeated tokens
pub fn validate_token_pool(tokens: &[String]) -> Result<(), ValidationError> {
    const MAX_TOKENS: usize = 256;

    if tokens.is_empty() {
        return Err(ValidationError::TokenPoolEmpty);
    }

    if tokens.len() > MAX_TOKENS {
        return Err(ValidationError::TokenPoolTooLarge {
            max: MAX_TOKENS,
            actual: tokens.len(),
        });
    }

    let mut seen = std::collections::HashSet::with_capacity(tokens.len());
    for token in tokens {
        if token.is_empty() {
            return Err(ValidationError::TokenEmpty);
        }
        if !seen.insert(token.as_str()) {
            return Err(ValidationError::TokenDuplicate);
        }
    }

    Ok(())
}

/// Validates the address a game server registers with
pub fn validate_address(ip: &str, port: u16) -> Result<(), ValidationError> {
    if ip.trim().is_empty() {
        return Err(ValidationError::AddressEmpty);
    }

    if port == 0 {
        return Err(ValidationError::PortZero);
    }

    Ok(())
}
