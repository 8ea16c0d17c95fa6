//! Worker identity: the access token a worker polls with.

use std::fmt;

/// One origin access token, bound to a single worker for its lifetime.
///
/// `Debug` and `Display` only ever show the token suffix.
#[derive(Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    token: String,
    suffix: String,
}

impl WorkerIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let suffix = token_suffix(&token);
        Self { token, suffix }
    }

    /// The raw token. Only origin clients should call this.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Last four characters of the token, or `unknown` for short tokens.
    pub fn token_suffix(&self) -> &str {
        &self.suffix
    }
}

fn token_suffix(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 4 {
        return "unknown".to_string();
    }
    chars[chars.len() - 4..].iter().collect()
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***{}", self.suffix)
    }
}

impl fmt::Debug for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerIdentity")
            .field("token", &format_args!("***{}", self.suffix))
            .finish()
    }
}
