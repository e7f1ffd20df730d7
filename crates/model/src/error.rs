use std::fmt::{self, Display};

/// The kind of error that occurred while talking to a model backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The content is moderated.
    Moderated,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The credentials were rejected.
    Unauthorized,
    /// The backend could not be reached at all.
    Unreachable,
    /// The backend answered with something that cannot be interpreted.
    MalformedResponse,
    /// Any other errors.
    Other,
}

impl ErrorKind {
    /// Infers the kind from an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::Unauthorized,
            429 => ErrorKind::RateLimitExceeded,
            502..=504 => ErrorKind::Unreachable,
            _ => ErrorKind::Other,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Moderated => "content moderated",
            ErrorKind::RateLimitExceeded => "rate limit exceeded",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Unreachable => "backend unreachable",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::Other => "backend error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimitExceeded);
        assert_eq!(ErrorKind::from_status(401), ErrorKind::Unauthorized);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Unreachable);
        assert_eq!(ErrorKind::from_status(500), ErrorKind::Other);
    }
}
