use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Parameter or result value does not match its declared type.
    Validation,
    /// Unknown endpoint name.
    Lookup,
    /// Malformed batch envelope or subscribe message.
    Protocol,
    /// Raised by a resolver or context handler, optionally with a client-visible code.
    Application(Option<i64>),
    /// Body or JSON decoding failed.
    Transport,
    /// Misuse of the registration API.
    InvalidArgument,
    Io,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
}

/// Client-visible error shape: `{code, message}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResponseError {
    pub code: Option<i64>,
    pub message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
        }
    }

    /// An application error without a code.
    #[must_use]
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application(None), msg)
    }

    /// An application error carrying a numeric code.
    #[must_use]
    pub fn with_code(code: i64, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application(Some(code)), msg)
    }

    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self.kind {
            ErrorKind::Application(code) => code,
            _ => None,
        }
    }

    #[must_use]
    pub fn to_response(&self) -> ResponseError {
        ResponseError {
            code: self.code(),
            message: self.msg.clone(),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<&Error> for ResponseError {
    fn from(value: &Error) -> Self {
        value.to_response()
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::new(ErrorKind::Transport, value.to_string())
    }
}

impl From<multer::Error> for Error {
    fn from(value: multer::Error) -> Self {
        Self::new(ErrorKind::Transport, value.to_string())
    }
}

impl From<hyper::Error> for Error {
    fn from(value: hyper::Error) -> Self {
        Self::new(ErrorKind::Transport, value.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, value.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let error: Error = ErrorKind::Protocol.into();
        assert_eq!(error.to_string(), "Protocol");

        let error = Error::new(ErrorKind::Lookup, "Request endpoint not found.");
        assert_eq!(error.to_string(), "Lookup: Request endpoint not found.");

        let error: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(error.kind, ErrorKind::Transport);
    }

    #[test]
    fn test_response_error_code() {
        let error = Error::with_code(403, "forbidden");
        assert_eq!(
            error.to_response(),
            ResponseError {
                code: Some(403),
                message: "forbidden".into()
            }
        );

        // only explicitly coded errors expose a code
        let error = Error::new(ErrorKind::Validation, "Invalid params value.");
        assert_eq!(error.to_response().code, None);
        assert_eq!(Error::msg("boom").to_response().code, None);

        let json = serde_json::to_value(Error::with_code(7, "x").to_response()).unwrap();
        assert_eq!(json, serde_json::json!({"code": 7, "message": "x"}));
    }
}
