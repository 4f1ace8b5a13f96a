use std::{error, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorType {
    #[error("InvalidType")]
    InvalidType,
    #[error("UnsupportedValue")]
    UnsupportedValue,
    #[error("FormatMismatch")]
    FormatMismatch,
    #[error("PermissionDenied")]
    PermissionDenied,
    #[error("HandlerAlreadyRegistered")]
    HandlerAlreadyRegistered,
    #[error("AlreadyOwned")]
    AlreadyOwned,
    #[error("UnknownCharacteristic")]
    UnknownCharacteristic,
    #[error("InvalidState")]
    InvalidState,
    #[error("Storage")]
    Storage,
    #[error("Server")]
    Server,
    #[error("ChannelError")]
    ChannelError,
}

impl ErrorType {
    /// Errors raised while the accessory tree is being assembled.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ErrorType::InvalidType
                | ErrorType::PermissionDenied
                | ErrorType::HandlerAlreadyRegistered
                | ErrorType::AlreadyOwned
        )
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    name: String,
    description: String,
    error_type: ErrorType,
}

impl Error {
    pub fn new<T: Into<String>>(name: T, description: T, error_type: ErrorType) -> Self {
        Error {
            name: name.into(),
            description: description.into(),
            error_type,
        }
    }

    pub fn from_type(error_type: ErrorType) -> Self {
        Error {
            name: error_type.to_string(),
            description: error_type.to_string(),
            error_type,
        }
    }

    pub fn from_string(error: String, error_type: ErrorType) -> Self {
        Error {
            name: error_type.to_string(),
            description: error,
            error_type,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HaaEmulator {} error: {}", self.name, self.description)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.error_type)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::from_string(error.to_string(), ErrorType::Storage)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::from_string(error.to_string(), ErrorType::Server)
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::from_string(error.to_string(), ErrorType::InvalidType)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_name_and_description() {
        let err = Error::from_string("no such key".to_string(), ErrorType::Storage);
        assert_eq!(err.to_string(), "HaaEmulator Storage error: no such key");
        assert_eq!(err.error_type(), ErrorType::Storage);
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(ErrorType::AlreadyOwned.is_configuration());
        assert!(ErrorType::PermissionDenied.is_configuration());
        assert!(!ErrorType::Storage.is_configuration());
        assert!(!ErrorType::FormatMismatch.is_configuration());
    }
}
