use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidData(String),
    InvalidConfig(String),
    InvalidShape(String),
    /// A module was used in a way its contract forbids (e.g. backward before forward).
    Contract(String),
    /// A call that must fail completed successfully.
    UnexpectedSuccess(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    #[inline]
    pub fn is_contract(&self) -> bool {
        matches!(self, Error::Contract(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Error::InvalidShape(msg) => write!(f, "invalid shape: {msg}"),
            Error::Contract(msg) => write!(f, "contract violated: {msg}"),
            Error::UnexpectedSuccess(msg) => {
                write!(f, "uncorrect behavior, an error should have been thrown: {msg}")
            }
        }
    }
}

impl std::error::Error for Error {}
