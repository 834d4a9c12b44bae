use crate::ops::OperationHandle;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "No locator can resolve the key '{}'.", _0)]
    InvalidKey(String),
    #[fail(display = "{} is invalid.", _0)]
    OperationHandleInvalid(OperationHandle),
    #[fail(display = "No provider registered for '{}'.", _0)]
    UnknownProvider(String),
    #[fail(display = "Dependency of '{}' failed: {}", _0, _1)]
    DependencyFailed(String, String),
    #[fail(display = "{} has already been completed.", _0)]
    AlreadyCompleted(OperationHandle),
    #[fail(display = "The provide token of {} has expired.", _0)]
    TokenExpired(OperationHandle),
    #[fail(display = "Expected a result of type {}.", _0)]
    ResultTypeMismatch(&'static str),
    #[fail(display = "Catalog is malformed: {}", _0)]
    Malformed(String),
}

pub type Result<T> = ::std::result::Result<T, ::failure::Error>;
