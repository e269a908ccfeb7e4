use thiserror::Error;

// Errors raised by the scope primitives. The core never catches these itself;
// they surface synchronously to whoever attempted the operation.
#[derive(Debug, Error)]
pub enum ScopeError {
    // A write to a scope that is neither the calling thread's active scope nor
    // a root. Local data may only be mutated from inside the scope's own
    // dynamic extent.
    #[error("invalid mutation: `{key}` written to a scope that is neither active on this thread nor a root")]
    InvalidMutation { key: String },
}

// Type alias for results that use `ScopeError` as the error type
pub type Result<T> = std::result::Result<T, ScopeError>;
