//! Error taxonomy for the music layer
//!
//! Every failure surfaced by a backend is a [`MusicError`]. Besides being
//! returned, the text of the most recent failure is kept in a process-wide
//! "last error" slot so that callers which only look at boolean/negative
//! status codes can still fetch a human-readable reason.

use parking_lot::Mutex;

/// Last error text, shared by every backend.
static LAST_ERROR: Mutex<String> = Mutex::new(String::new());

/// Errors reported by music backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MusicError {
    /// The backend's native library, one of its symbols, or its ABI is missing
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// An allocation needed by the decoder could not be satisfied
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    /// Decoded audio uses a sample format or layout with no output mapping
    #[error("unsupported format: {0}")]
    FormatUnsupported(String),
    /// A call into the native decoding library failed
    #[error("{context}: {message}")]
    Native { context: String, message: String },
    /// The backend does not implement this operation
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    /// A caller-supplied value is out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The byte source failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl MusicError {
    /// Build a native-call failure, appending the library's error text.
    pub fn native(context: impl Into<String>, message: impl ToString) -> Self {
        MusicError::Native {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Record this error as the last error and hand it back.
    pub fn report(self) -> Self {
        set_error(&self.to_string());
        self
    }
}

impl From<std::io::Error> for MusicError {
    fn from(err: std::io::Error) -> Self {
        MusicError::Io(err.to_string())
    }
}

/// Result type for music operations
pub type MusicResult<T> = Result<T, MusicError>;

/// Replace the last error text.
pub fn set_error(message: &str) {
    let mut guard = LAST_ERROR.lock();
    guard.clear();
    guard.push_str(message);
}

/// Returns the last error text (empty when nothing failed since the last clear).
pub fn get_error() -> String {
    LAST_ERROR.lock().clone()
}

/// Forget the last error.
pub fn clear_error() {
    LAST_ERROR.lock().clear();
}
