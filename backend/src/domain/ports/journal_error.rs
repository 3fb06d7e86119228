//! Errors shared by the append-only journal ports.

use super::define_port_error;

define_port_error! {
    /// Errors raised by journal adapters.
    pub enum JournalError {
        /// The backing file could not be opened, read or written.
        Io {
            /// Underlying I/O error.
            message: String,
        } => "journal I/O failed: {message}",
        /// An entry could not be encoded.
        Serialization {
            /// Encoder error.
            message: String,
        } => "journal entry serialisation failed: {message}",
    }
}
