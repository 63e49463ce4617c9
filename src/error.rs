//! Error taxonomy for every public operation.

/// Every way a public operation can fail.
///
/// `Display` renders a short upper-case label, so `err.to_string()` can be
/// used anywhere that wants a compact label (log lines, on-screen
/// diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A block-device call failed. Sticky at the filesystem level until the
    /// next successful `mount`.
    #[error("IO")]
    Io,
    /// `open` in read mode, or `exists`, found no file of that name.
    #[error("FILE NOT FOUND")]
    FileNotFound,
    /// A table copy's stored CRC does not match its descriptor bytes.
    #[error("CRC")]
    Crc,
    /// A chain walk hit a structurally impossible `next` value, or both
    /// table copies were invalid in a way recovery could not repair.
    #[error("CORRUPT")]
    Corrupt,
    /// Both table copies are invalid; the device is unformatted or wiped.
    #[error("EMPTY")]
    Empty,
    /// The allocator has no free sector left.
    #[error("FULL")]
    Full,
    /// `open`'s mode string (or an equivalent request) was not recognized.
    #[error("UNSUPPORTED")]
    Unsupported,
    /// A CRC-checked read's running CRC did not match the file header's CRC.
    #[error("FILE CRC")]
    FileCrc,
    /// Generic "not found in a context that treats it as fatal".
    #[error("NULL")]
    Null,
    /// A filename longer than `NAMELEN` was supplied to `open`.
    #[error("NAME TOO LONG")]
    NameTooLong,
}

impl Error {
    /// The short upper-case label for this error code.
    pub fn errstr(self) -> &'static str {
        match self {
            Error::Io => "IO",
            Error::FileNotFound => "FILE NOT FOUND",
            Error::Crc => "CRC",
            Error::Corrupt => "CORRUPT",
            Error::Empty => "EMPTY",
            Error::Full => "FULL",
            Error::Unsupported => "UNSUPPORTED",
            Error::FileCrc => "FILE CRC",
            Error::Null => "NULL",
            Error::NameTooLong => "NAME TOO LONG",
        }
    }
}

/// Render an arbitrary error code as its short label, for callers that
/// prefer a free function over a method.
pub fn errstr(err: Error) -> &'static str {
    err.errstr()
}

pub type Result<T> = std::result::Result<T, Error>;
