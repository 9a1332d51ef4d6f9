use snafu::Snafu;

/// The public Error type for this library.
#[derive(Debug, Snafu)]
pub struct Error(LibError);

/// The public Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// The internal Result type for this library.
pub(crate) type LibResult<T> = std::result::Result<T, LibError>;

impl Error {
    /// The broad category of the error, for callers that dispatch on failure
    /// modes (retry, abort, report) rather than on messages.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// A POSIX-style exit code for command-line front ends. `0` is never
    /// returned.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::NotFound => 2,
            ErrorKind::Io => 5,
            ErrorKind::Exists => 17,
            ErrorKind::NotDir => 20,
            ErrorKind::InvalidArg => 22,
            ErrorKind::Protocol => 71,
            ErrorKind::NotSupported => 95,
            ErrorKind::Timeout => 110,
            ErrorKind::Cancelled => 125,
        }
    }
}

/// The failure categories of the transfer engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ErrorKind {
    /// The MIDI port failed. Fatal: the backend closes its port and every
    /// subsequent operation fails with this kind.
    Io,
    /// No byte arrived within the transfer's budget. The backend survives.
    Timeout,
    /// The caller cancelled the transfer. The backend survives.
    Cancelled,
    /// The device rejected a request, or a reply was malformed.
    Protocol,
    NotFound,
    Exists,
    NotDir,
    NotSupported,
    InvalidArg,
}

/// The internal Error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum LibError {
    #[snafu(display("{}: port i/o failed: {}", site, source))]
    Io {
        site: String,
        source: crate::midi::PortError,
    },

    #[snafu(display("{}: port is closed", site))]
    Closed { site: String },

    #[snafu(display("{}: file i/o failed for '{}': {}", site, path, source))]
    File {
        site: String,
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("no reply within {} ms", millis))]
    Timeout { millis: u64 },

    #[snafu(display("transfer cancelled"))]
    Cancelled,

    #[snafu(display("{}: {}", site, message))]
    Protocol { site: String, message: String },

    #[snafu(display("{}: malformed reply: {}", site, source))]
    Reply {
        site: String,
        source: crate::bytes::ByteError,
    },

    #[snafu(display("'{}' not found", path))]
    NotFound { path: String },

    #[snafu(display("'{}' already exists", path))]
    Exists { path: String },

    #[snafu(display("'{}' is not a directory", path))]
    NotDir { path: String },

    #[snafu(display("operation '{}' is not supported by this filesystem", operation))]
    NotSupported { operation: String },

    #[snafu(display("{}: invalid argument: {}", site, description))]
    InvalidArg { site: String, description: String },
}

impl LibError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            LibError::Io { .. } | LibError::Closed { .. } | LibError::File { .. } => ErrorKind::Io,
            LibError::Timeout { .. } => ErrorKind::Timeout,
            LibError::Cancelled => ErrorKind::Cancelled,
            LibError::Protocol { .. } | LibError::Reply { .. } => ErrorKind::Protocol,
            LibError::NotFound { .. } => ErrorKind::NotFound,
            LibError::Exists { .. } => ErrorKind::Exists,
            LibError::NotDir { .. } => ErrorKind::NotDir,
            LibError::NotSupported { .. } => ErrorKind::NotSupported,
            LibError::InvalidArg { .. } => ErrorKind::InvalidArg,
        }
    }
}

macro_rules! site {
    () => {
        format!("{}:{}", file!(), line!())
    };
}

macro_rules! protocol_s {
    ($msg:expr) => {
        crate::error::ProtocolSnafu {
            site: site!(),
            message: String::from($msg),
        }
    };
    ($fmt:expr, $($arg:expr),+) => {
        crate::error::ProtocolSnafu {
            site: site!(),
            message: format!($fmt, $($arg),+),
        }
    };
}

macro_rules! protocol_e {
    ($msg:expr) => {
        protocol_s!($msg).build()
    };
    ($fmt:expr, $($arg:expr),+) => {
        protocol_s!($fmt, $($arg),+).build()
    };
}

macro_rules! protocol {
    ($msg:expr) => {
        return Err(protocol_e!($msg).into())
    };
    ($fmt:expr, $($arg:expr),+) => {
        return Err(protocol_e!($fmt, $($arg),+).into())
    };
}

macro_rules! inval {
    ($msg:expr) => {
        return Err(crate::error::InvalidArgSnafu {
            site: site!(),
            description: String::from($msg),
        }
        .build()
        .into())
    };
    ($fmt:expr, $($arg:expr),+) => {
        return Err(crate::error::InvalidArgSnafu {
            site: site!(),
            description: format!($fmt, $($arg),+),
        }
        .build()
        .into())
    };
}

impl Error {
    /// An error for an operation the device or filesystem does not support.
    pub fn not_supported<S: Into<String>>(operation: S) -> Self {
        Error::from(LibError::NotSupported {
            operation: operation.into(),
        })
    }

    /// A local file i/o error.
    pub fn file<S: Into<String>>(path: S, source: std::io::Error) -> Self {
        Error::from(LibError::File {
            site: site!(),
            path: path.into(),
            source,
        })
    }
}

#[test]
fn site_test() {
    let line = line!() + 1;
    let site = site!();
    assert!(site.contains("error.rs"));
    assert!(site.contains(format!("{}", line).as_str()));
}

#[test]
fn protocol_macro_test() {
    fn foo() -> LibResult<u64> {
        protocol!("device said {}", "no");
    }
    let result = foo();
    assert!(result.is_err());
    let e = result.err().unwrap();
    assert_eq!(e.kind(), ErrorKind::Protocol);
    let message = format!("{}", e);
    assert!(message.contains("device said no"));
}

#[test]
fn exit_code_test() {
    let e = Error::from(LibError::Cancelled);
    assert_eq!(e.exit_code(), 125);
    let e = Error::from(LibError::NotFound {
        path: "/a".to_owned(),
    });
    assert_eq!(e.exit_code(), 2);
}
