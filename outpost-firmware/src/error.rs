use derive_more::derive::{Display, Error};

/// A specialized `Result` where the error is this crate's `Error` type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the firmware layer.
#[derive(Debug, Display, Error)]
pub enum Error {
    /// Policy or store error from the board-agnostic layer.
    #[display("{_0}")]
    Core(outpost_core::Error),

    // `#[error(not(source))]` below tells `derive_more` that the wrapped
    // type does not implement `core::error::Error`.
    /// A static task could not be spawned.
    #[display("{_0:?}")]
    TaskSpawn(#[error(not(source))] embassy_executor::SpawnError),

    /// An internal flash operation failed.
    #[display("Flash operation failed: {_0:?}")]
    Flash(#[error(not(source))] embassy_rp::flash::Error),

    /// A fixed-capacity buffer or string was too small.
    #[display("Format error")]
    FormatError,
}

impl From<outpost_core::Error> for Error {
    fn from(err: outpost_core::Error) -> Self {
        Self::Core(err)
    }
}

impl From<embassy_executor::SpawnError> for Error {
    fn from(err: embassy_executor::SpawnError) -> Self {
        Self::TaskSpawn(err)
    }
}

impl From<embassy_rp::flash::Error> for Error {
    fn from(err: embassy_rp::flash::Error) -> Self {
        Self::Flash(err)
    }
}

impl From<()> for Error {
    fn from(_: ()) -> Self {
        Self::FormatError
    }
}
