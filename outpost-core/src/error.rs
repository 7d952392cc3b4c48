use derive_more::derive::{Display, Error};

/// A specialized `Result` where the error is this crate's `Error` type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for boot-recovery and network-bootstrap policy.
///
/// The first four variants are policy outcomes with defined local recovery
/// (see the module docs of [`crate::boot_guard`] and [`crate::bootstrap`]);
/// the rest are storage plumbing.
#[derive(Debug, Display, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[expect(missing_docs, reason = "the display strings say it all")]
pub enum Error {
    #[display("configuration failed its integrity check; defaults restored")]
    ConfigCorrupt,

    #[display("supplied secret is {len} characters, minimum is {min}")]
    SecretTooShort { len: usize, min: usize },

    #[display("cached static address parameters are invalid")]
    StaticAddressInvalid,

    #[display("configuration storage could not be erased")]
    StorageFormatFailure,

    #[display("persistent storage operation failed")]
    Storage,

    #[display("value exceeds its storage capacity")]
    CapacityExceeded,
}

impl From<()> for Error {
    fn from(_: ()) -> Self {
        Self::CapacityExceeded
    }
}
