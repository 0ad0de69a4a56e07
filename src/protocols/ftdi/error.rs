//! Error types for the nusb-backed FTDI transport.

use nusb::transfer::TransferError;
use thiserror::Error;

use crate::types::TransferFailure;

/// Errors reported by the USB stack.
#[derive(Error, Debug)]
pub enum Error {
    /// Enumeration, open, claim, or endpoint error.
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    /// A control or bulk transfer failed.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// Result type alias for FTDI transport operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn transfer_failure(err: TransferError) -> TransferFailure {
    match err {
        TransferError::Cancelled => TransferFailure::Cancelled,
        TransferError::Stall => TransferFailure::Stall,
        TransferError::Disconnected => TransferFailure::Disconnected,
        TransferError::Fault => TransferFailure::Fault,
        other => TransferFailure::Other(other.to_string()),
    }
}

impl From<Error> for crate::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Usb(e) => match e.kind() {
                nusb::ErrorKind::PermissionDenied => crate::Error::AccessDenied(e.to_string()),
                nusb::ErrorKind::NotFound | nusb::ErrorKind::Disconnected => {
                    crate::Error::NotFound
                }
                _ => crate::Error::io("USB", e),
            },
            Error::Transfer(e) => crate::Error::Transfer(transfer_failure(e)),
        }
    }
}
