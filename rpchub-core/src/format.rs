//! Transfer format negotiation.
//!
//! `TransferFormat` is a single-bit choice between `Text` and `Binary`.
//! Transports validate the requested format before starting; a caller
//! that ORs both bits together gets rejected with a fixed error message.

/// The wire representation a transport should use: UTF-8 text framing
/// (record-separator delimited) or binary framing (length-prefixed).
///
/// Modeled as single-bit flags rather than a two-variant enum: the wire
/// contract requires exactly one bit set and rejects a bitwise-OR of
/// both, so validation is a direct bit comparison instead of matching
/// enum variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferFormat(u8);

impl TransferFormat {
    pub const TEXT: TransferFormat = TransferFormat(0b01);
    pub const BINARY: TransferFormat = TransferFormat(0b10);

    /// Both bits set — never a legal `Start()` argument, only useful for
    /// constructing the invalid-argument test fixture.
    pub const BOTH: TransferFormat = TransferFormat(0b11);

    /// Fixed error message for an invalid (non-single-bit) format.
    pub const INVALID_MESSAGE: &'static str = "Invalid transfer mode.";

    /// Validate that exactly one bit is set.
    pub fn validate(self) -> Result<(), TransferFormatError> {
        if self.0 == Self::TEXT.0 || self.0 == Self::BINARY.0 {
            Ok(())
        } else {
            Err(TransferFormatError)
        }
    }

    pub fn is_text(self) -> bool {
        self == Self::TEXT
    }

    pub fn is_binary(self) -> bool {
        self == Self::BINARY
    }
}

impl std::ops::BitOr for TransferFormat {
    type Output = TransferFormat;

    fn bitor(self, rhs: Self) -> Self::Output {
        TransferFormat(self.0 | rhs.0)
    }
}

/// Raised when `requestedFormat` is not a single bit.
#[derive(Debug, thiserror::Error)]
#[error("{}: {}", Self::PARAM_NAME, TransferFormat::INVALID_MESSAGE)]
pub struct TransferFormatError;

impl TransferFormatError {
    pub const PARAM_NAME: &'static str = "requestedTransferMode";
}
