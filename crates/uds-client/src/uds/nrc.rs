//! UDS Negative Response Codes (NRC)

use std::fmt;

macro_rules! negative_response_codes {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)+) => {
        /// UDS Negative Response Codes (ISO 14229-1 Annex A.1)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NegativeResponseCode {
            $($(#[$doc])* $name,)+
            /// Reserved or manufacturer specific
            Unknown(u8),
        }

        impl From<u8> for NegativeResponseCode {
            fn from(value: u8) -> Self {
                match value {
                    $($value => Self::$name,)+
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<NegativeResponseCode> for u8 {
            fn from(nrc: NegativeResponseCode) -> Self {
                match nrc {
                    $(NegativeResponseCode::$name => $value,)+
                    NegativeResponseCode::Unknown(v) => v,
                }
            }
        }

        impl fmt::Display for NegativeResponseCode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$name => f.write_str(stringify!($name)),)+
                    Self::Unknown(v) => write!(f, "Unknown(0x{:02X})", v),
                }
            }
        }
    };
}

negative_response_codes! {
    GeneralReject = 0x10,
    ServiceNotSupported = 0x11,
    SubFunctionNotSupported = 0x12,
    IncorrectMessageLengthOrFormat = 0x13,
    ResponseTooLong = 0x14,
    BusyRepeatRequest = 0x21,
    ConditionsNotCorrect = 0x22,
    RequestSequenceError = 0x24,
    NoResponseFromSubnet = 0x25,
    FailurePreventsExecution = 0x26,
    RequestOutOfRange = 0x31,
    SecurityAccessDenied = 0x33,
    InvalidKey = 0x35,
    ExceededNumberOfAttempts = 0x36,
    RequiredTimeDelayNotExpired = 0x37,
    UploadDownloadNotAccepted = 0x70,
    TransferDataSuspended = 0x71,
    GeneralProgrammingFailure = 0x72,
    WrongBlockSequenceCounter = 0x73,
    /// Server accepted the request but needs more time (extends the wait to P2*)
    ResponsePending = 0x78,
    SubFunctionNotSupportedInActiveSession = 0x7E,
    ServiceNotSupportedInActiveSession = 0x7F,
    VoltageTooHigh = 0x92,
    VoltageTooLow = 0x93,
}

impl NegativeResponseCode {
    pub fn as_byte(self) -> u8 {
        self.into()
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.as_byte(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_code_round_trips_through_byte() {
        let nrc = NegativeResponseCode::from(0x31);
        assert_eq!(nrc, NegativeResponseCode::RequestOutOfRange);
        assert_eq!(nrc.as_byte(), 0x31);
        assert_eq!(nrc.to_string(), "RequestOutOfRange");
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let nrc = NegativeResponseCode::from(0xF0);
        assert_eq!(nrc, NegativeResponseCode::Unknown(0xF0));
        assert_eq!(u8::from(nrc), 0xF0);
        assert_eq!(format!("{:02X}", nrc), "F0");
    }
}
