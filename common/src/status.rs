use std::{error::Error as StdError, process::ExitCode};

use crate::error::{ConfigError, Error, PathResolutionError, TlsHandshakeError};

/// Process exit status. Values follow BSD `sysexits.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Ok = 0,
    /// Malformed input: bad flags or a broken config file
    BadRequest = 64,
    /// Startup or internal failure
    Internal = 70,
    /// A certificate was rejected during the handshake
    AuthenticationDenied = 77,
}

impl ReturnCode {
    pub fn for_error(err: &Error) -> Self {
        match err {
            Error::Config(_) => ReturnCode::BadRequest,
            Error::Handshake(e) => Self::for_handshake(e),
            Error::Identity(_) | Error::Network(_) | Error::Io(_) => ReturnCode::Internal,
        }
    }

    fn for_handshake(err: &TlsHandshakeError) -> Self {
        if err.is_certificate_rejection() {
            ReturnCode::AuthenticationDenied
        } else {
            ReturnCode::Internal
        }
    }

    /// Maps the first Tollgate error found while walking `err`'s source chain.
    /// Anything else is internal.
    pub fn for_chain(err: &(dyn StdError + 'static)) -> Self {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(e) = e.downcast_ref::<Error>() {
                return Self::for_error(e);
            }
            if e.is::<ConfigError>() || e.is::<PathResolutionError>() {
                return ReturnCode::BadRequest;
            }
            if let Some(e) = e.downcast_ref::<TlsHandshakeError>() {
                return Self::for_handshake(e);
            }
            current = e.source();
        }
        ReturnCode::Internal
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ReturnCode> for ExitCode {
    fn from(code: ReturnCode) -> Self {
        ExitCode::from(code.code())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn errors_map_to_exit_codes() {
        let config: Error = ConfigError::EmptyFlag { name: "host".into() }.into();
        assert_eq!(ReturnCode::for_error(&config), ReturnCode::BadRequest);

        let denied: Error = TlsHandshakeError::from_tls(
            "127.0.0.1:4443",
            rustls::Error::AlertReceived(rustls::AlertDescription::BadCertificate),
        )
        .into();
        assert_eq!(ReturnCode::for_error(&denied), ReturnCode::AuthenticationDenied);
        assert_eq!(ReturnCode::AuthenticationDenied.code(), 77);

        let reset: Error = TlsHandshakeError::new(
            "127.0.0.1:4443",
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        )
        .into();
        assert_eq!(ReturnCode::for_error(&reset), ReturnCode::Internal);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("while starting up")]
    struct Wrapped(#[source] ConfigError);

    #[test]
    fn chain_is_searched_for_a_known_error() {
        let wrapped = Wrapped(ConfigError::UnknownOption { name: "colour".into() });
        assert_eq!(ReturnCode::for_chain(&wrapped), ReturnCode::BadRequest);

        let plain = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(ReturnCode::for_chain(&plain), ReturnCode::Internal);
    }
}
