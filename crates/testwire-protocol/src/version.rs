//! Protocol version negotiation.

use std::fmt;

use thiserror::Error;

/// Versions of the wire protocol this crate can speak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// The initial protocol revision.
    #[default]
    V1,
}

impl ProtocolVersion {
    /// The version spoken when nothing else is configured.
    pub const CURRENT: Self = Self::V1;

    /// Returns the numeric identifier carried in configuration.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::V1 => 1,
        }
    }
}

impl TryFrom<u32> for ProtocolVersion {
    type Error = VersionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            other => Err(VersionError::Unsupported { version: other }),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "v{}", self.as_u32())
    }
}

/// Raised when a peer or configuration names a version we do not speak.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VersionError {
    /// The requested version is unknown to this build.
    #[error("unsupported protocol version {version}; this build speaks version 1")]
    Unsupported {
        /// Rejected version number.
        version: u32,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn accepts_version_one() {
        assert_eq!(ProtocolVersion::try_from(1), Ok(ProtocolVersion::V1));
        assert_eq!(ProtocolVersion::CURRENT.as_u32(), 1);
    }

    #[rstest]
    #[case(0)]
    #[case(2)]
    #[case(u32::MAX)]
    fn rejects_unknown_versions(#[case] version: u32) {
        assert_eq!(
            ProtocolVersion::try_from(version),
            Err(VersionError::Unsupported { version })
        );
    }
}
