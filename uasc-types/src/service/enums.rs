// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Enumerations used throughout the service set. All are transmitted as
//! Int32 values.

use std::fmt;
use std::str::FromStr;

use super::ua_enum;

/// The security to apply to messages on a secure channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum MessageSecurityMode {
    /// An invalid mode, never sent.
    #[default]
    Invalid = 0,
    /// Messages are neither signed nor encrypted.
    None = 1,
    /// Messages are signed but not encrypted.
    Sign = 2,
    /// Messages are signed and encrypted.
    SignAndEncrypt = 3,
}

ua_enum!(MessageSecurityMode; Invalid = 0, None = 1, Sign = 2, SignAndEncrypt = 3);

impl fmt::Display for MessageSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "Invalid",
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MessageSecurityMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(Self::None),
            "Sign" => Ok(Self::Sign),
            "SignAndEncrypt" => Ok(Self::SignAndEncrypt),
            _ => Err(()),
        }
    }
}

/// The kind of user identity token an endpoint accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i32)]
pub enum UserTokenType {
    /// No user information is provided.
    Anonymous = 0,
    /// A user name and password.
    UserName = 1,
    /// An X.509 certificate.
    Certificate = 2,
    /// A token issued by an external authority.
    IssuedToken = 3,
}

ua_enum!(UserTokenType; Anonymous = 0, UserName = 1, Certificate = 2, IssuedToken = 3);

/// Whether an OpenSecureChannel call issues a fresh channel or renews the
/// token of an existing one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i32)]
pub enum SecurityTokenRequestType {
    /// Create a new security token for a new secure channel.
    Issue = 0,
    /// Create a new security token for an existing secure channel.
    Renew = 1,
}

ua_enum!(SecurityTokenRequestType; Issue = 0, Renew = 1);

/// The role of an application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ApplicationType {
    /// A server.
    Server = 0,
    /// A client.
    #[default]
    Client = 1,
    /// Both a client and a server.
    ClientAndServer = 2,
    /// A discovery server.
    DiscoveryServer = 3,
}

ua_enum!(ApplicationType; Server = 0, Client = 1, ClientAndServer = 2, DiscoveryServer = 3);

/// Which timestamps the server should return on reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i32)]
pub enum TimestampsToReturn {
    /// Source timestamps only.
    Source = 0,
    /// Server timestamps only.
    Server = 1,
    /// Both source and server timestamps.
    Both = 2,
    /// No timestamps.
    Neither = 3,
}

ua_enum!(TimestampsToReturn; Source = 0, Server = 1, Both = 2, Neither = 3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{DecodingOptions, SimpleBinaryDecodable, SimpleBinaryEncodable};

    #[test]
    fn enum_round_trip() {
        let buf = MessageSecurityMode::SignAndEncrypt.encode_to_vec();
        assert_eq!(buf, vec![3, 0, 0, 0]);
        let mut c = std::io::Cursor::new(buf);
        assert_eq!(
            MessageSecurityMode::decode(&mut c, &DecodingOptions::test()).unwrap(),
            MessageSecurityMode::SignAndEncrypt
        );
    }

    #[test]
    fn unknown_discriminant_fails() {
        let mut c = std::io::Cursor::new(vec![9, 0, 0, 0]);
        assert!(UserTokenType::decode(&mut c, &DecodingOptions::test()).is_err());
    }
}
