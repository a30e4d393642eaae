// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The security and sequence headers carried by every chunk. OPN chunks
//! carry the asymmetric header, MSG and CLO chunks the symmetric one.

use std::io::{Read, Write};

use uasc_types::{
    constants, ByteString, DecodingOptions, EncodingResult, Error, SimpleBinaryDecodable,
    SimpleBinaryEncodable, StatusCode, UAString,
};

use uasc_crypto::{SecurityPolicy, Thumbprint, X509};

/// The security header of a chunk, symmetric or asymmetric depending on the
/// chunk type.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityHeader {
    /// Header of an OPN chunk.
    Asymmetric(AsymmetricSecurityHeader),
    /// Header of a MSG or CLO chunk.
    Symmetric(SymmetricSecurityHeader),
}

impl SimpleBinaryEncodable for SecurityHeader {
    fn byte_len(&self) -> usize {
        match self {
            SecurityHeader::Asymmetric(value) => value.byte_len(),
            SecurityHeader::Symmetric(value) => value.byte_len(),
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        match self {
            SecurityHeader::Asymmetric(value) => value.encode(stream),
            SecurityHeader::Symmetric(value) => value.encode(stream),
        }
    }
}

impl SecurityHeader {
    /// Decode the header matching the chunk type. The type of header is
    /// determined by the message header, so this type cannot implement
    /// `SimpleBinaryDecodable` itself.
    pub fn decode_from_stream<S: Read + ?Sized>(
        stream: &mut S,
        is_open_secure_channel: bool,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        if is_open_secure_channel {
            let security_header = AsymmetricSecurityHeader::decode(stream, decoding_options)?;
            let security_policy = if security_header.security_policy_uri.is_null() {
                SecurityPolicy::None
            } else {
                SecurityPolicy::from_uri(security_header.security_policy_uri.as_ref())
            };
            if security_policy == SecurityPolicy::Unknown {
                return Err(Error::new(
                    StatusCode::BadSecurityPolicyRejected,
                    format!(
                        "Security policy of chunk is unknown, policy = {:?}",
                        security_header.security_policy_uri
                    ),
                ));
            }
            Ok(SecurityHeader::Asymmetric(security_header))
        } else {
            Ok(SecurityHeader::Symmetric(SymmetricSecurityHeader::decode(
                stream,
                decoding_options,
            )?))
        }
    }
}

/// The symmetric security header: just the id of the token whose keys
/// protect the chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricSecurityHeader {
    /// Security token id.
    pub token_id: u32,
}

impl SimpleBinaryEncodable for SymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.token_id.encode(stream)
    }
}

impl SimpleBinaryDecodable for SymmetricSecurityHeader {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        Ok(SymmetricSecurityHeader {
            token_id: u32::decode(stream, decoding_options)?,
        })
    }
}

/// The asymmetric security header of OPN chunks: the policy and the
/// certificates the RSA operations use.
#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetricSecurityHeader {
    /// URI of the security policy of the channel.
    pub security_policy_uri: UAString,
    /// DER certificate of the sender, null for the None policy.
    pub sender_certificate: ByteString,
    /// SHA-1 thumbprint of the receiver certificate used for encryption,
    /// null for the None policy.
    pub receiver_certificate_thumbprint: ByteString,
}

impl SimpleBinaryEncodable for AsymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        self.security_policy_uri.byte_len()
            + self.sender_certificate.byte_len()
            + self.receiver_certificate_thumbprint.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.security_policy_uri.encode(stream)?;
        self.sender_certificate.encode(stream)?;
        self.receiver_certificate_thumbprint.encode(stream)?;
        Ok(())
    }
}

impl SimpleBinaryDecodable for AsymmetricSecurityHeader {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let security_policy_uri = UAString::decode(stream, decoding_options)?;
        let sender_certificate = ByteString::decode(stream, decoding_options)?;
        let receiver_certificate_thumbprint = ByteString::decode(stream, decoding_options)?;

        if sender_certificate.len() >= constants::MAX_CERTIFICATE_LENGTH {
            return Err(Error::new(
                StatusCode::BadEncodingLimitsExceeded,
                format!(
                    "Sender certificate length {} exceeds max certificate size",
                    sender_certificate.len()
                ),
            ));
        }
        let thumbprint_len = receiver_certificate_thumbprint.len();
        if thumbprint_len > 0 && thumbprint_len != Thumbprint::THUMBPRINT_SIZE {
            return Err(Error::decoding(format!(
                "Receiver certificate thumbprint is {} bytes, expected 20",
                thumbprint_len
            )));
        }
        Ok(AsymmetricSecurityHeader {
            security_policy_uri,
            sender_certificate,
            receiver_certificate_thumbprint,
        })
    }
}

impl AsymmetricSecurityHeader {
    /// The asymmetric header of the None policy: no certs at all.
    pub fn none() -> AsymmetricSecurityHeader {
        AsymmetricSecurityHeader {
            security_policy_uri: UAString::from(SecurityPolicy::None.to_uri()),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        }
    }

    /// An asymmetric header naming the policy, the sender certificate and
    /// the thumbprint of the receiver certificate.
    pub fn new(
        security_policy: SecurityPolicy,
        sender_certificate: &X509,
        receiver_certificate_thumbprint: ByteString,
    ) -> AsymmetricSecurityHeader {
        AsymmetricSecurityHeader {
            security_policy_uri: UAString::from(security_policy.to_uri()),
            sender_certificate: sender_certificate.as_byte_string(),
            receiver_certificate_thumbprint,
        }
    }
}

/// The sequence header: the chunk's sequence number and the request it
/// belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceHeader {
    /// Monotonically increasing number of the chunk on the conversation.
    pub sequence_number: u32,
    /// Id of the request this chunk is part of.
    pub request_id: u32,
}

impl SimpleBinaryEncodable for SequenceHeader {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.sequence_number.encode(stream)?;
        self.request_id.encode(stream)?;
        Ok(())
    }
}

impl SimpleBinaryDecodable for SequenceHeader {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        Ok(SequenceHeader {
            sequence_number: u32::decode(stream, decoding_options)?,
            request_id: u32::decode(stream, decoding_options)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uasc_types::DecodingOptions;

    #[test]
    fn asymmetric_none_round_trip() {
        let header = AsymmetricSecurityHeader::none();
        let buf = header.encode_to_vec();
        let mut c = std::io::Cursor::new(&buf);
        let decoded =
            SecurityHeader::decode_from_stream(&mut c, true, &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, SecurityHeader::Asymmetric(header));
    }

    #[test]
    fn bad_thumbprint_size_fails() {
        let header = AsymmetricSecurityHeader {
            security_policy_uri: SecurityPolicy::Basic256Sha256.to_uri().into(),
            sender_certificate: ByteString::from(&[1u8, 2, 3][..]),
            receiver_certificate_thumbprint: ByteString::from(&[1u8; 19][..]),
        };
        let mut c = std::io::Cursor::new(header.encode_to_vec());
        assert!(
            AsymmetricSecurityHeader::decode(&mut c, &DecodingOptions::test()).is_err()
        );
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let header = AsymmetricSecurityHeader {
            security_policy_uri: "http://not/a/policy".into(),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        };
        let mut c = std::io::Cursor::new(header.encode_to_vec());
        let e = SecurityHeader::decode_from_stream(&mut c, true, &DecodingOptions::test())
            .unwrap_err();
        assert_eq!(e.status(), StatusCode::BadSecurityPolicyRejected);
    }

    #[test]
    fn symmetric_round_trip() {
        let header = SymmetricSecurityHeader { token_id: 1234 };
        let mut c = std::io::Cursor::new(header.encode_to_vec());
        let decoded =
            SecurityHeader::decode_from_stream(&mut c, false, &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, SecurityHeader::Symmetric(header));
    }
}
