// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `DiagnosticInfo`.

use std::io::{Read, Write};

use bitflags::bitflags;

use crate::{
    encoding::{
        read_u8, write_u8, BinaryDecodable, BinaryEncodable, EncodingResult,
    },
    status_code::StatusCode,
    string::UAString,
    Context,
};

bitflags! {
    /// Bits in the encoding mask naming the fields present on the wire.
    pub struct DiagnosticInfoMask: u8 {
        /// Symbolic id field present.
        const HAS_SYMBOLIC_ID = 0x01;
        /// Namespace field present.
        const HAS_NAMESPACE = 0x02;
        /// Localized text field present.
        const HAS_LOCALIZED_TEXT = 0x04;
        /// Locale field present.
        const HAS_LOCALE = 0x08;
        /// Additional info field present.
        const HAS_ADDITIONAL_INFO = 0x10;
        /// Inner status code field present.
        const HAS_INNER_STATUS_CODE = 0x20;
        /// Inner diagnostic info field present.
        const HAS_INNER_DIAGNOSTIC_INFO = 0x40;
    }
}

/// Vendor specific diagnostic information attached to a response. The
/// structure is recursive, the inner diagnostic info carries diagnostics
/// of an inner operation.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct DiagnosticInfo {
    /// Index into the string table of the symbolic name of the error.
    pub symbolic_id: Option<i32>,
    /// Index into the string table of the namespace of the symbolic id.
    pub namespace_uri: Option<i32>,
    /// Index into the string table of the locale of the error text.
    pub locale: Option<i32>,
    /// Index into the string table of the error text.
    pub localized_text: Option<i32>,
    /// Vendor specific additional information.
    pub additional_info: Option<UAString>,
    /// Status code of an inner operation.
    pub inner_status_code: Option<StatusCode>,
    /// Diagnostics of an inner operation.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncodable for DiagnosticInfo {
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        let mut size = 1;
        if self.symbolic_id.is_some() {
            size += 4;
        }
        if self.namespace_uri.is_some() {
            size += 4;
        }
        if self.locale.is_some() {
            size += 4;
        }
        if self.localized_text.is_some() {
            size += 4;
        }
        if let Some(ref additional_info) = self.additional_info {
            size += additional_info.byte_len(ctx);
        }
        if self.inner_status_code.is_some() {
            size += 4;
        }
        if let Some(ref inner_diagnostic_info) = self.inner_diagnostic_info {
            size += inner_diagnostic_info.byte_len(ctx);
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
        write_u8(stream, self.encoding_mask().bits())?;
        if let Some(symbolic_id) = self.symbolic_id {
            symbolic_id.encode(stream, ctx)?;
        }
        if let Some(namespace_uri) = self.namespace_uri {
            namespace_uri.encode(stream, ctx)?;
        }
        if let Some(locale) = self.locale {
            locale.encode(stream, ctx)?;
        }
        if let Some(localized_text) = self.localized_text {
            localized_text.encode(stream, ctx)?;
        }
        if let Some(ref additional_info) = self.additional_info {
            additional_info.encode(stream, ctx)?;
        }
        if let Some(inner_status_code) = self.inner_status_code {
            inner_status_code.encode(stream, ctx)?;
        }
        if let Some(ref inner_diagnostic_info) = self.inner_diagnostic_info {
            inner_diagnostic_info.encode(stream, ctx)?;
        }
        Ok(())
    }
}

impl BinaryDecodable for DiagnosticInfo {
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        let encoding_mask = DiagnosticInfoMask::from_bits_truncate(read_u8(stream)?);
        let mut diagnostic_info = DiagnosticInfo::default();
        if encoding_mask.contains(DiagnosticInfoMask::HAS_SYMBOLIC_ID) {
            diagnostic_info.symbolic_id = Some(i32::decode(stream, ctx)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_NAMESPACE) {
            diagnostic_info.namespace_uri = Some(i32::decode(stream, ctx)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_LOCALE) {
            diagnostic_info.locale = Some(i32::decode(stream, ctx)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_LOCALIZED_TEXT) {
            diagnostic_info.localized_text = Some(i32::decode(stream, ctx)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_ADDITIONAL_INFO) {
            diagnostic_info.additional_info = Some(UAString::decode(stream, ctx)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_INNER_STATUS_CODE) {
            diagnostic_info.inner_status_code = Some(StatusCode::decode(stream, ctx)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_INNER_DIAGNOSTIC_INFO) {
            // Each inner info is a fresh value, the wire format cannot
            // express cycles, but depth is still bounded.
            let _depth_lock = ctx.options().depth_lock()?;
            diagnostic_info.inner_diagnostic_info =
                Some(Box::new(DiagnosticInfo::decode(stream, ctx)?));
        }
        Ok(diagnostic_info)
    }
}

impl DiagnosticInfo {
    /// A diagnostic info with no fields set.
    pub fn null() -> DiagnosticInfo {
        DiagnosticInfo::default()
    }

    /// Compute the encoding mask from the fields that are set.
    pub fn encoding_mask(&self) -> DiagnosticInfoMask {
        let mut encoding_mask = DiagnosticInfoMask::empty();
        if self.symbolic_id.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_NAMESPACE;
        }
        if self.locale.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_LOCALE;
        }
        if self.localized_text.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_LOCALIZED_TEXT;
        }
        if self.additional_info.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_INNER_STATUS_CODE;
        }
        if self.inner_diagnostic_info.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_INNER_DIAGNOSTIC_INFO;
        }
        encoding_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextOwned;

    fn round_trip(di: &DiagnosticInfo) {
        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let buf = di.encode_to_vec(&ctx);
        assert_eq!(buf.len(), di.byte_len(&ctx));
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(&DiagnosticInfo::decode(&mut c, &ctx).unwrap(), di);
    }

    #[test]
    fn empty() {
        round_trip(&DiagnosticInfo::null());
    }

    #[test]
    fn nested() {
        round_trip(&DiagnosticInfo {
            symbolic_id: Some(19),
            localized_text: Some(2),
            additional_info: Some("more".into()),
            inner_status_code: Some(StatusCode::BadNodeIdUnknown),
            inner_diagnostic_info: Some(Box::new(DiagnosticInfo {
                symbolic_id: Some(5),
                ..Default::default()
            })),
            ..Default::default()
        });
    }

    #[test]
    fn depth_bounded() {
        // A run of mask bytes each asking for another inner info
        let buf = vec![0x40u8; 100];
        let ctx_owned = ContextOwned::default();
        let mut c = std::io::Cursor::new(&buf);
        assert!(DiagnosticInfo::decode(&mut c, &ctx_owned.context()).is_err());
    }
}
