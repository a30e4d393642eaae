// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The secure channel: per-direction keys, token state and the signing,
//! padding and encryption applied to chunks.

use std::{
    collections::HashMap,
    io::Cursor,
    ops::{Deref, Range},
    sync::Arc,
};

use chrono::Duration;
use log::{error, trace};

use uasc_crypto::{
    CertificateStore, KeySize, PrivateKey, SecurityKeys, SecurityPolicy, X509,
};
use uasc_types::{
    write_bytes, write_u32, write_u8, ByteString, ChannelSecurityToken, ContextOwned, DateTime,
    DecodingOptions, Error, MessageSecurityMode, NamespaceMap, SimpleBinaryDecodable, StatusCode,
};

use parking_lot::RwLock;

use super::{
    message_chunk::{MessageChunk, MessageChunkHeader, MessageIsFinalType, MessageChunkType, MESSAGE_SIZE_OFFSET},
    security_header::{AsymmetricSecurityHeader, SecurityHeader, SymmetricSecurityHeader},
};

/// The side of the conversation a channel implements.
#[derive(Debug, PartialEq)]
pub enum Role {
    /// Not yet decided, only used by tests.
    Unknown,
    /// The connecting side.
    Client,
    /// The listening side.
    Server,
}

#[derive(Debug)]
struct RemoteKeys {
    keys: SecurityKeys,
    expires_at: DateTime,
}

/// Holds all security state of one conversation: negotiated policy and
/// mode, certificates, nonces, and the symmetric keys for both directions.
///
/// Keys for the remote direction are kept per token id. Messages secured by
/// an expired token are accepted for up to 25% of the token lifetime, so a
/// renewal does not race the messages already in flight.
pub struct SecureChannel {
    role: Role,
    security_policy: SecurityPolicy,
    security_mode: MessageSecurityMode,
    secure_channel_id: u32,
    token_created_at: DateTime,
    token_lifetime: u32,
    token_id: u32,
    /// Our certificate and private key.
    cert: Option<X509>,
    private_key: Option<PrivateKey>,
    /// The peer's certificate.
    remote_cert: Option<X509>,
    /// Nonces exchanged in OpenSecureChannel.
    local_nonce: Vec<u8>,
    remote_nonce: Vec<u8>,
    /// Keys for verifying and decrypting what the peer sends, per token id.
    remote_keys: HashMap<u32, RemoteKeys>,
    /// Keys for signing and encrypting what we send.
    local_keys: Option<SecurityKeys>,
    /// The trust store used to validate certificates discovered during OPN.
    certificate_store: Option<Arc<RwLock<CertificateStore>>>,
    encoding_context: Arc<RwLock<ContextOwned>>,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("role", &self.role)
            .field("security_policy", &self.security_policy)
            .field("security_mode", &self.security_mode)
            .field("secure_channel_id", &self.secure_channel_id)
            .field("token_id", &self.token_id)
            .finish()
    }
}

impl SecureChannel {
    /// A channel with no certificate store, no certificate and no key.
    /// Suitable for tests and for the None policy only.
    pub fn new_no_certificate_store() -> SecureChannel {
        SecureChannel {
            role: Role::Unknown,
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            secure_channel_id: 0,
            token_id: 0,
            token_created_at: DateTime::now(),
            token_lifetime: 0,
            local_nonce: Vec::new(),
            remote_nonce: Vec::new(),
            cert: None,
            private_key: None,
            remote_cert: None,
            local_keys: None,
            remote_keys: HashMap::new(),
            certificate_store: None,
            encoding_context: Default::default(),
        }
    }

    /// Create a channel in the given role, loading the application
    /// certificate and key from the store.
    pub fn new(
        certificate_store: Arc<RwLock<CertificateStore>>,
        role: Role,
        encoding_context: Arc<RwLock<ContextOwned>>,
    ) -> SecureChannel {
        let (cert, private_key) = {
            let store = certificate_store.read();
            let cert = match store.read_own_cert() {
                Ok(cert) => Some(cert),
                Err(e) => {
                    error!("Failed to read own certificate: {e}. Crypto policies won't work");
                    None
                }
            };
            let key = match store.read_own_pkey() {
                Ok(key) => Some(key),
                Err(e) => {
                    error!("Failed to read own private key: {e}. Crypto policies won't work");
                    None
                }
            };
            (cert, key)
        };
        SecureChannel {
            role,
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            secure_channel_id: 0,
            token_id: 0,
            token_created_at: DateTime::now(),
            token_lifetime: 0,
            local_nonce: Vec::new(),
            remote_nonce: Vec::new(),
            cert,
            private_key,
            remote_cert: None,
            local_keys: None,
            remote_keys: HashMap::new(),
            certificate_store: Some(certificate_store),
            encoding_context,
        }
    }

    /// `true` if this channel plays the client role.
    pub fn is_client_role(&self) -> bool {
        self.role == Role::Client
    }

    /// Set the application certificate.
    pub fn set_cert(&mut self, cert: Option<X509>) {
        self.cert = cert;
    }

    /// The application certificate.
    pub fn cert(&self) -> Option<X509> {
        self.cert.clone()
    }

    /// Set the application private key.
    pub fn set_private_key(&mut self, private_key: Option<PrivateKey>) {
        self.private_key = private_key;
    }

    /// Set the peer certificate.
    pub fn set_remote_cert(&mut self, remote_cert: Option<X509>) {
        self.remote_cert = remote_cert;
    }

    /// The peer certificate.
    pub fn remote_cert(&self) -> Option<X509> {
        self.remote_cert.clone()
    }

    /// The negotiated security mode.
    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security_mode
    }

    /// Set the security mode.
    pub fn set_security_mode(&mut self, security_mode: MessageSecurityMode) {
        self.security_mode = security_mode;
    }

    /// The negotiated security policy.
    pub fn security_policy(&self) -> SecurityPolicy {
        self.security_policy
    }

    /// Set the security policy.
    pub fn set_security_policy(&mut self, security_policy: SecurityPolicy) {
        self.security_policy = security_policy;
    }

    /// Forget the security token, e.g. before a reconnect.
    pub fn clear_security_token(&mut self) {
        self.secure_channel_id = 0;
        self.token_id = 0;
        self.token_created_at = DateTime::now();
        self.token_lifetime = 0;
    }

    /// Adopt the token returned by an OpenSecureChannel response.
    pub fn set_security_token(&mut self, channel_token: ChannelSecurityToken) {
        self.secure_channel_id = channel_token.channel_id;
        self.token_id = channel_token.token_id;
        self.token_created_at = channel_token.created_at;
        self.token_lifetime = channel_token.revised_lifetime;
    }

    /// Set the channel id, chosen by the server.
    pub fn set_secure_channel_id(&mut self, secure_channel_id: u32) {
        self.secure_channel_id = secure_channel_id;
    }

    /// The channel id.
    pub fn secure_channel_id(&self) -> u32 {
        self.secure_channel_id
    }

    /// When the active token was created.
    pub fn token_created_at(&self) -> DateTime {
        self.token_created_at
    }

    /// The lifetime of the active token in milliseconds.
    pub fn token_lifetime(&self) -> u32 {
        self.token_lifetime
    }

    /// Set the lifetime of the active token in milliseconds.
    pub fn set_token_lifetime(&mut self, token_lifetime: u32) {
        self.token_lifetime = token_lifetime;
    }

    /// Set the id of the active token.
    pub fn set_token_id(&mut self, token_id: u32) {
        self.token_id = token_id;
    }

    /// The id of the active token.
    pub fn token_id(&self) -> u32 {
        self.token_id
    }

    /// Set the clock offset applied to decoded timestamps.
    pub fn set_client_offset(&mut self, client_offset: Duration) {
        self.encoding_context.write().options_mut().client_offset = client_offset;
    }

    /// Replace the decoding options, preserving the client offset.
    pub fn set_decoding_options(&mut self, decoding_options: DecodingOptions) {
        let mut context = self.encoding_context.write();
        let offset = context.options().client_offset;
        *context.options_mut() = DecodingOptions {
            client_offset: offset,
            ..decoding_options
        };
    }

    /// Borrow the encoding context.
    pub fn context(&self) -> impl Deref<Target = ContextOwned> + '_ {
        self.encoding_context.read()
    }

    /// The shared encoding context.
    pub fn context_arc(&self) -> Arc<RwLock<ContextOwned>> {
        self.encoding_context.clone()
    }

    /// Install the namespace table read from the server.
    pub fn set_namespaces(&self, namespaces: NamespaceMap) {
        *self.encoding_context.write().namespaces_mut() = namespaces;
    }

    /// Install the server URI table read from the server.
    pub fn set_servers(&self, servers: Vec<String>) {
        *self.encoding_context.write().servers_mut() = servers;
    }

    /// The channel's decoding options.
    pub fn decoding_options(&self) -> DecodingOptions {
        self.context().options().clone()
    }

    /// True when the token's issue period has elapsed by 75% or more and a
    /// renewal is due.
    pub fn should_renew_security_token(&self) -> bool {
        if self.token_id() == 0 {
            false
        } else {
            let renew_after = Duration::milliseconds(((self.token_lifetime as i64) * 3) / 4);
            DateTime::now() - self.token_created_at > renew_after
        }
    }

    /// Build the security header for a chunk of the given type.
    pub fn make_security_header(&self, message_type: MessageChunkType) -> SecurityHeader {
        match message_type {
            MessageChunkType::OpenSecureChannel => {
                let header = if self.security_policy == SecurityPolicy::None {
                    AsymmetricSecurityHeader::none()
                } else {
                    let receiver_certificate_thumbprint = self
                        .remote_cert
                        .as_ref()
                        .map(|cert| cert.thumbprint().as_byte_string())
                        .unwrap_or_else(ByteString::null);
                    // Requires our certificate to be present, checked on connect
                    AsymmetricSecurityHeader::new(
                        self.security_policy,
                        self.cert.as_ref().expect("OPN with security but no cert"),
                        receiver_certificate_thumbprint,
                    )
                };
                SecurityHeader::Asymmetric(header)
            }
            _ => SecurityHeader::Symmetric(SymmetricSecurityHeader {
                token_id: self.token_id,
            }),
        }
    }

    /// Create a fresh local nonce of the policy's nonce length.
    pub fn create_random_nonce(&mut self) {
        self.local_nonce
            .resize(self.security_policy.secure_channel_nonce_length(), 0);
        uasc_crypto::random::bytes(&mut self.local_nonce);
    }

    /// Set the peer certificate from its wire form.
    pub fn set_remote_cert_from_byte_string(
        &mut self,
        remote_cert: &ByteString,
    ) -> Result<(), Error> {
        self.remote_cert = if remote_cert.is_null() {
            None
        } else {
            Some(X509::from_byte_string(remote_cert)?)
        };
        Ok(())
    }

    /// The peer certificate in wire form.
    pub fn remote_cert_as_byte_string(&self) -> ByteString {
        self.remote_cert
            .as_ref()
            .map(|cert| cert.as_byte_string())
            .unwrap_or_else(ByteString::null)
    }

    /// Set the peer nonce from its wire form, validating its length against
    /// the policy.
    pub fn set_remote_nonce_from_byte_string(
        &mut self,
        remote_nonce: &ByteString,
    ) -> Result<(), Error> {
        if let Some(ref remote_nonce) = remote_nonce.value {
            if self.security_policy != SecurityPolicy::None
                && remote_nonce.len() != self.security_policy.secure_channel_nonce_length()
            {
                error!(
                    "Remote nonce is invalid length {}, expecting {}",
                    remote_nonce.len(),
                    self.security_policy.secure_channel_nonce_length()
                );
                return Err(Error::new(StatusCode::BadNonceInvalid, "Bad nonce length"));
            }
            self.remote_nonce = remote_nonce.clone();
            Ok(())
        } else if self.security_policy != SecurityPolicy::None {
            Err(Error::new(StatusCode::BadNonceInvalid, "Nonce is missing"))
        } else {
            Ok(())
        }
    }

    /// The local nonce.
    pub fn local_nonce(&self) -> &[u8] {
        &self.local_nonce
    }

    /// Replace the local nonce.
    pub fn set_local_nonce(&mut self, local_nonce: &[u8]) {
        self.local_nonce = local_nonce.to_vec();
    }

    /// The local nonce in wire form.
    pub fn local_nonce_as_byte_string(&self) -> ByteString {
        if self.local_nonce.is_empty() {
            ByteString::null()
        } else {
            ByteString::from(&self.local_nonce)
        }
    }

    /// Replace the remote nonce.
    pub fn set_remote_nonce(&mut self, remote_nonce: &[u8]) {
        self.remote_nonce = remote_nonce.to_vec();
    }

    /// The remote nonce.
    pub fn remote_nonce(&self) -> &[u8] {
        &self.remote_nonce
    }

    /// The remote nonce in wire form.
    pub fn remote_nonce_as_byte_string(&self) -> ByteString {
        if self.remote_nonce.is_empty() {
            ByteString::null()
        } else {
            ByteString::from(&self.remote_nonce)
        }
    }

    /// Derive both directions' symmetric keys from the nonces with the
    /// policy's PSHA. Local keys secure what we send, remote keys verify
    /// and decrypt what the peer sends; the remote set is filed under the
    /// current token id.
    pub fn derive_keys(&mut self) {
        self.insert_remote_keys(
            self.security_policy
                .make_secure_channel_keys(&self.local_nonce, &self.remote_nonce),
        );
        self.local_keys = Some(
            self.security_policy
                .make_secure_channel_keys(&self.remote_nonce, &self.local_nonce),
        );
        trace!("Derived keys for token {}", self.token_id);
    }

    fn insert_remote_keys(&mut self, keys: SecurityKeys) {
        // Drop keys whose grace period has passed
        let now = DateTime::now();
        self.remote_keys.retain(|_, v| now < v.expires_at);

        // Expired tokens stay usable for 25% of the lifetime
        let expires_at = Duration::milliseconds((self.token_lifetime as f64 * 1.25).ceil() as i64);
        self.remote_keys.insert(
            self.token_id,
            RemoteKeys {
                keys,
                expires_at: self.token_created_at + expires_at,
            },
        );
    }

    fn local_keys(&self) -> &SecurityKeys {
        self.local_keys.as_ref().expect("Local keys not derived")
    }

    fn remote_keys(&self, token_id: u32) -> Option<&SecurityKeys> {
        self.remote_keys.get(&token_id).map(|k| &k.keys)
    }

    fn encryption_keys(&self) -> (&uasc_crypto::AesKey, &[u8]) {
        let keys = self.local_keys();
        (&keys.1, &keys.2)
    }

    fn signing_key(&self) -> &[u8] {
        &self.local_keys().0
    }

    fn decryption_keys(&self, token_id: u32) -> Option<(&uasc_crypto::AesKey, &[u8])> {
        let keys = self.remote_keys(token_id)?;
        Some((&keys.1, &keys.2))
    }

    fn verification_key(&self, token_id: u32) -> Option<&[u8]> {
        Some(&self.remote_keys(token_id)?.0)
    }

    /// The signature size in bytes for a chunk with this security header.
    pub fn signature_size(&self, security_header: &SecurityHeader) -> usize {
        match security_header {
            SecurityHeader::Asymmetric(header) => {
                if header.sender_certificate.is_null() {
                    0
                } else {
                    X509::from_byte_string(&header.sender_certificate)
                        .and_then(|cert| cert.public_key())
                        .map(|key| key.size())
                        .unwrap_or(0)
                }
            }
            SecurityHeader::Symmetric(_) => self.security_policy.symmetric_signature_size(),
        }
    }

    // The padding header grows to two bytes when a cipher block can exceed
    // one byte of padding count, i.e. for keys over 2048 bits.
    fn minimum_padding(key_length: usize) -> usize {
        if key_length <= 256 {
            1
        } else {
            2
        }
    }

    /// The plain text block size and minimum padding for a chunk with this
    /// header. Both are zero when no encryption applies.
    pub fn padding_block_sizes(
        &self,
        security_header: &SecurityHeader,
        signature_size: usize,
        message_type: MessageChunkType,
    ) -> (usize, usize) {
        if self.security_policy == SecurityPolicy::None
            || self.security_mode != MessageSecurityMode::SignAndEncrypt
                && !message_type.is_open_secure_channel()
        {
            return (0, 0);
        }

        match security_header {
            SecurityHeader::Asymmetric(header) => {
                if header.sender_certificate.is_null() {
                    (self.security_policy.plain_block_size(), signature_size)
                } else {
                    // Block sizes come from the peer key doing the encryption
                    let padding = self.security_policy.asymmetric_encryption_padding();
                    let Some(key) = self.remote_cert.as_ref().and_then(|c| c.public_key().ok())
                    else {
                        error!("Peer has no certificate, padding cannot be computed");
                        return (self.security_policy.plain_block_size(), signature_size);
                    };
                    (
                        key.plain_text_block_size(padding),
                        Self::minimum_padding(key.size()),
                    )
                }
            }
            SecurityHeader::Symmetric(_) => (
                self.security_policy.plain_block_size(),
                Self::minimum_padding(signature_size),
            ),
        }
    }

    /// The padding size for a body of `body_size` bytes: the number of
    /// padding bytes including the padding header, chosen so sequence
    /// header + body + padding + signature align to the plain text block.
    pub fn padding_size(
        &self,
        security_header: &SecurityHeader,
        body_size: usize,
        signature_size: usize,
        message_type: MessageChunkType,
    ) -> (usize, usize) {
        let (plain_text_block_size, minimum_padding) =
            self.padding_block_sizes(security_header, signature_size, message_type);
        if plain_text_block_size == 0 {
            return (0, 0);
        }

        // 8 is the sequence header
        let encrypt_size = 8 + body_size + signature_size + minimum_padding;
        let padding_size = if encrypt_size % plain_text_block_size != 0 {
            plain_text_block_size - (encrypt_size % plain_text_block_size)
        } else {
            0
        };
        (minimum_padding + padding_size, minimum_padding)
    }

    // Append padding bytes and space for the signature to an unsecured
    // chunk, updating the message size field.
    fn add_space_for_padding_and_signature(
        &self,
        message_chunk: &MessageChunk,
    ) -> Result<Vec<u8>, Error> {
        let chunk_info = message_chunk.chunk_info(self)?;
        let security_header = chunk_info.security_header;
        let signature_size = self.signature_size(&security_header);

        let (padding_size, minimum_padding) = self.padding_size(
            &security_header,
            chunk_info.body_length,
            signature_size,
            chunk_info.message_header.message_type,
        );

        let mut stream = Cursor::new(Vec::with_capacity(
            message_chunk.data.len() + padding_size + signature_size,
        ));
        stream.get_mut().extend_from_slice(&message_chunk.data);
        stream.set_position(message_chunk.data.len() as u64);

        if padding_size > 0 {
            // Each padding byte holds the padding count; with a two byte
            // padding header the high byte goes into the final extra byte.
            if minimum_padding == 1 {
                let padding_byte = ((padding_size - 1) & 0xff) as u8;
                let _ = write_bytes(&mut stream, padding_byte, padding_size)?;
            } else {
                let padding_byte = ((padding_size - 2) & 0xff) as u8;
                let extra_padding_byte = ((padding_size - 2) >> 8) as u8;
                let _ = write_bytes(&mut stream, padding_byte, padding_size - 1)?;
                write_u8(&mut stream, extra_padding_byte)?;
            }
        }

        // Zeroes where the signature will go
        let _ = write_bytes(&mut stream, 0u8, signature_size)?;

        let message_size = message_chunk.data.len() + padding_size + signature_size;
        Self::update_message_size_and_truncate(stream.into_inner(), message_size)
    }

    fn update_message_size(data: &mut [u8], message_size: usize) -> Result<(), Error> {
        let mut stream = Cursor::new(data);
        stream.set_position(MESSAGE_SIZE_OFFSET as u64);
        write_u32(&mut stream, message_size as u32)
    }

    /// Rewrite the message size field and truncate the buffer to it.
    pub fn update_message_size_and_truncate(
        mut data: Vec<u8>,
        message_size: usize,
    ) -> Result<Vec<u8>, Error> {
        Self::update_message_size(&mut data[..], message_size)?;
        data.truncate(message_size);
        Ok(data)
    }

    /// Apply security to a chunk, writing the signed and possibly encrypted
    /// result into `dst`. Returns the secured size.
    ///
    /// The chunk layout is:
    ///
    /// ```text
    /// S - Message Header
    /// S - Security Header
    /// S - Sequence Header - E
    /// S - Body            - E
    /// S - Padding         - E
    ///     Signature       - E
    /// ```
    pub fn apply_security(
        &self,
        message_chunk: &MessageChunk,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        if self.security_policy != SecurityPolicy::None
            && (self.security_mode == MessageSecurityMode::Sign
                || self.security_mode == MessageSecurityMode::SignAndEncrypt)
        {
            let decoding_options = self.decoding_options();
            let encrypted_data_offset = message_chunk.encrypted_data_offset(&decoding_options)?;

            let mut data = self.add_space_for_padding_and_signature(message_chunk)?;
            crate::debug::log_buffer("Chunk after padding", &data);

            let encrypted_range = encrypted_data_offset..data.len();
            let encrypted_size = if message_chunk.is_open_secure_channel(&decoding_options) {
                self.asymmetric_sign_and_encrypt(&mut data, encrypted_range, dst)?
            } else {
                let signed_range =
                    0..(data.len() - self.security_policy.symmetric_signature_size());
                self.symmetric_sign_and_encrypt(&mut data, signed_range, encrypted_range, dst)?
            };
            Ok(encrypted_size)
        } else {
            let size = message_chunk.data.len();
            if size > dst.len() {
                error!(
                    "Chunk size {} exceeds the destination buffer size {}",
                    size,
                    dst.len()
                );
                return Err(Error::new(
                    StatusCode::BadEncodingLimitsExceeded,
                    "Chunk exceeds the send buffer",
                ));
            }
            dst[..size].copy_from_slice(&message_chunk.data);
            Ok(size)
        }
    }

    /// Verify and remove the security of a received chunk: decrypt, check
    /// the signature and padding, and return the chunk truncated to its
    /// plain content.
    pub fn verify_and_remove_security(&mut self, src: &[u8]) -> Result<MessageChunk, Error> {
        let decoding_options = self.decoding_options();
        let (message_header, security_header, encrypted_data_offset) = {
            let mut stream = Cursor::new(&src);
            let message_header = MessageChunkHeader::decode(&mut stream, &decoding_options)?;
            let security_header = SecurityHeader::decode_from_stream(
                &mut stream,
                message_header.message_type.is_open_secure_channel(),
                &decoding_options,
            )?;
            (message_header, security_header, stream.position() as usize)
        };

        let message_size = message_header.message_size as usize;
        if message_size != src.len() {
            return Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!(
                    "Message size {} is not the size of the supplied buffer {}",
                    message_size,
                    src.len()
                ),
            ));
        }

        let data = if message_header.message_type.is_open_secure_channel() {
            // The protocol permits multi chunk OPN but this stack does not;
            // an OPN large enough to chunk is out of bounds.
            if message_header.is_final != MessageIsFinalType::Final {
                return Err(Error::new(
                    StatusCode::BadEncodingLimitsExceeded,
                    "OpenSecureChannel does not fit in a single chunk",
                ));
            }

            let SecurityHeader::Asymmetric(security_header) = security_header else {
                return Err(Error::new(
                    StatusCode::BadUnexpectedError,
                    "OPN chunk with a symmetric security header",
                ));
            };

            // The policy of the conversation is the one named in the header
            let security_policy_uri = security_header.security_policy_uri.as_ref();
            let security_policy = SecurityPolicy::from_uri(security_policy_uri);
            match security_policy {
                SecurityPolicy::Unknown => {
                    return Err(Error::new(
                        StatusCode::BadSecurityPolicyRejected,
                        format!("Security policy \"{}\" is unknown", security_policy_uri),
                    ));
                }
                SecurityPolicy::None => {
                    return Ok(MessageChunk { data: src.to_vec() });
                }
                _ => {}
            }
            self.security_policy = security_policy;

            // OPN messages are always signed and encrypted when security is
            // on, even in Sign mode. The sender certificate arrives inline
            // and is validated through the trust store before its key
            // verifies anything.
            if security_header.sender_certificate.is_null() {
                return Err(Error::new(
                    StatusCode::BadCertificateInvalid,
                    "Sender certificate is null",
                ));
            }
            let sender_certificate = X509::from_byte_string(&security_header.sender_certificate)?;
            if let Some(store) = &self.certificate_store {
                store.read().validate_remote_certificate(&sender_certificate)?;
            }
            let verification_key = sender_certificate.public_key()?;

            let encrypted_range = encrypted_data_offset..message_size;
            let mut decrypted_data = vec![0u8; message_size];
            let decrypted_size = self.asymmetric_decrypt_and_verify(
                security_policy,
                &verification_key,
                security_header.receiver_certificate_thumbprint,
                src,
                encrypted_range,
                &mut decrypted_data,
            )?;
            self.remote_cert = Some(sender_certificate);

            Self::update_message_size_and_truncate(decrypted_data, decrypted_size)?
        } else if self.security_policy != SecurityPolicy::None
            && (self.security_mode == MessageSecurityMode::Sign
                || self.security_mode == MessageSecurityMode::SignAndEncrypt)
        {
            let signature_size = self.security_policy.symmetric_signature_size();
            let encrypted_range = encrypted_data_offset..message_size;
            let signed_range = 0..(message_size - signature_size);

            let SecurityHeader::Symmetric(security_header) = security_header else {
                return Err(Error::new(
                    StatusCode::BadUnexpectedError,
                    "MSG chunk with an asymmetric security header",
                ));
            };

            let mut decrypted_data = vec![0u8; message_size];
            let decrypted_size = self.symmetric_decrypt_and_verify(
                src,
                signed_range,
                encrypted_range,
                security_header.token_id,
                &mut decrypted_data,
            )?;
            Self::update_message_size_and_truncate(decrypted_data, decrypted_size)?
        } else {
            src.to_vec()
        };

        Ok(MessageChunk { data })
    }

    // Sign with our private key, then encrypt everything after the plain
    // headers with the peer's public key into dst.
    fn asymmetric_sign_and_encrypt(
        &self,
        src: &mut [u8],
        encrypted_range: Range<usize>,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let header_size = encrypted_range.start;

        let signing_key = self.private_key.as_ref().ok_or_else(|| {
            Error::new(StatusCode::BadConfigurationError, "No private key to sign with")
        })?;
        let signing_key_size = signing_key.size();
        let signed_range = 0..(encrypted_range.end - signing_key_size);

        let encryption_key = self
            .remote_cert
            .as_ref()
            .ok_or_else(|| {
                Error::new(StatusCode::BadCertificateInvalid, "No peer certificate")
            })?
            .public_key()?;

        // Encryption changes the size of the chunk. Since signing happens
        // first the message size must already be the ciphered size.
        let cipher_text_size = {
            let padding = self.security_policy.asymmetric_encryption_padding();
            let plain_text_size = encrypted_range.end - encrypted_range.start;
            encryption_key.calculate_cipher_text_size(plain_text_size, padding)
        };
        Self::update_message_size(src, header_size + cipher_text_size)?;
        dst[..encrypted_range.start].copy_from_slice(&src[..encrypted_range.start]);

        // Sign message header, security header, sequence header, body, padding
        let (signed, signature) = src.split_at_mut(signed_range.end);
        self.security_policy.asymmetric_sign(
            signing_key,
            signed,
            &mut signature[..signing_key_size],
        )?;

        // Encrypt sequence header, body, padding and signature into dst
        let encrypted_size = self.security_policy.asymmetric_encrypt(
            &encryption_key,
            &src[encrypted_range.clone()],
            &mut dst[encrypted_range.start..],
        )?;
        debug_assert_eq!(encrypted_size, cipher_text_size);

        Ok(header_size + encrypted_size)
    }

    fn check_padding_bytes(
        padding_bytes: &[u8],
        expected_padding_byte: u8,
        padding_range_start: usize,
    ) -> Result<(), Error> {
        for (i, b) in padding_bytes.iter().enumerate() {
            if *b != expected_padding_byte {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    format!(
                        "Expected padding byte {}, got {} at index {}",
                        expected_padding_byte,
                        *b,
                        padding_range_start + i
                    ),
                ));
            }
        }
        Ok(())
    }

    // Verify the padding that ends right before `padding_end` and return
    // its range so the caller can strip it.
    fn verify_padding(
        &self,
        src: &[u8],
        key_size: usize,
        padding_end: usize,
    ) -> Result<Range<usize>, Error> {
        let padding_range = if key_size > 256 {
            // Two byte padding header: low byte repeated, high byte last
            let padding_byte = src[padding_end - 2];
            let extra_padding_byte = src[padding_end - 1];
            let padding_size = ((extra_padding_byte as usize) << 8) + (padding_byte as usize);
            let padding_range = (padding_end - padding_size - 2)..padding_end;
            Self::check_padding_bytes(
                &src[padding_range.start..(padding_range.end - 1)],
                padding_byte,
                padding_range.start,
            )?;
            padding_range
        } else {
            let padding_byte = src[padding_end - 1];
            let padding_size = padding_byte as usize;
            let padding_range = (padding_end - padding_size - 1)..padding_end;
            Self::check_padding_bytes(&src[padding_range.clone()], padding_byte, padding_range.start)?;
            padding_range
        };
        Ok(padding_range)
    }

    #[allow(clippy::too_many_arguments)]
    fn asymmetric_decrypt_and_verify(
        &self,
        security_policy: SecurityPolicy,
        verification_key: &uasc_crypto::PublicKey,
        receiver_thumbprint: ByteString,
        src: &[u8],
        encrypted_range: Range<usize>,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        // The thumbprint in the header names the certificate the peer
        // encrypted under, which must be ours.
        let our_cert = self.cert.as_ref().ok_or_else(|| {
            Error::new(StatusCode::BadConfigurationError, "No own certificate")
        })?;
        if our_cert.thumbprint().value() != receiver_thumbprint.as_ref() {
            return Err(Error::new(
                StatusCode::BadNoValidCertificates,
                "Thumbprint does not match the application certificate",
            ));
        }

        // Copy the plain headers over
        dst[..encrypted_range.start].copy_from_slice(&src[..encrypted_range.start]);

        let private_key = self.private_key.as_ref().ok_or_else(|| {
            Error::new(StatusCode::BadConfigurationError, "No private key")
        })?;
        let encrypted_size = encrypted_range.end - encrypted_range.start;
        let mut decrypted_tmp = vec![0u8; encrypted_size];
        let decrypted_size = security_policy.asymmetric_decrypt(
            private_key,
            &src[encrypted_range.clone()],
            &mut decrypted_tmp,
        )?;
        dst[encrypted_range.start..(encrypted_range.start + decrypted_size)]
            .copy_from_slice(&decrypted_tmp[..decrypted_size]);

        // The signature sits at the end of the decrypted data
        let signature_size = verification_key.size();
        let signature_dst_offset = encrypted_range.start + decrypted_size - signature_size;
        let signed_range_dst = 0..signature_dst_offset;
        let signature_range_dst = signature_dst_offset..(signature_dst_offset + signature_size);

        security_policy.asymmetric_verify_signature(
            verification_key,
            &dst[signed_range_dst],
            &dst[signature_range_dst],
        )?;

        // Padding is sized by the key that encrypted towards us, ours
        let key_size = our_cert
            .public_key()
            .map(|key| key.size())
            .unwrap_or_else(|_| verification_key.size());
        let padding_range = self.verify_padding(dst, key_size, signature_dst_offset)?;
        Ok(padding_range.start)
    }

    /// Symmetric path of [`SecureChannel::apply_security`]: sign in place,
    /// then encrypt into `dst` when the mode says so. Returns the written
    /// size.
    pub fn symmetric_sign_and_encrypt(
        &self,
        src: &mut [u8],
        signed_range: Range<usize>,
        encrypted_range: Range<usize>,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        match self.security_mode {
            MessageSecurityMode::None => {
                dst[..src.len()].copy_from_slice(src);
                Ok(src.len())
            }
            MessageSecurityMode::Sign => {
                let size = self.symmetric_sign_in_place(src, signed_range)?;
                dst[..size].copy_from_slice(&src[..size]);
                Ok(size)
            }
            MessageSecurityMode::SignAndEncrypt => {
                self.symmetric_sign_in_place(src, signed_range)?;

                // Encrypt sequence header, body, padding and signature
                let (key, iv) = self.encryption_keys();
                let encrypted_size = self.security_policy.symmetric_encrypt(
                    key,
                    iv,
                    &src[encrypted_range.clone()],
                    &mut dst[encrypted_range.start..],
                )?;
                dst[..encrypted_range.start].copy_from_slice(&src[..encrypted_range.start]);
                Ok(encrypted_range.start + encrypted_size)
            }
            MessageSecurityMode::Invalid => Err(Error::new(
                StatusCode::BadSecurityModeRejected,
                "Message security mode is invalid",
            )),
        }
    }

    fn symmetric_sign_in_place(
        &self,
        buf: &mut [u8],
        signed_range: Range<usize>,
    ) -> Result<usize, Error> {
        let signature_size = self.security_policy.symmetric_signature_size();
        let signing_key = self.signing_key();
        let (signed, signature) = buf.split_at_mut(signed_range.end);
        self.security_policy
            .symmetric_sign(signing_key, signed, &mut signature[..signature_size])?;
        Ok(signed_range.end + signature_size)
    }

    /// Symmetric path of [`SecureChannel::verify_and_remove_security`]:
    /// decrypt when the mode says so, verify the signature with the keys of
    /// `token_id`, verify padding, and return the plain size.
    pub fn symmetric_decrypt_and_verify(
        &self,
        src: &[u8],
        signed_range: Range<usize>,
        encrypted_range: Range<usize>,
        token_id: u32,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        match self.security_mode {
            MessageSecurityMode::None => {
                dst[..src.len()].copy_from_slice(src);
                Ok(src.len())
            }
            MessageSecurityMode::Sign => {
                dst[..src.len()].copy_from_slice(src);
                let signature_range = signed_range.end..src.len();
                let verification_key = self.verification_key(token_id).ok_or_else(|| {
                    Error::new(
                        StatusCode::BadTcpSecureChannelUnknown,
                        format!("No verification key for token {}", token_id),
                    )
                })?;
                self.security_policy.symmetric_verify_signature(
                    verification_key,
                    &dst[signed_range.clone()],
                    &dst[signature_range],
                )?;
                Ok(signed_range.end)
            }
            MessageSecurityMode::SignAndEncrypt => {
                // Copy the plain headers
                dst[..encrypted_range.start].copy_from_slice(&src[..encrypted_range.start]);

                // Decrypt the rest with the keys of the naming token
                let ciphertext_size = encrypted_range.end - encrypted_range.start;
                let (key, iv) = self.decryption_keys(token_id).ok_or_else(|| {
                    Error::new(
                        StatusCode::BadTcpSecureChannelUnknown,
                        format!("No decryption keys for token {}", token_id),
                    )
                })?;
                let mut decrypted_tmp = vec![0u8; ciphertext_size];
                let decrypted_size = self.security_policy.symmetric_decrypt(
                    key,
                    iv,
                    &src[encrypted_range.clone()],
                    &mut decrypted_tmp,
                )?;
                let encrypted_range =
                    encrypted_range.start..(encrypted_range.start + decrypted_size);
                dst[encrypted_range.clone()].copy_from_slice(&decrypted_tmp[..decrypted_size]);

                // Verify the signature at the end of the decrypted data
                let signature_range = (encrypted_range.end
                    - self.security_policy.symmetric_signature_size())
                    ..encrypted_range.end;
                let signature_start = signature_range.start;
                let verification_key = self.verification_key(token_id).ok_or_else(|| {
                    Error::new(
                        StatusCode::BadTcpSecureChannelUnknown,
                        format!("No verification key for token {}", token_id),
                    )
                })?;
                self.security_policy.symmetric_verify_signature(
                    verification_key,
                    &dst[signed_range],
                    &dst[signature_range],
                )?;

                let key_size = key.key_length();
                let padding_range = self.verify_padding(dst, key_size, signature_start)?;
                Ok(padding_range.start)
            }
            MessageSecurityMode::Invalid => Err(Error::new(
                StatusCode::BadSecurityModeRejected,
                "Message security mode is invalid",
            )),
        }
    }
}
