//! The service calls the session makes: the establishment handshake, reads,
//! subscription creation and publish.

use log::{debug, error};

use uasc_core::ResponseMessage;
use uasc_crypto::{random, user_identity, SecurityPolicy, X509};
use uasc_types::{
    ActivateSessionRequest, AnonymousIdentityToken, ByteString, CloseSessionRequest,
    CreateSessionRequest, CreateSubscriptionRequest, DataValue, ExtensionObject, NamespaceMap,
    NodeId, PublishRequest, PublishResponse, ReadRequest, ReadValueId, SignatureData, StatusCode,
    SubscriptionAcknowledgement, TimestampsToReturn, UAString, UserTokenType, VariableId, Variant,
    X509IdentityToken,
};

use super::{process_service_result, process_unexpected_response, IdentityToken, Session};

/// The nonce length used for session nonces, fixed by the standard.
const SESSION_NONCE_LENGTH: usize = 32;

impl Session {
    /// Send CreateSession, validate the returned certificate and signature,
    /// and store the session id and authentication token.
    pub(crate) async fn create_session(&self) -> Result<(), StatusCode> {
        let client_certificate = {
            let store = self.certificate_store.read();
            store
                .read_own_cert()
                .map(|cert| cert.as_byte_string())
                .unwrap_or_else(|_| ByteString::null())
        };

        // A fresh nonce for every session attempt, the server signs it to
        // prove it holds the private key of its certificate
        let client_nonce = random::byte_string(SESSION_NONCE_LENGTH);
        *self.session_nonce.lock() = client_nonce.clone();

        let request = CreateSessionRequest {
            request_header: self.make_request_header(),
            client_description: self.application_description.clone(),
            server_uri: UAString::null(),
            endpoint_url: self.session_info.endpoint.endpoint_url.clone(),
            session_name: self.session_name.clone(),
            client_nonce: client_nonce.clone(),
            client_certificate: client_certificate.clone(),
            requested_session_timeout: self.config.session_timeout,
            max_response_message_size: 0,
        };

        let response = self
            .channel
            .send(request, self.config.request_timeout)
            .await?;
        let ResponseMessage::CreateSession(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        debug!("create_session success, session id {}", response.session_id);

        let security_policy = self.channel.security_policy();
        if self.security_checks_required(security_policy) {
            // The certificate returned must be the one the endpoint
            // advertised, anything else smells of a man in the middle
            let endpoint_cert = &self.session_info.endpoint.server_certificate;
            if !endpoint_cert.is_null() && endpoint_cert != &response.server_certificate {
                error!("Server certificate does not match the endpoint's certificate");
                return Err(StatusCode::BadCertificateInvalid);
            }
            let Ok(server_certificate) = X509::from_byte_string(&response.server_certificate)
            else {
                return Err(StatusCode::BadCertificateInvalid);
            };
            {
                let store = self.certificate_store.read();
                store
                    .validate_remote_certificate(&server_certificate)
                    .map_err(StatusCode::from)?;
            }

            // The server proves key ownership by signing our certificate
            // and nonce
            if security_policy != SecurityPolicy::None {
                user_identity::verify_signature_data(
                    &server_certificate,
                    security_policy,
                    &response.server_signature,
                    &client_certificate,
                    &client_nonce,
                )
                .map_err(|e| {
                    error!("Server signature verification failed: {}", e);
                    StatusCode::BadApplicationSignatureInvalid
                })?;
            }
        }

        self.session_id.store(std::sync::Arc::new(response.session_id.clone()));
        self.auth_token
            .store(std::sync::Arc::new(response.authentication_token.clone()));
        self.channel
            .update_from_created_session(&response.server_nonce, &response.server_certificate)?;
        Ok(())
    }

    // Security checks apply when the channel policy is not None, or any
    // user token policy of the endpoint requires encryption.
    fn security_checks_required(&self, security_policy: SecurityPolicy) -> bool {
        if security_policy != SecurityPolicy::None {
            return true;
        }
        self.session_info
            .endpoint
            .user_identity_tokens
            .as_ref()
            .map(|policies| {
                policies.iter().any(|policy| {
                    user_identity::token_security_policy(policy, security_policy)
                        != SecurityPolicy::None
                })
            })
            .unwrap_or(false)
    }

    /// Send ActivateSession with the client signature, the identity token
    /// and its signature.
    pub(crate) async fn activate_session(&self) -> Result<(), StatusCode> {
        let security_policy = self.channel.security_policy();

        let client_signature = if security_policy == SecurityPolicy::None {
            SignatureData::null()
        } else {
            let private_key = self
                .certificate_store
                .read()
                .read_own_pkey()
                .map_err(StatusCode::from)?;
            let secure_channel = self.channel.secure_channel.read();
            let server_cert = secure_channel.remote_cert_as_byte_string();
            let server_nonce = secure_channel.remote_nonce_as_byte_string();
            drop(secure_channel);
            if server_cert.is_null() || server_nonce.is_null() {
                error!("Cannot sign, the server certificate or nonce is missing");
                return Err(StatusCode::BadUnexpectedError);
            }
            user_identity::create_signature_data(
                &private_key,
                security_policy,
                &server_cert,
                &server_nonce,
            )
            .map_err(StatusCode::from)?
        };

        let identity = {
            let provider = self.identity_provider.lock().clone();
            match provider {
                Some(provider) => {
                    provider
                        .user_identity_token(&self.session_info.endpoint)
                        .await
                }
                None => self.session_info.user_identity_token.clone(),
            }
        };
        let (user_identity_token, user_token_signature) =
            self.build_user_identity_token(security_policy, &identity)?;

        let locale_ids = if self.session_info.preferred_locales.is_empty() {
            None
        } else {
            Some(
                self.session_info
                    .preferred_locales
                    .iter()
                    .map(UAString::from)
                    .collect(),
            )
        };

        let request = ActivateSessionRequest {
            request_header: self.make_request_header(),
            client_signature,
            client_software_certificates: None,
            locale_ids,
            user_identity_token,
            user_token_signature,
        };

        let response = self
            .channel
            .send(request, self.config.request_timeout)
            .await?;
        let ResponseMessage::ActivateSession(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        debug!("activate_session success");

        // The nonce returned here is signed on the next activation
        let mut secure_channel = self.channel.secure_channel.write();
        secure_channel.set_remote_nonce_from_byte_string(&response.server_nonce)?;
        Ok(())
    }

    // Package the configured identity per the endpoint's token policy.
    fn build_user_identity_token(
        &self,
        channel_policy: SecurityPolicy,
        identity: &IdentityToken,
    ) -> Result<(ExtensionObject, SignatureData), StatusCode> {
        let token_type = match identity {
            IdentityToken::Anonymous => UserTokenType::Anonymous,
            IdentityToken::UserName(_, _) => UserTokenType::UserName,
            IdentityToken::IssuedToken(_) => UserTokenType::IssuedToken,
            IdentityToken::X509(_, _) => UserTokenType::Certificate,
        };
        let Some(policy) = self.session_info.endpoint.find_policy(token_type) else {
            error!(
                "Endpoint has no user token policy for {:?}, cannot activate",
                token_type
            );
            return Err(StatusCode::BadIdentityTokenRejected);
        };

        let (server_cert, server_nonce) = {
            let secure_channel = self.channel.secure_channel.read();
            (
                secure_channel.remote_cert(),
                secure_channel.remote_nonce().to_vec(),
            )
        };

        match identity {
            IdentityToken::Anonymous => {
                let token = AnonymousIdentityToken {
                    policy_id: policy.policy_id.clone(),
                };
                Ok((ExtensionObject::from_message(token), SignatureData::null()))
            }
            IdentityToken::UserName(user, password) => {
                let token = user_identity::make_user_name_identity_token(
                    channel_policy,
                    policy,
                    server_cert.as_ref(),
                    &server_nonce,
                    user,
                    password,
                )
                .map_err(StatusCode::from)?;
                Ok((ExtensionObject::from_message(token), SignatureData::null()))
            }
            IdentityToken::IssuedToken(token_data) => {
                let token = user_identity::make_issued_identity_token(
                    channel_policy,
                    policy,
                    server_cert.as_ref(),
                    &server_nonce,
                    token_data,
                )
                .map_err(StatusCode::from)?;
                Ok((ExtensionObject::from_message(token), SignatureData::null()))
            }
            IdentityToken::X509(cert, key) => {
                let Some(server_cert) = server_cert else {
                    error!("X509 identity requires the server certificate for the signature");
                    return Err(StatusCode::BadCertificateInvalid);
                };
                let token_policy =
                    user_identity::token_security_policy(policy, channel_policy);
                let signature_policy = if token_policy == SecurityPolicy::None {
                    channel_policy
                } else {
                    token_policy
                };
                let user_token_signature = user_identity::create_signature_data(
                    key,
                    signature_policy,
                    &server_cert.as_byte_string(),
                    &ByteString::from(&server_nonce),
                )
                .map_err(StatusCode::from)?;
                let token = X509IdentityToken {
                    policy_id: policy.policy_id.clone(),
                    certificate_data: cert.as_byte_string(),
                };
                Ok((ExtensionObject::from_message(token), user_token_signature))
            }
        }
    }

    /// Close the session on the server.
    pub(crate) async fn close_session(&self) -> Result<(), StatusCode> {
        let request = CloseSessionRequest {
            request_header: self.make_request_header(),
            delete_subscriptions: true,
        };
        let response = self
            .channel
            .send(request, self.config.request_timeout)
            .await?;
        match response {
            ResponseMessage::CloseSession(response) => {
                process_service_result(&response.response_header)
            }
            other => Err(process_unexpected_response(other)),
        }
    }

    /// Read attribute values from the server.
    pub async fn read(
        &self,
        nodes_to_read: &[ReadValueId],
        timestamps_to_return: TimestampsToReturn,
        max_age: f64,
    ) -> Result<Vec<DataValue>, StatusCode> {
        let request = ReadRequest {
            request_header: self.make_request_header(),
            max_age,
            timestamps_to_return,
            nodes_to_read: Some(nodes_to_read.to_vec()),
        };
        let response = self
            .channel
            .send(request, self.config.request_timeout)
            .await?;
        match response {
            ResponseMessage::Read(response) => {
                process_service_result(&response.response_header)?;
                Ok(response.results.unwrap_or_default())
            }
            other => Err(process_unexpected_response(other)),
        }
    }

    /// Create a subscription, returning its id.
    pub async fn create_subscription(
        &self,
        publishing_interval: f64,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        priority: u8,
    ) -> Result<u32, StatusCode> {
        let request = CreateSubscriptionRequest {
            request_header: self.make_request_header(),
            requested_publishing_interval: publishing_interval,
            requested_lifetime_count: lifetime_count,
            requested_max_keep_alive_count: max_keep_alive_count,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority,
        };
        let response = self
            .channel
            .send(request, self.config.request_timeout)
            .await?;
        match response {
            ResponseMessage::CreateSubscription(response) => {
                process_service_result(&response.response_header)?;
                debug!("Created subscription {}", response.subscription_id);
                Ok(response.subscription_id)
            }
            other => Err(process_unexpected_response(other)),
        }
    }

    /// Issue one publish request acknowledging everything received so far
    /// and wait for its response.
    pub(crate) async fn publish(&self) -> Result<Box<PublishResponse>, StatusCode> {
        let subscription_acknowledgements = {
            let acks = self.publish_acks.lock();
            if acks.is_empty() {
                None
            } else {
                Some(
                    acks.iter()
                        .map(|(subscription_id, sequence_number)| SubscriptionAcknowledgement {
                            subscription_id: *subscription_id,
                            sequence_number: *sequence_number,
                        })
                        .collect(),
                )
            }
        };
        let request = PublishRequest {
            request_header: self
                .channel
                .make_request_header(self.config.publish_timeout),
            subscription_acknowledgements,
        };
        let response = self
            .channel
            .send(request, self.config.publish_timeout)
            .await?;
        match response {
            ResponseMessage::Publish(response) => {
                process_service_result(&response.response_header)?;
                Ok(response)
            }
            other => Err(process_unexpected_response(other)),
        }
    }

    /// Read Server_NamespaceArray and Server_ServerArray and install both
    /// tables on the channel's encoding context. NodeId resolution in later
    /// calls depends on these.
    pub(crate) async fn read_server_tables(&self) -> Result<(), StatusCode> {
        let results = self
            .read(
                &[
                    ReadValueId::from(NodeId::from(VariableId::Server_NamespaceArray)),
                    ReadValueId::from(NodeId::from(VariableId::Server_ServerArray)),
                ],
                TimestampsToReturn::Neither,
                0.0,
            )
            .await?;
        if results.len() != 2 {
            error!("Reading the server tables returned {} results", results.len());
            return Err(StatusCode::BadUnexpectedError);
        }

        if let Some(Variant::Array(array)) = &results[0].value {
            let namespaces = NamespaceMap::new_from_variant_array(&array.values).map_err(|e| {
                error!("Server namespace array is malformed: {}", e);
                StatusCode::BadUnexpectedError
            })?;
            self.set_namespaces(namespaces);
        } else {
            error!("Server namespace array is missing: {:?}", results[0]);
            return Err(StatusCode::BadNoData);
        }

        if let Some(Variant::Array(array)) = &results[1].value {
            let servers: Vec<String> = array
                .values
                .iter()
                .filter_map(|value| match value {
                    Variant::String(uri) => Some(uri.as_ref().to_owned()),
                    _ => None,
                })
                .collect();
            let secure_channel = self.channel.secure_channel.read();
            secure_channel.set_servers(servers);
        }
        Ok(())
    }
}
