// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! End to end secure conversation tests: chunks produced by one channel
//! must be accepted by the paired channel across every policy, mode and a
//! range of message sizes, including token rotation and tampering.

use std::sync::LazyLock;

use uasc_core::comms::{
    chunker::Chunker,
    message_chunk::{MessageChunk, MessageChunkType, MessageIsFinalType},
    secure_channel::SecureChannel,
    tcp_types::MIN_BUFFER_SIZE,
};
use uasc_core::{RequestMessage, ResponseMessage};
use uasc_crypto::{create_self_signed, PrivateKey, SecurityPolicy, X509};
use uasc_types::{
    ByteString, MessageSecurityMode, NodeId, ReadRequest, ReadValueId, RequestHeader, StatusCode,
    TimestampsToReturn,
};

const POLICIES: [SecurityPolicy; 5] = [
    SecurityPolicy::Basic128Rsa15,
    SecurityPolicy::Basic256,
    SecurityPolicy::Basic256Sha256,
    SecurityPolicy::Aes128Sha256RsaOaep,
    SecurityPolicy::Aes256Sha256RsaPss,
];

static CLIENT_PAIR: LazyLock<(PrivateKey, X509)> = LazyLock::new(|| {
    let key = PrivateKey::new(2048).unwrap();
    let cert = create_self_signed(&key, "client", 365).unwrap();
    (key, cert)
});

static SERVER_PAIR: LazyLock<(PrivateKey, X509)> = LazyLock::new(|| {
    let key = PrivateKey::new(2048).unwrap();
    let cert = create_self_signed(&key, "server", 365).unwrap();
    (key, cert)
});

/// Build a connected pair of channels with mirrored nonces and derived
/// symmetric keys, as both sides would be after a completed OPN exchange.
fn connected_pair(
    policy: SecurityPolicy,
    mode: MessageSecurityMode,
) -> (SecureChannel, SecureChannel) {
    let (client_key, client_cert) = &*CLIENT_PAIR;
    let (server_key, server_cert) = &*SERVER_PAIR;

    let mut client = SecureChannel::new_no_certificate_store();
    client.set_security_policy(policy);
    client.set_security_mode(mode);
    client.set_cert(Some(client_cert.clone()));
    client.set_private_key(Some(client_key.clone()));
    client.set_remote_cert(Some(server_cert.clone()));
    client.set_secure_channel_id(99);
    client.set_token_id(7);
    client.set_token_lifetime(60_000);

    let mut server = SecureChannel::new_no_certificate_store();
    server.set_security_policy(policy);
    server.set_security_mode(mode);
    server.set_cert(Some(server_cert.clone()));
    server.set_private_key(Some(server_key.clone()));
    server.set_remote_cert(Some(client_cert.clone()));
    server.set_secure_channel_id(99);
    server.set_token_id(7);
    server.set_token_lifetime(60_000);

    if policy != SecurityPolicy::None {
        let nonce_len = policy.secure_channel_nonce_length();
        let client_nonce: Vec<u8> = (0..nonce_len).map(|i| i as u8).collect();
        let server_nonce: Vec<u8> = (0..nonce_len).map(|i| (i as u8) ^ 0xff).collect();

        client.set_local_nonce(&client_nonce);
        client.set_remote_nonce(&server_nonce);
        client.derive_keys();

        server.set_local_nonce(&server_nonce);
        server.set_remote_nonce(&client_nonce);
        server.derive_keys();
    }

    (client, server)
}

fn secure_and_restore(
    sender: &SecureChannel,
    receiver: &mut SecureChannel,
    chunk: &MessageChunk,
) -> MessageChunk {
    let mut secured = vec![0u8; chunk.data.len() + 4096];
    let size = sender.apply_security(chunk, &mut secured).unwrap();
    secured.truncate(size);
    receiver.verify_and_remove_security(&secured).unwrap()
}

fn body_of(chunk: &MessageChunk, channel: &SecureChannel) -> Vec<u8> {
    let info = chunk.chunk_info(channel).unwrap();
    chunk.data[info.body_offset..info.body_offset + info.body_length].to_vec()
}

#[test]
fn symmetric_round_trip_every_policy_and_size() {
    // Block boundary sizes per the conversation's cipher block of 16
    let sizes = [1usize, 16, 17, 255, 256, 1024];
    for policy in POLICIES {
        for mode in [MessageSecurityMode::Sign, MessageSecurityMode::SignAndEncrypt] {
            let (client, mut server) = connected_pair(policy, mode);
            for size in sizes {
                let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
                let chunk = MessageChunk::new(
                    1,
                    1,
                    MessageChunkType::Message,
                    MessageIsFinalType::Final,
                    &client,
                    &body,
                )
                .unwrap();
                let restored = secure_and_restore(&client, &mut server, &chunk);
                assert_eq!(
                    body_of(&restored, &server),
                    body,
                    "policy {} mode {} size {}",
                    policy,
                    mode,
                    size
                );
            }
        }
    }
}

#[test]
fn none_policy_chunks_pass_through() {
    let (client, mut server) = connected_pair(SecurityPolicy::None, MessageSecurityMode::None);
    let body = vec![0xaau8; 64];
    let chunk = MessageChunk::new(
        5,
        2,
        MessageChunkType::Message,
        MessageIsFinalType::Final,
        &client,
        &body,
    )
    .unwrap();
    let mut secured = vec![0u8; chunk.data.len()];
    let size = client.apply_security(&chunk, &mut secured).unwrap();
    // No security, so the bytes go out exactly as constructed
    assert_eq!(&secured[..size], &chunk.data[..]);
    let restored = server.verify_and_remove_security(&secured[..size]).unwrap();
    assert_eq!(body_of(&restored, &server), body);
}

fn open_request(policy: SecurityPolicy, mode: MessageSecurityMode) -> RequestMessage {
    uasc_types::OpenSecureChannelRequest {
        request_header: RequestHeader::new(&NodeId::null(), 1, 10000),
        client_protocol_version: 0,
        request_type: uasc_types::SecurityTokenRequestType::Issue,
        security_mode: mode,
        client_nonce: if policy == SecurityPolicy::None {
            ByteString::null()
        } else {
            ByteString::from(vec![1u8; policy.secure_channel_nonce_length()])
        },
        requested_lifetime: 60_000,
    }
    .into()
}

#[test]
fn asymmetric_opn_round_trip_every_policy() {
    for policy in POLICIES {
        let (client, mut server) = connected_pair(policy, MessageSecurityMode::SignAndEncrypt);
        let request = open_request(policy, MessageSecurityMode::SignAndEncrypt);

        let chunks = Chunker::encode(1, 1, 0, 0, 0, &client, &request).unwrap();
        assert_eq!(chunks.len(), 1);

        let mut secured = vec![0u8; chunks[0].data.len() + 4096];
        let size = client.apply_security(&chunks[0], &mut secured).unwrap();
        let restored = server.verify_and_remove_security(&secured[..size]).unwrap();

        let decoded: RequestMessage = Chunker::decode(&[restored], &server, None).unwrap();
        assert_eq!(decoded, request, "policy {}", policy);
    }
}

#[test]
fn opn_with_none_policy_has_null_certs_on_the_wire() {
    let (client, _) = connected_pair(SecurityPolicy::None, MessageSecurityMode::None);
    let request = open_request(SecurityPolicy::None, MessageSecurityMode::None);
    let chunks = Chunker::encode(1, 1, 0, 0, 0, &client, &request).unwrap();
    let data = &chunks[0].data;

    assert_eq!(&data[..4], b"OPNF");
    // After the 12 byte header: policy uri, then two null byte strings
    let uri = SecurityPolicy::None.to_uri();
    let uri_len = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
    assert_eq!(uri_len, uri.len());
    assert_eq!(&data[16..16 + uri_len], uri.as_bytes());
    let after_uri = 16 + uri_len;
    assert_eq!(&data[after_uri..after_uri + 4], &[0xff, 0xff, 0xff, 0xff]);
    assert_eq!(
        &data[after_uri + 4..after_uri + 8],
        &[0xff, 0xff, 0xff, 0xff]
    );
    // Sequence header follows with sequence number 1, request id 1
    assert_eq!(&data[after_uri + 8..after_uri + 12], &1u32.to_le_bytes());
    assert_eq!(&data[after_uri + 12..after_uri + 16], &1u32.to_le_bytes());
}

#[test]
fn non_final_opn_is_rejected() {
    let (client, mut server) = connected_pair(SecurityPolicy::None, MessageSecurityMode::None);
    let chunk = MessageChunk::new(
        1,
        1,
        MessageChunkType::OpenSecureChannel,
        MessageIsFinalType::Intermediate,
        &client,
        &[0u8; 16],
    )
    .unwrap();
    let e = server.verify_and_remove_security(&chunk.data).unwrap_err();
    assert_eq!(e.status(), StatusCode::BadEncodingLimitsExceeded);
}

fn read_request_with(nodes: usize) -> RequestMessage {
    ReadRequest {
        request_header: RequestHeader::new(&NodeId::null(), 2, 10000),
        max_age: 0.0,
        timestamps_to_return: TimestampsToReturn::Both,
        nodes_to_read: Some(
            (0..nodes)
                .map(|i| ReadValueId::from(NodeId::new(1, i as u32 + 100_000)))
                .collect(),
        ),
    }
    .into()
}

#[test]
fn chunk_count_and_flags_for_large_messages() {
    let (client, _) = connected_pair(SecurityPolicy::None, MessageSecurityMode::None);
    // Roughly 5x the minimum buffer size of payload
    let request = read_request_with(3000);
    let chunks = Chunker::encode(1, 9, 0, MIN_BUFFER_SIZE, 0, &client, &request).unwrap();
    assert!(chunks.len() > 1);

    let opts = client.decoding_options();
    for (i, chunk) in chunks.iter().enumerate() {
        let header = chunk.message_header(&opts).unwrap();
        let expected = if i == chunks.len() - 1 {
            MessageIsFinalType::Final
        } else {
            MessageIsFinalType::Intermediate
        };
        assert_eq!(header.is_final, expected);
        assert!(chunk.data.len() <= MIN_BUFFER_SIZE);
    }

    let last = Chunker::validate_chunks(1, &client, &chunks).unwrap();
    assert_eq!(last, chunks.len() as u32);

    let decoded: RequestMessage = Chunker::decode(&chunks, &client, None).unwrap();
    assert_eq!(decoded, request);
}

#[test]
fn chunk_count_limit_is_enforced() {
    let (client, _) = connected_pair(SecurityPolicy::None, MessageSecurityMode::None);
    let request = read_request_with(3000);
    let e = Chunker::encode(1, 9, 0, MIN_BUFFER_SIZE, 2, &client, &request).unwrap_err();
    assert_eq!(e.status(), StatusCode::BadEncodingLimitsExceeded);
}

#[test]
fn multi_chunk_secured_message_round_trip() {
    for policy in [SecurityPolicy::Basic256Sha256, SecurityPolicy::Aes256Sha256RsaPss] {
        let (client, mut server) = connected_pair(policy, MessageSecurityMode::SignAndEncrypt);
        let request = read_request_with(3000);
        let chunks =
            Chunker::encode(1, 4, 0, MIN_BUFFER_SIZE, 0, &client, &request).unwrap();
        assert!(chunks.len() > 1);

        let restored: Vec<MessageChunk> = chunks
            .iter()
            .map(|chunk| secure_and_restore(&client, &mut server, chunk))
            .collect();
        let decoded: RequestMessage = Chunker::decode(&restored, &server, None).unwrap();
        assert_eq!(decoded, request);
    }
}

#[test]
fn sequence_validation_rejects_gaps() {
    let (client, _) = connected_pair(SecurityPolicy::None, MessageSecurityMode::None);
    let request = read_request_with(3000);
    let mut chunks = Chunker::encode(1, 9, 0, MIN_BUFFER_SIZE, 0, &client, &request).unwrap();
    // Drop an intermediate chunk, the validation must notice the gap
    chunks.remove(1);
    let e = Chunker::validate_chunks(1, &client, &chunks).unwrap_err();
    assert_eq!(e.status(), StatusCode::BadSequenceNumberInvalid);
}

#[test]
fn tampered_chunk_fails_verification() {
    let (client, mut server) =
        connected_pair(SecurityPolicy::Basic256Sha256, MessageSecurityMode::SignAndEncrypt);
    let chunk = MessageChunk::new(
        1,
        1,
        MessageChunkType::Message,
        MessageIsFinalType::Final,
        &client,
        &[1u8; 100],
    )
    .unwrap();
    let mut secured = vec![0u8; chunk.data.len() + 4096];
    let size = client.apply_security(&chunk, &mut secured).unwrap();
    // Flip a bit in the encrypted region
    secured[size - 1] ^= 0x01;
    assert!(server.verify_and_remove_security(&secured[..size]).is_err());
}

#[test]
fn token_rotation_with_sliding_keys() {
    let policy = SecurityPolicy::Basic256Sha256;
    let (mut client, mut server) =
        connected_pair(policy, MessageSecurityMode::SignAndEncrypt);

    // A chunk secured under the old token
    let old_chunk = MessageChunk::new(
        1,
        1,
        MessageChunkType::Message,
        MessageIsFinalType::Final,
        &client,
        &[7u8; 64],
    )
    .unwrap();
    let mut old_secured = vec![0u8; old_chunk.data.len() + 4096];
    let old_size = client.apply_security(&old_chunk, &mut old_secured).unwrap();

    // Simulate a RenewSecureChannel: both sides adopt token 8 with fresh
    // nonces and re-derive. The old remote keys stay behind under token 7.
    let nonce_len = policy.secure_channel_nonce_length();
    let new_client_nonce = vec![3u8; nonce_len];
    let new_server_nonce = vec![4u8; nonce_len];

    client.set_token_id(8);
    client.set_local_nonce(&new_client_nonce);
    client.set_remote_nonce(&new_server_nonce);
    client.derive_keys();

    server.set_token_id(8);
    server.set_local_nonce(&new_server_nonce);
    server.set_remote_nonce(&new_client_nonce);
    server.derive_keys();

    // The next outgoing chunk carries the new token id
    let new_chunk = MessageChunk::new(
        2,
        2,
        MessageChunkType::Message,
        MessageIsFinalType::Final,
        &client,
        &[9u8; 64],
    )
    .unwrap();
    let info = new_chunk.chunk_info(&client).unwrap();
    match info.security_header {
        uasc_core::comms::security_header::SecurityHeader::Symmetric(h) => {
            assert_eq!(h.token_id, 8)
        }
        _ => panic!("expected symmetric header"),
    }

    let mut new_secured = vec![0u8; new_chunk.data.len() + 4096];
    let new_size = client.apply_security(&new_chunk, &mut new_secured).unwrap();
    let restored = server
        .verify_and_remove_security(&new_secured[..new_size])
        .unwrap();
    assert_eq!(body_of(&restored, &server), vec![9u8; 64]);

    // Chunks under the previous token are still accepted in the grace
    // window because the old keys are kept per token id
    let restored_old = server
        .verify_and_remove_security(&old_secured[..old_size])
        .unwrap();
    assert_eq!(body_of(&restored_old, &server), vec![7u8; 64]);

    // A token the server never saw is rejected
    client.set_token_id(9);
    let unknown_chunk = MessageChunk::new(
        3,
        3,
        MessageChunkType::Message,
        MessageIsFinalType::Final,
        &client,
        &[1u8; 16],
    )
    .unwrap();
    let mut unknown_secured = vec![0u8; unknown_chunk.data.len() + 4096];
    let size = client
        .apply_security(&unknown_chunk, &mut unknown_secured)
        .unwrap();
    let e = server
        .verify_and_remove_security(&unknown_secured[..size])
        .unwrap_err();
    assert_eq!(e.status(), StatusCode::BadTcpSecureChannelUnknown);
}

#[test]
fn response_fast_path_decodes_publish() {
    use uasc_types::{NotificationMessage, PublishResponse, ResponseHeader};
    let (client, _) = connected_pair(SecurityPolicy::None, MessageSecurityMode::None);
    let response: ResponseMessage = PublishResponse {
        response_header: ResponseHeader {
            request_handle: 11,
            ..Default::default()
        },
        subscription_id: 1,
        available_sequence_numbers: None,
        more_notifications: false,
        notification_message: NotificationMessage::default(),
        results: None,
        diagnostic_infos: None,
    }
    .into();

    let chunks = Chunker::encode(1, 11, 0, 0, 0, &client, &response).unwrap();
    let decoded: ResponseMessage = Chunker::decode(&chunks, &client, None).unwrap();
    assert_eq!(decoded, response);
}
