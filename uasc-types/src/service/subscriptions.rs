// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The subscription service subset the client engine uses: subscription
//! creation and the publish pipeline.

use super::binary_message;
use crate::{
    data_value::DataValue, date_time::DateTime, diagnostic_info::DiagnosticInfo,
    extension_object::ExtensionObject, request_header::RequestHeader,
    response_header::ResponseHeader, status_code::StatusCode,
};

/// Creates a subscription on the session.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// The publishing interval the client would like, in milliseconds.
    pub requested_publishing_interval: f64,
    /// Publishing intervals without activity before the subscription dies.
    pub requested_lifetime_count: u32,
    /// Publishing intervals between keep alive notifications.
    pub requested_max_keep_alive_count: u32,
    /// Most notifications in a single publish response, 0 for no limit.
    pub max_notifications_per_publish: u32,
    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
    /// Relative priority against the session's other subscriptions.
    pub priority: u8,
}

binary_message!(CreateSubscriptionRequest; CreateSubscriptionRequest_Encoding_DefaultBinary;
    request_header, requested_publishing_interval, requested_lifetime_count,
    requested_max_keep_alive_count, max_notifications_per_publish, publishing_enabled, priority);

/// Response to [`CreateSubscriptionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// Server assigned identifier of the subscription.
    pub subscription_id: u32,
    /// The granted publishing interval in milliseconds.
    pub revised_publishing_interval: f64,
    /// The granted lifetime count.
    pub revised_lifetime_count: u32,
    /// The granted keep alive count.
    pub revised_max_keep_alive_count: u32,
}

binary_message!(CreateSubscriptionResponse; CreateSubscriptionResponse_Encoding_DefaultBinary;
    response_header, subscription_id, revised_publishing_interval, revised_lifetime_count,
    revised_max_keep_alive_count);

/// Acknowledges receipt of a notification message so the server can drop
/// its retransmission copy.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionAcknowledgement {
    /// The subscription the message belonged to.
    pub subscription_id: u32,
    /// The sequence number being acknowledged.
    pub sequence_number: u32,
}

binary_message!(SubscriptionAcknowledgement; SubscriptionAcknowledgement_Encoding_DefaultBinary;
    subscription_id, sequence_number);

/// One notification of a monitored item value change.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemNotification {
    /// The client assigned handle of the monitored item.
    pub client_handle: u32,
    /// The changed value.
    pub value: DataValue,
}

binary_message!(MonitoredItemNotification; MonitoredItemNotification_Encoding_DefaultBinary;
    client_handle, value);

/// A batch of data change notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeNotification {
    /// The changed monitored items.
    pub monitored_items: Option<Vec<MonitoredItemNotification>>,
    /// Diagnostics per monitored item.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_message!(DataChangeNotification; DataChangeNotification_Encoding_DefaultBinary;
    monitored_items, diagnostic_infos);

/// Notification that the status of the subscription changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangeNotification {
    /// The new status.
    pub status: StatusCode,
    /// Diagnostics for the status.
    pub diagnostic_info: DiagnosticInfo,
}

binary_message!(StatusChangeNotification; StatusChangeNotification_Encoding_DefaultBinary;
    status, diagnostic_info);

/// A sequenced batch of notifications for one subscription.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationMessage {
    /// Sequence number of this message on its subscription.
    pub sequence_number: u32,
    /// When the message was published.
    pub publish_time: DateTime,
    /// The notifications: DataChangeNotification or
    /// StatusChangeNotification extension objects.
    pub notification_data: Option<Vec<ExtensionObject>>,
}

binary_message!(NotificationMessage; NotificationMessage_Encoding_DefaultBinary;
    sequence_number, publish_time, notification_data);

impl NotificationMessage {
    /// True if this is a keep alive, a message with no notifications.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data
            .as_ref()
            .map(|d| d.is_empty())
            .unwrap_or(true)
    }
}

/// Asks the server for the next notification message on any subscription.
/// The server parks the request until it has something to say.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Acknowledgements for messages received so far.
    pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
}

binary_message!(PublishRequest; PublishRequest_Encoding_DefaultBinary;
    request_header, subscription_acknowledgements);

/// Response to [`PublishRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// The subscription the notification message belongs to.
    pub subscription_id: u32,
    /// Sequence numbers of the messages the server still holds copies of.
    pub available_sequence_numbers: Option<Vec<u32>>,
    /// True if the server has more notifications queued.
    pub more_notifications: bool,
    /// The notification message itself.
    pub notification_message: NotificationMessage,
    /// Results for the acknowledgements in the request.
    pub results: Option<Vec<StatusCode>>,
    /// Diagnostics for the acknowledgements in the request.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_message!(PublishResponse; PublishResponse_Encoding_DefaultBinary;
    response_header, subscription_id, available_sequence_numbers, more_notifications,
    notification_message, results, diagnostic_infos);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryDecodable, BinaryEncodable, ContextOwned, Variant};

    #[test]
    fn publish_response_round_trip() {
        let response = PublishResponse {
            response_header: ResponseHeader {
                request_handle: 42,
                service_result: StatusCode::Good,
                ..Default::default()
            },
            subscription_id: 7,
            available_sequence_numbers: Some(vec![41, 42]),
            more_notifications: false,
            notification_message: NotificationMessage {
                sequence_number: 42,
                publish_time: DateTime::now(),
                notification_data: Some(vec![ExtensionObject::from_message(
                    DataChangeNotification {
                        monitored_items: Some(vec![MonitoredItemNotification {
                            client_handle: 1,
                            value: DataValue::from(Variant::Double(1.5)),
                        }]),
                        diagnostic_infos: None,
                    },
                )]),
            },
            results: Some(vec![StatusCode::Good]),
            diagnostic_infos: None,
        };

        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let buf = response.encode_to_vec(&ctx);
        assert_eq!(buf.len(), response.byte_len(&ctx));
        let mut c = std::io::Cursor::new(&buf);
        let decoded = PublishResponse::decode(&mut c, &ctx).unwrap();
        assert_eq!(decoded, response);

        // The notification data must come back as a typed body
        let data = &decoded.notification_message.notification_data.unwrap()[0];
        assert!(data.inner_as::<DataChangeNotification>().is_some());
    }

    #[test]
    fn keep_alive_has_no_notifications() {
        assert!(NotificationMessage::default().is_keep_alive());
    }
}
