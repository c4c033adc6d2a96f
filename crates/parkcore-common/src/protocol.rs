// Client <-> server realtime wire format. Tagged JSON frames: one
// discriminant, flat fields per variant.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Subscribe {
        parking_lot_id: Uuid,
        booking_date: NaiveDate,
        start_time: String,
        end_time: String,
    },
    BookSpot {
        spot_id: Uuid,
        parking_lot_id: Uuid,
        booking_date: NaiveDate,
        start_hour: u8,
        start_minute: u8,
        end_hour: u8,
        end_minute: u8,
    },
}

/// Messages the server may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SpotUpdate {
        spot_id: Uuid,
        available: bool,
    },
    BookingFailed {
        reason: String,
    },
    PaymentRedirect {
        url: String,
    },
    PaymentComplete {},
    SubscriptionError {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_round_trips_through_json() {
        let event = ClientEvent::Subscribe {
            parking_lot_id: Uuid::nil(),
            booking_date: NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(),
            start_time: "10:00".to_string(),
            end_time: "12:00".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"subscribe\""));
        let decoded: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn spot_update_tag_is_snake_case() {
        let event = ServerEvent::SpotUpdate { spot_id: Uuid::nil(), available: false };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "spot_update");
        assert_eq!(json["available"], false);
    }
}
