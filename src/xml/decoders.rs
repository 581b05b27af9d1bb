use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use uuid::Uuid;

pub(crate) fn keepass_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("constant epoch")
}

/// Decode a UUID from a Keepass XML file
///
/// UUIDs in Keepass XML files are stored base 64 encoded
pub(crate) fn decode_uuid(b64uuid: &str) -> Option<Uuid> {
    let decoded = BASE64_STANDARD.decode(b64uuid).ok()?;
    Uuid::from_slice(&decoded).ok()
}

pub(crate) fn decode_datetime_b64(b64date: &str) -> Option<NaiveDateTime> {
    let decoded = BASE64_STANDARD.decode(b64date).ok()?;
    let mut bytes = [0u8; 8];
    for i in 0..usize::min(bytes.len(), decoded.len()) {
        bytes[i] = decoded[i];
    }
    let timestamp = Duration::seconds(i64::from_le_bytes(bytes));

    keepass_epoch().checked_add_signed(timestamp)
}

/// Decode a datetime from a Keepass XML file
///
/// Handles either ISO8601 date strings or base64 encoded seconds since
/// 1/1/1 00:00:00 as written by current clients
pub(crate) fn decode_datetime(strdate: &str) -> Option<NaiveDateTime> {
    if strdate.contains('-') {
        let dt = DateTime::parse_from_rfc3339(strdate).ok()?;
        Some(dt.naive_utc())
    } else {
        decode_datetime_b64(strdate)
    }
}

pub(crate) fn encode_uuid(uuid: &Uuid) -> String {
    BASE64_STANDARD.encode(uuid.as_bytes())
}

pub(crate) fn encode_datetime(date: NaiveDateTime) -> String {
    let epoch_seconds = date.signed_duration_since(keepass_epoch()).num_seconds();
    BASE64_STANDARD.encode(epoch_seconds.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_round_trips() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        let encoded = encode_datetime(date);
        assert_eq!(decode_datetime(&encoded), Some(date));
    }

    #[test]
    fn uuid_round_trips() {
        let uuid = Uuid::new_v4();
        assert_eq!(decode_uuid(&encode_uuid(&uuid)), Some(uuid));
    }

    #[test]
    fn iso_datetimes_accepted() {
        let parsed = decode_datetime("2020-01-02T03:04:05Z").unwrap();
        let expected = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(parsed, expected);
    }
}
