//! Best-effort metadata extraction from LiveKit-style room names.
//!
//! A room name alone cannot resolve `tenant_id` (that requires a DB lookup
//! of the DID or campaign id), but it frequently encodes a phone number or
//! campaign hint worth recording on the `UpstreamCallEvent` metadata when
//! present.

/// Extract an E.164-formatted phone number from an inbound call room name.
///
/// Pattern: `sip-{did_digits}__{timestamp}__{random}`, e.g.
/// `sip-7678189426__1730000000__abc123` → `+17678189426`.
pub fn extract_phone_number_from_room_name(room_name: &str) -> Option<String> {
    let rest = room_name.strip_prefix("sip-")?;
    let parts: Vec<&str> = room_name.split("__").collect();
    if parts.len() < 2 {
        return None;
    }
    let did = rest.split("__").next().unwrap_or(rest);

    if did.len() == 10 {
        Some(format!("+1{did}"))
    } else {
        Some(format!("+{did}"))
    }
}

/// Extract the campaign id from an outbound call room name.
///
/// Pattern: `campaign-{campaign_id}__lead-{lead_id}__{timestamp}`, e.g.
/// `campaign-C123__lead-L456__1730000000` → `C123`.
pub fn extract_campaign_id_from_room_name(room_name: &str) -> Option<String> {
    let rest = room_name.strip_prefix("campaign-")?;
    let parts: Vec<&str> = room_name.split("__").collect();
    if parts.len() < 2 {
        return None;
    }
    let campaign_id = rest.split("__").next().unwrap_or(rest);
    Some(campaign_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ten_digit_phone_number() {
        assert_eq!(
            extract_phone_number_from_room_name("sip-7678189426__1730000000__abc123"),
            Some("+17678189426".to_string())
        );
    }

    #[test]
    fn extracts_eleven_digit_phone_number_with_country_code() {
        assert_eq!(
            extract_phone_number_from_room_name("sip-17678189426__1730000000__abc"),
            Some("+17678189426".to_string())
        );
    }

    #[test]
    fn non_sip_room_name_yields_none() {
        assert_eq!(extract_phone_number_from_room_name("campaign-C1__lead-L1__1"), None);
    }

    #[test]
    fn extracts_campaign_id() {
        assert_eq!(
            extract_campaign_id_from_room_name("campaign-C123__lead-L456__1730000000"),
            Some("C123".to_string())
        );
    }

    #[test]
    fn non_campaign_room_name_yields_none() {
        assert_eq!(extract_campaign_id_from_room_name("sip-123__456__abc"), None);
    }

    #[test]
    fn missing_separator_yields_none() {
        assert_eq!(extract_phone_number_from_room_name("sip-123"), None);
        assert_eq!(extract_campaign_id_from_room_name("campaign-C1"), None);
    }
}
