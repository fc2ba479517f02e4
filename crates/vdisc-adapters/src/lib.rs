//! Listing record normalization: raw per-owner JSON into display-ready venue cards.

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use vdisc_core::{VenueCard, VenueStatus, PLACEHOLDER_IMAGE};
use vdisc_storage::ListingRecord;

pub const CRATE_NAME: &str = "vdisc-adapters";

pub const DEFAULT_CURRENCY: &str = "₱";
pub const UNTITLED_VENUE: &str = "Untitled venue";

/// Why a record produced no card.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("record has no id")]
    MissingId,
    #[error("record is hidden (status `{0}`)")]
    Hidden(String),
    #[error("record is not published")]
    Unpublished,
}

/// Normalize every record, dropping hidden or id-less ones. Input order is preserved.
pub fn normalize_all(records: &[ListingRecord]) -> Vec<VenueCard> {
    records
        .iter()
        .filter_map(|record| match normalize(record) {
            Ok(card) => Some(card),
            Err(reason) => {
                debug!(owner = %record.owner_key, %reason, "dropping listing");
                None
            }
        })
        .collect()
}

pub fn normalize(record: &ListingRecord) -> Result<VenueCard, SkipReason> {
    let raw = &record.raw;
    let id = record_id(raw).ok_or(SkipReason::MissingId)?;
    let status = visibility(raw)?;

    let city = first_str(raw, &[&["location", "city"], &["city"]]).unwrap_or_default();
    let region = first_str(
        raw,
        &[
            &["location", "region"],
            &["region"],
            &["location", "province"],
            &["province"],
        ],
    )
    .unwrap_or_default();
    let location = if !city.is_empty() {
        city.clone()
    } else {
        region.clone()
    };

    Ok(VenueCard {
        id,
        name: first_str(raw, &[&["name"], &["venueName"], &["title"]])
            .unwrap_or_else(|| UNTITLED_VENUE.to_string()),
        price: price_display(raw),
        location,
        image: main_image(raw).unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string()),
        amenities: name_list(raw, &["amenities"]),
        rating: json_f64(raw, &["rating"])
            .or_else(|| json_f64(raw, &["averageRating"]))
            .unwrap_or(0.0),
        status,
        city_key: city.to_lowercase(),
        region_key: region.to_lowercase(),
        occasion_keys: occasion_keys(raw),
        is_placeholder: false,
    })
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

/// Numbers, or strings that parse as numbers.
fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn json_bool(value: &JsonValue, path: &[&str]) -> Option<bool> {
    match json_at(value, path)? {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        JsonValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// First non-blank string among the candidate paths.
fn first_str(value: &JsonValue, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| json_str(value, path).and_then(text_or_none))
}

fn record_id(raw: &JsonValue) -> Option<String> {
    match raw.get("id")? {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn status_token(raw: &JsonValue) -> Option<String> {
    first_str(raw, &[&["status"], &["visibility"]]).map(|s| {
        s.to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect()
    })
}

fn visibility(raw: &JsonValue) -> Result<VenueStatus, SkipReason> {
    let published = json_bool(raw, &["published"]);
    if published == Some(false) {
        return Err(SkipReason::Unpublished);
    }
    match status_token(raw).as_deref() {
        Some(s @ ("unlisted" | "draft")) => Err(SkipReason::Hidden(s.to_string())),
        // A live venue whose edit is under review keeps showing; a first submission does not.
        Some("in_review" | "pending_review") if published == Some(true) => Ok(VenueStatus::InReview),
        Some(s @ ("in_review" | "pending_review")) => Err(SkipReason::Hidden(s.to_string())),
        _ => Ok(VenueStatus::Listed),
    }
}

fn photo_url(photo: &JsonValue) -> Option<String> {
    match photo {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Object(_) => first_str(photo, &[&["url"], &["src"], &["dataUrl"]]),
        _ => None,
    }
}

fn is_main_photo(photo: &JsonValue) -> bool {
    ["isMain", "main", "is_main", "primary"]
        .into_iter()
        .any(|flag| json_bool(photo, &[flag]) == Some(true))
}

/// The photo flagged main, else the first usable one.
fn main_image(raw: &JsonValue) -> Option<String> {
    let photos = json_at(raw, &["photos"])
        .or_else(|| json_at(raw, &["images"]))?
        .as_array()?;
    photos
        .iter()
        .filter(|p| is_main_photo(p))
        .find_map(photo_url)
        .or_else(|| photos.iter().find_map(photo_url))
}

fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{rate:.0}")
    } else {
        format!("{rate:.2}")
    }
}

fn is_per_head(rate_type: &str) -> bool {
    let squashed = rate_type
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>();
    squashed == "perhead"
}

fn price_display(raw: &JsonValue) -> String {
    let currency = first_str(raw, &[&["pricing", "currency"], &["currency"]])
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let rate_paths: [&[&str]; 4] = [&["pricing", "rate"], &["pricing", "price"], &["price"], &["rate"]];
    let rate = rate_paths
        .iter()
        .find_map(|path| json_f64(raw, path))
        .map(format_rate)
        .unwrap_or_else(|| "0".to_string());
    let rate_type = first_str(
        raw,
        &[
            &["pricing", "rateType"],
            &["pricing", "rate_type"],
            &["rateType"],
            &["pricingType"],
        ],
    )
    .unwrap_or_default();

    if is_per_head(&rate_type) {
        format!("{currency}{rate}/head")
    } else {
        format!("{currency}{rate}")
    }
}

/// Strings, or objects carrying `name` (falling back to `id`).
fn entry_name(entry: &JsonValue) -> Option<String> {
    match entry {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Object(_) => first_str(entry, &[&["name"], &["id"]]),
        _ => None,
    }
}

fn name_list(raw: &JsonValue, path: &[&str]) -> Vec<String> {
    json_at(raw, path)
        .and_then(JsonValue::as_array)
        .map(|arr| arr.iter().filter_map(entry_name).collect())
        .unwrap_or_default()
}

fn occasion_keys(raw: &JsonValue) -> Vec<String> {
    let list = ["occasions", "selectedOccasions", "occasionTypes"]
        .into_iter()
        .map(|key| name_list(raw, &[key]))
        .find(|list| !list.is_empty())
        .unwrap_or_default();
    let mut keys: Vec<String> = Vec::with_capacity(list.len());
    for key in list.into_iter().map(|k| k.to_lowercase()) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(raw: JsonValue) -> ListingRecord {
        ListingRecord::new("venue_listings_owner-1", raw)
    }

    #[test]
    fn full_record_normalizes_into_card() {
        let card = normalize(&record(json!({
            "id": "v-1",
            "name": "Harbor Hall",
            "status": "listed",
            "photos": [
                {"url": "https://img/1.jpg"},
                {"url": "https://img/2.jpg", "isMain": true}
            ],
            "pricing": {"currency": "₱", "rate": 850, "rateType": "Per Head"},
            "location": {"city": "Cebu City", "region": "Central Visayas"},
            "amenities": ["Parking", {"name": "Aircon"}],
            "rating": 4.5,
            "occasions": ["Wedding", {"name": "Birthday"}, {"id": "FUNERAL"}, "wedding"]
        })))
        .unwrap();

        assert_eq!(card.id, "v-1");
        assert_eq!(card.image, "https://img/2.jpg");
        assert_eq!(card.price, "₱850/head");
        assert_eq!(card.location, "Cebu City");
        assert_eq!(card.city_key, "cebu city");
        assert_eq!(card.region_key, "central visayas");
        assert_eq!(card.amenities, vec!["Parking", "Aircon"]);
        assert_eq!(card.occasion_keys, vec!["wedding", "birthday", "funeral"]);
        assert_eq!(card.status, VenueStatus::Listed);
        assert!(!card.is_placeholder);
    }

    #[test]
    fn missing_optional_fields_are_defaulted() {
        let card = normalize(&record(json!({"id": 42}))).unwrap();
        assert_eq!(card.id, "42");
        assert_eq!(card.name, UNTITLED_VENUE);
        assert_eq!(card.image, PLACEHOLDER_IMAGE);
        assert_eq!(card.price, "₱0");
        assert_eq!(card.location, "");
        assert!(card.amenities.is_empty());
        assert_eq!(card.rating, 0.0);
        assert!(card.occasion_keys.is_empty());
    }

    #[test]
    fn location_falls_back_to_region_and_first_photo_is_used() {
        let card = normalize(&record(json!({
            "id": "v-2",
            "region": "Lapu-Lapu",
            "photos": ["https://img/a.jpg", "https://img/b.jpg"],
            "pricing": {"currency": "$", "rate": "12000", "rateType": "whole event"}
        })))
        .unwrap();
        assert_eq!(card.location, "Lapu-Lapu");
        assert_eq!(card.city_key, "");
        assert_eq!(card.image, "https://img/a.jpg");
        assert_eq!(card.price, "$12000");
    }

    #[test]
    fn hidden_statuses_and_missing_ids_are_dropped() {
        assert_eq!(normalize(&record(json!({"name": "x"}))), Err(SkipReason::MissingId));
        assert_eq!(
            normalize(&record(json!({"id": "a", "status": "Draft"}))),
            Err(SkipReason::Hidden("draft".into()))
        );
        assert_eq!(
            normalize(&record(json!({"id": "a", "status": "unlisted"}))),
            Err(SkipReason::Hidden("unlisted".into()))
        );
        assert_eq!(
            normalize(&record(json!({"id": "a", "status": "in-review"}))),
            Err(SkipReason::Hidden("in_review".into()))
        );
        assert_eq!(
            normalize(&record(json!({"id": "a", "published": false}))),
            Err(SkipReason::Unpublished)
        );
    }

    #[test]
    fn published_venue_under_review_stays_visible() {
        let card = normalize(&record(json!({"id": "a", "status": "in_review", "published": true}))).unwrap();
        assert_eq!(card.status, VenueStatus::InReview);
        let card = normalize(&record(json!({"id": "b", "status": "archived-ish"}))).unwrap();
        assert_eq!(card.status, VenueStatus::Listed);
    }

    #[test]
    fn normalize_all_preserves_order_and_skips() {
        let cards = normalize_all(&[
            record(json!({"id": "1"})),
            record(json!({"status": "listed"})),
            record(json!({"id": "3", "status": "draft"})),
            record(json!({"id": "4"})),
        ]);
        assert_eq!(cards.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["1", "4"]);
    }
}
