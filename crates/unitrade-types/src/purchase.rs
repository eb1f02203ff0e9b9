//! Purchase requests: the buy-now form, its validation and the chat draft it
//! turns into. Nothing here touches storage; the draft is handed to the chat
//! view as a pre-filled message.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::FieldErrors;

const RULE: &str = "──────────────────────────────────────────────────";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseForm {
    #[serde(default)]
    pub buyer_message: String,
    #[serde(default)]
    pub contact_info: String,
    /// `YYYY-MM-DDTHH:MM[:SS]`, as produced by a datetime-local input.
    #[serde(default)]
    pub pickup_time: String,
    #[serde(default)]
    pub pickup_location: String,
    #[serde(default)]
    pub payment_method: String,
}

/// Form fields in display order; the first invalid one gets focus.
pub const FORM_FIELDS: [&str; 5] = [
    "buyerMessage",
    "contactInfo",
    "pickupTime",
    "pickupLocation",
    "paymentMethod",
];

pub fn validate_purchase_form(form: &PurchaseForm) -> FieldErrors {
    let checks = [
        (FORM_FIELDS[0], &form.buyer_message, "Please enter a message for the seller"),
        (FORM_FIELDS[1], &form.contact_info, "Please provide your contact information"),
        (FORM_FIELDS[2], &form.pickup_time, "Please select a pickup time"),
        (FORM_FIELDS[3], &form.pickup_location, "Please select a pickup location"),
        (FORM_FIELDS[4], &form.payment_method, "Please select a payment method"),
    ];

    checks
        .into_iter()
        .filter(|(_, value, _)| value.trim().is_empty())
        .map(|(field, _, message)| (field.to_string(), message.to_string()))
        .collect()
}

/// The field the form should focus after a failed validation.
pub fn first_invalid_field(errors: &FieldErrors) -> Option<&'static str> {
    FORM_FIELDS.into_iter().find(|f| errors.contains_key(*f))
}

pub fn location_display_name(code: &str) -> &str {
    match code {
        "baraha" => "Baraha",
        "d2" => "D2 Dining Hall",
        "d1" => "D1 Dining Hall",
        "c2" => "C2",
        "welcome_centre" => "Welcome Centre",
        "convenience_store" => "Convenience Store",
        other => other,
    }
}

pub fn payment_display_name(code: &str) -> &str {
    match code {
        "campus_dihrams" => "Campus Dihrams",
        "falcon_dihrams" => "Falcon Dihrams",
        "cash" => "Cash",
        other => other,
    }
}

/// `2024-03-21T16:00:00` → `3/21/2024, 4:00:00 PM`. Unparseable input is
/// shown as-is.
pub fn format_pickup_time(raw: &str) -> String {
    let raw = raw.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local())
        })
        .map(|dt| dt.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// What the draft needs to know about the listing being bought.
#[derive(Debug, Clone, Copy)]
pub struct PurchaseProduct<'a> {
    pub title: &'a str,
    pub price: f64,
}

pub fn format_purchase_message(
    product: PurchaseProduct<'_>,
    buyer_email: &str,
    form: &PurchaseForm,
) -> String {
    format!(
        "📦 PURCHASE REQUEST: \"{title}\" (${price})\n\
         {RULE}\n\
         👤 Buyer: {buyer_email}\n\
         🕒 Pickup: {pickup}\n\
         📍 Location: {location}\n\
         💳 Payment: {payment}\n\
         📱 Contact: {contact}\n\
         {RULE}\n\
         💬 Message:\n\
         {message}",
        title = product.title,
        price = product.price,
        pickup = format_pickup_time(&form.pickup_time),
        location = location_display_name(form.pickup_location.trim()),
        payment = payment_display_name(form.payment_method.trim()),
        contact = form.contact_info.trim(),
        message = form.buyer_message.trim(),
    )
}

/// `/chats?room=<room>&message=<draft>` with the draft percent-encoded.
pub fn chat_redirect(room: &str, draft: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("room", room)
        .append_pair("message", draft)
        .finish();
    format!("/chats?{query}")
}
