//! Fingerprint strategies
//!
//! A fingerprint derives the identity key used for windowing and throttling
//! from a message. Two messages with the same fingerprint are counted in
//! the same window.

use std::sync::Arc;

use logalike_types::Message;

/// A deterministic message-to-key function.
pub type Fingerprint = Arc<dyn Fn(&Message) -> String + Send + Sync>;

/// A fingerprint that reads the string value of the given field, defaulting
/// to the empty string when the field is absent or not a string.
pub fn field_fingerprint(field: impl Into<String>) -> Fingerprint {
    let field = field.into();
    Arc::new(move |message: &Message| {
        message.get_str(&field).unwrap_or_default().to_owned()
    })
}
