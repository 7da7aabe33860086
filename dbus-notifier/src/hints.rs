//! Notification hints and their wire representation.
//!
//! [`Hints`] is the typed, caller-facing form. [`Hints::to_wire`] turns it
//! into the `a{sv}` dictionary sent with `Notify`, using the fixed key and
//! type table of the freedesktop notification specification:
//!
//! | field            | key              | type         |
//! |------------------|------------------|--------------|
//! | `action_icons`   | `action-icons`   | `b`          |
//! | `category`       | `category`       | `s`          |
//! | `desktop_entry`  | `desktop-entry`  | `s`          |
//! | `image_data`     | `image-data`     | `(iiibiiay)` |
//! | `image_path`     | `image-path`     | `s`          |
//! | `resident`       | `resident`       | `b`          |
//! | `sound_file`     | `sound-file`     | `s`          |
//! | `sound_name`     | `sound-name`     | `s`          |
//! | `suppress_sound` | `suppress-sound` | `b`          |
//! | `transient`      | `transient`      | `b`          |
//! | `x`              | `x`              | `i`          |
//! | `y`              | `y`              | `i`          |
//! | `urgency`        | `urgency`        | `y`          |
//! | `value`          | `value`          | `i`          |

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{NotifierError, Result};

/// Urgency levels accepted by the `urgency` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Urgency {
    Low = 0,
    Normal = 1,
    Critical = 2,
}

impl From<Urgency> for u8 {
    fn from(urgency: Urgency) -> Self {
        urgency as u8
    }
}

/// Raw image passed inline with the notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageData {
    pub width: i32,
    pub height: i32,
    pub has_alpha: bool,
    /// RGB or RGBA bytes, row by row, without padding.
    pub data: Vec<u8>,
}

impl ImageData {
    pub const BITS_PER_SAMPLE: i32 = 8;

    pub fn channels(&self) -> i32 {
        if self.has_alpha {
            4
        } else {
            3
        }
    }

    /// Bytes per row, or `None` if it does not fit the wire's `i32`.
    pub fn rowstride(&self) -> Option<i32> {
        self.width.checked_mul(self.channels())
    }

    fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(NotifierError::InvalidHint {
                hint: "image-data",
                reason: format!("invalid geometry {}x{}", self.width, self.height),
            });
        }
        let expected = self
            .rowstride()
            .and_then(|rowstride| usize::try_from(rowstride).ok())
            .and_then(|rowstride| rowstride.checked_mul(self.height as usize))
            .ok_or_else(|| NotifierError::InvalidHint {
                hint: "image-data",
                reason: format!("geometry {}x{} is too large", self.width, self.height),
            })?;
        if self.data.len() != expected {
            return Err(NotifierError::InvalidHint {
                hint: "image-data",
                reason: format!("expected {} bytes, got {}", expected, self.data.len()),
            });
        }
        Ok(())
    }
}

/// A single hint value tagged with its D-Bus type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintValue {
    Boolean(bool),
    String(String),
    Int32(i32),
    Byte(u8),
    Image(ImageData),
}

impl HintValue {
    /// D-Bus signature of the value inside the variant.
    pub fn signature(&self) -> &'static str {
        match self {
            HintValue::Boolean(_) => "b",
            HintValue::String(_) => "s",
            HintValue::Int32(_) => "i",
            HintValue::Byte(_) => "y",
            HintValue::Image(_) => "(iiibiiay)",
        }
    }
}

/// Optional hints of a notification. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Hints {
    pub action_icons: Option<bool>,
    /// Type of notification, e.g. `"transfer.complete"`.
    pub category: Option<String>,
    /// Name of the desktop file of the sending program, without `.desktop`.
    pub desktop_entry: Option<String>,
    pub image_data: Option<ImageData>,
    pub image_path: Option<String>,
    /// Keep the notification after an action was invoked.
    pub resident: Option<bool>,
    pub sound_file: Option<String>,
    pub sound_name: Option<String>,
    pub suppress_sound: Option<bool>,
    /// Bypass the server's persistence.
    pub transient: Option<bool>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub urgency: Option<Urgency>,
    /// Progress value; not part of the specification but widely supported.
    pub value: Option<i32>,
}

impl Hints {
    /// Translates the set fields into wire keys and typed values.
    pub fn to_wire(&self) -> Result<BTreeMap<&'static str, HintValue>> {
        let mut wire = BTreeMap::new();

        put(&mut wire, "action-icons", self.action_icons.map(HintValue::Boolean));
        put(&mut wire, "category", self.category.clone().map(HintValue::String));
        put(&mut wire, "desktop-entry", self.desktop_entry.clone().map(HintValue::String));
        if let Some(image) = &self.image_data {
            image.validate()?;
            wire.insert("image-data", HintValue::Image(image.clone()));
        }
        put(&mut wire, "image-path", self.image_path.clone().map(HintValue::String));
        put(&mut wire, "resident", self.resident.map(HintValue::Boolean));
        put(&mut wire, "sound-file", self.sound_file.clone().map(HintValue::String));
        put(&mut wire, "sound-name", self.sound_name.clone().map(HintValue::String));
        put(&mut wire, "suppress-sound", self.suppress_sound.map(HintValue::Boolean));
        put(&mut wire, "transient", self.transient.map(HintValue::Boolean));
        put(&mut wire, "x", self.x.map(HintValue::Int32));
        put(&mut wire, "y", self.y.map(HintValue::Int32));
        put(&mut wire, "urgency", self.urgency.map(|u| HintValue::Byte(u.into())));
        put(&mut wire, "value", self.value.map(HintValue::Int32));

        Ok(wire)
    }
}

fn put(wire: &mut BTreeMap<&'static str, HintValue>, key: &'static str, value: Option<HintValue>) {
    if let Some(value) = value {
        wire.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_hints_produce_empty_map() {
        assert!(Hints::default().to_wire().unwrap().is_empty());
    }

    #[test]
    fn test_key_and_type_translation() {
        let hints = Hints {
            action_icons: Some(true),
            category: Some("im.received".to_string()),
            desktop_entry: Some("org.example.Chat".to_string()),
            image_path: Some("/tmp/avatar.png".to_string()),
            resident: Some(false),
            sound_file: Some("/usr/share/sounds/ping.oga".to_string()),
            sound_name: Some("message-new-instant".to_string()),
            suppress_sound: Some(true),
            transient: Some(true),
            x: Some(-10),
            y: Some(20),
            urgency: Some(Urgency::Critical),
            value: Some(75),
            image_data: None,
        };
        let wire = hints.to_wire().unwrap();

        let signatures: Vec<(&str, &str)> = wire.iter().map(|(k, v)| (*k, v.signature())).collect();
        assert_eq!(
            signatures,
            vec![
                ("action-icons", "b"),
                ("category", "s"),
                ("desktop-entry", "s"),
                ("image-path", "s"),
                ("resident", "b"),
                ("sound-file", "s"),
                ("sound-name", "s"),
                ("suppress-sound", "b"),
                ("transient", "b"),
                ("urgency", "y"),
                ("value", "i"),
                ("x", "i"),
                ("y", "i"),
            ]
        );
        assert_eq!(wire["urgency"], HintValue::Byte(2));
        assert_eq!(wire["x"], HintValue::Int32(-10));
        assert_eq!(wire["desktop-entry"], HintValue::String("org.example.Chat".to_string()));
    }

    #[test]
    fn test_image_data_geometry_is_checked() {
        let good = ImageData { width: 2, height: 1, has_alpha: true, data: vec![0; 8] };
        assert_eq!(good.rowstride(), Some(8));
        let hints = Hints { image_data: Some(good), ..Hints::default() };
        assert_eq!(hints.to_wire().unwrap()["image-data"].signature(), "(iiibiiay)");

        let short = ImageData { width: 2, height: 2, has_alpha: false, data: vec![0; 6] };
        let err = Hints { image_data: Some(short), ..Hints::default() }.to_wire().unwrap_err();
        assert!(matches!(err, NotifierError::InvalidHint { hint: "image-data", .. }));
    }

    #[test]
    fn test_oversized_image_geometry_is_rejected() {
        let huge = ImageData { width: 600_000_000, height: 1, has_alpha: true, data: Vec::new() };
        assert_eq!(huge.rowstride(), None);
        let err = Hints { image_data: Some(huge), ..Hints::default() }.to_wire().unwrap_err();
        assert!(matches!(err, NotifierError::InvalidHint { hint: "image-data", .. }));

        let tall = ImageData { width: 1, height: i32::MAX, has_alpha: false, data: vec![0; 3] };
        let err = Hints { image_data: Some(tall), ..Hints::default() }.to_wire().unwrap_err();
        assert!(matches!(err, NotifierError::InvalidHint { hint: "image-data", .. }));
    }

    #[test]
    fn test_hints_deserialize_from_toml() {
        let hints: Hints = toml::from_str("urgency = \"low\"\ntransient = true\n").unwrap();
        assert_eq!(hints.urgency, Some(Urgency::Low));
        assert_eq!(hints.transient, Some(true));
        assert_eq!(hints.category, None);
    }
}
