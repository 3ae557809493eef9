//! Annotations attached to imported images.

use serde::{Deserialize, Serialize};

use crate::models::metadata::{
    COMMENT_KEY, DESCRIPTION_KEY, IMAGE_TYPE_KEY, INSTRUMENT_KEY, LENS_MAGNIFICATION_KEY, Metadata,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    Comment { text: String },
    Map { key: String, value: String },
    Tag { value: String },
}

/// Build the annotation set from merged metadata and the caller's tags.
///
/// Every key except `Comment` becomes a map annotation. Each caller tag becomes
/// a `"<key> <value>"` tag unless its value is `None`. Instrument, lens
/// magnification and image type are tagged as well.
pub fn build_annotations(metadata: &Metadata, tags: &Metadata) -> Vec<Annotation> {
    let mut annotations = Vec::new();

    for (key, value) in metadata.iter() {
        if key == COMMENT_KEY {
            if !value.trim().is_empty() {
                annotations.push(Annotation::Comment {
                    text: value.to_string(),
                });
            }
            continue;
        }
        annotations.push(Annotation::Map {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    let mut tag_values: Vec<String> = tags
        .iter()
        .filter(|(_, value)| *value != "None")
        .map(|(key, value)| format!("{} {}", key, value))
        .collect();

    if let Some(instrument) = metadata.instrument() {
        tag_values.push(instrument.to_string());
    }
    if let Some(lens) = metadata.get(LENS_MAGNIFICATION_KEY).filter(|v| !v.is_empty()) {
        tag_values.push(format!("{}X", lens));
    }
    if let Some(image_type) = metadata.get(IMAGE_TYPE_KEY).filter(|v| !v.is_empty()) {
        tag_values.push(image_type.to_string());
    }

    let mut seen = std::collections::HashSet::new();
    for value in tag_values {
        if seen.insert(value.clone()) {
            annotations.push(Annotation::Tag { value });
        }
    }

    annotations
}

pub fn description(metadata: &Metadata) -> String {
    metadata
        .get(DESCRIPTION_KEY)
        .filter(|d| !d.trim().is_empty())
        .unwrap_or("N/A")
        .to_string()
}

/// Instrument label that names the project.
pub fn project_label<'a>(metadata: &'a Metadata, fallback: &'a str) -> &'a str {
    metadata
        .get(INSTRUMENT_KEY)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
}
