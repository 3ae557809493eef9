//! Image metadata maps and the derived values the pipeline relies on.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const INSTRUMENT_KEY: &str = "Instrument";
pub const ACQUISITION_DATE_KEY: &str = "AcquisitionDate";
pub const DESCRIPTION_KEY: &str = "Description";
pub const COMMENT_KEY: &str = "Comment";
pub const LENS_MAGNIFICATION_KEY: &str = "Lens Magnification";
pub const IMAGE_TYPE_KEY: &str = "Image type";

/// Storage format for acquisition timestamps.
pub const DATE_TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Key/value metadata, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge caller tags over extracted metadata.
    ///
    /// Caller tags win for every shared key except the instrument, which always
    /// comes from the file itself when the converter found one.
    pub fn merged_with_tags(mut self, tags: &Metadata) -> Metadata {
        for (key, value) in tags.iter() {
            if key == INSTRUMENT_KEY && self.instrument().is_some() {
                continue;
            }
            self.insert(key, value);
        }
        self
    }

    /// Instrument label, if present and non-blank.
    pub fn instrument(&self) -> Option<&str> {
        self.get(INSTRUMENT_KEY)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Parsed acquisition timestamp.
    pub fn acquisition_date(&self) -> Option<NaiveDateTime> {
        self.get(ACQUISITION_DATE_KEY)
            .and_then(parse_acquisition_date)
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Metadata {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Parse the timestamp formats instruments are known to write.
pub fn parse_acquisition_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Dataset (sub-container) name for an acquisition timestamp: day granularity.
pub fn dataset_name_for(acquired_at: &NaiveDateTime) -> String {
    acquired_at.format("%Y-%m-%d").to_string()
}

/// Name used when an artifact with the same name but another timestamp exists.
///
/// `sample.tif` acquired at 10:00:05 becomes `sample_10-00-05.tif`.
pub fn collision_free_name(file_name: &str, acquired_at: &NaiveDateTime) -> String {
    let time = acquired_at.format("%H-%M-%S");
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, time, ext),
        _ => format!("{}_{}", file_name, time),
    }
}
