/// Scene identifiers come from the extraction service and are opaque strings.
pub type SceneId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
