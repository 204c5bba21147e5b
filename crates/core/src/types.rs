/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Pipeline runs are identified by a random UUID minted at run start.
pub type RunId = uuid::Uuid;
