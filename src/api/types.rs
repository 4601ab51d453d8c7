use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

/// Server timestamp layout for `mod_time`
const MOD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mod_time: String,
}

impl FileEntry {
    pub fn modified(&self) -> Option<NaiveDateTime> {
        parse_mod_time(&self.mod_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Listing {
    pub path: String,
    /// The server sends `null` for an empty directory
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mod_time: String,
}

impl SearchHit {
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn modified(&self) -> Option<NaiveDateTime> {
        parse_mod_time(&self.mod_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SearchResults {
    pub query: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub results: Vec<SearchHit>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub path: String,
}

fn parse_mod_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, MOD_TIME_FORMAT).ok()
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_with_null_files() {
        let listing: Listing = serde_json::from_str(r#"{"path": "/empty", "files": null}"#).unwrap();
        assert_eq!(listing.path, "/empty");
        assert!(listing.files.is_empty());
    }

    #[test]
    fn test_listing_entry() {
        let listing: Listing = serde_json::from_str(r#"{
            "path": "/docs",
            "files": [
                {"name": "report.pdf", "path": "/docs/report.pdf", "is_dir": false, "size": 10485760, "mod_time": "2024-06-01 12:30:00"}
            ]
        }"#).unwrap();

        let entry = &listing.files[0];
        assert_eq!(entry.name, "report.pdf");
        assert!(!entry.is_dir);
        let modified = entry.modified().unwrap();
        assert_eq!(modified.to_string(), "2024-06-01 12:30:00");
    }

    #[test]
    fn test_search_hit_name() {
        let hit = SearchHit {
            path: "/photos/2024/beach.jpg".to_string(),
            is_dir: false,
            size: 1,
            mod_time: "garbage".to_string(),
        };

        assert_eq!(hit.name(), "beach.jpg");
        assert!(hit.modified().is_none());
    }
}
