//! JSON emission and loading for [`DocumentMeta`].
//!
//! The emitted object carries one key per user-visible field; `year == 0`
//! and `references < 0` suppress their keys, and the `full-text` key is
//! always present (null when no text was supplied). Loading is tolerant:
//! missing or wrong-typed keys map to the record's zero value and unknown
//! keys are ignored.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::error;

use super::{DocumentMeta, FillRequest};

impl DocumentMeta {
    /// Emits the record as a JSON object with every field.
    #[must_use]
    pub fn to_json(&self, full_text: Option<&str>) -> String {
        self.to_json_filtered(&FillRequest::all(), full_text)
    }

    /// Emits the record as a JSON object restricted to the requested fields.
    ///
    /// The `full-text` key is emitted regardless of the request so saved
    /// records and their text stay in one document.
    #[must_use]
    pub fn to_json_filtered(&self, request: &FillRequest, full_text: Option<&str>) -> String {
        let mut object = Map::new();

        if request.doi {
            insert_string(&mut object, "doi", self.doi.as_deref());
        }
        if request.url {
            insert_string(&mut object, "url", self.url.as_deref());
        }
        if request.year && self.year != 0 {
            object.insert("year".to_string(), Value::from(self.year));
        }
        if request.publisher {
            insert_string(&mut object, "publisher", self.publisher.as_deref());
        }
        if request.volume {
            insert_string(&mut object, "volume", self.volume.as_deref());
        }
        if request.pages {
            insert_string(&mut object, "pages", self.pages.as_deref());
        }
        if request.author {
            insert_string(&mut object, "author", self.author.as_deref());
        }
        if request.title {
            insert_string(&mut object, "title", self.title.as_deref());
        }
        if request.journal {
            insert_string(&mut object, "journal", self.journal.as_deref());
        }
        if request.issn {
            insert_string(&mut object, "issn", self.issn.as_deref());
        }
        if request.keywords {
            insert_string(&mut object, "keywords", self.keywords.as_deref());
        }
        if request.references && self.references >= 0 {
            object.insert("references".to_string(), Value::from(self.references));
        }
        if request.download_url {
            insert_string(&mut object, "download-url", self.download_url.as_deref());
        }
        if request.abstract_text {
            insert_string(&mut object, "abstract", self.abstract_text.as_deref());
        }

        object.insert(
            "full-text".to_string(),
            full_text.map_or(Value::Null, |text| Value::from(text)),
        );

        Value::Object(object).to_string()
    }

    /// Loads a record from JSON emitted by [`DocumentMeta::to_json`].
    ///
    /// Returns `None` with an error log when the text is not a JSON object.
    #[must_use]
    pub fn from_json(text: &str) -> Option<DocumentMeta> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, "could not load json record");
                return None;
            }
        };
        let Some(object) = value.as_object() else {
            error!("json record is not an object");
            return None;
        };

        Some(DocumentMeta {
            doi: read_string(object, "doi"),
            url: read_string(object, "url"),
            year: object.get("year").and_then(Value::as_u64).unwrap_or(0),
            publisher: read_string(object, "publisher"),
            volume: read_string(object, "volume"),
            pages: read_string(object, "pages"),
            author: read_string(object, "author"),
            title: read_string(object, "title"),
            journal: read_string(object, "journal"),
            issn: read_string(object, "issn"),
            keywords: read_string(object, "keywords"),
            download_url: read_string(object, "download-url"),
            abstract_text: read_string(object, "abstract"),
            references: object
                .get("references")
                .and_then(Value::as_i64)
                .unwrap_or(-1),
            ..DocumentMeta::default()
        })
    }

    /// Saves the record, restricted to the requested fields, as a JSON file.
    ///
    /// # Errors
    ///
    /// Returns the underlying io error when the file cannot be written.
    pub fn save_to_file(
        &self,
        path: &Path,
        request: &FillRequest,
        full_text: Option<&str>,
    ) -> std::io::Result<()> {
        fs::write(path, self.to_json_filtered(request, full_text))
    }

    /// Loads a record from a JSON file saved by [`DocumentMeta::save_to_file`].
    #[must_use]
    pub fn load_from_file(path: &Path) -> Option<DocumentMeta> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                error!(path = %path.display(), error = %err, "could not read json record");
                return None;
            }
        };
        Self::from_json(&text)
    }

    /// Loads only the full text stored in a JSON file saved by
    /// [`DocumentMeta::save_to_file`].
    #[must_use]
    pub fn load_full_text_from_file(path: &Path) -> Option<String> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                error!(path = %path.display(), error = %err, "could not read json record");
                return None;
            }
        };
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, "could not load json record");
                return None;
            }
        };
        value
            .get("full-text")
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }
}

fn insert_string(object: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        object.insert(key.to_string(), Value::from(value));
    }
}

fn read_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
