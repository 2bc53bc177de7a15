//! BibLaTeX emission for [`DocumentMeta`].

use rand::Rng;
use tracing::debug;

use super::DocumentMeta;

impl DocumentMeta {
    /// Emits the record as a BibLaTeX entry.
    ///
    /// The cite key is built from the author field: the first author is kept
    /// verbatim with its spaces removed, every space-separated token of the
    /// remaining authors contributes its initial, the result is uppercased
    /// and the year appended. When the year is unknown a pseudo-random
    /// number below 65536 stands in so the key stays unique enough for a
    /// working bibliography.
    ///
    /// Returns `None` when the record has no author, since no usable cite
    /// key can be formed.
    #[must_use]
    pub fn to_biblatex(&self, entry_type: Option<&str>) -> Option<String> {
        let entry_type = entry_type.unwrap_or("article");

        let Some(author) = self.author.as_deref() else {
            debug!("the document meta must contain at least an author field");
            return None;
        };

        let mut entry = String::from("@");
        entry.push_str(entry_type);
        entry.push('{');
        entry.push_str(&self.cite_key(author));
        entry.push_str(",\n");

        push_field(&mut entry, "author", Some(&author.replace(", ", " and ")));
        push_field(&mut entry, "title", self.title.as_deref());
        push_field(&mut entry, "doi", self.doi.as_deref());
        push_field(&mut entry, "url", self.url.as_deref());
        if self.year != 0 {
            push_field(&mut entry, "year", Some(&self.year.to_string()));
        }
        push_field(&mut entry, "publisher", self.publisher.as_deref());
        push_field(&mut entry, "volume", self.volume.as_deref());
        push_field(&mut entry, "pages", self.pages.as_deref());
        push_field(&mut entry, "issn", self.issn.as_deref());
        push_field(&mut entry, "keywords", self.keywords.as_deref());
        push_field(&mut entry, "journal", self.journal.as_deref());
        entry.push('}');
        entry.push('\n');

        Some(entry)
    }

    fn cite_key(&self, author: &str) -> String {
        let mut key = String::new();
        let mut authors = author.split(',').map(str::trim);

        if let Some(first) = authors.next() {
            for token in first.split_whitespace() {
                key.push_str(token);
            }
        }
        for further in authors {
            for token in further.split_whitespace() {
                if let Some(initial) = token.chars().next() {
                    key.push(initial);
                }
            }
        }
        key.make_ascii_uppercase();

        if self.year != 0 {
            key.push_str(&self.year.to_string());
        } else {
            let fallback: u32 = rand::thread_rng().gen_range(0..(1 << 16));
            key.push_str(&fallback.to_string());
        }
        key
    }
}

fn push_field(entry: &mut String, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        entry.push('\t');
        entry.push_str(key);
        entry.push_str("={");
        entry.push_str(value);
        entry.push_str("},\n");
    }
}
