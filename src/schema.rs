use crate::postings::Format;
use crate::Error;
use std::collections::BTreeMap;

/// Document field names carrying this prefix override the stored form of
/// another field: `_stored_title` replaces what gets stored for `title`.
pub const STORED_PREFIX: &str = "_stored_";

/// Words dropped by the [Analyzer::Standard] chain. Token positions are
/// assigned after filtering, so phrases stay adjacent across removed words.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "for", "from", "have", "if", "in",
    "is", "it", "may", "not", "of", "on", "or", "that", "the", "this", "to", "us", "was", "we",
    "when", "will", "with", "yet", "you",
];

/// Minimal built-in tokenizer seam. The engine itself only consumes the
/// `(term, freq, weight, payload)` tuples produced by
/// [Format::word_values](crate::postings::Format::word_values).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Analyzer {
    /// Split on whitespace, keep case. Keyword-style fields.
    Whitespace,
    /// Lowercased alphanumeric words. Prose fields, no stop filtering.
    Simple,
    /// [Analyzer::Simple] plus stop-word removal. The default for text.
    Standard,
    /// The whole value as one token. Identifier fields.
    Atomic,
}

fn simple_words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for low in ch.to_lowercase() {
                current.push(low);
            }
        } else if !current.is_empty() {
            out.push(std::mem::replace(&mut current, String::new()));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

impl Analyzer {
    pub fn tokens(&self, text: &str) -> Vec<String> {
        match self {
            Analyzer::Whitespace => text.split_whitespace().map(|t| t.to_string()).collect(),
            Analyzer::Simple => simple_words(text),
            Analyzer::Standard => simple_words(text)
                .into_iter()
                .filter(|word| !STOP_WORDS.contains(&word.as_str()))
                .collect(),
            Analyzer::Atomic => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Vec::new()
                } else {
                    vec![trimmed.to_string()]
                }
            }
        }
    }
}

/// Per-field configuration: what a posting's payload encodes, whether a
/// per-document forward list is kept, and the indexed/scorable/stored/unique
/// flags the writer consults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Field {
    pub format: Format,
    pub vector: Option<Format>,
    pub analyzer: Analyzer,
    pub indexed: bool,
    pub scorable: bool,
    pub stored: bool,
    pub unique: bool,
}

impl Field {
    /// Prose text: positions payload, stop-filtered lowercased words,
    /// length-normalized.
    pub fn text() -> Field {
        Field {
            format: Format::Positions,
            vector: None,
            analyzer: Analyzer::Standard,
            indexed: true,
            scorable: true,
            stored: false,
            unique: false,
        }
    }

    /// Space-separated keywords, case-preserving, frequency payload.
    pub fn keyword() -> Field {
        Field {
            format: Format::Frequency,
            vector: None,
            analyzer: Analyzer::Whitespace,
            indexed: true,
            scorable: false,
            stored: false,
            unique: false,
        }
    }

    /// A single atomic token, e.g. a path or primary key.
    pub fn id() -> Field {
        Field {
            format: Format::Existence,
            vector: None,
            analyzer: Analyzer::Atomic,
            indexed: true,
            scorable: false,
            stored: false,
            unique: false,
        }
    }

    /// Not indexed at all; the value is only kept in the stored record.
    pub fn stored_only() -> Field {
        Field {
            format: Format::Existence,
            vector: None,
            analyzer: Analyzer::Atomic,
            indexed: false,
            scorable: false,
            stored: true,
            unique: false,
        }
    }

    pub fn stored(mut self) -> Field {
        self.stored = true;
        self
    }

    pub fn scorable(mut self) -> Field {
        self.scorable = true;
        self
    }

    pub fn unique(mut self) -> Field {
        self.unique = true;
        self
    }

    /// Also keep a per-document forward posting list in this format.
    pub fn with_vector(mut self, format: Format) -> Field {
        self.vector = Some(format);
        self
    }
}

/// An ordered mapping from field name to [Field]. Field numbers are the
/// rank of the name in sorted order, so `(field_num, term)` ordering and
/// `(field_name, term)` ordering agree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
}

impl Schema {
    pub fn new() -> Schema {
        Schema::default()
    }

    pub fn add(&mut self, name: &str, field: Field) -> Result<(), Error> {
        if name.is_empty() || name.starts_with('_') {
            return Err(Error::FieldConfig(format!(
                "field names must not begin with an underscore: {:?}",
                name
            )));
        }
        if name.contains(' ') {
            return Err(Error::FieldConfig(format!(
                "field names must not contain spaces: {:?}",
                name
            )));
        }
        if field.unique && !field.indexed {
            return Err(Error::FieldConfig(format!(
                "unique field {:?} must be indexed",
                name
            )));
        }
        self.fields.insert(name.to_string(), field);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn expect(&self, name: &str) -> Result<&Field, Error> {
        self.fields
            .get(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    pub fn field_num(&self, name: &str) -> Option<u16> {
        self.fields
            .keys()
            .position(|k| k == name)
            .map(|rank| rank as u16)
    }

    pub fn field_name(&self, num: u16) -> Option<&str> {
        self.fields.keys().nth(num as usize).map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `(field_num, name)` pairs of fields that keep per-document lengths.
    pub fn scorable_fields(&self) -> Vec<(u16, &str)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, (_, f))| f.indexed && f.scorable)
            .map(|(num, (name, _))| (num as u16, name.as_str()))
            .collect()
    }

    pub fn unique_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.unique)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Clone, Debug)]
pub enum FieldValue {
    Text(String),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(t) => Some(t),
            FieldValue::Json(serde_json::Value::String(t)) => Some(t),
            FieldValue::Json(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(t) => serde_json::Value::String(t.clone()),
            FieldValue::Json(v) => v.clone(),
        }
    }
}

/// One document on its way into the index.
///
/// This factory is written to support chaining.
#[derive(Clone, Debug, Default)]
pub struct Document {
    fields: Vec<(String, FieldValue)>,
}

impl Document {
    pub fn new() -> Document {
        Document::default()
    }

    pub fn text<S: Into<String>>(&mut self, field: &str, value: S) -> &mut Self {
        self.fields
            .push((field.to_string(), FieldValue::Text(value.into())));
        self
    }

    pub fn value(&mut self, field: &str, value: serde_json::Value) -> &mut Self {
        self.fields
            .push((field.to_string(), FieldValue::Json(value)));
        self
    }

    /// Entries in field-name order, `_stored_` overrides excluded.
    pub fn entries(&self) -> Vec<(&str, &FieldValue)> {
        let mut out: Vec<(&str, &FieldValue)> = self
            .fields
            .iter()
            .filter(|(name, _)| !name.starts_with(STORED_PREFIX))
            .map(|(name, v)| (name.as_str(), v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    /// The `_stored_<field>` sideband value for `field`, if present.
    pub fn stored_override(&self, field: &str) -> Option<&FieldValue> {
        let wanted = format!("{}{}", STORED_PREFIX, field);
        self.fields
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzers() {
        assert_eq!(
            Analyzer::Whitespace.tokens("A B  C"),
            vec!["A", "B", "C"]
        );
        assert_eq!(
            Analyzer::Simple.tokens("Let's try this AGAIN."),
            vec!["let", "s", "try", "this", "again"]
        );
        // stop words vanish and later words close the gap
        assert_eq!(
            Analyzer::Standard.tokens("Little Miss Muffet sat on a tuffet"),
            vec!["little", "miss", "muffet", "sat", "tuffet"]
        );
        assert_eq!(Analyzer::Atomic.tokens("  /a/b "), vec!["/a/b"]);
        assert!(Analyzer::Atomic.tokens("   ").is_empty());
    }

    #[test]
    fn field_name_rules() {
        let mut schema = Schema::new();
        assert!(schema.add("_secret", Field::text()).is_err());
        assert!(schema.add("two words", Field::text()).is_err());
        assert!(schema.add("", Field::text()).is_err());
        schema.add("ok", Field::text()).unwrap();
        assert!(schema.contains("ok"));
    }

    #[test]
    fn field_numbers_follow_name_order() {
        let mut schema = Schema::new();
        schema.add("zulu", Field::keyword()).unwrap();
        schema.add("alfa", Field::text()).unwrap();
        schema.add("mike", Field::id()).unwrap();
        assert_eq!(schema.field_num("alfa"), Some(0));
        assert_eq!(schema.field_num("mike"), Some(1));
        assert_eq!(schema.field_num("zulu"), Some(2));
        assert_eq!(schema.field_name(2), Some("zulu"));
        assert_eq!(schema.field_num("nope"), None);
    }

    #[test]
    fn schema_snapshot_round_trip() {
        let mut schema = Schema::new();
        schema.add("title", Field::text().stored()).unwrap();
        schema
            .add("tags", Field::keyword().scorable().with_vector(Format::Frequency))
            .unwrap();
        let blob = serde_json::to_vec(&schema).unwrap();
        let back: Schema = serde_json::from_slice(&blob).unwrap();
        assert_eq!(back.field_num("title"), Some(1));
        let tags = back.get("tags").unwrap();
        assert!(tags.scorable);
        assert_eq!(tags.vector, Some(Format::Frequency));
    }

    #[test]
    fn stored_override_sideband() {
        let mut doc = Document::new();
        doc.text("title", "raw words here")
            .text("_stored_title", "Pretty Title");
        let entries = doc.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "title");
        assert_eq!(
            doc.stored_override("title").unwrap().as_text(),
            Some("Pretty Title")
        );
    }
}
