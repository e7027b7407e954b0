use crate::matching::{ExcludeMatcher, Matcher, MultiMatcher};
use crate::postings::{
    read_terms, read_vector_index, PayloadValue, PostingMatcher, TermInfo, TermKey, VectorCursor,
};
use crate::schema::Schema;
use crate::scoring::{LengthSource, TermStats, Weighting};
use crate::segment::{
    Segment, SegmentSet, LENGTHS_EXT, POSTINGS_EXT, STORED_EXT, TERMS_EXT, VECTOR_INDEX_EXT,
    VECTOR_POSTS_EXT,
};
use crate::storage::Storage;
use crate::structfile::StructReader;
use crate::{DocNum, Error, HashSet};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

/// Marks a reader opened underneath a [MultiReader]; only the top-level
/// reader publishes a real generation.
pub const INNER_GENERATION: i64 = -2;

pub const STORED_MAGIC: &[u8] = b"sift.sto\x01";

pub type StoredFields = BTreeMap<String, serde_json::Value>;

/// One `(field, term)` row of a term iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct TermEntry {
    pub field: String,
    pub term: String,
    pub doc_freq: u32,
    pub collection_freq: f32,
}

/// Weighting hook for [IndexReader::postings_with]: the searcher computes
/// collection-wide stats once per term, each segment supplies its lengths.
pub struct ScoreArgs<'a> {
    pub weighting: &'a dyn Weighting,
    pub stats: TermStats,
}

/// Read-only view over one segment or a fan-out over many.
pub trait IndexReader {
    fn schema(&self) -> &Schema;
    fn generation(&self) -> i64;

    fn doc_count_all(&self) -> DocNum;
    fn doc_count(&self) -> DocNum;
    fn is_deleted(&self, docnum: DocNum) -> bool;
    fn has_deletions(&self) -> bool;

    fn contains_term(&self, field: &str, term: &str) -> bool {
        self.doc_frequency(field, term) > 0
    }

    /// Lexicographic iteration from `(field, term)` onward, yielding
    /// `(field, term, doc_freq, collection_freq)`.
    fn term_iter_from<'a>(
        &'a self,
        field: &str,
        term: &str,
    ) -> Box<dyn Iterator<Item = TermEntry> + 'a>;

    fn term_iter<'a>(&'a self) -> Box<dyn Iterator<Item = TermEntry> + 'a> {
        self.term_iter_from("", "")
    }

    fn postings_with(
        &self,
        field: &str,
        term: &str,
        exclude: Option<&HashSet<DocNum>>,
        scoring: Option<&ScoreArgs>,
    ) -> Result<Box<dyn Matcher>, Error>;

    fn postings(&self, field: &str, term: &str) -> Result<Box<dyn Matcher>, Error> {
        self.postings_with(field, term, None, None)
    }

    fn stored_fields(&self, docnum: DocNum) -> Result<StoredFields, Error>;

    fn all_stored_fields(&self) -> Result<Vec<StoredFields>, Error> {
        let mut out = Vec::new();
        for docnum in 0..self.doc_count_all() {
            if !self.is_deleted(docnum) {
                out.push(self.stored_fields(docnum)?);
            }
        }
        Ok(out)
    }

    fn doc_frequency(&self, field: &str, term: &str) -> u32;
    /// Collection frequency: the summed weight of every posting.
    fn frequency(&self, field: &str, term: &str) -> f32;

    fn field_length(&self, field: &str) -> u64;
    fn doc_field_length(&self, docnum: DocNum, field: &str) -> u32;
    fn max_field_length(&self, field: &str) -> u32;

    fn has_vector(&self, docnum: DocNum, field: &str) -> bool;
    fn vector(&self, docnum: DocNum, field: &str) -> Result<VectorCursor, Error>;

    /// The forward list decoded through the field's vector format.
    fn vector_as(
        &self,
        docnum: DocNum,
        field: &str,
    ) -> Result<Vec<(String, PayloadValue)>, Error> {
        let format = self
            .schema()
            .get(field)
            .and_then(|f| f.vector)
            .ok_or_else(|| {
                Error::FieldConfig(format!("field {:?} does not store vectors", field))
            })?;
        let mut cursor = self.vector(docnum, field)?;
        let mut out = Vec::new();
        while cursor.is_active() {
            out.push((cursor.term().to_string(), format.decode(cursor.value())?));
            cursor.next()?;
        }
        Ok(out)
    }

    fn iter_field<'a>(&'a self, field: &str) -> Box<dyn Iterator<Item = TermEntry> + 'a> {
        let wanted = field.to_string();
        Box::new(
            self.term_iter_from(field, "")
                .take_while(move |e| e.field == wanted),
        )
    }

    fn iter_prefix<'a>(
        &'a self,
        field: &str,
        prefix: &str,
    ) -> Box<dyn Iterator<Item = TermEntry> + 'a> {
        let wanted = field.to_string();
        let prefix = prefix.to_string();
        let inner = self.term_iter_from(field, &prefix);
        Box::new(inner.take_while(move |e| e.field == wanted && e.term.starts_with(&prefix)))
    }

    fn expand_prefix(&self, field: &str, prefix: &str) -> Vec<String> {
        self.iter_prefix(field, prefix).map(|e| e.term).collect()
    }

    fn lexicon(&self, field: &str) -> Vec<String> {
        self.iter_field(field).map(|e| e.term).collect()
    }

    /// Top-N terms of a field by collection frequency.
    fn most_frequent_terms(&self, field: &str, n: usize, prefix: &str) -> Vec<(f32, String)> {
        let mut scored: Vec<(f32, String)> = self
            .iter_prefix(field, prefix)
            .map(|e| (e.collection_freq, e.term))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
        scored.truncate(n);
        scored
    }

    /// Top-N terms by `tf * (1 / df)`: frequent but concentrated.
    fn most_distinctive_terms(&self, field: &str, n: usize, prefix: &str) -> Vec<(f32, String)> {
        let mut scored: Vec<(f32, String)> = self
            .iter_prefix(field, prefix)
            .map(|e| {
                let score = e.collection_freq * (1.0 / e.doc_freq.max(1) as f32);
                (score, e.term)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
        scored.truncate(n);
        scored
    }
}

/// O(1) positional lookup into the per-field length arrays of a segment.
#[derive(Clone)]
pub struct LengthsReader {
    source: StructReader,
    doc_count: DocNum,
    bases: BTreeMap<u16, usize>,
}

impl LengthsReader {
    pub fn open(reader: StructReader) -> Result<LengthsReader, Error> {
        let mut input = reader.clone();
        input.seek(0)?;
        let magic = input.consume(crate::pool::LENGTHS_MAGIC.len())?.to_vec();
        if magic != crate::pool::LENGTHS_MAGIC {
            return Err(Error::Corrupt("bad field lengths header".to_string()));
        }
        let doc_count = input.read_vbyte()? as DocNum;
        let field_count = input.read_vbyte()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(input.read_vbyte()? as u16);
        }
        let arrays_start = input.tell();
        let mut bases = BTreeMap::new();
        for (index, field) in fields.into_iter().enumerate() {
            bases.insert(field, arrays_start + index * doc_count as usize * 2);
        }
        Ok(LengthsReader {
            source: reader,
            doc_count,
            bases,
        })
    }

    pub fn length(&self, docnum: DocNum, field: u16) -> u32 {
        if docnum >= self.doc_count {
            return 0;
        }
        match self.bases.get(&field) {
            Some(base) => self
                .source
                .get_u16(base + docnum as usize * 2)
                .map(|v| v as u32)
                .unwrap_or(0),
            None => 0,
        }
    }
}

/// A [LengthSource] view of one field's array.
#[derive(Clone)]
pub struct FieldLengths {
    lengths: LengthsReader,
    field: u16,
}

impl LengthSource for FieldLengths {
    fn doc_length(&self, docnum: DocNum) -> u32 {
        self.lengths.length(docnum, self.field)
    }
}

/// Per-document stored-field records: lz4-compressed JSON blobs behind an
/// offset table at the tail of the file.
#[derive(Clone)]
pub struct StoredReader {
    source: StructReader,
    count: u32,
    offsets_start: usize,
}

impl StoredReader {
    pub fn open(reader: StructReader) -> Result<StoredReader, Error> {
        let len = reader.len();
        if len < STORED_MAGIC.len() + 12 {
            return Err(Error::Corrupt("stored fields file too short".to_string()));
        }
        let mut head = reader.clone();
        let magic = head.consume(STORED_MAGIC.len())?.to_vec();
        if magic != STORED_MAGIC {
            return Err(Error::Corrupt("bad stored fields header".to_string()));
        }
        let offsets_start = reader.get_u64(len - 8)? as usize;
        let count = reader.get_u32(len - 12)?;
        Ok(StoredReader {
            source: reader,
            count,
            offsets_start,
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.count
    }

    pub fn get(&self, docnum: DocNum) -> Result<StoredFields, Error> {
        if docnum >= self.count {
            return Err(Error::DocNumOutOfRange(docnum));
        }
        let offset = self
            .source
            .get_u64(self.offsets_start + docnum as usize * 8)? as usize;
        let mut record = self.source.substream(offset, self.source.len())?;
        let raw_len = record.read_vbyte()? as usize;
        let compressed = record.read_bytes()?;
        let raw = lz4_flex::decompress(&compressed, raw_len)
            .map_err(|e| Error::Corrupt(format!("stored record decompress: {:?}", e)))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Read-only view over one committed segment.
pub struct SegmentReader {
    schema: Schema,
    segment: Segment,
    generation: i64,
    terms: BTreeMap<TermKey, TermInfo>,
    postings_file: StructReader,
    stored: StoredReader,
    lengths: LengthsReader,
    vector_index: BTreeMap<(DocNum, u16), u64>,
    vector_posts: StructReader,
}

impl SegmentReader {
    pub fn open(
        storage: &dyn Storage,
        schema: Schema,
        segment: Segment,
        generation: i64,
    ) -> Result<SegmentReader, Error> {
        let terms_file = storage.open_file(&segment.file_name(TERMS_EXT), true)?;
        let terms = read_terms(&terms_file)?;
        let postings_file = storage.open_file(&segment.file_name(POSTINGS_EXT), true)?;
        let stored = StoredReader::open(storage.open_file(&segment.file_name(STORED_EXT), true)?)?;
        let lengths =
            LengthsReader::open(storage.open_file(&segment.file_name(LENGTHS_EXT), true)?)?;
        let vector_index =
            read_vector_index(&storage.open_file(&segment.file_name(VECTOR_INDEX_EXT), true)?)?;
        let vector_posts = storage.open_file(&segment.file_name(VECTOR_POSTS_EXT), true)?;
        Ok(SegmentReader {
            schema,
            segment,
            generation,
            terms,
            postings_file,
            stored,
            lengths,
            vector_index,
            vector_posts,
        })
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    fn term_key(&self, field: &str, term: &str) -> Option<TermKey> {
        self.schema
            .field_num(field)
            .map(|num| (num, term.to_string()))
    }

    fn term_info(&self, field: &str, term: &str) -> Option<&TermInfo> {
        self.term_key(field, term)
            .and_then(|key| self.terms.get(&key))
    }

    fn entry_of(&self, key: &TermKey, info: &TermInfo) -> TermEntry {
        TermEntry {
            field: self
                .schema
                .field_name(key.0)
                .unwrap_or_default()
                .to_string(),
            term: key.1.clone(),
            doc_freq: info.doc_freq,
            collection_freq: info.weight_sum,
        }
    }
}

impl IndexReader for SegmentReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn generation(&self) -> i64 {
        self.generation
    }

    fn doc_count_all(&self) -> DocNum {
        self.segment.doc_count_all()
    }

    fn doc_count(&self) -> DocNum {
        self.segment.doc_count()
    }

    fn is_deleted(&self, docnum: DocNum) -> bool {
        self.segment.is_deleted(docnum)
    }

    fn has_deletions(&self) -> bool {
        self.segment.has_deletions()
    }

    fn term_iter_from<'a>(
        &'a self,
        field: &str,
        term: &str,
    ) -> Box<dyn Iterator<Item = TermEntry> + 'a> {
        let start: TermKey = match (field, self.schema.field_num(field)) {
            // empty field name: iterate from the very beginning
            ("", _) => (0, term.to_string()),
            (_, Some(num)) => (num, term.to_string()),
            (_, None) => return Box::new(std::iter::empty()),
        };
        Box::new(
            self.terms
                .range(start..)
                .map(move |(key, info)| self.entry_of(key, info)),
        )
    }

    fn postings_with(
        &self,
        field: &str,
        term: &str,
        exclude: Option<&HashSet<DocNum>>,
        scoring: Option<&ScoreArgs>,
    ) -> Result<Box<dyn Matcher>, Error> {
        let fieldobj = self.schema.expect(field)?;
        let info = self
            .term_info(field, term)
            .cloned()
            .ok_or_else(|| Error::TermNotFound(field.to_string(), term.to_string()))?;

        let scorer = scoring.map(|args| {
            let lengths: Option<Arc<dyn LengthSource>> = if fieldobj.scorable {
                let fieldnum = self.schema.field_num(field).unwrap();
                Some(Arc::new(FieldLengths {
                    lengths: self.lengths.clone(),
                    field: fieldnum,
                }) as Arc<dyn LengthSource>)
            } else {
                None
            };
            args.weighting.scorer(&args.stats, lengths)
        });

        let leaf = PostingMatcher::open(&self.postings_file, info.offset, fieldobj.format, scorer)?;

        let mut excluded: HashSet<DocNum> = HashSet::default();
        for doc in self.segment.deleted_docs() {
            excluded.insert(doc);
        }
        if let Some(extra) = exclude {
            excluded.extend(extra.iter().cloned());
        }
        if excluded.is_empty() {
            Ok(Box::new(leaf))
        } else {
            Ok(Box::new(ExcludeMatcher::new(
                Box::new(leaf),
                Arc::new(excluded),
            )?))
        }
    }

    fn stored_fields(&self, docnum: DocNum) -> Result<StoredFields, Error> {
        self.stored.get(docnum)
    }

    fn doc_frequency(&self, field: &str, term: &str) -> u32 {
        self.term_info(field, term).map(|i| i.doc_freq).unwrap_or(0)
    }

    fn frequency(&self, field: &str, term: &str) -> f32 {
        self.term_info(field, term)
            .map(|i| i.weight_sum)
            .unwrap_or(0.0)
    }

    fn field_length(&self, field: &str) -> u64 {
        self.segment.field_length(field)
    }

    fn doc_field_length(&self, docnum: DocNum, field: &str) -> u32 {
        match self.schema.field_num(field) {
            Some(num) => self.lengths.length(docnum, num),
            None => 0,
        }
    }

    fn max_field_length(&self, field: &str) -> u32 {
        self.segment.max_field_length(field)
    }

    fn has_vector(&self, docnum: DocNum, field: &str) -> bool {
        match self.schema.field_num(field) {
            Some(num) => self.vector_index.contains_key(&(docnum, num)),
            None => false,
        }
    }

    fn vector(&self, docnum: DocNum, field: &str) -> Result<VectorCursor, Error> {
        let num = self
            .schema
            .field_num(field)
            .ok_or_else(|| Error::UnknownField(field.to_string()))?;
        let offset = self
            .vector_index
            .get(&(docnum, num))
            .cloned()
            .ok_or_else(|| {
                Error::TermNotFound(field.to_string(), format!("vector for doc {}", docnum))
            })?;
        VectorCursor::open(&self.vector_posts, offset)
    }
}

/// Fan-out over an ordered list of segment readers with docnum offsets.
pub struct MultiReader {
    readers: Vec<SegmentReader>,
    offsets: Vec<DocNum>,
    schema: Schema,
    generation: i64,
}

impl MultiReader {
    pub fn new(readers: Vec<SegmentReader>, schema: Schema, generation: i64) -> MultiReader {
        let mut offsets = Vec::with_capacity(readers.len());
        let mut total = 0;
        for reader in &readers {
            offsets.push(total);
            total += reader.doc_count_all();
        }
        MultiReader {
            readers,
            offsets,
            schema,
            generation,
        }
    }

    fn locate(&self, docnum: DocNum) -> Result<(usize, DocNum), Error> {
        let mut index = match self.offsets.binary_search(&docnum) {
            Ok(i) => i,
            Err(0) => return Err(Error::DocNumOutOfRange(docnum)),
            Err(i) => i - 1,
        };
        while index < self.readers.len()
            && docnum - self.offsets[index] >= self.readers[index].doc_count_all()
        {
            index += 1;
            if index >= self.readers.len() {
                return Err(Error::DocNumOutOfRange(docnum));
            }
        }
        Ok((index, docnum - self.offsets[index]))
    }
}

impl IndexReader for MultiReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn generation(&self) -> i64 {
        self.generation
    }

    fn doc_count_all(&self) -> DocNum {
        self.readers.iter().map(|r| r.doc_count_all()).sum()
    }

    fn doc_count(&self) -> DocNum {
        self.readers.iter().map(|r| r.doc_count()).sum()
    }

    fn is_deleted(&self, docnum: DocNum) -> bool {
        match self.locate(docnum) {
            Ok((index, local)) => self.readers[index].is_deleted(local),
            Err(_) => false,
        }
    }

    fn has_deletions(&self) -> bool {
        self.readers.iter().any(|r| r.has_deletions())
    }

    /// K-way heap merge; entries sharing a `(field, term)` key are summed
    /// and emitted once.
    fn term_iter_from<'a>(
        &'a self,
        field: &str,
        term: &str,
    ) -> Box<dyn Iterator<Item = TermEntry> + 'a> {
        struct Merged<'a> {
            sources: Vec<std::collections::btree_map::Range<'a, TermKey, TermInfo>>,
            heap: BinaryHeap<Reverse<(&'a TermKey, usize)>>,
            infos: Vec<Option<&'a TermInfo>>,
            schema: &'a Schema,
        }
        impl<'a> Merged<'a> {
            fn refill(&mut self, source: usize) {
                if let Some((key, info)) = self.sources[source].next() {
                    self.heap.push(Reverse((key, source)));
                    self.infos[source] = Some(info);
                }
            }
        }
        impl<'a> Iterator for Merged<'a> {
            type Item = TermEntry;
            fn next(&mut self) -> Option<TermEntry> {
                let Reverse((key, source)) = self.heap.pop()?;
                let mut doc_freq = self.infos[source].unwrap().doc_freq;
                let mut collection_freq = self.infos[source].unwrap().weight_sum;
                self.refill(source);
                while let Some(Reverse((other_key, other_source))) = self.heap.peek().cloned() {
                    if other_key != key {
                        break;
                    }
                    self.heap.pop();
                    doc_freq += self.infos[other_source].unwrap().doc_freq;
                    collection_freq += self.infos[other_source].unwrap().weight_sum;
                    self.refill(other_source);
                }
                Some(TermEntry {
                    field: self
                        .schema
                        .field_name(key.0)
                        .unwrap_or_default()
                        .to_string(),
                    term: key.1.clone(),
                    doc_freq,
                    collection_freq,
                })
            }
        }

        let start: TermKey = match (field, self.schema.field_num(field)) {
            ("", _) => (0, term.to_string()),
            (_, Some(num)) => (num, term.to_string()),
            (_, None) => return Box::new(std::iter::empty()),
        };
        let mut merged = Merged {
            sources: self
                .readers
                .iter()
                .map(|r| r.terms.range(start.clone()..))
                .collect(),
            heap: BinaryHeap::new(),
            infos: vec![None; self.readers.len()],
            schema: &self.schema,
        };
        for source in 0..merged.sources.len() {
            merged.refill(source);
        }
        Box::new(merged)
    }

    fn postings_with(
        &self,
        field: &str,
        term: &str,
        exclude: Option<&HashSet<DocNum>>,
        scoring: Option<&ScoreArgs>,
    ) -> Result<Box<dyn Matcher>, Error> {
        self.schema.expect(field)?;
        let mut children: Vec<Box<dyn Matcher>> = Vec::new();
        let mut child_offsets: Vec<DocNum> = Vec::new();
        for (index, reader) in self.readers.iter().enumerate() {
            let offset = self.offsets[index];
            // translate the global exclusion set into this segment's space
            let local_exclude: Option<HashSet<DocNum>> = exclude.map(|set| {
                set.iter()
                    .filter_map(|d| {
                        if *d >= offset && *d < offset + reader.doc_count_all() {
                            Some(*d - offset)
                        } else {
                            None
                        }
                    })
                    .collect()
            });
            match reader.postings_with(field, term, local_exclude.as_ref(), scoring) {
                Ok(matcher) => {
                    children.push(matcher);
                    child_offsets.push(offset);
                }
                Err(Error::TermNotFound(_, _)) => continue,
                Err(e) => return Err(e),
            }
        }
        if children.is_empty() {
            return Err(Error::TermNotFound(field.to_string(), term.to_string()));
        }
        Ok(Box::new(MultiMatcher::new(children, child_offsets)))
    }

    fn stored_fields(&self, docnum: DocNum) -> Result<StoredFields, Error> {
        let (index, local) = self.locate(docnum)?;
        self.readers[index].stored_fields(local)
    }

    fn doc_frequency(&self, field: &str, term: &str) -> u32 {
        self.readers.iter().map(|r| r.doc_frequency(field, term)).sum()
    }

    fn frequency(&self, field: &str, term: &str) -> f32 {
        self.readers.iter().map(|r| r.frequency(field, term)).sum()
    }

    fn field_length(&self, field: &str) -> u64 {
        self.readers.iter().map(|r| r.field_length(field)).sum()
    }

    fn doc_field_length(&self, docnum: DocNum, field: &str) -> u32 {
        match self.locate(docnum) {
            Ok((index, local)) => self.readers[index].doc_field_length(local, field),
            Err(_) => 0,
        }
    }

    fn max_field_length(&self, field: &str) -> u32 {
        self.readers
            .iter()
            .map(|r| r.max_field_length(field))
            .max()
            .unwrap_or(0)
    }

    fn has_vector(&self, docnum: DocNum, field: &str) -> bool {
        match self.locate(docnum) {
            Ok((index, local)) => self.readers[index].has_vector(local, field),
            Err(_) => false,
        }
    }

    fn vector(&self, docnum: DocNum, field: &str) -> Result<VectorCursor, Error> {
        let (index, local) = self.locate(docnum)?;
        self.readers[index].vector(local, field)
    }
}

/// A reader over an index with no committed segments.
pub struct EmptyReader {
    schema: Schema,
    generation: i64,
}

impl EmptyReader {
    pub fn new(schema: Schema, generation: i64) -> EmptyReader {
        EmptyReader { schema, generation }
    }
}

impl IndexReader for EmptyReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }
    fn generation(&self) -> i64 {
        self.generation
    }
    fn doc_count_all(&self) -> DocNum {
        0
    }
    fn doc_count(&self) -> DocNum {
        0
    }
    fn is_deleted(&self, _docnum: DocNum) -> bool {
        false
    }
    fn has_deletions(&self) -> bool {
        false
    }
    fn term_iter_from<'a>(
        &'a self,
        _field: &str,
        _term: &str,
    ) -> Box<dyn Iterator<Item = TermEntry> + 'a> {
        Box::new(std::iter::empty())
    }
    fn postings_with(
        &self,
        field: &str,
        term: &str,
        _exclude: Option<&HashSet<DocNum>>,
        _scoring: Option<&ScoreArgs>,
    ) -> Result<Box<dyn Matcher>, Error> {
        Err(Error::TermNotFound(field.to_string(), term.to_string()))
    }
    fn stored_fields(&self, docnum: DocNum) -> Result<StoredFields, Error> {
        Err(Error::DocNumOutOfRange(docnum))
    }
    fn doc_frequency(&self, _field: &str, _term: &str) -> u32 {
        0
    }
    fn frequency(&self, _field: &str, _term: &str) -> f32 {
        0.0
    }
    fn field_length(&self, _field: &str) -> u64 {
        0
    }
    fn doc_field_length(&self, _docnum: DocNum, _field: &str) -> u32 {
        0
    }
    fn max_field_length(&self, _field: &str) -> u32 {
        0
    }
    fn has_vector(&self, _docnum: DocNum, _field: &str) -> bool {
        false
    }
    fn vector(&self, _docnum: DocNum, field: &str) -> Result<VectorCursor, Error> {
        Err(Error::TermNotFound(field.to_string(), "vector".to_string()))
    }
}

/// Open the appropriate reader shape for a segment set: a single
/// [SegmentReader], or a [MultiReader] whose children carry
/// [INNER_GENERATION] so only the outer view publishes a generation.
pub fn open_reader(
    storage: &dyn Storage,
    schema: &Schema,
    segments: &SegmentSet,
    generation: i64,
) -> Result<Box<dyn IndexReader>, Error> {
    match segments.len() {
        0 => Ok(Box::new(EmptyReader::new(schema.clone(), generation))),
        1 => Ok(Box::new(SegmentReader::open(
            storage,
            schema.clone(),
            segments.segments()[0].clone(),
            generation,
        )?)),
        _ => {
            let mut readers = Vec::with_capacity(segments.len());
            for segment in segments.iter() {
                readers.push(SegmentReader::open(
                    storage,
                    schema.clone(),
                    segment.clone(),
                    INNER_GENERATION,
                )?);
            }
            Ok(Box::new(MultiReader::new(
                readers,
                schema.clone(),
                generation,
            )))
        }
    }
}
