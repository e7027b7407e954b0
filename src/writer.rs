use crate::index::{
    read_lock_name, read_toc, segment_name, toc_file_name, write_lock_name, write_toc, Toc,
};
use crate::matching::all_ids;
use crate::pool::PostingPool;
use crate::postings::{PostingsWriter, TermsWriter, VectorWriter};
use crate::reading::{IndexReader, SegmentReader, StoredFields, INNER_GENERATION, STORED_MAGIC};
use crate::schema::{Document, Field, Schema};
use crate::segment::{
    Segment, SegmentSet, LENGTHS_EXT, POSTINGS_EXT, SEGMENT_EXTS, STORED_EXT, TERMS_EXT,
    VECTOR_INDEX_EXT, VECTOR_POSTS_EXT,
};
use crate::storage::{FileHandle, Storage, StorageLock};
use crate::structfile::StructWriter;
use crate::{DocNum, Error, HashSet};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How a commit treats the existing segments.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MergeType {
    /// Leave them alone.
    NoMerge,
    /// Absorb the small tail by the Fibonacci rule; the default.
    MergeSmall,
    /// Absorb everything into the new segment.
    Optimize,
}

static FIB: Lazy<Vec<u64>> = Lazy::new(|| {
    let mut fib = vec![0u64, 1];
    // fib(92) is the last one that fits in a u64
    while fib.len() <= 92 {
        let next = fib[fib.len() - 1] + fib[fib.len() - 2];
        fib.push(next);
    }
    fib
});

fn fib(n: usize) -> u64 {
    FIB.get(n).cloned().unwrap_or(u64::max_value())
}

/// MERGE_SMALL selection: sort ascending by size, absorb while the running
/// total stays under `fib(i + 5)`. Returns `(absorb, keep)`.
pub(crate) fn select_small_merges(segments: &SegmentSet) -> (Vec<Segment>, Vec<Segment>) {
    let mut sorted: Vec<Segment> = segments.segments().to_vec();
    sorted.sort_by_key(|s| s.doc_count_all());
    let mut absorb = Vec::new();
    let mut keep = Vec::new();
    let mut total: u64 = 0;
    for (index, segment) in sorted.into_iter().enumerate() {
        total += segment.doc_count_all() as u64;
        if total < fib(index + 5) {
            absorb.push(segment);
        } else {
            keep.push(segment);
        }
    }
    (absorb, keep)
}

struct StoredWriter {
    out: StructWriter<FileHandle>,
    offsets: Vec<u64>,
}

impl StoredWriter {
    fn new(mut out: StructWriter<FileHandle>) -> Result<StoredWriter, Error> {
        out.write_raw(STORED_MAGIC)?;
        Ok(StoredWriter {
            out,
            offsets: Vec::new(),
        })
    }

    fn add(&mut self, fields: &StoredFields) -> Result<(), Error> {
        self.offsets.push(self.out.tell());
        let raw = serde_json::to_vec(fields)?;
        let compressed = lz4_flex::compress(&raw);
        self.out.write_vbyte(raw.len() as u64)?;
        self.out.write_bytes(&compressed)?;
        Ok(())
    }

    fn close(mut self) -> Result<(), Error> {
        let offsets_start = self.out.tell();
        for offset in &self.offsets {
            self.out.write_u64(*offset)?;
        }
        self.out.write_u32(self.offsets.len() as u32)?;
        self.out.write_u64(offsets_start)?;
        self.out.close()
    }
}

/// Builds one new segment, then publishes it (plus any merges) as the next
/// TOC generation. Holds the index write lock for its whole lifetime.
pub struct SegmentWriter {
    storage: Arc<dyn Storage>,
    index_name: String,
    schema: Schema,
    lock: Option<StorageLock>,
    generation: i32,
    segment_counter: u32,
    segments: SegmentSet,
    new_segment_name: String,
    pool: PostingPool,
    terms: TermsWriter<FileHandle>,
    postings: PostingsWriter<FileHandle>,
    lengths: StructWriter<FileHandle>,
    stored: StoredWriter,
    vectors: VectorWriter<FileHandle, FileHandle>,
    doc_count: DocNum,
    frozen: bool,
    snapshot_readers: Option<Vec<SegmentReader>>,
}

impl SegmentWriter {
    pub fn open(
        storage: Arc<dyn Storage>,
        index_name: &str,
        lock_timeout: Duration,
    ) -> Result<SegmentWriter, Error> {
        let lock = storage.lock(&write_lock_name(index_name), lock_timeout)?;
        let toc = read_toc(&*storage, index_name, None)?;
        let generation = toc.generation + 1;
        let segment_counter = toc.segment_counter + 1;
        let new_segment_name = segment_name(index_name, segment_counter);

        let file = |ext: &str| format!("{}.{}", new_segment_name, ext);
        let terms = TermsWriter::new(storage.create_file(&file(TERMS_EXT))?)?;
        let postings = PostingsWriter::new(storage.create_file(&file(POSTINGS_EXT))?)?;
        let lengths = storage.create_file(&file(LENGTHS_EXT))?;
        let stored = StoredWriter::new(storage.create_file(&file(STORED_EXT))?)?;
        let vectors = VectorWriter::new(
            storage.create_file(&file(VECTOR_INDEX_EXT))?,
            storage.create_file(&file(VECTOR_POSTS_EXT))?,
        )?;

        Ok(SegmentWriter {
            storage,
            index_name: index_name.to_string(),
            schema: toc.schema,
            lock: Some(lock),
            generation,
            segment_counter,
            segments: toc.segments,
            new_segment_name,
            pool: PostingPool::with_default_limit(),
            terms,
            postings,
            lengths,
            stored,
            vectors,
            doc_count: 0,
            frozen: false,
            snapshot_readers: None,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Schema additions are only allowed before the first document.
    pub fn add_field(&mut self, name: &str, field: Field) -> Result<(), Error> {
        if self.frozen {
            return Err(Error::SchemaFrozen);
        }
        self.schema.add(name, field)
    }

    pub fn doc_count(&self) -> DocNum {
        self.doc_count
    }

    pub fn add_document(&mut self, doc: &Document) -> Result<DocNum, Error> {
        let docnum = self.doc_count;
        let mut stored_map = StoredFields::new();

        for (name, value) in doc.entries() {
            let field = self.schema.expect(name)?.clone();
            let fieldnum = self.schema.field_num(name).unwrap();

            if field.indexed {
                let text = value.as_text().ok_or_else(|| {
                    Error::FieldConfig(format!("indexed field {:?} needs a text value", name))
                })?;
                self.pool.add_content(docnum, fieldnum, &field, text)?;

                if let Some(vector_format) = field.vector {
                    let (words, _) = vector_format.word_values(&field.analyzer, text);
                    let items: Vec<(String, f32, Vec<u8>)> = words
                        .into_iter()
                        .map(|w| (w.term, w.weight, w.payload))
                        .collect();
                    self.vectors.add(docnum, fieldnum, &items)?;
                }
            }

            if field.stored {
                let stored_value = doc.stored_override(name).unwrap_or(value);
                stored_map.insert(name.to_string(), stored_value.to_json());
            }
        }

        self.stored.add(&stored_map)?;
        self.doc_count += 1;
        self.frozen = true;
        Ok(docnum)
    }

    /// Add, then soft-delete prior documents matching any unique field
    /// present on this document.
    pub fn update_document(&mut self, doc: &Document) -> Result<DocNum, Error> {
        let docnum = self.add_document(doc)?;
        let unique: Vec<String> = self
            .schema
            .unique_fields()
            .into_iter()
            .map(|f| f.to_string())
            .collect();
        for field_name in unique {
            let value = doc
                .entries()
                .into_iter()
                .find(|(name, _)| *name == field_name)
                .and_then(|(_, v)| v.as_text().map(|t| t.to_string()));
            if let Some(text) = value {
                let field = self.schema.expect(&field_name)?.clone();
                let (words, _) = field.format.word_values(&field.analyzer, &text);
                for word in words {
                    self.delete_by_term(&field_name, &word.term)?;
                }
            }
        }
        Ok(docnum)
    }

    fn snapshot_readers(&mut self) -> Result<(), Error> {
        if self.snapshot_readers.is_some() {
            return Ok(());
        }
        let mut readers = Vec::with_capacity(self.segments.len());
        for segment in self.segments.iter() {
            readers.push(SegmentReader::open(
                &*self.storage,
                self.schema.clone(),
                segment.clone(),
                INNER_GENERATION,
            )?);
        }
        self.snapshot_readers = Some(readers);
        Ok(())
    }

    /// Soft-delete matches in the snapshotted segments. The new in-progress
    /// segment is not searched.
    pub fn delete_by_term(&mut self, field: &str, term: &str) -> Result<u32, Error> {
        self.snapshot_readers()?;
        let readers = self.snapshot_readers.as_ref().unwrap();
        let mut count = 0;
        for (index, reader) in readers.iter().enumerate() {
            let locals = match reader.postings(field, term) {
                Ok(mut matcher) => all_ids(&mut *matcher)?,
                Err(Error::TermNotFound(_, _)) => continue,
                Err(e) => return Err(e),
            };
            let segment = self.segments.segment_mut(index);
            for local in locals {
                // a doc can match more than one unique field
                if !segment.is_deleted(local) {
                    segment.delete_document(local, true)?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    pub fn delete_document(&mut self, docnum: DocNum) -> Result<(), Error> {
        self.segments.delete_document(docnum, true)
    }

    pub fn is_deleted(&self, docnum: DocNum) -> Result<bool, Error> {
        self.segments.is_deleted(docnum)
    }

    pub fn has_deletions(&self) -> bool {
        self.segments.has_deletions()
    }

    pub fn deleted_count(&self) -> DocNum {
        self.segments.deleted_count()
    }

    /// Absorb every live document (postings, lengths, stored fields,
    /// vectors) from another reader, remapping docnums onto the end of the
    /// new segment.
    pub fn add_reader(&mut self, reader: &dyn IndexReader) -> Result<(), Error> {
        let mut docmap: BTreeMap<DocNum, DocNum> = BTreeMap::new();
        let mut next = self.doc_count;
        for old in 0..reader.doc_count_all() {
            if !reader.is_deleted(old) {
                docmap.insert(old, next);
                next += 1;
            }
        }

        let vector_fields: Vec<(u16, String)> = self
            .schema
            .iter()
            .enumerate()
            .filter(|(_, (_, f))| f.vector.is_some())
            .map(|(num, (name, _))| (num as u16, name.clone()))
            .collect();
        let scorable: Vec<(u16, String)> = self
            .schema
            .scorable_fields()
            .into_iter()
            .map(|(num, name)| (num, name.to_string()))
            .collect();

        for (old, new) in &docmap {
            self.stored.add(&reader.stored_fields(*old)?)?;
            for (fieldnum, name) in &scorable {
                let length = reader.doc_field_length(*old, name);
                if length > 0 {
                    self.pool.add_field_length(*new, *fieldnum, length);
                }
            }
            for (fieldnum, name) in &vector_fields {
                if reader.has_vector(*old, name) {
                    let mut cursor = reader.vector(*old, name)?;
                    let mut items = Vec::new();
                    while cursor.is_active() {
                        items.push((
                            cursor.term().to_string(),
                            cursor.weight(),
                            cursor.value().to_vec(),
                        ));
                        cursor.next()?;
                    }
                    self.vectors.add(*new, *fieldnum, &items)?;
                }
            }
        }

        for entry in reader.term_iter() {
            let fieldnum = self
                .schema
                .field_num(&entry.field)
                .ok_or_else(|| Error::UnknownField(entry.field.clone()))?;
            // deleted docs are already excluded by the reader's matcher
            let mut matcher = match reader.postings(&entry.field, &entry.term) {
                Ok(m) => m,
                Err(Error::TermNotFound(_, _)) => continue,
                Err(e) => return Err(e),
            };
            while matcher.is_active() {
                let old = matcher.id();
                if let Some(new) = docmap.get(&old) {
                    self.pool.add_posting(
                        fieldnum,
                        &entry.term,
                        *new,
                        matcher.weight(),
                        &matcher.value(),
                    )?;
                }
                matcher.next()?;
            }
        }

        self.doc_count = next;
        self.frozen = true;
        Ok(())
    }

    /// Commit with the default policy: MERGE_SMALL.
    pub fn commit(self) -> Result<(), Error> {
        self.commit_with(MergeType::MergeSmall)
    }

    pub fn commit_with(mut self, mergetype: MergeType) -> Result<(), Error> {
        // 1-2: run the merge policy against the snapshotted segments
        let (absorb, keep) = match mergetype {
            MergeType::NoMerge => (Vec::new(), self.segments.segments().to_vec()),
            MergeType::Optimize => (self.segments.segments().to_vec(), Vec::new()),
            MergeType::MergeSmall => select_small_merges(&self.segments),
        };
        if !absorb.is_empty() {
            log::info!(
                "merging {} of {} segments into {:?}",
                absorb.len(),
                self.segments.len(),
                self.new_segment_name
            );
        }
        for segment in &absorb {
            let reader = SegmentReader::open(
                &*self.storage,
                self.schema.clone(),
                segment.clone(),
                INNER_GENERATION,
            )?;
            self.add_reader(&reader)?;
        }

        // 3: finalize the pool into the new segment's files
        let added = self.doc_count > 0;
        let mut surviving = SegmentSet::new(keep);
        if added {
            let stats = self.pool.finish(
                self.doc_count,
                &mut self.lengths,
                &mut self.terms,
                &mut self.postings,
            )?;
            let mut totals = BTreeMap::new();
            let mut maxes = BTreeMap::new();
            for (fieldnum, total) in &stats.field_length_totals {
                if let Some(name) = self.schema.field_name(*fieldnum) {
                    totals.insert(name.to_string(), *total);
                }
            }
            for (fieldnum, max) in &stats.field_length_maxes {
                if let Some(name) = self.schema.field_name(*fieldnum) {
                    maxes.insert(name.to_string(), *max);
                }
            }
            // 4: the new segment joins the surviving set
            surviving.push(Segment::new(
                self.new_segment_name.clone(),
                self.doc_count,
                totals,
                maxes,
            ));
        } else {
            self.pool.cancel();
        }

        // 5: close the segment streams
        self.terms.into_inner().close()?;
        self.postings.into_inner().close()?;
        self.lengths.close()?;
        self.stored.close()?;
        let (vec_index, vec_posts) = self.vectors.into_inner();
        vec_index.close()?;
        vec_posts.close()?;

        // 6: publish the new generation
        let toc = Toc {
            schema: self.schema,
            generation: self.generation,
            segment_counter: self.segment_counter,
            segments: surviving,
        };
        write_toc(&*self.storage, &self.index_name, &toc)?;

        // 7: best-effort cleanup of stale files, briefly under the read lock
        {
            let _read_guard = self
                .storage
                .lock(&read_lock_name(&self.index_name), Duration::from_secs(5))?;
            let keep_names: HashSet<String> =
                toc.segments.iter().map(|s| s.name().to_string()).collect();
            let current_toc = toc_file_name(&self.index_name, self.generation);
            let prefix = format!("_{}_", self.index_name);
            for file in self.storage.list_files()? {
                if !file.starts_with(&prefix) {
                    continue;
                }
                let stale = if file.ends_with(".toc") {
                    file != current_toc
                } else if file.contains(".toc.") {
                    // an orphaned temp from an interrupted publish
                    true
                } else if let Some(dot) = file.rfind('.') {
                    let stem = &file[..dot];
                    let ext = &file[dot + 1..];
                    SEGMENT_EXTS.contains(&ext) && !keep_names.contains(stem)
                } else {
                    false
                };
                if stale {
                    // may fail while a reader still holds it open
                    if let Err(e) = self.storage.delete_file(&file) {
                        log::debug!("leaving stale file {:?} behind: {:?}", file, e);
                    }
                }
            }
        }

        // 8: release the write lock
        drop(self.lock.take());
        Ok(())
    }

    /// Abort: drop the pool, close streams, release the lock. Partial
    /// segment files are orphaned and cleaned by a later commit.
    pub fn cancel(mut self) -> Result<(), Error> {
        self.pool.cancel();
        self.terms.into_inner().close()?;
        self.postings.into_inner().close()?;
        self.lengths.close()?;
        self.stored.close()?;
        let (vec_index, vec_posts) = self.vectors.into_inner();
        vec_index.close()?;
        vec_posts.close()?;
        drop(self.lock.take());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::pool::DOCLENGTH_LIMIT;
    use crate::schema::Field;
    use crate::storage::RamStorage;

    fn ram() -> Arc<dyn Storage> {
        Arc::new(RamStorage::new())
    }

    fn keyword_index(storage: Arc<dyn Storage>) -> Index {
        let mut schema = Schema::new();
        schema.add("content", Field::keyword()).unwrap();
        Index::create(storage, schema).unwrap()
    }

    fn doc(field: &str, text: &str) -> Document {
        let mut d = Document::new();
        d.text(field, text);
        d
    }

    #[test]
    fn basic_indexing_statistics() {
        // three keyword docs, then the exact term table
        let storage = ram();
        let ix = keyword_index(storage);

        let mut w = ix.writer().unwrap();
        w.add_document(&doc("content", "A B C D E")).unwrap();
        w.add_document(&doc("content", "B B B B C D D")).unwrap();
        w.add_document(&doc("content", "D E F")).unwrap();
        w.commit().unwrap();

        let r = ix.reader().unwrap();
        assert_eq!(r.doc_count_all(), 3);
        assert_eq!(r.doc_frequency("content", "B"), 2);
        assert_eq!(r.frequency("content", "B"), 5.0);
        assert_eq!(r.doc_frequency("content", "E"), 2);
        assert_eq!(r.frequency("content", "E"), 2.0);
        assert_eq!(r.doc_frequency("content", "A"), 1);
        assert_eq!(r.frequency("content", "A"), 1.0);
        assert_eq!(r.doc_frequency("content", "D"), 3);
        assert_eq!(r.frequency("content", "D"), 4.0);
        assert_eq!(r.doc_frequency("content", "F"), 1);
        assert_eq!(r.frequency("content", "F"), 1.0);
        assert_eq!(r.doc_frequency("content", "Z"), 0);
        assert_eq!(r.frequency("content", "Z"), 0.0);

        let entries: Vec<(String, String, u32, f32)> = r
            .term_iter()
            .map(|e| (e.field, e.term, e.doc_freq, e.collection_freq))
            .collect();
        let expected: Vec<(String, String, u32, f32)> = vec![
            ("content", "A", 1, 1.0),
            ("content", "B", 2, 5.0),
            ("content", "C", 2, 2.0),
            ("content", "D", 3, 4.0),
            ("content", "E", 2, 2.0),
            ("content", "F", 1, 1.0),
        ]
        .into_iter()
        .map(|(f, t, df, cf)| (f.to_string(), t.to_string(), df, cf))
        .collect();
        assert_eq!(entries, expected);
    }

    #[test]
    fn multi_segment_lexicon_merges() {
        let storage = ram();
        let mut schema = Schema::new();
        schema.add("name", Field::text()).unwrap();
        schema.add("value", Field::text()).unwrap();
        let ix = Index::create(storage, schema).unwrap();

        let mut w = ix.writer().unwrap();
        let mut d = Document::new();
        d.text("name", "Yellow brown").text("value", "Blue red green purple?");
        w.add_document(&d).unwrap();
        let mut d = Document::new();
        d.text("name", "Alpha beta").text("value", "Gamma delta epsilon omega.");
        w.add_document(&d).unwrap();
        w.commit().unwrap();

        let mut w = ix.writer().unwrap();
        let mut d = Document::new();
        d.text("name", "One two").text("value", "Three four five.");
        w.add_document(&d).unwrap();
        w.commit_with(MergeType::NoMerge).unwrap();

        let r = ix.reader().unwrap();
        assert_eq!(r.doc_count_all(), 3);
        assert_eq!(
            r.lexicon("name"),
            vec!["alpha", "beta", "brown", "one", "two", "yellow"]
        );
    }

    #[test]
    fn merged_lengths_across_segments() {
        // S2: three NO_MERGE commits of two docs each
        let storage = ram();
        let mut schema = Schema::new();
        schema.add("f1", Field::keyword().stored().scorable()).unwrap();
        schema.add("f2", Field::keyword().stored().scorable()).unwrap();
        let ix = Index::create(storage, schema).unwrap();

        let batches: Vec<(&str, &str)> = vec![
            ("A B C", "X"),
            ("B C D E", "Y Z"),
            ("A", "B C D E X Y"),
            ("B C", "X"),
            ("A B X Y Z", "B C"),
            ("Y X", "A B"),
        ];
        for pair in batches.chunks(2) {
            let mut w = ix.writer().unwrap();
            for (f1, f2) in pair {
                let mut d = Document::new();
                d.text("f1", *f1).text("f2", *f2);
                w.add_document(&d).unwrap();
            }
            w.commit_with(MergeType::NoMerge).unwrap();
        }

        let r = ix.reader().unwrap();
        assert_eq!(r.doc_count_all(), 6);
        assert_eq!(
            r.stored_fields(0).unwrap()["f1"],
            serde_json::json!("A B C")
        );
        assert_eq!(r.doc_field_length(0, "f1"), 3);
        assert_eq!(r.doc_field_length(2, "f2"), 6);
        assert_eq!(r.doc_field_length(4, "f1"), 5);
        // reader-wide lengths are segment sums
        assert_eq!(r.field_length("f1"), 3 + 4 + 1 + 2 + 5 + 2);
    }

    #[test]
    fn lengths_per_document() {
        let storage = ram();
        let mut schema = Schema::new();
        schema.add("f1", Field::keyword().stored().scorable()).unwrap();
        schema.add("f2", Field::keyword().stored().scorable()).unwrap();
        let ix = Index::create(storage, schema).unwrap();

        let mut w = ix.writer().unwrap();
        let rows = vec![
            ("A B C D E", "X Y Z"),
            ("B B B B C D D Q", "Q R S T"),
            ("D E F", "U V A B C D E"),
        ];
        for (f1, f2) in rows {
            let mut d = Document::new();
            d.text("f1", f1).text("f2", f2);
            w.add_document(&d).unwrap();
        }
        w.commit().unwrap();

        let r = ix.reader().unwrap();
        assert_eq!(r.doc_field_length(0, "f1"), 5);
        assert_eq!(r.doc_field_length(1, "f1"), 8);
        assert_eq!(r.doc_field_length(2, "f1"), 3);
        assert_eq!(r.doc_field_length(0, "f2"), 3);
        assert_eq!(r.doc_field_length(1, "f2"), 4);
        assert_eq!(r.doc_field_length(2, "f2"), 7);
        assert_eq!(r.field_length("f1"), 16);
        assert_eq!(r.field_length("f2"), 14);
        assert_eq!(r.max_field_length("f1"), 8);
    }

    #[test]
    fn sparse_fields_read_zero_lengths() {
        let storage = ram();
        let mut schema = Schema::new();
        schema.add("f1", Field::keyword().scorable()).unwrap();
        schema.add("f2", Field::keyword().scorable()).unwrap();
        let ix = Index::create(storage, schema).unwrap();

        let mut w = ix.writer().unwrap();
        for length in &[10u32, 20, 2] {
            let text: Vec<&str> = std::iter::repeat("Q").take(*length as usize).collect();
            w.add_document(&doc("f2", &text.join(" "))).unwrap();
        }
        w.commit().unwrap();

        let r = ix.reader().unwrap();
        for docnum in 0..3 {
            assert_eq!(r.doc_field_length(docnum, "f1"), 0);
        }
        assert_eq!(r.doc_field_length(0, "f2"), 10);
        assert_eq!(r.doc_field_length(1, "f2"), 20);
        assert_eq!(r.doc_field_length(2, "f2"), 2);
    }

    #[test]
    fn long_fields_cap_stored_length() {
        let storage = ram();
        let mut schema = Schema::new();
        schema.add("field", Field::keyword().scorable()).unwrap();
        let ix = Index::create(storage, schema).unwrap();

        let size = DOCLENGTH_LIMIT + 20;
        let words: Vec<&str> = std::iter::repeat("alfa").take(size as usize).collect();
        let mut w = ix.writer().unwrap();
        w.add_document(&doc("field", &words.join(" "))).unwrap();
        w.commit().unwrap();

        let r = ix.reader().unwrap();
        assert_eq!(r.doc_field_length(0, "field"), DOCLENGTH_LIMIT);
    }

    #[test]
    fn deletion_and_optimize() {
        let storage = ram();
        let mut schema = Schema::new();
        schema.add("key", Field::id()).unwrap();
        schema.add("name", Field::text()).unwrap();
        let mut ix = Index::create(storage, schema).unwrap();

        let mut w = ix.writer().unwrap();
        for (key, name) in &[("A", "Yellow brown"), ("B", "Alpha beta"), ("C", "One two")] {
            let mut d = Document::new();
            d.text("key", *key).text("name", *name);
            w.add_document(&d).unwrap();
        }
        w.commit().unwrap();

        ix.refresh().unwrap();
        let count = ix.delete_by_term("key", "B").unwrap();
        assert_eq!(count, 1);
        ix.commit().unwrap();

        assert_eq!(ix.doc_count_all(), 3);
        assert_eq!(ix.doc_count(), 2);

        ix.optimize().unwrap();
        assert_eq!(ix.doc_count(), 2);
        assert_eq!(ix.doc_count_all(), 2);

        let r = ix.reader().unwrap();
        assert_eq!(r.lexicon("name"), vec!["brown", "one", "two", "yellow"]);
    }

    #[test]
    fn update_by_unique_fields() {
        // S7
        let storage = ram();
        let mut schema = Schema::new();
        schema.add("id", Field::id().unique().stored()).unwrap();
        schema.add("path", Field::id().unique().stored()).unwrap();
        schema.add("text", Field::text()).unwrap();
        let mut ix = Index::create(storage, schema).unwrap();

        let docs = vec![
            ("test1", "/test/1", "Hello"),
            ("test2", "/test/2", "There"),
            ("test3", "/test/3", "Reader"),
        ];
        let mut w = ix.writer().unwrap();
        for (id, path, text) in &docs {
            let mut d = Document::new();
            d.text("id", *id).text("path", *path).text("text", *text);
            w.add_document(&d).unwrap();
        }
        w.commit().unwrap();

        let mut w = ix.writer().unwrap();
        let mut d = Document::new();
        d.text("id", "test2")
            .text("path", "/test/1")
            .text("text", "Replacement");
        w.update_document(&d).unwrap();
        w.commit_with(MergeType::NoMerge).unwrap();

        ix.refresh().unwrap();
        // both the id match and the path match are gone
        assert_eq!(ix.doc_count_all(), 4);
        assert_eq!(ix.doc_count(), 2);

        ix.optimize().unwrap();
        assert_eq!(ix.doc_count_all(), 2);
        let r = ix.reader().unwrap();
        let mut ids: Vec<String> = Vec::new();
        for fields in r.all_stored_fields().unwrap() {
            ids.push(fields["id"].as_str().unwrap().to_string());
        }
        ids.sort();
        assert_eq!(ids, vec!["test2", "test3"]);
    }

    #[test]
    fn reindex_keeps_doc_count_stable() {
        let storage = ram();
        let mut schema = Schema::new();
        schema.add("id", Field::id().unique().stored()).unwrap();
        schema.add("text", Field::text().stored()).unwrap();
        let mut ix = Index::create(storage, schema).unwrap();

        let docs = vec![
            ("test1", "This is a document. Awesome, is it not?"),
            ("test2", "Another document. Astounding!"),
            ("test3", "A fascinating article on the behavior of domestic steak knives."),
        ];
        for _ in 0..2 {
            let mut w = ix.writer().unwrap();
            for (id, text) in &docs {
                let mut d = Document::new();
                d.text("id", *id).text("text", *text);
                w.update_document(&d).unwrap();
            }
            w.commit_with(MergeType::Optimize).unwrap();
            ix.refresh().unwrap();
            assert_eq!(ix.doc_count_all(), 3);
            assert_eq!(ix.doc_count(), 3);
        }
    }

    #[test]
    fn merge_small_follows_fibonacci_rule() {
        use std::collections::BTreeMap;
        let seg = |name: &str, docs: DocNum| {
            Segment::new(name.to_string(), docs, BTreeMap::new(), BTreeMap::new())
        };

        // running totals 2, 5, 105: fib(5)=5, fib(6)=8, fib(7)=13
        let set = SegmentSet::new(vec![seg("a", 100), seg("b", 3), seg("c", 2)]);
        let (absorb, keep) = select_small_merges(&set);
        let absorbed: Vec<&str> = absorb.iter().map(|s| s.name()).collect();
        let kept: Vec<&str> = keep.iter().map(|s| s.name()).collect();
        assert_eq!(absorbed, vec!["c", "b"]);
        assert_eq!(kept, vec!["a"]);

        // a lone big segment is left alone, twice over
        let set = SegmentSet::new(vec![seg("a", 100)]);
        let (absorb, keep) = select_small_merges(&set);
        assert!(absorb.is_empty());
        assert_eq!(keep.len(), 1);
        let again = SegmentSet::new(keep);
        let (absorb, keep) = select_small_merges(&again);
        assert!(absorb.is_empty());
        assert_eq!(keep.len(), 1);
    }

    #[test]
    fn merge_small_compacts_on_commit() {
        let storage = ram();
        let ix = keyword_index(storage.clone());

        // two tiny segments
        for text in &["a b", "c d"] {
            let mut w = ix.writer().unwrap();
            w.add_document(&doc("content", text)).unwrap();
            w.commit_with(MergeType::NoMerge).unwrap();
        }
        assert_eq!(ix.reader().unwrap().doc_count_all(), 2);

        // the default commit folds them into the new segment
        let mut w = ix.writer().unwrap();
        w.add_document(&doc("content", "e f")).unwrap();
        w.commit().unwrap();

        let reopened = Index::open(storage.clone()).unwrap();
        assert_eq!(reopened.segment_count(), 1);
        assert_eq!(reopened.doc_count_all(), 3);
        let r = reopened.reader().unwrap();
        for term in &["a", "b", "c", "d", "e", "f"] {
            assert_eq!(r.doc_frequency("content", term), 1);
        }

        // the absorbed segments' files and superseded TOCs were cleaned up
        for stale in &[
            "_main_1.trm",
            "_main_2.trm",
            "_main_0.toc",
            "_main_1.toc",
            "_main_2.toc",
        ] {
            assert!(!storage.file_exists(stale), "{} should be gone", stale);
        }
        assert!(storage.file_exists("_main_3.trm"));
        assert!(storage.file_exists("_main_3.toc"));
    }

    #[test]
    fn writer_lock_is_exclusive() {
        let storage = ram();
        let _ix = keyword_index(storage.clone());
        let first = SegmentWriter::open(storage.clone(), "main", Duration::from_millis(60)).unwrap();
        assert!(matches!(
            SegmentWriter::open(storage.clone(), "main", Duration::from_millis(60)),
            Err(Error::LockTimeout(_))
        ));
        first.cancel().unwrap();
        // cancel released the lock
        let second = SegmentWriter::open(storage, "main", Duration::from_millis(60)).unwrap();
        second.cancel().unwrap();
    }

    #[test]
    fn schema_freezes_after_first_document() {
        let storage = ram();
        let ix = keyword_index(storage);
        let mut w = ix.writer().unwrap();
        w.add_field("extra", Field::text()).unwrap();
        w.add_document(&doc("content", "a")).unwrap();
        assert!(matches!(
            w.add_field("late", Field::text()),
            Err(Error::SchemaFrozen)
        ));
        w.cancel().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let storage = ram();
        let ix = keyword_index(storage);
        let mut w = ix.writer().unwrap();
        assert!(matches!(
            w.add_document(&doc("bogus", "a")),
            Err(Error::UnknownField(_))
        ));
        w.cancel().unwrap();
    }

    #[test]
    fn cancel_leaves_no_committed_state() {
        let storage = ram();
        let ix = keyword_index(storage.clone());

        let mut w = ix.writer().unwrap();
        w.add_document(&doc("content", "a b c")).unwrap();
        let orphan = format!("{}.{}", segment_name("main", 1), TERMS_EXT);
        w.cancel().unwrap();
        // partial files are orphaned, but no TOC references them
        assert!(storage.file_exists(&orphan));
        assert_eq!(ix.latest_generation().unwrap(), 0);

        // the next writer reuses the counter, rewriting the orphan
        let mut w = ix.writer().unwrap();
        w.add_document(&doc("content", "d e f")).unwrap();
        w.commit().unwrap();

        let r = ix.reader().unwrap();
        assert_eq!(r.doc_count_all(), 1);
        assert_eq!(r.doc_frequency("content", "d"), 1);
        assert_eq!(r.doc_frequency("content", "a"), 0);
    }

    #[test]
    fn generations_strictly_increase() {
        let storage = ram();
        let ix = keyword_index(storage);
        let mut seen = Vec::new();
        for text in &["a", "b", "c"] {
            let mut w = ix.writer().unwrap();
            w.add_document(&doc("content", text)).unwrap();
            w.commit().unwrap();
            seen.push(ix.latest_generation().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
