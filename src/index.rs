use crate::matching::all_ids;
use crate::reading::{open_reader, IndexReader, SegmentReader, INNER_GENERATION};
use crate::schema::Schema;
use crate::searcher::Searcher;
use crate::segment::{Segment, SegmentSet};
use crate::storage::Storage;
use crate::writer::{MergeType, SegmentWriter};
use crate::{DocNum, Error};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_INDEX_NAME: &str = "main";

/// Bumped whenever the on-disk layout changes; readers refuse anything else.
pub const FORMAT_VERSION: i32 = 1;

const HEADER_SENTINEL: i32 = -12345;
const SIZEOF_INT: u64 = 4;
const SIZEOF_LONG: u64 = 8;
const SIZEOF_FLOAT: u64 = 4;
const LIB_VERSION: (u64, u64, u64) = (0, 1, 0);

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub fn toc_file_name(index: &str, generation: i32) -> String {
    format!("_{}_{}.toc", index, generation)
}

pub fn segment_name(index: &str, counter: u32) -> String {
    format!("_{}_{}", index, counter)
}

pub fn write_lock_name(index: &str) -> String {
    format!("_{}_WRITELOCK", index)
}

pub fn read_lock_name(index: &str) -> String {
    format!("_{}_READLOCK", index)
}

/// The generation record: schema snapshot, segment counter, and the ordered
/// segment list. One file per generation, published by atomic rename.
#[derive(Debug)]
pub struct Toc {
    pub schema: Schema,
    pub generation: i32,
    pub segment_counter: u32,
    pub segments: SegmentSet,
}

/// Scan storage for `_<index>_<N>.toc` files; -1 when none exist.
pub fn latest_generation(storage: &dyn Storage, index: &str) -> Result<i32, Error> {
    let prefix = format!("_{}_", index);
    let mut best: i32 = -1;
    for file in storage.list_files()? {
        if !file.starts_with(&prefix) || !file.ends_with(".toc") {
            continue;
        }
        let middle = &file[prefix.len()..file.len() - 4];
        if let Ok(generation) = middle.parse::<i32>() {
            best = best.max(generation);
        }
    }
    Ok(best)
}

pub fn write_toc(storage: &dyn Storage, index: &str, toc: &Toc) -> Result<(), Error> {
    let final_name = toc_file_name(index, toc.generation);
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_name = format!("{}.{}", final_name, nonce);

    let mut out = storage.create_file(&temp_name)?;
    out.write_vbyte(SIZEOF_INT)?;
    out.write_vbyte(SIZEOF_LONG)?;
    out.write_vbyte(SIZEOF_FLOAT)?;
    out.write_i32(HEADER_SENTINEL)?;
    out.write_i32(FORMAT_VERSION)?;
    out.write_vbyte(LIB_VERSION.0)?;
    out.write_vbyte(LIB_VERSION.1)?;
    out.write_vbyte(LIB_VERSION.2)?;
    out.write_json(&toc.schema)?;
    out.write_i32(toc.generation)?;
    out.write_i32(toc.segment_counter as i32)?;
    out.write_json(&toc.segments.segments())?;
    out.close()?;

    storage.rename_file(&temp_name, &final_name, true)?;
    log::info!(
        "published generation {} of index {:?} ({} segments)",
        toc.generation,
        index,
        toc.segments.len()
    );
    Ok(())
}

pub fn read_toc(
    storage: &dyn Storage,
    index: &str,
    generation: Option<i32>,
) -> Result<Toc, Error> {
    let generation = match generation {
        Some(g) => g,
        None => {
            let latest = latest_generation(storage, index)?;
            if latest < 0 {
                return Err(Error::EmptyIndex);
            }
            latest
        }
    };

    let mut input = match storage.open_file(&toc_file_name(index, generation), false) {
        Ok(input) => input,
        Err(Error::FileNotFound(_)) => return Err(Error::EmptyIndex),
        Err(e) => return Err(e),
    };

    if input.read_vbyte()? != SIZEOF_INT
        || input.read_vbyte()? != SIZEOF_LONG
        || input.read_vbyte()? != SIZEOF_FLOAT
    {
        return Err(Error::ArchMismatch);
    }
    if input.read_i32()? != HEADER_SENTINEL {
        return Err(Error::ArchMismatch);
    }
    let version = input.read_i32()?;
    if version != FORMAT_VERSION {
        return Err(Error::IndexVersion(version));
    }
    let major = input.read_vbyte()?;
    let minor = input.read_vbyte()?;
    let patch = input.read_vbyte()?;
    log::debug!(
        "toc written by library version {}.{}.{}",
        major,
        minor,
        patch
    );

    let schema: Schema = input.read_json()?;
    let stored_generation = input.read_i32()?;
    let segment_counter = input.read_i32()? as u32;
    let segments: Vec<Segment> = input.read_json()?;

    Ok(Toc {
        schema,
        generation: stored_generation,
        segment_counter,
        segments: SegmentSet::new(segments),
    })
}

/// Handle on one named index inside a storage; carries the TOC snapshot it
/// was opened (or last refreshed) at.
pub struct Index {
    storage: Arc<dyn Storage>,
    name: String,
    toc: Toc,
}

impl Index {
    pub fn create(storage: Arc<dyn Storage>, schema: Schema) -> Result<Index, Error> {
        Index::create_named(storage, schema, DEFAULT_INDEX_NAME)
    }

    /// Write generation 0 of a fresh index, wiping any prior files that
    /// belong to the same index name.
    pub fn create_named(
        storage: Arc<dyn Storage>,
        schema: Schema,
        name: &str,
    ) -> Result<Index, Error> {
        let prefix = format!("_{}_", name);
        for file in storage.list_files()? {
            if file.starts_with(&prefix) {
                let _ = storage.delete_file(&file);
            }
        }
        let toc = Toc {
            schema,
            generation: 0,
            segment_counter: 0,
            segments: SegmentSet::default(),
        };
        write_toc(&*storage, name, &toc)?;
        Ok(Index {
            storage,
            name: name.to_string(),
            toc,
        })
    }

    pub fn open(storage: Arc<dyn Storage>) -> Result<Index, Error> {
        Index::open_named(storage, DEFAULT_INDEX_NAME)
    }

    pub fn open_named(storage: Arc<dyn Storage>, name: &str) -> Result<Index, Error> {
        let toc = read_toc(&*storage, name, None)?;
        Ok(Index {
            storage,
            name: name.to_string(),
            toc,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.toc.schema
    }

    pub fn generation(&self) -> i32 {
        self.toc.generation
    }

    pub fn latest_generation(&self) -> Result<i32, Error> {
        latest_generation(&*self.storage, &self.name)
    }

    pub fn up_to_date(&self) -> Result<bool, Error> {
        Ok(self.latest_generation()? == self.toc.generation)
    }

    /// Re-read the newest TOC.
    pub fn refresh(&mut self) -> Result<(), Error> {
        self.toc = read_toc(&*self.storage, &self.name, None)?;
        Ok(())
    }

    pub fn doc_count_all(&self) -> DocNum {
        self.toc.segments.doc_count_all()
    }

    pub fn doc_count(&self) -> DocNum {
        self.toc.segments.doc_count()
    }

    pub fn field_length(&self, field: &str) -> u64 {
        self.toc.segments.field_length(field)
    }

    pub fn segment_count(&self) -> usize {
        self.toc.segments.len()
    }

    /// Snapshot reader over the current newest generation. The read lock is
    /// held only while the TOC is resolved and segment files opened.
    pub fn reader(&self) -> Result<Box<dyn IndexReader>, Error> {
        let _guard = self
            .storage
            .lock(&read_lock_name(&self.name), DEFAULT_LOCK_TIMEOUT)?;
        let toc = read_toc(&*self.storage, &self.name, None)?;
        open_reader(
            &*self.storage,
            &toc.schema,
            &toc.segments,
            toc.generation as i64,
        )
    }

    pub fn searcher(&self) -> Result<Searcher, Error> {
        Ok(Searcher::new(self.reader()?))
    }

    pub fn writer(&self) -> Result<SegmentWriter, Error> {
        SegmentWriter::open(self.storage.clone(), &self.name, DEFAULT_LOCK_TIMEOUT)
    }

    /// Soft-delete every document matching `(field, term)` in this handle's
    /// snapshot; publish with [Index::commit].
    pub fn delete_by_term(&mut self, field: &str, term: &str) -> Result<u32, Error> {
        let mut count = 0;
        for index in 0..self.toc.segments.len() {
            let segment = self.toc.segments.segments()[index].clone();
            let reader = SegmentReader::open(
                &*self.storage,
                self.toc.schema.clone(),
                segment,
                INNER_GENERATION,
            )?;
            let locals = match reader.postings(field, term) {
                Ok(mut matcher) => all_ids(&mut *matcher)?,
                Err(Error::TermNotFound(_, _)) => continue,
                Err(e) => return Err(e),
            };
            let segment = self.toc.segments.segment_mut(index);
            for local in locals {
                segment.delete_document(local, true)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Publish this handle's segment set (with any delete-set changes) as a
    /// new generation. No segment files are touched.
    pub fn commit(&mut self) -> Result<(), Error> {
        let _guard = self
            .storage
            .lock(&write_lock_name(&self.name), DEFAULT_LOCK_TIMEOUT)?;
        self.toc.generation += 1;
        write_toc(&*self.storage, &self.name, &self.toc)
    }

    /// Merge everything down to one segment.
    pub fn optimize(&mut self) -> Result<(), Error> {
        let writer = self.writer()?;
        writer.commit_with(MergeType::Optimize)?;
        self.refresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::storage::RamStorage;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.add("content", Field::keyword()).unwrap();
        s
    }

    fn ram() -> Arc<dyn Storage> {
        Arc::new(RamStorage::new())
    }

    #[test]
    fn toc_round_trip() {
        let storage = ram();
        let toc = Toc {
            schema: schema(),
            generation: 3,
            segment_counter: 7,
            segments: SegmentSet::default(),
        };
        write_toc(&*storage, "ix", &toc).unwrap();
        assert!(storage.file_exists("_ix_3.toc"));

        let back = read_toc(&*storage, "ix", Some(3)).unwrap();
        assert_eq!(back.generation, 3);
        assert_eq!(back.segment_counter, 7);
        assert!(back.schema.contains("content"));
        assert!(back.segments.is_empty());
    }

    #[test]
    fn missing_index_is_empty_error() {
        let storage = ram();
        assert!(matches!(
            read_toc(&*storage, "nope", None),
            Err(Error::EmptyIndex)
        ));
        assert!(matches!(
            Index::open(storage),
            Err(Error::EmptyIndex)
        ));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let storage = ram();
        // hand-write a TOC with an alien version tag
        let mut out = storage.create_file("_ix_0.toc").unwrap();
        out.write_vbyte(4).unwrap();
        out.write_vbyte(8).unwrap();
        out.write_vbyte(4).unwrap();
        out.write_i32(HEADER_SENTINEL).unwrap();
        out.write_i32(99).unwrap();
        out.close().unwrap();
        assert!(matches!(
            read_toc(&*storage, "ix", Some(0)),
            Err(Error::IndexVersion(99))
        ));
    }

    #[test]
    fn sentinel_mismatch_is_rejected() {
        let storage = ram();
        let mut out = storage.create_file("_ix_0.toc").unwrap();
        out.write_vbyte(4).unwrap();
        out.write_vbyte(8).unwrap();
        out.write_vbyte(4).unwrap();
        out.write_i32(12345).unwrap();
        out.close().unwrap();
        assert!(matches!(
            read_toc(&*storage, "ix", Some(0)),
            Err(Error::ArchMismatch)
        ));
    }

    #[test]
    fn generation_discovery() {
        let storage = ram();
        assert_eq!(latest_generation(&*storage, "ix").unwrap(), -1);
        for generation in &[0, 2, 1] {
            let toc = Toc {
                schema: schema(),
                generation: *generation,
                segment_counter: 0,
                segments: SegmentSet::default(),
            };
            write_toc(&*storage, "ix", &toc).unwrap();
        }
        assert_eq!(latest_generation(&*storage, "ix").unwrap(), 2);
        // another index's files are invisible
        assert_eq!(latest_generation(&*storage, "other").unwrap(), -1);
    }

    #[test]
    fn create_open_refresh() {
        let storage = ram();
        let ix = Index::create(storage.clone(), schema()).unwrap();
        assert_eq!(ix.generation(), 0);
        assert_eq!(ix.doc_count_all(), 0);
        assert!(ix.up_to_date().unwrap());

        let reopened = Index::open(storage).unwrap();
        assert_eq!(reopened.generation(), 0);
        assert!(reopened.schema().contains("content"));
    }

    #[test]
    fn empty_index_reader() {
        let storage = ram();
        let ix = Index::create(storage, schema()).unwrap();
        let reader = ix.reader().unwrap();
        assert_eq!(reader.doc_count_all(), 0);
        assert_eq!(reader.generation(), 0);
        assert!(reader.term_iter().next().is_none());
    }
}
