use crate::{DocNum, Error};
use std::collections::{BTreeMap, BTreeSet};

pub const TERMS_EXT: &str = "trm";
pub const POSTINGS_EXT: &str = "pst";
pub const STORED_EXT: &str = "sto";
pub const LENGTHS_EXT: &str = "fln";
pub const VECTOR_INDEX_EXT: &str = "vec";
pub const VECTOR_POSTS_EXT: &str = "vps";

pub const SEGMENT_EXTS: &[&str] = &[
    TERMS_EXT,
    POSTINGS_EXT,
    STORED_EXT,
    LENGTHS_EXT,
    VECTOR_INDEX_EXT,
    VECTOR_POSTS_EXT,
];

/// Descriptor of one immutable unit of index data. The files never change
/// after commit; only the soft-delete set does, and it rides along in the
/// TOC's segment list rather than in the segment files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Segment {
    name: String,
    doc_count: DocNum,
    field_length_totals: BTreeMap<String, u64>,
    field_length_maxes: BTreeMap<String, u32>,
    deleted: Option<BTreeSet<DocNum>>,
}

impl Segment {
    pub fn new(
        name: String,
        doc_count: DocNum,
        field_length_totals: BTreeMap<String, u64>,
        field_length_maxes: BTreeMap<String, u32>,
    ) -> Segment {
        Segment {
            name,
            doc_count,
            field_length_totals,
            field_length_maxes,
            deleted: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self, ext: &str) -> String {
        format!("{}.{}", self.name, ext)
    }

    pub fn file_names(&self) -> Vec<String> {
        SEGMENT_EXTS.iter().map(|ext| self.file_name(ext)).collect()
    }

    /// High-water docnum count, deletions included.
    pub fn doc_count_all(&self) -> DocNum {
        self.doc_count
    }

    /// Live documents.
    pub fn doc_count(&self) -> DocNum {
        self.doc_count - self.deleted_count()
    }

    pub fn deleted_count(&self) -> DocNum {
        self.deleted.as_ref().map(|d| d.len() as DocNum).unwrap_or(0)
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted_count() > 0
    }

    pub fn is_deleted(&self, docnum: DocNum) -> bool {
        self.deleted
            .as_ref()
            .map(|d| d.contains(&docnum))
            .unwrap_or(false)
    }

    pub fn deleted_docs(&self) -> Vec<DocNum> {
        self.deleted
            .as_ref()
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Toggle soft-delete membership. Re-deleting a deleted docnum and
    /// un-deleting a live one are both errors; un-delete discards.
    pub fn delete_document(&mut self, docnum: DocNum, delete: bool) -> Result<(), Error> {
        if docnum >= self.doc_count {
            return Err(Error::DocNumOutOfRange(docnum));
        }
        if delete {
            let set = self.deleted.get_or_insert_with(BTreeSet::new);
            if !set.insert(docnum) {
                return Err(Error::DeleteState(docnum));
            }
        } else {
            let known = self
                .deleted
                .as_mut()
                .map(|set| set.remove(&docnum))
                .unwrap_or(false);
            if !known {
                return Err(Error::DeleteState(docnum));
            }
        }
        Ok(())
    }

    pub fn field_length(&self, field: &str) -> u64 {
        self.field_length_totals.get(field).cloned().unwrap_or(0)
    }

    pub fn max_field_length(&self, field: &str) -> u32 {
        self.field_length_maxes.get(field).cloned().unwrap_or(0)
    }
}

/// An ordered list of segments plus the cached prefix sums that translate
/// global docnums into `(segment, local docnum)` pairs.
#[derive(Clone, Debug, Default)]
pub struct SegmentSet {
    segments: Vec<Segment>,
    offsets: Vec<DocNum>,
}

impl SegmentSet {
    pub fn new(segments: Vec<Segment>) -> SegmentSet {
        let mut set = SegmentSet {
            segments,
            offsets: Vec::new(),
        };
        set.refresh_offsets();
        set
    }

    fn refresh_offsets(&mut self) {
        self.offsets.clear();
        let mut total = 0;
        for segment in &self.segments {
            self.offsets.push(total);
            total += segment.doc_count_all();
        }
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
        self.refresh_offsets();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Delete-set mutation does not move doc offsets, so handing out the
    /// segment is safe.
    pub fn segment_mut(&mut self, index: usize) -> &mut Segment {
        &mut self.segments[index]
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn doc_offsets(&self) -> &[DocNum] {
        &self.offsets
    }

    pub fn doc_count_all(&self) -> DocNum {
        self.segments.iter().map(|s| s.doc_count_all()).sum()
    }

    pub fn doc_count(&self) -> DocNum {
        self.segments.iter().map(|s| s.doc_count()).sum()
    }

    pub fn has_deletions(&self) -> bool {
        self.segments.iter().any(|s| s.has_deletions())
    }

    pub fn deleted_count(&self) -> DocNum {
        self.segments.iter().map(|s| s.deleted_count()).sum()
    }

    /// Translate a global docnum to `(segment index, local docnum)`.
    pub fn segment_for(&self, docnum: DocNum) -> Result<(usize, DocNum), Error> {
        let mut index = match self.offsets.binary_search(&docnum) {
            Ok(i) => i,
            Err(0) => return Err(Error::DocNumOutOfRange(docnum)),
            Err(i) => i - 1,
        };
        // step over empty segments sharing the same offset
        while index < self.segments.len()
            && docnum - self.offsets[index] >= self.segments[index].doc_count_all()
        {
            index += 1;
            if index >= self.segments.len() {
                return Err(Error::DocNumOutOfRange(docnum));
            }
        }
        Ok((index, docnum - self.offsets[index]))
    }

    pub fn delete_document(&mut self, docnum: DocNum, delete: bool) -> Result<(), Error> {
        let (index, local) = self.segment_for(docnum)?;
        self.segments[index].delete_document(local, delete)
    }

    pub fn is_deleted(&self, docnum: DocNum) -> Result<bool, Error> {
        let (index, local) = self.segment_for(docnum)?;
        Ok(self.segments[index].is_deleted(local))
    }

    /// Sum of stored per-field length totals across segments.
    pub fn field_length(&self, field: &str) -> u64 {
        self.segments.iter().map(|s| s.field_length(field)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(name: &str, docs: DocNum) -> Segment {
        Segment::new(name.to_string(), docs, BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn file_names_are_derived() {
        let s = seg("_ix_3", 10);
        assert_eq!(s.file_name(TERMS_EXT), "_ix_3.trm");
        assert_eq!(s.file_names().len(), 6);
    }

    #[test]
    fn docnum_translation() {
        let set = SegmentSet::new(vec![seg("a", 3), seg("b", 0), seg("c", 5)]);
        assert_eq!(set.doc_offsets(), &[0, 3, 3]);
        assert_eq!(set.segment_for(0).unwrap(), (0, 0));
        assert_eq!(set.segment_for(2).unwrap(), (0, 2));
        // the empty segment is skipped
        assert_eq!(set.segment_for(3).unwrap(), (2, 0));
        assert_eq!(set.segment_for(7).unwrap(), (2, 4));
        assert!(set.segment_for(8).is_err());
    }

    #[test]
    fn deletes_map_through_offsets() {
        let mut set = SegmentSet::new(vec![seg("a", 3), seg("b", 4)]);
        assert_eq!(set.doc_count_all(), 7);
        set.delete_document(4, true).unwrap();
        assert!(set.is_deleted(4).unwrap());
        assert!(!set.is_deleted(3).unwrap());
        assert_eq!(set.doc_count(), 6);
        assert!(set.segments()[1].is_deleted(1));
    }

    #[test]
    fn redelete_and_unknown_undelete_are_errors() {
        let mut s = seg("a", 4);
        s.delete_document(1, true).unwrap();
        assert!(matches!(
            s.delete_document(1, true),
            Err(Error::DeleteState(1))
        ));
        // undelete discards from the set
        s.delete_document(1, false).unwrap();
        assert!(!s.is_deleted(1));
        assert!(matches!(
            s.delete_document(1, false),
            Err(Error::DeleteState(1))
        ));
        assert!(matches!(
            s.delete_document(9, true),
            Err(Error::DocNumOutOfRange(9))
        ));
    }

    #[test]
    fn counts_subtract_deletions() {
        let mut s = seg("a", 5);
        s.delete_document(0, true).unwrap();
        s.delete_document(3, true).unwrap();
        assert_eq!(s.doc_count_all(), 5);
        assert_eq!(s.doc_count(), 3);
        assert_eq!(s.deleted_docs(), vec![0, 3]);
        assert!(s.has_deletions());
    }

    #[test]
    fn descriptor_serializes_with_deletes() {
        let mut s = seg("_ix_1", 4);
        s.delete_document(2, true).unwrap();
        let blob = serde_json::to_vec(&s).unwrap();
        let back: Segment = serde_json::from_slice(&blob).unwrap();
        assert!(back.is_deleted(2));
        assert_eq!(back.doc_count(), 3);
        assert_eq!(back.name(), "_ix_1");
    }
}
