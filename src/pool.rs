use crate::postings::{PostingsWriter, TermInfo, TermsWriter};
use crate::schema::Field;
use crate::structfile::StructWriter;
use crate::{DocNum, Error};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

/// Tokens beyond this many do not count toward a document's stored field
/// length (they are still indexed). Lengths are u16 cells on disk.
pub const DOCLENGTH_LIMIT: u32 = 65535;

pub const LENGTHS_MAGIC: &[u8] = b"sift.fln\x01";

const DEFAULT_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// One posting waiting to be merge-sorted. Ordered by `(field, term,
/// docnum)`; weight and payload ride along.
#[derive(Clone, Debug)]
struct PoolPosting {
    field: u16,
    term: String,
    docnum: DocNum,
    weight: f32,
    payload: Vec<u8>,
}

impl PoolPosting {
    fn key(&self) -> (u16, &str, DocNum) {
        (self.field, &self.term, self.docnum)
    }

    fn approx_bytes(&self) -> usize {
        self.term.len() + self.payload.len() + 24
    }
}

impl PartialEq for PoolPosting {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for PoolPosting {}
impl PartialOrd for PoolPosting {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PoolPosting {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

fn read_byte_opt<R: Read>(input: &mut R) -> Result<Option<u8>, Error> {
    let mut byte = [0u8; 1];
    match input.read(&mut byte)? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

fn read_vbyte_io<R: Read>(input: &mut R) -> Result<u64, Error> {
    let mut result: u64 = 0;
    let mut bit_p: u32 = 0;
    loop {
        let byte = read_byte_opt(input)?
            .ok_or_else(|| Error::Corrupt("truncated run file".to_string()))?
            as u64;
        if byte & 0x80 > 0 {
            result |= (byte & 0x7f) << bit_p;
            return Ok(result);
        }
        result |= byte << bit_p;
        bit_p += 7;
    }
}

/// Like [read_vbyte_io] but reports a clean end-of-stream as None.
fn read_vbyte_opt<R: Read>(input: &mut R) -> Result<Option<u64>, Error> {
    let first = match read_byte_opt(input)? {
        None => return Ok(None),
        Some(b) => b,
    };
    let mut result = (first & 0x7f) as u64;
    if first & 0x80 > 0 {
        return Ok(Some(result));
    }
    let mut bit_p: u32 = 7;
    loop {
        let byte = read_byte_opt(input)?
            .ok_or_else(|| Error::Corrupt("truncated run file".to_string()))?
            as u64;
        if byte & 0x80 > 0 {
            result |= (byte & 0x7f) << bit_p;
            return Ok(Some(result));
        }
        result |= byte << bit_p;
        bit_p += 7;
    }
}

/// Streaming cursor over one sorted spill run.
struct RunCursor {
    input: BufReader<File>,
    current: Option<PoolPosting>,
}

impl RunCursor {
    fn new(mut file: File) -> Result<RunCursor, Error> {
        file.seek(SeekFrom::Start(0))?;
        let mut cursor = RunCursor {
            input: BufReader::new(file),
            current: None,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<(), Error> {
        let field = match read_vbyte_opt(&mut self.input)? {
            None => {
                self.current = None;
                return Ok(());
            }
            Some(v) => v as u16,
        };

        let term_len = read_vbyte_io(&mut self.input)? as usize;
        let mut term_raw = vec![0u8; term_len];
        self.input.read_exact(&mut term_raw)?;
        let term = String::from_utf8(term_raw)
            .map_err(|_| Error::Corrupt("bad utf8 in run file".to_string()))?;

        let docnum = read_vbyte_io(&mut self.input)? as DocNum;

        let mut weight_raw = [0u8; 4];
        self.input.read_exact(&mut weight_raw)?;
        let weight = f32::from_le_bytes(weight_raw);

        let payload_len = read_vbyte_io(&mut self.input)? as usize;
        let mut payload = vec![0u8; payload_len];
        self.input.read_exact(&mut payload)?;

        self.current = Some(PoolPosting {
            field,
            term,
            docnum,
            weight,
            payload,
        });
        Ok(())
    }

    fn take(&mut self) -> Result<Option<PoolPosting>, Error> {
        let out = self.current.take();
        if out.is_some() {
            self.advance()?;
        }
        Ok(out)
    }
}

enum MergeSource {
    Mem(std::vec::IntoIter<PoolPosting>),
    Run(RunCursor),
}

impl MergeSource {
    fn take(&mut self) -> Result<Option<PoolPosting>, Error> {
        match self {
            MergeSource::Mem(iter) => Ok(iter.next()),
            MergeSource::Run(cursor) => cursor.take(),
        }
    }
}

struct HeapEntry {
    posting: PoolPosting,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.posting == other.posting && self.source == other.source
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.posting
            .cmp(&other.posting)
            .then(self.source.cmp(&other.source))
    }
}

/// Summary the writer folds into the segment descriptor.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub field_length_totals: BTreeMap<u16, u64>,
    pub field_length_maxes: BTreeMap<u16, u32>,
}

/// External sorter for postings and field lengths.
///
/// Postings accumulate in RAM in arbitrary order; past the memory budget a
/// sorted run is spilled to an unlinked temp file. `finish` k-way-merges the
/// runs with the remaining buffer into `(field, term)` groups ordered by
/// docnum, writing the terms index, posting lists, and the per-doc length
/// arrays in one pass.
pub struct PostingPool {
    limit_bytes: usize,
    buffered: Vec<PoolPosting>,
    buffered_bytes: usize,
    runs: Vec<File>,
    lengths: BTreeMap<u16, Vec<u16>>,
}

impl PostingPool {
    pub fn new(limit_bytes: usize) -> PostingPool {
        PostingPool {
            limit_bytes,
            buffered: Vec::new(),
            buffered_bytes: 0,
            runs: Vec::new(),
            lengths: BTreeMap::new(),
        }
    }

    pub fn with_default_limit() -> PostingPool {
        PostingPool::new(DEFAULT_LIMIT_BYTES)
    }

    pub fn add_posting(
        &mut self,
        field: u16,
        term: &str,
        docnum: DocNum,
        weight: f32,
        payload: &[u8],
    ) -> Result<(), Error> {
        let posting = PoolPosting {
            field,
            term: term.to_string(),
            docnum,
            weight,
            payload: payload.to_vec(),
        };
        self.buffered_bytes += posting.approx_bytes();
        self.buffered.push(posting);
        if self.buffered_bytes > self.limit_bytes {
            self.dump_run()?;
        }
        Ok(())
    }

    /// Record tokens for one `(docnum, field)`; capped at
    /// [DOCLENGTH_LIMIT] in the stored array.
    pub fn add_field_length(&mut self, docnum: DocNum, field: u16, length: u32) {
        let cells = self.lengths.entry(field).or_default();
        let index = docnum as usize;
        // pad-zeros for docs that skipped this field
        while cells.len() <= index {
            cells.push(0);
        }
        let merged = (cells[index] as u32 + length).min(DOCLENGTH_LIMIT);
        cells[index] = merged as u16;
    }

    /// Analyze a field value and feed the resulting postings (and length,
    /// when the field is scorable) into the pool. Returns the token count.
    pub fn add_content(
        &mut self,
        docnum: DocNum,
        fieldnum: u16,
        field: &Field,
        text: &str,
    ) -> Result<u32, Error> {
        let (words, length) = field.format.word_values(&field.analyzer, text);
        for word in &words {
            self.add_posting(fieldnum, &word.term, docnum, word.weight, &word.payload)?;
        }
        if field.scorable {
            self.add_field_length(docnum, fieldnum, length);
        }
        Ok(length)
    }

    /// Spill the in-memory buffer as one sorted run.
    pub fn dump_run(&mut self) -> Result<(), Error> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        self.buffered.sort_unstable();
        let file = tempfile::tempfile()?;
        let mut out = StructWriter::new(BufWriter::new(file));
        for posting in self.buffered.drain(..) {
            out.write_vbyte(posting.field as u64)?;
            out.write_string(&posting.term)?;
            out.write_vbyte(posting.docnum as u64)?;
            out.write_raw(&posting.weight.to_le_bytes())?;
            out.write_bytes(&posting.payload)?;
        }
        out.flush()?;
        let file = out
            .into_inner()
            .into_inner()
            .map_err(|e| Error::IO(e.into_error()))?;
        self.runs.push(file);
        self.buffered_bytes = 0;
        log::debug!("posting pool spilled run {} to disk", self.runs.len());
        Ok(())
    }

    /// Abandon everything; spill files are unlinked temp files and vanish
    /// with the handles.
    pub fn cancel(self) {}

    /// Merge runs and buffer into the terms index, posting lists and length
    /// arrays.
    pub fn finish<L, T, P>(
        mut self,
        doc_count: DocNum,
        lengths_out: &mut StructWriter<L>,
        terms_out: &mut TermsWriter<T>,
        postings_out: &mut PostingsWriter<P>,
    ) -> Result<PoolStats, Error>
    where
        L: Write,
        T: Write,
        P: Write,
    {
        self.buffered.sort_unstable();
        let mut buffered = Vec::new();
        std::mem::swap(&mut buffered, &mut self.buffered);

        let mut sources: Vec<MergeSource> = Vec::new();
        for run in self.runs.drain(..) {
            sources.push(MergeSource::Run(RunCursor::new(run)?));
        }
        sources.push(MergeSource::Mem(buffered.into_iter()));

        let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
        for (index, source) in sources.iter_mut().enumerate() {
            if let Some(posting) = source.take()? {
                heap.push(Reverse(HeapEntry {
                    posting,
                    source: index,
                }));
            }
        }

        let mut group: Option<(u16, String, u64)> = None;
        while let Some(Reverse(entry)) = heap.pop() {
            if let Some(next) = sources[entry.source].take()? {
                heap.push(Reverse(HeapEntry {
                    posting: next,
                    source: entry.source,
                }));
            }
            let posting = entry.posting;

            let same_group = match &group {
                Some((field, term, _)) => *field == posting.field && *term == posting.term,
                None => false,
            };
            if !same_group {
                if let Some((field, term, offset)) = group.take() {
                    let (doc_freq, weight_sum, max_weight) = postings_out.finish_term()?;
                    terms_out.add(
                        field,
                        &term,
                        &TermInfo {
                            doc_freq,
                            weight_sum,
                            max_weight,
                            offset,
                        },
                    )?;
                }
                let offset = postings_out.start_term();
                group = Some((posting.field, posting.term.clone(), offset));
            }
            postings_out.add(posting.docnum, posting.weight, &posting.payload)?;
        }
        if let Some((field, term, offset)) = group.take() {
            let (doc_freq, weight_sum, max_weight) = postings_out.finish_term()?;
            terms_out.add(
                field,
                &term,
                &TermInfo {
                    doc_freq,
                    weight_sum,
                    max_weight,
                    offset,
                },
            )?;
        }

        self.write_lengths(doc_count, lengths_out)
    }

    /// Per-field contiguous u16 arrays, one cell per doc, zero-padded, so a
    /// length lookup is a single positional read.
    fn write_lengths<L: Write>(
        &self,
        doc_count: DocNum,
        out: &mut StructWriter<L>,
    ) -> Result<PoolStats, Error> {
        out.write_raw(LENGTHS_MAGIC)?;
        out.write_vbyte(doc_count as u64)?;
        out.write_vbyte(self.lengths.len() as u64)?;
        for field in self.lengths.keys() {
            out.write_vbyte(*field as u64)?;
        }

        let mut stats = PoolStats::default();
        for (field, cells) in &self.lengths {
            let mut total = 0u64;
            let mut max = 0u32;
            for doc in 0..doc_count as usize {
                let length = cells.get(doc).cloned().unwrap_or(0);
                out.write_u16(length)?;
                total += length as u64;
                max = max.max(length as u32);
            }
            stats.field_length_totals.insert(*field, total);
            stats.field_length_maxes.insert(*field, max);
        }
        Ok(stats)
    }
}
