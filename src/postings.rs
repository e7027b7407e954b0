use crate::matching::Matcher;
use crate::schema::Analyzer;
use crate::scoring::Scorer;
use crate::spans::Span;
use crate::structfile::{StructReader, StructWriter};
use crate::{DocNum, Error};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

/// How many postings share one block (and one max-weight summary).
pub const BLOCK_SIZE: usize = 128;

pub const TERMS_MAGIC: &[u8] = b"sift.trm\x01";
pub const POSTINGS_MAGIC: &[u8] = b"sift.pst\x01";
pub const VECTOR_INDEX_MAGIC: &[u8] = b"sift.vec\x01";
pub const VECTOR_POSTS_MAGIC: &[u8] = b"sift.vps\x01";

/// What a posting's payload encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// The term occurs; no payload.
    Existence,
    /// Occurrence count, as a vbyte.
    Frequency,
    /// Vbyte count followed by vbyte-delta positions.
    Positions,
}

/// One analyzed term ready for the pool.
#[derive(Clone, Debug, PartialEq)]
pub struct WordValue {
    pub term: String,
    pub freq: u32,
    pub weight: f32,
    pub payload: Vec<u8>,
}

/// A decoded payload.
#[derive(Clone, Debug, PartialEq)]
pub enum PayloadValue {
    Existence,
    Frequency(u32),
    Positions(Vec<u32>),
}

impl Format {
    /// Wrap the analyzer's token stream into `(term, freq, weight, payload)`
    /// tuples plus the field length (total token count).
    pub fn word_values(&self, analyzer: &Analyzer, text: &str) -> (Vec<WordValue>, u32) {
        let tokens = analyzer.tokens(text);
        let length = tokens.len() as u32;
        let words = match self {
            Format::Existence => {
                let mut seen: BTreeMap<String, ()> = BTreeMap::new();
                for token in tokens {
                    seen.entry(token).or_insert(());
                }
                seen.into_iter()
                    .map(|(term, _)| WordValue {
                        term,
                        freq: 1,
                        weight: 1.0,
                        payload: Vec::new(),
                    })
                    .collect()
            }
            Format::Frequency => {
                let mut counts: BTreeMap<String, u32> = BTreeMap::new();
                for token in tokens {
                    *counts.entry(token).or_insert(0) += 1;
                }
                counts
                    .into_iter()
                    .map(|(term, freq)| WordValue {
                        term,
                        freq,
                        weight: freq as f32,
                        payload: encode_frequency(freq),
                    })
                    .collect()
            }
            Format::Positions => {
                let mut positions: BTreeMap<String, Vec<u32>> = BTreeMap::new();
                for (index, token) in tokens.into_iter().enumerate() {
                    positions.entry(token).or_default().push(index as u32);
                }
                positions
                    .into_iter()
                    .map(|(term, poses)| WordValue {
                        term,
                        freq: poses.len() as u32,
                        weight: poses.len() as f32,
                        payload: encode_positions(&poses),
                    })
                    .collect()
            }
        };
        (words, length)
    }

    pub fn decode(&self, payload: &[u8]) -> Result<PayloadValue, Error> {
        Ok(match self {
            Format::Existence => PayloadValue::Existence,
            Format::Frequency => PayloadValue::Frequency(decode_frequency(payload)?),
            Format::Positions => PayloadValue::Positions(decode_positions(payload)?),
        })
    }
}

pub fn encode_frequency(freq: u32) -> Vec<u8> {
    let mut w = StructWriter::new(Vec::new());
    w.write_vbyte(freq as u64).unwrap();
    w.into_inner()
}

pub fn encode_positions(positions: &[u32]) -> Vec<u8> {
    let mut w = StructWriter::new(Vec::new());
    w.write_vbyte(positions.len() as u64).unwrap();
    let mut previous = 0u32;
    for p in positions {
        w.write_vbyte((*p - previous) as u64).unwrap();
        previous = *p;
    }
    w.into_inner()
}

pub fn decode_frequency(payload: &[u8]) -> Result<u32, Error> {
    if payload.is_empty() {
        // existence payloads count as a single occurrence
        return Ok(1);
    }
    let mut r = StructReader::new(crate::structfile::ByteSource::Owned(Arc::new(
        payload.to_vec(),
    )));
    Ok(r.read_vbyte()? as u32)
}

pub fn decode_positions(payload: &[u8]) -> Result<Vec<u32>, Error> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let mut r = StructReader::new(crate::structfile::ByteSource::Owned(Arc::new(
        payload.to_vec(),
    )));
    let count = r.read_vbyte()? as usize;
    let mut out = Vec::with_capacity(count);
    let mut position = 0u32;
    for _ in 0..count {
        position += r.read_vbyte()? as u32;
        out.push(position);
    }
    Ok(out)
}

/// Terms-index entry: where a term's posting list lives and its summary
/// statistics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TermInfo {
    pub doc_freq: u32,
    pub weight_sum: f32,
    pub max_weight: f32,
    pub offset: u64,
}

/// `(field_num, term)`; lexicographic order matches `(field_name, term)`
/// because field numbers are name-rank assigned.
pub type TermKey = (u16, String);

pub struct TermsWriter<W: Write> {
    out: StructWriter<W>,
    last: Option<TermKey>,
}

impl<W: Write> TermsWriter<W> {
    pub fn new(mut out: StructWriter<W>) -> Result<TermsWriter<W>, Error> {
        out.write_raw(TERMS_MAGIC)?;
        Ok(TermsWriter { out, last: None })
    }

    /// Entries must arrive in strictly increasing key order.
    pub fn add(&mut self, field: u16, term: &str, info: &TermInfo) -> Result<(), Error> {
        if let Some(last) = &self.last {
            let key = (field, term);
            if (last.0, last.1.as_str()) >= key {
                return Err(Error::Corrupt(format!(
                    "terms index written out of order: {:?} after {:?}",
                    key, last
                )));
            }
        }
        self.last = Some((field, term.to_string()));
        self.out.write_vbyte(field as u64)?;
        self.out.write_string(term)?;
        self.out.write_vbyte(info.doc_freq as u64)?;
        self.out.write_f32(info.weight_sum)?;
        self.out.write_f32(info.max_weight)?;
        self.out.write_vbyte(info.offset)?;
        Ok(())
    }

    pub fn into_inner(self) -> StructWriter<W> {
        self.out
    }
}

/// Load the whole terms index; iteration order is the lexicographic contract.
pub fn read_terms(reader: &StructReader) -> Result<BTreeMap<TermKey, TermInfo>, Error> {
    let mut input = reader.clone();
    input.seek(0)?;
    let magic = input.consume(TERMS_MAGIC.len())?.to_vec();
    if magic != TERMS_MAGIC {
        return Err(Error::Corrupt("bad terms index header".to_string()));
    }
    let mut terms = BTreeMap::new();
    while !input.eof() {
        let field = input.read_vbyte()? as u16;
        let term = input.read_string()?;
        let doc_freq = input.read_vbyte()? as u32;
        let weight_sum = input.read_f32()?;
        let max_weight = input.read_f32()?;
        let offset = input.read_vbyte()?;
        terms.insert(
            (field, term),
            TermInfo {
                doc_freq,
                weight_sum,
                max_weight,
                offset,
            },
        );
    }
    Ok(terms)
}

/// Streams posting lists into the term-postings file in [BLOCK_SIZE] blocks,
/// each headed by a max-weight summary so readers can skip whole blocks.
pub struct PostingsWriter<W: Write> {
    out: StructWriter<W>,
    block: Vec<(DocNum, f32, Vec<u8>)>,
    last_doc: DocNum,
    term_doc_count: u32,
    term_max_weight: f32,
    term_weight_sum: f32,
}

impl<W: Write> PostingsWriter<W> {
    pub fn new(mut out: StructWriter<W>) -> Result<PostingsWriter<W>, Error> {
        out.write_raw(POSTINGS_MAGIC)?;
        Ok(PostingsWriter {
            out,
            block: Vec::with_capacity(BLOCK_SIZE),
            last_doc: 0,
            term_doc_count: 0,
            term_max_weight: 0.0,
            term_weight_sum: 0.0,
        })
    }

    /// The offset the next term's list will start at.
    pub fn start_term(&mut self) -> u64 {
        self.block.clear();
        self.last_doc = 0;
        self.term_doc_count = 0;
        self.term_max_weight = 0.0;
        self.term_weight_sum = 0.0;
        self.out.tell()
    }

    pub fn add(&mut self, docnum: DocNum, weight: f32, payload: &[u8]) -> Result<(), Error> {
        self.block.push((docnum, weight, payload.to_vec()));
        self.term_doc_count += 1;
        self.term_weight_sum += weight;
        if weight > self.term_max_weight {
            self.term_max_weight = weight;
        }
        if self.block.len() == BLOCK_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<(), Error> {
        if self.block.is_empty() {
            return Ok(());
        }
        let mut body = StructWriter::new(Vec::new());
        let mut previous = self.last_doc;
        let mut max_weight = 0.0f32;
        for (doc, weight, _) in &self.block {
            body.write_vbyte((*doc - previous) as u64)?;
            previous = *doc;
            if *weight > max_weight {
                max_weight = *weight;
            }
        }
        for (_, weight, _) in &self.block {
            body.write_f32(*weight)?;
        }
        for (_, _, payload) in &self.block {
            body.write_bytes(payload)?;
        }
        let body = body.into_inner();
        let last = self.block.last().unwrap().0;

        self.out.write_vbyte(self.block.len() as u64)?;
        self.out.write_f32(max_weight)?;
        self.out.write_vbyte(last as u64)?;
        self.out.write_vbyte(body.len() as u64)?;
        self.out.write_raw(&body)?;

        self.last_doc = last;
        self.block.clear();
        Ok(())
    }

    /// Close the current list; returns `(doc_count, weight_sum, max_weight)`.
    pub fn finish_term(&mut self) -> Result<(u32, f32, f32), Error> {
        self.flush_block()?;
        // zero-count terminator block
        self.out.write_vbyte(0)?;
        Ok((
            self.term_doc_count,
            self.term_weight_sum,
            self.term_max_weight,
        ))
    }

    pub fn into_inner(self) -> StructWriter<W> {
        self.out
    }
}

struct BlockHeader {
    count: usize,
    max_weight: f32,
    last_doc: DocNum,
    body_len: usize,
}

/// The file-backed leaf matcher: a cursor over one term's posting list,
/// decoded block by block.
pub struct PostingMatcher {
    input: StructReader,
    format: Format,
    docs: Vec<DocNum>,
    weights: Vec<f32>,
    payloads: Vec<Vec<u8>>,
    index: usize,
    block_max_weight: f32,
    last_doc_decoded: DocNum,
    exhausted: bool,
    scorer: Option<Arc<dyn Scorer>>,
}

impl PostingMatcher {
    /// `reader` must be the whole term-postings file; `offset` a value
    /// recorded in the terms index.
    pub fn open(
        reader: &StructReader,
        offset: u64,
        format: Format,
        scorer: Option<Arc<dyn Scorer>>,
    ) -> Result<PostingMatcher, Error> {
        let input = reader.substream(offset as usize, reader.len())?;
        let mut matcher = PostingMatcher {
            input,
            format,
            docs: Vec::new(),
            weights: Vec::new(),
            payloads: Vec::new(),
            index: 0,
            block_max_weight: 0.0,
            last_doc_decoded: 0,
            exhausted: false,
            scorer,
        };
        if !matcher.next_block(true)? {
            matcher.exhausted = true;
        }
        Ok(matcher)
    }

    fn read_header(&mut self) -> Result<Option<BlockHeader>, Error> {
        let count = self.input.read_vbyte()? as usize;
        if count == 0 {
            return Ok(None);
        }
        let max_weight = self.input.read_f32()?;
        let last_doc = self.input.read_vbyte()? as DocNum;
        let body_len = self.input.read_vbyte()? as usize;
        Ok(Some(BlockHeader {
            count,
            max_weight,
            last_doc,
            body_len,
        }))
    }

    fn decode_body(&mut self, header: &BlockHeader) -> Result<(), Error> {
        self.docs.clear();
        self.weights.clear();
        self.payloads.clear();
        let mut previous = self.last_doc_decoded;
        for _ in 0..header.count {
            previous += self.input.read_vbyte()? as DocNum;
            self.docs.push(previous);
        }
        for _ in 0..header.count {
            self.weights.push(self.input.read_f32()?);
        }
        for _ in 0..header.count {
            self.payloads.push(self.input.read_bytes()?);
        }
        debug_assert_eq!(previous, header.last_doc);
        self.last_doc_decoded = header.last_doc;
        self.block_max_weight = header.max_weight;
        self.index = 0;
        Ok(())
    }

    fn skip_body(&mut self, header: &BlockHeader) -> Result<(), Error> {
        self.input.skip(header.body_len)?;
        self.last_doc_decoded = header.last_doc;
        Ok(())
    }

    /// Move to the next block. With `decode`, the block is loaded and the
    /// cursor parked on its first posting; returns false at the terminator.
    fn next_block(&mut self, decode: bool) -> Result<bool, Error> {
        match self.read_header()? {
            None => Ok(false),
            Some(header) => {
                if decode {
                    self.decode_body(&header)?;
                } else {
                    self.skip_body(&header)?;
                }
                Ok(true)
            }
        }
    }

    fn block_last_doc(&self) -> DocNum {
        self.last_doc_decoded
    }

    fn scored_quality(&self, weight: f32) -> f32 {
        match &self.scorer {
            Some(s) => s.quality(weight),
            None => weight,
        }
    }

    fn scored_block_quality(&self, max_weight: f32) -> f32 {
        match &self.scorer {
            Some(s) => s.block_quality(max_weight),
            None => max_weight,
        }
    }
}

impl Matcher for PostingMatcher {
    fn is_active(&self) -> bool {
        !self.exhausted
    }

    fn id(&self) -> DocNum {
        self.docs[self.index]
    }

    fn next(&mut self) -> Result<(), Error> {
        if self.exhausted {
            return Err(Error::ReadTooFar);
        }
        self.index += 1;
        if self.index >= self.docs.len() {
            if !self.next_block(true)? {
                self.exhausted = true;
            }
        }
        Ok(())
    }

    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if self.exhausted {
            return Err(Error::ReadTooFar);
        }
        if target <= self.id() {
            return Ok(());
        }
        // leave fully-passed blocks undecoded
        while target > self.block_last_doc() {
            match self.read_header()? {
                None => {
                    self.exhausted = true;
                    return Ok(());
                }
                Some(header) => {
                    if target > header.last_doc {
                        self.skip_body(&header)?;
                    } else {
                        self.decode_body(&header)?;
                    }
                }
            }
        }
        while self.docs[self.index] < target {
            self.index += 1;
        }
        Ok(())
    }

    fn weight(&self) -> f32 {
        self.weights[self.index]
    }

    fn score(&self) -> f32 {
        match &self.scorer {
            Some(s) => s.score(self.id(), self.weight()),
            None => self.weight(),
        }
    }

    fn value(&self) -> Vec<u8> {
        self.payloads[self.index].clone()
    }

    fn positions(&self) -> Vec<u32> {
        if self.format == Format::Positions {
            decode_positions(&self.payloads[self.index]).unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    fn spans(&self) -> Vec<Span> {
        self.positions().into_iter().map(Span::point).collect()
    }

    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(PostingMatcher {
            input: self.input.clone(),
            format: self.format,
            docs: self.docs.clone(),
            weights: self.weights.clone(),
            payloads: self.payloads.clone(),
            index: self.index,
            block_max_weight: self.block_max_weight,
            last_doc_decoded: self.last_doc_decoded,
            exhausted: self.exhausted,
            scorer: self.scorer.clone(),
        })
    }

    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if self.exhausted {
            Box::new(crate::matching::NullMatcher)
        } else {
            self
        }
    }

    fn supports_quality(&self) -> bool {
        true
    }

    fn quality(&self) -> Result<f32, Error> {
        if self.exhausted {
            return Err(Error::ReadTooFar);
        }
        Ok(self.scored_quality(self.weight()))
    }

    fn block_quality(&self) -> Result<f32, Error> {
        if self.exhausted {
            return Err(Error::ReadTooFar);
        }
        Ok(self.scored_block_quality(self.block_max_weight))
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        if self.exhausted {
            return Err(Error::ReadTooFar);
        }
        let mut skipped = 0usize;
        while self.scored_block_quality(self.block_max_weight) <= min_quality {
            skipped += self.docs.len() - self.index;
            self.index = self.docs.len();
            loop {
                match self.read_header()? {
                    None => {
                        self.exhausted = true;
                        return Ok(skipped);
                    }
                    Some(header) => {
                        if self.scored_block_quality(header.max_weight) <= min_quality {
                            skipped += header.count;
                            self.skip_body(&header)?;
                        } else {
                            self.decode_body(&header)?;
                            break;
                        }
                    }
                }
            }
        }
        Ok(skipped)
    }
}

/// Forward (per-document) posting lists. The vector-index file maps
/// `(docnum, field)` to an offset in the vector-postings file.
pub struct VectorWriter<W: Write, X: Write> {
    index_out: StructWriter<W>,
    posts_out: StructWriter<X>,
    last_key: Option<(DocNum, u16)>,
}

impl<W: Write, X: Write> VectorWriter<W, X> {
    pub fn new(
        mut index_out: StructWriter<W>,
        mut posts_out: StructWriter<X>,
    ) -> Result<VectorWriter<W, X>, Error> {
        index_out.write_raw(VECTOR_INDEX_MAGIC)?;
        posts_out.write_raw(VECTOR_POSTS_MAGIC)?;
        Ok(VectorWriter {
            index_out,
            posts_out,
            last_key: None,
        })
    }

    /// Write one document's forward list for one field. Items must be sorted
    /// by term; keys must arrive in `(docnum, field)` order.
    pub fn add(
        &mut self,
        docnum: DocNum,
        field: u16,
        items: &[(String, f32, Vec<u8>)],
    ) -> Result<(), Error> {
        let key = (docnum, field);
        if let Some(last) = self.last_key {
            if last >= key {
                return Err(Error::Corrupt(format!(
                    "vector index written out of order: {:?} after {:?}",
                    key, last
                )));
            }
        }
        self.last_key = Some(key);

        let offset = self.posts_out.tell();
        self.posts_out.write_vbyte(items.len() as u64)?;
        for (term, weight, payload) in items {
            self.posts_out.write_string(term)?;
            self.posts_out.write_f32(*weight)?;
            self.posts_out.write_bytes(payload)?;
        }

        self.index_out.write_vbyte(docnum as u64)?;
        self.index_out.write_vbyte(field as u64)?;
        self.index_out.write_vbyte(offset)?;
        Ok(())
    }

    pub fn into_inner(self) -> (StructWriter<W>, StructWriter<X>) {
        (self.index_out, self.posts_out)
    }
}

pub fn read_vector_index(
    reader: &StructReader,
) -> Result<BTreeMap<(DocNum, u16), u64>, Error> {
    let mut input = reader.clone();
    input.seek(0)?;
    let magic = input.consume(VECTOR_INDEX_MAGIC.len())?.to_vec();
    if magic != VECTOR_INDEX_MAGIC {
        return Err(Error::Corrupt("bad vector index header".to_string()));
    }
    let mut out = BTreeMap::new();
    while !input.eof() {
        let docnum = input.read_vbyte()? as DocNum;
        let field = input.read_vbyte()? as u16;
        let offset = input.read_vbyte()?;
        out.insert((docnum, field), offset);
    }
    Ok(out)
}

/// Cursor over one document's forward list; ordered by term.
pub struct VectorCursor {
    input: StructReader,
    remaining: usize,
    current: Option<(String, f32, Vec<u8>)>,
}

impl VectorCursor {
    pub fn open(reader: &StructReader, offset: u64) -> Result<VectorCursor, Error> {
        let mut input = reader.substream(offset as usize, reader.len())?;
        let remaining = input.read_vbyte()? as usize;
        let mut cursor = VectorCursor {
            input,
            remaining,
            current: None,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<(), Error> {
        if self.remaining == 0 {
            self.current = None;
            return Ok(());
        }
        self.remaining -= 1;
        let term = self.input.read_string()?;
        let weight = self.input.read_f32()?;
        let payload = self.input.read_bytes()?;
        self.current = Some((term, weight, payload));
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn term(&self) -> &str {
        &self.current.as_ref().unwrap().0
    }

    pub fn weight(&self) -> f32 {
        self.current.as_ref().unwrap().1
    }

    pub fn value(&self) -> &[u8] {
        &self.current.as_ref().unwrap().2
    }

    pub fn next(&mut self) -> Result<(), Error> {
        if self.current.is_none() {
            return Err(Error::ReadTooFar);
        }
        self.advance()
    }

    /// Advance to the first term `>= target`.
    pub fn skip_to(&mut self, target: &str) -> Result<(), Error> {
        if self.current.is_none() {
            return Err(Error::ReadTooFar);
        }
        while let Some((term, _, _)) = &self.current {
            if term.as_str() >= target {
                break;
            }
            self.advance()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structfile::ByteSource;

    fn reader_over(buf: Vec<u8>) -> StructReader {
        StructReader::new(ByteSource::Owned(Arc::new(buf)))
    }

    #[test]
    fn word_values_frequency() {
        let (words, length) =
            Format::Frequency.word_values(&Analyzer::Whitespace, "B B B B C D D");
        assert_eq!(length, 7);
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].term, "B");
        assert_eq!(words[0].freq, 4);
        assert_eq!(words[0].weight, 4.0);
        assert_eq!(decode_frequency(&words[0].payload).unwrap(), 4);
        assert_eq!(words[2].term, "D");
        assert_eq!(words[2].freq, 2);
    }

    #[test]
    fn word_values_positions() {
        let (words, length) =
            Format::Positions.word_values(&Analyzer::Simple, "miss muffet sat miss");
        assert_eq!(length, 4);
        let miss = words.iter().find(|w| w.term == "miss").unwrap();
        assert_eq!(decode_positions(&miss.payload).unwrap(), vec![0, 3]);
        let sat = words.iter().find(|w| w.term == "sat").unwrap();
        assert_eq!(decode_positions(&sat.payload).unwrap(), vec![2]);
    }

    #[test]
    fn word_values_existence() {
        let (words, _) = Format::Existence.word_values(&Analyzer::Whitespace, "a b a");
        assert_eq!(words.len(), 2);
        assert!(words.iter().all(|w| w.payload.is_empty() && w.weight == 1.0));
    }

    #[test]
    fn terms_index_round_trip() {
        let mut tw = TermsWriter::new(StructWriter::new(Vec::new())).unwrap();
        let info = |df, offset| TermInfo {
            doc_freq: df,
            weight_sum: df as f32 * 2.0,
            max_weight: 2.0,
            offset,
        };
        tw.add(0, "alfa", &info(3, 9)).unwrap();
        tw.add(0, "bravo", &info(1, 100)).unwrap();
        tw.add(1, "alfa", &info(7, 2000)).unwrap();
        // out-of-order insert is rejected
        assert!(tw.add(0, "zzz", &info(1, 1)).is_err());

        let buf = tw.into_inner().into_inner();
        let terms = read_terms(&reader_over(buf)).unwrap();
        let keys: Vec<&TermKey> = terms.keys().collect();
        assert_eq!(
            keys,
            vec![
                &(0u16, "alfa".to_string()),
                &(0u16, "bravo".to_string()),
                &(1u16, "alfa".to_string())
            ]
        );
        assert_eq!(terms[&(1, "alfa".to_string())].doc_freq, 7);
        assert_eq!(terms[&(0, "bravo".to_string())].offset, 100);
    }

    fn write_list(postings: &[(DocNum, f32)]) -> (Vec<u8>, u64) {
        let mut pw = PostingsWriter::new(StructWriter::new(Vec::new())).unwrap();
        let offset = pw.start_term();
        for (doc, weight) in postings {
            pw.add(*doc, *weight, &encode_frequency(*weight as u32))
                .unwrap();
        }
        pw.finish_term().unwrap();
        (pw.into_inner().into_inner(), offset)
    }

    #[test]
    fn posting_list_round_trip_across_blocks() {
        let postings: Vec<(DocNum, f32)> =
            (0..300).map(|i| (i * 3, (i % 7 + 1) as f32)).collect();
        let (buf, offset) = write_list(&postings);
        let reader = reader_over(buf);
        let mut m = PostingMatcher::open(&reader, offset, Format::Frequency, None).unwrap();

        for (doc, weight) in &postings {
            assert!(m.is_active());
            assert_eq!(m.id(), *doc);
            assert_eq!(m.weight(), *weight);
            assert_eq!(decode_frequency(&m.value()).unwrap(), *weight as u32);
            m.next().unwrap();
        }
        assert!(!m.is_active());
        assert!(m.next().is_err());
    }

    #[test]
    fn skip_to_spans_blocks() {
        let postings: Vec<(DocNum, f32)> = (0..1000).map(|i| (i * 2, 1.0)).collect();
        let (buf, offset) = write_list(&postings);
        let reader = reader_over(buf);

        let mut m = PostingMatcher::open(&reader, offset, Format::Frequency, None).unwrap();
        m.skip_to(777).unwrap();
        assert_eq!(m.id(), 778);
        m.skip_to(778).unwrap();
        assert_eq!(m.id(), 778);
        m.skip_to(1998).unwrap();
        assert_eq!(m.id(), 1998);
        m.skip_to(1999).unwrap();
        assert!(!m.is_active());
        assert!(m.skip_to(2100).is_err());
    }

    #[test]
    fn finish_term_reports_stats() {
        let mut pw = PostingsWriter::new(StructWriter::new(Vec::new())).unwrap();
        pw.start_term();
        pw.add(1, 2.0, &[]).unwrap();
        pw.add(5, 3.0, &[]).unwrap();
        pw.add(9, 1.0, &[]).unwrap();
        let (count, sum, max) = pw.finish_term().unwrap();
        assert_eq!(count, 3);
        assert_eq!(sum, 6.0);
        assert_eq!(max, 3.0);
    }

    #[test]
    fn quality_skipping_ignores_weak_blocks() {
        // five full weak blocks, then one strong posting alone in a sixth
        let mut postings: Vec<(DocNum, f32)> = (0..640).map(|i| (i, 1.0)).collect();
        postings.push((1000, 9.0));
        let (buf, offset) = write_list(&postings);
        let reader = reader_over(buf);

        let mut m = PostingMatcher::open(&reader, offset, Format::Frequency, None).unwrap();
        assert!(m.supports_quality());
        assert_eq!(m.block_quality().unwrap(), 1.0);
        let skipped = m.skip_to_quality(1.5).unwrap();
        assert_eq!(skipped, 640);
        assert!(m.is_active());
        assert_eq!(m.id(), 1000);
        assert_eq!(m.quality().unwrap(), 9.0);
    }

    #[test]
    fn vector_round_trip() {
        let items = vec![
            ("alfa".to_string(), 2.0f32, encode_frequency(2)),
            ("bravo".to_string(), 1.0f32, encode_frequency(1)),
            ("charlie".to_string(), 3.0f32, encode_frequency(3)),
        ];
        let mut vw = VectorWriter::new(
            StructWriter::new(Vec::new()),
            StructWriter::new(Vec::new()),
        )
        .unwrap();
        vw.add(0, 1, &items).unwrap();
        vw.add(2, 1, &items[..1]).unwrap();
        // regressing keys are rejected
        assert!(vw.add(1, 0, &items).is_err());
        let (iw, pw) = vw.into_inner();

        let index = read_vector_index(&reader_over(iw.into_inner())).unwrap();
        assert_eq!(index.len(), 2);
        let posts = reader_over(pw.into_inner());

        let mut cursor = VectorCursor::open(&posts, index[&(0, 1)]).unwrap();
        assert_eq!(cursor.term(), "alfa");
        cursor.skip_to("bravo").unwrap();
        assert_eq!(cursor.term(), "bravo");
        assert_eq!(cursor.weight(), 1.0);
        cursor.next().unwrap();
        assert_eq!(cursor.term(), "charlie");
        cursor.next().unwrap();
        assert!(!cursor.is_active());
        assert!(cursor.next().is_err());
    }
}
