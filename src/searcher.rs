use crate::collect::TopCollector;
use crate::matching::{
    all_ids, make_binary_tree, AndMaybeMatcher, AndNotMatcher, DisjunctionMaxMatcher,
    IntersectionMatcher, InverseMatcher, Matcher, NullMatcher, PhraseMatcher, RequireMatcher,
    UnionMatcher, WrappingMatcher,
};
use crate::postings::Format;
use crate::reading::{IndexReader, ScoreArgs, StoredFields};
use crate::scoring::{Bm25, TermStats, Weighting};
use crate::{DocNum, Error, HashSet};
use std::cmp::Ordering;
use std::sync::Arc;

/// A query tree. Each node knows how to produce a matcher from a searcher;
/// the searcher drives the resulting cursor.
#[derive(Clone, Debug)]
pub enum Query {
    Term {
        field: String,
        text: String,
        boost: f32,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
    /// Everything in the corpus NOT matching the subquery.
    Not(Box<Query>),
    AndNot(Box<Query>, Box<Query>),
    AndMaybe(Box<Query>, Box<Query>),
    Require(Box<Query>, Box<Query>),
    DisMax {
        subqueries: Vec<Query>,
        tiebreak: f32,
    },
    /// Words in order within `slop` (1 = adjacent) in a positions field.
    Phrase {
        field: String,
        words: Vec<String>,
        slop: u32,
        boost: f32,
    },
    /// Every live document.
    Every,
}

impl Query {
    pub fn term(field: &str, text: &str) -> Query {
        Query::Term {
            field: field.to_string(),
            text: text.to_string(),
            boost: 1.0,
        }
    }

    pub fn phrase(field: &str, words: &[&str]) -> Query {
        Query::Phrase {
            field: field.to_string(),
            words: words.iter().map(|w| w.to_string()).collect(),
            slop: 1,
            boost: 1.0,
        }
    }

    pub fn phrase_with_slop(field: &str, words: &[&str], slop: u32) -> Query {
        Query::Phrase {
            field: field.to_string(),
            words: words.iter().map(|w| w.to_string()).collect(),
            slop,
            boost: 1.0,
        }
    }

    pub fn matcher(&self, searcher: &Searcher) -> Result<Box<dyn Matcher>, Error> {
        match self {
            Query::Term { field, text, boost } => searcher.term_matcher(field, text, *boost),

            Query::And(subqueries) => {
                // negated children fold into a single AndNot around the rest
                let mut positives = Vec::new();
                let mut negatives = Vec::new();
                for q in subqueries {
                    match q {
                        Query::Not(inner) => negatives.push(inner.as_ref().clone()),
                        other => positives.push(other.clone()),
                    }
                }
                if positives.is_empty() {
                    return if negatives.is_empty() {
                        Ok(Box::new(NullMatcher))
                    } else {
                        // pure negation: invert the union of the negatives
                        Query::Not(Box::new(Query::Or(negatives))).matcher(searcher)
                    };
                }
                let children = positives
                    .iter()
                    .map(|q| q.matcher(searcher))
                    .collect::<Result<Vec<_>, Error>>()?;
                let positive = make_binary_tree(children, &|a, b| {
                    Ok(Box::new(IntersectionMatcher::new(a, b)?) as Box<dyn Matcher>)
                })?;
                if negatives.is_empty() {
                    Ok(positive)
                } else {
                    let negative = Query::Or(negatives).matcher(searcher)?;
                    Ok(Box::new(AndNotMatcher::new(positive, negative)?))
                }
            }

            Query::Or(subqueries) => {
                let children = subqueries
                    .iter()
                    .map(|q| q.matcher(searcher))
                    .collect::<Result<Vec<_>, Error>>()?;
                make_binary_tree(children, &|a, b| {
                    Ok(Box::new(UnionMatcher::new(a, b)) as Box<dyn Matcher>)
                })
            }

            Query::Not(subquery) => {
                let child = subquery.matcher(searcher)?;
                searcher.inverse_matcher(child)
            }

            Query::AndNot(a, b) => {
                let a = a.matcher(searcher)?;
                let b = b.matcher(searcher)?;
                Ok(Box::new(AndNotMatcher::new(a, b)?))
            }

            Query::AndMaybe(a, b) => {
                let a = a.matcher(searcher)?;
                let b = b.matcher(searcher)?;
                Ok(Box::new(AndMaybeMatcher::new(a, b)?))
            }

            Query::Require(a, b) => {
                let a = a.matcher(searcher)?;
                let b = b.matcher(searcher)?;
                Ok(Box::new(RequireMatcher::new(a, b)?))
            }

            Query::DisMax {
                subqueries,
                tiebreak,
            } => {
                let mut children = subqueries
                    .iter()
                    .map(|q| q.matcher(searcher))
                    .collect::<Result<Vec<_>, Error>>()?;
                match children.len() {
                    0 => Ok(Box::new(NullMatcher)),
                    1 => Ok(children.pop().unwrap()),
                    _ => {
                        let tiebreak = *tiebreak;
                        make_binary_tree(children, &move |a, b| {
                            Ok(Box::new(DisjunctionMaxMatcher::new(a, b, tiebreak))
                                as Box<dyn Matcher>)
                        })
                    }
                }
            }

            Query::Phrase {
                field,
                words,
                slop,
                boost,
            } => {
                let fieldobj = searcher.reader.schema().expect(field)?;
                if fieldobj.format != Format::Positions {
                    return Err(Error::FieldConfig(format!(
                        "field {:?} does not record positions",
                        field
                    )));
                }
                let mut word_matchers: Vec<Box<dyn Matcher>> = Vec::with_capacity(words.len());
                for word in words {
                    let m = searcher.term_matcher(field, word, 1.0)?;
                    if !m.is_active() {
                        // a missing word kills the whole phrase
                        return Ok(Box::new(NullMatcher));
                    }
                    word_matchers.push(m);
                }
                Ok(Box::new(PhraseMatcher::new(word_matchers, *slop, *boost)?))
            }

            Query::Every => searcher.inverse_matcher(Box::new(NullMatcher)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub docnum: DocNum,
    pub score: f32,
}

/// Evaluates query trees against a reader snapshot under a weighting.
pub struct Searcher {
    reader: Box<dyn IndexReader>,
    weighting: Arc<dyn Weighting>,
}

impl Searcher {
    /// BM25 by default.
    pub fn new(reader: Box<dyn IndexReader>) -> Searcher {
        Searcher {
            reader,
            weighting: Arc::new(Bm25::default()),
        }
    }

    pub fn with_weighting(reader: Box<dyn IndexReader>, weighting: Arc<dyn Weighting>) -> Searcher {
        Searcher { reader, weighting }
    }

    pub fn reader(&self) -> &dyn IndexReader {
        &*self.reader
    }

    pub fn doc_count(&self) -> DocNum {
        self.reader.doc_count()
    }

    pub fn doc_count_all(&self) -> DocNum {
        self.reader.doc_count_all()
    }

    pub fn stored_fields(&self, docnum: DocNum) -> Result<StoredFields, Error> {
        self.reader.stored_fields(docnum)
    }

    fn term_matcher(
        &self,
        field: &str,
        text: &str,
        boost: f32,
    ) -> Result<Box<dyn Matcher>, Error> {
        let doc_freq = self.reader.doc_frequency(field, text);
        if doc_freq == 0 {
            return Ok(Box::new(NullMatcher));
        }
        let doc_count = self.reader.doc_count_all();
        let avg_field_length = if doc_count > 0 {
            self.reader.field_length(field) as f32 / doc_count as f32
        } else {
            0.0
        };
        let stats = TermStats {
            doc_count,
            doc_freq,
            collection_freq: self.reader.frequency(field, text),
            avg_field_length,
        };
        let args = ScoreArgs {
            weighting: &*self.weighting,
            stats,
        };
        let matcher = match self.reader.postings_with(field, text, None, Some(&args)) {
            Ok(m) => m,
            Err(Error::TermNotFound(_, _)) => return Ok(Box::new(NullMatcher)),
            Err(e) => return Err(e),
        };
        if boost == 1.0 {
            Ok(matcher)
        } else {
            Ok(Box::new(WrappingMatcher::new(matcher, boost)))
        }
    }

    /// Everything in `[0, doc_count_all)` the child does not emit, with
    /// deleted docnums reported missing.
    fn inverse_matcher(&self, child: Box<dyn Matcher>) -> Result<Box<dyn Matcher>, Error> {
        let limit = self.reader.doc_count_all();
        let missing = if self.reader.has_deletions() {
            let mut deleted: HashSet<DocNum> = HashSet::default();
            for docnum in 0..limit {
                if self.reader.is_deleted(docnum) {
                    deleted.insert(docnum);
                }
            }
            let deleted = Arc::new(deleted);
            Some(Arc::new(move |d: DocNum| deleted.contains(&d))
                as Arc<dyn Fn(DocNum) -> bool + Send + Sync>)
        } else {
            None
        };
        Ok(Box::new(InverseMatcher::with_missing(child, limit, missing)?))
    }

    /// Top-`limit` hits, best first. When the whole matcher tree can bound
    /// its scores, blocks that cannot beat the current heap floor are
    /// skipped outright.
    pub fn search(&self, query: &Query, limit: usize) -> Result<Vec<Hit>, Error> {
        let mut matcher = query.matcher(self)?.replace();
        let use_quality = matcher.is_active() && matcher.supports_quality();
        let mut top = TopCollector::new(limit);
        let mut skipped_total = 0usize;

        while matcher.is_active() {
            if use_quality {
                if let Some(floor) = top.threshold() {
                    if matcher.block_quality()? <= floor {
                        skipped_total += matcher.skip_to_quality(floor)?;
                        if !matcher.is_active() {
                            break;
                        }
                        continue;
                    }
                }
            }
            let docnum = matcher.id();
            let score = self.weighting.final_score(docnum, matcher.score());
            top.offer(score, docnum);
            matcher.next()?;
        }

        if skipped_total > 0 {
            log::debug!("quality skipping bypassed {} postings", skipped_total);
        }
        Ok(top
            .into_sorted()
            .into_iter()
            .map(|sd| Hit {
                docnum: sd.docnum,
                score: sd.score,
            })
            .collect())
    }

    /// The matching docnums in docnum order, unranked.
    pub fn doc_ids(&self, query: &Query) -> Result<Vec<DocNum>, Error> {
        let mut matcher = query.matcher(self)?;
        all_ids(&mut *matcher)
    }

    /// Matches ordered by a key extracted from each document's stored
    /// fields, replacing score ranking entirely.
    pub fn search_sorted_by_key<K, F>(&self, query: &Query, key: F) -> Result<Vec<DocNum>, Error>
    where
        K: Ord,
        F: Fn(DocNum, &StoredFields) -> K,
    {
        let ids = self.doc_ids(query)?;
        let mut keyed = Vec::with_capacity(ids.len());
        for docnum in ids {
            let fields = self.reader.stored_fields(docnum)?;
            keyed.push((key(docnum, &fields), docnum));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(keyed.into_iter().map(|(_, docnum)| docnum).collect())
    }

    /// Order matches by one or more stored fields.
    pub fn search_sorted(&self, query: &Query, fields: &[&str]) -> Result<Vec<DocNum>, Error> {
        let ids = self.doc_ids(query)?;
        let mut keyed = Vec::with_capacity(ids.len());
        for docnum in ids {
            let stored = self.reader.stored_fields(docnum)?;
            let key: Vec<serde_json::Value> = fields
                .iter()
                .map(|f| stored.get(*f).cloned().unwrap_or(serde_json::Value::Null))
                .collect();
            keyed.push((key, docnum));
        }
        keyed.sort_by(|a, b| cmp_json_keys(&a.0, &b.0).then(a.1.cmp(&b.1)));
        Ok(keyed.into_iter().map(|(_, docnum)| docnum).collect())
    }
}

fn cmp_json(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Number(x), Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (String(x), String(y)) => x.cmp(y),
        (Bool(x), Bool(y)) => x.cmp(y),
        // mixed types order by their variant name, stable if arbitrary
        _ => format!("{:?}", a).cmp(&format!("{:?}", b)),
    }
}

fn cmp_json_keys(a: &[serde_json::Value], b: &[serde_json::Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = cmp_json(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}
