use crate::DocNum;
use std::sync::Arc;

/// Per-document field lengths, as a scorer sees them.
pub trait LengthSource: Send + Sync {
    fn doc_length(&self, docnum: DocNum) -> u32;
}

/// Collection statistics a weighting needs to build a per-term scorer.
#[derive(Clone, Copy, Debug)]
pub struct TermStats {
    pub doc_count: u32,
    pub doc_freq: u32,
    pub collection_freq: f32,
    pub avg_field_length: f32,
}

/// Scores one term's postings. `score` must be non-negative and
/// deterministic; the quality methods give upper bounds used to skip blocks.
pub trait Scorer: Send + Sync {
    fn score(&self, docnum: DocNum, weight: f32) -> f32;

    /// Upper bound on the score of a posting carrying `weight`.
    fn quality(&self, weight: f32) -> f32 {
        self.block_quality(weight)
    }

    /// Upper bound on any score in a block whose max weight is `max_weight`.
    fn block_quality(&self, max_weight: f32) -> f32 {
        max_weight
    }
}

pub trait Weighting: Send + Sync {
    fn scorer(
        &self,
        stats: &TermStats,
        lengths: Option<Arc<dyn LengthSource>>,
    ) -> Arc<dyn Scorer>;

    /// Optional per-candidate rerank, applied once per collected document.
    fn final_score(&self, _docnum: DocNum, score: f32) -> f32 {
        score
    }
}

/// The stored posting weight is the score.
pub struct Frequency;

struct WeightScorer;

impl Scorer for WeightScorer {
    fn score(&self, _docnum: DocNum, weight: f32) -> f32 {
        weight
    }
}

impl Weighting for Frequency {
    fn scorer(
        &self,
        _stats: &TermStats,
        _lengths: Option<Arc<dyn LengthSource>>,
    ) -> Arc<dyn Scorer> {
        Arc::new(WeightScorer)
    }
}

pub struct TfIdf;

struct TfIdfScorer {
    idf: f32,
}

impl Scorer for TfIdfScorer {
    fn score(&self, _docnum: DocNum, weight: f32) -> f32 {
        weight * self.idf
    }
    fn block_quality(&self, max_weight: f32) -> f32 {
        max_weight * self.idf
    }
}

impl Weighting for TfIdf {
    fn scorer(
        &self,
        stats: &TermStats,
        _lengths: Option<Arc<dyn LengthSource>>,
    ) -> Arc<dyn Scorer> {
        let df = stats.doc_freq.max(1) as f32;
        let idf = (stats.doc_count.max(1) as f32 / df).ln() + 1.0;
        Arc::new(TfIdfScorer { idf })
    }
}

/// Okapi BM25, the default weighting.
pub struct Bm25 {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25 {
    fn default() -> Bm25 {
        Bm25 { k1: 1.2, b: 0.75 }
    }
}

struct Bm25Scorer {
    k1: f32,
    b: f32,
    idf: f32,
    avg_dl: f32,
    lengths: Option<Arc<dyn LengthSource>>,
}

impl Scorer for Bm25Scorer {
    fn score(&self, docnum: DocNum, weight: f32) -> f32 {
        let dl = self
            .lengths
            .as_ref()
            .map(|l| l.doc_length(docnum))
            .unwrap_or(1)
            .max(1) as f32;
        let num = weight * (self.k1 + 1.0);
        let denom = weight + self.k1 * (1.0 - self.b + self.b * dl / self.avg_dl);
        self.idf * (num / denom)
    }

    // the bound at zero length dominates every achievable in-block score
    fn block_quality(&self, max_weight: f32) -> f32 {
        let num = max_weight * (self.k1 + 1.0);
        let denom = max_weight + self.k1 * (1.0 - self.b);
        self.idf * (num / denom)
    }
}

impl Weighting for Bm25 {
    fn scorer(
        &self,
        stats: &TermStats,
        lengths: Option<Arc<dyn LengthSource>>,
    ) -> Arc<dyn Scorer> {
        let n = stats.doc_count as f32;
        let df = stats.doc_freq as f32;
        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
        Arc::new(Bm25Scorer {
            k1: self.k1,
            b: self.b,
            idf,
            avg_dl: if stats.avg_field_length > 0.0 {
                stats.avg_field_length
            } else {
                1.0
            },
            lengths,
        })
    }
}
