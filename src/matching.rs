use crate::postings::{Format, PayloadValue};
use crate::spans::Span;
use crate::{DocNum, Error, HashSet};
use std::sync::Arc;

/// A lazy cursor over a sorted stream of `(docnum, weight, payload)`
/// postings. Movement methods called after exhaustion return
/// [Error::ReadTooFar]; `id()` is only meaningful while active.
pub trait Matcher {
    fn is_active(&self) -> bool;
    fn id(&self) -> DocNum;

    /// Advance one posting.
    fn next(&mut self) -> Result<(), Error>;

    /// Advance to the first posting with `id() >= target` (or exhaust).
    fn skip_to(&mut self, target: DocNum) -> Result<(), Error>;

    fn weight(&self) -> f32;
    fn score(&self) -> f32;

    /// Raw payload bytes of the current posting.
    fn value(&self) -> Vec<u8> {
        Vec::new()
    }

    fn value_as(&self, format: Format) -> Result<PayloadValue, Error> {
        format.decode(&self.value())
    }

    fn positions(&self) -> Vec<u32> {
        Vec::new()
    }

    fn spans(&self) -> Vec<Span> {
        self.positions().into_iter().map(Span::point).collect()
    }

    /// An independent cursor starting from this matcher's current state.
    fn copy(&self) -> Box<dyn Matcher>;

    /// A simplified equivalent, folding dead branches.
    fn replace(self: Box<Self>) -> Box<dyn Matcher>;

    fn depth(&self) -> u32 {
        0
    }

    fn supports_quality(&self) -> bool {
        false
    }
    fn quality(&self) -> Result<f32, Error> {
        Err(Error::NoQualityAvailable)
    }
    fn block_quality(&self) -> Result<f32, Error> {
        Err(Error::NoQualityAvailable)
    }
    /// Skip past blocks whose quality cannot exceed `min_quality`; returns
    /// how many postings were skipped.
    fn skip_to_quality(&mut self, _min_quality: f32) -> Result<usize, Error> {
        Err(Error::NoQualityAvailable)
    }
}

/// Drain a matcher into the list of ids it would emit.
pub fn all_ids(m: &mut dyn Matcher) -> Result<Vec<DocNum>, Error> {
    let mut out = Vec::new();
    while m.is_active() {
        out.push(m.id());
        m.next()?;
    }
    Ok(out)
}

/// Combine matchers pairwise into a balanced tree, depth about log2(n).
pub fn make_binary_tree<F>(items: Vec<Box<dyn Matcher>>, combine: &F) -> Result<Box<dyn Matcher>, Error>
where
    F: Fn(Box<dyn Matcher>, Box<dyn Matcher>) -> Result<Box<dyn Matcher>, Error>,
{
    let mut items = items;
    match items.len() {
        0 => Ok(Box::new(NullMatcher)),
        1 => Ok(items.pop().unwrap()),
        n => {
            let right = items.split_off(n / 2);
            let left = make_binary_tree(items, combine)?;
            let right = make_binary_tree(right, combine)?;
            combine(left, right)
        }
    }
}

/// Never active.
pub struct NullMatcher;

impl Matcher for NullMatcher {
    fn is_active(&self) -> bool {
        false
    }
    fn id(&self) -> DocNum {
        panic!("id() on an inactive matcher")
    }
    fn next(&mut self) -> Result<(), Error> {
        Err(Error::ReadTooFar)
    }
    fn skip_to(&mut self, _target: DocNum) -> Result<(), Error> {
        Err(Error::ReadTooFar)
    }
    fn weight(&self) -> f32 {
        0.0
    }
    fn score(&self) -> f32 {
        0.0
    }
    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(NullMatcher)
    }
    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        self
    }
}

/// Canned matcher over a fixed id list; synthetic postings and tests.
#[derive(Clone)]
pub struct ListMatcher {
    ids: Vec<DocNum>,
    weights: Option<Vec<f32>>,
    position: usize,
    default_weight: f32,
}

impl ListMatcher {
    pub fn new(ids: Vec<DocNum>) -> ListMatcher {
        ListMatcher {
            ids,
            weights: None,
            position: 0,
            default_weight: 1.0,
        }
    }

    pub fn at_position(ids: Vec<DocNum>, position: usize) -> ListMatcher {
        ListMatcher {
            ids,
            weights: None,
            position,
            default_weight: 1.0,
        }
    }

    pub fn with_weights(ids: Vec<DocNum>, weights: Vec<f32>) -> ListMatcher {
        debug_assert_eq!(ids.len(), weights.len());
        ListMatcher {
            ids,
            weights: Some(weights),
            position: 0,
            default_weight: 1.0,
        }
    }
}

impl Matcher for ListMatcher {
    fn is_active(&self) -> bool {
        self.position < self.ids.len()
    }
    fn id(&self) -> DocNum {
        self.ids[self.position]
    }
    fn next(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        self.position += 1;
        Ok(())
    }
    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        while self.position < self.ids.len() && self.ids[self.position] < target {
            self.position += 1;
        }
        Ok(())
    }
    fn weight(&self) -> f32 {
        match &self.weights {
            Some(w) => w[self.position],
            None => self.default_weight,
        }
    }
    fn score(&self) -> f32 {
        self.weight()
    }
    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(self.clone())
    }
    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if self.is_active() {
            self
        } else {
            Box::new(NullMatcher)
        }
    }
}

/// Scales a child's weights, scores and quality by a boost.
pub struct WrappingMatcher {
    child: Box<dyn Matcher>,
    boost: f32,
}

impl WrappingMatcher {
    pub fn new(child: Box<dyn Matcher>, boost: f32) -> WrappingMatcher {
        WrappingMatcher { child, boost }
    }
}

impl Matcher for WrappingMatcher {
    fn is_active(&self) -> bool {
        self.child.is_active()
    }
    fn id(&self) -> DocNum {
        self.child.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.child.next()
    }
    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        self.child.skip_to(target)
    }
    fn weight(&self) -> f32 {
        self.child.weight() * self.boost
    }
    fn score(&self) -> f32 {
        self.child.score() * self.boost
    }
    fn value(&self) -> Vec<u8> {
        self.child.value()
    }
    fn positions(&self) -> Vec<u32> {
        self.child.positions()
    }
    fn spans(&self) -> Vec<Span> {
        self.child.spans()
    }
    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(WrappingMatcher {
            child: self.child.copy(),
            boost: self.boost,
        })
    }
    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if !self.child.is_active() {
            return Box::new(NullMatcher);
        }
        let child = self.child.replace();
        if self.boost == 1.0 {
            child
        } else {
            Box::new(WrappingMatcher {
                child,
                boost: self.boost,
            })
        }
    }
    fn depth(&self) -> u32 {
        1 + self.child.depth()
    }
    fn supports_quality(&self) -> bool {
        self.child.supports_quality()
    }
    fn quality(&self) -> Result<f32, Error> {
        Ok(self.child.quality()? * self.boost)
    }
    fn block_quality(&self) -> Result<f32, Error> {
        Ok(self.child.block_quality()? * self.boost)
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        self.child.skip_to_quality(min_quality / self.boost)
    }
}

/// Filters out docnums in an exclusion set. The set is shared by reference;
/// it must not change for the life of the matcher.
pub struct ExcludeMatcher {
    child: Box<dyn Matcher>,
    excluded: Arc<HashSet<DocNum>>,
    boost: f32,
}

impl ExcludeMatcher {
    pub fn new(
        child: Box<dyn Matcher>,
        excluded: Arc<HashSet<DocNum>>,
    ) -> Result<ExcludeMatcher, Error> {
        ExcludeMatcher::with_boost(child, excluded, 1.0)
    }

    pub fn with_boost(
        child: Box<dyn Matcher>,
        excluded: Arc<HashSet<DocNum>>,
        boost: f32,
    ) -> Result<ExcludeMatcher, Error> {
        let mut m = ExcludeMatcher {
            child,
            excluded,
            boost,
        };
        m.find_next()?;
        Ok(m)
    }

    fn find_next(&mut self) -> Result<(), Error> {
        while self.child.is_active() && self.excluded.contains(&self.child.id()) {
            self.child.next()?;
        }
        Ok(())
    }
}

impl Matcher for ExcludeMatcher {
    fn is_active(&self) -> bool {
        self.child.is_active()
    }
    fn id(&self) -> DocNum {
        self.child.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.child.next()?;
        self.find_next()
    }
    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        self.child.skip_to(target)?;
        self.find_next()
    }
    fn weight(&self) -> f32 {
        self.child.weight() * self.boost
    }
    fn score(&self) -> f32 {
        self.child.score() * self.boost
    }
    fn value(&self) -> Vec<u8> {
        self.child.value()
    }
    fn positions(&self) -> Vec<u32> {
        self.child.positions()
    }
    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(ExcludeMatcher {
            child: self.child.copy(),
            excluded: self.excluded.clone(),
            boost: self.boost,
        })
    }
    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if !self.child.is_active() {
            return Box::new(NullMatcher);
        }
        if self.excluded.is_empty() {
            return self.child.replace();
        }
        Box::new(ExcludeMatcher {
            child: self.child.replace(),
            excluded: self.excluded,
            boost: self.boost,
        })
    }
    fn depth(&self) -> u32 {
        1 + self.child.depth()
    }
    fn supports_quality(&self) -> bool {
        self.child.supports_quality()
    }
    fn quality(&self) -> Result<f32, Error> {
        Ok(self.child.quality()? * self.boost)
    }
    fn block_quality(&self) -> Result<f32, Error> {
        Ok(self.child.block_quality()? * self.boost)
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        let skipped = self.child.skip_to_quality(min_quality / self.boost)?;
        self.find_next()?;
        Ok(skipped)
    }
}

/// Emits every docnum in `[0, limit)` the child does not emit and the
/// missing predicate does not claim. Walks densely; no quality support.
pub struct InverseMatcher {
    child: Box<dyn Matcher>,
    limit: DocNum,
    missing: Option<Arc<dyn Fn(DocNum) -> bool + Send + Sync>>,
    current: DocNum,
    active: bool,
}

impl InverseMatcher {
    pub fn new(child: Box<dyn Matcher>, limit: DocNum) -> Result<InverseMatcher, Error> {
        InverseMatcher::with_missing(child, limit, None)
    }

    pub fn with_missing(
        child: Box<dyn Matcher>,
        limit: DocNum,
        missing: Option<Arc<dyn Fn(DocNum) -> bool + Send + Sync>>,
    ) -> Result<InverseMatcher, Error> {
        let mut m = InverseMatcher {
            child,
            limit,
            missing,
            current: 0,
            active: true,
        };
        m.find_next()?;
        Ok(m)
    }

    fn is_missing(&self, id: DocNum) -> bool {
        match &self.missing {
            Some(f) => f(id),
            None => false,
        }
    }

    fn find_next(&mut self) -> Result<(), Error> {
        loop {
            if self.current >= self.limit {
                self.active = false;
                return Ok(());
            }
            if self.child.is_active() && self.child.id() < self.current {
                self.child.skip_to(self.current)?;
            }
            let collides = self.child.is_active() && self.child.id() == self.current;
            if !collides && !self.is_missing(self.current) {
                return Ok(());
            }
            self.current += 1;
        }
    }
}

impl Matcher for InverseMatcher {
    fn is_active(&self) -> bool {
        self.active
    }
    fn id(&self) -> DocNum {
        self.current
    }
    fn next(&mut self) -> Result<(), Error> {
        if !self.active {
            return Err(Error::ReadTooFar);
        }
        self.current += 1;
        self.find_next()
    }
    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if !self.active {
            return Err(Error::ReadTooFar);
        }
        if target <= self.current {
            return Ok(());
        }
        self.current = target;
        self.find_next()
    }
    fn weight(&self) -> f32 {
        1.0
    }
    fn score(&self) -> f32 {
        1.0
    }
    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(InverseMatcher {
            child: self.child.copy(),
            limit: self.limit,
            missing: self.missing.clone(),
            current: self.current,
            active: self.active,
        })
    }
    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if self.active {
            self
        } else {
            Box::new(NullMatcher)
        }
    }
    fn depth(&self) -> u32 {
        1 + self.child.depth()
    }
}

fn merge_positions(a: Vec<u32>, b: Vec<u32>) -> Vec<u32> {
    let mut out = a;
    out.extend(b);
    out.sort_unstable();
    out.dedup();
    out
}

/// OR: the sorted union of both children's streams.
pub struct UnionMatcher {
    pub(crate) a: Box<dyn Matcher>,
    pub(crate) b: Box<dyn Matcher>,
}

impl UnionMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> UnionMatcher {
        UnionMatcher { a, b }
    }
}

impl Matcher for UnionMatcher {
    fn is_active(&self) -> bool {
        self.a.is_active() || self.b.is_active()
    }

    fn id(&self) -> DocNum {
        match (self.a.is_active(), self.b.is_active()) {
            (true, true) => self.a.id().min(self.b.id()),
            (true, false) => self.a.id(),
            (false, true) => self.b.id(),
            (false, false) => panic!("id() on an inactive matcher"),
        }
    }

    fn next(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        let current = self.id();
        // advance every child sitting on the current minimum
        if self.a.is_active() && self.a.id() == current {
            self.a.next()?;
        }
        if self.b.is_active() && self.b.id() == current {
            self.b.next()?;
        }
        Ok(())
    }

    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        if self.a.is_active() && self.a.id() < target {
            self.a.skip_to(target)?;
        }
        if self.b.is_active() && self.b.id() < target {
            self.b.skip_to(target)?;
        }
        Ok(())
    }

    fn weight(&self) -> f32 {
        let current = self.id();
        let mut w = 0.0;
        if self.a.is_active() && self.a.id() == current {
            w += self.a.weight();
        }
        if self.b.is_active() && self.b.id() == current {
            w += self.b.weight();
        }
        w
    }

    fn score(&self) -> f32 {
        let current = self.id();
        let mut s = 0.0;
        if self.a.is_active() && self.a.id() == current {
            s += self.a.score();
        }
        if self.b.is_active() && self.b.id() == current {
            s += self.b.score();
        }
        s
    }

    fn value(&self) -> Vec<u8> {
        let current = self.id();
        if self.a.is_active() && self.a.id() == current {
            self.a.value()
        } else {
            self.b.value()
        }
    }

    fn positions(&self) -> Vec<u32> {
        let current = self.id();
        let a_here = self.a.is_active() && self.a.id() == current;
        let b_here = self.b.is_active() && self.b.id() == current;
        match (a_here, b_here) {
            (true, true) => merge_positions(self.a.positions(), self.b.positions()),
            (true, false) => self.a.positions(),
            _ => self.b.positions(),
        }
    }

    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(UnionMatcher {
            a: self.a.copy(),
            b: self.b.copy(),
        })
    }

    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        match (self.a.is_active(), self.b.is_active()) {
            (false, false) => Box::new(NullMatcher),
            (true, false) => self.a.replace(),
            (false, true) => self.b.replace(),
            (true, true) => Box::new(UnionMatcher {
                a: self.a.replace(),
                b: self.b.replace(),
            }),
        }
    }

    fn depth(&self) -> u32 {
        1 + self.a.depth().max(self.b.depth())
    }

    fn supports_quality(&self) -> bool {
        self.a.supports_quality() && self.b.supports_quality()
    }

    fn quality(&self) -> Result<f32, Error> {
        let current = self.id();
        let mut q = 0.0;
        if self.a.is_active() && self.a.id() == current {
            q += self.a.quality()?;
        }
        if self.b.is_active() && self.b.id() == current {
            q += self.b.quality()?;
        }
        Ok(q)
    }

    fn block_quality(&self) -> Result<f32, Error> {
        let mut q = 0.0;
        if self.a.is_active() {
            q += self.a.block_quality()?;
        }
        if self.b.is_active() {
            q += self.b.block_quality()?;
        }
        Ok(q)
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        let mut skipped = 0;
        while self.a.is_active() && self.b.is_active() {
            let aq = self.a.block_quality()?;
            let bq = self.b.block_quality()?;
            if aq + bq > min_quality {
                break;
            }
            if aq < bq {
                skipped += self.a.skip_to_quality(min_quality - bq)?;
            } else {
                skipped += self.b.skip_to_quality(min_quality - aq)?;
            }
        }
        Ok(skipped)
    }
}

/// Like a union, but a coincident docid scores as the best child plus a
/// tiebreak fraction of the worst, and quality uses max instead of sum.
pub struct DisjunctionMaxMatcher {
    u: UnionMatcher,
    tiebreak: f32,
}

impl DisjunctionMaxMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>, tiebreak: f32) -> DisjunctionMaxMatcher {
        DisjunctionMaxMatcher {
            u: UnionMatcher::new(a, b),
            tiebreak,
        }
    }
}

impl Matcher for DisjunctionMaxMatcher {
    fn is_active(&self) -> bool {
        self.u.is_active()
    }
    fn id(&self) -> DocNum {
        self.u.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.u.next()
    }
    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        self.u.skip_to(target)
    }
    fn weight(&self) -> f32 {
        self.u.weight()
    }

    fn score(&self) -> f32 {
        let current = self.u.id();
        let a_here = self.u.a.is_active() && self.u.a.id() == current;
        let b_here = self.u.b.is_active() && self.u.b.id() == current;
        match (a_here, b_here) {
            (true, true) => {
                let a = self.u.a.score();
                let b = self.u.b.score();
                a.max(b) + self.tiebreak * a.min(b)
            }
            (true, false) => self.u.a.score(),
            _ => self.u.b.score(),
        }
    }

    fn value(&self) -> Vec<u8> {
        self.u.value()
    }
    fn positions(&self) -> Vec<u32> {
        self.u.positions()
    }

    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(DisjunctionMaxMatcher {
            u: UnionMatcher {
                a: self.u.a.copy(),
                b: self.u.b.copy(),
            },
            tiebreak: self.tiebreak,
        })
    }

    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        match (self.u.a.is_active(), self.u.b.is_active()) {
            (false, false) => Box::new(NullMatcher),
            (true, false) => self.u.a.replace(),
            (false, true) => self.u.b.replace(),
            (true, true) => Box::new(DisjunctionMaxMatcher {
                u: UnionMatcher {
                    a: self.u.a.replace(),
                    b: self.u.b.replace(),
                },
                tiebreak: self.tiebreak,
            }),
        }
    }

    fn depth(&self) -> u32 {
        self.u.depth()
    }

    fn supports_quality(&self) -> bool {
        self.u.supports_quality()
    }

    fn quality(&self) -> Result<f32, Error> {
        let current = self.u.id();
        let mut q = 0.0f32;
        if self.u.a.is_active() && self.u.a.id() == current {
            q = q.max(self.u.a.quality()?);
        }
        if self.u.b.is_active() && self.u.b.id() == current {
            q = q.max(self.u.b.quality()?);
        }
        Ok(q)
    }

    fn block_quality(&self) -> Result<f32, Error> {
        let mut q = 0.0f32;
        if self.u.a.is_active() {
            q = q.max(self.u.a.block_quality()?);
        }
        if self.u.b.is_active() {
            q = q.max(self.u.b.block_quality()?);
        }
        Ok(q)
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        let mut skipped = 0;
        while self.u.a.is_active() && self.u.b.is_active() {
            let aq = self.u.a.block_quality()?;
            let bq = self.u.b.block_quality()?;
            if aq.max(bq) > min_quality {
                break;
            }
            if aq < bq {
                skipped += self.u.a.skip_to_quality(min_quality)?;
            } else {
                skipped += self.u.b.skip_to_quality(min_quality)?;
            }
        }
        Ok(skipped)
    }
}

/// AND: only docids present in both children.
pub struct IntersectionMatcher {
    pub(crate) a: Box<dyn Matcher>,
    pub(crate) b: Box<dyn Matcher>,
}

impl IntersectionMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Result<IntersectionMatcher, Error> {
        let mut m = IntersectionMatcher { a, b };
        m.find_next()?;
        Ok(m)
    }

    fn find_next(&mut self) -> Result<(), Error> {
        while self.a.is_active() && self.b.is_active() && self.a.id() != self.b.id() {
            if self.a.id() < self.b.id() {
                self.a.skip_to(self.b.id())?;
            } else {
                self.b.skip_to(self.a.id())?;
            }
        }
        Ok(())
    }

    pub(crate) fn first(&self) -> &dyn Matcher {
        &*self.a
    }

    /// Quality-skip the left child only, then realign; used by Require.
    pub(crate) fn skip_first_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        let skipped = self.a.skip_to_quality(min_quality)?;
        self.find_next()?;
        Ok(skipped)
    }
}

impl Matcher for IntersectionMatcher {
    fn is_active(&self) -> bool {
        self.a.is_active() && self.b.is_active()
    }
    fn id(&self) -> DocNum {
        self.a.id()
    }

    fn next(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        self.a.next()?;
        self.find_next()
    }

    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        if self.a.id() < target {
            self.a.skip_to(target)?;
        }
        if self.b.is_active() && self.b.id() < target {
            self.b.skip_to(target)?;
        }
        self.find_next()
    }

    fn weight(&self) -> f32 {
        self.a.weight() + self.b.weight()
    }
    fn score(&self) -> f32 {
        self.a.score() + self.b.score()
    }
    fn value(&self) -> Vec<u8> {
        self.a.value()
    }
    fn positions(&self) -> Vec<u32> {
        merge_positions(self.a.positions(), self.b.positions())
    }

    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(IntersectionMatcher {
            a: self.a.copy(),
            b: self.b.copy(),
        })
    }

    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if !self.is_active() {
            return Box::new(NullMatcher);
        }
        // children stay aligned; replace preserves cursor state
        Box::new(IntersectionMatcher {
            a: self.a.replace(),
            b: self.b.replace(),
        })
    }

    fn depth(&self) -> u32 {
        1 + self.a.depth().max(self.b.depth())
    }

    fn supports_quality(&self) -> bool {
        self.a.supports_quality() && self.b.supports_quality()
    }

    fn quality(&self) -> Result<f32, Error> {
        Ok(self.a.quality()? + self.b.quality()?)
    }

    fn block_quality(&self) -> Result<f32, Error> {
        Ok(self.a.block_quality()? + self.b.block_quality()?)
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        let mut skipped = 0;
        while self.a.is_active() && self.b.is_active() {
            let aq = self.a.block_quality()?;
            let bq = self.b.block_quality()?;
            if aq + bq > min_quality {
                break;
            }
            if aq < bq {
                skipped += self.a.skip_to_quality(min_quality - bq)?;
            } else {
                skipped += self.b.skip_to_quality(min_quality - aq)?;
            }
        }
        self.find_next()?;
        Ok(skipped)
    }
}

/// Docids in `a` but not in `b`; scores come solely from `a`.
pub struct AndNotMatcher {
    a: Box<dyn Matcher>,
    b: Box<dyn Matcher>,
}

impl AndNotMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Result<AndNotMatcher, Error> {
        let mut m = AndNotMatcher { a, b };
        m.find_next()?;
        Ok(m)
    }

    fn find_next(&mut self) -> Result<(), Error> {
        if !self.b.is_active() {
            return Ok(());
        }
        if self.a.is_active() && self.b.id() < self.a.id() {
            self.b.skip_to(self.a.id())?;
        }
        while self.a.is_active() && self.b.is_active() && self.a.id() == self.b.id() {
            self.a.next()?;
            if self.a.is_active() && self.b.is_active() && self.b.id() < self.a.id() {
                self.b.skip_to(self.a.id())?;
            }
        }
        Ok(())
    }
}

impl Matcher for AndNotMatcher {
    fn is_active(&self) -> bool {
        self.a.is_active()
    }
    fn id(&self) -> DocNum {
        self.a.id()
    }

    fn next(&mut self) -> Result<(), Error> {
        if !self.a.is_active() {
            return Err(Error::ReadTooFar);
        }
        self.a.next()?;
        self.find_next()
    }

    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if !self.a.is_active() {
            return Err(Error::ReadTooFar);
        }
        self.a.skip_to(target)?;
        self.find_next()
    }

    fn weight(&self) -> f32 {
        self.a.weight()
    }
    fn score(&self) -> f32 {
        self.a.score()
    }
    fn value(&self) -> Vec<u8> {
        self.a.value()
    }
    fn positions(&self) -> Vec<u32> {
        self.a.positions()
    }
    fn spans(&self) -> Vec<Span> {
        self.a.spans()
    }

    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(AndNotMatcher {
            a: self.a.copy(),
            b: self.b.copy(),
        })
    }

    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if !self.a.is_active() {
            return Box::new(NullMatcher);
        }
        if !self.b.is_active() {
            return self.a.replace();
        }
        Box::new(AndNotMatcher {
            a: self.a.replace(),
            b: self.b.replace(),
        })
    }

    fn depth(&self) -> u32 {
        1 + self.a.depth().max(self.b.depth())
    }

    fn supports_quality(&self) -> bool {
        self.a.supports_quality()
    }
    fn quality(&self) -> Result<f32, Error> {
        self.a.quality()
    }
    fn block_quality(&self) -> Result<f32, Error> {
        self.a.block_quality()
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        let skipped = self.a.skip_to_quality(min_quality)?;
        self.find_next()?;
        Ok(skipped)
    }
}

/// Matches where both children match but reports only `a`'s scores.
pub struct RequireMatcher {
    child: IntersectionMatcher,
}

impl RequireMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Result<RequireMatcher, Error> {
        Ok(RequireMatcher {
            child: IntersectionMatcher::new(a, b)?,
        })
    }
}

impl Matcher for RequireMatcher {
    fn is_active(&self) -> bool {
        self.child.is_active()
    }
    fn id(&self) -> DocNum {
        self.child.id()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.child.next()
    }
    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        self.child.skip_to(target)
    }
    fn weight(&self) -> f32 {
        self.child.first().weight()
    }
    fn score(&self) -> f32 {
        self.child.first().score()
    }
    fn value(&self) -> Vec<u8> {
        self.child.first().value()
    }
    fn positions(&self) -> Vec<u32> {
        self.child.first().positions()
    }
    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(RequireMatcher {
            child: IntersectionMatcher {
                a: self.child.a.copy(),
                b: self.child.b.copy(),
            },
        })
    }
    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if !self.child.is_active() {
            return Box::new(NullMatcher);
        }
        self
    }
    fn depth(&self) -> u32 {
        self.child.depth()
    }
    fn supports_quality(&self) -> bool {
        self.child.first().supports_quality()
    }
    fn quality(&self) -> Result<f32, Error> {
        self.child.first().quality()
    }
    fn block_quality(&self) -> Result<f32, Error> {
        self.child.first().block_quality()
    }
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        self.child.skip_first_to_quality(min_quality)
    }
}

/// Traversal driven by `a`; `b` contributes to the score where it coincides.
pub struct AndMaybeMatcher {
    a: Box<dyn Matcher>,
    b: Box<dyn Matcher>,
}

impl AndMaybeMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Result<AndMaybeMatcher, Error> {
        let mut m = AndMaybeMatcher { a, b };
        m.sync_b()?;
        Ok(m)
    }

    fn sync_b(&mut self) -> Result<(), Error> {
        if self.a.is_active() && self.b.is_active() && self.b.id() < self.a.id() {
            self.b.skip_to(self.a.id())?;
        }
        Ok(())
    }

    fn b_coincides(&self) -> bool {
        self.a.is_active() && self.b.is_active() && self.a.id() == self.b.id()
    }
}

impl Matcher for AndMaybeMatcher {
    fn is_active(&self) -> bool {
        self.a.is_active()
    }
    fn id(&self) -> DocNum {
        self.a.id()
    }

    fn next(&mut self) -> Result<(), Error> {
        if !self.a.is_active() {
            return Err(Error::ReadTooFar);
        }
        self.a.next()?;
        self.sync_b()
    }

    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if !self.a.is_active() {
            return Err(Error::ReadTooFar);
        }
        self.a.skip_to(target)?;
        self.sync_b()
    }

    fn weight(&self) -> f32 {
        if self.b_coincides() {
            self.a.weight() + self.b.weight()
        } else {
            self.a.weight()
        }
    }

    fn score(&self) -> f32 {
        if self.b_coincides() {
            self.a.score() + self.b.score()
        } else {
            self.a.score()
        }
    }

    fn value(&self) -> Vec<u8> {
        self.a.value()
    }

    fn positions(&self) -> Vec<u32> {
        if self.b_coincides() {
            merge_positions(self.a.positions(), self.b.positions())
        } else {
            self.a.positions()
        }
    }

    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(AndMaybeMatcher {
            a: self.a.copy(),
            b: self.b.copy(),
        })
    }

    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if !self.a.is_active() {
            return Box::new(NullMatcher);
        }
        if !self.b.is_active() {
            return self.a.replace();
        }
        Box::new(AndMaybeMatcher {
            a: self.a.replace(),
            b: self.b.replace(),
        })
    }

    fn depth(&self) -> u32 {
        1 + self.a.depth().max(self.b.depth())
    }

    fn supports_quality(&self) -> bool {
        self.a.supports_quality() && self.b.supports_quality()
    }

    fn quality(&self) -> Result<f32, Error> {
        if self.b_coincides() {
            Ok(self.a.quality()? + self.b.quality()?)
        } else {
            self.a.quality()
        }
    }

    fn block_quality(&self) -> Result<f32, Error> {
        let mut q = self.a.block_quality()?;
        if self.b.is_active() {
            q += self.b.block_quality()?;
        }
        Ok(q)
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        if !self.b.is_active() {
            return self.a.skip_to_quality(min_quality);
        }
        let mut skipped = 0;
        while self.a.is_active() && self.b.is_active() {
            let aq = self.a.block_quality()?;
            let bq = self.b.block_quality()?;
            if aq + bq > min_quality {
                break;
            }
            if aq < bq {
                skipped += self.a.skip_to_quality(min_quality - bq)?;
            } else {
                skipped += self.b.skip_to_quality(min_quality - aq)?;
            }
        }
        self.sync_b()?;
        Ok(skipped)
    }
}

fn has_chain_end_in(chains: &[Span], lo: u32, hi: u32) -> Option<usize> {
    // chains are kept sorted by end; binary-search the window
    if lo > hi {
        return None;
    }
    let mut left = 0usize;
    let mut right = chains.len();
    while left < right {
        let mid = (left + right) / 2;
        if chains[mid].end < lo {
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    if left < chains.len() && chains[left].end <= hi {
        // prefer the tightest predecessor in the window
        let mut best = left;
        while best + 1 < chains.len() && chains[best + 1].end <= hi {
            best += 1;
        }
        Some(best)
    } else {
        None
    }
}

/// Matches documents where the word matchers occur as a phrase.
///
/// `slop` follows the original convention: the maximum allowed position
/// delta between consecutive words, so `slop = 1` means adjacent.
pub struct PhraseMatcher {
    words: Vec<Box<dyn Matcher>>,
    slop: u32,
    boost: f32,
    chains: Vec<Span>,
    active: bool,
}

impl PhraseMatcher {
    pub fn new(
        words: Vec<Box<dyn Matcher>>,
        slop: u32,
        boost: f32,
    ) -> Result<PhraseMatcher, Error> {
        let mut m = PhraseMatcher {
            words,
            slop: slop.max(1),
            boost,
            chains: Vec::new(),
            active: false,
        };
        if m.words.is_empty() {
            return Ok(m);
        }
        m.active = true;
        m.find_next()?;
        Ok(m)
    }

    /// Skip every word matcher to a common docid; false on exhaustion.
    fn align(&mut self) -> Result<bool, Error> {
        loop {
            let mut target = 0;
            for w in &self.words {
                if !w.is_active() {
                    return Ok(false);
                }
                target = target.max(w.id());
            }
            let mut aligned = true;
            for w in self.words.iter_mut() {
                if w.id() < target {
                    w.skip_to(target)?;
                    if !w.is_active() {
                        return Ok(false);
                    }
                    if w.id() != target {
                        aligned = false;
                    }
                }
            }
            if aligned {
                return Ok(true);
            }
        }
    }

    /// At an aligned docid, chain word positions under the slop window.
    fn check_positions(&mut self) -> bool {
        let mut chains: Vec<Span> = self.words[0]
            .positions()
            .into_iter()
            .map(Span::point)
            .collect();
        for w in self.words.iter().skip(1) {
            if chains.is_empty() {
                break;
            }
            let mut extended: Vec<Span> = Vec::new();
            for p in w.positions() {
                let lo = p.saturating_sub(self.slop);
                let hi = match p {
                    0 => continue, // no predecessor can come before position 0
                    _ => p - 1,
                };
                if let Some(found) = has_chain_end_in(&chains, lo, hi) {
                    extended.push(Span::new(chains[found].start, p));
                }
            }
            chains = extended;
        }
        if chains.is_empty() {
            false
        } else {
            self.chains = chains;
            true
        }
    }

    fn find_next(&mut self) -> Result<(), Error> {
        loop {
            if !self.align()? {
                self.active = false;
                self.chains.clear();
                return Ok(());
            }
            if self.check_positions() {
                return Ok(());
            }
            self.words[0].next()?;
            if !self.words[0].is_active() {
                self.active = false;
                self.chains.clear();
                return Ok(());
            }
        }
    }
}

impl Matcher for PhraseMatcher {
    fn is_active(&self) -> bool {
        self.active
    }
    fn id(&self) -> DocNum {
        self.words[0].id()
    }

    fn next(&mut self) -> Result<(), Error> {
        if !self.active {
            return Err(Error::ReadTooFar);
        }
        self.words[0].next()?;
        if !self.words[0].is_active() {
            self.active = false;
            self.chains.clear();
            return Ok(());
        }
        self.find_next()
    }

    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if !self.active {
            return Err(Error::ReadTooFar);
        }
        if target <= self.id() {
            return Ok(());
        }
        self.words[0].skip_to(target)?;
        if !self.words[0].is_active() {
            self.active = false;
            self.chains.clear();
            return Ok(());
        }
        self.find_next()
    }

    fn weight(&self) -> f32 {
        self.words.iter().map(|w| w.weight()).sum::<f32>() * self.boost
    }

    fn score(&self) -> f32 {
        self.words.iter().map(|w| w.score()).sum::<f32>() * self.boost
    }

    fn positions(&self) -> Vec<u32> {
        let mut ends: Vec<u32> = self.chains.iter().map(|c| c.end).collect();
        ends.sort_unstable();
        ends.dedup();
        ends
    }

    fn spans(&self) -> Vec<Span> {
        let mut spans = self.chains.clone();
        spans.sort();
        spans.dedup();
        spans
    }

    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(PhraseMatcher {
            words: self.words.iter().map(|w| w.copy()).collect(),
            slop: self.slop,
            boost: self.boost,
            chains: self.chains.clone(),
            active: self.active,
        })
    }

    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if self.active {
            self
        } else {
            Box::new(NullMatcher)
        }
    }

    fn depth(&self) -> u32 {
        1 + self.words.iter().map(|w| w.depth()).max().unwrap_or(0)
    }
}

/// Concatenates per-segment matchers, offsetting each child's local docnums
/// into the global space.
pub struct MultiMatcher {
    children: Vec<Box<dyn Matcher>>,
    offsets: Vec<DocNum>,
    current: usize,
}

impl MultiMatcher {
    pub fn new(children: Vec<Box<dyn Matcher>>, offsets: Vec<DocNum>) -> MultiMatcher {
        debug_assert_eq!(children.len(), offsets.len());
        let mut m = MultiMatcher {
            children,
            offsets,
            current: 0,
        };
        m.find_active();
        m
    }

    fn find_active(&mut self) {
        while self.current < self.children.len() && !self.children[self.current].is_active() {
            self.current += 1;
        }
    }
}

impl Matcher for MultiMatcher {
    fn is_active(&self) -> bool {
        self.current < self.children.len()
    }

    fn id(&self) -> DocNum {
        self.children[self.current].id() + self.offsets[self.current]
    }

    fn next(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        self.children[self.current].next()?;
        self.find_active();
        Ok(())
    }

    fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        loop {
            if !self.is_active() || target <= self.id() {
                return Ok(());
            }
            let offset = self.offsets[self.current];
            let local = target.saturating_sub(offset);
            self.children[self.current].skip_to(local)?;
            if self.children[self.current].is_active() {
                return Ok(());
            }
            self.current += 1;
            self.find_active();
        }
    }

    fn weight(&self) -> f32 {
        self.children[self.current].weight()
    }
    fn score(&self) -> f32 {
        self.children[self.current].score()
    }
    fn value(&self) -> Vec<u8> {
        self.children[self.current].value()
    }
    fn positions(&self) -> Vec<u32> {
        self.children[self.current].positions()
    }
    fn spans(&self) -> Vec<Span> {
        self.children[self.current].spans()
    }

    fn copy(&self) -> Box<dyn Matcher> {
        Box::new(MultiMatcher {
            children: self.children.iter().map(|c| c.copy()).collect(),
            offsets: self.offsets.clone(),
            current: self.current,
        })
    }

    fn replace(self: Box<Self>) -> Box<dyn Matcher> {
        if self.is_active() {
            self
        } else {
            Box::new(NullMatcher)
        }
    }

    fn depth(&self) -> u32 {
        1 + self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    fn supports_quality(&self) -> bool {
        self.children.iter().all(|c| c.supports_quality())
    }

    fn quality(&self) -> Result<f32, Error> {
        self.children[self.current].quality()
    }

    fn block_quality(&self) -> Result<f32, Error> {
        self.children[self.current].block_quality()
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize, Error> {
        if !self.is_active() {
            return Err(Error::ReadTooFar);
        }
        let skipped = self.children[self.current].skip_to_quality(min_quality)?;
        self.find_active();
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm(ids: &[DocNum]) -> Box<dyn Matcher> {
        Box::new(ListMatcher::new(ids.to_vec()))
    }

    fn ids_and_scores(m: &mut dyn Matcher) -> Vec<(DocNum, f32)> {
        let mut out = Vec::new();
        while m.is_active() {
            out.push((m.id(), m.score()));
            m.next().unwrap();
        }
        out
    }

    #[test]
    fn null_matcher() {
        let mut nm = NullMatcher;
        assert!(!nm.is_active());
        assert!(all_ids(&mut nm).unwrap().is_empty());
        assert!(nm.next().is_err());
    }

    #[test]
    fn list_matcher() {
        let ids = vec![1, 2, 5, 9, 10];
        let mut m = ListMatcher::new(ids.clone());
        assert_eq!(
            ids_and_scores(&mut m),
            vec![(1, 1.0), (2, 1.0), (5, 1.0), (9, 1.0), (10, 1.0)]
        );

        let mut m = ListMatcher::new(ids.clone());
        assert_eq!(all_ids(&mut m).unwrap(), ids);

        let mut m = ListMatcher::at_position(ids.clone(), 3);
        assert_eq!(all_ids(&mut m).unwrap(), vec![9, 10]);

        // copy() is an independent cursor from the current state
        let mut m = ListMatcher::new(ids);
        for _ in 0..3 {
            m.next().unwrap();
        }
        let mut copied = m.copy();
        assert_eq!(all_ids(&mut *copied).unwrap(), vec![9, 10]);
    }

    #[test]
    fn wrapping_scales_scores() {
        let mut wm = WrappingMatcher::new(lm(&[1, 2, 5, 9, 10]), 2.0);
        assert_eq!(
            ids_and_scores(&mut wm),
            vec![(1, 2.0), (2, 2.0), (5, 2.0), (9, 2.0), (10, 2.0)]
        );
    }

    #[test]
    fn exclude() {
        let excluded: Arc<HashSet<DocNum>> = Arc::new([2, 9].iter().cloned().collect());
        let mut em = ExcludeMatcher::new(lm(&[1, 2, 5, 9, 10]), excluded.clone()).unwrap();
        assert_eq!(all_ids(&mut em).unwrap(), vec![1, 5, 10]);

        let mut em = ExcludeMatcher::new(lm(&[1, 2, 5, 9, 10]), excluded).unwrap();
        em.next().unwrap();
        em.next().unwrap();
        let mut copied = em.copy();
        assert_eq!(all_ids(&mut *copied).unwrap(), vec![10]);
    }

    #[test]
    fn simple_union() {
        let mut um = UnionMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20]));
        assert_eq!(
            ids_and_scores(&mut um),
            vec![
                (0, 1.0),
                (1, 1.0),
                (4, 2.0),
                (10, 1.0),
                (20, 2.0),
                (90, 1.0)
            ]
        );

        let mut um = UnionMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20]));
        um.next().unwrap();
        um.next().unwrap();
        let mut copied = um.copy();
        assert_eq!(all_ids(&mut *copied).unwrap(), vec![4, 10, 20, 90]);
    }

    #[test]
    fn union_of_unions() {
        let um = UnionMatcher::new(
            lm(&[1, 2, 3, 4, 5, 6, 7, 8]),
            Box::new(UnionMatcher::new(
                lm(&[2, 4, 8, 10, 20, 30]),
                lm(&[10, 100, 200]),
            )),
        );
        let mut um = um;
        assert_eq!(
            all_ids(&mut um).unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 10, 20, 30, 100, 200]
        );
    }

    #[test]
    fn union_scores() {
        // S3: three singleton-weight lists
        let mut um = UnionMatcher::new(
            lm(&[1, 2, 3]),
            Box::new(UnionMatcher::new(lm(&[2, 4, 8]), lm(&[2, 3, 8]))),
        );
        assert_eq!(
            ids_and_scores(&mut um),
            vec![(1, 1.0), (2, 3.0), (3, 2.0), (4, 1.0), (8, 2.0)]
        );
    }

    #[test]
    fn simple_intersection() {
        // S4
        let mut im = IntersectionMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20])).unwrap();
        assert_eq!(ids_and_scores(&mut im), vec![(4, 2.0), (20, 2.0)]);

        let mut im = IntersectionMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20])).unwrap();
        im.next().unwrap();
        im.next().unwrap();
        let mut copied = im.copy();
        assert_eq!(all_ids(&mut *copied).unwrap(), Vec::<DocNum>::new());
    }

    #[test]
    fn andnot() {
        let mut anm = AndNotMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20])).unwrap();
        assert_eq!(
            ids_and_scores(&mut anm),
            vec![(1, 1.0), (10, 1.0), (90, 1.0)]
        );
    }

    #[test]
    fn andnot_with_null_sides() {
        let mut anm =
            AndNotMatcher::new(Box::new(NullMatcher), Box::new(NullMatcher)).unwrap();
        assert!(!anm.is_active());
        assert!(all_ids(&mut anm).unwrap().is_empty());

        let mut anm =
            AndNotMatcher::new(lm(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]), Box::new(NullMatcher))
                .unwrap();
        assert_eq!(
            all_ids(&mut anm).unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
        );
    }

    #[test]
    fn require() {
        let mut rm = RequireMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20])).unwrap();
        assert_eq!(ids_and_scores(&mut rm), vec![(4, 1.0), (20, 1.0)]);
    }

    #[test]
    fn andmaybe() {
        let mut amm = AndMaybeMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20])).unwrap();
        assert_eq!(
            ids_and_scores(&mut amm),
            vec![(1, 1.0), (4, 2.0), (10, 1.0), (20, 2.0), (90, 1.0)]
        );

        let mut amm = AndMaybeMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20])).unwrap();
        amm.next().unwrap();
        amm.next().unwrap();
        let mut copied = amm.copy();
        assert_eq!(all_ids(&mut *copied).unwrap(), vec![10, 20, 90]);
    }

    #[test]
    fn inverse() {
        let mut inv = InverseMatcher::new(lm(&[1, 5, 10, 11, 13]), 15).unwrap();
        assert_eq!(
            all_ids(&mut inv).unwrap(),
            vec![0, 2, 3, 4, 6, 7, 8, 9, 12, 14]
        );
    }

    #[test]
    fn inverse_skip() {
        // S5
        let mut inv = InverseMatcher::new(lm(&[1, 5, 10, 11, 13]), 15).unwrap();
        inv.skip_to(8).unwrap();
        assert_eq!(all_ids(&mut inv).unwrap(), vec![8, 9, 12, 14]);
    }

    #[test]
    fn inverse_missing_predicate() {
        let missing: Arc<dyn Fn(DocNum) -> bool + Send + Sync> = Arc::new(|d| d % 2 == 1);
        let mut inv =
            InverseMatcher::with_missing(lm(&[0, 2]), 8, Some(missing)).unwrap();
        assert_eq!(all_ids(&mut inv).unwrap(), vec![4, 6]);
    }

    #[test]
    fn movement_after_exhaustion_is_read_too_far() {
        let mut m = ListMatcher::new(vec![3]);
        m.next().unwrap();
        assert!(!m.is_active());
        assert!(matches!(m.next(), Err(Error::ReadTooFar)));
        assert!(matches!(m.skip_to(10), Err(Error::ReadTooFar)));

        let mut um = UnionMatcher::new(lm(&[1]), lm(&[1]));
        um.next().unwrap();
        assert!(matches!(um.next(), Err(Error::ReadTooFar)));
    }

    #[test]
    fn skip_to_is_monotone() {
        let mut um = UnionMatcher::new(lm(&[1, 4, 10, 20, 90]), lm(&[0, 4, 20]));
        um.skip_to(5).unwrap();
        assert_eq!(um.id(), 10);
        // skipping backwards is a no-op
        um.skip_to(2).unwrap();
        assert_eq!(um.id(), 10);
        um.skip_to(90).unwrap();
        assert_eq!(um.id(), 90);
    }

    #[test]
    fn replace_folds_dead_branches() {
        let mut a = ListMatcher::new(vec![1, 2]);
        while a.is_active() {
            a.next().unwrap();
        }
        let um: Box<dyn Matcher> = Box::new(UnionMatcher::new(Box::new(a), lm(&[5, 6])));
        let replaced = um.replace();
        // the union collapsed to the live side
        assert_eq!(replaced.depth(), 0);
        let mut replaced = replaced;
        assert_eq!(all_ids(&mut *replaced).unwrap(), vec![5, 6]);

        let empty: Box<dyn Matcher> = Box::new(ListMatcher::new(Vec::new()));
        assert!(!empty.replace().is_active());
    }

    #[test]
    fn phrase_adjacent_positions() {
        // positions come from canned posting payloads
        struct Positioned {
            inner: ListMatcher,
            positions: Vec<Vec<u32>>,
            index: usize,
        }
        impl Positioned {
            fn new(ids: &[DocNum], positions: Vec<Vec<u32>>) -> Positioned {
                Positioned {
                    inner: ListMatcher::new(ids.to_vec()),
                    positions,
                    index: 0,
                }
            }
        }
        impl Matcher for Positioned {
            fn is_active(&self) -> bool {
                self.inner.is_active()
            }
            fn id(&self) -> DocNum {
                self.inner.id()
            }
            fn next(&mut self) -> Result<(), Error> {
                self.index += 1;
                self.inner.next()
            }
            fn skip_to(&mut self, target: DocNum) -> Result<(), Error> {
                while self.inner.is_active() && self.inner.id() < target {
                    self.next()?;
                }
                Ok(())
            }
            fn weight(&self) -> f32 {
                1.0
            }
            fn score(&self) -> f32 {
                1.0
            }
            fn positions(&self) -> Vec<u32> {
                self.positions[self.index].clone()
            }
            fn copy(&self) -> Box<dyn Matcher> {
                Box::new(Positioned {
                    inner: self.inner.clone(),
                    positions: self.positions.clone(),
                    index: self.index,
                })
            }
            fn replace(self: Box<Self>) -> Box<dyn Matcher> {
                self
            }
        }

        // doc 0: "miss muffet sat" (adjacent), doc 1: "miss ... sat" (gap 2)
        let miss = Positioned::new(&[0, 1], vec![vec![0], vec![0]]);
        let muffet = Positioned::new(&[0], vec![vec![1]]);
        let sat = Positioned::new(&[0, 1], vec![vec![2], vec![2]]);

        let mut pm = PhraseMatcher::new(
            vec![Box::new(miss), Box::new(muffet), Box::new(sat)],
            1,
            1.0,
        )
        .unwrap();
        assert_eq!(all_ids(&mut pm).unwrap(), vec![0]);

        // slop 2 lets "miss _ sat" through on doc 1
        let miss = Positioned::new(&[0, 1], vec![vec![0], vec![0]]);
        let sat = Positioned::new(&[0, 1], vec![vec![2], vec![2]]);
        let mut pm =
            PhraseMatcher::new(vec![Box::new(miss), Box::new(sat)], 2, 1.0).unwrap();
        assert_eq!(all_ids(&mut pm).unwrap(), vec![0, 1]);
    }

    #[test]
    fn multi_matcher_offsets() {
        let mut mm = MultiMatcher::new(
            vec![lm(&[0, 2]), lm(&[]), lm(&[1, 3])],
            vec![0, 5, 5],
        );
        assert_eq!(all_ids(&mut mm).unwrap(), vec![0, 2, 6, 8]);

        let mut mm = MultiMatcher::new(vec![lm(&[0, 2]), lm(&[1, 3])], vec![0, 5]);
        mm.skip_to(7).unwrap();
        assert_eq!(mm.id(), 8);

        let mut mm = MultiMatcher::new(vec![lm(&[0, 2]), lm(&[1, 3])], vec![0, 5]);
        mm.skip_to(3).unwrap();
        assert_eq!(mm.id(), 6);
    }

    #[test]
    fn union_and_intersection_laws() {
        // a tiny fixed-seed generator keeps this deterministic
        let mut state = 0x2545f491u64;
        let mut next_rand = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..50 {
            let mut aset: Vec<DocNum> = Vec::new();
            let mut bset: Vec<DocNum> = Vec::new();
            for d in 0..60u32 {
                if next_rand() % 3 == 0 {
                    aset.push(d);
                }
                if next_rand() % 4 == 0 {
                    bset.push(d);
                }
            }

            let union_expected: Vec<DocNum> = {
                let mut v = aset.clone();
                v.extend(&bset);
                v.sort_unstable();
                v.dedup();
                v
            };
            let inter_expected: Vec<DocNum> = aset
                .iter()
                .cloned()
                .filter(|d| bset.contains(d))
                .collect();
            let andnot_expected: Vec<DocNum> = aset
                .iter()
                .cloned()
                .filter(|d| !bset.contains(d))
                .collect();

            let mut um = UnionMatcher::new(lm(&aset), lm(&bset));
            assert_eq!(all_ids(&mut um).unwrap(), union_expected);

            let mut im = IntersectionMatcher::new(lm(&aset), lm(&bset)).unwrap();
            assert_eq!(all_ids(&mut im).unwrap(), inter_expected);

            let mut anm = AndNotMatcher::new(lm(&aset), lm(&bset)).unwrap();
            assert_eq!(all_ids(&mut anm).unwrap(), andnot_expected);
        }
    }

    #[test]
    fn dismax_scores() {
        let a = ListMatcher::with_weights(vec![1, 3], vec![2.0, 1.0]);
        let b = ListMatcher::with_weights(vec![1, 5], vec![3.0, 4.0]);
        let mut dm = DisjunctionMaxMatcher::new(Box::new(a), Box::new(b), 0.5);
        assert_eq!(
            ids_and_scores(&mut dm),
            vec![(1, 3.0 + 0.5 * 2.0), (3, 1.0), (5, 4.0)]
        );
    }
}
