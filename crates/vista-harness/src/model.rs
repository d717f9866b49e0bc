#![forbid(unsafe_code)]

//! Reference models for the built-in decorators over `i32` items.
//!
//! A [`StageSpec`] can both attach the real decorator to a collection and
//! compute, from scratch, what that stage outputs for a given upstream.
//! Folding a chain of specs over the source gives the expected decorated
//! sequence after any mutation.
//!
//! A plain [`StageSpec::Distinct`] keeps output slots across hand-offs, so
//! only its set of values is modeled. Chains containing it compare with
//! [`ChainSpec::agrees`], and it belongs at the end of a chain.

use std::collections::HashSet;

use vista_core::PipelineError;
use vista_pipeline::ObservableCollection;
use vista_pipeline::decorators::{Convert, Distinct, Filter, Group, HeaderFooter, Limit, Materialize, Sort};

/// Header value the [`StageSpec::GroupByMod3`] model produces for `key`.
#[must_use]
pub fn group_header(key: i32) -> i32 {
    1_000_000 + key
}

fn is_even(x: &i32) -> bool {
    x % 2 == 0
}

/// One stage of a modeled chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSpec {
    FilterEven,
    FilterAbove(i32),
    SortAscending,
    SortDescending,
    /// Distinct by value; the model lists first occurrences in order.
    Distinct,
    /// Distinct by value, then ascending sort.
    DistinctSorted,
    GroupByMod3,
    Limit(usize),
    LimitEven(usize),
    HeaderFooter(Vec<i32>, Vec<i32>),
    Double,
    Materialize,
}

impl StageSpec {
    /// Attach the real decorator(s) for this stage.
    pub fn attach(&self, collection: &ObservableCollection<i32>) -> Result<(), PipelineError> {
        match self {
            Self::FilterEven => {
                collection.attach(Filter::new(is_even))?;
            }
            Self::FilterAbove(min) => {
                let min = *min;
                collection.attach(Filter::new(move |x: &i32| *x > min))?;
            }
            Self::SortAscending => {
                collection.attach(Sort::ascending())?;
            }
            Self::SortDescending => {
                collection.attach(Sort::descending())?;
            }
            Self::Distinct => {
                collection.attach(Distinct::by_value())?;
            }
            Self::DistinctSorted => {
                collection.attach(Distinct::by_value())?;
                collection.attach(Sort::ascending())?;
            }
            Self::GroupByMod3 => {
                collection.attach(Group::new(|x: &i32| x.rem_euclid(3), |key: &i32, _: &i32| group_header(*key)))?;
            }
            Self::Limit(n) => {
                collection.attach(Limit::new(*n))?;
            }
            Self::LimitEven(n) => {
                collection.attach(Limit::with_condition(*n, is_even))?;
            }
            Self::HeaderFooter(header, footer) => {
                collection.attach(HeaderFooter::new(header.clone(), footer.clone()))?;
            }
            Self::Double => {
                collection.attach(Convert::new(|x: &i32| x.saturating_mul(2)))?;
            }
            Self::Materialize => {
                collection.attach(Materialize::new())?;
            }
        }
        Ok(())
    }

    /// This stage's output for `upstream`, computed from scratch.
    #[must_use]
    pub fn apply(&self, upstream: &[i32]) -> Vec<i32> {
        match self {
            Self::FilterEven => upstream.iter().copied().filter(is_even).collect(),
            Self::FilterAbove(min) => upstream.iter().copied().filter(|x| x > min).collect(),
            Self::SortAscending => {
                let mut out = upstream.to_vec();
                out.sort();
                out
            }
            Self::SortDescending => {
                let mut out = upstream.to_vec();
                out.sort_by(|a, b| b.cmp(a));
                out
            }
            Self::Distinct => {
                let mut seen = HashSet::new();
                upstream.iter().copied().filter(|x| seen.insert(*x)).collect()
            }
            Self::DistinctSorted => {
                let mut out: Vec<i32> = upstream.iter().copied().collect::<HashSet<_>>().into_iter().collect();
                out.sort();
                out
            }
            Self::GroupByMod3 => {
                let mut seen = HashSet::new();
                let mut out = Vec::with_capacity(upstream.len() + 3);
                for &x in upstream {
                    let key = x.rem_euclid(3);
                    if seen.insert(key) {
                        out.push(group_header(key));
                    }
                    out.push(x);
                }
                out
            }
            Self::Limit(n) => upstream.iter().copied().take(*n).collect(),
            Self::LimitEven(n) => {
                let mut counted = 0;
                upstream
                    .iter()
                    .copied()
                    .filter(|x| {
                        if !is_even(x) {
                            return true;
                        }
                        counted += 1;
                        counted <= *n
                    })
                    .collect()
            }
            Self::HeaderFooter(header, footer) => header
                .iter()
                .chain(upstream)
                .chain(footer)
                .copied()
                .collect(),
            Self::Double => upstream.iter().map(|x| x.saturating_mul(2)).collect(),
            Self::Materialize => upstream.to_vec(),
        }
    }
}

/// A chain of modeled stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSpec {
    pub stages: Vec<StageSpec>,
}

impl ChainSpec {
    #[must_use]
    pub fn new(stages: Vec<StageSpec>) -> Self {
        Self { stages }
    }

    /// Attach every stage in order.
    pub fn attach(&self, collection: &ObservableCollection<i32>) -> Result<(), PipelineError> {
        for stage in &self.stages {
            stage.attach(collection)?;
        }
        Ok(())
    }

    /// Expected decorated output for `source`.
    #[must_use]
    pub fn expected(&self, source: &[i32]) -> Vec<i32> {
        self.stages
            .iter()
            .fold(source.to_vec(), |items, stage| stage.apply(&items))
    }

    /// Whether the model fixes the output order, not just its contents.
    #[must_use]
    pub fn is_order_exact(&self) -> bool {
        !self.stages.contains(&StageSpec::Distinct)
    }

    /// Compare two outputs of this chain: exactly, or as multisets when the
    /// order is not modeled.
    #[must_use]
    pub fn agrees(&self, actual: &[i32], expected: &[i32]) -> bool {
        if self.is_order_exact() {
            return actual == expected;
        }
        let mut actual = actual.to_vec();
        let mut expected = expected.to_vec();
        actual.sort_unstable();
        expected.sort_unstable();
        actual == expected
    }
}
