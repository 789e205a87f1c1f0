//! Template matching seam.
//!
//! Scoring is done by an external engine; the service only needs a score
//! per pair of templates.

use std::fmt;

/// Scores the similarity of two templates. Higher is more similar.
pub trait TemplateMatcher: Send + Sync {
    fn score(&self, probe: &[u8], candidate: &[u8]) -> i32;
}

/// [`TemplateMatcher`] backed by a closure.
///
/// # Examples
///
/// ```
/// use biolink_engine::matcher::{FnMatcher, TemplateMatcher};
///
/// let exact = FnMatcher::new(|a: &[u8], b: &[u8]| if a == b { 100 } else { 0 });
/// assert_eq!(exact.score(b"abc", b"abc"), 100);
/// assert_eq!(exact.score(b"abc", b"abd"), 0);
/// ```
pub struct FnMatcher<F> {
    score: F,
}

impl<F> FnMatcher<F>
where
    F: Fn(&[u8], &[u8]) -> i32 + Send + Sync,
{
    pub fn new(score: F) -> Self {
        Self { score }
    }
}

impl<F> TemplateMatcher for FnMatcher<F>
where
    F: Fn(&[u8], &[u8]) -> i32 + Send + Sync,
{
    fn score(&self, probe: &[u8], candidate: &[u8]) -> i32 {
        (self.score)(probe, candidate)
    }
}

impl<F> fmt::Debug for FnMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMatcher").finish_non_exhaustive()
    }
}
