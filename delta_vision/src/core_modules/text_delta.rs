// THEORY:
// The `text_delta` module scores how much a page's extracted text changed against a
// baseline. It uses the Ratcliff/Obershelp "gestalt" similarity: find the longest
// common block, recurse on the text to the left and to the right of it, and sum the
// sizes of all matched blocks. With M matched characters and T characters in total,
// the similarity ratio is 2M / T and the change is 100 - 100 * ratio.
//
// Page sources are long and repetitive (whitespace, angle brackets, quotes). For a
// current text of 200 characters or more, characters that occur in more than
// 1% + 1 of its positions are "popular": they never seed a match, though they can
// still extend one. This keeps the search fast and mirrors the usual behavior of
// gestalt matchers on long inputs.

use std::collections::HashMap;

pub type TextChange = f64;

const POPULAR_MIN_LEN: usize = 200;

/// Percentage of change between `baseline` and `current`, in `[0, 100]`.
pub fn text_change_percentage(baseline: &str, current: &str) -> TextChange {
    100.0 - similarity_ratio(baseline, current) * 100.0
}

/// The gestalt similarity ratio of two texts, in `[0, 1]`. Two empty texts are identical.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matcher = BlockMatcher::new(&a, &b);
    2.0 * matcher.matched_len() as f64 / total as f64
}

struct BlockMatcher<'a> {
    a: &'a [char],
    b: &'a [char],
    /// Positions of each non-popular character in `b`, ascending.
    b_index: HashMap<char, Vec<usize>>,
}

impl<'a> BlockMatcher<'a> {
    fn new(a: &'a [char], b: &'a [char]) -> Self {
        let mut b_index: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, c) in b.iter().enumerate() {
            b_index.entry(*c).or_default().push(j);
        }
        if b.len() >= POPULAR_MIN_LEN {
            let limit = b.len() / 100 + 1;
            b_index.retain(|_, positions| positions.len() <= limit);
        }
        Self { a, b, b_index }
    }

    /// Longest block `a[i..i+k] == b[j..j+k]` inside the given ranges.
    fn longest_match(
        &self,
        a_lo: usize,
        a_hi: usize,
        b_lo: usize,
        b_hi: usize,
    ) -> (usize, usize, usize) {
        let (mut best_i, mut best_j, mut best_k) = (a_lo, b_lo, 0);
        let mut run_at: HashMap<usize, usize> = HashMap::new();

        for i in a_lo..a_hi {
            let mut next_run_at: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b_index.get(&self.a[i]) {
                for &j in positions {
                    if j < b_lo {
                        continue;
                    }
                    if j >= b_hi {
                        break;
                    }
                    let extends = j.checked_sub(1).and_then(|prev| run_at.get(&prev));
                    let k = extends.copied().unwrap_or(0) + 1;
                    next_run_at.insert(j, k);
                    if k > best_k {
                        best_i = i + 1 - k;
                        best_j = j + 1 - k;
                        best_k = k;
                    }
                }
            }
            run_at = next_run_at;
        }

        // Popular characters cannot seed a block but may still widen one.
        while best_i > a_lo && best_j > b_lo && self.a[best_i - 1] == self.b[best_j - 1] {
            best_i -= 1;
            best_j -= 1;
            best_k += 1;
        }
        while best_i + best_k < a_hi
            && best_j + best_k < b_hi
            && self.a[best_i + best_k] == self.b[best_j + best_k]
        {
            best_k += 1;
        }

        (best_i, best_j, best_k)
    }

    fn matched_len(&self) -> usize {
        let mut matched = 0;
        let mut pending = vec![(0, self.a.len(), 0, self.b.len())];

        while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
            let (i, j, k) = self.longest_match(a_lo, a_hi, b_lo, b_hi);
            if k == 0 {
                continue;
            }
            matched += k;
            if a_lo < i && b_lo < j {
                pending.push((a_lo, i, b_lo, j));
            }
            if i + k < a_hi && j + k < b_hi {
                pending.push((i + k, a_hi, j + k, b_hi));
            }
        }
        matched
    }
}
