use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EMPTY_HASH: &str = "00000000";

/// An ordered snapshot of observed values, used as a learning key.
///
/// Elements are kept string-rendered so numeric and textual readings encode
/// identically. A pattern never changes after generation; `mutate` returns a
/// fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Pattern {
    items: Vec<String>,
}

impl Pattern {
    pub fn generate<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        Pattern {
            items: items.into_iter().map(|item| item.to_string()).collect(),
        }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Stable 32-bit content fingerprint, rendered as 8 lowercase hex chars.
    ///
    /// Non-empty elements are joined with `|` and folded through the classic
    /// `h*31 + char` polynomial in wrapping 32-bit arithmetic.
    pub fn hash(&self) -> String {
        let joined = self
            .items
            .iter()
            .filter(|item| !item.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("|");
        if joined.is_empty() {
            return EMPTY_HASH.to_string();
        }
        let mut num: i32 = 0;
        for ch in joined.chars() {
            num = num
                .wrapping_shl(5)
                .wrapping_sub(num)
                .wrapping_add(ch as i32);
        }
        format!("{:08x}", (num as i64).abs())
    }

    /// Shape-sensitive encoding: the sum of absolute differences between
    /// consecutive element codes, walked from the tail.
    ///
    /// The metric ignores *where* in the sequence a jump happens but tracks
    /// how large consecutive jumps are, so a plateau shifting position keeps
    /// its code while a new value changes it anywhere.
    pub fn vector_code(&self) -> u64 {
        let Some(last) = self.items.last() else {
            return 0;
        };
        let mut prev = element_code(last);
        let mut accum: u64 = 0;
        for item in self.items.iter().rev() {
            let value = element_code(item);
            accum += (i64::from(prev) - i64::from(value)).unsigned_abs();
            prev = value;
        }
        accum
    }

    /// Produces a randomized variant that is guaranteed to hash differently.
    ///
    /// Per element: with probability `factor/2` every char code shifts by one
    /// signed jitter, with probability `factor/2` the element is replaced by
    /// a neighbour `range` positions away, otherwise it is copied. The whole
    /// pass repeats until the fingerprint visibly changes.
    pub fn mutate(&self, factor: f64) -> Pattern {
        self.mutate_with(factor, &mut SmallRng::from_entropy())
    }

    pub fn mutate_with(&self, factor: f64, rng: &mut impl Rng) -> Pattern {
        let factor = if (0.0..=1.0).contains(&factor) {
            factor
        } else {
            0.1
        };
        let original = self.hash();
        if original == EMPTY_HASH {
            // nothing visible to mutate
            return self.clone();
        }
        loop {
            let mut items = Vec::with_capacity(self.items.len());
            for (index, item) in self.items.iter().enumerate() {
                let roll: f64 = rng.gen();
                let range = (rng.gen::<f64>() * factor * 20.0) as i64;
                if roll <= factor / 2.0 {
                    let jitter = rng.gen_range(-range..=range) as i32;
                    items.push(shift_chars(item, jitter));
                } else if roll <= factor {
                    let offset = if rng.gen_bool(0.5) { range } else { -range };
                    let target = index as i64 + offset;
                    let swapped = usize::try_from(target)
                        .ok()
                        .and_then(|t| self.items.get(t))
                        .unwrap_or(item);
                    items.push(swapped.clone());
                } else {
                    items.push(item.clone());
                }
            }
            let candidate = Pattern { items };
            if candidate.hash() != original {
                return candidate;
            }
        }
    }
}

/// Positional base-256 fold over the element's chars, in the same wrapping
/// 32-bit arithmetic as the fingerprint.
fn element_code(item: &str) -> i32 {
    let mut code: i32 = 0;
    for ch in item.chars() {
        code = code.wrapping_shl(8).wrapping_add(ch as i32);
    }
    code
}

fn shift_chars(item: &str, jitter: i32) -> String {
    item.chars()
        .map(|ch| {
            u32::try_from(ch as i32 + jitter)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or(ch)
        })
        .collect()
}
