//! Bit length sets: every length, in bits, that a serialized value of a type can occupy.
//!
//! The algebra has three compositions, mirroring the three ways DSDL puts values
//! next to each other:
//!
//! - **Concatenation** ([`BitLengthSet::concatenate`]): fields serialized in
//!   sequence. The result holds every pairwise sum.
//! - **Alternation** ([`BitLengthSet::alternate`]): exactly one of several
//!   payloads is present (union variants).
//! - **Repetition** ([`BitLengthSet::repeat`], [`BitLengthSet::repeat_range`]): arrays.
//!
//! A set is stored as a bitmap over the grid `min + step * i`, where `step` is the
//! greatest common divisor of the distances between elements. The dense sets that
//! arrays and delimited composites produce therefore take one bit per element, and
//! concatenation works on whole words. No composition may produce a length above
//! [`MAX_BIT_LENGTH`]; those that would return [`LengthOverflow`] instead.

use std::fmt;

/// Longest serialized form accepted, in bits (2 MiB).
pub const MAX_BIT_LENGTH: u64 = 1 << 24;

const WORD_BITS: usize = 64;

/// Elements printed before [`BitLengthSet`]'s `Display` abbreviates.
const DISPLAY_LIMIT: usize = 16;

/// A composition would yield a length above [`MAX_BIT_LENGTH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("serialized length exceeds the limit of {} bits", MAX_BIT_LENGTH)]
pub struct LengthOverflow;

/// Non-empty, ordered set of bit lengths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitLengthSet {
    min: u64,
    /// 1 for a singleton.
    step: u64,
    /// Bit `i` is set when `min + step * i` is an element. Bit 0 is always set and
    /// the last word is never zero, so equal sets compare equal.
    bits: Vec<u64>,
}

/// Arithmetic progression of grid positions: `start + stride * k` for `k < count`.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: usize,
    stride: usize,
    count: usize,
}

impl BitLengthSet {
    /// Set holding exactly one length.
    pub fn new(length: u64) -> Self {
        BitLengthSet {
            min: length,
            step: 1,
            bits: vec![1],
        }
    }

    /// Set of the given lengths. An empty input yields `{0}`.
    ///
    /// # Panics
    ///
    /// If the lengths span more than [`MAX_BIT_LENGTH`] bits.
    pub fn of<I: IntoIterator<Item = u64>>(lengths: I) -> Self {
        let mut values: Vec<u64> = lengths.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        let (min, max) = match (values.first(), values.last()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => return BitLengthSet::new(0),
        };
        assert!(
            max - min <= MAX_BIT_LENGTH,
            "bit lengths {}..={} span more than {} bits",
            min,
            max,
            MAX_BIT_LENGTH
        );
        let mut bits = vec![0; words_for((max - min) as usize + 1)];
        for v in values {
            set_bit(&mut bits, (v - min) as usize);
        }
        BitLengthSet::from_grid(min, 1, bits)
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.min + self.step * highest_position(&self.bits) as u64
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, length: u64) -> bool {
        if length < self.min || (length - self.min) % self.step != 0 {
            return false;
        }
        usize::try_from((length - self.min) / self.step)
            .map(|i| self.bits.get(i / WORD_BITS).is_some_and(|w| w >> (i % WORD_BITS) & 1 == 1))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        positions(&self.bits).map(move |i| self.min + self.step * i as u64)
    }

    /// The single element, if the set has exactly one.
    pub fn as_singleton(&self) -> Option<u64> {
        (self.bits == [1]).then_some(self.min)
    }

    /// Every pairwise sum `a + b` with `a` from `self` and `b` from `other`.
    pub fn concatenate(&self, other: &BitLengthSet) -> Result<BitLengthSet, LengthOverflow> {
        if let Some(b) = other.as_singleton() {
            return self.shift(b);
        }
        if let Some(a) = self.as_singleton() {
            return other.shift(a);
        }
        let max = within_limit(self.max().checked_add(other.max()))?;
        let min = self.min + other.min;
        let step = gcd(self.step, other.step);
        let words = words_for(((max - min) / step) as usize + 1);

        // Spread the larger operand along the runs of the smaller one.
        let (dense, sparse) = if self.len() >= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let source = dense.place(dense.min, step, words);
        let factor = (sparse.step / step) as usize;
        let mut bits = vec![0; words];
        for run in sparse.runs() {
            let offset = run.start * factor;
            if run.count == 1 {
                or_shifted(&mut bits, &source, offset);
            } else {
                or_shifted(&mut bits, &spread(&source, run.stride * factor, run.count), offset);
            }
        }
        Ok(BitLengthSet::from_grid(min, step, bits))
    }

    /// Set union: one of the alternatives is present.
    pub fn alternate(&self, other: &BitLengthSet) -> Result<BitLengthSet, LengthOverflow> {
        let max = within_limit(Some(self.max().max(other.max())))?;
        let min = self.min.min(other.min);
        let step = gcd(
            gcd(self.stride(), other.stride()),
            self.min.abs_diff(other.min),
        )
        .max(1);
        let words = words_for(((max - min) / step) as usize + 1);
        let mut bits = self.place(min, step, words);
        for (dst, src) in bits.iter_mut().zip(other.place(min, step, words)) {
            *dst |= src;
        }
        Ok(BitLengthSet::from_grid(min, step, bits))
    }

    /// Adds `offset` to every element.
    pub fn shift(&self, offset: u64) -> Result<BitLengthSet, LengthOverflow> {
        within_limit(self.max().checked_add(offset))?;
        Ok(BitLengthSet {
            min: self.min + offset,
            step: self.step,
            bits: self.bits.clone(),
        })
    }

    /// All sums of exactly `count` picks from the set (fixed-length array).
    pub fn repeat(&self, count: u64) -> Result<BitLengthSet, LengthOverflow> {
        if count == 0 {
            return Ok(BitLengthSet::new(0));
        }
        within_limit(self.max().checked_mul(count))?;
        if let Some(single) = self.as_singleton() {
            return Ok(BitLengthSet::new(single * count));
        }
        // Square-and-multiply over concatenation.
        let mut result = BitLengthSet::new(0);
        let mut base = self.clone();
        let mut remaining = count;
        while remaining > 0 {
            if remaining & 1 == 1 {
                result = result.concatenate(&base)?;
            }
            remaining >>= 1;
            if remaining > 0 {
                base = base.concatenate(&base)?;
            }
        }
        Ok(result)
    }

    /// Union of `repeat(k)` for `k` in `0..=max_count` (variable-length array payload).
    ///
    /// Equal to `({0} ∪ self).repeat(max_count)`, which is how it is computed.
    pub fn repeat_range(&self, max_count: u64) -> Result<BitLengthSet, LengthOverflow> {
        within_limit(self.max().checked_mul(max_count))?;
        match self.as_singleton() {
            _ if max_count == 0 => Ok(BitLengthSet::new(0)),
            Some(0) => Ok(BitLengthSet::new(0)),
            Some(single) => {
                let count = max_count as usize + 1;
                let mut bits = vec![u64::MAX; words_for(count)];
                if count % WORD_BITS != 0 {
                    if let Some(last) = bits.last_mut() {
                        *last = (1 << (count % WORD_BITS)) - 1;
                    }
                }
                Ok(BitLengthSet {
                    min: 0,
                    step: single,
                    bits,
                })
            }
            None => BitLengthSet::new(0).alternate(self)?.repeat(max_count),
        }
    }

    /// Normalizes a bitmap over `min + step * i` into canonical form.
    fn from_grid(min: u64, step: u64, mut bits: Vec<u64>) -> Self {
        while bits.len() > 1 && bits.last() == Some(&0) {
            bits.pop();
        }
        let common = positions(&bits).fold(0, |g, i| gcd(g, i as u64));
        match common {
            0 => BitLengthSet::new(min),
            1 => BitLengthSet { min, step, bits },
            _ => {
                let common = common as usize;
                let mut packed = vec![0; words_for(highest_position(&bits) / common + 1)];
                for i in positions(&bits) {
                    set_bit(&mut packed, i / common);
                }
                BitLengthSet {
                    min,
                    step: step * common as u64,
                    bits: packed,
                }
            }
        }
    }

    /// Step for gcd purposes: a singleton constrains nothing.
    fn stride(&self) -> u64 {
        if self.bits == [1] {
            0
        } else {
            self.step
        }
    }

    /// Bitmap of this set over the grid `origin + step * i`, `words` long. The grid
    /// must contain every element.
    fn place(&self, origin: u64, step: u64, words: usize) -> Vec<u64> {
        let mut out = vec![0; words];
        let offset = ((self.min - origin) / step) as usize;
        let factor = (self.step / step) as usize;
        if factor == 1 {
            or_shifted(&mut out, &self.bits, offset);
        } else {
            for i in positions(&self.bits) {
                set_bit(&mut out, offset + i * factor);
            }
        }
        out
    }

    /// Greedy split of the set's grid positions into arithmetic runs.
    fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = Vec::new();
        for i in positions(&self.bits) {
            if let Some(run) = runs
                .last_mut()
                .filter(|r| r.count == 1 || r.start + r.stride * r.count == i)
            {
                if run.count == 1 {
                    run.stride = i - run.start;
                }
                run.count += 1;
            } else {
                runs.push(Run {
                    start: i,
                    stride: 0,
                    count: 1,
                });
            }
        }
        runs
    }
}

impl Default for BitLengthSet {
    fn default() -> Self {
        BitLengthSet::new(0)
    }
}

impl From<u64> for BitLengthSet {
    fn from(length: u64) -> Self {
        BitLengthSet::new(length)
    }
}

impl fmt::Display for BitLengthSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.len();
        write!(f, "{{")?;
        for (i, v) in self.iter().take(DISPLAY_LIMIT).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        if len > DISPLAY_LIMIT {
            write!(f, ", ..., {}}} ({} lengths)", self.max(), len)
        } else {
            write!(f, "}}")
        }
    }
}

fn within_limit(length: Option<u64>) -> Result<u64, LengthOverflow> {
    length
        .filter(|&l| l <= MAX_BIT_LENGTH)
        .ok_or(LengthOverflow)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn words_for(positions: usize) -> usize {
    positions.div_ceil(WORD_BITS)
}

fn set_bit(bits: &mut [u64], i: usize) {
    bits[i / WORD_BITS] |= 1 << (i % WORD_BITS);
}

fn highest_position(bits: &[u64]) -> usize {
    let last = bits.last().copied().unwrap_or(1);
    bits.len() * WORD_BITS - 1 - last.leading_zeros() as usize
}

/// Positions of the set bits, ascending.
fn positions(bits: &[u64]) -> impl Iterator<Item = usize> + '_ {
    bits.iter().enumerate().flat_map(|(w, &word)| {
        let mut rest = word;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let bit = rest.trailing_zeros() as usize;
            rest &= rest - 1;
            Some(w * WORD_BITS + bit)
        })
    })
}

/// `dst |= src << shift`, dropping bits past the end of `dst`.
fn or_shifted(dst: &mut [u64], src: &[u64], shift: usize) {
    let words = shift / WORD_BITS;
    let bits = shift % WORD_BITS;
    for (i, &word) in src.iter().enumerate() {
        if word == 0 {
            continue;
        }
        let j = i + words;
        if j >= dst.len() {
            break;
        }
        dst[j] |= word << bits;
        if bits > 0 && j + 1 < dst.len() {
            dst[j + 1] |= word >> (WORD_BITS - bits);
        }
    }
}

/// OR of `src << (stride * k)` for `k < count`, in O(log count) shifted ORs.
fn spread(src: &[u64], stride: usize, count: usize) -> Vec<u64> {
    let mut result = vec![0; src.len()];
    // `power` holds the OR over the first `span` shifts.
    let mut power = src.to_vec();
    let mut span = 1;
    let mut covered = 0;
    let mut remaining = count;
    while remaining > 0 {
        if remaining & 1 == 1 {
            or_shifted(&mut result, &power, stride * covered);
            covered += span;
        }
        remaining >>= 1;
        if remaining > 0 {
            let doubled = power.clone();
            or_shifted(&mut power, &doubled, stride * span);
            span *= 2;
        }
    }
    result
}

/// Minimal number of bits able to hold `value` (at least 1).
pub fn bits_to_represent(value: u64) -> u64 {
    (64 - u64::from(value.leading_zeros())).max(1)
}

/// Width of a union discriminant selecting among `variants` alternatives.
pub fn discriminant_width(variants: usize) -> u64 {
    bits_to_represent((variants as u64).saturating_sub(1))
}
