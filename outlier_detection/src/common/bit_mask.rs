//! Bit-packed 2D boolean mask used for outlier flags.
//!
//! One bit per pixel in `u64` words (LSB first). Bits past `width * height`
//! in the last word are always zero so `count_ones` and the raw word view
//! stay exact.

const BITS_PER_WORD: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMask2 {
    words: Vec<u64>,
    width: usize,
    height: usize,
    len: usize,
}

impl BitMask2 {
    pub fn new_default(width: usize, height: usize) -> Self {
        let len = width * height;
        Self {
            words: vec![0; len.div_ceil(BITS_PER_WORD)],
            width,
            height,
            len,
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize) -> bool) -> Self {
        let mut mask = Self::new_default(width, height);
        for idx in 0..mask.len {
            if f(idx) {
                mask.words[idx / BITS_PER_WORD] |= 1 << (idx % BITS_PER_WORD);
            }
        }
        mask
    }

    /// Rebuild a mask from its packed words, e.g. after reading it back from a spool file.
    pub fn from_words(width: usize, height: usize, words: Vec<u64>) -> Self {
        let len = width * height;
        assert_eq!(
            words.len(),
            len.div_ceil(BITS_PER_WORD),
            "word count does not match dimensions {width}x{height}"
        );
        let mut mask = Self {
            words,
            width,
            height,
            len,
        };
        mask.clear_tail();
        mask
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        (self.words[idx / BITS_PER_WORD] >> (idx % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: bool) {
        debug_assert!(idx < self.len);
        let bit = 1u64 << (idx % BITS_PER_WORD);
        if value {
            self.words[idx / BITS_PER_WORD] |= bit;
        } else {
            self.words[idx / BITS_PER_WORD] &= !bit;
        }
    }

    #[inline]
    pub fn get_xy(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height);
        self.get(y * self.width + x)
    }

    #[inline]
    pub fn set_xy(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        self.set(y * self.width + x, value);
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Linear indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_idx, &word)| {
                let mut rest = word;
                std::iter::from_fn(move || {
                    if rest == 0 {
                        return None;
                    }
                    let bit = rest.trailing_zeros() as usize;
                    rest &= rest - 1;
                    Some(word_idx * BITS_PER_WORD + bit)
                })
            })
    }

    pub fn and_assign(&mut self, other: &Self) {
        assert_eq!(self.width, other.width, "width mismatch");
        assert_eq!(self.height, other.height, "height mismatch");
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= *b;
        }
    }

    /// Binary dilation with a 3x3 square structuring element.
    ///
    /// A pixel is set in the result if any pixel of its 8-neighbourhood
    /// (itself included) is set in `self`. Out-of-bounds neighbours are
    /// treated as unset.
    pub fn dilate_3x3(&self) -> Self {
        let (w, h) = (self.width, self.height);
        let mut out = Self::new_default(w, h);
        for idx in self.iter_ones() {
            let x = idx % w;
            let y = idx / w;
            let x0 = x.saturating_sub(1);
            let x1 = (x + 1).min(w - 1);
            let y0 = y.saturating_sub(1);
            let y1 = (y + 1).min(h - 1);
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    out.set_xy(nx, ny, true);
                }
            }
        }
        out
    }

    fn clear_tail(&mut self) {
        let tail = self.len % BITS_PER_WORD;
        if tail != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1u64 << tail) - 1;
        }
    }
}
