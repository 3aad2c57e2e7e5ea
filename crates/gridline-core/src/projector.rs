//! Windowed projection of a large ordered row sequence.
//!
//! The projector keeps one size per row (estimated until measured) in a
//! Fenwick tree, so prefix offsets and offset-to-index lookups cost
//! O(log n) and a measurement correction is a single O(log n) point update.
//! The table is rebuilt only when the row count changes.

use serde::{Deserialize, Serialize};

/// Supplies the size of a row that has not been measured yet.
pub trait SizeEstimator {
    fn estimate(&self, index: usize) -> f64;
}

/// Same estimated size for every row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedSize(pub f64);

impl SizeEstimator for FixedSize {
    fn estimate(&self, _index: usize) -> f64 {
        self.0
    }
}

impl<F> SizeEstimator for F
where
    F: Fn(usize) -> f64,
{
    fn estimate(&self, index: usize) -> f64 {
        self(index)
    }
}

/// One materialized row of a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowItem {
    pub index: usize,
    /// Pixel offset of the row's top edge from the top of the content.
    pub start: f64,
    pub size: f64,
    /// Whether `size` comes from a measurement rather than the estimator.
    pub measured: bool,
}

impl WindowItem {
    pub fn end(&self) -> f64 {
        self.start + self.size
    }
}

/// The slice of rows to render for one viewport position.
///
/// `start_index..end_index` includes overscan; `visible_start..visible_end`
/// is the strictly visible range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportWindow {
    pub start_index: usize,
    pub end_index: usize,
    pub visible_start: usize,
    pub visible_end: usize,
    /// Offset of `start_index`, i.e. the summed sizes of all rows before it.
    pub pixel_offset: f64,
    pub total_size: f64,
    /// Scroll offset after clamping to the valid range.
    pub scroll_offset: f64,
    pub items: Vec<WindowItem>,
}

impl ViewportWindow {
    pub fn empty() -> Self {
        Self {
            start_index: 0,
            end_index: 0,
            visible_start: 0,
            visible_end: 0,
            pixel_offset: 0.0,
            total_size: 0.0,
            scroll_offset: 0.0,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.start_index == self.end_index
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start_index..self.end_index
    }

    pub fn visible_range(&self) -> std::ops::Range<usize> {
        self.visible_start..self.visible_end
    }
}

/// Running-offset table backed by a Fenwick tree.
#[derive(Debug, Clone, Default)]
struct OffsetTable {
    /// 1-based partial sums.
    tree: Vec<f64>,
    sizes: Vec<f64>,
    measured: Vec<bool>,
}

impl OffsetTable {
    fn from_sizes(sizes: Vec<f64>, measured: Vec<bool>) -> Self {
        let n = sizes.len();
        let mut tree = vec![0.0; n + 1];
        for i in 1..=n {
            tree[i] += sizes[i - 1];
            let parent = i + lowbit(i);
            if parent <= n {
                tree[parent] += tree[i];
            }
        }
        Self {
            tree,
            sizes,
            measured,
        }
    }

    fn len(&self) -> usize {
        self.sizes.len()
    }

    fn add(&mut self, index: usize, delta: f64) {
        let mut i = index + 1;
        while i < self.tree.len() {
            self.tree[i] += delta;
            i += lowbit(i);
        }
    }

    /// Summed size of the first `count` rows.
    fn prefix(&self, count: usize) -> f64 {
        let mut i = count.min(self.len());
        let mut sum = 0.0;
        while i > 0 {
            sum += self.tree[i];
            i -= lowbit(i);
        }
        sum
    }

    fn total(&self) -> f64 {
        self.prefix(self.len())
    }

    /// Number of leading rows that end at or before `offset`, which is the
    /// index of the row containing `offset`.
    fn index_at(&self, offset: f64) -> usize {
        let n = self.len();
        let mut pos = 0;
        let mut remaining = offset;
        let mut step = if n == 0 { 0 } else { 1 << (usize::BITS - 1 - n.leading_zeros()) };
        while step > 0 {
            let next = pos + step;
            if next <= n && self.tree[next] <= remaining {
                pos = next;
                remaining -= self.tree[next];
            }
            step >>= 1;
        }
        pos
    }
}

fn lowbit(i: usize) -> usize {
    i & i.wrapping_neg()
}

fn sanitize(size: f64) -> f64 {
    if size.is_finite() && size > 0.0 {
        size
    } else {
        0.0
    }
}

/// Computes which rows to materialize for a viewport.
#[derive(Debug, Clone, Default)]
pub struct WindowProjector {
    table: OffsetTable,
    /// First strictly visible row of the last projection.
    anchor: usize,
    stale_estimates: bool,
}

impl WindowProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the window for the given scroll position.
    ///
    /// An offset past the end of the content clamps to the last full
    /// viewport; a negative or NaN offset clamps to the top.
    pub fn project<E: SizeEstimator + ?Sized>(
        &mut self,
        total_row_count: usize,
        scroll_offset: f64,
        viewport_height: f64,
        estimator: &E,
        overscan_count: usize,
    ) -> ViewportWindow {
        if total_row_count == 0 {
            self.table = OffsetTable::default();
            self.anchor = 0;
            return ViewportWindow::empty();
        }
        self.sync(total_row_count, estimator);

        let total_size = self.table.total();
        let viewport = if viewport_height.is_finite() {
            viewport_height.max(0.0)
        } else {
            0.0
        };
        let max_offset = (total_size - viewport).max(0.0);
        let offset = if scroll_offset.is_nan() {
            0.0
        } else {
            scroll_offset.clamp(0.0, max_offset)
        };

        let last = total_row_count - 1;
        let visible_start = self.table.index_at(offset).min(last);
        let visible_end = if viewport == 0.0 {
            visible_start
        } else {
            let bottom = offset + viewport;
            let candidate = self.table.index_at(bottom).min(last);
            let end = if self.table.prefix(candidate) < bottom {
                candidate + 1
            } else {
                candidate
            };
            end.max(visible_start + 1).min(total_row_count)
        };

        let start_index = visible_start.saturating_sub(overscan_count);
        let end_index = (visible_end + overscan_count).min(total_row_count);
        let pixel_offset = self.table.prefix(start_index);

        let mut cursor = pixel_offset;
        let items = (start_index..end_index)
            .map(|index| {
                let size = self.table.sizes[index];
                let item = WindowItem {
                    index,
                    start: cursor,
                    size,
                    measured: self.table.measured[index],
                };
                cursor += size;
                item
            })
            .collect();

        self.anchor = visible_start;

        ViewportWindow {
            start_index,
            end_index,
            visible_start,
            visible_end,
            pixel_offset,
            total_size,
            scroll_offset: offset,
            items,
        }
    }

    /// Record the rendered size of a row.
    ///
    /// Returns the scroll correction to add to the current scroll offset so
    /// the rows on screen stay put: non-zero only when the corrected row lies
    /// entirely above the first visible row of the last projection.
    pub fn measure(&mut self, index: usize, size: f64) -> f64 {
        if index >= self.table.len() {
            return 0.0;
        }
        let size = sanitize(size);
        let delta = size - self.table.sizes[index];
        self.table.sizes[index] = size;
        self.table.measured[index] = true;
        if delta == 0.0 {
            return 0.0;
        }
        self.table.add(index, delta);

        if index < self.anchor {
            delta
        } else {
            0.0
        }
    }

    pub fn is_measured(&self, index: usize) -> bool {
        self.table.measured.get(index).copied().unwrap_or(false)
    }

    /// Offset of a row's top edge.
    pub fn offset_of(&self, index: usize) -> f64 {
        self.table.prefix(index)
    }

    pub fn total_size(&self) -> f64 {
        self.table.total()
    }

    /// Re-consult the estimator for every unmeasured row on the next projection.
    pub fn invalidate_estimates(&mut self) {
        self.stale_estimates = true;
    }

    /// Forget all measurements.
    pub fn reset(&mut self) {
        self.table = OffsetTable::default();
        self.anchor = 0;
        self.stale_estimates = false;
    }

    fn sync<E: SizeEstimator + ?Sized>(&mut self, count: usize, estimator: &E) {
        if self.table.len() == count && !self.stale_estimates {
            return;
        }

        let mut sizes = Vec::with_capacity(count);
        let mut measured = Vec::with_capacity(count);
        for index in 0..count {
            if self.table.measured.get(index).copied().unwrap_or(false) {
                sizes.push(self.table.sizes[index]);
                measured.push(true);
            } else {
                sizes.push(sanitize(estimator.estimate(index)));
                measured.push(false);
            }
        }

        tracing::trace!("Rebuilt offset table for {} rows", count);
        self.table = OffsetTable::from_sizes(sizes, measured);
        self.anchor = self.anchor.min(count.saturating_sub(1));
        self.stale_estimates = false;
    }
}
