// heightfield.rs - Span height-field with arena-addressed spans
//
// Spans live in one Vec and columns link them by `SpanId`, so a span id
// taken before a filter pass still names the same span after it. Only
// `add_span` frees spans (when merging), and filters never call it.

use crate::area::AreaFlags;

/// Largest representable span height
pub const MAX_SPAN_HEIGHT: u16 = 0xffff;

/// Index of a span in its height-field's arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u32);

impl SpanId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Vertical solid interval in one column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub smin: u16,
    pub smax: u16,
    pub area: AreaFlags,
    pub next: Option<SpanId>,
}

/// Position and resolution of a height-field, in engine space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightFieldSpec {
    pub width: i32,
    pub height: i32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub cs: f32,
    pub ch: f32,
}

impl HeightFieldSpec {
    /// Grid covering `bmin..bmax` grown by `border` cells on each side in XZ
    pub fn from_bounds(bmin: [f32; 3], bmax: [f32; 3], cs: f32, ch: f32, border: i32) -> Self {
        let pad = border as f32 * cs;
        let bmin = [bmin[0] - pad, bmin[1], bmin[2] - pad];
        let bmax = [bmax[0] + pad, bmax[1], bmax[2] + pad];
        Self {
            width: ((bmax[0] - bmin[0]) / cs + 0.5) as i32,
            height: ((bmax[2] - bmin[2]) / cs + 0.5) as i32,
            bmin,
            bmax,
            cs,
            ch,
        }
    }
}

/// Columns of linked spans over a width x height grid
#[derive(Clone, Debug)]
pub struct HeightField {
    pub width: i32,
    pub height: i32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub cs: f32,
    pub ch: f32,
    columns: Vec<Option<SpanId>>,
    spans: Vec<Span>,
    free: Vec<SpanId>,
}

impl HeightField {
    pub fn new(spec: &HeightFieldSpec) -> Self {
        let cells = (spec.width.max(0) * spec.height.max(0)) as usize;
        Self {
            width: spec.width,
            height: spec.height,
            bmin: spec.bmin,
            bmax: spec.bmax,
            cs: spec.cs,
            ch: spec.ch,
            columns: vec![None; cells],
            spans: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_index(&self, x: i32, z: i32) -> Option<usize> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return None;
        }
        Some((x + z * self.width) as usize)
    }

    /// First (lowest) span of a column
    pub fn first_span(&self, x: i32, z: i32) -> Option<SpanId> {
        self.column_index(x, z).and_then(|i| self.columns[i])
    }

    pub fn span(&self, id: SpanId) -> &Span {
        &self.spans[id.index()]
    }

    pub fn span_mut(&mut self, id: SpanId) -> &mut Span {
        &mut self.spans[id.index()]
    }

    /// Span ids of a column, lowest first
    pub fn column_spans(&self, x: i32, z: i32) -> ColumnSpans<'_> {
        ColumnSpans {
            field: self,
            next: self.first_span(x, z),
        }
    }

    /// Span ids of the column at flat index `i`, lowest first
    pub fn column_spans_at(&self, i: usize) -> ColumnSpans<'_> {
        ColumnSpans {
            field: self,
            next: self.columns.get(i).copied().flatten(),
        }
    }

    /// Every live span id, column by column
    pub fn all_spans(&self) -> impl Iterator<Item = SpanId> + '_ {
        (0..self.columns.len()).flat_map(move |i| self.column_spans_at(i))
    }

    pub fn span_count(&self) -> usize {
        self.all_spans().count()
    }

    /// Insert a span, merging with every span it overlaps.
    /// When the merged tops are within `merge_threshold` the larger area id wins.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: AreaFlags,
        merge_threshold: i32,
    ) {
        let Some(column) = self.column_index(x, z) else {
            return;
        };

        let mut new_span = Span {
            smin,
            smax,
            area,
            next: None,
        };

        let mut prev: Option<SpanId> = None;
        let mut cur = self.columns[column];

        while let Some(id) = cur {
            let existing = self.spans[id.index()];
            if existing.smin > new_span.smax {
                break;
            }
            if existing.smax < new_span.smin {
                prev = Some(id);
                cur = existing.next;
                continue;
            }

            new_span.smin = new_span.smin.min(existing.smin);
            new_span.smax = new_span.smax.max(existing.smax);
            if (new_span.smax as i32 - existing.smax as i32).abs() <= merge_threshold
                && existing.area.bits() > new_span.area.bits()
            {
                new_span.area = existing.area;
            }

            let next = existing.next;
            self.free_span(id);
            match prev {
                Some(p) => self.spans[p.index()].next = next,
                None => self.columns[column] = next,
            }
            cur = next;
        }

        let id = self.alloc_span(new_span);
        match prev {
            Some(p) => {
                self.spans[id.index()].next = self.spans[p.index()].next;
                self.spans[p.index()].next = Some(id);
            }
            None => {
                self.spans[id.index()].next = self.columns[column];
                self.columns[column] = Some(id);
            }
        }
    }

    fn alloc_span(&mut self, span: Span) -> SpanId {
        if let Some(id) = self.free.pop() {
            self.spans[id.index()] = span;
            id
        } else {
            self.spans.push(span);
            SpanId((self.spans.len() - 1) as u32)
        }
    }

    fn free_span(&mut self, id: SpanId) {
        let span = &mut self.spans[id.index()];
        span.area = AreaFlags::NONE;
        span.next = None;
        self.free.push(id);
    }
}

/// Iterator over the span ids of one column
pub struct ColumnSpans<'a> {
    field: &'a HeightField,
    next: Option<SpanId>,
}

impl Iterator for ColumnSpans<'_> {
    type Item = SpanId;

    fn next(&mut self) -> Option<SpanId> {
        let id = self.next?;
        self.next = self.field.span(id).next;
        Some(id)
    }
}
