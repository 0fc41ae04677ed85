// src/citations/popover.rs
// Popover geometry for citation references, and the single-popover registry

const ARROW_SIZE: f64 = 8.0;
const VIEWPORT_MARGIN: f64 = 10.0;
const ARROW_GAP: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.left + self.width / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Visible area plus document scroll offsets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

/// Where to draw a popover, in document coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub left: f64,
    pub top: f64,
    pub above: bool,
    /// Arrow offset from the popover's left edge
    pub arrow_left: f64,
}

/// Place a popover next to `anchor` (viewport coordinates).
///
/// Goes below the anchor unless there is not enough room, is clamped
/// horizontally inside the viewport margins, and points its arrow at the
/// anchor's horizontal centre.
pub fn place_popover(anchor: Rect, popover: Size, viewport: Viewport) -> Placement {
    let centered = anchor.center_x() + viewport.scroll_x - popover.width / 2.0;
    let max_left = viewport.scroll_x + viewport.width - popover.width - VIEWPORT_MARGIN;
    let min_left = viewport.scroll_x + VIEWPORT_MARGIN;
    let left = centered.min(max_left).max(min_left);

    let space_below = viewport.height - anchor.bottom();
    let above = space_below < popover.height + ARROW_SIZE + VIEWPORT_MARGIN;

    let top = if above {
        anchor.top + viewport.scroll_y - popover.height - ARROW_SIZE - ARROW_GAP
    } else {
        anchor.bottom() + viewport.scroll_y + ARROW_SIZE + ARROW_GAP
    };

    let anchor_center = anchor.center_x() + viewport.scroll_x;
    let arrow_left = (anchor_center - left - ARROW_SIZE)
        .min(popover.width - ARROW_SIZE * 2.0)
        .max(ARROW_SIZE);

    Placement {
        left,
        top,
        above,
        arrow_left,
    }
}

/// Tracks the one popover that may exist at a time.
#[derive(Debug, Default)]
pub struct PopoverLayer {
    visible: Option<(usize, Placement)>,
}

impl PopoverLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show the popover for citation `target`, removing any existing one
    /// first. Returns the id of the popover that was removed.
    pub fn show(&mut self, target: usize, placement: Placement) -> Option<usize> {
        let removed = self.visible.take().map(|(id, _)| id);
        self.visible = Some((target, placement));
        removed
    }

    /// Hide the popover if it belongs to `target`.
    pub fn hide(&mut self, target: usize) -> bool {
        match self.visible {
            Some((id, _)) if id == target => {
                self.visible = None;
                true
            }
            _ => false,
        }
    }

    pub fn visible(&self) -> Option<(usize, Placement)> {
        self.visible
    }
}
