//! Texture-space hits to screen pixels, and hover/pressed highlighting.

use crate::bridge::ControllerId;
use crate::events::ScreenPoint;
use crate::state::WindowSize;
use std::collections::BTreeMap;

/// Maps `(u, v)` (origin bottom-left) to a pixel (origin top-left).
///
/// `None` while the viewport size is unknown or the input is not finite.
pub fn project(window: WindowSize, u: f64, v: f64) -> Option<ScreenPoint> {
    if window.width == 0 || window.height == 0 || !u.is_finite() || !v.is_finite() {
        return None;
    }
    let max_x = f64::from(window.width - 1);
    let max_y = f64::from(window.height - 1);
    Some(ScreenPoint {
        x: (u * max_x).clamp(0.0, max_x),
        y: ((1.0 - v) * max_y).clamp(0.0, max_y),
    })
}

pub type ElementId = u32;

/// Finds the topmost interactive element under a screen point.
pub trait ElementLocator {
    fn interactive_at(&self, point: ScreenPoint) -> Option<ElementId>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutRect {
    pub id: ElementId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub interactive: bool,
    pub parent: Option<ElementId>,
}

impl LayoutRect {
    fn contains(&self, p: ScreenPoint) -> bool {
        p.x >= self.x && p.x < self.x + self.width && p.y >= self.y && p.y < self.y + self.height
    }
}

/// Flat list of rectangles in paint order; later entries are on top.
#[derive(Debug, Clone, Default)]
pub struct RectLayout {
    rects: Vec<LayoutRect>,
}

impl RectLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rect: LayoutRect) -> &mut Self {
        self.rects.push(rect);
        self
    }

    fn by_id(&self, id: ElementId) -> Option<&LayoutRect> {
        self.rects.iter().find(|r| r.id == id)
    }
}

impl ElementLocator for RectLayout {
    fn interactive_at(&self, point: ScreenPoint) -> Option<ElementId> {
        let mut current = self.rects.iter().rev().find(|r| r.contains(point))?;
        // Bounded by the layout size so a parent cycle cannot spin forever.
        for _ in 0..=self.rects.len() {
            if current.interactive {
                return Some(current.id);
            }
            current = self.by_id(current.parent?)?;
        }
        None
    }
}

/// Reference-counted `hover` and `pressed` highlights.
///
/// Each controller contributes at most one hover and one pressed element. An
/// element stays highlighted while any controller still holds it.
#[derive(Debug, Default)]
pub struct HoverTracker {
    hover_by_controller: BTreeMap<ControllerId, ElementId>,
    pressed_by_controller: BTreeMap<ControllerId, ElementId>,
    hover_counts: BTreeMap<ElementId, u32>,
    pressed_counts: BTreeMap<ElementId, u32>,
}

fn acquire(counts: &mut BTreeMap<ElementId, u32>, id: ElementId) {
    *counts.entry(id).or_insert(0) += 1;
}

fn release(counts: &mut BTreeMap<ElementId, u32>, id: ElementId) {
    if let Some(n) = counts.get_mut(&id) {
        *n -= 1;
        if *n == 0 {
            counts.remove(&id);
        }
    }
}

impl HoverTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `controller`'s hover to whatever interactive element lies under
    /// `point`. `None` clears it.
    pub fn hover<L: ElementLocator + ?Sized>(
        &mut self,
        locator: &L,
        controller: ControllerId,
        point: Option<ScreenPoint>,
    ) {
        let target = point.and_then(|p| locator.interactive_at(p));
        let previous = self.hover_by_controller.get(&controller).copied();
        if previous == target {
            return;
        }
        if let Some(old) = previous {
            release(&mut self.hover_counts, old);
            self.hover_by_controller.remove(&controller);
        }
        if let Some(new) = target {
            acquire(&mut self.hover_counts, new);
            self.hover_by_controller.insert(controller, new);
        }
    }

    /// Marks the element `controller` currently hovers as pressed.
    pub fn press(&mut self, controller: ControllerId) {
        self.release_press(controller);
        if let Some(&id) = self.hover_by_controller.get(&controller) {
            acquire(&mut self.pressed_counts, id);
            self.pressed_by_controller.insert(controller, id);
        }
    }

    pub fn release_press(&mut self, controller: ControllerId) {
        if let Some(id) = self.pressed_by_controller.remove(&controller) {
            release(&mut self.pressed_counts, id);
        }
    }

    /// Drops every highlight `controller` holds.
    pub fn clear(&mut self, controller: ControllerId) {
        if let Some(id) = self.hover_by_controller.remove(&controller) {
            release(&mut self.hover_counts, id);
        }
        self.release_press(controller);
    }

    pub fn is_hovered(&self, id: ElementId) -> bool {
        self.hover_counts.contains_key(&id)
    }

    pub fn is_pressed(&self, id: ElementId) -> bool {
        self.pressed_counts.contains_key(&id)
    }
}
