use overlay_core::cursor::{self, ElementId, ElementLocator, HoverTracker, LayoutRect, RectLayout};
use overlay_core::metrics::OverlayMetrics;
use overlay_core::state::WindowSize;
use overlay_core::{PointerEvent, PointerSink};
use std::sync::Arc;

const KEY_ROWS: u32 = 4;
const KEY_COLUMNS: u32 = 10;
const LABEL_ID_BASE: ElementId = 1000;

/// On-screen keyboard stand-in for the page: a grid of interactive keys,
/// each with a non-interactive label on top.
pub fn keyboard_layout(width: f64, height: f64) -> RectLayout {
    let mut layout = RectLayout::new();
    layout.push(LayoutRect {
        id: 0,
        x: 0.0,
        y: 0.0,
        width,
        height,
        interactive: false,
        parent: None,
    });

    let key_w = width / f64::from(KEY_COLUMNS);
    let key_h = height / f64::from(KEY_ROWS);
    for row in 0..KEY_ROWS {
        for col in 0..KEY_COLUMNS {
            let id = 1 + row * KEY_COLUMNS + col;
            let (x, y) = (f64::from(col) * key_w, f64::from(row) * key_h);
            layout
                .push(LayoutRect {
                    id,
                    x: x + 2.0,
                    y: y + 2.0,
                    width: key_w - 4.0,
                    height: key_h - 4.0,
                    interactive: true,
                    parent: Some(0),
                })
                .push(LayoutRect {
                    id: LABEL_ID_BASE + id,
                    x: x + key_w * 0.25,
                    y: y + key_h * 0.25,
                    width: key_w * 0.5,
                    height: key_h * 0.5,
                    interactive: false,
                    parent: Some(id),
                });
        }
    }
    layout
}

/// Delivers pointer events to the (simulated) page: logs them, counts them,
/// and keeps hover/pressed highlights on the keyboard layout.
pub struct HostSink {
    metrics: Arc<OverlayMetrics>,
    layout: RectLayout,
    window: WindowSize,
    hover: HoverTracker,
}

impl HostSink {
    pub fn new(metrics: Arc<OverlayMetrics>, layout: RectLayout, window: WindowSize) -> Self {
        Self {
            metrics,
            layout,
            window,
            hover: HoverTracker::new(),
        }
    }

    fn key_at(&self, u: f64, v: f64) -> Option<ElementId> {
        cursor::project(self.window, u, v).and_then(|p| self.layout.interactive_at(p))
    }
}

impl PointerSink for HostSink {
    fn send(&mut self, event: PointerEvent) {
        self.metrics.pointer_events_total.inc();
        match event {
            PointerEvent::Cursor { controller, u, v } => {
                tracing::trace!(controller, u, v, "Cursor");
                let point = cursor::project(self.window, u, v);
                self.hover.hover(&self.layout, controller, point);
            }
            PointerEvent::CursorHide { controller } => {
                tracing::debug!(controller, "Cursor hidden");
                self.hover.clear(controller);
            }
            PointerEvent::TriggerState { controller, pressed } => {
                tracing::debug!(controller, pressed, "Trigger state");
            }
            PointerEvent::MouseMove(p) => tracing::trace!(x = p.x, y = p.y, "Mouse move"),
            PointerEvent::MouseEnter(p) => tracing::debug!(x = p.x, y = p.y, "Mouse enter"),
            PointerEvent::MouseLeave(p) => tracing::debug!(x = p.x, y = p.y, "Mouse leave"),
            PointerEvent::MouseDown { controller, u, v } => {
                tracing::debug!(controller, u, v, key = ?self.key_at(u, v), "Mouse down");
                self.hover.press(controller);
            }
            PointerEvent::MouseUp {
                controller,
                u,
                v,
                click_count,
            } => {
                if click_count > 0 {
                    tracing::info!(controller, key = ?self.key_at(u, v), "Key clicked");
                } else {
                    tracing::debug!(controller, u, v, "Mouse up without click");
                }
                self.hover.release_press(controller);
            }
            PointerEvent::Scroll { controller, delta_y } => {
                tracing::debug!(controller, delta_y, "Scroll");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> HostSink {
        HostSink::new(
            Arc::new(OverlayMetrics::new()),
            keyboard_layout(1000.0, 400.0),
            WindowSize {
                width: 1000,
                height: 400,
            },
        )
    }

    #[test]
    fn test_label_resolves_to_its_key() {
        let layout = keyboard_layout(1000.0, 400.0);
        // Center of the first key, on its label.
        assert_eq!(
            layout.interactive_at(overlay_core::events::ScreenPoint { x: 50.0, y: 50.0 }),
            Some(1)
        );
        // The gutter between keys belongs to no key.
        assert_eq!(
            layout.interactive_at(overlay_core::events::ScreenPoint { x: 100.0, y: 50.0 }),
            None
        );
    }

    #[test]
    fn test_press_highlights_hovered_key() {
        let mut s = sink();
        // Top-left key: u small, v near 1 (texture origin is bottom-left).
        s.send(PointerEvent::Cursor { controller: 1, u: 0.05, v: 0.875 });
        assert!(s.hover.is_hovered(1));

        s.send(PointerEvent::MouseDown { controller: 1, u: 0.05, v: 0.875 });
        assert!(s.hover.is_pressed(1));

        s.send(PointerEvent::MouseUp { controller: 1, u: 0.05, v: 0.875, click_count: 1 });
        assert!(!s.hover.is_pressed(1));

        s.send(PointerEvent::CursorHide { controller: 1 });
        assert!(!s.hover.is_hovered(1));
        assert_eq!(s.metrics.pointer_events_total.get(), 4);
    }
}
