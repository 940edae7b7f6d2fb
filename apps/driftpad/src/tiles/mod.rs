//! Tile grid engine: derives the visible tile window from the viewport,
//! requests what is missing, assembles arrivals into a drawable surface, and
//! maps taps back into tile-relative click packets.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::protocol::{ClickKind, Packet};

/// Two taps inside this window count as one double-click target.
pub const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(1400);

/// Where tile fetches go. The dispatcher implements this; tests substitute a
/// collector.
pub trait TileRequestSink: Send + Sync {
    fn request_tiles(&self, x1: u32, y1: u32, x2: u32, y2: u32);
}

#[derive(Debug, Clone, Copy)]
struct ClickMark {
    content_x: f64,
    content_y: f64,
    at: Instant,
}

#[derive(Default)]
struct GridState {
    screen_width: u32,
    screen_height: u32,
    tile_size: u32,
    grid_width: u32,
    grid_height: u32,
    visible_width: u32,
    visible_height: u32,
    offset_x: f64,
    offset_y: f64,
    tiles: HashMap<(u32, u32), Bytes>,
    last_requested: Option<(u32, u32)>,
    last_click: Option<ClickMark>,
    repaints: u64,
}

impl GridState {
    fn ready(&self) -> bool {
        self.tile_size > 0
            && self.grid_width > 0
            && self.grid_height > 0
            && self.visible_width > 0
            && self.visible_height > 0
    }

    fn in_bounds(&self, tile_x: u32, tile_y: u32) -> bool {
        tile_x < self.grid_width && tile_y < self.grid_height
    }
}

/// A consistent snapshot of everything received so far, positioned in screen
/// pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tiles: Vec<PaintedTile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaintedTile {
    pub x_px: u32,
    pub y_px: u32,
    pub image: Bytes,
}

pub struct TileGridEngine {
    state: Mutex<GridState>,
    repaint: Condvar,
    sink: Arc<dyn TileRequestSink>,
}

impl TileGridEngine {
    pub fn new(sink: Arc<dyn TileRequestSink>) -> Self {
        Self {
            state: Mutex::new(GridState::default()),
            repaint: Condvar::new(),
            sink,
        }
    }

    /// (Re)initialise the grid from a screen-info reply. All cached tiles are
    /// discarded; in-flight tiles for the old grid get dropped on arrival by
    /// the bounds check against the new dimensions.
    pub fn on_screen_info(&self, width: u32, height: u32, tile_size: u32) {
        let request = {
            let mut state = self.state.lock();
            state.screen_width = width;
            state.screen_height = height;
            state.tile_size = tile_size;
            state.grid_width = if tile_size == 0 { 0 } else { width.div_ceil(tile_size) };
            state.grid_height = if tile_size == 0 { 0 } else { height.div_ceil(tile_size) };
            state.tiles.clear();
            state.last_requested = None;
            state.repaints += 1;
            tracing::debug!(
                target = "driftpad::tiles",
                width,
                height,
                tile_size,
                grid_width = state.grid_width,
                grid_height = state.grid_height,
                "grid reinitialised"
            );
            evaluate(&mut state)
        };
        self.finish(request);
    }

    /// Pixel size of the client's visible window.
    pub fn set_visible_size(&self, width: u32, height: u32) {
        let request = {
            let mut state = self.state.lock();
            state.visible_width = width;
            state.visible_height = height;
            evaluate(&mut state)
        };
        self.finish(request);
    }

    /// Called whenever the viewport tracker moves. Re-evaluates the visible
    /// tile window; a fetch goes out only when the top-left visible tile
    /// actually changed, so jitter inside a tile issues nothing.
    pub fn on_viewport_changed(&self, offset_x: f64, offset_y: f64) {
        let request = {
            let mut state = self.state.lock();
            state.offset_x = offset_x;
            state.offset_y = offset_y;
            state.repaints += 1;
            evaluate(&mut state)
        };
        self.finish(request);
    }

    /// Idempotent, order-independent tile delivery; last write wins. Tiles
    /// outside the current grid are stale leftovers and vanish silently.
    pub fn on_tile_received(&self, tile_x: u32, tile_y: u32, image: Bytes) {
        let mut state = self.state.lock();
        if !state.in_bounds(tile_x, tile_y) {
            tracing::trace!(
                target = "driftpad::tiles",
                tile_x,
                tile_y,
                "dropping stale tile"
            );
            return;
        }
        state.tiles.insert((tile_x, tile_y), image);
        state.repaints += 1;
        drop(state);
        self.repaint.notify_all();
    }

    /// Map a tap on the scrolled screenshot into a tile-relative click. Two
    /// taps inside the double-click window resolve to the first tap's content
    /// point, so a drifting finger still lands a double-click on one target.
    pub fn map_click(&self, screen_x: f64, screen_y: f64, kind: ClickKind) -> Option<Packet> {
        self.map_click_at(screen_x, screen_y, kind, Instant::now())
    }

    pub fn map_click_at(
        &self,
        screen_x: f64,
        screen_y: f64,
        kind: ClickKind,
        now: Instant,
    ) -> Option<Packet> {
        let mut state = self.state.lock();
        if state.tile_size == 0 {
            return None;
        }
        let mut content_x = screen_x - state.offset_x;
        let mut content_y = screen_y - state.offset_y;
        if let Some(mark) = state.last_click {
            if now.saturating_duration_since(mark.at) <= DOUBLE_CLICK_WINDOW {
                content_x = mark.content_x;
                content_y = mark.content_y;
            }
        }
        state.last_click = Some(ClickMark {
            content_x,
            content_y,
            at: now,
        });
        let tile = state.tile_size as f64;
        let tile_x = ((content_x / tile).floor().max(0.0) as u32).min(state.grid_width.saturating_sub(1));
        let tile_y = ((content_y / tile).floor().max(0.0) as u32).min(state.grid_height.saturating_sub(1));
        let offset_x = (content_x - tile_x as f64 * tile).max(0.0) as u32;
        let offset_y = (content_y - tile_y as f64 * tile).max(0.0) as u32;
        Some(Packet::Click {
            tile_x,
            tile_y,
            offset_x,
            offset_y,
            kind,
        })
    }

    /// The plain touchpad path: the pointer lives on the host, so no content
    /// mapping and no sticky-coordinate treatment apply here.
    pub fn touchpad_click(&self, kind: ClickKind) -> Packet {
        Packet::MouseClick { kind }
    }

    pub fn surface(&self) -> Surface {
        let state = self.state.lock();
        let mut tiles: Vec<PaintedTile> = state
            .tiles
            .iter()
            .map(|(&(tx, ty), image)| PaintedTile {
                x_px: tx * state.tile_size,
                y_px: ty * state.tile_size,
                image: image.clone(),
            })
            .collect();
        tiles.sort_by_key(|tile| (tile.y_px, tile.x_px));
        Surface {
            width: state.screen_width,
            height: state.screen_height,
            tile_size: state.tile_size,
            tiles,
        }
    }

    /// Current repaint marker; pass it to [`wait_for_repaint`] to block until
    /// something visual changed.
    ///
    /// [`wait_for_repaint`]: TileGridEngine::wait_for_repaint
    pub fn repaint_marker(&self) -> u64 {
        self.state.lock().repaints
    }

    /// Block until the surface changed since `seen`, or the timeout passes.
    /// Returns the latest marker either way.
    pub fn wait_for_repaint(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.repaints == seen {
            if self.repaint.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.repaints
    }

    fn finish(&self, request: Option<(u32, u32, u32, u32)>) {
        if let Some((x1, y1, x2, y2)) = request {
            tracing::debug!(
                target = "driftpad::tiles",
                x1,
                y1,
                x2,
                y2,
                "requesting tile window"
            );
            self.sink.request_tiles(x1, y1, x2, y2);
        }
        self.repaint.notify_all();
    }
}

/// Compute the tile window the viewport needs. Returns a request only when
/// the top-left visible tile moved since the last issued request. The window
/// carries one overscan row/column on the bottom and right to mask fetch
/// latency, clamped so no coordinate outside the grid is ever asked for.
fn evaluate(state: &mut GridState) -> Option<(u32, u32, u32, u32)> {
    if !state.ready() {
        return None;
    }
    let tile = state.tile_size as f64;
    let top_x = ((-state.offset_x / tile).floor().max(0.0)) as u32;
    let top_y = ((-state.offset_y / tile).floor().max(0.0)) as u32;
    if state.last_requested == Some((top_x, top_y)) {
        return None;
    }
    state.last_requested = Some((top_x, top_y));
    let visible_tiles_x = state.visible_width / state.tile_size;
    let visible_tiles_y = state.visible_height / state.tile_size;
    let x2 = (top_x + visible_tiles_x + 1).min(state.grid_width - 1);
    let y2 = (top_y + visible_tiles_y + 1).min(state.grid_height - 1);
    Some((top_x.min(x2), top_y.min(y2), x2, y2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct CollectingSink {
        requests: PlMutex<Vec<(u32, u32, u32, u32)>>,
    }

    impl CollectingSink {
        fn taken(&self) -> Vec<(u32, u32, u32, u32)> {
            self.requests.lock().clone()
        }
    }

    impl TileRequestSink for CollectingSink {
        fn request_tiles(&self, x1: u32, y1: u32, x2: u32, y2: u32) {
            self.requests.lock().push((x1, y1, x2, y2));
        }
    }

    fn engine() -> (TileGridEngine, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let engine = TileGridEngine::new(sink.clone());
        (engine, sink)
    }

    fn ready_engine() -> (TileGridEngine, Arc<CollectingSink>) {
        let (engine, sink) = engine();
        engine.set_visible_size(320, 480);
        engine.on_screen_info(1024, 768, 128);
        (engine, sink)
    }

    #[test_timeout::timeout]
    fn screen_info_derives_grid_and_requests_initial_window() {
        let (engine, sink) = ready_engine();
        // 1024x768 at 128 -> 8x6 grid; 320x480 window sees 2x3 tiles plus
        // one overscan row/column.
        assert_eq!(sink.taken(), vec![(0, 0, 3, 4)]);
        let surface = engine.surface();
        assert_eq!((surface.width, surface.height), (1024, 768));
        assert!(surface.tiles.is_empty());
    }

    #[test_timeout::timeout]
    fn viewport_jitter_inside_a_tile_requests_nothing() {
        let (engine, sink) = ready_engine();
        engine.on_viewport_changed(-10.0, -20.0);
        engine.on_viewport_changed(-127.0, -127.0);
        engine.on_viewport_changed(-1.0, 0.0);
        assert_eq!(sink.taken().len(), 1);
    }

    #[test_timeout::timeout]
    fn crossing_a_boundary_requests_exactly_once() {
        let (engine, sink) = ready_engine();
        engine.on_viewport_changed(-200.0, -100.0);
        engine.on_viewport_changed(-210.0, -110.0);
        assert_eq!(sink.taken(), vec![(0, 0, 3, 4), (1, 0, 4, 4)]);
    }

    #[test_timeout::timeout]
    fn far_scroll_clamps_window_to_grid_edge() {
        let (engine, sink) = ready_engine();
        engine.on_viewport_changed(-704.0, -288.0);
        let last = *sink.taken().last().unwrap();
        // top tile (5, 2); right/bottom clamped inside the 8x6 grid.
        assert_eq!(last, (5, 2, 7, 5));
    }

    #[test_timeout::timeout]
    fn tile_delivery_is_idempotent() {
        let (engine, _sink) = ready_engine();
        let image = Bytes::from_static(&[1, 2, 3]);
        engine.on_tile_received(2, 3, image.clone());
        let once = engine.surface();
        engine.on_tile_received(2, 3, image);
        assert_eq!(engine.surface(), once);
        assert_eq!(once.tiles.len(), 1);
        assert_eq!(once.tiles[0].x_px, 256);
        assert_eq!(once.tiles[0].y_px, 384);
    }

    #[test_timeout::timeout]
    fn redelivery_overwrites() {
        let (engine, _sink) = ready_engine();
        engine.on_tile_received(0, 0, Bytes::from_static(&[1]));
        engine.on_tile_received(0, 0, Bytes::from_static(&[2]));
        let surface = engine.surface();
        assert_eq!(surface.tiles.len(), 1);
        assert_eq!(surface.tiles[0].image.as_ref(), &[2]);
    }

    #[test_timeout::timeout]
    fn out_of_bounds_tiles_are_dropped_silently() {
        let (engine, _sink) = ready_engine();
        engine.on_tile_received(8, 0, Bytes::from_static(&[9]));
        engine.on_tile_received(0, 6, Bytes::from_static(&[9]));
        assert!(engine.surface().tiles.is_empty());
    }

    #[test_timeout::timeout]
    fn screen_info_change_invalidates_cache_and_stale_arrivals() {
        let (engine, _sink) = ready_engine();
        engine.on_tile_received(7, 5, Bytes::from_static(&[1]));
        assert_eq!(engine.surface().tiles.len(), 1);
        engine.on_screen_info(640, 480, 128);
        assert!(engine.surface().tiles.is_empty());
        // In-flight tile for the old 8x6 grid arrives after the 5x4 rebuild.
        engine.on_tile_received(7, 5, Bytes::from_static(&[1]));
        assert!(engine.surface().tiles.is_empty());
    }

    #[test_timeout::timeout]
    fn click_maps_through_the_viewport_offset() {
        let (engine, _sink) = ready_engine();
        engine.on_viewport_changed(-200.0, -100.0);
        let packet = engine
            .map_click_at(50.0, 50.0, ClickKind::Left, Instant::now())
            .expect("click");
        // content point (250, 150) -> tile (1, 1), offsets (122, 22).
        assert_eq!(
            packet,
            Packet::Click {
                tile_x: 1,
                tile_y: 1,
                offset_x: 122,
                offset_y: 22,
                kind: ClickKind::Left,
            }
        );
    }

    #[test_timeout::timeout]
    fn rapid_second_tap_reuses_the_first_mapped_point() {
        let (engine, _sink) = ready_engine();
        let first_at = Instant::now();
        let first = engine
            .map_click_at(100.0, 100.0, ClickKind::Left, first_at)
            .expect("first");
        let second = engine
            .map_click_at(103.0, 98.0, ClickKind::Left, first_at + Duration::from_millis(300))
            .expect("second");
        match (first, second) {
            (
                Packet::Click {
                    tile_x: ax,
                    tile_y: ay,
                    offset_x: aox,
                    offset_y: aoy,
                    ..
                },
                Packet::Click {
                    tile_x: bx,
                    tile_y: by,
                    offset_x: box_,
                    offset_y: boy,
                    ..
                },
            ) => {
                assert_eq!((ax, ay, aox, aoy), (bx, by, box_, boy));
                assert_eq!((ax, ay, aox, aoy), (0, 0, 100, 100));
            }
            other => panic!("expected two clicks, got {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn slow_second_tap_maps_freshly() {
        let (engine, _sink) = ready_engine();
        let first_at = Instant::now();
        engine.map_click_at(100.0, 100.0, ClickKind::Left, first_at);
        let second = engine
            .map_click_at(300.0, 98.0, ClickKind::Left, first_at + DOUBLE_CLICK_WINDOW + Duration::from_millis(1))
            .expect("second");
        match second {
            Packet::Click { tile_x, offset_x, .. } => {
                assert_eq!((tile_x, offset_x), (2, 44));
            }
            other => panic!("expected click, got {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn touchpad_click_path_has_no_sticky_treatment() {
        let (engine, _sink) = ready_engine();
        assert_eq!(
            engine.touchpad_click(ClickKind::Double),
            Packet::MouseClick {
                kind: ClickKind::Double
            }
        );
    }

    #[test_timeout::timeout]
    fn repaint_marker_advances_on_tile_arrival() {
        let (engine, _sink) = ready_engine();
        let seen = engine.repaint_marker();
        engine.on_tile_received(0, 0, Bytes::from_static(&[1]));
        let latest = engine.wait_for_repaint(seen, Duration::from_millis(50));
        assert_ne!(latest, seen);
        // Nothing new: the wait times out and returns the same marker.
        assert_eq!(
            engine.wait_for_repaint(latest, Duration::from_millis(10)),
            latest
        );
    }
}
