//! Out-of-band paint strokes that do not belong in snapshots.

use log::debug;
use shared::PaintStroke;

/// Collects strokes from other peers until the paint layer takes them.
#[derive(Debug, Default)]
pub struct PaintRelay {
    received: Vec<PaintStroke>,
}

impl PaintRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a stroke unless it is our own echo.
    ///
    /// The server relays to every peer, sender included, and the sender has
    /// already painted its stroke locally.
    pub fn accept(&mut self, local_player_id: u32, stroke: PaintStroke) -> bool {
        if stroke.player_id == local_player_id {
            debug!("Ignoring echoed stroke from local player {}", local_player_id);
            return false;
        }
        self.received.push(stroke);
        true
    }

    pub fn take(&mut self) -> Vec<PaintStroke> {
        std::mem::take(&mut self.received)
    }

    pub fn pending(&self) -> usize {
        self.received.len()
    }

    pub fn clear(&mut self) {
        self.received.clear();
    }
}
