//! Remote motion playback.
//!
//! A `moving_chess` broadcast installs a [`Trajectory`] for its piece. Each
//! render tick maps elapsed time onto the waypoint sequence and moves the
//! piece. A newer broadcast replaces the buffer wholesale.

use std::collections::HashMap;
use std::time::Duration;

use tabletop_core::coord::Coord3D;
use tokio::time::Instant;
use tracing::debug;

use super::PieceRenderer;

/// Result of sampling a trajectory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    /// Still in flight.
    Moving {
        /// Interpolated position.
        position: Coord3D,
        /// Index of the segment being traversed.
        segment: usize,
    },
    /// Playback complete; snap here.
    Finished(Coord3D),
}

impl Sample {
    /// The position to render.
    pub fn position(self) -> Coord3D {
        match self {
            Self::Moving { position, .. } | Self::Finished(position) => position,
        }
    }
}

/// One piece's waypoint buffer and playback clock.
#[derive(Clone, Debug)]
pub struct Trajectory {
    points: Vec<Coord3D>,
    start: Instant,
    duration: Duration,
    cursor: usize,
}

impl Trajectory {
    /// Start playback of `points` at `start`.
    pub fn new(points: Vec<Coord3D>, start: Instant, duration: Duration) -> Self {
        Self {
            points,
            start,
            duration,
            cursor: 0,
        }
    }

    /// Needs at least two waypoints.
    pub fn is_playable(&self) -> bool {
        self.points.len() >= 2
    }

    /// Waypoints.
    pub fn points(&self) -> &[Coord3D] {
        &self.points
    }

    /// Segment reached by the last sample.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Elapsed fraction of the playback duration, clamped to `[0, 1]`.
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.start);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Position at `now`, or `None` when the buffer is not playable.
    pub fn sample(&mut self, now: Instant) -> Option<Sample> {
        if !self.is_playable() {
            return None;
        }
        let last = self.points[self.points.len() - 1];
        let segments = self.points.len() - 1;
        let progress = self.progress(now);
        if progress >= 1.0 {
            self.cursor = segments;
            return Some(Sample::Finished(last));
        }

        #[allow(clippy::cast_precision_loss)]
        let scaled = progress * segments as f64;
        // `scaled` lies in [0, segments), so the floor fits.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let segment = scaled.floor() as usize;
        if segment >= segments {
            self.cursor = segments;
            return Some(Sample::Finished(last));
        }
        #[allow(clippy::cast_precision_loss)]
        let within = scaled - segment as f64;
        self.cursor = segment;
        Some(Sample::Moving {
            position: self.points[segment].lerp(self.points[segment + 1], within),
            segment,
        })
    }
}

/// Every in-flight trajectory, keyed by piece name.
#[derive(Debug)]
pub struct TrajectoryEngine {
    buffers: HashMap<String, Trajectory>,
    duration: Duration,
    max_points: usize,
}

impl TrajectoryEngine {
    /// Engine with a fixed playback duration and buffer bound.
    pub fn new(duration: Duration, max_points: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            duration,
            max_points: max_points.max(2),
        }
    }

    /// Replace `piece`'s buffer. Only the newest `max_points` waypoints are kept.
    pub fn install(&mut self, piece: &str, points: &[Coord3D], now: Instant) {
        let keep = &points[points.len().saturating_sub(self.max_points)..];
        let trajectory = Trajectory::new(keep.to_vec(), now, self.duration);
        if self.buffers.insert(piece.to_owned(), trajectory).is_some() {
            debug!(piece, "trajectory superseded");
        }
    }

    /// Drop `piece`'s buffer, if any.
    pub fn cancel(&mut self, piece: &str) -> bool {
        self.buffers.remove(piece).is_some()
    }

    /// Drop every buffer.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Whether `piece` has a buffer.
    pub fn contains(&self, piece: &str) -> bool {
        self.buffers.contains_key(piece)
    }

    /// Buffer for `piece`.
    pub fn get(&self, piece: &str) -> Option<&Trajectory> {
        self.buffers.get(piece)
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// One render tick: move every piece and drop finished or degenerate buffers.
    pub fn advance<R: PieceRenderer>(&mut self, now: Instant, renderer: &mut R) {
        self.buffers.retain(|piece, trajectory| {
            if !renderer.contains(piece) {
                debug!(piece = %piece, "trajectory target missing, discarded");
                return false;
            }
            match trajectory.sample(now) {
                None => {
                    debug!(
                        piece = %piece,
                        points = trajectory.points.len(),
                        "degenerate trajectory discarded"
                    );
                    false
                }
                Some(Sample::Moving { position, .. }) => {
                    renderer.set_position(piece, position);
                    true
                }
                Some(Sample::Finished(position)) => {
                    renderer.set_position(piece, position);
                    false
                }
            }
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
