use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// StatsBomb pitch length (x axis).
pub const PITCH_LENGTH: f64 = 120.0;
/// StatsBomb pitch width (y axis).
pub const PITCH_WIDTH: f64 = 80.0;

pub const DEFAULT_X_BINS: usize = 5;
pub const DEFAULT_Y_BINS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Third {
    Defensive,
    Middle,
    Attacking,
}

impl Third {
    pub fn of_x(x: f64) -> Self {
        if x < PITCH_LENGTH / 3.0 {
            Third::Defensive
        } else if x < PITCH_LENGTH * 2.0 / 3.0 {
            Third::Middle
        } else {
            Third::Attacking
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Third::Defensive => "defensive",
            Third::Middle => "middle",
            Third::Attacking => "attacking",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Left,
    Central,
    Right,
}

impl Channel {
    pub fn of_y(y: f64) -> Self {
        if y < PITCH_WIDTH / 3.0 {
            Channel::Left
        } else if y < PITCH_WIDTH * 2.0 / 3.0 {
            Channel::Central
        } else {
            Channel::Right
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Left => "left",
            Channel::Central => "central",
            Channel::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: usize,
    pub x_bin: usize,
    pub y_bin: usize,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub third: Third,
    pub channel: Channel,
}

impl Zone {
    /// Short label used on the wire, e.g. `x2_y1`.
    pub fn label(&self) -> String {
        format!("x{}_y{}", self.x_bin, self.y_bin)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    pub fn description(&self) -> String {
        format!("{} third, {} channel", self.third.label(), self.channel.label())
    }
}

/// Rectangular partition of the pitch. Bins are half-open `[min, max)`
/// except the last column/row, which is closed on its upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneGrid {
    pub x_bins: usize,
    pub y_bins: usize,
}

impl Default for ZoneGrid {
    fn default() -> Self {
        Self {
            x_bins: DEFAULT_X_BINS,
            y_bins: DEFAULT_Y_BINS,
        }
    }
}

impl ZoneGrid {
    pub fn new(x_bins: usize, y_bins: usize) -> Self {
        Self {
            x_bins: x_bins.max(1),
            y_bins: y_bins.max(1),
        }
    }

    /// Grids read back from disk bypass `new`; an empty axis has no zones.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.x_bins == 0 || self.y_bins == 0 {
            return Err(EngineError::InvalidRequest(format!(
                "zone grid {}x{} has an empty axis",
                self.x_bins, self.y_bins
            )));
        }
        Ok(())
    }

    pub fn zone_count(&self) -> usize {
        self.x_bins * self.y_bins
    }

    pub fn zone_id(&self, x_bin: usize, y_bin: usize) -> usize {
        x_bin * self.y_bins + y_bin
    }

    /// Maps a pitch coordinate to its zone id. Out-of-range and non-finite
    /// inputs are clamped onto the pitch.
    pub fn zone_of(&self, x: f64, y: f64) -> usize {
        let xb = bin_index(x, PITCH_LENGTH, self.x_bins);
        let yb = bin_index(y, PITCH_WIDTH, self.y_bins);
        self.zone_id(xb, yb)
    }

    pub fn zone(&self, id: usize) -> Option<Zone> {
        if id >= self.zone_count() {
            return None;
        }
        let x_bin = id / self.y_bins;
        let y_bin = id % self.y_bins;
        let x_min = bin_edge(x_bin, PITCH_LENGTH, self.x_bins);
        let x_max = bin_edge(x_bin + 1, PITCH_LENGTH, self.x_bins);
        let y_min = bin_edge(y_bin, PITCH_WIDTH, self.y_bins);
        let y_max = bin_edge(y_bin + 1, PITCH_WIDTH, self.y_bins);
        let (cx, cy) = ((x_min + x_max) / 2.0, (y_min + y_max) / 2.0);
        Some(Zone {
            id,
            x_bin,
            y_bin,
            x_min,
            x_max,
            y_min,
            y_max,
            third: Third::of_x(cx),
            channel: Channel::of_y(cy),
        })
    }

    /// All zones ordered by id.
    pub fn zones(&self) -> Vec<Zone> {
        (0..self.zone_count()).filter_map(|id| self.zone(id)).collect()
    }
}

fn bin_edge(idx: usize, length: f64, bins: usize) -> f64 {
    if idx >= bins {
        return length;
    }
    length * idx as f64 / bins as f64
}

fn bin_index(v: f64, length: f64, bins: usize) -> usize {
    let v = if v.is_finite() { v.clamp(0.0, length) } else { 0.0 };
    let mut idx = ((v * bins as f64) / length).floor() as usize;
    idx = idx.min(bins.saturating_sub(1));
    // Float division can land one bin off right at an edge; settle against
    // the same edges `zone()` reports.
    if idx > 0 && v < bin_edge(idx, length, bins) {
        idx -= 1;
    }
    if idx + 1 < bins && v >= bin_edge(idx + 1, length, bins) {
        idx += 1;
    }
    idx
}
