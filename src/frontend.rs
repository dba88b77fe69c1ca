// frontend.rs — Frame-to-frame detect/track/replenish loop.
//
// Per frame:
//
//   1. Build the pyramid of the new image.
//   2. If a previous frame exists → track every live point from the
//      previous pyramid into the new one (batched, coarse-to-fine).
//   3. Drop points whose result is Fail; keep Completed and Uncompleted.
//   4. If fewer than `min_tracked` points survive → run the grid selector
//      with the survivors blocking their cells, and add what it finds with
//      fresh ids.
//   5. The new pyramid becomes the previous one.
//
// Ids increase monotonically over the frontend's lifetime, including
// across `reset`. What to do when too many points are lost (re-init,
// relocalize) is left to the caller.

use crate::calculator::{TrackingMethod, TrackingResult};
use crate::error::Result;
use crate::flow::{FlowConfig, OpticalFlow};
use crate::image::ImageView;
use crate::pyramid::ImagePyramid;
use crate::selector::{GridFeatureSelector, SelectorConfig};

/// Frontend configuration.
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    pub selector: SelectorConfig,
    pub flow: FlowConfig,
    /// Re-detect when fewer points than this survive tracking.
    pub min_tracked: usize,
    /// Linearization used by the tracker.
    pub tracking_method: TrackingMethod,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        FrontendConfig {
            selector: SelectorConfig::default(),
            flow: FlowConfig::default(),
            min_tracked: 100,
            tracking_method: TrackingMethod::IlluminationCompensated,
        }
    }
}

/// A live point with a persistent id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPoint {
    pub id: u64,
    /// Level-0 position in the most recent frame.
    pub pos: [f32; 2],
    /// Pyramid level the point was originally detected on.
    pub level: usize,
    /// Outcome of the last tracking step (Completed for fresh detections).
    pub status: TrackingResult,
}

/// Statistics returned after processing each frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Points that converged.
    pub completed: usize,
    /// Points kept although the iteration budget ran out.
    pub uncompleted: usize,
    /// Points dropped this frame.
    pub lost: usize,
    /// Points added by the selector.
    pub new_detections: usize,
    /// Live points after this frame.
    pub total: usize,
}

pub struct Frontend {
    config: FrontendConfig,
    selector: GridFeatureSelector,
    flow: OpticalFlow,
    points: Vec<TrackedPoint>,
    frame_size: Option<(usize, usize)>,
    next_id: u64,
    // Scratch reused across frames.
    status: Vec<TrackingResult>,
    first: Vec<[f32; 2]>,
    second: Vec<[f32; 2]>,
}

impl Frontend {
    pub fn new(config: FrontendConfig) -> Result<Self> {
        let selector = GridFeatureSelector::new(config.selector.clone())?;
        let flow = OpticalFlow::new(config.flow.clone())?;
        Ok(Frontend {
            config,
            selector,
            flow,
            points: Vec::new(),
            frame_size: None,
            next_id: 1,
            status: Vec::new(),
            first: Vec::new(),
            second: Vec::new(),
        })
    }

    pub fn config(&self) -> &FrontendConfig {
        &self.config
    }

    /// Process one frame.
    pub fn process(&mut self, image: &ImageView<'_, u8>) -> Result<FrameStats> {
        let pyramid = ImagePyramid::build(image, self.flow.number_levels())?;
        let mut stats = FrameStats::default();

        if self.frame_size.is_some_and(|size| size != image.size()) {
            log::warn!(
                "frame size changed from {:?} to {:?}, dropping {} points",
                self.frame_size,
                image.size(),
                self.points.len()
            );
            stats.lost += self.points.len();
            self.points.clear();
        }

        if self.flow.first_pyramid().is_some() && !self.points.is_empty() {
            self.track_into(&pyramid, &mut stats)?;
        }

        if self.points.len() < self.config.min_tracked {
            self.first.clear();
            self.first.extend(self.points.iter().map(|p| p.pos));
            let corners = self.selector.detect_excluding(&pyramid, &self.first);
            for c in corners {
                self.points.push(TrackedPoint {
                    id: self.next_id,
                    pos: c.position(),
                    level: c.level,
                    status: TrackingResult::Completed,
                });
                self.next_id += 1;
                stats.new_detections += 1;
            }
        }

        self.flow.set_first_pyramid(&pyramid)?;
        self.frame_size = Some(image.size());
        stats.total = self.points.len();

        log::debug!(
            "frame: completed={} uncompleted={} lost={} new={} total={}",
            stats.completed,
            stats.uncompleted,
            stats.lost,
            stats.new_detections,
            stats.total
        );
        Ok(stats)
    }

    fn track_into(&mut self, pyramid: &ImagePyramid, stats: &mut FrameStats) -> Result<()> {
        self.flow.set_second_pyramid(pyramid)?;
        self.first.clear();
        self.first.extend(self.points.iter().map(|p| p.pos));
        self.second.clear();
        self.second.extend_from_slice(&self.first);

        self.flow.track_batch(
            self.config.tracking_method,
            &mut self.status,
            &mut self.second,
            &self.first,
        )?;

        let mut kept = 0;
        for i in 0..self.points.len() {
            let status = self.status[i];
            match status {
                TrackingResult::Fail => {
                    stats.lost += 1;
                    continue;
                }
                TrackingResult::Completed => stats.completed += 1,
                TrackingResult::Uncompleted => stats.uncompleted += 1,
            }
            let mut point = self.points[i];
            point.pos = self.second[i];
            point.status = status;
            self.points[kept] = point;
            kept += 1;
        }
        self.points.truncate(kept);
        Ok(())
    }

    /// Live points.
    pub fn points(&self) -> &[TrackedPoint] {
        &self.points
    }

    pub fn has_prev_frame(&self) -> bool {
        self.flow.first_pyramid().is_some()
    }

    /// Forget all points and the previous frame. Ids keep counting.
    pub fn reset(&mut self) {
        self.flow.reset();
        self.points.clear();
        self.frame_size = None;
    }
}
