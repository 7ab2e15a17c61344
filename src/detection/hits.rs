//! # Hit counting over a rolling evidence buffer.
//!
//! Every processed frame is partitioned into subject detections (top-K by confidence)
//! and at most one site detection (the most confident). A frame is a *hit* when at
//! least two subjects are present, a site is present, and at least two subject boxes
//! intersect the site box. Hits increment the counter, misses decrement it (floored at 0).
//!
//! ```text
//! frame ─► conf filter ─► partition ─► is_hit? ─► counter ±1
//!                                  └─► ring buffer (oldest evicted)
//!                                              │
//!                  counter ≥ threshold ─► take buffer ─► Evidence; counter = 0
//! ```

use std::cmp::Ordering;
use std::collections::VecDeque;

use super::geometry::Detection;

/// Non-negative hit count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HitCounter {
    hits: u32,
}

impl HitCounter {
    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn increment(&mut self) {
        self.hits = self.hits.saturating_add(1);
    }

    pub fn decrement(&mut self) {
        self.hits = self.hits.saturating_sub(1);
    }

    pub fn reset(&mut self) {
        self.hits = 0;
    }
}

/// One entry of the evidence buffer.
#[derive(Debug, Clone)]
pub struct BufferedFrame<F> {
    pub captured_ms: i64,
    pub frame: F,
    pub detections: Vec<Detection>,
}

/// Ring buffer of the most recent frames.
#[derive(Debug)]
pub struct EvidenceBuffer<F> {
    frames: VecDeque<BufferedFrame<F>>,
    capacity: usize,
}

impl<F> EvidenceBuffer<F> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a frame, evicting the oldest once full.
    pub fn push(&mut self, frame: BufferedFrame<F>) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes and returns every buffered frame, oldest first.
    pub fn take(&mut self) -> Vec<BufferedFrame<F>> {
        self.frames.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedFrame<F>> {
        self.frames.iter()
    }
}

/// Tuning of the hit algorithm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitParams {
    pub subject_class: u32,
    pub site_class: u32,
    /// K: how many subject detections are kept per frame.
    pub max_subjects: usize,
    pub conf_thresh: f32,
    /// Hits needed to trigger; at least 1.
    pub hit_thresh: u32,
    pub buffer_len: usize,
}

/// Detections of one frame, split by role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub subjects: Vec<Detection>,
    pub site: Option<Detection>,
}

impl Partition {
    pub fn split(dets: &[Detection], params: &HitParams) -> Self {
        let by_conf_desc =
            |a: &Detection, b: &Detection| -> Ordering { b.confidence.total_cmp(&a.confidence) };

        let mut subjects: Vec<Detection> = dets
            .iter()
            .filter(|d| d.class_id == params.subject_class && d.confidence >= params.conf_thresh)
            .copied()
            .collect();
        subjects.sort_by(by_conf_desc);
        subjects.truncate(params.max_subjects);

        let site = dets
            .iter()
            .filter(|d| d.class_id == params.site_class && d.confidence >= params.conf_thresh)
            .min_by(|a, b| by_conf_desc(a, b))
            .copied();

        Self { subjects, site }
    }

    pub fn is_hit(&self) -> bool {
        let Some(site) = self.site else {
            return false;
        };
        if self.subjects.len() < 2 {
            return false;
        }
        self.subjects
            .iter()
            .filter(|s| s.bbox.intersects(&site.bbox))
            .count()
            >= 2
    }

    /// Detections kept for annotation.
    pub fn kept(&self) -> Vec<Detection> {
        self.subjects.iter().copied().chain(self.site).collect()
    }
}

/// Frames that led up to a trigger.
#[derive(Debug)]
pub struct Evidence<F> {
    pub frames: Vec<BufferedFrame<F>>,
}

/// Counter plus buffer; turns per-frame detections into at most one trigger per burst.
#[derive(Debug)]
pub struct HitAlgorithm<F> {
    params: HitParams,
    counter: HitCounter,
    buffer: EvidenceBuffer<F>,
}

impl<F> HitAlgorithm<F> {
    pub fn new(params: HitParams) -> Self {
        Self {
            buffer: EvidenceBuffer::new(params.buffer_len),
            counter: HitCounter::default(),
            params,
        }
    }

    pub fn hits(&self) -> u32 {
        self.counter.hits()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds one frame. Returns the evidence when the threshold is reached, after which
    /// the counter and the buffer start over.
    pub fn process(
        &mut self,
        captured_ms: i64,
        frame: F,
        dets: &[Detection],
    ) -> Option<Evidence<F>> {
        let part = Partition::split(dets, &self.params);
        if part.is_hit() {
            self.counter.increment();
        } else {
            self.counter.decrement();
        }
        self.buffer.push(BufferedFrame {
            captured_ms,
            frame,
            detections: part.kept(),
        });

        if self.counter.hits() < self.params.hit_thresh.max(1) {
            return None;
        }
        self.counter.reset();
        Some(Evidence {
            frames: self.buffer.take(),
        })
    }

    /// Remaining buffered frames, e.g. on shutdown.
    pub fn flush(&mut self) -> Vec<BufferedFrame<F>> {
        self.buffer.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    const FISH: u32 = 0;
    const PIPE: u32 = 1;

    fn params(hit_thresh: u32, buffer_len: usize) -> HitParams {
        HitParams {
            subject_class: FISH,
            site_class: PIPE,
            max_subjects: 5,
            conf_thresh: 0.4,
            hit_thresh,
            buffer_len,
        }
    }

    fn det(class_id: u32, confidence: f32, x: f32) -> Detection {
        Detection::new(class_id, confidence, BBox::new(x, 0.0, x + 10.0, 10.0))
    }

    fn spawning_frame() -> Vec<Detection> {
        vec![det(FISH, 0.9, 0.0), det(FISH, 0.8, 5.0), det(PIPE, 0.7, 3.0)]
    }

    #[test]
    fn test_counter_never_goes_negative() {
        let mut c = HitCounter::default();
        for _ in 0..10 {
            c.decrement();
        }
        assert_eq!(c.hits(), 0);
        c.increment();
        c.decrement();
        c.decrement();
        assert_eq!(c.hits(), 0);
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let mut buf = EvidenceBuffer::new(3);
        for i in 0..5 {
            buf.push(BufferedFrame {
                captured_ms: i,
                frame: (),
                detections: vec![],
            });
        }
        let taken: Vec<i64> = buf.take().into_iter().map(|f| f.captured_ms).collect();
        assert_eq!(taken, vec![2, 3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partition_keeps_top_k_and_best_site() {
        let mut p = params(1, 4);
        p.max_subjects = 2;
        let dets = vec![
            det(FISH, 0.5, 0.0),
            det(FISH, 0.95, 0.0),
            det(FISH, 0.7, 0.0),
            det(FISH, 0.2, 0.0),
            det(PIPE, 0.6, 0.0),
            det(PIPE, 0.9, 50.0),
        ];
        let part = Partition::split(&dets, &p);
        let confs: Vec<f32> = part.subjects.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.95, 0.7]);
        assert_eq!(part.site.map(|s| s.confidence), Some(0.9));
        assert_eq!(part.kept().len(), 3);
    }

    #[test]
    fn test_hit_requires_two_intersections() {
        let p = params(1, 4);
        let mut dets = spawning_frame();
        assert!(Partition::split(&dets, &p).is_hit());

        dets[1] = det(FISH, 0.8, 100.0);
        assert!(!Partition::split(&dets, &p).is_hit());

        let no_site = vec![det(FISH, 0.9, 0.0), det(FISH, 0.8, 0.0)];
        assert!(!Partition::split(&no_site, &p).is_hit());

        let low_conf = vec![det(FISH, 0.9, 0.0), det(FISH, 0.3, 0.0), det(PIPE, 0.9, 0.0)];
        assert!(!Partition::split(&low_conf, &p).is_hit());
    }

    #[test]
    fn test_ten_hits_trigger_exactly_once_and_reset() {
        let mut algo = HitAlgorithm::new(params(10, 30));
        let mut triggers = 0;
        for i in 0..10 {
            if let Some(ev) = algo.process(i, i, &spawning_frame()) {
                triggers += 1;
                assert_eq!(ev.frames.len(), 10);
                assert_eq!(ev.frames[0].frame, 0);
            }
        }
        assert_eq!(triggers, 1);
        assert_eq!(algo.hits(), 0);
        assert_eq!(algo.buffered(), 0);

        assert!(algo.process(10, 10, &spawning_frame()).is_none());
        assert_eq!(algo.hits(), 1);
    }

    #[test]
    fn test_misses_pull_counter_back() {
        let mut algo = HitAlgorithm::new(params(3, 5));
        assert!(algo.process(0, (), &spawning_frame()).is_none());
        assert!(algo.process(1, (), &spawning_frame()).is_none());
        assert!(algo.process(2, (), &[]).is_none());
        assert!(algo.process(3, (), &[]).is_none());
        assert!(algo.process(4, (), &[]).is_none());
        assert_eq!(algo.hits(), 0);
        assert_eq!(algo.buffered(), 5);
    }
}
