//! Exhaustive zero-mean normalized cross-correlation.
//!
//! The probe is slid over every valid offset of the search image. At each
//! offset the score is the Pearson correlation between the probe and the
//! covered window, in `[-1, 1]`. Window sums come from integral images, so
//! only the probe/window dot product is computed per offset.

use semgrid_core::GrayImageView;
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::RegisterError;

/// Parameters of the exhaustive matcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Minimum per-pixel intensity variance of a search window or the probe.
    ///
    /// Flatter windows score 0 instead of dividing by ~0.
    pub min_variance: f64,
    /// Number of ranked peaks kept, best first.
    pub max_peaks: usize,
    /// Peaks closer than this (Chebyshev distance, pixels) to a better peak
    /// are suppressed.
    pub nms_radius: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            min_variance: 1e-3,
            max_peaks: 5,
            nms_radius: 4,
        }
    }
}

/// One scored probe offset (top-left corner in the search image).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchPeak {
    pub x: usize,
    pub y: usize,
    /// Raw correlation coefficient in `[-1, 1]`.
    pub score: f64,
}

impl MatchPeak {
    /// The score clamped to `[0, 1]`; anti-correlation counts as no match.
    pub fn confidence(&self) -> f64 {
        self.score.clamp(0.0, 1.0)
    }
}

/// Dense correlation scores over all valid probe offsets.
#[derive(Clone, Debug)]
pub struct ScoreMap {
    pub width: usize,
    pub height: usize,
    pub scores: Vec<f32>,
}

impl ScoreMap {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.scores[y * self.width + x]
    }

    /// Greedy ranked peaks with square non-maximum suppression.
    pub fn peaks(&self, max_peaks: usize, nms_radius: usize) -> Vec<MatchPeak> {
        let mut kept: Vec<MatchPeak> = Vec::with_capacity(max_peaks);
        while kept.len() < max_peaks {
            let mut best: Option<(usize, usize, f32)> = None;
            for y in 0..self.height {
                for x in 0..self.width {
                    let s = self.at(x, y);
                    if best.is_some_and(|(_, _, b)| s <= b) {
                        continue;
                    }
                    let suppressed = kept
                        .iter()
                        .any(|p| p.x.abs_diff(x) <= nms_radius && p.y.abs_diff(y) <= nms_radius);
                    if !suppressed {
                        best = Some((x, y, s));
                    }
                }
            }
            match best {
                Some((x, y, s)) => kept.push(MatchPeak {
                    x,
                    y,
                    score: s as f64,
                }),
                None => break,
            }
        }
        kept
    }
}

/// Result of matching one probe against one search image.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateMatch {
    pub best: MatchPeak,
    /// Runner-up peaks after suppression, best first.
    pub secondary: Vec<MatchPeak>,
    pub probe_width: usize,
    pub probe_height: usize,
}

impl TemplateMatch {
    pub fn confidence(&self) -> f64 {
        self.best.confidence()
    }
}

/// Summed-area tables of intensity and squared intensity.
struct Integrals {
    stride: usize,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl Integrals {
    fn new(img: &GrayImageView<'_>) -> Self {
        let stride = img.width + 1;
        let mut sum = vec![0u64; stride * (img.height + 1)];
        let mut sum_sq = vec![0u64; stride * (img.height + 1)];
        for y in 0..img.height {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for (x, &v) in img.row(y).iter().enumerate() {
                let v = v as u64;
                row += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row;
                sum_sq[i] = sum_sq[i - stride] + row_sq;
            }
        }
        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    #[inline]
    fn window(&self, table: &[u64], x: usize, y: usize, w: usize, h: usize) -> u64 {
        let s = self.stride;
        table[(y + h) * s + x + w] + table[y * s + x] - table[y * s + x + w] - table[(y + h) * s + x]
    }
}

/// Probe with the mean removed, plus its energy.
struct ZeroMeanProbe {
    width: usize,
    height: usize,
    values: Vec<f32>,
    energy: f64,
}

impl ZeroMeanProbe {
    fn new(probe: &GrayImageView<'_>) -> Self {
        let n = (probe.width * probe.height) as f64;
        let mean = probe.data.iter().map(|&v| v as f64).sum::<f64>() / n;
        let values: Vec<f32> = probe.data.iter().map(|&v| (v as f64 - mean) as f32).collect();
        let energy = values.iter().map(|&v| (v as f64) * (v as f64)).sum();
        Self {
            width: probe.width,
            height: probe.height,
            values,
            energy,
        }
    }
}

/// Exhaustive sliding-window ZNCC matcher.
#[derive(Clone, Debug, Default)]
pub struct TemplateMatcher {
    params: MatchParams,
}

impl TemplateMatcher {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    /// Best offset of `probe` inside `search`, with ranked runner-ups.
    ///
    /// The probe must fit inside the search image; scaling it beforehand is
    /// the caller's job.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, search, probe),
            fields(sw = search.width, sh = search.height, pw = probe.width, ph = probe.height)
        )
    )]
    pub fn match_template(
        &self,
        search: &GrayImageView<'_>,
        probe: &GrayImageView<'_>,
    ) -> Result<TemplateMatch, RegisterError> {
        let map = self.score_map(search, probe)?;
        let mut peaks = map
            .peaks(self.params.max_peaks.max(1), self.params.nms_radius)
            .into_iter();
        let best = peaks.next().unwrap_or(MatchPeak {
            x: 0,
            y: 0,
            score: 0.0,
        });
        Ok(TemplateMatch {
            best,
            secondary: peaks.collect(),
            probe_width: probe.width,
            probe_height: probe.height,
        })
    }

    /// Correlation score at every valid offset.
    pub fn score_map(
        &self,
        search: &GrayImageView<'_>,
        probe: &GrayImageView<'_>,
    ) -> Result<ScoreMap, RegisterError> {
        check_sizes(search, probe)?;
        let integrals = Integrals::new(search);
        let probe = ZeroMeanProbe::new(probe);
        let width = search.width - probe.width + 1;
        let height = search.height - probe.height + 1;
        let mut scores = vec![0.0f32; width * height];

        let n = (probe.width * probe.height) as f64;
        if probe.energy / n < self.params.min_variance {
            log::debug!("probe is flat; every offset scores 0");
            return Ok(ScoreMap {
                width,
                height,
                scores,
            });
        }

        let fill_row = |y: usize, out: &mut [f32]| {
            for (x, slot) in out.iter_mut().enumerate() {
                *slot = self.score_at(search, &integrals, &probe, x, y) as f32;
            }
        };

        #[cfg(feature = "rayon")]
        scores
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, out)| fill_row(y, out));

        #[cfg(not(feature = "rayon"))]
        scores
            .chunks_mut(width)
            .enumerate()
            .for_each(|(y, out)| fill_row(y, out));

        Ok(ScoreMap {
            width,
            height,
            scores,
        })
    }

    fn score_at(
        &self,
        search: &GrayImageView<'_>,
        integrals: &Integrals,
        probe: &ZeroMeanProbe,
        x: usize,
        y: usize,
    ) -> f64 {
        let (w, h) = (probe.width, probe.height);
        let n = (w * h) as f64;
        let s = integrals.window(&integrals.sum, x, y, w, h) as f64;
        let s2 = integrals.window(&integrals.sum_sq, x, y, w, h) as f64;
        let window_energy = (s2 - s * s / n).max(0.0);
        if window_energy / n < self.params.min_variance {
            return 0.0;
        }

        let mut dot = 0.0f64;
        for j in 0..h {
            let row = &search.row(y + j)[x..x + w];
            let tpl = &probe.values[j * w..(j + 1) * w];
            let acc: f32 = tpl.iter().zip(row).map(|(&t, &v)| t * v as f32).sum();
            dot += acc as f64;
        }
        (dot / (probe.energy * window_energy).sqrt()).clamp(-1.0, 1.0)
    }
}

fn check_sizes(search: &GrayImageView<'_>, probe: &GrayImageView<'_>) -> Result<(), RegisterError> {
    for img in [search, probe] {
        if img.is_empty() {
            return Err(semgrid_core::ImageError::Empty {
                width: img.width,
                height: img.height,
            }
            .into());
        }
    }
    if probe.width > search.width || probe.height > search.height {
        return Err(RegisterError::ProbeLargerThanSearch {
            probe_width: probe.width,
            probe_height: probe.height,
            search_width: search.width,
            search_height: search.height,
        });
    }
    Ok(())
}
