//! Cross-sample peak alignment.
//!
//! Retained peaks of every sample are pooled and sorted by m/z. Neighbouring peaks
//! whose ±ppm windows overlap are linked into a cluster, and any cluster wider than
//! twice the tolerance at its centre is split at its largest internal gap until every
//! cluster fits.
use mzpeaks::prelude::*;
use mzpeaks::{CentroidPeak, Tolerance};
use tracing::trace;

use crate::peaklist::{PeakList, PeakListError};

#[derive(Debug, Clone, Copy, PartialEq)]
struct PooledPeak {
    mz: f64,
    intensity: f32,
    sample: usize,
}

/// One aligned feature. Per-sample vectors are indexed by sample position.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedCluster {
    pub mz: Vec<Option<f64>>,
    pub intensity: Vec<Option<f32>>,
    /// How many raw peaks each sample contributed
    pub counts: Vec<usize>,
}

impl AlignedCluster {
    pub fn present(&self) -> usize {
        self.counts.iter().filter(|c| **c > 0).count()
    }

    pub fn occurrence(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn purity(&self) -> f64 {
        let present = self.present();
        if present == 0 {
            return 0.0;
        }
        self.counts.iter().filter(|c| **c == 1).count() as f64 / present as f64
    }

    pub fn mean_mz(&self) -> f64 {
        mean(self.mz.iter().flatten().copied())
    }

    pub fn mean_intensity(&self) -> f32 {
        mean(self.intensity.iter().flatten().map(|i| *i as f64)) as f32
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (total, n) = values.fold((0.0, 0usize), |(t, n), v| (t + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        total / n as f64
    }
}

/// The result of aligning several peak lists
#[derive(Debug, Clone, PartialEq)]
pub struct PeakMatrix {
    pub samples: Vec<String>,
    pub clusters: Vec<AlignedCluster>,
}

impl PeakMatrix {
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Collapse the matrix into a single peak list with per-peak alignment statistics
    pub fn to_peaklist(&self, id: impl Into<String>) -> Result<PeakList, PeakListError> {
        let n_samples = self.samples.len().max(1) as f64;
        let peaks: Vec<CentroidPeak> = self
            .clusters
            .iter()
            .enumerate()
            .map(|(i, c)| CentroidPeak::new(c.mean_mz(), c.mean_intensity(), i as u32))
            .collect();
        let mut peak_list = PeakList::new(id, peaks);
        peak_list.add_attribute(
            "present",
            self.clusters.iter().map(|c| c.present() as i64).collect::<Vec<_>>(),
        )?;
        peak_list.add_attribute(
            "fraction",
            self.clusters
                .iter()
                .map(|c| c.present() as f64 / n_samples)
                .collect::<Vec<_>>(),
        )?;
        peak_list.add_attribute(
            "occurrence",
            self.clusters
                .iter()
                .map(|c| c.occurrence() as i64)
                .collect::<Vec<_>>(),
        )?;
        peak_list.add_attribute(
            "purity",
            self.clusters.iter().map(|c| c.purity()).collect::<Vec<_>>(),
        )?;
        Ok(peak_list)
    }
}

fn window(mz: f64, ppm: f64) -> f64 {
    mz * ppm * 1e-6
}

/// Split `cluster` at its largest gap until every part spans at most twice the
/// tolerance at its centre.
fn split_cluster(cluster: &[PooledPeak], ppm: f64, out: &mut Vec<Vec<PooledPeak>>) {
    if cluster.len() < 2 {
        out.push(cluster.to_vec());
        return;
    }
    let first = cluster[0].mz;
    let last = cluster[cluster.len() - 1].mz;
    let centre = mean(cluster.iter().map(|p| p.mz));
    if last - first <= 2.0 * window(centre, ppm) {
        out.push(cluster.to_vec());
        return;
    }
    let mut split_at = 1;
    let mut widest = f64::NEG_INFINITY;
    for (i, pair) in cluster.windows(2).enumerate() {
        let gap = pair[1].mz - pair[0].mz;
        if gap > widest {
            widest = gap;
            split_at = i + 1;
        }
    }
    let (left, right) = cluster.split_at(split_at);
    split_cluster(left, ppm, out);
    split_cluster(right, ppm, out);
}

fn build_cluster(members: &[PooledPeak], n_samples: usize) -> AlignedCluster {
    let mut mz_sum = vec![0.0f64; n_samples];
    let mut intensity = vec![0.0f32; n_samples];
    let mut counts = vec![0usize; n_samples];
    for peak in members {
        mz_sum[peak.sample] += peak.mz;
        intensity[peak.sample] += peak.intensity;
        counts[peak.sample] += 1;
    }
    AlignedCluster {
        mz: mz_sum
            .iter()
            .zip(counts.iter())
            .map(|(m, c)| (*c > 0).then(|| m / *c as f64))
            .collect(),
        intensity: intensity
            .iter()
            .zip(counts.iter())
            .map(|(i, c)| (*c > 0).then_some(*i))
            .collect(),
        counts,
    }
}

/// Align the retained peaks of `peak_lists` within `ppm` parts-per-million
pub fn align_peaks<'a, I>(peak_lists: I, ppm: f64) -> PeakMatrix
where
    I: IntoIterator<Item = &'a PeakList>,
{
    let peak_lists: Vec<&PeakList> = peak_lists.into_iter().collect();
    let tolerance = Tolerance::PPM(ppm);
    let samples: Vec<String> = peak_lists.iter().map(|pl| pl.id.clone()).collect();

    let mut pool: Vec<PooledPeak> = peak_lists
        .iter()
        .enumerate()
        .flat_map(|(sample, pl)| {
            pl.retained().map(move |(_, p)| PooledPeak {
                mz: p.mz(),
                intensity: p.intensity(),
                sample,
            })
        })
        .collect();
    pool.sort_by(|a, b| a.mz.total_cmp(&b.mz));

    let mut linked: Vec<Vec<PooledPeak>> = Vec::new();
    let mut current: Vec<PooledPeak> = Vec::new();
    for peak in pool {
        match current.last() {
            Some(prev) => {
                let (_, upper) = tolerance.bounds(prev.mz);
                let (lower, _) = tolerance.bounds(peak.mz);
                if upper >= lower {
                    current.push(peak);
                } else {
                    linked.push(std::mem::take(&mut current));
                    current.push(peak);
                }
            }
            None => current.push(peak),
        }
    }
    if !current.is_empty() {
        linked.push(current);
    }

    let mut clusters = Vec::with_capacity(linked.len());
    for group in linked.iter() {
        split_cluster(group, ppm, &mut clusters);
    }
    trace!(
        "Aligned {} samples into {} clusters from {} linked runs",
        samples.len(),
        clusters.len(),
        linked.len()
    );

    let clusters = clusters
        .iter()
        .map(|members| build_cluster(members, samples.len()))
        .collect();
    PeakMatrix { samples, clusters }
}
