//! Inverted-file (IVF) approximate nearest neighbor index
//!
//! Vectors are partitioned into `lists` clusters by a few rounds of
//! spherical k-means. A query only scans the members of its `probes`
//! closest clusters.

use super::cosine_similarity;

const REFINEMENT_ROUNDS: usize = 5;

#[derive(Debug, Clone)]
pub struct IvfIndex {
    centroids: Vec<Vec<f32>>,
    /// Member positions per centroid, ascending
    members: Vec<Vec<usize>>,
    probes: usize,
}

impl IvfIndex {
    /// Cluster `vectors` into at most `lists` lists
    ///
    /// Seeds are spread evenly over the input so the result is deterministic.
    pub fn build(vectors: &[&[f32]], lists: usize, probes: usize) -> Self {
        let lists = lists.clamp(1, vectors.len().max(1));
        let mut centroids: Vec<Vec<f32>> = (0..lists)
            .filter_map(|i| vectors.get(i * vectors.len() / lists))
            .map(|v| v.to_vec())
            .collect();

        let mut assignment = vec![0usize; vectors.len()];
        for _ in 0..REFINEMENT_ROUNDS {
            for (slot, v) in assignment.iter_mut().zip(vectors) {
                *slot = closest(&centroids, v);
            }
            let mut changed = false;
            for (c, centroid) in centroids.iter_mut().enumerate() {
                let mut sum = vec![0.0f32; centroid.len()];
                let mut n = 0usize;
                for (v, _) in vectors.iter().zip(&assignment).filter(|(_, &a)| a == c) {
                    for (s, x) in sum.iter_mut().zip(v.iter()) {
                        *s += *x;
                    }
                    n += 1;
                }
                if n > 0 {
                    for s in sum.iter_mut() {
                        *s /= n as f32;
                    }
                    if sum != *centroid {
                        *centroid = sum;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let mut members = vec![Vec::new(); centroids.len()];
        for (i, v) in vectors.iter().enumerate() {
            members[closest(&centroids, v)].push(i);
        }

        Self {
            centroids,
            members,
            probes: probes.max(1),
        }
    }

    pub fn lists(&self) -> usize {
        self.centroids.len()
    }

    /// Member positions of the `probes` clusters closest to `query`, ascending
    pub fn candidates(&self, query: &[f32]) -> Vec<usize> {
        let mut ranked: Vec<(usize, f64)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query, c)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut out: Vec<usize> = ranked
            .iter()
            .take(self.probes)
            .flat_map(|(i, _)| self.members[*i].iter().copied())
            .collect();
        out.sort_unstable();
        out
    }
}

fn closest(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f64::MIN;
    for (i, c) in centroids.iter().enumerate() {
        let score = cosine_similarity(v, c);
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clusters_separate_directions() {
        let data: Vec<Vec<f32>> = vec![
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
            vec![0.1, 0.9],
        ];
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let index = IvfIndex::build(&refs, 2, 1);
        assert_eq!(index.lists(), 2);

        assert_eq!(index.candidates(&[1.0, 0.05]), vec![0, 1]);
        assert_eq!(index.candidates(&[0.05, 1.0]), vec![2, 3]);
    }

    #[test]
    fn test_lists_capped_by_input() {
        let data = vec![vec![1.0f32, 0.0]];
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let index = IvfIndex::build(&refs, 16, 4);
        assert_eq!(index.lists(), 1);
        assert_eq!(index.candidates(&[0.0, 1.0]), vec![0]);
    }
}
