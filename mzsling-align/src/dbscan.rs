//! Density-based clustering (DBSCAN) over small fixed-dimension points.
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Unvisited,
    Noise,
    Member,
}

/// DBSCAN with Euclidean distance.
///
/// A point's neighbours are the *other* points within `epsilon` of it. A point with at
/// least `min_neighbors` neighbours is a core point. Clusters grow from core points
/// through their neighbours; a point first labelled noise joins a cluster if a core
/// point reaches it later. Noise points are not returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    pub epsilon: f64,
    pub min_neighbors: usize,
}

impl Dbscan {
    pub fn new(epsilon: f64, min_neighbors: usize) -> Self {
        Self {
            epsilon,
            min_neighbors,
        }
    }

    /// Cluster `points`, returning each cluster's point indices in ascending order.
    /// Clusters are ordered by the lowest-index core point that started them.
    pub fn cluster<const D: usize>(&self, points: &[[f64; D]]) -> Vec<Vec<usize>> {
        let index = SweepIndex::new(points);
        let mut labels = vec![Label::Unvisited; points.len()];
        let mut queued = vec![false; points.len()];
        let mut clusters = Vec::new();

        for start in 0..points.len() {
            if labels[start] != Label::Unvisited {
                continue;
            }
            let neighbors = index.neighbors(start, self.epsilon);
            if neighbors.len() < self.min_neighbors {
                labels[start] = Label::Noise;
                continue;
            }

            let mut members = vec![start];
            labels[start] = Label::Member;
            queued[start] = true;
            let mut seeds = Vec::with_capacity(neighbors.len());
            for n in neighbors {
                if !queued[n] {
                    queued[n] = true;
                    seeds.push(n);
                }
            }

            let mut i = 0;
            while i < seeds.len() {
                let current = seeds[i];
                if labels[current] == Label::Unvisited {
                    let expansion = index.neighbors(current, self.epsilon);
                    if expansion.len() >= self.min_neighbors {
                        for n in expansion {
                            if !queued[n] {
                                queued[n] = true;
                                seeds.push(n);
                            }
                        }
                    }
                }
                if labels[current] != Label::Member {
                    labels[current] = Label::Member;
                    members.push(current);
                }
                i += 1;
            }
            for s in seeds.iter() {
                queued[*s] = false;
            }
            queued[start] = false;

            members.sort_unstable();
            trace!("Cluster {} has {} points", clusters.len(), members.len());
            clusters.push(members);
        }
        clusters
    }
}

/// Points ordered by their first coordinate, so a radius query only scans a slab
struct SweepIndex<'a, const D: usize> {
    points: &'a [[f64; D]],
    order: Vec<usize>,
}

impl<'a, const D: usize> SweepIndex<'a, D> {
    fn new(points: &'a [[f64; D]]) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        if D > 0 {
            order.sort_by(|a, b| points[*a][0].total_cmp(&points[*b][0]));
        }
        Self { points, order }
    }

    fn distance(&self, a: usize, b: usize) -> f64 {
        self.points[a]
            .iter()
            .zip(self.points[b].iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }

    fn neighbors(&self, query: usize, epsilon: f64) -> Vec<usize> {
        if D == 0 {
            return (0..self.points.len()).filter(|i| *i != query).collect();
        }
        let x = self.points[query][0];
        let start = self
            .order
            .partition_point(|i| self.points[*i][0] < x - epsilon);
        let end = self
            .order
            .partition_point(|i| self.points[*i][0] <= x + epsilon);
        let mut hits: Vec<usize> = self.order[start..end.max(start)]
            .iter()
            .copied()
            .filter(|i| *i != query && self.distance(query, *i) <= epsilon)
            .collect();
        hits.sort_unstable();
        hits
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_two_blobs_and_noise() {
        let points = [
            [0.10, 0.10],
            [0.11, 0.10],
            [0.10, 0.11],
            [0.80, 0.80],
            [0.81, 0.80],
            [0.50, 0.20],
        ];
        let clusters = Dbscan::new(0.02, 1).cluster(&points);
        assert_eq!(clusters, vec![vec![0, 1, 2], vec![3, 4]]);

        let clusters = Dbscan::new(0.02, 2).cluster(&points);
        assert_eq!(clusters, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_noise_becomes_border() {
        // 0 has only one neighbour so it is visited first as noise, then absorbed
        // when core point 1 expands
        let points = [[0.0], [1.0], [1.5], [2.0]];
        let clusters = Dbscan::new(1.0, 2).cluster(&points);
        assert_eq!(clusters, vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_chain() {
        let points: Vec<[f64; 2]> = (0..10).map(|i| [i as f64 * 0.004, 0.0]).collect();
        let clusters = Dbscan::new(0.005, 1).cluster(&points);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 10);
    }

    #[test]
    fn test_zero_min_neighbors() {
        let points = [[0.0, 0.0], [1.0, 1.0]];
        let clusters = Dbscan::new(0.1, 0).cluster(&points);
        assert_eq!(clusters, vec![vec![0], vec![1]]);
    }
}
