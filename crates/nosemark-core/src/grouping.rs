//! Merging of raw sliding-window hits into reported regions.

use crate::types::Rect;

/// Relative tolerance for two hits to count as the same object.
pub const GROUP_EPS: f64 = 0.2;

/// Cluster similar rectangles, average each cluster, and keep clusters
/// with more than `group_threshold` members that are not nested inside a
/// stronger cluster.
///
/// A threshold of zero returns the input untouched.
pub fn group_rectangles(rects: Vec<Rect>, group_threshold: u32, eps: f64) -> Vec<Rect> {
    if group_threshold == 0 || rects.is_empty() {
        return rects;
    }

    let (labels, classes) = partition(&rects, |a, b| similar(a, b, eps));

    let mut sums = vec![[0i64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (r, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += r.x as i64;
        s[1] += r.y as i64;
        s[2] += r.width as i64;
        s[3] += r.height as i64;
        counts[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let inv = 1.0 / n as f64;
            Rect::new(
                (s[0] as f64 * inv).round() as i32,
                (s[1] as f64 * inv).round() as i32,
                (s[2] as f64 * inv).round() as i32,
                (s[3] as f64 * inv).round() as i32,
            )
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= group_threshold {
            continue;
        }

        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            kept.push(*r1);
        }
    }

    kept
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && ((a.x + a.width - b.x - b.width).abs() as f64) <= delta
        && ((a.y + a.height - b.y - b.height).abs() as f64) <= delta
}

/// Transitive equivalence classes under `same`. Classes are numbered in
/// order of first appearance.
fn partition<T>(items: &[T], same: impl Fn(&T, &T) -> bool) -> (Vec<usize>, usize) {
    let mut parent: Vec<usize> = (0..items.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if same(&items[i], &items[j]) {
                let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; items.len()];
    let mut labels = Vec::with_capacity(items.len());
    let mut classes = 0;
    for i in 0..items.len() {
        let r = root(&mut parent, i);
        if class_of_root[r] == usize::MAX {
            class_of_root[r] = classes;
            classes += 1;
        }
        labels.push(class_of_root[r]);
    }
    (labels, classes)
}
