//! Maximally stable extremal regions.
//!
//! Builds the component tree of the image thresholded at every gray level
//! (union-find over pixels sorted by intensity) and reports the components
//! whose area changes least over `delta` levels. Both polarities are
//! searched: dark-on-light via the image itself, light-on-dark via its
//! inverse.

use std::collections::HashMap;

use image::GrayImage;
use imageproc::point::Point;

const NO_NODE: u32 = u32::MAX;

/// MSER tuning.
#[derive(Debug, Clone)]
pub struct MserParams {
    /// Level span over which stability is measured.
    pub delta: u8,
    /// Smallest region, in pixels.
    pub min_area: usize,
    /// Largest region, in pixels.
    pub max_area: usize,
    /// Largest accepted relative area growth over `delta` levels.
    pub max_variation: f32,
    /// Nested regions must differ in area by at least this fraction.
    pub min_diversity: f32,
}

impl Default for MserParams {
    fn default() -> Self {
        Self {
            delta: 3,
            min_area: 30,
            max_area: 15_000,
            max_variation: 0.25,
            min_diversity: 0.2,
        }
    }
}

/// One component of the level-set tree.
#[derive(Debug)]
struct Node {
    level: u8,
    area: usize,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Pixels that joined the component at exactly this level.
    own: Vec<u32>,
}

/// Children and new pixels gathered for a component during one level.
#[derive(Default)]
struct Pending {
    children: Vec<usize>,
    own: Vec<u32>,
}

struct UnionFind {
    parent: Vec<u32>,
    size: Vec<u32>,
}

impl UnionFind {
    #[allow(clippy::cast_possible_truncation)]
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        while self.parent[x as usize] != root {
            let next = self.parent[x as usize];
            self.parent[x as usize] = root;
            x = next;
        }
        root
    }

    /// Join two distinct roots, returning the surviving root.
    fn union(&mut self, a: u32, b: u32) -> u32 {
        let (big, small) = if self.size[a as usize] >= self.size[b as usize] {
            (a, b)
        } else {
            (b, a)
        };
        self.parent[small as usize] = big;
        self.size[big as usize] += self.size[small as usize];
        big
    }
}

/// Detect stable regions of both polarities.
///
/// Returns the pixel coordinates of each region. Overlapping and nested
/// regions are all reported.
#[must_use]
pub fn detect_regions(gray: &GrayImage, params: &MserParams) -> Vec<Vec<Point<i32>>> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let dark: Vec<u8> = gray.as_raw().clone();
    let light: Vec<u8> = dark.iter().map(|&v| 255 - v).collect();

    let mut regions = extract(&dark, w as usize, h as usize, params);
    regions.extend(extract(&light, w as usize, h as usize, params));
    regions
}

fn extract(
    levels: &[u8],
    width: usize,
    height: usize,
    params: &MserParams,
) -> Vec<Vec<Point<i32>>> {
    let nodes = build_tree(levels, width, height);
    select_stable(&nodes, levels.len(), params)
        .into_iter()
        .map(|idx| region_pixels(&nodes, idx, width))
        .collect()
}

/// Min-tree of the level sets, 4-connected.
#[allow(clippy::cast_possible_truncation)]
fn build_tree(levels: &[u8], width: usize, height: usize) -> Vec<Node> {
    let n = levels.len();
    let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); 256];
    for (i, &v) in levels.iter().enumerate() {
        buckets[v as usize].push(i as u32);
    }

    let mut uf = UnionFind::new(n);
    let mut active = vec![false; n];
    let mut node_of = vec![NO_NODE; n];
    let mut nodes: Vec<Node> = Vec::new();

    for (level, bucket) in buckets.iter().enumerate() {
        if bucket.is_empty() {
            continue;
        }
        let mut pending: HashMap<u32, Pending> = HashMap::new();

        for &p in bucket {
            active[p as usize] = true;
            pending.insert(
                p,
                Pending {
                    children: Vec::new(),
                    own: vec![p],
                },
            );

            let (x, y) = (p as usize % width, p as usize / width);
            let mut neighbours = [None; 4];
            if x > 0 {
                neighbours[0] = Some(p - 1);
            }
            if x + 1 < width {
                neighbours[1] = Some(p + 1);
            }
            if y > 0 {
                neighbours[2] = Some(p - width as u32);
            }
            if y + 1 < height {
                neighbours[3] = Some(p + width as u32);
            }

            for q in neighbours.into_iter().flatten() {
                if !active[q as usize] {
                    continue;
                }
                let rp = uf.find(p);
                let rq = uf.find(q);
                if rp == rq {
                    continue;
                }
                let mut a = pending
                    .remove(&rp)
                    .unwrap_or_else(|| settled(node_of[rp as usize]));
                let b = pending
                    .remove(&rq)
                    .unwrap_or_else(|| settled(node_of[rq as usize]));
                a.children.extend(b.children);
                a.own.extend(b.own);
                let root = uf.union(rp, rq);
                pending.insert(root, a);
            }
        }

        let mut touched: Vec<(u32, Pending)> = pending.into_iter().collect();
        touched.sort_unstable_by_key(|(root, _)| *root);
        for (root, pend) in touched {
            let idx = nodes.len();
            for &child in &pend.children {
                nodes[child].parent = Some(idx);
            }
            nodes.push(Node {
                level: level as u8,
                area: uf.size[root as usize] as usize,
                parent: None,
                children: pend.children,
                own: pend.own,
            });
            node_of[root as usize] = idx as u32;
        }
    }
    nodes
}

/// Pending entry for a component finalized at an earlier level.
fn settled(node: u32) -> Pending {
    Pending {
        children: if node == NO_NODE {
            Vec::new()
        } else {
            vec![node as usize]
        },
        own: Vec::new(),
    }
}

/// Relative area growth of a node over the next `delta` levels.
#[allow(clippy::cast_precision_loss)]
fn variation(nodes: &[Node], idx: usize, delta: u8) -> f32 {
    let target = u16::from(nodes[idx].level) + u16::from(delta);
    let mut top = idx;
    while let Some(parent) = nodes[top].parent {
        if u16::from(nodes[parent].level) > target {
            break;
        }
        top = parent;
    }
    (nodes[top].area - nodes[idx].area) as f32 / nodes[idx].area as f32
}

#[allow(clippy::cast_precision_loss)]
fn select_stable(nodes: &[Node], total: usize, params: &MserParams) -> Vec<usize> {
    let variations: Vec<f32> = (0..nodes.len())
        .map(|i| variation(nodes, i, params.delta))
        .collect();

    let mut candidates: Vec<usize> = (0..nodes.len())
        .filter(|&i| {
            let node = &nodes[i];
            let v = variations[i];
            node.area < total
                && (params.min_area..=params.max_area).contains(&node.area)
                && v <= params.max_variation
                && node.parent.is_some_and(|p| v <= variations[p])
                && node.children.iter().all(|&c| v < variations[c])
        })
        .collect();
    candidates.sort_unstable_by_key(|&i| nodes[i].area);

    // Accepting a region suppresses ancestors too similar in area.
    let mut suppressed = vec![false; nodes.len()];
    let mut accepted = Vec::new();
    let keep = 1.0 - params.min_diversity;
    for idx in candidates {
        if suppressed[idx] {
            continue;
        }
        accepted.push(idx);
        let limit = nodes[idx].area as f32 / keep.max(f32::EPSILON);
        let mut up = nodes[idx].parent;
        while let Some(p) = up {
            if nodes[p].area as f32 >= limit {
                break;
            }
            suppressed[p] = true;
            up = nodes[p].parent;
        }
    }
    accepted
}

/// All pixels of a node's subtree as image coordinates.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn region_pixels(nodes: &[Node], idx: usize, width: usize) -> Vec<Point<i32>> {
    let mut points = Vec::with_capacity(nodes[idx].area);
    let mut stack = vec![idx];
    while let Some(i) = stack.pop() {
        let node = &nodes[i];
        points.extend(node.own.iter().map(|&p| {
            let p = p as usize;
            Point::new((p % width) as i32, (p / width) as i32)
        }));
        stack.extend(&node.children);
    }
    points
}
