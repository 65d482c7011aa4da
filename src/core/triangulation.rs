//! Delaunay triangulation (incremental Bowyer-Watson) and piecewise-linear
//! interpolation of scattered control points.
//!
//! Points are normalised into the unit square before insertion. Every hull
//! edge is closed by a ghost triangle whose third vertex lies at infinity, so
//! the hull is exact whatever the point spacing. A query location that walks
//! into a ghost triangle lies outside the convex hull and interpolates to NaN.

use crate::types::{ValError, ValResult};
use std::collections::HashSet;

const NONE: usize = usize::MAX;

/// Vertex at infinity shared by all ghost triangles
const GHOST: usize = usize::MAX - 1;

/// Squared normalised distance under which two points are the same vertex
const DUPLICATE_EPS2: f64 = 1e-24;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    /// Vertices in counter-clockwise order
    v: [usize; 3],
    /// `n[k]` is the neighbour across the edge opposite `v[k]`
    n: [usize; 3],
    alive: bool,
}

impl Triangle {
    fn is_ghost(&self) -> bool {
        self.v.contains(&GHOST)
    }

    /// Finite edge `(u, v)` of a ghost triangle; the outside lies to its left
    fn ghost_edge(&self) -> Option<(usize, usize)> {
        let k = self.v.iter().position(|&v| v == GHOST)?;
        Some((self.v[(k + 1) % 3], self.v[(k + 2) % 3]))
    }
}

enum Location {
    /// Finite triangle containing the point
    Inside(usize),
    /// Ghost triangle whose half-plane holds the point
    Outside(usize),
}

/// Delaunay triangulation of a planar point set
#[derive(Debug, Clone)]
pub struct Triangulation {
    points: Vec<[f64; 2]>,
    triangles: Vec<Triangle>,
    free: Vec<usize>,
    inserted: usize,
    last: usize,
    origin: [f64; 2],
    scale: f64,
}

impl Triangulation {
    /// Triangulate `(xs[i], ys[i])`; coordinates must be finite and not all collinear
    pub fn new(xs: &[f64], ys: &[f64]) -> ValResult<Self> {
        if xs.len() != ys.len() {
            return Err(ValError::LengthMismatch {
                what: "triangulation coordinates".to_string(),
                expected: xs.len(),
                actual: ys.len(),
            });
        }
        if xs.len() < 3 {
            return Err(ValError::Geometry(format!(
                "At least 3 control points are needed, got {}",
                xs.len()
            )));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(ValError::Geometry("Control point coordinates must be finite".to_string()));
        }

        let (min_x, max_x) = min_max(xs);
        let (min_y, max_y) = min_max(ys);
        let scale = (max_x - min_x).max(max_y - min_y);
        if scale <= 0.0 {
            return Err(ValError::Geometry("All control points coincide".to_string()));
        }

        let points: Vec<[f64; 2]> = xs
            .iter()
            .zip(ys.iter())
            .map(|(&x, &y)| [(x - min_x) / scale, (y - min_y) / scale])
            .collect();

        let mut tri = Self {
            points,
            triangles: Vec::new(),
            free: Vec::new(),
            inserted: 0,
            last: 0,
            origin: [min_x, min_y],
            scale,
        };

        let order = tri.insertion_order();
        let seed = tri.seed_triangle(&order)?;
        for idx in order.into_iter().filter(|i| !seed.contains(i)) {
            if tri.insert(idx) {
                tri.inserted += 1;
            }
        }
        log::debug!(
            "Triangulated {} control points ({} distinct, {} triangles)",
            xs.len(),
            tri.inserted,
            tri.hull_triangle_count()
        );
        Ok(tri)
    }

    /// Number of distinct vertices inserted
    pub fn vertex_count(&self) -> usize {
        self.inserted
    }

    /// Finite triangles covering the convex hull
    pub fn hull_triangle_count(&self) -> usize {
        self.triangles.iter().filter(|t| t.alive && !t.is_ghost()).count()
    }

    /// First counter-clockwise triangle of the insertion order, closed by three ghosts
    fn seed_triangle(&mut self, order: &[usize]) -> ValResult<[usize; 3]> {
        let collinear = || ValError::Geometry("All control points are collinear".to_string());
        let a = order[0];
        let b = order
            .iter()
            .copied()
            .find(|&i| dist2(self.points[i], self.points[a]) >= DUPLICATE_EPS2)
            .ok_or_else(collinear)?;
        let c = order
            .iter()
            .copied()
            .find(|&i| orient(self.points[a], self.points[b], self.points[i]) != 0.0)
            .ok_or_else(collinear)?;
        let v = if orient(self.points[a], self.points[b], self.points[c]) > 0.0 {
            [a, b, c]
        } else {
            [a, c, b]
        };

        // Triangle 0 is finite; ghost 1 + k closes the edge opposite v[k]
        self.triangles.push(Triangle {
            v,
            n: [1, 2, 3],
            alive: true,
        });
        for k in 0..3 {
            self.triangles.push(Triangle {
                v: [v[(k + 2) % 3], v[(k + 1) % 3], GHOST],
                n: [1 + (k + 2) % 3, 1 + (k + 1) % 3, 0],
                alive: true,
            });
        }
        self.inserted = 3;
        self.last = 0;
        Ok(v)
    }

    /// Locate `(x, y)` and return its control-point indices and barycentric weights.
    ///
    /// `hint` is a triangle index from a previous query used to start the walk.
    fn barycentric(&self, x: f64, y: f64, hint: &mut usize) -> Option<([usize; 3], [f64; 3])> {
        let p = [(x - self.origin[0]) / self.scale, (y - self.origin[1]) / self.scale];
        let t = match self.locate(p, *hint)? {
            Location::Inside(t) => t,
            Location::Outside(_) => return None,
        };
        *hint = t;

        let tri = self.triangles[t];
        let [a, b, c] = tri.v.map(|v| self.points[v]);
        let area = orient(a, b, c);
        if area <= 0.0 {
            return None;
        }
        let weights = [orient(b, c, p) / area, orient(c, a, p) / area, orient(a, b, p) / area];
        Some((tri.v, weights))
    }

    /// Spatially coherent insertion order (snake over a coarse bucket grid)
    fn insertion_order(&self) -> Vec<usize> {
        let n = self.points.len();
        let k = ((n as f64 / 4.0).sqrt().ceil() as usize).max(1);
        let bucket = |v: f64| ((v * k as f64) as usize).min(k - 1);

        let mut keyed: Vec<(usize, usize)> = (0..n)
            .map(|i| {
                let [x, y] = self.points[i];
                let (cx, cy) = (bucket(x), bucket(y));
                let col = if cy % 2 == 1 { k - 1 - cx } else { cx };
                (cy * k + col, i)
            })
            .collect();
        keyed.sort_unstable();
        keyed.into_iter().map(|(_, i)| i).collect()
    }

    /// Whether `p` lies inside the circumcircle of triangle `t`.
    ///
    /// The circumcircle of a ghost triangle is the open half-plane left of its
    /// finite edge plus the open edge itself.
    fn conflicts(&self, t: usize, p: [f64; 2]) -> bool {
        let tri = self.triangles[t];
        match tri.ghost_edge() {
            Some((u, v)) => {
                let (a, b) = (self.points[u], self.points[v]);
                let side = orient(a, b, p);
                side > 0.0 || (side == 0.0 && strictly_between(a, b, p))
            }
            None => {
                let [a, b, c] = tri.v.map(|v| self.points[v]);
                in_circle(a, b, c, p) > 0.0
            }
        }
    }

    fn insert(&mut self, idx: usize) -> bool {
        let p = self.points[idx];
        let start = match self.locate(p, self.last) {
            Some(Location::Inside(t)) | Some(Location::Outside(t)) => t,
            None => {
                log::warn!("Control point {} could not be located", idx);
                return false;
            }
        };

        if self.triangles[start]
            .v
            .iter()
            .any(|&v| v != GHOST && dist2(self.points[v], p) < DUPLICATE_EPS2)
        {
            return false;
        }

        // Cavity: connected set of triangles whose circumcircle holds p
        let mut bad = vec![start];
        let mut stack = vec![start];
        let mut in_cavity = HashSet::new();
        in_cavity.insert(start);
        while let Some(t) = stack.pop() {
            for &nb in self.triangles[t].n.iter() {
                if nb == NONE || in_cavity.contains(&nb) {
                    continue;
                }
                if self.conflicts(nb, p) {
                    in_cavity.insert(nb);
                    bad.push(nb);
                    stack.push(nb);
                }
            }
        }

        // Boundary edges (a -> c counter-clockwise) and the triangle outside each
        let mut boundary = Vec::new();
        for &t in &bad {
            let tri = self.triangles[t];
            for k in 0..3 {
                let nb = tri.n[k];
                if nb == NONE || !in_cavity.contains(&nb) {
                    boundary.push((tri.v[(k + 1) % 3], tri.v[(k + 2) % 3], nb, t));
                }
            }
        }

        let mut created: Vec<(usize, usize, usize)> = Vec::with_capacity(boundary.len());
        for &(a, c, outer, old) in &boundary {
            let new = self.allocate(Triangle {
                v: [a, c, idx],
                n: [NONE, NONE, outer],
                alive: true,
            });
            if outer != NONE {
                if let Some(slot) = self.triangles[outer].n.iter_mut().find(|s| **s == old) {
                    *slot = new;
                }
            }
            created.push((a, c, new));
        }

        // New triangles fan around p: (a, c, p) meets the one starting at c
        for &(a, c, t) in &created {
            let next = created.iter().find(|&&(a2, _, _)| a2 == c).map(|&(_, _, t2)| t2);
            let prev = created.iter().find(|&&(_, c2, _)| c2 == a).map(|&(_, _, t2)| t2);
            self.triangles[t].n[0] = next.unwrap_or(NONE);
            self.triangles[t].n[1] = prev.unwrap_or(NONE);
        }

        for &t in &bad {
            self.triangles[t].alive = false;
            self.free.push(t);
        }
        if let Some(&(_, _, t)) = created.iter().find(|&&(_, _, t)| !self.triangles[t].is_ghost()) {
            self.last = t;
        }
        true
    }

    fn allocate(&mut self, tri: Triangle) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.triangles[slot] = tri;
                slot
            }
            None => {
                self.triangles.push(tri);
                self.triangles.len() - 1
            }
        }
    }

    /// Visibility walk from `start` over finite triangles; crossing a hull
    /// edge ends in that edge's ghost. Falls back to a linear scan.
    fn locate(&self, p: [f64; 2], start: usize) -> Option<Location> {
        let mut t = if start < self.triangles.len() && self.triangles[start].alive {
            start
        } else {
            self.triangles.iter().position(|t| t.alive && !t.is_ghost())?
        };
        if self.triangles[t].is_ghost() {
            let tri = self.triangles[t];
            let k = tri.v.iter().position(|&v| v == GHOST)?;
            t = tri.n[k];
        }

        let max_steps = self.triangles.len() + 3;
        for _ in 0..max_steps {
            let tri = self.triangles[t];
            if tri.is_ghost() {
                return Some(Location::Outside(t));
            }
            let exit = (0..3).find(|&k| {
                let a = self.points[tri.v[(k + 1) % 3]];
                let b = self.points[tri.v[(k + 2) % 3]];
                orient(a, b, p) < 0.0
            });
            match exit {
                None => return Some(Location::Inside(t)),
                Some(k) if tri.n[k] == NONE => return None,
                Some(k) => t = tri.n[k],
            }
        }

        let inside = self.triangles.iter().position(|tri| {
            tri.alive
                && !tri.is_ghost()
                && (0..3).all(|k| {
                    let a = self.points[tri.v[(k + 1) % 3]];
                    let b = self.points[tri.v[(k + 2) % 3]];
                    orient(a, b, p) >= 0.0
                })
        });
        if let Some(t) = inside {
            return Some(Location::Inside(t));
        }
        (0..self.triangles.len())
            .find(|&t| self.triangles[t].alive && self.triangles[t].is_ghost() && self.conflicts(t, p))
            .map(Location::Outside)
    }
}

/// Piecewise-linear interpolant over a Delaunay triangulation
#[derive(Debug, Clone)]
pub struct LinearInterpolator {
    triangulation: Triangulation,
    values: Vec<f64>,
}

impl LinearInterpolator {
    pub fn new(xs: &[f64], ys: &[f64], values: &[f64]) -> ValResult<Self> {
        if values.len() != xs.len() {
            return Err(ValError::LengthMismatch {
                what: "control values".to_string(),
                expected: xs.len(),
                actual: values.len(),
            });
        }
        Ok(Self {
            triangulation: Triangulation::new(xs, ys)?,
            values: values.to_vec(),
        })
    }

    pub fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    /// Interpolated value at `(x, y)`, NaN outside the convex hull
    pub fn value_at(&self, x: f64, y: f64) -> f64 {
        let mut hint = self.triangulation.last;
        self.value_with_hint(x, y, &mut hint)
    }

    fn value_with_hint(&self, x: f64, y: f64, hint: &mut usize) -> f64 {
        if !x.is_finite() || !y.is_finite() {
            return f64::NAN;
        }
        match self.triangulation.barycentric(x, y, hint) {
            Some((v, w)) => w[0] * self.values[v[0]] + w[1] * self.values[v[1]] + w[2] * self.values[v[2]],
            None => f64::NAN,
        }
    }

    /// Interpolate at many locations; consecutive queries reuse the walk hint
    pub fn interpolate(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        const CHUNK: usize = 4096;

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            xs.par_chunks(CHUNK)
                .zip(ys.par_chunks(CHUNK))
                .flat_map_iter(|(cx, cy)| {
                    let mut hint = self.triangulation.last;
                    cx.iter()
                        .zip(cy.iter())
                        .map(|(&x, &y)| self.value_with_hint(x, y, &mut hint))
                        .collect::<Vec<_>>()
                })
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            let mut hint = self.triangulation.last;
            xs.iter()
                .zip(ys.iter())
                .map(|(&x, &y)| self.value_with_hint(x, y, &mut hint))
                .collect()
        }
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// `p` is collinear with `a`-`b`; true when it lies strictly between them
fn strictly_between(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> bool {
    let t = (p[0] - a[0]) * (b[0] - a[0]) + (p[1] - a[1]) * (b[1] - a[1]);
    t > 0.0 && t < dist2(a, b)
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

/// Twice the signed area of (a, b, c); positive when counter-clockwise
fn orient(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Positive when `d` lies inside the circumcircle of counter-clockwise (a, b, c)
fn in_circle(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> f64 {
    let (adx, ady) = (a[0] - d[0], a[1] - d[1]);
    let (bdx, bdy) = (b[0] - d[0], b[1] - d[1]);
    let (cdx, cdy) = (c[0] - d[0], c[1] - d[1]);
    (adx * adx + ady * ady) * (bdx * cdy - cdx * bdy)
        + (bdx * bdx + bdy * bdy) * (cdx * ady - adx * cdy)
        + (cdx * cdx + cdy * cdy) * (adx * bdy - bdx * ady)
}
