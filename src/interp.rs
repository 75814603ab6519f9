// Interpolation and resampling routines shared by the data adapters and
// the matrix builder.

/// Linear interpolation on a linear scale.
///
/// Given arrays of x and y values, interpolate to find the y value at x_new.
/// If x_new is outside the range of x, returns the first or last y value.
pub fn interpolate_linear(x: &[f64], y: &[f64], x_new: f64) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    if x.len() == 1 {
        return y[0];
    }
    if x_new <= x[0] {
        return y[0];
    }
    if x_new >= x[x.len() - 1] {
        return y[y.len() - 1];
    }

    let idx = lower_index(x, x_new);
    let (x1, x2) = (x[idx], x[idx + 1]);
    let (y1, y2) = (y[idx], y[idx + 1]);
    y1 + (x_new - x1) * (y2 - y1) / (x2 - x1)
}

/// Log-log interpolation.
///
/// All x values must be positive; zero or negative y values fall back to
/// linear interpolation on that interval, since the logarithm is undefined.
pub fn interpolate_log_log(x: &[f64], y: &[f64], x_new: f64) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    if x.len() == 1 {
        return y[0];
    }
    if x_new <= x[0] {
        return y[0];
    }
    if x_new >= x[x.len() - 1] {
        return y[y.len() - 1];
    }

    let idx = lower_index(x, x_new);
    let (x1, x2) = (x[idx], x[idx + 1]);
    let (y1, y2) = (y[idx], y[idx + 1]);
    if y1 <= 0.0 || y2 <= 0.0 {
        return y1 + (x_new - x1) * (y2 - y1) / (x2 - x1);
    }
    let log_y = y1.ln() + (x_new.ln() - x1.ln()) * (y2.ln() - y1.ln()) / (x2.ln() - x1.ln());
    log_y.exp()
}

/// Largest index `i` with `x[i] <= x_new`, assuming `x[0] < x_new < x[last]`.
fn lower_index(x: &[f64], x_new: f64) -> usize {
    let mut low = 0usize;
    let mut high = x.len() - 1;
    while high - low > 1 {
        let mid = (low + high) >> 1;
        if x[mid] <= x_new {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}

/// Monotone cubic (PCHIP) interpolant over tabulated points.
///
/// Uses Fritsch-Carlson slope limiting, so the interpolant never overshoots
/// the data: a non-negative table yields a non-negative interpolant. This is
/// the documented interpolation order for yield resampling.
#[derive(Debug, Clone)]
pub struct Pchip {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Endpoint derivatives per node.
    d: Vec<f64>,
}

impl Pchip {
    /// Construct from tabulated `(x, y)` points. `x` must be strictly
    /// increasing with at least two points.
    pub fn new(x: &[f64], y: &[f64]) -> Self {
        assert!(x.len() >= 2 && x.len() == y.len());
        let n = x.len();
        let mut h = vec![0.0; n - 1];
        let mut delta = vec![0.0; n - 1];
        for i in 0..n - 1 {
            h[i] = x[i + 1] - x[i];
            delta[i] = (y[i + 1] - y[i]) / h[i];
        }

        let mut d = vec![0.0; n];
        // interior slopes: weighted harmonic mean where secants agree in sign
        for i in 1..n - 1 {
            if delta[i - 1] * delta[i] > 0.0 {
                let w1 = 2.0 * h[i] + h[i - 1];
                let w2 = h[i] + 2.0 * h[i - 1];
                d[i] = (w1 + w2) / (w1 / delta[i - 1] + w2 / delta[i]);
            }
        }
        d[0] = edge_slope(h[0], h.get(1).copied().unwrap_or(h[0]), delta[0], delta.get(1).copied().unwrap_or(delta[0]));
        d[n - 1] = edge_slope(
            h[n - 2],
            if n >= 3 { h[n - 3] } else { h[n - 2] },
            delta[n - 2],
            if n >= 3 { delta[n - 3] } else { delta[n - 2] },
        );

        Pchip {
            x: x.to_vec(),
            y: y.to_vec(),
            d,
        }
    }

    /// Evaluate at `x_new`, clamping to the endpoint values outside the table.
    pub fn eval(&self, x_new: f64) -> f64 {
        let n = self.x.len();
        if x_new <= self.x[0] {
            return self.y[0];
        }
        if x_new >= self.x[n - 1] {
            return self.y[n - 1];
        }
        let i = lower_index(&self.x, x_new);
        let h = self.x[i + 1] - self.x[i];
        let t = (x_new - self.x[i]) / h;
        let (t2, t3) = (t * t, t * t * t);
        // Hermite basis
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        h00 * self.y[i] + h10 * h * self.d[i] + h01 * self.y[i + 1] + h11 * h * self.d[i + 1]
    }

    /// Integrate the interpolant over `[a, b]` exactly (the interpolant is
    /// piecewise cubic, so each segment has a closed-form antiderivative).
    /// Outside the table the endpoint values extend as constants.
    pub fn integrate(&self, a: f64, b: f64) -> f64 {
        if b <= a {
            return 0.0;
        }
        let n = self.x.len();
        let mut total = 0.0;
        // constant extensions beyond the table
        if a < self.x[0] {
            total += (b.min(self.x[0]) - a) * self.y[0];
        }
        if b > self.x[n - 1] {
            total += (b - a.max(self.x[n - 1])) * self.y[n - 1];
        }
        for i in 0..n - 1 {
            let (x0, x1) = (self.x[i], self.x[i + 1]);
            let lo = a.max(x0);
            let hi = b.min(x1);
            if hi <= lo {
                continue;
            }
            let h = x1 - x0;
            let ta = (lo - x0) / h;
            let tb = (hi - x0) / h;
            total += h * (self.segment_antiderivative(i, tb) - self.segment_antiderivative(i, ta));
        }
        total
    }

    /// Antiderivative (in the normalized coordinate t) of the Hermite
    /// segment starting at node `i`, evaluated at `t`.
    fn segment_antiderivative(&self, i: usize, t: f64) -> f64 {
        let h = self.x[i + 1] - self.x[i];
        let (t2, t3, t4) = (t * t, t * t * t, t * t * t * t);
        let ih00 = 0.5 * t4 - t3 + t;
        let ih10 = 0.25 * t4 - 2.0 * t3 / 3.0 + 0.5 * t2;
        let ih01 = -0.5 * t4 + t3;
        let ih11 = 0.25 * t4 - t3 / 3.0;
        ih00 * self.y[i]
            + ih10 * h * self.d[i]
            + ih01 * self.y[i + 1]
            + ih11 * h * self.d[i + 1]
    }
}

/// One-sided three-point slope estimate with Fritsch-Carlson limiting.
fn edge_slope(h0: f64, h1: f64, delta0: f64, delta1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * delta0 - h0 * delta1) / (h0 + h1);
    if d * delta0 <= 0.0 {
        0.0
    } else if delta0 * delta1 < 0.0 && d.abs() > 3.0 * delta0.abs() {
        3.0 * delta0
    } else {
        d
    }
}
