//! Geometric overlap and interpolation kernels shared by drizzle and blot.

/// Overlap area between two axis-aligned rectangles.
#[inline]
#[allow(clippy::too_many_arguments)]
pub(crate) fn square_overlap(
    ax1: f64,
    ay1: f64,
    ax2: f64,
    ay2: f64,
    bx1: f64,
    by1: f64,
    bx2: f64,
    by2: f64,
) -> f64 {
    let x_overlap = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let y_overlap = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    x_overlap * y_overlap
}

/// Lanczos window of order `a`.
#[inline]
pub(crate) fn lanczos(x: f64, a: f64) -> f64 {
    if x.abs() < 1e-9 {
        return 1.0;
    }
    if x.abs() >= a {
        return 0.0;
    }
    let pi_x = std::f64::consts::PI * x;
    let pi_x_a = pi_x / a;
    (pi_x.sin() / pi_x) * (pi_x_a.sin() / pi_x_a)
}

/// Signed area between a segment and the x-axis, clipped to the unit square.
///
/// Summed over the edges of a convex quadrilateral (consistent winding) this
/// gives the overlap of the quadrilateral with `[0,1] x [0,1]` (Green's theorem).
#[inline]
pub(crate) fn sgarea(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let dx = x2 - x1;
    let dy = y2 - y1;

    if dx.abs() < 1e-14 {
        return 0.0;
    }

    let (sgn_dx, xlo, xhi) = if dx < 0.0 {
        (-1.0, x2, x1)
    } else {
        (1.0, x1, x2)
    };

    if xlo >= 1.0 || xhi <= 0.0 {
        return 0.0;
    }

    let xlo = xlo.max(0.0);
    let xhi = xhi.min(1.0);

    let slope = dy / dx;
    let ylo = y1 + slope * (xlo - x1);
    let yhi = y1 + slope * (xhi - x1);

    if ylo <= 0.0 && yhi <= 0.0 {
        return 0.0;
    }
    if ylo >= 1.0 && yhi >= 1.0 {
        return sgn_dx * (xhi - xlo);
    }

    let det = x1 * y2 - y1 * x2;

    // Clip to y >= 0 at the x-axis crossing.
    let (xlo, ylo) = if ylo < 0.0 { (det / dy, 0.0) } else { (xlo, ylo) };
    let (xhi, yhi) = if yhi < 0.0 { (det / dy, 0.0) } else { (xhi, yhi) };

    if ylo <= 1.0 {
        if yhi <= 1.0 {
            return sgn_dx * 0.5 * (xhi - xlo) * (yhi + ylo);
        }
        // Leaves through y = 1.
        let xtop = (dx + det) / dy;
        return sgn_dx * (0.5 * (xtop - xlo) * (1.0 + ylo) + xhi - xtop);
    }

    // Enters through y = 1.
    let xtop = (dx + det) / dy;
    sgn_dx * (0.5 * (xhi - xtop) * (1.0 + yhi) + xtop - xlo)
}

/// Overlap of quadrilateral `(x, y)` with output pixel `(ox, oy)` = `[ox, ox+1] x [oy, oy+1]`.
#[inline]
pub(crate) fn boxer(ox: f64, oy: f64, x: &[f64; 4], y: &[f64; 4]) -> f64 {
    let mut sum = 0.0;
    for i in 0..4 {
        let j = (i + 1) & 3;
        sum += sgarea(x[i] - ox, y[i] - oy, x[j] - ox, y[j] - oy);
    }
    sum.abs()
}

/// Signed area of a quadrilateral from its diagonals.
#[inline]
pub(crate) fn quad_area(x: &[f64; 4], y: &[f64; 4]) -> f64 {
    0.5 * ((x[1] - x[3]) * (y[0] - y[2]) - (x[0] - x[2]) * (y[1] - y[3]))
}
