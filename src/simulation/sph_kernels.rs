use crate::{
    floating_type_mod::{FRAC_1_PI, FT},
    V2,
};

/**
 * Smoothing kernels for a fixed influence radius `r`.
 *
 * The density kernel is the 2D poly6 kernel `4/(PI r^8) * (r^2 - d^2)^3`,
 * normalized so that it integrates to one over the support disk. The viscosity
 * kernel is the 2D normalized version of the Müller viscosity kernel.
 *
 * All kernels vanish at `d == r` and return zero for a zero separation, so
 * callers never have to special-case coincident particles.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingKernels {
    radius: FT,
    radius_sq: FT,
    density_norm: FT,
    gradient_norm: FT,
    viscosity_norm: FT,
}

impl SmoothingKernels {
    pub fn new(radius: FT) -> Self {
        let radius_sq = radius * radius;
        let radius8 = radius_sq * radius_sq * radius_sq * radius_sq;
        SmoothingKernels {
            radius,
            radius_sq,
            density_norm: 4. * FRAC_1_PI / radius8,
            // d/dx (r^2 - |x|^2)^3 = -6 (r^2 - |x|^2)^2 x
            gradient_norm: -24. * FRAC_1_PI / radius8,
            viscosity_norm: 10. * FRAC_1_PI / (3. * radius_sq),
        }
    }

    pub fn radius(&self) -> FT {
        self.radius
    }

    #[inline(always)]
    pub fn density(&self, dist: FT) -> FT {
        if dist <= 0. || dist >= self.radius {
            return 0.;
        }
        let v = self.radius_sq - dist * dist;
        self.density_norm * v * v * v
    }

    /// Scalar factor `c` such that `grad W(x) = c * x` for `|x| == dist`.
    #[inline(always)]
    fn gradient_coefficient(&self, dist: FT) -> FT {
        if dist <= 0. || dist >= self.radius {
            return 0.;
        }
        let v = self.radius_sq - dist * dist;
        self.gradient_norm * v * v
    }

    /**
     * Gradient of the density kernel with respect to `x_i` where `diff = x_i - x_j`.
     */
    #[inline(always)]
    pub fn density_gradient(&self, diff: V2) -> V2 {
        let dist = diff.norm();
        diff * self.gradient_coefficient(dist)
    }

    /// One component of `density_gradient` when the distance is already known.
    #[inline(always)]
    pub fn density_derivative(&self, dist: FT, component: FT) -> FT {
        self.gradient_coefficient(dist) * component
    }

    #[inline(always)]
    pub fn viscosity(&self, dist: FT) -> FT {
        if dist <= 0. || dist > self.radius {
            return 0.;
        }
        let q = dist / self.radius;
        // -q^3/2 + q^2 + 1/(2q) - 1 in factored form, exact zero at q == 1
        let v = 1. - q;
        self.viscosity_norm * v * v * v * (1. + q) / (2. * q)
    }
}

#[test]
fn density_kernel_2d_integration_test() {
    use crate::vec2f;

    let kernels = SmoothingKernels::new(16.);
    let support_radius = kernels.radius();
    let grid_size = 200;
    let square_len = 2. * support_radius / grid_size as FT;
    let square_area = (square_len * square_len) as f64;

    let mut integral: f64 = 0.;

    for y in 0..grid_size {
        for x in 0..grid_size {
            let integration_point = vec2f(
                (x as FT + 0.5) * square_len - support_radius,
                (y as FT + 0.5) * square_len - support_radius,
            );
            integral += kernels.density(integration_point.norm()) as f64 * square_area;
        }
    }

    println!("Integration of 2D density kernel with r={:.2}: {}", support_radius, integral);
    assert!((integral - 1.).abs() < 1e-3);
}

#[test]
fn density_kernel_derivative_test() {
    use crate::vec2f;

    let kernels = SmoothingKernels::new(1.);
    let support_radius = kernels.radius();
    let test_grid_size = 40;
    let diff = support_radius * 1e-2;
    let diff_half = diff * 0.5;

    let sample_spacing = 2. * support_radius / test_grid_size as FT;

    for y in 0..test_grid_size {
        for x in 0..test_grid_size {
            let sample_point = vec2f(
                (x as FT + 0.5) * sample_spacing - support_radius,
                (y as FT + 0.5) * sample_spacing - support_radius,
            );

            let analytical_deriv = kernels.density_gradient(sample_point);

            let x_neg = kernels.density((sample_point + vec2f(-diff_half, 0.)).norm());
            let x_pos = kernels.density((sample_point + vec2f(diff_half, 0.)).norm());
            let y_neg = kernels.density((sample_point + vec2f(0., -diff_half)).norm());
            let y_pos = kernels.density((sample_point + vec2f(0., diff_half)).norm());

            let approx_deriv = vec2f((x_pos - x_neg) / diff, (y_pos - y_neg) / diff);
            let absolute_error = analytical_deriv - approx_deriv;

            assert!(
                absolute_error.x.abs() < 0.01 && absolute_error.y.abs() < 0.01,
                "[{}, {}]: analytical={:?} approx={:?}",
                x,
                y,
                analytical_deriv,
                approx_deriv
            );

            let dist = sample_point.norm();
            crate::assert_ft_approx_eq(
                analytical_deriv.x,
                kernels.density_derivative(dist, sample_point.x),
                1e-6,
                || format!("density_derivative x at {:?}", sample_point),
            );
            crate::assert_ft_approx_eq(
                analytical_deriv.y,
                kernels.density_derivative(dist, sample_point.y),
                1e-6,
                || format!("density_derivative y at {:?}", sample_point),
            );
        }
    }
}

#[test]
fn kernels_vanish_outside_support() {
    use crate::vec2f;

    let kernels = SmoothingKernels::new(16.);
    let r = kernels.radius();

    for dist in [-1., 0., r, r + 0.5, 100.] {
        assert_eq!(kernels.density(dist), 0.);
        assert_eq!(kernels.density_derivative(dist, 1.), 0.);
    }
    assert_eq!(kernels.viscosity(0.), 0.);
    assert_eq!(kernels.viscosity(r + 0.5), 0.);
    assert_eq!(kernels.density_gradient(V2::zeros()), V2::zeros());
    assert_eq!(kernels.density_gradient(vec2f(r, 0.)), V2::zeros());

    // approaching the support radius from below every kernel goes to zero continuously
    let mut last_density = kernels.density(0.9 * r);
    let mut last_viscosity = kernels.viscosity(0.9 * r);
    for eps in [1e-1, 1e-2, 1e-3] {
        let dist = r - eps;
        let density = kernels.density(dist);
        let viscosity = kernels.viscosity(dist);
        let gradient = kernels.density_gradient(vec2f(dist, 0.)).norm();
        assert!(density > 0. && density < last_density);
        assert!(viscosity >= 0. && viscosity < last_viscosity);
        assert!(gradient < 1e-6);
        last_density = density;
        last_viscosity = viscosity;
    }
    assert!(kernels.density(r - 1e-3) < 1e-10);
    assert!(kernels.viscosity(r) < 1e-6);
}

#[test]
fn density_kernel_is_monotonic() {
    let kernels = SmoothingKernels::new(16.);
    let mut last = kernels.density(1e-3);
    for i in 1..160 {
        let value = kernels.density(i as FT * 0.1);
        assert!(value <= last);
        last = value;
    }
}
