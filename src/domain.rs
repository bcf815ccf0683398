use crate::foundation::error::{GraphError, GraphResult};
use kurbo::{Affine, Point, Rect};

/// Tolerance used when comparing domain transforms.
pub const DOMAIN_EPSILON: f64 = 1.0e-5;

/// Pixel dimensions of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Create a size from width and height.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered.
    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }
}

/// How samples outside a buffer are resolved along one axis.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ExtensionMode {
    /// Outside samples are zero.
    #[default]
    Clip,
    /// Outside samples repeat the nearest edge pixel.
    Extend,
    /// Outside samples wrap around.
    Repeat,
}

/// Interpolation used when a buffer is resampled.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Interpolation {
    /// Nearest pixel.
    Nearest,
    /// Bilinear filtering over a 2x2 footprint.
    #[default]
    Bilinear,
    /// Cubic B-spline filtering over a 4x4 footprint.
    Bicubic,
    /// Anisotropic filtering; realized as bicubic by the core processors.
    Anisotropic,
}

/// Preferences describing how a domain mismatch is resolved.
///
/// Carried by a [`Domain`] but never part of domain equality.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct RealizationOptions {
    /// Extension along the horizontal axis.
    pub extension_x: ExtensionMode,
    /// Extension along the vertical axis.
    pub extension_y: ExtensionMode,
    /// Interpolation filter.
    pub interpolation: Interpolation,
}

/// Pixel size plus affine placement of a buffer in the virtual compositing space.
///
/// The transform maps buffer-local coordinates, whose origin is the buffer center, into virtual
/// space. Two domains are equal when sizes match exactly and transforms match within
/// [`DOMAIN_EPSILON`].
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Domain {
    size: Size,
    transform: Affine,
    realization_options: RealizationOptions,
}

impl Domain {
    /// Create an untransformed domain. Both dimensions must be at least 1.
    pub fn new(size: Size) -> GraphResult<Self> {
        Self::with_transform(size, Affine::IDENTITY)
    }

    /// Create a domain with an explicit placement transform.
    pub fn with_transform(size: Size, transform: Affine) -> GraphResult<Self> {
        if size.width == 0 || size.height == 0 {
            return Err(GraphError::structure(format!(
                "domain size must be at least 1x1, got {}x{}",
                size.width, size.height
            )));
        }
        Ok(Self {
            size,
            transform,
            realization_options: RealizationOptions::default(),
        })
    }

    /// The canonical 1x1 untransformed domain of single-value results.
    pub fn identity() -> Self {
        Self {
            size: Size::new(1, 1),
            transform: Affine::IDENTITY,
            realization_options: RealizationOptions::default(),
        }
    }

    /// Pixel size.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Placement transform.
    pub fn transform(&self) -> Affine {
        self.transform
    }

    /// Realization preferences.
    pub fn realization_options(&self) -> RealizationOptions {
        self.realization_options
    }

    /// Replace the realization preferences.
    pub fn set_realization_options(&mut self, options: RealizationOptions) {
        self.realization_options = options;
    }

    /// Pre-multiply `extra` onto the placement transform.
    pub fn apply_transform(&mut self, extra: Affine) {
        self.transform = compose(extra, self.transform);
    }

    /// Copy of this domain with `extra` pre-multiplied onto its transform.
    pub fn transformed(mut self, extra: Affine) -> Self {
        self.apply_transform(extra);
        self
    }

    /// Exact size comparison plus component-wise transform comparison within `epsilon`.
    pub fn is_equal(&self, other: &Domain, epsilon: f64) -> bool {
        self.size == other.size && affine_approx_eq(self.transform, other.transform, epsilon)
    }

    /// Return `true` for the 1x1 untransformed domain.
    pub fn is_identity(&self) -> bool {
        self.is_equal(&Self::identity(), DOMAIN_EPSILON)
    }

    /// Map from pixel coordinates (origin at the top-left corner) into virtual space.
    pub(crate) fn pixel_to_virtual(&self) -> Affine {
        let half = kurbo::Vec2::new(
            f64::from(self.size.width) * 0.5,
            f64::from(self.size.height) * 0.5,
        );
        self.transform * Affine::translate(-half)
    }

    /// Domain with the rotation and scale of this domain baked into an axis-aligned buffer.
    ///
    /// The result covers the transformed bounds and keeps only a translation.
    pub(crate) fn realized_transformation_domain(&self) -> Domain {
        if is_translation_only(self.transform, DOMAIN_EPSILON) {
            return *self;
        }
        let half_w = f64::from(self.size.width) * 0.5;
        let half_h = f64::from(self.size.height) * 0.5;
        let corners = [
            Point::new(-half_w, -half_h),
            Point::new(half_w, -half_h),
            Point::new(half_w, half_h),
            Point::new(-half_w, half_h),
        ];
        let first = self.transform * corners[0];
        let bounds = corners[1..]
            .iter()
            .fold(Rect::from_points(first, first), |r, &c| {
                r.union_pt(self.transform * c)
            });
        let width = (bounds.width() - DOMAIN_EPSILON).ceil().max(1.0) as u32;
        let height = (bounds.height() - DOMAIN_EPSILON).ceil().max(1.0) as u32;
        Domain {
            size: Size::new(width, height),
            transform: Affine::translate(bounds.center().to_vec2()),
            realization_options: self.realization_options,
        }
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other, DOMAIN_EPSILON)
    }
}

/// Compose a parent and a child transform; the parent pre-multiplies.
pub fn compose(parent: Affine, child: Affine) -> Affine {
    parent * child
}

fn affine_approx_eq(a: Affine, b: Affine, epsilon: f64) -> bool {
    a.as_coeffs()
        .iter()
        .zip(b.as_coeffs().iter())
        .all(|(x, y)| (x - y).abs() <= epsilon)
}

fn is_translation_only(a: Affine, epsilon: f64) -> bool {
    let [xx, yx, xy, yy, _, _] = a.as_coeffs();
    (xx - 1.0).abs() <= epsilon
        && yx.abs() <= epsilon
        && xy.abs() <= epsilon
        && (yy - 1.0).abs() <= epsilon
}

#[cfg(test)]
#[path = "../tests/unit/domain.rs"]
mod tests;
