use crate::domain::{Domain, ExtensionMode, Interpolation};
use crate::foundation::error::{GraphError, GraphResult};
use crate::foundation::ids::ResultId;
use crate::operation::EvalEnv;
use crate::result::value::{ImageBuffer, Value};
use kurbo::Point;
use rayon::prelude::*;

/// Fill `output` with normalized pixel-center coordinates over `domain`.
pub(crate) fn texture_coordinates(
    env: &mut EvalEnv<'_>,
    output: ResultId,
    domain: Domain,
) -> GraphResult<()> {
    env.results
        .allocate_image(output, domain, env.opts.pooled_intermediates)?;
    let mut img = take(env, output)?;
    let size = img.size();
    let row_len = img.row_len();
    img.data_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f32 + 0.5) / size.height as f32;
            for (x, px) in row.chunks_exact_mut(2).enumerate() {
                px[0] = (x as f32 + 0.5) / size.width as f32;
                px[1] = v;
            }
        });
    env.results.restore_image(output, img);
    Ok(())
}

/// Convert `source` into the type of `output`, keeping the domain.
pub(crate) fn convert(env: &mut EvalEnv<'_>, source: ResultId, output: ResultId) -> GraphResult<()> {
    let target_ty = env.results.ty(output);
    if let Some(v) = env.results.single_value(source) {
        env.results.allocate_single_value(output)?;
        let converted = v.convert(target_ty).unwrap_or_else(|| Value::zero(target_ty));
        return env.results.set_single_value(output, converted);
    }

    let domain = env.results.domain(source);
    env.results
        .allocate_image(output, domain, env.opts.pooled_intermediates)?;
    let mut dst = take(env, output)?;
    if env.results.should_compute(output) {
        let src = image(env, source)?;
        let src_ty = src.ty();
        let (sc, dc) = (src.channels(), dst.channels());
        dst.data_mut()
            .par_chunks_mut(dc * 64)
            .zip(src.data().par_chunks(sc * 64))
            .for_each(|(d, s)| {
                for (dp, sp) in d.chunks_exact_mut(dc).zip(s.chunks_exact(sc)) {
                    Value::from_channels(src_ty, sp)
                        .convert(target_ty)
                        .unwrap_or_else(|| Value::zero(target_ty))
                        .write_channels(dp);
                }
            });
    }
    env.results.restore_image(output, dst);
    Ok(())
}

/// Resample `source` onto `target` using the source domain's realization options.
///
/// Each target pixel center is mapped into virtual space and back into source pixel space.
pub(crate) fn realize(
    env: &mut EvalEnv<'_>,
    source: ResultId,
    output: ResultId,
    target: Domain,
) -> GraphResult<()> {
    if let Some(v) = env.results.single_value(source) {
        env.results.allocate_single_value(output)?;
        return env.results.set_single_value(output, v);
    }

    env.results
        .allocate_image(output, target, env.opts.pooled_intermediates)?;
    let mut dst = take(env, output)?;
    if env.results.should_compute(output) {
        let source_domain = env.results.domain(source);
        let options = source_domain.realization_options();
        let to_source = source_domain.pixel_to_virtual().inverse() * target.pixel_to_virtual();
        let src = image(env, source)?;
        let sampler = Sampler {
            image: src,
            extension_x: options.extension_x,
            extension_y: options.extension_y,
        };
        let channels = dst.channels();
        let row_len = dst.row_len();
        let interpolation = options.interpolation;
        dst.data_mut()
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(channels).enumerate() {
                    let p = to_source * Point::new(x as f64 + 0.5, y as f64 + 0.5);
                    sampler.sample(p.x - 0.5, p.y - 0.5, interpolation, px);
                }
            });
    }
    env.results.restore_image(output, dst);
    Ok(())
}

fn take(env: &mut EvalEnv<'_>, id: ResultId) -> GraphResult<ImageBuffer> {
    env.results
        .take_image(id)
        .ok_or_else(|| GraphError::evaluation(format!("result {id:?} holds no owned image")))
}

fn image<'a>(env: &'a EvalEnv<'_>, id: ResultId) -> GraphResult<&'a ImageBuffer> {
    env.results
        .image(id)
        .ok_or_else(|| GraphError::evaluation(format!("result {id:?} holds no image")))
}

/// Reads an image at fractional pixel coordinates (pixel centers at integers).
pub(crate) struct Sampler<'a> {
    pub(crate) image: &'a ImageBuffer,
    pub(crate) extension_x: ExtensionMode,
    pub(crate) extension_y: ExtensionMode,
}

impl Sampler<'_> {
    pub(crate) fn sample(&self, x: f64, y: f64, interpolation: Interpolation, out: &mut [f32]) {
        out.fill(0.0);
        match interpolation {
            Interpolation::Nearest => {
                self.accumulate(x.round() as i64, y.round() as i64, 1.0, out);
            }
            Interpolation::Bilinear => {
                let (x0, y0) = (x.floor(), y.floor());
                let (fx, fy) = ((x - x0) as f32, (y - y0) as f32);
                let (x0, y0) = (x0 as i64, y0 as i64);
                self.accumulate(x0, y0, (1.0 - fx) * (1.0 - fy), out);
                self.accumulate(x0 + 1, y0, fx * (1.0 - fy), out);
                self.accumulate(x0, y0 + 1, (1.0 - fx) * fy, out);
                self.accumulate(x0 + 1, y0 + 1, fx * fy, out);
            }
            Interpolation::Bicubic | Interpolation::Anisotropic => {
                let (x0, y0) = (x.floor(), y.floor());
                let wx = bspline_weights((x - x0) as f32);
                let wy = bspline_weights((y - y0) as f32);
                let (x0, y0) = (x0 as i64, y0 as i64);
                for (j, wy) in wy.iter().enumerate() {
                    for (i, wx) in wx.iter().enumerate() {
                        self.accumulate(x0 + i as i64 - 1, y0 + j as i64 - 1, wx * wy, out);
                    }
                }
            }
        }
    }

    fn accumulate(&self, x: i64, y: i64, weight: f32, out: &mut [f32]) {
        if weight == 0.0 {
            return;
        }
        let size = self.image.size();
        let (Some(x), Some(y)) = (
            extend(x, size.width, self.extension_x),
            extend(y, size.height, self.extension_y),
        ) else {
            return;
        };
        let c = self.image.channels();
        let at = (y as usize * size.width as usize + x as usize) * c;
        for (o, s) in out.iter_mut().zip(&self.image.data()[at..at + c]) {
            *o += weight * s;
        }
    }
}

fn extend(i: i64, len: u32, mode: ExtensionMode) -> Option<u32> {
    let len = i64::from(len);
    match mode {
        ExtensionMode::Clip => (0..len).contains(&i).then_some(i as u32),
        ExtensionMode::Extend => Some(i.clamp(0, len - 1) as u32),
        ExtensionMode::Repeat => Some(i.rem_euclid(len) as u32),
    }
}

/// Cubic B-spline weights for the four taps around a sample at fraction `t`.
fn bspline_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        (1.0 - t).powi(3) / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

#[cfg(test)]
#[path = "../../tests/unit/operation/processors.rs"]
mod tests;
