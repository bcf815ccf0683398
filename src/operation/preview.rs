use crate::domain::Size;
use crate::foundation::ids::ResultId;
use crate::result::ResultStore;
use crate::result::value::{ResultType, Value};

/// Downsampled RGBA thumbnail of a node's first output.
#[derive(Clone, Debug, PartialEq)]
pub struct Preview {
    size: Size,
    data: Vec<f32>,
}

impl Preview {
    /// Thumbnail size.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Interleaved RGBA channels, row-major.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// RGBA at `(x, y)`, or `None` outside the thumbnail.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let at = (y as usize * self.size.width as usize + x as usize) * 4;
        let px = &self.data[at..at + 4];
        Some([px[0], px[1], px[2], px[3]])
    }
}

fn to_rgba(v: Value) -> [f32; 4] {
    match v.convert(ResultType::Color) {
        Some(Value::Color(c)) => c,
        _ => [0.0; 4],
    }
}

/// Nearest-neighbour thumbnail whose longest side is at most `max_size`.
pub(crate) fn compute_preview(results: &ResultStore, id: ResultId, max_size: u32) -> Option<Preview> {
    if let Some(v) = results.single_value(id) {
        return Some(Preview {
            size: Size::new(1, 1),
            data: to_rgba(v).to_vec(),
        });
    }
    let img = results.image(id)?;
    let src = img.size();
    let longest = src.width.max(src.height);
    let max_size = max_size.max(1);
    let (w, h) = if longest <= max_size {
        (src.width, src.height)
    } else {
        let scale = f64::from(max_size) / f64::from(longest);
        (
            ((f64::from(src.width) * scale).round() as u32).max(1),
            ((f64::from(src.height) * scale).round() as u32).max(1),
        )
    };
    let mut data = Vec::with_capacity(w as usize * h as usize * 4);
    for y in 0..h {
        let sy = ((f64::from(y) + 0.5) * f64::from(src.height) / f64::from(h)) as u32;
        for x in 0..w {
            let sx = ((f64::from(x) + 0.5) * f64::from(src.width) / f64::from(w)) as u32;
            data.extend_from_slice(&to_rgba(img.pixel(sx, sy)));
        }
    }
    Some(Preview {
        size: Size::new(w, h),
        data,
    })
}
