use crate::domain::Size;

/// Kind of value carried by a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ResultType {
    /// Scalar float.
    Float,
    /// Scalar integer.
    Int,
    /// Boolean.
    Bool,
    /// RGBA color.
    Color,
    /// 2D vector.
    Vector2,
    /// 3D vector.
    Vector3,
    /// 4D vector.
    Vector4,
    /// Menu selection; never converts to other kinds.
    Menu,
}

impl ResultType {
    /// Number of interleaved `f32` channels per pixel.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Float | Self::Int | Self::Bool | Self::Menu => 1,
            Self::Vector2 => 2,
            Self::Vector3 => 3,
            Self::Color | Self::Vector4 => 4,
        }
    }

    /// Return `true` when values of this type can be converted into `target`.
    pub fn can_convert_to(self, target: ResultType) -> bool {
        if self == target {
            return true;
        }
        !matches!(self, Self::Menu) && !matches!(target, Self::Menu)
    }
}

/// Storage precision of image buffers.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Precision {
    /// 16-bit float storage.
    Half,
    /// 32-bit float storage.
    #[default]
    Full,
}

impl Precision {
    pub(crate) fn bytes_per_channel(self) -> usize {
        match self {
            Self::Half => 2,
            Self::Full => 4,
        }
    }
}

/// A single value of one of the supported [`ResultType`]s.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// Scalar float.
    Float(f32),
    /// Scalar integer.
    Int(i32),
    /// Boolean.
    Bool(bool),
    /// RGBA color.
    Color([f32; 4]),
    /// 2D vector.
    Vector2([f32; 2]),
    /// 3D vector.
    Vector3([f32; 3]),
    /// 4D vector.
    Vector4([f32; 4]),
    /// Menu selection.
    Menu(i32),
}

const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

impl Value {
    /// Type tag of this value.
    pub fn ty(&self) -> ResultType {
        match self {
            Self::Float(_) => ResultType::Float,
            Self::Int(_) => ResultType::Int,
            Self::Bool(_) => ResultType::Bool,
            Self::Color(_) => ResultType::Color,
            Self::Vector2(_) => ResultType::Vector2,
            Self::Vector3(_) => ResultType::Vector3,
            Self::Vector4(_) => ResultType::Vector4,
            Self::Menu(_) => ResultType::Menu,
        }
    }

    /// Zero value of `ty`; also the value of invalid results.
    pub fn zero(ty: ResultType) -> Self {
        match ty {
            ResultType::Float => Self::Float(0.0),
            ResultType::Int => Self::Int(0),
            ResultType::Bool => Self::Bool(false),
            ResultType::Color => Self::Color([0.0; 4]),
            ResultType::Vector2 => Self::Vector2([0.0; 2]),
            ResultType::Vector3 => Self::Vector3([0.0; 3]),
            ResultType::Vector4 => Self::Vector4([0.0; 4]),
            ResultType::Menu => Self::Menu(0),
        }
    }

    /// Float view of scalar values, `None` otherwise.
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Int(v) => Some(v as f32),
            Self::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Convert into `target`, or `None` when no conversion exists.
    pub fn convert(self, target: ResultType) -> Option<Value> {
        if self.ty() == target {
            return Some(self);
        }
        if !self.ty().can_convert_to(target) {
            return None;
        }
        let converted = match self {
            Self::Float(v) => splat(v, target),
            Self::Int(v) => splat(v as f32, target),
            Self::Bool(v) => splat(if v { 1.0 } else { 0.0 }, target),
            Self::Color(c) => match target {
                ResultType::Float | ResultType::Int | ResultType::Bool => {
                    scalar(c[0] * LUMA[0] + c[1] * LUMA[1] + c[2] * LUMA[2], target)
                }
                ResultType::Vector2 => Self::Vector2([c[0], c[1]]),
                ResultType::Vector3 => Self::Vector3([c[0], c[1], c[2]]),
                ResultType::Vector4 => Self::Vector4(c),
                ResultType::Color | ResultType::Menu => return None,
            },
            Self::Vector2(v) => widen(&v, target),
            Self::Vector3(v) => widen(&v, target),
            Self::Vector4(v) => widen(&v, target),
            Self::Menu(_) => return None,
        };
        Some(converted)
    }

    /// Write this value into `out`, which holds `ty().channel_count()` channels.
    pub(crate) fn write_channels(&self, out: &mut [f32]) {
        match *self {
            Self::Float(v) => out[0] = v,
            Self::Int(v) | Self::Menu(v) => out[0] = v as f32,
            Self::Bool(v) => out[0] = if v { 1.0 } else { 0.0 },
            Self::Color(c) | Self::Vector4(c) => out[..4].copy_from_slice(&c),
            Self::Vector2(v) => out[..2].copy_from_slice(&v),
            Self::Vector3(v) => out[..3].copy_from_slice(&v),
        }
    }

    /// Read a value of type `ty` from interleaved channels.
    pub(crate) fn from_channels(ty: ResultType, ch: &[f32]) -> Self {
        match ty {
            ResultType::Float => Self::Float(ch[0]),
            ResultType::Int => Self::Int(ch[0] as i32),
            ResultType::Bool => Self::Bool(ch[0] > 0.0),
            ResultType::Menu => Self::Menu(ch[0] as i32),
            ResultType::Color => Self::Color([ch[0], ch[1], ch[2], ch[3]]),
            ResultType::Vector2 => Self::Vector2([ch[0], ch[1]]),
            ResultType::Vector3 => Self::Vector3([ch[0], ch[1], ch[2]]),
            ResultType::Vector4 => Self::Vector4([ch[0], ch[1], ch[2], ch[3]]),
        }
    }
}

fn scalar(v: f32, target: ResultType) -> Value {
    match target {
        ResultType::Int => Value::Int(v as i32),
        ResultType::Bool => Value::Bool(v > 0.0),
        _ => Value::Float(v),
    }
}

fn splat(v: f32, target: ResultType) -> Value {
    match target {
        ResultType::Float | ResultType::Int | ResultType::Bool | ResultType::Menu => {
            scalar(v, target)
        }
        ResultType::Color => Value::Color([v, v, v, 1.0]),
        ResultType::Vector2 => Value::Vector2([v; 2]),
        ResultType::Vector3 => Value::Vector3([v; 3]),
        ResultType::Vector4 => Value::Vector4([v; 4]),
    }
}

fn widen(v: &[f32], target: ResultType) -> Value {
    let at = |i: usize| v.get(i).copied().unwrap_or(0.0);
    match target {
        ResultType::Float | ResultType::Int | ResultType::Bool | ResultType::Menu => {
            scalar(v.iter().sum::<f32>() / v.len() as f32, target)
        }
        ResultType::Color => Value::Color([at(0), at(1), at(2), v.get(3).copied().unwrap_or(1.0)]),
        ResultType::Vector2 => Value::Vector2([at(0), at(1)]),
        ResultType::Vector3 => Value::Vector3([at(0), at(1), at(2)]),
        ResultType::Vector4 => Value::Vector4([at(0), at(1), at(2), at(3)]),
    }
}

/// Host-side backing store of an image result: interleaved `f32` channels, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuffer {
    size: Size,
    ty: ResultType,
    precision: Precision,
    data: Vec<f32>,
}

impl ImageBuffer {
    /// Zero-filled buffer.
    pub fn new(size: Size, ty: ResultType, precision: Precision) -> Self {
        Self {
            size,
            ty,
            precision,
            data: vec![0.0; size.pixel_count() * ty.channel_count()],
        }
    }

    /// Buffer filled with `value`.
    pub fn filled(size: Size, value: Value, precision: Precision) -> Self {
        let mut image = Self::new(size, value.ty(), precision);
        let channels = image.channels();
        for px in image.data.chunks_exact_mut(channels) {
            value.write_channels(px);
        }
        image
    }

    /// Pixel size.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Value type stored per pixel.
    pub fn ty(&self) -> ResultType {
        self.ty
    }

    /// Storage precision.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Channels per pixel.
    pub fn channels(&self) -> usize {
        self.ty.channel_count()
    }

    /// Raw interleaved channel data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable raw interleaved channel data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Read the pixel at `(x, y)`, clamped to the buffer bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Value {
        let x = x.min(self.size.width.saturating_sub(1)) as usize;
        let y = y.min(self.size.height.saturating_sub(1)) as usize;
        let c = self.channels();
        let at = (y * self.size.width as usize + x) * c;
        Value::from_channels(self.ty, &self.data[at..at + c])
    }

    /// Write the pixel at `(x, y)`; out-of-bounds writes are ignored. The value is converted to
    /// the buffer type when needed.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: Value) {
        if x >= self.size.width || y >= self.size.height {
            return;
        }
        let Some(value) = value.convert(self.ty) else {
            return;
        };
        let c = self.channels();
        let at = (y as usize * self.size.width as usize + x as usize) * c;
        value.write_channels(&mut self.data[at..at + c]);
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.data.len() * self.precision.bytes_per_channel()
    }

    pub(crate) fn row_len(&self) -> usize {
        self.size.width as usize * self.channels()
    }

    pub(crate) fn reset(&mut self) {
        self.data.fill(0.0);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/result/value.rs"]
mod tests;
