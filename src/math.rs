use glam::{Mat3, Mat4, Vec3};

// Mantissa scale and exponent bias of the packed color format
const RGBE_MANTISSA_SCALE: f32 = 256.0;
const RGBE_EXPONENT_BIAS: i32 = 128;
// Anything dimmer than this packs to black
const RGBE_MIN_VALUE: f32 = 1e-32;

/// Compact color with 8-bit red, green and blue mantissas and a shared exponent.
///
/// Layout from the most significant byte: red, green, blue, biased exponent.
/// Values of the form `m * 2^k` with `m < 256` survive a round trip exactly,
/// everything else is rounded to the nearest representable color.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgbe(u32);

impl Rgbe {
    pub const ZERO: Rgbe = Rgbe(0);
    pub const ONE: Rgbe = Rgbe(0x8080_8081);

    pub fn from_vec3(color: Vec3) -> Self {
        let max = color.max_element();
        // Also rejects NaN
        if !(max > RGBE_MIN_VALUE) {
            return Self::ZERO;
        }

        // Pick the exponent so the largest channel lands in [128, 256)
        let mut exponent = max.log2().floor() as i32 + 1;
        let mut scale = RGBE_MANTISSA_SCALE * 2f32.powi(-exponent);
        if max * scale >= RGBE_MANTISSA_SCALE {
            exponent += 1;
            scale *= 0.5;
        } else if max * scale < RGBE_MANTISSA_SCALE * 0.5 {
            exponent -= 1;
            scale *= 2.0;
        }

        let biased = exponent + RGBE_EXPONENT_BIAS;
        if biased <= 0 {
            return Self::ZERO;
        }
        if biased > 255 {
            return Self(0xFFFF_FFFF);
        }

        let channel = |value: f32| (value.max(0.0) * scale).round().min(255.0) as u32;
        Self(
            channel(color.x) << 24
                | channel(color.y) << 16
                | channel(color.z) << 8
                | biased as u32,
        )
    }

    pub fn to_vec3(self) -> Vec3 {
        let biased = (self.0 & 0xFF) as i32;
        if biased == 0 {
            return Vec3::ZERO;
        }
        let factor = 2f32.powi(biased - RGBE_EXPONENT_BIAS - 8);
        Vec3::new(
            ((self.0 >> 24) & 0xFF) as f32 * factor,
            ((self.0 >> 16) & 0xFF) as f32 * factor,
            ((self.0 >> 8) & 0xFF) as f32 * factor,
        )
    }

    /// True when all three mantissas are zero
    pub fn is_black(self) -> bool {
        self.0 & 0xFFFF_FF00 == 0
    }
}

impl From<Vec3> for Rgbe {
    fn from(color: Vec3) -> Self {
        Self::from_vec3(color)
    }
}

// Per-channel power, used for transparency over a distance
pub fn pow_vec3(base: Vec3, exponent: f32) -> Vec3 {
    Vec3::new(
        base.x.max(0.0).powf(exponent),
        base.y.max(0.0).powf(exponent),
        base.z.max(0.0).powf(exponent),
    )
}

// Matrix for transforming normals (inverse transpose of the upper 3x3)
pub fn normal_matrix(matrix: &Mat4) -> Mat3 {
    Mat3::from_mat4(*matrix).inverse().transpose()
}

// Weighted sum of three values, e.g. barycentric interpolation
#[inline]
pub fn blend3<T>(values: [T; 3], weights: Vec3) -> T
where
    T: Copy + std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
{
    values[0] * weights.x + values[1] * weights.y + values[2] * weights.z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dyadic_values_pack_exactly() {
        for value in [0.5, 0.25, 1.0, 2.0, 0.125, 3.0] {
            let color = Vec3::splat(value);
            assert_eq!(Rgbe::from_vec3(color).to_vec3(), color);
        }
        assert_eq!(Rgbe::from_vec3(Vec3::ONE), Rgbe::ONE);
    }

    #[test]
    fn black_and_invalid_pack_to_zero() {
        assert_eq!(Rgbe::from_vec3(Vec3::ZERO), Rgbe::ZERO);
        assert_eq!(Rgbe::from_vec3(Vec3::splat(-1.0)), Rgbe::ZERO);
        assert_eq!(Rgbe::from_vec3(Vec3::splat(f32::NAN)), Rgbe::ZERO);
        assert!(Rgbe::ZERO.is_black());
        assert_eq!(Rgbe::ZERO.to_vec3(), Vec3::ZERO);
    }

    #[test]
    fn packing_keeps_relative_precision() {
        let color = Vec3::new(0.8, 0.4, 0.2);
        let unpacked = Rgbe::from_vec3(color).to_vec3();
        assert!((unpacked - color).abs().max_element() < 0.8 / 128.0);

        let bright = Vec3::new(37.0, 1.5, 0.0);
        let unpacked = Rgbe::from_vec3(bright).to_vec3();
        assert!((unpacked - bright).abs().max_element() < 37.0 / 128.0);
        assert!(!Rgbe::from_vec3(bright).is_black());
    }

    #[test]
    fn blend3_weights_components() {
        let values = [Vec3::X, Vec3::Y, Vec3::Z];
        assert_eq!(blend3(values, Vec3::new(0.5, 0.25, 0.25)), Vec3::new(0.5, 0.25, 0.25));
    }
}
