use glam::Vec3;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[inline]
fn quantize(value: f32) -> u32 {
    (value.clamp(0.0, 1.0) * 255.0 + 0.5) as u32
}

pub fn argb_pack(color: Vec3, alpha: f32) -> u32 {
    quantize(alpha) << 24 | quantize(color.x) << 16 | quantize(color.y) << 8 | quantize(color.z)
}

pub fn argb_unpack(argb: u32) -> (Vec3, f32) {
    let channel = |shift: u32| ((argb >> shift) & 0xFF) as f32 / 255.0;
    (Vec3::new(channel(16), channel(8), channel(0)), channel(24))
}

pub fn argb_to_rgba8(argb: u32) -> [u8; 4] {
    [
        (argb >> 16) as u8,
        (argb >> 8) as u8,
        argb as u8,
        (argb >> 24) as u8,
    ]
}

// Rate limiter shared between worker threads. Only one caller wins each interval.
pub struct Throttle {
    interval: Duration,
    last: Mutex<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(Instant::now()),
        }
    }

    pub fn ready(&self) -> bool {
        // Contended means somebody else is reporting right now
        let Ok(mut last) = self.last.try_lock() else {
            return false;
        };
        let now = Instant::now();
        if now.duration_since(*last) < self.interval {
            return false;
        }
        *last = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argb_round_trip() {
        let packed = argb_pack(Vec3::new(1.0, 0.0, 0.5), 1.0);
        assert_eq!(packed, 0xFFFF_0080);
        let (color, alpha) = argb_unpack(packed);
        assert_eq!(alpha, 1.0);
        assert_eq!(color.x, 1.0);
        assert_eq!(argb_to_rgba8(packed), [0xFF, 0x00, 0x80, 0xFF]);
    }

    #[test]
    fn argb_clamps_out_of_range() {
        assert_eq!(argb_pack(Vec3::new(4.0, -1.0, 0.0), 0.0), 0x00FF_0000);
    }

    #[test]
    fn throttle_waits_for_interval() {
        let throttle = Throttle::new(Duration::from_secs(3600));
        assert!(!throttle.ready());
        let throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.ready());
    }
}
