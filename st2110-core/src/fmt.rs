//! Pixel group and frame-rate tables for ST 2110-20 line maths
//! (grounded on `st_fmt.c`'s `st20_pgroups` /
//! `st_fps_timings` tables).

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum St20Format {
    Yuv422_8bit,
    Yuv422_10bit,
    Yuv422_12bit,
    Yuv422_16bit,
    Yuv420_8bit,
    Yuv420_10bit,
    Yuv420_12bit,
    Rgb8bit,
    Rgb10bit,
    Rgb12bit,
    Rgb16bit,
    Yuv444_8bit,
    Yuv444_10bit,
    Yuv444_12bit,
    Yuv444_16bit,
}

/// A pixel group: `size` bytes cover `coverage` pixels (the RFC 4175
/// packing unit).
#[derive(Debug, Copy, Clone)]
pub struct PixelGroup {
    pub size: u32,
    pub coverage: u32,
}

impl St20Format {
    pub const fn pixel_group(self) -> PixelGroup {
        match self {
            St20Format::Yuv422_8bit => PixelGroup { size: 4, coverage: 2 },
            St20Format::Yuv422_10bit => PixelGroup { size: 5, coverage: 2 },
            St20Format::Yuv422_12bit => PixelGroup { size: 6, coverage: 2 },
            St20Format::Yuv422_16bit => PixelGroup { size: 8, coverage: 2 },
            St20Format::Yuv420_8bit => PixelGroup { size: 6, coverage: 4 },
            St20Format::Yuv420_10bit => PixelGroup { size: 15, coverage: 8 },
            St20Format::Yuv420_12bit => PixelGroup { size: 9, coverage: 4 },
            St20Format::Rgb8bit => PixelGroup { size: 3, coverage: 1 },
            St20Format::Rgb10bit => PixelGroup { size: 15, coverage: 4 },
            St20Format::Rgb12bit => PixelGroup { size: 9, coverage: 2 },
            St20Format::Rgb16bit => PixelGroup { size: 6, coverage: 1 },
            St20Format::Yuv444_8bit => PixelGroup { size: 3, coverage: 1 },
            St20Format::Yuv444_10bit => PixelGroup { size: 15, coverage: 4 },
            St20Format::Yuv444_12bit => PixelGroup { size: 9, coverage: 2 },
            St20Format::Yuv444_16bit => PixelGroup { size: 6, coverage: 1 },
        }
    }

    /// Bytes needed to carry one scanline of `width` pixels, rounded
    /// up to a whole number of pixel groups
    pub fn line_size(self, width: u32) -> u32 {
        let pg = self.pixel_group();
        let groups = (width + pg.coverage - 1) / pg.coverage;
        groups * pg.size
    }

    /// Full frame size in bytes for `width` x `height`.
    pub fn frame_size(self, width: u32, height: u32) -> u64 {
        self.line_size(width) as u64 * height as u64
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fps {
    P59_94,
    P50,
    P29_97,
    P25,
}

/// RTP clock ticks per frame, expressed as `mul`/`den` over the
/// 90 kHz sampling clock (matches `st_fps_timings`, avoids floating
/// point in the epoch/TRS math ).
#[derive(Debug, Copy, Clone)]
pub struct FpsTiming {
    pub sampling_clock_rate: u32,
    pub mul: u32,
    pub den: u32,
}

impl Fps {
    pub const fn timing(self) -> FpsTiming {
        match self {
            Fps::P59_94 => FpsTiming { sampling_clock_rate: 90_000, mul: 60_000, den: 1001 },
            Fps::P50 => FpsTiming { sampling_clock_rate: 90_000, mul: 50, den: 1 },
            Fps::P29_97 => FpsTiming { sampling_clock_rate: 90_000, mul: 30_000, den: 1001 },
            Fps::P25 => FpsTiming { sampling_clock_rate: 90_000, mul: 25, den: 1 },
        }
    }

    /// Nominal frame rate as a plain f64, for logging/diagnostics only;
    /// pacing math uses `timing()`'s rational form.
    pub fn frame_rate(self) -> f64 {
        let t = self.timing();
        t.mul as f64 / t.den as f64
    }

    /// RTP clock ticks spanned by one frame period.
    pub fn ticks_per_frame(self) -> u64 {
        let t = self.timing();
        (t.sampling_clock_rate as u64 * t.den as u64) / t.mul as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv422_10bit_line_size_matches_pixel_group_rounding() {
        // 1920 is divisible by the coverage (2), so no rounding needed.
        assert_eq!(St20Format::Yuv422_10bit.line_size(1920), 1920 / 2 * 5);
    }

    #[test]
    fn odd_width_rounds_up_to_a_whole_pixel_group() {
        // coverage 4 (YUV420 8bit): width 1921 needs ceil(1921/4) groups.
        let pg = St20Format::Yuv420_8bit.pixel_group();
        let expected_groups = (1921 + pg.coverage - 1) / pg.coverage;
        assert_eq!(St20Format::Yuv420_8bit.line_size(1921), expected_groups * pg.size);
    }

    #[test]
    fn fps_59_94_ticks_per_frame_is_1501_point_5_rounded_down() {
        // 90000 * 1001 / 60000 = 1501.5 -> integer division floors to 1501
        assert_eq!(Fps::P59_94.ticks_per_frame(), 1501);
    }

    #[test]
    fn p50_frame_rate_is_exact() {
        assert_eq!(Fps::P50.frame_rate(), 50.0);
    }
}
