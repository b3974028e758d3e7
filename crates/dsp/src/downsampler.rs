use num_complex::Complex32;

/// Largest accepted decimation exponent (2^24 rate reduction).
pub const MAX_DECIM: u32 = 24;

/// Center frequency position relative to the decimated passband.
///
/// Selects the quarter-rate spectral shift applied before the first
/// decimation stage, so the band of interest stays centered after the
/// rate reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcPos {
    /// Band of interest entirely below the new Nyquist edge.
    Infra,
    /// Band of interest entirely above the new Nyquist edge.
    Supra,
    /// Band of interest centered (no shift).
    Center,
}

/// Power-of-two decimator with optional center-frequency repositioning.
///
/// Each stage halves the sample rate by averaging adjacent sample
/// pairs. The rotation phase and the odd-tail carry sample of every
/// stage persist across `process` calls, so decimation is seamless
/// across block boundaries. decim = 0 is an identity move.
pub struct Downsampler {
    decim: u32,
    fc_pos: FcPos,
    /// Quarter-rate rotation phase, mod 4, carried between calls.
    phase: u32,
    /// Leftover odd sample of each stage, carried between calls.
    stage_carry: Vec<Option<Complex32>>,
}

impl Downsampler {
    /// Build a downsampler for `decim` halving stages.
    pub fn new(decim: u32, fc_pos: FcPos) -> Result<Self, String> {
        if decim > MAX_DECIM {
            return Err(format!(
                "decimation exponent {} out of range (max {})",
                decim, MAX_DECIM
            ));
        }
        Ok(Self {
            decim,
            fc_pos,
            phase: 0,
            stage_carry: vec![None; decim as usize],
        })
    }

    pub fn decimation(&self) -> u32 {
        self.decim
    }

    /// Process one block. Output length is the input length shifted
    /// right by the decimation exponent, up to samples carried between
    /// calls at stage boundaries.
    pub fn process(&mut self, samples_in: Vec<Complex32>) -> Vec<Complex32> {
        if self.decim == 0 {
            return samples_in;
        }

        let mut work = samples_in;

        // Reposition the band of interest before the first stage:
        // infra shifts the spectrum by +fs/4, supra by -fs/4.
        match self.fc_pos {
            FcPos::Center => {}
            FcPos::Infra => self.quarter_shift(&mut work, 1),
            FcPos::Supra => self.quarter_shift(&mut work, 3),
        }

        for stage in 0..self.decim as usize {
            let mut out = Vec::with_capacity(work.len() / 2 + 1);
            Self::decimate_by_two(&work, &mut self.stage_carry[stage], &mut out);
            work = out;
        }
        work
    }

    /// Multiply by j^n (step = 1) or (-j)^n (step = 3), phase carried
    /// between calls. The four multipliers are exact, no rounding.
    fn quarter_shift(&mut self, samples: &mut [Complex32], step: u32) {
        for s in samples.iter_mut() {
            *s = match self.phase & 3 {
                0 => *s,
                1 => Complex32::new(-s.im, s.re),
                2 => Complex32::new(-s.re, -s.im),
                _ => Complex32::new(s.im, -s.re),
            };
            self.phase = (self.phase + step) & 3;
        }
    }

    /// One half-band stage: average adjacent pairs. An unpaired tail
    /// sample is carried to the next call.
    fn decimate_by_two(
        input: &[Complex32],
        carry: &mut Option<Complex32>,
        out: &mut Vec<Complex32>,
    ) {
        let mut idx = 0;
        if let Some(prev) = carry.take() {
            match input.first() {
                Some(&x) => {
                    out.push((prev + x) * 0.5);
                    idx = 1;
                }
                None => {
                    *carry = Some(prev);
                    return;
                }
            }
        }
        while idx + 1 < input.len() {
            out.push((input[idx] + input[idx + 1]) * 0.5);
            idx += 2;
        }
        if idx < input.len() {
            *carry = Some(input[idx]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<Complex32> {
        (0..n)
            .map(|i| Complex32::new(i as f32, -(i as f32)))
            .collect()
    }

    #[test]
    fn test_identity_when_decim_zero() {
        let mut dn = Downsampler::new(0, FcPos::Center).unwrap();
        let input = ramp(1024);
        let output = dn.process(input.clone());
        assert_eq!(output, input);
    }

    #[test]
    fn test_output_length_halves_per_stage() {
        for decim in 1..=4u32 {
            let mut dn = Downsampler::new(decim, FcPos::Center).unwrap();
            let output = dn.process(ramp(4096));
            assert_eq!(
                output.len(),
                4096 >> decim,
                "decim={} produced {} samples",
                decim,
                output.len()
            );
        }
    }

    #[test]
    fn test_pairwise_average_values() {
        let mut dn = Downsampler::new(1, FcPos::Center).unwrap();
        let input = vec![
            Complex32::new(1.0, 0.0),
            Complex32::new(3.0, 0.0),
            Complex32::new(5.0, 2.0),
            Complex32::new(7.0, 4.0),
        ];
        let output = dn.process(input);
        assert_eq!(output.len(), 2);
        assert_eq!(output[0], Complex32::new(2.0, 0.0));
        assert_eq!(output[1], Complex32::new(6.0, 3.0));
    }

    #[test]
    fn test_odd_tail_carried_across_blocks() {
        let mut dn = Downsampler::new(1, FcPos::Center).unwrap();
        let first = dn.process(ramp(5));
        // (0,1) (2,3) averaged; sample 4 carried.
        assert_eq!(first.len(), 2);

        let second = dn.process(vec![Complex32::new(6.0, -6.0)]);
        assert_eq!(second.len(), 1);
        // carried sample 4 pairs with the next block's first sample
        assert_eq!(second[0], Complex32::new(5.0, -5.0));
    }

    #[test]
    fn test_quarter_shift_phase_continuity() {
        // Rotating a constant by +fs/4 yields the cycle 1, j, -1, -j
        // regardless of block boundaries.
        let mut dn = Downsampler::new(0, FcPos::Infra).unwrap();
        let one = Complex32::new(1.0, 0.0);
        let mut rotated: Vec<Complex32> = Vec::new();
        // decim=0 bypasses the shift, so drive the rotator directly.
        let mut first = vec![one; 3];
        dn.quarter_shift(&mut first, 1);
        rotated.extend_from_slice(&first);
        let mut second = vec![one; 3];
        dn.quarter_shift(&mut second, 1);
        rotated.extend_from_slice(&second);

        let expected = [
            Complex32::new(1.0, 0.0),
            Complex32::new(0.0, 1.0),
            Complex32::new(-1.0, 0.0),
            Complex32::new(0.0, -1.0),
            Complex32::new(1.0, 0.0),
            Complex32::new(0.0, 1.0),
        ];
        assert_eq!(rotated, expected);
    }

    #[test]
    fn test_supra_shift_rotates_other_way() {
        let mut dn = Downsampler::new(0, FcPos::Supra).unwrap();
        let mut block = vec![Complex32::new(1.0, 0.0); 4];
        dn.quarter_shift(&mut block, 3);
        assert_eq!(block[1], Complex32::new(0.0, -1.0));
        assert_eq!(block[2], Complex32::new(-1.0, 0.0));
        assert_eq!(block[3], Complex32::new(0.0, 1.0));
    }

    #[test]
    fn test_decim_out_of_range_rejected() {
        assert!(Downsampler::new(MAX_DECIM + 1, FcPos::Center).is_err());
        assert!(Downsampler::new(MAX_DECIM, FcPos::Center).is_ok());
    }
}
