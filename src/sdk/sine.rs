// Reference sine oscillator
//
// One input (frequency in Hz), one output. Phase starts at 0 and carries over
// between blocks; a non-positive or missing frequency falls back to 440 Hz.

use crate::module::abi::Sample;
use crate::module::registry;
use crate::sdk::{Channels, ChannelsMut, DspModule, InitContext};
use std::f64::consts::TAU;
use std::ffi::CStr;

pub const DEFAULT_FREQUENCY: f32 = 440.0;

pub struct Sine {
    phase: f64,
    samplerate: f64,
}

impl Sine {
    /// Current phase in cycles, in `[0, 1)`
    pub fn phase(&self) -> f64 {
        self.phase
    }
}

impl DspModule for Sine {
    const INPUT_NAMES: &'static CStr = c"freq";
    const OUTPUT_NAMES: &'static CStr = c"out";
    const DEFAULTS: &'static [f32] = &[DEFAULT_FREQUENCY];

    fn new() -> Self {
        Self {
            phase: 0.0,
            samplerate: 0.0,
        }
    }

    fn init<S: Sample>(&mut self, ctx: InitContext<'_, S>) -> bool {
        // Fall back to the host environment when no rate was passed
        let samplerate = if ctx.samplerate > 0.0 {
            ctx.samplerate
        } else {
            registry::global().samplerate()
        };

        if !(samplerate.is_finite() && samplerate > 0.0) {
            registry::global().print_str("sine: invalid sample rate\n");
            return false;
        }

        self.samplerate = samplerate;
        self.phase = 0.0;
        true
    }

    fn perform<S: Sample>(&mut self, ins: Channels<'_, S>, mut outs: ChannelsMut<'_, S>, _bufsize: usize) {
        let freq = ins.get(0);
        let Some(out) = outs.get_mut(0) else {
            return;
        };

        for (i, sample) in out.iter_mut().enumerate() {
            let hz = freq
                .and_then(|freq| freq.get(i))
                .and_then(|hz| hz.to_f64())
                .filter(|hz| *hz > 0.0)
                .unwrap_or(DEFAULT_FREQUENCY as f64);

            *sample = num_traits::cast::<f64, S>((self.phase * TAU).sin()).unwrap_or(S::ZERO);
            self.phase = (self.phase + hz / self.samplerate).fract();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::abi::BufferInterface;

    fn init_at(sine: &mut Sine, samplerate: f64) -> bool {
        let ctx = InitContext::<f32> {
            inputs: unsafe { Channels::from_raw(std::ptr::null(), 0, 0) },
            bufsize: 64,
            samplerate,
            buffer_interface: BufferInterface::NONE,
        };
        sine.init(ctx)
    }

    #[test]
    fn test_starts_at_phase_zero() {
        let mut sine = Sine::new();
        assert!(init_at(&mut sine, 48000.0));

        let freq = [0.0f32; 4];
        let mut out = [1.0f32; 4];
        let freq_ptrs = [freq.as_ptr() as *mut f32];
        let out_ptrs = [out.as_mut_ptr()];

        unsafe {
            sine.perform(
                Channels::from_raw(freq_ptrs.as_ptr(), 1, 4),
                ChannelsMut::from_raw(out_ptrs.as_ptr(), 1, 4),
                4,
            );
        }

        let step = 440.0 / 48000.0;
        assert_eq!(out[0], 0.0);
        for (i, sample) in out.iter().enumerate() {
            let expected = ((i as f64 * step) * TAU).sin() as f32;
            assert!((sample - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_phase_persists_across_blocks() {
        let mut sine = Sine::new();
        assert!(init_at(&mut sine, 44100.0));

        let mut out = [0.0f64; 32];
        let out_ptrs = [out.as_mut_ptr()];
        for _ in 0..3 {
            unsafe {
                sine.perform(
                    Channels::from_raw(std::ptr::null(), 0, 32),
                    ChannelsMut::from_raw(out_ptrs.as_ptr(), 1, 32),
                    32,
                );
            }
        }

        let expected = (96.0 * 440.0 / 44100.0f64).fract();
        assert!((sine.phase() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_invalid_samplerate() {
        let mut sine = Sine::new();
        assert!(!init_at(&mut sine, f64::NAN));
        assert!(!init_at(&mut sine, -1.0));
    }
}
