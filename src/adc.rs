//! The ADC collaborator contract.
//!
//! The entropy pipeline never talks to hardware directly: it drives a
//! `dyn Adc` that owns a shared 64-slot sample buffer and fills some prefix
//! of it on request. Production targets back this with a DMA-driven
//! converter; this crate ships a host-random stand-in for manual testing
//! and a scripted stand-in for deterministic unit tests.

use thiserror::Error;

pub const ADC_BUF_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum AdcError {
    #[error("ADC conversion failed")]
    ConversionFailed,
    #[error("ADC not started")]
    NotStarted,
}

/// Contract required of the per-target ADC driver.
///
/// `start_conversion(offset, count)` requests that `count` raw samples be
/// written into `adc_buf[offset..offset + count]`; the result becomes
/// visible to `samples()` only after `wait_completion()` returns `Ok`.
pub trait Adc: Send {
    fn init(&mut self) -> Result<(), AdcError>;
    fn start(&mut self);
    fn start_conversion(&mut self, offset: usize, count: usize);
    fn wait_completion(&mut self) -> Result<(), AdcError>;
    fn stop(&mut self);
    fn samples(&self) -> &[u32; ADC_BUF_LEN];
}

/// A host-random stand-in: draws fresh bytes from the OS RNG on every
/// conversion instead of sampling a noisy analog input. Suitable for
/// manual exercise of the driver on a development host, never a source of
/// certified entropy.
pub struct NoiseAdc {
    buf: [u32; ADC_BUF_LEN],
    started: bool,
}

impl Default for NoiseAdc {
    fn default() -> Self { NoiseAdc { buf: [0; ADC_BUF_LEN], started: false } }
}

impl Adc for NoiseAdc {
    fn init(&mut self) -> Result<(), AdcError> { Ok(()) }

    fn start(&mut self) { self.started = true; }

    fn start_conversion(&mut self, offset: usize, count: usize) {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        for slot in &mut self.buf[offset..offset + count] {
            *slot = rng.next_u32() & 0xff;
        }
    }

    fn wait_completion(&mut self) -> Result<(), AdcError> {
        if self.started { Ok(()) } else { Err(AdcError::NotStarted) }
    }

    fn stop(&mut self) { self.started = false; }

    fn samples(&self) -> &[u32; ADC_BUF_LEN] { &self.buf }
}

/// A scripted ADC for deterministic tests: replays a fixed sample value
/// (or a caller-supplied generator) and optionally fails the Nth
/// conversion to exercise the pipeline's error-recovery branch.
pub struct ScriptedAdc {
    buf: [u32; ADC_BUF_LEN],
    pattern: Vec<u8>,
    /// RAW_DATA-style ADC backends deliver pre-packed little-endian words
    /// rather than one raw reading per slot; set for scenarios exercising
    /// that mode.
    packed: bool,
    fail_after: Option<usize>,
    conversions: usize,
}

impl ScriptedAdc {
    pub fn zeros() -> Self {
        ScriptedAdc {
            buf: [0; ADC_BUF_LEN],
            pattern: vec![0],
            packed: false,
            fail_after: None,
            conversions: 0,
        }
    }

    /// Every conversion refills its target range by cycling through `bytes`,
    /// one byte per sample slot.
    pub fn with_pattern(bytes: &[u8]) -> Self {
        ScriptedAdc {
            buf: [0; ADC_BUF_LEN],
            pattern: bytes.to_vec(),
            packed: false,
            fail_after: None,
            conversions: 0,
        }
    }

    /// Every conversion refills its target range by cycling through `bytes`,
    /// packing four bytes little-endian into each word slot. Models an ADC
    /// backend whose conversions already yield packed words, as RAW_DATA
    /// mode assumes.
    pub fn with_packed_pattern(bytes: &[u8]) -> Self {
        ScriptedAdc {
            buf: [0; ADC_BUF_LEN],
            pattern: bytes.to_vec(),
            packed: true,
            fail_after: None,
            conversions: 0,
        }
    }

    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl Adc for ScriptedAdc {
    fn init(&mut self) -> Result<(), AdcError> { Ok(()) }

    fn start(&mut self) {}

    fn start_conversion(&mut self, offset: usize, count: usize) {
        if self.packed {
            for (i, slot) in self.buf[offset..offset + count].iter_mut().enumerate() {
                let mut bytes = [0u8; 4];
                for (j, b) in bytes.iter_mut().enumerate() {
                    *b = self.pattern[(i * 4 + j) % self.pattern.len()];
                }
                *slot = u32::from_le_bytes(bytes);
            }
        } else {
            for (i, slot) in self.buf[offset..offset + count].iter_mut().enumerate() {
                *slot = self.pattern[i % self.pattern.len()] as u32;
            }
        }
    }

    fn wait_completion(&mut self) -> Result<(), AdcError> {
        self.conversions += 1;
        if Some(self.conversions) == self.fail_after { Err(AdcError::ConversionFailed) } else { Ok(()) }
    }

    fn stop(&mut self) {}

    fn samples(&self) -> &[u32; ADC_BUF_LEN] { &self.buf }
}
