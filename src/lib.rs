//! True random number generator core.
//!
//! An ADC-driven entropy source is whitened with a CRC-32 mixing step,
//! screened by continuous NIST SP 800-90B health tests, and conditioned
//! with SHA-256 into full-entropy 256-bit blocks. A dedicated producer
//! thread runs the pipeline and fills a bounded ring buffer; consumers
//! draw 32-bit words from [`Neug`].
//!
//! ```no_run
//! use neug::{Neug, NeugConfig, Mode};
//! use neug::adc::NoiseAdc;
//! use neug::device_id::FixedDeviceId;
//!
//! let config = NeugConfig {
//!     ring_size: 32,
//!     initial_mode: Mode::Conditioned,
//!     adc: Box::new(NoiseAdc::default()),
//!     device_id: Box::new(FixedDeviceId([0xAA; 20])),
//! };
//! let mut neug = Neug::new(config).unwrap();
//! let word = neug.get(true);
//! println!("{word:#010x}");
//! neug.fini();
//! ```

pub mod adc;
pub mod crc32;
pub mod device_id;
mod engine;
pub mod error;
pub mod health;
pub mod mode;
mod pipeline;
mod ring_buffer;

pub use engine::{Neug, NeugConfig};
pub use error::NeugError;
pub use health::ErrorFlags;
pub use mode::Mode;
