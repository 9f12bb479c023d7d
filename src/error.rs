use crate::adc::AdcError;

/// Construction-time and API-misuse failures. Transient health-test taint
/// is a separate, non-fatal mechanism (see [`crate::health`]) and never
/// surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum NeugError {
    #[error("ring buffer size must be nonzero")]
    InvalidRingSize,
    #[error("ADC failed to initialize: {0}")]
    AdcInit(#[from] AdcError),
    #[error("producer thread panicked while holding shared state")]
    ProducerPoisoned,
}
