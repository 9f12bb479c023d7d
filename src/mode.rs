/// Operating mode of the entropy pipeline. Process-wide, mutated only
/// through the mode-select handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
#[repr(u8)]
pub enum Mode {
    Conditioned = 0,
    Raw = 1,
    RawData = 2,
}

impl Default for Mode {
    fn default() -> Self { Mode::Conditioned }
}
