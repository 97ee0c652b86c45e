//! Streaming CRC-32 used for data-integrity checks on persisted records.
//!
//! The accumulator convention is inherited from the configuration store's
//! historical format: the value held between calls is the bitwise complement
//! of the running CRC, and `update` re-applies the complement on entry as
//! well as before returning. Callers chaining calls over multiple buffers
//! must seed the very first call with `0` and thereafter feed back the value
//! returned by the previous call unchanged.

/// CRC-32 polynomial (Ethernet, ZIP) in reversed bit order.
const POLYNOMIAL: u32 = 0xEDB8_8320;

/// Folds `buffer` into the checksum state and returns the new state.
///
/// The returned value already carries the final complement, so it is directly
/// comparable against standard CRC-32 reference values when the whole input
/// was processed in one call.
#[must_use]
pub fn update(previous_state: u32, buffer: &[u8]) -> u32 {
    let mut crc = !previous_state;
    for &byte in buffer {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 0 {
                crc >> 1
            } else {
                (crc >> 1) ^ POLYNOMIAL
            };
        }
    }
    !crc
}
