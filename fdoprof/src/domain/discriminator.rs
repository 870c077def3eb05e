//! DWARF discriminator component encoding.
//!
//! Compilers pack up to three values into one line-table discriminator:
//! the base discriminator (sub-line disambiguation), a duplication factor
//! (how many times the source line was replicated, e.g. by unrolling) and a
//! copy id. Each component uses a prefix encoding: a set low bit means the
//! component is absent (one bit wide), otherwise the value follows in a
//! 7-bit short form or a 14-bit extended form selected by bit 5 of the
//! shifted value.

/// Decodes one prefix-encoded component from the low bits of `raw`.
fn decode_component(raw: u32) -> u32 {
    if raw & 1 != 0 {
        return 0;
    }
    let v = raw >> 1;
    if v & 0x20 != 0 {
        ((v >> 1) & 0xfe0) | (v & 0x1f)
    } else {
        v & 0x1f
    }
}

/// Skips past the first component of `raw`.
fn next_component(raw: u32) -> u32 {
    if raw & 1 != 0 {
        raw >> 1
    } else if raw & 0x40 != 0 {
        raw >> 14
    } else {
        raw >> 7
    }
}

/// Encodes one component; values are limited to 12 bits.
fn encode_component(value: u32) -> u32 {
    debug_assert!(value < 0x1000, "discriminator component out of range");
    if value == 0 {
        1
    } else if value <= 0x1f {
        value << 1
    } else {
        (((value & 0xfe0) << 1) | (value & 0x1f) | 0x20) << 1
    }
}

fn component_width(encoded: u32) -> u32 {
    if encoded & 1 != 0 {
        1
    } else if encoded & 0x40 != 0 {
        14
    } else {
        7
    }
}

/// The sub-line disambiguator carried in the low component.
#[must_use]
pub fn base_discriminator(discriminator: u32) -> u32 {
    decode_component(discriminator)
}

/// The replication multiplicity of the instruction's source line.
/// An absent component means the line exists exactly once.
#[must_use]
pub fn duplication_factor(discriminator: u32) -> u32 {
    let factor = decode_component(next_component(discriminator));
    if factor == 0 {
        1
    } else {
        factor
    }
}

/// Packs `(base, duplication_factor, copy_id)` into a raw discriminator.
/// Trailing absent components are omitted entirely, matching what
/// compilers emit.
#[must_use]
pub fn encode_discriminator(base: u32, dup_factor: u32, copy_id: u32) -> u32 {
    let dup = if dup_factor <= 1 { 0 } else { dup_factor };
    let mut raw = encode_component(base);
    if dup == 0 && copy_id == 0 {
        return if base == 0 { 0 } else { raw };
    }
    let mut shift = component_width(raw);
    let dup_encoded = encode_component(dup);
    raw |= dup_encoded << shift;
    if copy_id != 0 {
        shift += component_width(dup_encoded);
        raw |= encode_component(copy_id) << shift;
    }
    raw
}
