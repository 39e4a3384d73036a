//! Per-substructure conversion, one version step at a time.
//!
//! Mirrors `atopconvert.c`'s `structconv` function-pointer field in `struct
//! sconvstruct`/`struct tconvstruct`: every substructure of a sample (cpu, memory,
//! network, interface, disk, per-task gen/cpu/mem/dsk/net, …) names either a specific
//! converter or [`Identity`], expressed here as a trait object rather than a raw `fn`
//! pointer (DESIGN.md: "tagged sum types ... no reflection necessary").

use crate::core::errors::Result;

/// Converts one substructure instance from an old byte layout to a new one, for a
/// single version step. `old` and `new` are already sized to `old_size`/`new_size`
/// respectively; `new` is pre-zeroed by the caller before every invocation (matching
/// `memset(convs[i+1].sstat, 0, ...)` / the per-task `memset` in `convert_samples()`),
/// so a converter that only copies a prefix leaves the remainder correctly zeroed.
pub trait SubstructConverter: Send + Sync {
    /// Apply the conversion. `old.len() == old_size`, `new.len() == new_size`; both
    /// are asserted by [`crate::migrate::chain::VersionChain::migrate`] before this is
    /// called, so implementations can index directly.
    ///
    /// # Errors
    ///
    /// Implementations may reject malformed input, though spec.md's example
    /// converters (widen-array, split-scalar, rename-field, remove-and-add-field) are
    /// all pure byte copies that cannot fail once the input is the declared size.
    fn convert(&self, old: &[u8], new: &mut [u8]) -> Result<()>;
}

/// Byte-for-byte copy of `min(old.len(), new.len())` bytes (`justcopy()` in the
/// reference implementation): the converter for every substructure that did not
/// change shape between two adjacent schema versions. Any extra bytes in a larger
/// `new` stay zeroed, since the caller pre-zeroes `new` before dispatch.
pub struct Identity;

impl SubstructConverter for Identity {
    fn convert(&self, old: &[u8], new: &mut [u8]) -> Result<()> {
        let n = old.len().min(new.len());
        new[..n].copy_from_slice(&old[..n]);
        Ok(())
    }
}

/// Widen a fixed-size array embedded after a scalar header: copy the header fields
/// verbatim, then copy the old array's `old_count` elements of `elem_size` bytes each
/// into the start of the new (larger) array. Grounded in `sdsk_to_21()`'s
/// `memcpy(d21->dsk, d20->dsk, sizeof d20->dsk)` after copying the scalar `ndsk`/
/// `nmdd`/`nlvm` header fields.
pub struct WidenArray {
    pub header_len: usize,
    pub elem_size: usize,
    pub old_count: usize,
}

impl SubstructConverter for WidenArray {
    fn convert(&self, old: &[u8], new: &mut [u8]) -> Result<()> {
        let header_len = self.header_len.min(old.len()).min(new.len());
        new[..header_len].copy_from_slice(&old[..header_len]);
        let array_len = self.elem_size * self.old_count;
        let old_array = &old[self.header_len..(self.header_len + array_len).min(old.len())];
        let copy_len = old_array.len().min(new.len().saturating_sub(header_len));
        new[header_len..header_len + copy_len].copy_from_slice(&old_array[..copy_len]);
        Ok(())
    }
}

/// Split one old scalar field into two new fields that both start out equal to it
/// (the "speed"/"speed_prior" pair in `sint_to_22()`): copy the prefix verbatim, then
/// duplicate the field at `old_offset` into both `new_offset_a` and `new_offset_b`.
pub struct SplitScalar {
    pub prefix_len: usize,
    pub field_size: usize,
    pub old_offset: usize,
    pub new_offset_a: usize,
    pub new_offset_b: usize,
}

impl SubstructConverter for SplitScalar {
    fn convert(&self, old: &[u8], new: &mut [u8]) -> Result<()> {
        let prefix_len = self.prefix_len.min(old.len()).min(new.len());
        new[..prefix_len].copy_from_slice(&old[..prefix_len]);
        if old.len() >= self.old_offset + self.field_size {
            let field = old[self.old_offset..self.old_offset + self.field_size].to_vec();
            if new.len() >= self.new_offset_a + self.field_size {
                new[self.new_offset_a..self.new_offset_a + self.field_size].copy_from_slice(&field);
            }
            if new.len() >= self.new_offset_b + self.field_size {
                new[self.new_offset_b..self.new_offset_b + self.field_size].copy_from_slice(&field);
            }
        }
        Ok(())
    }
}

/// Reinterpret the old field at `old_offset` as the new field at `new_offset`
/// (`tgen_to_22()`'s `g22->ctid = g21->envid`): copy a verbatim prefix, then relocate
/// one field. Everything past the prefix and relocated field in `new` stays zeroed.
pub struct RenameField {
    pub prefix_len: usize,
    pub field_size: usize,
    pub old_offset: usize,
    pub new_offset: usize,
}

impl SubstructConverter for RenameField {
    fn convert(&self, old: &[u8], new: &mut [u8]) -> Result<()> {
        let prefix_len = self.prefix_len.min(old.len()).min(new.len());
        new[..prefix_len].copy_from_slice(&old[..prefix_len]);
        if old.len() >= self.old_offset + self.field_size && new.len() >= self.new_offset + self.field_size {
            new[self.new_offset..self.new_offset + self.field_size]
                .copy_from_slice(&old[self.old_offset..self.old_offset + self.field_size]);
        }
        Ok(())
    }
}
