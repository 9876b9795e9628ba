//! Builds a compact per-method reference-register map from a finished
//! verification pass's saved [`RegisterTable`] lines, for precise
//! stack-scanning GC at the addresses the verifier already treats as
//! interesting. Only produced when [`crate::context::PrepareConfig`]'s
//! `generate_register_maps` is set, since it requires the verifier to have
//! run under [`crate::regtable::InterestingAddressPolicy::Every`].

use dexprep_image::container::OptChunk;
use dexprep_types::InsnAddr;

use crate::lattice::RegisterType;
use crate::regtable::RegisterTable;

/// The `OptChunk::chunk_type` tag a register map is stored under in the
/// cache container's chunked optimized-data region.
pub const REGISTER_MAP_CHUNK_TYPE: u32 = 0x5245_474D; // "REGM"

/// The set of registers holding a reference-like value at one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcPointEntry {
    pub addr: InsnAddr,
    pub reference_registers: Vec<u16>,
}

/// A method's full reference-register map: one [`GcPointEntry`] per saved
/// address, in address order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    pub register_count: usize,
    pub entries: Vec<GcPointEntry>,
}

/// True if a register holding `ty` needs to be reported to the collector.
fn is_reference_like(ty: &RegisterType) -> bool {
    matches!(
        ty,
        RegisterType::Reference(_)
            | RegisterType::Null
            | RegisterType::UninitRef(_)
            | RegisterType::UninitThis(_)
    )
}

/// Derives a [`RegisterMap`] from every line the verifier saved for this
/// method. Callers are responsible for having run verification under
/// [`crate::regtable::InterestingAddressPolicy::Every`] first — a table
/// built under the sparser policy just yields a sparser (but still valid)
/// map, covering only branch targets and handler entries.
pub fn build_register_map(table: &RegisterTable) -> RegisterMap {
    let entries = table
        .saved_entries()
        .map(|(addr, line)| {
            let mut reference_registers = Vec::new();
            for reg in 0..line.len() as u16 {
                if line.get(reg).is_some_and(is_reference_like) {
                    reference_registers.push(reg);
                }
            }
            GcPointEntry {
                addr,
                reference_registers,
            }
        })
        .collect();
    RegisterMap {
        register_count: table.register_count(),
        entries,
    }
}

fn pack_bits(register_count: usize, refs: &[u16]) -> Vec<u8> {
    let mut bits = vec![0u8; register_count.div_ceil(8)];
    for &r in refs {
        let idx = r as usize;
        bits[idx / 8] |= 1 << (idx % 8);
    }
    bits
}

/// Serializes a method's register map into an [`OptChunk`] for embedding
/// in the cache container, keyed by the method's raw pool index so the
/// runtime can look it up without re-decoding the whole aux-data region.
pub fn encode_register_map(method_idx: u32, map: &RegisterMap) -> OptChunk {
    let mut payload = Vec::with_capacity(12 + map.entries.len() * 4);
    payload.extend_from_slice(&method_idx.to_le_bytes());
    payload.extend_from_slice(&(map.register_count as u32).to_le_bytes());
    payload.extend_from_slice(&(map.entries.len() as u32).to_le_bytes());
    for entry in &map.entries {
        payload.extend_from_slice(&entry.addr.to_le_bytes());
        payload.extend_from_slice(&pack_bits(map.register_count, &entry.reference_registers));
    }
    OptChunk {
        chunk_type: REGISTER_MAP_CHUNK_TYPE,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regtable::InterestingAddressPolicy;

    #[test]
    fn build_register_map_collects_reference_registers() {
        use dexprep_types::TypeId;

        let mut table = RegisterTable::new(3, InterestingAddressPolicy::Every);
        table.work_mut().set(0, RegisterType::Integer);
        table.work_mut().set(1, RegisterType::Reference(TypeId::new(1)));
        table.work_mut().set(2, RegisterType::Null);
        table.merge_into(4);

        let map = build_register_map(&table);
        assert_eq!(map.entries.len(), 1);
        assert_eq!(map.entries[0].addr, 4);
        assert_eq!(map.entries[0].reference_registers, vec![1, 2]);
    }

    #[test]
    fn encode_register_map_packs_reference_bits() {
        let map = RegisterMap {
            register_count: 10,
            entries: vec![GcPointEntry {
                addr: 6,
                reference_registers: vec![0, 9],
            }],
        };
        let chunk = encode_register_map(42, &map);
        assert_eq!(chunk.chunk_type, REGISTER_MAP_CHUNK_TYPE);
        // method_idx(4) + register_count(4) + entry_count(4) + addr(4) + 2 bitmap bytes
        assert_eq!(chunk.payload.len(), 4 + 4 + 4 + 4 + 2);
        let bitmap = &chunk.payload[16..18];
        assert_eq!(bitmap[0] & 0x01, 0x01); // register 0
        assert_eq!(bitmap[1] & 0x02, 0x02); // register 9
    }
}
