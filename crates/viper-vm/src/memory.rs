//! Addressable memory (part of C8's memory semantics). Every `alloca`
//! allocates from the current frame's own region, freed on `ret` (or when a
//! trap unwinds past the frame); `Viper.Memory.Alloc` allocates from one
//! permanent region that outlives every frame, the closest this core comes
//! to a heap. Pointers encode `(region << 32) | offset`; region 0 is the
//! permanent heap, others are per-frame arenas handed out by
//! `new_frame_region`.
//!
//! `str`/`error`/`resumetok` are opaque handle types (§4.9's "ptr/str as
//! opaque pointers") — they are never decomposed into raw bytes, so a
//! `store` of one of them records it in a side table keyed by the exact
//! address instead of serializing into the byte buffer.

use rustc_hash::FxHashMap;
use viper_il::Ty;
use viper_rt::TrapKind;

use crate::value::RtValue;

const HEAP_REGION: u64 = 0;

#[derive(Default)]
pub struct Memory {
    regions: FxHashMap<u64, Vec<u8>>,
    objects: FxHashMap<u64, RtValue>,
    next_region: u64,
}

fn encode(region: u64, offset: u64) -> u64 {
    (region << 32) | offset
}

fn decode(addr: u64) -> (u64, u64) {
    (addr >> 32, addr & 0xffff_ffff)
}

impl Memory {
    pub fn new() -> Self {
        let mut m = Self { regions: FxHashMap::default(), objects: FxHashMap::default(), next_region: 1 };
        // Offset 0 is reserved in every region so a valid address is never
        // numerically equal to the null pointer (address 0).
        m.regions.insert(HEAP_REGION, vec![0u8]);
        m
    }

    pub fn new_frame_region(&mut self) -> u64 {
        let id = self.next_region;
        self.next_region += 1;
        self.regions.insert(id, vec![0u8]);
        id
    }

    pub fn free_frame_region(&mut self, region: u64) {
        self.regions.remove(&region);
        self.objects.retain(|&addr, _| decode(addr).0 != region);
    }

    pub fn region_len(&self, region: u64) -> usize {
        self.regions.get(&region).map(|v| v.len()).unwrap_or(0)
    }

    /// Frees everything allocated in `region` since `mark` — the "free
    /// allocas allocated since the saved mark" step of handler dispatch.
    pub fn truncate_region(&mut self, region: u64, mark: usize) {
        if let Some(buf) = self.regions.get_mut(&region) {
            buf.truncate(mark.max(1));
        }
        self.objects.retain(|&addr, _| decode(addr).0 != region || (decode(addr).1 as usize) < mark);
    }

    pub fn alloc(&mut self, region: u64, size: usize) -> u64 {
        let buf = self.regions.entry(region).or_insert_with(|| vec![0u8]);
        let offset = buf.len() as u64;
        buf.resize(buf.len() + size.max(1), 0);
        encode(region, offset)
    }

    pub fn alloc_heap(&mut self, size: usize) -> u64 {
        self.alloc(HEAP_REGION, size)
    }

    /// `gep`: raw byte arithmetic, no bounds checking — a later `load`/
    /// `store` against a wandered-off address is what catches misuse.
    pub fn gep(addr: u64, delta: i64) -> u64 {
        addr.wrapping_add(delta as u64)
    }

    pub fn store(&mut self, addr: u64, ty: Ty, value: RtValue) -> Result<(), TrapKind> {
        if addr == 0 {
            return Err(TrapKind::NullPointer);
        }
        let (region, offset) = decode(addr);
        if (offset as usize) % ty.align() != 0 {
            return Err(TrapKind::Misaligned);
        }
        match ty {
            Ty::Str | Ty::Error | Ty::ResumeTok => {
                self.bounds_check(region, offset, ty.size())?;
                self.objects.insert(addr, value);
                Ok(())
            }
            _ => {
                let bytes = encode_numeric(ty, &value);
                let buf = self.region_mut(region)?;
                let off = offset as usize;
                if off + bytes.len() > buf.len() {
                    return Err(TrapKind::InvalidOperation);
                }
                buf[off..off + bytes.len()].copy_from_slice(&bytes);
                Ok(())
            }
        }
    }

    pub fn load(&self, addr: u64, ty: Ty) -> Result<RtValue, TrapKind> {
        if addr == 0 {
            return Err(TrapKind::NullPointer);
        }
        let (region, offset) = decode(addr);
        if (offset as usize) % ty.align() != 0 {
            return Err(TrapKind::Misaligned);
        }
        match ty {
            Ty::Str | Ty::Error | Ty::ResumeTok => {
                self.bounds_check(region, offset, ty.size())?;
                self.objects.get(&addr).cloned().ok_or(TrapKind::InvalidOperation)
            }
            _ => {
                let buf = self.regions.get(&region).ok_or(TrapKind::InvalidOperation)?;
                let off = offset as usize;
                let size = ty.size();
                if off + size > buf.len() {
                    return Err(TrapKind::InvalidOperation);
                }
                Ok(decode_numeric(ty, &buf[off..off + size]))
            }
        }
    }

    fn region_mut(&mut self, region: u64) -> Result<&mut Vec<u8>, TrapKind> {
        self.regions.get_mut(&region).ok_or(TrapKind::InvalidOperation)
    }

    fn bounds_check(&self, region: u64, offset: u64, size: usize) -> Result<(), TrapKind> {
        let buf = self.regions.get(&region).ok_or(TrapKind::InvalidOperation)?;
        if offset as usize + size > buf.len() {
            return Err(TrapKind::InvalidOperation);
        }
        Ok(())
    }
}

fn encode_numeric(ty: Ty, v: &RtValue) -> Vec<u8> {
    match ty {
        Ty::I1 => vec![v.as_bool() as u8],
        Ty::I16 => (v.as_i64() as i16).to_le_bytes().to_vec(),
        Ty::I32 => (v.as_i64() as i32).to_le_bytes().to_vec(),
        Ty::I64 => v.as_i64().to_le_bytes().to_vec(),
        Ty::F64 => v.as_f64().to_le_bytes().to_vec(),
        Ty::Ptr => v.as_ptr().to_le_bytes().to_vec(),
        other => panic!("encode_numeric called with opaque type {other}"),
    }
}

fn decode_numeric(ty: Ty, bytes: &[u8]) -> RtValue {
    match ty {
        Ty::I1 => RtValue::I1(bytes[0] != 0),
        Ty::I16 => RtValue::I16(i16::from_le_bytes(bytes.try_into().unwrap())),
        Ty::I32 => RtValue::I32(i32::from_le_bytes(bytes.try_into().unwrap())),
        Ty::I64 => RtValue::I64(i64::from_le_bytes(bytes.try_into().unwrap())),
        Ty::F64 => RtValue::F64(f64::from_le_bytes(bytes.try_into().unwrap())),
        Ty::Ptr => RtValue::Ptr(u64::from_le_bytes(bytes.try_into().unwrap())),
        other => panic!("decode_numeric called with opaque type {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_round_trips_an_i64() {
        let mut m = Memory::new();
        let p = m.alloc_heap(8);
        m.store(p, Ty::I64, RtValue::I64(42)).unwrap();
        assert_eq!(m.load(p, Ty::I64).unwrap(), RtValue::I64(42));
    }

    #[test]
    fn misaligned_i64_access_traps() {
        let mut m = Memory::new();
        let p = m.alloc_heap(16);
        let misaligned = p + 1;
        assert_eq!(m.store(misaligned, Ty::I64, RtValue::I64(1)), Err(TrapKind::Misaligned));
    }

    #[test]
    fn null_access_traps() {
        let m = Memory::new();
        assert_eq!(m.load(0, Ty::I64), Err(TrapKind::NullPointer));
    }

    #[test]
    fn freeing_a_frame_region_invalidates_its_addresses() {
        let mut m = Memory::new();
        let region = m.new_frame_region();
        let p = m.alloc(region, 8);
        m.store(p, Ty::I64, RtValue::I64(7)).unwrap();
        m.free_frame_region(region);
        assert_eq!(m.load(p, Ty::I64), Err(TrapKind::InvalidOperation));
    }
}
