//! Minimal ELF32 program-header loader.
//!
//! This is the one contract `proc_add` needs from "an ELF loader": hand it
//! a process image and a directory to map into, get back the entry point
//! and the address one past the image's last mapped byte (`heap_break`
//! starts there). Section headers, relocations, dynamic linking and
//! anything else an ELF file can carry are out of scope; only `PT_LOAD`
//! program headers are honored, which is all a static, position-dependent
//! user binary produced for this kernel would ever contain.

use alloc::vec;

use crate::lib::error::{KernelError, KResult};
use crate::mm::block::align_up;
use crate::mm::paging::{self, DirId, PageFlags, PAGE_SIZE};
use crate::mm::phys::PHYS;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

pub struct LoadedImage {
    pub entry_point: u32,
    pub end_point: u32,
}

fn read_u16(image: &[u8], offset: usize) -> KResult<u16> {
    let bytes: [u8; 2] = image
        .get(offset..offset + 2)
        .and_then(|s| s.try_into().ok())
        .ok_or(KernelError::InvalidParam)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(image: &[u8], offset: usize) -> KResult<u32> {
    let bytes: [u8; 4] = image
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(KernelError::InvalidParam)?;
    Ok(u32::from_le_bytes(bytes))
}

struct ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
}

const PF_W: u32 = 1 << 1;

/// Loads `image`'s `PT_LOAD` segments into `dir_id`, mapping freshly
/// allocated, zero-filled frames and copying each segment's file bytes
/// in, leaving the memsz-filesz tail (bss) zeroed.
pub fn load(image: &[u8], dir_id: DirId) -> KResult<LoadedImage> {
    if image.len() < 52 || image[0..4] != ELF_MAGIC {
        return Err(KernelError::InvalidParam);
    }
    if image[4] != 1 {
        // EI_CLASS: only 32-bit objects are meaningful to this kernel.
        return Err(KernelError::InvalidParam);
    }
    let e_type = read_u16(image, 16)?;
    if e_type != ET_EXEC {
        return Err(KernelError::InvalidParam);
    }
    let e_entry = read_u32(image, 24)?;
    let e_phoff = read_u32(image, 28)? as usize;
    let e_phentsize = read_u16(image, 42)? as usize;
    let e_phnum = read_u16(image, 44)?;

    let mut end_point: u32 = 0;

    for i in 0..e_phnum as usize {
        let base = e_phoff + i * e_phentsize;
        let ph = ProgramHeader {
            p_type: read_u32(image, base)?,
            p_offset: read_u32(image, base + 4)?,
            p_vaddr: read_u32(image, base + 8)?,
            p_filesz: read_u32(image, base + 16)?,
            p_memsz: read_u32(image, base + 20)?,
            p_flags: read_u32(image, base + 24)?,
        };
        if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
            continue;
        }

        let seg_start = ph.p_vaddr & !(PAGE_SIZE - 1);
        let in_page_offset = ph.p_vaddr - seg_start;
        let span = align_up(in_page_offset + ph.p_memsz, PAGE_SIZE);
        let writable = ph.p_flags & PF_W != 0;

        let frame = PHYS
            .lock()
            .as_mut()
            .ok_or(KernelError::OutOfMemory)?
            .alloc_frames(span / PAGE_SIZE)?;

        unsafe {
            let dst = frame as *mut u8;
            core::ptr::write_bytes(dst, 0, span as usize);
            if ph.p_filesz > 0 {
                let src = image
                    .get(ph.p_offset as usize..(ph.p_offset + ph.p_filesz) as usize)
                    .ok_or(KernelError::InvalidParam)?;
                core::ptr::copy_nonoverlapping(
                    src.as_ptr(),
                    dst.add(in_page_offset as usize),
                    src.len(),
                );
            }
        }

        paging::map(
            dir_id,
            seg_start,
            frame,
            span,
            false,
            PageFlags::attrs(true, writable, false),
        )?;

        end_point = end_point.max(ph.p_vaddr + ph.p_memsz);
    }

    if end_point == 0 {
        return Err(KernelError::InvalidParam);
    }

    Ok(LoadedImage {
        entry_point: e_entry,
        end_point,
    })
}

/// Builds a tiny single-segment ELF32 image in memory, for tests that
/// need something `load` will accept without shipping a real binary.
#[cfg(test)]
fn tiny_image(entry: u32, vaddr: u32, payload: &[u8]) -> alloc::vec::Vec<u8> {
    let phoff = 52u32;
    let phentsize = 32u16;
    let mut buf = vec![0u8; phoff as usize + phentsize as usize + payload.len()];

    buf[0..4].copy_from_slice(&ELF_MAGIC);
    buf[4] = 1; // EI_CLASS = ELFCLASS32
    buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
    buf[24..28].copy_from_slice(&entry.to_le_bytes());
    buf[28..32].copy_from_slice(&phoff.to_le_bytes());
    buf[42..44].copy_from_slice(&phentsize.to_le_bytes());
    buf[44..46].copy_from_slice(&1u16.to_le_bytes());

    let ph = phoff as usize;
    let data_offset = phoff + phentsize as u32;
    buf[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
    buf[ph + 4..ph + 8].copy_from_slice(&data_offset.to_le_bytes());
    buf[ph + 8..ph + 12].copy_from_slice(&vaddr.to_le_bytes());
    buf[ph + 16..ph + 20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    buf[ph + 20..ph + 24].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    buf[ph + 24..ph + 28].copy_from_slice(&(1u32 | PF_W).to_le_bytes());

    buf[data_offset as usize..data_offset as usize + payload.len()].copy_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_images_missing_the_elf_magic() {
        let image = [0u8; 64];
        assert_eq!(load(&image, 0), Err(KernelError::InvalidParam));
    }

    #[test]
    fn rejects_truncated_images() {
        let image = [0x7f, b'E', b'L', b'F'];
        assert_eq!(load(&image, 0), Err(KernelError::InvalidParam));
    }

    #[test]
    fn tiny_image_round_trips_header_fields() {
        let image = tiny_image(0x4000_1000, 0x4000_1000, &[1, 2, 3, 4]);
        assert_eq!(&image[0..4], &ELF_MAGIC);
        assert_eq!(read_u32(&image, 24).unwrap(), 0x4000_1000);
    }
}
