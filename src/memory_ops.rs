//! Word-sized peek/poke loops over a tracee's address space.

use crate::log::{verbosity_for, LogCategory, LogLevel::LogDebug, Verbosity};
use crate::log;
use crate::trace_primitive::trace_scalar;
use nix::errno::Errno;
use nix::unistd::Pid;
use std::mem::size_of;

const WORD_SIZE: usize = size_of::<usize>();

fn word_bytes(word: usize) -> [u8; WORD_SIZE] {
    word.to_ne_bytes()
}

fn word_from_bytes(bytes: &[u8]) -> usize {
    let mut w = [0u8; WORD_SIZE];
    w[..bytes.len()].copy_from_slice(bytes);
    usize::from_ne_bytes(w)
}

/// Overlay `overlay` (at most `WORD_SIZE` bytes) onto `word` starting at
/// byte offset `at`, returning the new word. Bytes outside `[at, at+len)`
/// are preserved exactly.
fn overlay_word(word: usize, at: usize, overlay: &[u8]) -> usize {
    let mut bytes = word_bytes(word);
    bytes[at..at + overlay.len()].copy_from_slice(overlay);
    word_from_bytes(&bytes)
}

fn peek_word(tid: Pid, addr: u64) -> Result<usize, Errno> {
    let ret = unsafe { trace_scalar(libc::PTRACE_PEEKDATA, tid, addr as usize, 0) }?;
    Ok(ret as usize)
}

fn poke_word(tid: Pid, addr: u64, word: usize) -> Result<(), Errno> {
    unsafe { trace_scalar(libc::PTRACE_POKEDATA, tid, addr as usize, word) }?;
    Ok(())
}

fn log_transfer(category_action: &str, addr: u64, buf: &[u8]) {
    match verbosity_for(LogCategory::MEMORY) {
        Some(Verbosity::Long) => {
            log!(LogDebug, "{} {:#x}: {:02x?}", category_action, addr, buf);
        }
        Some(Verbosity::Short) if buf.len() <= 32 => {
            log!(LogDebug, "{} {:#x} ({} bytes)", category_action, addr, buf.len());
        }
        _ => {}
    }
}

/// Read `buf.len()` bytes from `addr` in `tid`'s address space, one word at
/// a time. Returns the count actually read and, on failure, the errno that
/// aborted the loop.
pub fn read_memory(tid: Pid, addr: u64, buf: &mut [u8]) -> (usize, Option<Errno>) {
    let mut read = 0usize;
    while read < buf.len() {
        let word_addr = addr + read as u64;
        match peek_word(tid, word_addr) {
            Ok(word) => {
                let remaining = buf.len() - read;
                let take = remaining.min(WORD_SIZE);
                let bytes = word_bytes(word);
                buf[read..read + take].copy_from_slice(&bytes[..take]);
                read += take;
            }
            Err(e) => {
                log_transfer("read(failed)", word_addr, &buf[..read]);
                return (read, Some(e));
            }
        }
    }
    log_transfer("read", addr, buf);
    (read, None)
}

/// Write `buf` to `addr` in `tid`'s address space. Full aligned words are
/// written directly; a trailing partial word is read, overlaid, and
/// written back so bytes outside the requested range are preserved.
///
/// The partial-word path calls back into [`read_memory`]/this function's
/// own word primitives rather than bypassing them, so every kernel call
/// still goes through the same owner-task-affine path.
pub fn write_memory(tid: Pid, addr: u64, buf: &[u8]) -> (usize, Option<Errno>) {
    let mut written = 0usize;
    while written < buf.len() {
        let word_addr = addr + written as u64;
        let remaining = buf.len() - written;
        if remaining >= WORD_SIZE {
            let word = word_from_bytes(&buf[written..written + WORD_SIZE]);
            match poke_word(tid, word_addr, word) {
                Ok(()) => written += WORD_SIZE,
                Err(e) => {
                    log_transfer("write(failed)", word_addr, &buf[..written]);
                    return (written, Some(e));
                }
            }
        } else {
            // Trailing partial word: read-modify-write to preserve the
            // bytes beyond what was requested.
            let existing = match peek_word(tid, word_addr) {
                Ok(w) => w,
                Err(e) => {
                    log_transfer("write(failed)", word_addr, &buf[..written]);
                    return (written, Some(e));
                }
            };
            let overlaid = overlay_word(existing, 0, &buf[written..]);
            match poke_word(tid, word_addr, overlaid) {
                Ok(()) => written += remaining,
                Err(e) => {
                    log_transfer("write(failed)", word_addr, &buf[..written]);
                    return (written, Some(e));
                }
            }
        }
    }
    log_transfer("write", addr, buf);
    (written, None)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overlay_preserves_surrounding_bytes() {
        let word = usize::from_ne_bytes([0xAA; WORD_SIZE]);
        let new = overlay_word(word, 0, &[0xBB]);
        let bytes = word_bytes(new);
        assert_eq!(bytes[0], 0xBB);
        for b in &bytes[1..] {
            assert_eq!(*b, 0xAA);
        }
    }

    #[test]
    fn overlay_at_interior_offset() {
        let word = 0usize;
        let new = overlay_word(word, WORD_SIZE - 2, &[0x01, 0x02]);
        let bytes = word_bytes(new);
        assert_eq!(&bytes[WORD_SIZE - 2..], &[0x01, 0x02]);
        assert_eq!(&bytes[..WORD_SIZE - 2], &vec![0u8; WORD_SIZE - 2][..]);
    }

    #[test]
    fn word_round_trip() {
        let bytes: Vec<u8> = (0..WORD_SIZE as u8).collect();
        let w = word_from_bytes(&bytes);
        assert_eq!(&word_bytes(w)[..], &bytes[..]);
    }
}
