//! `si_code` constants from `siginfo.h`.
//!
//! `libc` doesn't expose these (they vary in rarely-needed ways across
//! libcs), so — same as the `DataDog-libdatadog` crash tracker's
//! `siginfo_strings` module does for its own signal classification — we
//! copy just the values this crate actually switches on.

pub const SI_USER: i32 = 0;
pub const SI_KERNEL: i32 = 0x80;
pub const SI_TKILL: i32 = -6;

pub mod trap {
    pub const BRKPT: i32 = 1;
    pub const TRACE: i32 = 2;
    pub const HWBKPT: i32 = 4;
}

pub mod segv {
    pub const MAPERR: i32 = 1;
    pub const ACCERR: i32 = 2;
}

pub mod bus {
    pub const ADRALN: i32 = 1;
    pub const ADRERR: i32 = 2;
    pub const OBJERR: i32 = 3;
}

pub mod ill {
    pub const ILLOPC: i32 = 1;
    pub const ILLOPN: i32 = 2;
    pub const ILLADR: i32 = 3;
    pub const ILLTRP: i32 = 4;
    pub const PRVOPC: i32 = 5;
    pub const PRVREG: i32 = 6;
    pub const COPROC: i32 = 7;
    pub const BADSTK: i32 = 8;
}

pub mod fpe {
    pub const INTDIV: i32 = 1;
    pub const INTOVF: i32 = 2;
    pub const FLTDIV: i32 = 3;
    pub const FLTOVF: i32 = 4;
    pub const FLTUND: i32 = 5;
    pub const FLTRES: i32 = 6;
    pub const FLTINV: i32 = 7;
    pub const FLTSUB: i32 = 8;
}

/// True when `si_code` indicates the signal was raised by a user-space
/// `kill`/`tgkill`/`sigqueue`, as opposed to the kernel (a real fault).
pub fn is_user_origin(si_code: i32) -> bool {
    si_code == SI_USER || si_code == SI_TKILL
}
