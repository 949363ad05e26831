//! Count-preserving wait primitive for the operation funnel.
//!
//! A `Condvar` has spurious-wakeup semantics that have to be handled with a
//! predicate loop anyway, and std gives us no direct way to tell "woken
//! because posted" apart from "woken by an unrelated notify_all" without
//! also carrying that predicate. A raw POSIX semaphore, EINTR-retried, is
//! the more direct translation of the funnel's actual rendezvous and is
//! what the original design assumes.

use nix::errno::Errno;
use std::mem::MaybeUninit;

pub struct Semaphore {
    sem: libc::sem_t,
}

// Safety: libc::sem_t is safe to share across threads once initialized;
// all access goes through sem_wait/sem_post which are themselves safe for
// concurrent use on the same semaphore.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub fn new(initial: u32) -> Semaphore {
        unsafe {
            let mut sem = MaybeUninit::<libc::sem_t>::uninit();
            let ret = libc::sem_init(sem.as_mut_ptr(), 0, initial);
            assert_eq!(ret, 0, "sem_init failed");
            Semaphore { sem: sem.assume_init() }
        }
    }

    /// Blocks until the count is non-zero, then decrements it. Retries
    /// transparently on EINTR; the caller never observes a spurious wakeup.
    pub fn wait(&self) {
        loop {
            let ret = unsafe { libc::sem_wait(&self.sem as *const _ as *mut _) };
            if ret == 0 {
                return;
            }
            match Errno::last() {
                Errno::EINTR => continue,
                e => panic!("sem_wait failed: {}", e),
            }
        }
    }

    pub fn post(&self) {
        let ret = unsafe { libc::sem_post(&self.sem as *const _ as *mut _) };
        assert_eq!(ret, 0, "sem_post failed");
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_destroy(&mut self.sem);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn post_wakes_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = sem.clone();
        let handle = thread::spawn(move || {
            sem2.wait();
            42
        });
        thread::sleep(std::time::Duration::from_millis(20));
        sem.post();
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn initial_count_is_immediately_available() {
        let sem = Semaphore::new(1);
        sem.wait();
    }
}
