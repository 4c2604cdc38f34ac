//! Supervised execution region for the native call.
//!
//! Argument descriptions are caller-supplied data and may not match the real
//! native signature, so an invalid memory access during the call is an
//! expected failure mode, not a bug. While at least one invocation is inside
//! the guarded region, handlers for the fault signals are installed
//! process-wide; a fault on a guarded thread performs a non-local jump back
//! to the region entry and surfaces as a typed error. The previous handlers
//! are restored when the last guard exits, on every path. Faults on threads
//! that are not inside a guarded region re-raise with the default
//! disposition.

use std::cell::{Cell, UnsafeCell};

use log::warn;
use parking_lot::Mutex;

/// A contained native-side fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFault {
    pub signal: i32,
}

impl NativeFault {
    pub fn describe(&self) -> &'static str {
        match self.signal {
            libc::SIGSEGV => "segmentation fault",
            libc::SIGBUS => "bus error",
            _ => "fatal signal",
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::*;

    const GUARDED_SIGNALS: [i32; 2] = [libc::SIGSEGV, libc::SIGBUS];

    // Generously sized for every libc's sigjmp_buf.
    const JMP_BUF_LEN: usize = 512;

    #[repr(C, align(16))]
    struct JmpBuf([u8; JMP_BUF_LEN]);

    // sigsetjmp is a macro on glibc; the underlying symbol differs per libc.
    unsafe extern "C" {
        #[cfg_attr(target_os = "linux", link_name = "__sigsetjmp")]
        fn sigsetjmp(env: *mut JmpBuf, savemask: libc::c_int) -> libc::c_int;
        fn siglongjmp(env: *mut JmpBuf, val: libc::c_int) -> !;
    }

    thread_local! {
        static JMP: UnsafeCell<JmpBuf> =
            const { UnsafeCell::new(JmpBuf([0; JMP_BUF_LEN])) };
        static GUARDED: Cell<bool> = const { Cell::new(false) };
    }

    extern "C" fn on_fault(signal: libc::c_int) {
        let guarded = GUARDED.try_with(Cell::get).unwrap_or(false);
        if guarded {
            // Jump back to the sigsetjmp in protected(); savemask=1 restores
            // the signal mask the region entered with.
            JMP.with(|buf| unsafe { siglongjmp(buf.get(), signal) });
        }
        // Not ours: fall back to the default disposition.
        unsafe {
            libc::signal(signal, libc::SIG_DFL);
            libc::raise(signal);
        }
    }

    struct HandlerState {
        depth: usize,
        saved: [libc::sigaction; 2],
    }

    // Signal dispositions are process-global; installs and restores are
    // reference-counted across concurrent invocations.
    static HANDLERS: Mutex<HandlerState> = Mutex::new(HandlerState {
        depth: 0,
        saved: unsafe { std::mem::zeroed() },
    });

    fn enter() {
        let mut state = HANDLERS.lock();
        if state.depth == 0 {
            for (i, sig) in GUARDED_SIGNALS.into_iter().enumerate() {
                let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
                action.sa_sigaction = on_fault as usize;
                unsafe {
                    libc::sigemptyset(&mut action.sa_mask);
                    libc::sigaction(sig, &action, &mut state.saved[i]);
                }
            }
        }
        state.depth += 1;
    }

    fn exit() {
        let mut state = HANDLERS.lock();
        state.depth -= 1;
        if state.depth == 0 {
            for (i, sig) in GUARDED_SIGNALS.into_iter().enumerate() {
                unsafe {
                    libc::sigaction(sig, &state.saved[i], std::ptr::null_mut());
                }
            }
        }
    }

    /// Run `f` with fault containment. `f` must not hold anything whose
    /// destructor matters: on a fault, the region is abandoned without
    /// unwinding.
    pub fn protected<F: FnOnce()>(f: F) -> Result<(), NativeFault> {
        enter();
        let signal = JMP.with(|buf| {
            let rc = unsafe { sigsetjmp(buf.get(), 1) };
            if rc == 0 {
                GUARDED.set(true);
                f();
                GUARDED.set(false);
                0
            } else {
                // Second return, via siglongjmp from the handler.
                GUARDED.set(false);
                rc
            }
        });
        exit();
        if signal == 0 {
            Ok(())
        } else {
            warn!("contained native fault: signal {signal}");
            Err(NativeFault { signal })
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::NativeFault;

    /// No containment on this platform; the call runs unguarded.
    pub fn protected<F: FnOnce()>(f: F) -> Result<(), NativeFault> {
        f();
        Ok(())
    }
}

pub use imp::protected;
