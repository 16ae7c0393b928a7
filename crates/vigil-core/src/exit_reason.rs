//! Exit-status decoding for watched processes.
//!
//! The kernel reports process termination as a raw wait-status word.
//! This module decodes that word into an [`ExitReason`] and classifies
//! the fatal-signal subset that counts as a genuine crash, as opposed to
//! a requested termination (SIGTERM, SIGKILL, SIGINT) or a normal exit.

use serde::{Deserialize, Serialize};

/// Why a watched process terminated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    /// The process exited on its own with the given code.
    Exited {
        /// Exit code passed to `exit()`
        code: i32,
    },

    /// The process was terminated by a signal.
    Signaled {
        /// Signal number, in the platform's numbering
        signal: i32,
        /// Conventional signal name, e.g. `SIGSEGV`
        name: String,
    },
}

impl ExitReason {
    /// Decodes a raw wait-status word.
    ///
    /// The low 7 bits carry the terminating signal (zero for a normal
    /// exit); for normal exits the next 8 bits carry the exit code. The
    /// core-dump flag (bit 7) is ignored.
    pub fn from_wait_status(status: i32) -> Self {
        let signal = status & 0x7f;
        if signal == 0 {
            Self::Exited {
                code: (status >> 8) & 0xff,
            }
        } else {
            Self::Signaled {
                signal,
                name: signal_name(signal),
            }
        }
    }

    /// True only for signals indicating a genuine crash.
    ///
    /// Termination by request (SIGTERM, SIGINT) or by an external
    /// SIGKILL is deliberately not a crash.
    pub fn is_crash(&self) -> bool {
        match self {
            Self::Exited { .. } => false,
            Self::Signaled { signal, .. } => CRASH_SIGNALS.contains(signal),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exit({code})"),
            Self::Signaled { name, .. } => write!(f, "{name}"),
        }
    }
}

/// Fatal signals that indicate abnormal termination.
const CRASH_SIGNALS: [i32; 5] = [
    libc::SIGILL,
    libc::SIGABRT,
    libc::SIGFPE,
    libc::SIGBUS,
    libc::SIGSEGV,
];

/// Returns the conventional name for a signal number.
///
/// Unrecognized signals render as `SIG<n>`.
pub fn signal_name(signal: i32) -> String {
    let name = match signal {
        s if s == libc::SIGHUP => "SIGHUP",
        s if s == libc::SIGINT => "SIGINT",
        s if s == libc::SIGQUIT => "SIGQUIT",
        s if s == libc::SIGILL => "SIGILL",
        s if s == libc::SIGTRAP => "SIGTRAP",
        s if s == libc::SIGABRT => "SIGABRT",
        s if s == libc::SIGBUS => "SIGBUS",
        s if s == libc::SIGFPE => "SIGFPE",
        s if s == libc::SIGKILL => "SIGKILL",
        s if s == libc::SIGUSR1 => "SIGUSR1",
        s if s == libc::SIGSEGV => "SIGSEGV",
        s if s == libc::SIGUSR2 => "SIGUSR2",
        s if s == libc::SIGPIPE => "SIGPIPE",
        s if s == libc::SIGALRM => "SIGALRM",
        s if s == libc::SIGTERM => "SIGTERM",
        _ => return format!("SIG{signal}"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_normal_exit_zero() {
        let reason = ExitReason::from_wait_status(0);
        assert_eq!(reason, ExitReason::Exited { code: 0 });
        assert!(!reason.is_crash());
    }

    #[test]
    fn test_decode_normal_exit_code() {
        // exit(3) encodes as 3 << 8
        let reason = ExitReason::from_wait_status(3 << 8);
        assert_eq!(reason, ExitReason::Exited { code: 3 });
        assert!(!reason.is_crash());
    }

    #[test]
    fn test_decode_segfault() {
        let reason = ExitReason::from_wait_status(libc::SIGSEGV);
        match &reason {
            ExitReason::Signaled { signal, name } => {
                assert_eq!(*signal, libc::SIGSEGV);
                assert_eq!(name, "SIGSEGV");
            }
            other => panic!("expected signal, got {other:?}"),
        }
        assert!(reason.is_crash());
    }

    #[test]
    fn test_decode_ignores_core_dump_flag() {
        // SIGSEGV with the core-dump bit set
        let reason = ExitReason::from_wait_status(0x80 | libc::SIGSEGV);
        assert_eq!(
            reason,
            ExitReason::Signaled {
                signal: libc::SIGSEGV,
                name: "SIGSEGV".to_string(),
            }
        );
        assert!(reason.is_crash());
    }

    #[test]
    fn test_crash_classification() {
        for signal in [
            libc::SIGILL,
            libc::SIGABRT,
            libc::SIGFPE,
            libc::SIGBUS,
            libc::SIGSEGV,
        ] {
            assert!(
                ExitReason::from_wait_status(signal).is_crash(),
                "signal {signal} should be a crash"
            );
        }
    }

    #[test]
    fn test_requested_termination_is_not_a_crash() {
        for signal in [libc::SIGTERM, libc::SIGKILL, libc::SIGINT, libc::SIGHUP] {
            assert!(
                !ExitReason::from_wait_status(signal).is_crash(),
                "signal {signal} should not be a crash"
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitReason::from_wait_status(0).to_string(), "exit(0)");
        assert_eq!(ExitReason::from_wait_status(2 << 8).to_string(), "exit(2)");
        assert_eq!(
            ExitReason::from_wait_status(libc::SIGABRT).to_string(),
            "SIGABRT"
        );
    }

    #[test]
    fn test_signal_name_unknown() {
        assert_eq!(signal_name(63), "SIG63");
    }
}
