//! Construction-time configuration, passed down rather than read from a
//! process-wide global the way the teacher's `Flags` is — the Monitor is a
//! library embedded by a Process Object, not a standalone binary.

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Clear the personality ADDR_NO_RANDOMIZE bit before exec.
    pub disable_aslr: bool,
    /// Allocate a pseudo-terminal for the child's controlling terminal.
    /// When false, stdio redirection (if any) is used as-is and no PTY
    /// master descriptor is published.
    pub allocate_pty: bool,
    /// Byte budget for "short" verbosity memory/register dumps.
    pub short_log_byte_budget: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            disable_aslr: false,
            allocate_pty: true,
            short_log_byte_budget: 32,
        }
    }
}
