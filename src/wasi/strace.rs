//! strace-style tracing of system-call handlers.
//!
//! When enabled, every handler prints one `name(arg, ...) = result` line to
//! stderr as it returns.  Tracing bypasses the `log` facade: its output must
//! interleave with the guest's own stderr.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

use crate::abi::MemoryHandler;
use crate::types::{FileSystemResult, IoVec};
use std::fmt;

/// How many bytes of a string or buffer argument to display.
const BUFFER_DISPLAY_LEN: usize = 32;

/// State of the trace line being assembled.
enum TraceState {
    /// Only the function name has been printed.
    Func,
    /// One or more arguments have been printed.
    Args,
    /// The result has been printed; the line is complete.
    Done,
}

pub struct Strace {
    enabled: bool,
    state: TraceState,
}

/// Renders bytes as a printable ASCII string literal.  The data may be
/// readable text, which is worth showing, but it may equally be binary, so
/// it cannot be decoded as UTF-8.
fn strace_string(bytes: &[u8], max: usize) -> String {
    let mut rendered = String::from("\"");
    let shown = bytes.len().min(max);
    for index in 0..shown {
        let byte = bytes[index];
        if (0x20..0x7f).contains(&byte) {
            if byte == b'\\' || byte == b'"' {
                rendered.push('\\');
            }
            rendered.push(byte as char);
        } else if byte == b'\t' {
            rendered.push_str("\\t");
        } else if byte == b'\n' {
            rendered.push_str("\\n");
        } else if index + 1 < shown && bytes[index + 1].is_ascii_digit() {
            // The next character is a digit, so use all three octal digits.
            rendered.push_str(&format!("\\{:03o}", byte));
        } else {
            rendered.push_str(&format!("\\{:o}", byte));
        }
    }
    rendered.push('"');
    if bytes.len() > max {
        rendered.push_str("...");
    }
    rendered
}

impl Strace {
    /// Starts a trace line for the named function.
    pub fn func(enabled: bool, name: &str) -> Self {
        if enabled {
            eprint!("{}(", name);
        }
        Strace {
            enabled,
            state: TraceState::Func,
        }
    }

    fn arg_print_comma(&mut self) {
        match self.state {
            TraceState::Func => self.state = TraceState::Args,
            TraceState::Args => eprint!(", "),
            TraceState::Done => eprint!("\nUnexpected strace arg: "),
        }
    }

    /// An argument shown as a decimal value.
    pub fn arg_dec<T: fmt::Display>(&mut self, value: T) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        eprint!("{}", value);
    }

    /// An argument shown as a hexadecimal value.
    pub fn arg_hex<T: fmt::LowerHex>(&mut self, value: T) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        eprint!("0x{:x}", value);
    }

    /// Ellipsis for arguments not worth rendering.
    pub fn arg_dots(&mut self) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        eprint!("...");
    }

    /// A rights mask.
    pub fn arg_rights(&mut self, rights: u64) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        eprint!("0x{:x}", rights);
    }

    /// A memory buffer argument.
    pub fn arg_buffer<M: MemoryHandler>(&mut self, memory_ref: &M, address: u32, length: u32) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        match memory_ref.read_buffer(address, length) {
            Ok(bytes) => eprint!("{}", strace_string(&bytes, BUFFER_DISPLAY_LEN)),
            Err(_) => eprint!("BAD_MEM_REF"),
        }
    }

    /// A file path argument.
    pub fn arg_path<M: MemoryHandler>(&mut self, memory_ref: &M, address: u32, length: u32) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        match memory_ref.read_buffer(address, length) {
            Ok(bytes) => eprint!("{}", strace_string(&bytes, 1024)),
            Err(_) => eprint!("BAD_MEM_REF"),
        }
    }

    /// An output argument that is a pointer to a u32.
    pub fn arg_p_u32<M: MemoryHandler>(&mut self, memory_ref: &M, address: u32) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        match memory_ref.read_u32(address) {
            Ok(value) => eprint!("{}", value),
            Err(_) => eprint!("BAD_MEM_REF"),
        }
    }

    /// An output argument that is a pointer to a u64.
    pub fn arg_p_u64<M: MemoryHandler>(&mut self, memory_ref: &M, address: u32) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        match memory_ref.read_u64(address) {
            Ok(value) => eprint!("{}", value),
            Err(_) => eprint!("BAD_MEM_REF"),
        }
    }

    /// A scatter/gather argument: on success, renders the first buffer up
    /// to the transferred length.
    pub fn arg_iovec<M: MemoryHandler>(
        &mut self,
        result: FileSystemResult<()>,
        memory_ref: &M,
        base: u32,
        count: u32,
        nbytes_address: u32,
    ) {
        if !self.enabled {
            return;
        }
        self.arg_print_comma();
        if result.is_err() {
            eprint!("_");
            return;
        }
        let rendered = memory_ref.read_u32(nbytes_address).and_then(|transferred| {
            let iovecs = memory_ref.unpack_array::<IoVec>(base, count)?;
            let mut bytes = Vec::new();
            for iovec in iovecs {
                let take = (iovec.len as usize).min(transferred as usize - bytes.len());
                bytes.extend(memory_ref.read_buffer(iovec.buf, take as u32)?);
                if bytes.len() >= transferred as usize {
                    break;
                }
            }
            Ok(strace_string(&bytes, BUFFER_DISPLAY_LEN))
        });
        match rendered {
            Ok(rendered) => eprint!("{}", rendered),
            Err(_) => eprint!("BAD_IOVEC"),
        }
    }

    /// The result of the call; always the last thing on the line.
    pub fn result(&mut self, result: FileSystemResult<()>) -> FileSystemResult<()> {
        if !self.enabled {
            return result;
        }
        match self.state {
            TraceState::Done => eprint!("\nUnexpected strace result: "),
            _ => self.state = TraceState::Done,
        }
        match result {
            Ok(()) => eprintln!(") = Success"),
            Err(errno) => eprintln!(") = {:?}", errno),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::strace_string;

    #[test]
    fn printable_text_renders_verbatim() {
        assert_eq!(strace_string(b"hi there", 32), "\"hi there\"");
    }

    #[test]
    fn control_bytes_render_as_escapes() {
        assert_eq!(strace_string(b"a\tb\n", 32), "\"a\\tb\\n\"");
        assert_eq!(strace_string(b"\x01", 32), "\"\\1\"");
        assert_eq!(strace_string(b"\x019", 32), "\"\\0019\"");
    }

    #[test]
    fn long_buffers_are_truncated_with_ellipsis() {
        let rendered = strace_string(&[b'x'; 64], 8);
        assert_eq!(rendered, format!("\"{}\"...", "x".repeat(8)));
    }
}
