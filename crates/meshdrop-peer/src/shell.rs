//! The interactive shell's stdin shim (§4.4, SPEC_FULL §4.4 [ADDED]).
//!
//! Reading and tokenizing stdin is treated as a thin external
//! collaborator, same as spec.md keeps the shell itself out of scope:
//! [`read_command`] hands [`crate::driver::dispatch`] an already-split
//! `Vec<String>` so dispatch logic never touches a terminal and stays
//! unit-testable.

use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

pub const PROMPT: &str = ">>> ";

/// Read one line from stdin and split it on whitespace.
///
/// Returns `None` on EOF (stdin closed), `Some(vec![])` for a blank
/// line — the caller treats an empty line as "nothing to dispatch".
pub async fn read_command(stdin: &mut BufReader<Stdin>) -> Option<Vec<String>> {
    let mut line = String::new();
    let n = stdin.read_line(&mut line).await.ok()?;
    if n == 0 {
        return None;
    }
    Some(line.split_whitespace().map(str::to_string).collect())
}
