//! The interactive prompt: a plain read-eval-print loop over stdin.

use std::io::{self, BufRead, Write};

use crate::core::state::EngineState;
use crate::eval::{evaluate, EvalResult};

const PROMPT: &str = "vql> ";

/// Run the prompt until EOF or an explicit `exit`/`quit`.
///
/// # Errors
///
/// Returns an error only for I/O failures on stdin/stdout; query errors are
/// printed and the loop continues.
pub fn run(state: &mut EngineState) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        stdout.write_all(PROMPT.as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command.eq_ignore_ascii_case("exit") || command.eq_ignore_ascii_case("quit") {
            break;
        }

        let result = evaluate(command, state);
        print_result(&mut stdout, &result, state)?;
        if matches!(&result, EvalResult::Error(msg) if msg.starts_with("Fatal")) {
            break;
        }
    }
    Ok(())
}

fn print_result(
    out: &mut impl Write,
    result: &EvalResult,
    state: &EngineState,
) -> io::Result<()> {
    let text = result.render(state);
    if !text.is_empty() {
        writeln!(out, "{text}")?;
    }
    Ok(())
}
