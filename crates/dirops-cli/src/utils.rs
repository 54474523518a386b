//! Terminal helpers.

use std::env;
use std::io::{self, BufRead, Write};

/// Fallback actor when the OS user cannot be determined.
const UNKNOWN_OPERATOR: &str = "local_user";

/// Ask the operator a yes/no question on the terminal. Anything but `y`/`yes` is a no.
pub fn confirm(message: &str) -> io::Result<bool> {
    let stdin = io::stdin();
    confirm_with(message, &mut stdin.lock(), &mut io::stdout())
}

fn confirm_with<R: BufRead, W: Write>(message: &str, input: &mut R, output: &mut W) -> io::Result<bool> {
    write!(output, "{message} [y/N]: ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Login name of the local operator, stamped on audit events.
pub fn operator_identity() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| UNKNOWN_OPERATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(input: &str) -> bool {
        let mut output = Vec::new();
        let result = confirm_with("Proceed?", &mut input.as_bytes(), &mut output).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "Proceed? [y/N]: ");
        result
    }

    #[test]
    fn only_yes_confirms() {
        assert!(answer("y\n"));
        assert!(answer(" YES \n"));
        assert!(!answer("n\n"));
        assert!(!answer("\n"));
        assert!(!answer(""));
        assert!(!answer("yep\n"));
    }
}
