use std::io::{BufRead, Write};

use kurodlc_core::{ResolverError, Result};

/// Asks the user to pick one of `options` by number and returns its index.
///
/// Invalid answers are asked again; end of input is an error.
pub fn choose<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    title: &str,
    options: &[String],
) -> Result<usize> {
    writeln!(output, "\n{title}")?;
    for (i, option) in options.iter().enumerate() {
        writeln!(output, "  {}) {option}", i + 1)?;
    }
    loop {
        write!(output, "Enter number [1-{}]: ", options.len())?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(ResolverError::Config(format!(
                "no selection made for: {title} (use --no-interactive to take the default)"
            )));
        }
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => return Ok(n - 1),
            _ => writeln!(output, "Invalid choice '{}'", line.trim())?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        vec!["t_item.json".to_string(), "t_item.tbl".to_string()]
    }

    #[test]
    fn retries_until_a_valid_number() {
        let mut input = "x\n3\n2\n".as_bytes();
        let mut output = Vec::new();
        let picked = choose(&mut input, &mut output, "Select source", &options()).unwrap();
        assert_eq!(picked, 1);
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("  1) t_item.json\n  2) t_item.tbl\n"));
        assert_eq!(shown.matches("Invalid choice").count(), 2);
    }

    #[test]
    fn end_of_input_is_an_error() {
        let mut input = "".as_bytes();
        let mut output = Vec::new();
        assert!(choose(&mut input, &mut output, "Select source", &options()).is_err());
    }
}
