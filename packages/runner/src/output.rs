//! Terminal rendering of routed engine output.

use clipsrules::{OutputHandler, OutputLine};
use console::style;

/// Prints engine lines to the terminal. Errors and warnings go to stderr,
/// everything else to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl OutputHandler for ConsoleOutput {
    fn handle(&self, line: OutputLine) {
        match &line {
            OutputLine::Error(_) | OutputLine::Warning(_) => eprintln!("{}", render(&line)),
            _ => println!("{}", render(&line)),
        }
    }
}

/// Text printed for one line
pub fn render(line: &OutputLine) -> String {
    match line {
        OutputLine::Stdout(text) => text.clone(),
        OutputLine::Error(text) => style(text).red().to_string(),
        OutputLine::Warning(text) => style(text).yellow().to_string(),
        OutputLine::Named { name, line } => format!("{} {line}", style(format!("[{name}]")).cyan()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_plain_lines() {
        console::set_colors_enabled(false);
        assert_eq!(render(&OutputLine::Stdout("hello".into())), "hello");
        assert_eq!(render(&OutputLine::Error("bad".into())), "bad");
        assert_eq!(
            render(&OutputLine::Named {
                name: "audit".into(),
                line: "entry".into(),
            }),
            "[audit] entry"
        );
    }
}
