//! Terminal color selection.
//!
//! Honors `NO_COLOR` (<https://no-color.org/>), then `CLICOLOR_FORCE`, then
//! `CLICOLOR=0`, and otherwise colors only a terminal stdout.

use colored::control;

pub fn init_colors() {
    let is_tty = std::io::IsTerminal::is_terminal(&std::io::stdout());
    let enabled = colors_enabled(|key| std::env::var(key).ok(), is_tty);
    control::set_override(enabled);
}

fn colors_enabled(var: impl Fn(&str) -> Option<String>, is_tty: bool) -> bool {
    if var("NO_COLOR").is_some() {
        return false;
    }
    if var("CLICOLOR_FORCE").is_some_and(|v| v != "0") {
        return true;
    }
    if var("CLICOLOR").is_some_and(|v| v == "0") {
        return false;
    }
    is_tty
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_precedence() {
        assert!(colors_enabled(env(&[]), true));
        assert!(!colors_enabled(env(&[]), false));
        assert!(!colors_enabled(env(&[("NO_COLOR", ""), ("CLICOLOR_FORCE", "1")]), true));
        assert!(colors_enabled(env(&[("CLICOLOR_FORCE", "1")]), false));
        assert!(!colors_enabled(env(&[("CLICOLOR", "0")]), true));
    }
}
