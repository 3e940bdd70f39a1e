use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{msg} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {eta}";

/// Per-post progress bar. The length is set once the run knows its total.
pub fn post_progress(message: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    bar.set_message(message.to_string());
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_is_valid() {
        assert!(ProgressStyle::with_template(TEMPLATE).is_ok());
    }

    #[test]
    fn test_hidden_bar_still_counts() {
        let bar = post_progress("matching", false);
        assert!(bar.is_hidden());
        bar.set_length(3);
        bar.inc(2);
        assert_eq!(bar.position(), 2);
    }
}
