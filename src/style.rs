/// ANSI styling for terminal diagnostics.
pub struct Style;

const RESET: &str = "\x1b[0m";

impl Style {
    fn wrap(code: &str, text: &str) -> String {
        format!("{}{}{}", code, text, RESET)
    }

    pub fn bold_red(text: &str) -> String {
        Self::wrap("\x1b[1;31m", text)
    }

    pub fn red(text: &str) -> String {
        Self::wrap("\x1b[31m", text)
    }

    pub fn green(text: &str) -> String {
        Self::wrap("\x1b[32m", text)
    }

    pub fn blue(text: &str) -> String {
        Self::wrap("\x1b[34m", text)
    }

    pub fn cyan(text: &str) -> String {
        Self::wrap("\x1b[36m", text)
    }
}
