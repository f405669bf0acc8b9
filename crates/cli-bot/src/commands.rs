pub const WELCOME_MESSAGE: &str = "Welcome to Video to Circle Bot!

Send me any video and I'll convert it to a video note (circle).

Limitations:
- Max file size: 20 MB
- Max duration: 60 seconds (longer videos will be trimmed)
- Output: 384x384 square video (displayed as circle in Telegram)

Just send a video file or forward a video message!";

pub const HELP_MESSAGE: &str = "How to use this bot:

1. Send any video file (MP4, MOV, AVI, etc.)
2. Wait for processing (usually 10-30 seconds)
3. Receive your video note (circle)!

Limitations:
- Maximum input file size: 20 MB (Telegram limit)
- Maximum video duration: 60 seconds
- Videos longer than 60 sec will be automatically trimmed
- The video will be cropped to a square (centered)
- Output resolution: 384x384 pixels

Tips:
- For best results, use videos already close to square format
- Shorter videos process faster
- If output is too large, try a shorter video

Having issues? The video might be in an unsupported format.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
}

impl Command {
    /// Recognise `/start` and `/help`, with or without a `@botname` suffix
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        match name {
            "start" => Some(Command::Start),
            "help" => Some(Command::Help),
            _ => None,
        }
    }

    pub fn reply_text(&self) -> &'static str {
        match self {
            Command::Start => WELCOME_MESSAGE,
            Command::Help => HELP_MESSAGE,
        }
    }
}

pub fn throttle_message(retry_after_secs: u64) -> String {
    format!("Too many requests. Please wait {} seconds.", retry_after_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/help@circle_bot"), Some(Command::Help));
        assert_eq!(Command::parse("  /start now"), Some(Command::Start));
        assert_eq!(Command::parse("/stop"), None);
        assert_eq!(Command::parse("start"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_reply_texts() {
        assert!(Command::Start.reply_text().starts_with("Welcome"));
        assert!(Command::Help.reply_text().contains("384x384"));
        assert_eq!(throttle_message(55), "Too many requests. Please wait 55 seconds.");
    }
}
