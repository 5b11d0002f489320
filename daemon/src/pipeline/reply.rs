//! Decoder for the annotated reply format
//!
//! ```text
//! mood: <angry|neutral|inquisitive|happy>
//! command: <none|game|screensaver>
//! text: <reply>
//! ```
//!
//! Lines without a tag are reply text.

use super::{CommandTag, Mood, Reply};

/// Decode an annotated reply; missing or unknown tags fall back to defaults
pub fn parse_reply(raw: &str) -> Reply {
    let mut reply = Reply::default();
    let mut text_lines = Vec::new();

    for line in raw.trim().lines() {
        if let Some(value) = line.strip_prefix("mood:") {
            reply.mood = Mood::from_tag(value);
        } else if let Some(value) = line.strip_prefix("command:") {
            reply.command = CommandTag::from_tag(value);
        } else if let Some(value) = line.strip_prefix("text:") {
            text_lines.push(value.trim());
        } else {
            text_lines.push(line);
        }
    }

    reply.text = text_lines.join("\n").trim().to_string();
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_reply() {
        let reply = parse_reply("mood: angry\ncommand: game\ntext: Fine. Play your game.\n");
        assert_eq!(reply.mood, Mood::Angry);
        assert_eq!(reply.command, CommandTag::Game);
        assert_eq!(reply.text, "Fine. Play your game.");
    }

    #[test]
    fn test_multiline_text() {
        let reply = parse_reply("mood: inquisitive\ncommand: none\ntext: Really?\nYou want that?");
        assert_eq!(reply.mood, Mood::Inquisitive);
        assert_eq!(reply.text, "Really?\nYou want that?");
    }

    #[test]
    fn test_untagged_reply_is_neutral_text() {
        let reply = parse_reply("  I am not doing that.  ");
        assert_eq!(reply.mood, Mood::Neutral);
        assert_eq!(reply.command, CommandTag::None);
        assert_eq!(reply.text, "I am not doing that.");
    }

    #[test]
    fn test_unknown_values_fall_back() {
        let reply = parse_reply("mood: volcanic\ncommand: self-destruct\ntext: no");
        assert_eq!(reply.mood, Mood::Neutral);
        assert_eq!(reply.command, CommandTag::None);
    }
}
