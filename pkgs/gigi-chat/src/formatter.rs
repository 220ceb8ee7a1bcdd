//! Turns stored message records into display-ready messages

use chrono::{DateTime, Utc};
use gigi_crypto::MessageCipher;
use regex::{Captures, Regex, RegexBuilder};
use tracing::warn;

use crate::models::{DisplayMessage, MessageRecord, UserIdentity};

/// Optional steps applied by [`format_message`]
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatOptions<'a> {
    pub blacklist: Option<&'a Regex>,
    pub decrypt: Option<&'a MessageCipher>,
}

/// Build the case-insensitive `(w1)|(w2)|...` pattern for a banned word list.
///
/// Words are matched literally. Returns `None` when the list has no
/// non-empty words.
pub fn blacklist_regex<I, S>(words: I) -> Option<Regex>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let alternatives: Vec<String> = words
        .into_iter()
        .map(|w| w.as_ref().trim().to_string())
        .filter(|w| !w.is_empty())
        .map(|w| format!("({})", regex::escape(&w)))
        .collect();

    if alternatives.is_empty() {
        return None;
    }

    match RegexBuilder::new(&alternatives.join("|"))
        .case_insensitive(true)
        .build()
    {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Blacklist disabled, pattern failed to build: {}", e);
            None
        }
    }
}

/// Replace every match with a run of `*` of the same length
pub fn filter_bad_words(text: &str, blacklist: &Regex) -> String {
    blacklist
        .replace_all(text, |caps: &Captures| "*".repeat(caps[0].chars().count()))
        .into_owned()
}

/// Normalize a raw record into a display message.
///
/// Text is decrypted first (fail-soft) and then filtered. The `user` comes
/// from `sender`, never from the record itself. Media fields are copied as-is.
pub fn format_message(
    raw: &MessageRecord,
    sender: &UserIdentity,
    options: &FormatOptions<'_>,
) -> DisplayMessage {
    let mut text = match options.decrypt {
        Some(cipher) => cipher.open(&raw.text),
        None => raw.text.clone(),
    };
    if let Some(blacklist) = options.blacklist {
        text = filter_bad_words(&text, blacklist);
    }

    let created_at = raw
        .created_at
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    DisplayMessage {
        id: raw.id.clone(),
        text,
        created_at,
        user: sender.clone(),
        status: raw.status,
        read_by: raw.read_by.clone(),
        kind: raw.kind.clone(),
    }
}
