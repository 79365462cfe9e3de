//! Translation and cipher utilities.
//!
//! Descriptions arrive in many languages and occasionally in Morse or binary
//! encodings used to dodge text filters. `translate` decodes ciphers locally
//! and sends everything else to the configured translation endpoint.
//! Callers fall back to the original text when translation fails.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("translation endpoint returned no text")]
    EmptyResponse,

    #[error("no translation endpoint configured")]
    NoEndpoint,
}

static MORSE_TABLE: LazyLock<HashMap<&'static str, char>> = LazyLock::new(|| {
    HashMap::from([
        (".-", 'A'),
        ("-...", 'B'),
        ("-.-.", 'C'),
        ("-..", 'D'),
        (".", 'E'),
        ("..-.", 'F'),
        ("--.", 'G'),
        ("....", 'H'),
        ("..", 'I'),
        (".---", 'J'),
        ("-.-", 'K'),
        (".-..", 'L'),
        ("--", 'M'),
        ("-.", 'N'),
        ("---", 'O'),
        (".--.", 'P'),
        ("--.-", 'Q'),
        (".-.", 'R'),
        ("...", 'S'),
        ("-", 'T'),
        ("..-", 'U'),
        ("...-", 'V'),
        (".--", 'W'),
        ("-..-", 'X'),
        ("-.--", 'Y'),
        ("--..", 'Z'),
        ("-----", '0'),
        (".----", '1'),
        ("..---", '2'),
        ("...--", '3'),
        ("....-", '4'),
        (".....", '5'),
        ("-....", '6'),
        ("--...", '7'),
        ("---..", '8'),
        ("----.", '9'),
        (".-.-.-", '.'),
        ("--..--", ','),
        ("..--..", '?'),
        ("-.-.--", '!'),
        ("-....-", '-'),
        ("-..-.", '/'),
        ("---...", ':'),
        (".----.", '\''),
        (".-..-.", '"'),
    ])
});

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

pub struct Translator {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl Translator {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            endpoint,
        }
    }

    /// Translate `text` into `target`. Morse and binary inputs are decoded
    /// locally and never leave the process.
    pub async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(String::new());
        }

        if is_morse(trimmed) {
            debug!("Decoded Morse content locally");
            return Ok(decode_morse(trimmed));
        }
        if is_binary(trimmed) {
            debug!("Decoded binary content locally");
            return Ok(decode_binary(trimmed));
        }

        let endpoint = self.endpoint.as_deref().ok_or(TranslateError::NoEndpoint)?;

        let response = self
            .http
            .post(format!("{endpoint}/translate"))
            .json(&serde_json::json!({
                "q": trimmed,
                "source": source,
                "target": target,
                "format": "text",
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<TranslateResponse>()
            .await?;

        if response.translated_text.is_empty() {
            return Err(TranslateError::EmptyResponse);
        }
        Ok(response.translated_text)
    }
}

/// Morse input uses only dots, dashes, word separators and whitespace.
fn is_morse(text: &str) -> bool {
    let mut has_signal = false;
    for c in text.chars() {
        match c {
            '.' | '-' => has_signal = true,
            '/' => {}
            c if c.is_whitespace() => {}
            _ => return false,
        }
    }
    has_signal
}

/// Binary input is groups of eight 0/1 digits.
fn is_binary(text: &str) -> bool {
    let mut has_group = false;
    for group in text.split_whitespace() {
        if group.len() != 8 || !group.chars().all(|c| c == '0' || c == '1') {
            return false;
        }
        has_group = true;
    }
    has_group
}

/// Decode Morse: tokens separated by whitespace, words by `/`. Unknown codes
/// are dropped.
pub fn decode_morse(input: &str) -> String {
    let mut out = String::new();
    for token in input.split_whitespace() {
        if token == "/" {
            out.push(' ');
            continue;
        }
        if let Some(c) = MORSE_TABLE.get(token) {
            out.push(*c);
        }
    }
    out
}

/// Decode groups of eight bits into ASCII characters. Invalid groups are
/// dropped.
pub fn decode_binary(input: &str) -> String {
    input
        .split_whitespace()
        .filter_map(|group| u8::from_str_radix(group, 2).ok())
        .map(|byte| byte as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_word() {
        assert_eq!(decode_morse(".... . .-.. .-.. ---"), "HELLO");
    }

    #[test]
    fn decodes_multiple_words() {
        assert_eq!(
            decode_morse(".... . .-.. .-.. --- / .-- --- .-. .-.. -.."),
            "HELLO WORLD"
        );
    }

    #[test]
    fn decodes_numbers() {
        assert_eq!(decode_morse("... --- ... / .---- ..--- ...--"), "SOS 123");
    }

    #[test]
    fn decodes_punctuation() {
        assert_eq!(
            decode_morse(".... . .-.. .-.. --- -.-.-- / .-- --- .-. .-.. -.. .-.-.-"),
            "HELLO! WORLD."
        );
    }

    #[test]
    fn drops_invalid_codes() {
        assert_eq!(decode_morse(".... . .-.. xxx ---"), "HELO");
    }

    #[test]
    fn tolerates_extra_spaces() {
        assert_eq!(decode_morse("....   .   .-..   .-..   ---"), "HELLO");
    }

    #[test]
    fn empty_input_decodes_to_empty() {
        assert_eq!(decode_morse(""), "");
    }

    #[test]
    fn decodes_binary_groups() {
        assert_eq!(decode_binary("01101000 01101001"), "hi");
    }

    #[test]
    fn detects_encodings() {
        assert!(is_morse(".... . .-.. .-.. ---"));
        assert!(!is_morse("hello there"));
        assert!(is_binary("01101000 01101001"));
        assert!(!is_binary("0110 1000"));
    }

    #[tokio::test]
    async fn morse_translates_without_endpoint() {
        let translator = Translator::new(None);
        let out = translator
            .translate("... --- ...", "auto", "en")
            .await
            .unwrap();
        assert_eq!(out, "SOS");
    }
}
