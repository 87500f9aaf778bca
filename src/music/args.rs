//! Parser for the extra argument string of `NewEx`.
//!
//! The string is a sequence of `<letter><value>;` tokens. The very first
//! value carries no letter and selects the track number. A value starting
//! with `=` is a float/string sub-value (`t=1.25`). Unknown letters are kept
//! but otherwise ignored, and the final `;` may be omitted.
//!
//! Known letters:
//! - `e`: disable echo (integer)
//! - `t=`: tempo multiplier, `<= 0` resets to 1.0
//! - `g=`: gain multiplier, `< 0` resets to 1.0

/// One raw `<letter><value>` token
#[derive(Debug, Clone, PartialEq)]
pub struct ArgToken {
    /// `'-'` for the leading untyped value
    pub key: char,
    pub value: String,
}

/// Parsed `NewEx` arguments
#[derive(Debug, Clone, PartialEq)]
pub struct MusicArgs {
    pub track: i32,
    pub echo_disable: bool,
    pub tempo: f64,
    pub gain: f32,
    pub tokens: Vec<ArgToken>,
}

impl Default for MusicArgs {
    fn default() -> Self {
        Self {
            track: 0,
            echo_disable: false,
            tempo: 1.0,
            gain: 1.0,
            tokens: Vec::new(),
        }
    }
}

impl MusicArgs {
    /// Parse an argument string. Never fails: malformed values read as zero.
    pub fn parse(args: &str) -> Self {
        let mut parsed = MusicArgs::default();
        if args.is_empty() {
            return parsed;
        }

        let mut key = '-';
        let mut value = String::new();
        let mut value_open = true;

        for c in args.chars().map(Some).chain(std::iter::once(None)) {
            if value_open {
                match c {
                    Some(';') | None => {
                        parsed.apply(key, &value);
                        parsed.tokens.push(ArgToken {
                            key,
                            value: std::mem::take(&mut value),
                        });
                        value_open = false;
                    }
                    Some(ch) => value.push(ch),
                }
            } else {
                match c {
                    None => break,
                    Some(ch) => {
                        key = ch;
                        value.clear();
                        value_open = true;
                    }
                }
            }
        }

        parsed
    }

    fn apply(&mut self, key: char, value: &str) {
        match key {
            '-' => self.track = parse_int(value),
            'e' => self.echo_disable = parse_int(value) != 0,
            't' => {
                if let Some(sub) = value.strip_prefix('=') {
                    self.tempo = parse_float(sub);
                    if self.tempo <= 0.0 {
                        self.tempo = 1.0;
                    }
                }
            }
            'g' => {
                if let Some(sub) = value.strip_prefix('=') {
                    self.gain = parse_float(sub) as f32;
                    if self.gain < 0.0 {
                        self.gain = 1.0;
                    }
                }
            }
            other => log::debug!("ignoring unknown music argument '{}'", other),
        }
    }

    /// Raw value of the last token with `key`
    pub fn get(&self, key: char) -> Option<&str> {
        self.tokens
            .iter()
            .rev()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Leading-integer parse: optional sign then digits, anything else ends it.
fn parse_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (neg, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(|b| b.is_ascii_digit()) {
        value = (value * 10 + (b - b'0') as i64).min(i32::MAX as i64 + 1);
    }
    let value = if neg { -value } else { value };
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Longest-prefix float parse; no number reads as 0.0.
fn parse_float(s: &str) -> f64 {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    (1..=end)
        .rev()
        .find_map(|len| s[..len].parse::<f64>().ok())
        .unwrap_or(0.0)
}
