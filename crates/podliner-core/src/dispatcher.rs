//! Colon-command tokenizer, alias/prefix resolver, and handler routing
//! (§4.4). Doesn't know how to execute a command, only how to classify one
//! and find the handler that wants it.

use std::collections::HashMap;

use crate::error::DispatchError;

/// Splits `input` on whitespace, honouring single/double quotes and
/// backslash-escaping. An unterminated quote is tolerated: the remainder of
/// the input becomes the final token rather than an error (§4.4 Tokenizer).
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                    continue;
                }
                current.push(c);
                continue;
            }
            if c == q {
                quote = None;
                continue;
            }
            current.push(c);
            continue;
        }

        match c {
            ' ' | '\t' => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' | '"' => {
                quote = Some(c);
                in_token = true;
            }
            '\\' => {
                in_token = true;
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            _ => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token || quote.is_some() {
        tokens.push(current);
    }
    tokens
}

/// Prepends `:` if absent and resolves a fixed alias map, case-insensitively
/// (§4.4 Canonicalisation).
pub fn canonicalize(command: &str) -> String {
    let lower = command.to_lowercase();
    let with_colon = if lower.starts_with(':') {
        lower
    } else {
        format!(":{lower}")
    };
    alias_map()
        .get(with_colon.as_str())
        .map(|s| s.to_string())
        .unwrap_or(with_colon)
}

fn alias_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: std::sync::OnceLock<HashMap<&'static str, &'static str>> = std::sync::OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([
            (":h", ":help"),
            (":q", ":quit"),
            (":q!", ":quit!"),
            (":w", ":write"),
            (":wq", ":write-quit"),
            (":x", ":write-quit"),
            (":a", ":add"),
            (":r", ":refresh"),
            (":rm-feed", ":remove-feed"),
        ])
    })
}

/// The full set of command kinds the dispatcher recognises (§4.4 Kind
/// mapping). Exact commands map 1:1; families are matched by prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Help,
    Quit,
    QuitForce,
    Write,
    WriteQuit,
    Add,
    Refresh,
    RemoveFeed,
    Engine,
    Opml,
    Search,
    Seek,
    Volume,
    Speed,
    Goto,
    Sort,
    Filter,
    Feed,
    History,
    Net,
    PlaySource,
    AudioPlayer,
    Theme,
    Logs,
    Osd,
    Jump,
    Replay,
    Save,
    Sync,
    Open,
    Copy,
    Unknown,
}

fn exact_map(name: &str) -> Option<CommandKind> {
    Some(match name {
        ":help" => CommandKind::Help,
        ":quit" => CommandKind::Quit,
        ":quit!" => CommandKind::QuitForce,
        ":write" => CommandKind::Write,
        ":write-quit" => CommandKind::WriteQuit,
        ":add" => CommandKind::Add,
        ":refresh" => CommandKind::Refresh,
        ":remove-feed" => CommandKind::RemoveFeed,
        _ => return None,
    })
}

const PREFIX_FAMILIES: &[(&str, CommandKind)] = &[
    (":engine", CommandKind::Engine),
    (":opml", CommandKind::Opml),
    (":search", CommandKind::Search),
    (":seek", CommandKind::Seek),
    (":vol", CommandKind::Volume),
    (":speed", CommandKind::Speed),
    (":goto", CommandKind::Goto),
    (":sort", CommandKind::Sort),
    (":filter", CommandKind::Filter),
    (":feed", CommandKind::Feed),
    (":history", CommandKind::History),
    (":net", CommandKind::Net),
    (":play-source", CommandKind::PlaySource),
    (":audioplayer", CommandKind::AudioPlayer),
    (":theme", CommandKind::Theme),
    (":logs", CommandKind::Logs),
    (":osd", CommandKind::Osd),
    (":jump", CommandKind::Jump),
    (":replay", CommandKind::Replay),
    (":save", CommandKind::Save),
    (":sync", CommandKind::Sync),
    (":open", CommandKind::Open),
    (":copy", CommandKind::Copy),
];

/// Classifies a canonicalised command name (§4.4 Kind mapping).
pub fn classify(canonical: &str) -> CommandKind {
    if let Some(kind) = exact_map(canonical) {
        return kind;
    }
    for (prefix, kind) in PREFIX_FAMILIES {
        if canonical.starts_with(prefix) {
            return *kind;
        }
    }
    CommandKind::Unknown
}

/// A parsed, classified invocation ready for routing.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    pub name: String,
    pub args: Vec<String>,
}

/// Tokenizes, canonicalises, and classifies a raw command line.
pub fn parse(input: &str) -> Option<ParsedCommand> {
    let mut tokens = tokenize(input);
    if tokens.is_empty() {
        return None;
    }
    let name = canonicalize(&tokens.remove(0));
    let kind = classify(&name);
    Some(ParsedCommand {
        kind,
        name,
        args: tokens,
    })
}

/// A handler declares which kinds it consumes and executes accepted ones.
pub trait CommandHandler: Send + Sync {
    fn accepts(&self, kind: CommandKind) -> bool;
    fn handle(&self, cmd: &ParsedCommand) -> Result<(), DispatchError>;
}

/// Routes a parsed command to the first handler that accepts its kind
/// (§4.4 Routing). Unhandled kinds are the caller's responsibility to
/// surface as an "unknown" on-screen message.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<Box<dyn CommandHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, input: &str) -> Result<(), DispatchError> {
        let Some(cmd) = parse(input) else {
            return Ok(());
        };
        for handler in &self.handlers {
            if handler.accepts(cmd.kind) {
                return handler.handle(&cmd);
            }
        }
        Err(DispatchError::Unknown(cmd.name))
    }
}

/// Parsed form of a `:seek` argument (§4.4 Argument parsing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekArg {
    RelativeSeconds(f64),
    AbsoluteSeconds(f64),
    Percent(f64),
}

pub fn parse_seek_arg(arg: &str) -> Option<SeekArg> {
    let arg = arg.trim();
    if let Some(pct) = arg.strip_suffix('%') {
        return pct.parse::<f64>().ok().map(SeekArg::Percent);
    }
    if arg.contains(':') {
        let parts: Vec<&str> = arg.split(':').collect();
        let secs = match parts.len() {
            2 => {
                let m: f64 = parts[0].parse().ok()?;
                let s: f64 = parts[1].parse().ok()?;
                m * 60.0 + s
            }
            3 => {
                let h: f64 = parts[0].parse().ok()?;
                let m: f64 = parts[1].parse().ok()?;
                let s: f64 = parts[2].parse().ok()?;
                h * 3600.0 + m * 60.0 + s
            }
            _ => return None,
        };
        return Some(SeekArg::AbsoluteSeconds(secs));
    }
    if let Some(rest) = arg.strip_prefix('+') {
        return rest.parse::<f64>().ok().map(SeekArg::RelativeSeconds);
    }
    if let Some(rest) = arg.strip_prefix('-') {
        return rest
            .parse::<f64>()
            .ok()
            .map(|v| SeekArg::RelativeSeconds(-v));
    }
    arg.parse::<f64>().ok().map(SeekArg::AbsoluteSeconds)
}

/// Parsed form of a `:vol`/`:speed` argument: either absolute or relative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaArg {
    Absolute(f64),
    Relative(f64),
}

pub fn parse_delta_arg(arg: &str) -> Option<DeltaArg> {
    let arg = arg.trim();
    if let Some(rest) = arg.strip_prefix('+') {
        return rest.parse::<f64>().ok().map(DeltaArg::Relative);
    }
    if let Some(rest) = arg.strip_prefix('-') {
        return rest.parse::<f64>().ok().map(|v| DeltaArg::Relative(-v));
    }
    arg.parse::<f64>().ok().map(DeltaArg::Absolute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_handles_quotes_and_escapes() {
        let tokens = tokenize(r#"search "the \"quoted\" pod""#);
        assert_eq!(tokens, vec!["search", "the \"quoted\" pod"]);
    }

    #[test]
    fn tokenizer_tolerates_unterminated_quote() {
        let tokens = tokenize(r#"search "unterminated"#);
        assert_eq!(tokens, vec!["search", "unterminated"]);
    }

    #[test]
    fn sync_login_roundtrip_matches_spec_scenario() {
        let cmd = parse(r#":sync login https://gpodder.net alice p@ss"#).unwrap();
        assert_eq!(cmd.kind, CommandKind::Sync);
        assert_eq!(
            cmd.args,
            vec!["login", "https://gpodder.net", "alice", "p@ss"]
        );
    }

    #[test]
    fn canonicalisation_prepends_colon_and_resolves_alias_case_insensitively() {
        assert_eq!(canonicalize("Q"), ":quit");
        assert_eq!(canonicalize(":WQ"), ":write-quit");
        assert_eq!(canonicalize("help"), ":help");
    }

    #[test]
    fn unknown_command_classifies_as_unknown() {
        assert_eq!(classify(":frobnicate"), CommandKind::Unknown);
    }

    #[test]
    fn prefix_family_matches_suffixed_subcommands() {
        assert_eq!(classify(":queue"), CommandKind::Unknown);
        assert_eq!(classify(":seek+10"), CommandKind::Seek);
        assert_eq!(classify(":opml"), CommandKind::Opml);
    }

    #[test]
    fn seek_arg_parses_all_forms() {
        assert_eq!(parse_seek_arg("+10"), Some(SeekArg::RelativeSeconds(10.0)));
        assert_eq!(parse_seek_arg("-10"), Some(SeekArg::RelativeSeconds(-10.0)));
        assert_eq!(parse_seek_arg("90"), Some(SeekArg::AbsoluteSeconds(90.0)));
        assert_eq!(parse_seek_arg("50%"), Some(SeekArg::Percent(50.0)));
        assert_eq!(parse_seek_arg("1:30"), Some(SeekArg::AbsoluteSeconds(90.0)));
        assert_eq!(
            parse_seek_arg("1:02:03"),
            Some(SeekArg::AbsoluteSeconds(3723.0))
        );
    }

    #[test]
    fn delta_arg_parses_absolute_and_relative() {
        assert_eq!(parse_delta_arg("50"), Some(DeltaArg::Absolute(50.0)));
        assert_eq!(parse_delta_arg("+5"), Some(DeltaArg::Relative(5.0)));
        assert_eq!(parse_delta_arg("-5"), Some(DeltaArg::Relative(-5.0)));
    }
}
