//! Subject and filter matching.
//!
//! Two grammars meet here:
//!
//! - **bus subjects**: `.`-separated tokens; `*` matches one token, `>`
//!   matches one or more trailing tokens;
//! - **edge filters**: MQTT `/`-separated levels; `+` matches one level,
//!   `#` matches zero or more trailing levels.

/// Returns `true` if a bus `pattern` matches a concrete `subject`.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            // `>` needs at least one token to consume.
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Returns `true` if an MQTT `filter` matches an edge `topic`.
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let filter_levels: Vec<&str> = filter.split('/').collect();
    let topic_levels: Vec<&str> = topic.split('/').collect();

    let mut ti = 0;
    for level in filter_levels.iter() {
        if *level == "#" {
            return true;
        }
        let Some(topic_level) = topic_levels.get(ti) else {
            return false;
        };
        if *level != "+" && level != topic_level {
            return false;
        }
        ti += 1;
    }
    ti == topic_levels.len()
}

/// A concrete subject: non-empty tokens, no wildcards.
pub fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split('.')
            .all(|t| !t.is_empty() && t != "*" && t != ">")
}

/// A subscription pattern: non-empty tokens, `>` only as the last token.
pub fn is_valid_pattern(pattern: &str) -> bool {
    let tokens: Vec<&str> = pattern.split('.').collect();
    !pattern.is_empty()
        && tokens.iter().enumerate().all(|(i, t)| {
            !t.is_empty() && (*t != ">" || i + 1 == tokens.len())
        })
}
