use std::collections::HashSet;

const MAX_NAME_BYTES: usize = 120;

/// Archive entry name for a fetched resource: the sanitized final path segment
/// of `url`, or `item_{index}` when the URL has no usable segment.
pub fn content_name(url: &str, sequence_index: usize) -> String {
    let segment = match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(ToOwned::to_owned),
        Err(_) => raw_last_segment(url),
    };
    let sanitized = segment.as_deref().map(sanitize).unwrap_or_default();
    if sanitized.is_empty() {
        format!("item_{sequence_index:04}")
    } else {
        sanitized
    }
}

/// `{prefix}_{user_context}.zip`, with the context sanitized like an entry
/// name.
pub fn archive_file_name(prefix: &str, user_context: &str) -> String {
    let context = sanitize(user_context);
    if context.is_empty() {
        format!("{prefix}.zip")
    } else {
        format!("{prefix}_{context}.zip")
    }
}

fn raw_last_segment(url: &str) -> Option<String> {
    let without_suffix = url.split(['?', '#']).next().unwrap_or(url);
    without_suffix
        .split('/')
        .filter(|s| !s.is_empty())
        .last()
        .map(ToOwned::to_owned)
}

fn sanitize(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let mut name = cleaned.trim_matches(&['_', ' ', '.'][..]).to_string();
    if name.len() > MAX_NAME_BYTES {
        let mut cut = MAX_NAME_BYTES;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    if is_reserved_windows_name(stem_and_extension(&name).0) {
        name.insert(0, '_');
    }
    name
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

fn stem_and_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

/// Names already used in one archive.
///
/// The first claimant of a name keeps it; later claimants get
/// `{stem}_{sequence_index}{ext}`, then a counter if that is taken too.
#[derive(Debug, Default, Clone)]
pub struct EntryNames {
    taken: HashSet<String>,
}

impl EntryNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    /// Reserves a unique name derived from `wanted` and returns it.
    pub fn claim(&mut self, wanted: &str, sequence_index: usize) -> String {
        if self.taken.insert(wanted.to_string()) {
            return wanted.to_string();
        }
        let (stem, ext) = stem_and_extension(wanted);
        let mut candidate = format!("{stem}_{sequence_index}{ext}");
        let mut counter = 2usize;
        while self.taken.contains(&candidate) {
            candidate = format!("{stem}_{sequence_index}_{counter}{ext}");
            counter += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}
