use crate::SchemaError;
use std::fmt;
use std::str::FromStr;

const MAX_NAME_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// A repository name bound to a tag, e.g. `registry.local:5000/team/app:v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    name: String,
    tag: String,
}

impl Reference {
    /// Build a reference from a repository name and a tag, validating both.
    pub fn new(name: &str, tag: &str) -> Result<Self, SchemaError> {
        validate_name(name)?;
        validate_tag(tag)?;
        Ok(Self {
            name: name.to_owned(),
            tag: tag.to_owned(),
        })
    }

    /// Parse `name:tag`. A tag is mandatory; digest references are rejected.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        if s.contains('@') {
            return Err(SchemaError::InvalidReference(format!(
                "{s}: digest references cannot be tagged"
            )));
        }
        let (name, tag) = split_tag(s);
        let tag =
            tag.ok_or_else(|| SchemaError::InvalidReference(format!("{s}: missing tag")))?;
        Self::new(name, tag)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for Reference {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split `name[:tag]`. The tag separator is the last `:` after the last `/`,
/// so a registry port is never mistaken for a tag.
fn split_tag(s: &str) -> (&str, Option<&str>) {
    let last_slash = s.rfind('/').map_or(0, |i| i + 1);
    match s[last_slash..].rfind(':') {
        Some(i) => (&s[..last_slash + i], Some(&s[last_slash + i + 1..])),
        None => (s, None),
    }
}

/// Validate a repository name: optional registry domain, then lowercase path components.
pub fn validate_name(name: &str) -> Result<(), SchemaError> {
    let invalid = |why: &str| SchemaError::InvalidReference(format!("{name}: {why}"));

    if name.is_empty() {
        return Err(invalid("empty repository name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("repository name too long"));
    }

    let mut components = name.split('/').peekable();
    if let Some(first) = components.peek().copied() {
        let has_more = name.contains('/');
        if has_more && (first.contains('.') || first.contains(':') || first == "localhost") {
            validate_domain(first).map_err(|()| invalid("invalid registry domain"))?;
            components.next();
        }
    }

    let mut seen = false;
    for component in components {
        if !is_path_component(component) {
            return Err(invalid("repository name must be lowercase alphanumeric components"));
        }
        seen = true;
    }
    if !seen {
        return Err(invalid("missing repository path"));
    }
    Ok(())
}

pub fn validate_tag(tag: &str) -> Result<(), SchemaError> {
    let valid = !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && tag
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidReference(format!("invalid tag '{tag}'")))
    }
}

/// `[a-z0-9]+` runs joined by `.`, `_`, `__`, or one or more `-`.
fn is_path_component(s: &str) -> bool {
    let bytes = s.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if bytes.is_empty() || !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let sep = &s[start..i];
        let ok = matches!(sep, "." | "_" | "__") || sep.bytes().all(|b| b == b'-');
        if !ok {
            return false;
        }
    }
    true
}

fn validate_domain(domain: &str) -> Result<(), ()> {
    let (host, port) = match domain.rsplit_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (domain, None),
    };
    if host.is_empty()
        || host.starts_with(['.', '-'])
        || host.ends_with(['.', '-'])
        || !host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return Err(());
    }
    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(());
        }
    }
    Ok(())
}
