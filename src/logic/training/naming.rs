//! Candidate naming
//!
//! `<stem>_v.<major>.<minor>.<patch>[.<suffix>]` bumps the patch; anything
//! else gets a fresh `model_<uuid>`.

use once_cell::sync::Lazy;
use regex::Regex;

static VERSIONED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<stem>.+_v)\.(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)(?P<suffix>\..*)?$").unwrap()
});

/// Patch bumps tried before giving up on the versioned scheme
const MAX_VERSION_STEPS: u64 = 1000;

/// Fresh uuid names tried before giving up
const MAX_UUID_ATTEMPTS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum NamingError<E> {
    #[error("name lookup failed: {0}")]
    Lookup(E),
    #[error("no free candidate name")]
    Exhausted,
}

/// Next free candidate name after `predecessor`
///
/// `exists` errors abort the search instead of counting as "taken".
pub fn next_candidate_name<E>(
    predecessor: Option<&str>,
    exists: impl Fn(&str) -> Result<bool, E>,
) -> Result<String, NamingError<E>> {
    let taken = |name: &str| exists(name).map_err(NamingError::Lookup);

    if let Some(p) = predecessor {
        if let Some(name) = next_versioned(p, &taken)? {
            return Ok(name);
        }
    }
    for _ in 0..MAX_UUID_ATTEMPTS {
        let name = format!("model_{}", uuid::Uuid::new_v4().simple());
        if !taken(&name)? {
            return Ok(name);
        }
    }
    Err(NamingError::Exhausted)
}

fn next_versioned<E>(
    predecessor: &str,
    taken: &impl Fn(&str) -> Result<bool, NamingError<E>>,
) -> Result<Option<String>, NamingError<E>> {
    let Some(caps) = VERSIONED_NAME.captures(predecessor) else {
        return Ok(None);
    };

    let stem = &caps["stem"];
    let suffix = caps.name("suffix").map_or("", |m| m.as_str());
    let (Ok(major), Ok(minor), Ok(patch)) = (
        caps["major"].parse::<u64>(),
        caps["minor"].parse::<u64>(),
        caps["patch"].parse::<u64>(),
    ) else {
        return Ok(None);
    };

    for step in 1..=MAX_VERSION_STEPS {
        let name = format!("{}.{}.{}.{}{}", stem, major, minor, patch.saturating_add(step), suffix);
        if !taken(&name)? {
            return Ok(Some(name));
        }
    }
    Ok(None)
}
