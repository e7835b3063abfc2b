//! URL Canonicalizer
//!
//! Expands a URL into the bounded, ordered set of host/path forms that the
//! remote list server hashes. The expansion has to match the server's
//! scheme exactly, otherwise lookups miss without any visible error.
//!
//! For `http://www.example.com/a/b/c?x=1` the forms are, per host variant
//! (`www.example.com`, `example.com`):
//!
//! ```text
//! <host>/
//! <host>/a/b/c?x=1
//! <host>/a/b/c
//! <host>/a/
//! <host>/a/b/
//! ```

use crate::digest::{digest, UrlDigest};
use crate::error::CanonicalError;
use tracing::debug;

const SCHEME: &str = "http://";

/// Host variants derived in addition to the literal host
const MAX_HOST_VARIANTS: usize = 4;

/// Path levels walked, counting the root
const MAX_PATH_LEVELS: usize = 4;

/// Upper bound on candidates for any URL
pub const MAX_CANDIDATES: usize = (1 + MAX_HOST_VARIANTS) * (2 + MAX_PATH_LEVELS);

/// One canonical form and its digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub form: String,
    pub digest: UrlDigest,
}

/// Ordered candidates for a single lookup
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    /// Canonicalize `url` and digest every form
    pub fn from_url(url: &str) -> Result<Self, CanonicalError> {
        let candidates = canonicalize(url)?
            .into_iter()
            .map(|form| {
                let digest = digest(&form);
                debug!("hash for {} = {}", form, digest);
                Candidate { form, digest }
            })
            .collect();

        Ok(Self { candidates })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Generate the canonical forms of `url` in emission order.
///
/// Fails for anything that is not a plain `http://` URL.
pub fn canonicalize(url: &str) -> Result<Vec<String>, CanonicalError> {
    let rest = strip_scheme(url).ok_or_else(|| {
        debug!("Not http protocol: {}", url);
        CanonicalError::UnsupportedScheme(url.to_string())
    })?;

    let (host, path, query) = split_rest(rest);

    let mut hosts = vec![host.to_string()];
    hosts.extend(host_variants(host));

    // The literal path always leads the path forms
    let mut paths = Vec::new();
    if !path.is_empty() {
        paths.push(path.to_string());
        paths.extend(path_variants(path));
    }

    let mut candidates = Vec::with_capacity(hosts.len() * (2 + paths.len()));
    for h in &hosts {
        push_unique(&mut candidates, format!("{}/", h));
        if let (Some(q), Some(first)) = (query, paths.first()) {
            push_unique(&mut candidates, format!("{}{}{}", h, first, q));
        }
        for p in &paths {
            push_unique(&mut candidates, format!("{}{}", h, p));
        }
    }

    if candidates.is_empty() {
        return Err(CanonicalError::Empty(url.to_string()));
    }
    Ok(candidates)
}

fn strip_scheme(url: &str) -> Option<&str> {
    url.get(..SCHEME.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(SCHEME))
        .map(|_| &url[SCHEME.len()..])
}

/// Split `host[/path][?query]`. The query keeps its leading `?`.
fn split_rest(rest: &str) -> (&str, &str, Option<&str>) {
    let host_end = rest.find(|c: char| c == '/' || c == '?').unwrap_or(rest.len());
    let (host, tail) = rest.split_at(host_end);
    match tail.find('?') {
        Some(idx) => (host, &tail[..idx], Some(&tail[idx..])),
        None => (host, tail, None),
    }
}

/// Suffixes of `host` built from the trailing labels, shortest first.
/// The top-level label alone and the literal host are never produced.
fn host_variants(host: &str) -> Vec<String> {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let mut variants = Vec::new();
    let Some((last, rest)) = labels.split_last() else {
        return variants;
    };

    let mut suffix = last.to_string();
    for label in rest.iter().rev().take(MAX_HOST_VARIANTS) {
        suffix = format!("{}.{}", label, suffix);
        if suffix != host {
            variants.push(suffix.clone());
        }
    }
    variants
}

/// Directory prefixes of `path` below the root, shallowest first.
/// The root itself is emitted separately as `<host>/`.
fn path_variants(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let trailing_slash = path.ends_with('/');

    let mut variants = Vec::new();
    let mut prefix = String::from("/");
    for (i, segment) in segments.iter().enumerate().take(MAX_PATH_LEVELS - 1) {
        prefix.push_str(segment);
        if i + 1 < segments.len() || trailing_slash {
            prefix.push('/');
        }
        if prefix != path {
            variants.push(prefix.clone());
        }
    }
    variants
}

fn push_unique(candidates: &mut Vec<String>, form: String) {
    if !candidates.contains(&form) {
        candidates.push(form);
    }
}
