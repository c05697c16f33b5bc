//! C4: parses and applies the xRegistry request-flag surface (spec.md 4.4) -- `filter`, `sort`,
//! `inline`, `doc`, `collections`, `epoch`, `schema`, `noreadonly`/`noepoch`/`specversion`, and
//! `limit`/`offset` pagination.
//!
//! Filtering is deliberately two-phase (spec.md 9's "run handler, fall back on error" redesign
//! flag): [`FilterSet::index_candidates`] runs over the cheap name index alone, and
//! [`FilterSet::matches_enriched`] is a second, bounded pass over a fully projected document.
//! Nothing here re-enters itself; a caller that can't enrich a candidate just drops it.

use std::collections::HashSet;

use serde_json::Value;

/// Everything the router needs from `?query=...`, parsed once per request.
#[derive(Debug, Default, Clone)]
pub struct Flags {
    pub filter: FilterSet,
    pub sort: Option<Sort>,
    pub inline: Inline,
    pub doc: bool,
    pub collections: Option<bool>,
    pub epoch: Option<u64>,
    pub schema: bool,
    pub noreadonly: bool,
    pub noepoch: bool,
    pub specversion: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("limit must be a positive integer")]
    BadLimit,
    #[error("offset must be a non-negative integer")]
    BadOffset,
    #[error("epoch must be a non-negative integer")]
    BadEpoch,
    #[error("unrecognized inline path: {0}")]
    UnknownInline(String),
}

impl Flags {
    /// Parses a raw (still percent-encoded) query string, the form axum hands back from
    /// `RawQuery` -- used instead of `axum::extract::Query` because `filter` is repeatable and
    /// a `HashMap`-backed extractor would silently drop all but the last occurrence.
    pub fn parse(raw_query: Option<&str>) -> Result<Flags, Error> {
        let mut flags = Flags {
            specversion: true,
            ..Flags::default()
        };
        let Some(raw_query) = raw_query else {
            return Ok(flags);
        };

        for pair in raw_query.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (decode(k), decode(v)),
                None => (decode(pair), String::new()),
            };
            match key.as_str() {
                "filter" => flags.filter.groups.push(FilterGroup::parse(&value)),
                "sort" => flags.sort = Some(Sort::parse(&value)),
                "inline" => flags.inline = Inline::parse(&value)?,
                "doc" => flags.doc = value != "false",
                "collections" => flags.collections = Some(value != "false"),
                "epoch" => flags.epoch = Some(value.parse().map_err(|_| Error::BadEpoch)?),
                "schema" => flags.schema = value != "false",
                "noreadonly" => flags.noreadonly = true,
                "noepoch" => flags.noepoch = true,
                "specversion" => flags.specversion = value != "false",
                "limit" => {
                    let n: usize = value.parse().map_err(|_| Error::BadLimit)?;
                    if n == 0 {
                        return Err(Error::BadLimit);
                    }
                    flags.limit = Some(n);
                }
                "offset" => flags.offset = value.parse().map_err(|_| Error::BadOffset)?,
                _ => {}
            }
        }
        Ok(flags)
    }

    /// Applies `noreadonly`/`noepoch`/`specversion=false` and, when `doc` is set, injects a
    /// `docs` summary property (spec.md 9's open-question resolution: `doc` does not
    /// relativize URLs, it only adds this property).
    pub fn strip_and_annotate(&self, doc: &mut serde_json::Map<String, Value>) {
        if self.noreadonly {
            doc.remove("readonly");
        }
        if self.noepoch {
            doc.remove("epoch");
        }
        if !self.specversion {
            doc.remove("specversion");
        }
        if self.doc {
            if let Some(xid) = doc.get("xid").and_then(Value::as_str) {
                doc.insert("docs".to_string(), Value::String(format!("Documentation for {xid}")));
            }
        }
        if self.collections == Some(false) {
            doc.retain(|k, _| !k.ends_with("url"));
        }
    }
}

fn decode(s: &str) -> String {
    urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string())
}

/// `attr<op>value` comma-joined (AND) clauses from one `filter=` occurrence.
#[derive(Debug, Clone)]
pub struct FilterGroup {
    pub clauses: Vec<Clause>,
}

impl FilterGroup {
    fn parse(expr: &str) -> FilterGroup {
        FilterGroup {
            clauses: expr.split(',').filter(|s| !s.is_empty()).filter_map(Clause::parse).collect(),
        }
    }

    fn name_clause(&self) -> Option<&Clause> {
        self.clauses.iter().find(|c| c.attr == "name")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub attr: String,
    pub op: Op,
    pub value: String,
}

impl Clause {
    fn parse(s: &str) -> Option<Clause> {
        const OPS: &[(&str, Op)] = &[
            ("!=", Op::Ne),
            ("<=", Op::Le),
            (">=", Op::Ge),
            ("=", Op::Eq),
            ("<", Op::Lt),
            (">", Op::Gt),
        ];
        for (token, op) in OPS {
            if let Some((attr, value)) = s.split_once(token) {
                return Some(Clause { attr: attr.to_string(), op: *op, value: value.to_string() });
            }
        }
        None
    }

    /// `*` globs, case-insensitive; only meaningful for `Eq`/`Ne` per spec.md 4.4.
    pub fn matches(&self, actual: &str) -> bool {
        let matched = glob_match_ci(&self.value, actual);
        match self.op {
            Op::Eq => matched,
            Op::Ne => !matched,
            Op::Lt => actual < self.value.as_str(),
            Op::Le => actual <= self.value.as_str(),
            Op::Gt => actual > self.value.as_str(),
            Op::Ge => actual >= self.value.as_str(),
        }
    }
}

fn glob_match_ci(pattern: &str, text: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if i == parts.len() - 1 {
            return text[pos..].ends_with(part);
        } else if let Some(found) = text[pos..].find(part) {
            pos += found + part.len();
        } else {
            return false;
        }
    }
    true
}

#[derive(Debug, Default, Clone)]
pub struct FilterSet {
    groups: Vec<FilterGroup>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups lacking a `name` clause are dropped outright (spec.md 8.5 / S5): they can never
    /// match anything, regardless of whatever other clauses they carry.
    fn active_groups(&self) -> Vec<&FilterGroup> {
        self.groups.iter().filter(|g| g.name_clause().is_some()).collect()
    }

    /// Phase 1: cheap pass over just the repository name index. Returns, per matching name,
    /// the groups whose name clause matched (each may still have more clauses to check).
    pub fn index_candidates<'a>(&'a self, names: &[String]) -> Vec<(String, Vec<&'a FilterGroup>)> {
        if self.groups.is_empty() {
            return names.iter().map(|n| (n.clone(), Vec::new())).collect();
        }
        let active = self.active_groups();
        if active.is_empty() {
            return Vec::new();
        }
        names
            .iter()
            .filter_map(|name| {
                let matching: Vec<&FilterGroup> = active
                    .iter()
                    .filter(|g| g.name_clause().unwrap().matches(name))
                    .copied()
                    .collect();
                if matching.is_empty() {
                    None
                } else {
                    Some((name.clone(), matching))
                }
            })
            .collect()
    }

    /// Phase 2: a candidate passes if any of its attached groups' *remaining* clauses all
    /// match against the fully projected document. Never re-invokes phase 1.
    pub fn matches_enriched(&self, groups: &[&FilterGroup], doc: &Value) -> bool {
        if groups.is_empty() {
            return true;
        }
        groups.iter().any(|g| {
            g.clauses
                .iter()
                .filter(|c| c.attr != "name")
                .all(|c| {
                    let actual = lookup_dotted(doc, &c.attr);
                    match actual {
                        Some(actual) => c.matches(&actual),
                        None => false,
                    }
                })
        })
    }

    /// `true` when at least one occurrence had no `name` clause anywhere attached to it --
    /// callers use [`FilterSet::active_groups`] to decide emptiness, this is just for tests.
    #[cfg(test)]
    fn has_any_name_clause(&self) -> bool {
        !self.active_groups().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub attr: String,
    pub dir: SortDir,
}

impl Sort {
    fn parse(value: &str) -> Sort {
        match value.split_once('=') {
            Some((attr, "desc")) => Sort { attr: attr.to_string(), dir: SortDir::Desc },
            Some((attr, _)) => Sort { attr: attr.to_string(), dir: SortDir::Asc },
            None => Sort { attr: value.to_string(), dir: SortDir::Asc },
        }
    }

    /// Stable sort by the dotted attribute path; missing paths sort as if `null` (spec.md 4.4).
    pub fn apply<T>(&self, items: &mut [T], key: impl Fn(&T) -> &Value) {
        items.sort_by(|a, b| {
            let av = lookup_dotted(key(a), &self.attr);
            let bv = lookup_dotted(key(b), &self.attr);
            let ordering = av.cmp(&bv);
            match self.dir {
                SortDir::Asc => ordering,
                SortDir::Desc => ordering.reverse(),
            }
        });
    }
}

fn lookup_dotted(doc: &Value, path: &str) -> Option<String> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

const INLINE_WHITELIST: &[&str] = &["versions", "meta", "model", "endpoints"];

/// Bounded per spec.md 9's "cyclic expansion via `inline=*`" note: only the whitelisted
/// collection names are ever dereferenced, even when the caller asks for `*`.
#[derive(Debug, Default, Clone)]
pub enum Inline {
    #[default]
    None,
    Some(HashSet<String>),
    All,
}

impl Inline {
    fn parse(value: &str) -> Result<Inline, Error> {
        if value == "*" {
            return Ok(Inline::All);
        }
        let mut set = HashSet::new();
        for path in value.split(',').filter(|s| !s.is_empty()) {
            if !INLINE_WHITELIST.contains(&path) {
                return Err(Error::UnknownInline(path.to_string()));
            }
            set.insert(path.to_string());
        }
        Ok(Inline::Some(set))
    }

    pub fn wants(&self, name: &str) -> bool {
        match self {
            Inline::None => false,
            Inline::All => INLINE_WHITELIST.contains(&name),
            Inline::Some(set) => set.contains(name),
        }
    }
}

/// RFC 5988 pagination headers (spec.md 6). `base` is the collection URL without query string.
pub struct Page {
    pub items_start: usize,
    pub items_end: usize,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn compute(total: usize, limit: Option<usize>, offset: usize) -> Page {
        let limit = limit.unwrap_or(total.max(1));
        let start = offset.min(total);
        let end = (offset + limit).min(total);
        Page { items_start: start, items_end: end, total, limit, offset }
    }

    pub fn link_header(&self, base: &str) -> String {
        let last_offset = if self.total == 0 {
            0
        } else {
            ((self.total - 1) / self.limit) * self.limit
        };
        let mut links = vec![format!(
            "<{base}?limit={}&offset=0>; rel=\"first\"",
            self.limit
        )];
        if self.offset > 0 {
            let prev = self.offset.saturating_sub(self.limit);
            links.push(format!("<{base}?limit={}&offset={prev}>; rel=\"prev\"", self.limit));
        }
        if self.offset + self.limit < self.total {
            links.push(format!(
                "<{base}?limit={}&offset={}>; rel=\"next\"",
                self.limit,
                self.offset + self.limit
            ));
        }
        links.push(format!(
            "<{base}?limit={}&offset={last_offset}>; rel=\"last\"",
            self.limit
        ));
        format!(
            "{}, count=\"{}\", per-page=\"{}\"",
            links.join(", "),
            self.total,
            self.limit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_repeated_filter_as_separate_or_groups() {
        let flags = Flags::parse(Some("filter=name=nginx&filter=name=redis")).unwrap();
        assert_eq!(flags.filter.groups.len(), 2);
    }

    #[test]
    fn filter_without_name_clause_is_dropped() {
        let flags = Flags::parse(Some("filter=description=*foo*")).unwrap();
        assert!(!flags.filter.has_any_name_clause());
        let candidates = flags.filter.index_candidates(&["nginx".to_string()]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn name_glob_matches_case_insensitively() {
        let flags = Flags::parse(Some("filter=name=*NGINX*")).unwrap();
        let candidates = flags.filter.index_candidates(&["library/nginx".to_string()]);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn limit_zero_is_rejected() {
        assert!(matches!(Flags::parse(Some("limit=0")), Err(Error::BadLimit)));
    }

    #[test]
    fn inline_rejects_unknown_paths() {
        assert!(Flags::parse(Some("inline=bogus")).is_err());
        assert!(Flags::parse(Some("inline=versions,meta")).is_ok());
        assert!(Flags::parse(Some("inline=*")).is_ok());
    }

    #[test]
    fn sort_defaults_ascending_and_is_stable_for_ties() {
        let sort = Sort::parse("name");
        assert_eq!(sort.dir, SortDir::Asc);
        let mut items = vec![json!({"name": "b", "seq": 1}), json!({"name": "a", "seq": 2}), json!({"name": "a", "seq": 3})];
        sort.apply(&mut items, |v| v);
        assert_eq!(items[0]["seq"], json!(2));
        assert_eq!(items[1]["seq"], json!(3));
        assert_eq!(items[2]["name"], json!("b"));
    }

    #[test]
    fn pagination_arithmetic_matches_spec_example() {
        // N=23, limit=10, offset=10 (spec.md S8): prev+next+last at offset 20.
        let page = Page::compute(23, Some(10), 10);
        let header = page.link_header("https://x/images");
        assert!(header.contains("rel=\"prev\""));
        assert!(header.contains("rel=\"next\""));
        assert!(header.contains("offset=20>; rel=\"last\""));
        assert_eq!(page.items_start, 10);
        assert_eq!(page.items_end, 20);
    }

    #[test]
    fn no_next_link_at_collection_boundary() {
        let page = Page::compute(5, Some(10), 0);
        let header = page.link_header("https://x/images");
        assert!(!header.contains("rel=\"next\""));
    }
}
