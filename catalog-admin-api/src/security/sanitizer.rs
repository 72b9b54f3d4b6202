//! Input sanitization
//!
//! Every string reaching a handler (body values and keys, path and query
//! parameters) passes through [`InputSanitizer`]. Injection-like input is
//! neutralized rather than rejected, and each detection is reported to the
//! injected [`SecurityEventSink`].
//!
//! Per string, in order:
//! 1. control characters are stripped (tab, LF and CR survive)
//! 2. NFKC normalization
//! 3. SQL injection: quote, comment and semicolon syntax is stripped from
//!    matched spans (tautologies also lose their comparison operator)
//! 4. XSS detection on the unencoded text
//! 5. path traversal sequences are removed until none remain
//! 6. command chaining and substitution spans lose their metacharacters and
//!    command names
//! 7. a detected LDAP filter injection loses its filter metacharacters
//!
//! Steps 5 to 7 repeat until the string stops changing.
//! 8. on any XSS match the whole string is HTML-entity encoded
//! 9. trim, then truncate to the configured length
//!
//! Entities produced by [`html_encode`] are left intact by steps 3 to 7, so
//! sanitizing encoded output again yields the same string.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use catalog_admin_core::{
    RequestOrigin, SecurityEvent, SecurityEventSink, SecurityEventType, Severity,
};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

/// Strings longer than this (in characters) are truncated
pub const DEFAULT_MAX_LENGTH: usize = 10_000;

/// Characters of the offending input copied into event details
const SAMPLE_LEN: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    pub max_length: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

// (name, pattern, strips comparison operators)
const SQL_RULES: &[(&str, &str, bool)] = &[
    (
        "sql_keyword",
        r"(?i)\b(?:select\s+[\w*,\s]+?\s+from|insert\s+into|update\s+\w+\s+set|delete\s+from|drop\s+(?:table|database|schema)|alter\s+table|truncate\s+table|exec(?:ute)?\s+(?:xp_|sp_)\w*)",
        false,
    ),
    (
        "comment_syntax",
        r#"(?:['"]\s*(?:--|#|/\*)|;\s*--|/\*.*?\*/)"#,
        false,
    ),
    (
        "boolean_tautology",
        r#"(?i)['"]\s*(?:or|and)\s+['"]?[\w-]*['"]?\s*(?:=|<>|!=|\blike\b)\s*['"]?[\w-]*['"]?"#,
        true,
    ),
    (
        "numeric_tautology",
        r"(?i)\b(?:or|and)\s+\d+\s*=\s*\d+\b",
        true,
    ),
    (
        "time_based",
        r"(?i)(?:\b(?:sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b)",
        false,
    ),
    ("union_based", r"(?i)\bunion\s+(?:all\s+)?select\b", false),
    (
        "error_based",
        r"(?i)\b(?:extractvalue|updatexml|xmltype|dbms_pipe)\s*\(",
        false,
    ),
    (
        "stacked_query",
        r"(?i);\s*(?:drop|alter|create|truncate|insert|update|delete|select|exec|shutdown)\b",
        false,
    ),
];

const XSS_RULES: &[(&str, &str)] = &[
    ("script_tag", r"(?i)<\s*/?\s*script"),
    ("event_handler", r#"(?i)(?:<[^>]*|["'\s/])on[a-z]{3,}\s*="#),
    ("javascript_uri", r"(?i)\bjavascript\s*:"),
    (
        "data_uri",
        r"(?i)\bdata\s*:\s*(?:text/html|image/svg\+xml|application/(?:x-)?javascript)",
    ),
    ("iframe", r"(?i)<\s*iframe"),
    (
        "dangerous_tag",
        r"(?i)<\s*(?:object|embed|applet|meta|link|style|svg|base|form)\b",
    ),
    ("css_expression", r"(?i)\bexpression\s*\("),
    ("css_import", r"(?i)@import"),
    ("vbscript_uri", r"(?i)\bvbscript\s*:"),
];

const TRAVERSAL_RULES: &[(&str, &str)] = &[
    ("dot_dot_slash", r"\.\.[/\\]"),
    ("encoded_dot_dot_slash", r"(?i)(?:%2e|\.)(?:%2e|\.)(?:%2f|%5c)"),
    ("encoded_dot_dot", r"(?i)%2e%2e[/\\]"),
    ("double_encoded", r"(?i)%252e%252e(?:%252f|%255c)"),
];

const COMMAND_NAMES: &str = r"cat|ls|rm|mv|cp|wget|curl|nc|ncat|netcat|bash|sh|zsh|python[23]?|perl|ruby|php|chmod|chown|kill|whoami|id|uname|ping|nslookup|powershell|cmd";

const LDAP_RULES: &[(&str, &str)] = &[
    ("filter_break", r"\*\s*\)\s*\("),
    ("filter_injection", r"\)\s*\(\s*[|&!]"),
    ("filter_open", r"\(\s*[|&!]\s*\("),
];

/// Entities [`html_encode`] emits
const ENCODED_ENTITY: &str = r"&(?:amp|lt|gt|quot|#x27|#x2F|#x3D|#x60);";

/// Stands in for an entity's closing `;` while rules run. NUL never survives
/// the control-character strip, so it cannot collide with input.
const ENTITY_MASK: char = '\0';

const SQL_STRIP_CHARS: &[char] = &['\'', '"', ';', '#'];
const COMMAND_STRIP_CHARS: &[char] = &[';', '&', '|', '$', '`', '(', ')', '{', '}', '<', '>', '\\'];
const LDAP_STRIP_CHARS: &[char] = &['(', ')', '*', '|', '&', '!', '\\'];

/// Threat categories the sanitizer reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Threat {
    Sql,
    Xss,
    PathTraversal,
    Command,
    Ldap,
    Oversized,
}

impl Threat {
    fn event_type(self) -> SecurityEventType {
        match self {
            Threat::Sql => SecurityEventType::SqlInjectionAttempt,
            Threat::Xss => SecurityEventType::XssAttempt,
            Threat::PathTraversal => SecurityEventType::PathTraversalAttempt,
            Threat::Command => SecurityEventType::CommandInjectionAttempt,
            Threat::Ldap => SecurityEventType::LdapInjectionAttempt,
            Threat::Oversized => SecurityEventType::OversizedInput,
        }
    }

    fn severity(self) -> Severity {
        match self {
            Threat::Sql | Threat::Xss | Threat::Command => Severity::High,
            Threat::PathTraversal | Threat::Ldap | Threat::Oversized => Severity::Medium,
        }
    }
}

struct ThreatPattern {
    name: &'static str,
    regex: Regex,
    strips_operators: bool,
}

impl ThreatPattern {
    fn compile(rules: &[(&'static str, &str)]) -> Vec<Self> {
        rules
            .iter()
            .filter_map(|&(name, pattern)| Self::new(name, pattern, false))
            .collect()
    }

    fn new(name: &'static str, pattern: &str, strips_operators: bool) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(regex) => Some(Self {
                name,
                regex,
                strips_operators,
            }),
            Err(e) => {
                tracing::error!(pattern = name, error = %e, "Failed to compile sanitizer pattern");
                None
            }
        }
    }
}

/// Detections for a single string, at most one entry per category
#[derive(Debug, Default)]
struct Findings {
    hits: Vec<(Threat, Vec<&'static str>)>,
}

impl Findings {
    fn note(&mut self, threat: Threat, pattern: &'static str) {
        match self.hits.iter_mut().find(|(t, _)| *t == threat) {
            Some((_, names)) => {
                if !names.contains(&pattern) {
                    names.push(pattern);
                }
            }
            None => self.hits.push((threat, vec![pattern])),
        }
    }

    fn contains(&self, threat: Threat) -> bool {
        self.hits.iter().any(|(t, _)| *t == threat)
    }
}

/// Pattern-based detector and neutralizer for injection payloads
pub struct InputSanitizer {
    max_length: usize,
    sql: Vec<ThreatPattern>,
    xss: Vec<ThreatPattern>,
    traversal: Vec<ThreatPattern>,
    command: Vec<ThreatPattern>,
    command_names: Option<Regex>,
    ldap: Vec<ThreatPattern>,
    entities: Option<Regex>,
    sink: Option<Arc<dyn SecurityEventSink>>,
}

impl fmt::Debug for InputSanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSanitizer")
            .field("max_length", &self.max_length)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for InputSanitizer {
    fn default() -> Self {
        Self::new(&SanitizerConfig::default())
    }
}

impl InputSanitizer {
    pub fn new(config: &SanitizerConfig) -> Self {
        let sql = SQL_RULES
            .iter()
            .filter_map(|&(name, pattern, ops)| ThreatPattern::new(name, pattern, ops))
            .collect();

        let command_rules = [
            (
                "chained_command",
                format!(r"(?i)[;&|]+\s*(?:{})(?:\s|$)", COMMAND_NAMES),
            ),
            ("command_substitution", r"\$\([^)]*\)".to_string()),
            ("backtick_substitution", r"`[^`]*`".to_string()),
            ("variable_expansion", r"\$\{[^}]*\}".to_string()),
        ];
        let command = command_rules
            .iter()
            .filter_map(|(name, pattern)| ThreatPattern::new(*name, pattern, false))
            .collect();

        Self {
            max_length: config.max_length,
            sql,
            xss: ThreatPattern::compile(XSS_RULES),
            traversal: ThreatPattern::compile(TRAVERSAL_RULES),
            command,
            command_names: Regex::new(&format!(r"(?i)\b(?:{})\b", COMMAND_NAMES)).ok(),
            ldap: ThreatPattern::compile(LDAP_RULES),
            entities: Regex::new(ENCODED_ENTITY).ok(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Sanitize a JSON value, recursing through objects (keys included) and
    /// arrays. Non-string scalars pass through untouched.
    pub fn sanitize(&self, value: Value, origin: Option<&RequestOrigin>) -> Value {
        self.sanitize_at(value, "", origin)
    }

    /// Same as [`sanitize`](Self::sanitize), reporting field paths relative
    /// to `root`
    pub fn sanitize_at(&self, value: Value, root: &str, origin: Option<&RequestOrigin>) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize_field(&s, root, origin)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.sanitize_at(item, &format!("{}[{}]", root, i), origin))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    let path = child_path(root, &key);
                    let clean_key = self.sanitize_field(&key, &path, origin);
                    let clean_item = self.sanitize_at(item, &path, origin);
                    out.insert(clean_key, clean_item);
                }
                Value::Object(out)
            }
            other => other,
        }
    }

    /// Sanitize a flat string map such as path or query parameters
    pub fn sanitize_map(
        &self,
        params: HashMap<String, String>,
        root: &str,
        origin: Option<&RequestOrigin>,
    ) -> HashMap<String, String> {
        params
            .into_iter()
            .map(|(key, value)| {
                let path = child_path(root, &key);
                (
                    self.sanitize_field(&key, &path, origin),
                    self.sanitize_field(&value, &path, origin),
                )
            })
            .collect()
    }

    pub fn sanitize_str(&self, input: &str, origin: Option<&RequestOrigin>) -> String {
        self.sanitize_field(input, "", origin)
    }

    fn sanitize_field(&self, input: &str, path: &str, origin: Option<&RequestOrigin>) -> String {
        let (clean, findings) = self.clean(input);
        if !findings.hits.is_empty() {
            self.report(&findings, path, input, origin);
        }
        clean
    }

    fn clean(&self, input: &str) -> (String, Findings) {
        let mut findings = Findings::default();

        let stripped: String = input.chars().filter(|c| !is_stripped_control(*c)).collect();
        let normalized: String = stripped.nfkc().collect();
        let mut s = self.mask_entities(normalized);

        for rule in &self.sql {
            if rule.regex.is_match(&s) {
                findings.note(Threat::Sql, rule.name);
                let strips_operators = rule.strips_operators;
                s = rule
                    .regex
                    .replace_all(&s, |caps: &Captures| strip_sql_syntax(&caps[0], strips_operators))
                    .into_owned();
            }
        }

        let mut encode = self.detect_markup(&s, &mut findings);
        let before_strip_len = s.len();

        // Every strip only removes characters, so an unchanged length means a
        // fixed point. Stripping one category can reassemble another.
        loop {
            let len = s.len();
            s = self.strip_traversal(s, &mut findings);
            s = self.strip_command(s, &mut findings);
            s = self.strip_ldap(s, &mut findings);
            if s.len() == len {
                break;
            }
        }

        if !encode && s.len() != before_strip_len {
            encode = self.detect_markup(&s, &mut findings);
        }

        s = s.replace(ENTITY_MASK, ";");
        if encode {
            s = html_encode(&s);
        }

        let trimmed = s.trim();
        let out = if trimmed.chars().count() > self.max_length {
            findings.note(Threat::Oversized, "max_length");
            trimmed.chars().take(self.max_length).collect()
        } else {
            trimmed.to_string()
        };

        (out, findings)
    }

    fn detect_markup(&self, s: &str, findings: &mut Findings) -> bool {
        match self.xss.iter().find(|rule| rule.regex.is_match(s)) {
            Some(rule) => {
                findings.note(Threat::Xss, rule.name);
                true
            }
            None => false,
        }
    }

    fn mask_entities(&self, s: String) -> String {
        match &self.entities {
            Some(entities) => entities
                .replace_all(&s, |caps: &Captures| {
                    let entity = &caps[0];
                    format!("{}{}", &entity[..entity.len() - 1], ENTITY_MASK)
                })
                .into_owned(),
            None => s,
        }
    }

    fn strip_traversal(&self, mut s: String, findings: &mut Findings) -> String {
        loop {
            let mut changed = false;
            for rule in &self.traversal {
                if rule.regex.is_match(&s) {
                    findings.note(Threat::PathTraversal, rule.name);
                    s = rule.regex.replace_all(&s, "").into_owned();
                    changed = true;
                }
            }
            if !changed {
                return s;
            }
        }
    }

    fn strip_command(&self, mut s: String, findings: &mut Findings) -> String {
        for rule in &self.command {
            if rule.regex.is_match(&s) {
                findings.note(Threat::Command, rule.name);
                s = rule
                    .regex
                    .replace_all(&s, |caps: &Captures| {
                        let span: String = caps[0]
                            .chars()
                            .filter(|c| !COMMAND_STRIP_CHARS.contains(c))
                            .collect();
                        match &self.command_names {
                            Some(names) => names.replace_all(&span, "").into_owned(),
                            None => span,
                        }
                    })
                    .into_owned();
            }
        }
        s
    }

    /// A filter-injection match marks the whole string as a filter payload,
    /// so metacharacters are removed everywhere rather than per span.
    fn strip_ldap(&self, mut s: String, findings: &mut Findings) -> String {
        let mut detected = false;
        for rule in &self.ldap {
            if rule.regex.is_match(&s) {
                findings.note(Threat::Ldap, rule.name);
                detected = true;
            }
        }
        if detected {
            s.retain(|c| !LDAP_STRIP_CHARS.contains(&c));
        }
        s
    }

    fn report(&self, findings: &Findings, path: &str, original: &str, origin: Option<&RequestOrigin>) {
        let unknown;
        let origin = match origin {
            Some(origin) => origin,
            None => {
                unknown = RequestOrigin::unknown();
                &unknown
            }
        };
        let field = if path.is_empty() { "$" } else { path };
        let sample: String = original.chars().take(SAMPLE_LEN).collect();

        for (threat, patterns) in &findings.hits {
            tracing::warn!(
                event_type = %threat.event_type(),
                field = field,
                client = %origin.source_identifier,
                patterns = ?patterns,
                "Neutralized suspicious input"
            );

            if let Some(sink) = &self.sink {
                let event = SecurityEvent::new(threat.event_type(), threat.severity(), origin)
                    .with_detail("field", field)
                    .with_detail("patterns", patterns.clone())
                    .with_detail("sample", sample.clone());
                sink.record(event);
            }
        }
    }
}

fn child_path(root: &str, key: &str) -> String {
    if root.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", root, key)
    }
}

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
}

fn strip_sql_syntax(span: &str, strips_operators: bool) -> String {
    let without_comments = span.replace("--", "").replace("/*", "").replace("*/", "");
    without_comments
        .chars()
        .filter(|c| !SQL_STRIP_CHARS.contains(c) && !(strips_operators && matches!(c, '=' | '<' | '>' | '!')))
        .collect()
}

/// Entity-encode every character that can open or close markup or an
/// attribute value
pub fn html_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            '=' => out.push_str("&#x3D;"),
            '`' => out.push_str("&#x60;"),
            other => out.push(other),
        }
    }
    out
}
