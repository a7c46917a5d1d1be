//! The alias name matcher.
//!
//! An INI-style configuration file maps series to alias names used for
//! output files. Sections are alias names, matched first-hit in
//! declaration order over all series sorted by `(study date+time, series
//! number)`; the `default` section holds fallbacks. Range fields accept
//! `a-b`, `a-`, `-b`, or a single integer, endpoints inclusive and open
//! endpoints unbounded.

use crate::entity::Entity;
use crate::scan::StudyKey;
use crate::util::{fixser, tidy_protoname};
use chrono::NaiveDate;
use regex::RegexBuilder;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum MatcherError {
    #[snafu(display("could not read matcher configuration"))]
    ReadConfig { source: std::io::Error },

    #[snafu(display("bad range value {:?} for {} in [{}]", value, option, alias))]
    BadRange {
        alias: String,
        option: String,
        value: String,
    },

    #[snafu(display("bad regex for {} in [{}]", option, alias))]
    BadPattern {
        alias: String,
        option: String,
        source: regex::Error,
    },
}

pub type Result<T, E = MatcherError> = std::result::Result<T, E>;

/// An inclusive range with optionally open endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub low: Option<i64>,
    pub high: Option<i64>,
}

impl Range {
    pub fn contains(&self, value: i64) -> bool {
        if let Some(low) = self.low {
            if value < low {
                return false;
            }
        }
        if let Some(high) = self.high {
            if value > high {
                return false;
            }
        }
        true
    }
}

/// Parse a range string like `2-3`, `4-`, `-9`, or `2`.
pub fn parse_range(text: &str) -> Option<Range> {
    let text = text.trim();
    if let Some((low, high)) = text.split_once('-') {
        let parse = |s: &str| -> std::result::Result<Option<i64>, ()> {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse().map(Some).map_err(|_| ())
            }
        };
        match (parse(low), parse(high)) {
            (Ok(low), Ok(high)) => Some(Range { low, high }),
            _ => None,
        }
    } else {
        let v: i64 = text.parse().ok()?;
        Some(Range {
            low: Some(v),
            high: Some(v),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct AliasRule {
    name: String,
    pattern: Option<String>,
    type_pattern: Option<String>,
    days: Option<Range>,
    count: Option<Range>,
    series: Option<Range>,
    study: Option<Range>,
    template: Option<String>,
    ignorecase: Option<bool>,
    tidy: Option<bool>,
    matched: i64,
    counted: i64,
}

/// One matched series: the alias plus the occurrence count when the alias
/// matched more than once.
pub type Match = (String, Option<i64>);

#[derive(Debug, Default)]
pub struct NameMatcher {
    rules: Vec<AliasRule>,
    default_template: String,
    default_ignorecase: bool,
    default_tidy: bool,
    matches: BTreeMap<(String, String, String), (String, i64)>,
}

impl NameMatcher {
    /// Load the configuration from a file.
    pub fn from_path(path: &Path) -> Result<NameMatcher> {
        let text = std::fs::read_to_string(path).context(ReadConfigSnafu)?;
        NameMatcher::from_str(&text)
    }

    /// Parse a configuration from text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<NameMatcher> {
        let mut matcher = NameMatcher {
            default_template: "%(alias)?(-count)?(-t)?(-echo)".to_string(),
            default_ignorecase: true,
            default_tidy: true,
            ..Default::default()
        };

        let mut current: Option<AliasRule> = None;
        let mut in_default = false;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if let Some(rule) = current.take() {
                    matcher.rules.push(rule);
                }
                if name.eq_ignore_ascii_case("default") {
                    in_default = true;
                } else {
                    in_default = false;
                    current = Some(AliasRule {
                        name: name.to_string(),
                        ..Default::default()
                    });
                }
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => continue,
            };

            if in_default {
                match key {
                    "template" => matcher.default_template = value.to_string(),
                    "ignorecase" => matcher.default_ignorecase = value != "0",
                    "tidy" => matcher.default_tidy = value != "0",
                    _ => {}
                }
                continue;
            }

            let rule = match current.as_mut() {
                Some(r) => r,
                None => continue,
            };
            match key {
                "pattern" => rule.pattern = Some(value.to_string()),
                "type" => rule.type_pattern = Some(value.to_string()),
                "days" => rule.days = Some(range_option(&rule.name, "days", value)?),
                "count" => rule.count = Some(range_option(&rule.name, "count", value)?),
                "series" => rule.series = Some(range_option(&rule.name, "series", value)?),
                "study" => rule.study = Some(range_option(&rule.name, "study", value)?),
                "template" => rule.template = Some(value.to_string()),
                "ignorecase" => rule.ignorecase = Some(value != "0"),
                "tidy" => rule.tidy = Some(value != "0"),
                _ => {}
            }
        }
        if let Some(rule) = current.take() {
            matcher.rules.push(rule);
        }

        Ok(matcher)
    }

    fn ignorecase(&self, rule: &AliasRule) -> bool {
        rule.ignorecase.unwrap_or(self.default_ignorecase)
    }

    fn tidy(&self, rule: &AliasRule, name: &str) -> String {
        if rule.tidy.unwrap_or(self.default_tidy) {
            tidy_protoname(name)
        } else {
            name.to_string()
        }
    }

    fn matches_pattern(&self, rule: &AliasRule, pattern: &str, text: &str) -> Result<bool> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(self.ignorecase(rule))
            .build()
            .with_context(|_| BadPatternSnafu {
                alias: rule.name.clone(),
                option: "pattern".to_string(),
            })?;
        Ok(re.is_match(text))
    }

    /// Find and store all matches in the given scan result; retrieve
    /// individual ones with [`NameMatcher::find`] afterwards.
    pub fn find_matches(
        &mut self,
        studies: &BTreeMap<StudyKey, BTreeMap<String, Entity>>,
    ) -> Result<()> {
        struct Identifier {
            study_no: String,
            study_name: String,
            series_no: String,
            series_int: i64,
            stdate: String,
            sttime: String,
            desc: String,
            imtype: String,
        }

        let mut series_list: Vec<Identifier> = Vec::new();
        for ((study_no, study_name), series_map) in studies {
            for (series_no, e) in series_map {
                let series_int: i64 = series_no
                    .chars()
                    .filter(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0);
                series_list.push(Identifier {
                    study_no: study_no.clone(),
                    study_name: study_name.clone(),
                    series_no: series_no.clone(),
                    series_int,
                    stdate: e.stdate.clone(),
                    sttime: e.sttime.clone(),
                    desc: e.desc.clone(),
                    imtype: e.image_subtype.clone(),
                });
            }
        }
        if series_list.is_empty() {
            return Ok(());
        }

        series_list.sort_by(|a, b| {
            let at = format!("{}{}", a.stdate, a.sttime);
            let bt = format!("{}{}", b.stdate, b.sttime);
            at.cmp(&bt)
                .then_with(|| fixser(&a.series_no).cmp(&fixser(&b.series_no)))
        });

        let baseline = series_list[0].stdate.clone();
        self.matches.clear();

        let mut last_study = (
            series_list[0].study_no.clone(),
            series_list[0].study_name.clone(),
        );
        let mut study_count: i64 = 0;

        for entry in &series_list {
            let this_study = (entry.study_no.clone(), entry.study_name.clone());
            if this_study != last_study {
                study_count += 1;
                last_study = this_study;
            }

            // rules try in declaration order; each series matches at most one
            let mut hit: Option<(usize, i64)> = None;
            for ri in 0..self.rules.len() {
                let selectors_pass = {
                    let rule = &self.rules[ri];
                    let mut ok = true;
                    if let Some(pattern) = &rule.pattern {
                        let desc = self.tidy(rule, &entry.desc);
                        ok = self.matches_pattern(rule, pattern, &desc)?;
                    }
                    if ok {
                        if let Some(pattern) = &rule.type_pattern {
                            ok = self.matches_pattern(rule, pattern, &entry.imtype)?;
                        }
                    }
                    if ok {
                        if let Some(days) = rule.days {
                            ok = matches!(
                                date_diff(&baseline, &entry.stdate),
                                Some(age) if days.contains(age)
                            );
                        }
                    }
                    if ok {
                        if let Some(study) = rule.study {
                            ok = study.contains(study_count);
                        }
                    }
                    ok
                };
                if !selectors_pass {
                    continue;
                }

                // a selector match consumes the alias match counter even
                // when the count range rejects it
                let true_count = self.rules[ri].matched;
                self.rules[ri].matched += 1;
                let mut offset_count = true_count;

                if let Some(count) = self.rules[ri].count {
                    if !count.contains(true_count) {
                        continue;
                    }
                    if let Some(low) = count.low {
                        offset_count -= low;
                    }
                }
                if let Some(series) = self.rules[ri].series {
                    if !series.contains(entry.series_int) {
                        continue;
                    }
                }

                hit = Some((ri, offset_count));
                break;
            }

            if let Some((ri, offset_count)) = hit {
                self.matches.insert(
                    (
                        entry.study_no.clone(),
                        entry.study_name.clone(),
                        entry.series_no.clone(),
                    ),
                    (self.rules[ri].name.clone(), offset_count),
                );
                self.rules[ri].counted += 1;
            }
        }

        Ok(())
    }

    /// Retrieve the alias for a given series. The count is present only
    /// when the alias matched more than once.
    pub fn find(&self, study_no: &str, study_name: &str, series_no: &str) -> Option<Match> {
        let key = (
            study_no.to_string(),
            study_name.to_string(),
            series_no.to_string(),
        );
        let (alias, count) = self.matches.get(&key)?;
        let counted = self
            .rules
            .iter()
            .find(|r| r.name == *alias)
            .map(|r| r.counted)
            .unwrap_or(0);
        if counted <= 1 {
            Some((alias.clone(), None))
        } else {
            Some((alias.clone(), Some(*count)))
        }
    }

    /// The template for this series (or the default one).
    pub fn template(&self, study_no: &str, study_name: &str, series_no: &str) -> String {
        let key = (
            study_no.to_string(),
            study_name.to_string(),
            series_no.to_string(),
        );
        if let Some((alias, _)) = self.matches.get(&key) {
            if let Some(rule) = self.rules.iter().find(|r| r.name == *alias) {
                if let Some(template) = &rule.template {
                    return template.clone();
                }
            }
        }
        self.default_template.clone()
    }
}

fn range_option(alias: &str, option: &str, value: &str) -> Result<Range> {
    parse_range(value).ok_or_else(|| MatcherError::BadRange {
        alias: alias.to_string(),
        option: option.to_string(),
        value: value.to_string(),
    })
}

fn date_diff(date1: &str, date2: &str) -> Option<i64> {
    let d1 = NaiveDate::parse_from_str(date1.trim(), "%Y%m%d").ok()?;
    let d2 = NaiveDate::parse_from_str(date2.trim(), "%Y%m%d").ok()?;
    Some((d2 - d1).num_days())
}

/// Expand a naming template. `%(name)` substitutes a variable; a
/// `?(...)` group is dropped entirely when any variable it references is
/// absent. Inside a group, bare variable names are recognized as well, so
/// the stock `%(alias)?(-count)?(-t)?(-echo)` works.
pub fn expand_template<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '%' if chars.peek() == Some(&'(') => {
                chars.next();
                let name: String = take_until(&mut chars, ')');
                if let Some(v) = lookup(&name) {
                    out.push_str(&v);
                }
            }
            '?' if chars.peek() == Some(&'(') => {
                chars.next();
                let body: String = take_until(&mut chars, ')');
                if let Some(expanded) = expand_group(&body, &lookup) {
                    out.push_str(&expanded);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn take_until(chars: &mut std::iter::Peekable<std::str::Chars>, stop: char) -> String {
    let mut out = String::new();
    for c in chars.by_ref() {
        if c == stop {
            break;
        }
        out.push(c);
    }
    out
}

fn expand_group<F>(body: &str, lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::new();
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut String, lookup: &F| -> Option<()> {
        if word.is_empty() {
            return Some(());
        }
        // a bare word is a variable reference when it resolves
        match lookup(word) {
            Some(v) => out.push_str(&v),
            None => return None,
        }
        word.clear();
        Some(())
    };

    for c in body.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
        } else {
            flush(&mut word, &mut out, lookup)?;
            out.push(c);
        }
    }
    flush(&mut word, &mut out, lookup)?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn range_parsing() {
        assert_eq!(
            parse_range("2-3"),
            Some(Range {
                low: Some(2),
                high: Some(3)
            })
        );
        assert_eq!(
            parse_range("4-"),
            Some(Range {
                low: Some(4),
                high: None
            })
        );
        assert_eq!(
            parse_range("-9"),
            Some(Range {
                low: None,
                high: Some(9)
            })
        );
        assert_eq!(
            parse_range("7"),
            Some(Range {
                low: Some(7),
                high: Some(7)
            })
        );
        assert_eq!(parse_range("x"), None);

        let r = parse_range("2-3").unwrap();
        assert!(r.contains(2) && r.contains(3));
        assert!(!r.contains(1) && !r.contains(4));
    }

    fn entity(desc: &str, stdate: &str) -> Entity {
        Entity {
            shape: (64, 64),
            res: [1.0, 1.0, 1.0],
            orient: vec![[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]],
            slices: BTreeSet::new(),
            slicesd: BTreeMap::new(),
            echoes: BTreeSet::new(),
            te: BTreeMap::new(),
            times: BTreeSet::new(),
            dtimes: BTreeMap::new(),
            file: BTreeMap::new(),
            end: BTreeMap::new(),
            pixels: BTreeMap::new(),
            rescale: BTreeMap::new(),
            mosaic: BTreeMap::new(),
            descrip: BTreeMap::new(),
            diff: BTreeMap::new(),
            bval: BTreeMap::new(),
            missing: BTreeMap::new(),
            desc: desc.to_string(),
            image_type: "ORIGINAL/PRIMARY".into(),
            image_subtype: String::new(),
            date: stdate.to_string(),
            time: "1000".into(),
            stdate: stdate.to_string(),
            sttime: "1000".into(),
            sar: None,
            phase: None,
            tr: 0.0,
            flip: 0.0,
            vflip: "N".into(),
            table: None,
            patient_cmt: None,
            image_cmt: None,
            instance: 1,
            instance_time: false,
            bits: 16,
            pixrep: 0,
        }
    }

    fn studies(
        entries: &[(&str, &str, &str)],
    ) -> BTreeMap<StudyKey, BTreeMap<String, Entity>> {
        let mut studies: BTreeMap<StudyKey, BTreeMap<String, Entity>> = BTreeMap::new();
        for (ser, desc, date) in entries {
            studies
                .entry(("1.2.3".to_string(), "P".to_string()))
                .or_default()
                .insert(ser.to_string(), entity(desc, date));
        }
        studies
    }

    #[test]
    fn first_hit_in_declaration_order() {
        let mut m = NameMatcher::from_str(
            "[anat]\npattern = mprage\n\n[wide]\npattern = .*\n",
        )
        .unwrap();
        let s = studies(&[("1", "T1 MPRAGE", "20200101"), ("2", "bold run", "20200101")]);
        m.find_matches(&s).unwrap();

        assert_eq!(m.find("1.2.3", "P", "1"), Some(("anat".to_string(), None)));
        assert_eq!(m.find("1.2.3", "P", "2"), Some(("wide".to_string(), None)));
    }

    #[test]
    fn repeated_matches_are_counted() {
        let mut m = NameMatcher::from_str("[bold]\npattern = bold\n").unwrap();
        let s = studies(&[
            ("3", "bold run", "20200101"),
            ("4", "bold run", "20200101"),
        ]);
        m.find_matches(&s).unwrap();

        assert_eq!(m.find("1.2.3", "P", "3"), Some(("bold".to_string(), Some(0))));
        assert_eq!(m.find("1.2.3", "P", "4"), Some(("bold".to_string(), Some(1))));
    }

    #[test]
    fn series_range_restricts() {
        let mut m =
            NameMatcher::from_str("[late]\npattern = .*\nseries = 10-\n").unwrap();
        let s = studies(&[("2", "a", "20200101"), ("12", "b", "20200101")]);
        m.find_matches(&s).unwrap();

        assert_eq!(m.find("1.2.3", "P", "2"), None);
        assert!(m.find("1.2.3", "P", "12").is_some());
    }

    #[test]
    fn default_section_overrides() {
        let m = NameMatcher::from_str(
            "[default]\ntemplate = %(alias)_%(t)\nignorecase = 0\n\n[x]\npattern = a\n",
        )
        .unwrap();
        assert_eq!(m.default_template, "%(alias)_%(t)");
        assert!(!m.default_ignorecase);
    }

    #[test]
    fn template_expansion() {
        let lookup = |name: &str| -> Option<String> {
            match name {
                "alias" => Some("rest".to_string()),
                "echo" => Some("2".to_string()),
                _ => None,
            }
        };
        let out = expand_template("%(alias)?(-count)?(-t)?(-echo)", lookup);
        assert_eq!(out, "rest-2");

        // groups with an unresolvable variable disappear entirely
        let out = expand_template("scan?(.t)-%(echo)", lookup);
        assert_eq!(out, "scan-2");
    }
}
