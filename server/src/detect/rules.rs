use globset::GlobBuilder;
use serde_json;
use tracing::debug;

use api::media::{DetectionMethod, MediaTypeUuid};
use api::rule::{
    DetectionRule, FilenamePattern, HybridPattern, RuleType, RuleUuid, SizePattern,
    StructurePattern,
};

// rule evaluation
//
// pure scoring over a directory's contents.  each rule type produces a raw
// score in [0, 1]; a rule participates only when its raw score clears the
// floor, and the aggregate per media type is the maximum weighted score of
// its participating rules.  ties break by rule priority, then media type
// uuid, so repeated runs always pick the same winner.

// raw scores below this never participate
const RULE_FLOOR: f64 = 0.1;

// one entry under the directory being analyzed, depth 1 for direct
// children
#[derive(Clone, Debug)]
pub struct AnalyzedEntry {
    pub name: String,
    pub size: i64,
    pub is_dir: bool,
    pub depth: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineResult {
    pub media_type_uuid: MediaTypeUuid,
    pub confidence: f64,
    pub method: DetectionMethod,
    pub rule_priority: i64,
}

fn glob_matches(pattern: &str, name: &str) -> bool {
    GlobBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|glob| glob.compile_matcher().is_match(name))
        .unwrap_or(false)
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| format!(".{}", ext.to_lowercase()))
}

// match ratio of the globs over the files (case-insensitive)
fn score_filename(pattern: &FilenamePattern, entries: &[AnalyzedEntry]) -> f64 {
    let files: Vec<&AnalyzedEntry> = entries.iter().filter(|e| !e.is_dir).collect();

    if files.is_empty() || pattern.globs.is_empty() {
        return 0.0;
    }

    let matched = files
        .iter()
        .filter(|entry| {
            pattern
                .globs
                .iter()
                .any(|glob| glob_matches(glob, &entry.name))
        })
        .count();

    matched as f64 / files.len() as f64
}

// proportional satisfaction of the structural constraints
fn score_structure(pattern: &StructurePattern, entries: &[AnalyzedEntry]) -> f64 {
    let mut components: Vec<f64> = Vec::new();

    let child_dirs: Vec<&AnalyzedEntry> =
        entries.iter().filter(|e| e.is_dir && e.depth == 1).collect();

    if !pattern.required_dirs.is_empty() {
        let satisfied = pattern
            .required_dirs
            .iter()
            .filter(|required| {
                let required = required.to_lowercase();

                child_dirs
                    .iter()
                    .any(|dir| dir.name.to_lowercase().contains(&required))
            })
            .count();

        components.push(satisfied as f64 / pattern.required_dirs.len() as f64);
    }

    if !pattern.optional_dirs.is_empty() {
        let satisfied = pattern
            .optional_dirs
            .iter()
            .filter(|optional| {
                let optional = optional.to_lowercase();

                child_dirs
                    .iter()
                    .any(|dir| dir.name.to_lowercase().contains(&optional))
            })
            .count();

        components.push(satisfied as f64 / pattern.optional_dirs.len() as f64);
    }

    if !pattern.file_types.is_empty() {
        let mut satisfaction = 0.0;

        for (ext, min_count) in &pattern.file_types {
            let want = (*min_count).max(1) as f64;

            let want_ext = ext.to_lowercase();

            let have = entries
                .iter()
                .filter(|e| !e.is_dir && extension_of(&e.name).as_deref() == Some(want_ext.as_str()))
                .count() as f64;

            satisfaction += (have / want).min(1.0);
        }

        components.push(satisfaction / pattern.file_types.len() as f64);
    }

    if components.is_empty() {
        return 0.0;
    }

    components.iter().sum::<f64>() / components.len() as f64
}

// fraction of files matching each size band
fn score_sizes(pattern: &SizePattern, entries: &[AnalyzedEntry]) -> f64 {
    if pattern.size_patterns.is_empty() {
        return 0.0;
    }

    let mut satisfaction = 0.0;

    for band in pattern.size_patterns.values() {
        let want = band.min_count.max(1) as f64;

        let have = entries
            .iter()
            .filter(|e| {
                if e.is_dir {
                    return false;
                }

                let size = e.size as u64;

                band.min_size.map(|min| size >= min).unwrap_or(true)
                    && band.max_size.map(|max| size <= max).unwrap_or(true)
            })
            .count() as f64;

        satisfaction += (have / want).min(1.0);
    }

    satisfaction / pattern.size_patterns.len() as f64
}

// unweighted mean of the embedded sub-scores that are present
fn score_hybrid(pattern: &HybridPattern, entries: &[AnalyzedEntry]) -> f64 {
    let mut components: Vec<f64> = Vec::new();

    if let Some(filename) = &pattern.filename_pattern {
        components.push(score_filename(filename, entries));
    }

    if let Some(structure) = &pattern.directory_structure {
        components.push(score_structure(structure, entries));
    }

    if let Some(sizes) = &pattern.file_analysis {
        components.push(score_sizes(sizes, entries));
    }

    if components.is_empty() {
        return 0.0;
    }

    components.iter().sum::<f64>() / components.len() as f64
}

pub fn raw_score(rule: &DetectionRule, entries: &[AnalyzedEntry]) -> f64 {
    match rule.rule_type {
        RuleType::FilenamePattern => match serde_json::from_str(&rule.pattern) {
            Ok(pattern) => score_filename(&pattern, entries),
            Err(_) => 0.0,
        },
        RuleType::DirectoryStructure => match serde_json::from_str(&rule.pattern) {
            Ok(pattern) => score_structure(&pattern, entries),
            Err(_) => 0.0,
        },
        RuleType::FileAnalysis => match serde_json::from_str(&rule.pattern) {
            Ok(pattern) => score_sizes(&pattern, entries),
            Err(_) => 0.0,
        },
        RuleType::Hybrid => match serde_json::from_str(&rule.pattern) {
            Ok(pattern) => score_hybrid(&pattern, entries),
            Err(_) => 0.0,
        },
    }
}

fn method_for(rule_type: RuleType) -> DetectionMethod {
    match rule_type {
        RuleType::FilenamePattern => DetectionMethod::FilenamePattern,
        RuleType::DirectoryStructure => DetectionMethod::DirectoryStructure,
        RuleType::FileAnalysis => DetectionMethod::FileAnalysis,
        RuleType::Hybrid => DetectionMethod::Hybrid,
    }
}

pub fn evaluate(
    rules: &[(RuleUuid, DetectionRule)],
    entries: &[AnalyzedEntry],
) -> Option<EngineResult> {
    // best participating rule per media type: (weighted, priority, method)
    let mut best: Vec<EngineResult> = Vec::new();

    for (rule_uuid, rule) in rules {
        let raw = raw_score(rule, entries);

        if raw < RULE_FLOOR {
            continue;
        }

        let weighted = (raw * rule.confidence_weight).clamp(0.0, 1.0);

        debug!(
            { rule_uuid = rule_uuid, raw = raw, weighted = weighted },
            "rule participated"
        );

        match best
            .iter_mut()
            .find(|b| b.media_type_uuid == rule.media_type_uuid)
        {
            Some(current) => {
                if weighted > current.confidence
                    || (weighted == current.confidence && rule.priority > current.rule_priority)
                {
                    current.confidence = weighted;
                    current.method = method_for(rule.rule_type);
                    current.rule_priority = rule.priority;
                }
            }
            None => best.push(EngineResult {
                media_type_uuid: rule.media_type_uuid,
                confidence: weighted,
                method: method_for(rule.rule_type),
                rule_priority: rule.priority,
            }),
        }
    }

    // winner by aggregate score; ties break by priority, then by media
    // type uuid for determinism
    best.into_iter().max_by(|a, b| {
        a.confidence
            .partial_cmp(&b.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.rule_priority.cmp(&b.rule_priority))
            .then(b.media_type_uuid.cmp(&a.media_type_uuid))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: i64, depth: u32) -> AnalyzedEntry {
        AnalyzedEntry {
            name: name.to_owned(),
            size,
            is_dir: false,
            depth,
        }
    }

    fn dir(name: &str, depth: u32) -> AnalyzedEntry {
        AnalyzedEntry {
            name: name.to_owned(),
            size: 0,
            is_dir: true,
            depth,
        }
    }

    fn rule(
        media_type: i64,
        rule_type: RuleType,
        pattern: &str,
        weight: f64,
        priority: i64,
    ) -> (RuleUuid, DetectionRule) {
        (
            priority,
            DetectionRule {
                media_type_uuid: media_type,
                rule_type,
                pattern: pattern.to_owned(),
                confidence_weight: weight,
                enabled: true,
                priority,
            },
        )
    }

    #[test]
    fn filename_match_ratio() {
        let entries = vec![
            file("a.mkv", 100, 1),
            file("b.mkv", 100, 1),
            file("notes.txt", 1, 1),
            dir("extras", 1),
        ];

        let pattern = FilenamePattern {
            globs: vec!["*.mkv".to_owned()],
            extra: Default::default(),
        };

        // 2 of 3 files match; directories are not counted
        let score = score_filename(&pattern, &entries);
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn filename_globs_are_case_insensitive() {
        let entries = vec![file("MOVIE.MKV", 100, 1)];

        let pattern = FilenamePattern {
            globs: vec!["*.mkv".to_owned()],
            extra: Default::default(),
        };

        assert_eq!(score_filename(&pattern, &entries), 1.0);
    }

    #[test]
    fn structure_season_layout() {
        // the shape of a tv show folder: season dirs plus episodes below
        let entries = vec![
            dir("Season 1", 1),
            dir("Season 2", 1),
            file("s01e01.mkv", 1 << 30, 2),
            file("s01e02.mkv", 1 << 30, 2),
            file("s01e03.mkv", 1 << 30, 2),
        ];

        let pattern: StructurePattern = serde_json::from_str(
            r#"{"required_dirs": ["Season"], "file_types": {".mkv": 2}}"#,
        )
        .unwrap();

        assert_eq!(score_structure(&pattern, &entries), 1.0);
    }

    #[test]
    fn structure_partial_satisfaction() {
        let entries = vec![dir("Specials", 1), file("a.mkv", 100, 2)];

        let pattern: StructurePattern = serde_json::from_str(
            r#"{"required_dirs": ["Season"], "file_types": {".mkv": 2}}"#,
        )
        .unwrap();

        // no season dir (0.0), half the required mkv count (0.5)
        assert!((score_structure(&pattern, &entries) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn size_bands() {
        let entries = vec![
            file("feature.mkv", 900_000_000, 1),
            file("sample.mkv", 5_000_000, 1),
        ];

        let pattern: SizePattern = serde_json::from_str(
            r#"{"size_patterns": {"feature": {"min_size": 524288000, "min_count": 1}}}"#,
        )
        .unwrap();

        assert_eq!(score_sizes(&pattern, &entries), 1.0);
    }

    #[test]
    fn winner_and_threshold() {
        let rules = vec![
            rule(
                2,
                RuleType::DirectoryStructure,
                r#"{"required_dirs": ["Season"], "file_types": {".mkv": 2}}"#,
                1.0,
                10,
            ),
            rule(1, RuleType::FilenamePattern, r#"{"globs": ["*.mkv"]}"#, 0.5, 8),
        ];

        let entries = vec![
            dir("Season 1", 1),
            dir("Season 2", 1),
            file("s01e01.mkv", 1 << 30, 2),
            file("s01e02.mkv", 1 << 30, 2),
            file("s01e03.mkv", 1 << 30, 2),
        ];

        let result = evaluate(&rules, &entries).expect("season layout should classify");

        assert_eq!(result.media_type_uuid, 2);
        assert_eq!(result.method, DetectionMethod::DirectoryStructure);
        assert!(result.confidence >= 0.6);
    }

    #[test]
    fn below_floor_is_no_result() {
        let rules = vec![rule(
            1,
            RuleType::FilenamePattern,
            r#"{"globs": ["*.iso"]}"#,
            1.0,
            5,
        )];

        let entries = vec![file("a.txt", 10, 1)];

        assert!(evaluate(&rules, &entries).is_none());
    }

    #[test]
    fn determinism_on_ties() {
        // two media types with identical scores and priorities: the lower
        // media type uuid wins, every time
        let rules = vec![
            rule(5, RuleType::FilenamePattern, r#"{"globs": ["*.mkv"]}"#, 1.0, 5),
            rule(3, RuleType::FilenamePattern, r#"{"globs": ["*.mkv"]}"#, 1.0, 5),
        ];

        let entries = vec![file("a.mkv", 100, 1)];

        for _ in 0..5 {
            let result = evaluate(&rules, &entries).unwrap();
            assert_eq!(result.media_type_uuid, 3);
        }
    }

    #[test]
    fn bad_pattern_scores_zero() {
        let rules = vec![rule(1, RuleType::Hybrid, "not json", 1.0, 5)];

        let entries = vec![file("a.mkv", 100, 1)];

        assert!(evaluate(&rules, &entries).is_none());
    }

    #[test]
    fn unknown_pattern_fields_are_preserved_not_scored() {
        let raw = r#"{"globs": ["*.mkv"], "future_field": {"x": 1}}"#;

        let pattern: FilenamePattern = serde_json::from_str(raw).unwrap();

        assert_eq!(pattern.extra.get("future_field").unwrap()["x"], 1);

        let entries = vec![file("a.mkv", 100, 1)];
        assert_eq!(score_filename(&pattern, &entries), 1.0);

        // round-trips through serde intact
        let back = serde_json::to_value(&pattern).unwrap();
        assert_eq!(back["future_field"]["x"], 1);
    }
}
