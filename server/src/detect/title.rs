use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{Datelike, Local};
use regex::Regex;

// title extraction
//
// release directories carry their metadata smeared into the name:
// "Inception.(2010).1080p.BluRay.x264-GROUP".  we recover the title and
// year and collect the quality vocabulary as hints.

static BRACKET_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[(\[](\d{4})[)\]]").expect("year regex"));

static BARE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("bare year regex"));

// tokens that mark release metadata rather than title words
const RELEASE_TAGS: &[&str] = &[
    "2160p", "1080p", "1080i", "720p", "480p", "4k", "uhd", "hdr", "hdr10", "dv", "sdr",
    "bluray", "blu-ray", "bdrip", "brrip", "remux", "web-dl", "webdl", "webrip", "hdtv",
    "dvdrip", "dvd", "x264", "x265", "h264", "h265", "hevc", "avc", "av1", "xvid", "divx",
    "aac", "ac3", "eac3", "dts", "dts-hd", "truehd", "atmos", "flac", "alac", "mp3", "opus",
    "proper", "repack", "extended", "unrated", "remastered", "internal", "limited", "retail",
    "multi", "dubbed", "subbed", "complete",
];

fn valid_year(year: i32) -> bool {
    (1900..=Local::now().year() + 2).contains(&year)
}

// pull a plausible year out of the name, preferring bracketed forms
fn find_year(name: &str) -> Option<(i32, usize, usize)> {
    if let Some(captures) = BRACKET_YEAR.captures(name) {
        let full = captures.get(0)?;
        let year: i32 = captures.get(1)?.as_str().parse().ok()?;

        if valid_year(year) {
            return Some((year, full.start(), full.end()));
        }
    }

    if let Some(captures) = BARE_YEAR.captures(name) {
        let full = captures.get(0)?;
        let year: i32 = full.as_str().parse().ok()?;

        if valid_year(year) {
            return Some((year, full.start(), full.end()));
        }
    }

    None
}

pub fn extract_title_year(dir_name: &str) -> (String, Option<i32>) {
    let mut working = dir_name.to_owned();

    let year = match find_year(&working) {
        Some((year, start, end)) => {
            working.replace_range(start..end, " ");
            Some(year)
        }
        None => None,
    };

    // dots and underscores are word separators in release names
    let working = working.replace(['.', '_'], " ");

    let mut words: Vec<&str> = Vec::new();

    for word in working.split_whitespace() {
        let bare = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();

        // the first release tag ends the title; everything after it is
        // encoder noise
        if RELEASE_TAGS.contains(&bare.as_str()) {
            break;
        }

        // "-GROUP" suffixes survive tag filtering; drop pure group markers
        if bare.is_empty() {
            continue;
        }

        words.push(word);
    }

    let title = words
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == ' ')
        .to_owned();

    if title.is_empty() {
        // a name that was all metadata still needs a title
        return (dir_name.trim().to_owned(), year);
    }

    (title, year)
}

// normalization for media item identity matching
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// quality vocabulary scanned from file and directory names
pub fn quality_hints(name: &str) -> HashSet<String> {
    let lower = name.to_lowercase();
    let mut hints = HashSet::new();

    let vocabulary: &[(&str, &str)] = &[
        ("2160p", "4k"),
        ("4k", "4k"),
        ("uhd", "4k"),
        ("1080p", "1080p"),
        ("720p", "720p"),
        ("480p", "480p"),
        ("hdr10", "hdr"),
        ("hdr", "hdr"),
        ("sdr", "sdr"),
        ("bluray", "bluray"),
        ("blu-ray", "bluray"),
        ("remux", "bluray"),
        ("web-dl", "web-dl"),
        ("webdl", "web-dl"),
        ("webrip", "web-dl"),
        ("hdtv", "hdtv"),
        ("x264", "x264"),
        ("h264", "x264"),
        ("x265", "x265"),
        ("h265", "x265"),
        ("hevc", "x265"),
        ("av1", "av1"),
        ("flac", "flac"),
        ("alac", "alac"),
    ];

    for (needle, hint) in vocabulary {
        if lower.contains(needle) {
            hints.insert((*hint).to_owned());
        }
    }

    hints
}

// a stable, human-readable quality string for media_files rows
pub fn quality_string(name: &str) -> Option<String> {
    let hints = quality_hints(name);

    if hints.is_empty() {
        return None;
    }

    let mut sorted: Vec<String> = hints.into_iter().collect();
    sorted.sort();

    Some(sorted.join(" "))
}

// a handful of language markers that show up as dotted tokens
pub fn language_hint(name: &str) -> Option<String> {
    let codes: &[(&str, &str)] = &[
        ("en", "en"),
        ("eng", "en"),
        ("fr", "fr"),
        ("fre", "fr"),
        ("de", "de"),
        ("ger", "de"),
        ("es", "es"),
        ("spa", "es"),
        ("it", "it"),
        ("ita", "it"),
        ("ja", "ja"),
        ("jpn", "ja"),
    ];

    let lower = name.to_lowercase();

    for token in lower.split(['.', '_', ' ', '-']) {
        for (code, lang) in codes {
            if token == *code {
                return Some((*lang).to_owned());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_year() {
        let (title, year) = extract_title_year("Inception (2010)");
        assert_eq!(title, "Inception");
        assert_eq!(year, Some(2010));

        let (title, year) = extract_title_year("Blade Runner [1982]");
        assert_eq!(title, "Blade Runner");
        assert_eq!(year, Some(1982));
    }

    #[test]
    fn dotted_release_name() {
        let (title, year) = extract_title_year("The.Matrix.1999.1080p.BluRay.x264-GROUP");
        assert_eq!(title, "The Matrix");
        assert_eq!(year, Some(1999));
    }

    #[test]
    fn underscores_and_tags() {
        let (title, year) = extract_title_year("Some_Show_720p_HDTV");
        assert_eq!(title, "Some Show");
        assert_eq!(year, None);
    }

    #[test]
    fn year_bounds() {
        // 1899 is out of range and stays part of the title
        let (title, year) = extract_title_year("Documentary 1899");
        assert_eq!(year, None);
        assert_eq!(title, "Documentary 1899");

        let future = Local::now().year() + 5;
        let (_, year) = extract_title_year(&format!("Film ({future})"));
        assert_eq!(year, None);
    }

    #[test]
    fn plain_name_passes_through() {
        let (title, year) = extract_title_year("Breaking Bad");
        assert_eq!(title, "Breaking Bad");
        assert_eq!(year, None);
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_title("The  Matrix!"), "the matrix");
        assert_eq!(normalize_title("Amélie"), "amélie");
    }

    #[test]
    fn quality_vocabulary() {
        let hints = quality_hints("Movie.2010.2160p.HDR.WEB-DL.x265.mkv");

        assert!(hints.contains("4k"));
        assert!(hints.contains("hdr"));
        assert!(hints.contains("web-dl"));
        assert!(hints.contains("x265"));
        assert!(!hints.contains("1080p"));
    }

    #[test]
    fn quality_string_is_sorted() {
        assert_eq!(
            quality_string("Movie.1080p.BluRay.x264.mkv").as_deref(),
            Some("1080p bluray x264")
        );
        assert_eq!(quality_string("notes.txt"), None);
    }

    #[test]
    fn language_tokens() {
        assert_eq!(language_hint("movie.en.srt").as_deref(), Some("en"));
        assert_eq!(language_hint("film.GER.mkv").as_deref(), Some("de"));
        assert_eq!(language_hint("plain.mkv"), None);
    }
}
