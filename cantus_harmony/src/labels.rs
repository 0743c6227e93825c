// Roman-numeral label normalisation.
//
// Labels come from external analysers that disagree on notation: `♭VII` vs
// `bVII`, `IVmaj7` vs `IVΔ7` vs `IVM7`, `V6/5` vs `V65`, `vii°7` vs `viio7`.
// Both sides of every label comparison in the matcher go through `normalize`
// so that notation differences never decide a match.
//
// A label is parsed into five parts:
//
//   [accidental] numeral [quality] [figure][suffix] [/target]
//
// e.g. `bVII`, `iiø65`, `V7/V`, `IVM7`, `I64`. Figured-bass slashes (`6/4`)
// are folded before the secondary-target slash is split off, so `V6/5/V`
// parses as figure `65`, target `V`.
//
// Inversion classes come from the figure: root (none, 5, 53, 7), first (6, 63,
// 65), second (64, 43), third (42, 2). With inversions normalised away, triad
// figures vanish and seventh-chord figures collapse to `7`.
//
// Also provides the scale-degree helpers used by low-level event extraction
// (`events.rs`): root degree from the numeral, bass degree from root + figure.

/// Inversion class of a chord label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inversion {
    Root,
    First,
    Second,
    Third,
}

impl Inversion {
    /// Scale steps from root to bass.
    fn bass_offset(self) -> u8 {
        match self {
            Inversion::Root => 0,
            Inversion::First => 2,
            Inversion::Second => 4,
            Inversion::Third => 6,
        }
    }
}

/// A label split into its notational parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelParts {
    pub accidental: String,
    pub numeral: String,
    pub quality: String,
    pub figure: String,
    pub suffix: String,
    pub target: Option<String>,
}

const SPECIAL_NUMERALS: [&str; 4] = ["Ger", "It", "Fr", "N"];

/// Fold notation variants into one spelling and drop figured-bass slashes.
fn fold_notation(raw: &str) -> String {
    let replaced = raw
        .trim()
        .replace('♭', "b")
        .replace('♯', "#")
        .replace('°', "o")
        .replace('%', "ø")
        .replace(['Δ', '△'], "M")
        .replace("maj", "M")
        .replace("aug", "+");

    let chars: Vec<char> = replaced.chars().collect();
    let mut out = String::with_capacity(replaced.len());
    for (i, &c) in chars.iter().enumerate() {
        let figure_slash = c == '/'
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if !figure_slash {
            out.push(c);
        }
    }
    out
}

/// Split a label into its parts.
pub fn parse_label(raw: &str) -> LabelParts {
    let folded = fold_notation(raw);
    let (head, target) = match folded.split_once('/') {
        Some((head, target)) if !target.is_empty() => (head.to_string(), Some(target.to_string())),
        _ => (folded.clone(), None),
    };

    let mut parts = LabelParts {
        target,
        ..LabelParts::default()
    };
    let mut rest = head.as_str();

    let accidental_len = rest
        .char_indices()
        .take_while(|&(_, c)| matches!(c, 'b' | '#' | '-'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    parts.accidental = rest[..accidental_len].replace('-', "b");
    rest = &rest[accidental_len..];

    if let Some(special) = SPECIAL_NUMERALS.iter().find(|s| rest.starts_with(**s)) {
        parts.numeral = special.to_string();
        rest = &rest[special.len()..];
    } else {
        let numeral_len = rest
            .char_indices()
            .take_while(|&(_, c)| matches!(c, 'I' | 'V' | 'i' | 'v'))
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        if numeral_len == 0 {
            // Not a roman numeral; keep it opaque.
            parts.numeral = rest.to_string();
            return parts;
        }
        parts.numeral = rest[..numeral_len].to_string();
        rest = &rest[numeral_len..];
    }

    let quality_len = rest
        .char_indices()
        .take_while(|&(_, c)| matches!(c, 'o' | 'ø' | '+' | 'M'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    parts.quality = rest[..quality_len].to_string();
    rest = &rest[quality_len..];

    let figure_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    parts.figure = rest[..figure_len].to_string();
    parts.suffix = rest[figure_len..].to_string();
    parts
}

fn inversion_of_figure(figure: &str) -> Option<Inversion> {
    match figure {
        "" | "5" | "53" | "7" => Some(Inversion::Root),
        "6" | "63" | "65" => Some(Inversion::First),
        "64" | "43" => Some(Inversion::Second),
        "42" | "2" => Some(Inversion::Third),
        _ => None,
    }
}

fn is_seventh_figure(figure: &str) -> bool {
    matches!(figure, "7" | "65" | "43" | "42" | "2")
}

impl LabelParts {
    pub fn inversion(&self) -> Inversion {
        inversion_of_figure(&self.figure).unwrap_or(Inversion::Root)
    }

    /// Render the head (everything before `/target`).
    pub fn head(&self, keep_inversion: bool) -> String {
        let figure = if keep_inversion {
            self.figure.clone()
        } else if is_seventh_figure(&self.figure) {
            "7".to_string()
        } else if inversion_of_figure(&self.figure).is_some() {
            String::new()
        } else {
            self.figure.clone()
        };
        format!(
            "{}{}{}{}{}",
            self.accidental, self.numeral, self.quality, figure, self.suffix
        )
    }

    pub fn render(&self, keep_inversion: bool) -> String {
        match &self.target {
            Some(target) => format!("{}/{}", self.head(keep_inversion), normalize(target, false)),
            None => self.head(keep_inversion),
        }
    }
}

/// Canonical spelling of a label. With `keep_inversion == false` the figure is
/// reduced to its chord family (`V65` → `V7`, `ii6` → `ii`).
pub fn normalize(label: &str, keep_inversion: bool) -> String {
    parse_label(label).render(keep_inversion)
}

/// Canonical spelling of the label with any secondary target removed.
pub fn strip_secondary(label: &str, keep_inversion: bool) -> String {
    parse_label(label).head(keep_inversion)
}

/// Whether the label's figure encodes an inversion (anything but root position).
pub fn has_inversion_figure(label: &str) -> bool {
    parse_label(label).inversion() != Inversion::Root
}

pub fn inversion(label: &str) -> Inversion {
    parse_label(label).inversion()
}

/// Whether the label carries an accidental prefix (a chromatic root).
pub fn has_accidental(label: &str) -> bool {
    !parse_label(label).accidental.is_empty()
}

/// Scale degree (1-7) of the chord root. `N` (Neapolitan) is degree 2.
pub fn roman_degree(label: &str) -> Option<u8> {
    degree_of_numeral(&parse_label(label).numeral)
}

fn degree_of_numeral(numeral: &str) -> Option<u8> {
    match numeral.to_ascii_uppercase().as_str() {
        "I" => Some(1),
        "II" | "N" => Some(2),
        "III" => Some(3),
        "IV" => Some(4),
        "V" => Some(5),
        "VI" => Some(6),
        "VII" => Some(7),
        _ => None,
    }
}

/// Scale degree of the bass note, from root degree and inversion.
pub fn bass_degree(label: &str) -> Option<u8> {
    let parts = parse_label(label);
    let root = degree_of_numeral(&parts.numeral)?;
    Some((root - 1 + parts.inversion().bass_offset()) % 7 + 1)
}

/// Quality tags a step's `qualities` list may name: chord size (`triad`,
/// `seventh`), inversion family (`root-position`, `first-inversion`, ...) and
/// chord quality (`major`, `minor`, `diminished`, `half-diminished`,
/// `augmented`, `major-seventh`).
pub fn quality_tags(label: &str) -> Vec<&'static str> {
    let parts = parse_label(label);
    let mut tags = Vec::with_capacity(3);
    let extended = is_seventh_figure(&parts.figure) || matches!(parts.figure.as_str(), "9" | "11" | "13");
    tags.push(if extended { "seventh" } else { "triad" });
    tags.push(match parts.inversion() {
        Inversion::Root => "root-position",
        Inversion::First => "first-inversion",
        Inversion::Second => "second-inversion",
        Inversion::Third => "third-inversion",
    });
    let quality = match parts.quality.as_str() {
        "o" => Some("diminished"),
        "ø" => Some("half-diminished"),
        "+" => Some("augmented"),
        "M" => Some("major-seventh"),
        _ if parts.numeral.starts_with(|c: char| c.is_ascii_uppercase()) => Some("major"),
        _ if parts.numeral.starts_with(|c: char| c.is_ascii_lowercase()) => Some("minor"),
        _ => None,
    };
    tags.extend(quality);
    tags
}

/// Whether an accepted label should be matched as a pattern rather than
/// compared literally.
pub fn is_wildcard(label: &str) -> bool {
    label.starts_with('^') || label.contains(['*', '?', '|', '['])
}

/// Translate a wildcard label into an anchored regex source. Labels starting
/// with `^` are taken as regexes verbatim; otherwise `*` and `?` are globs.
pub fn wildcard_to_regex(label: &str) -> String {
    if label.starts_with('^') {
        return label.to_string();
    }
    let mut out = String::from("^");
    for c in label.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '|' | '[' | ']' | '(' | ')' => out.push(c),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_secondary_seventh_in_inversion() {
        let parts = parse_label("V6/5/V");
        assert_eq!(parts.numeral, "V");
        assert_eq!(parts.figure, "65");
        assert_eq!(parts.target.as_deref(), Some("V"));
        assert_eq!(parts.inversion(), Inversion::First);
    }

    #[test]
    fn accidentals_are_folded() {
        assert_eq!(normalize("♭VII", true), "bVII");
        assert_eq!(normalize("-VI", true), "bVI");
        assert_eq!(normalize("♯iv°7", true), "#ivo7");
    }

    #[test]
    fn extension_markers_are_folded() {
        assert_eq!(normalize("IVmaj7", true), "IVM7");
        assert_eq!(normalize("IVΔ7", true), "IVM7");
        assert_eq!(normalize("ii%7", true), "iiø7");
    }

    #[test]
    fn inversions_normalised_away() {
        assert_eq!(normalize("ii6", false), "ii");
        assert_eq!(normalize("I64", false), "I");
        assert_eq!(normalize("V65", false), "V7");
        assert_eq!(normalize("V4/2", false), "V7");
        assert_eq!(normalize("V65", true), "V65");
    }

    #[test]
    fn strip_secondary_drops_target() {
        assert_eq!(strip_secondary("V7/V", false), "V7");
        assert_eq!(strip_secondary("viio7/ii", true), "viio7");
    }

    #[test]
    fn degrees() {
        assert_eq!(roman_degree("V7/V"), Some(5));
        assert_eq!(roman_degree("bVII"), Some(7));
        assert_eq!(roman_degree("N6"), Some(2));
        assert_eq!(roman_degree("Ger65"), None);
        assert_eq!(bass_degree("I64"), Some(5));
        assert_eq!(bass_degree("ii6"), Some(4));
        assert_eq!(bass_degree("V42"), Some(4));
    }

    #[test]
    fn inversion_figure_detection() {
        assert!(has_inversion_figure("ii6"));
        assert!(has_inversion_figure("I6/4"));
        assert!(!has_inversion_figure("V7"));
        assert!(!has_inversion_figure("IV"));
    }

    #[test]
    fn wildcard_translation() {
        assert!(is_wildcard("V*"));
        assert!(is_wildcard("^vii[o ø]7$"));
        assert!(!is_wildcard("V7/V"));
        let re = regex::Regex::new(&wildcard_to_regex("V*")).unwrap();
        assert!(re.is_match("V7"));
        assert!(re.is_match("V65/V"));
        assert!(!re.is_match("IV"));
    }

    #[test]
    fn opaque_labels_survive() {
        assert_eq!(normalize("Cad", true), "Cad");
        assert_eq!(roman_degree("Cad"), None);
    }

    #[test]
    fn quality_tags_cover_size_inversion_and_quality() {
        assert_eq!(quality_tags("V65"), vec!["seventh", "first-inversion", "major"]);
        assert_eq!(quality_tags("ii6"), vec!["triad", "first-inversion", "minor"]);
        assert_eq!(quality_tags("viiø7"), vec!["seventh", "root-position", "half-diminished"]);
        assert_eq!(quality_tags("IVmaj7"), vec!["seventh", "root-position", "major-seventh"]);
    }
}
