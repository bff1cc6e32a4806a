//! Query normalization and the tiny intent/target classifier.
//!
//! The classifier is a word-conditional count model: each known word votes
//! for a label with a fixed weight, the argmax wins, and the label is only
//! reported when its share of the total vote mass reaches 0.6.

/// Minimum share of the vote mass for a label to be reported.
const CONFIDENCE_FLOOR: f64 = 0.6;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Intent {
    Navigation,
    Question,
    Content,
    Discover,
    Download,
    Action,
    Unknown,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Question => "question",
            Self::Content => "content",
            Self::Discover => "discover",
            Self::Download => "download",
            Self::Action => "action",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Target {
    Site,
    Image,
    Doc,
    Code,
    File,
    Media,
    Mixed,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Site => "site",
            Self::Image => "image",
            Self::Doc => "doc",
            Self::Code => "code",
            Self::File => "file",
            Self::Media => "media",
            Self::Mixed => "mixed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Classification {
    pub intent: Intent,
    pub intent_confidence: f64,
    pub target: Option<Target>,
    pub target_confidence: f64,
}

/// Normalize a query: decompose and strip diacritics, lowercase, keep
/// `[a-z0-9 ?]`, collapse whitespace.
pub fn normalize(q: &str) -> String {
    let mut out = String::with_capacity(q.len());
    let mut last_was_space = true;

    let mut push = |c: char, out: &mut String| {
        let c = c.to_ascii_lowercase();
        match c {
            'a'..='z' | '0'..='9' | '?' => {
                out.push(c);
                last_was_space = false;
            }
            _ => {
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            }
        }
    };

    for c in q.chars() {
        match fold_diacritic(c) {
            Some(folded) => {
                for f in folded.chars() {
                    push(f, &mut out);
                }
            }
            None => push(c, &mut out),
        }
    }
    out.trim_end().to_owned()
}

/// Map common accented Latin characters to their base letters; `None`
/// means the character passes through unchanged. This stands in for a full
/// Unicode decomposition pass; characters outside the table degrade to
/// whitespace via the `[a-z0-9 ?]` filter and classify as unknown rather
/// than failing.
fn fold_diacritic(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä'
        | 'Å' => "a",
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => "i",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => "o",
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => "u",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ñ' | 'Ñ' => "n",
        'ç' | 'Ç' => "c",
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'ø' | 'Ø' => "o",
        _ => return None,
    };
    Some(folded)
}

type IntentVote = (&'static str, Intent, u32);
type TargetVote = (&'static str, Target, u32);

const EN_INTENT: &[IntentVote] = &[
    ("what", Intent::Question, 10),
    ("how", Intent::Question, 10),
    ("why", Intent::Question, 10),
    ("when", Intent::Question, 8),
    ("where", Intent::Question, 8),
    ("who", Intent::Question, 8),
    ("is", Intent::Question, 2),
    ("download", Intent::Download, 10),
    ("get", Intent::Download, 4),
    ("fetch", Intent::Download, 6),
    ("save", Intent::Download, 4),
    ("install", Intent::Download, 6),
    ("watch", Intent::Content, 8),
    ("listen", Intent::Content, 8),
    ("view", Intent::Content, 6),
    ("see", Intent::Content, 4),
    ("show", Intent::Content, 4),
    ("read", Intent::Content, 5),
    ("browse", Intent::Discover, 8),
    ("explore", Intent::Discover, 8),
    ("discover", Intent::Discover, 10),
    ("find", Intent::Discover, 6),
    ("search", Intent::Discover, 6),
    ("list", Intent::Discover, 4),
    ("go", Intent::Navigation, 8),
    ("goto", Intent::Navigation, 10),
    ("open", Intent::Navigation, 6),
    ("visit", Intent::Navigation, 8),
    ("home", Intent::Navigation, 4),
    ("login", Intent::Action, 8),
    ("signup", Intent::Action, 8),
    ("register", Intent::Action, 8),
    ("upload", Intent::Action, 6),
    ("pin", Intent::Action, 4),
];

const EN_TARGET: &[TargetVote] = &[
    ("site", Target::Site, 10),
    ("website", Target::Site, 10),
    ("page", Target::Site, 6),
    ("homepage", Target::Site, 8),
    ("blog", Target::Site, 6),
    ("image", Target::Image, 10),
    ("images", Target::Image, 10),
    ("photo", Target::Image, 10),
    ("photos", Target::Image, 10),
    ("picture", Target::Image, 8),
    ("wallpaper", Target::Image, 8),
    ("png", Target::Image, 6),
    ("jpg", Target::Image, 6),
    ("doc", Target::Doc, 8),
    ("docs", Target::Doc, 8),
    ("document", Target::Doc, 10),
    ("pdf", Target::Doc, 8),
    ("paper", Target::Doc, 6),
    ("book", Target::Doc, 6),
    ("manual", Target::Doc, 6),
    ("code", Target::Code, 10),
    ("source", Target::Code, 6),
    ("library", Target::Code, 4),
    ("repo", Target::Code, 8),
    ("script", Target::Code, 6),
    ("file", Target::File, 8),
    ("files", Target::File, 8),
    ("archive", Target::File, 6),
    ("zip", Target::File, 6),
    ("video", Target::Media, 10),
    ("videos", Target::Media, 10),
    ("movie", Target::Media, 8),
    ("music", Target::Media, 8),
    ("song", Target::Media, 8),
    ("audio", Target::Media, 8),
    ("podcast", Target::Media, 6),
];

const ES_INTENT: &[IntentVote] = &[
    ("que", Intent::Question, 8),
    ("como", Intent::Question, 10),
    ("por", Intent::Question, 2),
    ("donde", Intent::Question, 8),
    ("cuando", Intent::Question, 8),
    ("quien", Intent::Question, 8),
    ("descargar", Intent::Download, 10),
    ("bajar", Intent::Download, 8),
    ("ver", Intent::Content, 8),
    ("escuchar", Intent::Content, 8),
    ("leer", Intent::Content, 6),
    ("buscar", Intent::Discover, 8),
    ("explorar", Intent::Discover, 8),
    ("ir", Intent::Navigation, 6),
    ("abrir", Intent::Navigation, 6),
    ("visitar", Intent::Navigation, 8),
];

const ES_TARGET: &[TargetVote] = &[
    ("sitio", Target::Site, 10),
    ("pagina", Target::Site, 8),
    ("imagen", Target::Image, 10),
    ("imagenes", Target::Image, 10),
    ("foto", Target::Image, 10),
    ("fotos", Target::Image, 10),
    ("documento", Target::Doc, 10),
    ("libro", Target::Doc, 6),
    ("codigo", Target::Code, 10),
    ("archivo", Target::File, 8),
    ("archivos", Target::File, 8),
    ("video", Target::Media, 10),
    ("musica", Target::Media, 8),
    ("cancion", Target::Media, 8),
];

fn vote_tables(
    lang: Option<&str>,
) -> (&'static [IntentVote], &'static [TargetVote]) {
    match lang {
        Some(l) if l.starts_with("es") => (ES_INTENT, ES_TARGET),
        _ => (EN_INTENT, EN_TARGET),
    }
}

/// Classify a normalized query into an intent and optional target kind.
pub fn classify(normalized: &str, lang: Option<&str>) -> Classification {
    let (intent_votes, target_votes) = vote_tables(lang);
    let words: Vec<&str> = normalized
        .split(' ')
        .map(|w| w.trim_end_matches('?'))
        .filter(|w| !w.is_empty())
        .collect();

    let mut intent_counts: Vec<(Intent, u32)> = Vec::new();
    let mut target_counts: Vec<(Target, u32)> = Vec::new();

    for word in &words {
        for (w, intent, count) in intent_votes {
            if w == word {
                bump(&mut intent_counts, *intent, *count);
            }
        }
        for (w, target, count) in target_votes {
            if w == word {
                bump(&mut target_counts, *target, *count);
            }
        }
    }

    // A trailing question mark is a strong question vote of its own.
    if normalized.contains('?') {
        bump(&mut intent_counts, Intent::Question, 10);
    }

    let (intent, intent_confidence) =
        argmax(&intent_counts).unwrap_or((Intent::Unknown, 0.0));
    let intent = if intent_confidence >= CONFIDENCE_FLOOR {
        intent
    } else {
        Intent::Unknown
    };

    let (target, target_confidence) = match argmax(&target_counts) {
        Some((t, conf)) if conf >= CONFIDENCE_FLOOR => (Some(t), conf),
        Some((_, conf)) => (None, conf),
        None => (None, 0.0),
    };

    Classification {
        intent,
        intent_confidence,
        target,
        target_confidence,
    }
}

fn bump<L: Copy + PartialEq>(counts: &mut Vec<(L, u32)>, label: L, by: u32) {
    match counts.iter_mut().find(|(l, _)| *l == label) {
        Some((_, count)) => *count += by,
        None => counts.push((label, by)),
    }
}

/// Argmax by summed counts; confidence = max / sum.
fn argmax<L: Copy>(counts: &[(L, u32)]) -> Option<(L, f64)> {
    let total: u32 = counts.iter().map(|(_, c)| c).sum();
    if total == 0 {
        return None;
    }
    counts
        .iter()
        .max_by_key(|(_, c)| *c)
        .map(|(label, count)| (*label, f64::from(*count) / f64::from(total)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_strips_and_collapses() {
        assert_eq!(normalize("  Café  com   Leite! "), "cafe com leite");
        assert_eq!(normalize("¿Dónde?"), "donde?");
        assert_eq!(normalize("foo\tbar\nbaz"), "foo bar baz");
        assert_eq!(normalize("ÁÉÍÓÚ"), "aeiou");
    }

    #[test]
    fn classifies_download_intent() {
        let cls = classify(&normalize("download rust book pdf"), None);
        assert_eq!(cls.intent, Intent::Download);
        assert!(cls.intent_confidence >= CONFIDENCE_FLOOR);
        assert_eq!(cls.target, Some(Target::Doc));
    }

    #[test]
    fn question_mark_counts_as_question() {
        let cls = classify(&normalize("lumen gateway?"), None);
        assert_eq!(cls.intent, Intent::Question);
    }

    #[test]
    fn unknown_below_confidence_floor() {
        // "watch" (content 8) vs "download" (download 10): no label
        // reaches 60% of the mass.
        let cls = classify(&normalize("watch download"), None);
        assert_eq!(cls.intent, Intent::Unknown);

        let cls = classify(&normalize("zzqx plonk"), None);
        assert_eq!(cls.intent, Intent::Unknown);
        assert_eq!(cls.target, None);
    }

    #[test]
    fn spanish_tables_apply() {
        let cls = classify(&normalize("descargar fotos"), Some("es"));
        assert_eq!(cls.intent, Intent::Download);
        assert_eq!(cls.target, Some(Target::Image));
    }
}
