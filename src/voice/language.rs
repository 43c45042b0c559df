//! Language vocabulary shared by detection, translation and speech.
//!
//! Only languages that the detector can report *and* the speech endpoint can
//! pronounce are listed. Anything else is treated as English by the decision
//! engine.

use serde::{Deserialize, Serialize};

// ── Language codes ────────────────────────────────────────────────

/// ISO 639-1 language codes understood by the speech pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LanguageCode {
    // East Asia
    Ko,   // Korean
    Ja,   // Japanese
    Zh,   // Chinese (Simplified)
    ZhTw, // Chinese (Traditional)

    // Southeast Asia
    Th, // Thai
    Vi, // Vietnamese
    Id, // Indonesian
    Ms, // Malay
    Tl, // Filipino/Tagalog
    Km, // Khmer
    My, // Myanmar (Burmese)

    // South Asia
    Hi, // Hindi
    Bn, // Bengali
    Ta, // Tamil
    Te, // Telugu
    Ur, // Urdu
    Ne, // Nepali

    // Europe (Western)
    En, // English
    Es, // Spanish
    Fr, // French
    De, // German
    It, // Italian
    Pt, // Portuguese
    Nl, // Dutch
    Ca, // Catalan
    Cy, // Welsh
    Is, // Icelandic

    // Europe (Northern)
    Sv, // Swedish
    Da, // Danish
    No, // Norwegian
    Fi, // Finnish
    Et, // Estonian
    Lv, // Latvian

    // Europe (Central / Eastern)
    Pl, // Polish
    Cs, // Czech
    Sk, // Slovak
    Hu, // Hungarian
    Ro, // Romanian
    Bg, // Bulgarian
    Hr, // Croatian
    Sr, // Serbian
    Ru, // Russian
    Uk, // Ukrainian
    El, // Greek
    Tr, // Turkish

    // Middle East / Africa
    Ar, // Arabic
    He, // Hebrew
    Sw, // Swahili
    Af, // Afrikaans

    // Constructed
    Eo, // Esperanto
    La, // Latin
}

impl LanguageCode {
    /// Get the ISO 639-1 code string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::Ja => "ja",
            Self::Zh => "zh",
            Self::ZhTw => "zh-TW",
            Self::Th => "th",
            Self::Vi => "vi",
            Self::Id => "id",
            Self::Ms => "ms",
            Self::Tl => "tl",
            Self::Km => "km",
            Self::My => "my",
            Self::Hi => "hi",
            Self::Bn => "bn",
            Self::Ta => "ta",
            Self::Te => "te",
            Self::Ur => "ur",
            Self::Ne => "ne",
            Self::En => "en",
            Self::Es => "es",
            Self::Fr => "fr",
            Self::De => "de",
            Self::It => "it",
            Self::Pt => "pt",
            Self::Nl => "nl",
            Self::Ca => "ca",
            Self::Cy => "cy",
            Self::Is => "is",
            Self::Sv => "sv",
            Self::Da => "da",
            Self::No => "no",
            Self::Fi => "fi",
            Self::Et => "et",
            Self::Lv => "lv",
            Self::Pl => "pl",
            Self::Cs => "cs",
            Self::Sk => "sk",
            Self::Hu => "hu",
            Self::Ro => "ro",
            Self::Bg => "bg",
            Self::Hr => "hr",
            Self::Sr => "sr",
            Self::Ru => "ru",
            Self::Uk => "uk",
            Self::El => "el",
            Self::Tr => "tr",
            Self::Ar => "ar",
            Self::He => "he",
            Self::Sw => "sw",
            Self::Af => "af",
            Self::Eo => "eo",
            Self::La => "la",
        }
    }

    /// Code used on the wire by the Google translate / speech endpoints.
    ///
    /// Google still uses the legacy `iw` tag for Hebrew and requires the
    /// script suffix for Simplified Chinese.
    pub fn google_code(self) -> &'static str {
        match self {
            Self::Zh => "zh-CN",
            Self::He => "iw",
            other => other.as_str(),
        }
    }

    /// Get the human-readable language name.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Ko => "Korean",
            Self::Ja => "Japanese",
            Self::Zh => "Chinese",
            Self::ZhTw => "Chinese (Traditional)",
            Self::Th => "Thai",
            Self::Vi => "Vietnamese",
            Self::Id => "Indonesian",
            Self::Ms => "Malay",
            Self::Tl => "Filipino",
            Self::Km => "Khmer",
            Self::My => "Myanmar",
            Self::Hi => "Hindi",
            Self::Bn => "Bengali",
            Self::Ta => "Tamil",
            Self::Te => "Telugu",
            Self::Ur => "Urdu",
            Self::Ne => "Nepali",
            Self::En => "English",
            Self::Es => "Spanish",
            Self::Fr => "French",
            Self::De => "German",
            Self::It => "Italian",
            Self::Pt => "Portuguese",
            Self::Nl => "Dutch",
            Self::Ca => "Catalan",
            Self::Cy => "Welsh",
            Self::Is => "Icelandic",
            Self::Sv => "Swedish",
            Self::Da => "Danish",
            Self::No => "Norwegian",
            Self::Fi => "Finnish",
            Self::Et => "Estonian",
            Self::Lv => "Latvian",
            Self::Pl => "Polish",
            Self::Cs => "Czech",
            Self::Sk => "Slovak",
            Self::Hu => "Hungarian",
            Self::Ro => "Romanian",
            Self::Bg => "Bulgarian",
            Self::Hr => "Croatian",
            Self::Sr => "Serbian",
            Self::Ru => "Russian",
            Self::Uk => "Ukrainian",
            Self::El => "Greek",
            Self::Tr => "Turkish",
            Self::Ar => "Arabic",
            Self::He => "Hebrew",
            Self::Sw => "Swahili",
            Self::Af => "Afrikaans",
            Self::Eo => "Esperanto",
            Self::La => "Latin",
        }
    }

    /// Parse from string code (case-insensitive).
    ///
    /// Accepts the Google-specific aliases (`zh-CN`, `iw`) next to the plain
    /// ISO codes.
    pub fn from_str_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "ko" => Some(Self::Ko),
            "ja" => Some(Self::Ja),
            "zh" | "zh-cn" | "zh_cn" => Some(Self::Zh),
            "zh-tw" | "zh_tw" => Some(Self::ZhTw),
            "th" => Some(Self::Th),
            "vi" => Some(Self::Vi),
            "id" => Some(Self::Id),
            "ms" => Some(Self::Ms),
            "tl" | "fil" => Some(Self::Tl),
            "km" => Some(Self::Km),
            "my" => Some(Self::My),
            "hi" => Some(Self::Hi),
            "bn" => Some(Self::Bn),
            "ta" => Some(Self::Ta),
            "te" => Some(Self::Te),
            "ur" => Some(Self::Ur),
            "ne" => Some(Self::Ne),
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            "fr" => Some(Self::Fr),
            "de" => Some(Self::De),
            "it" => Some(Self::It),
            "pt" => Some(Self::Pt),
            "nl" => Some(Self::Nl),
            "ca" => Some(Self::Ca),
            "cy" => Some(Self::Cy),
            "is" => Some(Self::Is),
            "sv" => Some(Self::Sv),
            "da" => Some(Self::Da),
            "no" | "nb" => Some(Self::No),
            "fi" => Some(Self::Fi),
            "et" => Some(Self::Et),
            "lv" => Some(Self::Lv),
            "pl" => Some(Self::Pl),
            "cs" => Some(Self::Cs),
            "sk" => Some(Self::Sk),
            "hu" => Some(Self::Hu),
            "ro" => Some(Self::Ro),
            "bg" => Some(Self::Bg),
            "hr" => Some(Self::Hr),
            "sr" => Some(Self::Sr),
            "ru" => Some(Self::Ru),
            "uk" => Some(Self::Uk),
            "el" => Some(Self::El),
            "tr" => Some(Self::Tr),
            "ar" => Some(Self::Ar),
            "he" | "iw" => Some(Self::He),
            "sw" => Some(Self::Sw),
            "af" => Some(Self::Af),
            "eo" => Some(Self::Eo),
            "la" => Some(Self::La),
            _ => None,
        }
    }

    /// Return every supported language code.
    pub fn all() -> &'static [LanguageCode] {
        &[
            Self::Ko,
            Self::Ja,
            Self::Zh,
            Self::ZhTw,
            Self::Th,
            Self::Vi,
            Self::Id,
            Self::Ms,
            Self::Tl,
            Self::Km,
            Self::My,
            Self::Hi,
            Self::Bn,
            Self::Ta,
            Self::Te,
            Self::Ur,
            Self::Ne,
            Self::En,
            Self::Es,
            Self::Fr,
            Self::De,
            Self::It,
            Self::Pt,
            Self::Nl,
            Self::Ca,
            Self::Cy,
            Self::Is,
            Self::Sv,
            Self::Da,
            Self::No,
            Self::Fi,
            Self::Et,
            Self::Lv,
            Self::Pl,
            Self::Cs,
            Self::Sk,
            Self::Hu,
            Self::Ro,
            Self::Bg,
            Self::Hr,
            Self::Sr,
            Self::Ru,
            Self::Uk,
            Self::El,
            Self::Tr,
            Self::Ar,
            Self::He,
            Self::Sw,
            Self::Af,
            Self::Eo,
            Self::La,
        ]
    }
}

impl std::fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Self::from_str_code(&code).ok_or_else(|| format!("Unsupported language code: {code}"))
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.as_str().to_string()
    }
}

// ── Detectable languages ─────────────────────────────────────────

/// Every language the detection backend may report, keyed by lowercase
/// code. Wider than [`LanguageCode`], which only lists speakable voices.
#[rustfmt::skip]
const DETECTABLE_LANGUAGES: &[(&str, &str)] = &[
    ("af", "Afrikaans"), ("sq", "Albanian"), ("am", "Amharic"), ("ar", "Arabic"),
    ("hy", "Armenian"), ("az", "Azerbaijani"), ("eu", "Basque"), ("be", "Belarusian"),
    ("bn", "Bengali"), ("bs", "Bosnian"), ("bg", "Bulgarian"), ("ca", "Catalan"),
    ("ceb", "Cebuano"), ("ny", "Chichewa"), ("zh-cn", "Chinese (Simplified)"),
    ("zh-tw", "Chinese (Traditional)"), ("co", "Corsican"), ("hr", "Croatian"),
    ("cs", "Czech"), ("da", "Danish"), ("nl", "Dutch"), ("en", "English"),
    ("eo", "Esperanto"), ("et", "Estonian"), ("tl", "Filipino"), ("fi", "Finnish"),
    ("fr", "French"), ("fy", "Frisian"), ("gl", "Galician"), ("ka", "Georgian"),
    ("de", "German"), ("el", "Greek"), ("gu", "Gujarati"), ("ht", "Haitian Creole"),
    ("ha", "Hausa"), ("haw", "Hawaiian"), ("iw", "Hebrew"), ("he", "Hebrew"),
    ("hi", "Hindi"), ("hmn", "Hmong"), ("hu", "Hungarian"), ("is", "Icelandic"),
    ("ig", "Igbo"), ("id", "Indonesian"), ("ga", "Irish"), ("it", "Italian"),
    ("ja", "Japanese"), ("jw", "Javanese"), ("kn", "Kannada"), ("kk", "Kazakh"),
    ("km", "Khmer"), ("ko", "Korean"), ("ku", "Kurdish (Kurmanji)"), ("ky", "Kyrgyz"),
    ("lo", "Lao"), ("la", "Latin"), ("lv", "Latvian"), ("lt", "Lithuanian"),
    ("lb", "Luxembourgish"), ("mk", "Macedonian"), ("mg", "Malagasy"), ("ms", "Malay"),
    ("ml", "Malayalam"), ("mt", "Maltese"), ("mi", "Maori"), ("mr", "Marathi"),
    ("mn", "Mongolian"), ("my", "Myanmar (Burmese)"), ("ne", "Nepali"),
    ("no", "Norwegian"), ("or", "Odia"), ("ps", "Pashto"), ("fa", "Persian"),
    ("pl", "Polish"), ("pt", "Portuguese"), ("pa", "Punjabi"), ("ro", "Romanian"),
    ("ru", "Russian"), ("sm", "Samoan"), ("gd", "Scots Gaelic"), ("sr", "Serbian"),
    ("st", "Sesotho"), ("sn", "Shona"), ("sd", "Sindhi"), ("si", "Sinhala"),
    ("sk", "Slovak"), ("sl", "Slovenian"), ("so", "Somali"), ("es", "Spanish"),
    ("su", "Sundanese"), ("sw", "Swahili"), ("sv", "Swedish"), ("tg", "Tajik"),
    ("ta", "Tamil"), ("te", "Telugu"), ("th", "Thai"), ("tr", "Turkish"),
    ("uk", "Ukrainian"), ("ur", "Urdu"), ("ug", "Uyghur"), ("uz", "Uzbek"),
    ("vi", "Vietnamese"), ("cy", "Welsh"), ("xh", "Xhosa"), ("yi", "Yiddish"),
    ("yo", "Yoruba"), ("zu", "Zulu"),
];

/// Name of a language code reported by the detector (case-insensitive),
/// or `None` when the detector's vocabulary has no such code.
pub fn detected_language_name(code: &str) -> Option<&'static str> {
    let code = code.to_lowercase();
    DETECTABLE_LANGUAGES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, name)| *name)
}

// ── Tests ────────────────────────────────────────────────────────
